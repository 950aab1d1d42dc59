fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Write build-time information (git hash, compiler, timestamp) for the CLI banner.
    built::write_built_file().expect("Failed to acquire build-time information");
}
