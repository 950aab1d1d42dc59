// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Command Line Interface helpers for delayspec

use std::{
    collections::HashMap,
    ffi::OsString,
    fmt::{Debug, Display},
    path::PathBuf,
    str::FromStr,
    time::{Duration, Instant},
};

use clap::{
    arg, command,
    ErrorKind::{ArgumentNotFound, DisplayHelp, DisplayVersion},
    PossibleValue,
    ValueHint::FilePath,
};
use log::{debug, info, trace};
use prettytable::{cell, format as prettyformat, row, table};

use crate::{
    config::{DelaySpectrumConfig, DelaySpectrumConfigBuilder},
    constants::{
        DEFAULT_A_EFF_M2, DEFAULT_EFF_Q, DEFAULT_FREQ_RES_HZ, DEFAULT_FREQ_START_HZ,
        DEFAULT_LATITUDE_DEG, DEFAULT_NCHAN, DEFAULT_T_ACC_S, SIDEREAL_DAY_S,
    },
    delay_spectrum::{CleanStatus, DelaySpectrum, NoiseEstimates},
    error::{
        AppError::{self, ClapError, DryRun},
        CLIError::{InvalidCommandLineArgument, MissingCommandLineArgument},
    },
    horizon::{PhaseCentre, PhaseCentreCoords},
    io::write_delay_spectrum_fits,
    marlu::{
        ndarray::{Array1, Array2},
        RADec,
    },
    simulate::{observe, BeamKind, NoiseModel, Observation, SkySource},
    weights::FreqWeights,
};

/// Frequency weighting applied before the delay transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Uniform weights
    Rectangular,
    /// A Blackman window across the band
    Blackman,
}

impl Window {
    fn weights(self, nchan: usize) -> FreqWeights {
        match self {
            Self::Rectangular => FreqWeights::Unity,
            Self::Blackman => FreqWeights::blackman(nchan),
        }
    }
}

/// A synthetic observation to simulate, clean and write out.
pub struct CliContext {
    /// What to simulate
    pub observation: Observation,
    /// How to transform, clean and estimate noise
    pub config: DelaySpectrumConfig,
    /// Frequency weighting
    pub window: Window,
    /// Optional .fits output path
    pub fits_out: Option<PathBuf>,
}

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

/// Write many info-level log lines of how this executable was compiled.
///
/// # Errors
///
/// propagates writeln! fails
pub fn fmt_build_info(f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match (GIT_HEAD_REF, GIT_COMMIT_HASH) {
        (Some(hr), Some(hash)) => {
            let dirty = GIT_DIRTY.unwrap_or(false);
            writeln!(
                f,
                "Compiled on git commit hash: {}{}",
                hash,
                if dirty { " (dirty)" } else { "" }
            )?;
            writeln!(f, "            git head ref: {hr}")?;
        }
        _ => writeln!(f, "Compiled on git commit hash: <no git info>")?,
    }
    writeln!(f, "            {BUILT_TIME_UTC}")?;
    writeln!(f, "         with compiler {RUSTC_VERSION}")?;
    writeln!(f)?;
    Ok(())
}

impl Display for CliContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} version {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        )?;

        fmt_build_info(f)?;

        let obs = &self.observation;
        let nchan = obs.freqs_hz.len();
        let (first, last) = (obs.freqs_hz[0], obs.freqs_hz[nchan - 1]);
        writeln!(
            f,
            "Band:                 {} channels {:.4} - {:.4} MHz",
            nchan,
            first / 1e6,
            last / 1e6
        )?;
        writeln!(
            f,
            "Snapshots:            {} x {} s from lst={:7.4}°",
            obs.lsts_deg.len(),
            obs.t_acc_s,
            obs.lsts_deg[0]
        )?;
        writeln!(f, "Array latitude:       {:7.4}°", obs.latitude_rad.to_degrees())?;
        writeln!(f, "Beam:                 {:?}", obs.beam)?;
        writeln!(f, "Noise:                {:?}", obs.noise)?;
        writeln!(f, "Window:               {:?}", self.window)?;

        let mut baseline_table = table!(["", "E [m]", "N [m]", "U [m]", "|b| [m]"]);
        baseline_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
        for (label, b) in obs.labels.iter().zip(obs.baselines.outer_iter()) {
            baseline_table.add_row(row![r =>
                label,
                format!("{:.3}", b[0]),
                format!("{:.3}", b[1]),
                format!("{:.3}", b[2]),
                format!("{:.3}", b.dot(&b).sqrt())
            ]);
        }
        writeln!(f, "Baselines ({}):\n{}", obs.labels.len(), baseline_table)?;

        let mut source_table = table!(["", "RA [°]", "Dec [°]", "S [Jy]", "alpha"]);
        source_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
        for (idx, source) in obs.sources.iter().enumerate() {
            source_table.add_row(row![r =>
                format!("src{idx}:"),
                format!("{:.4}", source.radec.ra.to_degrees()),
                format!("{:.4}", source.radec.dec.to_degrees()),
                format!("{:.3}", source.flux_jy),
                format!("{:.2}", source.spectral_index)
            ]);
        }
        writeln!(f, "Sources ({}):\n{}", obs.sources.len(), source_table)?;

        write!(f, "{}", self.config)?;
        if let Some(path) = &self.fits_out {
            writeln!(f, "Will write delay spectra to {}", path.display())?;
        } else {
            writeln!(f, "Will not write delay spectra.")?;
        }
        Ok(())
    }
}

/// Parse `value` as `N` comma separated numbers.
fn parse_floats<const N: usize>(
    option: &str,
    expected: &str,
    value: &str,
) -> Result<[f64; N], AppError> {
    let invalid = || {
        AppError::CLIError(InvalidCommandLineArgument {
            option: option.into(),
            expected: expected.into(),
            received: value.into(),
        })
    };
    let parsed = value
        .split(',')
        .map(|v| f64::from_str(v.trim()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;
    parsed.try_into().map_err(|_| invalid())
}

/// The value of `name`, `default` if it was not given.
fn value_or<T>(matches: &clap::ArgMatches, name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    <T as FromStr>::Err: Display,
{
    match matches.value_of_t::<T>(name) {
        Ok(value) => Ok(value),
        Err(err) if err.kind() == ArgumentNotFound => Ok(default),
        Err(err) => Err(err.into()),
    }
}

impl CliContext {
    fn get_matches<I, T>(args: I) -> Result<clap::ArgMatches, AppError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        let mut app = command!()
            .next_line_help(false)
            .about("Simulate a drift scan with a few baselines, then delay transform, \
                    clean within the horizon and estimate the noise of each baseline.")
            .args(&[
                // observation
                arg!(--baseline <ENU> "Baseline vector East,North,Up [m], repeat for more baselines")
                    .help_heading("OBSERVATION")
                    .allow_hyphen_values(true)
                    .multiple_occurrences(true)
                    .required(false),
                arg!(--"num-chans" <COUNT> "Number of fine channels")
                    .help_heading("OBSERVATION")
                    .required(false),
                arg!(--"start-freq" <MHZ> "Centre frequency of the first channel [MHz]")
                    .help_heading("OBSERVATION")
                    .required(false),
                arg!(--"chan-width" <KHZ> "Fine channel width [kHz]")
                    .help_heading("OBSERVATION")
                    .required(false),
                arg!(--"num-snapshots" <COUNT> "Number of snapshots")
                    .help_heading("OBSERVATION")
                    .required(false),
                arg!(--"int-time" <SECONDS> "Accumulation time of each snapshot [s]")
                    .help_heading("OBSERVATION")
                    .required(false),
                arg!(--lst <DEGREES> "Local sidereal time of the first snapshot")
                    .help_heading("OBSERVATION")
                    .required(false),
                arg!(--latitude <DEGREES> "Latitude of the array")
                    .help_heading("OBSERVATION")
                    .allow_hyphen_values(true)
                    .required(false),
                arg!(--"phase-centre" "Phase centre altitude and azimuth (degrees), zenith if absent")
                    .help_heading("OBSERVATION")
                    .value_names(&["ALT", "AZ"])
                    .required(false),
                arg!(--source <SOURCE> "Point source RA,Dec,flux[,index] (degrees, Jy at 150 MHz), repeat for more")
                    .help_heading("OBSERVATION")
                    .allow_hyphen_values(true)
                    .multiple_occurrences(true)
                    .required(false),
                arg!(--beam <BEAM> "Primary beam: isotropic, gaussian or gaussian:<FWHM>@<MHZ>")
                    .help_heading("OBSERVATION")
                    .required(false)
                    .default_value("isotropic"),
                arg!(--"noise-rms" <JY> "Noise rms of each visibility [Jy]")
                    .help_heading("NOISE")
                    .required(false),
                arg!(--tsys <KELVIN> "System temperature for radiometer noise")
                    .help_heading("NOISE")
                    .conflicts_with("noise-rms")
                    .required(false),
                arg!(--"a-eff" <M2> "Effective area of one antenna for radiometer noise [m^2]")
                    .help_heading("NOISE")
                    .requires("tsys")
                    .required(false),
                arg!(--"eff-q" <FRACTION> "Interferometer efficiency for radiometer noise")
                    .help_heading("NOISE")
                    .requires("tsys")
                    .required(false),
                arg!(--seed <SEED> "Seed of the noise generator")
                    .help_heading("NOISE")
                    .required(false)
                    .default_value("0"),

                // delay transform and clean
                arg!(--window <TYPE> "Frequency weighting before the delay transform")
                    .help_heading("DELAY")
                    .possible_values([
                        PossibleValue::new("rect").help("Uniform weights"),
                        PossibleValue::new("blackman").help("Blackman window across the band"),
                    ])
                    .required(false)
                    .default_value("rect"),
                arg!(--pad <FRACTION> "Zero-padding as a fraction of the channel count")
                    .help_heading("DELAY")
                    .required(false),
                arg!(--"no-downsample" "Keep every delay of the padded plain transform")
                    .help_heading("DELAY"),
                arg!(--"clean-buffer" <FACTOR> "Widen the clean window by <FACTOR> / bandwidth each side")
                    .help_heading("CLEAN")
                    .required(false),
                arg!(--gain <GAIN> "CLEAN loop gain")
                    .help_heading("CLEAN")
                    .required(false),
                arg!(--tol <TOL> "CLEAN convergence tolerance")
                    .help_heading("CLEAN")
                    .required(false),
                arg!(--maxiter <COUNT> "Iteration cap of each CLEAN pass")
                    .help_heading("CLEAN")
                    .required(false),
                arg!(--"max-memory" <BYTES> "Limit the padded cubes of a clean to <BYTES>")
                    .help_heading("CLEAN")
                    .required(false),
                arg!(--polydegree <DEGREE> "Degree of the polynomials fitted outside the horizon")
                    .help_heading("NOISE ESTIMATE")
                    .required(false),
                arg!(--filter <METHOD> "Filter of the noise estimator residuals")
                    .help_heading("NOISE ESTIMATE")
                    .possible_values([
                        PossibleValue::new("hpf").help("High pass filter above the horizon"),
                        PossibleValue::new("ma").help("Subtract a moving average"),
                    ])
                    .required(false)
                    .default_value("hpf"),

                // output
                arg!(-o --output <PATH> "Path for the .fits output")
                    .help_heading("OUTPUT")
                    .value_hint(FilePath)
                    .required(false),
                arg!(--"dry-run" "Just print the summary and exit"),
                arg!(--"no-draw-progress" "do not show progress bars"),
            ]);
        let matches = app.try_get_matches_from_mut(args)?;
        Ok(matches)
    }

    fn parse_observation_matches(matches: &clap::ArgMatches) -> Result<Observation, AppError> {
        let baselines = match matches.values_of("baseline") {
            Some(values) => values
                .map(|v| parse_floats::<3>("--baseline <ENU>", "three numbers E,N,U", v))
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![[14.6, 0.0, 0.0]],
        };
        let nbl = baselines.len();
        let labels = (0..nbl).map(|b| format!("bl{b}")).collect();
        let baselines = Array2::from_shape_fn((nbl, 3), |(b, c)| baselines[b][c]);

        let nchan: usize = value_or(matches, "num-chans", DEFAULT_NCHAN)?;
        if nchan < 2 {
            return Err(AppError::CLIError(InvalidCommandLineArgument {
                option: "--num-chans <COUNT>".into(),
                expected: "at least 2".into(),
                received: nchan.to_string(),
            }));
        }
        let start_freq_hz = value_or(matches, "start-freq", DEFAULT_FREQ_START_HZ / 1e6)? * 1e6;
        let freq_res_hz = value_or(matches, "chan-width", DEFAULT_FREQ_RES_HZ / 1e3)? * 1e3;
        let freqs_hz = Array1::from_shape_fn(nchan, |c| start_freq_hz + c as f64 * freq_res_hz);

        let nsnap: usize = value_or(matches, "num-snapshots", 1)?;
        if nsnap == 0 {
            return Err(AppError::CLIError(InvalidCommandLineArgument {
                option: "--num-snapshots <COUNT>".into(),
                expected: "at least 1".into(),
                received: nsnap.to_string(),
            }));
        }
        let t_acc_s = value_or(matches, "int-time", DEFAULT_T_ACC_S)?;
        let lst_deg: f64 = value_or(matches, "lst", 0.0)?;
        let latitude_deg = value_or(matches, "latitude", DEFAULT_LATITUDE_DEG)?;
        let lsts_deg = Array1::from_shape_fn(nsnap, |t| {
            (lst_deg + t as f64 * t_acc_s * 360.0 / SIDEREAL_DAY_S).rem_euclid(360.0)
        });

        let phase_centre = match matches
            .values_of_t::<f64>("phase-centre")
            .map(|v| (v[0], v[1]))
        {
            Ok((alt, az)) => PhaseCentre::fixed(PhaseCentreCoords::AltAz, &[alt, az], nsnap)?,
            Err(err) if err.kind() != ArgumentNotFound => return Err(err.into()),
            Err(_) => PhaseCentre::zenith(nsnap),
        };

        let sources = match matches.values_of("source") {
            Some(values) => values
                .map(|v| {
                    let expected = "RA,Dec,flux or RA,Dec,flux,index";
                    let [ra, dec, flux_jy, spectral_index] =
                        match parse_floats::<4>("--source <SOURCE>", expected, v) {
                            Ok(parsed) => parsed,
                            Err(_) => {
                                let [ra, dec, flux] =
                                    parse_floats::<3>("--source <SOURCE>", expected, v)?;
                                [ra, dec, flux, 0.0]
                            }
                        };
                    Ok(SkySource {
                        radec: RADec::from_degrees(ra, dec),
                        flux_jy,
                        spectral_index,
                        ref_freq_hz: DEFAULT_FREQ_START_HZ,
                    })
                })
                .collect::<Result<Vec<_>, AppError>>()?,
            // a flat spectrum source transiting zenith at the first snapshot
            None => vec![SkySource {
                radec: RADec::from_degrees(lst_deg, latitude_deg),
                flux_jy: 1.0,
                spectral_index: 0.0,
                ref_freq_hz: DEFAULT_FREQ_START_HZ,
            }],
        };

        let beam = match matches.value_of("beam") {
            Some(beam) => BeamKind::from_str(beam)?,
            None => unreachable!("--beam has a default, enforced by clap"),
        };

        let noise = match (
            matches.value_of_t::<f64>("noise-rms"),
            matches.value_of_t::<f64>("tsys"),
        ) {
            (Err(err), _) if err.kind() != ArgumentNotFound => return Err(err.into()),
            (_, Err(err)) if err.kind() != ArgumentNotFound => return Err(err.into()),
            (Ok(_), Ok(_)) => unreachable!("--noise-rms conflicts with --tsys, enforced by clap"),
            (Ok(rms), _) => NoiseModel::Rms(rms),
            (_, Ok(tsys_k)) => NoiseModel::Thermal {
                tsys_k,
                a_eff_m2: value_or(matches, "a-eff", DEFAULT_A_EFF_M2)?,
                eff_q: value_or(matches, "eff-q", DEFAULT_EFF_Q)?,
            },
            _ => NoiseModel::Noiseless,
        };

        Ok(Observation {
            labels,
            baselines,
            freqs_hz,
            latitude_rad: latitude_deg.to_radians(),
            lsts_deg,
            t_acc_s,
            pointing_centre: PhaseCentre::zenith(nsnap),
            phase_centre,
            sources,
            beam,
            noise,
            seed: value_or(matches, "seed", 0)?,
        })
    }

    fn parse_config_matches(matches: &clap::ArgMatches) -> Result<DelaySpectrumConfig, AppError> {
        let mut builder = DelaySpectrumConfigBuilder::default();
        builder
            .downsample(!matches.is_present("no-downsample"))
            .draw_progress(!matches.is_present("no-draw-progress"));
        if let Some(pad) = optional_value(matches, "pad")? {
            builder.pad(pad);
        }
        if let Some(buffer) = optional_value(matches, "clean-buffer")? {
            builder.clean_window_buffer(buffer);
        }
        if let Some(gain) = optional_value(matches, "gain")? {
            builder.gain(gain);
        }
        if let Some(tol) = optional_value(matches, "tol")? {
            builder.tol(tol);
        }
        if let Some(maxiter) = optional_value(matches, "maxiter")? {
            builder.maxiter(maxiter);
        }
        if let Some(polydegree) = optional_value(matches, "polydegree")? {
            builder.polydegree(polydegree);
        }
        if let Some(filter) = matches.value_of("filter") {
            builder.filter_method(filter.parse()?);
        }
        builder.max_bytes(optional_value(matches, "max-memory")?);
        builder.build().map_err(|e| {
            AppError::CLIError(InvalidCommandLineArgument {
                option: "delay spectrum options".into(),
                expected: "a consistent configuration".into(),
                received: e.to_string(),
            })
        })
    }

    /// Parse an observation, configuration and output path from command line
    /// arguments, logging a summary of what will be done.
    ///
    /// # Errors
    ///
    /// Can raise:
    /// - `clap::Error` if clap cannot parse `args`
    /// - `AppError::CLIError` if the arguments are invalid.
    /// - `AppError::Simulation` for an unusable beam description.
    /// - `AppError::DryRun` if only the summary was asked for.
    pub fn from_args<I, T>(args: I) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        debug!("args:\n{:?}", &args);

        let matches = Self::get_matches(args)?;
        trace!("arg matches:\n{:?}", &matches);

        let observation = Self::parse_observation_matches(&matches)?;
        let config = Self::parse_config_matches(&matches)?;
        let window = match matches.value_of("window") {
            Some("blackman") => Window::Blackman,
            _ => Window::Rectangular,
        };
        let fits_out = matches.value_of("output").map(PathBuf::from);

        let result = Self {
            observation,
            config,
            window,
            fits_out,
        };

        info!("{}", &result);

        if matches.is_present("dry-run") {
            return Err(DryRun {});
        }

        if result.fits_out.is_none() {
            return Err(AppError::CLIError(MissingCommandLineArgument {
                option: "--output <PATH>".into(),
            }));
        }

        Ok(result)
    }

    /// Simulate, clean, estimate noise and write the delay spectra.
    ///
    /// Returns how long each stage took.
    ///
    /// # Errors
    ///
    /// can raise:
    /// - `AppError::Simulation` if the observation can't be simulated.
    /// - `AppError::DelaySpectrum` if the delay spectra can't be computed.
    /// - `AppError::IO` if the output can't be written.
    pub fn run(self) -> Result<HashMap<String, Duration>, AppError> {
        let CliContext {
            observation,
            config,
            window,
            fits_out,
        } = self;

        // used to time large operations
        let mut durations = HashMap::<String, Duration>::new();

        let start = Instant::now();
        let array = observe(&observation)?;
        durations.insert("simulate".into(), start.elapsed());

        let mut spectrum = DelaySpectrum::new(array);
        spectrum.set_bandpass_weights(&window.weights(observation.freqs_hz.len()))?;

        let start = Instant::now();
        spectrum.delay_transform(&config)?;
        spectrum.clean(&config)?;
        durations.insert("clean".into(), start.elapsed());

        let start = Instant::now();
        let noise = spectrum.noise_estimate(&config)?;
        durations.insert("noise".into(), start.elapsed());

        info!("{}", summary_table(&spectrum, &noise)?);

        if let Some(path) = fits_out {
            let start = Instant::now();
            write_delay_spectrum_fits(&path, &spectrum)?;
            durations.insert("write".into(), start.elapsed());
            info!("wrote {}", path.display());
        }
        Ok(durations)
    }
}

fn optional_value<T>(matches: &clap::ArgMatches, name: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    <T as FromStr>::Err: Display,
{
    match matches.value_of_t::<T>(name) {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.kind() == ArgumentNotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// One row per baseline: horizon, clean outcome and noise estimates.
fn summary_table(
    spectrum: &DelaySpectrum,
    noise: &NoiseEstimates,
) -> Result<prettytable::Table, AppError> {
    let array = spectrum.array();
    let status = spectrum.clean_status()?;
    let lengths = array.baseline_lengths();
    let mut table = table!([
        "",
        "|b| [m]",
        "horizon [ns]",
        "cleaned",
        "failed",
        "ncycle",
        "thermal [Jy]",
        "fg [Jy]"
    ]);
    table.set_format(*prettyformat::consts::FORMAT_CLEAN);
    for (bl, label) in array.labels().iter().enumerate() {
        let (mut cleaned, mut failed, mut ncycle) = (0, 0, 0);
        for unit in status.row(bl) {
            match unit {
                CleanStatus::Cleaned { ncycle_vis, .. } => {
                    cleaned += 1;
                    ncycle += ncycle_vis;
                }
                CleanStatus::Failed(_) => failed += 1,
            }
        }
        let mean = |values: Vec<f64>| {
            let finite = values.into_iter().filter(|v| v.is_finite()).collect::<Vec<_>>();
            if finite.is_empty() {
                f64::NAN
            } else {
                finite.iter().sum::<f64>() / finite.len() as f64
            }
        };
        table.add_row(row![r =>
            format!("{label}:"),
            format!("{:.3}", lengths[bl]),
            format!("{:.2}", lengths[bl] / crate::constants::VEL_C * 1e9),
            cleaned,
            failed,
            if cleaned > 0 { format!("{:.1}", ncycle as f64 / cleaned as f64) } else { "-".into() },
            format!("{:.4}", mean(noise.thermal_noise.row(bl).to_vec())),
            format!("{:.4}", mean(noise.foreground_noise.row(bl).to_vec()))
        ]);
    }
    Ok(table)
}

/// Run delayspec with `args`, returning the process exit code.
pub fn main_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
    I: Debug,
{
    let cli_ctx = match CliContext::from_args(args) {
        Ok(cli_ctx) => cli_ctx,
        Err(DryRun {}) => {
            info!("Dry run. No files will be written.");
            return 0;
        }
        Err(ClapError(inner)) => {
            // Swallow broken pipe errors
            trace!("clap error: {:?}", inner.kind());
            let _ = inner.print();
            match inner.kind() {
                DisplayHelp | DisplayVersion => return 0,
                _ => return 1,
            }
        }
        Err(e) => {
            eprintln!("error parsing args: {e}");
            return 1;
        }
    };

    match cli_ctx.run() {
        Ok(durations) => {
            info!(
                "total duration: {:?}",
                durations
                    .into_iter()
                    .fold(Duration::ZERO, |duration_sum, (name, duration)| {
                        info!("{} duration: {:?}", name, duration);
                        duration_sum + duration
                    })
            );
            0
        }
        Err(e) => {
            eprintln!("delay spectrum error: {e}");
            1
        }
    }
}


#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::io::read_fits_section;

    #[test]
    fn main_with_version_succeeds() {
        assert_eq!(main_with_args(["delayspec", "--version"]), 0);
    }

    #[test]
    fn main_with_help_succeeds() {
        assert_eq!(main_with_args(["delayspec", "--help"]), 0);
    }

    #[test]
    fn main_with_dry_run_doesnt_crash() {
        assert_eq!(main_with_args(["delayspec", "--dry-run"]), 0);
    }

    #[test]
    fn main_with_bad_arg_returns_1() {
        assert_ne!(main_with_args(["delayspec", "--gain", "0", "-o", "x.fits"]), 0);
        assert_ne!(
            main_with_args(["delayspec", "--beam", "fee", "-o", "x.fits"]),
            0
        );
    }

    #[test]
    fn run_writes_fits() {
        let tmp_dir = tempdir().unwrap();
        let fits_path = tmp_dir.path().join("delay.fits");

        #[rustfmt::skip]
        let ctx = CliContext::from_args([
            "delayspec",
            "--baseline", "14.6,0,0",
            "--baseline", "30,10,0",
            "--num-chans", "32",
            "--num-snapshots", "2",
            "--noise-rms", "0.01",
            "--no-draw-progress",
            "-o", fits_path.to_str().unwrap(),
        ]).unwrap();
        let durations = ctx.run().unwrap();
        assert!(durations.contains_key("clean"));
        assert!(durations.contains_key("write"));

        let lags = read_fits_section(&fits_path, "LAGS").unwrap();
        assert_eq!(lags.shape(), &[64]);
        let cc = read_fits_section(&fits_path, "VIS_CC_LAG_REAL").unwrap();
        assert_eq!(cc.shape(), &[2, 64, 2]);
    }
}
