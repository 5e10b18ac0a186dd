//! Command-line argument parser for the synthetic driver.
//!
//! Hand-rolled: the flag set is tiny and the binary exists to time the
//! engine, so startup stays free of parser machinery.

/// What the driver should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run the synthetic simulation.
    Run,
    /// Print usage and exit.
    PrintHelp,
    /// Print the version and exit.
    PrintVersion,
}

/// Parsed driver options.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverArgs {
    /// Frames to simulate.
    pub frames: u32,
    /// Random-ish writes per simulated frame.
    pub writes: usize,
    /// Tracked region size in MiB.
    pub state_mib: usize,
    /// Total copy parallelism (including the driver thread).
    pub workers: usize,
    /// Rollback history depth in frames.
    pub history: u32,
    /// Roll back every this many frames.
    pub rollback_interval: u32,
    /// Per-frame diagnostics on stderr.
    pub trace: bool,
    /// Selected mode.
    pub mode: Mode,
}

impl Default for DriverArgs {
    fn default() -> Self {
        DriverArgs {
            frames: 100,
            writes: 1500,
            state_mib: 170,
            workers: 4,
            history: 7,
            rollback_interval: 15,
            trace: false,
            mode: Mode::Run,
        }
    }
}

/// Argument parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Flag is not recognized.
    UnknownFlag(String),
    /// Flag requires a value and none was given.
    MissingValue(&'static str),
    /// Value did not parse as a number.
    BadValue(&'static str, String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::UnknownFlag(flag) => write!(f, "unknown flag: {}", flag),
            ParseError::MissingValue(flag) => write!(f, "{} requires a value", flag),
            ParseError::BadValue(flag, value) => {
                write!(f, "{} got a non-numeric value: {}", flag, value)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Usage text printed for `--help` and after usage errors.
pub const USAGE: &str = "\
rewind - synthetic rollback-engine driver

USAGE:
    rewind [OPTIONS]

OPTIONS:
    --frames <N>             Frames to simulate (default 100)
    --writes <N>             Writes per frame (default 1500)
    --state-mib <N>          Tracked region size in MiB (default 170)
    --workers <N>            Copy parallelism incl. this thread (default 4)
    --history <N>            Rollback depth in frames (default 7)
    --rollback-interval <N>  Roll back every N frames (default 15)
    --trace                  Per-frame diagnostics on stderr
    -h, --help               Print this help
    -V, --version            Print version
";

/// Parse the process arguments (without the program name).
pub fn parse(mut args: impl Iterator<Item = String>) -> Result<DriverArgs, ParseError> {
    let mut parsed = DriverArgs::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => parsed.mode = Mode::PrintHelp,
            "-V" | "--version" => parsed.mode = Mode::PrintVersion,
            "--trace" => parsed.trace = true,
            "--frames" => parsed.frames = numeric(&mut args, "--frames")?,
            "--writes" => parsed.writes = numeric(&mut args, "--writes")?,
            "--state-mib" => parsed.state_mib = numeric(&mut args, "--state-mib")?,
            "--workers" => parsed.workers = numeric(&mut args, "--workers")?,
            "--history" => parsed.history = numeric(&mut args, "--history")?,
            "--rollback-interval" => {
                parsed.rollback_interval = numeric(&mut args, "--rollback-interval")?
            }
            other => return Err(ParseError::UnknownFlag(other.to_string())),
        }
    }

    Ok(parsed)
}

fn numeric<T: std::str::FromStr>(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<T, ParseError> {
    let value = args.next().ok_or(ParseError::MissingValue(flag))?;
    value
        .parse()
        .map_err(|_| ParseError::BadValue(flag, value))
}
