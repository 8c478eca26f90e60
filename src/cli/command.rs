use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::filter::LevelFilter;

use crate::error::{CliConfigError, FixtureError};
use crate::hw::{FakeTransport, FakeTransportConfig, ResponseScript, ScanFixture};
use crate::protocol::MetricKind;

/// Command-line options for the wearable link tool.
#[derive(Debug, Parser)]
#[command(
    name = "wearlink",
    about = "Keep a wearable connected and sync its health data."
)]
pub struct Args {
    /// Log verbosity; overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output_format: Option<OutputFormat>,
    /// Path of the saved-device record.
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Uses the in-memory fake transport instead of Bluetooth.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake devices in the form `address|name|rssi;...` (`-` for unknown RSSI).
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Makes the fake device accept commands but never answer them.
    #[arg(long, global = true, requires = "fake")]
    fake_unresponsive: bool,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use wearlink::{Args, Command};
    ///
    /// let status = Args::new(Command::Status);
    /// let _ = status;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output_format: None,
            store: None,
            fake: false,
            fake_scan: None,
            fake_unresponsive: false,
            command,
        }
    }

    /// Enables fake transport mode with pre-parsed settings.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan_fixture,
            unresponsive,
        } = fake;
        self.fake = true;
        self.fake_scan = Some(scan_fixture);
        self.fake_unresponsive = unresponsive;
        self
    }

    /// Uses `path` for the saved-device record.
    #[must_use]
    pub fn with_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store = Some(path.into());
        self
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output_format
    }

    #[must_use]
    pub fn store_path(&self) -> Option<PathBuf> {
        self.store.clone()
    }

    /// Splits parsed arguments into the command and optional fake settings.
    ///
    /// # Errors
    ///
    /// Returns an error if fake mode is enabled without a scan fixture.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_unresponsive,
            command,
            ..
        } = self;

        let fake_args = if fake {
            let Some(scan_fixture) = fake_scan else {
                return Err(CliConfigError::MissingFakeScanFixture.into());
            };
            Some(FakeArgs {
                scan_fixture,
                unresponsive: fake_unresponsive,
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Fake transport arguments for programmatic runs.
#[derive(Debug, Clone, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(default)]
    unresponsive: bool,
}

impl FakeArgs {
    pub(crate) fn into_transport(self) -> FakeTransport {
        let Self {
            scan_fixture,
            unresponsive,
        } = self;

        FakeTransport::new(
            FakeTransportConfig::builder()
                .devices(scan_fixture.into())
                .maybe_default_script(unresponsive.then_some(ResponseScript::Silent))
                .build(),
        )
    }
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// How command results are written to stdout.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan for nearby wearables.
    Scan(ScanArgs),
    /// Connect to a wearable and keep the link alive until interrupted.
    Connect(ConnectArgs),
    /// Connect, sync one metric (or all of them) for a day, then disconnect.
    Sync(SyncArgs),
    /// Show the saved device and whether it would auto-connect.
    Status,
    /// Forget the saved device.
    Forget,
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Scan(_) => "scan",
            Self::Connect(_) => "connect",
            Self::Sync(_) => "sync",
            Self::Status => "status",
            Self::Forget => "forget",
        }
    }
}

/// Arguments for `scan`.
#[derive(Debug, Clone, clap::Args)]
pub struct ScanArgs {
    /// How long to scan (e.g. `5s`, `1m`).
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub duration: Duration,
    /// Only report devices whose name starts with this prefix.
    #[arg(long)]
    pub name_prefix: Option<String>,
}

impl ScanArgs {
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            name_prefix: None,
        }
    }
}

/// Arguments for `connect`.
#[derive(Debug, Clone, clap::Args)]
pub struct ConnectArgs {
    /// Address of the wearable.
    pub address: String,
    /// Advertised name, used to recognise the device if its address rotates.
    #[arg(long)]
    pub name: Option<String>,
    /// Disconnect after this long instead of waiting for Ctrl+C.
    #[arg(long = "for", value_parser = parse_duration)]
    pub run_for: Option<Duration>,
}

impl ConnectArgs {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            run_for: None,
        }
    }

    #[must_use]
    pub fn with_run_for(mut self, run_for: Duration) -> Self {
        self.run_for = Some(run_for);
        self
    }
}

/// Arguments for `sync`.
#[derive(Debug, Clone, clap::Args)]
pub struct SyncArgs {
    /// Metric to sync (`heart_rate`, `spo2`, `hrv`, `blood_pressure`,
    /// `temperature`, `stress`, `steps`) or `all`.
    pub target: SyncTarget,
    /// Days before today to sync.
    #[arg(long, default_value_t = 0)]
    pub offset: u32,
    /// How long to wait for the link before giving up.
    #[arg(long, default_value = "20s", value_parser = parse_duration)]
    pub timeout: Duration,
    /// Device address; defaults to the saved device.
    #[arg(long)]
    pub address: Option<String>,
}

impl SyncArgs {
    #[must_use]
    pub fn new(target: SyncTarget) -> Self {
        Self {
            target,
            offset: 0,
            timeout: Duration::from_secs(20),
            address: None,
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// What `sync` fetches.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SyncTarget {
    All,
    Metric(MetricKind),
}

impl FromStr for SyncTarget {
    type Err = strum::ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        value.parse().map(Self::Metric)
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn fake_mode_requires_scan_fixture() {
        let result = Args::try_parse_from(["wearlink", "--fake", "status"]);

        let error = result.expect_err("missing --fake-scan should fail argument parsing");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_scan_requires_fake_mode() {
        let result = Args::try_parse_from([
            "wearlink",
            "--fake-scan",
            "AA:BB:CC:DD:EE:01|R02_A1B2|-43",
            "status",
        ]);

        let error = result.expect_err("--fake-scan should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_mode_builds_fake_settings() {
        let cli = Args::try_parse_from([
            "wearlink",
            "--fake",
            "--fake-scan",
            "AA:BB:CC:DD:EE:01|R02_A1B2|-43",
            "scan",
            "--duration",
            "2s",
        ])
        .expect("valid fake arguments should parse");

        let (command, fake_args) = cli
            .into_command_and_fake_args()
            .expect("valid fake arguments should resolve fake settings");
        assert_matches!(command, Command::Scan(ScanArgs { duration, .. }) if duration == Duration::from_secs(2));
        assert_matches!(fake_args, Some(_));
    }

    #[test]
    fn sync_parses_metric_and_all() {
        let cli = Args::try_parse_from(["wearlink", "sync", "spo2", "--offset", "1"])
            .expect("sync arguments should parse");
        assert_matches!(
            cli.command,
            Command::Sync(SyncArgs {
                target: SyncTarget::Metric(MetricKind::SpO2),
                offset: 1,
                ..
            })
        );

        assert_eq!(Ok(SyncTarget::All), "all".parse::<SyncTarget>());
        assert!("pulse".parse::<SyncTarget>().is_err());
    }

    #[test]
    fn connect_accepts_run_for() {
        let cli = Args::try_parse_from(["wearlink", "connect", "AA:BB", "--for", "30s"])
            .expect("connect arguments should parse");
        assert_matches!(
            cli.command,
            Command::Connect(ConnectArgs { run_for: Some(run_for), .. }) if run_for == Duration::from_secs(30)
        );
    }

    #[test]
    fn log_level_maps_to_filter() {
        assert_eq!(LevelFilter::DEBUG, LogLevel::Debug.as_level_filter());
    }
}
