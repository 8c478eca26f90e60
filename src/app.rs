use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use bon::Builder;
use time::UtcOffset;
use tracing::instrument;

use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::gate::CommandGate;
use crate::handlers::{SyncConfig, SyncHandler};
use crate::hw::{BtleplugTransport, Transport};
use crate::link::{ConnectionManager, LinkConfig};
use crate::store::{DeviceStore, JsonFileStore};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Which transport the CLI drives.
#[derive(Debug, Clone)]
pub enum Backend {
    /// The host Bluetooth adapter.
    Real,
    /// The scripted in-memory transport.
    Fake(FakeArgs),
}

impl Backend {
    /// Opens the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if no Bluetooth adapter is available.
    pub async fn open(self) -> Result<Arc<dyn Transport>> {
        match self {
            Self::Real => Ok(Arc::new(BtleplugTransport::new(None).await?)),
            Self::Fake(fake_args) => Ok(Arc::new(fake_args.into_transport())),
        }
    }
}

impl From<Option<FakeArgs>> for Backend {
    fn from(fake_args: Option<FakeArgs>) -> Self {
        fake_args.map_or(Self::Real, Self::Fake)
    }
}

/// The command gate, connection manager and sync façade over one transport.
#[derive(Debug, Clone)]
pub struct LinkStack {
    pub gate: Arc<CommandGate>,
    pub manager: Arc<ConnectionManager>,
    pub sync: SyncHandler,
}

impl LinkStack {
    /// Wires the link layers together. Must be called within a Tokio runtime.
    ///
    /// ```
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// use std::sync::Arc;
    ///
    /// let transport = Arc::new(wearlink::FakeTransport::with_devices(Vec::new()));
    /// let stack = wearlink::LinkStack::assemble(
    ///     transport,
    ///     wearlink::LinkConfig::default(),
    ///     wearlink::SyncConfig::default(),
    /// );
    /// assert!(!stack.manager.is_connected());
    /// # }
    /// ```
    #[must_use]
    pub fn assemble(
        transport: Arc<dyn Transport>,
        link_config: LinkConfig,
        sync_config: SyncConfig,
    ) -> Self {
        let gate = Arc::new(CommandGate::new(Arc::clone(&transport)));
        let manager = ConnectionManager::spawn(transport, Arc::clone(&gate), link_config);
        let sync = SyncHandler::new(Arc::clone(&gate), sync_config);
        Self {
            gate,
            manager,
            sync,
        }
    }
}

/// Process-level settings shared by every command.
#[derive(Debug, Clone, Default, Builder)]
pub struct RunOptions {
    /// Overrides `RUST_LOG` when set.
    log_level: Option<LogLevel>,
    /// Defaults to `pretty` on a terminal and `json` otherwise.
    output_format: Option<OutputFormat>,
    /// Defaults to the per-user state directory.
    store_path: Option<PathBuf>,
    /// Offset used to find local midnight. Defaults to UTC.
    utc_offset: Option<UtcOffset>,
}

/// Runs the CLI command with default options.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = wearlink::Args::try_parse_from([
///     "wearlink",
///     "--fake",
///     "--fake-scan",
///     "AA:BB:CC:DD:EE:01|R02_A1B2|-43",
///     "scan",
///     "--duration",
///     "1s",
/// ])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let mut out = Vec::new();
/// wearlink::run(command, &mut out, maybe_fake_args.into()).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the link cannot be
/// established, the device record cannot be read or written, or output
/// writing fails.
pub async fn run<W>(command: Command, out: &mut W, backend: Backend) -> Result<()>
where
    W: io::Write,
{
    run_with_options(command, out, backend, RunOptions::default()).await
}

/// Runs the CLI command with explicit process options.
///
/// # Errors
///
/// See [`run`].
pub async fn run_with_options<W>(
    command: Command,
    out: &mut W,
    backend: Backend,
    options: RunOptions,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(command, out, &SystemTerminalClient, backend, options).await
}

/// Runs the CLI command with injected clients and explicit options.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// struct FakeTerminal;
/// impl wearlink::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let options = wearlink::RunOptions::builder()
///     .store_path(std::env::temp_dir().join("wearlink-doc").join("last-device.json"))
///     .build();
/// let mut out = Vec::new();
/// wearlink::run_with_clients(
///     wearlink::Command::Status,
///     &mut out,
///     &FakeTerminal,
///     wearlink::Backend::Real,
///     options,
/// ).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// See [`run`].
#[instrument(
    skip(out, terminal_client, backend, options),
    level = "info",
    fields(command = %command.name(), log_level = ?options.log_level)
)]
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    backend: Backend,
    options: RunOptions,
) -> Result<()>
where
    W: io::Write,
{
    let RunOptions {
        log_level,
        output_format,
        store_path,
        utc_offset,
    } = options;
    telemetry::initialise_tracing(
        "wearlink",
        terminal_client.stderr_is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    let output_format = output_format.unwrap_or(if terminal_client.stdout_is_terminal() {
        OutputFormat::Pretty
    } else {
        OutputFormat::Json
    });
    let store = device_store(store_path);
    let sync_config = SyncConfig::builder()
        .utc_offset(utc_offset.unwrap_or(UtcOffset::UTC))
        .build();

    match command {
        Command::Status => {
            crate::cli::status::run(store.as_ref(), out, terminal_client, output_format)
        }
        Command::Forget => {
            crate::cli::forget::run(store.as_ref(), out, terminal_client, output_format)
        }
        Command::Scan(args) => {
            let transport = backend.open().await?;
            let stack = LinkStack::assemble(transport, LinkConfig::default(), sync_config);
            crate::cli::scan::run(&stack.manager, &args, out, terminal_client, output_format).await
        }
        Command::Sync(args) => {
            let transport = backend.open().await?;
            let stack = LinkStack::assemble(transport, LinkConfig::default(), sync_config);
            crate::cli::sync::run(
                &stack,
                store.as_ref(),
                &args,
                out,
                terminal_client,
                output_format,
            )
            .await
        }
        Command::Connect(args) => {
            let link_config = LinkConfig::builder()
                .maybe_name_filter(args.name.clone())
                .build();
            let transport = backend.open().await?;
            let stack = LinkStack::assemble(transport, link_config, sync_config);
            crate::cli::connect::run(stack, store, &args, out, terminal_client, output_format)
                .await
        }
    }
}

fn device_store(path: Option<PathBuf>) -> Arc<dyn DeviceStore> {
    match path {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(JsonFileStore::at_default_location()),
    }
}
