use std::io;

use anyhow::Result;
use tracing::{debug, instrument};

use crate::cli::{OutputFormat, ScanArgs};
use crate::error::InteractionError;
use crate::hw::{DeviceIdentity, ScanEvent, ScanFilter};
use crate::link::ConnectionManager;
use crate::terminal::TerminalClient;

use super::ui::{DeviceListView, Painter};

/// Executes the `scan` command.
#[instrument(skip(manager, out, terminal_client), level = "info", fields(duration = ?args.duration))]
pub(crate) async fn run<W>(
    manager: &ConnectionManager,
    args: &ScanArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let filter = match args.name_prefix.as_deref() {
        Some(prefix) => ScanFilter::any().with_name_prefix(prefix),
        None => ScanFilter::any(),
    };

    let mut stream = manager.start_scan(filter, args.duration).await?;
    let mut devices: Vec<DeviceIdentity> = Vec::new();
    while let Some(event) = stream.next_event().await {
        match event {
            ScanEvent::Found(device) => {
                debug!(address = %device.address(), "device found");
                devices.push(device);
            }
            ScanEvent::Failed { code } => {
                manager.stop_scan().await;
                return Err(InteractionError::ScanFailed { code }.into());
            }
        }
    }
    manager.stop_scan().await;

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", DeviceListView::new(&devices, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &devices)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
