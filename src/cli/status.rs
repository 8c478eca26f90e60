use std::io;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::instrument;

use crate::cli::OutputFormat;
use crate::store::{DeviceStore, SavedDeviceRecord};
use crate::supervisor::SupervisorConfig;
use crate::terminal::TerminalClient;
use crate::utils::now_epoch_ms;

use super::ui::{Painter, RecordView};

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    saved_device: Option<&'a SavedDeviceRecord>,
    would_auto_connect: bool,
}

/// Executes the `status` command.
#[instrument(skip(store, out, terminal_client), level = "info")]
pub(crate) fn run<W>(
    store: &dyn DeviceStore,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let record = store.load()?;
    let window: Duration = SupervisorConfig::default().recency_window;
    let would_auto_connect = record
        .as_ref()
        .is_some_and(|record| record.should_auto_connect(now_epoch_ms(), window));

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(
                out,
                "{}",
                RecordView::new(record.as_ref(), would_auto_connect, &painter)
            )?;
        }
        OutputFormat::Json => {
            let report = StatusReport {
                saved_device: record.as_ref(),
                would_auto_connect,
            };
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
