use std::io;

use anyhow::Result;
use serde_json::json;
use tracing::{info, instrument};

use crate::cli::OutputFormat;
use crate::store::DeviceStore;
use crate::terminal::TerminalClient;

use super::ui::Painter;

/// Executes the `forget` command.
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
    let forgotten = store.load()?.map(|record| record.address);
    store.clear()?;
    info!(address = ?forgotten, "saved device cleared");

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            match forgotten {
                Some(address) => writeln!(
                    out,
                    "{} {}",
                    painter.success("Forgot"),
                    painter.value(address)
                )?,
                None => writeln!(out, "{}", painter.muted("No saved device."))?,
            }
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &json!({ "forgotten": forgotten }))?;
            writeln!(out)?;
        }
    }
    Ok(())
}
