use std::future::pending;
use std::io;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tracing::{info, instrument};

use crate::app::LinkStack;
use crate::cli::{ConnectArgs, OutputFormat};
use crate::hw::DeviceIdentity;
use crate::link::ConnectionState;
use crate::store::DeviceStore;
use crate::supervisor::{ReconnectSupervisor, SupervisorConfig, TracingKeepAlive};
use crate::terminal::TerminalClient;

use super::ui::Painter;

#[derive(Debug, Serialize)]
struct StateLine<'a> {
    state: ConnectionState,
    address: &'a str,
}

/// Executes the `connect` command: supervises the link until Ctrl+C or the
/// optional run time elapses.
#[instrument(skip(stack, store, out, terminal_client), level = "info", fields(address = %args.address))]
pub(crate) async fn run<W>(
    stack: LinkStack,
    store: Arc<dyn DeviceStore>,
    args: &ConnectArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let identity = DeviceIdentity::new(
        args.name.clone().unwrap_or_default(),
        args.address.clone(),
        None,
    );
    let LinkStack { manager, sync, .. } = stack;
    let supervisor = ReconnectSupervisor::new(
        Arc::clone(&manager),
        sync,
        store,
        Arc::new(TracingKeepAlive),
        SupervisorConfig::default(),
    );

    let mut states = manager.observe_state();
    supervisor.request_connection(identity).await;

    let deadline = async {
        match args.run_for {
            Some(run_for) => sleep(run_for).await,
            None => pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            () = &mut deadline => break Ok(()),
            interrupted = tokio::signal::ctrl_c() => {
                info!("interrupted; disconnecting");
                break interrupted.map_err(anyhow::Error::from);
            }
            state = states.next() => {
                let Some(state) = state else {
                    break Ok(());
                };
                let written = write_state(out, &painter, output_format, state, &args.address);
                if let Err(error) = written {
                    break Err(error);
                }
            }
        }
    };

    supervisor.stop().await;
    outcome?;
    write_state(
        out,
        &painter,
        output_format,
        ConnectionState::Disconnected,
        &args.address,
    )
}

fn write_state<W>(
    out: &mut W,
    painter: &Painter,
    output_format: OutputFormat,
    state: ConnectionState,
    address: &str,
) -> Result<()>
where
    W: io::Write,
{
    match output_format {
        OutputFormat::Pretty => {
            writeln!(out, "{} {}", painter.muted(address), painter.state(state))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &StateLine { state, address })?;
            writeln!(out)?;
        }
    }
    Ok(())
}
