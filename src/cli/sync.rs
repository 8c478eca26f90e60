use std::io;
use std::time::Duration;

use anyhow::Result;
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::{Span, info, instrument, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::app::LinkStack;
use crate::cli::{OutputFormat, SyncArgs, SyncTarget};
use crate::error::{CliConfigError, LinkError};
use crate::handlers::{DailySnapshot, MetricSeries, MetricValue, StepData, SyncHandler};
use crate::hw::DeviceIdentity;
use crate::link::ConnectionState;
use crate::protocol::MetricKind;
use crate::store::DeviceStore;
use crate::terminal::TerminalClient;

use super::ui::{Painter, RenderValue, SeriesView, SnapshotView, StepsView, SyncProgress};

/// Executes the `sync` command: connect, sync, disconnect.
#[instrument(skip(stack, store, out, terminal_client), level = "info", fields(offset = args.offset))]
pub(crate) async fn run<W>(
    stack: &LinkStack,
    store: &dyn DeviceStore,
    args: &SyncArgs,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let identity = resolve_identity(store, args.address.as_deref())?;
    if let Err(error) = wait_for_link(stack, identity, args.timeout).await {
        stack.manager.disconnect().await;
        return Err(error);
    }

    let progress = SyncProgress::new(
        output_format == OutputFormat::Pretty && terminal_client.stderr_is_terminal(),
    );
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let rendered = render_target(
        &stack.sync,
        args.target,
        args.offset,
        out,
        &painter,
        &progress,
        output_format,
    )
    .await;
    stack.manager.disconnect().await;
    rendered
}

/// Connects to `identity` and waits until the link is up or has failed.
#[instrument(skip_all, level = "info", fields(address = %identity.address()))]
async fn wait_for_link(
    stack: &LinkStack,
    identity: DeviceIdentity,
    timeout: Duration,
) -> Result<()> {
    let span = Span::current();
    span.pb_set_message("Connecting");
    let address = identity.address().to_string();
    stack.manager.connect(identity).await?;

    let reached = stack
        .manager
        .wait_for_state(
            |state| matches!(state, ConnectionState::Connected | ConnectionState::Error),
            timeout,
        )
        .await;
    match reached {
        Ok(ConnectionState::Connected) => {
            span.pb_set_finish_message(&format!("{} Connected", "✓".green()));
            info!(%address, "connected; syncing");
            Ok(())
        }
        Ok(_) => {
            span.pb_set_finish_message(&format!("{} Connection failed", "✗".red()));
            Err(CliConfigError::ConnectFailed { address }.into())
        }
        Err(LinkError::Timeout) => {
            span.pb_set_finish_message(&format!("{} Connection timed out", "✗".red()));
            Err(CliConfigError::ConnectTimedOut {
                waited: humantime::format_duration(timeout).to_string(),
            }
            .into())
        }
        Err(error) => Err(error.into()),
    }
}

/// Picks the `--address` device, or the saved one.
fn resolve_identity(store: &dyn DeviceStore, address: Option<&str>) -> Result<DeviceIdentity> {
    let saved = match store.load() {
        Ok(saved) => saved,
        Err(error) if address.is_some() => {
            warn!(%error, "ignoring unreadable device record");
            None
        }
        Err(error) => return Err(error.into()),
    };

    match (address, saved) {
        (Some(address), Some(saved)) if saved.address.eq_ignore_ascii_case(address) => {
            Ok(saved.identity())
        }
        (Some(address), _) => Ok(DeviceIdentity::new("", address, None)),
        (None, Some(saved)) => Ok(saved.identity()),
        (None, None) => Err(CliConfigError::NoSavedDevice.into()),
    }
}

async fn render_target<W>(
    sync: &SyncHandler,
    target: SyncTarget,
    day_offset: u32,
    out: &mut W,
    painter: &Painter,
    progress: &SyncProgress,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let metric = match target {
        SyncTarget::All => {
            let snapshot = progress
                .track(target, day_offset, DailySnapshot::entry_count, || {
                    sync.sync_all(day_offset)
                })
                .await;
            return match output_format {
                OutputFormat::Pretty => {
                    writeln!(out, "{}", SnapshotView::new(&snapshot, painter))?;
                    Ok(())
                }
                OutputFormat::Json => write_json(out, &snapshot),
            };
        }
        SyncTarget::Metric(metric) => metric,
    };

    match metric {
        MetricKind::HeartRate => {
            let series = progress
                .track(target, day_offset, series_len, || sync.sync_heart_rate(day_offset))
                .await;
            write_series(out, painter, output_format, metric, &series)
        }
        MetricKind::SpO2 => {
            let series = progress
                .track(target, day_offset, series_len, || sync.sync_spo2(day_offset))
                .await;
            write_series(out, painter, output_format, metric, &series)
        }
        MetricKind::Hrv => {
            let series = progress
                .track(target, day_offset, series_len, || sync.sync_hrv(day_offset))
                .await;
            write_series(out, painter, output_format, metric, &series)
        }
        MetricKind::BloodPressure => {
            let series = progress
                .track(target, day_offset, series_len, || sync.sync_blood_pressure(day_offset))
                .await;
            write_series(out, painter, output_format, metric, &series)
        }
        MetricKind::Temperature => {
            let series = progress
                .track(target, day_offset, series_len, || sync.sync_temperature(day_offset))
                .await;
            write_series(out, painter, output_format, metric, &series)
        }
        MetricKind::Stress => {
            let series = progress
                .track(target, day_offset, series_len, || sync.sync_stress(day_offset))
                .await;
            write_series(out, painter, output_format, metric, &series)
        }
        MetricKind::Steps => {
            let steps = progress
                .track(target, day_offset, step_len, || sync.sync_steps(day_offset))
                .await;
            match output_format {
                OutputFormat::Pretty => {
                    writeln!(out, "{}", StepsView::new(&steps, painter))?;
                    Ok(())
                }
                OutputFormat::Json => write_json(out, &steps),
            }
        }
    }
}

fn write_series<W, V>(
    out: &mut W,
    painter: &Painter,
    output_format: OutputFormat,
    metric: MetricKind,
    series: &MetricSeries<V>,
) -> Result<()>
where
    W: io::Write,
    V: MetricValue + RenderValue,
{
    match output_format {
        OutputFormat::Pretty => {
            let label = metric.to_string();
            writeln!(out, "{}", SeriesView::new(&label, series, painter))?;
            Ok(())
        }
        OutputFormat::Json => write_json(out, series),
    }
}

fn series_len<V: MetricValue>(series: &MetricSeries<V>) -> usize {
    series.entries().len()
}

fn step_len(steps: &StepData) -> usize {
    steps.series().entries().len()
}

fn write_json<W, T>(out: &mut W, value: &T) -> Result<()>
where
    W: io::Write,
    T: Serialize + ?Sized,
{
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
