use std::future::Future;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

use crate::cli::SyncTarget;

const TICK: Duration = Duration::from_millis(90);

/// Spinner shown on stderr while a sync waits on the device.
#[derive(Debug)]
pub(crate) struct SyncProgress {
    enabled: bool,
}

impl SyncProgress {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Runs `sync` under a spinner naming `target` and the requested day.
    ///
    /// The spinner finishes with a summary line counting the records
    /// `count` reports.
    pub(crate) async fn track<F, Fut, T>(
        &self,
        target: SyncTarget,
        day_offset: u32,
        count: impl FnOnce(&T) -> usize,
        sync: F,
    ) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.enabled {
            return sync().await;
        }

        let bar = ProgressBar::new_spinner();
        bar.set_style(progress_style());
        bar.set_message(syncing_message(target, day_offset));
        bar.enable_steady_tick(TICK);
        let synced = sync().await;
        bar.finish_with_message(finished_message(target, count(&synced)));
        synced
    }
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan.bold} {msg}")
        .unwrap_or_else(|_error| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
}

fn target_label(target: SyncTarget) -> String {
    match target {
        SyncTarget::All => "every metric".to_string(),
        SyncTarget::Metric(metric) => metric.to_string(),
    }
}

fn day_label(day_offset: u32) -> String {
    match day_offset {
        0 => "today".to_string(),
        1 => "yesterday".to_string(),
        days => format!("{days} days ago"),
    }
}

fn syncing_message(target: SyncTarget, day_offset: u32) -> String {
    format!(
        "Syncing {} for {}",
        target_label(target),
        day_label(day_offset)
    )
}

fn finished_message(target: SyncTarget, records: usize) -> String {
    let mark = if records == 0 {
        "-".dimmed().to_string()
    } else {
        "✓".green().to_string()
    };
    format!("{mark} {}: {records} records", target_label(target))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::protocol::MetricKind;

    #[rstest]
    #[case::today(SyncTarget::Metric(MetricKind::SpO2), 0, "Syncing spo2 for today")]
    #[case::yesterday(
        SyncTarget::Metric(MetricKind::HeartRate),
        1,
        "Syncing heart_rate for yesterday"
    )]
    #[case::older(SyncTarget::All, 6, "Syncing every metric for 6 days ago")]
    fn names_the_metric_and_day(
        #[case] target: SyncTarget,
        #[case] day_offset: u32,
        #[case] expected: &str,
    ) {
        assert_eq!(expected, syncing_message(target, day_offset));
    }

    #[rstest]
    #[case::disabled(false)]
    #[case::enabled(true)]
    #[tokio::test]
    async fn returns_the_synced_value(#[case] enabled: bool) {
        let progress = SyncProgress::new(enabled);
        let synced = progress
            .track(
                SyncTarget::Metric(MetricKind::Steps),
                0,
                |readings: &Vec<u8>| readings.len(),
                || async { vec![97, 98] },
            )
            .await;
        assert_eq!(vec![97, 98], synced);
    }
}
