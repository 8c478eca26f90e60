use std::fmt::{self, Display, Formatter};

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::handlers::{BloodPressure, DailySnapshot, MetricSeries, MetricValue, StepData};

use super::painter::Painter;
use super::table::Table;

const CLOCK_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[hour]:[minute]");

/// Formats one reading for a table cell.
pub(crate) trait RenderValue {
    fn render(&self) -> String;
}

macro_rules! render_integer {
    ($($ty:ty),+) => {
        $(
            impl RenderValue for $ty {
                fn render(&self) -> String {
                    self.to_string()
                }
            }
        )+
    };
}

render_integer!(u8, u16, u32);

impl RenderValue for f32 {
    fn render(&self) -> String {
        format!("{self:.1}")
    }
}

impl RenderValue for BloodPressure {
    fn render(&self) -> String {
        format!("{}/{}", self.systolic, self.diastolic)
    }
}

/// Renders one day of one metric: a summary followed by every reading.
pub(crate) struct SeriesView<'a, V> {
    label: &'a str,
    series: &'a MetricSeries<V>,
    painter: &'a Painter,
}

impl<'a, V> SeriesView<'a, V> {
    pub(crate) fn new(label: &'a str, series: &'a MetricSeries<V>, painter: &'a Painter) -> Self {
        Self {
            label,
            series,
            painter,
        }
    }
}

impl<V> Display for SeriesView<'_, V>
where
    V: MetricValue + RenderValue,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {}",
            self.painter.heading(self.label),
            self.painter.muted(self.series.date().to_string())
        )?;
        if self.series.is_placeholder() {
            return write!(f, "{}", self.painter.warning("No readings for this day."));
        }

        let summary = Table::key_value(
            self.painter,
            vec![
                ("readings", self.series.entries().len().to_string()),
                ("average", self.painter.value(self.series.average().render())),
                ("min", self.series.min().render()),
                ("max", self.series.max().render()),
            ],
        );
        writeln!(f, "{summary}")?;

        let rows = self
            .series
            .entries()
            .iter()
            .map(|entry| {
                let clock = entry
                    .timestamp
                    .format(CLOCK_FORMAT)
                    .unwrap_or_else(|_error| entry.timestamp.to_string());
                vec![clock, entry.value.render()]
            })
            .collect();
        write!(f, "{}", Table::grid(["time", "value"], rows))
    }
}

/// Renders step data: the slot series plus daily totals.
pub(crate) struct StepsView<'a> {
    steps: &'a StepData,
    painter: &'a Painter,
}

impl<'a> StepsView<'a> {
    pub(crate) fn new(steps: &'a StepData, painter: &'a Painter) -> Self {
        Self { steps, painter }
    }
}

impl Display for StepsView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}",
            SeriesView::new("steps", self.steps.series(), self.painter)
        )?;
        let totals = Table::key_value(
            self.painter,
            vec![
                ("total_steps", self.painter.value(self.steps.total_steps().to_string())),
                ("distance_m", self.steps.total_distance_m().to_string()),
                ("calories", self.steps.total_calories().to_string()),
            ],
        );
        write!(f, "{totals}")
    }
}

/// Renders a whole day as one summary row per metric.
pub(crate) struct SnapshotView<'a> {
    snapshot: &'a DailySnapshot,
    painter: &'a Painter,
}

impl<'a> SnapshotView<'a> {
    pub(crate) fn new(snapshot: &'a DailySnapshot, painter: &'a Painter) -> Self {
        Self { snapshot, painter }
    }

    fn row<V>(&self, label: &str, series: &MetricSeries<V>) -> Vec<String>
    where
        V: MetricValue + RenderValue,
    {
        if series.is_placeholder() {
            return vec![
                label.to_string(),
                "0".to_string(),
                self.painter.muted("-"),
                self.painter.muted("-"),
                self.painter.muted("-"),
            ];
        }
        vec![
            label.to_string(),
            series.entries().len().to_string(),
            self.painter.value(series.average().render()),
            series.min().render(),
            series.max().render(),
        ]
    }
}

impl Display for SnapshotView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot;
        writeln!(
            f,
            "{} {}",
            self.painter.heading("daily summary"),
            self.painter.muted(snapshot.heart_rate.date().to_string())
        )?;
        let rows = vec![
            self.row("heart_rate", &snapshot.heart_rate),
            self.row("spo2", &snapshot.spo2),
            self.row("hrv", &snapshot.hrv),
            self.row("blood_pressure", &snapshot.blood_pressure),
            self.row("temperature", &snapshot.temperature),
            self.row("stress", &snapshot.stress),
            self.row("steps", snapshot.steps.series()),
        ];
        writeln!(
            f,
            "{}",
            Table::grid(["metric", "readings", "average", "min", "max"], rows)
        )?;
        write!(
            f,
            "{} {}",
            self.painter.muted("total steps:"),
            self.painter.value(snapshot.steps.total_steps().to_string())
        )
    }
}
