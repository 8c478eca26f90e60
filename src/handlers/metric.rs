use serde::Serialize;
use time::{Date, OffsetDateTime};

/// A value that can be summarised into average, min and max.
pub trait MetricValue: Copy + std::fmt::Debug + PartialEq + Serialize + Send + 'static {
    fn zero() -> Self;

    /// Summarises a non-empty slice.
    fn summarise(values: &[Self]) -> MetricStats<Self>;
}

/// Average, minimum and maximum of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricStats<V> {
    pub average: V,
    pub min: V,
    pub max: V,
}

impl<V: MetricValue> MetricStats<V> {
    fn zero() -> Self {
        Self {
            average: V::zero(),
            min: V::zero(),
            max: V::zero(),
        }
    }
}

macro_rules! integer_metric {
    ($($ty:ty),+) => {
        $(
            impl MetricValue for $ty {
                fn zero() -> Self {
                    0
                }

                fn summarise(values: &[Self]) -> MetricStats<Self> {
                    let sum: u64 = values.iter().map(|value| u64::from(*value)).sum();
                    let count = values.len().max(1) as u64;
                    MetricStats {
                        average: <$ty>::try_from(sum / count).unwrap_or(<$ty>::MAX),
                        min: values.iter().copied().min().unwrap_or(0),
                        max: values.iter().copied().max().unwrap_or(0),
                    }
                }
            }
        )+
    };
}

integer_metric!(u8, u16, u32);

impl MetricValue for f32 {
    fn zero() -> Self {
        0.0
    }

    fn summarise(values: &[Self]) -> MetricStats<Self> {
        let sum: f32 = values.iter().sum();
        MetricStats {
            average: sum / values.len().max(1) as f32,
            min: values.iter().copied().fold(f32::INFINITY, f32::min),
            max: values.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        }
    }
}

/// One systolic/diastolic measurement in mmHg.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct BloodPressure {
    pub systolic: u16,
    pub diastolic: u16,
}

impl MetricValue for BloodPressure {
    fn zero() -> Self {
        Self {
            systolic: 0,
            diastolic: 0,
        }
    }

    /// Summarises each component on its own.
    fn summarise(values: &[Self]) -> MetricStats<Self> {
        let systolic: Vec<u16> = values.iter().map(|value| value.systolic).collect();
        let diastolic: Vec<u16> = values.iter().map(|value| value.diastolic).collect();
        let systolic = u16::summarise(&systolic);
        let diastolic = u16::summarise(&diastolic);
        MetricStats {
            average: Self {
                systolic: systolic.average,
                diastolic: diastolic.average,
            },
            min: Self {
                systolic: systolic.min,
                diastolic: diastolic.min,
            },
            max: Self {
                systolic: systolic.max,
                diastolic: diastolic.max,
            },
        }
    }
}

/// One timestamped reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Entry<V> {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub value: V,
}

impl<V> Entry<V> {
    #[must_use]
    pub fn new(timestamp: OffsetDateTime, value: V) -> Self {
        Self { timestamp, value }
    }
}

/// A day of readings for one metric with stats derived at construction.
///
/// An empty series is a placeholder whose stats are all zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSeries<V> {
    date: Date,
    entries: Vec<Entry<V>>,
    #[serde(flatten)]
    stats: MetricStats<V>,
}

impl<V: MetricValue> MetricSeries<V> {
    /// Builds a series, ordering entries by timestamp.
    #[must_use]
    pub fn new(date: Date, mut entries: Vec<Entry<V>>) -> Self {
        entries.sort_by_key(|entry| entry.timestamp);
        let stats = if entries.is_empty() {
            MetricStats::zero()
        } else {
            let values: Vec<V> = entries.iter().map(|entry| entry.value).collect();
            V::summarise(&values)
        };
        Self {
            date,
            entries,
            stats,
        }
    }

    /// Builds the all-zero record used when a day could not be synced.
    #[must_use]
    pub fn placeholder(date: Date) -> Self {
        Self::new(date, Vec::new())
    }

    #[must_use]
    pub fn date(&self) -> Date {
        self.date
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry<V>] {
        &self.entries
    }

    #[must_use]
    pub fn average(&self) -> V {
        self.stats.average
    }

    #[must_use]
    pub fn min(&self) -> V {
        self.stats.min
    }

    #[must_use]
    pub fn max(&self) -> V {
        self.stats.max
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type HeartRateData = MetricSeries<u16>;
pub type SpO2Data = MetricSeries<u8>;
pub type HrvData = MetricSeries<u16>;
pub type PressureData = MetricSeries<BloodPressure>;
/// Skin temperature in degrees Celsius.
pub type TemperatureData = MetricSeries<f32>;
pub type StressData = MetricSeries<u8>;

/// Step counts per 15-minute slot, plus daily totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepData {
    #[serde(flatten)]
    series: MetricSeries<u32>,
    total_steps: u32,
    total_distance_m: u32,
    total_calories: u32,
}

impl StepData {
    #[must_use]
    pub fn new(series: MetricSeries<u32>, total_distance_m: u32, total_calories: u32) -> Self {
        let total_steps = series
            .entries()
            .iter()
            .fold(0_u32, |total, entry| total.saturating_add(entry.value));
        Self {
            series,
            total_steps,
            total_distance_m,
            total_calories,
        }
    }

    #[must_use]
    pub fn placeholder(date: Date) -> Self {
        Self::new(MetricSeries::placeholder(date), 0, 0)
    }

    #[must_use]
    pub fn series(&self) -> &MetricSeries<u32> {
        &self.series
    }

    #[must_use]
    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    #[must_use]
    pub fn total_distance_m(&self) -> u32 {
        self.total_distance_m
    }

    #[must_use]
    pub fn total_calories(&self) -> u32 {
        self.total_calories
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use time::macros::{date, datetime};

    use super::*;

    #[test]
    fn empty_series_is_a_zero_placeholder() {
        let series = HeartRateData::placeholder(date!(2026 - 03 - 01));
        assert!(series.is_placeholder());
        assert_eq!((0, 0, 0), (series.average(), series.min(), series.max()));
    }

    #[test]
    fn integer_average_truncates() {
        let series = HrvData::new(
            date!(2026 - 03 - 01),
            vec![
                Entry::new(datetime!(2026-03-01 00:00 UTC), 40),
                Entry::new(datetime!(2026-03-01 00:30 UTC), 41),
            ],
        );
        assert_eq!(40, series.average());
    }

    #[test]
    fn entries_are_ordered_by_timestamp() {
        let series = StressData::new(
            date!(2026 - 03 - 01),
            vec![
                Entry::new(datetime!(2026-03-01 13:00 UTC), 61),
                Entry::new(datetime!(2026-03-01 09:00 UTC), 35),
            ],
        );
        let values: Vec<u8> = series.entries().iter().map(|entry| entry.value).collect();
        assert_eq!(vec![35, 61], values);
    }

    #[test]
    fn pressure_stats_are_component_wise() {
        let series = PressureData::new(
            date!(2026 - 03 - 01),
            vec![
                Entry::new(
                    datetime!(2026-03-01 08:00 UTC),
                    BloodPressure {
                        systolic: 118,
                        diastolic: 81,
                    },
                ),
                Entry::new(
                    datetime!(2026-03-01 20:00 UTC),
                    BloodPressure {
                        systolic: 124,
                        diastolic: 76,
                    },
                ),
            ],
        );
        assert_eq!(
            BloodPressure {
                systolic: 118,
                diastolic: 76
            },
            series.min()
        );
        assert_eq!(
            BloodPressure {
                systolic: 124,
                diastolic: 81
            },
            series.max()
        );
        assert_eq!(
            BloodPressure {
                systolic: 121,
                diastolic: 78
            },
            series.average()
        );
    }

    #[test]
    fn temperature_average_keeps_fraction() {
        let series = TemperatureData::new(
            date!(2026 - 03 - 01),
            vec![
                Entry::new(datetime!(2026-03-01 01:00 UTC), 36.4),
                Entry::new(datetime!(2026-03-01 03:00 UTC), 36.8),
            ],
        );
        assert!((series.average() - 36.6).abs() < 1e-4);
        assert!((series.min() - 36.4).abs() < 1e-4);
    }

    #[test]
    fn step_totals_sum_entries() {
        let series = MetricSeries::new(
            date!(2026 - 03 - 01),
            vec![
                Entry::new(datetime!(2026-03-01 08:00 UTC), 1_200),
                Entry::new(datetime!(2026-03-01 17:30 UTC), 2_450),
            ],
        );
        let steps = StepData::new(series, 2_730, 145);
        assert_eq!(3_650, steps.total_steps());
        assert_eq!(2_730, steps.total_distance_m());
    }
}
