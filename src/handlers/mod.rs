mod metric;
mod normalise;
mod sync;
mod timeline;

pub use self::metric::{
    BloodPressure, Entry, HeartRateData, HrvData, MetricSeries, MetricStats, MetricValue,
    PressureData, SpO2Data, StepData, StressData, TemperatureData,
};
pub use self::sync::{DailySnapshot, SyncConfig, SyncHandler};
