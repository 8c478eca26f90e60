use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use serde::Serialize;
use time::{Date, OffsetDateTime, UtcOffset};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::metric::{
    HeartRateData, HrvData, MetricSeries, MetricValue, PressureData, SpO2Data, StepData,
    StressData, TemperatureData,
};
use super::normalise;
use super::timeline::requested_day;
use crate::error::GateError;
use crate::gate::CommandGate;
use crate::protocol::{MetricKind, ResponseStatus, VendorPayload, VendorRequest};

/// Timeouts and local time settings for metric syncs.
#[derive(Debug, Clone, Builder)]
pub struct SyncConfig {
    /// Response timeout for every metric except steps.
    #[builder(default = Duration::from_secs(5))]
    pub metric_timeout: Duration,
    #[builder(default = Duration::from_secs(8))]
    pub steps_timeout: Duration,
    #[builder(default = Duration::from_secs(3))]
    pub battery_timeout: Duration,
    /// Offset used to resolve "local midnight" for payloads without a date.
    #[builder(default = UtcOffset::UTC)]
    pub utc_offset: UtcOffset,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SyncConfig {
    #[must_use]
    pub fn timeout_for(&self, metric: MetricKind) -> Duration {
        match metric {
            MetricKind::Steps => self.steps_timeout,
            _ => self.metric_timeout,
        }
    }
}

/// Every metric for one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySnapshot {
    pub day_offset: u32,
    pub heart_rate: HeartRateData,
    pub spo2: SpO2Data,
    pub hrv: HrvData,
    pub blood_pressure: PressureData,
    pub temperature: TemperatureData,
    pub stress: StressData,
    pub steps: StepData,
}

impl DailySnapshot {
    /// Returns how many readings the snapshot holds across every metric.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.heart_rate.entries().len()
            + self.spo2.entries().len()
            + self.hrv.entries().len()
            + self.blood_pressure.entries().len()
            + self.temperature.entries().len()
            + self.stress.entries().len()
            + self.steps.series().entries().len()
    }
}

/// Per-metric sync operations over the command gate.
///
/// Sync calls never fail: when the device cannot answer, the record for the
/// requested day is an all-zero placeholder.
#[derive(Debug, Clone)]
pub struct SyncHandler {
    gate: Arc<CommandGate>,
    config: SyncConfig,
    cancel: CancellationToken,
}

impl SyncHandler {
    #[must_use]
    pub fn new(gate: Arc<CommandGate>, config: SyncConfig) -> Self {
        Self {
            gate,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Ties every command issued by this handler to `cancel`.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn sync_heart_rate(&self, day_offset: u32) -> HeartRateData {
        self.fetch_series(MetricKind::HeartRate, day_offset, normalise::heart_rate)
            .await
    }

    pub async fn sync_spo2(&self, day_offset: u32) -> SpO2Data {
        self.fetch_series(MetricKind::SpO2, day_offset, normalise::spo2)
            .await
    }

    pub async fn sync_hrv(&self, day_offset: u32) -> HrvData {
        self.fetch_series(MetricKind::Hrv, day_offset, normalise::hrv)
            .await
    }

    pub async fn sync_blood_pressure(&self, day_offset: u32) -> PressureData {
        self.fetch_series(
            MetricKind::BloodPressure,
            day_offset,
            normalise::blood_pressure,
        )
        .await
    }

    pub async fn sync_temperature(&self, day_offset: u32) -> TemperatureData {
        self.fetch_series(MetricKind::Temperature, day_offset, normalise::temperature)
            .await
    }

    pub async fn sync_stress(&self, day_offset: u32) -> StressData {
        self.fetch_series(MetricKind::Stress, day_offset, normalise::stress)
            .await
    }

    pub async fn sync_steps(&self, day_offset: u32) -> StepData {
        self.fetch(
            MetricKind::Steps,
            day_offset,
            normalise::steps,
            StepData::placeholder,
        )
        .await
    }

    /// Syncs every metric for one day, one command at a time.
    #[instrument(skip(self), level = "info")]
    pub async fn sync_all(&self, day_offset: u32) -> DailySnapshot {
        DailySnapshot {
            day_offset,
            heart_rate: self.sync_heart_rate(day_offset).await,
            spo2: self.sync_spo2(day_offset).await,
            hrv: self.sync_hrv(day_offset).await,
            blood_pressure: self.sync_blood_pressure(day_offset).await,
            temperature: self.sync_temperature(day_offset).await,
            stress: self.sync_stress(day_offset).await,
            steps: self.sync_steps(day_offset).await,
        }
    }

    /// Reads the battery level. Also serves as the link keepalive.
    ///
    /// # Errors
    ///
    /// Returns the gate error when the device does not answer, or
    /// [`GateError::UnexpectedResponse`] when it answers with something other
    /// than a battery level.
    pub async fn read_battery(&self) -> Result<u8, GateError> {
        self.read_battery_within(self.config.battery_timeout).await
    }

    /// Reads the battery level with an explicit response timeout.
    ///
    /// # Errors
    ///
    /// See [`Self::read_battery`].
    #[instrument(skip(self), level = "debug")]
    pub async fn read_battery_within(&self, timeout: Duration) -> Result<u8, GateError> {
        self.gate
            .execute(
                VendorRequest::ReadBattery,
                |response| match (response.status, response.payload) {
                    (ResponseStatus::Success, VendorPayload::Battery { level }) => Some(level),
                    _ => None,
                },
                timeout,
                &self.cancel,
            )
            .await?
            .ok_or(GateError::UnexpectedResponse)
    }

    async fn fetch_series<V, N>(
        &self,
        metric: MetricKind,
        day_offset: u32,
        normalise: N,
    ) -> MetricSeries<V>
    where
        V: MetricValue,
        N: FnOnce(VendorPayload, Date, UtcOffset) -> Option<MetricSeries<V>> + Send,
    {
        self.fetch(metric, day_offset, normalise, MetricSeries::placeholder)
            .await
    }

    #[instrument(skip(self, normalise, placeholder), level = "info")]
    async fn fetch<T, N, P>(
        &self,
        metric: MetricKind,
        day_offset: u32,
        normalise: N,
        placeholder: P,
    ) -> T
    where
        T: Send,
        N: FnOnce(VendorPayload, Date, UtcOffset) -> Option<T> + Send,
        P: FnOnce(Date) -> T,
    {
        let offset = self.config.utc_offset;
        let day = requested_day(OffsetDateTime::now_utc(), offset, day_offset);
        let request = VendorRequest::DailyHistory { metric, day_offset };

        let outcome = self
            .gate
            .execute(
                request,
                move |response| match response.status {
                    ResponseStatus::Success => Ok(normalise(response.payload, day, offset)),
                    ResponseStatus::Failure(code) => Err(code),
                },
                self.config.timeout_for(metric),
                &self.cancel,
            )
            .await;

        match outcome {
            Ok(Ok(Some(record))) => return record,
            Ok(Ok(None)) => warn!("device answered with a payload for another metric"),
            Ok(Err(code)) => warn!(code, "device reported a failed sync"),
            Err(GateError::Timeout) => warn!("device did not answer before the timeout"),
            Err(error @ (GateError::NotConnected | GateError::Cancelled)) => {
                debug!(%error, "sync skipped");
            }
            Err(error) => warn!(%error, "sync failed"),
        }
        placeholder(day)
    }
}
