use strum_macros::{Display, EnumIter, EnumString};

/// Health metrics the wearable can report.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, EnumIter, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MetricKind {
    /// Heart rate in beats per minute.
    HeartRate,
    /// Blood oxygen saturation percentage.
    #[strum(serialize = "spo2")]
    SpO2,
    /// Heart-rate variability in milliseconds.
    Hrv,
    /// Systolic and diastolic blood pressure.
    BloodPressure,
    /// Skin temperature.
    Temperature,
    /// Stress index.
    Stress,
    /// Step count, distance and calories.
    Steps,
}

/// A request understood by the vendor SDK.
///
/// The crate never frames these itself; a [`VendorCodec`] or a fake transport
/// turns them into bytes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum VendorRequest {
    /// Reads the current battery level; used as the link keepalive.
    ReadBattery,
    /// Reads one day of samples for a metric, `day_offset` days in the past.
    DailyHistory { metric: MetricKind, day_offset: u32 },
}

impl VendorRequest {
    /// Returns a short label used in logs.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::ReadBattery => "read_battery".to_string(),
            Self::DailyHistory { metric, day_offset } => format!("{metric}@-{day_offset}d"),
        }
    }
}

/// Status byte reported by the device alongside each response.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ResponseStatus {
    Success,
    Failure(u8),
}

/// A decoded vendor response.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorResponse {
    pub status: ResponseStatus,
    pub payload: VendorPayload,
}

impl VendorResponse {
    /// Creates a success response.
    #[must_use]
    pub fn success(payload: VendorPayload) -> Self {
        Self {
            status: ResponseStatus::Success,
            payload,
        }
    }

    /// Creates a failure response carrying no data.
    #[must_use]
    pub fn failure(code: u8) -> Self {
        Self {
            status: ResponseStatus::Failure(code),
            payload: VendorPayload::Empty,
        }
    }

    /// Returns whether the device reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// One reading keyed by hour of day.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct HourlyReading {
    pub hour: u8,
    pub value: u16,
}

/// One reading keyed by minute of day.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MinuteReading {
    pub minute_of_day: u16,
    pub value: u16,
}

/// One blood-pressure measurement keyed by minute of day.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PressureReading {
    pub minute_of_day: u16,
    pub systolic: u16,
    pub diastolic: u16,
}

/// One 15-minute activity slot.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ActivitySlot {
    pub slot: u8,
    pub steps: u32,
    pub distance_m: u32,
    pub calories: u32,
}

/// Metric payloads as the vendor SDK hands them over.
///
/// Vendor payloads disagree on how a day is anchored: some carry a Unix
/// timestamp, some a `YYYY-MM-DD` string, some both or neither.
#[derive(Debug, Clone, PartialEq)]
pub enum VendorPayload {
    Battery {
        level: u8,
    },
    HeartRate {
        date: Option<String>,
        interval_minutes: u16,
        values: Vec<u16>,
    },
    SpO2 {
        unix_timestamp: Option<i64>,
        date: Option<String>,
        readings: Vec<HourlyReading>,
    },
    Hrv {
        unix_timestamp: Option<i64>,
        interval_minutes: u16,
        values: Vec<u16>,
    },
    BloodPressure {
        date: Option<String>,
        readings: Vec<PressureReading>,
    },
    Temperature {
        unix_timestamp: Option<i64>,
        readings: Vec<MinuteReading>,
    },
    Stress {
        date: Option<String>,
        readings: Vec<HourlyReading>,
    },
    Steps {
        date: Option<String>,
        slots: Vec<ActivitySlot>,
    },
    Empty,
}

/// Vendor command codec used by byte-oriented transports.
pub trait VendorCodec: Send + Sync + std::fmt::Debug {
    /// UUID of the characteristic commands are written to.
    fn command_characteristic(&self) -> &str;

    /// UUID of the characteristic responses are notified on.
    fn notify_characteristic(&self) -> &str;

    /// Encodes a request into one write to the command characteristic.
    fn encode(&self, request: &VendorRequest) -> Vec<u8>;

    /// Decodes one notification into a response, or `None` if the packet is
    /// not a response (for example an unsolicited event).
    fn decode(&self, payload: &[u8]) -> Option<VendorResponse>;
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("heart_rate", MetricKind::HeartRate)]
    #[case("spo2", MetricKind::SpO2)]
    #[case("blood_pressure", MetricKind::BloodPressure)]
    #[case("steps", MetricKind::Steps)]
    fn metric_kind_parses_snake_case(#[case] raw: &str, #[case] expected: MetricKind) {
        assert_eq!(expected, MetricKind::from_str(raw).expect("metric should parse"));
        assert_eq!(raw, expected.to_string());
    }

    #[test]
    fn request_label_includes_offset() {
        let request = VendorRequest::DailyHistory {
            metric: MetricKind::SpO2,
            day_offset: 2,
        };
        assert_eq!("spo2@-2d", request.label());
    }
}
