//! Maps vendor payloads onto metric records.
//!
//! Each metric anchors its day differently. Readings outside the valid range
//! for their metric are dropped.

use time::{Date, Duration, OffsetDateTime, UtcOffset};

use super::metric::{
    BloodPressure, Entry, HeartRateData, HrvData, MetricSeries, PressureData, SpO2Data,
    StepData, StressData, TemperatureData,
};
use super::timeline::{from_date_string, from_unix, local_midnight};
use crate::protocol::VendorPayload;

const STEP_SLOT_MINUTES: i64 = 15;

/// SpO2: Unix timestamp, else date string, else midnight; one reading per hour.
pub(crate) fn spo2(payload: VendorPayload, day: Date, offset: UtcOffset) -> Option<SpO2Data> {
    let VendorPayload::SpO2 {
        unix_timestamp,
        date,
        readings,
    } = payload
    else {
        return None;
    };
    let base = from_unix(unix_timestamp, offset)
        .or_else(|| from_date_string(date.as_deref(), offset))
        .unwrap_or_else(|| local_midnight(day, offset));

    let entries = readings
        .into_iter()
        .filter(|reading| (1..=100).contains(&reading.value))
        .filter_map(|reading| {
            let value = u8::try_from(reading.value).ok()?;
            Some(Entry::new(
                base + Duration::hours(i64::from(reading.hour)),
                value,
            ))
        })
        .collect();
    Some(MetricSeries::new(base.date(), entries))
}

/// Heart rate: date string, else midnight; readings every `interval_minutes`.
pub(crate) fn heart_rate(
    payload: VendorPayload,
    day: Date,
    offset: UtcOffset,
) -> Option<HeartRateData> {
    let VendorPayload::HeartRate {
        date,
        interval_minutes,
        values,
    } = payload
    else {
        return None;
    };
    let base = from_date_string(date.as_deref(), offset)
        .unwrap_or_else(|| local_midnight(day, offset));
    Some(MetricSeries::new(
        base.date(),
        interval_entries(base, interval_minutes, values),
    ))
}

/// HRV: Unix timestamp, else midnight; readings every `interval_minutes`.
pub(crate) fn hrv(payload: VendorPayload, day: Date, offset: UtcOffset) -> Option<HrvData> {
    let VendorPayload::Hrv {
        unix_timestamp,
        interval_minutes,
        values,
    } = payload
    else {
        return None;
    };
    let base = from_unix(unix_timestamp, offset).unwrap_or_else(|| local_midnight(day, offset));
    Some(MetricSeries::new(
        base.date(),
        interval_entries(base, interval_minutes, values),
    ))
}

/// Blood pressure: date string, else midnight; keyed by minute of day.
pub(crate) fn blood_pressure(
    payload: VendorPayload,
    day: Date,
    offset: UtcOffset,
) -> Option<PressureData> {
    let VendorPayload::BloodPressure { date, readings } = payload else {
        return None;
    };
    let base = from_date_string(date.as_deref(), offset)
        .unwrap_or_else(|| local_midnight(day, offset));

    let entries = readings
        .into_iter()
        .filter(|reading| reading.systolic > 0 && reading.diastolic > 0)
        .map(|reading| {
            Entry::new(
                base + Duration::minutes(i64::from(reading.minute_of_day)),
                BloodPressure {
                    systolic: reading.systolic,
                    diastolic: reading.diastolic,
                },
            )
        })
        .collect();
    Some(MetricSeries::new(base.date(), entries))
}

/// Temperature: Unix timestamp, else midnight; raw tenths of a degree.
pub(crate) fn temperature(
    payload: VendorPayload,
    day: Date,
    offset: UtcOffset,
) -> Option<TemperatureData> {
    let VendorPayload::Temperature {
        unix_timestamp,
        readings,
    } = payload
    else {
        return None;
    };
    let base = from_unix(unix_timestamp, offset).unwrap_or_else(|| local_midnight(day, offset));

    let entries = readings
        .into_iter()
        .filter(|reading| reading.value > 0)
        .map(|reading| {
            Entry::new(
                base + Duration::minutes(i64::from(reading.minute_of_day)),
                f32::from(reading.value) / 10.0,
            )
        })
        .collect();
    Some(MetricSeries::new(base.date(), entries))
}

/// Stress: date string, else midnight; one index per hour, valid 1..=100.
pub(crate) fn stress(payload: VendorPayload, day: Date, offset: UtcOffset) -> Option<StressData> {
    let VendorPayload::Stress { date, readings } = payload else {
        return None;
    };
    let base = from_date_string(date.as_deref(), offset)
        .unwrap_or_else(|| local_midnight(day, offset));

    let entries = readings
        .into_iter()
        .filter_map(|reading| {
            let value = u8::try_from(reading.value).ok()?;
            (1..=100).contains(&value).then(|| {
                Entry::new(base + Duration::hours(i64::from(reading.hour)), value)
            })
        })
        .collect();
    Some(MetricSeries::new(base.date(), entries))
}

/// Steps: date string, else midnight; one slot per 15 minutes.
pub(crate) fn steps(payload: VendorPayload, day: Date, offset: UtcOffset) -> Option<StepData> {
    let VendorPayload::Steps { date, slots } = payload else {
        return None;
    };
    let base = from_date_string(date.as_deref(), offset)
        .unwrap_or_else(|| local_midnight(day, offset));

    let mut distance = 0_u32;
    let mut calories = 0_u32;
    let entries = slots
        .into_iter()
        .filter(|slot| slot.steps > 0)
        .map(|slot| {
            distance = distance.saturating_add(slot.distance_m);
            calories = calories.saturating_add(slot.calories);
            Entry::new(
                base + Duration::minutes(i64::from(slot.slot) * STEP_SLOT_MINUTES),
                slot.steps,
            )
        })
        .collect();
    Some(StepData::new(
        MetricSeries::new(base.date(), entries),
        distance,
        calories,
    ))
}

fn interval_entries(
    base: OffsetDateTime,
    interval_minutes: u16,
    values: Vec<u16>,
) -> Vec<Entry<u16>> {
    let interval = i64::from(interval_minutes.max(1));
    values
        .into_iter()
        .zip(0_i64..)
        .filter(|(value, _)| *value > 0)
        .map(|(value, index)| Entry::new(base + Duration::minutes(index * interval), value))
        .collect()
}
