use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime, UtcOffset};
use tracing::debug;

const VENDOR_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Returns the local calendar day `day_offset` days before `now`.
pub(crate) fn requested_day(now: OffsetDateTime, offset: UtcOffset, day_offset: u32) -> Date {
    let today = now.to_offset(offset).date();
    today
        .checked_sub(Duration::days(i64::from(day_offset)))
        .unwrap_or(Date::MIN)
}

pub(crate) fn local_midnight(day: Date, offset: UtcOffset) -> OffsetDateTime {
    day.midnight().assume_offset(offset)
}

/// Resolves a vendor `YYYY-MM-DD` string to local midnight of that day.
pub(crate) fn from_date_string(raw: Option<&str>, offset: UtcOffset) -> Option<OffsetDateTime> {
    let raw = raw?.trim();
    match Date::parse(raw, VENDOR_DATE) {
        Ok(day) => Some(local_midnight(day, offset)),
        Err(error) => {
            debug!(raw, %error, "ignoring unparseable vendor date");
            None
        }
    }
}

/// Resolves a vendor Unix timestamp (seconds) in the local offset.
pub(crate) fn from_unix(seconds: Option<i64>, offset: UtcOffset) -> Option<OffsetDateTime> {
    let seconds = seconds.filter(|seconds| *seconds > 0)?;
    match OffsetDateTime::from_unix_timestamp(seconds) {
        Ok(instant) => Some(instant.to_offset(offset)),
        Err(error) => {
            debug!(seconds, %error, "ignoring out-of-range vendor timestamp");
            None
        }
    }
}
