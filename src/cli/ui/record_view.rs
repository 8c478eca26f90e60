use std::fmt::{self, Display, Formatter};

use crate::store::SavedDeviceRecord;
use crate::utils::format_epoch_ms;

use super::painter::Painter;
use super::table::Table;

/// Renders the saved device record as a key-value table.
pub(crate) struct RecordView<'a> {
    record: Option<&'a SavedDeviceRecord>,
    auto_connect: bool,
    painter: &'a Painter,
}

impl<'a> RecordView<'a> {
    pub(crate) fn new(
        record: Option<&'a SavedDeviceRecord>,
        auto_connect: bool,
        painter: &'a Painter,
    ) -> Self {
        Self {
            record,
            auto_connect,
            painter,
        }
    }
}

impl Display for RecordView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let Some(record) = self.record else {
            return write!(f, "{}", self.painter.muted("No saved device."));
        };

        let last_connected = if record.last_connected_at_epoch_ms > 0 {
            format_epoch_ms(record.last_connected_at_epoch_ms)
        } else {
            "never".to_string()
        };
        let outcome = if record.last_connection_succeeded {
            self.painter.success("succeeded")
        } else {
            self.painter.failure("failed")
        };
        let auto_connect = if self.auto_connect {
            self.painter.success("yes")
        } else {
            self.painter.muted("no")
        };

        let table = Table::key_value(
            self.painter,
            vec![
                ("address", self.painter.value(&record.address)),
                ("name", record.name.clone()),
                (
                    "device_type",
                    record.device_type.clone().unwrap_or_else(|| "-".to_string()),
                ),
                ("last_connected", last_connected),
                ("last_attempt", outcome),
                ("failed_attempts", record.connection_attempt_count.to_string()),
                ("auto_connect", auto_connect),
            ],
        );
        write!(f, "{table}")
    }
}

#[cfg(test)]
mod tests {
    use crate::hw::DeviceIdentity;

    use super::*;

    #[test]
    fn record_view_lists_record_fields() {
        let record = SavedDeviceRecord::connected(
            &DeviceIdentity::new("R02_A1B2", "AA:BB:CC:DD:EE:01", None),
            0,
        );
        let painter = Painter::new(false);
        let rendered = RecordView::new(Some(&record), false, &painter).to_string();

        assert!(rendered.contains("AA:BB:CC:DD:EE:01"));
        assert!(rendered.contains("never"));
        assert!(rendered.contains("succeeded"));
        assert!(rendered.contains("no"));
    }

    #[test]
    fn missing_record_says_so() {
        let painter = Painter::new(false);
        assert_eq!(
            "No saved device.",
            RecordView::new(None, false, &painter).to_string()
        );
    }
}
