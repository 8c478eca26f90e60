use std::fmt::{self, Display, Formatter};

use crate::hw::DeviceIdentity;
use crate::utils::format_rssi;

use super::painter::Painter;
use super::table::Table;

/// Renders scan results as a grid, one device per row.
pub(crate) struct DeviceListView<'a> {
    devices: &'a [DeviceIdentity],
    painter: &'a Painter,
}

impl<'a> DeviceListView<'a> {
    pub(crate) fn new(devices: &'a [DeviceIdentity], painter: &'a Painter) -> Self {
        Self { devices, painter }
    }
}

impl Display for DeviceListView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.devices.is_empty() {
            return write!(f, "{}", self.painter.warning("No devices found."));
        }

        let rows = self
            .devices
            .iter()
            .map(|device| {
                let name = if device.name().is_empty() {
                    "<unknown>"
                } else {
                    device.name()
                };
                vec![
                    self.painter.value(device.address()),
                    name.to_string(),
                    format_rssi(device.signal_strength()),
                ]
            })
            .collect();
        write!(f, "{}", Table::grid(["address", "name", "rssi"], rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_list_renders_each_device() {
        let devices = vec![
            DeviceIdentity::new("R02_A1B2", "AA:BB:CC:DD:EE:01", Some(-43)),
            DeviceIdentity::new("", "AA:BB:CC:DD:EE:02", None),
        ];
        let painter = Painter::new(false);
        let rendered = DeviceListView::new(&devices, &painter).to_string();

        assert!(rendered.contains("AA:BB:CC:DD:EE:01"));
        assert!(rendered.contains("-43 dBm"));
        assert!(rendered.contains("<unknown>"));
    }

    #[test]
    fn empty_device_list_says_so() {
        let painter = Painter::new(false);
        assert_eq!(
            "No devices found.",
            DeviceListView::new(&[], &painter).to_string()
        );
    }
}
