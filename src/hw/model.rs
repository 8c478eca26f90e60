use serde::Serialize;

/// A wearable observed during a scan.
///
/// Identities are immutable snapshots of one advertisement. They are dropped
/// when the scan session ends unless promoted to a connection target.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DeviceIdentity {
    name: String,
    address: String,
    signal_strength: Option<i16>,
}

impl DeviceIdentity {
    /// Creates a device identity.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        signal_strength: Option<i16>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            signal_strength,
        }
    }

    /// Returns the advertised device name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the transport-level address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the RSSI observed when this identity was created, if any.
    #[must_use]
    pub fn signal_strength(&self) -> Option<i16> {
        self.signal_strength
    }

    /// Returns whether `other` refers to the same physical device.
    ///
    /// Addresses are compared case-insensitively. A non-empty name match is
    /// accepted as well because some wearables rotate their address.
    pub(crate) fn matches(&self, other: &DeviceIdentity) -> bool {
        self.address.eq_ignore_ascii_case(&other.address)
            || (!self.name.is_empty() && self.name == other.name)
    }

    pub(crate) fn with_address(&self, address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..self.clone()
        }
    }
}

/// Predicate applied to scan results.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ScanFilter {
    name_prefix: Option<String>,
    address: Option<String>,
}

impl ScanFilter {
    /// Matches every advertisement.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Matches devices whose name starts with `prefix`.
    #[must_use]
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    /// Matches one specific address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Returns whether the identity passes this filter.
    #[must_use]
    pub fn accepts(&self, identity: &DeviceIdentity) -> bool {
        let name_ok = self
            .name_prefix
            .as_deref()
            .is_none_or(|prefix| prefix.is_empty() || identity.name().starts_with(prefix));
        let address_ok = self
            .address
            .as_deref()
            .is_none_or(|address| identity.address().eq_ignore_ascii_case(address));
        name_ok && address_ok
    }
}

/// An event produced while a scan session is active.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ScanEvent {
    /// A device passing the scan filter was seen.
    Found(DeviceIdentity),
    /// The radio stack aborted the scan with a diagnostic code.
    Failed { code: i32 },
}

/// Link-level notification raised by the transport.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LinkEvent {
    /// The link to `address` is established.
    Connected { address: String },
    /// The link to `address` dropped.
    Disconnected { address: String },
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn ring() -> DeviceIdentity {
        DeviceIdentity::new("R02_A1B2", "AA:BB:CC:DD:EE:01", Some(-52))
    }

    #[rstest]
    #[case::any(ScanFilter::any(), true)]
    #[case::prefix_hit(ScanFilter::any().with_name_prefix("R02"), true)]
    #[case::prefix_miss(ScanFilter::any().with_name_prefix("Band"), false)]
    #[case::address_case_insensitive(ScanFilter::any().with_address("aa:bb:cc:dd:ee:01"), true)]
    #[case::address_miss(ScanFilter::any().with_address("AA:BB:CC:DD:EE:02"), false)]
    fn scan_filter_accepts_expected_identities(#[case] filter: ScanFilter, #[case] expected: bool) {
        assert_eq!(expected, filter.accepts(&ring()));
    }

    #[test]
    fn identity_matches_rotated_address_by_name() {
        let rotated = DeviceIdentity::new("R02_A1B2", "11:22:33:44:55:66", None);
        assert!(ring().matches(&rotated));
    }

    #[test]
    fn identity_with_address_keeps_name() {
        let moved = ring().with_address("11:22:33:44:55:66");
        assert_eq!("R02_A1B2", moved.name());
        assert_eq!("11:22:33:44:55:66", moved.address());
    }
}
