use std::time::Duration;

use bon::Builder;

/// Timing for the connect cascade and silent reconnection.
#[derive(Debug, Clone, Builder)]
pub struct LinkConfig {
    /// Delay before the scan-assisted connect strategy starts.
    #[builder(default = Duration::from_millis(2500))]
    pub scan_assist_delay: Duration,
    /// Delay before the discovery-scan strategy starts.
    #[builder(default = Duration::from_secs(5))]
    pub discovery_delay: Duration,
    /// How long a cascade may run before it is declared failed.
    #[builder(default = Duration::from_secs(20))]
    pub cascade_window: Duration,
    /// How long the discovery strategy scans for the target.
    #[builder(default = Duration::from_secs(10))]
    pub discovery_scan_duration: Duration,
    #[builder(default = 3)]
    pub silent_reconnect_attempts: u32,
    /// First silent-reconnect delay; doubled after each attempt.
    #[builder(default = Duration::from_secs(1))]
    pub silent_reconnect_backoff: Duration,
    #[builder(default = Duration::from_secs(8))]
    pub max_reconnect_backoff: Duration,
    /// Name prefix applied to discovery scans.
    #[builder(into)]
    pub name_filter: Option<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl LinkConfig {
    /// Returns the silent-reconnect delay preceding `attempt` (1-based).
    pub(crate) fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1_u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.silent_reconnect_backoff
            .saturating_mul(factor)
            .min(self.max_reconnect_backoff)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(1, 1)]
    #[case(2, 2)]
    #[case(3, 4)]
    #[case(4, 8)]
    #[case(5, 8)]
    #[case(40, 8)]
    fn backoff_doubles_up_to_the_cap(#[case] attempt: u32, #[case] expected_secs: u64) {
        let config = LinkConfig::default();
        assert_eq!(Duration::from_secs(expected_secs), config.backoff_for(attempt));
    }

    #[test]
    fn defaults_follow_cascade_timing() {
        let config = LinkConfig::default();
        assert_eq!(Duration::from_millis(2500), config.scan_assist_delay);
        assert_eq!(Duration::from_secs(5), config.discovery_delay);
        assert_eq!(Duration::from_secs(20), config.cascade_window);
        assert_eq!(3, config.silent_reconnect_attempts);
        assert_eq!(None, config.name_filter);
    }
}
