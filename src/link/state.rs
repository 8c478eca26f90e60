use serde::Serialize;
use strum_macros::{Display, EnumIter};

/// Lifecycle of the link to the wearable.
///
/// The machine is cyclic: both `Disconnected` and `Error` accept a new
/// connection attempt.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Display, EnumIter, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    /// Returns whether the machine may move from `self` to `next`.
    ///
    /// Self-transitions are never allowed, so observers cannot see the same
    /// state twice in a row.
    #[must_use]
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Error, Reconnecting};

        match (self, next) {
            (current, Disconnected) => current != Disconnected,
            (Disconnected | Error, Connecting)
            | (Disconnected | Connecting, Error)
            | (Connecting | Reconnecting, Connected)
            | (Connected, Reconnecting)
            | (Reconnecting, Connecting) => true,
            _ => false,
        }
    }

    /// Returns whether an attempt to establish the link is under way.
    #[must_use]
    pub fn is_establishing(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use strum::IntoEnumIterator;

    use super::ConnectionState::{self, *};

    #[rstest]
    #[case(Disconnected, Connecting)]
    #[case(Disconnected, Error)]
    #[case(Connecting, Connected)]
    #[case(Connecting, Error)]
    #[case(Connected, Reconnecting)]
    #[case(Reconnecting, Connected)]
    #[case(Reconnecting, Connecting)]
    #[case(Error, Connecting)]
    #[case(Connected, Disconnected)]
    #[case(Error, Disconnected)]
    fn allowed_transitions(#[case] from: ConnectionState, #[case] to: ConnectionState) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case(Disconnected, Connected)]
    #[case(Connected, Connecting)]
    #[case(Connected, Error)]
    #[case(Error, Connected)]
    #[case(Reconnecting, Error)]
    fn rejected_transitions(#[case] from: ConnectionState, #[case] to: ConnectionState) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn no_state_transitions_to_itself() {
        for state in ConnectionState::iter() {
            assert!(!state.can_transition_to(state), "{state} -> {state}");
        }
    }

    #[test]
    fn renders_snake_case() {
        assert_eq!("reconnecting", Reconnecting.to_string());
        assert_eq!(
            "\"disconnected\"",
            serde_json::to_string(&Disconnected).expect("state should serialise")
        );
    }
}
