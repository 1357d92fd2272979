//! Core types shared across the GLP2 crates.

use std::fmt;
use std::str::FromStr;

/// Readiness of the tester connection, owned by the lifecycle manager.
///
/// The master has no notion of this state; it only reports open/close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    /// Explicitly stopped (initial state). The health check leaves it alone.
    #[default]
    Stopped,
    /// Not connected; the health check will retry.
    Disconnected,
    /// Looking for the port and opening it.
    Connecting,
    /// Running the reset sequence.
    Resetting,
    /// Accepting protocol calls; the idle monitor is running.
    Ready,
}

impl LifecycleState {
    /// Whether a transport is (or is being) held in this state.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            LifecycleState::Connecting | LifecycleState::Resetting | LifecycleState::Ready
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Stopped => "STOPPED",
            LifecycleState::Disconnected => "DISCONNECTED",
            LifecycleState::Connecting => "CONNECTING",
            LifecycleState::Resetting => "RESETTING",
            LifecycleState::Ready => "READY",
        };
        write!(f, "{s}")
    }
}

/// Error returned when a string cannot be parsed into a [`LifecycleState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStateError(String);

impl fmt::Display for ParseStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown lifecycle state: {}", self.0)
    }
}

impl std::error::Error for ParseStateError {}

impl FromStr for LifecycleState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STOPPED" => Ok(LifecycleState::Stopped),
            "DISCONNECTED" => Ok(LifecycleState::Disconnected),
            "CONNECTING" => Ok(LifecycleState::Connecting),
            "RESETTING" => Ok(LifecycleState::Resetting),
            "READY" => Ok(LifecycleState::Ready),
            _ => Err(ParseStateError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_stopped() {
        assert_eq!(LifecycleState::default(), LifecycleState::Stopped);
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for state in [
            LifecycleState::Stopped,
            LifecycleState::Disconnected,
            LifecycleState::Connecting,
            LifecycleState::Resetting,
            LifecycleState::Ready,
        ] {
            assert_eq!(state.to_string().parse::<LifecycleState>(), Ok(state));
        }
    }

    #[test]
    fn from_str_is_case_insensitive() {
        assert_eq!("ready".parse(), Ok(LifecycleState::Ready));
        assert!("bogus".parse::<LifecycleState>().is_err());
    }

    #[test]
    fn connected_states() {
        assert!(!LifecycleState::Stopped.is_connected());
        assert!(!LifecycleState::Disconnected.is_connected());
        assert!(LifecycleState::Connecting.is_connected());
        assert!(LifecycleState::Ready.is_connected());
    }
}
