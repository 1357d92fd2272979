//! Asynchronous tester event types.
//!
//! Events are emitted through a [`tokio::sync::broadcast`] channel by the
//! master (link events and raw traffic) and by the lifecycle manager
//! (readiness, state changes, operator start requests). `Tx`/`Rx` exist for
//! diagnostic tracing only and must not drive control flow.

use crate::types::LifecycleState;

/// An event emitted by the GLP2 master or lifecycle manager.
///
/// Delivery is best-effort through a bounded broadcast channel; slow
/// consumers may miss events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Glp2Event {
    /// The transport was opened and the IO task is running.
    Open,

    /// The reset sequence completed; protocol calls are accepted.
    Ready,

    /// A link-level or reset failure, rendered for display.
    Error(String),

    /// The transport was closed (explicitly or after a failure).
    Close,

    /// Raw bytes written to the tester.
    Tx(Vec<u8>),

    /// Raw bytes read from the tester.
    Rx(Vec<u8>),

    /// The operator pressed the start button on the tester panel while no
    /// test program was loaded.
    StartRequested,

    /// The lifecycle manager moved to a new state.
    StateChanged(LifecycleState),
}
