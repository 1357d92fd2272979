//! Glp2Manager -- connection lifecycle for one tester.
//!
//! The manager finds the tester's serial port, opens a [`Glp2Master`] on it,
//! runs the reset sequence and then keeps the link under observation:
//!
//! - an idle monitor polls the actual values while no test is running and
//!   turns the "no test step defined" fault into
//!   [`Glp2Event::StartRequested`] (the operator pressed start on the panel),
//! - a close watcher drops back to [`LifecycleState::Disconnected`] when the
//!   link goes away,
//! - a periodic health check calls [`start`](Glp2Manager::start) again while
//!   disconnected.
//!
//! All state changes go through the pure [`transition`] function, so the
//! state machine can be tested without any I/O.
//!
//! Build one with [`Glp2ManagerBuilder`](crate::Glp2ManagerBuilder).

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use glp2_core::error::{Error, Result};
use glp2_core::events::Glp2Event;
use glp2_core::transport::{Connector, PortLister};
use glp2_core::types::LifecycleState;

use crate::master::{Glp2Master, MasterOptions};
use crate::params::ParameterSet;
use crate::program::TestProgram;
use crate::response::{DeviceOptionsResponse, NO_TEST_STEP_DEFINED, Response};
use crate::settings::{Glp2Settings, Settings};

/// Drain polls allowed during reset before a pending fault counts as stuck.
pub const MAX_DRAIN_ITERATIONS: u32 = 10;

/// Consecutive monitor timeouts logged before the warnings go quiet.
pub const TIMEOUT_WARNING_LIMIT: u32 = 5;

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Something that happened to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// `start()` was called.
    Start,
    /// Settings or licence forbid connecting.
    Disabled,
    PortFound,
    PortMissing,
    ListingFailed,
    /// The master is running on the opened port.
    Opened,
    OpenFailed,
    ResetBegin,
    ResetDone,
    ResetFailed,
    /// The link went away.
    Closed,
    /// `stop()` was called.
    Stop,
}

/// Where the caller wants the connection to end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    /// Keep (re)connecting.
    Running,
    /// Stay stopped until the next `start()`.
    #[default]
    Stopped,
}

/// Next state after `input`, or `None` when `input` does not apply in
/// `state`.
pub fn transition(state: LifecycleState, input: Input, target: Target) -> Option<LifecycleState> {
    use LifecycleState::*;

    let down = match target {
        Target::Running => Disconnected,
        Target::Stopped => Stopped,
    };

    match (state, input) {
        (_, Input::Stop) => Some(Stopped),

        (Stopped | Disconnected, Input::Start) => Some(Connecting),
        (Stopped | Disconnected, Input::Disabled) => Some(state),

        (Connecting, Input::PortFound | Input::Opened) => Some(Connecting),
        (Connecting, Input::PortMissing | Input::OpenFailed) => Some(down),
        (Connecting, Input::ListingFailed) => Some(Stopped),

        (Connecting | Ready, Input::ResetBegin) => Some(Resetting),
        (Resetting, Input::ResetDone) => Some(Ready),
        (Resetting, Input::ResetFailed) => Some(down),

        (Resetting | Ready, Input::Closed) => Some(down),

        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Timing of the manager's background work.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Link options. Address and programming delay are replaced by the
    /// settings at every connection attempt.
    pub master: MasterOptions,
    pub health_check_interval: Duration,
    pub monitor_interval: Duration,
    /// Pause after a monitor poll timed out.
    pub timeout_retry_delay: Duration,
    pub max_drain_iterations: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            master: MasterOptions::default(),
            health_check_interval: Duration::from_secs(10),
            monitor_interval: Duration::from_millis(500),
            timeout_retry_delay: Duration::from_secs(1),
            max_drain_iterations: MAX_DRAIN_ITERATIONS,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Shared {
    state: LifecycleState,
    target: Target,
    test_in_progress: bool,
    monitor: Option<CancellationToken>,
    cancel_delay: Duration,
}

pub(crate) struct Inner {
    settings: Arc<dyn Settings>,
    port_lister: Arc<dyn PortLister>,
    connector: Arc<dyn Connector>,
    master: Glp2Master,
    event_tx: broadcast::Sender<Glp2Event>,
    config: ManagerConfig,
    shared: Mutex<Shared>,
    shutdown: CancellationToken,
}

impl Inner {
    pub(crate) fn new(
        settings: Arc<dyn Settings>,
        port_lister: Arc<dyn PortLister>,
        connector: Arc<dyn Connector>,
        config: ManagerConfig,
        event_tx: broadcast::Sender<Glp2Event>,
    ) -> Self {
        Inner {
            settings,
            port_lister,
            connector,
            master: Glp2Master::with_event_sender(config.master.clone(), event_tx.clone()),
            event_tx,
            config,
            shared: Mutex::new(Shared {
                state: LifecycleState::Stopped,
                target: Target::Stopped,
                test_in_progress: false,
                monitor: None,
                cancel_delay: crate::settings::DEFAULT_CANCEL_DELAY,
            }),
            shutdown: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> LifecycleState {
        self.lock().state
    }

    fn emit(&self, event: Glp2Event) {
        let _ = self.event_tx.send(event);
    }

    /// Feed `input` to the state machine. Returns the new state, or `None`
    /// when the input was ignored.
    fn apply(&self, input: Input) -> Option<LifecycleState> {
        let (prev, next) = {
            let mut shared = self.lock();
            let next = transition(shared.state, input, shared.target)?;
            (std::mem::replace(&mut shared.state, next), next)
        };
        if prev != next {
            info!(from = %prev, to = %next, ?input, "Lifecycle state changed");
            self.emit(Glp2Event::StateChanged(next));
        }
        Some(next)
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            LifecycleState::Ready => Ok(()),
            _ => Err(Error::NoConnection),
        }
    }

    fn set_test_in_progress(&self, running: bool) {
        self.lock().test_in_progress = running;
    }

    fn stop_monitor(&self) {
        if let Some(token) = self.lock().monitor.take() {
            token.cancel();
        }
    }

    // -----------------------------------------------------------------------
    // Connect and reset
    // -----------------------------------------------------------------------

    async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut shared = self.lock();
            shared.target = Target::Running;
            if !matches!(
                shared.state,
                LifecycleState::Stopped | LifecycleState::Disconnected
            ) {
                debug!(state = %shared.state, "Start ignored, already active");
                return Ok(());
            }
        }

        let settings = match Glp2Settings::load(self.settings.as_ref()) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Cannot read tester settings");
                self.apply(Input::Disabled);
                return Err(e);
            }
        };
        if !settings.enabled || !self.settings.is_licensed() {
            debug!(
                enabled = settings.enabled,
                licensed = self.settings.is_licensed(),
                "Tester disabled"
            );
            self.apply(Input::Disabled);
            return Err(Error::Disabled);
        }

        // Another caller may have got here first.
        if self.apply(Input::Start).is_none() {
            return Ok(());
        }
        self.lock().cancel_delay = settings.cancel_delay;

        let ports = match self.port_lister.list().await {
            Ok(ports) => ports,
            Err(e) => {
                warn!(error = %e, "Listing serial ports failed");
                self.emit(Glp2Event::Error(e.to_string()));
                self.apply(Input::ListingFailed);
                return Err(e);
            }
        };

        let pattern = settings.com_pattern.as_str();
        let port = if pattern.is_empty() {
            None
        } else {
            ports.iter().find(|p| p.matches(pattern))
        };
        let Some(port) = port else {
            warn!(pattern, available = ports.len(), "No serial port matches the tester pattern");
            self.apply(Input::PortMissing);
            return Err(Error::PortNotFound(pattern.to_string()));
        };
        info!(port = %port.name, pattern, "Found tester port");
        self.apply(Input::PortFound);

        let transport = match self.connector.connect(&port.name).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!(port = %port.name, error = %e, "Opening tester port failed");
                self.emit(Glp2Event::Error(e.to_string()));
                self.apply(Input::OpenFailed);
                return Err(e);
            }
        };

        self.master.set_options(MasterOptions {
            address: settings.address,
            programming_delay: settings.programming_delay,
            ..self.config.master.clone()
        });
        if let Err(e) = self.master.open(transport).await {
            warn!(error = %e, "Starting tester link failed");
            self.apply(Input::OpenFailed);
            return Err(e);
        }

        if self.lock().target == Target::Stopped {
            debug!("Stopped while connecting");
            self.master.close().await;
            self.apply(Input::Stop);
            return Ok(());
        }

        self.apply(Input::Opened);
        self.reset(settings.cancel_delay).await
    }

    async fn reset(self: &Arc<Self>, cancel_delay: Duration) -> Result<()> {
        if !matches!(
            self.state(),
            LifecycleState::Connecting | LifecycleState::Ready
        ) {
            return Err(Error::NoConnection);
        }
        self.stop_monitor();
        self.set_test_in_progress(false);
        if self.apply(Input::ResetBegin).is_none() {
            return Err(Error::NoConnection);
        }

        match self.reset_sequence(cancel_delay).await {
            Ok(()) => {
                if self.apply(Input::ResetDone).is_none() {
                    // Closed or stopped while the sequence ran.
                    return Err(Error::NoConnection);
                }
                self.emit(Glp2Event::Ready);
                match self.master.get_device_options().await {
                    Ok(options) => info!(options = ?options.options, "Tester ready"),
                    Err(e) => debug!(error = %e, "Tester ready, device options unavailable"),
                }
                self.start_monitor();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Tester reset failed");
                self.emit(Glp2Event::Error(e.to_string()));
                self.master.close().await;
                self.apply(Input::ResetFailed);
                Err(e)
            }
        }
    }

    async fn reset_sequence(&self, cancel_delay: Duration) -> Result<()> {
        self.master.cancel_test().await?;
        tokio::time::sleep(cancel_delay).await;
        self.master.remove_test_results().await?;
        self.master.remove_test_programs().await?;
        self.master.set_parameters(&ParameterSet::reset_defaults()).await?;

        let mut polls = 0;
        loop {
            polls += 1;
            let Some(response) = self.master.get_actual_values().await? else {
                debug!(polls, "Tester result buffer drained");
                return Ok(());
            };
            let fault = response.fault_status();
            debug!(polls, fault, "Discarding stale tester result");
            if polls > self.config.max_drain_iterations && fault != 0 {
                return Err(Error::StuckTester(fault));
            }
        }
    }

    async fn stop(&self) {
        self.lock().target = Target::Stopped;
        self.stop_monitor();
        self.set_test_in_progress(false);
        self.master.close().await;
        self.apply(Input::Stop);
    }

    /// The link closed underneath us.
    fn handle_closed(&self) {
        // A Close from a link that has already been replaced.
        if self.master.is_open() {
            return;
        }
        self.stop_monitor();
        self.set_test_in_progress(false);
        self.apply(Input::Closed);
    }

    // -----------------------------------------------------------------------
    // Background tasks
    // -----------------------------------------------------------------------

    fn start_monitor(self: &Arc<Self>) {
        let token = self.shutdown.child_token();
        {
            let mut shared = self.lock();
            if let Some(old) = shared.monitor.replace(token.clone()) {
                old.cancel();
            }
        }
        tokio::spawn(monitor_loop(Arc::clone(self), token));
    }
}

async fn monitor_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    debug!("Idle monitor started");
    let mut timeouts = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(inner.config.monitor_interval) => {}
        }

        let (state, busy) = {
            let shared = inner.lock();
            (shared.state, shared.test_in_progress)
        };
        if state != LifecycleState::Ready {
            break;
        }
        if busy {
            continue;
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = inner.master.get_actual_values() => result,
        };

        match result {
            Ok(values) => {
                timeouts = 0;
                if let Some(response) = values {
                    if response.fault_status() == NO_TEST_STEP_DEFINED {
                        info!("Start requested on the tester panel");
                        inner.emit(Glp2Event::StartRequested);
                    }
                }
            }
            Err(Error::ResponseTimeout) => {
                timeouts += 1;
                if timeouts <= TIMEOUT_WARNING_LIMIT {
                    warn!(timeouts, "Tester did not answer the idle poll");
                } else if timeouts == TIMEOUT_WARNING_LIMIT + 1 {
                    warn!("Tester keeps timing out, suppressing further warnings");
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(inner.config.timeout_retry_delay) => {}
                }
            }
            Err(e) if e.is_connection_failure() => {
                debug!(error = %e, "Idle monitor lost the link");
                break;
            }
            Err(e) => warn!(error = %e, "Idle poll failed"),
        }
    }
    debug!("Idle monitor stopped");
}

/// Calls `start()` every `health_check_interval` while disconnected.
pub(crate) async fn health_check_loop(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(inner.config.health_check_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        if inner.state() == LifecycleState::Disconnected {
            debug!("Health check reconnecting");
            if let Err(e) = inner.start().await {
                debug!(error = %e, "Reconnect attempt failed");
            }
        }
    }
}

/// Turns link `Close` events into the `Closed` input.
pub(crate) async fn close_watcher(
    inner: Arc<Inner>,
    mut events: broadcast::Receiver<Glp2Event>,
) {
    loop {
        let event = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(Glp2Event::Close) => inner.handle_closed(),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!(missed, "Close watcher lagged");
                if !inner.master.is_open() {
                    inner.handle_closed();
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// Owns the connection to one tester.
///
/// Dropping the manager stops its background tasks; call
/// [`stop`](Self::stop) first to close the link cleanly.
pub struct Glp2Manager {
    inner: Arc<Inner>,
}

impl Glp2Manager {
    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Glp2Manager { inner }
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state()
    }

    /// `true` while protocol calls are accepted.
    pub fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    /// `true` between [`start_test`](Self::start_test) and the completed
    /// result (or [`cancel_test`](Self::cancel_test)).
    pub fn is_test_in_progress(&self) -> bool {
        self.inner.lock().test_in_progress
    }

    /// Subscribe to link and lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Glp2Event> {
        self.inner.event_tx.subscribe()
    }

    /// Find the tester, open it and reset it.
    ///
    /// Does nothing when already connecting or connected. On failure the
    /// health check keeps retrying until [`stop`](Self::stop) is called.
    pub async fn start(&self) -> Result<()> {
        self.inner.start().await
    }

    /// Close the link and stay stopped.
    pub async fn stop(&self) {
        self.inner.stop().await
    }

    /// Run the reset sequence again on an open link.
    pub async fn reset(&self, cancel_delay: Duration) -> Result<()> {
        self.inner.reset(cancel_delay).await
    }

    /// Reset with the cancel delay from the settings.
    pub async fn reset_default(&self) -> Result<()> {
        let delay = self.inner.lock().cancel_delay;
        self.inner.reset(delay).await
    }

    pub async fn set_test_program(&self, program: &TestProgram) -> Result<()> {
        self.inner.ensure_ready()?;
        self.inner.master.set_test_program(program).await
    }

    /// Start the loaded program. The idle monitor pauses until the result
    /// is complete.
    pub async fn start_test(&self) -> Result<()> {
        self.inner.ensure_ready()?;
        self.inner.set_test_in_progress(true);
        let result = self.inner.master.start_test().await;
        if result.is_err() {
            self.inner.set_test_in_progress(false);
        }
        result
    }

    pub async fn cancel_test(&self) -> Result<()> {
        self.inner.ensure_ready()?;
        let result = self.inner.master.cancel_test().await;
        self.inner.set_test_in_progress(false);
        result
    }

    /// Fetch the pending actual values. A completed result ends the running
    /// test.
    pub async fn get_actual_values(&self) -> Result<Option<Response>> {
        self.inner.ensure_ready()?;
        let values = self.inner.master.get_actual_values().await?;
        if let Some(Response::ActualValues(actual)) = &values {
            if actual.completed {
                self.inner.set_test_in_progress(false);
            }
        }
        Ok(values)
    }

    pub async fn get_device_options(&self) -> Result<DeviceOptionsResponse> {
        self.inner.ensure_ready()?;
        self.inner.master.get_device_options().await
    }

    /// Answer a pending visual inspection step.
    pub async fn ack_visual_test(&self, pass: bool) -> Result<()> {
        self.inner.ensure_ready()?;
        self.inner.master.ack_visual_test(pass).await
    }
}

impl Drop for Glp2Manager {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LifecycleState::*;

    const ALL: [LifecycleState; 5] = [Stopped, Disconnected, Connecting, Resetting, Ready];

    #[test]
    fn start_only_from_idle_states() {
        for state in ALL {
            let next = transition(state, Input::Start, Target::Running);
            match state {
                Stopped | Disconnected => assert_eq!(next, Some(Connecting)),
                _ => assert_eq!(next, None, "{state}"),
            }
        }
    }

    #[test]
    fn disabled_keeps_state() {
        assert_eq!(transition(Stopped, Input::Disabled, Target::Running), Some(Stopped));
        assert_eq!(
            transition(Disconnected, Input::Disabled, Target::Running),
            Some(Disconnected)
        );
        assert_eq!(transition(Ready, Input::Disabled, Target::Running), None);
    }

    #[test]
    fn connect_outcomes() {
        assert_eq!(transition(Connecting, Input::PortFound, Target::Running), Some(Connecting));
        assert_eq!(
            transition(Connecting, Input::PortMissing, Target::Running),
            Some(Disconnected)
        );
        assert_eq!(transition(Connecting, Input::PortMissing, Target::Stopped), Some(Stopped));
        assert_eq!(transition(Connecting, Input::ListingFailed, Target::Running), Some(Stopped));
        assert_eq!(
            transition(Connecting, Input::OpenFailed, Target::Running),
            Some(Disconnected)
        );
    }

    #[test]
    fn reset_cycle() {
        assert_eq!(transition(Connecting, Input::ResetBegin, Target::Running), Some(Resetting));
        assert_eq!(transition(Ready, Input::ResetBegin, Target::Running), Some(Resetting));
        assert_eq!(transition(Resetting, Input::ResetDone, Target::Running), Some(Ready));
        assert_eq!(
            transition(Resetting, Input::ResetFailed, Target::Running),
            Some(Disconnected)
        );
        assert_eq!(transition(Resetting, Input::ResetFailed, Target::Stopped), Some(Stopped));
        assert_eq!(transition(Stopped, Input::ResetBegin, Target::Running), None);
        assert_eq!(transition(Ready, Input::ResetDone, Target::Running), None);
    }

    #[test]
    fn close_respects_target() {
        assert_eq!(transition(Ready, Input::Closed, Target::Running), Some(Disconnected));
        assert_eq!(transition(Ready, Input::Closed, Target::Stopped), Some(Stopped));
        assert_eq!(transition(Resetting, Input::Closed, Target::Running), Some(Disconnected));
        // Opening a port closes the previous link first.
        assert_eq!(transition(Connecting, Input::Closed, Target::Running), None);
        assert_eq!(transition(Disconnected, Input::Closed, Target::Running), None);
    }

    #[test]
    fn stop_always_wins() {
        for state in ALL {
            assert_eq!(transition(state, Input::Stop, Target::Stopped), Some(Stopped));
        }
    }
}
