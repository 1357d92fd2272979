//! Glp2ManagerBuilder -- fluent builder for [`Glp2Manager`] instances.
//!
//! Separates configuration from construction so that callers can swap in
//! their own port enumeration and connector (or mocks) and tune the link
//! timing before any background task is spawned.
//!
//! # Example
//!
//! ```no_run
//! use glp2::{Glp2ManagerBuilder, StaticSettings};
//! use glp2::settings::keys;
//! use std::time::Duration;
//!
//! # async fn example() -> glp2_core::Result<()> {
//! let settings = StaticSettings::new()
//!     .with(keys::ENABLED, true)
//!     .with(keys::COM_PATTERN, "FTDI");
//! let manager = Glp2ManagerBuilder::new(settings)
//!     .response_timeout(Duration::from_millis(1500))
//!     .build();
//! manager.start().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use glp2_core::transport::{Connector, PortLister};
use glp2_transport::{SerialConnector, SerialPortLister};

use crate::manager::{self, Glp2Manager, Inner, ManagerConfig};
use crate::master::EVENT_CAPACITY;
use crate::settings::Settings;

/// Fluent builder for [`Glp2Manager`].
///
/// Without further configuration the manager enumerates and opens real
/// serial ports at 9600 baud 8N1.
pub struct Glp2ManagerBuilder {
    settings: Arc<dyn Settings>,
    port_lister: Arc<dyn PortLister>,
    connector: Arc<dyn Connector>,
    config: ManagerConfig,
}

impl Glp2ManagerBuilder {
    /// Create a builder reading its runtime settings from `settings`.
    pub fn new(settings: impl Settings + 'static) -> Self {
        Glp2ManagerBuilder {
            settings: Arc::new(settings),
            port_lister: Arc::new(SerialPortLister),
            connector: Arc::new(SerialConnector::default()),
            config: ManagerConfig::default(),
        }
    }

    /// Enumerate ports with `lister` instead of the host's serial ports.
    pub fn port_lister(mut self, lister: impl PortLister + 'static) -> Self {
        self.port_lister = Arc::new(lister);
        self
    }

    /// Open ports with `connector` instead of the serial driver.
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Minimum quiet time between a reply and the next request.
    ///
    /// Default: 200 ms.
    pub fn request_delay(mut self, delay: Duration) -> Self {
        self.config.master.request_delay = delay;
        self
    }

    /// How long to wait for a complete reply.
    ///
    /// Default: 1000 ms.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.master.response_timeout = timeout;
        self
    }

    /// How often to retry connecting while disconnected.
    ///
    /// Default: 10 s.
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config.health_check_interval = interval;
        self
    }

    /// Pause between idle polls.
    ///
    /// Default: 500 ms.
    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        self.config.monitor_interval = interval;
        self
    }

    /// Pause after an idle poll timed out.
    ///
    /// Default: 1 s.
    pub fn timeout_retry_delay(mut self, delay: Duration) -> Self {
        self.config.timeout_retry_delay = delay;
        self
    }

    /// Drain polls allowed during reset before a faulted tester counts as
    /// stuck.
    ///
    /// Default: [`MAX_DRAIN_ITERATIONS`](crate::manager::MAX_DRAIN_ITERATIONS).
    pub fn max_drain_iterations(mut self, iterations: u32) -> Self {
        self.config.max_drain_iterations = iterations;
        self
    }

    /// Build the manager and spawn its close watcher and health check.
    ///
    /// Must be called from within a tokio runtime. The manager starts in
    /// [`LifecycleState::Stopped`](glp2_core::LifecycleState::Stopped);
    /// call [`Glp2Manager::start`] to connect.
    pub fn build(self) -> Glp2Manager {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let events = event_tx.subscribe();
        let inner = Arc::new(Inner::new(
            self.settings,
            self.port_lister,
            self.connector,
            self.config,
            event_tx,
        ));

        tokio::spawn(manager::close_watcher(Arc::clone(&inner), events));
        tokio::spawn(manager::health_check_loop(Arc::clone(&inner)));

        Glp2Manager::from_inner(inner)
    }
}
