//! Mock port enumeration and connector for lifecycle tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use glp2_core::error::{Error, Result};
use glp2_core::transport::{Connector, PortDescriptor, PortLister, Transport};

use crate::mock_serial::MockTransport;

/// A [`PortLister`] returning a fixed port list, or a fixed failure.
#[derive(Debug, Clone, Default)]
pub struct MockPortLister {
    ports: Arc<Mutex<Vec<PortDescriptor>>>,
    failure: Option<String>,
}

impl MockPortLister {
    /// A lister reporting `ports`.
    pub fn new(ports: Vec<PortDescriptor>) -> Self {
        MockPortLister {
            ports: Arc::new(Mutex::new(ports)),
            failure: None,
        }
    }

    /// A lister whose every call fails with `message`.
    pub fn failing(message: &str) -> Self {
        MockPortLister {
            ports: Arc::default(),
            failure: Some(message.to_string()),
        }
    }

    /// Replace the reported ports (simulates plugging a device in).
    pub fn set_ports(&self, ports: Vec<PortDescriptor>) {
        *self.ports.lock().unwrap_or_else(|e| e.into_inner()) = ports;
    }
}

#[async_trait]
impl PortLister for MockPortLister {
    async fn list(&self) -> Result<Vec<PortDescriptor>> {
        match &self.failure {
            Some(message) => Err(Error::PortListing(message.clone())),
            None => Ok(self.ports.lock().unwrap_or_else(|e| e.into_inner()).clone()),
        }
    }
}

/// A [`Connector`] handing out pre-built [`MockTransport`]s in order.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    transports: Arc<Mutex<VecDeque<MockTransport>>>,
    opened: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    /// Create a connector with no transports queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transport for the next `connect()` call.
    pub fn push(&self, transport: MockTransport) {
        self.transports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(transport);
    }

    /// Port names passed to `connect()` so far.
    pub fn opened_ports(&self) -> Vec<String> {
        self.opened.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, port: &str) -> Result<Box<dyn Transport>> {
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(port.to_string());
        let next = self
            .transports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(Error::Transport(format!("cannot open {port}: no mock transport queued"))),
        }
    }
}
