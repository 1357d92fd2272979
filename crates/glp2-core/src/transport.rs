//! Transport trait for tester communication.
//!
//! The [`Transport`] trait abstracts over the physical link to the tester.
//! The serial implementation lives in `glp2-transport`; a scripted mock for
//! deterministic tests lives in `glp2-test-harness`.
//!
//! The GLP2 master operates on a `Transport` rather than directly on a
//! serial port, so the request queue, timeouts, and the connection lifecycle
//! can be unit-tested without hardware.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a tester.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the tester.
    ///
    /// Implementations should not return until all bytes have been written
    /// to the underlying link.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the tester into the provided buffer.
    ///
    /// Returns the number of bytes read. Waits up to `timeout` for data to
    /// arrive; returns [`Error::ResponseTimeout`](crate::error::Error::ResponseTimeout)
    /// if nothing is received within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NoConnection`](crate::error::Error::NoConnection).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}

/// One enumerated serial port.
///
/// `fields` carries every descriptive string the platform reports
/// (manufacturer, product, serial number, vendor/product id, ...). Port
/// discovery matches a configured pattern against the name and each field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortDescriptor {
    /// OS path or name used to open the port (e.g. `/dev/ttyUSB0`, `COM3`).
    pub name: String,
    /// Descriptor fields as `(key, value)` pairs.
    pub fields: Vec<(String, String)>,
}

impl PortDescriptor {
    /// Create a descriptor with no extra fields.
    pub fn new(name: &str) -> Self {
        PortDescriptor {
            name: name.to_string(),
            fields: Vec::new(),
        }
    }

    /// Add a descriptor field.
    pub fn with_field(mut self, key: &str, value: &str) -> Self {
        self.fields.push((key.to_string(), value.to_string()));
        self
    }

    /// Whether the name or any field contains `pattern`.
    pub fn matches(&self, pattern: &str) -> bool {
        self.name.contains(pattern) || self.fields.iter().any(|(_, v)| v.contains(pattern))
    }
}

/// Enumerates the serial ports available on this host.
#[async_trait]
pub trait PortLister: Send + Sync {
    /// List available ports.
    async fn list(&self) -> Result<Vec<PortDescriptor>>;
}

/// Opens a [`Transport`] on a named port.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open the port named `port`.
    async fn connect(&self, port: &str) -> Result<Box<dyn Transport>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_matches_name() {
        let port = PortDescriptor::new("/dev/ttyUSB0");
        assert!(port.matches("ttyUSB"));
        assert!(!port.matches("ACM"));
    }

    #[test]
    fn descriptor_matches_any_field() {
        let port = PortDescriptor::new("COM7")
            .with_field("manufacturer", "FTDI")
            .with_field("serial_number", "GLP2-00412");
        assert!(port.matches("GLP2"));
        assert!(port.matches("FTDI"));
        assert!(!port.matches("Prolific"));
    }
}
