//! Serial port enumeration and connection for port discovery.
//!
//! The lifecycle manager never opens ports itself; it asks a
//! [`PortLister`] for the available ports, picks the first one whose
//! descriptor contains the configured pattern, and hands the name to a
//! [`Connector`].

use async_trait::async_trait;
use glp2_core::error::{Error, Result};
use glp2_core::transport::{Connector, PortDescriptor, PortLister, Transport};
use tokio_serial::{SerialPortInfo, SerialPortType};

use crate::serial::{SerialConfig, SerialTransport};

/// Lists host serial ports through `tokio-serial`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortLister;

#[async_trait]
impl PortLister for SerialPortLister {
    async fn list(&self) -> Result<Vec<PortDescriptor>> {
        // Enumeration touches sysfs/registry synchronously; keep it off the
        // async worker threads.
        let ports = tokio::task::spawn_blocking(tokio_serial::available_ports)
            .await
            .map_err(|e| Error::PortListing(e.to_string()))?
            .map_err(|e| Error::PortListing(e.to_string()))?;

        tracing::debug!(count = ports.len(), "Enumerated serial ports");
        Ok(ports.iter().map(describe).collect())
    }
}

/// Flatten a `tokio-serial` port description into descriptor fields.
fn describe(info: &SerialPortInfo) -> PortDescriptor {
    let mut port = PortDescriptor::new(&info.port_name);
    match &info.port_type {
        SerialPortType::UsbPort(usb) => {
            port = port
                .with_field("type", "usb")
                .with_field("vendor_id", &format!("{:04x}", usb.vid))
                .with_field("product_id", &format!("{:04x}", usb.pid));
            if let Some(manufacturer) = &usb.manufacturer {
                port = port.with_field("manufacturer", manufacturer);
            }
            if let Some(product) = &usb.product {
                port = port.with_field("product", product);
            }
            if let Some(serial) = &usb.serial_number {
                port = port.with_field("serial_number", serial);
            }
        }
        SerialPortType::PciPort => port = port.with_field("type", "pci"),
        SerialPortType::BluetoothPort => port = port.with_field("type", "bluetooth"),
        SerialPortType::Unknown => port = port.with_field("type", "unknown"),
    }
    port
}

/// Opens [`SerialTransport`]s with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    /// Create a connector using the given serial configuration.
    pub fn new(config: SerialConfig) -> Self {
        SerialConnector { config }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self, port: &str) -> Result<Box<dyn Transport>> {
        let transport = SerialTransport::open_with_config(port, self.config.clone()).await?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_pci_port() {
        let info = SerialPortInfo {
            port_name: "COM1".into(),
            port_type: SerialPortType::PciPort,
        };
        let port = describe(&info);
        assert_eq!(port.name, "COM1");
        assert!(port.matches("pci"));
    }

    #[test]
    fn describe_unknown_port() {
        let info = SerialPortInfo {
            port_name: "/dev/ttyS0".into(),
            port_type: SerialPortType::Unknown,
        };
        let port = describe(&info);
        assert_eq!(port.fields, vec![("type".to_string(), "unknown".to_string())]);
    }
}
