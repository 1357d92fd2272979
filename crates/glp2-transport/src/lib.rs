//! Transport implementations for the GLP2 tester stack.
//!
//! This crate provides the concrete serial implementation of the
//! [`Transport`](glp2_core::Transport) trait, plus the serial-port
//! enumeration and connector used by the lifecycle manager for port
//! discovery.
//!
//! - [`SerialTransport`]: USB virtual COM ports and RS-232 links (9600 8N1)
//! - [`SerialPortLister`]: lists ports with their USB descriptor strings
//! - [`SerialConnector`]: opens a [`SerialTransport`] by port name
//!
//! # Example
//!
//! ```no_run
//! use glp2_transport::SerialTransport;
//! use glp2_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> glp2_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 9600).await?;
//!
//! // Get-actual-values request to address 1
//! transport.send(&[0x02, 0x81, 0x20, b'I', b'W', b' ', b'9', b'D', 0x03]).await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod ports;
pub mod serial;

pub use ports::{SerialConnector, SerialPortLister};
pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits};
