//! glp2-test-harness: Test utilities and mock transports for the GLP2 stack.
//!
//! This crate provides [`MockTransport`] for deterministic testing of the
//! master and lifecycle manager without a real tester, and
//! [`MockPortLister`] / [`MockConnector`] for exercising port discovery.

pub mod mock_ports;
pub mod mock_serial;

pub use mock_ports::{MockConnector, MockPortLister};
pub use mock_serial::MockTransport;
