//! glp2-core: Core traits, types, and error definitions for the GLP2 stack.
//!
//! This crate defines the instrument-agnostic pieces shared by the GLP2
//! protocol driver, the serial transport, and the mock test harness.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel
//! - [`Glp2Event`] -- asynchronous connection and diagnostic notifications
//! - [`LifecycleState`] -- readiness of the tester connection
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use events::Glp2Event;
pub use transport::{Connector, PortDescriptor, PortLister, Transport};
pub use types::{LifecycleState, ParseStateError};
