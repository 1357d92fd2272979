//! GLP2 electrical-safety tester protocol for Rust.
//!
//! This crate drives a GLP2 tester over a serial link. It provides:
//!
//! - **Frame codec** ([`frame`]) -- STX/ETX framing, the XOR checksum, and
//!   the text encoding used in data strings.
//! - **Parameters** ([`params`]) -- the instrument parameter table and
//!   validated [`ParameterSet`]s.
//! - **Program steps** ([`steps`], [`program`]) -- validated PE, ISO, FCT
//!   and visual test steps, and whole [`TestProgram`]s with progress
//!   estimation.
//! - **Responses** ([`response`]) -- typed decoding of actual values,
//!   interim values and device options.
//! - **Glp2Master** ([`master`]) -- one request on the wire at a time, in
//!   call order, with per-request timeouts.
//! - **Glp2Manager** ([`manager`], [`builder`]) -- port discovery, the reset
//!   sequence, readiness, and idle monitoring for operator start requests.
//!
//! # Example
//!
//! ```
//! use glp2::frame::{frame_data_string, verify_checksum};
//! use glp2::steps::{IsoMode, IsoTest, StepHeader};
//!
//! // "start test" for the tester at address 1
//! let request = frame_data_string(1, "TS");
//! assert_eq!(request, b"\x02\x81\x20TS 84\x03");
//! assert!(verify_checksum(&request).is_ok());
//!
//! // Insulation resistance is limited to 500 MOhm.
//! assert!(IsoTest::new(StepHeader::new(2), IsoMode::Resistance, 500.0, 500.0).is_ok());
//! assert!(IsoTest::new(StepHeader::new(2), IsoMode::Resistance, 500.01, 500.0).is_err());
//! ```

pub mod builder;
pub mod frame;
pub mod manager;
pub mod master;
pub mod params;
pub mod program;
pub mod response;
pub mod settings;
pub mod steps;

mod io;

pub use builder::Glp2ManagerBuilder;
pub use manager::Glp2Manager;
pub use master::{Glp2Master, MasterOptions};
pub use params::ParameterSet;
pub use program::{Progress, TestProgram};
pub use response::Response;
pub use settings::{Settings, StaticSettings};
pub use steps::ProgramStep;

pub use glp2_core::{Error, Glp2Event, LifecycleState, Result};
