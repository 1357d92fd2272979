//! Glp2Master -- request/response access to one tester.
//!
//! The master frames data strings, hands them to the IO task in call order
//! and maps the replies to typed results. It does not know about ports or
//! readiness; the [`Glp2Manager`](crate::Glp2Manager) layers that on top.
//!
//! # Example
//!
//! ```no_run
//! use glp2::{Glp2Master, MasterOptions};
//! use glp2_transport::SerialTransport;
//!
//! # async fn example() -> glp2_core::Result<()> {
//! let master = Glp2Master::new(MasterOptions::default());
//! master.open(Box::new(SerialTransport::open("/dev/ttyUSB0", 9600).await?)).await?;
//!
//! master.beep().await?;
//! if let Some(values) = master.get_actual_values().await? {
//!     println!("{values:?}");
//! }
//! master.close().await;
//! # Ok(())
//! # }
//! ```

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

use glp2_core::error::{Error, Result};
use glp2_core::events::Glp2Event;
use glp2_core::transport::Transport;

use crate::frame::frame_data_string;
use crate::io::{self, IoConfig, IoHandle, MasterIo, Reply, ReplyKind};
use crate::params::ParameterSet;
use crate::program::TestProgram;
use crate::response::{DeviceOptionsResponse, Response};

const START_TEST: &str = "TS";
const CANCEL_TEST: &str = "TA";
const GET_ACTUAL_VALUES: &str = "IW";
const GET_DEVICE_OPTIONS: &str = "OPT";
const REMOVE_TEST_RESULTS: &str = "DR";
const REMOVE_TEST_PROGRAMS: &str = "DP";
const BEEP: &str = "BP";
const VISUAL_PASS: &str = "VIS_1";
const VISUAL_FAIL: &str = "VIS_0";

/// Capacity of the event broadcast channel.
pub const EVENT_CAPACITY: usize = 256;

/// Link configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterOptions {
    /// Tester address, 1 to 255.
    pub address: u8,
    /// Minimum quiet time between a reply and the next request.
    pub request_delay: Duration,
    /// Deadline for a complete reply, counted from the write.
    pub response_timeout: Duration,
    /// Pause between step uploads in [`Glp2Master::set_test_program`].
    pub programming_delay: Duration,
}

impl Default for MasterOptions {
    fn default() -> Self {
        MasterOptions {
            address: 1,
            request_delay: Duration::from_millis(200),
            response_timeout: Duration::from_millis(1000),
            programming_delay: Duration::ZERO,
        }
    }
}

/// An open (or openable) link to a tester.
struct Session {
    io: MasterIo,
    address: u8,
    programming_delay: Duration,
}

/// Protocol driver for one GLP2 tester.
pub struct Glp2Master {
    options: Mutex<MasterOptions>,
    session: Mutex<Option<Session>>,
    event_tx: broadcast::Sender<Glp2Event>,
}

impl Glp2Master {
    /// Create a master with its own event channel.
    pub fn new(options: MasterOptions) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self::with_event_sender(options, event_tx)
    }

    /// Create a master publishing to an existing event channel.
    pub fn with_event_sender(options: MasterOptions, event_tx: broadcast::Sender<Glp2Event>) -> Self {
        Glp2Master {
            options: Mutex::new(options),
            session: Mutex::new(None),
            event_tx,
        }
    }

    /// Subscribe to link events (`Open`, `Close`, `Error`, `Tx`, `Rx`).
    pub fn subscribe(&self) -> broadcast::Receiver<Glp2Event> {
        self.event_tx.subscribe()
    }

    pub fn options(&self) -> MasterOptions {
        lock(&self.options).clone()
    }

    /// Replace the options used by the next [`open`](Self::open).
    pub fn set_options(&self, options: MasterOptions) {
        *lock(&self.options) = options;
    }

    /// Start talking to a tester over `transport`, closing any previous link.
    pub async fn open(&self, transport: Box<dyn Transport>) -> Result<()> {
        let options = self.options();
        if options.address == 0 {
            return Err(Error::InvalidParameters(
                "tester address must be within 1..=255".into(),
            ));
        }

        self.close().await;

        let _ = self.event_tx.send(Glp2Event::Open);
        let io = io::spawn_io_task(
            transport,
            IoConfig {
                request_delay: options.request_delay,
                response_timeout: options.response_timeout,
            },
            self.event_tx.clone(),
        );
        *lock(&self.session) = Some(Session {
            io,
            address: options.address,
            programming_delay: options.programming_delay,
        });
        info!(address = options.address, "Tester link opened");
        Ok(())
    }

    /// Close the link. Requests still queued or in flight fail with
    /// [`Error::NoConnection`]. Closing a closed master does nothing.
    pub async fn close(&self) {
        let session = lock(&self.session).take();
        if let Some(session) = session {
            session.io.shutdown().await;
            info!("Tester link closed");
        }
    }

    /// `true` while a link is open and its IO task is alive.
    pub fn is_open(&self) -> bool {
        lock(&self.session)
            .as_ref()
            .is_some_and(|s| s.io.is_running())
    }

    // ---------------------------------------------------------------
    // Operations
    // ---------------------------------------------------------------

    /// Push instrument parameters.
    pub async fn set_parameters(&self, params: &ParameterSet) -> Result<()> {
        if params.is_empty() {
            return Err(Error::InvalidParameters("no parameters to set".into()));
        }
        self.ack(&params.to_data_string()).await
    }

    /// Upload a test program: the program header, then every step.
    pub async fn set_test_program(&self, program: &TestProgram) -> Result<()> {
        let (handle, address, delay) = self.session()?;
        debug!(name = program.name(), steps = program.steps().len(), "Uploading test program");

        ack_on(&handle, address, &program.header_data_string()).await?;
        for step in program.steps() {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            ack_on(&handle, address, &step.to_data_string()).await?;
        }
        Ok(())
    }

    pub async fn start_test(&self) -> Result<()> {
        self.ack(START_TEST).await
    }

    pub async fn cancel_test(&self) -> Result<()> {
        self.ack(CANCEL_TEST).await
    }

    /// Fetch the pending actual values. `None` when the tester has nothing
    /// to report.
    pub async fn get_actual_values(&self) -> Result<Option<Response>> {
        match self.request(GET_ACTUAL_VALUES, ReplyKind::ActualValues).await? {
            Reply::Values(values) => Ok(values),
            Reply::Ack => Err(Error::InvalidResponse("expected actual values, got ACK".into())),
        }
    }

    pub async fn get_device_options(&self) -> Result<DeviceOptionsResponse> {
        match self.request(GET_DEVICE_OPTIONS, ReplyKind::DeviceOptions).await? {
            Reply::Values(Some(Response::DeviceOptions(options))) => Ok(options),
            other => Err(Error::InvalidResponse(format!(
                "expected device options, got {other:?}"
            ))),
        }
    }

    /// Answer a pending visual inspection step.
    pub async fn ack_visual_test(&self, pass: bool) -> Result<()> {
        self.ack(if pass { VISUAL_PASS } else { VISUAL_FAIL }).await
    }

    /// Delete the stored test results.
    pub async fn remove_test_results(&self) -> Result<()> {
        self.ack(REMOVE_TEST_RESULTS).await
    }

    /// Delete the stored test programs.
    pub async fn remove_test_programs(&self) -> Result<()> {
        self.ack(REMOVE_TEST_PROGRAMS).await
    }

    pub async fn beep(&self) -> Result<()> {
        self.ack(BEEP).await
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn session(&self) -> Result<(IoHandle, u8, Duration)> {
        let guard = lock(&self.session);
        let session = guard.as_ref().ok_or(Error::NoConnection)?;
        Ok((
            session.io.handle(),
            session.address,
            session.programming_delay,
        ))
    }

    async fn request(&self, text: &str, kind: ReplyKind) -> Result<Reply> {
        let (handle, address, _) = self.session()?;
        handle.request(frame_data_string(address, text), kind).await
    }

    async fn ack(&self, text: &str) -> Result<()> {
        let (handle, address, _) = self.session()?;
        ack_on(&handle, address, text).await
    }
}

async fn ack_on(handle: &IoHandle, address: u8, text: &str) -> Result<()> {
    match handle.request(frame_data_string(address, text), ReplyKind::Ack).await? {
        Reply::Ack => Ok(()),
        Reply::Values(_) => Err(Error::InvalidResponse(format!("expected ACK for {text}"))),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
