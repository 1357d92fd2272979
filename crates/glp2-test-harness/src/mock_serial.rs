//! Mock transport for deterministic testing of the GLP2 master.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! request/response pairs. Each expectation may carry a reply latency, or no
//! reply at all, so timeout and ordering behaviour can be tested under
//! tokio's paused clock.
//!
//! The transport is cheaply cloneable: every clone shares the same state, so
//! a test can keep one clone for inspection after handing another to the
//! master's IO task.
//!
//! # Example
//!
//! ```
//! use glp2_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! // When this request is sent, answer with ACK.
//! mock.expect(&[0x02, 0x81, 0x20, b'T', b'S', b' ', b'8', b'4', 0x03], &[0x06]);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use glp2_core::error::{Error, Result};
use glp2_core::transport::Transport;
use tokio::time::Instant;

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes to return, or `None` to stay silent.
    response: Option<Vec<u8>>,
    /// How long after the request the reply becomes readable.
    delay: Duration,
}

/// A reply that has been triggered by a send but not fully read yet.
#[derive(Debug)]
struct PendingReply {
    data: Vec<u8>,
    cursor: usize,
    ready_at: Instant,
}

#[derive(Debug)]
struct MockState {
    expectations: VecDeque<Expectation>,
    /// Persistent replies used when the head expectation does not match.
    rules: Vec<(Vec<u8>, Vec<u8>)>,
    pending: Option<PendingReply>,
    connected: bool,
    /// When set, the next `send` or `receive` reports a lost connection.
    fail_next: bool,
    chunk_size: usize,
    sent_log: Vec<Vec<u8>>,
    /// Sends observed while a previous reply was still unread.
    overlapping_sends: usize,
}

/// A mock [`Transport`] for testing without hardware.
///
/// Expectations are consumed in order. When `send()` is called, the sent
/// data is recorded and matched against the next expectation; the
/// corresponding response becomes readable after its delay. If the head
/// expectation does not match, persistent rules added with
/// [`MockTransport::rule`] are consulted.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            state: Arc::new(Mutex::new(MockState {
                expectations: VecDeque::new(),
                rules: Vec::new(),
                pending: None,
                connected: true,
                fail_next: false,
                chunk_size: usize::MAX,
                sent_log: Vec::new(),
                overlapping_sends: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panic in another test thread must not cascade into this one.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an expected request with an immediate response.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.expect_delayed(request, response, Duration::ZERO);
    }

    /// Add an expected request whose response arrives after `delay`.
    pub fn expect_delayed(&self, request: &[u8], response: &[u8], delay: Duration) {
        self.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            response: Some(response.to_vec()),
            delay,
        });
    }

    /// Add an expected request that never gets a reply.
    pub fn expect_silence(&self, request: &[u8]) {
        self.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            response: None,
            delay: Duration::ZERO,
        });
    }

    /// Answer `request` with `response` every time it is sent and no
    /// ordered expectation matches.
    pub fn rule(&self, request: &[u8], response: &[u8]) {
        self.lock().rules.push((request.to_vec(), response.to_vec()));
    }

    /// Deliver replies in chunks of at most `size` bytes per `receive()`.
    pub fn set_chunk_size(&self, size: usize) {
        self.lock().chunk_size = size.max(1);
    }

    /// Return a copy of all data sent through this transport.
    ///
    /// Each element is the byte slice from one `send()` call.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.lock().sent_log.clone()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.lock().expectations.len()
    }

    /// Number of sends that happened while an earlier reply was unread.
    pub fn overlapping_sends(&self) -> usize {
        self.lock().overlapping_sends
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NoConnection`].
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    /// Make the next `send()` or `receive()` fail with
    /// [`Error::ConnectionLost`], as if the cable had been pulled.
    pub fn unplug(&self) {
        let mut state = self.lock();
        state.fail_next = true;
        state.connected = false;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if state.fail_next {
            state.fail_next = false;
            return Err(Error::ConnectionLost);
        }
        if !state.connected {
            return Err(Error::NoConnection);
        }

        state.sent_log.push(data.to_vec());
        if state.pending.is_some() {
            state.overlapping_sends += 1;
        }

        let head_matches = state
            .expectations
            .front()
            .is_some_and(|e| e.request.as_slice() == data);
        let matched = if head_matches {
            state.expectations.pop_front()
        } else {
            None
        };

        let (response, delay) = if let Some(expectation) = matched {
            (expectation.response, expectation.delay)
        } else if let Some((_, response)) = state.rules.iter().find(|(req, _)| req == data) {
            (Some(response.clone()), Duration::ZERO)
        } else if let Some(expectation) = state.expectations.front() {
            return Err(Error::Transport(format!(
                "unexpected send data: expected {:02X?}, got {:02X?}",
                expectation.request, data
            )));
        } else {
            return Err(Error::Transport(format!(
                "no more expectations in mock transport (got {:02X?})",
                data
            )));
        };

        state.pending = response.map(|data| PendingReply {
            data,
            cursor: 0,
            ready_at: Instant::now() + delay,
        });
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;

        let ready_at = {
            let mut state = self.lock();
            if state.fail_next {
                state.fail_next = false;
                return Err(Error::ConnectionLost);
            }
            if !state.connected {
                return Err(Error::NoConnection);
            }
            state.pending.as_ref().map(|p| p.ready_at)
        };

        match ready_at {
            Some(at) if at <= deadline => tokio::time::sleep_until(at).await,
            _ => {
                tokio::time::sleep_until(deadline).await;
                return Err(Error::ResponseTimeout);
            }
        }

        let mut state = self.lock();
        let chunk_size = state.chunk_size;
        let Some(pending) = state.pending.as_mut() else {
            return Err(Error::ResponseTimeout);
        };
        let remaining = &pending.data[pending.cursor..];
        let n = remaining.len().min(buf.len()).min(chunk_size);
        buf[..n].copy_from_slice(&remaining[..n]);
        pending.cursor += n;
        if pending.cursor >= pending.data.len() {
            state.pending = None;
        }
        Ok(n)
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.connected = false;
        state.pending = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }
}
