//! IO task of the GLP2 master.
//!
//! One spawned task owns the transport. Requests arrive over an mpsc
//! channel and are executed strictly one at a time in arrival order, so at
//! most one request is ever on the wire. Each request carries a oneshot
//! sender and resolves exactly once: with the decoded reply, a protocol
//! error, [`Error::ResponseTimeout`], or [`Error::NoConnection`] when the
//! link goes away while it is queued or in flight.
//!
//! Timing rules enforced here:
//!
//! - a request is written no earlier than `request_delay` after the
//!   previous reply (or timeout),
//! - the response deadline starts when the request is written,
//! - bytes arriving after a timeout belong to no one; they are read and
//!   dropped before the next request is written,
//! - a stray ACK in front of an expected frame is skipped.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use glp2_core::error::{Error, Result};
use glp2_core::events::Glp2Event;
use glp2_core::transport::Transport;

use crate::frame::{self, ACK, BEL, NAK, Scan};
use crate::response::Response;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Timing configuration for the IO task.
pub(crate) struct IoConfig {
    /// Minimum quiet time between a reply and the next request.
    pub request_delay: Duration,
    /// How long to wait for a complete reply after writing a request.
    pub response_timeout: Duration,
}

/// Which decoder completes a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyKind {
    /// A single ACK byte.
    Ack,
    /// An actual-values frame, or NAK when nothing is pending.
    ActualValues,
    /// A device-options frame.
    DeviceOptions,
}

/// A decoded reply.
#[derive(Debug)]
pub(crate) enum Reply {
    Ack,
    Values(Option<Response>),
}

/// A framed request waiting for the IO task.
pub(crate) struct Request {
    pub frame: Vec<u8>,
    pub kind: ReplyKind,
    pub reply: oneshot::Sender<Result<Reply>>,
}

/// Cloneable sending side of the request queue.
#[derive(Clone)]
pub(crate) struct IoHandle {
    cmd_tx: mpsc::Sender<Request>,
}

impl IoHandle {
    /// Queue a framed request and wait for its outcome.
    pub async fn request(&self, frame: Vec<u8>, kind: ReplyKind) -> Result<Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Request {
                frame,
                kind,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::NoConnection)?;

        // The IO task resolves every request it accepted, so a dropped
        // sender only happens when the task itself is gone.
        reply_rx.await.unwrap_or(Err(Error::NoConnection))
    }
}

/// Handle to a running IO task.
pub(crate) struct MasterIo {
    cmd_tx: mpsc::Sender<Request>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MasterIo {
    pub fn handle(&self) -> IoHandle {
        IoHandle {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// `false` once the task is shutting down (closed or connection lost).
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    /// Stop the task. Queued and in-flight requests fail with
    /// [`Error::NoConnection`]; the transport is closed before this returns.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "IO task ended abnormally");
        }
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

/// Capacity of the request queue.
const QUEUE_CAPACITY: usize = 64;

/// Upper bound on reads spent discarding stale bytes before one request.
const MAX_STALE_READS: usize = 16;

/// Spawn the IO task on `transport`.
pub(crate) fn spawn_io_task(
    transport: Box<dyn Transport>,
    config: IoConfig,
    event_tx: broadcast::Sender<Glp2Event>,
) -> MasterIo {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Request>(QUEUE_CAPACITY);
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    let task = tokio::spawn(io_loop(transport, config, event_tx, cmd_rx, cancel_clone));

    MasterIo {
        cmd_tx,
        cancel,
        task,
    }
}

// ---------------------------------------------------------------------------
// IO loop
// ---------------------------------------------------------------------------

async fn io_loop(
    mut transport: Box<dyn Transport>,
    config: IoConfig,
    event_tx: broadcast::Sender<Glp2Event>,
    mut cmd_rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) {
    let mut last_reply: Option<Instant> = None;

    loop {
        let request = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("IO task cancelled");
                break;
            }

            request = cmd_rx.recv() => match request {
                Some(request) => request,
                None => {
                    debug!("all request senders dropped, exiting IO task");
                    break;
                }
            },
        };
        let Request { frame, kind, reply } = request;

        if let Some(last) = last_reply {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    let _ = reply.send(Err(Error::NoConnection));
                    break;
                }

                _ = tokio::time::sleep_until(last + config.request_delay) => {}
            }
        }

        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("IO task cancelled with a request in flight");
                let _ = reply.send(Err(Error::NoConnection));
                break;
            }

            result = execute(&mut *transport, &frame, kind, &config, &event_tx) => result,
        };
        last_reply = Some(Instant::now());

        match result {
            Err(e) if e.is_connection_failure() => {
                warn!(error = %e, "Connection to tester lost");
                let _ = event_tx.send(Glp2Event::Error(e.to_string()));
                let _ = reply.send(Err(Error::NoConnection));
                break;
            }
            result => {
                if let Err(e) = &result {
                    debug!(error = %e, request = %frame::pretty(&frame), "Request failed");
                }
                let _ = reply.send(result);
            }
        }
    }

    // Marks the link as down before anyone hears about it.
    cancel.cancel();

    // Everything still queued fails, oldest first.
    cmd_rx.close();
    while let Ok(request) = cmd_rx.try_recv() {
        let _ = request.reply.send(Err(Error::NoConnection));
    }

    if let Err(e) = transport.close().await {
        debug!(error = %e, "Closing transport failed");
    }
    let _ = event_tx.send(Glp2Event::Close);
    debug!("IO task stopped");
}

// ---------------------------------------------------------------------------
// Request execution
// ---------------------------------------------------------------------------

/// Write one request and collect its reply.
async fn execute(
    transport: &mut dyn Transport,
    request: &[u8],
    kind: ReplyKind,
    config: &IoConfig,
    event_tx: &broadcast::Sender<Glp2Event>,
) -> Result<Reply> {
    discard_stale(transport, event_tx).await?;

    trace!(request = %frame::pretty(request), "Sending request");
    transport.send(request).await?;
    let _ = event_tx.send(Glp2Event::Tx(request.to_vec()));

    let deadline = Instant::now() + config.response_timeout;
    let mut rx_buf = Vec::new();
    let mut buf = [0u8; 256];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            if !rx_buf.is_empty() {
                debug!(stale = %frame::pretty(&rx_buf), "Discarding incomplete reply");
            }
            return Err(Error::ResponseTimeout);
        }

        match transport.receive(&mut buf, remaining).await {
            Ok(0) => {}
            Ok(n) => {
                let chunk = &buf[..n];
                let _ = event_tx.send(Glp2Event::Rx(chunk.to_vec()));
                rx_buf.extend_from_slice(chunk);
                if let Some(result) = decode_reply(kind, request, &mut rx_buf) {
                    trace!(reply = %frame::pretty(&rx_buf), "Reply complete");
                    return result;
                }
            }
            // The deadline check above decides; a transport may time out
            // early on its own schedule.
            Err(Error::ResponseTimeout) => {}
            Err(e) => return Err(e),
        }
    }
}

/// Read and drop whatever is already waiting on the link, such as a reply
/// that arrived after its request timed out.
async fn discard_stale(
    transport: &mut dyn Transport,
    event_tx: &broadcast::Sender<Glp2Event>,
) -> Result<()> {
    let mut stale = Vec::new();
    let mut buf = [0u8; 256];

    for _ in 0..MAX_STALE_READS {
        match transport.receive(&mut buf, Duration::ZERO).await {
            Ok(0) | Err(Error::ResponseTimeout) => break,
            Ok(n) => {
                let _ = event_tx.send(Glp2Event::Rx(buf[..n].to_vec()));
                stale.extend_from_slice(&buf[..n]);
            }
            Err(e) => return Err(e),
        }
    }

    if !stale.is_empty() {
        debug!(stale = %frame::pretty(&stale), "Discarding late reply");
    }
    Ok(())
}

/// Try to complete a request from the bytes received so far.
///
/// Returns `None` while more bytes are needed.
fn decode_reply(kind: ReplyKind, request: &[u8], rx_buf: &mut Vec<u8>) -> Option<Result<Reply>> {
    if kind == ReplyKind::Ack {
        let &first = rx_buf.first()?;
        return Some(match first {
            ACK => Ok(Reply::Ack),
            NAK => Err(rejected(request)),
            BEL => Err(Error::BusyTester),
            _ => Err(Error::InvalidResponse(format!(
                "expected ACK, got {}",
                frame::pretty(rx_buf)
            ))),
        });
    }

    loop {
        match frame::scan(rx_buf) {
            Scan::Incomplete => return None,
            Scan::Noise(n) => {
                trace!(noise = %frame::pretty(&rx_buf[..n]), "Skipping bytes before reply");
                rx_buf.drain(..n);
            }
            // Frame requests are never answered with ACK, so this one
            // belongs to an earlier request.
            Scan::Control(ACK) => {
                trace!("Skipping stale ACK before reply");
                rx_buf.drain(..1);
            }
            Scan::Control(byte) => {
                return Some(match (kind, byte) {
                    (_, BEL) => Err(Error::BusyTester),
                    (ReplyKind::ActualValues, NAK) => Ok(Reply::Values(None)),
                    (_, NAK) => Err(rejected(request)),
                    (_, other) => Err(Error::InvalidResponse(format!(
                        "expected a frame, got {}",
                        frame::pretty(&[other])
                    ))),
                });
            }
            Scan::Frame => {
                return Some(Response::decode_frame(rx_buf).map(|r| Reply::Values(Some(r))));
            }
        }
    }
}

/// The tester answered NAK: it could not verify our checksum.
fn rejected(request: &[u8]) -> Error {
    let body = request.len().saturating_sub(3);
    Error::InvalidChecksum {
        expected: String::from_utf8_lossy(&frame::checksum(&request[..body])).into_owned(),
        received: "NAK".to_string(),
        frame: frame::pretty(request),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{DATA_MARKER, frame_data_string};
    use glp2_test_harness::MockTransport;

    fn test_config() -> IoConfig {
        IoConfig {
            request_delay: Duration::from_millis(200),
            response_timeout: Duration::from_millis(1000),
        }
    }

    fn reply_frame(text: &str) -> Vec<u8> {
        frame::frame(1, DATA_MARKER, text.as_bytes())
    }

    // ---------------------------------------------------------------
    // Decoders
    // ---------------------------------------------------------------

    #[test]
    fn ack_decoder() {
        let request = frame_data_string(1, "TS");
        assert!(decode_reply(ReplyKind::Ack, &request, &mut vec![]).is_none());
        assert!(matches!(
            decode_reply(ReplyKind::Ack, &request, &mut vec![ACK]),
            Some(Ok(Reply::Ack))
        ));
        assert!(matches!(
            decode_reply(ReplyKind::Ack, &request, &mut vec![BEL]),
            Some(Err(Error::BusyTester))
        ));
        assert!(matches!(
            decode_reply(ReplyKind::Ack, &request, &mut vec![b'?']),
            Some(Err(Error::InvalidResponse(_)))
        ));
        match decode_reply(ReplyKind::Ack, &request, &mut vec![NAK]) {
            Some(Err(Error::InvalidChecksum { expected, received, .. })) => {
                assert_eq!(expected, "84");
                assert_eq!(received, "NAK");
            }
            other => panic!("expected InvalidChecksum, got {other:?}"),
        }
    }

    #[test]
    fn actual_values_decoder_waits_for_etx() {
        let request = frame_data_string(1, "IW");
        let full = reply_frame("IST F_0 END ");

        let mut buf = full[..5].to_vec();
        assert!(decode_reply(ReplyKind::ActualValues, &request, &mut buf).is_none());

        let mut buf = full.clone();
        assert!(matches!(
            decode_reply(ReplyKind::ActualValues, &request, &mut buf),
            Some(Ok(Reply::Values(Some(Response::ActualValues(_)))))
        ));

        assert!(matches!(
            decode_reply(ReplyKind::ActualValues, &request, &mut vec![NAK]),
            Some(Ok(Reply::Values(None)))
        ));
    }

    #[test]
    fn frame_decoder_skips_noise_and_checks_checksum() {
        let request = frame_data_string(1, "OPT");
        let mut buf = vec![0x00, 0xFF];
        buf.extend_from_slice(&reply_frame("OPT PE ISO "));
        assert!(matches!(
            decode_reply(ReplyKind::DeviceOptions, &request, &mut buf),
            Some(Ok(Reply::Values(Some(Response::DeviceOptions(_)))))
        ));

        let mut corrupted = reply_frame("OPT PE ISO ");
        corrupted[5] ^= 0x20;
        assert!(matches!(
            decode_reply(ReplyKind::DeviceOptions, &request, &mut corrupted),
            Some(Err(Error::InvalidChecksum { .. }))
        ));

        assert!(matches!(
            decode_reply(ReplyKind::DeviceOptions, &request, &mut vec![NAK]),
            Some(Err(Error::InvalidChecksum { .. }))
        ));
    }

    #[test]
    fn frame_decoder_skips_stale_ack() {
        let request = frame_data_string(1, "IW");
        assert!(matches!(
            decode_reply(ReplyKind::ActualValues, &request, &mut vec![ACK, NAK]),
            Some(Ok(Reply::Values(None)))
        ));

        let mut buf = vec![ACK];
        assert!(decode_reply(ReplyKind::ActualValues, &request, &mut buf).is_none());
        assert!(buf.is_empty());

        let mut buf = vec![ACK];
        buf.extend_from_slice(&reply_frame("OPT PE "));
        assert!(matches!(
            decode_reply(ReplyKind::DeviceOptions, &request, &mut buf),
            Some(Ok(Reply::Values(Some(Response::DeviceOptions(_)))))
        ));
    }

    // ---------------------------------------------------------------
    // IO task
    // ---------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn reply_split_across_chunks() {
        let mock = MockTransport::new();
        mock.set_chunk_size(3);
        let request = frame_data_string(1, "IW");
        mock.expect(&request, &reply_frame("IST 001 PE 10.0 9.8 IO 500 A END "));

        let (event_tx, _) = broadcast::channel(64);
        let io = spawn_io_task(Box::new(mock), test_config(), event_tx);

        let reply = io.handle().request(request, ReplyKind::ActualValues).await.unwrap();
        match reply {
            Reply::Values(Some(Response::ActualValues(values))) => {
                assert!(values.completed);
                assert_eq!(values.results.len(), 1);
            }
            other => panic!("unexpected reply {other:?}"),
        }

        io.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn tx_and_rx_events_carry_raw_bytes() {
        let mock = MockTransport::new();
        let request = frame_data_string(1, "BP");
        mock.expect(&request, &[ACK]);

        let (event_tx, mut event_rx) = broadcast::channel(64);
        let io = spawn_io_task(Box::new(mock), test_config(), event_tx);
        io.handle().request(request.clone(), ReplyKind::Ack).await.unwrap();

        assert_eq!(event_rx.recv().await.unwrap(), Glp2Event::Tx(request));
        assert_eq!(event_rx.recv().await.unwrap(), Glp2Event::Rx(vec![ACK]));

        io.shutdown().await;
        assert_eq!(event_rx.recv().await.unwrap(), Glp2Event::Close);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_loss_closes_the_task() {
        let mock = MockTransport::new();
        mock.unplug();

        let (event_tx, mut event_rx) = broadcast::channel(64);
        let io = spawn_io_task(Box::new(mock), test_config(), event_tx);
        let handle = io.handle();

        let result = handle.request(frame_data_string(1, "TS"), ReplyKind::Ack).await;
        assert!(matches!(result, Err(Error::NoConnection)));

        assert!(matches!(event_rx.recv().await.unwrap(), Glp2Event::Error(_)));
        assert_eq!(event_rx.recv().await.unwrap(), Glp2Event::Close);

        let after = handle.request(frame_data_string(1, "TS"), ReplyKind::Ack).await;
        assert!(matches!(after, Err(Error::NoConnection)));
    }

    #[tokio::test]
    async fn handle_without_task_reports_no_connection() {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        drop(cmd_rx);
        let handle = IoHandle { cmd_tx };
        let result = handle.request(vec![ACK], ReplyKind::Ack).await;
        assert!(matches!(result, Err(Error::NoConnection)));
    }
}
