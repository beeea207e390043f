//! Writer loop - turns queued requests into frames on the wire.
//!
//! ```text
//! send_request ─┐
//! send_request ─┼─► mpsc::Sender<OutboundRequest> ─► Writer Task ─► ConnectionSlot
//! call ─────────┘                                      │
//!                                                      └─► CorrelationStore (register)
//! ```
//!
//! The writer is the only consumer of the queue and the only owner of the
//! request id sequence, so ids need no synchronization. Each request is
//! registered in the correlation store before its frame is written, so a
//! response that arrives immediately always finds its call.
//!
//! Write failures get exactly one reconnect-and-retry. A request whose retry
//! also fails is dropped; its pending call expires through the store's TTL.
//! A write that stalls for longer than the write timeout counts as a failure.
//!
//! Closing the queue (client shutdown) lets the writer drain what is already
//! queued before it exits and stops the session. The stop signal (a failed
//! reconnect in the reader) ends the loop at once, even mid-write, and the
//! rest of the queue is discarded.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::callback::ResponseHandler;
use crate::connection::ConnectionSlot;
use crate::correlation::{PendingCall, SharedStore};
use crate::error::Result;
use crate::protocol::{encode_frame, Envelope};
use crate::shutdown::StopSignal;

/// Default capacity of the outbound request queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default time a single frame write may take.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Deferred payload serialization, run by the writer loop.
pub type EncodeFn = Box<dyn FnOnce() -> Result<Vec<u8>> + Send>;

/// A request waiting in the outbound queue.
pub struct OutboundRequest {
    /// Remote method name.
    pub method: String,
    /// Serializes the request message with the client's codec.
    pub encode: EncodeFn,
    /// Callback expecting the decoded response.
    pub handler: Box<dyn ResponseHandler>,
}

impl std::fmt::Debug for OutboundRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundRequest")
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Request id sequence: 1, 2, ..., i32::MAX, 1, ... (0 is never used).
#[derive(Debug)]
pub struct RequestIds {
    next: i32,
}

impl RequestIds {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    #[cfg(test)]
    fn starting_at(next: i32) -> Self {
        Self { next }
    }

    /// Take the next id.
    #[inline]
    pub fn next_id(&mut self) -> i32 {
        let id = self.next;
        self.next = if id == i32::MAX { 1 } else { id + 1 };
        id
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    Sent,
    Dropped,
}

/// Writer loop state.
pub(crate) struct Writer {
    queue: mpsc::Receiver<OutboundRequest>,
    connection: Arc<ConnectionSlot>,
    pending: SharedStore,
    stop: StopSignal,
    ids: RequestIds,
    write_timeout: Duration,
}

impl Writer {
    pub(crate) fn new(
        queue: mpsc::Receiver<OutboundRequest>,
        connection: Arc<ConnectionSlot>,
        pending: SharedStore,
        stop: StopSignal,
    ) -> Self {
        Self {
            queue,
            connection,
            pending,
            stop,
            ids: RequestIds::new(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub(crate) fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Run until the queue is closed and drained, or the session stops.
    pub(crate) async fn run(mut self) {
        let mut stop_rx = self.stop.subscribe();

        loop {
            let request = tokio::select! {
                biased;
                _ = StopSignal::stopped(&mut stop_rx) => break,
                next = self.queue.recv() => match next {
                    Some(request) => request,
                    None => {
                        tracing::debug!("Request queue closed and drained");
                        break;
                    }
                },
            };

            tokio::select! {
                biased;
                _ = StopSignal::stopped(&mut stop_rx) => {
                    tracing::debug!("Stopped while writing a request");
                    break;
                }
                _ = self.process(request) => {}
            }
        }

        // Close the queue so `send_request` sees the session is gone, and
        // stop the reader once nothing is left to write.
        self.queue.close();
        self.stop.trigger();
        let mut discarded = 0usize;
        while self.queue.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(discarded, "Discarded queued requests at shutdown");
        }
        tracing::debug!("Writer loop stopped");
    }

    /// Register, encode and write a single request.
    pub(crate) async fn process(&mut self, request: OutboundRequest) -> WriteOutcome {
        let OutboundRequest {
            method,
            encode,
            handler,
        } = request;
        let id = self.ids.next_id();

        let registered = self.pending.lock().insert(PendingCall {
            id,
            method: method.clone(),
            handler,
        });

        let frame = match encode()
            .and_then(|payload| encode_frame(&Envelope::request(id, method.as_str(), payload)))
        {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(id, method = %method, "Failed to encode request: {}", e);
                // On a collision the entry belongs to the earlier call.
                if registered {
                    self.pending.lock().take(id);
                }
                return WriteOutcome::Dropped;
            }
        };

        tracing::trace!(id, method = %method, bytes = frame.len(), "Sending request");

        if let Err(fault) = self.connection.send(&frame, self.write_timeout).await {
            tracing::warn!(
                id,
                method = %method,
                generation = fault.generation,
                "Write failed, reconnecting: {}",
                fault.error
            );

            if let Err(e) = self.connection.reconnect(fault.generation).await {
                tracing::error!(id, method = %method, "Dropping request: {}", e);
                return WriteOutcome::Dropped;
            }

            if let Err(fault) = self.connection.send(&frame, self.write_timeout).await {
                tracing::error!(
                    id,
                    method = %method,
                    "Dropping request after retry: {}",
                    fault.error
                );
                return WriteOutcome::Dropped;
            }
        }

        self.connection.flush().await;
        WriteOutcome::Sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::TypedCallback;
    use crate::codec::{Codec, MsgPackCodec};
    use crate::connection::test_support::{dead_stream, ScriptedConnector};
    use crate::correlation::{CorrelationStore, DEFAULT_PENDING_TTL};
    use crate::protocol::{read_frame, EnvelopeType};
    use crate::transport::Connector;
    use crate::RpcError;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    fn request(method: &str, value: u32) -> OutboundRequest {
        OutboundRequest {
            method: method.to_string(),
            encode: Box::new(move || MsgPackCodec::encode(&value)),
            handler: Box::new(TypedCallback::<MsgPackCodec, _, _, _>::new(
                |_: u32| async {},
            )),
        }
    }

    fn bulk_request(len: usize) -> OutboundRequest {
        OutboundRequest {
            method: "UpdateDmxData".to_string(),
            encode: Box::new(move || Ok(vec![0xFF; len])),
            handler: Box::new(TypedCallback::<MsgPackCodec, _, _, _>::new(
                |_: u32| async {},
            )),
        }
    }

    async fn writer_with(
        connector: Arc<dyn Connector>,
    ) -> (Writer, mpsc::Sender<OutboundRequest>, SharedStore) {
        let connection = Arc::new(ConnectionSlot::new(connector));
        connection.reconnect(0).await.ok();
        let pending = CorrelationStore::shared(DEFAULT_PENDING_TTL);
        let (tx, rx) = mpsc::channel(16);
        let writer = Writer::new(rx, connection, pending.clone(), StopSignal::new());
        (writer, tx, pending)
    }

    #[test]
    fn test_ids_start_at_one() {
        let mut ids = RequestIds::new();
        let taken: Vec<i32> = (0..5).map(|_| ids.next_id()).collect();
        assert_eq!(taken, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_ids_wrap_to_one() {
        let mut ids = RequestIds::starting_at(i32::MAX - 1);
        assert_eq!(ids.next_id(), i32::MAX - 1);
        assert_eq!(ids.next_id(), i32::MAX);
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }

    #[tokio::test]
    async fn test_frames_carry_sequential_ids() {
        let (client, mut server): (DuplexStream, DuplexStream) = tokio::io::duplex(4096);
        let (mut writer, _tx, pending) =
            writer_with(ScriptedConnector::new(vec![Some(client)])).await;

        for value in 0..3u32 {
            let outcome = writer.process(request("SetDmx", value)).await;
            assert_eq!(outcome, WriteOutcome::Sent);
        }

        for expected_id in 1..=3 {
            let envelope = read_frame(&mut server).await.unwrap();
            assert_eq!(envelope.kind, EnvelopeType::Request);
            assert_eq!(envelope.id, expected_id);
            assert_eq!(envelope.name, "SetDmx");
            let value: u32 = MsgPackCodec::decode(&envelope.buffer).unwrap();
            assert_eq!(value as i32, expected_id - 1);
        }
        assert_eq!(pending.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_write_failure_reconnects_once_and_retries() {
        let (client, mut server) = tokio::io::duplex(4096);
        let connector = ScriptedConnector::new(vec![Some(dead_stream()), Some(client)]);
        let (mut writer, _tx, _pending) = writer_with(connector.clone()).await;
        assert_eq!(connector.attempts(), 1);

        let outcome = writer.process(request("SetDmx", 9)).await;
        assert_eq!(outcome, WriteOutcome::Sent);
        assert_eq!(connector.attempts(), 2);

        // The retried bytes arrive on the new connection.
        let envelope = read_frame(&mut server).await.unwrap();
        assert_eq!(envelope.id, 1);
    }

    #[tokio::test]
    async fn test_failed_retry_drops_request() {
        let connector = ScriptedConnector::new(vec![Some(dead_stream()), Some(dead_stream())]);
        let (mut writer, _tx, pending) = writer_with(connector.clone()).await;

        let outcome = writer.process(request("SetDmx", 1)).await;
        assert_eq!(outcome, WriteOutcome::Dropped);
        assert_eq!(connector.attempts(), 2);

        // The call stays registered until its TTL runs out.
        assert_eq!(pending.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_reconnect_drops_request_and_writer_survives() {
        let (client, mut server) = tokio::io::duplex(4096);
        let connector = ScriptedConnector::new(vec![Some(dead_stream()), None, Some(client)]);
        let (mut writer, _tx, _pending) = writer_with(connector.clone()).await;

        assert_eq!(
            writer.process(request("SetDmx", 1)).await,
            WriteOutcome::Dropped
        );
        assert_eq!(connector.attempts(), 2);

        // Next request: no connection, one reconnect succeeds.
        assert_eq!(writer.process(request("SetDmx", 2)).await, WriteOutcome::Sent);
        assert_eq!(connector.attempts(), 3);

        let envelope = read_frame(&mut server).await.unwrap();
        assert_eq!(envelope.id, 2);
    }

    #[tokio::test]
    async fn test_encode_failure_unregisters_call() {
        let (client, _server) = tokio::io::duplex(4096);
        let (mut writer, _tx, pending) =
            writer_with(ScriptedConnector::new(vec![Some(client)])).await;

        let bad = OutboundRequest {
            method: "SetDmx".to_string(),
            encode: Box::new(|| {
                Err(RpcError::MalformedEnvelope("unencodable".to_string()))
            }),
            handler: Box::new(TypedCallback::<MsgPackCodec, _, _, _>::new(|_: u32| async {})),
        };

        assert_eq!(writer.process(bad).await, WriteOutcome::Dropped);
        assert!(pending.lock().is_empty());
    }

    #[tokio::test]
    async fn test_encode_failure_on_colliding_id_keeps_original_call() {
        let (client, _server) = tokio::io::duplex(4096);
        let (mut writer, _tx, pending) =
            writer_with(ScriptedConnector::new(vec![Some(client)])).await;

        // A call from before the id wrapped around is still waiting on id 1.
        pending.lock().insert(PendingCall {
            id: 1,
            method: "GetPlugins".to_string(),
            handler: Box::new(TypedCallback::<MsgPackCodec, _, _, _>::new(|_: u32| async {})),
        });

        let bad = OutboundRequest {
            method: "SetDmx".to_string(),
            encode: Box::new(|| Err(RpcError::MalformedEnvelope("unencodable".to_string()))),
            handler: Box::new(TypedCallback::<MsgPackCodec, _, _, _>::new(|_: u32| async {})),
        };
        assert_eq!(writer.process(bad).await, WriteOutcome::Dropped);

        let original = pending.lock().take(1).unwrap();
        assert_eq!(original.method, "GetPlugins");
    }

    #[tokio::test]
    async fn test_run_exits_when_queue_closes() {
        let (client, mut server) = tokio::io::duplex(4096);
        let (writer, tx, _pending) =
            writer_with(ScriptedConnector::new(vec![Some(client)])).await;
        let task = tokio::spawn(writer.run());

        tx.send(request("GetPlugins", 0)).await.unwrap();
        let envelope = read_frame(&mut server).await.unwrap();
        assert_eq!(envelope.name, "GetPlugins");

        drop(tx);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_queued_requests_drained_after_close() {
        let (client, mut server) = tokio::io::duplex(4096);
        let connection = Arc::new(ConnectionSlot::new(ScriptedConnector::new(vec![Some(client)])));
        connection.reconnect(0).await.unwrap();
        let stop = StopSignal::new();
        let (tx, rx) = mpsc::channel(16);
        let writer = Writer::new(
            rx,
            connection,
            CorrelationStore::shared(DEFAULT_PENDING_TTL),
            stop.clone(),
        );

        for value in 0..3 {
            tx.send(request("UpdateDmxData", value)).await.unwrap();
        }
        drop(tx);
        writer.run().await;

        for expected_id in 1..=3 {
            assert_eq!(read_frame(&mut server).await.unwrap().id, expected_id);
        }
        // Nothing left to write, so the session is over.
        assert!(stop.is_triggered());
    }

    #[tokio::test]
    async fn test_stop_interrupts_stalled_write() {
        // Peer stays open but never reads.
        let (client, _server) = tokio::io::duplex(64);
        let connection = Arc::new(ConnectionSlot::new(ScriptedConnector::new(vec![Some(client)])));
        connection.reconnect(0).await.unwrap();
        let stop = StopSignal::new();
        let (tx, rx) = mpsc::channel(16);
        let writer = Writer::new(
            rx,
            connection.clone(),
            CorrelationStore::shared(DEFAULT_PENDING_TTL),
            stop.clone(),
        );
        let task = tokio::spawn(writer.run());

        tx.send(bulk_request(4096)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        stop.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        // The slot is free again, so the reader can close the connection.
        tokio::time::timeout(Duration::from_secs(1), connection.disconnect())
            .await
            .unwrap();
        assert!(!connection.is_connected().await);
    }

    #[tokio::test]
    async fn test_stalled_write_times_out_and_retries_on_new_connection() {
        let (stalled, _stalled_peer) = tokio::io::duplex(64);
        let (client, mut server) = tokio::io::duplex(8192);
        let connector = ScriptedConnector::new(vec![Some(stalled), Some(client)]);
        let (writer, _tx, _pending) = writer_with(connector.clone()).await;
        let mut writer = writer.with_write_timeout(Duration::from_millis(50));

        assert_eq!(writer.process(bulk_request(4096)).await, WriteOutcome::Sent);
        assert_eq!(connector.attempts(), 2);

        let envelope = read_frame(&mut server).await.unwrap();
        assert_eq!(envelope.id, 1);
        assert_eq!(envelope.buffer.len(), 4096);
    }

    #[tokio::test]
    async fn test_run_exits_on_stop_and_closes_queue() {
        let (client, _server) = tokio::io::duplex(4096);
        let connection = Arc::new(ConnectionSlot::new(ScriptedConnector::new(vec![Some(client)])));
        let stop = StopSignal::new();
        let (tx, rx) = mpsc::channel(16);
        let writer = Writer::new(
            rx,
            connection,
            CorrelationStore::shared(DEFAULT_PENDING_TTL),
            stop.clone(),
        );
        let task = tokio::spawn(writer.run());

        stop.trigger();
        task.await.unwrap();
        assert!(tx.is_closed());
    }
}
