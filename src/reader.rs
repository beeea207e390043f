//! Reader loop - reads frames and routes responses to their callbacks.
//!
//! ```text
//! ConnectionSlot ─► read_frame ─► Envelope ─┬─ RESPONSE ─► CorrelationStore.take ─► callback task
//!                                           ├─ RESPONSE_FAILED/CANCEL/... ─► drop pending call
//!                                           └─ anything else ─► log and ignore
//! ```
//!
//! A read or parse failure gets one reconnect. If that reconnect fails the
//! session is over: the loop triggers the stop signal (which also stops the
//! writer and closes the request queue) and exits.
//!
//! Callbacks never run on this task. Each one is spawned and waits for a
//! permit from a shared semaphore, which bounds how many callbacks run at once.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;

use crate::connection::{AttachedReader, ConnectionSlot};
use crate::correlation::{PendingCall, SharedStore};
use crate::error::RpcError;
use crate::protocol::{read_frame, Envelope, EnvelopeType};
use crate::shutdown::StopSignal;

/// Default maximum number of callbacks running at the same time.
pub const DEFAULT_MAX_CONCURRENT_CALLBACKS: usize = 256;

/// Reader loop state.
pub(crate) struct Reader {
    connection: Arc<ConnectionSlot>,
    pending: SharedStore,
    callbacks: Arc<Semaphore>,
    stop: StopSignal,
}

impl Reader {
    pub(crate) fn new(
        connection: Arc<ConnectionSlot>,
        pending: SharedStore,
        callbacks: Arc<Semaphore>,
        stop: StopSignal,
    ) -> Self {
        Self {
            connection,
            pending,
            callbacks,
            stop,
        }
    }

    /// Connect, then read until stopped or a reconnect fails.
    pub(crate) async fn run(self) {
        let mut stop_rx = self.stop.subscribe();
        let mut generations = self.connection.subscribe();

        // Initial connect, unless the writer already connected for a request
        // queued right after start. A failure here shows up as a read failure
        // below and gets the usual single reconnect attempt.
        if let Err(e) = self.connection.connect_if_disconnected().await {
            tracing::warn!("Initial connect failed: {}", e);
        }

        let mut current: Option<AttachedReader> = None;

        loop {
            if self.stop.is_triggered() {
                break;
            }

            let latest = *generations.borrow_and_update();
            if current.as_ref().map(|c| c.generation) != Some(latest) {
                current = self.connection.take_reader().await;
            }

            let result = match current.as_mut() {
                Some(attached) => tokio::select! {
                    biased;
                    _ = StopSignal::stopped(&mut stop_rx) => break,
                    // Superseded by a reconnect from the writer.
                    _ = generations.changed() => continue,
                    frame = read_frame(&mut attached.reader) => frame,
                },
                None => Err(RpcError::NotConnected),
            };

            match result {
                Ok(envelope) => self.dispatch(envelope),
                Err(e) => {
                    if self.stop.is_triggered() {
                        break;
                    }
                    let seen = current.take().map_or(latest, |c| c.generation);
                    tracing::warn!(generation = seen, "Read failed, reconnecting: {}", e);

                    if let Err(e) = self.connection.reconnect(seen).await {
                        tracing::error!("Reconnect failed, stopping client: {}", e);
                        self.stop.trigger();
                        break;
                    }
                }
            }
        }

        drop(current);
        self.connection.disconnect().await;
        tracing::debug!("Reader loop stopped");
    }

    /// Route one envelope.
    pub(crate) fn dispatch(&self, envelope: Envelope) {
        let Envelope {
            kind,
            id,
            name,
            buffer,
        } = envelope;

        match kind {
            EnvelopeType::Response => {
                tracing::trace!(id, method = %name, bytes = buffer.len(), "Received response");
                let call = self.pending.lock().take(id);
                if let Some(call) = call {
                    self.deliver(call, buffer);
                }
            }
            kind if kind.is_failed_response() => {
                let call = self.pending.lock().take(id);
                if let Some(call) = call {
                    tracing::warn!(
                        id,
                        method = %call.method,
                        kind = ?kind,
                        reason = %String::from_utf8_lossy(&buffer),
                        "Request failed on the daemon, dropping callback"
                    );
                }
            }
            other => {
                tracing::debug!(id, method = %name, kind = ?other, "Ignoring envelope");
            }
        }
    }

    /// Run a callback on its own task.
    fn deliver(&self, call: PendingCall, payload: Bytes) {
        let permits = self.callbacks.clone();
        tokio::spawn(async move {
            // Permit is held until the callback completes
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let PendingCall {
                id,
                method,
                handler,
            } = call;
            if let Err(e) = handler.deliver(payload).await {
                tracing::error!(id, method = %method, "Failed to deliver response: {}", e);
            }
        });
    }
}
