//! Shared connection slot with coordinated reconnects.
//!
//! Both loops use one connection. The writer writes to its write half; the
//! reader owns its read half while it waits for frames. Either loop can hit a
//! failure and ask for a reconnect, so the slot serializes reconnects behind a
//! mutex and stamps each connection with a generation number:
//!
//! ```text
//!  writer ── send(frame) ──┐                ┌── take_reader() ── reader
//!                          ▼                ▼
//!                   ┌─────────────────────────────┐
//!                   │ ConnectionSlot (Mutex)      │
//!                   │  generation: u64            │──► watch<u64>
//!                   │  writer: Option<BoxWriter>  │
//!                   │  reader: Option<BoxReader>  │
//!                   └─────────────────────────────┘
//!                          ▲
//!       reconnect(seen) ───┘  no-op if generation != seen
//! ```
//!
//! A loop that saw a failure on generation `g` calls `reconnect(g)`. If the
//! other loop already replaced that connection, the call just reports the
//! current generation. Every replacement is broadcast, so the reader drops a
//! read half that belongs to a superseded connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex};

use crate::error::{RpcError, Result};
use crate::transport::{BoxReader, BoxWriter, Connection, Connector};

/// A failed write, tagged with the generation it was attempted on.
#[derive(Debug)]
pub struct WriteFault {
    pub generation: u64,
    pub error: RpcError,
}

/// Read half handed to the reader loop.
pub struct AttachedReader {
    pub generation: u64,
    pub reader: BoxReader,
}

struct SlotState {
    generation: u64,
    writer: Option<BoxWriter>,
    reader: Option<BoxReader>,
}

/// Owner of the single live connection.
pub struct ConnectionSlot {
    connector: Arc<dyn Connector>,
    state: Mutex<SlotState>,
    generations: watch::Sender<u64>,
}

impl ConnectionSlot {
    /// Create an empty (disconnected) slot.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let (generations, _) = watch::channel(0);
        Self {
            connector,
            state: Mutex::new(SlotState {
                generation: 0,
                writer: None,
                reader: None,
            }),
            generations,
        }
    }

    /// Current connection generation.
    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    /// Subscribe to generation changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generations.subscribe()
    }

    /// Open a new connection, logging failures.
    async fn connect(&self) -> Option<Connection> {
        match self.connector.connect().await {
            Ok(connection) => Some(connection),
            Err(e) => {
                tracing::warn!("Failed to connect to daemon: {}", e);
                None
            }
        }
    }

    /// Close the connection held in `state`. Close errors are logged only.
    async fn disconnect_locked(state: &mut SlotState) {
        state.reader = None;
        if let Some(mut writer) = state.writer.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("Error closing connection: {}", e);
            }
        }
    }

    /// Replace the connection observed at generation `seen`.
    ///
    /// Returns the generation now in use. If another caller already replaced
    /// generation `seen`, nothing is reconnected and the current generation is
    /// returned (even if that one is currently disconnected).
    pub async fn reconnect(&self, seen: u64) -> Result<u64> {
        let mut state = self.state.lock().await;
        if state.generation != seen {
            tracing::debug!(
                seen,
                current = state.generation,
                "Connection already replaced"
            );
            return Ok(state.generation);
        }

        Self::disconnect_locked(&mut state).await;
        let connection = self.connect().await;

        state.generation += 1;
        let generation = state.generation;
        let result = match connection {
            Some(connection) => {
                state.reader = Some(connection.reader);
                state.writer = Some(connection.writer);
                tracing::debug!(generation, "Connected to daemon");
                Ok(generation)
            }
            None => Err(RpcError::ConnectionUnavailable(format!(
                "reconnect failed at generation {}",
                generation
            ))),
        };
        drop(state);

        self.generations.send_replace(generation);
        result
    }

    /// Connect unless a connection is already held.
    ///
    /// Used for the first connect of a session: if the writer got there first
    /// its connection is kept.
    pub async fn connect_if_disconnected(&self) -> Result<u64> {
        let seen = {
            let state = self.state.lock().await;
            if state.writer.is_some() {
                return Ok(state.generation);
            }
            state.generation
        };
        self.reconnect(seen).await
    }

    /// Close the current connection, if any.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        let connected = state.writer.is_some() || state.reader.is_some();
        Self::disconnect_locked(&mut state).await;
        if connected {
            state.generation += 1;
            let generation = state.generation;
            drop(state);
            self.generations.send_replace(generation);
            tracing::debug!(generation, "Disconnected from daemon");
        }
    }

    /// Hand the current read half to the reader loop.
    pub async fn take_reader(&self) -> Option<AttachedReader> {
        let mut state = self.state.lock().await;
        let generation = state.generation;
        state.reader.take().map(|reader| AttachedReader { generation, reader })
    }

    /// Write a complete frame to the current connection.
    ///
    /// A write that makes no progress within `timeout` fails like any other
    /// write error.
    pub async fn send(
        &self,
        frame: &[u8],
        timeout: Duration,
    ) -> std::result::Result<(), WriteFault> {
        let mut state = self.state.lock().await;
        let generation = state.generation;
        let writer = state.writer.as_mut().ok_or(WriteFault {
            generation,
            error: RpcError::NotConnected,
        })?;

        let error = match tokio::time::timeout(timeout, writer.write_all(frame)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(_) => std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("write of {} bytes timed out", frame.len()),
            ),
        };
        Err(WriteFault {
            generation,
            error: RpcError::Io(error),
        })
    }

    /// Flush the current connection. Failures are logged only.
    pub async fn flush(&self) {
        let mut state = self.state.lock().await;
        if let Some(writer) = state.writer.as_mut() {
            if let Err(e) = writer.flush().await {
                tracing::debug!("Flush failed: {}", e);
            }
        }
    }

    /// True when a write half is present.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.writer.is_some()
    }
}
