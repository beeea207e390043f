//! Client builder and session lifecycle.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the client.
//! The [`RpcClient`] manages the session lifecycle:
//! 1. `start()` creates the request queue and spawns the writer and reader loops
//! 2. `send_request()` / `call()` enqueue requests
//! 3. `shutdown()` (or a failed reconnect) stops both loops
//!
//! # Example
//!
//! ```no_run
//! use lumen_rpc::RpcClient;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize)]
//! struct DmxData {
//!     universe: u32,
//!     data: Vec<u8>,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RpcClient::builder().build();
//!     client.start()?;
//!
//!     client.send_request(
//!         "UpdateDmxData",
//!         DmxData { universe: 1, data: vec![255; 512] },
//!         |ack: ()| async move {
//!             tracing::debug!("frame accepted: {:?}", ack);
//!         },
//!     );
//!
//!     let plugins: Vec<String> = client.call("GetPlugins", ()).await?;
//!     println!("{:?}", plugins);
//!
//!     client.shutdown();
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;

use crate::callback::TypedCallback;
use crate::codec::{Codec, MsgPackCodec};
use crate::connection::ConnectionSlot;
use crate::correlation::{CorrelationStore, SharedStore, DEFAULT_PENDING_TTL};
use crate::error::{RpcError, Result};
use crate::reader::{Reader, DEFAULT_MAX_CONCURRENT_CALLBACKS};
use crate::shutdown::StopSignal;
use crate::transport::{
    Connector, TcpConnector, DEFAULT_ADDRESS, DEFAULT_CONNECT_TIMEOUT,
};
use crate::writer::{OutboundRequest, Writer, DEFAULT_QUEUE_CAPACITY, DEFAULT_WRITE_TIMEOUT};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Daemon RPC address (ignored when a custom connector is set).
    pub address: SocketAddr,
    /// Timeout for a single connect attempt.
    pub connect_timeout: Duration,
    /// Time a single frame write may take before it counts as failed.
    pub write_timeout: Duration,
    /// How long a request waits for its response before it is forgotten.
    pub pending_ttl: Duration,
    /// Outbound queue capacity. Requests beyond it are dropped.
    pub queue_capacity: usize,
    /// Maximum callbacks running at once.
    pub max_concurrent_callbacks: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            pending_ttl: DEFAULT_PENDING_TTL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_concurrent_callbacks: DEFAULT_MAX_CONCURRENT_CALLBACKS,
        }
    }
}

/// Builder for configuring and creating an [`RpcClient`].
pub struct ClientBuilder<C: Codec = MsgPackCodec> {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    _codec: PhantomData<fn() -> C>,
}

impl ClientBuilder<MsgPackCodec> {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            connector: None,
            _codec: PhantomData,
        }
    }
}

impl Default for ClientBuilder<MsgPackCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Codec> ClientBuilder<C> {
    /// Use a different payload codec.
    pub fn codec<D: Codec>(self) -> ClientBuilder<D> {
        ClientBuilder {
            config: self.config,
            connector: self.connector,
            _codec: PhantomData,
        }
    }

    /// Set the daemon address.
    ///
    /// Default: 127.0.0.1:9010
    pub fn address(mut self, address: SocketAddr) -> Self {
        self.config.address = address;
        self
    }

    /// Set the connect timeout.
    ///
    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the write timeout.
    ///
    /// A write that stalls longer (daemon not reading) is treated as a write
    /// failure: one reconnect and retry, then the request is dropped.
    /// Default: 5 seconds
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    /// Set how long a request may wait for its response.
    ///
    /// Default: 1 hour
    pub fn pending_ttl(mut self, ttl: Duration) -> Self {
        self.config.pending_ttl = ttl;
        self
    }

    /// Set the outbound queue capacity.
    ///
    /// When the queue is full, new requests are dropped with a warning.
    /// Default: 1024
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity.max(1);
        self
    }

    /// Set the maximum number of callbacks running at once.
    ///
    /// Default: 256
    pub fn max_concurrent_callbacks(mut self, limit: usize) -> Self {
        self.config.max_concurrent_callbacks = limit.max(1);
        self
    }

    /// Use a custom connector instead of TCP to `address`.
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Build the client. It does not connect until [`RpcClient::start`].
    pub fn build(self) -> RpcClient<C> {
        let connector = self.connector.unwrap_or_else(|| {
            Arc::new(
                TcpConnector::new(self.config.address).with_timeout(self.config.connect_timeout),
            )
        });

        RpcClient {
            config: self.config,
            connector,
            session: Mutex::new(None),
            _codec: PhantomData,
        }
    }
}

/// One started session: queue, loops and their shared state.
struct Session {
    queue: mpsc::Sender<OutboundRequest>,
    stop: StopSignal,
    pending: SharedStore,
    _writer_task: JoinHandle<()>,
    _reader_task: JoinHandle<()>,
}

impl Session {
    fn is_active(&self) -> bool {
        !self.queue.is_closed() && !self.stop.is_triggered()
    }
}

/// RPC client for the lighting daemon.
///
/// Requests are fire-and-callback: [`send_request`](Self::send_request)
/// never fails and never blocks. A callback runs at most once, with the
/// decoded response, or never if the request or its response is lost.
pub struct RpcClient<C: Codec = MsgPackCodec> {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    session: Mutex<Option<Session>>,
    _codec: PhantomData<fn() -> C>,
}

impl RpcClient<MsgPackCodec> {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder<MsgPackCodec> {
        ClientBuilder::new()
    }
}

impl<C: Codec> RpcClient<C> {
    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start the session if it is not already running.
    ///
    /// Must be called from within a tokio runtime. Calling it while a session
    /// is active does nothing.
    pub fn start(&self) -> Result<()> {
        let mut session = self.session.lock();
        if session.as_ref().is_some_and(Session::is_active) {
            tracing::debug!("Client already started");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| RpcError::NoRuntime)?;

        let (queue, rx) = mpsc::channel(self.config.queue_capacity);
        let stop = StopSignal::new();
        let pending = CorrelationStore::shared(self.config.pending_ttl);
        let connection = Arc::new(ConnectionSlot::new(self.connector.clone()));
        let callbacks = Arc::new(Semaphore::new(self.config.max_concurrent_callbacks));

        let writer = Writer::new(rx, connection.clone(), pending.clone(), stop.clone())
            .with_write_timeout(self.config.write_timeout);
        let reader = Reader::new(connection, pending.clone(), callbacks, stop.clone());

        let writer_task = runtime.spawn(writer.run());
        let reader_task = runtime.spawn(reader.run());

        *session = Some(Session {
            queue,
            stop,
            pending,
            _writer_task: writer_task,
            _reader_task: reader_task,
        });
        tracing::debug!("Client started");
        Ok(())
    }

    /// Stop the session. Calling it when nothing is running does nothing.
    ///
    /// Closes the request queue. Requests already queued are still written,
    /// then both loops stop and the connection is closed. Responses that
    /// arrive after that are not delivered.
    pub fn shutdown(&self) {
        let Some(session) = self.session.lock().take() else {
            tracing::debug!("Client not running, nothing to shut down");
            return;
        };

        drop(session.queue);
        tracing::debug!("Client shut down");
    }

    /// True while a session is started and has not stopped.
    pub fn is_running(&self) -> bool {
        self.session.lock().as_ref().is_some_and(Session::is_active)
    }

    /// Number of requests waiting for a response in the current session.
    ///
    /// Calls whose TTL has run out are not counted.
    pub fn pending_calls(&self) -> usize {
        self.session.lock().as_ref().map_or(0, |session| {
            let mut pending = session.pending.lock();
            pending.evict_expired(Instant::now());
            pending.len()
        })
    }

    /// Send a request; `callback` runs with the decoded response.
    ///
    /// The expected response type is the callback's argument type. If the
    /// client is not running or the queue is full, the request is dropped and
    /// an error is logged. No failure is reported to the caller.
    pub fn send_request<M, T, F, Fut>(&self, method: &str, message: M, callback: F)
    where
        M: Serialize + Send + 'static,
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let request = OutboundRequest {
            method: method.to_string(),
            encode: Box::new(move || C::encode(&message)),
            handler: Box::new(TypedCallback::<C, T, F, Fut>::new(callback)),
        };

        let session = self.session.lock();
        let Some(session) = session.as_ref().filter(|s| s.is_active()) else {
            tracing::error!(method, "Client not started, dropping request");
            return;
        };

        match session.queue.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(method, "Request queue full, dropping request");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::error!(method, "Client stopped, dropping request");
            }
        }
    }

    /// Send a request and await its decoded response.
    ///
    /// Resolves to an error if the request or its response is dropped. There is
    /// no built-in timeout: wrap the call in `tokio::time::timeout` if the
    /// daemon may never answer.
    pub async fn call<M, T>(&self, method: &str, message: M) -> Result<T>
    where
        M: Serialize + Send + 'static,
        T: DeserializeOwned + Send + 'static,
    {
        self.request(method, message)
            .await
            .map_err(|_| RpcError::ConnectionClosed)
    }

    /// Send a request and get a receiver for its decoded response.
    ///
    /// The receiver errors when the request or its response is dropped.
    pub fn request<M, T>(&self, method: &str, message: M) -> oneshot::Receiver<T>
    where
        M: Serialize + Send + 'static,
        T: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send_request(method, message, move |value: T| async move {
            let _ = tx.send(value);
        });
        rx
    }
}
