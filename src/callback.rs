//! Response callbacks.
//!
//! A caller hands `send_request` a typed callback. The expected response type
//! is the callback's argument type, so it is erased behind [`ResponseHandler`]
//! when the request is registered and recovered when the response payload is
//! decoded with the client's codec.

use std::future::Future;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::codec::Codec;
use crate::error::Result;
use crate::transport::BoxFuture;

/// A registered callback waiting for its response payload.
pub trait ResponseHandler: Send + 'static {
    /// Decode `payload` and run the callback with it.
    ///
    /// Consumes the handler: a callback runs at most once.
    fn deliver(self: Box<Self>, payload: Bytes) -> BoxFuture<'static, Result<()>>;
}

/// Wrapper that decodes the payload as `T` before calling the callback.
pub struct TypedCallback<C, T, F, Fut>
where
    C: Codec,
    F: FnOnce(T) -> Fut + Send + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    callback: F,
    _phantom: PhantomData<fn(T) -> (C, Fut)>,
}

impl<C, T, F, Fut> TypedCallback<C, T, F, Fut>
where
    C: Codec,
    F: FnOnce(T) -> Fut + Send + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    /// Create a new typed callback.
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            _phantom: PhantomData,
        }
    }
}

impl<C, T, F, Fut> ResponseHandler for TypedCallback<C, T, F, Fut>
where
    C: Codec,
    F: FnOnce(T) -> Fut + Send + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn deliver(self: Box<Self>, payload: Bytes) -> BoxFuture<'static, Result<()>> {
        let value: T = match C::decode(&payload) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        let fut = (self.callback)(value);
        Box::pin(async move {
            fut.await;
            Ok(())
        })
    }
}
