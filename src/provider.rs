use futures::Stream;
use std::future::Future;
use std::pin::Pin;

use crate::error::Result;
use crate::models::openai::{BackendRequest, BackendResponse, StreamFragment};

/// Decoded fragments of a streamed backend reply
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamFragment>> + Send>>;

/// What a backend call produced
pub enum BackendReply {
    Complete(BackendResponse),
    Stream(FragmentStream),
}

impl std::fmt::Debug for BackendReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(response) => f.debug_tuple("Complete").field(response).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Type alias for the future returned by [`Provider::invoke`]
pub type InvokeFuture = Pin<Box<dyn Future<Output = Result<BackendReply>> + Send>>;

/// A backend reachable over one wire dialect
pub trait Provider: Send + Sync {
    /// Send a translated request.
    ///
    /// Returns [`BackendReply::Stream`] when `request.stream` is set, otherwise
    /// [`BackendReply::Complete`]. Non-2xx replies surface as upstream errors.
    fn invoke(&self, request: BackendRequest) -> InvokeFuture;

    /// Provider id, for logging
    fn name(&self) -> &str;
}
