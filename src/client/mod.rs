//! HTTP clients for the two backend dialects.

pub mod anthropic;
pub mod openai;

use futures::{Stream, StreamExt, stream};
use reqwest::{Client, RequestBuilder, Response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{GatewayError, Result};
use crate::provider::Provider;
use crate::registry::{ApiDialect, RoutingTable};
use crate::streaming::{SseDecoder, SseEvent};

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Shared reqwest client; per-call deadlines are applied by the callers
pub fn build_http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .build()
        .map_err(|e| GatewayError::Internal(format!("Failed to create HTTP client: {}", e)))
}

pub(crate) fn map_transport_error(err: reqwest::Error, timeout_secs: u64) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(timeout_secs)
    } else {
        GatewayError::Transport(err.to_string())
    }
}

/// Send a request and wait for the response head under `timeout_secs`.
///
/// Non-2xx responses are read in full and returned as [`GatewayError::Upstream`].
pub(crate) async fn send(request: RequestBuilder, timeout_secs: u64) -> Result<Response> {
    let response = tokio::time::timeout(Duration::from_secs(timeout_secs), request.send())
        .await
        .map_err(|_| GatewayError::Timeout(timeout_secs))?
        .map_err(|e| map_transport_error(e, timeout_secs))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        warn!(status = status.as_u16(), "Upstream rejected request: {}", body);
        return Err(GatewayError::Upstream {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Read a full response body under `timeout_secs`
pub(crate) async fn read_body(response: Response, timeout_secs: u64) -> Result<bytes::Bytes> {
    tokio::time::timeout(Duration::from_secs(timeout_secs), response.bytes())
        .await
        .map_err(|_| GatewayError::Timeout(timeout_secs))?
        .map_err(|e| map_transport_error(e, timeout_secs))
}

/// Decode a `text/event-stream` body into SSE events.
///
/// A transport failure, or no body bytes for `timeout_secs`, is yielded once as
/// an error, then the stream ends.
pub(crate) fn sse_events(
    response: Response,
    timeout_secs: u64,
) -> impl Stream<Item = Result<SseEvent>> + Send {
    let body = Box::pin(response.bytes_stream());

    stream::unfold(
        (body, SseDecoder::new(), false),
        move |(mut body, mut decoder, ended)| async move {
            if ended {
                return None;
            }
            let idle = Duration::from_secs(timeout_secs);
            let Ok(next) = tokio::time::timeout(idle, body.next()).await else {
                warn!(timeout_secs, "Upstream stream stalled");
                let stalled = vec![Err(GatewayError::Timeout(timeout_secs))];
                return Some((stalled, (body, decoder, true)));
            };
            let batch: Vec<Result<SseEvent>> = match next {
                Some(Ok(chunk)) => decoder.feed(&chunk).into_iter().map(Ok).collect(),
                Some(Err(e)) => {
                    let failed = vec![Err(map_transport_error(e, timeout_secs))];
                    return Some((failed, (body, decoder, true)));
                }
                None => {
                    let tail = decoder.finish().into_iter().map(Ok).collect();
                    return Some((tail, (body, decoder, true)));
                }
            };
            Some((batch, (body, decoder, false)))
        },
    )
    .flat_map(stream::iter)
}

/// Provider id -> client, built once at startup from the routing table
#[derive(Clone, Default)]
pub struct ProviderClients {
    clients: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderClients {
    pub fn from_table(table: &RoutingTable, timeout_secs: u64) -> Result<Self> {
        let http = build_http_client()?;
        let mut clients = Self::default();

        for descriptor in table.providers() {
            let client: Arc<dyn Provider> = match descriptor.dialect() {
                ApiDialect::OpenAiCompatible => Arc::new(OpenAiClient::new(
                    http.clone(),
                    descriptor,
                    timeout_secs,
                )),
                ApiDialect::AnthropicNative => Arc::new(AnthropicClient::new(
                    http.clone(),
                    descriptor,
                    timeout_secs,
                )),
            };
            info!(
                provider = %descriptor.id,
                base_url = %descriptor.base_url,
                available = descriptor.is_available(),
                "Registered provider client"
            );
            clients.insert(descriptor.id.clone(), client);
        }
        Ok(clients)
    }

    pub fn insert(&mut self, id: impl Into<String>, client: Arc<dyn Provider>) {
        self.clients.insert(id.into(), client);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.clients.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
