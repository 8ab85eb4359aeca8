use futures::{StreamExt, future};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::metrics::METRICS;
use crate::models::openai::{BackendRequest, BackendResponse, StreamFragment};
use crate::provider::{BackendReply, FragmentStream, InvokeFuture, Provider};
use crate::registry::ProviderDescriptor;

use super::{read_body, send, sse_events};

/// Client for `/chat/completions` endpoints (OpenAI, and Gemini's compatible surface)
pub struct OpenAiClient {
    client: Client,
    id: String,
    url: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl OpenAiClient {
    pub fn new(client: Client, descriptor: &ProviderDescriptor, timeout_secs: u64) -> Self {
        Self {
            client,
            id: descriptor.id.clone(),
            url: format!("{}/chat/completions", descriptor.base_url.trim_end_matches('/')),
            api_key: descriptor.api_key.clone(),
            timeout_secs,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn invoke_impl(
        client: Client,
        id: String,
        url: String,
        api_key: Option<String>,
        timeout_secs: u64,
        request: BackendRequest,
    ) -> Result<BackendReply> {
        info!(
            provider = %id,
            model = %request.model,
            stream = request.stream,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let body = serde_json::to_vec(&request)?;
        let mut builder = client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body);
        if let Some(key) = api_key.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let response = send(builder, timeout_secs).await?;

        if !request.stream {
            let body = read_body(response, timeout_secs).await?;
            let decoded = BackendResponse::from_slice(&body).map_err(|e| {
                GatewayError::Transport(format!("Invalid JSON from {}: {}", id, e))
            })?;
            return Ok(BackendReply::Complete(decoded));
        }

        let fragments: FragmentStream = Box::pin(
            sse_events(response, timeout_secs)
                .filter_map(move |event| {
                    future::ready(match event {
                        Ok(event) if event.is_done() => None,
                        Ok(event) => match StreamFragment::decode(&event.data) {
                            Ok(fragment) => Some(Ok(fragment)),
                            Err(e) => {
                                warn!("Skipping undecodable stream payload: {}", e);
                                METRICS.record_degraded();
                                None
                            }
                        },
                        Err(e) => Some(Err(e)),
                    })
                }),
        );
        debug!(provider = %id, "Streaming response started");
        Ok(BackendReply::Stream(fragments))
    }
}

impl Provider for OpenAiClient {
    fn invoke(&self, request: BackendRequest) -> InvokeFuture {
        let client = self.client.clone();
        let id = self.id.clone();
        let url = self.url.clone();
        let api_key = self.api_key.clone();
        let timeout_secs = self.timeout_secs;

        Box::pin(async move {
            Self::invoke_impl(client, id, url, api_key, timeout_secs, request).await
        })
    }

    fn name(&self) -> &str {
        &self.id
    }
}
