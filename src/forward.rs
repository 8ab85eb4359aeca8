use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, header},
    response::Response,
};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::client::{anthropic::ANTHROPIC_VERSION, read_body, send};
use crate::config::ForwardConfig;
use crate::error::{GatewayError, Result};
use crate::metrics::METRICS;
use crate::recorder::{EventSink, LogCategory};
use crate::streaming::SseDecoder;

/// Relays requests to Anthropic unchanged while routing is disabled
pub struct TransparentForwarder {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout_secs: u64,
    sink: EventSink,
}

impl TransparentForwarder {
    pub fn new(client: Client, config: &ForwardConfig, timeout_secs: u64, sink: EventSink) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            timeout_secs,
            sink,
        }
    }

    /// Headers sent upstream: everything but `Host`, with the configured key replacing client auth
    pub fn upstream_headers(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = inbound.clone();
        headers.remove(header::HOST);
        // recomputed by reqwest from the body
        headers.remove(header::CONTENT_LENGTH);

        if let Some(key) = &self.api_key
            && let Ok(value) = HeaderValue::from_str(key)
        {
            headers.insert("x-api-key", value);
            headers.remove(header::AUTHORIZATION);
        }
        if !headers.contains_key("anthropic-version") {
            headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        }
        headers
    }

    /// Relay `body` to `{base_url}{path}` and mirror the reply into the recorder
    pub async fn forward(&self, path: &str, inbound: &HeaderMap, body: Bytes) -> Result<Response> {
        METRICS.record_forward();

        let url = format!("{}{}", self.base_url, path);
        let model = serde_json::from_slice::<Value>(&body)
            .ok()
            .and_then(|v| v.get("model").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        info!(url = %url, model = %model, bytes = body.len(), "Forwarding request unchanged");
        self.sink.record(
            LogCategory::Request,
            format!("forward {}", path),
            Some(json!({"model": model, "bytes": body.len()})),
        );

        let request = self
            .client
            .post(&url)
            .headers(self.upstream_headers(inbound))
            .body(body);

        let upstream = match send(request, self.timeout_secs).await {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    GatewayError::Timeout(_) => METRICS.record_timeout(),
                    _ => METRICS.record_upstream_error(),
                }
                self.sink.record(
                    LogCategory::Error,
                    format!("forward {} failed", path),
                    Some(json!(e.to_string())),
                );
                return Err(e);
            }
        };

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        headers.remove(header::CONNECTION);
        headers.remove(header::TRANSFER_ENCODING);
        headers.remove(header::CONTENT_LENGTH);
        let is_sse = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));

        let body = if is_sse {
            let mut mirror = StreamMirror::new(self.sink.clone(), model);
            let stream = upstream.bytes_stream().map(move |chunk| {
                let chunk = chunk.map_err(std::io::Error::other)?;
                mirror.observe(&chunk);
                Ok::<_, std::io::Error>(chunk)
            });
            Body::from_stream(stream)
        } else {
            let bytes = read_body(upstream, self.timeout_secs).await?;
            let text = reply_text(&serde_json::from_slice(&bytes).unwrap_or(Value::Null));
            self.sink.record_turn("assistant", text, model.clone());
            self.sink.record(
                LogCategory::Response,
                format!("forward {} completed", path),
                Some(json!({"model": model, "bytes": bytes.len()})),
            );
            Body::from(bytes)
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Text of a non-streamed Messages reply
fn reply_text(value: &Value) -> String {
    value
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Watches a relayed SSE body and records the assistant text once it is gone
struct StreamMirror {
    decoder: SseDecoder,
    text: String,
    bytes: usize,
    sink: EventSink,
    model: String,
}

impl StreamMirror {
    fn new(sink: EventSink, model: String) -> Self {
        Self {
            decoder: SseDecoder::new(),
            text: String::new(),
            bytes: 0,
            sink,
            model,
        }
    }

    fn observe(&mut self, chunk: &[u8]) {
        self.bytes += chunk.len();
        for event in self.decoder.feed(chunk) {
            if let Ok(value) = serde_json::from_str::<Value>(&event.data)
                && let Some(text) = value.pointer("/delta/text").and_then(Value::as_str)
            {
                self.text.push_str(text);
            }
        }
    }
}

impl Drop for StreamMirror {
    fn drop(&mut self) {
        debug!(model = %self.model, bytes = self.bytes, "Forwarded stream finished");
        self.sink
            .record_turn("assistant", std::mem::take(&mut self.text), self.model.clone());
        self.sink.record(
            LogCategory::Response,
            "forward stream completed",
            Some(json!({"model": self.model, "bytes": self.bytes})),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{RecordStores, Recorder};
    use std::sync::Arc;

    fn forwarder(api_key: Option<&str>) -> TransparentForwarder {
        let stores = Arc::new(RecordStores::default());
        let (sink, _handle) = Recorder::spawn(stores);
        let config = ForwardConfig {
            base_url: "https://api.anthropic.com/".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            api_key: api_key.map(str::to_string),
        };
        TransparentForwarder::new(Client::new(), &config, 30, sink)
    }

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("localhost:8082"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer session"));
        headers.insert("x-custom", HeaderValue::from_static("kept"));
        headers.insert("anthropic-beta", HeaderValue::from_static("tools-2024"));
        headers
    }

    #[tokio::test]
    async fn test_client_auth_passes_through_without_key() {
        let headers = forwarder(None).upstream_headers(&inbound());
        assert!(headers.get(header::HOST).is_none());
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer session");
        assert_eq!(headers.get("x-custom").unwrap(), "kept");
        assert_eq!(headers.get("anthropic-beta").unwrap(), "tools-2024");
        assert_eq!(headers.get("anthropic-version").unwrap(), ANTHROPIC_VERSION);
        assert!(headers.get("x-api-key").is_none());
    }

    #[tokio::test]
    async fn test_configured_key_overrides_auth() {
        let headers = forwarder(Some("sk-ant")).upstream_headers(&inbound());
        assert!(headers.get(header::AUTHORIZATION).is_none());
        assert_eq!(headers.get("x-api-key").unwrap(), "sk-ant");
    }

    #[test]
    fn test_reply_text() {
        let value = json!({"content": [
            {"type": "text", "text": "Hello "},
            {"type": "tool_use", "id": "t", "name": "f", "input": {}},
            {"type": "text", "text": "there"}
        ]});
        assert_eq!(reply_text(&value), "Hello there");
        assert_eq!(reply_text(&Value::Null), "");
    }
}
