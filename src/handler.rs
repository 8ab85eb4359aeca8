use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info};

use crate::client::ProviderClients;
use crate::error::{GatewayError, Result};
use crate::forward::TransparentForwarder;
use crate::metrics::METRICS;
use crate::models::claude::{
    ClaudeRequest, ClaudeResponse, Role, TokenCountRequest, TokenCountResponse,
};
use crate::provider::BackendReply;
use crate::recorder::{EventSink, LogCategory, RecordStores};
use crate::registry::{AliasTable, ModelRegistry, RegistryStatus};
use crate::router::{RouteTarget, route};
use crate::streaming::{StreamReconstructor, reconstruct_stream};
use crate::transform::compat::{ChatCompletionsRequest, chat_to_claude, claude_to_chat_completion};
use crate::transform::{
    estimate_input_tokens, translate_request, translate_response, validate_claude_request,
};

pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub clients: ProviderClients,
    pub forwarder: TransparentForwarder,
    pub sink: EventSink,
    pub stores: Arc<RecordStores>,
    routing_enabled: AtomicBool,
}

impl AppState {
    pub fn new(
        registry: Arc<ModelRegistry>,
        clients: ProviderClients,
        forwarder: TransparentForwarder,
        sink: EventSink,
        stores: Arc<RecordStores>,
        routing_enabled: bool,
    ) -> Self {
        Self {
            registry,
            clients,
            forwarder,
            sink,
            stores,
            routing_enabled: AtomicBool::new(routing_enabled),
        }
    }

    pub fn routing_enabled(&self) -> bool {
        self.routing_enabled.load(Ordering::Relaxed)
    }

    pub fn set_routing_enabled(&self, enabled: bool) {
        self.routing_enabled.store(enabled, Ordering::Relaxed);
    }

    fn resolve(&self, request: &ClaudeRequest) -> Result<RouteTarget> {
        let table = self.registry.snapshot();
        route(&request.model, &table).inspect_err(|e| {
            METRICS.record_unresolved();
            error!(model = %request.model, "Routing failed: {}", e);
            self.sink
                .record(LogCategory::Error, e.to_string(), Some(json!({"model": request.model})));
        })
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/v1/messages", post(handle_messages))
        .route("/v1/messages/count_tokens", post(handle_count_tokens))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/models", get(handle_models))
        .route("/config", get(handle_config))
        .route("/switch_model", post(handle_switch_model))
        .route("/proxy_server/status", get(handle_proxy_status))
        .route("/proxy_server/toggle", post(handle_proxy_toggle))
        .route("/debug_logs", get(handle_debug_logs).delete(handle_clear_debug_logs))
        .route("/conversation", get(handle_conversation).delete(handle_clear_conversation))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::InvalidRequest(format!("Invalid request body: {}", e)))
}

pub async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = if state.routing_enabled() {
        match parse_body::<ClaudeRequest>(&body) {
            Ok(request) => process_messages(&state, request).await,
            Err(e) => Err(e),
        }
    } else {
        state.forwarder.forward("/v1/messages", &headers, body).await
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

pub async fn handle_count_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.routing_enabled() {
        return state
            .forwarder
            .forward("/v1/messages/count_tokens", &headers, body)
            .await
            .unwrap_or_else(IntoResponse::into_response);
    }
    match parse_body::<TokenCountRequest>(&body).and_then(|req| process_count_tokens(&state, req)) {
        Ok(count) => Json(count).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Chat-completions calls always go through routing, even in transparent mode
pub async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Response {
    let result = match parse_body::<ChatCompletionsRequest>(&body) {
        Ok(request) => process_chat_completions(&state, request).await,
        Err(e) => Err(e),
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

/// Serve an OpenAI chat-completions request through the Messages pipeline.
///
/// Streamed replies are sent as Anthropic SSE.
pub async fn process_chat_completions(
    state: &AppState,
    request: ChatCompletionsRequest,
) -> Result<Response> {
    debug!(model = %request.model, messages = request.messages.len(), "Chat completions request");
    let request = chat_to_claude(request)?;
    match dispatch_messages(state, request).await? {
        MessagesReply::Message(message) => {
            Ok(Json(claude_to_chat_completion(&message)).into_response())
        }
        MessagesReply::Stream(response) => Ok(response),
    }
}

/// What one routed Messages call produced
pub enum MessagesReply {
    Message(ClaudeResponse),
    /// Ready-to-send SSE response
    Stream(Response),
}

/// Route, translate, invoke and translate back one `/v1/messages` call
pub async fn process_messages(state: &AppState, request: ClaudeRequest) -> Result<Response> {
    Ok(match dispatch_messages(state, request).await? {
        MessagesReply::Message(message) => Json(message).into_response(),
        MessagesReply::Stream(response) => response,
    })
}

pub async fn dispatch_messages(state: &AppState, request: ClaudeRequest) -> Result<MessagesReply> {
    validate_claude_request(&request).inspect_err(|e| {
        state
            .sink
            .record(LogCategory::Error, e.to_string(), Some(json!({"model": request.model})));
    })?;

    let target = state.resolve(&request)?;
    let qualified = target.qualified();
    let client = state.clients.get(&target.provider).ok_or_else(|| {
        GatewayError::Internal(format!("No client for provider '{}'", target.provider))
    })?;

    let backend_request = translate_request(&request, &target);
    info!(
        model = %request.model,
        target = %qualified,
        alias = ?target.alias,
        stream = request.stream,
        "Routing request"
    );
    METRICS.record_request(&qualified, request.stream);

    if let Some(message) = request.messages.iter().rev().find(|m| m.role == Role::User) {
        state.sink.record_turn("user", message.text(), qualified.clone());
    }
    state.sink.record(
        LogCategory::Request,
        format!("{} -> {}", request.model, qualified),
        Some(json!({
            "stream": request.stream,
            "messages": backend_request.messages.len(),
            "tools": backend_request.tools.as_ref().map_or(0, Vec::len),
            "max_tokens": backend_request.max_tokens,
        })),
    );

    let reply = client.invoke(backend_request).await.inspect_err(|e| {
        match e {
            GatewayError::Timeout(_) => METRICS.record_timeout(),
            _ => METRICS.record_upstream_error(),
        }
        error!(target = %qualified, "Upstream call failed: {}", e);
        state.sink.record(LogCategory::Error, e.to_string(), Some(json!({"target": qualified})));
    })?;

    match reply {
        BackendReply::Complete(response) => {
            let message = translate_response(&response, &request);
            state.sink.record_turn("assistant", message.text(), qualified.clone());
            state.sink.record(
                LogCategory::Response,
                format!("{} completed", message.id),
                Some(json!({
                    "target": qualified,
                    "stop_reason": message.stop_reason.map(|r| r.as_str()),
                    "usage": message.usage,
                })),
            );
            Ok(MessagesReply::Message(message))
        }
        BackendReply::Stream(fragments) => {
            let sink = state.sink.clone();
            let reconstructor = StreamReconstructor::new(request.model.clone());
            debug!(message_id = %reconstructor.message_id(), "Reconstructing stream");

            let body = reconstruct_stream(fragments, reconstructor, move |record| {
                sink.record_turn("assistant", record.text.clone(), qualified.clone());
                sink.record(
                    LogCategory::Response,
                    format!("{} streamed", record.message_id),
                    Some(json!({
                        "target": qualified,
                        "stop_reason": record.stop_reason,
                        "input_tokens": record.input_tokens,
                        "output_tokens": record.output_tokens,
                        "tool_calls": record.tool_calls,
                    })),
                );
            });
            sse_response(Body::from_stream(body)).map(MessagesReply::Stream)
        }
    }
}

fn sse_response(body: Body) -> Result<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .body(body)
        .map_err(|e| GatewayError::Internal(format!("Failed to build SSE response: {}", e)))
}

/// Route and translate like a real call, then estimate input tokens
pub fn process_count_tokens(
    state: &AppState,
    request: TokenCountRequest,
) -> Result<TokenCountResponse> {
    let request = ClaudeRequest::from(request);
    if request.messages.is_empty() {
        return Err(GatewayError::InvalidRequest("No messages provided".into()));
    }
    let target = state.resolve(&request)?;
    let backend_request = translate_request(&request, &target);
    let input_tokens = estimate_input_tokens(&backend_request);
    debug!(model = %request.model, target = %target.qualified(), input_tokens, "Counted tokens");
    Ok(TokenCountResponse { input_tokens })
}

async fn handle_root(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "message": "Claude model gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "routing_enabled": state.routing_enabled(),
    }))
}

#[derive(Debug, Serialize)]
struct ProviderView<'a> {
    id: &'a str,
    kind: &'static str,
    available: bool,
    models: &'a [String],
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    let table = state.registry.snapshot();
    let providers: Vec<ProviderView<'_>> = table
        .providers()
        .map(|p| ProviderView {
            id: &p.id,
            kind: p.kind.as_str(),
            available: p.is_available(),
            models: &p.models,
        })
        .collect();
    Json(json!({
        "providers": providers,
        "presets": state.registry.presets(),
    }))
}

#[derive(Debug, Serialize)]
pub struct ConfigView {
    pub routing_enabled: bool,
    #[serde(flatten)]
    pub status: RegistryStatus,
}

fn config_view(state: &AppState) -> ConfigView {
    ConfigView {
        routing_enabled: state.routing_enabled(),
        status: state.registry.status(),
    }
}

async fn handle_config(State(state): State<Arc<AppState>>) -> Json<ConfigView> {
    Json(config_view(&state))
}

/// Either a preset name or an explicit alias table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwitchModelRequest {
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(rename = "super", default)]
    pub super_model: Option<String>,
    #[serde(default)]
    pub big: Option<String>,
    #[serde(default)]
    pub small: Option<String>,
}

pub fn switch_model(state: &AppState, request: SwitchModelRequest) -> Result<ConfigView> {
    let outcome = match request.preset {
        Some(preset) => state.registry.apply_preset(&preset),
        None => state.registry.set_aliases(AliasTable {
            super_model: request.super_model,
            big: request.big,
            small: request.small,
        }),
    };

    match outcome {
        Ok(()) => {
            let view = config_view(state);
            info!(aliases = ?view.status.aliases, "Alias table updated");
            state.sink.record(
                LogCategory::Config,
                "alias table updated",
                serde_json::to_value(&view.status.aliases).ok(),
            );
            Ok(view)
        }
        Err(e) => {
            state.sink.record(LogCategory::Config, format!("alias update rejected: {}", e), None);
            Err(e)
        }
    }
}

async fn handle_switch_model(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match parse_body::<SwitchModelRequest>(&body).and_then(|req| switch_model(&state, req)) {
        Ok(view) => Json(view).into_response(),
        Err(e) => e.into_response(),
    }
}

fn proxy_status(state: &AppState) -> Value {
    let enabled = state.routing_enabled();
    json!({
        "enabled": enabled,
        "mode": if enabled { "routing" } else { "forward" },
    })
}

async fn handle_proxy_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(proxy_status(&state))
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    enabled: bool,
}

async fn handle_proxy_toggle(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request = match parse_body::<ToggleRequest>(&body) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };
    state.set_routing_enabled(request.enabled);
    info!(enabled = request.enabled, "Routing mode switched");
    state.sink.record(
        LogCategory::Config,
        format!("routing {}", if request.enabled { "enabled" } else { "disabled" }),
        None,
    );
    Json(proxy_status(&state)).into_response()
}

#[derive(Debug, Deserialize)]
struct DebugLogQuery {
    log_type: Option<String>,
    limit: Option<usize>,
}

async fn handle_debug_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DebugLogQuery>,
) -> Response {
    let category = match query.log_type.as_deref() {
        None | Some("") => None,
        Some(raw) => match LogCategory::parse(raw) {
            Some(category) => Some(category),
            None => {
                return GatewayError::InvalidRequest(format!("Unknown log_type '{}'", raw))
                    .into_response();
            }
        },
    };
    let logs = state.stores.debug_log.list(category, query.limit);
    Json(json!({
        "logs": logs,
        "total_count": state.stores.debug_log.len(),
    }))
    .into_response()
}

async fn handle_clear_debug_logs(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.stores.debug_log.clear();
    Json(json!({"status": "cleared"}))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn handle_conversation(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Json<Value> {
    Json(json!({
        "messages": state.stores.conversation.list(query.limit),
        "total_count": state.stores.conversation.len(),
    }))
}

async fn handle_clear_conversation(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.stores.conversation.clear();
    Json(json!({"status": "cleared"}))
}

async fn handle_metrics() -> Json<Value> {
    let snapshot = METRICS.snapshot();
    debug!("{}", snapshot);
    Json(serde_json::to_value(snapshot).unwrap_or(Value::Null))
}
