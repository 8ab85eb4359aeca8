use claude_model_gateway::models::claude::ClaudeRequest;
use claude_model_gateway::models::openai::{ChatCompletionChunk, StreamFragment, ToolCallDelta};
use claude_model_gateway::registry::*;
use claude_model_gateway::router::{RouteTarget, route};
use claude_model_gateway::streaming::StreamReconstructor;
use claude_model_gateway::transform::*;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;

fn routing_table() -> RoutingTable {
    RoutingTable::new(
        [
            ProviderDescriptor::new("openai", ProviderKind::OpenAi).with_api_key("sk"),
            ProviderDescriptor::new("gemini", ProviderKind::Gemini).with_api_key("gm"),
            ProviderDescriptor::new("anthropic", ProviderKind::Anthropic).with_api_key("ak"),
        ],
        AliasTable {
            super_model: Some("anthropic/claude-opus-4-1-20250805".to_string()),
            big: Some("openai/gpt-4.1".to_string()),
            small: Some("gemini/gemini-2.5-flash".to_string()),
        },
    )
}

fn benchmark_routing(c: &mut Criterion) {
    let table = routing_table();
    let tokens = [
        "claude-3-5-sonnet-20241022",
        "claude-3-opus-20240229",
        "claude-3-haiku-20240307",
        "gpt-4o-mini",
        "gemini/gemini-2.5-pro",
        "openai/unlisted-model",
    ];

    c.bench_function("route_model_tokens", |b| {
        b.iter(|| {
            for token in &tokens {
                let _ = black_box(route(black_box(token), &table));
            }
        });
    });
}

fn sample_request() -> ClaudeRequest {
    serde_json::from_value(json!({
        "model": "claude-sonnet-4",
        "max_tokens": 4096,
        "system": "You are a helpful assistant",
        "messages": [
            {"role": "user", "content": "What's the weather in Paris?"},
            {"role": "assistant", "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Paris"}}
            ]},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "18C and sunny"}
            ]}
        ],
        "tools": [{
            "name": "get_weather",
            "description": "Get the weather",
            "input_schema": {
                "type": "object",
                "properties": {
                    "city": {"type": "string", "format": "city"},
                    "unit": {"type": "string", "enum": ["c", "f"], "default": "c"}
                },
                "required": ["city"],
                "additionalProperties": false
            }
        }],
        "tool_choice": {"type": "auto"}
    }))
    .expect("valid request")
}

fn target(kind: ProviderKind, model: &str) -> RouteTarget {
    RouteTarget {
        provider: kind.as_str().to_string(),
        kind,
        model: model.to_string(),
        alias: None,
        passthrough: false,
    }
}

fn benchmark_request_translation(c: &mut Criterion) {
    let req = sample_request();
    let openai = target(ProviderKind::OpenAi, "gpt-4.1");
    let gemini = target(ProviderKind::Gemini, "gemini-2.5-flash");

    c.bench_function("translate_request_openai", |b| {
        b.iter(|| black_box(translate_request(black_box(&req), &openai)));
    });
    c.bench_function("translate_request_gemini", |b| {
        b.iter(|| black_box(translate_request(black_box(&req), &gemini)));
    });
}

fn benchmark_schema_normalization(c: &mut Criterion) {
    let schema = json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "todos": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "content": {"type": "string", "format": "markdown"},
                        "status": {"type": "string", "enum": ["pending", "done"], "default": "pending"},
                        "due": {"type": "string", "format": "date-time"}
                    },
                    "additionalProperties": false
                }
            }
        }
    });

    c.bench_function("normalize_schema_gemini", |b| {
        b.iter(|| black_box(normalize_schema(black_box(&schema), ProviderKind::Gemini)));
    });
}

fn benchmark_stream_reconstruction(c: &mut Criterion) {
    let mut fragments: Vec<StreamFragment> = (0..100)
        .map(|i| StreamFragment::Chunk(ChatCompletionChunk::text(format!("word{} ", i))))
        .collect();
    fragments.push(StreamFragment::Chunk(ChatCompletionChunk::tool_call(
        ToolCallDelta::new(0)
            .with_id("call_1")
            .with_name("get_weather"),
    )));
    fragments.extend((0..20).map(|i| {
        StreamFragment::Chunk(ChatCompletionChunk::tool_call(
            ToolCallDelta::new(0).with_arguments(json!(format!("\"k{}\":{},", i, i))),
        ))
    }));
    fragments.push(StreamFragment::Chunk(
        ChatCompletionChunk::finish("tool_calls").with_usage(120, 80),
    ));

    let mut group = c.benchmark_group("stream_reconstruction");
    group.throughput(Throughput::Elements(fragments.len() as u64));
    group.bench_function("text_then_tool_call", |b| {
        b.iter(|| {
            let mut reconstructor = StreamReconstructor::new("claude-sonnet-4");
            let mut out = String::new();
            for event in reconstructor.start() {
                out.push_str(&event.to_sse_string());
            }
            for fragment in &fragments {
                for event in reconstructor.push(fragment) {
                    out.push_str(&event.to_sse_string());
                }
            }
            black_box(out)
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_routing,
    benchmark_request_translation,
    benchmark_schema_normalization,
    benchmark_stream_reconstruction
);
criterion_main!(benches);
