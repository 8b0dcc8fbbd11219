//! End-to-end driver tests against a scripted OpenAI-shaped upstream.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::post,
};
use gateway::canonical::{
    ChatMessage, ChatParameters, ChatRequest, ChatRole, EmbeddingRequest, FinishReason, ProviderId,
    TextCompletionInput, TextCompletionRequest,
};
use gateway::{Gateway, GatewayError, RequestContext};
use serde_json::{Value, json};

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    address
}

async fn build_gateway(address: SocketAddr) -> Gateway {
    let config: config::ApiProviderConfig = serde_json::from_value(json!({
        "api_key": "sk-test",
        "base_url": format!("http://{address}/v1")
    }))
    .unwrap();

    Gateway::builder()
        .with_provider(ProviderId::OpenAi, config::ProviderConfig::Api(config))
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn parallel_tool_calls_preserve_distinct_arguments() {
    #[derive(Clone, Default)]
    struct Captured {
        bodies: Arc<Mutex<Vec<Value>>>,
    }

    async fn handler(State(captured): State<Captured>, headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
        assert_eq!(headers.get("authorization").unwrap(), "Bearer sk-test");
        captured.bodies.lock().unwrap().push(body);

        Json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [
                        {
                            "id": "call_1",
                            "type": "function",
                            "function": { "name": "get_weather", "arguments": "{\"location\":\"Paris\"}" }
                        },
                        {
                            "id": "call_2",
                            "type": "function",
                            "function": { "name": "get_weather", "arguments": "{\"location\":\"Tokyo\"}" }
                        },
                        {
                            "id": "call_3",
                            "type": "function",
                            "function": { "name": "get_weather", "arguments": "{\"location\":\"Sydney\"}" }
                        }
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 80, "completion_tokens": 60, "total_tokens": 140 }
        }))
    }

    let captured = Captured::default();
    let address = serve(
        Router::new()
            .route("/v1/chat/completions", post(handler))
            .with_state(captured.clone()),
    )
    .await;

    let gateway = build_gateway(address).await;

    let request = ChatRequest {
        provider: ProviderId::OpenAi,
        model: "gpt-4o".into(),
        messages: vec![ChatMessage::text(
            ChatRole::User,
            "Weather in Paris, Tokyo and Sydney?",
        )],
        params: Some(ChatParameters {
            parallel_tool_calls: Some(true),
            tools: Some(vec![serde_json::from_value(json!({
                "type": "function",
                "function": {
                    "name": "get_weather",
                    "description": "Get the weather",
                    "parameters": { "type": "object", "properties": { "location": { "type": "string" } } }
                }
            }))
            .unwrap()]),
            ..Default::default()
        }),
        fallbacks: None,
        raw_body: None,
    };

    let response = gateway.chat(request, &RequestContext::default()).await.unwrap();

    let calls = response.choices[0].message.tool_calls.as_ref().unwrap();
    assert!(calls.len() >= 2);

    let locations: Vec<String> = calls
        .iter()
        .map(|call| {
            let parsed: Value = serde_json::from_str(&call.function.arguments).unwrap();
            parsed["location"].as_str().unwrap().to_string()
        })
        .collect();

    let mut distinct = locations.clone();
    distinct.sort();
    distinct.dedup();
    assert_eq!(distinct.len(), locations.len(), "each call targets a distinct location");

    assert_eq!(response.choices[0].finish_reason, Some(FinishReason::ToolCalls));

    let body = captured.bodies.lock().unwrap().last().cloned().unwrap();
    assert_eq!(body["parallel_tool_calls"], json!(true));
}

#[tokio::test]
async fn embeddings_return_ordered_vectors_and_usage() {
    async fn handler(Json(body): Json<Value>) -> impl IntoResponse {
        assert_eq!(body["model"], "text-embedding-004");
        assert_eq!(body["input"][0], "Hello world");

        Json(json!({
            "object": "list",
            "model": "text-embedding-004",
            "data": [{ "object": "embedding", "index": 0, "embedding": [0.1, -0.2, 0.3] }],
            "usage": { "prompt_tokens": 2, "total_tokens": 2 }
        }))
    }

    let address = serve(Router::new().route("/v1/embeddings", post(handler))).await;
    let gateway = build_gateway(address).await;

    let response = gateway
        .embed(
            EmbeddingRequest {
                provider: ProviderId::OpenAi,
                model: "text-embedding-004".into(),
                input: vec!["Hello world".into()],
                encoding_format: None,
                dimensions: None,
                truncate: None,
            },
            &RequestContext::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.data.len(), 1);
    assert_eq!(response.data[0].index, 0);
    assert!(!response.data[0].vector.is_empty());
    assert_eq!(response.usage.unwrap().prompt_tokens, 2);
}

#[tokio::test]
async fn streaming_consumes_done_marker_and_usage_chunk() {
    async fn handler(Json(body): Json<Value>) -> impl IntoResponse {
        assert_eq!(body["stream"], json!(true));

        let frames = concat!(
            "data: {\"id\":\"chatcmpl-2\",\"object\":\"chat.completion.chunk\",\"created\":1700000000,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"},\"finish_reason\":null}]}\n\n",
            "data: {\"id\":\"chatcmpl-2\",\"object\":\"chat.completion.chunk\",\"created\":1700000000,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n",
            "data: {\"id\":\"chatcmpl-2\",\"object\":\"chat.completion.chunk\",\"created\":1700000000,\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":1,\"total_tokens\":5}}\n\n",
            "data: [DONE]\n\n",
        );

        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/event-stream")],
            frames,
        )
    }

    let address = serve(Router::new().route("/v1/chat/completions", post(handler))).await;
    let gateway = build_gateway(address).await;

    let request = ChatRequest {
        provider: ProviderId::OpenAi,
        model: "gpt-4o".into(),
        messages: vec![ChatMessage::text(ChatRole::User, "hi")],
        params: None,
        fallbacks: None,
        raw_body: None,
    };

    let mut stream = gateway.chat_stream(request, &RequestContext::default()).await.unwrap();

    let mut chunks = Vec::new();
    while let Some(item) = stream.recv().await {
        chunks.push(item.unwrap());
    }

    assert_eq!(chunks.len(), 3, "the [DONE] marker produces no chunk");
    assert_eq!(chunks[0].choices[0].delta.role, Some(ChatRole::Assistant));
    assert_eq!(chunks[2].choices[0].finish_reason, Some(FinishReason::Stop));
    assert_eq!(chunks[2].usage.as_ref().unwrap().total_tokens, 5);
}

#[tokio::test]
async fn legacy_text_completion() {
    async fn handler(Json(body): Json<Value>) -> impl IntoResponse {
        assert_eq!(body["prompt"], "Once upon a time");

        Json(json!({
            "id": "cmpl-1",
            "object": "text_completion",
            "created": 1700000000,
            "model": "gpt-3.5-turbo-instruct",
            "choices": [{ "index": 0, "text": " there was a gateway.", "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 4, "completion_tokens": 5, "total_tokens": 9 }
        }))
    }

    let address = serve(Router::new().route("/v1/completions", post(handler))).await;
    let gateway = build_gateway(address).await;

    let response = gateway
        .text_completion(
            TextCompletionRequest {
                provider: ProviderId::OpenAi,
                model: "gpt-3.5-turbo-instruct".into(),
                input: TextCompletionInput::Single("Once upon a time".into()),
                params: None,
            },
            &RequestContext::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.choices[0].text, " there was a gateway.");
    assert_eq!(response.choices[0].finish_reason, Some(FinishReason::Stop));
}

#[tokio::test]
async fn error_body_param_is_surfaced() {
    async fn handler(Json(_): Json<Value>) -> impl IntoResponse {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "message": "Invalid value for max_tokens",
                    "type": "invalid_request_error",
                    "param": "max_tokens",
                    "code": null
                }
            })),
        )
    }

    let address = serve(Router::new().route("/v1/chat/completions", post(handler))).await;
    let gateway = build_gateway(address).await;

    let request = ChatRequest {
        provider: ProviderId::OpenAi,
        model: "gpt-4o".into(),
        messages: vec![ChatMessage::text(ChatRole::User, "hi")],
        params: None,
        fallbacks: None,
        raw_body: None,
    };

    let error = gateway.chat(request, &RequestContext::default()).await.unwrap_err();

    match error {
        GatewayError::ProviderApi { status, param, .. } => {
            assert_eq!(status, 400);
            assert_eq!(param.as_deref(), Some("max_tokens"));
        }
        other => unreachable!("expected ProviderApi error, got {other:?}"),
    }
}

#[tokio::test]
async fn request_key_takes_precedence_over_configured_key() {
    async fn handler(headers: HeaderMap, Json(_): Json<Value>) -> impl IntoResponse {
        assert_eq!(headers.get("authorization").unwrap(), "Bearer sk-rotated");

        Json(json!({
            "id": "chatcmpl-3",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "ok" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2 }
        }))
    }

    let address = serve(Router::new().route("/v1/chat/completions", post(handler))).await;
    let gateway = build_gateway(address).await;

    let request = ChatRequest {
        provider: ProviderId::OpenAi,
        model: "gpt-4o".into(),
        messages: vec![ChatMessage::text(ChatRole::User, "hi")],
        params: None,
        fallbacks: None,
        raw_body: None,
    };

    let ctx = RequestContext::with_api_key("sk-rotated");
    gateway.chat(request, &ctx).await.unwrap();
}

#[tokio::test]
async fn unconfigured_provider_is_rejected() {
    let address = serve(Router::new()).await;
    let gateway = build_gateway(address).await;

    let request = ChatRequest {
        provider: ProviderId::Cohere,
        model: "command-r-plus".into(),
        messages: vec![ChatMessage::text(ChatRole::User, "hi")],
        params: None,
        fallbacks: None,
        raw_body: None,
    };

    let error = gateway.chat(request, &RequestContext::default()).await.unwrap_err();
    assert!(matches!(
        error,
        GatewayError::OperationDisallowed {
            provider: ProviderId::Cohere,
            ..
        }
    ));
}
