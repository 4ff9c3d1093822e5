//! Exercises [`GeminiProvider`] against a local stand-in for the Gemini API.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use futures_util::StreamExt;
use nexus_chat::credential::CredentialSource;
use nexus_chat::error::CompletionError;
use nexus_chat::models::{AgentConfig, Turn};
use nexus_chat::provider::GeminiProvider;
use nexus_chat::session::CompletionSession;
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct Recorded {
    requests: Arc<Mutex<Vec<(String, Option<String>, Value)>>>,
}

async fn handle_stream(
    State(recorded): State<Recorded>,
    Path(call): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let key = headers
        .get("x-goog-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    recorded
        .requests
        .lock()
        .unwrap()
        .push((call.clone(), key.clone(), body));

    if key.as_deref() != Some("good-key") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {"code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT"}
            })),
        )
            .into_response();
    }

    let frame = |text: &str| {
        format!(
            "data: {}\r\n\r\n",
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]})
        )
    };
    let body = if call.starts_with("broken-model") {
        format!(
            "{}data: {}\r\n\r\n",
            frame("Half"),
            json!({"error": {"message": "backend went away", "status": "UNAVAILABLE"}})
        )
    } else {
        format!("{}{}{}", frame("Hel"), frame("lo"), frame(" world"))
    };

    ([("content-type", "text/event-stream")], body).into_response()
}

async fn start_fake_gemini() -> (String, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/v1beta/models/{call}", post(handle_stream))
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/v1beta/models", addr), recorded)
}

fn key(value: &str) -> CredentialSource {
    CredentialSource::Fixed(Some(value.to_string()))
}

#[tokio::test]
async fn test_streams_reply_from_sse_frames() {
    let (base, recorded) = start_fake_gemini().await;
    let provider = Arc::new(GeminiProvider::new(base));
    let agent = AgentConfig {
        model: "gemini-test".into(),
        ..AgentConfig::default()
    };

    let session = CompletionSession::open(
        provider,
        &key("good-key"),
        &[Turn::user("Hi"), Turn::model("Hey")],
        "Say hello",
        &agent,
    )
    .unwrap();
    let fragments: Vec<String> = session.map(|item| item.unwrap()).collect().await;
    assert_eq!(fragments, vec!["Hel", "lo", " world"]);

    let requests = recorded.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let (call, api_key, body) = &requests[0];
    assert_eq!(call, "gemini-test:streamGenerateContent");
    assert_eq!(api_key.as_deref(), Some("good-key"));
    assert_eq!(body["contents"].as_array().unwrap().len(), 3);
    assert_eq!(body["contents"][2]["parts"][0]["text"], "Say hello");
    assert_eq!(
        body["systemInstruction"]["parts"][0]["text"],
        agent.system_instruction.as_str()
    );
}

#[tokio::test]
async fn test_rejected_key_surfaces_provider_message() {
    let (base, _) = start_fake_gemini().await;
    let session = CompletionSession::open(
        Arc::new(GeminiProvider::new(base)),
        &key("bad-key"),
        &[],
        "Hello",
        &AgentConfig::default(),
    )
    .unwrap();

    let items: Vec<_> = session.collect().await;
    assert_eq!(
        items,
        vec![Err(CompletionError::provider(
            "INVALID_ARGUMENT: API key not valid."
        ))]
    );
}

#[tokio::test]
async fn test_error_frame_after_partial_reply() {
    let (base, _) = start_fake_gemini().await;
    let agent = AgentConfig {
        model: "broken-model".into(),
        ..AgentConfig::default()
    };
    let mut session = CompletionSession::open(
        Arc::new(GeminiProvider::new(base)),
        &key("good-key"),
        &[],
        "Hello",
        &agent,
    )
    .unwrap();

    assert_eq!(session.next_fragment().await, Some(Ok("Half".to_string())));
    assert_eq!(
        session.next_fragment().await,
        Some(Err(CompletionError::provider(
            "UNAVAILABLE: backend went away"
        )))
    );
    assert_eq!(session.next_fragment().await, None);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_a_provider_error() {
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let mut session = CompletionSession::open(
        Arc::new(GeminiProvider::new(format!("http://127.0.0.1:{}", port))),
        &key("good-key"),
        &[],
        "Hello",
        &AgentConfig::default(),
    )
    .unwrap();

    match session.next_fragment().await {
        Some(Err(CompletionError::Provider(message))) => {
            assert!(message.starts_with("Failed to connect to Gemini API"))
        }
        other => panic!("expected a provider error, got {:?}", other),
    }
    assert_eq!(session.next_fragment().await, None);
}
