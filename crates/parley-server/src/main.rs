mod api;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    http::{Method, header},
    routing::{get, post},
};
use parley_ai::{ChatService, ProviderRegistry, Settings};
use tower_http::cors::CorsLayer;

use api::state::AppState;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

#[derive(serde::Serialize)]
struct Health {
    status: String,
    provider: String,
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<Health> {
    axum::Json(Health {
        status: "ok".to_string(),
        provider: state.provider().to_string(),
    })
}

async fn root() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "message": "Parley chat API is running" }))
}

fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/chat", post(api::chat::chat))
        .route("/api/chat/stream", post(api::chat::chat_stream))
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing logger
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,parley_server=debug".into()),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting Parley chat server");

    let settings = Arc::new(Settings::from_env().context("Failed to load settings")?);
    let registry = ProviderRegistry::with_defaults();
    // Provider and credentials are validated here; a misconfigured server
    // refuses to start instead of failing on the first request.
    let service = ChatService::new(settings, &registry)
        .context("Failed to initialize chat service")?;
    let state: AppState = Arc::new(service);

    let addr = std::env::var("PARLEY_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    tracing::info!("Parley running on http://{addr}");

    axum::serve(listener, app(state))
        .await
        .context("Server error")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use parley_ai::{ChatService, MockLlmClient, MockStep, Settings};
    use std::sync::Arc;
    use tower::ServiceExt;

    use super::*;

    fn test_app(steps: Vec<MockStep>) -> (Router, AppState) {
        let service = ChatService::with_client(
            Arc::new(Settings::default()),
            Arc::new(MockLlmClient::from_steps("mock-model", steps)),
        );
        let state: AppState = Arc::new(service);
        (app(state.clone()), state)
    }

    fn chat_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_provider() {
        let (app, _) = test_app(vec![]);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["provider"], "mock");
    }

    #[tokio::test]
    async fn chat_returns_reply_and_echoes_conversation_id() {
        let (app, state) = test_app(vec![MockStep::text("Hi there!")]);

        let response = app
            .oneshot(chat_request(
                "/api/chat",
                serde_json::json!({ "message": "Hello", "conversation_id": "conv-1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["content"], "Hi there!");
        assert_eq!(body["conversation_id"], "conv-1");
        assert_eq!(body["role"], "assistant");

        let history = state.store().history("conv-1").await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn chat_mints_conversation_id_when_absent() {
        let (app, state) = test_app(vec![]);

        let response = app
            .oneshot(chat_request(
                "/api/chat",
                serde_json::json!({ "message": "Hello" }),
            ))
            .await
            .unwrap();

        let body = json_body(response).await;
        let id = body["conversation_id"].as_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
        assert!(state.store().history(id).await.is_some());
    }

    #[tokio::test]
    async fn stream_emits_json_frames_then_done_sentinel() {
        let (app, state) = test_app(vec![MockStep::fragments(["Hel", "lo"])]);

        let response = app
            .oneshot(chat_request(
                "/api/chat/stream",
                serde_json::json!({ "message": "hi", "conversation_id": "conv-1" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let raw = String::from_utf8(bytes.to_vec()).unwrap();

        let payloads: Vec<&str> = raw
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .collect();
        assert_eq!(payloads.last(), Some(&"[DONE]"));

        let mut contents = Vec::new();
        for payload in &payloads[..payloads.len() - 1] {
            let frame: serde_json::Value = serde_json::from_str(payload).unwrap();
            assert_eq!(frame["conversation_id"], "conv-1");
            assert_eq!(frame["role"], "assistant");
            assert!(uuid::Uuid::parse_str(frame["id"].as_str().unwrap()).is_ok());
            contents.push(frame["content"].as_str().unwrap().to_string());
        }
        assert_eq!(contents, ["Hel", "lo"]);

        let history = state.store().history("conv-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Hello");
    }

    #[tokio::test]
    async fn stream_failure_delivers_apology_frame_before_done() {
        let (app, _) = test_app(vec![MockStep::error("upstream exploded")]);

        let response = app
            .oneshot(chat_request(
                "/api/chat/stream",
                serde_json::json!({ "message": "hi", "conversation_id": "conv-1" }),
            ))
            .await
            .unwrap();

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let raw = String::from_utf8(bytes.to_vec()).unwrap();

        let payloads: Vec<&str> = raw
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .collect();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[1], "[DONE]");

        let frame: serde_json::Value = serde_json::from_str(payloads[0]).unwrap();
        let content = frame["content"].as_str().unwrap();
        assert!(content.contains("I apologize"));
        assert!(content.contains("upstream exploded"));
    }

    #[tokio::test]
    async fn malformed_request_is_rejected() {
        let (app, _) = test_app(vec![]);

        let response = app
            .oneshot(chat_request("/api/chat", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
