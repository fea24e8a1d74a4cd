//! Optional NLPRP HTTP server (spec.md §4.5): a thin axum front end over the
//! same `Extractor` trait the in-process `Controller` uses, so a processor
//! can be exposed to other nlprunner deployments as a remote NLPRP service.

pub mod error;
pub mod handlers;
pub mod queue;
pub mod session;

pub use error::ServerError;
pub use handlers::{router, AppState};
pub use queue::QueueStore;
pub use session::{Session, SessionStore};

use nlprunner_extractors::ExtractorRegistry;
use nlprunner_protocol::ServerInfo;
use std::sync::Arc;

/// Builds the shared application state for a fresh server instance. Callers
/// register tokens on the returned state's `sessions` store before serving
/// traffic, then pass `Arc::clone`d copies into `handlers::router`.
pub fn new_app_state(registry: ExtractorRegistry, server_name: impl Into<String>, server_version: impl Into<String>) -> Arc<AppState> {
    Arc::new(AppState {
        sessions: SessionStore::new(),
        queue: QueueStore::new(),
        registry,
        server_info: ServerInfo {
            name: server_name.into(),
            version: server_version.into(),
            id: None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use nlprunner_protocol::{Command, ProcessorPermissions, Request};
    use tower::ServiceExt;

    fn empty_registry_state() -> Arc<AppState> {
        new_app_state(ExtractorRegistry::new(), "nlprunner-server", "0.1.0")
    }

    #[tokio::test]
    async fn health_check_responds_ok_without_auth() {
        let state = empty_registry_state();
        let app = router(state);

        let response = app
            .oneshot(HttpRequest::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn nlprp_without_bearer_token_is_unauthenticated() {
        let state = empty_registry_state();
        let app = router(state);

        let body = serde_json::to_vec(&Request::new(Command::ListProcessors)).unwrap();
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/nlprp")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded["status"], serde_json::json!("error"));
        assert_eq!(decoded["errors"][0]["code"], serde_json::json!("unauthenticated"));
    }

    #[tokio::test]
    async fn list_processors_succeeds_with_valid_token() {
        let state = empty_registry_state();
        state.sessions.register_token("tok-1", "alice", ProcessorPermissions::allow_all()).await;
        let app = router(state);

        let body = serde_json::to_vec(&Request::new(Command::ListProcessors)).unwrap();
        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/nlprp")
                    .header("content-type", "application/json")
                    .header("authorization", "Bearer tok-1")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded["status"], serde_json::json!("ok"));
        assert_eq!(decoded["processors"], serde_json::json!([]));
    }
}
