//! API route handlers for the gateway.

use axum::Json;
use axum::extract::{Query, State};
use cardwise_agent::FALLBACK_ANSWER;
use serde::Deserialize;
use std::sync::Arc;

use super::server::AppState;

/// Query string of `GET /askBot`.
#[derive(Debug, Deserialize)]
pub struct AskParams {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub user_name: String,
}

/// Answer a credit-card question as plain text.
///
/// Always a plain string: orchestration failures and blank or missing
/// queries come back as the fallback answer.
pub async fn ask_bot(State(state): State<Arc<AppState>>, Query(params): Query<AskParams>) -> String {
    let query = params.query.trim();
    if query.is_empty() {
        tracing::debug!("Blank query from '{}'", params.user_name);
        return FALLBACK_ANSWER.to_string();
    }
    state.agent.ask(query, &params.user_name).await
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "cardwise-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.agent.provider_name(),
        "corpus_size": state.agent.corpus_size(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::build_router;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use cardwise_agent::{OrchestratorConfig, RagAgent};
    use cardwise_core::config::GatewayConfig;
    use cardwise_core::error::{CardwiseError, Result};
    use cardwise_core::traits::{GenerateParams, Provider, Retriever};
    use cardwise_core::types::{Document, Message, ProviderResponse, ToolCall, ToolDefinition};
    use tower::ServiceExt;

    /// Calls the retrieval tool when offered, then answers with a fixed line.
    struct CannedProvider;

    #[async_trait]
    impl Provider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn chat(
            &self,
            _messages: &[Message],
            tools: &[ToolDefinition],
            _params: &GenerateParams,
        ) -> Result<ProviderResponse> {
            Ok(match tools.first() {
                Some(tool) => ProviderResponse {
                    tool_calls: vec![ToolCall::new("call_1", tool.name.clone(), "{}")],
                    ..Default::default()
                },
                None => ProviderResponse {
                    content: Some("CardA has no annual fee.".into()),
                    ..Default::default()
                },
            })
        }
    }

    struct Catalog(Vec<Document>);

    #[async_trait]
    impl Retriever for Catalog {
        async fn search(&self, _query: &str, k: usize) -> Result<Vec<Document>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }

        fn len(&self) -> usize {
            self.0.len()
        }
    }

    struct Offline;

    #[async_trait]
    impl Retriever for Offline {
        async fn search(&self, _query: &str, _k: usize) -> Result<Vec<Document>> {
            Err(CardwiseError::IndexUnavailable("not built".into()))
        }

        fn len(&self) -> usize {
            0
        }
    }

    fn test_state(retriever: Arc<dyn Retriever>) -> AppState {
        let agent = RagAgent::new(Arc::new(CannedProvider), retriever, OrchestratorConfig::default());
        AppState::new(GatewayConfig::default(), Arc::new(agent))
    }

    fn catalog_state() -> AppState {
        test_state(Arc::new(Catalog(vec![
            Document::new("CardA", "No annual fee, 2% cashback").with_metadata("name", "CardA"),
        ])))
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let json = health_check(State(Arc::new(catalog_state()))).await.0;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["provider"], "canned");
        assert_eq!(json["corpus_size"], 1);
    }

    #[tokio::test]
    async fn test_ask_bot_handler() {
        let answer = ask_bot(
            State(Arc::new(catalog_state())),
            Query(AskParams {
                query: "Does CardA have an annual fee?".into(),
                user_name: "alice".into(),
            }),
        )
        .await;
        assert_eq!(answer, "CardA has no annual fee.");
    }

    #[tokio::test]
    async fn test_ask_bot_blank_query_gets_fallback() {
        let answer = ask_bot(
            State(Arc::new(catalog_state())),
            Query(AskParams {
                query: "   ".into(),
                user_name: String::new(),
            }),
        )
        .await;
        assert_eq!(answer, FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn test_ask_bot_route_returns_plain_text() {
        let app = build_router(catalog_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/askBot?query=Does%20CardA%20have%20an%20annual%20fee%3F&user_name=alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/plain"));
        assert_eq!(body_text(response).await, "CardA has no annual fee.");
    }

    #[tokio::test]
    async fn test_ask_bot_route_falls_back_when_index_fails() {
        let app = build_router(test_state(Arc::new(Offline)));
        let response = app
            .oneshot(Request::builder().uri("/askBot?query=fees").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn test_ask_bot_route_missing_query_gets_fallback() {
        let app = build_router(catalog_state());
        let response = app
            .oneshot(Request::builder().uri("/askBot?user_name=bob").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, FALLBACK_ANSWER);
    }

    #[tokio::test]
    async fn test_health_route() {
        let app = build_router(catalog_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["service"], "cardwise-gateway");
    }
}
