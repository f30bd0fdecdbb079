//! Unified OpenAI-compatible provider.
//!
//! One struct handles chat completions (with tool calling) and embeddings for
//! every backend in the registry. Backends are distinguished only by endpoint
//! URL, auth style and API key.

use async_trait::async_trait;
use cardwise_core::config::LlmConfig;
use cardwise_core::error::{CardwiseError, Result};
use cardwise_core::traits::{Embedder, GenerateParams, Provider, ToolChoice};
use cardwise_core::types::{FunctionCall, Message, ProviderResponse, ToolCall, ToolDefinition, Usage};
use serde_json::{Value, json};

use crate::provider_registry::{AuthStyle, ProviderConfig};

/// A unified provider that works with any OpenAI-compatible API.
pub struct OpenAiCompatibleProvider {
    /// Provider name (e.g., "openai", "groq", "ollama").
    name: String,
    api_key: String,
    /// Base URL for the API (e.g., "https://api.openai.com/v1").
    base_url: String,
    chat_path: String,
    embeddings_path: Option<String>,
    embedding_model: String,
    auth_style: AuthStyle,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    /// Create from a known provider config.
    ///
    /// Resolution order:
    /// - API key: `llm.api_key` > env vars > empty
    /// - Base URL: `llm.endpoint` > env override > registry default
    pub fn from_registry(registry: &ProviderConfig, llm: &LlmConfig) -> Result<Self> {
        let api_key = if !llm.api_key.is_empty() {
            llm.api_key.clone()
        } else {
            registry
                .env_keys
                .iter()
                .find_map(|key| std::env::var(key).ok())
                .unwrap_or_default()
        };

        let base_url = if !llm.endpoint.is_empty() {
            llm.endpoint.trim_end_matches('/').to_string()
        } else {
            registry
                .base_url_env
                .and_then(|env_key| {
                    let val = std::env::var(env_key).ok()?;
                    // OLLAMA_HOST / LLAMACPP_HOST are usually bare hosts
                    if val.ends_with("/v1") {
                        Some(val)
                    } else {
                        Some(format!("{}/v1", val.trim_end_matches('/')))
                    }
                })
                .unwrap_or_else(|| registry.base_url.to_string())
        };

        Ok(Self {
            name: registry.name.to_string(),
            api_key,
            base_url,
            chat_path: registry.chat_path.to_string(),
            embeddings_path: registry.embeddings_path.map(String::from),
            embedding_model: String::new(),
            auth_style: registry.auth_style,
            client: reqwest::Client::new(),
        })
    }

    /// Create for a custom endpoint (e.g., "custom:https://my-server.com/v1").
    pub fn custom(endpoint: &str, llm: &LlmConfig) -> Result<Self> {
        let base_url = endpoint
            .strip_prefix("custom:")
            .unwrap_or(endpoint)
            .trim_end_matches('/')
            .to_string();
        if base_url.is_empty() {
            return Err(CardwiseError::Config("custom provider needs a URL".into()));
        }

        let api_key = if !llm.api_key.is_empty() {
            llm.api_key.clone()
        } else {
            std::env::var("CUSTOM_API_KEY").unwrap_or_default()
        };

        let auth_style = if api_key.is_empty() {
            AuthStyle::None
        } else {
            AuthStyle::Bearer
        };

        Ok(Self {
            name: "custom".to_string(),
            api_key,
            base_url,
            chat_path: "/chat/completions".to_string(),
            embeddings_path: Some("/embeddings".to_string()),
            embedding_model: String::new(),
            auth_style,
            client: reqwest::Client::new(),
        })
    }

    /// Model used by the `Embedder` implementation.
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_style {
            AuthStyle::Bearer if !self.api_key.is_empty() => {
                req.header("Authorization", format!("Bearer {}", self.api_key))
            }
            _ => req,
        }
    }

    fn require_key(&self) -> Result<()> {
        if self.auth_style != AuthStyle::None && self.api_key.is_empty() {
            return Err(CardwiseError::ApiKeyMissing(self.name.clone()));
        }
        Ok(())
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<std::result::Result<Value, (u16, String)>> {
        let req = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        let resp = self.apply_auth(req).send().await.map_err(|e| {
            CardwiseError::Http(format!("{} connection failed ({}): {}", self.name, url, e))
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Ok(Err((status.as_u16(), text)));
        }
        let json = resp
            .json::<Value>()
            .await
            .map_err(|e| CardwiseError::Http(format!("{} sent invalid JSON: {}", self.name, e)))?;
        Ok(Ok(json))
    }

    fn status_error(&self, status: u16, text: &str) -> CardwiseError {
        let detail = format!("{} API error {}: {}", self.name, status, text);
        if status == 429 || status >= 500 {
            CardwiseError::ModelInvocation(detail)
        } else {
            CardwiseError::ModelRejected(detail)
        }
    }
}

/// Serialize one conversation message into the OpenAI chat wire format.
pub fn message_to_wire(msg: &Message) -> Value {
    match msg {
        Message::System { content } => json!({ "role": "system", "content": content }),
        Message::Human { content } => json!({ "role": "user", "content": content }),
        Message::Ai { content, tool_calls } if tool_calls.is_empty() => {
            json!({ "role": "assistant", "content": content })
        }
        Message::Ai { content, tool_calls } => json!({
            "role": "assistant",
            "content": if content.is_empty() { Value::Null } else { Value::String(content.clone()) },
            "tool_calls": tool_calls
                .iter()
                .map(|tc| json!({
                    "id": tc.id,
                    "type": "function",
                    "function": { "name": tc.function.name, "arguments": tc.function.arguments },
                }))
                .collect::<Vec<_>>(),
        }),
        Message::Tool {
            content,
            tool_call_id,
            ..
        } => json!({ "role": "tool", "content": content, "tool_call_id": tool_call_id }),
    }
}

/// Build the chat-completions request body.
pub fn build_chat_body(messages: &[Message], tools: &[ToolDefinition], params: &GenerateParams) -> Value {
    let mut body = json!({
        "model": params.model,
        "temperature": params.temperature,
        "max_tokens": params.max_tokens,
        "messages": messages.iter().map(message_to_wire).collect::<Vec<_>>(),
    });

    if !tools.is_empty() {
        let tool_defs: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(tool_defs);
        body["tool_choice"] = match params.tool_choice {
            ToolChoice::Auto => json!("auto"),
            ToolChoice::Required => json!("required"),
        };
    }
    body
}

/// Parse a chat-completions response body.
pub fn parse_chat_response(json: &Value) -> Result<ProviderResponse> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| CardwiseError::ModelInvocation("No choices in response".into()))?;

    let content = choice["message"]["content"].as_str().map(String::from);

    let tool_calls = choice["message"]["tool_calls"]
        .as_array()
        .map(|tc| {
            tc.iter()
                .filter_map(|t| {
                    Some(ToolCall {
                        id: t["id"].as_str().unwrap_or("").to_string(),
                        r#type: "function".to_string(),
                        function: FunctionCall {
                            name: t["function"]["name"].as_str()?.to_string(),
                            arguments: t["function"]["arguments"].as_str().unwrap_or("{}").to_string(),
                        },
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = json["usage"].as_object().map(|u| Usage {
        prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        completion_tokens: u
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32,
        total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
    });

    Ok(ProviderResponse {
        content,
        tool_calls,
        finish_reason: choice["finish_reason"].as_str().map(String::from),
        usage,
    })
}

/// Parse an embeddings response, ordering vectors by their `index` field.
pub fn parse_embeddings_response(json: &Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json["data"]
        .as_array()
        .ok_or_else(|| CardwiseError::Embedding("No data in embeddings response".into()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = data
        .iter()
        .enumerate()
        .map(|(pos, item)| {
            let index = item["index"].as_u64().map(|i| i as usize).unwrap_or(pos);
            let vector = item["embedding"]
                .as_array()
                .map(|v| v.iter().filter_map(|x| x.as_f64()).map(|x| x as f32).collect())
                .unwrap_or_default();
            (index, vector)
        })
        .collect();
    indexed.sort_by_key(|(i, _)| *i);

    if indexed.len() != expected {
        return Err(CardwiseError::Embedding(format!(
            "expected {expected} vectors, got {}",
            indexed.len()
        )));
    }
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn is_tools_unsupported(text: &str) -> bool {
    text.contains("does not support tools")
        || text.contains("tool_use is not supported")
        || text.contains("does not support function")
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        params: &GenerateParams,
    ) -> Result<ProviderResponse> {
        self.require_key()?;

        let url = format!("{}{}", self.base_url, self.chat_path);
        let mut body = build_chat_body(messages, tools, params);

        match self.post_json(&url, &body).await? {
            Ok(json) => parse_chat_response(&json),
            // Small local models often reject function calling outright
            Err((400, text)) if !tools.is_empty() && is_tools_unsupported(&text) => {
                tracing::warn!(
                    "Model '{}' doesn't support tools, retrying without tools",
                    params.model
                );
                if let Some(m) = body.as_object_mut() {
                    m.remove("tools");
                    m.remove("tool_choice");
                }
                match self.post_json(&url, &body).await? {
                    Ok(json) => {
                        let mut resp = parse_chat_response(&json)?;
                        resp.tool_calls.clear();
                        Ok(resp)
                    }
                    Err((status, text)) => Err(self.status_error(status, &text)),
                }
            }
            Err((status, text)) => Err(self.status_error(status, &text)),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        if self.auth_style != AuthStyle::None {
            // Cloud providers: a configured key is the best cheap signal
            return Ok(!self.api_key.is_empty());
        }
        let url = format!("{}/models", self.base_url);
        Ok(self.client.get(&url).send().await.is_ok())
    }
}

#[async_trait]
impl Embedder for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.require_key()?;
        let path = self.embeddings_path.as_deref().ok_or_else(|| {
            CardwiseError::Config(format!("{} has no embeddings endpoint", self.name))
        })?;

        let url = format!("{}{}", self.base_url, path);
        let body = json!({ "model": self.embedding_model, "input": texts });
        match self.post_json(&url, &body).await? {
            Ok(json) => parse_embeddings_response(&json, texts.len()),
            Err((status, text)) => Err(CardwiseError::Embedding(format!(
                "{} embeddings error {}: {}",
                self.name, status, text
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_to_wire_roles() {
        assert_eq!(message_to_wire(&Message::human("hi"))["role"], "user");
        assert_eq!(message_to_wire(&Message::system("s"))["role"], "system");

        let call = ToolCall::new("call_9", "retrieve_credit_cards", r#"{"query":"fees"}"#);
        let wire = message_to_wire(&Message::ai_with_tool_calls("", vec![call]));
        assert_eq!(wire["role"], "assistant");
        assert!(wire["content"].is_null());
        assert_eq!(wire["tool_calls"][0]["id"], "call_9");
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "retrieve_credit_cards");

        let wire = message_to_wire(&Message::tool("Content: x", "call_9", 1));
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_9");
        // turn ids stay internal
        assert!(wire.get("turn").is_none());
    }

    #[test]
    fn test_build_chat_body_tool_choice() {
        let tool = ToolDefinition {
            name: "retrieve_credit_cards".into(),
            description: "search".into(),
            parameters: json!({"type": "object"}),
        };
        let params = GenerateParams {
            tool_choice: ToolChoice::Required,
            ..Default::default()
        };
        let body = build_chat_body(&[Message::human("q")], &[tool], &params);
        assert_eq!(body["tool_choice"], "required");
        assert_eq!(body["tools"][0]["function"]["name"], "retrieve_credit_cards");

        let body = build_chat_body(&[Message::human("q")], &[], &params);
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn test_parse_chat_response_with_tool_calls() {
        let json = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "retrieve_credit_cards", "arguments": "{\"query\":\"fee\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let resp = parse_chat_response(&json).unwrap();
        assert!(resp.content.is_none());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].id, "call_1");
        assert_eq!(resp.usage.unwrap().total_tokens, 15);
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_parse_chat_response_without_choices() {
        let err = parse_chat_response(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, CardwiseError::ModelInvocation(_)));
    }

    #[test]
    fn test_parse_embeddings_orders_by_index() {
        let json = json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_embeddings_response(&json, 2).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0]);

        assert!(parse_embeddings_response(&json, 3).is_err());
    }

    #[test]
    fn test_status_error_classification() {
        let provider = OpenAiCompatibleProvider::custom("custom:http://localhost:1/v1", &LlmConfig::default()).unwrap();
        assert!(provider.status_error(503, "busy").is_retryable());
        assert!(provider.status_error(429, "slow down").is_retryable());
        assert!(!provider.status_error(401, "bad key").is_retryable());
    }

    #[test]
    fn test_custom_endpoint_trims_prefix() {
        let provider = OpenAiCompatibleProvider::custom("custom:http://gpu-box:9000/v1/", &LlmConfig::default()).unwrap();
        assert_eq!(provider.base_url(), "http://gpu-box:9000/v1");
        assert!(OpenAiCompatibleProvider::custom("custom:", &LlmConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_missing_api_key_is_reported() {
        let registry = crate::provider_registry::get_provider_config("groq").unwrap();
        let llm = LlmConfig::default();
        // Only meaningful when the environment does not provide a key
        if std::env::var("GROQ_API_KEY").is_ok() {
            return;
        }
        let provider = OpenAiCompatibleProvider::from_registry(registry, &llm).unwrap();
        let err = provider
            .chat(&[Message::human("hi")], &[], &GenerateParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CardwiseError::ApiKeyMissing(name) if name == "groq"));
    }
}
