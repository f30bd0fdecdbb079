//! Language-model provider boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Message, ProviderResponse, ToolDefinition};

/// How strongly the model is pushed towards calling a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// Model decides.
    #[default]
    Auto,
    /// Model must call some tool.
    Required,
}

/// Sampling parameters for one chat call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub tool_choice: ToolChoice,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: 0.0,
            max_tokens: 512,
            tool_choice: ToolChoice::Auto,
        }
    }
}

/// A chat-completion backend.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        params: &GenerateParams,
    ) -> Result<ProviderResponse>;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    /// Plain generation: the reply never carries tool calls.
    async fn invoke(&self, messages: &[Message], params: &GenerateParams) -> Result<Message> {
        let mut response = self.chat(messages, &[], params).await?;
        response.tool_calls.clear();
        Ok(response.into_message())
    }

    /// Generation with declared tools: the reply may set `tool_calls`.
    async fn invoke_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        params: &GenerateParams,
    ) -> Result<Message> {
        Ok(self.chat(messages, tools, params).await?.into_message())
    }
}
