//! Vendor-neutral chat and embedding types plus the client seams the
//! consultation loop depends on.

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Client not configured: {0}")]
    NotConfigured(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Model,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub args: Value,
}

/// One piece of a chat turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatPart {
    Text(String),
    ToolCall(ToolCall),
    ToolResponse { name: String, content: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub parts: Vec<ChatPart>,
}

impl ChatMessage {
    pub fn text(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ChatPart::Text(text.into())],
        }
    }

    pub fn has_tool_call(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, ChatPart::ToolCall(_)))
    }

    pub fn has_tool_response(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, ChatPart::ToolResponse { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDeclaration>,
    pub system_instruction: Option<String>,
    pub use_pro_model: bool,
}

/// A model reply. `tool_calls` is the vendor's own signal that the model
/// wants tools run; `parts` is the raw structured content of the turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub parts: Vec<ChatPart>,
    pub total_tokens: u64,
}

impl ChatResponse {
    /// Builds a response whose signal and parts agree, the way a
    /// well-formed upstream reply does.
    pub fn from_parts(parts: Vec<ChatPart>, total_tokens: u64) -> Self {
        let text: String = parts
            .iter()
            .filter_map(|p| match p {
                ChatPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        let tool_calls = parts
            .iter()
            .filter_map(|p| match p {
                ChatPart::ToolCall(call) => Some(call.clone()),
                _ => None,
            })
            .collect();

        Self {
            text: if text.trim().is_empty() { None } else { Some(text) },
            tool_calls,
            parts,
            total_tokens,
        }
    }

    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Tool calls recoverable from the structured parts.
    pub fn extract_tool_calls(&self) -> Vec<ToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ChatPart::ToolCall(call) => Some(call.clone()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
    pub token_count: u64,
}

#[async_trait]
pub trait GenerativeTextClient: Send + Sync {
    async fn generate_chat(&self, request: ChatRequest) -> Result<ChatResponse, LlmError>;
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn generate_embedding(&self, text: &str) -> Result<Embedding, LlmError>;
}

/// Rough token count for services that do not report usage.
pub fn estimate_text_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4).max(1)
}
