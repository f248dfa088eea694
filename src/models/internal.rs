use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One entry of a consultation transcript, in the shape the web client
/// sends back as `conversationHistory`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            document_ids: None,
            tokens_used: None,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        document_ids: Vec<String>,
        tokens_used: u64,
    ) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            document_ids: Some(document_ids),
            tokens_used: Some(tokens_used),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub messages: Vec<ConversationMessage>,
    pub total_tokens: u64,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for persisting one finished turn.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveConversation {
    pub user_id: String,
    pub conversation_id: Option<String>,
    /// Messages produced by this turn only (user message, then assistant reply).
    pub new_messages: Vec<ConversationMessage>,
    pub title: Option<String>,
    pub tokens_used: u64,
    pub model_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Free,
    Member,
    Vip,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Free => "free",
            UserRole::Member => "member",
            UserRole::Vip => "vip",
            UserRole::Admin => "admin",
        }
    }

    /// Unknown role strings fall back to the lowest tier.
    pub fn parse(value: &str) -> Self {
        value.parse().unwrap_or(UserRole::Free)
    }

    pub fn can_consult(&self) -> bool {
        *self >= UserRole::Member
    }

    pub fn can_use_pro_model(&self) -> bool {
        *self >= UserRole::Vip
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    /// Strict parsing for operator input. Unknown names are an error.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(UserRole::Free),
            "member" => Ok(UserRole::Member),
            "vip" => Ok(UserRole::Vip),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!(
                "unknown role '{}', expected free, member, vip or admin",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub id: String,
    pub email: Option<String>,
    pub role: UserRole,
    pub token_quota: u64,
    pub tokens_used: u64,
}

impl UserProfile {
    pub fn remaining_tokens(&self) -> u64 {
        self.token_quota.saturating_sub(self.tokens_used)
    }
}

/// A legal document hit returned by the similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SearchDocument {
    pub id: String,
    pub content: String,
    #[schema(value_type = Object)]
    pub metadata: Value,
    pub similarity: f32,
}

impl SearchDocument {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}
