use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::internal::{Conversation, ConversationMessage, SearchDocument};

// ==================== REQUEST DTOs ====================

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Option<Vec<ConversationMessage>>,
    #[serde(default)]
    pub use_pro_model: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct LegalSearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<u64>,
}

// ==================== RESPONSE DTOs ====================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LegalSearchResponse {
    pub documents: Vec<SearchDocument>,
    pub tokens_used: u64,
    pub remaining_tokens: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummaryDto {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub total_tokens: u64,
    pub model_name: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Conversation> for ConversationSummaryDto {
    fn from(c: &Conversation) -> Self {
        Self {
            id: c.id.clone(),
            title: c.title.clone(),
            message_count: c.messages.len(),
            total_tokens: c.total_tokens,
            model_name: c.model_name.clone(),
            created_at: c.created_at.to_rfc3339(),
            updated_at: c.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationSummaryDto>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetailResponse {
    pub id: String,
    pub title: String,
    pub messages: Vec<ConversationMessage>,
    pub total_tokens: u64,
    pub model_name: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Conversation> for ConversationDetailResponse {
    fn from(c: Conversation) -> Self {
        Self {
            created_at: c.created_at.to_rfc3339(),
            updated_at: c.updated_at.to_rfc3339(),
            id: c.id,
            title: c.title,
            messages: c.messages,
            total_tokens: c.total_tokens,
            model_name: c.model_name,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u32,
}
