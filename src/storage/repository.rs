use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{prelude::*, QueryOrder, QuerySelect, Set, TransactionTrait};
use uuid::Uuid;

use crate::models::internal::{
    Conversation, ConversationMessage, SaveConversation, UserProfile, UserRole,
};
use crate::storage::entities::{conversations, usage_logs, users};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DbError(#[from] sea_orm::DbErr),
    #[error("Entity not found: {0}")]
    NotFound(String),
    #[error("Conversation {0} belongs to another user")]
    Forbidden(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

// ============================================
// TRAIT DEFINITIONS
// ============================================
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Creates or appends to a conversation, returning its id.
    async fn save_conversation(&self, save: SaveConversation) -> Result<String, RepositoryError>;

    /// Adds `tokens` to the user's consumed-token ledger.
    async fn record_token_usage(&self, user_id: &str, tokens: u64) -> Result<(), RepositoryError>;

    async fn log_usage(
        &self,
        user_id: &str,
        feature: &str,
        tokens: u64,
    ) -> Result<(), RepositoryError>;

    async fn list_conversations(
        &self,
        user_id: &str,
        limit: u64,
    ) -> Result<Vec<Conversation>, RepositoryError>;

    async fn find_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_profile(&self, user_id: &str) -> Result<Option<UserProfile>, RepositoryError>;

    /// Returns the existing profile or provisions a lowest-tier one.
    async fn find_or_create_profile(
        &self,
        user_id: &str,
        email: Option<&str>,
    ) -> Result<UserProfile, RepositoryError>;

    async fn update_role(&self, user_id: &str, role: UserRole) -> Result<(), RepositoryError>;
}

// ============================================
// IMPLEMENTATION STRUCT
// ============================================
pub struct SeaOrmRepository {
    db: DatabaseConnection,
    default_token_quota: u64,
}

impl SeaOrmRepository {
    pub fn new(db: DatabaseConnection, default_token_quota: u64) -> Self {
        Self {
            db,
            default_token_quota,
        }
    }

    pub fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn insert_conversation<C: ConnectionTrait>(
        conn: &C,
        id: String,
        save: SaveConversation,
        now: DateTime<Utc>,
    ) -> Result<String, RepositoryError> {
        let title = save
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "New consultation".to_string());

        let conversation = conversations::ActiveModel {
            id: Set(id.clone()),
            user_id: Set(save.user_id),
            title: Set(title),
            messages: Set(encode_messages(&save.new_messages)?),
            total_tokens: Set(save.tokens_used as i64),
            model_name: Set(save.model_name),
            created_at: Set(now.to_rfc3339()),
            updated_at: Set(now.to_rfc3339()),
        };

        conversation.insert(conn).await?;
        tracing::info!("Created conversation: {}", id);
        Ok(id)
    }
}

// ============================================
// TRAIT IMPLEMENTATIONS
// ============================================
#[async_trait]
impl ConversationStore for SeaOrmRepository {
    async fn save_conversation(&self, save: SaveConversation) -> Result<String, RepositoryError> {
        if save.new_messages.is_empty() {
            return Err(RepositoryError::InvalidInput(
                "a turn must contain at least one message".to_string(),
            ));
        }

        let now = Utc::now();

        // Read-merge-write of the transcript must not interleave with another turn
        let txn = self.db.begin().await?;

        let existing = match save.conversation_id.as_deref() {
            Some(id) => conversations::Entity::find_by_id(id.to_string())
                .one(&txn)
                .await?,
            None => None,
        };

        let Some(model) = existing else {
            // Unknown or absent id: start a fresh conversation
            let id = Uuid::new_v4().to_string();
            let id = Self::insert_conversation(&txn, id, save, now).await?;
            txn.commit().await?;
            return Ok(id);
        };

        if model.user_id != save.user_id {
            return Err(RepositoryError::Forbidden(model.id));
        }

        let mut messages = decode_messages(&model.messages)?;
        messages.extend(save.new_messages);
        let total_tokens = model.total_tokens.saturating_add(save.tokens_used as i64);
        let id = model.id.clone();

        let mut active_model: conversations::ActiveModel = model.into();
        active_model.messages = Set(encode_messages(&messages)?);
        active_model.total_tokens = Set(total_tokens);
        active_model.model_name = Set(save.model_name);
        active_model.updated_at = Set(now.to_rfc3339());
        active_model.update(&txn).await?;
        txn.commit().await?;

        tracing::debug!("Appended {} messages to conversation {}", messages.len(), id);
        Ok(id)
    }

    async fn record_token_usage(&self, user_id: &str, tokens: u64) -> Result<(), RepositoryError> {
        let result = users::Entity::update_many()
            .col_expr(
                users::Column::TokensUsed,
                Expr::col(users::Column::TokensUsed).add(tokens as i64),
            )
            .col_expr(users::Column::UpdatedAt, Expr::value(Utc::now().to_rfc3339()))
            .filter(users::Column::Id.eq(user_id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::NotFound(format!("user {}", user_id)));
        }
        Ok(())
    }

    async fn log_usage(
        &self,
        user_id: &str,
        feature: &str,
        tokens: u64,
    ) -> Result<(), RepositoryError> {
        let entry = usage_logs::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            user_id: Set(user_id.to_string()),
            feature: Set(feature.to_string()),
            tokens_used: Set(tokens as i64),
            created_at: Set(Utc::now().to_rfc3339()),
        };
        entry.insert(&self.db).await?;
        Ok(())
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        limit: u64,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let models = conversations::Entity::find()
            .filter(conversations::Column::UserId.eq(user_id))
            .order_by_desc(conversations::Column::UpdatedAt)
            .limit(limit)
            .all(&self.db)
            .await?;

        models.into_iter().map(Conversation::try_from).collect()
    }

    async fn find_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let model = conversations::Entity::find_by_id(conversation_id.to_string())
            .filter(conversations::Column::UserId.eq(user_id))
            .one(&self.db)
            .await?;

        model.map(Conversation::try_from).transpose()
    }
}

#[async_trait]
impl UserStore for SeaOrmRepository {
    async fn find_profile(&self, user_id: &str) -> Result<Option<UserProfile>, RepositoryError> {
        let model = users::Entity::find_by_id(user_id.to_string())
            .one(&self.db)
            .await?;

        Ok(model.map(UserProfile::from))
    }

    async fn find_or_create_profile(
        &self,
        user_id: &str,
        email: Option<&str>,
    ) -> Result<UserProfile, RepositoryError> {
        if let Some(profile) = self.find_profile(user_id).await? {
            return Ok(profile);
        }

        let now = Utc::now().to_rfc3339();
        let user = users::ActiveModel {
            id: Set(user_id.to_string()),
            email: Set(email.map(str::to_string)),
            role: Set(UserRole::Free.as_str().to_string()),
            token_quota: Set(self.default_token_quota as i64),
            tokens_used: Set(0),
            created_at: Set(now.clone()),
            updated_at: Set(now),
        };

        let model = user.insert(&self.db).await?;
        tracing::info!("Provisioned user profile: {}", user_id);
        Ok(UserProfile::from(model))
    }

    async fn update_role(&self, user_id: &str, role: UserRole) -> Result<(), RepositoryError> {
        let model = users::Entity::find_by_id(user_id.to_string())
            .one(&self.db)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user_id)))?;

        let mut active_model: users::ActiveModel = model.into();
        active_model.role = Set(role.as_str().to_string());
        active_model.updated_at = Set(Utc::now().to_rfc3339());
        active_model.update(&self.db).await?;
        Ok(())
    }
}

// ============================================
// Conversions
// ============================================

fn encode_messages(messages: &[ConversationMessage]) -> Result<String, RepositoryError> {
    serde_json::to_string(messages).map_err(|e| RepositoryError::InvalidInput(e.to_string()))
}

fn decode_messages(raw: &str) -> Result<Vec<ConversationMessage>, RepositoryError> {
    serde_json::from_str(raw).map_err(|e| RepositoryError::Corrupt(e.to_string()))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Corrupt(format!("timestamp {}: {}", raw, e)))
}

impl TryFrom<conversations::Model> for Conversation {
    type Error = RepositoryError;

    fn try_from(model: conversations::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            messages: decode_messages(&model.messages)?,
            created_at: parse_timestamp(&model.created_at)?,
            updated_at: parse_timestamp(&model.updated_at)?,
            id: model.id,
            user_id: model.user_id,
            title: model.title,
            total_tokens: model.total_tokens.max(0) as u64,
            model_name: model.model_name,
        })
    }
}

impl From<users::Model> for UserProfile {
    fn from(model: users::Model) -> Self {
        Self {
            role: UserRole::parse(&model.role),
            token_quota: model.token_quota.max(0) as u64,
            tokens_used: model.tokens_used.max(0) as u64,
            id: model.id,
            email: model.email,
        }
    }
}
