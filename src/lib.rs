//! Macau Law Knowledge Base - streaming legal consultation service

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod storage;

// Re-export main types for convenience
pub use crate::api::routes::{create_router, AppState};
pub use crate::auth::{AuthProvider, AuthenticatedUser, CurrentUser};
pub use crate::config::{ChatModels, Config, ConsultationSettings};
pub use crate::models::internal::{Conversation, ConversationMessage, UserProfile, UserRole};
pub use crate::orchestrator::{ConsultationOrchestrator, StreamEvent};
pub use crate::services::{GeminiClient, IdentityServiceAuth, RpcDocumentSearchClient};
pub use crate::storage::db::init_db;
pub use crate::storage::repository::{ConversationStore, SeaOrmRepository, UserStore};
