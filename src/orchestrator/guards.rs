use axum::http::StatusCode;

use crate::api::dto::ConsultationRequest;
use crate::auth::AuthenticatedUser;
use crate::config::ConsultationSettings;
use crate::models::internal::ConversationMessage;
use crate::orchestrator::token_accounting::estimate_turn_tokens;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GuardError {
    #[error("Your membership tier does not include AI consultation")]
    ConsultationNotAllowed,
    #[error("Message must not be empty")]
    EmptyMessage,
    #[error("Message exceeds {max} characters")]
    MessageTooLong { max: usize },
    #[error("Your membership tier does not include the advanced model")]
    ProModelNotAllowed,
    #[error("Insufficient token balance: {required} required, {remaining} remaining")]
    InsufficientTokens { required: u64, remaining: u64 },
}

impl GuardError {
    pub fn status(&self) -> StatusCode {
        match self {
            GuardError::ConsultationNotAllowed | GuardError::ProModelNotAllowed => {
                StatusCode::FORBIDDEN
            }
            GuardError::EmptyMessage | GuardError::MessageTooLong { .. } => {
                StatusCode::BAD_REQUEST
            }
            GuardError::InsufficientTokens { .. } => StatusCode::PAYMENT_REQUIRED,
        }
    }
}

/// A request that passed every pre-stream check.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsultationTurn {
    pub user: AuthenticatedUser,
    pub message: String,
    pub conversation_id: Option<String>,
    pub history: Vec<ConversationMessage>,
    pub use_pro_model: bool,
}

/// Runs the entitlement, input and balance checks in order.
pub fn validate_turn(
    user: AuthenticatedUser,
    request: ConsultationRequest,
    settings: &ConsultationSettings,
) -> Result<ConsultationTurn, GuardError> {
    if !user.role.can_consult() {
        return Err(GuardError::ConsultationNotAllowed);
    }

    let message = request.message.trim();
    if message.is_empty() {
        return Err(GuardError::EmptyMessage);
    }
    if message.chars().count() > settings.max_message_chars {
        return Err(GuardError::MessageTooLong {
            max: settings.max_message_chars,
        });
    }

    let use_pro_model = request.use_pro_model.unwrap_or(false);
    if use_pro_model && !user.role.can_use_pro_model() {
        return Err(GuardError::ProModelNotAllowed);
    }

    let required = estimate_turn_tokens(message, settings.token_estimate_overhead);
    if user.remaining_tokens < required {
        return Err(GuardError::InsufficientTokens {
            required,
            remaining: user.remaining_tokens,
        });
    }

    Ok(ConsultationTurn {
        message: message.to_string(),
        conversation_id: request
            .conversation_id
            .filter(|id| !id.trim().is_empty()),
        history: request.conversation_history.unwrap_or_default(),
        use_pro_model,
        user,
    })
}
