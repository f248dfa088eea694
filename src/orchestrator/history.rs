use crate::models::internal::{ConversationMessage, MessageRole};
use crate::services::llm::{ChatMessage, ChatRole};

/// Maps the transcript onto model messages, preserving order.
pub fn to_chat_messages(history: &[ConversationMessage]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|msg| {
            let role = match msg.role {
                MessageRole::User => ChatRole::User,
                MessageRole::Assistant => ChatRole::Model,
            };
            ChatMessage::text(role, msg.content.clone())
        })
        .collect()
}

/// Title for a new conversation: the first 50 characters of the opening message.
pub fn conversation_title(message: &str) -> String {
    const MAX_CHARS: usize = 50;
    let trimmed = message.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        return trimmed.to_string();
    }
    let prefix: String = trimmed.chars().take(MAX_CHARS).collect();
    format!("{}...", prefix.trim_end())
}
