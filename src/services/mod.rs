pub mod document_search;
pub mod gemini_client;
pub mod identity_client;
pub mod llm;

// Re-export for convenience
pub use document_search::{DocumentSearchClient, RpcDocumentSearchClient};
pub use gemini_client::GeminiClient;
pub use identity_client::IdentityServiceAuth;
pub use llm::{EmbeddingClient, GenerativeTextClient};
