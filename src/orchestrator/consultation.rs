use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ConsultationSettings;
use crate::models::internal::{ConversationMessage, SaveConversation};
use crate::orchestrator::events::{CompletionSummary, Disconnected, EventSink, StreamEvent};
use crate::orchestrator::guards::ConsultationTurn;
use crate::orchestrator::history::{conversation_title, to_chat_messages};
use crate::orchestrator::knowledge_tool;
use crate::orchestrator::token_accounting::{apply_surcharge, TokenLedger};
use crate::services::document_search::{DocumentSearchClient, SearchError};
use crate::services::llm::{
    ChatMessage, ChatPart, ChatRequest, ChatResponse, ChatRole, EmbeddingClient,
    GenerativeTextClient, LlmError, ToolCall,
};
use crate::storage::repository::ConversationStore;

/// Usage-log feature tag for consultation turns.
pub const FEATURE_TAG: &str = "ai_consultation";

const EVENT_BUFFER: usize = 32;

/// A generated answer waiting to be charged and saved.
struct AnsweredTurn {
    user_message: ConversationMessage,
    assistant: ConversationMessage,
    tokens_used: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsultationError {
    #[error(transparent)]
    Disconnected(#[from] Disconnected),
    #[error("Generation failed: {0}")]
    Generation(#[from] LlmError),
    #[error("Knowledge base search failed: {0}")]
    Search(#[from] SearchError),
    #[error("Model returned no usable response")]
    EmptyResponse,
    #[error("Model signalled tool calls but none could be extracted")]
    MalformedToolCalls,
    #[error("Tool-call limit of {0} rounds exceeded")]
    ToolRoundsExceeded(u32),
}

impl ConsultationError {
    /// Text shown to the client in the terminal `error` event.
    pub fn user_message(&self) -> String {
        match self {
            ConsultationError::EmptyResponse => {
                "The AI service did not return a usable response. Please try again.".to_string()
            }
            ConsultationError::ToolRoundsExceeded(max) => format!(
                "The consultation needed more than {} knowledge base lookups. Please narrow down your question.",
                max
            ),
            _ => "An error occurred while processing your consultation. Please try again later."
                .to_string(),
        }
    }
}

/// Drives one consultation turn: generation, knowledge base tool rounds,
/// accounting, persistence and event emission.
pub struct ConsultationOrchestrator {
    chat: Arc<dyn GenerativeTextClient>,
    embeddings: Arc<dyn EmbeddingClient>,
    search: Arc<dyn DocumentSearchClient>,
    store: Arc<dyn ConversationStore>,
    settings: ConsultationSettings,
}

impl ConsultationOrchestrator {
    pub fn new(
        chat: Arc<dyn GenerativeTextClient>,
        embeddings: Arc<dyn EmbeddingClient>,
        search: Arc<dyn DocumentSearchClient>,
        store: Arc<dyn ConversationStore>,
        settings: ConsultationSettings,
    ) -> Self {
        Self {
            chat,
            embeddings,
            search,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &ConsultationSettings {
        &self.settings
    }

    /// Spawns the turn and hands back the receiving end of its event stream.
    pub fn start(self: &Arc<Self>, turn: ConsultationTurn) -> mpsc::Receiver<StreamEvent> {
        let (sink, receiver) = EventSink::channel(EVENT_BUFFER);
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.run(turn, sink).await;
        });
        receiver
    }

    /// Runs the turn to completion and emits exactly one terminal event.
    /// The stream closes when `sink` is dropped at the end of this call.
    ///
    /// Only answer generation races the consumer. Once an answer exists it
    /// is charged and saved even if the client has already left.
    pub async fn run(&self, turn: ConsultationTurn, sink: EventSink) {
        info!(
            user_id = %turn.user.id,
            pro = turn.use_pro_model,
            conversation_id = ?turn.conversation_id,
            "Consultation turn started"
        );

        let outcome = tokio::select! {
            biased;
            _ = sink.closed() => Err(ConsultationError::Disconnected(Disconnected)),
            result = self.answer(&turn, &sink) => result,
        };

        let answered = match outcome {
            Ok(answered) => answered,
            Err(ConsultationError::Disconnected(_)) => {
                info!(user_id = %turn.user.id, "Client disconnected, turn abandoned");
                return;
            }
            Err(e) => {
                error!(user_id = %turn.user.id, "Consultation turn failed: {}", e);
                let _ = sink.emit(StreamEvent::Error(e.user_message())).await;
                return;
            }
        };

        let tokens_used = answered.tokens_used;
        let conversation_id = self.persist(&turn, answered).await;
        let summary = CompletionSummary {
            conversation_id,
            tokens_used,
            remaining_tokens: turn.user.remaining_tokens.saturating_sub(tokens_used),
        };

        info!(
            user_id = %turn.user.id,
            conversation_id = %summary.conversation_id,
            tokens_used = summary.tokens_used,
            "Consultation turn completed"
        );
        if sink.emit(StreamEvent::Completion(summary)).await.is_err() {
            debug!("Client left before the completion event");
        }
    }

    async fn answer(
        &self,
        turn: &ConsultationTurn,
        sink: &EventSink,
    ) -> Result<AnsweredTurn, ConsultationError> {
        sink.step("Processing your question...").await?;

        let mut history = turn.history.clone();
        let user_message = ConversationMessage::user(turn.message.clone());
        history.push(user_message.clone());

        sink.step("Generating response...").await?;

        let mut messages = to_chat_messages(&history);
        let mut ledger = TokenLedger::new();
        let mut provenance: Vec<String> = Vec::new();

        let mut response = self.generate(&messages, turn.use_pro_model).await?;
        ledger.add(response.total_tokens);
        if response.text.is_none() && !response.requests_tools() {
            return Err(ConsultationError::EmptyResponse);
        }

        let mut rounds = 0u32;
        while response.requests_tools() {
            rounds += 1;
            if rounds > self.settings.max_tool_rounds {
                return Err(ConsultationError::ToolRoundsExceeded(
                    self.settings.max_tool_rounds,
                ));
            }

            if let Some(text) = response.text.as_ref() {
                sink.emit(StreamEvent::ResponseChunk(text.clone())).await?;
            }
            sink.step("Processing knowledge base requests...").await?;

            let calls = response.extract_tool_calls();
            if calls.is_empty() {
                return Err(ConsultationError::MalformedToolCalls);
            }
            debug!(round = rounds, calls = calls.len(), "Running tool calls");

            let mut tool_parts = Vec::with_capacity(calls.len());
            for call in &calls {
                let content = self
                    .run_tool(call, sink, &mut ledger, &mut provenance)
                    .await?;
                tool_parts.push(ChatPart::ToolResponse {
                    name: call.name.clone(),
                    content,
                });
            }

            messages.push(ChatMessage {
                role: ChatRole::Model,
                parts: response.parts.clone(),
            });
            messages.push(ChatMessage {
                role: ChatRole::User,
                parts: tool_parts,
            });

            sink.step("Continuing response generation...").await?;
            response = self.generate(&messages, turn.use_pro_model).await?;
            ledger.add(response.total_tokens);
        }

        let text = response.text.ok_or(ConsultationError::EmptyResponse)?;
        sink.emit(StreamEvent::ResponseChunk(text.clone())).await?;

        let tokens_used = apply_surcharge(
            ledger.total(),
            turn.use_pro_model,
            self.settings.pro_model_multiplier,
        );

        let assistant = ConversationMessage::assistant(text, provenance, tokens_used);
        history.push(assistant.clone());
        debug!(messages = history.len(), tokens_used, "Turn transcript assembled");

        Ok(AnsweredTurn {
            user_message,
            assistant,
            tokens_used,
        })
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        use_pro_model: bool,
    ) -> Result<ChatResponse, ConsultationError> {
        let request = ChatRequest {
            messages: messages.to_vec(),
            tools: vec![knowledge_tool::declaration()],
            system_instruction: Some(knowledge_tool::SYSTEM_INSTRUCTION.to_string()),
            use_pro_model,
        };
        Ok(self.chat.generate_chat(request).await?)
    }

    async fn run_tool(
        &self,
        call: &ToolCall,
        sink: &EventSink,
        ledger: &mut TokenLedger,
        provenance: &mut Vec<String>,
    ) -> Result<String, ConsultationError> {
        if call.name != knowledge_tool::TOOL_NAME {
            warn!("Model requested unknown tool: {}", call.name);
            return Ok(format!("Tool '{}' is not available.", call.name));
        }

        let Some(keywords) = knowledge_tool::keywords(call) else {
            warn!("Knowledge base tool called without keywords: {}", call.args);
            return Ok("No search keywords were provided.".to_string());
        };

        sink.step(format!("Generating search embedding for \"{}\"...", keywords))
            .await?;
        let embedding = self.embeddings.generate_embedding(&keywords).await?;
        ledger.add(embedding.token_count);

        sink.step("Searching legal documents...").await?;
        let documents = self
            .search
            .search_documents(&embedding.values, self.settings.search_result_count)
            .await?;

        if documents.is_empty() {
            sink.emit(StreamEvent::Error(format!(
                "No relevant legal documents found for \"{}\"",
                keywords
            )))
            .await?;
            return Ok(String::new());
        }

        for doc in &documents {
            if !provenance.contains(&doc.id) {
                provenance.push(doc.id.clone());
            }
        }
        debug!(hits = documents.len(), "Knowledge base search completed");

        Ok(knowledge_tool::render_results(&keywords, &documents))
    }

    /// Records usage and saves the turn. Never fails: storage faults are
    /// logged and the conversation id falls back to a temporary one.
    async fn persist(&self, turn: &ConsultationTurn, answered: AnsweredTurn) -> String {
        let tokens_used = answered.tokens_used;
        if let Err(e) = self
            .store
            .record_token_usage(&turn.user.id, tokens_used)
            .await
        {
            warn!(user_id = %turn.user.id, "Failed to update token ledger: {}", e);
        }

        let save = SaveConversation {
            user_id: turn.user.id.clone(),
            conversation_id: turn.conversation_id.clone(),
            new_messages: vec![answered.user_message, answered.assistant],
            title: Some(conversation_title(&turn.message)),
            tokens_used,
            model_name: self
                .settings
                .models
                .model_for(turn.use_pro_model)
                .to_string(),
        };

        let conversation_id = match self.store.save_conversation(save).await {
            Ok(id) => id,
            Err(e) => {
                let fallback = fallback_conversation_id();
                warn!(
                    user_id = %turn.user.id,
                    fallback = %fallback,
                    "Failed to save conversation: {}",
                    e
                );
                fallback
            }
        };

        if let Err(e) = self
            .store
            .log_usage(&turn.user.id, FEATURE_TAG, tokens_used)
            .await
        {
            warn!(user_id = %turn.user.id, "Failed to write usage log (ignored): {}", e);
        }

        conversation_id
    }
}

pub fn fallback_conversation_id() -> String {
    format!("temp-{}", Uuid::new_v4())
}
