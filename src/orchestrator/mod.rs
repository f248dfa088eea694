pub mod consultation;
pub mod events;
pub mod guards;
pub mod history;
pub mod knowledge_tool;
pub mod token_accounting;

pub use consultation::{ConsultationError, ConsultationOrchestrator};
pub use events::{CompletionSummary, EventSink, StreamEvent};
pub use guards::{validate_turn, ConsultationTurn, GuardError};
