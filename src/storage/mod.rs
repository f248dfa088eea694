pub mod db;
pub mod entities;
pub mod repository;

pub use db::init_db;
pub use entities::{conversations, usage_logs, users};
pub use repository::{ConversationStore, RepositoryError, SeaOrmRepository, UserStore};
