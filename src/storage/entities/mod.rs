pub mod conversations;
pub mod usage_logs;
pub mod users;
