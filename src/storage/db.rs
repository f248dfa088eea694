use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY NOT NULL,
        email TEXT,
        role TEXT NOT NULL DEFAULT 'free',
        token_quota INTEGER NOT NULL DEFAULT 0,
        tokens_used INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY NOT NULL,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        messages TEXT NOT NULL DEFAULT '[]',
        total_tokens INTEGER NOT NULL DEFAULT 0,
        model_name TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_conversations_user_updated ON conversations (user_id, updated_at)",
    r#"
    CREATE TABLE IF NOT EXISTS usage_logs (
        id TEXT PRIMARY KEY NOT NULL,
        user_id TEXT NOT NULL,
        feature TEXT NOT NULL,
        tokens_used INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_usage_logs_user ON usage_logs (user_id, created_at)",
];

pub async fn init_db(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    init_db_with_pool(database_url, None).await
}

pub async fn init_db_with_pool(
    database_url: &str,
    max_connections: Option<u32>,
) -> Result<DatabaseConnection, DbErr> {
    tracing::info!("Connecting to database: {}", database_url);

    // Handle special SQLite URL formats
    let db = if database_url == "sqlite::memory:" {
        // Every pooled connection would get its own in-memory database
        let mut options = ConnectOptions::new(database_url);
        options.max_connections(1).sqlx_logging(false);
        Database::connect(options)
            .await
            .map_err(|e| DbErr::Custom(format!("Connection failed: {}", e)))?
    } else if let Some(path_str) = database_url.strip_prefix("sqlite://") {
        let path_str = path_str.split('?').next().unwrap_or(path_str);
        let path = std::path::Path::new(path_str);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DbErr::Custom(format!("Failed to create DB directory: {}", e)))?;
                tracing::info!("Created database directory: {}", parent.display());
            }
        }

        if !path.exists() {
            std::fs::File::create(path)
                .map_err(|e| DbErr::Custom(format!("Failed to create DB file: {}", e)))?;
            tracing::info!("Created database file: {}", path.display());
        }

        let mut options = ConnectOptions::new(database_url);
        options.sqlx_logging(false);
        if let Some(max) = max_connections {
            options.max_connections(max);
        }
        Database::connect(options)
            .await
            .map_err(|e| DbErr::Custom(format!("Connection failed: {}", e)))?
    } else {
        return Err(DbErr::Custom("Invalid SQLite URL format".to_string()));
    };

    tracing::info!("Ensuring schema...");
    for statement in SCHEMA {
        db.execute_unprepared(statement).await?;
    }

    Ok(db)
}
