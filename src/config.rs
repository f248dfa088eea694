use serde::Deserialize;
use validator::Validate;

type DefaultBuilder = config::ConfigBuilder<config::builder::DefaultState>;

/// Main configuration for the knowledge base service
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct Config {
    /// HTTP server port
    #[validate(range(min = 1024, max = 65535))]
    pub server_port: u16,

    /// Database URL (SeaORM / SQLite)
    pub database_url: String,

    /// Maximum database connections
    #[validate(range(min = 1, max = 100))]
    pub max_connections: u32,

    /// Log level (e.g., info, debug, trace)
    pub log_level: String,

    /// Generative AI API key
    pub gemini_api_key: String,

    /// Generative AI base URL
    #[validate(url)]
    pub gemini_base_url: String,

    /// Model used for regular consultations
    pub chat_model: String,

    /// Higher-capability model behind the pro entitlement
    pub pro_chat_model: String,

    /// Embedding model used for knowledge base lookups
    pub embedding_model: String,

    /// Hosted identity provider base URL
    #[validate(url)]
    pub identity_url: String,

    /// Public API key sent to the identity provider
    pub identity_api_key: String,

    /// Base URL of the document store exposing the similarity RPC
    #[validate(url)]
    pub document_search_url: String,

    /// Service key for the document store
    pub document_search_key: String,

    /// Name of the vector-similarity RPC function
    pub document_search_function: String,

    /// Number of documents requested per knowledge base lookup
    #[validate(range(min = 1, max = 100))]
    pub search_result_count: u32,

    /// Upper bound on tool-call rounds within one consultation turn
    #[validate(range(min = 1, max = 20))]
    pub max_tool_rounds: u32,

    /// Token cost multiplier applied when the pro model is used
    #[validate(range(min = 1.0, max = 10.0))]
    pub pro_model_multiplier: f64,

    /// Maximum consultation message length in characters
    #[validate(range(min = 1))]
    pub max_message_chars: usize,

    /// Fixed overhead added to the pre-flight token estimate
    pub token_estimate_overhead: u64,

    /// Token quota granted to newly provisioned users
    pub default_token_quota: u64,

    /// Consultation requests per minute per client
    #[validate(range(min = 1))]
    pub rate_limit_per_minute: u32,

    /// Whether permissive CORS is enabled
    pub cors_enabled: bool,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally layering an explicit file between the
    /// home-directory file and environment overrides.
    pub fn load_from(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Self::defaults()?
            // Load from ~/.macau-law/config.toml (if present)
            .add_source(
                config::File::with_name(&format!(
                    "{}/.macau-law/config",
                    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
                ))
                .required(false),
            );

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let settings = builder
            // Environment overrides: MACAU_LAW__SERVER_PORT, MACAU_LAW__GEMINI_API_KEY, etc.
            .add_source(config::Environment::with_prefix("MACAU_LAW").separator("__"))
            .build()?;

        let cfg: Config = settings.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    fn defaults() -> Result<DefaultBuilder, config::ConfigError> {
        config::Config::builder()
            .set_default("server_port", 8080)?
            .set_default("max_connections", 10)?
            .set_default("log_level", "info")?
            .set_default("database_url", "sqlite://macau-law.db")?
            .set_default("gemini_api_key", "")?
            .set_default("gemini_base_url", "https://generativelanguage.googleapis.com")?
            .set_default("chat_model", "gemini-2.5-flash")?
            .set_default("pro_chat_model", "gemini-2.5-pro")?
            .set_default("embedding_model", "text-embedding-004")?
            .set_default("identity_url", "http://localhost:54321")?
            .set_default("identity_api_key", "")?
            .set_default("document_search_url", "http://localhost:54321")?
            .set_default("document_search_key", "")?
            .set_default("document_search_function", "match_documents")?
            .set_default("search_result_count", 20u32)?
            .set_default("max_tool_rounds", 5u32)?
            .set_default("pro_model_multiplier", 2.0)?
            .set_default("max_message_chars", 2000u32)?
            .set_default("token_estimate_overhead", 1000u32)?
            .set_default("default_token_quota", 10000u32)?
            .set_default("rate_limit_per_minute", 30u32)?
            .set_default("cors_enabled", true)
    }

    pub fn chat_models(&self) -> ChatModels {
        ChatModels {
            standard: self.chat_model.clone(),
            pro: self.pro_chat_model.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_port: 8080,
            database_url: "sqlite://macau-law.db".to_string(),
            max_connections: 10,
            log_level: "info".to_string(),
            gemini_api_key: String::new(),
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            chat_model: "gemini-2.5-flash".to_string(),
            pro_chat_model: "gemini-2.5-pro".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            identity_url: "http://localhost:54321".to_string(),
            identity_api_key: String::new(),
            document_search_url: "http://localhost:54321".to_string(),
            document_search_key: String::new(),
            document_search_function: "match_documents".to_string(),
            search_result_count: 20,
            max_tool_rounds: 5,
            pro_model_multiplier: 2.0,
            max_message_chars: 2000,
            token_estimate_overhead: 1000,
            default_token_quota: 10000,
            rate_limit_per_minute: 30,
            cors_enabled: true,
        }
    }
}

/// Chat model names for the standard and pro tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatModels {
    pub standard: String,
    pub pro: String,
}

impl ChatModels {
    /// Model used for generation, and recorded against the conversation.
    pub fn model_for(&self, use_pro_model: bool) -> &str {
        if use_pro_model {
            &self.pro
        } else {
            &self.standard
        }
    }
}

impl Default for ChatModels {
    fn default() -> Self {
        Config::default().chat_models()
    }
}

/// Subset of configuration the consultation loop reads on every turn.
#[derive(Debug, Clone)]
pub struct ConsultationSettings {
    pub models: ChatModels,
    pub search_result_count: usize,
    pub max_tool_rounds: u32,
    pub pro_model_multiplier: f64,
    pub max_message_chars: usize,
    pub token_estimate_overhead: u64,
}

impl From<&Config> for ConsultationSettings {
    fn from(cfg: &Config) -> Self {
        ConsultationSettings {
            models: cfg.chat_models(),
            search_result_count: cfg.search_result_count as usize,
            max_tool_rounds: cfg.max_tool_rounds,
            pro_model_multiplier: cfg.pro_model_multiplier,
            max_message_chars: cfg.max_message_chars,
            token_estimate_overhead: cfg.token_estimate_overhead,
        }
    }
}

impl Default for ConsultationSettings {
    fn default() -> Self {
        ConsultationSettings::from(&Config::default())
    }
}
