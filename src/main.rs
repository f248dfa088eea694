use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use macau_law_kb::{
    api::{rate_limiter::RateLimiter, routes},
    config::{Config, ConsultationSettings},
    models::internal::UserRole,
    orchestrator::ConsultationOrchestrator,
    services::{GeminiClient, IdentityServiceAuth, RpcDocumentSearchClient},
    storage::{self, SeaOrmRepository, UserStore},
};

#[derive(Parser, Debug)]
#[command(name = "macau-law-kb", version, about = "Macau law knowledge base server")]
struct Cli {
    /// Configuration file layered over defaults and ~/.macau-law/config
    #[arg(short, long)]
    config: Option<String>,

    /// Override the configured server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen on all interfaces instead of loopback
    #[arg(long)]
    public: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Assign a tier to a user, provisioning the profile if it does not exist yet
    SetRole {
        user_id: String,
        /// free, member, vip or admin
        role: UserRole,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load_from(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server_port = port;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("macau_law_kb={}", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(config);

    let db_conn =
        storage::db::init_db_with_pool(&config.database_url, Some(config.max_connections)).await?;
    let repository = Arc::new(SeaOrmRepository::new(db_conn, config.default_token_quota));

    if let Some(Command::SetRole { user_id, role }) = cli.command {
        let profile = repository.find_or_create_profile(&user_id, None).await?;
        repository.update_role(&profile.id, role).await?;
        tracing::info!("Role of {} set to {}", profile.id, role.as_str());
        return Ok(());
    }

    let gemini = Arc::new(GeminiClient::from_config(&config));
    match gemini.health_check().await {
        Ok(true) => tracing::info!("Generative AI service reachable"),
        Ok(false) => tracing::warn!("Generative AI health check returned false"),
        Err(e) => tracing::warn!(
            "Generative AI service not available: {}. Consultations will fail until it is.",
            e
        ),
    }

    let search = Arc::new(RpcDocumentSearchClient::from_config(&config));
    let auth = Arc::new(IdentityServiceAuth::from_config(&config, repository.clone()));

    let orchestrator = Arc::new(ConsultationOrchestrator::new(
        gemini.clone(),
        gemini.clone(),
        search.clone(),
        repository.clone(),
        ConsultationSettings::from(config.as_ref()),
    ));

    let rate_limiter = RateLimiter::per_minute(config.rate_limit_per_minute);
    rate_limiter.spawn_cleanup();

    let state = routes::AppState {
        config: config.clone(),
        auth,
        orchestrator,
        store: repository,
        embeddings: gemini,
        search,
        rate_limiter,
    };

    let app = routes::create_router(state);

    let host = if cli.public { [0, 0, 0, 0] } else { [127, 0, 0, 1] };
    let addr = SocketAddr::from((host, config.server_port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Consultation stream: POST /api/ai/consultation/stream");

    axum::serve(listener, app).await?;

    Ok(())
}
