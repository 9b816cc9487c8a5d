use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use tidepool_server::config::{Mode, ServerConfig};
use tidepool_server::email::{EmailService, MockEmailService, SmtpEmailService};
use tidepool_server::redis::create_redis_pool;
use tidepool_server::router::build_router;
use tidepool_server::shutdown::shutdown_signal;
use tidepool_server::state::AppState;
use tidepool_server::storage::ObjectStorage;
use tidepool_server::unfurl::Unfurler;
use tidepool_server::{gateway, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = ServerConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.max_db_connections)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!().run(&pool).await?;
    tracing::info!("database connected");

    let redis = create_redis_pool(&config.redis).await?;
    tracing::info!("redis connected");

    let storage = ObjectStorage::from_config(&config.storage)?;

    let email: Arc<dyn EmailService> = if config.email.smtp_host.is_empty() {
        tracing::warn!("SMTP not configured, using mock email service");
        Arc::new(MockEmailService::new())
    } else {
        Arc::new(SmtpEmailService::new(&config.email)?)
    };

    // internal hosts: invite links under our own frontends are not unfurled
    let internal_hosts: Vec<String> = config
        .cors_origins
        .iter()
        .filter_map(|origin| reqwest::Url::parse(origin).ok())
        .filter_map(|url| url.host_str().map(str::to_string))
        .collect();
    let unfurler = Unfurler::new(internal_hosts)?;

    let mode = config.mode;
    let addr = format!("{}:{}", config.host, config.port);
    let app_state: state::AppState =
        AppState::new(config, pool, redis, storage, email, unfurler);

    if mode == Mode::Gateway {
        gateway::fanout::spawn(app_state.clone());
    }

    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(mode = ?mode, "server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
