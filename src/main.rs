use deskserver::config::AppConfig;
use deskserver::core::state::{create_pool, AppState};
use deskserver::email::SmtpMailer;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use dotenvy::dotenv;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env();
    let pool = create_pool(&config.database_url())?;
    {
        let mut conn = pool.get()?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("Migration failed: {e}"))?;
    }
    let mailer = Arc::new(SmtpMailer::new(config.smtp.clone()));
    let state = Arc::new(AppState::new(pool, config.clone(), mailer));

    let app = deskserver::build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "deskserver listening");
    axum::serve(listener, app).await?;
    Ok(())
}
