use crate::config::AppConfig;
use crate::email::Mailer;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use std::sync::Arc;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;
pub type DbConn = diesel::r2d2::PooledConnection<ConnectionManager<PgConnection>>;

pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub fn new(conn: DbPool, config: AppConfig, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            conn,
            config,
            mailer,
        }
    }

    pub fn db(&self) -> Result<DbConn, crate::core::error::ApiError> {
        Ok(self.conn.get()?)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("conn", &"DbPool")
            .field("config", &self.config)
            .field("mailer", &"Arc<dyn Mailer>")
            .finish()
    }
}

pub fn create_pool(database_url: &str) -> Result<DbPool, anyhow::Error> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(10)
        .build(manager)
        .map_err(|e| anyhow::anyhow!("Failed to create database pool: {e}"))
}
