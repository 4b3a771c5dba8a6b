use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqlitePool};
use std::sync::Arc;

use crate::collaborators::document_intelligence::DocumentAnalyzer;
use crate::collaborators::mailer::Mailer;
use crate::config::AppConfig;
use crate::error::{ApiError, ApiResult};
use crate::rate_limit::RateLimiter;

/// Estado compartilhado entre os handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<AppConfig>,
    pub mailer: Arc<dyn Mailer>,
    pub analyzer: Arc<dyn DocumentAnalyzer>,
    pub login_limiter: Arc<RateLimiter>,
    pub send_code_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        config: AppConfig,
        mailer: Arc<dyn Mailer>,
        analyzer: Arc<dyn DocumentAnalyzer>,
    ) -> Self {
        let limits = &config.rate_limit;
        let login_limiter = RateLimiter::new(limits.login_max, limits.login_window_secs);
        let send_code_limiter = RateLimiter::new(limits.send_code_max, limits.send_code_window_secs);
        Self {
            pool,
            config: Arc::new(config),
            mailer,
            analyzer,
            login_limiter: Arc::new(login_limiter),
            send_code_limiter: Arc::new(send_code_limiter),
        }
    }
}

/// Conexão do pool, obtida como extrator
pub struct DbConn(pub PoolConnection<Sqlite>);

#[async_trait]
impl FromRequestParts<AppState> for DbConn {
    type Rejection = ApiError;

    async fn from_request_parts(_parts: &mut Parts, state: &AppState) -> ApiResult<Self> {
        Ok(DbConn(state.pool.acquire().await?))
    }
}
