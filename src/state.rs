use crate::auth::services::{AuthService, AuthSettings};
use crate::config::AppConfig;
use crate::db;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;
        let pool = db::connect(&config).await?;
        db::migrate(&pool).await?;

        let auth = AuthService::postgres(pool, AuthSettings::from_config(&config));
        Ok(Self::from_parts(Arc::new(auth), Arc::new(config)))
    }

    pub fn from_parts(auth: Arc<AuthService>, config: Arc<AppConfig>) -> Self {
        Self { auth, config }
    }

    /// State backed by in-memory stores; nothing touches a database.
    pub fn in_memory(config: AppConfig) -> Self {
        let auth = AuthService::in_memory(AuthSettings::from_config(&config));
        Self::from_parts(Arc::new(auth), Arc::new(config))
    }
}
