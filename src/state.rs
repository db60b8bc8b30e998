use std::sync::Arc;

use tracing::warn;

use crate::auth::repo::{MySqlUserStore, UserStore};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let store = MySqlUserStore::connect(&config.database).await?;

        // The users table may be administered outside this service.
        if let Err(e) = store.migrate().await {
            warn!(error = %e, "migration failed; continuing with existing schema");
        }

        Ok(Self::from_parts(Arc::new(store), Arc::new(config)))
    }

    pub fn from_parts(users: Arc<dyn UserStore>, config: Arc<AppConfig>) -> Self {
        Self { users, config }
    }

    #[cfg(test)]
    pub fn fake(users: Arc<dyn UserStore>) -> Self {
        use std::num::NonZeroU32;

        use crate::config::{DatabaseConfig, JwtConfig};

        let config = Arc::new(AppConfig {
            database: DatabaseConfig {
                host: "localhost".into(),
                port: 3306,
                user: "test".into(),
                password: "test".into(),
                name: "test".into(),
                max_connections: NonZeroU32::MIN,
            },
            jwt: JwtConfig {
                secret: "test-secret".into(),
            },
            host: "127.0.0.1".into(),
            port: 0,
            frontend_origin: "http://localhost:5173".into(),
        });
        Self::from_parts(users, config)
    }
}
