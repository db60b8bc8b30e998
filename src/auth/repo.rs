use anyhow::Context;
use async_trait::async_trait;
use sqlx::{
    mysql::{MySqlConnectOptions, MySqlPoolOptions},
    MySqlPool,
};
use tracing::{info, warn};

use crate::auth::repo_types::{NewUser, User};
use crate::config::DatabaseConfig;

// `id` is cast so tables created outside the migration with a signed
// or narrower id column still decode into `u64`.
const FIND_BY_EMAIL_SQL: &str = r#"
    SELECT CAST(id AS UNSIGNED) AS id, first_name, last_name, email, password
    FROM users
    WHERE email = ?
    LIMIT 1
"#;

const FIND_BY_ID_SQL: &str = r#"
    SELECT CAST(id AS UNSIGNED) AS id, first_name, last_name, email, password
    FROM users
    WHERE id = ?
"#;

/// Persistence seam for user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    async fn find_by_id(&self, id: u64) -> anyhow::Result<Option<User>>;

    /// Inserts a row and returns the id the store assigned.
    async fn create(&self, user: &NewUser) -> anyhow::Result<u64>;
}

/// `UserStore` over an owned MySQL pool; each query borrows one connection.
#[derive(Clone)]
pub struct MySqlUserStore {
    pool: MySqlPool,
}

impl MySqlUserStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn connect(cfg: &DatabaseConfig) -> anyhow::Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .username(&cfg.user)
            .password(&cfg.password)
            .database(&cfg.name);
        let pool = MySqlPoolOptions::new()
            .max_connections(cfg.max_connections.get())
            .connect_with(options)
            .await
            .context("connect to database")?;
        info!(host = %cfg.host, database = %cfg.name, "connected to MySQL");
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for MySqlUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(FIND_BY_EMAIL_SQL)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: u64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(FIND_BY_ID_SQL)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn create(&self, user: &NewUser) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (first_name, last_name, email, password)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_id()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                warn!(email = %user.email, "email already registered");
                Err(anyhow::anyhow!("duplicate email: {}", db_err.message()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub use memory::InMemoryUserStore;
