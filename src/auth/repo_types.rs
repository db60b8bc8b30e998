use sqlx::FromRow;

/// User record in the `users` table.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[sqlx(rename = "password")]
    pub password_hash: String, // bcrypt hash, never serialized
}

/// Row values for an insert; the id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
}
