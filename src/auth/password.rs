use anyhow::Context;
use tracing::error;

/// bcrypt work factor used for every stored hash.
pub const BCRYPT_COST: u32 = 10;

/// Hashes on the blocking pool so a signup does not stall the async workers.
pub async fn hash_password(plain: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(plain, BCRYPT_COST))
        .await
        .context("password hashing task failed")?
        .map_err(|e| {
            error!(error = %e, "bcrypt hash error");
            anyhow::anyhow!(e)
        })
}

/// Returns `Ok(false)` on mismatch and `Err` only when `hash` is not a bcrypt hash.
pub async fn verify_password(plain: String, hash: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hash))
        .await
        .context("password verification task failed")?
        .map_err(|e| {
            error!(error = %e, "bcrypt verify error");
            anyhow::anyhow!(e)
        })
}
