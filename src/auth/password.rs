use anyhow::Context;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

/// Argon2 PHC hash of `plain`, computed off the async workers.
pub async fn hash(plain: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || hash_sync(&plain))
        .await
        .context("password hashing task")?
}

/// Constant-time comparison of `plain` against a stored PHC string.
pub async fn verify(plain: String, stored: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || verify_sync(&plain, &stored))
        .await
        .context("password verification task")?
}

fn hash_sync(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

fn verify_sync(plain: &str, stored: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(stored).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_and_verify() {
        let stored = hash("p1".into()).await.expect("hashing should succeed");
        assert_ne!(stored, "p1");
        assert!(verify("p1".into(), stored.clone()).await.unwrap());
        assert!(!verify("p2".into(), stored).await.unwrap());
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        assert!(verify_sync("anything", "not-a-valid-hash").is_err());
    }
}
