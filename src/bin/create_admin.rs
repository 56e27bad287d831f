//! Bootstrap the first admin login.
//!
//! Usage: ADMIN_PASSWORD=... create_admin
//! Reads DATABASE_URL, ADMIN_EMAIL and ADMIN_NAME from the environment (.env honoured).

use anyhow::Context;
use clinic_server::{auth::hash_password, db::connect_pg};
use sqlx::PgPool;

/// Inserts the admin unless the email is already registered.
/// Returns the new user id, or `None` when nothing was written.
async fn ensure_admin(db: &PgPool, name: &str, email: &str, password: &str) -> anyhow::Result<Option<i64>> {
    anyhow::ensure!(password.len() >= 8, "ADMIN_PASSWORD must be at least 8 characters");

    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(db)
        .await?;
    if let Some(id) = existing {
        tracing::info!(user_id = id, %email, "admin already exists");
        return Ok(None);
    }

    let phc = hash_password(password)?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO users (name, email, role, password)
        VALUES ($1, $2, 'admin', $3)
        RETURNING id
        "#,
    )
    .bind(name.trim())
    .bind(email)
    .bind(&phc)
    .fetch_one(db)
    .await?;

    tracing::info!(user_id = id, %email, "created admin");
    Ok(Some(id))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let email = std::env::var("ADMIN_EMAIL")
        .unwrap_or_else(|_| "admin@example.com".to_string())
        .trim()
        .to_lowercase();
    let name = std::env::var("ADMIN_NAME").unwrap_or_else(|_| "Admin User".to_string());
    let password = std::env::var("ADMIN_PASSWORD").context("ADMIN_PASSWORD must be set")?;

    let pool = connect_pg(&database_url, 1).await?;
    ensure_admin(&pool, &name, &email, &password).await?;
    Ok(())
}
