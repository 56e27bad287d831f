use sqlx::{PgPool, postgres::PgPoolOptions};

pub async fn connect_pg(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("database migrations applied");

    Ok(pool)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    Unique,
    ForeignKey,
}

/// Which named constraint a failed statement tripped, if any.
pub fn violated_constraint(e: &sqlx::Error) -> Option<(ViolationKind, &str)> {
    let db_err = e.as_database_error()?;
    let kind = if db_err.is_unique_violation() {
        ViolationKind::Unique
    } else if db_err.is_foreign_key_violation() {
        ViolationKind::ForeignKey
    } else {
        return None;
    };
    Some((kind, db_err.constraint().unwrap_or_default()))
}
