use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Create a database connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("failed to connect to database")
}

/// Run pending migrations (the files under `migrations/`).
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("failed to run database migrations")?;
    Ok(())
}
