use std::time::Duration;

use anyhow::Context;
use sqlx::migrate::Migrator;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Migrations embedded from `./migrations`.
pub static MIGRATOR: Migrator = sqlx::migrate!();

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
	SqlitePoolOptions::new()
		.max_connections(10)
		.min_connections(1)
		.acquire_timeout(Duration::from_secs(10))
		.connect(database_url)
		.await
		.context("failed to connect to database")
}

/// Connect and bring the schema up to date.
pub async fn init(database_url: &str) -> anyhow::Result<SqlitePool> {
	let pool = connect(database_url).await?;

	MIGRATOR
		.run(&pool)
		.await
		.context("failed to run migrations")?;

	Ok(pool)
}
