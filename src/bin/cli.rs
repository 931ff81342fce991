use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::{Row, SqlitePool};

use dealer_approvals::config::AppConfig;
use dealer_approvals::db;
use dealer_approvals::geo::GeographicScope;
use dealer_approvals::migration::AutoMigrationTrigger;
use dealer_approvals::store::{DocumentStore, SqliteStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "dealer-approvals admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Print the role table: level, category and permissions per role
    Roles,
    /// Load the role table, geographic directory and user directory and report what was found
    CheckConfig,
    /// Tag every document of a governed collection that is missing its province
    Backfill { collection: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool(&config).await?;
            db::MIGRATOR.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool(&config).await?;
            print_status(&pool).await?;
        }
        Commands::Roles => {
            let registry = config.load_registry()?;
            println!("{:<22} {:<6} {:<12} {}", "Role", "Level", "Category", "Permissions");
            for role in registry.roles_by_level() {
                let permissions: Vec<&str> = registry.permissions_for(role).iter().map(|p| p.as_str()).collect();
                println!(
                    "{:<22} {:<6} {:<12} {}",
                    role.as_str(),
                    registry.level_of(role),
                    registry.category_of(role).unwrap_or("-"),
                    permissions.join(",")
                );
            }
        }
        Commands::CheckConfig => {
            let registry = config.load_registry()?;
            let directory = config.load_directory()?;
            let provinces = directory.provinces().count();
            let branches = directory.branches().count();
            let scope = Arc::new(GeographicScope::new(directory));
            let users = config.load_users(scope)?;

            println!("roles:       {}", registry.roles_by_level().len());
            println!("provinces:   {}", provinces);
            println!("branches:    {}", branches);
            println!("users:       {}", users.users().len());
            println!("governed:    {}", config.governed_collections.join(","));
            println!("store:       {}", if config.database_url.is_some() { "sqlite" } else { "memory" });
        }
        Commands::Backfill { collection } => {
            let pool = get_pool(&config).await?;
            db::MIGRATOR.run(&pool).await?;
            let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::new(pool));
            let trigger = AutoMigrationTrigger::new(
                store,
                Arc::new(config.load_directory()?),
                config.governed_collections.clone(),
            );
            let report = trigger.backfill(&collection).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn get_pool(config: &AppConfig) -> anyhow::Result<SqlitePool> {
    let database_url = config.database_url.as_deref().context("DATABASE_URL not set")?;
    db::connect(database_url).await.context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let table = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
        .fetch_optional(pool)
        .await?;
    let applied_versions: HashSet<i64> = if table.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in db::MIGRATOR.iter() {
        let status = if applied_versions.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}
