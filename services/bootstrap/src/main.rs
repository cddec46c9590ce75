use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use common::{
    database::{self, DatabaseConfig},
    models::User,
    schema::{self, Entity},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Prepare the database for the application: connect, then bring the
/// `users` table in line with the model.
#[derive(Debug, Parser)]
#[command(name = "bootstrap", version)]
struct Args {
    /// TOML file with database settings (defaults to ./database.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the DDL that would run without applying it
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let db_config =
        DatabaseConfig::load(args.config.as_deref()).context("load database configuration")?;

    if args.dry_run {
        return dry_run(&db_config).await;
    }

    info!("Starting database bootstrap");

    let pool = database::init_database(&db_config)
        .await
        .context("initialize database")?;

    if database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    pool.close().await;
    info!("Database bootstrap finished");

    Ok(())
}

/// Connect and print the reconciliation plan for `users`
async fn dry_run(db_config: &DatabaseConfig) -> Result<()> {
    let pool = database::init_pool(db_config)
        .await
        .context("connect to database")?;

    let live = schema::introspect(&pool, User::TABLE.name).await?;
    let plan = schema::plan(&User::TABLE, live.as_deref())?;

    if plan.is_empty() {
        println!("-- {}: up to date", plan.table);
    }
    for statement in &plan.statements {
        println!("{};", statement);
    }

    pool.close().await;
    Ok(())
}
