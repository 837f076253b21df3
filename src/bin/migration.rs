use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sea_orm_migration::MigratorTrait;
use storefront_api::{config, db, migrator::Migrator};
use tracing::info;

/// Schema management for the storefront database
#[derive(Debug, Parser)]
#[command(name = "storefront-migrate", version, about)]
struct Cli {
    /// Database URL; defaults to DATABASE_URL, then the application config
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending migrations (default)
    Up {
        /// Apply at most this many
        #[arg(short, long)]
        steps: Option<u32>,
    },
    /// Roll back applied migrations
    Down {
        /// Number of migrations to roll back
        #[arg(default_value_t = 1)]
        steps: u32,
    },
    /// Show applied and pending migrations
    Status,
    /// Drop every table and re-apply all migrations
    Fresh,
}

fn resolve_database_url(cli: &Cli) -> Result<String> {
    if let Some(url) = cli.database_url.clone() {
        return Ok(url);
    }
    if let Ok(url) = std::env::var("DATABASE_URL") {
        return Ok(url);
    }
    let cfg = config::load_config().context("no --database-url given and config failed to load")?;
    Ok(cfg.database_url)
}

#[tokio::main]
async fn main() -> Result<()> {
    config::init_tracing("info", false);

    let cli = Cli::parse();
    let database_url = resolve_database_url(&cli)?;

    let pool = db::establish_connection_with_config(&db::DbConfig {
        url: database_url,
        max_connections: 2,
        ..Default::default()
    })
    .await?;

    match cli.command.unwrap_or(Command::Up { steps: None }) {
        Command::Up { steps } => {
            Migrator::up(&pool, steps).await?;
            info!("Migrations applied");
        }
        Command::Down { steps } => {
            Migrator::down(&pool, Some(steps)).await?;
            info!(steps, "Migrations rolled back");
        }
        Command::Status => {
            Migrator::status(&pool).await?;
        }
        Command::Fresh => {
            Migrator::fresh(&pool).await?;
            info!("Schema recreated");
        }
    }

    Ok(())
}
