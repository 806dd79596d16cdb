use std::fs::create_dir_all;

use anyhow::Context;
use clap::Parser;
use course_reviews::configuration::get_configuration;
use course_reviews::db::{establish_connection, run_migrations};
use course_reviews::server::app::run_server;
use course_reviews::telemetry::init_tracing;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Apply migrations and exit without serving
    #[clap(long)]
    migrate_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = get_configuration().context("Failed to load configuration")?;

    let static_dir = &settings.application.static_dir;
    if !static_dir.exists() {
        create_dir_all(static_dir.join("images"))
            .context("Failed to create directory for static content")?;
    }
    if !static_dir.is_dir() {
        anyhow::bail!("Static dir {} should be a directory or not exist", static_dir.display());
    }

    let pool = establish_connection(&settings.database.path)
        .await
        .with_context(|| format!("Cannot open database {}", settings.database.path))?;

    tracing::info!("Running db migrations...");
    run_migrations(&pool).await.context("Migrations failed")?;
    if cli.migrate_only {
        return Ok(());
    }

    run_server(pool, &settings.application).await
}
