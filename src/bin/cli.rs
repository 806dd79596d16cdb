use std::error::Error;
use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use course_reviews::auth::{hash_password, validate_login, validate_password};
use course_reviews::db::queries::categories::{create_category, get_all_categories};
use course_reviews::db::queries::courses::{find_rating_drift, get_all_courses, recount_ratings};
use course_reviews::db::queries::reviews::get_all_reviews;
use course_reviews::db::queries::users::{create_user, get_users, NewUser};
use course_reviews::db::{establish_connection, run_migrations};
use course_reviews::telemetry::init_tracing;
use secrecy::SecretString;
use serde::Serialize;
use sqlx::SqlitePool;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Database path
    db_path: PathBuf,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export users, categories, courses and reviews as CSV files
    Export { path: PathBuf },
    /// Recompute course rating aggregates from reviews
    Recount,
    /// Create a user account
    CreateUser {
        #[clap(long)]
        login: String,
        #[clap(long)]
        first_name: String,
        #[clap(long)]
        last_name: String,
        #[clap(long)]
        middle_name: Option<String>,
        #[clap(long)]
        password: String,
    },
    /// Add a course category
    AddCategory { name: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let cli = Cli::parse();
    let pool = establish_connection(&cli.db_path.display().to_string()).await?;
    run_migrations(&pool).await?;
    match cli.command {
        Commands::Export { path } => export_data(&pool, path).await?,
        Commands::Recount => recount(&pool).await?,
        Commands::CreateUser {
            login,
            first_name,
            last_name,
            middle_name,
            password,
        } => {
            validate_login(&login)?;
            let password = SecretString::from(password);
            validate_password(&password)?;
            let password_hash = hash_password(password).await?;
            let id = create_user(
                &pool,
                NewUser {
                    login: &login,
                    password_hash: &password_hash,
                    first_name: &first_name,
                    last_name: &last_name,
                    middle_name: middle_name.as_deref(),
                    created_at: Utc::now(),
                },
            )
            .await?;
            tracing::info!(id, %login, "User created");
        }
        Commands::AddCategory { name } => {
            let id = create_category(&pool, &name).await?;
            tracing::info!(id, %name, "Category created");
        }
    }
    Ok(())
}

fn write_to(path: PathBuf, data: Vec<impl Serialize>) -> Result<(), Box<dyn Error>> {
    let file = std::fs::File::create(path)?;
    let mut wtr = csv::Writer::from_writer(file);
    for line in data {
        wtr.serialize(line)?;
    }
    wtr.flush()?;
    Ok(())
}

async fn export_data(pool: &SqlitePool, path: PathBuf) -> Result<(), Box<dyn Error>> {
    let users = get_users(pool).await?;
    let categories = get_all_categories(pool).await?;
    let courses = get_all_courses(pool).await?;
    let reviews = get_all_reviews(pool).await?;
    if !path.exists() {
        std::fs::create_dir_all(&path)?
    }
    write_to(path.join("users.csv"), users)?;
    write_to(path.join("categories.csv"), categories)?;
    write_to(path.join("courses.csv"), courses)?;
    write_to(path.join("reviews.csv"), reviews)?;
    tracing::info!("Exported data to {}", path.display());
    Ok(())
}

async fn recount(pool: &SqlitePool) -> Result<(), Box<dyn Error>> {
    for drift in find_rating_drift(pool).await? {
        tracing::warn!(
            course_id = drift.id,
            name = %drift.name,
            cached_sum = drift.rating_sum,
            cached_num = drift.rating_num,
            actual_sum = drift.actual_sum,
            actual_num = drift.actual_num,
            "Course rating aggregate out of sync"
        );
    }
    let updated = recount_ratings(pool).await?;
    tracing::info!(updated, "Recounted course ratings");
    Ok(())
}
