use sqlx::Row;
use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::SqlitePool;
use uuid::Uuid;

use permission_gate::models::session::SessionRecord;
use permission_gate::session::SqliteSessionStore;
use permission_gate::utils::token_fingerprint;

#[derive(Parser, Debug)]
#[command(author, version, about = "permission-gate session and migration tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Issue a session token carrying the given permissions
    IssueSession {
        /// Display name handed to handlers as `name`
        #[arg(long)]
        name: String,
        /// Comma-separated permission identifiers, e.g. `A,admin`
        #[arg(long, value_delimiter = ',')]
        permissions: Vec<String>,
        #[arg(long)]
        user_id: Option<Uuid>,
        /// Lifetime in hours; sessions without one never expire
        #[arg(long)]
        ttl_hours: Option<i64>,
        /// Use this token instead of a generated one
        #[arg(long)]
        token: Option<String>,
    },
    /// Revoke a session token
    RevokeSession { token: String },
    /// List sessions (tokens are shown as fingerprints)
    ListSessions,
    /// Delete expired sessions
    PurgeExpired,
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::IssueSession {
            name,
            permissions,
            user_id,
            ttl_hours,
            token,
        } => {
            let store = SqliteSessionStore::new(permission_gate::db::init().await?);
            let token = token.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
            let permissions: Vec<String> = permissions
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();

            let mut session =
                SessionRecord::new(token, user_id.unwrap_or_else(Uuid::new_v4), name).with_permissions(permissions);
            if let Some(hours) = ttl_hours {
                session = session.with_expiry(Utc::now() + Duration::hours(hours));
            }

            store.insert(&session).await?;
            println!("{}", session.token);
        }
        Commands::RevokeSession { token } => {
            let store = SqliteSessionStore::new(permission_gate::db::init().await?);
            store.revoke(&token).await?;
            println!("Revoked {}", token_fingerprint(&token));
        }
        Commands::ListSessions => {
            let store = SqliteSessionStore::new(permission_gate::db::init().await?);
            let now = Utc::now();
            println!("{:<14} {:<20} {:<9} {}", "Token", "Name", "Status", "Permissions");
            for session in store.list().await? {
                let status = if session.is_expired(now) { "expired" } else { "active" };
                println!(
                    "{:<14} {:<20} {:<9} {}",
                    token_fingerprint(&session.token),
                    session.name,
                    status,
                    session.permissions.join(",")
                );
            }
        }
        Commands::PurgeExpired => {
            let store = SqliteSessionStore::new(permission_gate::db::init().await?);
            let removed = store.purge_expired().await?;
            println!("Purged {} expired session(s)", removed);
        }
        Commands::MigrateRun => {
            // db::init applies pending migrations on connect
            permission_gate::db::init().await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePool::connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    let has_table = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
        .fetch_optional(pool)
        .await?
        .is_some();

    let applied_versions: HashSet<i64> = if has_table {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", display))
}
