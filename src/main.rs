mod db;
mod lifecycle;
mod models;
mod tui;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use db::{Database, StorageConfig};
use lifecycle::{StageAction, TransitionPolicy, Tracker};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser)]
#[command(name = "apptrack")]
#[command(about = "Job application tracker - add offers and move them through recruitment stages")]
struct Cli {
    /// Path to the SQLite database (defaults to the user data directory)
    #[arg(long, global = true, env = "APPTRACK_DB")]
    db: Option<PathBuf>,

    /// Stage transition policy (unrestricted, forward-only)
    #[arg(long, global = true, env = "APPTRACK_POLICY", default_value = "unrestricted")]
    policy: TransitionPolicy,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Add a job application (starts on the wishlist)
    Add {
        /// Job title
        title: String,

        /// Link to the job offer
        url: String,

        /// Company name
        #[arg(short, long)]
        company: Option<String>,
    },

    /// List applications, newest first
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show application details
    Show {
        /// Application ID
        id: i64,
    },

    /// Move an application to another stage
    Advance {
        /// Application ID
        id: i64,

        /// Target stage (sent, process, offer)
        stage: StageAction,
    },

    /// Interactive board
    Board,
}

fn init_logging(config: &StorageConfig, to_file: bool) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if !to_file {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
        return Ok(None);
    }

    // The board owns the terminal, so its logs go to a file next to the database
    let log_path = config.log_path();
    let dir = log_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    let file_name = log_path
        .file_name()
        .ok_or_else(|| anyhow!("Invalid log path: {}", log_path.display()))?;
    let (non_blocking, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, file_name));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();
    Ok(Some(guard))
}

fn ensure_initialized(db: &Database) -> Result<()> {
    let ready = db
        .is_initialized()
        .context("Database not available. Run 'apptrack init' first.")?;
    if !ready {
        return Err(anyhow!("Database not initialized. Run 'apptrack init' first."));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = StorageConfig::resolve(cli.db);
    let _log_guard = init_logging(&config, matches!(cli.command, Commands::Board))?;
    let db = Database::new(config);

    match cli.command {
        Commands::Init => {
            db.init().context("Failed to initialize database")?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Add {
            title,
            url,
            company,
        } => {
            ensure_initialized(&db)?;
            let tracker = Tracker::new(db, cli.policy);
            let id = tracker.submit(&title, &url, company.as_deref().unwrap_or(""))?;
            println!("Added application #{} to the wishlist", id);
        }

        Commands::List { json } => {
            let tracker = Tracker::new(db, cli.policy);
            let listing = tracker.listing();
            if let Some(err) = &listing.error {
                eprintln!("Error reading applications: {}", err);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&listing.applications)?);
            } else if listing.applications.is_empty() {
                println!("No applications found.");
            } else {
                println!(
                    "{:<6} {:<18} {:<28} {:<20} {:<30}",
                    "ID", "STAGE", "TITLE", "COMPANY", "URL"
                );
                println!("{}", "-".repeat(106));
                for app in listing.applications {
                    println!(
                        "{:<6} {:<18} {:<28} {:<20} {:<30}",
                        app.id,
                        app.stage.label(),
                        truncate(&app.title, 26),
                        truncate(&app.company_name.unwrap_or_default(), 18),
                        truncate(&app.company_url, 30)
                    );
                }
            }
        }

        Commands::Show { id } => {
            let tracker = Tracker::new(db, cli.policy);
            match tracker.find(id)? {
                Some(app) => {
                    println!("Application #{}", app.id);
                    println!("Title: {}", app.title);
                    if let Some(company) = &app.company_name {
                        println!("Company: {}", company);
                    }
                    println!("URL: {}", app.company_url);
                    println!("Stage: {}", app.stage.label());
                    if !app.progress_notes.is_empty() {
                        println!("Notes: {}", app.progress_notes);
                    }
                    println!("Created: {}", app.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"));
                    println!("Updated: {}", app.updated_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"));
                }
                None => {
                    println!("Application #{} not found.", id);
                }
            }
        }

        Commands::Advance { id, stage } => {
            ensure_initialized(&db)?;
            let tracker = Tracker::new(db, cli.policy);
            let stage = tracker.apply(id, stage)?;
            println!("Application #{} is now: {}", id, stage.label());
        }

        Commands::Board => {
            ensure_initialized(&db)?;
            let tracker = Tracker::new(db, cli.policy);
            tui::run_board(&tracker)?;
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
