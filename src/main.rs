mod cli;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use news_curator::config::Config;
use news_curator::db::Database;
use news_curator::feedback::{load_feedback_file, FeedbackQueue};
use news_curator::snapshot::{self, SnapshotMirror};
use news_curator::{CatalogStore, CurationSettings, Reconciler};

use crate::cli::{Cli, Commands};

const DEFAULT_DATABASE_URL: &str = "sqlite:data/sources.db?mode=rwc";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "news_curator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(&cli.config)?;
    info!(
        "Loaded {} candidate sources from {}",
        config.candidates.len(),
        cli.config.display()
    );

    // Initialize database
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            std::fs::create_dir_all("data")?;
            DEFAULT_DATABASE_URL.to_string()
        }
    };
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    info!("Database initialized");

    match cli.command {
        Commands::Reconcile {
            extra_feedback,
            min_score,
        } => {
            if let Some(min_score) = min_score {
                anyhow::ensure!(
                    (0.0..=1.0).contains(&min_score),
                    "--min-score must be within [0, 1], got {}",
                    min_score
                );
                config.minimum_score = min_score;
            }
            let extra = match extra_feedback {
                Some(path) => load_feedback_file(path)?,
                None => Vec::new(),
            };

            let mut queue = FeedbackQueue::open(&config.paths.feedback)?;
            let mut reconciler = Reconciler::new(db, CurationSettings::from(&config))
                .with_snapshot(SnapshotMirror::new(&config.paths.snapshot));
            if let Some(notes) = &config.paths.notes {
                reconciler = reconciler.with_editor_notes(notes);
            }

            let summary = reconciler
                .run_cycle(&mut queue, &config.candidates, extra)
                .await?;
            println!("{}", summary);
        }
        Commands::Seed { catalog } => {
            let mirror = SnapshotMirror::new(catalog.unwrap_or(config.paths.snapshot));
            let records = mirror.load()?;
            let count = snapshot::seed(&db, records).await?;
            println!("Seeded {} sources from {}", count, mirror.path().display());
        }
        Commands::Dump { catalog } => {
            let mirror = SnapshotMirror::new(catalog.unwrap_or(config.paths.snapshot));
            let records = db.list().await?;
            mirror.write(&records)?;
            println!("Wrote {} sources to {}", records.len(), mirror.path().display());
        }
        Commands::Enqueue { file } => {
            let entries = load_feedback_file(&file)?;
            let mut queue = FeedbackQueue::open(&config.paths.feedback)?;
            let count = entries.len();
            for entry in entries {
                queue.enqueue(entry);
            }
            queue.save()?;
            println!(
                "Queued {} entries ({} pending)",
                count,
                queue.pending_len()
            );
        }
        Commands::Status => {
            let queue = FeedbackQueue::open(&config.paths.feedback)?;
            let counts = db.status_counts().await?;
            let total: i64 = counts.iter().map(|(_, n)| n).sum();
            println!("Catalog: {} sources", total);
            for (status, count) in &counts {
                println!("  {}: {}", status, count);
            }
            println!("Pending feedback: {}", queue.pending_len());
            println!("Archived feedback: {}", queue.archived().len());
            if let Some(request) = queue.open_request() {
                println!(
                    "Open request from {} with {} asks",
                    request.requested_at.to_rfc3339(),
                    request.asks.len()
                );
                for ask in &request.asks {
                    println!("  - {}", ask.question);
                }
            }
        }
    }

    Ok(())
}
