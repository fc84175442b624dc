use std::sync::Arc;

use clap::{Parser, Subcommand};
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::knowledge_entry::KnowledgeEntry},
    utils::config::{get_config, AppConfig},
};
use matching_engine::{
    seed_entries, EntryRepository, KnowledgeMatcher, Match, MatcherTuning,
    SurrealEntryRepository,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "kb")]
#[command(about = "Answer support questions from the knowledge base.")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Match a question against the knowledge base.
    Ask {
        query: String,

        /// Maximum number of matches (default: `match_max_results` from config)
        #[arg(long)]
        max: Option<usize>,

        /// Minimum confidence in [0, 1] (default: `match_min_confidence` from config)
        #[arg(long)]
        min_confidence: Option<f32>,

        /// Value substituted for the support placeholder in the answer
        #[arg(long)]
        contact: Option<String>,

        /// Print only the single best match, with its placeholder resolved
        #[arg(long)]
        best: bool,
    },
    /// List entries grouped by category.
    Categories,
    /// Show usage statistics.
    Stats,
    /// Import the bundled entries, skipping ids that already exist.
    Seed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    // Get config
    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    // Ensure db is initialized
    db.ensure_initialized().await?;

    // The matcher loads lazily, so building it does not touch the store yet.
    let matcher = build_matcher(&config, Arc::clone(&db))?;
    let outcome = run(&matcher, &db, &config, cli.command).await;

    matcher.shutdown().await;
    outcome
}

fn build_matcher(
    config: &AppConfig,
    db: Arc<SurrealDbClient>,
) -> Result<KnowledgeMatcher, AppError> {
    let repository: Arc<dyn EntryRepository> = Arc::new(SurrealEntryRepository::new(db));
    let tuning = MatcherTuning::from_config(config);

    if config.seed_fallback_enabled {
        KnowledgeMatcher::new(repository, tuning)
    } else {
        Ok(KnowledgeMatcher::without_fallback(repository, tuning))
    }
}

async fn run(
    matcher: &KnowledgeMatcher,
    db: &SurrealDbClient,
    config: &AppConfig,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::Ask {
            query,
            max,
            min_confidence,
            contact,
            best,
        } => {
            let min_confidence = min_confidence.unwrap_or(config.match_min_confidence);
            if best {
                match matcher
                    .get_best_match(&query, min_confidence, contact.as_deref())
                    .await?
                {
                    Some(matched) => print_match(&matched, true),
                    None => println!("No matching entry found."),
                }
            } else {
                let max_results = max.unwrap_or(config.match_max_results);
                let matches = matcher
                    .find_matches(&query, max_results, min_confidence)
                    .await?;
                if matches.is_empty() {
                    println!("No matching entry found.");
                }
                for matched in &matches {
                    print_match(matched, false);
                }
            }
        }
        Command::Categories => {
            for (category, entries) in matcher.get_entries_by_category().await? {
                println!("{category}");
                for entry in entries {
                    let headline = entry.phrasings.first().map_or("", String::as_str);
                    println!("  [{}] {} - {}", entry.priority, entry.id, headline);
                }
            }
        }
        Command::Stats => {
            let stats = matcher.get_usage_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Seed => {
            let imported = import_seed(db).await?;
            println!("Imported {imported} knowledge entries");
        }
    }
    Ok(())
}

fn print_match(matched: &Match, with_answer: bool) {
    println!(
        "{:.3}  {:<7}  {} ({})",
        matched.confidence,
        matched.match_type.to_string(),
        matched.entry.id,
        matched.entry.category
    );
    if with_answer {
        println!("{}", matched.entry.answer);
    }
}

/// Stores every bundled entry whose id is not taken yet. Returns how many were written.
async fn import_seed(db: &SurrealDbClient) -> Result<usize, AppError> {
    let mut imported = 0_usize;
    for entry in seed_entries()? {
        if db.get_item::<KnowledgeEntry>(&entry.id).await?.is_some() {
            info!(entry_id = %entry.id, "Knowledge entry already present; skipping");
            continue;
        }
        db.store_item(entry).await?;
        imported = imported.saturating_add(1);
    }
    info!(imported, "Imported bundled knowledge entries");
    Ok(imported)
}
