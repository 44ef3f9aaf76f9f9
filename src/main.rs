//! proofandfit: unique assessment challenge generation.
//!
//! Usage:
//!   proofandfit generate --skill "Fraud Detection" --difficulty advanced --count 3
//!   proofandfit fingerprint --title T --description D --answer A
//!   proofandfit hashes --limit 20
//!   proofandfit serve

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use proofandfit::clients::create_generation_client;
use proofandfit::config::{Config, log_filter};
use proofandfit::http::{HttpState, start_http_server};
use proofandfit::orchestrator::ProgressEvent;
use proofandfit::schemas::{ChallengeType, Difficulty, GenerationRequest};
use proofandfit::service::ChallengeGenerationService;
use proofandfit::store::{
    MemoryStore, PersistenceGateway, RequestContext, SqliteStore, create_store,
};

#[derive(Parser)]
#[command(name = "proofandfit")]
#[command(about = "Generate unique assessment challenges", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a batch of unique challenges and store them
    Generate {
        /// Skill area; repeat or comma-separate for several
        #[arg(long = "skill", required = true, value_delimiter = ',')]
        skills: Vec<String>,
        #[arg(long, default_value = "intermediate")]
        difficulty: Difficulty,
        #[arg(long = "type", default_value = "scenario")]
        challenge_type: ChallengeType,
        /// Cycle these challenge types across the batch
        #[arg(long = "rotate-types", value_delimiter = ',')]
        rotate_types: Vec<ChallengeType>,
        #[arg(long, default_value_t = 1)]
        count: usize,
        #[arg(long)]
        job_title: Option<String>,
        #[arg(long)]
        job_description: Option<String>,
        #[arg(long)]
        job_post_id: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
        /// Mark the challenges as admin-created (challenge library)
        #[arg(long)]
        admin: bool,
        /// Generate against the configured store but keep results in memory
        #[arg(long)]
        dry_run: bool,
        /// Print the full batch report as JSON
        #[arg(long)]
        json: bool,
        /// Stream progress events to stderr
        #[arg(long)]
        progress: bool,
    },
    /// Print the fingerprint of a challenge's text
    Fingerprint {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        answer: String,
    },
    /// List fingerprints already held by the configured store
    Hashes {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Serve the HTTP API
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Subscriber before Config::load, which warns while clamping
    Config::load_env_file();
    let filter = log_filter(std::env::var("RUST_LOG").ok().as_deref());
    // stdout carries command output, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    match cli.command {
        Commands::Generate {
            skills,
            difficulty,
            challenge_type,
            rotate_types,
            count,
            job_title,
            job_description,
            job_post_id,
            user_id,
            admin,
            dry_run,
            json,
            progress,
        } => {
            let mut request = GenerationRequest::new(&skills, difficulty, challenge_type, count)?
                .with_type_rotation(rotate_types);
            if job_title.is_some() || job_description.is_some() {
                request = request.with_job(
                    job_title.unwrap_or_default(),
                    job_description.unwrap_or_default(),
                );
            }
            request.ensure_within(config.generation.max_batch_size)?;
            let ctx = RequestContext {
                job_post_id,
                created_by_user_id: user_id,
                created_by_admin: admin,
            };
            generate(&config, request, ctx, dry_run, json, progress).await
        }
        Commands::Fingerprint {
            title,
            description,
            answer,
        } => {
            println!(
                "{}",
                proofandfit::fingerprint::fingerprint(&title, &description, &answer)
            );
            Ok(())
        }
        Commands::Hashes { limit } => hashes(&config, limit).await,
        Commands::Serve => serve(config).await,
    }
}

async fn generate(
    config: &Config,
    request: GenerationRequest,
    ctx: RequestContext,
    dry_run: bool,
    json: bool,
    progress: bool,
) -> Result<()> {
    let client = create_generation_client(config)?;
    let configured = create_store(config)?;
    let store: Arc<dyn PersistenceGateway> = if dry_run {
        let existing = configured
            .list_existing_fingerprints()
            .await
            .unwrap_or_else(|e| {
                warn!("Dry run: could not read existing fingerprints: {}", e);
                Vec::new()
            });
        info!("Dry run: {} existing fingerprint(s), nothing will be stored", existing.len());
        Arc::new(MemoryStore::with_existing(existing))
    } else {
        configured
    };
    let service = ChallengeGenerationService::new(client, store, config.policy());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing with the challenges accepted so far");
            on_signal.cancel();
        }
    });

    let (tx, printer) = if progress {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{}", line);
                }
            }
        });
        (Some(tx), Some(printer))
    } else {
        (None, None)
    };

    let report = service.generate_with(&request, &ctx, tx, cancel).await?;
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
        for saved in &report.saved {
            println!("  {}  {}  {}", saved.fingerprint.short(), saved.id, saved.title);
        }
        for failure in &report.save_failures {
            println!("  !! {}  {}", failure.title, failure.reason);
        }
    }
    report.into_result().map_err(|e| match e.empty_batch_cause() {
        Some(cause) => anyhow::anyhow!("{} ({})", cause.message(), e),
        None => e.into(),
    })?;
    Ok(())
}

async fn hashes(config: &Config, limit: usize) -> Result<()> {
    if config.storage.backend == "sqlite" {
        let store = SqliteStore::open(&config.storage.sqlite_path)
            .with_context(|| format!("opening {}", config.storage.sqlite_path))?;
        for row in store.list_challenges(limit).await? {
            println!("{}  {}  {}", row.content_hash, row.created_at, row.title);
        }
        return Ok(());
    }
    let store = create_store(config)?;
    let fingerprints = store.list_existing_fingerprints().await?;
    let start = fingerprints.len().saturating_sub(limit);
    for fp in &fingerprints[start..] {
        println!("{}", fp);
    }
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let client = create_generation_client(&config)?;
    let store = create_store(&config)?;
    let service = ChallengeGenerationService::new(client, store, config.policy());
    info!(
        "Serving challenge generation (provider={}, store={})",
        service.provider(),
        service.store().backend()
    );
    let state = HttpState::new(Arc::new(config), Arc::new(service));
    start_http_server(state).await?;
    Ok(())
}
