use anyhow::{bail, Context};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tokio::sync::broadcast;

use zimage_studio::{
    media, BatchSummary, ClientConfig, GenerationSession, GenerationSettings, GenerationStatus,
    HistoryStore, ItemStatus, SessionEvent, ZImageClient,
};

#[derive(Parser)]
#[command(name = "zimage")]
#[command(about = "Generate images and browse history on a Z-Image server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API base URL (default: $ZIMAGE_API_URL or http://127.0.0.1:8000)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// API key sent as X-Auth-Key (default: $ZIMAGE_AUTH_KEY or guest)
    #[arg(long, global = true)]
    auth_key: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a batch of images and wait for the results
    Generate {
        /// Text prompt
        #[arg(required = true)]
        prompt: String,

        /// Negative prompt
        #[arg(long)]
        negative: Option<String>,

        #[arg(long, default_value = "1024")]
        width: u32,

        #[arg(long, default_value = "1024")]
        height: u32,

        /// Inference steps
        #[arg(long, default_value = "9")]
        steps: u32,

        /// Guidance scale
        #[arg(long, default_value = "0.0")]
        guidance: f64,

        /// Base seed; image i uses seed + i
        #[arg(long)]
        seed: Option<i64>,

        /// Number of images (1-4)
        #[arg(short = 'n', long, default_value = "1")]
        batch_size: u32,

        /// Download finished images into this directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the status of a single task
    Status { task_id: String },

    /// List past batches
    History {
        #[arg(short, long, default_value = "20")]
        limit: u32,

        #[arg(long, default_value = "0")]
        offset: u32,
    },

    /// Show one past batch; with --watch, follow it until it settles
    Show {
        batch_id: String,

        #[arg(short, long)]
        watch: bool,
    },

    /// Delete past batches
    Delete {
        #[arg(required = true)]
        batch_ids: Vec<String>,
    },

    /// Cancel queued or running tasks
    Cancel {
        #[arg(required = true)]
        task_ids: Vec<String>,
    },

    /// Check that the API is reachable
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "warn" }),
    )
    .init();

    let mut builder = ClientConfig::builder();
    let from_env = ClientConfig::from_env().context("Invalid ZIMAGE_* environment")?;
    builder = builder
        .with_endpoint(cli.endpoint.clone().unwrap_or(from_env.endpoint))
        .with_poll_interval(from_env.poll_interval)
        .with_max_active_tasks(from_env.max_active_tasks);
    if let Some(key) = cli.auth_key.clone().or(from_env.auth_key) {
        builder = builder.with_auth_key(key);
    }
    let config = builder.build()?;
    let client = ZImageClient::from_config(&config);

    match cli.command {
        Commands::Generate {
            prompt,
            negative,
            width,
            height,
            steps,
            guidance,
            seed,
            batch_size,
            output,
        } => {
            let settings = GenerationSettings {
                width,
                height,
                steps,
                guidance_scale: guidance,
                seed,
                batch_size,
                negative_prompt: negative,
            };
            generate(client, config, prompt, settings, output).await
        }
        Commands::Status { task_id } => {
            let task = client.task_status(&task_id).await?;
            println!("{}: {}", task.task_id, task.item_status().as_str());
            if let Some(p) = task.progress {
                println!("  progress: {}%", p);
            }
            if let Some(seed) = task.seed() {
                println!("  seed: {}", seed);
            }
            if let Some(url) = &task.image_url {
                println!("  image: {}", media::resolve_image_url(client.endpoint(), url));
            }
            if let Some(msg) = task.failure_message() {
                println!("  error: {}", msg);
            }
            Ok(())
        }
        Commands::History { limit, offset } => {
            let entries = client.list_history(limit, offset).await?;
            if entries.is_empty() {
                println!("No history");
            }
            for entry in &entries {
                print_summary(entry);
            }
            Ok(())
        }
        Commands::Show { batch_id, watch } => {
            let detail = client.batch_detail(&batch_id).await?;
            print_summary(&detail.batch);
            if let Some(cover) = detail.batch.cover_url() {
                println!("  cover: {}", media::resolve_image_url(client.endpoint(), &cover));
            }
            if !watch {
                for item in &detail.items {
                    print_item(client.endpoint(), item.index, item.status, item.image_url.as_deref());
                }
                return Ok(());
            }
            let endpoint = client.endpoint().to_string();
            let session = GenerationSession::new(client, config);
            let events = session.subscribe();
            session.load_history_batch(&detail.batch);
            wait_for_batch(&session, events, &endpoint).await
        }
        Commands::Delete { batch_ids } => delete(client, config.history_page_size, batch_ids).await,
        Commands::Cancel { task_ids } => {
            for task_id in &task_ids {
                match client.cancel_task(task_id).await {
                    Ok(resp) => println!(
                        "{}: {}{}",
                        resp.task_id,
                        resp.status,
                        resp.message.map(|m| format!(" ({})", m)).unwrap_or_default()
                    ),
                    Err(e) => eprintln!("{}: {}", task_id, e.user_message()),
                }
            }
            Ok(())
        }
        Commands::Health => {
            let health = client.health().await?;
            println!(
                "{} ({})",
                health.status,
                health.environment.as_deref().unwrap_or("unknown")
            );
            Ok(())
        }
    }
}

async fn generate(
    client: ZImageClient,
    config: ClientConfig,
    prompt: String,
    settings: GenerationSettings,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let endpoint = client.endpoint().to_string();
    let session = GenerationSession::new(client, config);
    let events = session.subscribe();
    session.set_prompt(prompt);
    session.update_settings(settings);

    let batch_id = session.generate().await?;
    println!("Batch {} queued", batch_id);

    let interrupted = tokio::select! {
        result = wait_for_batch(&session, events, &endpoint) => { result?; false }
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        let cancelled = session.cancel().await;
        println!("Cancelled {} image(s)", cancelled);
        return Ok(());
    }

    if let Some(dir) = output {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create {}", dir.display()))?;
        for item in session.snapshot().items {
            let Some(url) = item.image_url.filter(|_| item.status == ItemStatus::Success) else {
                continue;
            };
            let bytes = session.api().image(&url).await?;
            let path = dir.join(media::file_name(&media::download_url(&url)));
            std::fs::write(&path, &bytes)?;
            println!("Saved: {}", path.display());
        }
    }
    Ok(())
}

async fn wait_for_batch(
    session: &GenerationSession<ZImageClient>,
    mut events: broadcast::Receiver<SessionEvent>,
    endpoint: &str,
) -> anyhow::Result<()> {
    loop {
        let event = match events.recv().await {
            Ok(e) => e,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => bail!("Session closed"),
        };
        match event {
            SessionEvent::ItemsUpdated {
                items,
                success_count,
                failed_count,
                ..
            } => {
                let running: Vec<String> = items
                    .iter()
                    .filter(|i| i.status == ItemStatus::Running)
                    .map(|i| format!("#{} {}%", i.index, i.progress.unwrap_or(0)))
                    .collect();
                println!(
                    "  {}/{} done, {} failed{}",
                    success_count,
                    items.len(),
                    failed_count,
                    if running.is_empty() {
                        String::new()
                    } else {
                        format!(" [running: {}]", running.join(", "))
                    }
                );
            }
            SessionEvent::BatchFinished {
                status,
                elapsed_ms,
                error,
                ..
            } => {
                println!("Finished in {:.1}s", elapsed_ms as f64 / 1000.0);
                for item in session.snapshot().items {
                    print_item(endpoint, item.index, item.status, item.image_url.as_deref());
                }
                if status == GenerationStatus::Error {
                    bail!(error.unwrap_or_else(|| "Generation failed".to_string()));
                }
                return Ok(());
            }
            _ => {}
        }
    }
}

async fn delete(client: ZImageClient, page_size: u32, batch_ids: Vec<String>) -> anyhow::Result<()> {
    let store = HistoryStore::new(client, page_size);
    store.refresh().await?;

    let mut missing: BTreeSet<String> = batch_ids.into_iter().collect();
    loop {
        for id in missing.clone() {
            if store.get(&id).is_some() {
                store.toggle_select(&id);
                missing.remove(&id);
            }
        }
        if missing.is_empty() || !store.has_more() || store.load_more().await? == 0 {
            break;
        }
    }
    for id in &missing {
        eprintln!("{}: not found in history", id);
    }

    let report = store.delete_selected().await;
    for id in &report.deleted {
        println!("Deleted {}", id);
    }
    for (id, message) in &report.failed {
        eprintln!("{}: {}", id, message);
    }
    if !report.failed.is_empty() {
        bail!("{} deletion(s) failed", report.failed.len());
    }
    Ok(())
}

fn print_summary(entry: &BatchSummary) {
    let when = entry
        .created_at
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    let counts = match (entry.success_count, entry.failed_count) {
        (Some(s), Some(f)) => format!(" {}/{} ok", s, entry.size().max(s + f)),
        _ => String::new(),
    };
    println!(
        "{}  {}  {:<8}{}  {}",
        entry.id,
        when,
        entry.status,
        counts,
        entry.prompt.as_deref().unwrap_or("")
    );
}

fn print_item(endpoint: &str, index: u32, status: ItemStatus, url: Option<&str>) {
    match url {
        Some(u) => println!(
            "  #{} {:<9} {}",
            index,
            status.as_str(),
            media::resolve_image_url(endpoint, u)
        ),
        None => println!("  #{} {}", index, status.as_str()),
    }
}
