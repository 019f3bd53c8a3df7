use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use product_crawler::config;
use product_crawler::crawler::Crawler;
use product_crawler::db;
use product_crawler::fetch::HttpProductClient;
use product_crawler::input;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Fetch product details for every queued id, resuming where the last run stopped"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// CSV of ids to queue (overrides `input.path`)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Skip reading the CSV; only crawl ids already pending or failed
    #[arg(long)]
    resume_only: bool,

    /// Override `crawl.batch_size`
    #[arg(long)]
    batch_size: Option<usize>,

    /// Override `crawl.concurrency`
    #[arg(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let mut cfg = config::load(Some(&args.config))?;
    if let Some(path) = &args.input {
        cfg.input.path = path.to_string_lossy().to_string();
    }
    if let Some(batch_size) = args.batch_size {
        cfg.crawl.batch_size = batch_size;
    }
    if let Some(concurrency) = args.concurrency {
        cfg.crawl.concurrency = concurrency;
    }
    config::validate(&cfg)?;
    cfg.ensure_dirs()?;

    let database_url = cfg.database_url();
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let ids = if args.resume_only {
        Vec::new()
    } else {
        input::read_ids(PathBuf::from(&cfg.input.path).as_path(), &cfg.input.id_column)
            .with_context(|| format!("failed to read ids from {}", cfg.input.path))?
            .ids
    };

    let settings = cfg.crawl.settings();
    let client = HttpProductClient::new(&cfg.source.base_url, &cfg.source.user_agent, &settings)?;
    info!(
        database_url = %database_url,
        base_url = %cfg.source.base_url,
        concurrency = settings.concurrency,
        batch_size = settings.batch_size,
        "starting product crawler"
    );

    let crawler = Crawler::new(pool.clone(), Arc::new(client), settings);
    let summary = crawler.run(&ids).await?;
    println!("\n{}\n", summary);

    pool.close().await;
    Ok(())
}
