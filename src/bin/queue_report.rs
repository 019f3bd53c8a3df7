use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use product_crawler::config;
use product_crawler::db;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Show work queue progress and the most recent failures"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// How many failed ids to list
    #[arg(long, default_value = "20")]
    limit: i64,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let counts = db::queue::status_counts(&pool).await?;
    let errors = db::queue::list_errors(&pool, args.limit).await?;

    if args.json {
        let report = serde_json::json!({ "counts": counts, "errors": errors });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Queued:      {}", counts.total());
    println!("Done:        {}", counts.done);
    println!("Pending:     {}", counts.pending);
    println!("Error:       {}", counts.error);
    println!("Outstanding: {}", counts.outstanding());
    if !errors.is_empty() {
        println!();
        println!("Recent failures:");
        for item in &errors {
            println!(
                "  {:>12}  {}  {}",
                item.id,
                item.updated_at,
                item.last_error.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}
