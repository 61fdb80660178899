use anyhow::Result;
use clap::Parser;
use meta_bulk_ads::ads::MetaAdsService;
use meta_bulk_ads::compositor::CityImageGenerator;
use meta_bulk_ads::config;
use meta_bulk_ads::db;
use meta_bulk_ads::graph::GraphClient;
use meta_bulk_ads::orchestrator::BatchProcessor;
use meta_bulk_ads::worker;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let graph = Arc::new(GraphClient::from_config(&cfg.graph)?);
    let ads = Arc::new(MetaAdsService::new(
        graph,
        Duration::from_secs(cfg.cache.metadata_ttl_seconds),
    ));
    let compositor = CityImageGenerator::new(cfg.scratch_root(), &cfg.font_search_paths());
    let processor = BatchProcessor::new(
        pool.clone(),
        ads,
        compositor,
        cfg.media_root(),
        Duration::from_millis(cfg.app.inter_city_delay_ms),
    );

    let poll_sleep = Duration::from_millis(cfg.app.poll_interval_ms);
    let pending = db::count_pending_jobs(&pool).await?;
    info!(pending, "starting batch worker");

    // Only the idle sleeps race the shutdown signal; a running batch is
    // finished before the loop checks again.
    loop {
        let wait = match worker::process_next_job(&pool, &processor).await {
            Ok(true) => continue,
            Ok(false) => poll_sleep,
            Err(err) => {
                error!(?err, "batch worker error");
                Duration::from_secs(1)
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    Ok(())
}
