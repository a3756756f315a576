use crate::{Result, ResourceConfig, constants::STATS_REPORT_INTERVAL};
use crate::core::manager::Manager;
use crate::layers::{caching::CachingManager, stats::StatsManager};
use crate::remote::server::RpcServer;
use colored::Colorize;
use std::sync::Arc;
use tracing::info;

pub async fn execute(
    config: ResourceConfig,
    addr: Option<String>,
    stats: bool,
    cache: bool,
) -> Result<()> {
    let addr = addr.unwrap_or_else(|| config.server.addr.clone());
    let stats = stats || config.server.stats;
    let cache = cache || config.server.cache;

    let core = super::start_manager(config, false).await?;
    println!(
        "{} {} distributions loaded",
        "✓".green().bold(),
        core.loaded_distributions().await.len().to_string().bold()
    );

    let mut manager: Arc<dyn Manager> = Arc::new(core);
    if cache {
        manager = Arc::new(CachingManager::new(manager));
    }
    if stats {
        manager = Arc::new(StatsManager::new(manager).with_reporter(STATS_REPORT_INTERVAL));
    }

    let server = RpcServer::bind(&addr, Arc::clone(&manager)).await?;
    println!(
        "Serving on {} (stats: {}, cache: {})",
        server.local_addr()?.to_string().cyan(),
        stats,
        cache
    );
    println!("Press Ctrl-C to stop");

    let token = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
        }
        token.cancel();
    });

    server.serve().await?;
    super::shutdown(manager).await;
    Ok(())
}
