use peercache::config;
use peercache::group::GetterFunc;
use peercache::http::HttpPool;
use peercache::registry::Registry;
use tokio::sync::broadcast::error::RecvError;

/// Provides the demo data served by the "scores" group.
fn lookup_score(key: &str) -> anyhow::Result<Vec<u8>> {
    log::info!("[SlowDB] search key {}", key);
    match key {
        "Tom" => Ok(b"630".to_vec()),
        "Jack" => Ok(b"589".to_vec()),
        "Sam" => Ok(b"567".to_vec()),
        _ => Err(anyhow::anyhow!("{} not exist", key)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    peercache::init_logging();
    log::info!(
        "Starting Peercache IO (Version: {}, Revision: {})...",
        peercache::PEERCACHE_VERSION,
        peercache::PEERCACHE_REVISION
    );

    let config = config::install(config::DEFAULT_CONFIG_FILE).await;
    let settings = config.current();

    // Setup the demo group...
    let registry = Registry::new();
    let scores = registry.new_group(
        "scores",
        settings.group_capacity("scores", 2 << 10)?,
        GetterFunc(lookup_score),
    );

    // Connect it to the other nodes of the cluster...
    let pool = HttpPool::new(&settings.base_url(), registry.clone());
    pool.set_peers(settings.peers());
    scores.register_peers(pool.clone())?;

    // Pick up a changed set of peers without restarting (and thus wiping the cache)...
    let mut change_notifier = config.notifier();
    let peers_pool = pool.clone();
    let peers_config = config.clone();
    peercache::spawn!(async move {
        loop {
            match change_notifier.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    peers_pool.set_peers(peers_config.current().peers())
                }
                Err(RecvError::Closed) => return,
            }
        }
    });

    pool.serve(
        &settings.server_address(),
        peercache::signals::shutdown_requested(),
    )
    .await
}
