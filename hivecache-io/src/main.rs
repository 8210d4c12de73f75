use std::collections::HashMap;
use std::panic::{set_hook, take_hook};
use std::sync::Arc;

use hivecache::builder::Builder;
use hivecache::config::Config;
use hivecache::fmt::parse_size;
use hivecache::group::{FnLoader, GroupRegistry};
use hivecache::http::HttpPool;
use hivecache::server::Server;

#[tokio::main]
async fn main() {
    // Installs a panic handler which crashes the whole process instead of trying to survive
    // with a missing tokio background thread. Having a panic in a tokio thread is quite ugly,
    // as the server seems to be healthy from the outside but won't handle any incoming
    // requests.
    //
    // Therefore we crash the whole process on purpose and hope for an external watchdog like
    // docker-compose to create a new container which is in a sane and consistent state.
    let original_panic_handler = take_hook();
    set_hook(Box::new(move |panic_info| {
        original_panic_handler(panic_info);
        eprintln!("PROGRAM ALARM: A panic occurred in a thread. Crashing the whole process to enable a clean restart...");
        std::process::exit(-1);
    }));

    // Build a platform and enable all features...
    let platform = Builder::new().enable_all().build().await;

    // A tiny built-in dataset standing in for a slow authoritative database...
    let scores: Arc<HashMap<&'static str, &'static str>> =
        Arc::new([("Tom", "630"), ("Jack", "589"), ("Sam", "567")].into_iter().collect());

    // The cache budget can be tuned via "caches.scores.max_memory" in the system config...
    let cache_bytes = platform
        .require::<Config>()
        .current()
        .config()["caches"]["scores"]["max_memory"]
        .as_str()
        .and_then(|size| parse_size(size).ok())
        .unwrap_or(2 * 1024 * 1024);

    // Set up the example cache group...
    let group = platform.require::<GroupRegistry>().create_group(
        "scores",
        cache_bytes,
        Arc::new(FnLoader::new(move |key: &str| {
            log::info!("scores: Consulting the database for '{}'...", key);
            scores
                .get(key)
                .map(|score| score.as_bytes().to_vec())
                .ok_or_else(|| anyhow::anyhow!("No score recorded for '{}'!", key))
        })),
    );

    // ...and wire it into the cluster.
    if let Err(error) = group.register_peers(platform.require::<HttpPool>()) {
        log::error!("Failed to register the cluster peers: {}", error);
    }

    platform.require::<Server>().event_loop().await;
}
