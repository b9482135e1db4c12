//! Peercache is a read-through, distributed in-memory cache.
//!
//! # Introduction
//! **Peercache** keeps frequently requested values in memory and makes sure that each missing
//! key is only loaded **once**, no matter how many tasks request it concurrently and no matter
//! how many nodes participate in the cache. Values are organized in named
//! [groups](group::Group). Each group is backed by a [Getter](group::Getter) which knows how to
//! obtain a value from the source of truth (e.g. a database).
//!
//! If several nodes are started, the key space is distributed among them via
//! [consistent hashing](hashring::HashRing). A node which is asked for a key it doesn't own
//! fetches the value from the owning node (its **peer**) instead of hitting the source of truth
//! itself. If the peer cannot be reached, the value is loaded locally so that the cache keeps
//! working even if parts of the cluster are down.
//!
//! # Features
//! * **Size constrained LRU caches**: Each group accounts the memory used by its keys and
//!   values and evicts the least recently used entries once its limit is exceeded. See
//!   [lru](lru).
//! * **Request coalescing**: Concurrent loads of the same key are merged into a single one,
//!   see [singleflight](singleflight).
//! * **100% Async/Await** - everything builds upon [tokio](https://tokio.rs/) and async/await
//!   primitives as provided by Rust.
//! * **Reload-aware config facility** which permits to change the set of peers during operation.
//!   Therefore, no restart (which would wipe all caches) is required. See [config](config).
//! * **Pluggable transport**: Peers communicate via HTTP (see [http](http)), but any other
//!   transport can be used by implementing the traits in [peers](peers).
//!
//! # Examples
//! A complete example of a cache node can be found in **peercache-io**. A minimal setup looks
//! like this:
//!
//! ```
//! # use peercache::group::GetterFunc;
//! # use peercache::registry::Registry;
//! # #[tokio::main]
//! # async fn main() {
//! let registry = Registry::new();
//! let scores = registry.new_group("scores", 2048, GetterFunc(|key: &str| {
//!     Ok(format!("score of {}", key).into_bytes())
//! }));
//!
//! assert_eq!(scores.get("Tom").await.unwrap().to_string(), "score of Tom");
//! # }
//! ```
#![deny(
    warnings,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod byteview;
pub mod config;
pub mod error;
pub mod fmt;
pub mod group;
pub mod hashring;
pub mod http;
pub mod lru;
pub mod peers;
pub mod registry;
pub mod signals;
pub mod singleflight;

/// Contains the version of the Peercache library.
pub const PEERCACHE_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the Peercache build being used.
pub const PEERCACHE_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// This can safely be called several times, only the first invocation has an effect.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Tests call this over and over, but a logger can only be installed once...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Runs the given future as a detached tokio task.
///
/// The join handle is dropped right away, as none of the background tasks of a node is ever
/// awaited.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate peercache;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}
