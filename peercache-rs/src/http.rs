//! Provides an HTTP based transport between the nodes of a cache.
//!
//! Each node runs an [HttpPool](HttpPool) which has two duties. On the one hand it serves the
//! values of its local groups to other nodes. On the other hand it acts as
//! [PeerPicker](crate::peers::PeerPicker) for the local groups and decides (via consistent
//! hashing) which node owns a given key.
//!
//! # Protocol
//! A value is requested via `GET {base_path}{group}/{key}` where **base_path** defaults to
//! [DEFAULT_BASE_PATH](DEFAULT_BASE_PATH). Both, the group and the key are percent-encoded.
//! The node responds with:
//! * **200**: the raw value as `application/octet-stream`.
//! * **400**: if the path is malformed or the key is invalid.
//! * **404**: if the group is unknown or the path doesn't start with the base path.
//! * **405**: for any method other than **GET**.
//! * **500**: if the value could not be loaded, the body contains the error message.
//!
//! Additionally `GET {base_path}_stats` reports the metrics of all groups as JSON.
//!
//! # Examples
//!
//! ```no_run
//! # use peercache::group::GetterFunc;
//! # use peercache::http::HttpPool;
//! # use peercache::registry::Registry;
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let registry = Registry::new();
//! let scores = registry.new_group("scores", 2048, GetterFunc(|_: &str| Ok(b"42".to_vec())));
//!
//! let pool = HttpPool::new("http://localhost:8001", registry.clone());
//! pool.set_peers(["http://localhost:8001", "http://localhost:8002"]);
//! scores.register_peers(pool.clone())?;
//!
//! pool.serve("0.0.0.0:8001", peercache::signals::shutdown_requested()).await
//! # }
//! ```
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::TcpListener;
use std::sync::Arc;

use anyhow::Context;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Client, Method, Request, Response, StatusCode, Uri};
use hyper_tls::HttpsConnector;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::CacheError;
use crate::hashring::HashRing;
use crate::peers::{FetchRequest, FetchResponse, PeerGetter, PeerPicker};
use crate::registry::Registry;

/// Contains the path prefix under which a node serves its values.
pub const DEFAULT_BASE_PATH: &str = "/_peercache/";

/// Contains the number of virtual nodes placed on the hash ring per peer.
pub const DEFAULT_REPLICAS: usize = 50;

/// Everything except unreserved characters is escaped within a path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

const STATS: &str = "_stats";

struct PeerSet {
    ring: HashRing,
    getters: HashMap<String, Arc<HttpGetter>>,
}

/// Serves the local groups to other nodes and picks the node which owns a key.
pub struct HttpPool {
    self_url: String,
    base_path: String,
    registry: Arc<Registry>,
    peers: ArcSwap<PeerSet>,
}

impl HttpPool {
    /// Creates a pool for the node reachable via **self_url** which serves the groups of the
    /// given registry under [DEFAULT_BASE_PATH](DEFAULT_BASE_PATH).
    ///
    /// Note that **self_url** has to match the entry of this node in the list of peers
    /// exactly, otherwise the node would send requests to itself.
    pub fn new(self_url: &str, registry: Arc<Registry>) -> Arc<Self> {
        HttpPool::with_base_path(self_url, DEFAULT_BASE_PATH, registry)
    }

    /// Creates a pool which serves its values under a custom path prefix.
    ///
    /// All nodes of a cluster have to use the same prefix.
    pub fn with_base_path(self_url: &str, base_path: &str, registry: Arc<Registry>) -> Arc<Self> {
        let base_path = format!("/{}/", base_path.trim_matches('/')).replace("//", "/");

        Arc::new(HttpPool {
            self_url: self_url.trim_end_matches('/').to_owned(),
            base_path,
            registry,
            peers: ArcSwap::new(Arc::new(PeerSet {
                ring: HashRing::new(DEFAULT_REPLICAS),
                getters: HashMap::new(),
            })),
        })
    }

    /// Returns the URL under which this node is reachable.
    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    /// Returns the path prefix under which values are served.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Replaces the set of peers.
    ///
    /// The list is expected to contain all nodes of the cluster, including this one. This can
    /// be invoked at any time (e.g. once the config changed). Loads which are already running
    /// keep using the previous peer.
    pub fn set_peers<I, S>(&self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ring = HashRing::new(DEFAULT_REPLICAS);
        let mut getters = HashMap::new();

        for peer in peers {
            let peer = peer.as_ref().trim_end_matches('/');
            if getters.contains_key(peer) {
                continue;
            }

            ring.add([peer]);
            let _ = getters.insert(
                peer.to_owned(),
                Arc::new(HttpGetter::new(format!("{}{}", peer, self.base_path))),
            );
        }

        log::info!(
            "Using {} peer(s) for {}: {}",
            getters.len(),
            self.self_url,
            getters.keys().cloned().collect::<Vec<String>>().join(", ")
        );

        if !getters.is_empty() && !getters.contains_key(&self.self_url) {
            log::warn!(
                "{} is not among its own peers. Keys owned by it will be fetched via HTTP from itself!",
                self.self_url
            );
        }

        self.peers.store(Arc::new(PeerSet { ring, getters }));
    }

    /// Determines if the local node is part of the current set of peers.
    ///
    /// If it isn't (e.g. because **base_url** is spelled differently in the peers list), the
    /// node will ask itself via HTTP for the keys it owns.
    pub fn includes_self(&self) -> bool {
        self.peers.load().getters.contains_key(&self.self_url)
    }

    /// Binds to the given address and serves requests until **shutdown** completes.
    pub async fn serve(
        self: Arc<Self>,
        address: &str,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<()> {
        let listener = TcpListener::bind(address)
            .with_context(|| format!("Cannot open server address: {}", address))?;

        self.serve_listener(listener, shutdown).await
    }

    /// Serves requests on an already bound listener until **shutdown** completes.
    pub async fn serve_listener(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<()> {
        listener
            .set_nonblocking(true)
            .context("Cannot switch server socket to non-blocking mode")?;
        let address = listener.local_addr()?;

        let pool = self.clone();
        let make_svc = make_service_fn(move |_conn| {
            let pool = pool.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    let pool = pool.clone();
                    async move { Ok::<_, Infallible>(pool.handle(request).await) }
                }))
            }
        });

        log::info!(
            "Serving {}{} on {}...",
            self.self_url,
            self.base_path,
            address
        );
        hyper::Server::from_tcp(listener)?
            .serve(make_svc)
            .with_graceful_shutdown(shutdown)
            .await
            .context("Failed to serve peer requests")?;
        log::info!("Closed server socket on {}.", address);

        Ok(())
    }

    async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let path = request.uri().path();
        let tail = match path.strip_prefix(self.base_path.as_str()) {
            Some(tail) => tail,
            None => return respond(StatusCode::NOT_FOUND, format!("Unexpected path: {}", path)),
        };

        if request.method() != Method::GET {
            return respond(
                StatusCode::METHOD_NOT_ALLOWED,
                format!("Unsupported method: {}", request.method()),
            );
        }

        if tail == STATS {
            return self.stats();
        }

        let segments = tail
            .split_once('/')
            .map(|(group, key)| (decode(group), decode(key)));
        let (group_name, key) = match segments {
            Some((Some(group), Some(key))) => (group, key),
            _ => return respond(StatusCode::BAD_REQUEST, "Expected /<group>/<key>"),
        };

        let group = match self.registry.get_group(&group_name) {
            Some(group) => group,
            None => {
                return respond(
                    StatusCode::NOT_FOUND,
                    format!("Unknown group: {}", group_name),
                )
            }
        };

        match group.get(&key).await {
            Ok(value) => Response::builder()
                .header(hyper::header::CONTENT_TYPE, "application/octet-stream")
                .body(Body::from(value.bytes()))
                .unwrap_or_else(|_| Response::new(Body::empty())),
            Err(CacheError::InvalidKey) => respond(StatusCode::BAD_REQUEST, "Invalid key"),
            Err(error) => respond(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
        }
    }

    fn stats(&self) -> Response<Body> {
        let groups: Vec<serde_json::Value> = self
            .registry
            .groups()
            .iter()
            .map(|group| {
                let cache = group.cache_stats();
                let stats = group.stats();
                serde_json::json!({
                    "name": group.name(),
                    "entries": cache.entries,
                    "allocated_memory": cache.allocated_memory,
                    "max_memory": cache.max_memory,
                    "evictions": cache.evictions,
                    "gets": stats.gets,
                    "cache_hits": stats.cache_hits,
                    "loads": stats.loads,
                    "loads_deduplicated": stats.loads_deduplicated,
                    "peer_loads": stats.peer_loads,
                    "peer_errors": stats.peer_errors,
                    "local_loads": stats.local_loads,
                    "local_errors": stats.local_errors,
                })
            })
            .collect();

        let body = serde_json::json!({
            "node": self.self_url,
            "groups": groups,
        });

        Response::builder()
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|_| Response::new(Body::empty()))
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let peers = self.peers.load();
        let peer = peers.ring.get(key)?;
        if peer == self.self_url {
            return None;
        }

        log::debug!("Picked peer {} for '{}'.", peer, key);
        peers
            .getters
            .get(peer)
            .map(|getter| -> Arc<dyn PeerGetter> { getter.clone() })
    }
}

fn respond(status: StatusCode, message: impl Into<String>) -> Response<Body> {
    let mut response = Response::new(Body::from(message.into()));
    *response.status_mut() = status;

    response
}

fn decode(segment: &str) -> Option<String> {
    percent_decode_str(segment)
        .decode_utf8()
        .ok()
        .map(|segment| segment.into_owned())
}

fn encode(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// Fetches values from a single remote node via HTTP(S).
pub struct HttpGetter {
    base_url: String,
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl HttpGetter {
    /// Creates a getter for the node which serves its values under the given URL.
    ///
    /// The URL has to contain the base path of the node, e.g.
    /// `http://localhost:8001/_peercache/`.
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpGetter {
            base_url: base_url.into(),
            client: Client::builder().build::<_, Body>(HttpsConnector::new()),
        }
    }
}

#[async_trait]
impl PeerGetter for HttpGetter {
    async fn fetch(&self, request: &FetchRequest) -> anyhow::Result<FetchResponse> {
        let url = format!(
            "{}{}/{}",
            self.base_url,
            encode(&request.group),
            encode(&request.key)
        );
        let uri = url
            .parse::<Uri>()
            .with_context(|| format!("Invalid peer URL: {}", url))?;

        let response = self
            .client
            .get(uri)
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .with_context(|| format!("Failed to read the response of {}", self.base_url))?;

        if status != StatusCode::OK {
            return Err(anyhow::anyhow!(
                "{} responded with {}: {}",
                self.base_url,
                status,
                String::from_utf8_lossy(&body)
            ));
        }

        Ok(FetchResponse { value: body })
    }

    fn address(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use crate::group::{Getter, Group};
    use crate::http::{encode, HttpGetter, HttpPool, DEFAULT_BASE_PATH};
    use crate::peers::{FetchRequest, PeerGetter, PeerPicker};
    use crate::registry::Registry;
    use crate::testing::test_async;
    use async_trait::async_trait;
    use hyper::{Client, StatusCode};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Echoes the key and counts its invocations.
    #[derive(Default)]
    struct Echo {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Getter for Echo {
        async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            if key == "broken" {
                Err(anyhow::anyhow!("The database is down"))
            } else {
                Ok(format!("value of {}", key).into_bytes())
            }
        }
    }

    /// Starts a node serving a single group named "scores" on an ephemeral port.
    fn start_node() -> (Arc<HttpPool>, Arc<Group>, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let calls = Arc::new(AtomicUsize::new(0));
        let registry = Registry::new();
        let group = registry.new_group(
            "scores",
            0,
            Echo {
                calls: calls.clone(),
            },
        );

        let pool = HttpPool::new(&url, registry);
        let _ = tokio::spawn(
            pool.clone()
                .serve_listener(listener, futures::future::pending()),
        );

        (pool, group, calls)
    }

    fn request(group: &str, key: &str) -> FetchRequest {
        FetchRequest {
            group: group.to_owned(),
            key: key.to_owned(),
        }
    }

    #[test]
    fn values_are_served_to_peers() {
        test_async(async {
            let (pool, group, calls) = start_node();
            let getter = HttpGetter::new(format!("{}{}", pool.self_url(), DEFAULT_BASE_PATH));

            let response = getter.fetch(&request("scores", "Tom")).await.unwrap();
            assert_eq!(&response.value[..], b"value of Tom");

            // Keys are escaped properly...
            let response = getter.fetch(&request("scores", "a b/c?d")).await.unwrap();
            assert_eq!(&response.value[..], b"value of a b/c?d");

            // ...and the values are cached by the serving node.
            let _ = getter.fetch(&request("scores", "Tom")).await.unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), 2);
            assert_eq!(group.stats().cache_hits, 1);
        });
    }

    #[test]
    fn failures_are_reported_as_errors() {
        test_async(async {
            let (pool, _, _) = start_node();
            let getter = HttpGetter::new(format!("{}{}", pool.self_url(), DEFAULT_BASE_PATH));

            let error = getter
                .fetch(&request("scores", "broken"))
                .await
                .unwrap_err();
            assert_eq!(format!("{}", error).contains("500"), true);
            assert_eq!(format!("{}", error).contains("The database is down"), true);

            let error = getter.fetch(&request("unknown", "x")).await.unwrap_err();
            assert_eq!(format!("{}", error).contains("404"), true);

            // A node which cannot be reached is an error as well...
            let unreachable = HttpGetter::new("http://127.0.0.1:1/_peercache/");
            assert_eq!(unreachable.fetch(&request("scores", "x")).await.is_err(), true);
        });
    }

    #[test]
    fn malformed_requests_are_rejected() {
        test_async(async {
            let (pool, _, _) = start_node();
            let client = Client::new();
            let status_of = |path: String| {
                let client = client.clone();
                async move {
                    client
                        .get(path.parse().unwrap())
                        .await
                        .unwrap()
                        .status()
                }
            };

            assert_eq!(
                status_of(format!("{}/other/scores/x", pool.self_url())).await,
                StatusCode::NOT_FOUND
            );
            assert_eq!(
                status_of(format!("{}{}scores", pool.self_url(), DEFAULT_BASE_PATH)).await,
                StatusCode::BAD_REQUEST
            );
            assert_eq!(
                status_of(format!("{}{}scores/", pool.self_url(), DEFAULT_BASE_PATH)).await,
                StatusCode::BAD_REQUEST
            );
        });
    }

    #[test]
    fn stats_are_reported_as_json() {
        test_async(async {
            let (pool, group, _) = start_node();
            let _ = group.get("Tom").await.unwrap();

            let response = Client::new()
                .get(
                    format!("{}{}_stats", pool.self_url(), DEFAULT_BASE_PATH)
                        .parse()
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);

            let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
            let stats: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(stats["groups"][0]["name"], "scores");
            assert_eq!(stats["groups"][0]["entries"], 1);
            assert_eq!(stats["groups"][0]["local_loads"], 1);
        });
    }

    #[test]
    fn the_local_node_is_never_picked() {
        let pool = HttpPool::new("http://a:8001/", Registry::new());
        assert_eq!(pool.pick_peer("Tom").is_none(), true);

        pool.set_peers(["http://a:8001"]);
        for i in 0..100 {
            assert_eq!(pool.pick_peer(&format!("key-{}", i)).is_none(), true);
        }

        pool.set_peers(["http://a:8001", "http://b:8001/"]);
        assert_eq!(pool.includes_self(), true);
        let picked = (0..100)
            .filter_map(|i| pool.pick_peer(&format!("key-{}", i)))
            .collect::<Vec<_>>();
        assert_eq!(picked.is_empty(), false);
        assert!(picked
            .iter()
            .all(|peer| peer.address() == "http://b:8001/_peercache/"));
    }

    #[test]
    fn a_missing_local_node_is_detected() {
        let pool = HttpPool::new("http://a:8001", Registry::new());
        assert_eq!(pool.includes_self(), false);

        pool.set_peers(["http://localhost:8001", "http://b:8001"]);
        assert_eq!(pool.includes_self(), false);

        pool.set_peers(["http://a:8001/", "http://b:8001"]);
        assert_eq!(pool.includes_self(), true);
    }

    #[test]
    fn keys_are_loaded_by_their_owner() {
        test_async(async {
            let (pool_a, group_a, calls_a) = start_node();
            let (pool_b, group_b, calls_b) = start_node();

            let peers = [pool_a.self_url().to_owned(), pool_b.self_url().to_owned()];
            pool_a.set_peers(&peers);
            pool_b.set_peers(&peers);
            group_a.register_peers(pool_a.clone()).unwrap();
            group_b.register_peers(pool_b.clone()).unwrap();

            // Find a key which is owned by node b...
            let key = (0..1000)
                .map(|i| format!("key-{}", i))
                .find(|key| pool_a.pick_peer(key).is_some())
                .unwrap();

            let value = group_a.get(&key).await.unwrap();
            assert_eq!(value.to_string(), format!("value of {}", key));

            // ...the value was loaded and cached by b but not cached by a.
            assert_eq!(calls_a.load(Ordering::SeqCst), 0);
            assert_eq!(calls_b.load(Ordering::SeqCst), 1);
            assert_eq!(group_a.main_cache().contains(&key), false);
            assert_eq!(group_b.main_cache().contains(&key), true);
            assert_eq!(group_a.stats().peer_loads, 1);
        });
    }

    #[test]
    fn unreachable_peers_are_skipped() {
        test_async(async {
            let (pool, group, calls) = start_node();
            pool.set_peers([pool.self_url(), "http://127.0.0.1:1"]);
            group.register_peers(pool.clone()).unwrap();

            let key = (0..1000)
                .map(|i| format!("key-{}", i))
                .find(|key| pool.pick_peer(key).is_some())
                .unwrap();

            assert_eq!(
                group.get(&key).await.unwrap().to_string(),
                format!("value of {}", key)
            );
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(group.stats().peer_errors, 1);
            assert_eq!(group.main_cache().contains(&key), true);
        });
    }

    #[test]
    fn segments_are_escaped() {
        assert_eq!(encode("Tom"), "Tom");
        assert_eq!(encode("a b/c"), "a%20b%2Fc");
        assert_eq!(encode("ü"), "%C3%BC");
    }
}
