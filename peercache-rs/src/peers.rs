//! Defines how a group talks to other nodes of a distributed cache.
//!
//! A [PeerPicker](PeerPicker) decides which node owns a given key (e.g. by consistent hashing,
//! see [HashRing](crate::hashring::HashRing)) and hands out a [PeerGetter](PeerGetter) which
//! is able to fetch the value from that node. If the local node itself owns the key, the picker
//! returns **None** and the value is loaded locally.
//!
//! The transport itself is not part of this module. An HTTP based implementation is provided
//! in [http](crate::http), but any other transport can be plugged in by implementing these
//! traits.
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

/// Describes a value requested from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// The name of the group on the remote node.
    pub group: String,
    /// The key to fetch.
    pub key: String,
}

/// Contains the value delivered by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// The raw value as stored or loaded by the peer.
    pub value: Bytes,
}

/// Fetches values from a single remote node.
#[async_trait]
pub trait PeerGetter: Send + Sync {
    /// Requests the value for the given group and key from the remote node.
    ///
    /// Any error (transport problems as well as errors reported by the peer) is returned as
    /// **Err**, in which case the caller will fall back to loading the value locally.
    async fn fetch(&self, request: &FetchRequest) -> anyhow::Result<FetchResponse>;

    /// Returns a short description of the peer, used for logging.
    fn address(&self) -> &str;
}

/// Selects the node which is responsible for a given key.
pub trait PeerPicker: Send + Sync {
    /// Returns the peer which owns the given key or **None** if the key should be loaded by
    /// the local node.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}
