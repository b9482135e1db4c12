//! Provides a directory of all cache groups of a node.
//!
//! A [Registry](Registry) is created once at startup and then handed to every component which
//! needs to resolve groups by name (e.g. the [HttpPool](crate::http::HttpPool) which serves
//! requests of other peers). Groups are only ever added, never removed. Creating a group with
//! a name which is already in use replaces the previous group.
//!
//! # Examples
//!
//! ```
//! # use peercache::group::GetterFunc;
//! # use peercache::registry::Registry;
//! let registry = Registry::new();
//! let _ = registry.new_group("scores", 1024, GetterFunc(|_: &str| Ok(b"1".to_vec())));
//!
//! assert_eq!(registry.get_group("scores").unwrap().name(), "scores");
//! assert_eq!(registry.get_group("unknown").is_none(), true);
//! ```
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::group::{Getter, Group};

/// Keeps all groups of a node by name.
///
/// Lookups only require a shared lock so that many tasks can resolve groups concurrently.
#[derive(Default)]
pub struct Registry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl Registry {
    /// Creates a new and empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Registry::default())
    }

    /// Creates a new group and registers it under the given name.
    ///
    /// The group will cache up to **max_memory** bytes of keys and values (0 = unbounded) and
    /// use the given getter to load values which are neither cached nor owned by a peer.
    pub fn new_group(
        &self,
        name: &str,
        max_memory: usize,
        getter: impl Getter + 'static,
    ) -> Arc<Group> {
        self.register(Group::new(name, max_memory, Box::new(getter)))
    }

    pub(crate) fn register(&self, group: Group) -> Arc<Group> {
        let group = Arc::new(group);
        let previous = self
            .groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(group.name().to_owned(), group.clone());

        if previous.is_some() {
            log::warn!("Replaced the existing group '{}'.", group.name());
        } else {
            log::info!(
                "Created group '{}' (max memory: {}).",
                group.name(),
                crate::fmt::format_size(group.main_cache().max_memory())
            );
        }

        group
    }

    /// Returns the group with the given name.
    pub fn get_group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Returns all registered groups, ordered by name.
    pub fn groups(&self) -> Vec<Arc<Group>> {
        let mut groups: Vec<Arc<Group>> = self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.name().cmp(b.name()));

        groups
    }

    /// Returns the number of registered groups.
    pub fn len(&self) -> usize {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Determines if no group has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
