//! Routing table for the burrow relay
//!
//! Maps a virtual hostname to the set of agent sessions that registered
//! it. A host may have many entries (several agents registering the same
//! host gives load balancing and redundancy); `get_random` picks one
//! uniformly for each public request.
//!
//! The table is NOT internally synchronized. The relay owns it inside
//! its state lock and serializes every mutation; keeping the lock out of
//! this crate lets multi-table updates stay atomic at the call site.

use rand::Rng;
use std::collections::HashMap;

/// One-to-many map from hostname to registered entries.
#[derive(Debug)]
pub struct RoutingTable<V> {
    routes: HashMap<String, Vec<V>>,
}

impl<V: Clone + PartialEq> RoutingTable<V> {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Append an entry under `host`. An entry already present (by
    /// equality) is not inserted twice.
    pub fn add(&mut self, host: &str, entry: V) {
        let entries = self.routes.entry(host.to_string()).or_default();
        if !entries.contains(&entry) {
            entries.push(entry);
        }
    }

    /// Remove the first entry equal to `entry` from `host`. If that was
    /// the last entry, the host key is dropped entirely.
    pub fn remove(&mut self, host: &str, entry: &V) {
        if let Some(entries) = self.routes.get_mut(host) {
            if let Some(pos) = entries.iter().position(|e| e == entry) {
                entries.remove(pos);
            }
            if entries.is_empty() {
                self.routes.remove(host);
            }
        }
    }

    /// Pick a uniformly random entry for `host`, if any.
    ///
    /// Uses the thread-local RNG so concurrent lookups never contend on
    /// a shared generator.
    pub fn get_random(&self, host: &str) -> Option<&V> {
        let entries = self.routes.get(host)?;
        if entries.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..entries.len());
        entries.get(idx)
    }

    /// All entries for `host`, in registration order.
    pub fn get_all(&self, host: &str) -> &[V] {
        self.routes.get(host).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Remove `entry` from every host it appears under. Defensive
    /// cleanup path; hosts left empty are dropped.
    pub fn remove_value(&mut self, entry: &V) {
        self.routes.retain(|_, entries| {
            if let Some(pos) = entries.iter().position(|e| e == entry) {
                entries.remove(pos);
            }
            !entries.is_empty()
        });
    }

    /// Whether `host` has at least one entry.
    pub fn has(&self, host: &str) -> bool {
        self.routes.get(host).is_some_and(|e| !e.is_empty())
    }

    /// Number of entries registered for `host`.
    pub fn count(&self, host: &str) -> usize {
        self.routes.get(host).map(Vec::len).unwrap_or(0)
    }

    /// Number of hosts with at least one entry.
    pub fn host_count(&self) -> usize {
        self.routes.len()
    }
}

impl<V: Clone + PartialEq> Default for RoutingTable<V> {
    fn default() -> Self {
        Self::new()
    }
}
