// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer registry - the authoritative set of peers the broker fans out to.
//!
//! Backed by a single `RwLock<HashMap<...>>` rather than a lock-free map:
//! removals during a liveness sweep must be atomic with respect to the
//! broadcast fan-out the receive loop performs, which a read/write lock
//! discipline gives us for free.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// One entry in the broker's peer registry.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub addr: SocketAddr,
    pub last_seen: Instant,
}

/// Point-in-time view of one registry entry, safe to hand out past the lock.
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub id: String,
    pub addr: SocketAddr,
    pub last_seen_age: Duration,
}

/// Thread-safe peer registry shared by the receive loop and the liveness sweeper.
#[derive(Default)]
pub struct Registry {
    peers: RwLock<HashMap<String, PeerEntry>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or refresh `id` at `addr` with a fresh `last_seen`, as on a
    /// REGISTER or an implicit-REGISTER HEARTBEAT. Returns `true` if this is
    /// a newly observed peer.
    pub fn register(&self, id: &str, addr: SocketAddr) -> bool {
        let mut guard = recover_write(&self.peers, "Registry::register");
        let is_new = !guard.contains_key(id);
        guard.insert(
            id.to_string(),
            PeerEntry {
                addr,
                last_seen: Instant::now(),
            },
        );
        is_new
    }

    /// Refresh `last_seen` for an already-known peer. Returns `false` if the
    /// peer is not registered (the caller should then treat the frame as an
    /// implicit REGISTER).
    pub fn touch(&self, id: &str) -> bool {
        let mut guard = recover_write(&self.peers, "Registry::touch");
        match guard.get_mut(id) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Resolve a peer id to its last observed source address.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<SocketAddr> {
        recover_read(&self.peers, "Registry::lookup")
            .get(id)
            .map(|e| e.addr)
    }

    /// All `(id, addr)` pairs currently registered, excluding `exclude_id`.
    /// Used for broadcast fan-out: taken as a single atomic snapshot so a
    /// concurrent liveness removal can never race a broadcast mid-iteration.
    #[must_use]
    pub fn all_except(&self, exclude_id: &str) -> Vec<(String, SocketAddr)> {
        recover_read(&self.peers, "Registry::all_except")
            .iter()
            .filter(|(id, _)| id.as_str() != exclude_id)
            .map(|(id, entry)| (id.clone(), entry.addr))
            .collect()
    }

    /// Current registered ids, arbitrary order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        recover_read(&self.peers, "Registry::ids")
            .keys()
            .cloned()
            .collect()
    }

    /// Every currently registered address, arbitrary order.
    #[must_use]
    pub fn addrs(&self) -> Vec<SocketAddr> {
        recover_read(&self.peers, "Registry::addrs")
            .values()
            .map(|entry| entry.addr)
            .collect()
    }

    /// Point-in-time snapshot of every entry, for the administrative surface.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        let now = Instant::now();
        recover_read(&self.peers, "Registry::snapshot")
            .iter()
            .map(|(id, entry)| PeerSnapshot {
                id: id.clone(),
                addr: entry.addr,
                last_seen_age: now.saturating_duration_since(entry.last_seen),
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        recover_read(&self.peers, "Registry::len").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry whose `last_seen` is older than `window`. Returns
    /// the ids removed, so the caller can decide whether to rebroadcast the
    /// peer list.
    pub fn remove_expired(&self, window: Duration) -> Vec<String> {
        let now = Instant::now();
        let expired: Vec<String> = {
            let guard = recover_read(&self.peers, "Registry::remove_expired (scan)");
            guard
                .iter()
                .filter(|(_, entry)| now.saturating_duration_since(entry.last_seen) > window)
                .map(|(id, _)| id.clone())
                .collect()
        };

        if expired.is_empty() {
            return expired;
        }

        let mut guard = recover_write(&self.peers, "Registry::remove_expired (evict)");
        for id in &expired {
            guard.remove(id);
        }
        expired
    }
}

/// Macro-generated poisoned-lock recovery, matching the reference lease
/// tracker: a single panicked holder should not wedge every future lookup.
macro_rules! impl_recover_lock {
    ($fn_name:ident, $lock_method:ident, $guard_type:ty) => {
        fn $fn_name<'a, T>(lock: &'a RwLock<T>, context: &str) -> $guard_type {
            match lock.$lock_method() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    log::warn!("[broker] registry lock poisoned at {context}, recovering");
                    poisoned.into_inner()
                }
            }
        }
    };
}

impl_recover_lock!(recover_read, read, RwLockReadGuard<'a, T>);
impl_recover_lock!(recover_write, write, RwLockWriteGuard<'a, T>);

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn register_reports_new_peers_once() {
        let reg = Registry::new();
        assert!(reg.register("alice", addr(9001)));
        assert!(!reg.register("alice", addr(9001)));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn touch_requires_existing_registration() {
        let reg = Registry::new();
        assert!(!reg.touch("ghost"));
        reg.register("alice", addr(9001));
        assert!(reg.touch("alice"));
    }

    #[test]
    fn all_except_excludes_sender_and_reflects_registry() {
        let reg = Registry::new();
        reg.register("a", addr(1));
        reg.register("b", addr(2));
        reg.register("c", addr(3));

        let mut others: Vec<String> = reg
            .all_except("a")
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        others.sort();
        assert_eq!(others, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn remove_expired_evicts_only_stale_entries() {
        let reg = Registry::new();
        reg.register("stale", addr(1));
        std::thread::sleep(Duration::from_millis(20));
        reg.register("fresh", addr(2));

        let removed = reg.remove_expired(Duration::from_millis(10));
        assert_eq!(removed, vec!["stale".to_string()]);
        assert_eq!(reg.ids(), vec!["fresh".to_string()]);
    }

    #[test]
    fn lookup_resolves_registered_address() {
        let reg = Registry::new();
        reg.register("alice", addr(9001));
        assert_eq!(reg.lookup("alice"), Some(addr(9001)));
        assert_eq!(reg.lookup("bob"), None);
    }
}
