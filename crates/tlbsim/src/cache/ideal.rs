//! Ideal (unbounded) cache level.
//!
//! Grounded on `original_source/ideal.h`'s `IdealTLB`: a coarse-locked hash
//! map keyed by `(vpn, asid)`, plus a second map for global entries keyed by
//! `(vpn, realm)` so a global page is found regardless of the requesting
//! ASID (SPEC_FULL.md §4.5). Never evicts, so it never calls `invalidate_l0`
//! and has no hart association.

use std::collections::HashMap;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use crate::asid::Asid;
use crate::cache::spinlock::Spinlock;
use crate::cache::CacheLevel;
use crate::entry::TlbEntry;
use crate::stats::{Stats, TlbClass, TlbClassStats};

#[derive(Default)]
struct Maps {
    /// Keyed by `(vpn, asid.realm(), asid.asid())`.
    by_asid: HashMap<(u64, u32, u32), TlbEntry>,
    /// Keyed by `(vpn, asid.realm())` — ASID-agnostic within a realm.
    global: HashMap<(u64, u32), TlbEntry>,
}

/// A hash-map-backed level with no capacity limit (SPEC_FULL.md §4.5).
pub struct IdealLevel {
    parent: Arc<dyn CacheLevel>,
    stats: Arc<Stats>,
    class: TlbClass,
    cache_invalidated_entries: bool,
    hardware_pte_update: bool,
    maps: Spinlock<Maps>,
}

impl IdealLevel {
    #[must_use]
    pub fn new(
        parent: Arc<dyn CacheLevel>,
        stats: Arc<Stats>,
        class: TlbClass,
        cache_invalidated_entries: bool,
        hardware_pte_update: bool,
    ) -> Self {
        IdealLevel {
            parent,
            stats,
            class,
            cache_invalidated_entries,
            hardware_pte_update,
            maps: Spinlock::new(Maps::default()),
        }
    }
}

impl CacheLevel for IdealLevel {
    fn find_and_lock(&self, entry: &mut TlbEntry) -> bool {
        self.maps.lock();
        // SAFETY: lock held across this call and the matching `unlock`/
        // `insert_and_unlock`.
        let maps = unsafe { self.maps.get_mut() };
        if let Some(found) = maps.global.get(&(entry.vpn, entry.asid.realm())) {
            entry.ppn = found.ppn;
            entry.pte = found.pte;
            entry.granularity = found.granularity;
            return true;
        }
        if let Some(found) = maps.by_asid.get(&(entry.vpn, entry.asid.realm(), entry.asid.asid())) {
            entry.ppn = found.ppn;
            entry.pte = found.pte;
            entry.granularity = found.granularity;
            return true;
        }
        false
    }

    fn unlock(&self, _entry: &TlbEntry) {
        self.maps.unlock();
    }

    fn insert_and_unlock(&self, entry: TlbEntry) {
        // SAFETY: see `find_and_lock`.
        let maps = unsafe { self.maps.get_mut() };
        if entry.asid.is_global() {
            maps.global.insert((entry.vpn, entry.asid.realm()), entry);
        } else {
            maps.by_asid.insert((entry.vpn, entry.asid.realm(), entry.asid.asid()), entry);
        }
        self.maps.unlock();
    }

    fn flush_local(&self, asid: Asid, vpn: u64) {
        self.maps.lock();
        let maps = unsafe { self.maps.get_mut() };
        let mut count: u64 = 0;

        let mut evict = |key_vpn: u64, entry: &TlbEntry| -> bool {
            let hit = (vpn == 0 || key_vpn == vpn) && entry.asid.matches_flush(asid);
            if hit {
                count += 1;
            }
            hit
        };
        maps.global.retain(|(key_vpn, _), entry| !evict(*key_vpn, entry));
        maps.by_asid.retain(|(key_vpn, ..), entry| !evict(*key_vpn, entry));

        self.maps.unlock();
        self.class_stats().flush.fetch_add(count, Relaxed);
    }

    fn parent(&self) -> Option<&dyn CacheLevel> {
        Some(self.parent.as_ref())
    }

    fn class_stats(&self) -> &TlbClassStats {
        self.stats.class(self.class)
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }

    fn cache_invalidated_entries(&self) -> bool {
        self.cache_invalidated_entries
    }

    fn hardware_pte_update(&self) -> bool {
        self.hardware_pte_update
    }
}
