//! Set-associative FIFO cache level.
//!
//! Grounded on `original_source/include/assoc.h`'s `SetAssocTLB`: an array of
//! per-set [`FifoState`](super::assoc)-shaped associative sets, each with its
//! own lock, indexed by a realm-mixed hash of the VPN (SPEC_FULL.md §4.4).

use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use crate::asid::Asid;
use crate::cache::spinlock::Spinlock;
use crate::cache::CacheLevel;
use crate::entry::TlbEntry;
use crate::host::HostMemory;
use crate::stats::{Stats, TlbClass, TlbClassStats};

/// One associative set: identical shape to the fully associative level's
/// state, just smaller (associativity `A` rather than the whole level).
struct FifoSet {
    slots: Vec<TlbEntry>,
    valid: Vec<bool>,
    ptr: usize,
    insert_target: usize,
}

impl FifoSet {
    fn new(associativity: usize) -> Self {
        FifoSet {
            slots: vec![TlbEntry::default(); associativity],
            valid: vec![false; associativity],
            ptr: 0,
            insert_target: 0,
        }
    }

    fn find(&mut self, vpn: u64, asid: Asid) -> Option<TlbEntry> {
        let mut free = None;
        for (i, valid) in self.valid.iter().enumerate() {
            if !*valid {
                free.get_or_insert(i);
                continue;
            }
            let slot = self.slots[i];
            if slot.vpn == vpn && slot.asid.matches(asid) {
                self.insert_target = i;
                return Some(slot);
            }
        }
        self.insert_target = free.unwrap_or(self.ptr);
        None
    }

    fn insert(&mut self, entry: TlbEntry) -> Option<TlbEntry> {
        let target = self.insert_target;
        if target == self.ptr {
            self.ptr = (self.ptr + 1) % self.slots.len();
        }
        let evicted = self.valid[target].then(|| self.slots[target]);
        self.slots[target] = entry;
        self.valid[target] = true;
        evicted
    }

    fn flush(&mut self, asid: Asid, vpn: u64) -> u64 {
        let mut count = 0;
        for (i, valid) in self.valid.iter_mut().enumerate() {
            if !*valid {
                continue;
            }
            let slot = self.slots[i];
            if vpn != 0 && slot.vpn != vpn {
                continue;
            }
            if !slot.asid.matches_flush(asid) {
                continue;
            }
            *valid = false;
            count += 1;
        }
        count
    }
}

/// Computes the set index for `(asid, vpn)`: VPN bits XORed with the
/// byte-swapped realm, spread so harts sharing a cache do not collide
/// systematically. `idx_bits = log2(sets)`.
///
/// Global entries are indexed by their actual realm, the same as non-global
/// ones (SPEC_FULL.md §4.4's "stored in the same sets as non-global entries"
/// option, matching the original `SetAssocTLB::index`) — a global entry
/// inserted by realm `r` is only ever looked up by requests that also carry
/// realm `r`, so it must live in that realm's set, not a shared realm-0 one.
fn set_index(asid: Asid, vpn: u64, idx_bits: u32) -> usize {
    if idx_bits == 0 {
        return 0;
    }
    let realm = asid.realm().swap_bytes() >> (32 - idx_bits);
    let index = (vpn as u32) & ((1 << idx_bits) - 1);
    (index ^ realm) as usize
}

/// A set-associative, per-set-FIFO TLB level (SPEC_FULL.md §4.4).
pub struct SetAssocLevel {
    parent: Arc<dyn CacheLevel>,
    host: Arc<dyn HostMemory>,
    stats: Arc<Stats>,
    class: TlbClass,
    hartid: i32,
    cache_invalidated_entries: bool,
    hardware_pte_update: bool,
    idx_bits: u32,
    sets: Vec<Spinlock<FifoSet>>,
}

impl SetAssocLevel {
    /// `size` is the level's total capacity; `associativity` the per-set
    /// slot count. `size / associativity` must be a power of two.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        size: usize,
        associativity: usize,
        parent: Arc<dyn CacheLevel>,
        host: Arc<dyn HostMemory>,
        stats: Arc<Stats>,
        class: TlbClass,
        hartid: i32,
        cache_invalidated_entries: bool,
        hardware_pte_update: bool,
    ) -> Self {
        let num_sets = size / associativity;
        assert!(num_sets.is_power_of_two(), "set-associative level: size/associativity must be a power of two");
        let idx_bits = num_sets.trailing_zeros();
        let sets = (0..num_sets).map(|_| Spinlock::new(FifoSet::new(associativity))).collect();
        SetAssocLevel {
            parent,
            host,
            stats,
            class,
            hartid,
            cache_invalidated_entries,
            hardware_pte_update,
            idx_bits,
            sets,
        }
    }

    fn index_for(&self, asid: Asid, vpn: u64) -> usize {
        set_index(asid, vpn, self.idx_bits)
    }
}

impl CacheLevel for SetAssocLevel {
    fn find_and_lock(&self, entry: &mut TlbEntry) -> bool {
        let index = self.index_for(entry.asid, entry.vpn);
        let set = &self.sets[index];
        set.lock();
        // SAFETY: lock held across this call and the matching `unlock`/
        // `insert_and_unlock` on the same set.
        let state = unsafe { set.get_mut() };
        match state.find(entry.vpn, entry.asid) {
            Some(found) => {
                entry.ppn = found.ppn;
                entry.pte = found.pte;
                entry.granularity = found.granularity;
                true
            }
            None => false,
        }
    }

    fn unlock(&self, entry: &TlbEntry) {
        let index = self.index_for(entry.asid, entry.vpn);
        self.sets[index].unlock();
    }

    fn insert_and_unlock(&self, entry: TlbEntry) {
        let index = self.index_for(entry.asid, entry.vpn);
        let set = &self.sets[index];
        // SAFETY: see `find_and_lock`.
        let evicted = unsafe { set.get_mut() }.insert(entry);
        if let Some(victim) = evicted {
            self.class_stats().evict.fetch_add(1, Relaxed);
            if self.hartid != -1 {
                self.host.invalidate_l0(self.hartid, victim.vpn);
            }
        }
        set.unlock();
    }

    fn flush_local(&self, asid: Asid, vpn: u64) {
        let mut count = 0;
        if vpn == 0 {
            for set in &self.sets {
                set.lock();
                count += unsafe { set.get_mut() }.flush(asid, 0);
                set.unlock();
            }
        } else {
            let index = self.index_for(asid, vpn);
            let set = &self.sets[index];
            set.lock();
            count += unsafe { set.get_mut() }.flush(asid, vpn);
            set.unlock();
        }
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
