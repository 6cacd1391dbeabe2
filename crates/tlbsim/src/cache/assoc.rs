//! Fully associative FIFO cache level.
//!
//! Grounded on `original_source/include/assoc.h`'s `FIFOCache`/`FIFOSet`/
//! `AssocTLB` (see DESIGN.md): a flat array of slots with a valid bitmap and a
//! single FIFO insertion pointer, guarded by one [`Spinlock`] for the whole
//! level.

use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use crate::asid::Asid;
use crate::cache::spinlock::Spinlock;
use crate::cache::CacheLevel;
use crate::entry::TlbEntry;
use crate::host::HostMemory;
use crate::stats::{Stats, TlbClass, TlbClassStats};

struct FifoState {
    slots: Vec<TlbEntry>,
    valid: Vec<bool>,
    /// Next slot the FIFO will evict when no free slot and no hit is found.
    ptr: usize,
    /// Slot `find` most recently chose for a prospective `insert`: the hit
    /// index, or the first free slot, or `ptr` as a last resort.
    insert_target: usize,
}

impl FifoState {
    fn new(size: usize) -> Self {
        FifoState {
            slots: vec![TlbEntry::default(); size],
            valid: vec![false; size],
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

    /// Writes `entry` into the slot chosen by the last `find`, advancing the
    /// FIFO pointer if that slot was the FIFO victim. Returns the evicted
    /// entry, if the target slot held one.
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

/// A fully associative, FIFO-replacement TLB level (SPEC_FULL.md §4.3).
pub struct AssocLevel {
    parent: Arc<dyn CacheLevel>,
    host: Arc<dyn HostMemory>,
    stats: Arc<Stats>,
    class: TlbClass,
    /// Hart this level is privately owned by, or `-1` for a shared level.
    hartid: i32,
    cache_invalidated_entries: bool,
    hardware_pte_update: bool,
    state: Spinlock<FifoState>,
}

impl AssocLevel {
    #[must_use]
    pub fn new(
        size: usize,
        parent: Arc<dyn CacheLevel>,
        host: Arc<dyn HostMemory>,
        stats: Arc<Stats>,
        class: TlbClass,
        hartid: i32,
        cache_invalidated_entries: bool,
        hardware_pte_update: bool,
    ) -> Self {
        AssocLevel {
            parent,
            host,
            stats,
            class,
            hartid,
            cache_invalidated_entries,
            hardware_pte_update,
            state: Spinlock::new(FifoState::new(size)),
        }
    }
}

impl CacheLevel for AssocLevel {
    fn find_and_lock(&self, entry: &mut TlbEntry) -> bool {
        self.state.lock();
        // SAFETY: lock held for the remainder of this method and across the
        // subsequent `unlock`/`insert_and_unlock` call on this same level.
        let state = unsafe { self.state.get_mut() };
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

    fn unlock(&self, _entry: &TlbEntry) {
        self.state.unlock();
    }

    fn insert_and_unlock(&self, entry: TlbEntry) {
        // SAFETY: the caller reached this method via `find_and_lock`, which
        // left the lock held.
        let evicted = unsafe { self.state.get_mut() }.insert(entry);
        if let Some(victim) = evicted {
            self.class_stats().evict.fetch_add(1, Relaxed);
            if self.hartid != -1 {
                self.host.invalidate_l0(self.hartid, victim.vpn);
            }
        }
        self.state.unlock();
    }

    fn flush_local(&self, asid: Asid, vpn: u64) {
        self.state.lock();
        let count = unsafe { self.state.get_mut() }.flush(asid, vpn);
        self.state.unlock();
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
