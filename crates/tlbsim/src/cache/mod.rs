//! The [`CacheLevel`] capability set and its default access/flush pipeline.
//!
//! Grounded on `original_source/include/tlb.h`'s abstract `TLB` class and
//! `src/tlb.cc`'s `access()`/`flush()` bodies (see DESIGN.md). The polymorphic
//! `TLB*` base class becomes a trait object (`dyn CacheLevel`); its pure
//! virtual `find_and_lock`/`unlock`/`insert_and_unlock`/`flush_local` become
//! required trait methods with a no-op default (mirroring the base class's
//! empty virtual bodies), while `access`/`flush` keep the teacher's shape of
//! a provided method built from the required ones — generalized here to
//! clean `if`/`return` control flow in place of the original's `goto unlock`.

pub mod assoc;
pub mod ideal;
pub mod isolate;
pub mod set_assoc;
pub(crate) mod spinlock;
pub mod validator;

use std::sync::atomic::Ordering::Relaxed;

use crate::asid::Asid;
use crate::entry::{Request, TlbEntry};
use crate::stats::{Stats, TlbClassStats};
use crate::walker::pte_permission_check;

/// One stage of a TLB stack: a cache level, the hart-isolator, a validator, or
/// the logger — anything that can sit between the dispatcher and the
/// page-walker.
///
/// `find_and_lock`/`unlock`/`insert_and_unlock`/`flush_local` are this
/// level's own primitives; `access`/`flush` are provided and implement the
/// pipeline of SPEC_FULL.md §4.2, built from those primitives and `parent()`.
/// A terminal level (the page-walker, or the log replayer) overrides `access`
/// and `flush` directly and leaves `parent()` at its `None` default.
pub trait CacheLevel: Send + Sync {
    /// Looks up `entry.vpn`/`entry.asid` and, on a locking implementation,
    /// acquires whatever lock covers the slot or set `entry` would occupy.
    /// On hit, overwrites `entry.ppn`/`entry.pte`/`entry.granularity`.
    fn find_and_lock(&self, entry: &mut TlbEntry) -> bool {
        let _ = entry;
        false
    }

    /// Releases a lock acquired by `find_and_lock` without inserting.
    fn unlock(&self, entry: &TlbEntry) {
        let _ = entry;
    }

    /// Inserts `entry` (replacing any FIFO victim) and releases the lock.
    fn insert_and_unlock(&self, entry: TlbEntry) {
        let _ = entry;
    }

    /// Invalidates this level's own entries matching `asid`/`vpn` (§3's
    /// flush-match semantics); does not recurse into `parent()`.
    fn flush_local(&self, asid: Asid, vpn: u64) {
        let (_, _) = (asid, vpn);
    }

    /// The next level up the stack (the parent TLB, or the page-walker at
    /// the top). `None` only for a terminal level that overrides `access`
    /// and `flush` and therefore never reaches the default bodies below.
    fn parent(&self) -> Option<&dyn CacheLevel> {
        None
    }

    /// This level's own miss/evict/flush counters.
    fn class_stats(&self) -> &TlbClassStats;

    /// The process-wide fault/flush counters, shared by every level.
    fn stats(&self) -> &Stats;

    /// Whether an entry that resolved to a fault should still be cached
    /// (`cache_invalidate_entries` in the configuration document, §6).
    fn cache_invalidated_entries(&self) -> bool;

    /// Whether a clean hit whose PTE needs an A/D refresh should still
    /// re-walk through `parent()` (`hardware_pte_update`, §6).
    fn hardware_pte_update(&self) -> bool;

    /// Default access pipeline (SPEC_FULL.md §4.2).
    fn access(&self, entry: &mut TlbEntry, req: &Request) -> i32 {
        if self.find_and_lock(entry) {
            let perm = pte_permission_check(entry.pte, req, self.stats());
            if perm <= 0 || !self.hardware_pte_update() {
                self.unlock(entry);
                return perm;
            }
        }

        self.class_stats().miss.fetch_add(1, Relaxed);
        let perm = self
            .parent()
            .expect("non-terminal cache level must have a parent")
            .access(entry, req);

        if !self.cache_invalidated_entries() && perm != 0 {
            self.unlock(entry);
            return perm;
        }

        self.insert_and_unlock(*entry);
        perm
    }

    /// Default flush routing: invalidate locally, then recurse to the parent.
    fn flush(&self, asid: Asid, vpn: u64) {
        self.flush_local(asid, vpn);
        if let Some(parent) = self.parent() {
            parent.flush(asid, vpn);
        }
    }
}
