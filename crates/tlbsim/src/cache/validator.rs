//! Diagnostic-only validator stages.
//!
//! Grounded on `original_source/src/validator.cc`/`include/validator.h` for
//! [`AsidValidator`]; `TlbValidator`'s body never survived retrieval, so its
//! `access` is authored fresh from the prose of SPEC_FULL.md §4.7, composed
//! on top of [`IdealLevel`](super::ideal::IdealLevel) the way the original
//! `TLBValidator : public IdealTLB` inherits its cache.

use std::collections::HashMap;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use tracing::warn;

use crate::asid::Asid;
use crate::cache::ideal::IdealLevel;
use crate::cache::spinlock::Spinlock;
use crate::cache::CacheLevel;
use crate::entry::{Request, TlbEntry};
use crate::pgtable::{Pte, Satp, PTE_R, PTE_V, PTE_W, PTE_X};
use crate::stats::{Stats, TlbClassStats};
use crate::walker::pte_permission_check;

fn consistent_satp(a: u64, b: u64) -> bool {
    Satp::without_asid(a) == Satp::without_asid(b)
}

#[derive(Default)]
struct AsidTrackerState {
    /// Latest satp seen under each non-zero ASID.
    nonzero_asids: HashMap<u32, u64>,
    /// Latest satp seen under ASID 0, per hart.
    zero_asids: HashMap<i32, u64>,
}

/// Transparent upstream stage tracking ASID/satp consistency (SPEC_FULL.md §4.7).
///
/// Never alters a translation: `access` reports diagnostics, then delegates
/// to `parent` unconditionally.
pub struct AsidValidator {
    parent: Arc<dyn CacheLevel>,
    /// Below this ASID value, a non-zero ASID flush is also treated as
    /// possibly addressing a hart's ASID-0 identity (the heuristic named in
    /// SPEC_FULL.md §9's resolved Open Question).
    possibly_translated_hartid_bound: u32,
    state: Spinlock<AsidTrackerState>,
}

impl AsidValidator {
    #[must_use]
    pub fn new(parent: Arc<dyn CacheLevel>, possibly_translated_hartid_bound: u32) -> Self {
        AsidValidator {
            parent,
            possibly_translated_hartid_bound,
            state: Spinlock::new(AsidTrackerState::default()),
        }
    }

    fn track(&self, satp: u64, hartid: i32) {
        let asid = ((satp >> 44) & 0xFFFF) as u32;
        self.state.lock();
        // SAFETY: lock held for the duration of this method.
        let state = unsafe { self.state.get_mut() };

        if asid == 0 {
            state.nonzero_asids.retain(|&other_asid, other_satp| {
                if consistent_satp(satp, *other_satp) {
                    return true;
                }
                warn!(hartid, satp, other_asid, other_satp, "ASIDValidator: hart uses ASID 0 while a non-zero ASID is live under a different satp");
                false
            });
            if let Some(&prev) = state.zero_asids.get(&hartid) {
                if !consistent_satp(satp, prev) {
                    warn!(hartid, old = prev, new = satp, "ASIDValidator: hart reuses ASID 0 without an intervening flush");
                }
            }
            state.zero_asids.insert(hartid, satp);
        } else {
            if let Some(&prev) = state.nonzero_asids.get(&asid) {
                if !consistent_satp(satp, prev) {
                    warn!(asid, old = prev, new = satp, "ASIDValidator: ASID reused with a different satp without an intervening flush");
                }
            }
            state.zero_asids.retain(|&hart, zero_satp| {
                if consistent_satp(satp, *zero_satp) {
                    return true;
                }
                warn!(asid, satp, hart, zero_satp, "ASIDValidator: ASID now in use while a hart still holds an inconsistent satp under ASID 0");
                false
            });
            state.nonzero_asids.insert(asid, satp);
        }

        self.state.unlock();
    }
}

impl CacheLevel for AsidValidator {
    fn access(&self, entry: &mut TlbEntry, req: &Request) -> i32 {
        self.track(req.satp, req.hartid);
        self.parent.access(entry, req)
    }

    fn flush_local(&self, asid: Asid, vpn: u64) {
        // Only full-ASID flushes update tracking; page-level flushes leave it alone.
        if vpn != 0 {
            return;
        }
        self.state.lock();
        let state = unsafe { self.state.get_mut() };
        if asid.is_global() {
            state.zero_asids.clear();
            state.nonzero_asids.clear();
        } else {
            let a = asid.asid();
            if a < self.possibly_translated_hartid_bound {
                state.zero_asids.remove(&(a as i32));
            }
            state.nonzero_asids.remove(&a);
        }
        self.state.unlock();
    }

    fn parent(&self) -> Option<&dyn CacheLevel> {
        Some(self.parent.as_ref())
    }

    fn class_stats(&self) -> &TlbClassStats {
        unreachable!("AsidValidator overrides access() and never consults class_stats()")
    }

    fn stats(&self) -> &Stats {
        unreachable!("AsidValidator overrides access() and never consults stats()")
    }

    fn cache_invalidated_entries(&self) -> bool {
        unreachable!("AsidValidator overrides access() and never consults cache_invalidated_entries()")
    }

    fn hardware_pte_update(&self) -> bool {
        unreachable!("AsidValidator overrides access() and never consults hardware_pte_update()")
    }
}

/// Wraps an ideal level; on a cache hit, re-queries the real parent with a
/// duplicate of the entry to detect stale translations that should have been
/// flushed (SPEC_FULL.md §4.7). Diagnostics never change the returned `perm`.
pub struct TlbValidator {
    ideal: IdealLevel,
}

impl TlbValidator {
    #[must_use]
    pub fn new(ideal: IdealLevel) -> Self {
        TlbValidator { ideal }
    }

    fn diagnose(cached: &TlbEntry, shadow: &TlbEntry) {
        let cached_pte = Pte(cached.pte);
        let shadow_pte = Pte(shadow.pte);

        if !shadow_pte.is_valid() && cached_pte.is_valid() {
            warn!(vpn = cached.vpn, "TLBValidator: entry invalidated without an intervening flush");
            return;
        }
        if shadow.ppn != 0 && shadow.ppn != cached.ppn {
            warn!(vpn = cached.vpn, cached_ppn = cached.ppn, new_ppn = shadow.ppn, "TLBValidator: PPN changed without an intervening flush");
            return;
        }
        for (bit, name) in [(PTE_R, "R"), (PTE_W, "W"), (PTE_X, "X")] {
            if cached.pte & bit != 0 && shadow.pte & bit == 0 {
                warn!(vpn = cached.vpn, bit = name, "TLBValidator: permission reduced without an intervening flush");
            }
        }
    }
}

impl CacheLevel for TlbValidator {
    fn access(&self, entry: &mut TlbEntry, req: &Request) -> i32 {
        if self.ideal.find_and_lock(entry) {
            let perm = pte_permission_check(entry.pte, req, self.ideal.stats());
            if perm <= 0 || !self.ideal.hardware_pte_update() {
                let mut shadow = *entry;
                if let Some(parent) = self.ideal.parent() {
                    parent.access(&mut shadow, req);
                }
                Self::diagnose(entry, &shadow);
                self.ideal.unlock(entry);
                return perm;
            }
        }

        self.ideal.class_stats().miss.fetch_add(1, Relaxed);
        let perm = self
            .ideal
            .parent()
            .expect("TlbValidator's ideal cache must have a parent")
            .access(entry, req);

        if !self.ideal.cache_invalidated_entries() && perm != 0 {
            self.ideal.unlock(entry);
            return perm;
        }
        self.ideal.insert_and_unlock(*entry);
        perm
    }

    fn flush_local(&self, asid: Asid, vpn: u64) {
        self.ideal.flush_local(asid, vpn);
    }

    fn parent(&self) -> Option<&dyn CacheLevel> {
        self.ideal.parent()
    }

    fn class_stats(&self) -> &TlbClassStats {
        self.ideal.class_stats()
    }

    fn stats(&self) -> &Stats {
        self.ideal.stats()
    }

    fn cache_invalidated_entries(&self) -> bool {
        self.ideal.cache_invalidated_entries()
    }

    fn hardware_pte_update(&self) -> bool {
        self.ideal.hardware_pte_update()
    }
}
