//! Page-table walker: the terminal level of every TLB stack.
//!
//! Grounded on the teacher's `core/units/mmu/ptw.rs` (module shape: a decoded
//! PTE wrapper, a walk loop, and a separate permission-check helper) and on
//! the original walker algorithm described in SPEC_FULL.md §4.1 (no
//! `walker.cc` source survived retrieval verbatim, so the walk loop below is a
//! fresh implementation of the prose algorithm, following the teacher's
//! control-flow shape rather than the original's `goto`-based one).

use std::sync::Arc;

use crate::asid::Asid;
use crate::cache::CacheLevel;
use crate::entry::{Request, TlbEntry};
use crate::host::HostMemory;
use crate::pgtable::{Pte, PAGE_OFFSET_BITS, PTE_A, PTE_D, PTE_G, VPN_BITS_PER_LEVEL};
use crate::stats::{Stats, TlbClassStats};

/// Non-canonical VPN: distinct from an ordinary page fault so the ISS can
/// surface an access-fault rather than a page-fault if desired.
pub const PERM_NON_CANONICAL: i32 = -2;
/// Ordinary page-fault perm code (precise cause is recorded in `Stats`).
pub const PERM_FAULT: i32 = -1;

/// Classifies `pte` against `req`'s access mode, incrementing the matching
/// fault counter (or the A/D-update counter) in `stats`.
///
/// Returns `< 0` on fault, otherwise an OR-mask of PTE bits (`A`, and `D` if
/// the access is a store) that still need to be set — `0` means a clean hit
/// requiring no update.
#[must_use]
pub fn pte_permission_check(pte: u64, req: &Request, stats: &Stats) -> i32 {
    use std::sync::atomic::Ordering::Relaxed;

    let pte = Pte(pte);

    if !pte.is_valid() {
        stats.v_fault.fetch_add(1, Relaxed);
        return PERM_FAULT;
    }
    if pte.is_user() && req.supervisor && !req.sum {
        stats.u_fault.fetch_add(1, Relaxed);
        return PERM_FAULT;
    }
    if !pte.is_user() && !req.supervisor {
        stats.s_fault.fetch_add(1, Relaxed);
        return PERM_FAULT;
    }
    if !req.ifetch && !req.write && !(pte.readable() || (pte.executable() && req.mxr)) {
        stats.r_fault.fetch_add(1, Relaxed);
        return PERM_FAULT;
    }
    if req.write && !pte.writable() {
        stats.w_fault.fetch_add(1, Relaxed);
        return PERM_FAULT;
    }
    if req.ifetch && !pte.executable() {
        stats.x_fault.fetch_add(1, Relaxed);
        return PERM_FAULT;
    }

    let mask = PTE_A | if req.write { PTE_D } else { 0 };
    let update = mask & !(pte.0 & mask);
    if update & PTE_D != 0 {
        stats.d_fault.fetch_add(1, Relaxed);
    } else if update != 0 {
        stats.a_fault.fetch_add(1, Relaxed);
    }
    update as i32
}

/// Returns whether `vpn`'s low `vpn_bits` bits, sign-extended over the full
/// 64-bit width, reproduce `vpn` — the canonical-VPN check of SPEC_FULL.md §4.1.
#[must_use]
fn is_canonical(vpn: u64, vpn_bits: u32) -> bool {
    let shift = 64 - vpn_bits;
    let sign_extended = ((vpn << shift) as i64 >> shift) as u64;
    sign_extended == vpn
}

/// Walks the page table rooted at `req.satp`'s root PPN, resolving `entry`'s
/// `ppn`/`pte`/`granularity`/`asid` (global bit) in place.
///
/// Returns the perm code (see [`pte_permission_check`]), or
/// [`PERM_NON_CANONICAL`] for an out-of-range `vpn`.
///
/// # Panics
///
/// Panics if `req.satp`'s mode is neither Sv39 nor Sv48: an unsupported mode
/// can only mean the ISS violated the external contract of SPEC_FULL.md §6,
/// not a recoverable runtime condition.
pub fn page_table_walk(
    entry: &mut TlbEntry,
    req: &Request,
    host: &dyn HostMemory,
    stats: &Stats,
    hardware_pte_update: bool,
) -> i32 {
    let satp = req.satp();
    let levels = satp
        .levels()
        .unwrap_or_else(|| panic!("page-walker: unsupported satp mode {}", satp.mode));
    let vpn_bits = levels * VPN_BITS_PER_LEVEL;

    if !is_canonical(req.vpn, vpn_bits) {
        return PERM_NON_CANONICAL;
    }

    let mut ppn = satp.root_ppn;
    let mut global = false;

    for i in 0..levels {
        let bits_left = vpn_bits - VPN_BITS_PER_LEVEL * (i + 1);
        let index = (req.vpn >> bits_left) & 0x1FF;
        let pte_addr = (ppn << PAGE_OFFSET_BITS) + index * 8;
        let mut pte = Pte(host.phys_load(pte_addr));

        if !pte.is_valid() || pte.is_malformed() {
            entry.ppn = 0;
            entry.pte = 0;
            if global {
                entry.asid = entry.asid.with_global();
            }
            return pte_permission_check(0, req, stats);
        }

        if pte.is_global() {
            global = true;
        }

        if pte.is_pointer() {
            if i == levels - 1 {
                // A non-leaf PTE at the last level has nowhere left to point:
                // the table is malformed, which is a page fault, not UB.
                entry.ppn = 0;
                entry.pte = 0;
                if global {
                    entry.asid = entry.asid.with_global();
                }
                return pte_permission_check(0, req, stats);
            }
            ppn = pte.ppn();
            continue;
        }

        // Leaf: huge-page alignment check.
        if pte.ppn() & ((1u64 << bits_left) - 1) != 0 {
            entry.ppn = 0;
            entry.pte = 0;
            if global {
                entry.asid = entry.asid.with_global();
            }
            return pte_permission_check(0, req, stats);
        }

        let perm = pte_permission_check(pte.0, req, stats);
        if perm > 0 && hardware_pte_update {
            let updated = pte.with_update(perm as u64);
            if host.phys_cmpxchg(pte_addr, pte.0, updated.0) {
                pte = updated;
            }
        }

        entry.ppn = pte.ppn() | (req.vpn & ((1u64 << bits_left) - 1));
        entry.pte = pte.0;
        entry.granularity = (levels - 1 - i) as u8;
        if global {
            entry.asid = entry.asid.with_global();
        }
        return perm;
    }

    unreachable!("page table walk must terminate at a leaf or invalid PTE within `levels` steps")
}

/// The terminal level of every TLB stack: invokes [`page_table_walk`] directly
/// rather than delegating to a parent.
///
/// Grounded on `original_source/include/tlb.h`'s `PageWalker final: public TLB`,
/// which overrides `access` and gives `flush` an empty body.
pub struct PageWalker {
    host: Arc<dyn HostMemory>,
    stats: Arc<Stats>,
    hardware_pte_update: bool,
}

impl PageWalker {
    #[must_use]
    pub fn new(host: Arc<dyn HostMemory>, stats: Arc<Stats>, hardware_pte_update: bool) -> Self {
        PageWalker {
            host,
            stats,
            hardware_pte_update,
        }
    }
}

impl CacheLevel for PageWalker {
    fn access(&self, entry: &mut TlbEntry, req: &Request) -> i32 {
        page_table_walk(entry, req, self.host.as_ref(), &self.stats, self.hardware_pte_update)
    }

    fn flush(&self, _asid: Asid, _vpn: u64) {}

    fn class_stats(&self) -> &TlbClassStats {
        unreachable!("PageWalker overrides access() and never consults class_stats()")
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }

    fn cache_invalidated_entries(&self) -> bool {
        unreachable!("PageWalker overrides access() and never consults cache_invalidated_entries()")
    }

    fn hardware_pte_update(&self) -> bool {
        self.hardware_pte_update
    }
}
