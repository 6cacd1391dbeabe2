//! Translation request/response types and the cached TLB entry shape.
//!
//! Grounded on the original `tlbsim_req_t`/`tlbsim_resp_t`/`tlb_entry_t` structs
//! (see DESIGN.md), re-expressed with the packed [`Asid`](crate::asid::Asid) type
//! and `Copy` value semantics idiomatic for a hot lookup path.

use serde::{Deserialize, Serialize};

use crate::asid::Asid;
use crate::pgtable::Satp;

/// A translation request issued by the ISS for one hart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Raw `satp` register value at the time of the request.
    pub satp: u64,
    /// Virtual page number being translated (no page offset).
    pub vpn: u64,
    /// ASID supplied with the request; redundant with `satp`'s ASID field but
    /// kept separate for convenience. `0` is substituted with the hart id by
    /// the top-level dispatcher before descent (§4.9).
    pub asid: i32,
    /// The requesting hart.
    pub hartid: i32,
    /// Instruction fetch (vs. data access).
    pub ifetch: bool,
    /// Store (vs. load), meaningless when `ifetch` is set.
    pub write: bool,
    /// Supervisor-mode access.
    pub supervisor: bool,
    /// `sstatus.SUM` — supervisor access to user pages permitted.
    pub sum: bool,
    /// `sstatus.MXR` — executable pages are also readable.
    pub mxr: bool,
}

impl Request {
    /// Decodes this request's `satp` field.
    #[must_use]
    pub fn satp(&self) -> Satp {
        Satp::decode(self.satp)
    }
}

/// A response to a translation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Response {
    /// Resolved physical page number ("as if 4 KiB": huge-page leaf bits pre-OR'd in).
    pub ppn: u64,
    /// The resolved page-table entry (post A/D update, if any).
    pub pte: u64,
    /// Leaf level: 0 = 4 KiB, 1 = 2 MiB, 2 = 1 GiB, 3 = 512 GiB.
    pub granularity: u8,
    /// `true` if the access is permitted.
    pub perm: bool,
}

/// An entry cached in (or being looked up through) a TLB level.
///
/// `valid` is not stored explicitly; a slot holds a valid entry iff its `asid`
/// is not [`Asid::INVALID`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlbEntry {
    /// Virtual page number.
    pub vpn: u64,
    /// Physical page number, "as if 4 KiB" (see [`TlbEntry`] docs).
    pub ppn: u64,
    /// The full PTE, including permission/accessed/dirty bits.
    pub pte: u64,
    /// The ASID (and realm/global flag) this entry was resolved under.
    pub asid: Asid,
    /// Leaf level: 0 = 4 KiB, 1 = 2 MiB, 2 = 1 GiB, 3 = 512 GiB.
    pub granularity: u8,
}

impl TlbEntry {
    /// Builds an empty (invalid) entry for the given VPN/ASID, ready to be passed
    /// through `find_and_lock`.
    #[must_use]
    pub fn lookup(vpn: u64, asid: Asid) -> Self {
        TlbEntry {
            vpn,
            ppn: 0,
            pte: 0,
            asid,
            granularity: 0,
        }
    }

    /// Whether this entry holds a resolved translation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.asid.is_valid()
    }

    /// Marks this entry invalid in place.
    pub fn invalidate(&mut self) {
        self.asid = Asid::INVALID;
    }
}

impl Default for TlbEntry {
    fn default() -> Self {
        TlbEntry {
            vpn: 0,
            ppn: 0,
            pte: 0,
            asid: Asid::INVALID,
            granularity: 0,
        }
    }
}
