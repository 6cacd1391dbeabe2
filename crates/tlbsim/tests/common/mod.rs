//! Shared integration-test fixtures.
//!
//! Grounded on the teacher's `tests/common/mocks/memory.rs` (a small,
//! transparent fake rather than a generated mock) — re-expressed for this
//! crate's `HostMemory` trait rather than the teacher's `Device`/bus trait.

use std::collections::HashMap;
use std::sync::Mutex;

use tlbsim_core::host::HostMemory;
use tlbsim_core::pgtable::{PTE_A, PTE_D, PTE_R, PTE_U, PTE_V, PTE_W, PTE_X, SATP_MODE_SV39};
use tlbsim_core::Request;

/// A `HashMap`-backed guest physical memory, recording every `invalidate_l0`
/// call it receives.
#[derive(Default)]
pub struct FakeHostMemory {
    mem: Mutex<HashMap<u64, u64>>,
    pub invalidations: Mutex<Vec<(i32, u64)>>,
}

impl FakeHostMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, addr: u64, value: u64) {
        self.mem.lock().unwrap().insert(addr, value);
    }

    pub fn get(&self, addr: u64) -> u64 {
        *self.mem.lock().unwrap().get(&addr).unwrap_or(&0)
    }

    /// Installs a flat, fully permissive single-leaf Sv39 page table mapping
    /// every VPN identically: root at PPN 0x200, one pointer level at 0x800,
    /// one RWXU leaf at 0x400 reused by every second-level index.
    pub fn install_identity_sv39(&self) {
        self.set((0x200 << 12) + 0, PTE_V | (0x800 << 10));
        for index in 0..512u64 {
            self.set((0x800 << 12) + index * 8, PTE_V | PTE_R | PTE_W | PTE_X | PTE_U | PTE_A | PTE_D | ((0x400 + index) << 10));
        }
    }
}

impl HostMemory for FakeHostMemory {
    fn phys_load(&self, addr: u64) -> u64 {
        *self.mem.lock().unwrap().get(&addr).unwrap_or(&0)
    }

    fn phys_cmpxchg(&self, addr: u64, expected: u64, new: u64) -> bool {
        let mut mem = self.mem.lock().unwrap();
        let slot = mem.entry(addr).or_insert(0);
        if *slot == expected {
            *slot = new;
            true
        } else {
            false
        }
    }

    fn invalidate_l0(&self, hartid: i32, vpn: u64) {
        self.invalidations.lock().unwrap().push((hartid, vpn));
    }
}

/// Builds a plain load request for `hartid`/`vpn` against an Sv39 tree rooted
/// at PPN `0x200`, with ASID 0 (substituted with the hart id by the
/// dispatcher) and no special privilege bits set.
pub fn load_request(hartid: i32, vpn: u64) -> Request {
    Request {
        satp: (SATP_MODE_SV39 << 60) | 0x200,
        vpn,
        asid: 0,
        hartid,
        ifetch: false,
        write: false,
        supervisor: false,
        sum: false,
        mxr: false,
    }
}
