//! Host memory callback interface.
//!
//! This module defines the [`HostMemory`] trait implemented by the ISS embedding
//! this simulator. It replaces the original `tlbsim_client_t` function-pointer
//! table (see DESIGN.md) with an idiomatic `Send + Sync` trait, mirroring the
//! teacher's own `Device` trait for bus-attached components.

/// Callback interface into the ISS's guest physical memory and L0 cache.
///
/// Implementors must be safe to call concurrently from multiple hart threads.
pub trait HostMemory: Send + Sync {
    /// Loads an aligned 8-byte machine word from guest physical memory.
    fn phys_load(&self, addr: u64) -> u64;

    /// Atomically compares-and-sets an aligned 8-byte word; returns whether the
    /// swap succeeded. Failure (a concurrent guest write raced ahead) is
    /// tolerated by the caller — the next access that needs the same update
    /// will retry.
    fn phys_cmpxchg(&self, addr: u64, expected: u64, new: u64) -> bool;

    /// Notifies the ISS that hart `hartid`'s L0 cache, if any, must drop `vpn`.
    ///
    /// Called on every eviction from a hart-associated cache level, preserving
    /// inclusion between this simulator and an ISS-owned L0 (SPEC_FULL.md §3).
    fn invalidate_l0(&self, hartid: i32, vpn: u64);
}
