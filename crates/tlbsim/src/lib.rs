//! A RISC-V TLB hierarchy simulator.
//!
//! This crate models the address-translation side of a RISC-V hart: a
//! page-table walker (§4.1) sitting beneath a configurable forest of cache
//! levels (§4.2-4.6), optionally wrapped in diagnostic validators (§4.7) or an
//! access logger/replayer (§4.8), all driven through one per-hart dispatcher
//! (§4.9). It does not model the instruction-set simulator itself — only the
//! `HostMemory` callback interface (§6) that connects this simulator to one.
//!
//! 1. **Page-walker:** `walker`/`pgtable` — the terminal stage of every stack.
//! 2. **Cache levels:** `cache` — the `CacheLevel` trait and its concrete
//!    fully-associative, set-associative, ideal, hart-isolator, and validator
//!    implementations.
//! 3. **Access log:** `offline` — `AccessLogger`/`LogReplayer`.
//! 4. **Dispatch:** `dispatch` — `Simulator`, the public entry point.
//! 5. **Configuration:** `config` — `Config`, loaded from JSON.
//! 6. **Statistics:** `stats` — `Stats`, the shared counter set.

/// Packed address-space identifier (global flag, realm, ASID).
pub mod asid;
/// The `CacheLevel` trait and its concrete implementations.
pub mod cache;
/// Simulator configuration (JSON-backed `Config`, stage templates).
pub mod config;
/// Top-level dispatch: per-hart stack construction and flush routing.
pub mod dispatch;
/// Translation request/response types and the cached TLB entry shape.
pub mod entry;
/// Error types (`ConfigError`, `ReplayError`).
pub mod error;
/// The `HostMemory` callback trait into guest physical memory and L0.
pub mod host;
/// Access logger and log replayer.
pub mod offline;
/// SATP/PTE decoding helpers.
pub mod pgtable;
/// Simulation statistics collection and reporting.
pub mod stats;
/// Page-table walker: the terminal level of every TLB stack.
pub mod walker;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// The top-level simulator; construct with `Simulator::new`.
pub use crate::dispatch::Simulator;
/// A translation request and its response.
pub use crate::entry::{Request, Response};
/// The host callback interface an embedding ISS implements.
pub use crate::host::HostMemory;
/// Process-wide simulation statistics.
pub use crate::stats::Stats;
