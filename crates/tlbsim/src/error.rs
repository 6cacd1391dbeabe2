//! Error types.
//!
//! Configuration and replay are the only fallible surfaces in this crate (§7):
//! the hot translation path returns a plain `perm_code: i32` classification,
//! never a `Result`. Grounded on the teacher's `common/error.rs` `Trap` enum,
//! ported from a hand-written `Display` impl to a `thiserror` derive (a crate
//! the teacher already depends on elsewhere in its stack).

use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration errors, detected once at stack-construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A hart-isolator stage was placed in a shared-context template (`stlb`).
    #[error("hart isolator cannot be used in shared context (stlb)")]
    IsolatorInSharedContext,

    /// A `log` stage was placed outside the shared `stlb` template.
    #[error("access logger can only be used in shared context (stlb)")]
    LogOutsideSharedTlb,

    /// `replay` named a file that does not exist or could not be opened.
    #[error("replay trace file not found: {0}")]
    MissingReplayFile(PathBuf),

    /// A `set` stage's `assoc` does not evenly divide `size` into a
    /// power-of-two number of sets, or is zero.
    #[error("set-associative stage: size {size} is not divisible by assoc {assoc} into a power-of-two number of sets")]
    InvalidSetShape { size: usize, assoc: usize },

    /// Underlying I/O failure while reading a config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Underlying JSON deserialization failure.
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced while replaying a recorded access/flush trace.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The trace file ended mid-record: some bytes of a new record were read
    /// before hitting EOF, unlike a clean end-of-stream between records.
    #[error("truncated trace record")]
    Truncated,

    /// A record's enum discriminant did not match a known record kind.
    #[error("malformed trace record: unknown tag {0}")]
    UnknownTag(u64),

    /// Underlying (de)serialization failure.
    #[error("trace record decode error: {0}")]
    Decode(#[from] Box<bincode::ErrorKind>),

    /// Underlying I/O failure.
    #[error("trace I/O error: {0}")]
    Io(#[from] std::io::Error),
}
