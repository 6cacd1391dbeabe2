//! Access logger and log replayer.
//!
//! Grounded on `original_source/include/offline.h`/`src/offline.cc`'s
//! `AccessLogger`/`LogReplayer`. The original's `packet_t` is a C union with a
//! tag byte; here it becomes a tagged [`Record`] enum serialised with
//! `bincode` (SPEC_FULL.md §4.8, §6) — no reinterpretation of raw bytes, but
//! the same "logger output feeds replayer input directly" contract.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::asid::Asid;
use crate::cache::spinlock::Spinlock;
use crate::cache::CacheLevel;
use crate::entry::{Request, TlbEntry};
use crate::error::ReplayError;
use crate::stats::{Stats, TlbClassStats};
use crate::walker::pte_permission_check;

/// One recorded event: a resolved access, or a flush call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Record {
    Access { req: Request, resolved: TlbEntry },
    Flush { asid: Asid, vpn: u64 },
}

/// Shared stage sitting directly above the page-walker: records every
/// resolved access and every flush, then (for access only) forwards to the
/// real parent — the architecture the original names `ISASim -> L1 ->
/// AccessLogger -> PageWalker`.
///
/// `flush` does *not* forward to `parent`: the original does not either,
/// since nothing below the logger holds cacheable state worth invalidating.
pub struct AccessLogger {
    parent: Arc<dyn CacheLevel>,
    writer: Spinlock<BufWriter<File>>,
}

impl AccessLogger {
    #[must_use]
    pub fn new(parent: Arc<dyn CacheLevel>, file: File) -> Self {
        AccessLogger {
            parent,
            writer: Spinlock::new(BufWriter::new(file)),
        }
    }
}

impl CacheLevel for AccessLogger {
    fn access(&self, entry: &mut TlbEntry, req: &Request) -> i32 {
        self.writer.lock();
        let perm = self.parent.access(entry, req);
        let record = Record::Access { req: *req, resolved: *entry };
        // SAFETY: lock held for the duration of this method.
        let writer = unsafe { self.writer.get_mut() };
        if let Err(err) = bincode::serialize_into(&mut *writer, &record) {
            warn!("trace write failed: {err}");
        }
        self.writer.unlock();
        perm
    }

    fn flush(&self, asid: Asid, vpn: u64) {
        self.writer.lock();
        let record = Record::Flush { asid, vpn };
        let writer = unsafe { self.writer.get_mut() };
        if let Err(err) = bincode::serialize_into(&mut *writer, &record) {
            warn!("trace write failed: {err}");
        }
        self.writer.unlock();
    }

    fn class_stats(&self) -> &TlbClassStats {
        unreachable!("AccessLogger overrides access()/flush() and never consults class_stats()")
    }

    fn stats(&self) -> &Stats {
        unreachable!("AccessLogger overrides access()/flush() and never consults stats()")
    }

    fn cache_invalidated_entries(&self) -> bool {
        unreachable!("AccessLogger overrides access() and never consults cache_invalidated_entries()")
    }

    fn hardware_pte_update(&self) -> bool {
        unreachable!("AccessLogger overrides access() and never consults hardware_pte_update()")
    }
}

impl Drop for AccessLogger {
    /// Flushes buffered writes on teardown (SPEC_FULL.md §5: the buffered
    /// writer must not lose its tail when the process exits).
    fn drop(&mut self) {
        self.writer.lock();
        // SAFETY: lock held for the duration of this flush.
        let writer = unsafe { self.writer.get_mut() };
        let _ = writer.flush();
        self.writer.unlock();
    }
}

/// Top-of-stack substitute for the page-walker: stands in as the terminal
/// parent of a device-under-test stack during replay. Every `access` must be
/// the one currently loaded by [`LogReplayer::next_record`] — it returns the
/// recorded pre-resolved entry and recomputes only `perm`, exactly like the
/// original's `assert(&req == &req_ut)` followed by `pte_permission_check`.
pub struct LogReplayer {
    reader: Spinlock<BufReader<File>>,
    stats: Arc<Stats>,
    pending: Spinlock<Option<TlbEntry>>,
}

impl LogReplayer {
    #[must_use]
    pub fn new(file: File, stats: Arc<Stats>) -> Self {
        LogReplayer {
            reader: Spinlock::new(BufReader::new(file)),
            stats,
            pending: Spinlock::new(None),
        }
    }

    /// Reads one record from the trace, or `None` on clean EOF.
    ///
    /// # Errors
    /// Returns [`ReplayError::Truncated`] if the stream ends partway through
    /// a record, [`ReplayError::UnknownTag`] if a record's discriminant does
    /// not name a known variant, or [`ReplayError::Decode`] on any other
    /// malformed record.
    fn next_record(&self) -> Result<Option<Record>, ReplayError> {
        self.reader.lock();
        // SAFETY: lock held for the duration of this method.
        let reader = unsafe { self.reader.get_mut() };

        // A clean end-of-stream has zero bytes available before we even try
        // to decode; anything else that then hits EOF mid-decode is a
        // genuinely truncated record.
        let at_clean_eof = match reader.fill_buf() {
            Ok(buf) => buf.is_empty(),
            Err(err) => {
                self.reader.unlock();
                return Err(ReplayError::Io(err));
            }
        };
        if at_clean_eof {
            self.reader.unlock();
            return Ok(None);
        }

        let result = bincode::deserialize_from(&mut *reader);
        self.reader.unlock();

        match result {
            Ok(record) => Ok(Some(record)),
            Err(err) => match *err {
                bincode::ErrorKind::Io(io_err) if io_err.kind() == std::io::ErrorKind::UnexpectedEof => Err(ReplayError::Truncated),
                bincode::ErrorKind::InvalidTagEncoding(tag) => Err(ReplayError::UnknownTag(tag as u64)),
                _ => Err(ReplayError::Decode(err)),
            },
        }
    }

    /// Reads one record and drives it into `target`: an `Access` record
    /// issues `target.access(...)` with a freshly built entry (VPN/ASID from
    /// the recorded request, exactly as the original rebuilds `tlb_entry_t`);
    /// a `Flush` record issues `target.flush(...)`. Returns `false` on clean
    /// EOF, matching the original's `bool replay_step`.
    ///
    /// # Errors
    /// Propagates [`ReplayError`] from a malformed record.
    pub fn replay_step(&self, target: &dyn CacheLevel) -> Result<bool, ReplayError> {
        let Some(record) = self.next_record()? else {
            return Ok(false);
        };
        match record {
            Record::Access { req, resolved } => {
                self.pending.lock();
                // SAFETY: lock held across this call and the matching
                // `access()` call below that consumes it.
                *unsafe { self.pending.get_mut() } = Some(resolved);
                self.pending.unlock();

                let mut entry = TlbEntry::lookup(req.vpn, Asid::plain(req.asid as u32));
                target.access(&mut entry, &req);
            }
            Record::Flush { asid, vpn } => target.flush(asid, vpn),
        }
        Ok(true)
    }
}

impl CacheLevel for LogReplayer {
    fn access(&self, entry: &mut TlbEntry, req: &Request) -> i32 {
        self.pending.lock();
        // SAFETY: `replay_step` always populates this before calling through
        // to a device-under-test stack that bottoms out here.
        let resolved = unsafe { self.pending.get_mut() }
            .take()
            .expect("LogReplayer consulted outside of replay_step");
        self.pending.unlock();

        entry.ppn = resolved.ppn;
        entry.pte = resolved.pte;
        entry.granularity = resolved.granularity;
        pte_permission_check(entry.pte, req, &self.stats)
    }

    fn flush(&self, _asid: Asid, _vpn: u64) {}

    fn class_stats(&self) -> &TlbClassStats {
        unreachable!("LogReplayer overrides access() and never consults class_stats()")
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }

    fn cache_invalidated_entries(&self) -> bool {
        unreachable!("LogReplayer overrides access() and never consults cache_invalidated_entries()")
    }

    fn hardware_pte_update(&self) -> bool {
        unreachable!("LogReplayer overrides access() and never consults hardware_pte_update()")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pgtable::{PTE_A, PTE_R, PTE_U, PTE_V};
    use tempfile::NamedTempFile;

    fn req(vpn: u64) -> Request {
        Request {
            satp: 0,
            vpn,
            asid: 0,
            hartid: 0,
            ifetch: false,
            write: false,
            supervisor: false,
            sum: false,
            mxr: false,
        }
    }

    struct StubParent;
    impl CacheLevel for StubParent {
        fn access(&self, entry: &mut TlbEntry, _req: &Request) -> i32 {
            entry.ppn = entry.vpn;
            entry.pte = PTE_V | PTE_U | PTE_R | PTE_A;
            0
        }
        fn class_stats(&self) -> &TlbClassStats {
            unreachable!()
        }
        fn stats(&self) -> &Stats {
            unreachable!()
        }
        fn cache_invalidated_entries(&self) -> bool {
            false
        }
        fn hardware_pte_update(&self) -> bool {
            true
        }
    }

    #[test]
    fn logger_then_replayer_round_trips_access() {
        let trace = NamedTempFile::new().unwrap();

        {
            let logger = AccessLogger::new(Arc::new(StubParent), trace.reopen().unwrap());
            let mut entry = TlbEntry::lookup(12, Asid::plain(0));
            let perm = logger.access(&mut entry, &req(12));
            assert_eq!(perm, 0);
            logger.flush(Asid::plain(0), 0);
        }

        let replayer = LogReplayer::new(trace.reopen().unwrap(), Arc::new(Stats::new()));
        let mut observed = Vec::new();
        struct RecordingDut<'a>(&'a mut Vec<(u64, i32)>);
        impl CacheLevel for RecordingDut<'_> {
            fn access(&self, entry: &mut TlbEntry, req: &Request) -> i32 {
                let _ = entry;
                0
            }
            fn flush(&self, _asid: Asid, vpn: u64) {
                let _ = vpn;
            }
            fn class_stats(&self) -> &TlbClassStats {
                unreachable!()
            }
            fn stats(&self) -> &Stats {
                unreachable!()
            }
            fn cache_invalidated_entries(&self) -> bool {
                false
            }
            fn hardware_pte_update(&self) -> bool {
                true
            }
        }
        let dut = RecordingDut(&mut observed);

        assert!(replayer.replay_step(&dut).unwrap(), "first record: access");
        assert!(replayer.replay_step(&dut).unwrap(), "second record: flush");
        assert!(!replayer.replay_step(&dut).unwrap(), "clean EOF after two records");
    }

    #[test]
    fn truncated_mid_record_is_reported_not_treated_as_clean_eof() {
        let trace = NamedTempFile::new().unwrap();
        let mut full = Vec::new();
        bincode::serialize_into(&mut full, &Record::Flush { asid: Asid::plain(0), vpn: 0 }).unwrap();
        std::fs::write(trace.path(), &full[..full.len() - 1]).unwrap();

        let replayer = LogReplayer::new(trace.reopen().unwrap(), Arc::new(Stats::new()));
        let err = replayer.replay_step(&StubParent).unwrap_err();
        assert!(matches!(err, ReplayError::Truncated), "expected Truncated, got {err:?}");
    }

    #[test]
    fn replayer_recomputes_perm_from_recorded_pte_on_access() {
        let trace = NamedTempFile::new().unwrap();
        let replayer = LogReplayer::new(trace.reopen().unwrap(), Arc::new(Stats::new()));

        replayer.pending.lock();
        // SAFETY: single-threaded test, lock held for the duration of the write.
        *unsafe { replayer.pending.get_mut() } = Some(TlbEntry {
            vpn: 3,
            ppn: 3,
            pte: PTE_V | PTE_U | PTE_R,
            asid: Asid::plain(0),
            granularity: 0,
        });
        replayer.pending.unlock();

        let mut entry = TlbEntry::lookup(3, Asid::plain(0));
        let mut write_req = req(3);
        write_req.write = true;
        let perm = replayer.access(&mut entry, &write_req);
        assert!(perm < 0, "write against a read-only recorded PTE must fault");
    }
}
