//! Hart-isolator stage.
//!
//! Grounded on `original_source/src/config.cc`'s `HartIsolator`: brands an
//! ASID with the owning hart's id in the realm field before descending into
//! a shared upper-level stack, then restores the original realm on the way
//! back out, so harts sharing that stack never alias translations
//! (SPEC_FULL.md §4.6).

use std::sync::Arc;

use crate::asid::Asid;
use crate::cache::CacheLevel;
use crate::entry::{Request, TlbEntry};
use crate::stats::{Stats, TlbClassStats};

/// Brands descent into `parent` with `hartid`, restoring the original realm
/// (but keeping any global bit set by the walk) before returning.
pub struct IsolateLevel {
    parent: Arc<dyn CacheLevel>,
    hartid: i32,
}

impl IsolateLevel {
    #[must_use]
    pub fn new(parent: Arc<dyn CacheLevel>, hartid: i32) -> Self {
        IsolateLevel { parent, hartid }
    }

    fn branded(asid: Asid, hartid: i32) -> Asid {
        asid.with_realm(hartid as u32)
    }
}

impl CacheLevel for IsolateLevel {
    fn access(&self, entry: &mut TlbEntry, req: &Request) -> i32 {
        let original_realm = entry.asid.realm();
        entry.asid = Self::branded(entry.asid, self.hartid);
        let perm = self.parent.access(entry, req);
        entry.asid = entry.asid.with_realm(original_realm);
        perm
    }

    fn flush(&self, asid: Asid, vpn: u64) {
        self.parent.flush(Self::branded(asid, self.hartid), vpn);
    }

    fn class_stats(&self) -> &TlbClassStats {
        unreachable!("IsolateLevel overrides access()/flush() and never consults class_stats()")
    }

    fn stats(&self) -> &Stats {
        unreachable!("IsolateLevel overrides access()/flush() and never consults stats()")
    }

    fn cache_invalidated_entries(&self) -> bool {
        unreachable!("IsolateLevel overrides access() and never consults cache_invalidated_entries()")
    }

    fn hardware_pte_update(&self) -> bool {
        unreachable!("IsolateLevel overrides access() and never consults hardware_pte_update()")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingParent {
        seen_realm: std::sync::Mutex<Option<u32>>,
    }

    impl CacheLevel for RecordingParent {
        fn access(&self, entry: &mut TlbEntry, _req: &Request) -> i32 {
            *self.seen_realm.lock().unwrap() = Some(entry.asid.realm());
            entry.ppn = entry.vpn;
            0
        }
        fn flush(&self, asid: Asid, _vpn: u64) {
            *self.seen_realm.lock().unwrap() = Some(asid.realm());
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

    fn req() -> Request {
        Request {
            satp: 0,
            vpn: 0,
            asid: 0,
            hartid: 7,
            ifetch: false,
            write: false,
            supervisor: false,
            sum: false,
            mxr: false,
        }
    }

    #[test]
    fn access_brands_then_restores_realm() {
        let parent = Arc::new(RecordingParent { seen_realm: std::sync::Mutex::new(None) });
        let isolator = IsolateLevel::new(parent.clone(), 7);

        let mut entry = TlbEntry::lookup(0, Asid::new(false, 0, 3));
        isolator.access(&mut entry, &req());

        assert_eq!(*parent.seen_realm.lock().unwrap(), Some(7), "parent must see the hart-branded realm");
        assert_eq!(entry.asid.realm(), 0, "caller's realm must be restored after descent");
        assert_eq!(entry.asid.asid(), 3, "ASID proper must be untouched");
    }

    #[test]
    fn flush_brands_before_forwarding() {
        let parent = Arc::new(RecordingParent { seen_realm: std::sync::Mutex::new(None) });
        let isolator = IsolateLevel::new(parent.clone(), 7);

        isolator.flush(Asid::plain(3), 0);

        assert_eq!(*parent.seen_realm.lock().unwrap(), Some(7));
    }
}
