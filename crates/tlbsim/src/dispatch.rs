//! Top-level dispatch: per-hart stack construction and flush routing.
//!
//! Grounded on `original_source/src/sim.cc`'s `tlbsim_access`/`tlbsim_flush`
//! (lazy per-hart setup, ASID-0 remapping, flush-kind counters, the
//! flush_local-on-I/flush-on-D asymmetry) and `src/config.cc`'s
//! `setup_private_tlb`/`instantiate` (template stacking order, the `inv`
//! hart-invalidation-ownership flag) — see SPEC_FULL.md §4.9, DESIGN.md.

use std::collections::HashMap;
use std::fs::File;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::asid::Asid;
use crate::cache::assoc::AssocLevel;
use crate::cache::ideal::IdealLevel;
use crate::cache::isolate::IsolateLevel;
use crate::cache::set_assoc::SetAssocLevel;
use crate::cache::validator::{AsidValidator, TlbValidator};
use crate::cache::CacheLevel;
use crate::config::{Config, StageTemplate};
use crate::entry::{Request, Response, TlbEntry};
use crate::error::ConfigError;
use crate::host::HostMemory;
use crate::offline::{AccessLogger, LogReplayer};
use crate::stats::{Stats, TlbClass};
use crate::walker::PageWalker;

/// Builds one stage and wraps it around `parent`.
///
/// `real_hartid` is this stack's owning hart (`-1` for the shared `stlb`
/// stack); `notify_hartid` is `real_hartid` only at the position that should
/// notify the ISS's L0 on eviction, `-1` everywhere else — a single template
/// position may legitimately want the former without the latter (an
/// `isolate` stage always brands with the real hart id, regardless of its
/// position in the array).
#[allow(clippy::too_many_arguments)]
fn instantiate_stage(
    template: &StageTemplate,
    parent: Arc<dyn CacheLevel>,
    host: &Arc<dyn HostMemory>,
    stats: &Arc<Stats>,
    class: TlbClass,
    real_hartid: i32,
    notify_hartid: i32,
    config: &Config,
) -> Result<Arc<dyn CacheLevel>, ConfigError> {
    let level: Arc<dyn CacheLevel> = match template {
        StageTemplate::Assoc { size } => Arc::new(AssocLevel::new(
            *size,
            parent,
            host.clone(),
            stats.clone(),
            class,
            notify_hartid,
            config.cache_invalidate_entries,
            config.hardware_pte_update,
        )),
        StageTemplate::Set { size, assoc } => Arc::new(SetAssocLevel::new(
            *size,
            *assoc,
            parent,
            host.clone(),
            stats.clone(),
            class,
            notify_hartid,
            config.cache_invalidate_entries,
            config.hardware_pte_update,
        )),
        StageTemplate::Ideal => Arc::new(IdealLevel::new(
            parent,
            stats.clone(),
            class,
            config.cache_invalidate_entries,
            config.hardware_pte_update,
        )),
        StageTemplate::Isolate => Arc::new(IsolateLevel::new(parent, real_hartid)),
        StageTemplate::Validate => {
            let ideal = IdealLevel::new(
                parent,
                stats.clone(),
                class,
                config.cache_invalidate_entries,
                config.hardware_pte_update,
            );
            let tlb_validator: Arc<dyn CacheLevel> = Arc::new(TlbValidator::new(ideal));
            Arc::new(AsidValidator::new(tlb_validator, config.possibly_translated_hartid_bound))
        }
        StageTemplate::Log { file } => {
            let handle = File::options().create(true).append(true).open(file)?;
            Arc::new(AccessLogger::new(parent, handle))
        }
    };
    Ok(level)
}

/// Wraps each template in `templates` around `current`, in the original's
/// `for i = size-1 downto 0` order: element 0 ends up outermost (closest to
/// the requester, consulted first).
#[allow(clippy::too_many_arguments)]
fn build_stack(
    templates: &[StageTemplate],
    mut current: Arc<dyn CacheLevel>,
    host: &Arc<dyn HostMemory>,
    stats: &Arc<Stats>,
    class: TlbClass,
    real_hartid: i32,
    notify_hartid: i32,
    config: &Config,
) -> Result<Arc<dyn CacheLevel>, ConfigError> {
    for (i, template) in templates.iter().enumerate().rev() {
        let notify = if i == 0 { notify_hartid } else { -1 };
        current = instantiate_stage(template, current, host, stats, class, real_hartid, notify, config)?;
    }
    Ok(current)
}

struct HartStacks {
    itlb: Arc<dyn CacheLevel>,
    dtlb: Arc<dyn CacheLevel>,
}

/// The simulator's public surface: per-hart translation and flush routing on
/// top of a forest of TLB stages rooted at a shared `stlb` stack.
///
/// `Send + Sync`, shared across hart threads behind an `Arc` (SPEC_FULL.md
/// §5) — every stage underneath locks its own state, so `Simulator` itself
/// holds nothing but the (rarely written) per-hart stack map.
pub struct Simulator {
    config: Config,
    host: Arc<dyn HostMemory>,
    stats: Arc<Stats>,
    stlb_root: Arc<dyn CacheLevel>,
    replayer: Option<Arc<LogReplayer>>,
    harts: RwLock<HashMap<i32, HartStacks>>,
}

impl Simulator {
    /// Validates `config`, builds the shared `stlb` stack eagerly (the
    /// original's constructor-time setup), and returns a simulator ready for
    /// per-hart lazy stack construction on first `access`/`flush`.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if `config` fails validation or a `log`
    /// stage's trace file cannot be opened.
    pub fn new(config: Config, host: Arc<dyn HostMemory>) -> Result<Self, ConfigError> {
        config.validate()?;
        let stats = Arc::new(Stats::new());

        let (terminal, replayer): (Arc<dyn CacheLevel>, Option<Arc<LogReplayer>>) = match &config.replay {
            Some(path) => {
                let file = File::open(path)?;
                let replayer = Arc::new(LogReplayer::new(file, stats.clone()));
                (replayer.clone(), Some(replayer))
            }
            None => (Arc::new(PageWalker::new(host.clone(), stats.clone(), config.hardware_pte_update)), None),
        };

        let stlb_root = build_stack(&config.stlb, terminal, &host, &stats, TlbClass::S, -1, -1, &config)?;

        info!(
            stlb = config.stlb.len(),
            ctlb = config.ctlb.len(),
            itlb = config.itlb.len(),
            dtlb = config.dtlb.len(),
            replay = config.replay.is_some(),
            "tlbsim: simulator constructed"
        );

        Ok(Simulator {
            config,
            host,
            stats,
            stlb_root,
            replayer,
            harts: RwLock::new(HashMap::new()),
        })
    }

    /// Drives every remaining record from the configured replay trace through
    /// this simulator's own `stlb` stack, returning the number of records
    /// replayed.
    ///
    /// # Errors
    /// Returns [`crate::error::ReplayError`] on a malformed trace record.
    ///
    /// # Panics
    /// Panics if this simulator was not constructed with `config.replay` set.
    pub fn replay_to_completion(&self) -> Result<u64, crate::error::ReplayError> {
        let replayer = self
            .replayer
            .as_ref()
            .expect("replay_to_completion requires a simulator constructed with config.replay set");

        let mut count = 0u64;
        while replayer.replay_step(self.stlb_root.as_ref())? {
            count += 1;
        }
        Ok(count)
    }

    /// Returns `hartid`'s I-TLB/D-TLB stacks, lazily building them on first
    /// use (`original_source/src/config.cc`'s `setup_private_tlb`).
    fn ensure_hart(&self, hartid: i32) -> (Arc<dyn CacheLevel>, Arc<dyn CacheLevel>) {
        if let Some(stacks) = self.harts.read().expect("harts lock poisoned").get(&hartid) {
            return (stacks.itlb.clone(), stacks.dtlb.clone());
        }

        let mut harts = self.harts.write().expect("harts lock poisoned");
        if let Some(stacks) = harts.get(&hartid) {
            return (stacks.itlb.clone(), stacks.dtlb.clone());
        }

        // The ctlb's own innermost level only owns L0-invalidation if no
        // private itlb/dtlb template exists to claim that role instead.
        let ctlb_owns_invalidate = self.config.itlb.is_empty() && self.config.dtlb.is_empty();
        let ctlb_notify = if ctlb_owns_invalidate { hartid } else { -1 };

        let ctlb = build_stack(&self.config.ctlb, self.stlb_root.clone(), &self.host, &self.stats, TlbClass::C, hartid, ctlb_notify, &self.config)
            .expect("per-hart template stages are validated at Simulator::new");
        let itlb = build_stack(&self.config.itlb, ctlb.clone(), &self.host, &self.stats, TlbClass::I, hartid, hartid, &self.config)
            .expect("per-hart template stages are validated at Simulator::new");
        let dtlb = build_stack(&self.config.dtlb, ctlb, &self.host, &self.stats, TlbClass::D, hartid, hartid, &self.config)
            .expect("per-hart template stages are validated at Simulator::new");

        harts.insert(hartid, HartStacks { itlb: itlb.clone(), dtlb: dtlb.clone() });
        (itlb, dtlb)
    }

    /// Performs one translation, selecting I-TLB or D-TLB by `req.ifetch` and
    /// substituting the hart id for ASID 0 before descent.
    #[must_use]
    pub fn access(&self, mut req: Request) -> Response {
        if req.asid == 0 {
            req.asid = req.hartid;
        }

        let (itlb, dtlb) = self.ensure_hart(req.hartid);
        let stack = if req.ifetch { &itlb } else { &dtlb };

        let mut entry = TlbEntry::lookup(req.vpn, Asid::plain(req.asid as u32));
        let perm = stack.access(&mut entry, &req);

        Response {
            ppn: entry.ppn,
            pte: entry.pte,
            granularity: entry.granularity,
            perm: perm >= 0,
        }
    }

    /// Issues an SFENCE.VMA-equivalent flush for `hartid`.
    ///
    /// `asid = -1` is ASID-agnostic (translated to a global flush in realm
    /// 0); `asid = 0` substitutes the hart id; `vpn = 0` is a full-ASID
    /// flush. Counts the flush by kind even if `hartid` has no TLB stack yet
    /// (matching the original, which counts unconditionally but skips the
    /// actual invalidation when `config_itlbs[hartid]` was never built).
    pub fn flush(&self, hartid: i32, asid: i32, vpn: u64) {
        match (asid == -1, vpn == 0) {
            (true, true) => self.stats.flush_full.fetch_add(1, Relaxed),
            (true, false) => self.stats.flush_gpage.fetch_add(1, Relaxed),
            (false, true) => self.stats.flush_asid.fetch_add(1, Relaxed),
            (false, false) => self.stats.flush_page.fetch_add(1, Relaxed),
        };

        let Some((itlb, dtlb)) = self
            .harts
            .read()
            .expect("harts lock poisoned")
            .get(&hartid)
            .map(|stacks| (stacks.itlb.clone(), stacks.dtlb.clone()))
        else {
            return;
        };

        let translated = if asid == -1 {
            Asid::new(true, 0, 0)
        } else {
            let resolved = if asid == 0 { hartid } else { asid };
            Asid::plain(resolved as u32)
        };

        // I-TLB entries are rebuilt by fetching, so a local invalidation
        // suffices; the D-side drives the recursive flush into shared
        // levels to avoid double-counting their flush stats.
        itlb.flush_local(translated, vpn);
        dtlb.flush(translated, vpn);
    }

    /// Zeroes every counter, optionally printing the report first
    /// (`tlbsim_reset_counters`).
    pub fn reset_counters(&self, print: bool) {
        self.stats.reset(print);
    }

    /// The free-running instruction-retired counter, as last written by the
    /// ISS via [`Simulator::add_instret`].
    #[must_use]
    pub fn instret(&self) -> u64 {
        self.stats.instret.load(Relaxed)
    }

    /// The free-running minor-instruction-retired counter.
    #[must_use]
    pub fn minstret(&self) -> u64 {
        self.stats.minstret.load(Relaxed)
    }

    /// Advances `instret` by `n`; called by the ISS after each retired
    /// instruction batch.
    pub fn add_instret(&self, n: u64) {
        self.stats.instret.fetch_add(n, Relaxed);
    }

    /// Advances `minstret` by `n`.
    pub fn add_minstret(&self, n: u64) {
        self.stats.minstret.fetch_add(n, Relaxed);
    }

    /// Whether the ISS needs to maintain `instret` for this configuration.
    #[must_use]
    pub fn need_instret(&self) -> bool {
        self.config.need_instret
    }

    /// Whether the ISS needs to maintain `minstret` for this configuration.
    #[must_use]
    pub fn need_minstret(&self) -> bool {
        self.config.need_minstret
    }

    /// The shared counter set, for a driver that wants to print or inspect
    /// it directly.
    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::test_support::FakeHostMemory;
    use crate::pgtable::{PTE_A, PTE_D, PTE_R, PTE_U, PTE_V, PTE_W, PTE_X, SATP_MODE_SV39};

    fn satp(root_ppn: u64) -> u64 {
        (SATP_MODE_SV39 << 60) | root_ppn
    }

    fn base_request(hartid: i32, vpn: u64) -> Request {
        Request {
            satp: satp(0x200),
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

    fn populate(host: &FakeHostMemory) {
        host.set((0x200 << 12) + 0, PTE_V | (0x800 << 10));
        host.set(
            (0x800 << 12) + 0,
            PTE_V | PTE_R | PTE_W | PTE_X | PTE_U | PTE_A | PTE_D | (0x800 << 10),
        );
    }

    #[test]
    fn scenario_a_clean_walk_end_to_end() {
        let host = Arc::new(FakeHostMemory::new());
        populate(&host);
        let sim = Simulator::new(Config::default(), host).unwrap();

        let resp = sim.access(base_request(0, 0));
        assert!(resp.perm);
        assert_eq!(resp.ppn, 0x800);
        assert_eq!(resp.granularity, 0);
    }

    #[test]
    fn asid_zero_is_substituted_with_hart_id() {
        let host = Arc::new(FakeHostMemory::new());
        populate(&host);
        let sim = Simulator::new(Config::default(), host).unwrap();

        let resp_hart0 = sim.access(base_request(0, 0));
        let resp_hart1 = sim.access(base_request(1, 0));
        assert!(resp_hart0.perm);
        assert!(resp_hart1.perm);
    }

    #[test]
    fn flush_before_first_access_is_counted_but_harmless() {
        let host = Arc::new(FakeHostMemory::new());
        let sim = Simulator::new(Config::default(), host).unwrap();

        sim.flush(3, -1, 0);
        assert_eq!(sim.stats().flush_full.load(Relaxed), 1);
    }

    #[test]
    fn full_asid_flush_forces_miss_on_next_access() {
        let host = Arc::new(FakeHostMemory::new());
        populate(&host);
        let sim = Simulator::new(Config::default(), host).unwrap();

        let _ = sim.access(base_request(0, 0));
        let misses_before = sim.stats().itlb.miss.load(Relaxed) + sim.stats().dtlb.miss.load(Relaxed);

        sim.flush(0, 0, 0);
        let _ = sim.access(base_request(0, 0));
        let misses_after = sim.stats().itlb.miss.load(Relaxed) + sim.stats().dtlb.miss.load(Relaxed);

        assert!(misses_after > misses_before, "flushed entry must miss again");
    }

    #[test]
    fn itlb_and_dtlb_stacks_are_independent() {
        let host = Arc::new(FakeHostMemory::new());
        populate(&host);
        let sim = Simulator::new(Config::default(), host).unwrap();

        let mut ifetch_req = base_request(0, 0);
        ifetch_req.ifetch = true;
        let resp = sim.access(ifetch_req);
        assert!(resp.perm);
        assert_eq!(sim.stats().itlb.miss.load(Relaxed), 1);
        assert_eq!(sim.stats().dtlb.miss.load(Relaxed), 0);
    }
}
