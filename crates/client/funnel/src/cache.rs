//! Funnel cache registry.
//!
//! Funnels keep what they learn about their networks here: tips, block timestamps and presync progress. The
//! registry is the only state shared between the funnels of a chain. Entries are created lazily on first access
//! and every entry is wiped at once by [FunnelCache::clear], for instance on rollback.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

use fp_chain::{ChainData, NetworkId};

/// Kind of an auxiliary network cache entry. There is one entry per network of each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum AuxCacheKind {
    #[display("parallel-evm")]
    ParallelEvm,
    #[display("carp")]
    Carp,
    #[display("mina")]
    Mina,
    #[display("avail-parallel")]
    AvailParallel,
}

/// Every kind of entry the registry may hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntryKind {
    MainChain,
    Aux(AuxCacheKind, NetworkId),
    EmulatedBlocks,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MainChainEntry {
    /// Last block known to exist, already accounting for the confirmation depth.
    pub tip: Option<u64>,
    /// Timestamp of the start block, known once the tip has reached it.
    pub start_timestamp: Option<u64>,
    /// Timestamps of the blocks read so far, by block number.
    pub block_timestamps: BTreeMap<u64, u64>,
    pub presync_finished: bool,
}

impl MainChainEntry {
    /// Drops the timestamps of blocks below `block_number`.
    pub fn prune_timestamps(&mut self, block_number: u64) {
        self.block_timestamps = self.block_timestamps.split_off(&block_number);
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuxNetworkEntry {
    /// First position of the network this funnel reads.
    pub start_position: Option<u64>,
    /// Last position belonging to presync, i.e. strictly before the main chain start timestamp. `None` while
    /// unknown, `Some(None)` when the network has no position before the main chain start.
    pub presync_boundary: Option<Option<u64>>,
    pub presync_finished: bool,
    /// Last position safe to read, tip minus confirmation depth.
    pub safe_tip: Option<u64>,
    /// Timestamps of the positions read so far.
    pub timestamps: BTreeMap<u64, u64>,
    /// The last main chain block merged during sync, with the next position to read for the block after it.
    pub last_synced: Option<(u64, u64)>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct EmulatedBlocksEntry {
    /// Timestamp of the underlying start block, where the first window opens.
    pub start_timestamp: Option<u64>,
    /// Next emulated block to close.
    pub next_emulated: Option<u64>,
    /// Next underlying block to read.
    pub next_underlying: Option<u64>,
    /// Underlying blocks read but not yet assigned to a closed emulated block.
    pub pending: Vec<ChainData>,
}

#[derive(Default)]
struct CacheState {
    main_chain: Option<MainChainEntry>,
    parallel_evm: BTreeMap<NetworkId, AuxNetworkEntry>,
    carp: BTreeMap<NetworkId, AuxNetworkEntry>,
    mina: BTreeMap<NetworkId, AuxNetworkEntry>,
    avail_parallel: BTreeMap<NetworkId, AuxNetworkEntry>,
    emulated_blocks: Option<EmulatedBlocksEntry>,
}

impl CacheState {
    fn aux_entries(&mut self, kind: AuxCacheKind) -> &mut BTreeMap<NetworkId, AuxNetworkEntry> {
        match kind {
            AuxCacheKind::ParallelEvm => &mut self.parallel_evm,
            AuxCacheKind::Carp => &mut self.carp,
            AuxCacheKind::Mina => &mut self.mina,
            AuxCacheKind::AvailParallel => &mut self.avail_parallel,
        }
    }
}

/// Shared handle on the registry. Clones refer to the same entries.
#[derive(Clone, Default)]
pub struct FunnelCache {
    inner: Arc<Mutex<CacheState>>,
}

impl FunnelCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn main_chain<R>(&self, f: impl FnOnce(&mut MainChainEntry) -> R) -> R {
        f(self.lock().main_chain.get_or_insert_with(Default::default))
    }

    pub fn aux<R>(&self, kind: AuxCacheKind, network: &NetworkId, f: impl FnOnce(&mut AuxNetworkEntry) -> R) -> R {
        let mut state = self.lock();
        f(state.aux_entries(kind).entry(network.clone()).or_default())
    }

    pub fn emulated_blocks<R>(&self, f: impl FnOnce(&mut EmulatedBlocksEntry) -> R) -> R {
        f(self.lock().emulated_blocks.get_or_insert_with(Default::default))
    }

    pub fn contains(&self, kind: &CacheEntryKind) -> bool {
        let mut state = self.lock();
        match kind {
            CacheEntryKind::MainChain => state.main_chain.is_some(),
            CacheEntryKind::Aux(kind, network) => state.aux_entries(*kind).contains_key(network),
            CacheEntryKind::EmulatedBlocks => state.emulated_blocks.is_some(),
        }
    }

    /// Wipes every entry, atomically.
    pub fn clear(&self) {
        let mut state = self.lock();
        let CacheState { main_chain, parallel_evm, carp, mina, avail_parallel, emulated_blocks } = &mut *state;
        *main_chain = None;
        parallel_evm.clear();
        carp.clear();
        mina.clear();
        avail_parallel.clear();
        *emulated_blocks = None;
        tracing::debug!("Funnel cache cleared");
    }
}
