//! Decorators merging an auxiliary network into the main chain, by time.
//!
//! An auxiliary position with timestamp `t` is merged into the first main chain block `b` such that
//! `ts(b - 1) < t <= ts(b)`. Positions strictly before the timestamp of the start block belong to presync, the
//! first sync block takes every position from there up to its own timestamp. A main chain block is only returned
//! once the auxiliary network's safe tip has reached its timestamp, so the merge is never revised.

pub mod avail;
pub mod carp;
pub mod evm;
pub mod mina;

use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use fc_input::{BlockContext, InputExtractor, RawInput};
use fp_chain::{ChainData, ChainDataExtensionDatum, NetworkId, PresyncChainData};

use crate::{
    cache::{AuxCacheKind, AuxNetworkEntry, FunnelCache},
    error::with_timeout,
    metrics::FunnelMetrics,
    search::find_block_at_or_before,
    Funnel, FunnelError, PresyncRange, PresyncResult,
};

pub use avail::ParallelAvailNetwork;
pub use carp::{CardanoNetwork, CarpNetwork};
pub use evm::ParallelEvmNetwork;
pub use mina::MinaNetwork;

/// Everything read at one position of an auxiliary network.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxBlock {
    pub position: u64,
    /// Unix seconds.
    pub timestamp: u64,
    /// Block numbers are the position on the auxiliary network.
    pub datums: Vec<ChainDataExtensionDatum>,
    pub inputs: Vec<RawInput>,
}

/// An auxiliary network, addressed by position: a block height, or a slot for Cardano.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuxiliaryNetwork: Send + Sync {
    fn network(&self) -> &NetworkId;

    fn cache_kind(&self) -> AuxCacheKind;

    /// First position read, usually the lowest start height of the extensions on this network.
    fn start_position(&self) -> u64;

    fn presync_enabled(&self) -> bool {
        true
    }

    /// Last position safe to read, accounting for the confirmation depth.
    async fn safe_tip(&self) -> Result<u64, FunnelError>;

    async fn timestamp_of(&self, position: u64) -> Result<u64, FunnelError>;

    /// Networks with a fixed position duration compute the last position at or before `timestamp` directly,
    /// others return `None` and are searched.
    fn position_from_timestamp(&self, _timestamp: u64) -> Option<u64> {
        None
    }

    /// Positions of `[from, to]` carrying data, in order. Empty positions may be left out.
    async fn fetch_range(&self, from: u64, to: u64) -> Result<Vec<AuxBlock>, FunnelError>;
}

pub struct ParallelFunnel {
    inner: Box<dyn Funnel>,
    network: Box<dyn AuxiliaryNetwork>,
    cache: FunnelCache,
    extractor: Arc<InputExtractor>,
    metrics: Arc<FunnelMetrics>,
    start_block_height: u64,
    rpc_timeout: Duration,
}

impl ParallelFunnel {
    pub fn new(
        inner: Box<dyn Funnel>,
        network: Box<dyn AuxiliaryNetwork>,
        cache: FunnelCache,
        extractor: Arc<InputExtractor>,
        metrics: Arc<FunnelMetrics>,
        start_block_height: u64,
        rpc_timeout: Duration,
    ) -> Self {
        tracing::info!(
            "🔀 Merging {} ({}) from position #{}",
            network.network(),
            network.cache_kind(),
            network.start_position()
        );
        Self { inner, network, cache, extractor, metrics, start_block_height, rpc_timeout }
    }

    fn id(&self) -> &NetworkId {
        self.network.network()
    }

    fn entry<R>(&self, f: impl FnOnce(&mut AuxNetworkEntry) -> R) -> R {
        self.cache.aux(self.network.cache_kind(), self.network.network(), f)
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, FunnelError>>,
    ) -> Result<T, FunnelError> {
        with_timeout(self.id(), operation, self.rpc_timeout, fut).await
    }

    async fn timestamp_of(&self, position: u64) -> Result<u64, FunnelError> {
        if let Some(timestamp) = self.entry(|entry| entry.timestamps.get(&position).copied()) {
            return Ok(timestamp);
        }
        let timestamp = self.call("timestamp_of", self.network.timestamp_of(position)).await?;
        self.entry(|entry| entry.timestamps.insert(position, timestamp));
        Ok(timestamp)
    }

    /// The safe tip and its timestamp. The cached tip is only refreshed when it is older than `timestamp`.
    async fn safe_tip_covering(&self, timestamp: u64) -> Result<(u64, u64), FunnelError> {
        if let Some(tip) = self.entry(|entry| entry.safe_tip) {
            let tip_timestamp = self.timestamp_of(tip).await?;
            if tip_timestamp >= timestamp {
                return Ok((tip, tip_timestamp));
            }
        }
        let tip = self.call("safe_tip", self.network.safe_tip()).await?;
        self.entry(|entry| entry.safe_tip = Some(tip));
        Ok((tip, self.timestamp_of(tip).await?))
    }

    /// Last position in `[start_position, safe_tip]` at or before `timestamp`.
    async fn position_at_or_before(&self, timestamp: u64, safe_tip: u64) -> Result<Option<u64>, FunnelError> {
        let lowest = self.network.start_position();
        if safe_tip < lowest {
            return Ok(None);
        }
        if let Some(position) = self.network.position_from_timestamp(timestamp) {
            let position = position.min(safe_tip);
            if position < lowest || self.timestamp_of(position).await? > timestamp {
                return Ok(None);
            }
            return Ok(Some(position));
        }
        find_block_at_or_before(lowest, safe_tip, |position| self.timestamp_of(position), timestamp).await
    }

    /// Last position belonging to presync, once the safe tip has passed the main chain start.
    async fn presync_boundary(&self, start_timestamp: u64) -> Result<Option<Option<u64>>, FunnelError> {
        if let Some(boundary) = self.entry(|entry| entry.presync_boundary) {
            return Ok(Some(boundary));
        }
        let (safe_tip, safe_timestamp) = self.safe_tip_covering(start_timestamp).await?;
        if safe_timestamp < start_timestamp {
            return Ok(None);
        }
        let boundary = match start_timestamp.checked_sub(1) {
            Some(timestamp) => self.position_at_or_before(timestamp, safe_tip).await?,
            None => None,
        };
        tracing::debug!("Presync boundary of {}: {boundary:?}", self.id());
        self.entry(|entry| entry.presync_boundary = Some(boundary));
        Ok(Some(boundary))
    }

    /// First position to merge into `first_block`.
    async fn sync_from(&self, first_block: &ChainData, safe_tip: u64) -> Result<u64, FunnelError> {
        let block_number = first_block.block_number;
        if let Some((last_block, next)) = self.entry(|entry| entry.last_synced) {
            if last_block + 1 == block_number {
                return Ok(next);
            }
        }

        let previous = if block_number <= self.start_block_height {
            match self.presync_boundary(first_block.timestamp).await? {
                Some(boundary) => boundary,
                None => return Err(FunnelError::invalid_response(self.id(), "safe tip is behind the start block")),
            }
        } else {
            let previous_timestamp = self
                .cache
                .main_chain(|entry| entry.block_timestamps.get(&(block_number - 1)).copied())
                .ok_or_else(|| FunnelError::missing_block(&first_block.network, block_number - 1))?;
            self.position_at_or_before(previous_timestamp, safe_tip).await?
        };
        Ok(previous.map_or(0, |position| position + 1).max(self.network.start_position()))
    }

    async fn merge(&self, blocks: &mut [ChainData], aux_blocks: Vec<AuxBlock>) -> Result<(), FunnelError> {
        let mut index = 0;
        let mut accepted = 0;
        let mut rejected = 0;
        for aux in aux_blocks {
            while index < blocks.len() && blocks[index].timestamp < aux.timestamp {
                index += 1;
            }
            let Some(block) = blocks.get_mut(index) else {
                return Err(FunnelError::invalid_response(
                    self.id(),
                    format!("position #{} is past the last merged block", aux.position),
                ));
            };

            block.extension_datums.extend(aux.datums.into_iter().map(|mut datum| {
                datum.block_number = block.block_number;
                datum
            }));

            let context = BlockContext {
                network: self.id().clone(),
                block_number: block.block_number,
                timestamp: block.timestamp,
            };
            for input in &aux.inputs {
                let outcome = self.extractor.extract(input, &context).await?;
                accepted += outcome.submitted.len();
                rejected += outcome.rejected;
                block.submitted_data.extend(outcome.submitted);
            }
        }
        if accepted + rejected > 0 {
            self.metrics.record_inputs(self.id(), accepted, rejected);
        }
        Ok(())
    }

    async fn presync(&self, range: &PresyncRange) -> Result<PresyncResult, FunnelError> {
        if !self.network.presync_enabled() || self.entry(|entry| entry.presync_finished) {
            return Ok(PresyncResult::Finished);
        }
        let Some(start_timestamp) = self.cache.main_chain(|entry| entry.start_timestamp) else {
            tracing::debug!("Presync of {} waits for the main chain start block", self.id());
            return Ok(PresyncResult::Data { blocks: vec![], fetched_to: None });
        };

        let from = range.from.max(self.network.start_position());
        let to = match self.presync_boundary(start_timestamp).await? {
            Some(Some(boundary)) if from <= boundary => range.to.min(boundary),
            Some(_) => {
                tracing::info!("✅ Presync of {} finished", self.id());
                self.entry(|entry| entry.presync_finished = true);
                return Ok(PresyncResult::Finished);
            }
            // The safe tip has not reached the start block yet.
            None => range.to.min(self.entry(|entry| entry.safe_tip).unwrap_or_default()),
        };
        if to < from {
            return Ok(PresyncResult::Data { blocks: vec![], fetched_to: None });
        }

        let aux_blocks = self.call("fetch_range", self.network.fetch_range(from, to)).await?;
        let mut blocks = Vec::new();
        for aux in aux_blocks {
            if !aux.inputs.is_empty() {
                let count = aux.inputs.len();
                tracing::debug!("Dropping {count} inputs of {} at #{} during presync", self.id(), aux.position);
            }
            if !aux.datums.is_empty() {
                blocks.push(PresyncChainData {
                    network: self.id().clone(),
                    block_number: aux.position,
                    extension_datums: aux.datums,
                });
            }
        }
        Ok(PresyncResult::Data { blocks, fetched_to: Some(to) })
    }
}

#[async_trait]
impl Funnel for ParallelFunnel {
    async fn read_data(&self, block_height: u64) -> Result<Vec<ChainData>, FunnelError> {
        let mut blocks = self.inner.read_data(block_height).await?;
        let Some(last) = blocks.last() else {
            return Ok(blocks);
        };

        let (safe_tip, safe_timestamp) = self.safe_tip_covering(last.timestamp).await?;
        let ready = blocks.partition_point(|block| block.timestamp <= safe_timestamp);
        if ready < blocks.len() {
            tracing::debug!("{} is behind, withholding blocks from #{}", self.id(), blocks[ready].block_number);
            blocks.truncate(ready);
        }
        let (Some(first), Some(last)) = (blocks.first(), blocks.last()) else {
            return Ok(blocks);
        };
        let last_block = last.block_number;

        let from = self.sync_from(first, safe_tip).await?;
        let to = self.position_at_or_before(last.timestamp, safe_tip).await?;
        let next = match to {
            Some(to) if to >= from => {
                let aux_blocks = self.call("fetch_range", self.network.fetch_range(from, to)).await?;
                self.merge(&mut blocks, aux_blocks).await?;
                to + 1
            }
            _ => from,
        };

        self.entry(|entry| {
            entry.last_synced = Some((last_block, next));
            entry.timestamps = entry.timestamps.split_off(&from.saturating_sub(1));
        });
        Ok(blocks)
    }

    async fn read_presync_data(
        &self,
        ranges: &BTreeMap<NetworkId, PresyncRange>,
    ) -> Result<BTreeMap<NetworkId, PresyncResult>, FunnelError> {
        let mut results = self.inner.read_presync_data(ranges).await?;
        if let Some(range) = ranges.get(self.id()) {
            results.insert(self.id().clone(), self.presync(range).await?);
        }
        Ok(results)
    }

    async fn presync_starts(&self) -> Result<BTreeMap<NetworkId, u64>, FunnelError> {
        let mut starts = self.inner.presync_starts().await?;
        if self.network.presync_enabled() {
            starts.insert(self.id().clone(), self.network.start_position());
        }
        Ok(starts)
    }
}
