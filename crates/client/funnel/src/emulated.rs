//! Block-time emulation.
//!
//! Emulated block `n` covers the time window `[S + (n - start) * d, S + (n - start + 1) * d)`, where `S` is the
//! timestamp of the underlying start block and `d` the configured block time. It holds every underlying block whose
//! timestamp falls in that window, and is only returned once an underlying block at or past the end of the window has
//! been seen. Windows without underlying blocks still produce an (empty) emulated block.

use std::collections::BTreeMap;

use alloy::primitives::keccak256;
use async_trait::async_trait;
use fp_chain::{ChainData, NetworkId};

use crate::{
    cache::{EmulatedBlocksEntry, FunnelCache},
    Funnel, FunnelError, PresyncRange, PresyncResult,
};

pub struct EmulatedBlocksFunnel {
    inner: Box<dyn Funnel>,
    network: NetworkId,
    cache: FunnelCache,
    start_block_height: u64,
    /// Seconds.
    block_time: u64,
}

impl EmulatedBlocksFunnel {
    pub fn new(
        inner: Box<dyn Funnel>,
        network: NetworkId,
        cache: FunnelCache,
        start_block_height: u64,
        block_time: u64,
    ) -> Result<Self, FunnelError> {
        if block_time == 0 {
            return Err(FunnelError::Config("emulated block time must be positive".into()));
        }
        Ok(Self { inner, network, cache, start_block_height, block_time })
    }

    fn window_start(&self, start_timestamp: u64, block_number: u64) -> u64 {
        start_timestamp + (block_number - self.start_block_height) * self.block_time
    }

    /// Closes every window ending at or before the last pending underlying block.
    fn close_windows(&self, state: &mut EmulatedBlocksEntry, requested: u64) -> Vec<ChainData> {
        let (Some(start_timestamp), Some(mut next)) = (state.start_timestamp, state.next_emulated) else {
            return vec![];
        };
        let Some(last_timestamp) = state.pending.last().map(|block| block.timestamp) else { return vec![] };

        let mut closed = vec![];
        loop {
            let window_start = self.window_start(start_timestamp, next);
            let window_end = window_start + self.block_time;
            if last_timestamp < window_end {
                break;
            }
            let split = state.pending.partition_point(|block| block.timestamp < window_end);
            let underlying: Vec<_> = state.pending.drain(..split).collect();
            // Windows below the requested block were already returned before a cache clear.
            if next >= requested {
                closed.push(self.emulated_block(next, window_start, underlying));
            }
            next += 1;
        }
        state.next_emulated = Some(next);
        closed
    }

    fn emulated_block(&self, block_number: u64, timestamp: u64, underlying: Vec<ChainData>) -> ChainData {
        let mut preimage = Vec::new();
        for block in &underlying {
            preimage.extend_from_slice(block.block_hash.as_bytes());
        }
        preimage.extend_from_slice(&block_number.to_be_bytes());
        let block_hash = keccak256(&preimage).to_string();
        let mut emulated = ChainData::new(self.network.clone(), block_number, block_hash, timestamp);

        for block in underlying {
            emulated.submitted_data.extend(block.submitted_data);
            emulated.extension_datums.extend(block.extension_datums.into_iter().map(|mut datum| {
                datum.block_number = block_number;
                datum
            }));
        }
        emulated
    }
}

#[async_trait]
impl Funnel for EmulatedBlocksFunnel {
    async fn read_data(&self, block_height: u64) -> Result<Vec<ChainData>, FunnelError> {
        if block_height < self.start_block_height {
            return Err(FunnelError::Config(format!(
                "emulated block #{block_height} is below the start block #{}",
                self.start_block_height
            )));
        }

        let mut state = self.cache.emulated_blocks(|entry| entry.clone());
        // Blocks already returned cannot be served again, the state is rebuilt from the start block.
        if state.next_emulated.map_or(true, |next| block_height < next) {
            state = EmulatedBlocksEntry {
                next_emulated: Some(self.start_block_height),
                next_underlying: Some(self.start_block_height),
                ..Default::default()
            };
        }

        let mut closed = self.close_windows(&mut state, block_height);
        while closed.is_empty() {
            let next_underlying = state.next_underlying.unwrap_or(self.start_block_height);
            let blocks = self.inner.read_data(next_underlying).await?;
            let Some(last) = blocks.last() else { break };
            state.next_underlying = Some(last.block_number + 1);
            if state.start_timestamp.is_none() {
                state.start_timestamp = blocks.first().map(|block| block.timestamp);
            }
            state.pending.extend(blocks);
            closed = self.close_windows(&mut state, block_height);
        }

        if let (Some(first), Some(last)) = (closed.first(), closed.last()) {
            tracing::debug!(
                "Closed emulated blocks #{}..=#{} with {} underlying blocks pending",
                first.block_number,
                last.block_number,
                state.pending.len()
            );
        }
        self.cache.emulated_blocks(|entry| *entry = state);
        Ok(closed)
    }

    async fn read_presync_data(
        &self,
        ranges: &BTreeMap<NetworkId, PresyncRange>,
    ) -> Result<BTreeMap<NetworkId, PresyncResult>, FunnelError> {
        self.inner.read_presync_data(ranges).await
    }

    async fn presync_starts(&self) -> Result<BTreeMap<NetworkId, u64>, FunnelError> {
        self.inner.presync_starts().await
    }
}
