use std::sync::Arc;

use async_trait::async_trait;
use fc_input::RawInput;
use fp_chain::{NetworkId, U256};
use futures::future::try_join_all;

use super::{AuxBlock, AuxiliaryNetwork};
use crate::avail::AvailRpc;
use crate::cache::AuxCacheKind;
use crate::FunnelError;

/// An Avail application carrying game inputs next to the main chain.
///
/// Inputs submitted before the start block are never replayed, so this network has no presync.
pub struct ParallelAvailNetwork {
    network: NetworkId,
    rpc: Arc<dyn AvailRpc>,
    confirmation_depth: u64,
}

impl ParallelAvailNetwork {
    pub fn new(network: NetworkId, rpc: Arc<dyn AvailRpc>, confirmation_depth: u64) -> Self {
        Self { network, rpc, confirmation_depth }
    }

    async fn read_block(&self, position: u64) -> Result<Option<AuxBlock>, FunnelError> {
        let submissions =
            self.rpc.submissions(position).await?.ok_or_else(|| FunnelError::missing_block(&self.network, position))?;
        if submissions.is_empty() {
            return Ok(None);
        }
        let timestamp = self.timestamp_of(position).await?;
        let inputs = submissions
            .into_iter()
            .map(|submission| RawInput {
                tx_hash: submission.tx_hash,
                real_address: submission.sender,
                payload: submission.data,
                value: U256::ZERO,
            })
            .collect();
        Ok(Some(AuxBlock { position, timestamp, datums: vec![], inputs }))
    }
}

#[async_trait]
impl AuxiliaryNetwork for ParallelAvailNetwork {
    fn network(&self) -> &NetworkId {
        &self.network
    }

    fn cache_kind(&self) -> AuxCacheKind {
        AuxCacheKind::AvailParallel
    }

    fn start_position(&self) -> u64 {
        0
    }

    fn presync_enabled(&self) -> bool {
        false
    }

    async fn safe_tip(&self) -> Result<u64, FunnelError> {
        Ok(self.rpc.latest_block().await?.saturating_sub(self.confirmation_depth))
    }

    async fn timestamp_of(&self, position: u64) -> Result<u64, FunnelError> {
        let header = self.rpc.header(position).await?;
        header.map(|header| header.timestamp).ok_or_else(|| FunnelError::missing_block(&self.network, position))
    }

    async fn fetch_range(&self, from: u64, to: u64) -> Result<Vec<AuxBlock>, FunnelError> {
        let blocks = try_join_all((from..=to).map(|position| self.read_block(position))).await?;
        Ok(blocks.into_iter().flatten().collect())
    }
}
