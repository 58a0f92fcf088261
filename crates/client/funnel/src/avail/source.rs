use std::sync::Arc;

use async_trait::async_trait;
use fc_input::RawInput;
use fp_chain::{ChainDataExtensionDatum, NetworkId, U256};
use futures::future::try_join_all;

use super::AvailRpc;
use crate::block::{BlockHeader, BlockSource};
use crate::FunnelError;

/// An Avail main chain. Avail has no contract events, so it never carries extension data.
pub struct AvailBlockSource {
    network: NetworkId,
    rpc: Arc<dyn AvailRpc>,
}

impl AvailBlockSource {
    pub fn new(network: NetworkId, rpc: Arc<dyn AvailRpc>) -> Self {
        Self { network, rpc }
    }

    async fn block_inputs(&self, block_number: u64) -> Result<Vec<(u64, RawInput)>, FunnelError> {
        let submissions = self
            .rpc
            .submissions(block_number)
            .await?
            .ok_or_else(|| FunnelError::missing_block(&self.network, block_number))?;
        Ok(submissions
            .into_iter()
            .map(|submission| {
                let input = RawInput {
                    tx_hash: submission.tx_hash,
                    real_address: submission.sender,
                    payload: submission.data,
                    value: U256::ZERO,
                };
                (block_number, input)
            })
            .collect())
    }
}

#[async_trait]
impl BlockSource for AvailBlockSource {
    fn network(&self) -> NetworkId {
        self.network.clone()
    }

    fn first_extension_height(&self) -> Option<u64> {
        None
    }

    async fn latest_block_number(&self) -> Result<u64, FunnelError> {
        self.rpc.latest_block().await
    }

    async fn block_header(&self, block_number: u64) -> Result<Option<BlockHeader>, FunnelError> {
        let header = self.rpc.header(block_number).await?;
        Ok(header.map(|header| BlockHeader { number: header.number, hash: header.hash, timestamp: header.timestamp }))
    }

    async fn submitted_inputs(&self, from: u64, to: u64) -> Result<Vec<(u64, RawInput)>, FunnelError> {
        let blocks = try_join_all((from..=to).map(|block_number| self.block_inputs(block_number))).await?;
        Ok(blocks.into_iter().flatten().collect())
    }

    async fn extension_datums(&self, _from: u64, _to: u64) -> Result<Vec<ChainDataExtensionDatum>, FunnelError> {
        Ok(vec![])
    }
}
