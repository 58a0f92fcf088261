use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use fp_chain::NetworkId;
use futures::future::try_join_all;

use super::{AuxBlock, AuxiliaryNetwork};
use crate::cache::AuxCacheKind;
use crate::evm::{read_evm_cdes, EvmCde, EvmRpc};
use crate::FunnelError;

/// Another EVM chain, read for its extension data only.
pub struct ParallelEvmNetwork {
    network: NetworkId,
    rpc: Arc<dyn EvmRpc>,
    cdes: Vec<EvmCde>,
    confirmation_depth: u64,
}

impl ParallelEvmNetwork {
    pub fn new(network: NetworkId, rpc: Arc<dyn EvmRpc>, cdes: Vec<EvmCde>, confirmation_depth: u64) -> Self {
        Self { network, rpc, cdes, confirmation_depth }
    }
}

#[async_trait]
impl AuxiliaryNetwork for ParallelEvmNetwork {
    fn network(&self) -> &NetworkId {
        &self.network
    }

    fn cache_kind(&self) -> AuxCacheKind {
        AuxCacheKind::ParallelEvm
    }

    fn start_position(&self) -> u64 {
        self.cdes.iter().map(|cde| cde.start_block_height).min().unwrap_or_default()
    }

    async fn safe_tip(&self) -> Result<u64, FunnelError> {
        Ok(self.rpc.block_number().await?.saturating_sub(self.confirmation_depth))
    }

    async fn timestamp_of(&self, position: u64) -> Result<u64, FunnelError> {
        let header = self.rpc.block_header(position).await?;
        header.map(|header| header.timestamp).ok_or_else(|| FunnelError::missing_block(&self.network, position))
    }

    async fn fetch_range(&self, from: u64, to: u64) -> Result<Vec<AuxBlock>, FunnelError> {
        let datums = read_evm_cdes(self.rpc.as_ref(), &self.network, &self.cdes, from, to).await?;
        let mut by_block: BTreeMap<u64, Vec<_>> = BTreeMap::new();
        for datum in datums {
            by_block.entry(datum.block_number).or_default().push(datum);
        }

        // Only blocks with data need a timestamp.
        try_join_all(by_block.into_iter().map(|(position, datums)| async move {
            let timestamp = self.timestamp_of(position).await?;
            Ok(AuxBlock { position, timestamp, datums, inputs: vec![] })
        }))
        .await
    }
}
