//! EVM networks: RPC access, game input logs and chain data extensions.

pub mod cde;
pub mod source;

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder, ReqwestProvider};
use alloy::rpc::types::{BlockTransactionsKind, Filter};
use async_trait::async_trait;
use fp_chain::NetworkId;
use url::Url;

use crate::FunnelError;

pub use cde::{read_evm_cdes, EvmCde};
pub use source::EvmBlockSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmBlockHeader {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
}

/// Inclusive block range, restricted to some contracts and event signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub from_block: u64,
    pub to_block: u64,
    pub addresses: Vec<Address>,
    pub event_signatures: Vec<B256>,
}

/// The subset of the Ethereum JSON-RPC the funnels rely on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EvmRpc: Send + Sync {
    async fn block_number(&self) -> Result<u64, FunnelError>;
    async fn block_header(&self, block_number: u64) -> Result<Option<EvmBlockHeader>, FunnelError>;
    async fn logs(&self, filter: LogFilter) -> Result<Vec<EvmLog>, FunnelError>;
}

#[derive(Clone)]
pub struct AlloyEvmRpc {
    network: NetworkId,
    provider: ReqwestProvider,
}

impl AlloyEvmRpc {
    pub fn new(network: NetworkId, url: Url) -> Self {
        let provider = ProviderBuilder::new().on_http(url);
        Self { network, provider }
    }
}

#[async_trait]
impl EvmRpc for AlloyEvmRpc {
    async fn block_number(&self) -> Result<u64, FunnelError> {
        self.provider.get_block_number().await.map_err(|e| FunnelError::rpc(&self.network, e))
    }

    async fn block_header(&self, block_number: u64) -> Result<Option<EvmBlockHeader>, FunnelError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block_number), BlockTransactionsKind::Hashes)
            .await
            .map_err(|e| FunnelError::rpc(&self.network, e))?;
        Ok(block.map(|block| EvmBlockHeader {
            number: block.header.number,
            hash: block.header.hash,
            timestamp: block.header.timestamp,
        }))
    }

    async fn logs(&self, filter: LogFilter) -> Result<Vec<EvmLog>, FunnelError> {
        let filter = Filter::new()
            .from_block(filter.from_block)
            .to_block(filter.to_block)
            .address(filter.addresses)
            .event_signature(filter.event_signatures);

        let logs = self.provider.get_logs(&filter).await.map_err(|e| FunnelError::rpc(&self.network, e))?;

        logs.into_iter()
            .map(|log| {
                let block_number = log
                    .block_number
                    .ok_or_else(|| FunnelError::invalid_response(&self.network, "log without block number"))?;
                Ok(EvmLog {
                    address: log.address(),
                    topics: log.topics().to_vec(),
                    data: log.data().data.clone(),
                    block_number,
                    transaction_hash: log.transaction_hash,
                    log_index: log.log_index,
                })
            })
            .collect()
    }
}
