use std::collections::BTreeMap;

use async_trait::async_trait;
use fp_chain::{ChainData, NetworkId, PresyncChainData};

use crate::FunnelError;

/// Inclusive range of positions to presync on one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresyncRange {
    pub from: u64,
    pub to: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresyncResult {
    Data {
        blocks: Vec<PresyncChainData>,
        /// Last position actually covered, the range may be clamped to what the network can serve. `None` when
        /// nothing could be read yet.
        fetched_to: Option<u64>,
    },
    /// The network is done with presync. This is permanent until the cache is cleared.
    Finished,
}

/// A reader of normalized chain data.
///
/// Funnels compose: the main block funnel reads the main chain, and every decorator owns an inner funnel, merging
/// its own network's data into the blocks returned by the inner one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Funnel: Send + Sync {
    /// Reads the main chain from `block_height` on. May return several consecutive blocks, and only returns
    /// nothing when `block_height` is not available yet.
    async fn read_data(&self, block_height: u64) -> Result<Vec<ChainData>, FunnelError>;

    /// Reads extension data from before the main chain start, for every network present in `ranges`.
    async fn read_presync_data(
        &self,
        ranges: &BTreeMap<NetworkId, PresyncRange>,
    ) -> Result<BTreeMap<NetworkId, PresyncResult>, FunnelError>;

    /// The position each network of the chain starts presync from.
    async fn presync_starts(&self) -> Result<BTreeMap<NetworkId, u64>, FunnelError>;
}
