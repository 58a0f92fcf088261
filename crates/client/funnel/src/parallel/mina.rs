//! zkApp events and actions, read from a Mina archive node GraphQL API.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use fp_chain::{CdePayload, ChainDataExtensionDatum, NetworkId};
use futures::future::try_join_all;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use url::Url;

use super::{AuxBlock, AuxiliaryNetwork};
use crate::cache::AuxCacheKind;
use crate::config::{CdeConfig, CdeSource};
use crate::http::JsonClient;
use crate::FunnelError;

const MAX_HEIGHT_QUERY: &str = "query { networkState { maxBlockHeight { canonicalMaxBlockHeight } } }";

const BLOCK_QUERY: &str = "query($height: Int!) { \
    blocks(query: { blockHeight: $height, canonical: true }, limit: 1) { \
        blockHeight protocolState { blockchainState { utcDate } } } }";

const EVENTS_QUERY: &str = "query($address: String!, $from: Int!, $to: Int!) { \
    events(input: { address: $address, from: $from, to: $to }) { \
        blockInfo { height timestamp } eventData { data transactionInfo { hash } } } }";

const ACTIONS_QUERY: &str = "query($address: String!, $from: Int!, $to: Int!) { \
    actions(input: { address: $address, from: $from, to: $to }) { \
        blockInfo { height timestamp } actionData { data transactionInfo { hash } } } }";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinaDataKind {
    Events,
    Actions,
}

/// Events or actions of one zkApp, grouped by block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinaBlockData {
    pub height: u64,
    /// Unix seconds.
    pub timestamp: u64,
    /// One entry per event or action, with its transaction hash.
    pub items: Vec<(Vec<String>, Option<String>)>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MinaArchive: Send + Sync {
    async fn max_block_height(&self) -> Result<u64, FunnelError>;

    /// Timestamp of the canonical block at `height`, in seconds.
    async fn block_timestamp(&self, height: u64) -> Result<Option<u64>, FunnelError>;

    async fn zkapp_data(
        &self,
        kind: MinaDataKind,
        address: String,
        from: u64,
        to: u64,
    ) -> Result<Vec<MinaBlockData>, FunnelError>;
}

/// Millisecond timestamps come as strings or numbers depending on the archive version.
#[derive(Deserialize)]
#[serde(untagged)]
enum Millis {
    Number(u64),
    Text(String),
}

impl Millis {
    fn seconds(&self) -> Option<u64> {
        match self {
            Self::Number(ms) => Some(ms / 1000),
            Self::Text(ms) => ms.parse::<u64>().ok().map(|ms| ms / 1000),
        }
    }
}

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkStateData {
    network_state: NetworkState,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkState {
    max_block_height: MaxBlockHeight,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaxBlockHeight {
    canonical_max_block_height: u64,
}

#[derive(Deserialize)]
struct BlocksData {
    blocks: Vec<BlockData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockData {
    protocol_state: ProtocolState,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolState {
    blockchain_state: BlockchainState,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockchainState {
    utc_date: Millis,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZkappData {
    #[serde(default, alias = "actions")]
    events: Vec<ZkappBlock>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZkappBlock {
    block_info: BlockInfo,
    #[serde(default, alias = "actionData")]
    event_data: Vec<ZkappItem>,
}

#[derive(Deserialize)]
struct BlockInfo {
    height: u64,
    timestamp: Millis,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZkappItem {
    data: Vec<String>,
    #[serde(default)]
    transaction_info: Option<TransactionInfo>,
}

#[derive(Deserialize)]
struct TransactionInfo {
    hash: String,
}

pub struct MinaArchiveClient {
    http: JsonClient,
}

impl MinaArchiveClient {
    pub fn new(network: NetworkId, url: Url) -> Self {
        Self { http: JsonClient::new(network, url) }
    }

    async fn query<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, FunnelError> {
        let response: GraphQlResponse<T> =
            self.http.post("", &json!({ "query": query, "variables": variables })).await?;
        if let Some(error) = response.errors.first() {
            return Err(FunnelError::rpc(self.http.network(), &error.message));
        }
        response.data.ok_or_else(|| FunnelError::invalid_response(self.http.network(), "GraphQL response without data"))
    }

    fn invalid_timestamp(&self) -> FunnelError {
        FunnelError::invalid_response(self.http.network(), "invalid block timestamp")
    }
}

#[async_trait]
impl MinaArchive for MinaArchiveClient {
    async fn max_block_height(&self) -> Result<u64, FunnelError> {
        let data: NetworkStateData = self.query(MAX_HEIGHT_QUERY, json!({})).await?;
        Ok(data.network_state.max_block_height.canonical_max_block_height)
    }

    async fn block_timestamp(&self, height: u64) -> Result<Option<u64>, FunnelError> {
        let data: BlocksData = self.query(BLOCK_QUERY, json!({ "height": height })).await?;
        let Some(block) = data.blocks.first() else { return Ok(None) };
        block.protocol_state.blockchain_state.utc_date.seconds().map(Some).ok_or_else(|| self.invalid_timestamp())
    }

    async fn zkapp_data(
        &self,
        kind: MinaDataKind,
        address: String,
        from: u64,
        to: u64,
    ) -> Result<Vec<MinaBlockData>, FunnelError> {
        let query = match kind {
            MinaDataKind::Events => EVENTS_QUERY,
            MinaDataKind::Actions => ACTIONS_QUERY,
        };
        // The archive range is end-exclusive.
        let variables = json!({ "address": address, "from": from, "to": to + 1 });
        let data: ZkappData = self.query(query, variables).await?;
        data.events
            .into_iter()
            .map(|block| {
                Ok(MinaBlockData {
                    height: block.block_info.height,
                    timestamp: block.block_info.timestamp.seconds().ok_or_else(|| self.invalid_timestamp())?,
                    items: block
                        .event_data
                        .into_iter()
                        .map(|item| (item.data, item.transaction_info.map(|info| info.hash)))
                        .collect(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct MinaCde {
    pub id: u32,
    pub name: String,
    pub start_block_height: u64,
    pub scheduled_prefix: Option<String>,
    pub address: String,
    pub kind: MinaDataKind,
}

impl MinaCde {
    pub fn from_config(id: u32, config: &CdeConfig) -> Option<Self> {
        let (address, kind) = match &config.source {
            CdeSource::MinaEventGeneric { address } => (address.clone(), MinaDataKind::Events),
            CdeSource::MinaActionGeneric { address } => (address.clone(), MinaDataKind::Actions),
            _ => return None,
        };
        Some(Self {
            id,
            name: config.name.clone(),
            start_block_height: config.start_block_height,
            scheduled_prefix: config.scheduled_prefix.clone(),
            address,
            kind,
        })
    }
}

pub struct MinaNetwork {
    network: NetworkId,
    archive: Arc<dyn MinaArchive>,
    cdes: Vec<MinaCde>,
    confirmation_depth: u64,
}

impl MinaNetwork {
    pub fn new(network: NetworkId, archive: Arc<dyn MinaArchive>, cdes: Vec<MinaCde>, confirmation_depth: u64) -> Self {
        Self { network, archive, cdes, confirmation_depth }
    }

    async fn read_cde(&self, cde: &MinaCde, from: u64, to: u64) -> Result<Vec<AuxBlock>, FunnelError> {
        let blocks =
            self.archive.zkapp_data(cde.kind, cde.address.clone(), from.max(cde.start_block_height), to).await?;
        Ok(blocks
            .into_iter()
            .map(|block| {
                let datums = block
                    .items
                    .into_iter()
                    .map(|(data, tx_hash)| ChainDataExtensionDatum {
                        cde_id: cde.id,
                        cde_name: cde.name.clone(),
                        network: self.network.clone(),
                        block_number: block.height,
                        transaction_hash: tx_hash,
                        scheduled_prefix: cde.scheduled_prefix.clone(),
                        payload: match cde.kind {
                            MinaDataKind::Events => CdePayload::MinaEventGeneric { data },
                            MinaDataKind::Actions => CdePayload::MinaActionGeneric { data },
                        },
                    })
                    .collect();
                AuxBlock { position: block.height, timestamp: block.timestamp, datums, inputs: vec![] }
            })
            .collect())
    }
}

#[async_trait]
impl AuxiliaryNetwork for MinaNetwork {
    fn network(&self) -> &NetworkId {
        &self.network
    }

    fn cache_kind(&self) -> AuxCacheKind {
        AuxCacheKind::Mina
    }

    fn start_position(&self) -> u64 {
        self.cdes.iter().map(|cde| cde.start_block_height).min().unwrap_or_default()
    }

    async fn safe_tip(&self) -> Result<u64, FunnelError> {
        Ok(self.archive.max_block_height().await?.saturating_sub(self.confirmation_depth))
    }

    async fn timestamp_of(&self, position: u64) -> Result<u64, FunnelError> {
        self.archive.block_timestamp(position).await?.ok_or_else(|| FunnelError::missing_block(&self.network, position))
    }

    async fn fetch_range(&self, from: u64, to: u64) -> Result<Vec<AuxBlock>, FunnelError> {
        let reads = self.cdes.iter().filter(|cde| cde.start_block_height <= to).map(|cde| self.read_cde(cde, from, to));
        let mut by_height: BTreeMap<u64, AuxBlock> = BTreeMap::new();
        for block in try_join_all(reads).await?.into_iter().flatten() {
            match by_height.get_mut(&block.position) {
                Some(existing) => existing.datums.extend(block.datums),
                None => {
                    by_height.insert(block.position, block);
                }
            }
        }
        Ok(by_height.into_values().collect())
    }
}
