//! Cardano stake pool delegations, read from a Carp indexer.
//!
//! Positions are slots. Since the Shelley hard fork a slot lasts one second, so time and slots convert both ways
//! from a known Shelley era point of each network.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use fp_chain::{CdePayload, ChainDataExtensionDatum, NetworkId};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{AuxBlock, AuxiliaryNetwork};
use crate::cache::AuxCacheKind;
use crate::config::{CdeConfig, CdeSource};
use crate::http::JsonClient;
use crate::FunnelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardanoNetwork {
    Mainnet,
    Preprod,
    Preview,
}

/// A point of the Shelley era: `slot` started at `time`, in `epoch`.
struct ShelleyEra {
    time: u64,
    slot: u64,
    epoch: u64,
    epoch_length: u64,
}

impl CardanoNetwork {
    pub fn network_id(&self) -> NetworkId {
        match self {
            Self::Mainnet => NetworkId::from("cip34:1-764824073"),
            Self::Preprod => NetworkId::from("cip34:0-1"),
            Self::Preview => NetworkId::from("cip34:0-2"),
        }
    }

    fn shelley(&self) -> ShelleyEra {
        match self {
            Self::Mainnet => ShelleyEra { time: 1_596_059_091, slot: 4_492_800, epoch: 208, epoch_length: 432_000 },
            Self::Preprod => ShelleyEra { time: 1_655_769_600, slot: 86_400, epoch: 4, epoch_length: 432_000 },
            Self::Preview => ShelleyEra { time: 1_666_656_000, slot: 0, epoch: 0, epoch_length: 86_400 },
        }
    }

    pub fn slot_timestamp(&self, slot: u64) -> u64 {
        let era = self.shelley();
        if slot >= era.slot {
            era.time + (slot - era.slot)
        } else {
            era.time.saturating_sub(era.slot - slot)
        }
    }

    /// Last slot starting at or before `timestamp`.
    pub fn slot_at(&self, timestamp: u64) -> u64 {
        let era = self.shelley();
        if timestamp >= era.time {
            era.slot + (timestamp - era.time)
        } else {
            era.slot.saturating_sub(era.time - timestamp)
        }
    }

    pub fn epoch(&self, slot: u64) -> u64 {
        let era = self.shelley();
        if slot >= era.slot {
            era.epoch + (slot - era.slot) / era.epoch_length
        } else {
            era.epoch.saturating_sub((era.slot - slot).div_ceil(era.epoch_length))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CarpBlock {
    pub era: u64,
    pub hash: String,
    pub height: u64,
    pub epoch: u64,
    pub slot: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarpDelegation {
    pub credential: String,
    /// `None` when the stake key was deregistered.
    pub pool: Option<String>,
    pub slot: u64,
    pub tx_id: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CarpApi: Send + Sync {
    /// The block `offset` blocks below the tip.
    async fn latest_block(&self, offset: u64) -> Result<CarpBlock, FunnelError>;

    /// Delegations to `pools` in the inclusive slot range.
    async fn delegations(
        &self,
        pools: Vec<String>,
        min_slot: u64,
        max_slot: u64,
    ) -> Result<Vec<CarpDelegation>, FunnelError>;
}

#[derive(Serialize)]
struct LatestBlockRequest {
    offset: u64,
}

#[derive(Deserialize)]
struct LatestBlockResponse {
    block: CarpBlock,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SlotRange {
    min_slot: u64,
    max_slot: u64,
}

#[derive(Serialize)]
struct DelegationRequest {
    pools: Vec<String>,
    range: SlotRange,
}

pub struct CarpClient {
    http: JsonClient,
}

impl CarpClient {
    pub fn new(network: NetworkId, url: Url) -> Self {
        Self { http: JsonClient::new(network, url) }
    }
}

#[async_trait]
impl CarpApi for CarpClient {
    async fn latest_block(&self, offset: u64) -> Result<CarpBlock, FunnelError> {
        let response: LatestBlockResponse = self.http.post("block/latest", &LatestBlockRequest { offset }).await?;
        Ok(response.block)
    }

    async fn delegations(
        &self,
        pools: Vec<String>,
        min_slot: u64,
        max_slot: u64,
    ) -> Result<Vec<CarpDelegation>, FunnelError> {
        let request = DelegationRequest { pools, range: SlotRange { min_slot, max_slot } };
        self.http.post("delegation/pool", &request).await
    }
}

#[derive(Debug, Clone)]
pub struct PoolDelegationCde {
    pub id: u32,
    pub name: String,
    pub start_slot: u64,
    pub scheduled_prefix: Option<String>,
    pub pool_ids: Vec<String>,
}

impl PoolDelegationCde {
    pub fn from_config(id: u32, config: &CdeConfig) -> Option<Self> {
        let CdeSource::CardanoPoolDelegation { pool_ids } = &config.source else {
            return None;
        };
        Some(Self {
            id,
            name: config.name.clone(),
            start_slot: config.start_block_height,
            scheduled_prefix: config.scheduled_prefix.clone(),
            pool_ids: pool_ids.clone(),
        })
    }
}

pub struct CarpNetwork {
    network: NetworkId,
    cardano: CardanoNetwork,
    api: Arc<dyn CarpApi>,
    cdes: Vec<PoolDelegationCde>,
    confirmation_depth: u64,
}

impl CarpNetwork {
    pub fn new(
        cardano: CardanoNetwork,
        api: Arc<dyn CarpApi>,
        cdes: Vec<PoolDelegationCde>,
        confirmation_depth: u64,
    ) -> Self {
        Self { network: cardano.network_id(), cardano, api, cdes, confirmation_depth }
    }

    async fn read_cde(
        &self,
        cde: &PoolDelegationCde,
        from: u64,
        to: u64,
    ) -> Result<Vec<ChainDataExtensionDatum>, FunnelError> {
        let delegations = self.api.delegations(cde.pool_ids.clone(), from.max(cde.start_slot), to).await?;
        Ok(delegations
            .into_iter()
            .map(|delegation| ChainDataExtensionDatum {
                cde_id: cde.id,
                cde_name: cde.name.clone(),
                network: self.network.clone(),
                block_number: delegation.slot,
                transaction_hash: Some(delegation.tx_id),
                scheduled_prefix: cde.scheduled_prefix.clone(),
                payload: CdePayload::CardanoPoolDelegation {
                    address: delegation.credential,
                    pool: delegation.pool,
                    epoch: self.cardano.epoch(delegation.slot),
                },
            })
            .collect())
    }
}

#[async_trait]
impl AuxiliaryNetwork for CarpNetwork {
    fn network(&self) -> &NetworkId {
        &self.network
    }

    fn cache_kind(&self) -> AuxCacheKind {
        AuxCacheKind::Carp
    }

    fn start_position(&self) -> u64 {
        self.cdes.iter().map(|cde| cde.start_slot).min().unwrap_or_default()
    }

    async fn safe_tip(&self) -> Result<u64, FunnelError> {
        Ok(self.api.latest_block(self.confirmation_depth).await?.slot)
    }

    async fn timestamp_of(&self, position: u64) -> Result<u64, FunnelError> {
        Ok(self.cardano.slot_timestamp(position))
    }

    fn position_from_timestamp(&self, timestamp: u64) -> Option<u64> {
        Some(self.cardano.slot_at(timestamp))
    }

    async fn fetch_range(&self, from: u64, to: u64) -> Result<Vec<AuxBlock>, FunnelError> {
        let reads = self.cdes.iter().filter(|cde| cde.start_slot <= to).map(|cde| self.read_cde(cde, from, to));
        let mut by_slot: BTreeMap<u64, Vec<_>> = BTreeMap::new();
        for datum in try_join_all(reads).await?.into_iter().flatten() {
            by_slot.entry(datum.block_number).or_default().push(datum);
        }
        Ok(by_slot
            .into_iter()
            .map(|(slot, datums)| AuxBlock {
                position: slot,
                timestamp: self.cardano.slot_timestamp(slot),
                datums,
                inputs: vec![],
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case::mainnet_shelley_start(CardanoNetwork::Mainnet, 4_492_800, 1_596_059_091, 208)]
    #[case::mainnet_next_epoch(CardanoNetwork::Mainnet, 4_924_800, 1_596_491_091, 209)]
    #[case::preprod(CardanoNetwork::Preprod, 86_400 + 432_000 * 3 + 5, 1_655_769_600 + 432_000 * 3 + 5, 7)]
    #[case::preview(CardanoNetwork::Preview, 86_399, 1_666_742_399, 0)]
    fn slots_convert_to_time_and_epochs(
        #[case] network: CardanoNetwork,
        #[case] slot: u64,
        #[case] timestamp: u64,
        #[case] epoch: u64,
    ) {
        assert_eq!(network.slot_timestamp(slot), timestamp);
        assert_eq!(network.slot_at(timestamp), slot);
        assert_eq!(network.epoch(slot), epoch);
    }

    fn cde(id: u32, start_slot: u64, pool: &str) -> PoolDelegationCde {
        PoolDelegationCde {
            id,
            name: format!("pool-{id}"),
            start_slot,
            scheduled_prefix: Some("delegate".into()),
            pool_ids: vec![pool.into()],
        }
    }

    #[tokio::test]
    async fn delegations_are_grouped_by_slot() {
        let mut api = MockCarpApi::new();
        api.expect_delegations().returning(|pools, min_slot, max_slot| {
            assert_eq!(max_slot, 2_000);
            Ok(match pools[0].as_str() {
                "pool1a" => {
                    assert_eq!(min_slot, 1_000);
                    vec![CarpDelegation {
                        credential: "stake_a".into(),
                        pool: Some("pool1a".into()),
                        slot: 1_500,
                        tx_id: "aa".into(),
                    }]
                }
                _ => {
                    assert_eq!(min_slot, 1_200);
                    vec![
                        CarpDelegation { credential: "stake_b".into(), pool: None, slot: 1_500, tx_id: "bb".into() },
                        CarpDelegation { credential: "stake_c".into(), pool: None, slot: 1_300, tx_id: "cc".into() },
                    ]
                }
            })
        });
        let cdes = vec![cde(0, 900, "pool1a"), cde(1, 1_200, "pool1b")];
        let network = CarpNetwork::new(CardanoNetwork::Preview, Arc::new(api), cdes, 0);
        assert_eq!(network.start_position(), 900);

        let blocks = network.fetch_range(1_000, 2_000).await.unwrap();
        let positions: Vec<_> = blocks.iter().map(|b| (b.position, b.datums.len())).collect();
        assert_eq!(positions, vec![(1_300, 1), (1_500, 2)]);
        assert_eq!(blocks[0].timestamp, 1_666_657_300);
        let datum = &blocks[1].datums[0];
        assert_eq!(datum.transaction_hash.as_deref(), Some("aa"));
        assert_eq!(
            datum.payload,
            CdePayload::CardanoPoolDelegation { address: "stake_a".into(), pool: Some("pool1a".into()), epoch: 0 }
        );
        assert_eq!(datum.network, NetworkId::from("cip34:0-2"));
    }

    #[tokio::test]
    async fn client_speaks_carp() {
        let server = MockServer::start();
        let latest = server.mock(|when, then| {
            when.method("POST").path("/block/latest").json_body(json!({ "offset": 3 }));
            then.status(200).json_body(json!({
                "block": { "era": 6, "hash": "ab12", "height": 1_000_000, "epoch": 500, "slot": 9_000_000 }
            }));
        });
        let delegations = server.mock(|when, then| {
            when.method("POST")
                .path("/delegation/pool")
                .json_body(json!({ "pools": ["pool1x"], "range": { "minSlot": 10, "maxSlot": 20 } }));
            then.status(200).json_body(json!([
                { "credential": "stake_x", "pool": "pool1x", "slot": 15, "txId": "0f" },
                { "credential": "stake_y", "pool": null, "slot": 16, "txId": "1f" }
            ]));
        });
        let client = CarpClient::new(CardanoNetwork::Preview.network_id(), server.base_url().parse().unwrap());

        assert_eq!(client.latest_block(3).await.unwrap().slot, 9_000_000);
        let res = client.delegations(vec!["pool1x".into()], 10, 20).await.unwrap();
        assert_eq!(res[1], CarpDelegation { credential: "stake_y".into(), pool: None, slot: 16, tx_id: "1f".into() });
        latest.assert();
        delegations.assert();
    }
}
