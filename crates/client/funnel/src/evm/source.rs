use std::sync::Arc;

use alloy::primitives::Address;
use alloy::sol;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use fc_input::RawInput;
use fp_chain::{ChainDataExtensionDatum, NetworkId};

use super::{read_evm_cdes, EvmCde, EvmLog, EvmRpc, LogFilter};
use crate::block::{BlockHeader, BlockSource};
use crate::FunnelError;

sol! {
    #[derive(Debug)]
    interface IPaimaL2Contract {
        event PaimaGameInteraction(address indexed userAddress, bytes data, uint256 value);
    }
}

/// A main chain running the game contract, read over JSON-RPC.
pub struct EvmBlockSource {
    network: NetworkId,
    rpc: Arc<dyn EvmRpc>,
    contract_address: Address,
    cdes: Vec<EvmCde>,
}

impl EvmBlockSource {
    pub fn new(network: NetworkId, rpc: Arc<dyn EvmRpc>, contract_address: Address, cdes: Vec<EvmCde>) -> Self {
        Self { network, rpc, contract_address, cdes }
    }

    fn to_input(&self, log: &EvmLog) -> Option<(u64, RawInput)> {
        let event = match IPaimaL2Contract::PaimaGameInteraction::decode_raw_log(
            log.topics.iter().copied(),
            &log.data,
            true,
        ) {
            Ok(event) => event,
            Err(err) => {
                tracing::debug!("Skipping undecodable game input in block #{}: {err}", log.block_number);
                return None;
            }
        };
        let input = RawInput {
            tx_hash: log.transaction_hash.map(|hash| hash.to_string()),
            real_address: event.userAddress.to_string().to_lowercase(),
            payload: event.data.to_vec(),
            value: event.value,
        };
        Some((log.block_number, input))
    }
}

#[async_trait]
impl BlockSource for EvmBlockSource {
    fn network(&self) -> NetworkId {
        self.network.clone()
    }

    fn first_extension_height(&self) -> Option<u64> {
        self.cdes.iter().map(|cde| cde.start_block_height).min()
    }

    async fn latest_block_number(&self) -> Result<u64, FunnelError> {
        self.rpc.block_number().await
    }

    async fn block_header(&self, block_number: u64) -> Result<Option<BlockHeader>, FunnelError> {
        let header = self.rpc.block_header(block_number).await?;
        Ok(header.map(|header| BlockHeader {
            number: header.number,
            hash: header.hash.to_string(),
            timestamp: header.timestamp,
        }))
    }

    async fn submitted_inputs(&self, from: u64, to: u64) -> Result<Vec<(u64, RawInput)>, FunnelError> {
        let mut logs = self
            .rpc
            .logs(LogFilter {
                from_block: from,
                to_block: to,
                addresses: vec![self.contract_address],
                event_signatures: vec![IPaimaL2Contract::PaimaGameInteraction::SIGNATURE_HASH],
            })
            .await?;
        logs.sort_by_key(|log| (log.block_number, log.log_index.unwrap_or_default()));
        Ok(logs.iter().filter_map(|log| self.to_input(log)).collect())
    }

    async fn extension_datums(&self, from: u64, to: u64) -> Result<Vec<ChainDataExtensionDatum>, FunnelError> {
        if self.cdes.is_empty() {
            return Ok(vec![]);
        }
        read_evm_cdes(self.rpc.as_ref(), &self.network, &self.cdes, from, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evm::{EvmBlockHeader, MockEvmRpc};
    use alloy::primitives::{address, Bytes, B256, U256};

    const GAME: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
    const USER: Address = address!("AbCd000000000000000000000000000000000001");

    fn interaction(payload: &str, value: u64, block_number: u64, log_index: u64) -> EvmLog {
        let event = IPaimaL2Contract::PaimaGameInteraction {
            userAddress: USER,
            data: Bytes::from(payload.as_bytes().to_vec()),
            value: U256::from(value),
        };
        let data = event.encode_log_data();
        EvmLog {
            address: GAME,
            topics: data.topics().to_vec(),
            data: data.data,
            block_number,
            transaction_hash: Some(B256::repeat_byte(log_index as u8)),
            log_index: Some(log_index),
        }
    }

    #[tokio::test]
    async fn game_interactions_become_raw_inputs() {
        let mut rpc = MockEvmRpc::new();
        rpc.expect_logs()
            .withf(|filter| {
                filter.addresses == vec![GAME]
                    && filter.event_signatures == vec![IPaimaL2Contract::PaimaGameInteraction::SIGNATURE_HASH]
            })
            .returning(|_| {
                Ok(vec![interaction("b|2", 0, 8, 1), interaction("a|1", 30, 7, 4), interaction("c", 0, 8, 0)])
            });
        let source = EvmBlockSource::new(NetworkId::eip155(31337), Arc::new(rpc), GAME, vec![]);

        let inputs = source.submitted_inputs(7, 8).await.unwrap();
        let payloads: Vec<_> =
            inputs.iter().map(|(block, input)| (*block, String::from_utf8(input.payload.clone()).unwrap())).collect();
        assert_eq!(payloads, vec![(7, "a|1".to_string()), (8, "c".to_string()), (8, "b|2".to_string())]);

        let (_, first) = &inputs[0];
        assert_eq!(first.real_address, "0xabcd000000000000000000000000000000000001");
        assert_eq!(first.value, U256::from(30u64));
        assert_eq!(first.tx_hash.as_deref(), Some(B256::repeat_byte(4).to_string().as_str()));
    }

    #[tokio::test]
    async fn undecodable_logs_are_skipped() {
        let mut rpc = MockEvmRpc::new();
        rpc.expect_logs().returning(|_| {
            let mut broken = interaction("x", 0, 3, 0);
            broken.data = Bytes::from(vec![1, 2, 3]);
            Ok(vec![broken, interaction("y", 0, 3, 1)])
        });
        let source = EvmBlockSource::new(NetworkId::eip155(1), Arc::new(rpc), GAME, vec![]);
        let inputs = source.submitted_inputs(3, 3).await.unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].1.payload, b"y".to_vec());
    }

    #[tokio::test]
    async fn headers_and_extensions() {
        let mut rpc = MockEvmRpc::new();
        rpc.expect_block_header().returning(|number| {
            Ok((number < 100).then(|| EvmBlockHeader {
                number,
                hash: B256::repeat_byte(0x11),
                timestamp: 1_000 + number,
            }))
        });
        let source = EvmBlockSource::new(NetworkId::eip155(1), Arc::new(rpc), GAME, vec![]);

        let header = source.block_header(5).await.unwrap().unwrap();
        assert_eq!(header.timestamp, 1_005);
        assert_eq!(header.hash, format!("0x{}", "11".repeat(32)));
        assert!(source.block_header(100).await.unwrap().is_none());

        // No extension configured: nothing is queried.
        assert!(source.extension_datums(0, 10).await.unwrap().is_empty());
        assert_eq!(source.first_extension_height(), None);
    }
}
