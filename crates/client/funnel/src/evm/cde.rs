//! Chain data extensions read from EVM contract events.

use alloy::dyn_abi::{DynSolValue, EventExt};
use alloy::json_abi::Event;
use alloy::primitives::{Address, B256};
use alloy::sol;
use alloy::sol_types::SolEvent;
use fp_chain::{CdeKind, CdePayload, ChainDataExtensionDatum, NetworkId};
use futures::future::try_join_all;
use serde_json::{Map, Value};

use super::{EvmLog, EvmRpc, LogFilter};
use crate::config::{CdeConfig, CdeSource, ConfigError};
use crate::FunnelError;

sol! {
    #[derive(Debug)]
    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);
    }

    #[derive(Debug)]
    interface IERC721 {
        event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
    }

    #[derive(Debug)]
    interface IInverseProjectedNft {
        event Minted(uint256 indexed tokenId, string initialData);
    }

    #[derive(Debug)]
    interface IERC1155 {
        event TransferSingle(address indexed operator, address indexed from, address indexed to, uint256 id, uint256 value);
        event TransferBatch(address indexed operator, address indexed from, address indexed to, uint256[] ids, uint256[] values);
    }

    #[derive(Debug)]
    interface IERC6551Registry {
        event ERC6551AccountCreated(address account, address indexed implementation, bytes32 salt, uint256 chainId, address indexed tokenContract, uint256 indexed tokenId);
    }
}

#[derive(Debug, Clone)]
enum EvmCdeDecoder {
    Erc20,
    Erc20Deposit { deposit_address: Address },
    Erc721,
    Erc721Mint,
    Erc1155,
    Erc6551Registry,
    Generic { event: Event },
    DynamicEvmPrimitive { event: Event, address_field: String, target_kind: CdeKind },
}

/// An extension backed by the events of a single contract.
#[derive(Debug, Clone)]
pub struct EvmCde {
    pub id: u32,
    pub name: String,
    pub start_block_height: u64,
    pub scheduled_prefix: Option<String>,
    pub contract_address: Address,
    decoder: EvmCdeDecoder,
}

fn parse_event(name: &str, signature: &str) -> Result<Event, ConfigError> {
    Event::parse(signature)
        .map_err(|e| ConfigError::Invalid(format!("CDE {name}: invalid event signature `{signature}`: {e}")))
}

impl EvmCde {
    /// Returns `None` for extensions which are not read from EVM logs.
    pub fn from_config(id: u32, config: &CdeConfig) -> Result<Option<Self>, ConfigError> {
        let (contract_address, decoder) = match &config.source {
            CdeSource::Erc20 { contract_address } => (*contract_address, EvmCdeDecoder::Erc20),
            CdeSource::Erc20Deposit { contract_address, deposit_address } => {
                (*contract_address, EvmCdeDecoder::Erc20Deposit { deposit_address: *deposit_address })
            }
            CdeSource::Erc721 { contract_address } => (*contract_address, EvmCdeDecoder::Erc721),
            CdeSource::Erc721Mint { contract_address } => (*contract_address, EvmCdeDecoder::Erc721Mint),
            CdeSource::Erc1155 { contract_address } => (*contract_address, EvmCdeDecoder::Erc1155),
            CdeSource::Erc6551Registry { contract_address } => (*contract_address, EvmCdeDecoder::Erc6551Registry),
            CdeSource::Generic { contract_address, event_signature } => {
                (*contract_address, EvmCdeDecoder::Generic { event: parse_event(&config.name, event_signature)? })
            }
            CdeSource::DynamicEvmPrimitive { contract_address, event_signature, address_field, target_kind } => {
                let event = parse_event(&config.name, event_signature)?;
                if !event.inputs.iter().any(|input| &input.name == address_field) {
                    return Err(ConfigError::Invalid(format!(
                        "CDE {}: event has no `{address_field}` field",
                        config.name
                    )));
                }
                (
                    *contract_address,
                    EvmCdeDecoder::DynamicEvmPrimitive {
                        event,
                        address_field: address_field.clone(),
                        target_kind: *target_kind,
                    },
                )
            }
            CdeSource::CardanoPoolDelegation { .. }
            | CdeSource::MinaEventGeneric { .. }
            | CdeSource::MinaActionGeneric { .. } => return Ok(None),
        };
        Ok(Some(Self {
            id,
            name: config.name.clone(),
            start_block_height: config.start_block_height,
            scheduled_prefix: config.scheduled_prefix.clone(),
            contract_address,
            decoder,
        }))
    }

    pub fn event_signatures(&self) -> Vec<B256> {
        match &self.decoder {
            EvmCdeDecoder::Erc20 | EvmCdeDecoder::Erc20Deposit { .. } => vec![IERC20::Transfer::SIGNATURE_HASH],
            EvmCdeDecoder::Erc721 => vec![IERC721::Transfer::SIGNATURE_HASH],
            EvmCdeDecoder::Erc721Mint => vec![IInverseProjectedNft::Minted::SIGNATURE_HASH],
            EvmCdeDecoder::Erc1155 => {
                vec![IERC1155::TransferSingle::SIGNATURE_HASH, IERC1155::TransferBatch::SIGNATURE_HASH]
            }
            EvmCdeDecoder::Erc6551Registry => vec![IERC6551Registry::ERC6551AccountCreated::SIGNATURE_HASH],
            EvmCdeDecoder::Generic { event } | EvmCdeDecoder::DynamicEvmPrimitive { event, .. } => {
                vec![event.selector()]
            }
        }
    }

    /// Decodes a log of this extension's contract. Logs which do not decode, or which the extension is not
    /// interested in, are skipped.
    pub fn decode(&self, log: &EvmLog, network: &NetworkId) -> Option<ChainDataExtensionDatum> {
        let payload = match self.decode_payload(log) {
            Ok(payload) => payload?,
            Err(err) => {
                tracing::debug!("CDE {}: skipping undecodable log in block #{}: {err}", self.name, log.block_number);
                return None;
            }
        };
        Some(ChainDataExtensionDatum {
            cde_id: self.id,
            cde_name: self.name.clone(),
            network: network.clone(),
            block_number: log.block_number,
            transaction_hash: log.transaction_hash.map(|hash| hash.to_string()),
            scheduled_prefix: self.scheduled_prefix.clone(),
            payload,
        })
    }

    fn decode_payload(&self, log: &EvmLog) -> Result<Option<CdePayload>, String> {
        let topics = log.topics.iter().copied();
        let data = &log.data[..];
        let payload = match &self.decoder {
            EvmCdeDecoder::Erc20 => {
                let event = IERC20::Transfer::decode_raw_log(topics, data, true).map_err(|e| e.to_string())?;
                CdePayload::Erc20Transfer { from: event.from, to: event.to, value: event.value }
            }
            EvmCdeDecoder::Erc20Deposit { deposit_address } => {
                let event = IERC20::Transfer::decode_raw_log(topics, data, true).map_err(|e| e.to_string())?;
                if event.to != *deposit_address {
                    return Ok(None);
                }
                CdePayload::Erc20Deposit { from: event.from, value: event.value }
            }
            EvmCdeDecoder::Erc721 => {
                let event = IERC721::Transfer::decode_raw_log(topics, data, true).map_err(|e| e.to_string())?;
                CdePayload::Erc721Transfer { from: event.from, to: event.to, token_id: event.tokenId }
            }
            EvmCdeDecoder::Erc721Mint => {
                let event =
                    IInverseProjectedNft::Minted::decode_raw_log(topics, data, true).map_err(|e| e.to_string())?;
                CdePayload::Erc721Mint { token_id: event.tokenId, mint_data: event.initialData }
            }
            EvmCdeDecoder::Erc1155 => match log.topics.first() {
                Some(topic) if *topic == IERC1155::TransferSingle::SIGNATURE_HASH => {
                    let event =
                        IERC1155::TransferSingle::decode_raw_log(topics, data, true).map_err(|e| e.to_string())?;
                    CdePayload::Erc1155Transfer {
                        operator: event.operator,
                        from: event.from,
                        to: event.to,
                        ids: vec![event.id],
                        values: vec![event.value],
                    }
                }
                _ => {
                    let event =
                        IERC1155::TransferBatch::decode_raw_log(topics, data, true).map_err(|e| e.to_string())?;
                    CdePayload::Erc1155Transfer {
                        operator: event.operator,
                        from: event.from,
                        to: event.to,
                        ids: event.ids,
                        values: event.values,
                    }
                }
            },
            EvmCdeDecoder::Erc6551Registry => {
                let event = IERC6551Registry::ERC6551AccountCreated::decode_raw_log(topics, data, true)
                    .map_err(|e| e.to_string())?;
                CdePayload::Erc6551Registry {
                    account: event.account,
                    implementation: event.implementation,
                    token_contract: event.tokenContract,
                    token_id: event.tokenId,
                    chain_id: event.chainId,
                    salt: event.salt,
                }
            }
            EvmCdeDecoder::Generic { event } => CdePayload::Generic { payload: decode_generic(event, log)? },
            EvmCdeDecoder::DynamicEvmPrimitive { event, address_field, target_kind } => {
                let fields = decode_fields(event, log)?;
                let Some((_, DynSolValue::Address(contract_address))) =
                    fields.into_iter().find(|(name, _)| name == address_field)
                else {
                    return Err(format!("field `{address_field}` is not an address"));
                };
                CdePayload::DynamicEvmPrimitive { contract_address, target_kind: *target_kind }
            }
        };
        Ok(Some(payload))
    }
}

/// Named event fields, in declaration order.
fn decode_fields(event: &Event, log: &EvmLog) -> Result<Vec<(String, DynSolValue)>, String> {
    let decoded = event.decode_log_parts(log.topics.iter().copied(), &log.data, true).map_err(|e| e.to_string())?;
    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    event
        .inputs
        .iter()
        .map(|input| {
            let value = if input.indexed { indexed.next() } else { body.next() };
            value.map(|value| (input.name.clone(), value)).ok_or_else(|| format!("missing field `{}`", input.name))
        })
        .collect()
}

fn decode_generic(event: &Event, log: &EvmLog) -> Result<Value, String> {
    let fields = decode_fields(event, log)?;
    Ok(Value::Object(fields.into_iter().map(|(name, value)| (name, sol_value_to_json(value))).collect::<Map<_, _>>()))
}

/// Integers are rendered as decimal strings, since they may not fit a JSON number.
fn sol_value_to_json(value: DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => Value::String(format!("0x{}", hex::encode(&word[..size]))),
        DynSolValue::Address(address) => Value::String(address.to_string()),
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::String(s) => Value::String(s),
        DynSolValue::Array(values) | DynSolValue::FixedArray(values) | DynSolValue::Tuple(values) => {
            Value::Array(values.into_iter().map(sol_value_to_json).collect())
        }
        other => Value::String(format!("{other:?}")),
    }
}

/// Reads every extension in `[from, to]`. Datums are ordered by block, then by position in the block.
pub async fn read_evm_cdes(
    rpc: &dyn EvmRpc,
    network: &NetworkId,
    cdes: &[EvmCde],
    from: u64,
    to: u64,
) -> Result<Vec<ChainDataExtensionDatum>, FunnelError> {
    let reads = cdes.iter().filter(|cde| cde.start_block_height <= to).map(|cde| async move {
        let logs = rpc
            .logs(LogFilter {
                from_block: from.max(cde.start_block_height),
                to_block: to,
                addresses: vec![cde.contract_address],
                event_signatures: cde.event_signatures(),
            })
            .await?;
        Ok::<_, FunnelError>(
            logs.iter()
                .filter_map(|log| {
                    let datum = cde.decode(log, network)?;
                    Some(((log.block_number, log.log_index.unwrap_or_default()), datum))
                })
                .collect::<Vec<_>>(),
        )
    });

    let mut datums: Vec<_> = try_join_all(reads).await?.into_iter().flatten().collect();
    datums.sort_by_key(|(position, _)| *position);
    Ok(datums.into_iter().map(|(_, datum)| datum).collect())
}
