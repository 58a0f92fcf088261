//! Scheduled inputs for extension data.
//!
//! Extensions configured with a `scheduled_prefix` turn each of their datums into an input processed by the state
//! machine at the block the datum was merged into, as if a user had submitted `prefix|field|...`.

use std::{collections::BTreeMap, sync::Arc};

use fc_input::{ScheduledDataStore, ScheduledInput};
use fp_chain::{CdePayload, ChainDataExtensionDatum};
use itertools::Itertools;

pub struct CdeScheduler {
    store: Arc<dyn ScheduledDataStore>,
    /// Contract or account read by each extension, by extension id.
    contract_addresses: BTreeMap<u32, String>,
}

impl CdeScheduler {
    pub fn new(store: Arc<dyn ScheduledDataStore>, contract_addresses: BTreeMap<u32, String>) -> Self {
        Self { store, contract_addresses }
    }

    /// Schedules an input at `block_height` for every datum with a prefix, and returns how many were stored.
    ///
    /// A failed insertion drops the input: it is logged and never retried.
    pub async fn schedule(&self, datums: &[ChainDataExtensionDatum], block_height: u64) -> usize {
        let mut scheduled = 0;
        for datum in datums {
            let Some(prefix) = &datum.scheduled_prefix else { continue };
            let input = ScheduledInput {
                future_block_height: block_height,
                input_data: scheduled_input_data(prefix, &datum.payload),
                tx_hash: datum.transaction_hash.clone(),
                network: datum.network.clone(),
                contract_address: self.contract_addresses.get(&datum.cde_id).cloned(),
                cde_name: datum.cde_name.clone(),
            };
            match self.store.insert_scheduled(input).await {
                Ok(id) => {
                    tracing::trace!("Scheduled input #{id} of {} at block #{block_height}", datum.cde_name);
                    scheduled += 1;
                }
                Err(err) => {
                    tracing::error!(
                        cde = datum.cde_name,
                        block_number = block_height,
                        "Dropping scheduled input, insertion failed: {err:#}"
                    );
                }
            }
        }
        scheduled
    }
}

/// `prefix|field|...`, addresses in lowercase hex and amounts in decimal.
pub fn scheduled_input_data(prefix: &str, payload: &CdePayload) -> String {
    let fields: Vec<String> = match payload {
        CdePayload::Erc20Transfer { from, to, value } => {
            vec![format!("{from:#x}"), format!("{to:#x}"), value.to_string()]
        }
        CdePayload::Erc20Deposit { from, value } => vec![format!("{from:#x}"), value.to_string()],
        CdePayload::Erc721Transfer { from, to, token_id } => {
            vec![format!("{from:#x}"), format!("{to:#x}"), token_id.to_string()]
        }
        CdePayload::Erc721Mint { token_id, mint_data } => vec![token_id.to_string(), mint_data.clone()],
        CdePayload::Erc1155Transfer { operator, from, to, ids, values } => vec![
            format!("{operator:#x}"),
            format!("{from:#x}"),
            format!("{to:#x}"),
            ids.iter().join(","),
            values.iter().join(","),
        ],
        CdePayload::Erc6551Registry { account, implementation, token_contract, token_id, chain_id, salt } => vec![
            format!("{account:#x}"),
            format!("{implementation:#x}"),
            format!("{token_contract:#x}"),
            token_id.to_string(),
            chain_id.to_string(),
            format!("{salt:#x}"),
        ],
        CdePayload::CardanoPoolDelegation { address, pool, epoch } => {
            vec![address.clone(), pool.clone().unwrap_or_default(), epoch.to_string()]
        }
        CdePayload::MinaEventGeneric { data } | CdePayload::MinaActionGeneric { data } => {
            vec![serde_json::Value::from(data.clone()).to_string()]
        }
        CdePayload::Generic { payload } => vec![payload.to_string()],
        CdePayload::DynamicEvmPrimitive { contract_address, target_kind } => {
            vec![format!("{contract_address:#x}"), target_kind.to_string()]
        }
    };
    std::iter::once(prefix.to_string()).chain(fields).join("|")
}
