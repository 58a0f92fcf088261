use std::fmt;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::NetworkId;

/// Kind of a chain data extension (CDE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CdeKind {
    Erc20Transfer,
    Erc20Deposit,
    Erc721Transfer,
    Erc721Mint,
    Erc1155Transfer,
    Erc6551Registry,
    CardanoPoolDelegation,
    MinaEventGeneric,
    MinaActionGeneric,
    Generic,
    DynamicEvmPrimitive,
}

impl fmt::Display for CdeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CdeKind::Erc20Transfer => "erc20-transfer",
            CdeKind::Erc20Deposit => "erc20-deposit",
            CdeKind::Erc721Transfer => "erc721-transfer",
            CdeKind::Erc721Mint => "erc721-mint",
            CdeKind::Erc1155Transfer => "erc1155-transfer",
            CdeKind::Erc6551Registry => "erc6551-registry",
            CdeKind::CardanoPoolDelegation => "cardano-pool-delegation",
            CdeKind::MinaEventGeneric => "mina-event-generic",
            CdeKind::MinaActionGeneric => "mina-action-generic",
            CdeKind::Generic => "generic",
            CdeKind::DynamicEvmPrimitive => "dynamic-evm-primitive",
        };
        f.write_str(name)
    }
}

/// Kind-specific payload of an extension datum.
///
/// This is a closed set: the kind of a datum is always derived from its payload, see
/// [ChainDataExtensionDatum::kind].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CdePayload {
    Erc20Transfer {
        from: Address,
        to: Address,
        value: U256,
    },
    /// A transfer to the configured deposit address.
    Erc20Deposit {
        from: Address,
        value: U256,
    },
    Erc721Transfer {
        from: Address,
        to: Address,
        token_id: U256,
    },
    Erc721Mint {
        token_id: U256,
        mint_data: String,
    },
    /// Single transfers are represented with one-element `ids` and `values`.
    Erc1155Transfer {
        operator: Address,
        from: Address,
        to: Address,
        ids: Vec<U256>,
        values: Vec<U256>,
    },
    Erc6551Registry {
        account: Address,
        implementation: Address,
        token_contract: Address,
        token_id: U256,
        chain_id: U256,
        salt: B256,
    },
    CardanoPoolDelegation {
        /// Stake credential of the delegator.
        address: String,
        /// `None` when the stake key was deregistered.
        pool: Option<String>,
        epoch: u64,
    },
    MinaEventGeneric {
        data: Vec<String>,
    },
    MinaActionGeneric {
        data: Vec<String>,
    },
    /// A log decoded against a user-supplied event signature.
    Generic {
        payload: serde_json::Value,
    },
    /// Registration of a new contract which should be followed as `target_kind`.
    DynamicEvmPrimitive {
        contract_address: Address,
        target_kind: CdeKind,
    },
}

impl CdePayload {
    pub fn kind(&self) -> CdeKind {
        match self {
            CdePayload::Erc20Transfer { .. } => CdeKind::Erc20Transfer,
            CdePayload::Erc20Deposit { .. } => CdeKind::Erc20Deposit,
            CdePayload::Erc721Transfer { .. } => CdeKind::Erc721Transfer,
            CdePayload::Erc721Mint { .. } => CdeKind::Erc721Mint,
            CdePayload::Erc1155Transfer { .. } => CdeKind::Erc1155Transfer,
            CdePayload::Erc6551Registry { .. } => CdeKind::Erc6551Registry,
            CdePayload::CardanoPoolDelegation { .. } => CdeKind::CardanoPoolDelegation,
            CdePayload::MinaEventGeneric { .. } => CdeKind::MinaEventGeneric,
            CdePayload::MinaActionGeneric { .. } => CdeKind::MinaActionGeneric,
            CdePayload::Generic { .. } => CdeKind::Generic,
            CdePayload::DynamicEvmPrimitive { .. } => CdeKind::DynamicEvmPrimitive,
        }
    }
}

/// A piece of data read from a chain data extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainDataExtensionDatum {
    pub cde_id: u32,
    pub cde_name: String,
    /// The network the datum was read from.
    pub network: NetworkId,
    /// Block number on the main chain axis during sync, on the originating network during presync.
    pub block_number: u64,
    pub transaction_hash: Option<String>,
    /// Prefix of the input scheduled for this datum, if the extension schedules inputs.
    pub scheduled_prefix: Option<String>,
    pub payload: CdePayload,
}

impl ChainDataExtensionDatum {
    pub fn kind(&self) -> CdeKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_payload() {
        let datum = ChainDataExtensionDatum {
            cde_id: 3,
            cde_name: "gold".to_string(),
            network: NetworkId::eip155(1),
            block_number: 10,
            transaction_hash: None,
            scheduled_prefix: None,
            payload: CdePayload::Erc20Deposit { from: Address::ZERO, value: U256::from(5u64) },
        };
        assert_eq!(datum.kind(), CdeKind::Erc20Deposit);
        assert_eq!(datum.kind().to_string(), "erc20-deposit");
    }

    #[test]
    fn payload_is_tagged_by_kind() {
        let payload = CdePayload::CardanoPoolDelegation { address: "stake1u9".into(), pool: None, epoch: 400 };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "cardano-pool-delegation");

        let back: CdePayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), CdeKind::CardanoPoolDelegation);
    }
}
