use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::{ChainDataExtensionDatum, NetworkId};

/// A single validated user command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedData {
    /// The wallet which signed the command.
    pub real_address: String,
    /// The main wallet `real_address` is delegated to, see the account mapping collaborator.
    pub mapped_address: String,
    pub user_id: u64,
    pub input_data: String,
    /// Replay-protection nonce, unique per command.
    pub input_nonce: String,
    pub supplied_value: U256,
    /// `false` for user-submitted commands, `true` for timer or extension triggered ones.
    pub scheduled: bool,
    pub tx_hash: Option<String>,
    pub network: NetworkId,
    /// Name of the extension or primitive which produced this command, if any.
    pub extension_name: Option<String>,
}

/// One main-chain block worth of normalized data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainData {
    pub network: NetworkId,
    /// Unix seconds.
    pub timestamp: u64,
    pub block_hash: String,
    pub block_number: u64,
    pub submitted_data: Vec<SubmittedData>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension_datums: Vec<ChainDataExtensionDatum>,
}

impl ChainData {
    pub fn new(network: NetworkId, block_number: u64, block_hash: impl Into<String>, timestamp: u64) -> Self {
        Self {
            network,
            timestamp,
            block_hash: block_hash.into(),
            block_number,
            submitted_data: Vec::new(),
            extension_datums: Vec::new(),
        }
    }
}

/// Extension data collected for a network before the main chain reached its start height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresyncChainData {
    pub network: NetworkId,
    pub block_number: u64,
    pub extension_datums: Vec<ChainDataExtensionDatum>,
}
