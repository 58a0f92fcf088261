//! Funnel configuration, loaded from YAML.
//!
//! ```yaml
//! main:
//!   start_block_height: 1200
//!   source:
//!     kind: evm
//!     rpc_url: http://localhost:8545
//!     chain_id: 31337
//!     contract_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3"
//! auxiliary:
//!   - kind: cardano
//!     carp_url: http://localhost:3000
//!     network: preview
//! cdes:
//!   - name: gold
//!     start_block_height: 1000
//!     scheduled_prefix: gold
//!     source:
//!       type: erc20
//!       contract_address: "0x8464135c8F25Da09e49BC8782676a84730C318bC"
//! ```

use std::{collections::BTreeSet, path::Path, time::Duration};

use fc_input::{BatchDividers, NamespaceConfig};
use fp_chain::{Address, CdeKind, NetworkId};
use fp_utils::serde::{deserialize_duration, deserialize_optional_duration, deserialize_url};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::parallel::carp::CardanoNetwork;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config from file: {0}")]
    ReadFromFile(#[from] std::io::Error),
    #[error("Failed to decode config from YAML: {0}")]
    DecodeFromYaml(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

fn default_group_size() -> u64 {
    100
}
fn default_rpc_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_presync_step_size() -> u64 {
    1000
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}
fn default_mina_network() -> String {
    "mainnet".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunnelConfig {
    pub main: MainChainConfig,
    #[serde(default)]
    pub auxiliary: Vec<AuxiliaryNetworkConfig>,
    #[serde(default)]
    pub cdes: Vec<CdeConfig>,
    #[serde(default)]
    pub batch_dividers: BatchDividers,
    #[serde(default = "default_namespaces")]
    pub namespaces: NamespaceConfig,
    /// When set, the main chain is regrouped into blocks of this duration.
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub emulate_blocks_interval: Option<Duration>,
    #[serde(default = "default_rpc_timeout", deserialize_with = "deserialize_duration")]
    pub rpc_timeout: Duration,
    /// Number of positions requested per network and presync round.
    #[serde(default = "default_presync_step_size")]
    pub presync_step_size: u64,
    /// Wait between two polls when the chain has no new block.
    #[serde(default = "default_poll_interval", deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
}

fn default_namespaces() -> NamespaceConfig {
    NamespaceConfig::new("")
}

#[derive(Debug, Clone, Deserialize)]
pub struct MainChainConfig {
    pub start_block_height: u64,
    /// Maximum number of blocks returned by a single read.
    #[serde(default = "default_group_size")]
    pub group_size: u64,
    #[serde(default)]
    pub confirmation_depth: u64,
    pub source: MainSourceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MainSourceConfig {
    Evm(EvmMainConfig),
    Avail(AvailConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvmMainConfig {
    #[serde(deserialize_with = "deserialize_url")]
    pub rpc_url: Url,
    pub chain_id: u64,
    /// The game contract emitting `PaimaGameInteraction` events.
    pub contract_address: Address,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailConfig {
    /// Light client REST endpoint.
    #[serde(deserialize_with = "deserialize_url")]
    pub rpc_url: Url,
    pub network: NetworkId,
    pub app_id: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AuxiliaryNetworkConfig {
    EvmParallel(ParallelEvmConfig),
    Cardano(CarpConfig),
    Mina(MinaConfig),
    AvailParallel(AvailParallelConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParallelEvmConfig {
    #[serde(deserialize_with = "deserialize_url")]
    pub rpc_url: Url,
    pub chain_id: u64,
    #[serde(default)]
    pub confirmation_depth: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CarpConfig {
    #[serde(deserialize_with = "deserialize_url")]
    pub carp_url: Url,
    pub network: CardanoNetwork,
    #[serde(default)]
    pub confirmation_depth: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinaConfig {
    #[serde(deserialize_with = "deserialize_url")]
    pub archive_url: Url,
    #[serde(default = "default_mina_network")]
    pub network: String,
    #[serde(default)]
    pub confirmation_depth: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailParallelConfig {
    #[serde(deserialize_with = "deserialize_url")]
    pub rpc_url: Url,
    pub network: NetworkId,
    pub app_id: u32,
    #[serde(default)]
    pub confirmation_depth: u64,
}

impl AuxiliaryNetworkConfig {
    pub fn network(&self) -> NetworkId {
        match self {
            Self::EvmParallel(config) => NetworkId::eip155(config.chain_id),
            Self::Cardano(config) => config.network.network_id(),
            Self::Mina(config) => NetworkId::new(format!("mina:{}", config.network)),
            Self::AvailParallel(config) => config.network.clone(),
        }
    }
}

impl MainSourceConfig {
    pub fn network(&self) -> NetworkId {
        match self {
            Self::Evm(config) => NetworkId::eip155(config.chain_id),
            Self::Avail(config) => config.network.clone(),
        }
    }
}

/// A chain data extension: data read from a contract or indexer, other than game inputs.
#[derive(Debug, Clone, Deserialize)]
pub struct CdeConfig {
    pub name: String,
    /// Network the extension reads. Defaults to the main network.
    #[serde(default)]
    pub network: Option<NetworkId>,
    /// First position read on the extension's network.
    pub start_block_height: u64,
    /// When set, every datum also schedules an input starting with this prefix.
    #[serde(default)]
    pub scheduled_prefix: Option<String>,
    pub source: CdeSource,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CdeSource {
    Erc20 { contract_address: Address },
    Erc20Deposit { contract_address: Address, deposit_address: Address },
    Erc721 { contract_address: Address },
    Erc721Mint { contract_address: Address },
    Erc1155 { contract_address: Address },
    Erc6551Registry { contract_address: Address },
    /// Any event, decoded against a human readable signature such as
    /// `Transfer(address indexed from, address indexed to, uint256 value)`.
    Generic { contract_address: Address, event_signature: String },
    /// Registration events of contracts to follow as `target_kind`. `address_field` names the event field holding
    /// the registered contract.
    DynamicEvmPrimitive {
        contract_address: Address,
        event_signature: String,
        address_field: String,
        target_kind: CdeKind,
    },
    CardanoPoolDelegation { pool_ids: Vec<String> },
    MinaEventGeneric { address: String },
    MinaActionGeneric { address: String },
}

impl CdeSource {
    pub fn is_evm(&self) -> bool {
        !matches!(
            self,
            Self::CardanoPoolDelegation { .. } | Self::MinaEventGeneric { .. } | Self::MinaActionGeneric { .. }
        )
    }
}

impl FunnelConfig {
    pub fn from_yaml(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn main_network(&self) -> NetworkId {
        self.main.source.network()
    }

    /// CDEs reading `network`, with their ids.
    pub fn cdes_for(&self, network: &NetworkId) -> Vec<(u32, CdeConfig)> {
        let main = self.main_network();
        self.cdes
            .iter()
            .enumerate()
            .filter(|(_, cde)| cde.network.as_ref().unwrap_or(&main) == network)
            .map(|(id, cde)| (id as u32, cde.clone()))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.main.group_size == 0 {
            return invalid("main.group_size must be at least 1".into());
        }
        if self.presync_step_size == 0 {
            return invalid("presync_step_size must be at least 1".into());
        }
        // Block timestamps are in seconds.
        let whole_seconds = |interval: Duration| interval.as_secs() > 0 && interval.subsec_nanos() == 0;
        if self.emulate_blocks_interval.is_some_and(|interval| !whole_seconds(interval)) {
            return invalid("emulate_blocks_interval must be a positive whole number of seconds".into());
        }

        let main = self.main_network();
        let mut networks = BTreeSet::from([main.clone()]);
        for aux in &self.auxiliary {
            if !networks.insert(aux.network()) {
                return invalid(format!("network {} is configured twice", aux.network()));
            }
        }

        for cde in &self.cdes {
            let network = cde.network.clone().unwrap_or_else(|| main.clone());
            let Some(aux) = self.auxiliary.iter().find(|aux| aux.network() == network) else {
                if network != main {
                    return invalid(format!("CDE {} reads unknown network {network}", cde.name));
                }
                if !cde.source.is_evm() || !matches!(self.main.source, MainSourceConfig::Evm(_)) {
                    return invalid(format!("CDE {} cannot be read from the main network {main}", cde.name));
                }
                continue;
            };
            let compatible = match aux {
                AuxiliaryNetworkConfig::EvmParallel(_) => cde.source.is_evm(),
                AuxiliaryNetworkConfig::Cardano(_) => matches!(cde.source, CdeSource::CardanoPoolDelegation { .. }),
                AuxiliaryNetworkConfig::Mina(_) => {
                    matches!(cde.source, CdeSource::MinaEventGeneric { .. } | CdeSource::MinaActionGeneric { .. })
                }
                AuxiliaryNetworkConfig::AvailParallel(_) => false,
            };
            if !compatible {
                return invalid(format!("CDE {} cannot be read from network {network}", cde.name));
            }
        }
        Ok(())
    }
}
