//! Builds the funnel of a chain from its configuration.
//!
//! The main chain funnel is wrapped with one [ParallelFunnel] per auxiliary network, in configuration order, and
//! finally with the [EmulatedBlocksFunnel] when block time emulation is enabled.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use fc_crypto::SignatureDispatcher;
use fc_input::{AccountMapping, InputExtractor};
use fp_chain::NetworkId;

use crate::{
    avail::{AvailBlockSource, AvailLightClient},
    block::{BlockFunnel, BlockFunnelConfig},
    cache::FunnelCache,
    config::{AuxiliaryNetworkConfig, CdeConfig, CdeSource, ConfigError, FunnelConfig, MainSourceConfig},
    emulated::EmulatedBlocksFunnel,
    evm::{cde::EvmCde, source::EvmBlockSource, AlloyEvmRpc},
    metrics::FunnelMetrics,
    parallel::{
        carp::{CarpClient, PoolDelegationCde},
        mina::{MinaArchiveClient, MinaCde},
        AuxiliaryNetwork, CarpNetwork, MinaNetwork, ParallelAvailNetwork, ParallelEvmNetwork, ParallelFunnel,
    },
    Funnel, FunnelError,
};

/// A decorator around the funnel built so far.
pub enum FunnelLayer {
    Parallel(Box<dyn AuxiliaryNetwork>),
    /// Block time in seconds.
    EmulatedBlocks { block_time: u64 },
}

/// What every layer shares with the main chain funnel.
#[derive(Clone)]
pub struct LayerContext {
    pub main_network: NetworkId,
    pub cache: FunnelCache,
    pub extractor: Arc<InputExtractor>,
    pub metrics: Arc<FunnelMetrics>,
    pub start_block_height: u64,
    pub rpc_timeout: Duration,
}

/// Wraps `base` with `layers`, innermost first. Block time emulation must come last.
pub fn compose(
    base: Box<dyn Funnel>,
    layers: Vec<FunnelLayer>,
    ctx: &LayerContext,
) -> Result<Box<dyn Funnel>, FunnelError> {
    let mut funnel = base;
    let mut emulated = false;
    for layer in layers {
        if emulated {
            return Err(FunnelError::Config("block time emulation must be the outermost layer".into()));
        }
        funnel = match layer {
            FunnelLayer::Parallel(network) => Box::new(ParallelFunnel::new(
                funnel,
                network,
                ctx.cache.clone(),
                Arc::clone(&ctx.extractor),
                Arc::clone(&ctx.metrics),
                ctx.start_block_height,
                ctx.rpc_timeout,
            )),
            FunnelLayer::EmulatedBlocks { block_time } => {
                emulated = true;
                Box::new(EmulatedBlocksFunnel::new(
                    funnel,
                    ctx.main_network.clone(),
                    ctx.cache.clone(),
                    ctx.start_block_height,
                    block_time,
                )?)
            }
        };
    }
    Ok(funnel)
}

fn config_error(err: ConfigError) -> FunnelError {
    FunnelError::Config(err.to_string())
}

pub struct FunnelFactory {
    config: FunnelConfig,
    ctx: LayerContext,
}

impl FunnelFactory {
    pub fn new(config: FunnelConfig, mapping: Arc<dyn AccountMapping>) -> Self {
        let extractor = InputExtractor::new(
            Arc::new(SignatureDispatcher::with_default_verifiers()),
            config.namespaces.clone(),
            config.batch_dividers,
            mapping,
        );
        let ctx = LayerContext {
            main_network: config.main_network(),
            cache: FunnelCache::new(),
            extractor: Arc::new(extractor),
            metrics: Arc::new(FunnelMetrics::register()),
            start_block_height: config.main.start_block_height,
            rpc_timeout: config.rpc_timeout,
        };
        Self { config, ctx }
    }

    pub fn cache(&self) -> FunnelCache {
        self.ctx.cache.clone()
    }

    pub fn metrics(&self) -> Arc<FunnelMetrics> {
        Arc::clone(&self.ctx.metrics)
    }

    /// Contract or account read by each extension, for the inputs it schedules.
    pub fn contract_addresses(&self) -> BTreeMap<u32, String> {
        self.config
            .cdes
            .iter()
            .enumerate()
            .filter_map(|(id, cde)| contract_address(cde).map(|address| (id as u32, address)))
            .collect()
    }

    pub async fn build(&self) -> Result<Box<dyn Funnel>, FunnelError> {
        let main = self.main_funnel().await?;
        let mut layers = self.auxiliary_layers().await?;
        if let Some(interval) = self.config.emulate_blocks_interval {
            layers.push(FunnelLayer::EmulatedBlocks { block_time: interval.as_secs() });
        }
        compose(main, layers, &self.ctx)
    }

    async fn main_funnel(&self) -> Result<Box<dyn Funnel>, FunnelError> {
        let main = &self.config.main;
        let network = self.ctx.main_network.clone();
        let config = BlockFunnelConfig {
            start_block_height: main.start_block_height,
            group_size: main.group_size,
            confirmation_depth: main.confirmation_depth,
            rpc_timeout: self.config.rpc_timeout,
        };
        let cache = self.ctx.cache.clone();
        let extractor = Arc::clone(&self.ctx.extractor);
        let metrics = Arc::clone(&self.ctx.metrics);

        Ok(match &main.source {
            MainSourceConfig::Evm(evm) => {
                let rpc = Arc::new(AlloyEvmRpc::new(network.clone(), evm.rpc_url.clone()));
                let cdes = self.evm_cdes(&network)?;
                let source = EvmBlockSource::new(network, rpc, evm.contract_address, cdes);
                Box::new(BlockFunnel::new(source, config, cache, extractor, metrics).await?)
            }
            MainSourceConfig::Avail(avail) => {
                let client = AvailLightClient::new(network.clone(), avail.rpc_url.clone(), avail.app_id);
                client.check_app_id().await?;
                let source = AvailBlockSource::new(network, Arc::new(client));
                Box::new(BlockFunnel::new(source, config, cache, extractor, metrics).await?)
            }
        })
    }

    async fn auxiliary_layers(&self) -> Result<Vec<FunnelLayer>, FunnelError> {
        let mut layers = Vec::with_capacity(self.config.auxiliary.len());
        for aux in &self.config.auxiliary {
            let network = aux.network();
            let layer: Box<dyn AuxiliaryNetwork> = match aux {
                AuxiliaryNetworkConfig::EvmParallel(evm) => {
                    let rpc = Arc::new(AlloyEvmRpc::new(network.clone(), evm.rpc_url.clone()));
                    let cdes = self.evm_cdes(&network)?;
                    Box::new(ParallelEvmNetwork::new(network, rpc, cdes, evm.confirmation_depth))
                }
                AuxiliaryNetworkConfig::Cardano(carp) => {
                    let api = Arc::new(CarpClient::new(network.clone(), carp.carp_url.clone()));
                    let cdes = self.cdes_for(&network, PoolDelegationCde::from_config);
                    Box::new(CarpNetwork::new(carp.network, api, cdes, carp.confirmation_depth))
                }
                AuxiliaryNetworkConfig::Mina(mina) => {
                    let archive = Arc::new(MinaArchiveClient::new(network.clone(), mina.archive_url.clone()));
                    let cdes = self.cdes_for(&network, MinaCde::from_config);
                    Box::new(MinaNetwork::new(network, archive, cdes, mina.confirmation_depth))
                }
                AuxiliaryNetworkConfig::AvailParallel(avail) => {
                    let client = AvailLightClient::new(network.clone(), avail.rpc_url.clone(), avail.app_id);
                    client.check_app_id().await?;
                    Box::new(ParallelAvailNetwork::new(network, Arc::new(client), avail.confirmation_depth))
                }
            };
            layers.push(FunnelLayer::Parallel(layer));
        }
        Ok(layers)
    }

    fn evm_cdes(&self, network: &NetworkId) -> Result<Vec<EvmCde>, FunnelError> {
        let mut cdes = vec![];
        for (id, config) in self.config.cdes_for(network) {
            if let Some(cde) = EvmCde::from_config(id, &config).map_err(config_error)? {
                cdes.push(cde);
            }
        }
        Ok(cdes)
    }

    fn cdes_for<T>(&self, network: &NetworkId, build: impl Fn(u32, &CdeConfig) -> Option<T>) -> Vec<T> {
        self.config.cdes_for(network).iter().filter_map(|(id, config)| build(*id, config)).collect()
    }
}

fn contract_address(cde: &CdeConfig) -> Option<String> {
    match &cde.source {
        CdeSource::Erc20 { contract_address }
        | CdeSource::Erc20Deposit { contract_address, .. }
        | CdeSource::Erc721 { contract_address }
        | CdeSource::Erc721Mint { contract_address }
        | CdeSource::Erc1155 { contract_address }
        | CdeSource::Erc6551Registry { contract_address }
        | CdeSource::Generic { contract_address, .. }
        | CdeSource::DynamicEvmPrimitive { contract_address, .. } => Some(format!("{contract_address:#x}")),
        CdeSource::MinaEventGeneric { address } | CdeSource::MinaActionGeneric { address } => Some(address.clone()),
        CdeSource::CardanoPoolDelegation { .. } => None,
    }
}
