//! In-memory chains for the funnel tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use fc_crypto::SignatureDispatcher;
use fc_input::{BatchDividers, InMemoryAccountMapping, InputExtractor, NamespaceConfig, RawInput};
use fp_chain::{CdePayload, ChainDataExtensionDatum, NetworkId, U256};

use crate::block::{BlockHeader, BlockSource};
use crate::cache::AuxCacheKind;
use crate::parallel::{AuxBlock, AuxiliaryNetwork};
use crate::FunnelError;

pub fn extractor() -> Arc<InputExtractor> {
    Arc::new(InputExtractor::new(
        Arc::new(SignatureDispatcher::with_default_verifiers()),
        NamespaceConfig::new(""),
        BatchDividers::default(),
        Arc::new(InMemoryAccountMapping::new()),
    ))
}

pub fn raw_input(address: &str, payload: &str) -> RawInput {
    RawInput {
        tx_hash: None,
        real_address: address.to_string(),
        payload: payload.as_bytes().to_vec(),
        value: U256::ZERO,
    }
}

pub fn datum(network: &NetworkId, block_number: u64, cde_name: &str) -> ChainDataExtensionDatum {
    ChainDataExtensionDatum {
        cde_id: 0,
        cde_name: cde_name.to_string(),
        network: network.clone(),
        block_number,
        transaction_hash: None,
        scheduled_prefix: None,
        payload: CdePayload::MinaEventGeneric { data: vec![block_number.to_string()] },
    }
}

#[derive(Default)]
struct ChainState {
    timestamps: BTreeMap<u64, u64>,
    inputs: BTreeMap<u64, Vec<RawInput>>,
    datums: BTreeMap<u64, Vec<ChainDataExtensionDatum>>,
    failing: BTreeSet<u64>,
}

/// A main chain held in memory. Clones share the same blocks, so a test can grow the chain under a funnel.
#[derive(Clone)]
pub struct FakeChain {
    network: NetworkId,
    state: Arc<Mutex<ChainState>>,
}

impl FakeChain {
    /// Blocks `0..=tip`, `block_time` seconds apart starting at `genesis_timestamp`.
    pub fn regular(network: NetworkId, tip: u64, genesis_timestamp: u64, block_time: u64) -> Self {
        Self::with_timestamps(network, (0..=tip).map(|n| (n, genesis_timestamp + n * block_time)))
    }

    pub fn with_timestamps(network: NetworkId, timestamps: impl IntoIterator<Item = (u64, u64)>) -> Self {
        let state = ChainState { timestamps: timestamps.into_iter().collect(), ..Default::default() };
        Self { network, state: Arc::new(Mutex::new(state)) }
    }

    pub fn push_block(&self, timestamp: u64) {
        let mut state = self.state.lock().unwrap();
        let next = state.timestamps.keys().next_back().map_or(0, |n| n + 1);
        state.timestamps.insert(next, timestamp);
    }

    pub fn remove_block(&self, block_number: u64) {
        self.state.lock().unwrap().timestamps.remove(&block_number);
    }

    pub fn fail_block(&self, block_number: u64) {
        self.state.lock().unwrap().failing.insert(block_number);
    }

    pub fn add_input(&self, block_number: u64, input: RawInput) {
        self.state.lock().unwrap().inputs.entry(block_number).or_default().push(input);
    }

    pub fn add_datum(&self, datum: ChainDataExtensionDatum) {
        self.state.lock().unwrap().datums.entry(datum.block_number).or_default().push(datum);
    }

    pub fn timestamp(&self, block_number: u64) -> Option<u64> {
        self.state.lock().unwrap().timestamps.get(&block_number).copied()
    }
}

#[async_trait]
impl BlockSource for FakeChain {
    fn network(&self) -> NetworkId {
        self.network.clone()
    }

    fn first_extension_height(&self) -> Option<u64> {
        self.state.lock().unwrap().datums.keys().next().copied()
    }

    async fn latest_block_number(&self) -> Result<u64, FunnelError> {
        Ok(self.state.lock().unwrap().timestamps.keys().next_back().copied().unwrap_or_default())
    }

    async fn block_header(&self, block_number: u64) -> Result<Option<BlockHeader>, FunnelError> {
        let state = self.state.lock().unwrap();
        if state.failing.contains(&block_number) {
            return Err(FunnelError::rpc(&self.network, format!("block {block_number} unavailable")));
        }
        Ok(state.timestamps.get(&block_number).map(|timestamp| BlockHeader {
            number: block_number,
            hash: format!("0x{block_number:064x}"),
            timestamp: *timestamp,
        }))
    }

    async fn submitted_inputs(&self, from: u64, to: u64) -> Result<Vec<(u64, RawInput)>, FunnelError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .inputs
            .range(from..=to)
            .flat_map(|(block_number, inputs)| inputs.iter().map(|input| (*block_number, input.clone())))
            .collect())
    }

    async fn extension_datums(&self, from: u64, to: u64) -> Result<Vec<ChainDataExtensionDatum>, FunnelError> {
        let state = self.state.lock().unwrap();
        Ok(state.datums.range(from..=to).flat_map(|(_, datums)| datums.iter().cloned()).collect())
    }
}

#[derive(Default)]
struct AuxState {
    tip: u64,
    positions: BTreeMap<u64, AuxBlock>,
    fetched_ranges: Vec<(u64, u64)>,
}

/// An auxiliary network with regularly spaced positions. Clones share the same positions.
#[derive(Clone)]
pub struct FakeAuxNetwork {
    network: NetworkId,
    kind: AuxCacheKind,
    genesis_timestamp: u64,
    spacing: u64,
    presync_enabled: bool,
    state: Arc<Mutex<AuxState>>,
}

impl FakeAuxNetwork {
    /// Positions `0..=tip`, position `p` at `genesis_timestamp + p * spacing`.
    pub fn regular(network: NetworkId, kind: AuxCacheKind, tip: u64, genesis_timestamp: u64, spacing: u64) -> Self {
        let state = AuxState { tip, ..Default::default() };
        Self { network, kind, genesis_timestamp, spacing, presync_enabled: true, state: Arc::new(Mutex::new(state)) }
    }

    pub fn without_presync(self) -> Self {
        Self { presync_enabled: false, ..self }
    }

    pub fn extend_to(&self, tip: u64) {
        self.state.lock().unwrap().tip = tip;
    }

    fn position(&self, position: u64) -> AuxBlock {
        AuxBlock {
            position,
            timestamp: self.genesis_timestamp + position * self.spacing,
            datums: vec![],
            inputs: vec![],
        }
    }

    /// The datum's block number is its position.
    pub fn add_datum(&self, datum: ChainDataExtensionDatum) {
        let position = datum.block_number;
        let mut state = self.state.lock().unwrap();
        state.positions.entry(position).or_insert_with(|| self.position(position)).datums.push(datum);
    }

    pub fn add_input(&self, position: u64, input: RawInput) {
        let mut state = self.state.lock().unwrap();
        state.positions.entry(position).or_insert_with(|| self.position(position)).inputs.push(input);
    }

    pub fn fetched_ranges(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().fetched_ranges.clone()
    }
}

#[async_trait]
impl AuxiliaryNetwork for FakeAuxNetwork {
    fn network(&self) -> &NetworkId {
        &self.network
    }

    fn cache_kind(&self) -> AuxCacheKind {
        self.kind
    }

    fn start_position(&self) -> u64 {
        0
    }

    fn presync_enabled(&self) -> bool {
        self.presync_enabled
    }

    async fn safe_tip(&self) -> Result<u64, FunnelError> {
        Ok(self.state.lock().unwrap().tip)
    }

    async fn timestamp_of(&self, position: u64) -> Result<u64, FunnelError> {
        if position > self.state.lock().unwrap().tip {
            return Err(FunnelError::missing_block(&self.network, position));
        }
        Ok(self.position(position).timestamp)
    }

    async fn fetch_range(&self, from: u64, to: u64) -> Result<Vec<AuxBlock>, FunnelError> {
        let mut state = self.state.lock().unwrap();
        assert!(to <= state.tip, "fetched past the safe tip");
        state.fetched_ranges.push((from, to));
        Ok(state.positions.range(from..=to).map(|(_, block)| block.clone()).collect())
    }
}
