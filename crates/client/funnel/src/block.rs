//! The main block funnel: reads the main chain, one group of blocks at a time.

use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use fc_input::{BlockContext, InputExtractor, RawInput};
use fp_chain::{ChainData, ChainDataExtensionDatum, NetworkId, PresyncChainData};
use fp_utils::{stopwatch_end, PerfStopwatch};
use futures::future::{join_all, try_join_all};

use crate::{
    cache::FunnelCache,
    error::with_timeout,
    metrics::FunnelMetrics,
    Funnel, FunnelError, PresyncRange, PresyncResult,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: String,
    /// Unix seconds.
    pub timestamp: u64,
}

/// Raw access to a main chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlockSource: Send + Sync {
    fn network(&self) -> NetworkId;

    /// First height read by the chain data extensions of this network, if it has any.
    fn first_extension_height(&self) -> Option<u64>;

    async fn latest_block_number(&self) -> Result<u64, FunnelError>;

    async fn block_header(&self, block_number: u64) -> Result<Option<BlockHeader>, FunnelError>;

    /// Game inputs submitted in `[from, to]`, with the block they belong to, in chain order.
    async fn submitted_inputs(&self, from: u64, to: u64) -> Result<Vec<(u64, RawInput)>, FunnelError>;

    /// Extension data of `[from, to]`, in chain order.
    async fn extension_datums(&self, from: u64, to: u64) -> Result<Vec<ChainDataExtensionDatum>, FunnelError>;
}

#[derive(Debug, Clone)]
pub struct BlockFunnelConfig {
    pub start_block_height: u64,
    pub group_size: u64,
    pub confirmation_depth: u64,
    pub rpc_timeout: Duration,
}

pub struct BlockFunnel<S> {
    source: S,
    network: NetworkId,
    config: BlockFunnelConfig,
    cache: FunnelCache,
    extractor: Arc<InputExtractor>,
    metrics: Arc<FunnelMetrics>,
}

impl<S: BlockSource> BlockFunnel<S> {
    /// Creates the funnel and caches the current chain tip.
    pub async fn new(
        source: S,
        config: BlockFunnelConfig,
        cache: FunnelCache,
        extractor: Arc<InputExtractor>,
        metrics: Arc<FunnelMetrics>,
    ) -> Result<Self, FunnelError> {
        if config.group_size == 0 {
            return Err(FunnelError::Config("group size must be at least 1".into()));
        }
        let network = source.network();
        let funnel = Self { source, network, config, cache, extractor, metrics };
        let tip = funnel.refresh_tip().await?;
        tracing::info!(
            "🔗 Main chain {} at block #{tip}, sync starts at block #{}",
            funnel.network,
            funnel.config.start_block_height
        );
        Ok(funnel)
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, FunnelError>>,
    ) -> Result<T, FunnelError> {
        with_timeout(&self.network, operation, self.config.rpc_timeout, fut).await
    }

    async fn refresh_tip(&self) -> Result<u64, FunnelError> {
        let latest = self.call("latest_block_number", self.source.latest_block_number()).await?;
        let tip = latest.saturating_sub(self.config.confirmation_depth);
        self.cache.main_chain(|entry| entry.tip = Some(tip));
        Ok(tip)
    }

    /// The cached tip, refreshed when `block_height` is past it.
    async fn tip_for(&self, block_height: u64) -> Result<u64, FunnelError> {
        match self.cache.main_chain(|entry| entry.tip) {
            Some(tip) if tip >= block_height => Ok(tip),
            _ => self.refresh_tip().await,
        }
    }

    async fn header(&self, block_number: u64) -> Result<BlockHeader, FunnelError> {
        self.call("block_header", self.source.block_header(block_number))
            .await?
            .ok_or_else(|| FunnelError::missing_block(&self.network, block_number))
    }

    /// Headers of `[from, to]`, fetched concurrently. Only the prefix up to the first failure is kept; a failure
    /// on the first block is an error.
    async fn headers(&self, from: u64, to: u64) -> Result<Vec<BlockHeader>, FunnelError> {
        let results = join_all((from..=to).map(|block_number| self.header(block_number))).await;
        let mut headers = Vec::with_capacity(results.len());
        for res in results {
            match res {
                Ok(header) => headers.push(header),
                Err(err) if headers.is_empty() || matches!(err, FunnelError::MissingBlock { .. }) => return Err(err),
                Err(err) => {
                    tracing::debug!("Truncating read at block #{}: {err}", from + headers.len() as u64);
                    break;
                }
            }
        }
        Ok(headers)
    }

    /// Blocks whose timestamp the decorators will need but which are not part of the group: the block before the
    /// group, and the start block.
    fn missing_context_blocks(&self, block_height: u64) -> BTreeSet<u64> {
        let start = self.config.start_block_height;
        self.cache.main_chain(|entry| {
            let mut missing = BTreeSet::new();
            if block_height > start && !entry.block_timestamps.contains_key(&(block_height - 1)) {
                missing.insert(block_height - 1);
            }
            if block_height > start && entry.start_timestamp.is_none() {
                missing.insert(start);
            }
            missing
        })
    }

    fn record_timestamps<'a>(&self, first: u64, headers: impl IntoIterator<Item = &'a BlockHeader>) {
        let start = self.config.start_block_height;
        self.cache.main_chain(|entry| {
            for header in headers {
                entry.block_timestamps.insert(header.number, header.timestamp);
                if header.number == start {
                    entry.start_timestamp = Some(header.timestamp);
                }
            }
            entry.prune_timestamps(first.saturating_sub(1));
        });
    }

    async fn record_start_timestamp(&self) -> Result<(), FunnelError> {
        if self.cache.main_chain(|entry| entry.start_timestamp.is_some()) {
            return Ok(());
        }
        let start = self.config.start_block_height;
        if self.tip_for(start).await? >= start {
            let header = self.header(start).await?;
            self.record_timestamps(start, [&header]);
        }
        Ok(())
    }

    async fn to_chain_data(
        &self,
        header: BlockHeader,
        inputs: Vec<RawInput>,
        extension_datums: Vec<ChainDataExtensionDatum>,
    ) -> Result<ChainData, FunnelError> {
        let context =
            BlockContext { network: self.network.clone(), block_number: header.number, timestamp: header.timestamp };
        let mut data = ChainData::new(self.network.clone(), header.number, header.hash, header.timestamp);

        let mut rejected = 0;
        for input in &inputs {
            let outcome = self.extractor.extract(input, &context).await?;
            rejected += outcome.rejected;
            data.submitted_data.extend(outcome.submitted);
        }
        self.metrics.record_inputs(&self.network, data.submitted_data.len(), rejected);

        data.extension_datums = extension_datums;
        Ok(data)
    }
}

fn group_by_block<T>(items: impl IntoIterator<Item = (u64, T)>) -> BTreeMap<u64, Vec<T>> {
    let mut grouped: BTreeMap<u64, Vec<T>> = BTreeMap::new();
    for (block_number, item) in items {
        grouped.entry(block_number).or_default().push(item);
    }
    grouped
}

#[async_trait]
impl<S: BlockSource> Funnel for BlockFunnel<S> {
    async fn read_data(&self, block_height: u64) -> Result<Vec<ChainData>, FunnelError> {
        let stopwatch = PerfStopwatch::new();
        let tip = self.tip_for(block_height).await?;
        if block_height > tip {
            return Ok(vec![]);
        }
        let to = block_height.saturating_add(self.config.group_size - 1).min(tip);
        let context_blocks = self.missing_context_blocks(block_height);

        let (headers, inputs, datums, context_headers) = tokio::try_join!(
            self.headers(block_height, to),
            self.call("submitted_inputs", self.source.submitted_inputs(block_height, to)),
            self.call("extension_datums", self.source.extension_datums(block_height, to)),
            try_join_all(context_blocks.iter().map(|block_number| self.header(*block_number))),
        )?;

        self.record_timestamps(block_height, context_headers.iter().chain(&headers));

        let mut inputs = group_by_block(inputs);
        let mut datums = group_by_block(datums.into_iter().map(|datum| (datum.block_number, datum)));
        let mut blocks = Vec::with_capacity(headers.len());
        for header in headers {
            let block_number = header.number;
            let inputs = inputs.remove(&block_number).unwrap_or_default();
            let datums = datums.remove(&block_number).unwrap_or_default();
            blocks.push(self.to_chain_data(header, inputs, datums).await?);
        }

        if let Some(last) = blocks.last() {
            self.metrics.latest_block.record(last.block_number, &[]);
            self.metrics.read_duration.record(stopwatch.elapsed().as_secs_f64(), &[]);
            stopwatch_end!(stopwatch, "Read blocks #{block_height}..=#{} in {:?}", last.block_number);
        }
        Ok(blocks)
    }

    async fn read_presync_data(
        &self,
        ranges: &BTreeMap<NetworkId, PresyncRange>,
    ) -> Result<BTreeMap<NetworkId, PresyncResult>, FunnelError> {
        // Auxiliary networks split their presync at the start block timestamp, even once this network is done.
        self.record_start_timestamp().await?;

        let Some(range) = ranges.get(&self.network) else {
            return Ok(BTreeMap::new());
        };
        let start = self.config.start_block_height;
        let finished = self.cache.main_chain(|entry| {
            entry.presync_finished |= range.from >= start;
            entry.presync_finished
        });
        if finished {
            return Ok(BTreeMap::from([(self.network.clone(), PresyncResult::Finished)]));
        }

        let tip = self.tip_for(range.from).await?;
        let to = range.to.min(start - 1).min(tip);
        if to < range.from {
            let result = PresyncResult::Data { blocks: vec![], fetched_to: None };
            return Ok(BTreeMap::from([(self.network.clone(), result)]));
        }

        let datums = self.call("extension_datums", self.source.extension_datums(range.from, to)).await?;
        let blocks = group_by_block(datums.into_iter().map(|datum| (datum.block_number, datum)))
            .into_iter()
            .map(|(block_number, extension_datums)| PresyncChainData {
                network: self.network.clone(),
                block_number,
                extension_datums,
            })
            .collect();

        let result = PresyncResult::Data { blocks, fetched_to: Some(to) };
        Ok(BTreeMap::from([(self.network.clone(), result)]))
    }

    async fn presync_starts(&self) -> Result<BTreeMap<NetworkId, u64>, FunnelError> {
        let start = self.config.start_block_height;
        let from = self.source.first_extension_height().map_or(start, |height| height.min(start));
        Ok(BTreeMap::from([(self.network.clone(), from)]))
    }
}
