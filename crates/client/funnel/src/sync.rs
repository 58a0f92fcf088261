//! The funnel runtime: presync every network up to the main chain start, then follow the main chain.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use fp_chain::{ChainData, NetworkId, PresyncChainData};
use fp_utils::{backoff_delay, service::ServiceContext};

use crate::{
    cache::FunnelCache, metrics::FunnelMetrics, schedule::CdeScheduler, Funnel, FunnelConfig, FunnelError,
    PresyncRange, PresyncResult,
};

/// What the consumer wants after a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerOutcome {
    Continue,
    /// Resume reading from this block. The funnel cache is dropped.
    Rollback(u64),
}

/// The state machine side of the funnel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainDataConsumer: Send + Sync {
    async fn process_presync(&self, data: PresyncChainData) -> anyhow::Result<()>;

    async fn process(&self, data: ChainData) -> anyhow::Result<ConsumerOutcome>;
}

/// Logs what it receives.
pub struct LoggingConsumer;

#[async_trait]
impl ChainDataConsumer for LoggingConsumer {
    async fn process_presync(&self, data: PresyncChainData) -> anyhow::Result<()> {
        tracing::info!(
            "📦 Presync {} #{}: {} extension datums",
            data.network,
            data.block_number,
            data.extension_datums.len()
        );
        Ok(())
    }

    async fn process(&self, data: ChainData) -> anyhow::Result<ConsumerOutcome> {
        tracing::info!(
            "🔗 Block #{} ({}): {} inputs, {} extension datums",
            data.block_number,
            data.block_hash,
            data.submitted_data.len(),
            data.extension_datums.len()
        );
        Ok(ConsumerOutcome::Continue)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub start_block_height: u64,
    pub presync_step_size: u64,
    /// Wait when there is nothing new to read.
    pub poll_interval: Duration,
    /// First wait after a recoverable error, doubled on each retry.
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl From<&FunnelConfig> for SyncConfig {
    fn from(config: &FunnelConfig) -> Self {
        Self {
            start_block_height: config.main.start_block_height,
            presync_step_size: config.presync_step_size,
            poll_interval: config.poll_interval,
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
        }
    }
}

enum Step {
    Progress,
    Idle,
    Done,
}

pub struct FunnelSyncWorker {
    funnel: Box<dyn Funnel>,
    cache: FunnelCache,
    consumer: Arc<dyn ChainDataConsumer>,
    scheduler: CdeScheduler,
    metrics: Arc<FunnelMetrics>,
    config: SyncConfig,
    /// Next position to presync, for the networks not done yet. `None` until the starts are known.
    presync_cursors: Option<BTreeMap<NetworkId, u64>>,
    next_block: u64,
}

impl FunnelSyncWorker {
    pub fn new(
        funnel: Box<dyn Funnel>,
        cache: FunnelCache,
        consumer: Arc<dyn ChainDataConsumer>,
        scheduler: CdeScheduler,
        metrics: Arc<FunnelMetrics>,
        config: SyncConfig,
    ) -> Self {
        let next_block = config.start_block_height;
        Self { funnel, cache, consumer, scheduler, metrics, config, presync_cursors: None, next_block }
    }

    /// Runs until cancelled or a fatal error. Recoverable errors are retried with backoff.
    pub async fn run(mut self, ctx: ServiceContext) -> Result<(), FunnelError> {
        let mut presync_done = false;
        let mut attempt = 0;
        loop {
            if ctx.is_cancelled() {
                return Ok(());
            }
            let step = if presync_done { self.sync_step().await } else { self.presync_step().await };
            let wait = match step {
                Ok(Step::Progress) => {
                    attempt = 0;
                    continue;
                }
                Ok(Step::Done) => {
                    tracing::info!("✅ Presync finished, syncing from block #{}", self.next_block);
                    presync_done = true;
                    attempt = 0;
                    continue;
                }
                Ok(Step::Idle) => {
                    attempt = 0;
                    self.config.poll_interval
                }
                Err(err) if err.is_recoverable() => {
                    let delay = backoff_delay(self.config.retry_base, self.config.retry_max, attempt);
                    tracing::warn!("⚠️ Funnel read failed, retrying in {delay:?}: {err}");
                    attempt = attempt.saturating_add(1);
                    delay
                }
                Err(err) => {
                    tracing::error!("❗ Funnel stopped: {err}");
                    return Err(err);
                }
            };
            if ctx.run_until_cancelled(tokio::time::sleep(wait)).await.is_none() {
                return Ok(());
            }
        }
    }

    async fn presync_step(&mut self) -> Result<Step, FunnelError> {
        let mut cursors = match self.presync_cursors.take() {
            Some(cursors) => cursors,
            None => self.funnel.presync_starts().await?,
        };
        let result = self.presync_round(&mut cursors).await;
        let done = cursors.is_empty();
        self.presync_cursors = Some(cursors);
        match result? {
            _ if done => Ok(Step::Done),
            true => Ok(Step::Progress),
            false => Ok(Step::Idle),
        }
    }

    /// Reads one step of every unfinished network, and returns whether any cursor moved.
    async fn presync_round(&self, cursors: &mut BTreeMap<NetworkId, u64>) -> Result<bool, FunnelError> {
        if cursors.is_empty() {
            return Ok(false);
        }
        let step = self.config.presync_step_size;
        let ranges: BTreeMap<_, _> = cursors
            .iter()
            .map(|(network, &from)| (network.clone(), PresyncRange { from, to: from.saturating_add(step - 1) }))
            .collect();

        let results = self.funnel.read_presync_data(&ranges).await?;
        let mut progressed = false;
        for (network, result) in results {
            let Some(cursor) = cursors.get_mut(&network) else { continue };
            match result {
                PresyncResult::Finished => {
                    tracing::info!("Presync of {network} finished at {cursor}");
                    cursors.remove(&network);
                    progressed = true;
                }
                PresyncResult::Data { blocks, fetched_to } => {
                    for block in blocks {
                        self.scheduler.schedule(&block.extension_datums, self.config.start_block_height).await;
                        self.consumer.process_presync(block).await.map_err(FunnelError::Consumer)?;
                    }
                    if let Some(fetched_to) = fetched_to.filter(|&to| to >= *cursor) {
                        *cursor = fetched_to + 1;
                        self.metrics.record_presync_cursor(&network, *cursor);
                        progressed = true;
                    }
                }
            }
        }
        Ok(progressed)
    }

    async fn sync_step(&mut self) -> Result<Step, FunnelError> {
        let blocks = self.funnel.read_data(self.next_block).await?;
        let Some(first) = blocks.first() else { return Ok(Step::Idle) };
        let network = first.network.clone();
        for (expected, block) in (self.next_block..).zip(&blocks) {
            if block.block_number != expected {
                return Err(FunnelError::invalid_response(
                    &network,
                    format!("expected block #{expected}, got #{}", block.block_number),
                ));
            }
        }

        for block in blocks {
            let block_number = block.block_number;
            self.scheduler.schedule(&block.extension_datums, block_number).await;
            match self.consumer.process(block).await.map_err(FunnelError::Consumer)? {
                ConsumerOutcome::Continue => self.next_block = block_number + 1,
                ConsumerOutcome::Rollback(target) => {
                    if target < self.config.start_block_height {
                        return Err(FunnelError::Consumer(anyhow::anyhow!(
                            "rollback to block #{target} is before the start block #{}",
                            self.config.start_block_height
                        )));
                    }
                    tracing::warn!("⏪ Rolling back from block #{block_number} to #{target}");
                    self.cache.clear();
                    self.next_block = target;
                    return Ok(Step::Progress);
                }
            }
        }
        Ok(Step::Progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funnel::MockFunnel;
    use assert_matches::assert_matches;
    use fc_input::{InMemoryScheduledStore, ScheduledDataStore};
    use fp_chain::{CdePayload, ChainDataExtensionDatum};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    const START: u64 = 10;

    fn main_network() -> NetworkId {
        NetworkId::eip155(31337)
    }

    fn aux_network() -> NetworkId {
        NetworkId::eip155(137)
    }

    fn config() -> SyncConfig {
        SyncConfig {
            start_block_height: START,
            presync_step_size: 10,
            poll_interval: Duration::from_secs(1),
            retry_base: Duration::from_millis(100),
            retry_max: Duration::from_secs(1),
        }
    }

    fn block(number: u64) -> ChainData {
        ChainData::new(main_network(), number, format!("0x{number:02x}"), 1_000 + number)
    }

    fn worker(
        funnel: MockFunnel,
        consumer: MockChainDataConsumer,
        store: Arc<InMemoryScheduledStore>,
    ) -> FunnelSyncWorker {
        FunnelSyncWorker::new(
            Box::new(funnel),
            FunnelCache::new(),
            Arc::new(consumer),
            CdeScheduler::new(store, BTreeMap::new()),
            Arc::new(FunnelMetrics::register()),
            config(),
        )
    }

    /// Serves `reads` from the sync phase on, then cancels the worker.
    fn funnel_with_reads(ctx: &ServiceContext, reads: Vec<Result<Vec<ChainData>, FunnelError>>) -> MockFunnel {
        let mut funnel = MockFunnel::new();
        let reads = Mutex::new(reads.into_iter());
        let ctx = ctx.branch();
        funnel.expect_read_data().returning(move |_| match reads.lock().unwrap().next() {
            Some(read) => read,
            None => {
                ctx.cancel_global();
                Ok(vec![])
            }
        });
        funnel
    }

    /// Nothing to presync.
    fn synced_funnel(ctx: &ServiceContext, reads: Vec<Result<Vec<ChainData>, FunnelError>>) -> MockFunnel {
        let mut funnel = funnel_with_reads(ctx, reads);
        funnel.expect_presync_starts().returning(|| Ok(BTreeMap::new()));
        funnel
    }

    #[tokio::test]
    async fn presync_runs_every_network_until_finished() {
        let ctx = ServiceContext::new();
        let mut funnel = funnel_with_reads(&ctx, vec![Ok(vec![block(START)])]);
        funnel.expect_presync_starts().returning(|| Ok(BTreeMap::from([(main_network(), 0), (aux_network(), 5)])));
        let rounds = Arc::new(Mutex::new(vec![]));
        let recorded = rounds.clone();
        funnel.expect_read_presync_data().returning(move |ranges| {
            recorded.lock().unwrap().push(ranges.clone());
            if ranges.contains_key(&aux_network()) {
                let datum = ChainDataExtensionDatum {
                    cde_id: 0,
                    cde_name: "gold".into(),
                    network: main_network(),
                    block_number: 4,
                    transaction_hash: None,
                    scheduled_prefix: Some("gold".into()),
                    payload: CdePayload::Erc721Mint { token_id: Default::default(), mint_data: "x".into() },
                };
                let presync =
                    PresyncChainData { network: main_network(), block_number: 4, extension_datums: vec![datum] };
                Ok(BTreeMap::from([
                    (main_network(), PresyncResult::Data { blocks: vec![presync], fetched_to: Some(9) }),
                    (aux_network(), PresyncResult::Finished),
                ]))
            } else {
                Ok(BTreeMap::from([(main_network(), PresyncResult::Finished)]))
            }
        });

        let mut consumer = MockChainDataConsumer::new();
        consumer.expect_process_presync().times(1).returning(|_| Ok(()));
        consumer
            .expect_process()
            .times(1)
            .withf(|data| data.block_number == START)
            .returning(|_| Ok(ConsumerOutcome::Continue));
        let store = Arc::new(InMemoryScheduledStore::new());

        worker(funnel, consumer, store.clone()).run(ctx).await.unwrap();

        let rounds = rounds.lock().unwrap();
        assert_eq!(rounds[0][&main_network()], PresyncRange { from: 0, to: 9 });
        assert_eq!(rounds[0][&aux_network()], PresyncRange { from: 5, to: 14 });
        assert_eq!(rounds[1], BTreeMap::from([(main_network(), PresyncRange { from: 10, to: 19 })]));
        assert_eq!(store.scheduled_at(START).await.unwrap()[0].1.input_data, "gold|0|x");
    }

    #[tokio::test]
    async fn rollback_clears_the_cache_and_rereads() {
        let ctx = ServiceContext::new();
        let funnel = synced_funnel(&ctx, vec![Ok(vec![block(10), block(11), block(12)]), Ok(vec![block(11)])]);
        let mut consumer = MockChainDataConsumer::new();
        let processed = Arc::new(Mutex::new(vec![]));
        let recorded = processed.clone();
        consumer.expect_process().returning(move |data| {
            let mut processed = recorded.lock().unwrap();
            processed.push(data.block_number);
            Ok(if processed.len() == 2 { ConsumerOutcome::Rollback(11) } else { ConsumerOutcome::Continue })
        });
        let worker = worker(funnel, consumer, Arc::new(InMemoryScheduledStore::new()));
        let cache = worker.cache.clone();
        cache.main_chain(|entry| entry.tip = Some(12));

        worker.run(ctx).await.unwrap();

        // Block 12 is never processed before the rollback.
        assert_eq!(*processed.lock().unwrap(), vec![10, 11, 11]);
        assert!(!cache.contains(&crate::CacheEntryKind::MainChain));
    }

    #[tokio::test]
    async fn gaps_are_fatal() {
        let ctx = ServiceContext::new();
        let funnel = synced_funnel(&ctx, vec![Ok(vec![block(10), block(12)])]);
        let mut consumer = MockChainDataConsumer::new();
        consumer.expect_process().never();

        let res = worker(funnel, consumer, Arc::new(InMemoryScheduledStore::new())).run(ctx).await;
        assert_matches!(res, Err(FunnelError::InvalidResponse { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn recoverable_errors_are_retried() {
        let ctx = ServiceContext::new();
        let timeout = || FunnelError::Timeout {
            network: main_network(),
            operation: "eth_getLogs",
            timeout: Duration::from_secs(1),
        };
        let funnel = synced_funnel(&ctx, vec![Err(timeout()), Err(timeout()), Ok(vec![block(10)])]);
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let mut consumer = MockChainDataConsumer::new();
        consumer.expect_process().returning(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(ConsumerOutcome::Continue)
        });

        worker(funnel, consumer, Arc::new(InMemoryScheduledStore::new())).run(ctx).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn consumer_errors_stop_the_worker() {
        let ctx = ServiceContext::new();
        let funnel = synced_funnel(&ctx, vec![Ok(vec![block(10)])]);
        let mut consumer = MockChainDataConsumer::new();
        consumer.expect_process().returning(|_| Err(anyhow::anyhow!("database is locked")));

        let res = worker(funnel, consumer, Arc::new(InMemoryScheduledStore::new())).run(ctx).await;
        assert_matches!(res, Err(FunnelError::Consumer(_)));
    }
}
