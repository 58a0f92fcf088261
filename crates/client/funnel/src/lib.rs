//! Multi-chain funnel.
//!
//! A funnel turns one main chain, plus any number of auxiliary networks, into a gap-free sequence of
//! [ChainData](fp_chain::ChainData), one per main chain block. The main chain is read by a [BlockFunnel], every
//! auxiliary network by a decorator wrapping it, see [factory] for how they are stacked. [sync] drives the result:
//! presync first, then sync, handing every block to a [ChainDataConsumer](sync::ChainDataConsumer).

pub mod avail;
pub mod block;
pub mod cache;
pub mod config;
pub mod emulated;
pub mod error;
pub mod evm;
pub mod factory;
pub mod funnel;
pub mod http;
pub mod metrics;
pub mod parallel;
pub mod schedule;
pub mod search;
pub mod sync;

#[cfg(test)]
mod test_utils;

pub use block::{BlockFunnel, BlockFunnelConfig, BlockHeader, BlockSource};
pub use cache::{AuxCacheKind, CacheEntryKind, FunnelCache};
pub use config::FunnelConfig;
pub use emulated::EmulatedBlocksFunnel;
pub use error::FunnelError;
pub use factory::{FunnelFactory, FunnelLayer, LayerContext};
pub use funnel::{Funnel, PresyncRange, PresyncResult};
pub use parallel::ParallelFunnel;
pub use schedule::CdeScheduler;
pub use sync::{ChainDataConsumer, ConsumerOutcome, FunnelSyncWorker, LoggingConsumer, SyncConfig};
