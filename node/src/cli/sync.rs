use std::time::Duration;

use clap::Args;
use fc_funnel::FunnelConfig;
use fp_utils::{
    parsers::parse_duration,
    serde::{deserialize_optional_duration, serialize_optional_duration},
};
use serde::{Deserialize, Serialize};

/// Overrides of the funnel config file.
#[derive(Debug, Clone, Default, Args, Deserialize, Serialize)]
pub struct SyncParams {
    /// First main chain block to sync. Presync covers the extension data before it.
    #[arg(env = "FUNNEL_START_BLOCK_HEIGHT", long, value_name = "BLOCK")]
    #[serde(default)]
    pub start_block_height: Option<u64>,

    /// Wait between two polls when the chain has no new block.
    #[arg(env = "FUNNEL_POLL_INTERVAL", long, value_parser = parse_duration, value_name = "DURATION")]
    #[serde(
        default,
        deserialize_with = "deserialize_optional_duration",
        serialize_with = "serialize_optional_duration"
    )]
    pub poll_interval: Option<Duration>,

    /// Deadline of every remote call.
    #[arg(env = "FUNNEL_RPC_TIMEOUT", long, value_parser = parse_duration, value_name = "DURATION")]
    #[serde(
        default,
        deserialize_with = "deserialize_optional_duration",
        serialize_with = "serialize_optional_duration"
    )]
    pub rpc_timeout: Option<Duration>,

    /// Number of positions requested per network and presync round.
    #[arg(env = "FUNNEL_PRESYNC_STEP_SIZE", long, value_name = "POSITIONS")]
    #[serde(default)]
    pub presync_step_size: Option<u64>,
}

impl SyncParams {
    pub fn apply(&self, config: &mut FunnelConfig) {
        if let Some(start_block_height) = self.start_block_height {
            config.main.start_block_height = start_block_height;
        }
        if let Some(poll_interval) = self.poll_interval {
            config.poll_interval = poll_interval;
        }
        if let Some(rpc_timeout) = self.rpc_timeout {
            config.rpc_timeout = rpc_timeout;
        }
        if let Some(presync_step_size) = self.presync_step_size {
            config.presync_step_size = presync_step_size;
        }
    }
}
