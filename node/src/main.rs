//! Funnel node command line.
#![warn(missing_docs)]

mod cli;

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use cli::RunCmd;
use fc_analytics::AnalyticsService;
use fc_funnel::{CdeScheduler, FunnelFactory, FunnelSyncWorker, LoggingConsumer, SyncConfig};
use fc_input::{InMemoryAccountMapping, InMemoryScheduledStore};
use figment::{
    providers::{Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use fp_utils::{service::ServiceContext, AbortOnDrop};

const GREET_IMPL_NAME: &str = "Funnel";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli_args = RunCmd::parse();

    // Values of the node arguments file take precedence over the command line.
    let mut config = Figment::new().merge(Serialized::defaults(&cli_args));
    if let Some(config_path) = &cli_args.config_file {
        config = match config_path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => config.merge(Toml::file(config_path)),
            Some("json") => config.merge(Json::file(config_path)),
            Some("yaml") | Some("yml") => config.merge(Yaml::file(config_path)),
            _ => bail!("Unsupported file type for config file."),
        };
    }
    let run_cmd: RunCmd = config.extract().context("Reading node arguments")?;

    let mut analytics = AnalyticsService::new(run_cmd.analytics_params.as_analytics_config());
    analytics.setup()?;

    let res = run(run_cmd).await;
    if let Err(err) = &res {
        tracing::error!("❗ Funnel node failed: {err:#}");
    }
    analytics.shutdown()?;
    res
}

async fn run(run_cmd: RunCmd) -> anyhow::Result<()> {
    let funnel_config = run_cmd.funnel_config()?;

    tracing::info!("🥷 {} Node", GREET_IMPL_NAME);
    tracing::info!("✌️  Version {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "🌐 Main chain: {} from block #{}, {} auxiliary networks, {} extensions",
        funnel_config.main_network(),
        funnel_config.main.start_block_height,
        funnel_config.auxiliary.len(),
        funnel_config.cdes.len()
    );

    // The state machine and its database live outside the funnel: delegations and scheduled inputs are kept in
    // memory, and blocks are logged.
    let factory = FunnelFactory::new(funnel_config.clone(), Arc::new(InMemoryAccountMapping::new()));
    let funnel = factory.build().await.context("Building the funnel")?;
    let scheduler = CdeScheduler::new(Arc::new(InMemoryScheduledStore::new()), factory.contract_addresses());
    let worker = FunnelSyncWorker::new(
        funnel,
        factory.cache(),
        Arc::new(LoggingConsumer),
        scheduler,
        factory.metrics(),
        SyncConfig::from(&funnel_config),
    );

    let ctx = ServiceContext::new();
    let signal_ctx = ctx.branch();
    let _shutdown = AbortOnDrop::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_ctx.cancel_global();
        }
    });

    worker.run(ctx).await.context("Running the funnel")
}
