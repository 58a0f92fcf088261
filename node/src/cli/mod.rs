pub mod analytics;
pub mod sync;

use std::path::PathBuf;

use analytics::AnalyticsParams;
use anyhow::Context;
use fc_funnel::FunnelConfig;
use serde::{Deserialize, Serialize};
use sync::SyncParams;

/// Funnel: reads a game's main chain and auxiliary networks into a single ordered stream of blocks.
#[derive(Clone, Debug, clap::Parser, Deserialize, Serialize)]
pub struct RunCmd {
    /// Node arguments file (TOML, JSON or YAML). Its values take precedence over the command line.
    #[arg(env = "FUNNEL_CONFIG_FILE", long, value_name = "FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Networks, extensions and input settings of the funnel, in YAML.
    #[arg(env = "FUNNEL_CONFIG", long, value_name = "FUNNEL CONFIG FILE PATH", default_value = "funnel.yaml")]
    pub funnel_config: PathBuf,

    #[allow(missing_docs)]
    #[clap(flatten)]
    pub analytics_params: AnalyticsParams,

    #[allow(missing_docs)]
    #[clap(flatten)]
    pub sync_params: SyncParams,
}

impl RunCmd {
    /// The funnel configuration file, with the command line overrides applied.
    pub fn funnel_config(&self) -> anyhow::Result<FunnelConfig> {
        let mut config = FunnelConfig::from_yaml(&self.funnel_config)
            .with_context(|| format!("Loading funnel config from {}", self.funnel_config.display()))?;
        self.sync_params.apply(&mut config);
        config.validate().context("Validating funnel config")?;
        Ok(config)
    }
}
