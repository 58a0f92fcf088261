use clap::Args;
use fc_analytics::AnalyticsConfig;
use fp_utils::parsers::parse_url;
use serde::{Deserialize, Serialize};
use url::Url;

/// Parameters used to config analytics.
#[derive(Debug, Clone, Args, Deserialize, Serialize)]
pub struct AnalyticsParams {
    /// Name of the service.
    #[arg(env = "FUNNEL_ANALYTICS_SERVICE_NAME", long, alias = "analytics", default_value = "funnel_analytics")]
    pub analytics_service_name: String,

    /// Endpoint of the analytics server.
    #[arg(env = "OTEL_EXPORTER_OTLP_ENDPOINT", long, value_parser = parse_url, default_value = None)]
    pub analytics_collection_endpoint: Option<Url>,
}

impl AnalyticsParams {
    pub fn as_analytics_config(&self) -> AnalyticsConfig {
        AnalyticsConfig {
            service_name: self.analytics_service_name.clone(),
            collection_endpoint: self.analytics_collection_endpoint.clone(),
        }
    }
}
