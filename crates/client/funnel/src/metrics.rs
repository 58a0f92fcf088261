use fc_analytics::{
    register_counter_metric_instrument, register_gauge_metric_instrument, register_histogram_metric_instrument,
};
use fp_chain::NetworkId;
use opentelemetry::metrics::{Counter, Gauge, Histogram};
use opentelemetry::{global, InstrumentationScope, KeyValue};

pub struct FunnelMetrics {
    pub latest_block: Gauge<u64>,
    pub presync_cursor: Gauge<u64>,
    pub inputs_accepted: Counter<u64>,
    pub inputs_rejected: Counter<u64>,
    pub read_duration: Histogram<f64>,
}

impl FunnelMetrics {
    pub fn register() -> Self {
        // Register meter
        let meter = global::meter_with_scope(
            InstrumentationScope::builder("crates.funnel.opentelemetry")
                .with_attributes([KeyValue::new("crate", "funnel")])
                .build(),
        );

        let latest_block = register_gauge_metric_instrument(
            &meter,
            "funnel_latest_block".to_string(),
            "Latest main chain block read by the funnel".to_string(),
            "block".to_string(),
        );

        let presync_cursor = register_gauge_metric_instrument(
            &meter,
            "funnel_presync_cursor".to_string(),
            "Next position to presync, per network".to_string(),
            "block".to_string(),
        );

        let inputs_accepted = register_counter_metric_instrument(
            &meter,
            "funnel_inputs_accepted".to_string(),
            "Game inputs which passed validation".to_string(),
            "input".to_string(),
        );

        let inputs_rejected = register_counter_metric_instrument(
            &meter,
            "funnel_inputs_rejected".to_string(),
            "Batched subunits dropped during validation".to_string(),
            "input".to_string(),
        );

        let read_duration = register_histogram_metric_instrument(
            &meter,
            "funnel_read_duration".to_string(),
            "Time spent reading a group of main chain blocks".to_string(),
            "s".to_string(),
        );

        Self { latest_block, presync_cursor, inputs_accepted, inputs_rejected, read_duration }
    }

    pub fn record_presync_cursor(&self, network: &NetworkId, cursor: u64) {
        self.presync_cursor.record(cursor, &[KeyValue::new("network", network.to_string())]);
    }

    pub fn record_inputs(&self, network: &NetworkId, accepted: usize, rejected: usize) {
        let attributes = [KeyValue::new("network", network.to_string())];
        self.inputs_accepted.add(accepted as u64, &attributes);
        self.inputs_rejected.add(rejected as u64, &attributes);
    }
}
