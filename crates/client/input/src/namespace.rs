use serde::{Deserialize, Serialize};

/// Security namespaces mixed into batched subunit signatures, so that a signature for one game cannot be
/// replayed against another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    /// Used until the first route applies.
    pub default: String,
    /// Namespace changes, keyed by the block height from which they apply.
    #[serde(default)]
    pub routes: Vec<NamespaceRoute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRoute {
    pub from_block_height: u64,
    /// Every namespace accepted from this height on, so that clients may migrate gradually.
    pub namespaces: Vec<String>,
}

impl NamespaceConfig {
    pub fn new(default: impl Into<String>) -> Self {
        Self { default: default.into(), routes: Vec::new() }
    }

    /// Every namespace valid at `block_height`.
    pub fn read_namespaces(&self, block_height: u64) -> Vec<&str> {
        self.routes
            .iter()
            .filter(|route| route.from_block_height <= block_height)
            .max_by_key(|route| route.from_block_height)
            .map(|route| route.namespaces.iter().map(String::as_str).collect())
            .unwrap_or_else(|| vec![self.default.as_str()])
    }
}

/// The message a wallet signs for a batched subunit.
pub fn subunit_message(namespace: &str, millisecond_timestamp: &str, input_data: &str) -> String {
    format!("{namespace}{millisecond_timestamp}{input_data}")
}
