use std::{future::Future, time::Duration};

use fc_analytics::RPC_CALLS_TARGET;
use fc_input::InputError;
use fp_chain::NetworkId;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Error, Debug)]
pub enum FunnelError {
    #[error("{operation} on {network} timed out after {timeout:?}")]
    Timeout { network: NetworkId, operation: &'static str, timeout: Duration },

    #[error("Rate limited by {network}: {message}")]
    RateLimited { network: NetworkId, message: String },

    #[error("RPC error on {network}: {message}")]
    Rpc { network: NetworkId, message: String },

    #[error("Invalid response from {network}: {message}")]
    InvalidResponse { network: NetworkId, message: String },

    /// A block at or below the known tip could not be found. The node is inconsistent.
    #[error("Block #{block_number} is missing on {network}")]
    MissingBlock { network: NetworkId, block_number: u64 },

    #[error("Invalid funnel configuration: {0}")]
    Config(String),

    #[error("Chain data consumer failed: {0:#}")]
    Consumer(#[source] anyhow::Error),

    #[error(transparent)]
    Input(#[from] InputError),
}

impl FunnelError {
    /// Returns true if the error is recoverable (network/connection issues).
    /// These are transient errors that should be retried with backoff.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::RateLimited { .. } | Self::Rpc { .. })
    }

    /// Classifies a transport error, telling rate limiting apart from other failures.
    pub fn rpc(network: &NetworkId, err: impl std::fmt::Display) -> Self {
        let message = err.to_string();
        if is_rate_limit_message(&message) {
            Self::RateLimited { network: network.clone(), message }
        } else {
            Self::Rpc { network: network.clone(), message }
        }
    }

    pub fn invalid_response(network: &NetworkId, message: impl Into<String>) -> Self {
        Self::InvalidResponse { network: network.clone(), message: message.into() }
    }

    pub fn missing_block(network: &NetworkId, block_number: u64) -> Self {
        Self::MissingBlock { network: network.clone(), block_number }
    }
}

fn is_rate_limit_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("429")
        || message.contains("-32005")
        || message.contains("rate limit")
        || message.contains("too many requests")
}

/// Runs a single remote call with a deadline.
///
/// Every call is reported on the RPC log target, with its outcome and duration.
pub async fn with_timeout<T, F>(
    network: &NetworkId,
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, FunnelError>
where
    F: Future<Output = Result<T, FunnelError>>,
{
    let started = Instant::now();
    let res = match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(FunnelError::Timeout { network: network.clone(), operation, timeout }),
    };
    tracing::debug!(
        target: RPC_CALLS_TARGET,
        network = network.as_str(),
        method = operation,
        success = res.is_ok(),
        elapsed_micros = started.elapsed().as_micros() as u64,
        "rpc call"
    );
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    #[rstest]
    #[case("HTTP error 429 Too Many Requests", true)]
    #[case("server returned an error response: error code -32005: limit exceeded", true)]
    #[case("Rate limit reached for this key", true)]
    #[case("connection refused", false)]
    fn rate_limits_are_detected(#[case] message: &str, #[case] rate_limited: bool) {
        let err = FunnelError::rpc(&NetworkId::eip155(1), message);
        assert_eq!(matches!(err, FunnelError::RateLimited { .. }), rate_limited);
        assert!(err.is_recoverable());
    }

    #[test]
    fn consistency_errors_are_not_recoverable() {
        assert!(!FunnelError::missing_block(&NetworkId::eip155(1), 4).is_recoverable());
        assert!(!FunnelError::Config("bad".into()).is_recoverable());
        assert!(!FunnelError::Consumer(anyhow::anyhow!("db down")).is_recoverable());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let network = NetworkId::eip155(1);
        let res: Result<(), _> = with_timeout(&network, "eth_blockNumber", Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_matches!(res, Err(FunnelError::Timeout { operation: "eth_blockNumber", .. }));
        assert!(res.unwrap_err().is_recoverable());
    }
}
