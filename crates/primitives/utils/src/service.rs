//! Cancellation context shared by the long-running funnel services.
//!
//! # Scope
//!
//! Services are said to be in the same _local scope_ if they inherit the same
//! `token_local` cancellation token, which is created with [ServiceContext::child].
//! All services which descend from the same context are in the same _global
//! scope_: any of them can stop every other service by calling
//! [ServiceContext::cancel_global].
//!
//! > A parent service can always cancel all of its child services, but a child
//! > service cannot cancel its parent service.

use std::future::Future;

use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct ServiceContext {
    token_global: CancellationToken,
    token_local: Option<CancellationToken>,
}

impl Clone for ServiceContext {
    fn clone(&self) -> Self {
        self.branch()
    }
}

impl ServiceContext {
    pub fn new() -> Self {
        Self { token_global: CancellationToken::new(), token_local: None }
    }

    /// Stops all services under the same global context scope.
    pub fn cancel_global(&self) {
        tracing::info!("🔌 Gracefully shutting down funnel");
        self.token_global.cancel();
    }

    /// Stops all services under the same local context scope.
    pub fn cancel_local(&self) {
        self.token_local.as_ref().unwrap_or(&self.token_global).cancel();
    }

    /// Resolves once the service has been cancelled, either locally or globally.
    pub async fn cancelled(&self) {
        if let Some(token_local) = &self.token_local {
            tokio::select! {
                _ = self.token_global.cancelled() => {},
                _ = token_local.cancelled() => {}
            }
        } else {
            self.token_global.cancelled().await
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token_global.is_cancelled() || self.token_local.as_ref().map(|t| t.is_cancelled()).unwrap_or(false)
    }

    /// Runs a future until it resolves or the service is cancelled, whichever comes first.
    ///
    /// Returns `None` if the service was cancelled. The future must be cancellation-safe.
    pub async fn run_until_cancelled<T, F>(&self, f: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            res = f => Some(res),
            _ = self.cancelled() => None,
        }
    }

    /// Copies the context, maintaining its scope.
    pub fn branch(&self) -> Self {
        Self { token_global: self.token_global.clone(), token_local: self.token_local.clone() }
    }

    /// Copies the context into a new local scope.
    pub fn child(&self) -> Self {
        let token_local = self.token_local.as_ref().unwrap_or(&self.token_global).child_token();
        Self { token_global: self.token_global.clone(), token_local: Some(token_local) }
    }
}
