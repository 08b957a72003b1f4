//! Gateway registry: maps gateway keys to provider adapters and owns
//! the call timeout applied to every outbound provider call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::ports::{ProviderAdapter, ProviderError};

/// Errors from dispatching a call through the registry.
#[derive(Debug, thiserror::Error)]
pub enum ProviderCallError {
    #[error("unknown payment gateway: {0}")]
    UnknownGateway(String),

    #[error("provider call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Registry of configured provider adapters, keyed by gateway name.
///
/// The set of gateways is fixed at startup; requests naming a gateway
/// that was never registered are rejected, not defaulted.
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    call_timeout: Duration,
}

impl ProviderRegistry {
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            adapters: HashMap::new(),
            call_timeout,
        }
    }

    pub fn register(
        mut self,
        gateway: impl Into<String>,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Self {
        self.adapters.insert(gateway.into(), adapter);
        self
    }

    /// Resolves a gateway key to its adapter.
    pub fn adapter(&self, gateway: &str) -> Result<Arc<dyn ProviderAdapter>, ProviderCallError> {
        self.adapters
            .get(gateway)
            .cloned()
            .ok_or_else(|| ProviderCallError::UnknownGateway(gateway.to_string()))
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Runs one provider call under the registry's timeout.
    ///
    /// A timeout means the provider's outcome is unknown: the caller
    /// must leave its local record as-is and let webhook reconciliation
    /// settle it.
    pub async fn call<T, F>(&self, fut: F) -> Result<T, ProviderCallError>
    where
        F: std::future::Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result.map_err(ProviderCallError::from),
            Err(_) => Err(ProviderCallError::Timeout {
                timeout_secs: self.call_timeout.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_gateway_is_rejected() {
        let registry = ProviderRegistry::new(Duration::from_secs(10));

        let result = registry.adapter("paypal");

        assert!(matches!(
            result,
            Err(ProviderCallError::UnknownGateway(g)) if g == "paypal"
        ));
    }

    #[tokio::test]
    async fn call_times_out_slow_providers() {
        let registry = ProviderRegistry::new(Duration::from_millis(10));

        let result: Result<(), _> = registry
            .call(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ProviderCallError::Timeout { .. })));
    }

    #[tokio::test]
    async fn call_passes_provider_errors_through() {
        let registry = ProviderRegistry::new(Duration::from_secs(1));

        let result: Result<(), _> = registry
            .call(async { Err(ProviderError::rejected("card_declined", None)) })
            .await;

        match result {
            Err(ProviderCallError::Provider(e)) => assert!(!e.retryable),
            other => panic!("unexpected: {:?}", other.err().map(|e| e.to_string())),
        }
    }
}
