use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::warn;

use common::{Bar, BarRequest, GatewayError, MarketDataGateway};

/// Caps concurrent calls into a gateway and bounds each one with a timeout.
///
/// The timeout covers the call itself, not the wait for a permit.
pub struct ThrottledGateway {
    inner: Arc<dyn MarketDataGateway>,
    permits: Arc<Semaphore>,
    call_timeout: Duration,
}

impl ThrottledGateway {
    pub fn new(inner: Arc<dyn MarketDataGateway>, max_concurrent: usize, call_timeout: Duration) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            call_timeout,
        }
    }
}

#[async_trait]
impl MarketDataGateway for ThrottledGateway {
    async fn fetch_bars(&self, request: &BarRequest) -> Result<Vec<Bar>, GatewayError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| GatewayError::Unreachable("gateway throttle closed".into()))?;

        match tokio::time::timeout(self.call_timeout, self.inner.fetch_bars(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(symbol = %request.symbol, timeout = ?self.call_timeout, "Bar fetch timed out");
                Err(GatewayError::Timeout)
            }
        }
    }
}
