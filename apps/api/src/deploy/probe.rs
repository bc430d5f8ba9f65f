use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::cache::CacheClient;
use crate::deploy::pipeline::{FailurePolicy, Stage, StageError};
use crate::environment::DeploymentConfig;

/// Startup reachability check for Redis. One ping, no retry; a failure only
/// degrades the deploy.
pub struct CacheProbe {
    redis_url: String,
    timeout: Duration,
}

impl CacheProbe {
    pub fn new(redis_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            redis_url: redis_url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Stage for CacheProbe {
    fn name(&self) -> &'static str {
        "cache-probe"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Degrade
    }

    async fn run(&self, config: &DeploymentConfig) -> Result<(), StageError> {
        let client = CacheClient::open(&self.redis_url, config.cache_max_memory.to_string())?
            .with_timeout(self.timeout);

        client.ping().await?;
        info!("Redis reachable");

        match client.configure_memory().await {
            Ok(()) => info!(
                "Set Redis maxmemory to {} with policy {}",
                client.max_memory(),
                crate::cache::EVICTION_POLICY
            ),
            Err(e) => warn!("Could not set Redis memory limits (managed instance?): {e}"),
        }

        match client.stats().await {
            Ok(stats) => info!(
                "Current Redis status: {} used, {} keys",
                stats.memory_used, stats.keys
            ),
            Err(e) => warn!("Could not read Redis statistics: {e}"),
        }
        Ok(())
    }
}
