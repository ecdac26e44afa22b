//! Long-running service hosting with cooperative shutdown.

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A long-running service driven by the host until shutdown.
#[async_trait]
pub trait Service: Send + 'static {
    fn name(&self) -> &'static str;

    /// Run until completion or until `shutdown` is cancelled.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

/// Runs registered services until ctrl-c, then cancels the shared token and
/// waits for them to drain.
#[derive(Default)]
pub struct ServiceHost {
    services: Vec<Box<dyn Service>>,
}

impl ServiceHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: impl Service) -> Self {
        self.services.push(Box::new(service));
        self
    }

    pub async fn run_until_shutdown(self) -> Result<()> {
        let shutdown = CancellationToken::new();

        let mut handles = Vec::with_capacity(self.services.len());
        for service in self.services {
            let name = service.name();
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = service.run(token).await {
                    error!(service = name, error = %e, "service exited with error");
                }
            }));
        }

        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
        shutdown.cancel();

        for handle in handles {
            let _ = handle.await;
        }

        Ok(())
    }
}
