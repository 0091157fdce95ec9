use crate::{context::AppContext, metrics};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, Duration};
use tracing::{error, info};

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::expired_token_cleanup_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Purge expired access and refresh tokens (runs every hour)
    async fn expired_token_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(3600)); // Every hour

        loop {
            interval.tick().await;
            scheduler.cleanup_expired_tokens().await;
        }
    }

    async fn cleanup_expired_tokens(&self) {
        info!("Running expired token cleanup");
        let start = Instant::now();

        match self.context.oauth.cleanup_expired_tokens().await {
            Ok((access, refresh)) => {
                if access + refresh > 0 {
                    info!(
                        "Cleaned up {} expired access tokens and {} expired refresh tokens",
                        access, refresh
                    );
                } else {
                    info!("Token cleanup: no expired tokens found");
                }
                metrics::record_background_job(
                    "token_cleanup",
                    "success",
                    start.elapsed().as_secs_f64(),
                );
            }
            Err(e) => {
                error!("Failed to cleanup expired tokens: {}", e);
                metrics::record_background_job(
                    "token_cleanup",
                    "failure",
                    start.elapsed().as_secs_f64(),
                );
            }
        }
    }
}
