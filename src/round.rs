use anyhow::Result;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::client::ProviderClient;
use crate::probe::{ProbeResult, run_probe};
use crate::progress::Progress;
use crate::registry::ProviderRegistry;

/// Fans one round of probes out across providers and joins on all of them.
#[derive(Debug, Clone)]
pub struct RoundCoordinator {
    client: ProviderClient,
    registry: Arc<ProviderRegistry>,
    progress: Progress,
    stagger: Duration,
}

impl RoundCoordinator {
    pub fn new(
        client: ProviderClient,
        registry: Arc<ProviderRegistry>,
        progress: Progress,
        stagger: Duration,
    ) -> Self {
        Self {
            client,
            registry,
            progress,
            stagger,
        }
    }

    /// Runs one round: one concurrent probe per provider, launched in key
    /// order `stagger` apart, then waits for every probe to reach a terminal
    /// outcome. Results come back in completion order.
    pub async fn run_round(
        &self,
        provider_keys: &[String],
        round: u32,
        timeout: Duration,
        prompt: Arc<str>,
    ) -> Result<Vec<ProbeResult>> {
        let providers = self.registry.resolve(provider_keys)?;

        info!("======== Start Round {} ========", round);
        self.progress.begin_round(round, &providers);

        let mut handles = Vec::with_capacity(providers.len());
        for (i, provider) in providers.iter().enumerate() {
            if i > 0 && !self.stagger.is_zero() {
                sleep(self.stagger).await;
            }

            handles.push(tokio::spawn(run_probe(
                self.client.clone(),
                Arc::clone(provider),
                round,
                timeout,
                Arc::clone(&prompt),
                self.progress.clone(),
            )));

            debug!(
                "[Round {}] Started {}. Pending: {}",
                round,
                provider.key,
                self.progress.snapshot().pending.join(", ")
            );
        }

        let joined = join_barrier(round, handles).await;
        let results = self.progress.end_round(round);
        joined?;
        info!(
            "======== End Round {} ({} results) ========",
            round,
            results.len()
        );
        Ok(results)
    }
}

/// Awaits every handle, even after one has failed, then reports the first
/// failure.
async fn join_barrier<T>(round: u32, handles: Vec<JoinHandle<T>>) -> Result<()> {
    let mut first_error = None;
    for handle in handles {
        if let Err(e) = handle.await {
            error!("[Round {}] Probe task failed: {}", round, e);
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_barrier_waits_past_a_panicked_task() {
        let done = Arc::new(AtomicBool::new(false));
        let slow_done = Arc::clone(&done);

        let handles = vec![
            tokio::spawn(async {
                panic!("probe task blew up");
            }),
            tokio::spawn(async move {
                sleep(Duration::from_millis(200)).await;
                slow_done.store(true, Ordering::SeqCst);
            }),
        ];

        assert!(join_barrier(1, handles).await.is_err());
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_barrier_without_failures() {
        let handles = (0..3).map(|_| tokio::spawn(async {})).collect();
        assert!(join_barrier(2, handles).await.is_ok());
    }
}
