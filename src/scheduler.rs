use log::{info, warn};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::benchmark::{BenchmarkRunner, StartOutcome};
use crate::prompt::PromptTemplate;

/// Triggers a benchmark every `interval`, first firing one interval from
/// now. A trigger that finds a run still active is skipped, not queued.
pub async fn run_schedule(
    runner: BenchmarkRunner,
    prompt: PromptTemplate,
    interval: Duration,
    timeout: Duration,
) {
    info!(
        "Scheduling benchmarks every {}",
        humantime::format_duration(interval)
    );

    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        info!("Scheduled benchmark trigger");

        match runner.start(timeout, prompt.render()) {
            StartOutcome::Accepted => {}
            StartOutcome::AlreadyRunning => {
                warn!("Previous benchmark still running, skipping scheduled trigger");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::RunStatus;
    use crate::registry::ProviderRegistry;
    use crate::store::RunStore;

    #[tokio::test(start_paused = true)]
    async fn test_triggers_after_interval() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path().join("results.jsonl"));
        let runner =
            BenchmarkRunner::from_parts(ProviderRegistry::default(), Vec::new(), Duration::ZERO)
                .unwrap()
                .with_store(store.clone());

        // Triggered runs park in publish, so their status stays observable
        let writes = store.hold_writes().await;
        let handle = tokio::spawn(run_schedule(
            runner.clone(),
            PromptTemplate::new("hello"),
            Duration::from_secs(3600),
            Duration::from_secs(5),
        ));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runner.progress().status, RunStatus::Idle);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(runner.progress().status, RunStatus::Finished);

        // The next tick finds the run still active and is skipped
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(runner.progress().status, RunStatus::Finished);

        handle.abort();
        drop(writes);
    }
}
