use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregate::{FlaggedResult, ProviderSummary, aggregate};
use crate::client::{ClientConfig, ProviderClient};
use crate::config::Config;
use crate::metrics::{Metrics, RunEvent};
use crate::progress::{Progress, ProgressSnapshot};
use crate::registry::ProviderRegistry;
use crate::round::RoundCoordinator;
use crate::store::RunStore;

/// Rounds per run. Rounds execute strictly one after another.
pub const TOTAL_ROUNDS: u32 = 3;

/// Flagged results of one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResults {
    pub round: u32,
    pub results: Vec<FlaggedResult>,
}

/// A finished run: every round's flagged results plus the filtered summary.
/// Nothing mutates it after the orchestrator hands it off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub prompt: String,
    pub rounds: Vec<RoundResults>,
    pub summary: Vec<ProviderSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Accepted,
    AlreadyRunning,
}

/// Multi-round benchmark orchestrator.
///
/// Owns the progress state shared with every probe, admits at most one run
/// at a time, and hands finished runs to the store and the exporter.
///
/// # Examples
///
/// ```no_run
/// use provider_bench::{BenchmarkRunner, Config, StartOutcome};
/// use std::time::Duration;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::load(std::path::Path::new("bench.toml"))?;
/// let runner = BenchmarkRunner::new(&config)?;
///
/// match runner.start(Duration::from_secs(300), "Write a haiku.".to_string()) {
///     StartOutcome::Accepted => println!("started"),
///     StartOutcome::AlreadyRunning => println!("busy"),
/// }
/// println!("{:?}", runner.progress());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BenchmarkRunner {
    coordinator: RoundCoordinator,
    progress: Progress,
    providers: Vec<String>,
    store: Option<RunStore>,
    export_dir: Option<PathBuf>,
}

// Returns progress to idle when a run ends, however it ends.
struct ResetOnDrop(Progress);

impl Drop for ResetOnDrop {
    fn drop(&mut self) {
        self.0.reset();
    }
}

impl BenchmarkRunner {
    pub fn new(config: &Config) -> Result<Self> {
        let registry = ProviderRegistry::from_config(config)?;
        let runner = Self::from_parts(
            registry,
            config.selected_providers(),
            config.benchmark.stagger(),
        )?
        .with_store(RunStore::new(config.store.path.clone()));

        Ok(if config.export.enabled {
            runner.with_export_dir(config.export.dir.clone())
        } else {
            runner
        })
    }

    /// Runner over `providers` (keys into `registry`, in launch order) with
    /// no store and no export.
    pub fn from_parts(
        registry: ProviderRegistry,
        providers: Vec<String>,
        stagger: Duration,
    ) -> Result<Self> {
        let client = ProviderClient::new(ClientConfig {
            pool_size: providers.len().max(1),
            ..ClientConfig::default()
        })?;
        let progress = Progress::new(TOTAL_ROUNDS);
        let coordinator =
            RoundCoordinator::new(client, Arc::new(registry), progress.clone(), stagger);

        Ok(Self {
            coordinator,
            progress,
            providers,
            store: None,
            export_dir: None,
        })
    }

    pub fn with_store(mut self, store: RunStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_export_dir(mut self, dir: PathBuf) -> Self {
        self.export_dir = Some(dir);
        self
    }

    pub fn store(&self) -> Option<&RunStore> {
        self.store.as_ref()
    }

    /// Consistent point-in-time view of progress.
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub(crate) fn progress_state(&self) -> &Progress {
        &self.progress
    }

    /// Starts a run in the background unless one is already active. A
    /// rejected trigger leaves progress untouched and is not queued.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, timeout: Duration, prompt: String) -> StartOutcome {
        if !self.progress.try_begin_run() {
            warn!("Benchmark already running, trigger rejected");
            Metrics::record_run(RunEvent::Rejected);
            return StartOutcome::AlreadyRunning;
        }

        info!("Starting benchmark in background (timeout {:?})", timeout);
        let runner = self.clone();
        tokio::spawn(async move {
            let _ = runner.execute(timeout, prompt).await;
        });
        StartOutcome::Accepted
    }

    /// Runs one full benchmark in the foreground, with the same admission,
    /// persistence and reset behavior as [`start`](Self::start).
    pub async fn run_once(&self, timeout: Duration, prompt: String) -> Result<BenchmarkRun> {
        if !self.progress.try_begin_run() {
            Metrics::record_run(RunEvent::Rejected);
            anyhow::bail!("A benchmark is already running");
        }
        self.execute(timeout, prompt).await
    }

    // Caller must already hold the run slot.
    async fn execute(&self, timeout: Duration, prompt: String) -> Result<BenchmarkRun> {
        let _reset = ResetOnDrop(self.progress.clone());
        Metrics::record_run(RunEvent::Started);
        info!("=== Benchmark run started ===");

        let outcome = self.run_all(timeout, Arc::from(prompt)).await;
        match &outcome {
            Ok(run) => {
                self.progress.finish_run();
                Metrics::record_run(RunEvent::Completed);
                info!("=== Benchmark run finished, saving results ===");
                self.publish(run).await;
            }
            Err(e) => {
                error!("Benchmark run failed: {:#}", e);
                Metrics::record_run(RunEvent::Failed);
            }
        }
        outcome
    }

    /// Runs every round in sequence and aggregates the combined results.
    pub async fn run_all(&self, timeout: Duration, prompt: Arc<str>) -> Result<BenchmarkRun> {
        let started_at = Utc::now();
        let mut all_results = Vec::with_capacity(self.providers.len() * TOTAL_ROUNDS as usize);

        for round in 1..=TOTAL_ROUNDS {
            let results = self
                .coordinator
                .run_round(&self.providers, round, timeout, Arc::clone(&prompt))
                .await?;
            all_results.extend(results);
        }

        let aggregation = aggregate(&all_results);
        let rounds = (1..=TOTAL_ROUNDS)
            .map(|round| RoundResults {
                round,
                results: aggregation
                    .results
                    .iter()
                    .filter(|flagged| flagged.result.round == round)
                    .cloned()
                    .collect(),
            })
            .collect();

        Ok(BenchmarkRun {
            started_at,
            finished_at: Utc::now(),
            prompt: prompt.to_string(),
            rounds,
            summary: aggregation.summary,
        })
    }

    // Failures here are logged only; progress is already final.
    async fn publish(&self, run: &BenchmarkRun) {
        if let Some(store) = &self.store {
            match store.append(run).await {
                Ok(id) => info!("Saved run {} to {}", id, store.path().display()),
                Err(e) => error!("Failed to save run: {:#}", e),
            }
        }

        if let Some(dir) = &self.export_dir
            && let Err(e) = crate::report::export(run, dir).await
        {
            error!("Failed to export run: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::RunStatus;

    async fn wait_for(runner: &BenchmarkRunner, status: RunStatus) {
        for _ in 0..300 {
            if runner.progress().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("never reached {:?}: {:?}", status, runner.progress());
    }

    #[tokio::test]
    async fn test_trigger_rejected_while_previous_run_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path().join("results.jsonl"));
        let runner =
            BenchmarkRunner::from_parts(ProviderRegistry::default(), Vec::new(), Duration::ZERO)
                .unwrap()
                .with_store(store.clone());
        let timeout = Duration::from_secs(1);

        // Block the first run inside publish
        let writes = store.hold_writes().await;
        assert_eq!(
            runner.start(timeout, "first".to_string()),
            StartOutcome::Accepted
        );
        wait_for(&runner, RunStatus::Finished).await;

        assert_eq!(
            runner.start(timeout, "second".to_string()),
            StartOutcome::AlreadyRunning
        );
        assert!(runner.run_once(timeout, "third".to_string()).await.is_err());
        assert_eq!(runner.progress().status, RunStatus::Finished);

        drop(writes);
        wait_for(&runner, RunStatus::Idle).await;
        let stored = store.list().await.unwrap();
        assert_eq!(stored.len(), 1);

        let run = runner
            .run_once(timeout, "fourth".to_string())
            .await
            .unwrap();
        assert_eq!(run.prompt, "fourth");
        assert_eq!(store.list().await.unwrap().len(), 2);
        assert_eq!(runner.progress().status, RunStatus::Idle);
    }
}
