use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::ProviderConfig;
use crate::probe::ProbeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Finished,
}

/// Point-in-time view of benchmark progress, as served to pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status: RunStatus,
    pub current_round: u32,
    pub total_rounds: u32,
    /// Display names in completion order
    pub finished: Vec<String>,
    /// Display names in launch order
    pub pending: Vec<String>,
}

#[derive(Debug)]
struct PendingProbe {
    key: String,
    display_name: String,
}

// Bookkeeping for the round currently executing.
#[derive(Debug)]
struct RoundState {
    number: u32,
    pending: Vec<PendingProbe>,
    finished: Vec<String>,
    results: Vec<ProbeResult>,
}

#[derive(Debug)]
struct ProgressState {
    status: RunStatus,
    current_round: u32,
    total_rounds: u32,
    round: Option<RoundState>,
    // Held from admission until reset, including while a finished run publishes.
    active: bool,
}

/// Process-wide benchmark progress.
///
/// Cloning yields another handle to the same state. Every mutation happens
/// under one lock through the transition methods below; callers never see
/// the fields directly.
#[derive(Debug, Clone)]
pub struct Progress {
    inner: Arc<Mutex<ProgressState>>,
}

impl Progress {
    pub fn new(total_rounds: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProgressState {
                status: RunStatus::Idle,
                current_round: 0,
                total_rounds,
                round: None,
                active: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        // Transitions never panic while holding the lock.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.lock();
        let (finished, pending) = match &state.round {
            Some(round) => (
                round.finished.clone(),
                round
                    .pending
                    .iter()
                    .map(|p| p.display_name.clone())
                    .collect(),
            ),
            None => (Vec::new(), Vec::new()),
        };

        ProgressSnapshot {
            status: state.status,
            current_round: state.current_round,
            total_rounds: state.total_rounds,
            finished,
            pending,
        }
    }

    /// Claims the run slot. Returns false, leaving the state untouched, when
    /// a run is already active. The slot stays claimed after
    /// [`finish_run`](Self::finish_run) and is only released by
    /// [`reset`](Self::reset).
    pub fn try_begin_run(&self) -> bool {
        let mut state = self.lock();
        if state.active {
            return false;
        }
        state.active = true;
        state.status = RunStatus::Running;
        state.current_round = 0;
        state.round = None;
        true
    }

    /// Starts tracking a round: every provider pending, nothing finished.
    pub fn begin_round(&self, number: u32, providers: &[Arc<ProviderConfig>]) {
        let mut state = self.lock();
        state.status = RunStatus::Running;
        state.current_round = number;
        state.round = Some(RoundState {
            number,
            pending: providers
                .iter()
                .map(|p| PendingProbe {
                    key: p.key.clone(),
                    display_name: p.display_name.clone(),
                })
                .collect(),
            finished: Vec::new(),
            results: Vec::with_capacity(providers.len()),
        });
    }

    /// Moves the result's provider from pending to finished and stores the
    /// result. Returns false without changing anything when the provider is
    /// not pending in that round (already finished, or a stale round).
    pub fn complete_probe(&self, result: ProbeResult) -> bool {
        let mut state = self.lock();
        let Some(round) = state.round.as_mut() else {
            return false;
        };
        if round.number != result.round {
            return false;
        }
        let Some(position) = round
            .pending
            .iter()
            .position(|p| p.key == result.provider_key)
        else {
            return false;
        };

        let probe = round.pending.remove(position);
        round.finished.push(probe.display_name);
        round.results.push(result);
        true
    }

    /// Stops tracking the round and hands back its results in completion
    /// order.
    pub fn end_round(&self, number: u32) -> Vec<ProbeResult> {
        let mut state = self.lock();
        match state.round.take() {
            Some(round) if round.number == number => round.results,
            other => {
                state.round = other;
                Vec::new()
            }
        }
    }

    pub fn finish_run(&self) {
        let mut state = self.lock();
        state.status = RunStatus::Finished;
        state.current_round = state.total_rounds;
        state.round = None;
    }

    /// Returns to idle and releases the run slot.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.active = false;
        state.status = RunStatus::Idle;
        state.current_round = 0;
        state.round = None;
    }
}
