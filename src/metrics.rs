use metriken::{AtomicHistogram, Counter, Gauge, LazyCounter, LazyGauge, metric};
use std::time::Duration;

use crate::client::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Success,
    Failed(ErrorType),
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Connection,
    Http4xx(u16),
    Http5xx(u16),
    Parse,
    Timeout,
    Other,
}

impl From<&ClientError> for ErrorType {
    fn from(error: &ClientError) -> Self {
        match error {
            ClientError::Connection(_) => ErrorType::Connection,
            ClientError::Http4xx { status, .. } => ErrorType::Http4xx(*status),
            ClientError::Http5xx { status, .. } => ErrorType::Http5xx(*status),
            ClientError::Parse(_) => ErrorType::Parse,
            ClientError::Timeout(_) => ErrorType::Timeout,
            ClientError::Other(_) => ErrorType::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    Started,
    Completed,
    Failed,
    Rejected,
}

// Probe metrics
#[metric(
    name = "probes/sent",
    description = "Probes sent to providers",
    metadata = { status = "sent" }
)]
pub static PROBES_SENT: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "probes/success",
    description = "Probes that returned a usable response",
    metadata = { status = "success" }
)]
pub static PROBES_SUCCESS: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "probes/failed",
    description = "Probes that failed with a transport or HTTP error",
    metadata = { status = "failed" }
)]
pub static PROBES_FAILED: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "probes/timeout",
    description = "Probes finalized by the watchdog",
    metadata = { status = "timeout" }
)]
pub static PROBES_TIMEOUT: LazyCounter = LazyCounter::new(Counter::default);

// Error category metrics
#[metric(
    name = "errors/connection",
    description = "Connection errors",
    metadata = { "type" = "connection" }
)]
pub static ERRORS_CONNECTION: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors/http_4xx",
    description = "HTTP 4xx errors",
    metadata = { "type" = "http_4xx" }
)]
pub static ERRORS_HTTP_4XX: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors/http_5xx",
    description = "HTTP 5xx errors",
    metadata = { "type" = "http_5xx" }
)]
pub static ERRORS_HTTP_5XX: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors/parse",
    description = "Parse errors",
    metadata = { "type" = "parse" }
)]
pub static ERRORS_PARSE: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "errors/other",
    description = "Other errors",
    metadata = { "type" = "other" }
)]
pub static ERRORS_OTHER: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "tokens/output",
    description = "Completion tokens reported by providers",
    metadata = { direction = "output" }
)]
pub static TOKENS_OUTPUT: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "probes_inflight",
    description = "Probes awaiting an outcome"
)]
pub static PROBES_INFLIGHT: LazyGauge = LazyGauge::new(Gauge::default);

// Histogram parameters: (grouping_power=5, max_value_power=64)
#[metric(
    name = "probe_latency",
    description = "Probe latency in nanoseconds",
    metadata = { unit = "nanoseconds" }
)]
pub static PROBE_LATENCY: AtomicHistogram = AtomicHistogram::new(5, 64);

// Run lifecycle metrics
#[metric(
    name = "runs/started",
    description = "Benchmark runs started",
    metadata = { status = "started" }
)]
pub static RUNS_STARTED: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "runs/completed",
    description = "Benchmark runs completed",
    metadata = { status = "completed" }
)]
pub static RUNS_COMPLETED: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "runs/failed",
    description = "Benchmark runs abandoned after an error",
    metadata = { status = "failed" }
)]
pub static RUNS_FAILED: LazyCounter = LazyCounter::new(Counter::default);

#[metric(
    name = "runs/rejected",
    description = "Triggers rejected because a run was active",
    metadata = { status = "rejected" }
)]
pub static RUNS_REJECTED: LazyCounter = LazyCounter::new(Counter::default);

pub struct Metrics;

impl Metrics {
    pub fn record_probe_sent() {
        PROBES_SENT.increment();
        PROBES_INFLIGHT.increment();
    }

    pub fn record_probe_complete(status: ProbeStatus) {
        PROBES_INFLIGHT.decrement();
        match status {
            ProbeStatus::Success => {
                PROBES_SUCCESS.increment();
            }
            ProbeStatus::Failed(error_type) => {
                PROBES_FAILED.increment();
                match error_type {
                    ErrorType::Connection => ERRORS_CONNECTION.increment(),
                    ErrorType::Http4xx(_) => ERRORS_HTTP_4XX.increment(),
                    ErrorType::Http5xx(_) => ERRORS_HTTP_5XX.increment(),
                    ErrorType::Parse => ERRORS_PARSE.increment(),
                    ErrorType::Timeout => PROBES_TIMEOUT.increment(),
                    ErrorType::Other => ERRORS_OTHER.increment(),
                };
            }
            ProbeStatus::Timeout => {
                PROBES_TIMEOUT.increment();
            }
        }
    }

    pub fn record_tokens(output: u64) {
        TOKENS_OUTPUT.add(output);
    }

    pub fn record_latency(duration: Duration) {
        let _ = PROBE_LATENCY.increment(duration.as_nanos() as u64);
    }

    pub fn record_run(event: RunEvent) {
        match event {
            RunEvent::Started => RUNS_STARTED.increment(),
            RunEvent::Completed => RUNS_COMPLETED.increment(),
            RunEvent::Failed => RUNS_FAILED.increment(),
            RunEvent::Rejected => RUNS_REJECTED.increment(),
        };
    }
}
