use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::time::sleep;

use crate::client::{ClientError, Completion, ProviderClient};
use crate::config::ProviderConfig;
use crate::metrics::{ErrorType, Metrics, ProbeStatus};
use crate::progress::Progress;

/// Sentinel recorded in place of a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Failure {
    Error,
    Timeout,
}

/// A measured value, or the reason there is none. Serializes as the bare
/// number or as `"Error"` / `"Timeout"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Measured<T> {
    Value(T),
    Failed(Failure),
}

impl<T: Copy> Measured<T> {
    pub fn value(&self) -> Option<T> {
        match self {
            Measured::Value(v) => Some(*v),
            Measured::Failed(_) => None,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Measured::Value(_))
    }
}

/// Outcome of one timed request to one provider in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub round: u32,
    pub provider_key: String,
    pub display_name: String,
    pub completion_tokens: Measured<u64>,
    pub elapsed_seconds: f64,
    pub tokens_per_second: Measured<f64>,
    /// Raw response body, or `"<kind>: <message>"` for failures
    pub raw_response: String,
    pub request_sent_at: DateTime<Utc>,
    pub response_received_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn completed(
        round: u32,
        provider: &ProviderConfig,
        completion: Completion,
        elapsed: Duration,
        request_sent_at: DateTime<Utc>,
        response_received_at: DateTime<Utc>,
    ) -> Self {
        let elapsed_seconds = elapsed.as_secs_f64();
        Self {
            round,
            provider_key: provider.key.clone(),
            display_name: provider.display_name.clone(),
            completion_tokens: Measured::Value(completion.completion_tokens),
            elapsed_seconds,
            tokens_per_second: tokens_per_second(completion.completion_tokens, elapsed_seconds),
            raw_response: completion.body,
            request_sent_at,
            response_received_at,
        }
    }

    pub fn failed(
        round: u32,
        provider: &ProviderConfig,
        error: &ClientError,
        elapsed: Duration,
        request_sent_at: DateTime<Utc>,
        response_received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            round,
            provider_key: provider.key.clone(),
            display_name: provider.display_name.clone(),
            completion_tokens: Measured::Failed(Failure::Error),
            elapsed_seconds: elapsed.as_secs_f64(),
            tokens_per_second: Measured::Failed(Failure::Error),
            raw_response: error.describe(),
            request_sent_at,
            response_received_at,
        }
    }

    pub fn timed_out(
        round: u32,
        provider: &ProviderConfig,
        timeout: Duration,
        request_sent_at: DateTime<Utc>,
        response_received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            round,
            provider_key: provider.key.clone(),
            display_name: provider.display_name.clone(),
            completion_tokens: Measured::Failed(Failure::Timeout),
            elapsed_seconds: timeout.as_secs_f64(),
            tokens_per_second: Measured::Failed(Failure::Error),
            raw_response: "Request Timed Out".to_string(),
            request_sent_at,
            response_received_at,
        }
    }

    /// True when tokens/s is a finite positive number.
    pub fn has_valid_throughput(&self) -> bool {
        self.tokens_per_second
            .value()
            .is_some_and(|tps| tps.is_finite() && tps > 0.0)
    }
}

/// Throughput is only defined for a positive token count over positive time.
pub fn tokens_per_second(completion_tokens: u64, elapsed_seconds: f64) -> Measured<f64> {
    if completion_tokens > 0 && elapsed_seconds > 0.0 {
        Measured::Value(completion_tokens as f64 / elapsed_seconds)
    } else {
        Measured::Failed(Failure::Error)
    }
}

type RequestOutcome = (Result<Completion, ClientError>, Duration, DateTime<Utc>);

/// Extra time the transport gets beyond the watchdog, so the watchdog
/// always decides a timeout.
const TRANSPORT_GRACE: Duration = Duration::from_secs(5);

/// Turns a finished request into its result. A transport timeout is
/// reported the same way as the watchdog's.
fn settle(
    round: u32,
    provider: &ProviderConfig,
    (outcome, elapsed, received_at): RequestOutcome,
    timeout: Duration,
    request_sent_at: DateTime<Utc>,
) -> (ProbeResult, ProbeStatus) {
    match outcome {
        Ok(completion) => {
            info!(
                "[Round {}] {} response OK, completion_tokens={}",
                round, provider.display_name, completion.completion_tokens
            );
            Metrics::record_tokens(completion.completion_tokens);
            Metrics::record_latency(elapsed);
            let result = ProbeResult::completed(
                round,
                provider,
                completion,
                elapsed,
                request_sent_at,
                received_at,
            );
            (result, ProbeStatus::Success)
        }
        Err(ClientError::Timeout(_)) => {
            info!("[Round {}] {} timed out.", round, provider.display_name);
            let result =
                ProbeResult::timed_out(round, provider, timeout, request_sent_at, received_at);
            (result, ProbeStatus::Timeout)
        }
        Err(error) => {
            warn!(
                "[Round {}] {} request error: {}",
                round, provider.display_name, error
            );
            let status = ProbeStatus::Failed(ErrorType::from(&error));
            let result = ProbeResult::failed(
                round,
                provider,
                &error,
                elapsed,
                request_sent_at,
                received_at,
            );
            (result, status)
        }
    }
}

/// Issues one timed request against `provider` and records exactly one
/// outcome for it in `progress`.
///
/// The request runs on its own task and reports through a oneshot channel;
/// the watchdog races it. Whichever resolves first decides the result. A
/// request that loses the race is not cancelled: it finishes in the
/// background and its send into the dropped channel is a no-op.
pub async fn run_probe(
    client: ProviderClient,
    provider: Arc<ProviderConfig>,
    round: u32,
    timeout: Duration,
    prompt: Arc<str>,
    progress: Progress,
) -> ProbeResult {
    info!(
        "[Round {}] Start testing: {} ({})",
        round, provider.key, provider.display_name
    );
    Metrics::record_probe_sent();

    let (tx, rx) = oneshot::channel::<RequestOutcome>();
    let request_sent_at = Utc::now();
    let start = Instant::now();

    let task_provider = Arc::clone(&provider);
    tokio::spawn(async move {
        let request = ProviderClient::create_request(&task_provider, &prompt);
        let outcome = client
            .chat_completion(&task_provider, &request, timeout + TRANSPORT_GRACE)
            .await;
        if tx.send((outcome, start.elapsed(), Utc::now())).is_err() {
            debug!(
                "[Round {}] Late response from {} discarded",
                round, task_provider.key
            );
        }
    });

    let (result, status) = tokio::select! {
        received = rx => match received {
            Ok(outcome) => settle(round, &provider, outcome, timeout, request_sent_at),
            Err(_) => {
                // Sender dropped without a value: the request task panicked.
                let error = ClientError::Other("request task terminated".to_string());
                warn!("[Round {}] {} {}", round, provider.display_name, error);
                let result = ProbeResult::failed(
                    round, &provider, &error, start.elapsed(), request_sent_at, Utc::now(),
                );
                (result, ProbeStatus::Failed(ErrorType::Other))
            }
        },
        _ = sleep(timeout) => {
            info!("[Round {}] {} timed out.", round, provider.display_name);
            let result = ProbeResult::timed_out(
                round, &provider, timeout, request_sent_at, Utc::now(),
            );
            (result, ProbeStatus::Timeout)
        }
    };

    Metrics::record_probe_complete(status);

    if progress.complete_probe(result.clone()) {
        info!(
            "[Round {}] Finished: {} ({})",
            round, provider.key, provider.display_name
        );
    } else {
        warn!(
            "[Round {}] Outcome for {} already recorded, ignoring duplicate",
            round, provider.key
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ProviderConfig {
        ProviderConfig {
            key: "alpha".to_string(),
            display_name: "Alpha".to_string(),
            url: "http://127.0.0.1:1/".to_string(),
            api_key: String::new(),
            model: None,
        }
    }

    #[test]
    fn test_tokens_per_second_requires_positive_inputs() {
        assert_eq!(tokens_per_second(20, 2.0), Measured::Value(10.0));
        assert_eq!(tokens_per_second(0, 2.0), Measured::Failed(Failure::Error));
        assert_eq!(tokens_per_second(20, 0.0), Measured::Failed(Failure::Error));
    }

    #[test]
    fn test_sentinels_never_pair_with_throughput() {
        let now = Utc::now();
        let error = ClientError::Connection("refused".to_string());
        let failed = ProbeResult::failed(1, &provider(), &error, Duration::from_millis(5), now, now);
        assert_eq!(failed.completion_tokens, Measured::Failed(Failure::Error));
        assert!(!failed.tokens_per_second.is_value());
        assert_eq!(failed.raw_response, "ConnectionError: Connection error: refused");

        let timed_out = ProbeResult::timed_out(2, &provider(), Duration::from_secs(3), now, now);
        assert_eq!(timed_out.completion_tokens, Measured::Failed(Failure::Timeout));
        assert_eq!(timed_out.tokens_per_second, Measured::Failed(Failure::Error));
        assert_eq!(timed_out.elapsed_seconds, 3.0);
        assert!(!timed_out.has_valid_throughput());
    }

    #[test]
    fn test_zero_tokens_success_has_no_throughput() {
        let now = Utc::now();
        let completion = Completion {
            completion_tokens: 0,
            body: "{}".to_string(),
        };
        let result =
            ProbeResult::completed(1, &provider(), completion, Duration::from_secs(1), now, now);
        assert_eq!(result.completion_tokens, Measured::Value(0));
        assert_eq!(result.tokens_per_second, Measured::Failed(Failure::Error));
    }

    #[test]
    fn test_sentinel_serialization() {
        let now = Utc::now();
        let result = ProbeResult::timed_out(1, &provider(), Duration::from_secs(1), now, now);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["completion_tokens"], "Timeout");
        assert_eq!(json["tokens_per_second"], "Error");

        let back: ProbeResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);

        let completion = Completion {
            completion_tokens: 30,
            body: "{}".to_string(),
        };
        let ok = ProbeResult::completed(1, &provider(), completion, Duration::from_secs(3), now, now);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["completion_tokens"], 30);
        assert_eq!(json["tokens_per_second"], 10.0);
    }

    #[test]
    fn test_transport_timeout_is_recorded_as_timeout() {
        let now = Utc::now();
        let timeout = Duration::from_millis(50);
        let outcome = (
            Err(ClientError::Timeout(timeout)),
            Duration::from_millis(51),
            now,
        );

        let (result, status) = settle(7, &provider(), outcome, timeout, now);
        assert_eq!(status, ProbeStatus::Timeout);
        assert_eq!(result.completion_tokens, Measured::Failed(Failure::Timeout));
        assert_eq!(result.elapsed_seconds, timeout.as_secs_f64());
        assert_eq!(result.raw_response, "Request Timed Out");

        let refused = (
            Err(ClientError::Connection("refused".to_string())),
            Duration::from_millis(3),
            now,
        );
        let (result, status) = settle(7, &provider(), refused, timeout, now);
        assert_eq!(status, ProbeStatus::Failed(ErrorType::Connection));
        assert_eq!(result.completion_tokens, Measured::Failed(Failure::Error));
    }
}
