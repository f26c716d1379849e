use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::aggregate::{FlaggedResult, ProviderSummary};
use crate::benchmark::BenchmarkRun;
use crate::probe::{Failure, Measured};
use crate::store::StoredRun;

/// Print with timestamp prefix
macro_rules! output {
    () => {
        let now = chrono::Utc::now();
        println!("{}", now.to_rfc3339_opts(chrono::SecondsFormat::Millis, false));
    };
    ($($arg:tt)*) => {{
        let now = chrono::Utc::now();
        print!("{} ", now.to_rfc3339_opts(chrono::SecondsFormat::Millis, false));
        println!($($arg)*);
    }};
}

const NO_DATA: &str = "no data";

/// Text of the first choice's message, pulled from a raw response body.
/// Anything unparsable yields empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageParts {
    pub content: String,
    pub reasoning_content: String,
}

#[derive(Debug, Default, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Default, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

impl MessageParts {
    pub fn from_raw(raw: &str) -> Self {
        let Ok(response) = serde_json::from_str::<ChatCompletionResponse>(raw) else {
            return Self::default();
        };
        let Some(message) = response.choices.into_iter().next().and_then(|c| c.message) else {
            return Self::default();
        };
        Self {
            content: message.content.unwrap_or_default(),
            reasoning_content: message.reasoning_content.unwrap_or_default(),
        }
    }
}

/// One row of a round table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowView {
    pub provider_key: String,
    pub display_name: String,
    pub tokens_per_second: Measured<f64>,
    pub completion_tokens: Measured<u64>,
    pub elapsed_seconds: f64,
    pub request_sent_at: DateTime<Utc>,
    pub response_received_at: DateTime<Utc>,
    pub is_outlier: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageParts>,
}

impl RowView {
    fn from_flagged(flagged: &FlaggedResult, with_response: bool) -> Self {
        let result = &flagged.result;
        Self {
            provider_key: result.provider_key.clone(),
            display_name: result.display_name.clone(),
            tokens_per_second: result.tokens_per_second,
            completion_tokens: result.completion_tokens,
            elapsed_seconds: result.elapsed_seconds,
            request_sent_at: result.request_sent_at,
            response_received_at: result.response_received_at,
            is_outlier: flagged.is_outlier,
            raw_response: with_response.then(|| result.raw_response.clone()),
            message: with_response.then(|| MessageParts::from_raw(&result.raw_response)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundView {
    pub round: u32,
    pub rows: Vec<RowView>,
}

/// Presentation form of a run: round tables plus the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub prompt: String,
    pub rounds: Vec<RoundView>,
    pub summary: Vec<ProviderSummary>,
}

impl RunView {
    /// Round rows are ordered fastest first, failures last.
    pub fn new(id: Option<u64>, run: &BenchmarkRun, with_response: bool) -> Self {
        let rounds = run
            .rounds
            .iter()
            .map(|round| {
                let mut rows: Vec<RowView> = round
                    .results
                    .iter()
                    .map(|flagged| RowView::from_flagged(flagged, with_response))
                    .collect();
                rows.sort_by(|a, b| {
                    let a = a.tokens_per_second.value().unwrap_or(f64::NEG_INFINITY);
                    let b = b.tokens_per_second.value().unwrap_or(f64::NEG_INFINITY);
                    b.total_cmp(&a)
                });
                RoundView {
                    round: round.round,
                    rows,
                }
            })
            .collect();

        Self {
            id,
            started_at: run.started_at,
            finished_at: run.finished_at,
            prompt: run.prompt.clone(),
            rounds,
            summary: run.summary.clone(),
        }
    }

    pub fn from_stored(stored: &StoredRun) -> Self {
        Self::new(Some(stored.id), &stored.run, true)
    }
}

pub fn format_measured_f64(value: &Measured<f64>) -> String {
    match value {
        Measured::Value(v) => format!("{:.2}", v),
        Measured::Failed(failure) => format_failure(*failure).to_string(),
    }
}

pub fn format_measured_u64(value: &Measured<u64>) -> String {
    match value {
        Measured::Value(v) => v.to_string(),
        Measured::Failed(failure) => format_failure(*failure).to_string(),
    }
}

fn format_failure(failure: Failure) -> &'static str {
    match failure {
        Failure::Error => "Error",
        Failure::Timeout => "Timeout",
    }
}

pub fn format_average(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => NO_DATA.to_string(),
    }
}

/// Prints every round table and the summary to stdout.
pub fn print_console_report(run: &BenchmarkRun) {
    let view = RunView::new(None, run, false);

    output!();
    output!("-----");
    output!("Benchmark Complete");
    output!(
        "Duration: {:.1}s",
        (run.finished_at - run.started_at).num_milliseconds() as f64 / 1000.0
    );
    output!("Prompt: {}", run.prompt);

    for round in &view.rounds {
        output!();
        output!("Round {}", round.round);
        output!(
            "{:<28} {:>12} {:>12} {:>10} {:>8}",
            "Provider", "Tokens/s", "Tokens", "Time (s)", "Outlier"
        );
        for row in &round.rows {
            output!(
                "{:<28} {:>12} {:>12} {:>10.2} {:>8}",
                row.display_name,
                format_measured_f64(&row.tokens_per_second),
                format_measured_u64(&row.completion_tokens),
                row.elapsed_seconds,
                if row.is_outlier { "yes" } else { "" }
            );
        }
    }

    output!();
    output!("Summary");
    output!(
        "{:<28} {:>12} {:>12} {:>10} {:>8}",
        "Provider", "Avg Tok/s", "Avg Tokens", "Avg Time", "Outliers"
    );
    for row in &view.summary {
        output!(
            "{:<28} {:>12} {:>12} {:>10} {:>8}",
            row.display_name,
            format_average(row.avg_tokens_per_second, 2),
            format_average(row.avg_completion_tokens, 0),
            format_average(row.avg_elapsed_seconds, 2),
            row.outlier_count
        );
    }
}

/// Writes the round tables and summary, without response bodies, to a
/// timestamped JSON file in `dir`. Returns the file path.
pub async fn export(run: &BenchmarkRun, dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let filename = format!(
        "test_results_{}.json",
        Local::now().format("%Y%m%d_%H%M%S")
    );
    let path = dir.join(filename);

    let view = RunView::new(None, run, false);
    let json = serde_json::to_string_pretty(&view)?;
    tokio::fs::write(&path, json).await?;

    info!("Exported {} round tables and summary to {}", view.rounds.len(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_parts_extraction() {
        let raw = r#"{"choices":[{"message":{"content":"A poem","reasoning_content":"thinking"}}],"usage":{"completion_tokens":3}}"#;
        let parts = MessageParts::from_raw(raw);
        assert_eq!(parts.content, "A poem");
        assert_eq!(parts.reasoning_content, "thinking");

        assert_eq!(
            MessageParts::from_raw("ConnectionError: refused"),
            MessageParts::default()
        );
        assert_eq!(
            MessageParts::from_raw(r#"{"choices":[]}"#),
            MessageParts::default()
        );
    }

    #[test]
    fn test_sentinel_and_no_data_formatting() {
        assert_eq!(format_measured_f64(&Measured::Value(12.345)), "12.35");
        assert_eq!(format_measured_f64(&Measured::Failed(Failure::Error)), "Error");
        assert_eq!(format_measured_u64(&Measured::Failed(Failure::Timeout)), "Timeout");
        assert_eq!(format_average(None, 2), "no data");
        assert_eq!(format_average(Some(0.0), 2), "0.00");
    }
}
