//! Outlier filtering and per-provider aggregation of probe results.
//!
//! Records without a usable tokens/s figure (errors, timeouts, empty
//! completions) are always outliers. The rest are screened per provider
//! with Tukey fences, `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`, and the summary
//! averages only what survives.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::probe::ProbeResult;

const FENCE_FACTOR: f64 = 1.5;

/// A probe result with its outlier verdict attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedResult {
    #[serde(flatten)]
    pub result: ProbeResult,
    pub is_outlier: bool,
}

/// Filtered averages for one provider. `None` means no data survived the
/// filter, which is distinct from a measured zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub provider_key: String,
    pub display_name: String,
    pub avg_completion_tokens: Option<f64>,
    pub avg_elapsed_seconds: Option<f64>,
    pub avg_tokens_per_second: Option<f64>,
    pub outlier_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    /// Input records in input order, each flagged
    pub results: Vec<FlaggedResult>,
    /// One row per provider, fastest average tokens/s first
    pub summary: Vec<ProviderSummary>,
}

/// Flags outliers and summarizes per provider. Pure: the same input always
/// yields the same output.
pub fn aggregate(results: &[ProbeResult]) -> Aggregation {
    let flags = flag_outliers(results);

    let mut summary = Vec::new();
    for (key, indices) in group_by_provider(results) {
        let kept: Vec<&ProbeResult> = indices
            .iter()
            .filter(|&&i| !flags[i])
            .map(|&i| &results[i])
            .collect();

        summary.push(ProviderSummary {
            provider_key: key.to_string(),
            display_name: results[indices[0]].display_name.clone(),
            avg_completion_tokens: mean(
                kept.iter()
                    .filter_map(|r| r.completion_tokens.value())
                    .map(|tokens| tokens as f64),
            ),
            avg_elapsed_seconds: mean(kept.iter().map(|r| r.elapsed_seconds)),
            avg_tokens_per_second: mean(kept.iter().filter_map(|r| r.tokens_per_second.value())),
            outlier_count: indices.iter().filter(|&&i| flags[i]).count(),
        });
    }

    summary.sort_by(|a, b| descending(a.avg_tokens_per_second, b.avg_tokens_per_second));

    Aggregation {
        results: results
            .iter()
            .zip(flags)
            .map(|(result, is_outlier)| FlaggedResult {
                result: result.clone(),
                is_outlier,
            })
            .collect(),
        summary,
    }
}

/// Outlier flag for each input record, by index.
pub fn flag_outliers(results: &[ProbeResult]) -> Vec<bool> {
    let mut flags: Vec<bool> = results.iter().map(|r| !r.has_valid_throughput()).collect();

    for (_, indices) in group_by_provider(results) {
        let mut valid: Vec<f64> = indices
            .iter()
            .filter(|&&i| !flags[i])
            .filter_map(|&i| results[i].tokens_per_second.value())
            .collect();
        if valid.is_empty() {
            continue;
        }
        valid.sort_by(f64::total_cmp);

        let (lower, upper) = fences(&valid);
        for &i in &indices {
            if let Some(tps) = results[i].tokens_per_second.value()
                && (tps < lower || tps > upper)
            {
                flags[i] = true;
            }
        }
    }

    flags
}

/// Tukey fences over sorted, non-empty samples.
pub fn fences(sorted: &[f64]) -> (f64, f64) {
    let q1 = quartile(sorted, 0.25);
    let q3 = quartile(sorted, 0.75);
    let iqr = q3 - q1;
    (q1 - FENCE_FACTOR * iqr, q3 + FENCE_FACTOR * iqr)
}

/// Nearest-rank quantile on the `(n - 1)` index grid, ties toward the
/// lower rank. Unlike interpolation, this lets a single extreme value in a
/// three-sample group fall outside the upper fence.
pub fn quartile(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let last = sorted.len() - 1;
    let position = p * last as f64;
    let index = ((position - 0.5).ceil().max(0.0) as usize).min(last);
    sorted[index]
}

// Provider keys in first-appearance order, with the indices of their records.
fn group_by_provider(results: &[ProbeResult]) -> Vec<(&str, Vec<usize>)> {
    let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();
    for (i, result) in results.iter().enumerate() {
        match groups
            .iter_mut()
            .find(|(key, _)| *key == result.provider_key)
        {
            Some((_, indices)) => indices.push(i),
            None => groups.push((result.provider_key.as_str(), vec![i])),
        }
    }
    groups
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

// Larger first; "no data" after every number.
fn descending(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
