use log::{error, info};
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};

use crate::benchmark::{BenchmarkRunner, StartOutcome};
use crate::prompt::PromptTemplate;
use crate::report::RunView;

/// Shared handles served by the admin routes.
#[derive(Debug, Clone)]
pub struct AdminContext {
    pub runner: BenchmarkRunner,
    pub prompt: PromptTemplate,
    /// Probe timeout in seconds when `/start_test` gives none
    pub default_timeout: u64,
}

#[derive(Debug, Deserialize)]
struct StartQuery {
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PromptQuery {
    prompt: Option<String>,
}

/// Start the HTTP admin server
pub async fn start_server(addr: SocketAddr, ctx: AdminContext) {
    info!("Starting admin server on {}", addr);
    warp::serve(routes(ctx)).run(addr).await;
}

pub fn routes(
    ctx: AdminContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    start_test_endpoint(ctx.clone())
        .or(update_prompt_endpoint(ctx.clone()))
        .or(progress_endpoint(ctx.clone()))
        .or(history_endpoint(ctx.clone()))
        .or(result_endpoint(ctx.clone()))
        .or(latest_endpoint(ctx))
        .or(metrics_endpoint())
        .or(vars_json_endpoint())
}

fn with_context(ctx: AdminContext) -> impl Filter<Extract = (AdminContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

/// GET /start_test?timeout=N
fn start_test_endpoint(
    ctx: AdminContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("start_test")
        .and(warp::get())
        .and(warp::query::<StartQuery>())
        .and(with_context(ctx))
        .and_then(start_test)
}

/// GET /update_prompt?prompt=...
fn update_prompt_endpoint(
    ctx: AdminContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("update_prompt")
        .and(warp::get())
        .and(warp::query::<PromptQuery>())
        .and(with_context(ctx))
        .and_then(update_prompt)
}

/// GET /test_progress - progress snapshot as JSON
fn progress_endpoint(
    ctx: AdminContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("test_progress")
        .and(warp::get())
        .and(with_context(ctx))
        .map(|ctx: AdminContext| warp::reply::json(&ctx.runner.progress()))
}

/// GET /history - stored runs, newest first
fn history_endpoint(
    ctx: AdminContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("history")
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(history)
}

/// GET /result/{id}
fn result_endpoint(
    ctx: AdminContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("result" / u64)
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(result_detail)
}

/// GET /latest
fn latest_endpoint(
    ctx: AdminContext,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("latest")
        .and(warp::get())
        .and(with_context(ctx))
        .and_then(latest)
}

/// GET /metrics - Prometheus/OpenMetrics format
fn metrics_endpoint() -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone
{
    warp::path!("metrics")
        .and(warp::get())
        .and_then(prometheus_metrics)
}

/// GET /vars.json - JSON format
fn vars_json_endpoint()
-> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    warp::path!("vars.json")
        .and(warp::get())
        .and_then(json_metrics)
}

async fn start_test(query: StartQuery, ctx: AdminContext) -> Result<Response, Infallible> {
    let timeout = query
        .timeout
        .filter(|t| *t > 0)
        .unwrap_or(ctx.default_timeout);
    info!("Benchmark requested over HTTP, timeout {}s", timeout);

    let reply = match ctx
        .runner
        .start(Duration::from_secs(timeout), ctx.prompt.render())
    {
        StartOutcome::Accepted => {
            warp::reply::with_status("Benchmark started in background", StatusCode::ACCEPTED)
        }
        StartOutcome::AlreadyRunning => warp::reply::with_status(
            "A benchmark is already running, try again later",
            StatusCode::CONFLICT,
        ),
    };
    Ok(reply.into_response())
}

async fn update_prompt(query: PromptQuery, ctx: AdminContext) -> Result<Response, Infallible> {
    match query.prompt.filter(|p| !p.trim().is_empty()) {
        Some(prompt) => {
            info!("Prompt updated to: {}", prompt);
            ctx.prompt.set(prompt);
            Ok(warp::reply::with_status("Prompt updated", StatusCode::OK).into_response())
        }
        None => Ok(
            warp::reply::with_status("Missing prompt parameter", StatusCode::BAD_REQUEST)
                .into_response(),
        ),
    }
}

async fn history(ctx: AdminContext) -> Result<Response, Infallible> {
    let Some(store) = ctx.runner.store() else {
        return Ok(warp::reply::json(&Vec::<()>::new()).into_response());
    };
    match store.list().await {
        Ok(entries) => Ok(warp::reply::json(&entries).into_response()),
        Err(e) => Ok(store_error(e)),
    }
}

async fn result_detail(id: u64, ctx: AdminContext) -> Result<Response, Infallible> {
    let Some(store) = ctx.runner.store() else {
        return Ok(not_found());
    };
    match store.get(id).await {
        Ok(Some(stored)) => Ok(warp::reply::json(&RunView::from_stored(&stored)).into_response()),
        Ok(None) => Ok(not_found()),
        Err(e) => Ok(store_error(e)),
    }
}

async fn latest(ctx: AdminContext) -> Result<Response, Infallible> {
    let Some(store) = ctx.runner.store() else {
        return Ok(not_found());
    };
    match store.latest().await {
        Ok(Some(stored)) => Ok(warp::reply::json(&RunView::from_stored(&stored)).into_response()),
        Ok(None) => Ok(not_found()),
        Err(e) => Ok(store_error(e)),
    }
}

fn not_found() -> Response {
    warp::reply::with_status("No such run", StatusCode::NOT_FOUND).into_response()
}

fn store_error(e: anyhow::Error) -> Response {
    error!("Run store error: {:#}", e);
    warp::reply::with_status("Run store unavailable", StatusCode::INTERNAL_SERVER_ERROR)
        .into_response()
}

fn histogram_percentiles(histogram: &metriken::AtomicHistogram) -> Vec<(f64, u64)> {
    let percentiles = [50.0, 90.0, 95.0, 99.0, 99.9];
    histogram
        .load()
        .and_then(|loaded| loaded.percentiles(&percentiles).ok().flatten())
        .map(|values| {
            values
                .iter()
                .map(|(percentile, bucket)| (*percentile, bucket.end()))
                .collect()
        })
        .unwrap_or_default()
}

async fn prometheus_metrics() -> Result<impl warp::Reply, Infallible> {
    use metriken::Value;

    let mut lines = Vec::new();

    for metric in &metriken::metrics() {
        let name = metric.name().replace('/', "_");

        match metric.value() {
            Some(Value::Counter(value)) => {
                let help = metric
                    .description()
                    .map(|d| format!("# HELP {} {}\n", name, d))
                    .unwrap_or_default();
                lines.push(format!("# TYPE {} counter\n{}{} {}", name, help, name, value));
            }
            Some(Value::Gauge(value)) => {
                let help = metric
                    .description()
                    .map(|d| format!("# HELP {} {}\n", name, d))
                    .unwrap_or_default();
                lines.push(format!("# TYPE {} gauge\n{}{} {}", name, help, name, value));
            }
            Some(Value::Other(other)) => {
                if let Some(histogram) = other.downcast_ref::<metriken::AtomicHistogram>() {
                    for (percentile, value) in histogram_percentiles(histogram) {
                        lines.push(format!(
                            "# TYPE {} gauge\n{}{{percentile=\"{}\"}} {}",
                            name, name, percentile, value
                        ));
                    }
                }
            }
            _ => continue,
        }
    }

    lines.sort();
    let content = lines.join("\n") + "\n# EOF\n";
    Ok(warp::reply::with_header(
        content,
        "content-type",
        "text/plain; version=0.0.4; charset=utf-8",
    ))
}

async fn json_metrics() -> Result<impl warp::Reply, Infallible> {
    use metriken::Value;
    use serde_json::json;

    let mut metrics = serde_json::Map::new();

    for metric in &metriken::metrics() {
        let name = metric.name();

        match metric.value() {
            Some(Value::Counter(value)) => {
                metrics.insert(name.to_string(), json!(value));
            }
            Some(Value::Gauge(value)) => {
                metrics.insert(name.to_string(), json!(value));
            }
            Some(Value::Other(other)) => {
                if let Some(histogram) = other.downcast_ref::<metriken::AtomicHistogram>() {
                    for (percentile, value) in histogram_percentiles(histogram) {
                        let key = format!("{}/p{}", name, (percentile * 10.0) as u32);
                        metrics.insert(key, json!(value));
                    }
                }
            }
            _ => continue,
        }
    }

    Ok(warp::reply::json(&metrics))
}
