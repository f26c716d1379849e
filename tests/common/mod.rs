#![allow(dead_code)]

use provider_bench::ProviderConfig;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};

/// How a mock provider answers every chat completion.
#[derive(Debug, Clone)]
pub enum Behavior {
    Reply {
        completion_tokens: u64,
        delay: Duration,
    },
    Status(u16),
}

impl Behavior {
    pub fn fast(completion_tokens: u64) -> Self {
        Behavior::Reply {
            completion_tokens,
            delay: Duration::from_millis(20),
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Behavior::Reply {
            completion_tokens: 50,
            delay,
        }
    }
}

/// Serves an OpenAI-style completions endpoint on an ephemeral port.
pub async fn spawn_provider(behavior: Behavior) -> SocketAddr {
    let route = warp::path!("v1" / "chat" / "completions")
        .and(warp::post())
        .and(warp::body::json::<Value>())
        .and_then(move |request: Value| {
            let behavior = behavior.clone();
            async move { Ok::<Response, Infallible>(respond(behavior, request).await) }
        });

    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

async fn respond(behavior: Behavior, request: Value) -> Response {
    match behavior {
        Behavior::Reply {
            completion_tokens,
            delay,
        } => {
            tokio::time::sleep(delay).await;
            let body = json!({
                "model": request["model"],
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "Tick tock, a poem",
                        "reasoning_content": "counting syllables"
                    }
                }],
                "usage": {"completion_tokens": completion_tokens}
            });
            warp::reply::json(&body).into_response()
        }
        Behavior::Status(code) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            warp::reply::with_status("upstream failure", status).into_response()
        }
    }
}

pub fn completions_url(addr: SocketAddr) -> String {
    format!("http://{}/v1/chat/completions", addr)
}

/// A URL nothing listens on.
pub fn refused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    completions_url(addr)
}

pub fn provider(key: &str, url: String) -> ProviderConfig {
    ProviderConfig {
        key: key.to_string(),
        display_name: format!("{} display", key),
        url,
        api_key: "sk-test".to_string(),
        model: None,
    }
}
