//! Built-in tasks registered by the `tempo` binary

use serde::Deserialize;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tempo_core::domain::job::TaskParams;
use tokio::net::TcpStream;
use tracing::{info, warn};

use super::{InMemoryTaskRegistry, decode_params};

/// Registers `noop`, `echo`, `sleep`, `fail` and `ping`
pub fn register_builtin(registry: &mut InMemoryTaskRegistry) {
    registry
        .register("noop", noop)
        .register("echo", echo)
        .register("sleep", sleep)
        .register("fail", fail)
        .register("ping", ping);
}

async fn noop(_params: TaskParams, _previous: Option<Value>) -> anyhow::Result<Value> {
    Ok(Value::Null)
}

/// Returns its parameters, with the previous job's metadata under `previous`
async fn echo(params: TaskParams, previous: Option<Value>) -> anyhow::Result<Value> {
    let mut output: serde_json::Map<String, Value> = params.into_iter().collect();
    if let Some(previous) = previous {
        output.insert("previous".to_string(), previous);
    }
    Ok(Value::Object(output))
}

#[derive(Debug, Deserialize)]
struct SleepParams {
    #[serde(default)]
    secs: Option<u64>,
    #[serde(default)]
    millis: Option<u64>,
}

async fn sleep(params: TaskParams, _previous: Option<Value>) -> anyhow::Result<Value> {
    let params: SleepParams = decode_params(&params)?;
    let duration = match (params.secs, params.millis) {
        (Some(secs), _) => Duration::from_secs(secs),
        (None, Some(millis)) => Duration::from_millis(millis),
        (None, None) => anyhow::bail!("sleep requires either 'secs' or 'millis'"),
    };
    tokio::time::sleep(duration).await;
    Ok(json!({ "slept_ms": duration.as_millis() as u64 }))
}

#[derive(Debug, Deserialize)]
struct FailParams {
    #[serde(default)]
    message: Option<String>,
}

async fn fail(params: TaskParams, _previous: Option<Value>) -> anyhow::Result<Value> {
    let params: FailParams = decode_params(&params)?;
    anyhow::bail!(params.message.unwrap_or_else(|| "task failed".to_string()))
}

fn default_port() -> u16 {
    80
}

fn default_attempts() -> u32 {
    3
}

fn default_connect_timeout_ms() -> u64 {
    300
}

#[derive(Debug, Deserialize)]
struct PingParams {
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_attempts")]
    attempts: u32,
    /// Failures at or above this count fail the task; defaults to `attempts`
    #[serde(default)]
    max_failures: Option<u32>,
    #[serde(default = "default_connect_timeout_ms")]
    timeout_ms: u64,
}

/// Opens a TCP connection to `host:port` a few times and counts failures
async fn ping(params: TaskParams, _previous: Option<Value>) -> anyhow::Result<Value> {
    let params: PingParams = decode_params(&params)?;
    let address = format!("{}:{}", params.host, params.port);
    let max_failures = params.max_failures.unwrap_or(params.attempts).max(1);
    let connect_timeout = Duration::from_millis(params.timeout_ms);

    let mut failures = 0;
    let mut latencies = Vec::new();
    for attempt in 1..=params.attempts {
        let started = Instant::now();
        match tokio::time::timeout(connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(_stream)) => {
                latencies.push(started.elapsed().as_secs_f64() * 1_000.0);
                info!(address = %address, attempt, "Ping ok");
            }
            Ok(Err(e)) => {
                failures += 1;
                warn!(address = %address, attempt, error = %e, "Ping failed");
            }
            Err(_) => {
                failures += 1;
                warn!(address = %address, attempt, "Ping timed out");
            }
        }
    }

    if failures >= max_failures {
        anyhow::bail!(
            "ping {address} failed {failures} time(s), allowed fewer than {max_failures}"
        );
    }

    let avg_latency_ms = if latencies.is_empty() {
        None
    } else {
        Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
    };
    Ok(json!({
        "address": address,
        "attempts": params.attempts,
        "failures": failures,
        "avg_latency_ms": avg_latency_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskRegistry;
    use tokio::net::TcpListener;

    fn params(value: Value) -> TaskParams {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_builtin_names() {
        let mut registry = InMemoryTaskRegistry::new();
        register_builtin(&mut registry);
        assert_eq!(
            registry.get_task_names(),
            vec!["echo", "fail", "noop", "ping", "sleep"]
        );
    }

    #[tokio::test]
    async fn test_echo_includes_previous() {
        let output = echo(params(json!({"a": 1})), Some(json!("prev")))
            .await
            .unwrap();
        assert_eq!(output, json!({"a": 1, "previous": "prev"}));
    }

    #[tokio::test]
    async fn test_sleep_requires_duration() {
        assert!(sleep(TaskParams::new(), None).await.is_err());
        let output = sleep(params(json!({"millis": 5})), None).await.unwrap();
        assert_eq!(output, json!({"slept_ms": 5}));
    }

    #[tokio::test]
    async fn test_fail_uses_message() {
        let err = fail(params(json!({"message": "boom"})), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_ping_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((_socket, _)) = listener.accept().await {}
        });

        let output = ping(
            params(json!({"host": "127.0.0.1", "port": port, "attempts": 2})),
            None,
        )
        .await
        .unwrap();
        assert_eq!(output["failures"], json!(0));
    }

    #[tokio::test]
    async fn test_ping_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = ping(
            params(json!({"host": "127.0.0.1", "port": port, "attempts": 1})),
            None,
        )
        .await;
        assert!(result.is_err());
    }
}
