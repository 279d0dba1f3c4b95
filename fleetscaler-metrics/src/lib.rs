use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const TOTAL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("metrics endpoint returned status {0}")]
    NonSuccess(reqwest::StatusCode),

    #[error("metrics endpoint reported an error: {0}")]
    RemoteError(String),
}

impl From<MetricsError> for fleetscaler_core::ControllerError {
    fn from(err: MetricsError) -> Self {
        fleetscaler_core::ControllerError::Metrics(err.to_string())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSample {
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

#[derive(Debug, Deserialize)]
struct MetricsResponse {
    cpu_utilization_percent: f64,
    memory_utilization_percent: f64,
    #[serde(default)]
    #[allow(dead_code)]
    status: String,
    #[serde(default)]
    error: String,
}

/// Client for an agent's telemetry endpoint. Builds its own `reqwest::Client`
/// with a bounded total timeout rather than relying on the caller to race it.
pub struct MetricsClient {
    http: Client,
}

impl Default for MetricsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsClient {
    pub fn new() -> Self {
        let http = Client::builder()
            .timeout(TOTAL_TIMEOUT)
            .build()
            .expect("reqwest client with a fixed timeout always builds");
        Self { http }
    }

    pub async fn get_metrics(&self, telemetry_url: &str) -> Result<MetricsSample, MetricsError> {
        let response = self.http.get(telemetry_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MetricsError::NonSuccess(status));
        }

        let parsed: MetricsResponse = response.json().await?;
        if !parsed.error.is_empty() {
            return Err(MetricsError::RemoteError(parsed.error));
        }

        Ok(MetricsSample {
            cpu_percent: parsed.cpu_utilization_percent,
            mem_percent: parsed.memory_utilization_percent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tokio::net::TcpListener;

    async fn spawn_http_double(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = stream.into_std().unwrap();
            stream.set_nonblocking(false).unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(response.as_bytes());
        });

        format!("http://{addr}")
    }

    #[tokio::test]
    async fn get_metrics_parses_a_healthy_sample() {
        let body = "{\"cpu_utilization_percent\":42.5,\"memory_utilization_percent\":10.0,\"status\":\"active\"}";
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let base = spawn_http_double(Box::leak(response.into_boxed_str())).await;
        let client = MetricsClient::new();
        let sample = client.get_metrics(&base).await.unwrap();
        assert_eq!(sample.cpu_percent, 42.5);
        assert_eq!(sample.mem_percent, 10.0);
    }

    #[tokio::test]
    async fn get_metrics_errors_on_non_empty_error_field() {
        let body = "{\"cpu_utilization_percent\":0,\"memory_utilization_percent\":0,\"status\":\"degraded\",\"error\":\"sensor offline\"}";
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let base = spawn_http_double(Box::leak(response.into_boxed_str())).await;
        let client = MetricsClient::new();
        let err = client.get_metrics(&base).await.unwrap_err();
        match err {
            MetricsError::RemoteError(msg) => assert_eq!(msg, "sensor offline"),
            other => panic!("expected RemoteError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_metrics_errors_on_non_200() {
        let base = spawn_http_double("HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n").await;
        let client = MetricsClient::new();
        let err = client.get_metrics(&base).await.unwrap_err();
        assert!(matches!(err, MetricsError::NonSuccess(_)));
    }
}
