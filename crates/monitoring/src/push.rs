//! Push of per-run metrics to a Prometheus push gateway

use anyhow::{Result, anyhow};
use prometheus::{Encoder, Gauge, Opts, Registry, TextEncoder};
use regex::Regex;
use reqwest::Client;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const METRIC_NAMESPACE: &str = "discover_dealer_cron_";

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub url: String,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub max_retries: usize,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub http_timeout_secs: u64,
}

impl PushConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: None,
            pass: None,
            max_retries: 3,
            initial_backoff_secs: 1,
            max_backoff_secs: 4,
            http_timeout_secs: 10,
        }
    }

    pub fn with_basic_auth(mut self, user: Option<String>, pass: Option<String>) -> Self {
        self.user = user.filter(|u| !u.is_empty());
        self.pass = pass.filter(|p| !p.is_empty());
        self
    }
}

/// Metric prefix and push-gateway job name for a stage.
pub fn metric_prefix(stage: &str) -> Result<String> {
    let separators = Regex::new(r"[^a-zA-Z0-9]+")?;
    Ok(separators
        .replace_all(&format!("{}{}", METRIC_NAMESPACE, stage), "_")
        .into_owned())
}

/// Render the run-time and success gauges in the text exposition format.
pub fn encode_run_metrics(prefix: &str, took: Duration, success: bool) -> Result<String> {
    let registry = Registry::new();

    let took_gauge = Gauge::with_opts(Opts::new(
        format!("{}_run_time", prefix),
        "How long did the job take (in milliseconds)",
    ))?;
    took_gauge.set(took.as_millis() as f64);
    registry.register(Box::new(took_gauge))?;

    let success_gauge = Gauge::with_opts(Opts::new(
        format!("{}_success", prefix),
        "Whether the job completed with success(1) or failure(0)",
    ))?;
    success_gauge.set(if success { 1.0 } else { 0.0 });
    registry.register(Box::new(success_gauge))?;

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| anyhow!("Metrics encoding is not UTF-8: {}", e))
}

pub struct PushGateway {
    client: Client,
    config: PushConfig,
}

impl PushGateway {
    pub fn new(config: PushConfig) -> Result<Self> {
        if config.url.is_empty() {
            return Err(anyhow!("Push gateway URL is empty"));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;
        Ok(Self { client, config })
    }

    /// Replace the metrics of the stage's job group with this run's values.
    ///
    /// Network errors and 5xx responses are retried with exponential backoff;
    /// 4xx responses are returned immediately.
    pub async fn push_run(&self, stage: &str, took: Duration, success: bool) -> Result<()> {
        let prefix = metric_prefix(stage)?;
        let body = encode_run_metrics(&prefix, took, success)?;
        let url = format!(
            "{}/metrics/job/{}",
            self.config.url.trim_end_matches('/'),
            prefix
        );

        let mut last_error = None;
        for attempt in 0..self.config.max_retries {
            debug!(
                "Pushing run metrics to {} (attempt {}/{})",
                url,
                attempt + 1,
                self.config.max_retries
            );

            match self.send(&url, &body).await {
                Ok(()) => return Ok(()),
                Err(PushError::Permanent(e)) => return Err(e),
                Err(PushError::Transient(e)) => {
                    if attempt + 1 < self.config.max_retries {
                        let backoff_secs = (self.config.initial_backoff_secs * 2_u64.pow(attempt as u32))
                            .min(self.config.max_backoff_secs);
                        warn!(
                            "Failed to push metrics (attempt {}/{}): {}. Retrying in {}s...",
                            attempt + 1,
                            self.config.max_retries,
                            e,
                            backoff_secs
                        );
                        sleep(Duration::from_secs(backoff_secs)).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let final_error = last_error.ok_or_else(|| anyhow!("Metrics push made no attempts"))?;
        Err(anyhow!(
            "Failed to push metrics after {} attempts: {}",
            self.config.max_retries,
            final_error
        ))
    }

    async fn send(&self, url: &str, body: &str) -> std::result::Result<(), PushError> {
        let mut request = self
            .client
            .put(url)
            .header("Content-Type", TextEncoder::new().format_type())
            .body(body.to_string());
        if let Some(user) = &self.config.user {
            request = request.basic_auth(user, self.config.pass.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| PushError::Transient(anyhow!("Failed to send HTTP request: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error (failed to read response body)".to_string());
        let error = anyhow!("status {}: {}", status, error_text);
        if status.is_client_error() {
            Err(PushError::Permanent(error))
        } else {
            Err(PushError::Transient(error))
        }
    }
}

enum PushError {
    Transient(anyhow::Error),
    Permanent(anyhow::Error),
}
