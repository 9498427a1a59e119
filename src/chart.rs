use crate::benchmark::BenchmarkSummary;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const DEFAULT_CHART_BASE_URL: &str = "https://quickchart.io/chart";

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("invalid chart base url '{url}': {detail}")]
    InvalidBaseUrl { url: String, detail: String },
    #[error("chart request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to write chart {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartLinks {
    pub time: Url,
    pub usage: Url,
}

impl ChartLinks {
    pub fn for_summary(summary: &BenchmarkSummary, base_url: &str) -> Result<Self, ChartError> {
        Ok(Self {
            time: time_chart_url(summary, base_url)?,
            usage: usage_chart_url(summary, base_url)?,
        })
    }
}

pub fn time_chart_url(summary: &BenchmarkSummary, base_url: &str) -> Result<Url, ChartError> {
    let config = bar_chart(
        &["Execution time (ms)"],
        "Time",
        &[summary.execution_time_ms],
    );
    chart_url(base_url, &config)
}

/// Absent GPU and process values are drawn as zero-height bars.
pub fn usage_chart_url(summary: &BenchmarkSummary, base_url: &str) -> Result<Url, ChartError> {
    let config = bar_chart(
        &[
            "Memory usage (MB)",
            "CPU usage (%)",
            "GPU usage (%)",
            "GPU temperature (°C)",
            "GPU memory usage (MB)",
            "Process memory usage (MB)",
        ],
        "Usage",
        &[
            summary.memory_usage_mb,
            summary.cpu_usage_percent,
            summary.gpu_usage_percent.unwrap_or(0.0),
            summary.gpu_temperature.unwrap_or(0.0),
            summary.gpu_memory_usage_mb.unwrap_or(0.0),
            summary.process_memory_usage_mb.unwrap_or(0.0),
        ],
    );
    chart_url(base_url, &config)
}

fn bar_chart(labels: &[&str], dataset: &str, data: &[f64]) -> Value {
    json!({
        "type": "bar",
        "data": {
            "labels": labels,
            "datasets": [{
                "label": dataset,
                "data": data,
            }]
        }
    })
}

fn chart_url(base_url: &str, config: &Value) -> Result<Url, ChartError> {
    Url::parse_with_params(base_url, &[("c", config.to_string())]).map_err(|err| {
        ChartError::InvalidBaseUrl {
            url: base_url.to_string(),
            detail: err.to_string(),
        }
    })
}

/// Fetches both images into `dir` as `time_chart.png` and `usage_chart.png`.
pub async fn download_charts(
    client: &Client,
    links: &ChartLinks,
    dir: &Path,
    timeout: Duration,
) -> Result<Vec<PathBuf>, ChartError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| ChartError::Write {
            path: dir.display().to_string(),
            source,
        })?;

    let mut written = Vec::with_capacity(2);
    for (name, url) in [("time_chart.png", &links.time), ("usage_chart.png", &links.usage)] {
        let bytes = client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let path = dir.join(name);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| ChartError::Write {
                path: path.display().to_string(),
                source,
            })?;
        info!(path = %path.display(), bytes = bytes.len(), "chart saved");
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> BenchmarkSummary {
        BenchmarkSummary {
            execution_time_ms: 12.5,
            memory_usage_mb: 0.25,
            cpu_usage_percent: -3.0,
            gpu_usage_percent: None,
            gpu_temperature: Some(61.0),
            gpu_memory_usage_mb: None,
            process_memory_usage_mb: Some(42.0),
        }
    }

    fn decoded_config(url: &Url) -> Value {
        let (_, raw) = url
            .query_pairs()
            .find(|(k, _)| k == "c")
            .expect("c parameter");
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn time_chart_carries_execution_time() {
        let url = time_chart_url(&summary(), DEFAULT_CHART_BASE_URL).unwrap();
        assert!(url.as_str().starts_with("https://quickchart.io/chart?c="));

        let config = decoded_config(&url);
        assert_eq!(config["type"], "bar");
        assert_eq!(config["data"]["labels"][0], "Execution time (ms)");
        assert_eq!(config["data"]["datasets"][0]["data"][0], 12.5);
    }

    #[test]
    fn usage_chart_plots_absent_gpu_values_as_zero() {
        let url = usage_chart_url(&summary(), DEFAULT_CHART_BASE_URL).unwrap();
        let config = decoded_config(&url);
        let data = config["data"]["datasets"][0]["data"].as_array().unwrap();

        assert_eq!(data.len(), 6);
        assert_eq!(data[2], 0.0);
        assert_eq!(data[3], 61.0);
        assert_eq!(data[4], 0.0);
        assert_eq!(data[5], 42.0);
    }

    #[test]
    fn invalid_base_url_is_reported() {
        let err = ChartLinks::for_summary(&summary(), "not a url").unwrap_err();
        assert!(matches!(err, ChartError::InvalidBaseUrl { .. }));
    }
}
