//! Process configuration.
//!
//! Built once at startup from environment variables and passed explicitly (as
//! `Arc<RelayConfig>`) to the components that need it. Nothing reads the
//! environment after startup.

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

use hookrelay_core::{HttpMethod, Job, JobId};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:11434";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:11435";
pub const DEFAULT_TASK_QUEUE: &str = "ollama_webhooks";
const DEFAULT_SOFT_TIME_LIMIT_SECS: u64 = 120;
const HARD_LIMIT_GRACE_SECS: u64 = 30;
const DEFAULT_WEBHOOK_TIMEOUT_SECS: f64 = 5.0;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Configuration error. Fatal at startup, never a per-job condition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {var} ({value:?}): {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Immutable relay configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Inference backend base URL. Only scheme, authority and fragment are used.
    pub backend_url: Url,
    pub backend_timeout: Duration,
    pub webhook_url: Url,
    pub webhook_method: HttpMethod,
    pub webhook_timeout: Duration,
    /// A task running longer than this is reported as slow.
    pub task_soft_time_limit: Duration,
    /// A task running longer than this is aborted.
    pub task_time_limit: Duration,
    pub worker_concurrency: usize,
    pub worker_poll_interval: Duration,
    pub task_queue: String,
    /// `None` selects the in-memory store and queue.
    pub database_url: Option<String>,
    pub bind_addr: SocketAddr,
    /// Overrides the origin used in polling URLs.
    pub public_url: Option<Url>,
    pub max_body_bytes: usize,
    /// Run dispatch workers inside the API process.
    pub run_workers: bool,
}

impl RelayConfig {
    /// Load from the process environment, reading a `.env` file first if one
    /// exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env file");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend_url = match get("OLLAMA_URL") {
            Some(raw) => parse_http_url("OLLAMA_URL", &raw)?,
            None => parse_http_url("OLLAMA_URL", DEFAULT_BACKEND_URL)?,
        };

        let webhook_raw = get("WEBHOOK_URL").ok_or(ConfigError::Missing("WEBHOOK_URL"))?;
        let webhook_url = parse_http_url("WEBHOOK_URL", &webhook_raw)?;

        let webhook_method = match get("WEBHOOK_METHOD") {
            Some(raw) => raw
                .parse::<HttpMethod>()
                .map_err(|e| ConfigError::invalid("WEBHOOK_METHOD", &raw, e.to_string()))?,
            None => HttpMethod::Post,
        };

        let soft_secs = match get("TASK_SOFT_TIME_LIMIT") {
            Some(raw) => parse_number::<u64>("TASK_SOFT_TIME_LIMIT", &raw)?,
            None => DEFAULT_SOFT_TIME_LIMIT_SECS,
        };
        let hard_secs = match get("TASK_TIME_LIMIT") {
            Some(raw) => parse_number::<u64>("TASK_TIME_LIMIT", &raw)?,
            None => soft_secs + HARD_LIMIT_GRACE_SECS,
        };
        if hard_secs < soft_secs {
            return Err(ConfigError::invalid(
                "TASK_TIME_LIMIT",
                &hard_secs.to_string(),
                "must not be lower than TASK_SOFT_TIME_LIMIT",
            ));
        }

        let backend_timeout = match get("OLLAMA_TIMEOUT") {
            Some(raw) => parse_seconds("OLLAMA_TIMEOUT", &raw)?,
            None => Duration::from_secs(soft_secs),
        };
        let webhook_timeout = match get("WEBHOOK_TIMEOUT") {
            Some(raw) => parse_seconds("WEBHOOK_TIMEOUT", &raw)?,
            None => Duration::from_secs_f64(DEFAULT_WEBHOOK_TIMEOUT_SECS),
        };

        let worker_concurrency = match get("WORKER_CONCURRENCY") {
            Some(raw) => parse_number::<usize>("WORKER_CONCURRENCY", &raw)?,
            None => 1,
        };
        let worker_poll_interval = match get("WORKER_POLL_INTERVAL_MS") {
            Some(raw) => Duration::from_millis(parse_number::<u64>("WORKER_POLL_INTERVAL_MS", &raw)?),
            None => Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        };

        let bind_raw = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid("BIND_ADDR", &bind_raw, e.to_string()))?;

        let public_url = get("PUBLIC_URL")
            .map(|raw| parse_http_url("PUBLIC_URL", &raw))
            .transpose()?;

        let max_body_bytes = match get("MAX_BODY_BYTES") {
            Some(raw) => parse_number::<usize>("MAX_BODY_BYTES", &raw)?,
            None => DEFAULT_MAX_BODY_BYTES,
        };

        let run_workers = match get("RUN_WORKERS") {
            Some(raw) => parse_bool("RUN_WORKERS", &raw)?,
            None => true,
        };

        Ok(Self {
            backend_url,
            backend_timeout,
            webhook_url,
            webhook_method,
            webhook_timeout,
            task_soft_time_limit: Duration::from_secs(soft_secs),
            task_time_limit: Duration::from_secs(hard_secs),
            worker_concurrency,
            worker_poll_interval,
            task_queue: get("TASK_QUEUE").unwrap_or_else(|| DEFAULT_TASK_QUEUE.to_string()),
            database_url: get("DATABASE_URL"),
            bind_addr,
            public_url,
            max_body_bytes,
            run_workers,
        })
    }

    /// Backend URL for a job: the configured scheme, authority and fragment
    /// combined with the job's own path and raw query string.
    pub fn backend_url_for(&self, job: &Job) -> Url {
        let mut url = self.backend_url.clone();
        url.set_path(&job.request_path);
        if job.request_query.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&job.request_query));
        }
        url
    }

    /// Webhook URL for a job, with `job=<id>` appended to any existing query.
    pub fn webhook_url_for(&self, job_id: JobId) -> Url {
        let mut url = self.webhook_url.clone();
        url.query_pairs_mut().append_pair("job", &job_id.to_string());
        url
    }
}

fn parse_http_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| ConfigError::invalid(var, raw, e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        "http" | "https" => Err(ConfigError::invalid(var, raw, "URL has no host")),
        other => Err(ConfigError::invalid(
            var,
            raw,
            format!("unsupported scheme {other:?}, expected http or https"),
        )),
    }
}

fn parse_number<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(var, raw, e.to_string()))
}

fn parse_seconds(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let secs = parse_number::<f64>(var, raw)?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::invalid(var, raw, "must be a positive number of seconds"));
    }
    Ok(Duration::from_secs_f64(secs))
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(var, raw, "expected a boolean")),
    }
}

#[cfg(test)]
pub(crate) fn test_config(backend: &str, webhook: &str) -> RelayConfig {
    RelayConfig::from_lookup(|key| match key {
        "OLLAMA_URL" => Some(backend.to_string()),
        "WEBHOOK_URL" => Some(webhook.to_string()),
        "OLLAMA_TIMEOUT" => Some("2".to_string()),
        "WEBHOOK_TIMEOUT" => Some("2".to_string()),
        _ => None,
    })
    .expect("test config is valid")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use hookrelay_core::{HeaderList, NewJob};

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    fn job(path: &str, query: &str) -> Job {
        Job::create(
            JobId::new(),
            NewJob {
                method: HttpMethod::Get,
                path: path.to_string(),
                query: query.to_string(),
                headers: HeaderList::new(),
                body: Vec::new(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn webhook_url_is_required() {
        assert_eq!(load(&[]), Err(ConfigError::Missing("WEBHOOK_URL")));
        assert_eq!(load(&[("WEBHOOK_URL", "  ")]), Err(ConfigError::Missing("WEBHOOK_URL")));
    }

    #[test]
    fn defaults() {
        let config = load(&[("WEBHOOK_URL", "http://localhost:11436/")]).unwrap();
        assert_eq!(config.backend_url.as_str(), "http://localhost:11434/");
        assert_eq!(config.webhook_method, HttpMethod::Post);
        assert_eq!(config.webhook_timeout, Duration::from_secs(5));
        assert_eq!(config.task_soft_time_limit, Duration::from_secs(120));
        assert_eq!(config.task_time_limit, Duration::from_secs(150));
        assert_eq!(config.backend_timeout, Duration::from_secs(120));
        assert_eq!(config.worker_concurrency, 1);
        assert_eq!(config.task_queue, "ollama_webhooks");
        assert_eq!(config.database_url, None);
        assert_eq!(config.max_body_bytes, 10 * 1024 * 1024);
        assert!(config.run_workers);
    }

    #[test]
    fn backend_timeout_follows_soft_limit() {
        let config = load(&[("WEBHOOK_URL", "http://hooks"), ("TASK_SOFT_TIME_LIMIT", "10")]).unwrap();
        assert_eq!(config.backend_timeout, Duration::from_secs(10));
        assert_eq!(config.task_time_limit, Duration::from_secs(40));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            load(&[("WEBHOOK_URL", "ftp://hooks")]),
            Err(ConfigError::Invalid { var: "WEBHOOK_URL", .. })
        ));
        assert!(matches!(
            load(&[("WEBHOOK_URL", "http://hooks"), ("WEBHOOK_METHOD", "FETCH")]),
            Err(ConfigError::Invalid { var: "WEBHOOK_METHOD", .. })
        ));
        assert!(matches!(
            load(&[("WEBHOOK_URL", "http://hooks"), ("WEBHOOK_TIMEOUT", "-1")]),
            Err(ConfigError::Invalid { var: "WEBHOOK_TIMEOUT", .. })
        ));
        assert!(matches!(
            load(&[
                ("WEBHOOK_URL", "http://hooks"),
                ("TASK_SOFT_TIME_LIMIT", "60"),
                ("TASK_TIME_LIMIT", "30"),
            ]),
            Err(ConfigError::Invalid { var: "TASK_TIME_LIMIT", .. })
        ));
    }

    #[test]
    fn backend_url_takes_path_and_query_from_job() {
        let config = load(&[
            ("WEBHOOK_URL", "http://hooks"),
            ("OLLAMA_URL", "http://ollama:11434/ignored/base?x=1#frag"),
        ])
        .unwrap();

        let url = config.backend_url_for(&job("/api/generate", "stream=false"));
        assert_eq!(url.as_str(), "http://ollama:11434/api/generate?stream=false#frag");

        let url = config.backend_url_for(&job("/api/tags", ""));
        assert_eq!(url.as_str(), "http://ollama:11434/api/tags#frag");
    }

    #[test]
    fn webhook_url_appends_job_param() {
        let config = load(&[("WEBHOOK_URL", "https://hooks.example/ollama?token=abc")]).unwrap();
        let id = JobId::new();
        let url = config.webhook_url_for(id);
        assert_eq!(url.as_str(), format!("https://hooks.example/ollama?token=abc&job={id}"));
    }
}
