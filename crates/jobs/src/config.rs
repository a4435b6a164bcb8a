use std::time::Duration;

/// Default analysis service base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Default interval between job-status fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default inactivity bound before a job is failed with a timeout.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default TCP connect timeout for the HTTP client.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Job-tracking configuration.
///
/// All fields have defaults suitable for a local analysis service. The
/// inactivity bound is the only liveness timeout: the HTTP client sets a
/// connect timeout but never an overall request timeout, since a healthy
/// stream may legitimately stay open for tens of minutes.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    /// Base URL of the analysis service, without a trailing slash.
    pub base_url: String,
    /// Interval between status fetches on the poll transport.
    pub poll_interval: Duration,
    /// Window after which a job with no inbound record fails.
    pub inactivity_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Prefer the push stream when progress is observed.
    pub streaming_enabled: bool,
    /// Bearer token sent with every request, if set.
    pub api_token: Option<String>,
}

/// Errors from loading [`JobsConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {expected} (got '{value}')")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("Invalid analysis service URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            streaming_enabled: true,
            api_token: None,
        }
    }
}

impl JobsConfig {
    /// Configuration for the given base URL with every other field defaulted.
    pub fn with_base_url(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            ..Default::default()
        })
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                             | Default                 |
    /// |-------------------------------------|-------------------------|
    /// | `FAIRVALUE_API_URL`                 | `http://localhost:8000` |
    /// | `FAIRVALUE_POLL_INTERVAL_MS`        | `2000`                  |
    /// | `FAIRVALUE_INACTIVITY_TIMEOUT_SECS` | `300`                   |
    /// | `FAIRVALUE_CONNECT_TIMEOUT_SECS`    | `10`                    |
    /// | `FAIRVALUE_STREAMING`               | `true`                  |
    /// | `FAIRVALUE_API_TOKEN`               | unset                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let base_url = match lookup("FAIRVALUE_API_URL") {
            Some(url) => normalize_base_url(&url)?,
            None => defaults.base_url,
        };

        let poll_interval = parse_positive(&lookup, "FAIRVALUE_POLL_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        let inactivity_timeout = parse_positive(&lookup, "FAIRVALUE_INACTIVITY_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.inactivity_timeout);

        let connect_timeout = parse_positive(&lookup, "FAIRVALUE_CONNECT_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.connect_timeout);

        let streaming_enabled = match lookup("FAIRVALUE_STREAMING") {
            Some(raw) => parse_bool("FAIRVALUE_STREAMING", &raw)?,
            None => defaults.streaming_enabled,
        };

        let api_token = lookup("FAIRVALUE_API_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(Self {
            base_url,
            poll_interval,
            inactivity_timeout,
            connect_timeout,
            streaming_enabled,
            api_token,
        })
    }
}

fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = reqwest::Url::parse(trimmed).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(trimmed.to_string())
}

fn parse_positive(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(ConfigError::Invalid {
            name,
            expected: "a positive integer",
            value: raw,
        }),
    }
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            expected: "a boolean",
            value: raw.to_string(),
        }),
    }
}
