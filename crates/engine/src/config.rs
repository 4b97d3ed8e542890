use std::str::FromStr;
use std::time::Duration;

use tubesync_client::{Endpoints, ReconnectConfig};

use crate::error::ConfigError;
use crate::poller::PollerConfig;

/// Which push transport the multiplexer opens per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushTransportKind {
    /// `text/event-stream` on `{jobs}/{id}/progress`.
    #[default]
    Sse,
    /// WebSocket on `{jobs}/{id}/ws`.
    Ws,
}

impl FromStr for PushTransportKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sse" => Ok(Self::Sse),
            "ws" | "websocket" => Ok(Self::Ws),
            _ => Err(()),
        }
    }
}

/// Engine configuration loaded from environment variables.
///
/// All fields have defaults suitable for a job service on localhost.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub endpoints: Endpoints,
    pub transport: PushTransportKind,
    pub poller: PollerConfig,
    pub reconnect: ReconnectConfig,
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                 |
    /// |----------------------------------|-------------------------|
    /// | `TUBESYNC_BACKEND_URL`           | `http://localhost:8000` |
    /// | `TUBESYNC_JOBS_PATH`             | `/api/videos`           |
    /// | `TUBESYNC_PUSH_TRANSPORT`        | `sse` (or `ws`)         |
    /// | `TUBESYNC_POLL_INTERVAL_MS`      | `10000`                 |
    /// | `TUBESYNC_POLL_RETRY_DELAY_MS`   | `3000`                  |
    /// | `TUBESYNC_POLL_MAX_RETRIES`      | `5`                     |
    /// | `TUBESYNC_PUSH_MAX_ATTEMPTS`     | `3`                     |
    /// | `TUBESYNC_PUSH_INITIAL_DELAY_MS` | `3000`                  |
    /// | `TUBESYNC_PUSH_MAX_DELAY_MS`     | `30000`                 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend_url =
            lookup("TUBESYNC_BACKEND_URL").unwrap_or_else(|| "http://localhost:8000".into());
        let jobs_path = lookup("TUBESYNC_JOBS_PATH").unwrap_or_else(|| "/api/videos".into());
        let endpoints = Endpoints::new(&backend_url, &jobs_path)
            .map_err(|e| ConfigError::Endpoint(e.to_string()))?;

        let transport = match lookup("TUBESYNC_PUSH_TRANSPORT") {
            None => PushTransportKind::default(),
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "TUBESYNC_PUSH_TRANSPORT",
                value: raw.clone(),
                expected: "'sse' or 'ws'",
            })?,
        };

        let poller = PollerConfig {
            interval: millis(&lookup, "TUBESYNC_POLL_INTERVAL_MS", 10_000)?,
            retry_delay: millis(&lookup, "TUBESYNC_POLL_RETRY_DELAY_MS", 3_000)?,
            max_retries: number(&lookup, "TUBESYNC_POLL_MAX_RETRIES", 5)?,
        };

        let reconnect = ReconnectConfig {
            initial_delay: millis(&lookup, "TUBESYNC_PUSH_INITIAL_DELAY_MS", 3_000)?,
            max_delay: millis(&lookup, "TUBESYNC_PUSH_MAX_DELAY_MS", 30_000)?,
            max_attempts: number(&lookup, "TUBESYNC_PUSH_MAX_ATTEMPTS", 3)?,
            ..ReconnectConfig::default()
        };
        if reconnect.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "TUBESYNC_PUSH_MAX_ATTEMPTS",
                value: "0".into(),
                expected: "at least 1",
            });
        }

        Ok(Self {
            endpoints,
            transport,
            poller,
            reconnect,
        })
    }
}

fn number<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
            expected: "a non-negative integer",
        }),
    }
}

fn millis<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    number(lookup, key, default).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.endpoints.jobs().as_str(), "http://localhost:8000/api/videos");
        assert_eq!(config.transport, PushTransportKind::Sse);
        assert_eq!(config.poller.interval, Duration::from_secs(10));
        assert_eq!(config.poller.retry_delay, Duration::from_secs(3));
        assert_eq!(config.poller.max_retries, 5);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.initial_delay, Duration::from_secs(3));
    }

    #[test]
    fn overrides_are_applied() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("TUBESYNC_BACKEND_URL", "https://jobs.example.com"),
            ("TUBESYNC_JOBS_PATH", "/jobs"),
            ("TUBESYNC_PUSH_TRANSPORT", "WS"),
            ("TUBESYNC_POLL_INTERVAL_MS", "250"),
            ("TUBESYNC_PUSH_MAX_ATTEMPTS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.endpoints.jobs().as_str(), "https://jobs.example.com/jobs");
        assert_eq!(config.transport, PushTransportKind::Ws);
        assert_eq!(config.poller.interval, Duration::from_millis(250));
        assert_eq!(config.reconnect.max_attempts, 5);
    }

    #[test]
    fn rejects_malformed_numbers() {
        let err = EngineConfig::from_lookup(lookup(&[("TUBESYNC_POLL_MAX_RETRIES", "many")]))
            .unwrap_err();
        assert_matches!(
            err,
            ConfigError::Invalid {
                key: "TUBESYNC_POLL_MAX_RETRIES",
                ..
            }
        );
    }

    #[test]
    fn rejects_unknown_transport_and_bad_url() {
        assert_matches!(
            EngineConfig::from_lookup(lookup(&[("TUBESYNC_PUSH_TRANSPORT", "carrier-pigeon")])),
            Err(ConfigError::Invalid { .. })
        );
        assert_matches!(
            EngineConfig::from_lookup(lookup(&[("TUBESYNC_BACKEND_URL", "not a url")])),
            Err(ConfigError::Endpoint(_))
        );
    }

    #[test]
    fn zero_push_attempts_is_invalid() {
        assert_matches!(
            EngineConfig::from_lookup(lookup(&[("TUBESYNC_PUSH_MAX_ATTEMPTS", "0")])),
            Err(ConfigError::Invalid { .. })
        );
    }
}
