use crate::schema::GenerationParams;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_KLING_API_BASE: &str = "https://api-singapore.klingai.com";
const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_SCRATCH_DIR: &str = "./tmp";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Fixed-cadence polling budget for one lifecycle run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
        }
    }
}

/// Credentials for the generation service. Only ever read after startup.
#[derive(Clone)]
pub struct KlingCredentials {
    pub access_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for KlingCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KlingCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct Config {
    pub bot_token: String,
    pub telegram_api_base: String,
    pub credentials: KlingCredentials,
    pub kling_api_base: String,
    pub params: GenerationParams,
    pub poll: PollPolicy,
    pub http_timeout: Duration,
    pub scratch_dir: PathBuf,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bot_token", &"<redacted>")
            .field("telegram_api_base", &self.telegram_api_base)
            .field("credentials", &self.credentials)
            .field("kling_api_base", &self.kling_api_base)
            .field("params", &self.params)
            .field("poll", &self.poll)
            .field("http_timeout", &self.http_timeout)
            .field("scratch_dir", &self.scratch_dir)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                     | Required | Default                             |
    /// |-----------------------------|----------|-------------------------------------|
    /// | `TELEGRAM_BOT_TOKEN`        | **yes**  | falls back to `BOT_TOKEN`           |
    /// | `KLING_ACCESS_KEY`          | **yes**  | --                                  |
    /// | `KLING_SECRET_KEY`          | **yes**  | --                                  |
    /// | `KLING_API_BASE`            | no       | `https://api-singapore.klingai.com` |
    /// | `TELEGRAM_API_BASE`         | no       | `https://api.telegram.org`          |
    /// | `KLING_MODEL_NAME`          | no       | `kling-v1-6`                        |
    /// | `KLING_MODE`                | no       | `pro`                               |
    /// | `KLING_DURATION`            | no       | `5`                                 |
    /// | `KLING_CFG_SCALE`           | no       | `0.5`                               |
    /// | `KLING_POLL_INTERVAL_SECS`  | no       | `10`                                |
    /// | `KLING_POLL_MAX_ATTEMPTS`   | no       | `60`                                |
    /// | `KLING_HTTP_TIMEOUT_SECS`   | no       | `600`                               |
    /// | `SCRATCH_DIR`               | no       | `./tmp`                             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bot_token = get("TELEGRAM_BOT_TOKEN")
            .or_else(|| get("BOT_TOKEN"))
            .ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;
        let access_key = get("KLING_ACCESS_KEY").ok_or(ConfigError::Missing("KLING_ACCESS_KEY"))?;
        let secret_key = get("KLING_SECRET_KEY").ok_or(ConfigError::Missing("KLING_SECRET_KEY"))?;

        let defaults = GenerationParams::default();
        let params = GenerationParams {
            model_name: get("KLING_MODEL_NAME").unwrap_or(defaults.model_name),
            mode: get("KLING_MODE").unwrap_or(defaults.mode),
            duration: get("KLING_DURATION").unwrap_or(defaults.duration),
            cfg_scale: parse_or("KLING_CFG_SCALE", get("KLING_CFG_SCALE"), defaults.cfg_scale)?,
        };

        let interval_secs: u64 = parse_or(
            "KLING_POLL_INTERVAL_SECS",
            get("KLING_POLL_INTERVAL_SECS"),
            DEFAULT_POLL_INTERVAL_SECS,
        )?;
        let max_attempts: u32 = parse_or(
            "KLING_POLL_MAX_ATTEMPTS",
            get("KLING_POLL_MAX_ATTEMPTS"),
            DEFAULT_POLL_MAX_ATTEMPTS,
        )?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "KLING_POLL_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }
        let http_timeout_secs: u64 = parse_or(
            "KLING_HTTP_TIMEOUT_SECS",
            get("KLING_HTTP_TIMEOUT_SECS"),
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?;

        Ok(Self {
            bot_token,
            telegram_api_base: trim_base(
                get("TELEGRAM_API_BASE").unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string()),
            ),
            credentials: KlingCredentials {
                access_key,
                secret_key,
            },
            kling_api_base: trim_base(
                get("KLING_API_BASE").unwrap_or_else(|| DEFAULT_KLING_API_BASE.to_string()),
            ),
            params,
            poll: PollPolicy {
                interval: Duration::from_secs(interval_secs),
                max_attempts,
            },
            http_timeout: Duration::from_secs(http_timeout_secs),
            scratch_dir: PathBuf::from(
                get("SCRATCH_DIR").unwrap_or_else(|| DEFAULT_SCRATCH_DIR.to_string()),
            ),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("TELEGRAM_BOT_TOKEN", "123:abc"),
        ("KLING_ACCESS_KEY", "ak"),
        ("KLING_SECRET_KEY", "sk"),
    ];

    #[test]
    fn loads_defaults_with_required_credentials() {
        let config = Config::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(config.bot_token, "123:abc");
        assert_eq!(config.kling_api_base, "https://api-singapore.klingai.com");
        assert_eq!(config.poll, PollPolicy::default());
        assert_eq!(config.poll.budget(), Duration::from_secs(600));
        assert_eq!(config.http_timeout, Duration::from_secs(600));
        assert_eq!(config.params, GenerationParams::default());
        assert_eq!(config.scratch_dir, PathBuf::from("./tmp"));
    }

    #[test]
    fn missing_credential_prevents_startup() {
        let err = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("KLING_ACCESS_KEY", "ak"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("KLING_SECRET_KEY"));

        let err = Config::from_lookup(lookup(&[
            ("KLING_ACCESS_KEY", "ak"),
            ("KLING_SECRET_KEY", "sk"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("TELEGRAM_BOT_TOKEN"));
    }

    #[test]
    fn blank_credential_counts_as_missing() {
        let err = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("KLING_ACCESS_KEY", "  "),
            ("KLING_SECRET_KEY", "sk"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("KLING_ACCESS_KEY"));
    }

    #[test]
    fn accepts_legacy_bot_token_name() {
        let config = Config::from_lookup(lookup(&[
            ("BOT_TOKEN", "legacy"),
            ("KLING_ACCESS_KEY", "ak"),
            ("KLING_SECRET_KEY", "sk"),
        ]))
        .unwrap();
        assert_eq!(config.bot_token, "legacy");
    }

    #[test]
    fn overrides_and_trims_base_urls() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("KLING_API_BASE", "http://localhost:9000/"));
        pairs.push(("KLING_POLL_INTERVAL_SECS", "2"));
        pairs.push(("KLING_POLL_MAX_ATTEMPTS", "5"));
        pairs.push(("KLING_CFG_SCALE", "0.8"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.kling_api_base, "http://localhost:9000");
        assert_eq!(config.poll.interval, Duration::from_secs(2));
        assert_eq!(config.poll.max_attempts, 5);
        assert_eq!(config.params.cfg_scale, 0.8);
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("KLING_POLL_MAX_ATTEMPTS", "lots"));
        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "KLING_POLL_MAX_ATTEMPTS", .. }));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = Config::from_lookup(lookup(REQUIRED)).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("123:abc"));
        assert!(!rendered.contains("\"sk\""));
    }
}
