use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use nicotb_providers::nicovideo::{Endpoints, NegotiatorConfig, HEARTBEAT_LIFETIME_MS};
use serde::{Deserialize, Serialize};
use url::Url;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Platform endpoints and HTTP timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub embed_base: String,
    pub ext_base: String,
    pub www_base: String,
    pub connect_timeout_seconds: u64,
    pub timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            embed_base: "http://embed.nicovideo.jp".to_string(),
            ext_base: "http://ext.nicovideo.jp".to_string(),
            www_base: "http://www.nicovideo.jp".to_string(),
            connect_timeout_seconds: 10,
            timeout_seconds: 30,
        }
    }
}

impl ApiConfig {
    pub fn endpoints(&self) -> anyhow::Result<Endpoints> {
        Ok(Endpoints {
            embed_base: Url::parse(&self.embed_base)?,
            ext_base: Url::parse(&self.ext_base)?,
            www_base: Url::parse(&self.www_base)?,
            connect_timeout: Duration::from_secs(self.connect_timeout_seconds),
            timeout: Duration::from_secs(self.timeout_seconds),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub renewal_interval_ms: u64,
    /// Negative: fetch the latest N comments
    pub comment_res_from: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            renewal_interval_ms: 10_000,
            comment_res_from: -1000,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn negotiator_config(&self) -> NegotiatorConfig {
        NegotiatorConfig {
            renewal_interval: Duration::from_millis(self.renewal_interval_ms),
            ..NegotiatorConfig::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    ///
    /// Priority order:
    /// 1. Environment variables (highest priority)
    /// 2. Config file
    /// 3. Default values (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (NICOTB_SESSION__RENEWAL_INTERVAL_MS, etc.)
        builder = builder.add_source(
            Environment::with_prefix("NICOTB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Check values the loader cannot; returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (name, value) in [
            ("api.embed_base", &self.api.embed_base),
            ("api.ext_base", &self.api.ext_base),
            ("api.www_base", &self.api.www_base),
        ] {
            if let Err(e) = Url::parse(value) {
                errors.push(format!("{name} is not a valid URL ({value}): {e}"));
            }
        }

        if self.session.renewal_interval_ms == 0 {
            errors.push("session.renewal_interval_ms must be greater than 0".to_string());
        } else if self.session.renewal_interval_ms >= HEARTBEAT_LIFETIME_MS {
            errors.push(format!(
                "session.renewal_interval_ms must be below the heartbeat lifetime ({HEARTBEAT_LIFETIME_MS} ms)"
            ));
        }

        if crate::logging::parse_log_level(&self.logging.level).is_err() {
            errors.push(format!("logging.level is invalid: {}", self.logging.level));
        }
        if self.logging.format.parse::<crate::logging::LogFormat>().is_err() {
            errors.push(format!("logging.format must be \"json\" or \"pretty\": {}", self.logging.format));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.api.embed_base, "http://embed.nicovideo.jp");
        assert_eq!(config.session.renewal_interval_ms, 10_000);
        assert_eq!(config.session.comment_res_from, -1000);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negotiator_config() {
        let session = SessionConfig {
            renewal_interval_ms: 2_500,
            ..SessionConfig::default()
        };
        let negotiator = session.negotiator_config();
        assert_eq!(negotiator.renewal_interval, Duration::from_millis(2_500));
        assert_eq!(negotiator.heartbeat_lifetime_ms, 120_000);
    }

    #[test]
    fn test_endpoints() {
        let endpoints = ApiConfig::default().endpoints().unwrap();
        assert_eq!(endpoints.www_base.as_str(), "http://www.nicovideo.jp/");
        assert_eq!(endpoints.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_validate_reports_all_errors() {
        let mut config = Config::default();
        config.api.ext_base = "not a url".to_string();
        config.session.renewal_interval_ms = 0;
        config.logging.level = "loud".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("api.ext_base"));
    }

    #[test]
    fn test_validate_interval_below_heartbeat() {
        let mut config = Config::default();
        config.session.renewal_interval_ms = 120_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[session]\nrenewal_interval_ms = 5000\n\n[logging]\nformat = \"json\""
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.session.renewal_interval_ms, 5000);
        assert_eq!(config.session.comment_res_from, -1000);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.api.embed_base, "http://embed.nicovideo.jp");
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load(Some("/nonexistent/nicotb.toml")).unwrap();
        assert_eq!(config.session.renewal_interval_ms, 10_000);
    }
}
