//! JSON configuration file reader.
//!
//! The file carries a `proxyConfig` section and a `serverUrls` list. Booleans
//! tolerate string forms ("true"/"1"), and `allowedReferrers`/`listenURI`
//! accept a single string, a comma-separated string, or an array. All of that
//! coercion lives here; the rest of the system sees strict types.

use std::path::Path;

use anyhow::{bail, Context};
use serde::de::{Deserializer, Error as DeError};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub proxy_config: ProxyConfig,
    pub server_urls: Vec<ServerUrlConfig>,
}

/// The `proxyConfig` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyConfig {
    #[serde(rename = "useHTTPS", deserialize_with = "bool_or_string")]
    pub use_https: bool,
    pub port: u16,
    #[serde(deserialize_with = "bool_or_string")]
    pub must_match: bool,
    #[serde(deserialize_with = "bool_or_string")]
    pub match_all_referrer: bool,
    pub log_file_name: Option<String>,
    pub log_file_path: Option<String>,
    pub log_level: LogLevel,
    #[serde(deserialize_with = "bool_or_string")]
    pub log_to_console: bool,
    #[serde(deserialize_with = "string_or_list")]
    pub allowed_referrers: Vec<String>,
    #[serde(rename = "listenURI", deserialize_with = "string_or_list")]
    pub listen_uri: Vec<String>,
    pub ping_path: String,
    pub status_path: String,
    pub https_key_file: Option<String>,
    pub https_certificate_file: Option<String>,
    pub https_pfx_file: Option<String>,
    pub upstream_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            use_https: false,
            port: 8080,
            must_match: true,
            match_all_referrer: false,
            log_file_name: None,
            log_file_path: None,
            log_level: LogLevel::Info,
            log_to_console: true,
            allowed_referrers: vec!["*".to_string()],
            listen_uri: vec!["/proxy".to_string()],
            ping_path: "/ping".to_string(),
            status_path: "/status".to_string(),
            https_key_file: None,
            https_certificate_file: None,
            https_pfx_file: None,
            upstream_timeout_secs: 30,
        }
    }
}

/// One entry of the `serverUrls` list. Only `url` is required.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerUrlConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_true", deserialize_with = "bool_or_string")]
    pub match_all: bool,
    #[serde(default)]
    pub host_redirect: Option<String>,
    /// Requests allowed per `rate_limit_period`; non-positive disables the meter.
    #[serde(default)]
    pub rate_limit: i64,
    /// Rate limit period in minutes.
    #[serde(default)]
    pub rate_limit_period: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token_service_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub oauth2_endpoint: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_param_name: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Configured verbosity, ALL being the most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    All,
    #[default]
    Info,
    Warn,
    Error,
    None,
}

impl LogLevel {
    pub fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::All => LevelFilter::TRACE,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::None => LevelFilter::OFF,
        }
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        match text.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(LogLevel::All),
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            "NONE" => Ok(LogLevel::None),
            other => Err(D::Error::unknown_variant(
                other,
                &["ALL", "INFO", "WARN", "ERROR", "NONE"],
            )),
        }
    }
}

/// Load and validate the configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("invalid configuration in {}", path.display()))
}

/// Parse a configuration document, unwrapping the legacy
/// `{"serverUrls":{"serverUrl":...}}` layout when present.
pub fn parse_config(raw: &str) -> anyhow::Result<Config> {
    let mut root: serde_json::Value =
        serde_json::from_str(raw).context("configuration is not valid JSON")?;

    if let Some(urls) = root.get_mut("serverUrls") {
        if urls.is_object() {
            let inner = if urls.get("serverUrl").is_some() {
                urls["serverUrl"].take()
            } else {
                urls.take()
            };
            *urls = match inner {
                list @ serde_json::Value::Array(_) => list,
                single => serde_json::Value::Array(vec![single]),
            };
        }
    }

    let config: Config = serde_json::from_value(root).context("configuration schema mismatch")?;
    for (index, rule) in config.server_urls.iter().enumerate() {
        if rule.url.trim().is_empty() {
            bail!("serverUrls[{index}] is missing its url");
        }
    }
    Ok(config)
}

fn bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Bool(value) => value,
        Raw::Text(text) => matches!(text.trim().to_ascii_lowercase().as_str(), "true" | "1"),
    })
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::One(text) => text
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        Raw::Many(list) => list,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_document() {
        let config = parse_config(
            r#"{
                "proxyConfig": {
                    "useHTTPS": "false",
                    "port": 9090,
                    "mustMatch": "true",
                    "logLevel": "warn",
                    "allowedReferrers": "https://a.example.com, https://b.example.com",
                    "listenURI": ["/proxy", "/gis"]
                },
                "serverUrls": [
                    {
                        "url": "https://geo.example.com/rest",
                        "matchAll": "1",
                        "rateLimit": 120,
                        "rateLimitPeriod": 2,
                        "username": "svc",
                        "password": "secret"
                    }
                ]
            }"#,
        )
        .unwrap();

        let proxy = &config.proxy_config;
        assert!(!proxy.use_https);
        assert_eq!(proxy.port, 9090);
        assert!(proxy.must_match);
        assert_eq!(proxy.log_level, LogLevel::Warn);
        assert_eq!(
            proxy.allowed_referrers,
            vec!["https://a.example.com", "https://b.example.com"]
        );
        assert_eq!(proxy.listen_uri, vec!["/proxy", "/gis"]);
        assert_eq!(proxy.upstream_timeout_secs, 30);

        let rule = &config.server_urls[0];
        assert!(rule.match_all);
        assert_eq!(rule.rate_limit, 120);
        assert_eq!(rule.rate_limit_period, 2);
        assert_eq!(rule.username.as_deref(), Some("svc"));
    }

    #[test]
    fn bool_coercion_rejects_other_strings() {
        let config = parse_config(
            r#"{"proxyConfig": {"mustMatch": "yes", "matchAllReferrer": " TRUE "}, "serverUrls": []}"#,
        )
        .unwrap();
        assert!(!config.proxy_config.must_match);
        assert!(config.proxy_config.match_all_referrer);
    }

    #[test]
    fn legacy_server_url_wrapper() {
        let config = parse_config(
            r#"{"serverUrls": {"serverUrl": {"url": "http://one.example.com/rest"}}}"#,
        )
        .unwrap();
        assert_eq!(config.server_urls.len(), 1);
        assert_eq!(config.server_urls[0].url, "http://one.example.com/rest");

        let config = parse_config(
            r#"{"serverUrls": {"serverUrl": [
                {"url": "http://one.example.com"},
                {"url": "http://two.example.com"}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(config.server_urls.len(), 2);
    }

    #[test]
    fn bare_object_is_a_single_rule() {
        let config =
            parse_config(r#"{"serverUrls": {"url": "http://solo.example.com/rest"}}"#).unwrap();
        assert_eq!(config.server_urls.len(), 1);
        assert_eq!(config.server_urls[0].url, "http://solo.example.com/rest");
    }

    #[test]
    fn missing_url_is_rejected() {
        let result = parse_config(r#"{"serverUrls": [{"rateLimit": 10}]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn defaults_apply() {
        let config = parse_config("{}").unwrap();
        let proxy = &config.proxy_config;
        assert_eq!(proxy.port, 8080);
        assert!(proxy.must_match);
        assert_eq!(proxy.ping_path, "/ping");
        assert_eq!(proxy.status_path, "/status");
        assert_eq!(proxy.listen_uri, vec!["/proxy"]);
        assert_eq!(proxy.allowed_referrers, vec!["*"]);
        assert_eq!(proxy.log_level, LogLevel::Info);
    }
}
