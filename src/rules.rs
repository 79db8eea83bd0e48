//! Compiled upstream service rules and the referrer allow-list.
//!
//! Raw `serverUrls` entries are compiled once at startup into [`ServiceRule`]
//! records carrying the parsed URL parts and the derived rate constants; the
//! table is read-only afterwards. Lookup order is configuration order, first
//! match wins.

use crate::config::ServerUrlConfig;
use crate::urls::{self, UrlParts};

/// How a rule authenticates against its upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    None,
    UserLogin {
        username: String,
        password: String,
        token_service_url: Option<String>,
    },
    AppLogin {
        client_id: String,
        client_secret: String,
        oauth2_endpoint: String,
    },
    StaticToken {
        access_token: String,
    },
}

impl Credentials {
    pub fn configured(&self) -> bool {
        !matches!(self, Credentials::None)
    }
}

/// One compiled upstream rule.
#[derive(Debug, Clone)]
pub struct ServiceRule {
    pub url: String,
    pub parts: UrlParts,
    /// Prefix match when set, exact path match otherwise.
    pub match_all: bool,
    pub credentials: Credentials,
    /// Requests allowed per period; the bucket capacity.
    pub rate_limit: i64,
    /// Period length in minutes.
    pub rate_limit_period: i64,
    /// Refill rate in tokens per second.
    pub rate: f64,
    pub use_rate_meter: bool,
    pub host_redirect: Option<UrlParts>,
    /// Query parameter name the acquired token is injected under.
    pub token_param_name: String,
    pub domain: Option<String>,
}

impl ServiceRule {
    pub fn compile(config: &ServerUrlConfig) -> Self {
        let use_rate_meter = config.rate_limit > 0 && config.rate_limit_period > 0;
        let rate = if use_rate_meter {
            config.rate_limit as f64 / (config.rate_limit_period as f64 * 60.0)
        } else {
            0.0
        };

        let credentials = if let (Some(client_id), Some(client_secret), Some(oauth2_endpoint)) = (
            config.client_id.clone(),
            config.client_secret.clone(),
            config.oauth2_endpoint.clone(),
        ) {
            Credentials::AppLogin {
                client_id,
                client_secret,
                oauth2_endpoint,
            }
        } else if let (Some(username), Some(password)) =
            (config.username.clone(), config.password.clone())
        {
            Credentials::UserLogin {
                username,
                password,
                token_service_url: config.token_service_url.clone(),
            }
        } else if let Some(access_token) = config.access_token.clone() {
            Credentials::StaticToken { access_token }
        } else {
            Credentials::None
        };

        ServiceRule {
            url: config.url.clone(),
            parts: urls::parse_and_fix_url_parts(&config.url),
            match_all: config.match_all,
            credentials,
            rate_limit: config.rate_limit,
            rate_limit_period: config.rate_limit_period,
            rate,
            use_rate_meter,
            host_redirect: config
                .host_redirect
                .as_deref()
                .map(urls::parse_and_fix_url_parts),
            token_param_name: config
                .token_param_name
                .clone()
                .unwrap_or_else(|| "token".to_string()),
            domain: config.domain.clone(),
        }
    }
}

/// The frozen, ordered rule table.
pub struct RuleTable {
    rules: Vec<ServiceRule>,
}

impl RuleTable {
    pub fn compile(configs: &[ServerUrlConfig]) -> Self {
        Self {
            rules: configs.iter().map(ServiceRule::compile).collect(),
        }
    }

    /// First rule whose parts accept the request, in configuration order.
    pub fn find(&self, request: &UrlParts) -> Option<(usize, &ServiceRule)> {
        self.rules
            .iter()
            .enumerate()
            .find(|(_, rule)| urls::url_parts_match(request, &rule.parts, rule.match_all))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// One allow-list entry with its canonical rate-meter key.
#[derive(Debug, Clone)]
pub struct AllowedReferrer {
    pub parts: UrlParts,
    pub canonical_key: String,
}

/// The referrer allow-list. The literal `*` as a whole entry switches the
/// list into accept-any mode.
pub struct ReferrerList {
    entries: Vec<AllowedReferrer>,
    accept_any: bool,
}

impl ReferrerList {
    pub fn compile(allowed: &[String], match_all_flag: bool) -> Self {
        let mut accept_any = match_all_flag;
        let mut entries = Vec::new();
        for raw in allowed {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            if raw == "*" {
                accept_any = true;
                continue;
            }
            let parts = urls::parse_and_fix_url_parts(raw);
            let canonical_key = canonical_key(&parts);
            entries.push(AllowedReferrer {
                parts,
                canonical_key,
            });
        }
        Self {
            entries,
            accept_any,
        }
    }

    /// Canonical key of the matched entry, `*` in accept-any mode, `None`
    /// when the referrer is denied. A raw referrer that is itself the literal
    /// `*` never matches an entry.
    pub fn validate(&self, raw: Option<&str>) -> Option<String> {
        if self.accept_any {
            return Some("*".to_string());
        }
        let raw = raw?.trim();
        if raw.is_empty() || raw == "*" {
            return None;
        }
        let candidate = urls::parse_and_fix_url_parts(raw);
        self.entries
            .iter()
            .find(|entry| {
                urls::protocols_match(&entry.parts.protocol, &candidate.protocol)
                    && referrer_path_matches(&entry.parts.path, &candidate.path)
                    && urls::domains_match(&entry.parts.hostname, &candidate.hostname)
            })
            .map(|entry| entry.canonical_key.clone())
    }

    /// Entries for the status page, including the accept-any marker.
    pub fn display_entries(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .entries
            .iter()
            .map(|entry| entry.canonical_key.clone())
            .collect();
        if self.accept_any {
            out.insert(0, "*".to_string());
        }
        out
    }
}

fn referrer_path_matches(entry_path: &str, candidate_path: &str) -> bool {
    entry_path == "*"
        || candidate_path
            .to_ascii_lowercase()
            .starts_with(&entry_path.to_ascii_lowercase())
}

fn canonical_key(parts: &UrlParts) -> String {
    let mut key = format!("{}://{}", parts.protocol, parts.hostname);
    if parts.port != "*" {
        key.push(':');
        key.push_str(&parts.port);
    }
    if parts.path != "*" {
        key.push_str(&parts.path);
    }
    key
}
