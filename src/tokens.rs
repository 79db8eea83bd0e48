//! Upstream credential broker.
//!
//! Tokens are acquired from the upstream's token service (user login), its
//! OAuth2 endpoint (app login), or taken verbatim from configuration, and
//! cached per rule. Concurrent cache misses for one rule coalesce onto a
//! single acquisition; the dispatcher invalidates the cache when an upstream
//! rejects a token.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::DashMap;
use http_body_util::{BodyExt, Full};
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::dispatch::UpstreamClient;
use crate::error::ProxyError;
use crate::rules::{Credentials, ServiceRule};

/// Lifetime assumed for tokens whose response carries no expiry.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Expiration in minutes requested from user-login token services.
const REQUESTED_EXPIRATION_MINUTES: i64 = 60;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct TokenCache {
    client: UpstreamClient,
    timeout: Duration,
    slots: DashMap<usize, Arc<Mutex<Option<CachedToken>>>>,
}

impl TokenCache {
    pub fn new(client: UpstreamClient, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            slots: DashMap::new(),
        }
    }

    /// A valid token for the rule, acquired on a cache miss. Rules without
    /// credentials yield `None`; acquisition failures are not cached and
    /// surface only to the caller that triggered them.
    pub async fn get_token(
        &self,
        rule_index: usize,
        rule: &ServiceRule,
        referer: &str,
    ) -> Result<Option<String>, ProxyError> {
        match &rule.credentials {
            Credentials::None => return Ok(None),
            Credentials::StaticToken { access_token } => return Ok(Some(access_token.clone())),
            _ => {}
        }

        let slot = self.slot(rule_index);
        // Holding the slot lock across the fetch is the single-flight:
        // concurrent missers queue here and see the fresh entry on wake-up.
        let mut entry = slot.lock().await;
        if let Some(cached) = entry.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(Some(cached.token.clone()));
            }
        }

        debug!("acquiring upstream token for {}", rule.url);
        let acquired = self.acquire(rule, referer).await?;
        let token = acquired.token.clone();
        *entry = Some(acquired);
        Ok(Some(token))
    }

    /// Drop the cached token for a rule; the next caller re-acquires.
    pub async fn invalidate(&self, rule_index: usize) {
        let slot = match self.slots.get(&rule_index) {
            Some(slot) => Arc::clone(slot.value()),
            None => return,
        };
        *slot.lock().await = None;
    }

    fn slot(&self, rule_index: usize) -> Arc<Mutex<Option<CachedToken>>> {
        Arc::clone(
            self.slots
                .entry(rule_index)
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .value(),
        )
    }

    async fn acquire(&self, rule: &ServiceRule, referer: &str) -> Result<CachedToken, ProxyError> {
        match &rule.credentials {
            Credentials::AppLogin {
                client_id,
                client_secret,
                oauth2_endpoint,
            } => {
                self.app_login(rule, client_id, client_secret, oauth2_endpoint)
                    .await
            }
            Credentials::UserLogin {
                username,
                password,
                token_service_url,
            } => {
                self.user_login(rule, username, password, token_service_url.as_deref(), referer)
                    .await
            }
            _ => Err(ProxyError::Credential(format!(
                "rule {} has no acquirable credentials",
                rule.url
            ))),
        }
    }

    /// OAuth2 client-credentials flow, with a portal token exchange when the
    /// rule is served by a host other than the OAuth issuer.
    async fn app_login(
        &self,
        rule: &ServiceRule,
        client_id: &str,
        client_secret: &str,
        oauth2_endpoint: &str,
    ) -> Result<CachedToken, ProxyError> {
        let base = oauth2_endpoint.trim_end_matches('/');
        let response = self
            .post_form(
                &format!("{base}/token"),
                &[
                    ("client_id", client_id),
                    ("client_secret", client_secret),
                    ("grant_type", "client_credentials"),
                    ("f", "json"),
                ],
            )
            .await?;
        let token = extract_token(&response).ok_or_else(|| {
            ProxyError::Credential(format!("no token in OAuth response from {base}/token"))
        })?;

        if !needs_portal_exchange(&rule.url, oauth2_endpoint) {
            return Ok(CachedToken {
                token,
                expires_at: extract_expiry(&response),
            });
        }

        let exchanged = self
            .post_form(
                &format!("{base}/generateToken"),
                &[("token", token.as_str()), ("serverURL", rule.url.as_str()), ("f", "json")],
            )
            .await?;
        let token = extract_token(&exchanged).ok_or_else(|| {
            ProxyError::Credential(format!(
                "portal at {base} would not exchange a token for {}",
                rule.url
            ))
        })?;
        Ok(CachedToken {
            token,
            expires_at: extract_expiry(&exchanged),
        })
    }

    async fn user_login(
        &self,
        rule: &ServiceRule,
        username: &str,
        password: &str,
        configured_service: Option<&str>,
        referer: &str,
    ) -> Result<CachedToken, ProxyError> {
        let token_service = match configured_service {
            Some(url) => url.to_string(),
            None => self.discover_token_service(&rule.url).await?,
        };

        // Domain-qualified logins are spelled DOMAIN\user by the upstream.
        let login = match &rule.domain {
            Some(domain) => format!("{domain}\\{username}"),
            None => username.to_string(),
        };
        let expiration = REQUESTED_EXPIRATION_MINUTES.to_string();
        let response = self
            .post_form(
                &token_service,
                &[
                    ("request", "getToken"),
                    ("referer", referer),
                    ("expiration", &expiration),
                    ("username", &login),
                    ("password", password),
                    ("f", "json"),
                ],
            )
            .await?;
        let token = extract_token(&response).ok_or_else(|| {
            ProxyError::Credential(format!("token service {token_service} returned no token"))
        })?;
        Ok(CachedToken {
            token,
            expires_at: extract_expiry(&response),
        })
    }

    /// Probe `<base>/rest/info` for the advertised token service, falling
    /// back to the conventional sharing endpoint.
    async fn discover_token_service(&self, rule_url: &str) -> Result<String, ProxyError> {
        let base = token_service_base(rule_url);
        let info = self.get_json(&format!("{base}/rest/info?f=json")).await?;

        if let Some(url) = info
            .pointer("/authInfo/tokenServicesUrl")
            .or_else(|| info.get("tokenServicesUrl"))
            .and_then(|value| value.as_str())
        {
            return Ok(url.to_string());
        }
        if let Some(owning) = info.get("owningSystemUrl").and_then(|value| value.as_str()) {
            return Ok(format!("{}/sharing/generateToken", owning.trim_end_matches('/')));
        }
        warn!("no token service advertised by {base}, trying the sharing endpoint");
        Ok(format!("{base}/sharing/generateToken"))
    }

    async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
    ) -> Result<serde_json::Value, ProxyError> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Full::new(Bytes::from(encode_form(fields))))
            .map_err(|e| ProxyError::Credential(format!("invalid token request for {url}: {e}")))?;
        self.send_json(request, url).await
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, ProxyError> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(url)
            .body(Full::new(Bytes::new()))
            .map_err(|e| ProxyError::Credential(format!("invalid token request for {url}: {e}")))?;
        self.send_json(request, url).await
    }

    async fn send_json(
        &self,
        request: Request<Full<Bytes>>,
        url: &str,
    ) -> Result<serde_json::Value, ProxyError> {
        let response = tokio::time::timeout(self.timeout, self.client.request(request))
            .await
            .map_err(|_| ProxyError::Credential(format!("token endpoint {url} timed out")))?
            .map_err(|e| ProxyError::Credential(format!("token endpoint {url} unreachable: {e}")))?;

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| ProxyError::Credential(format!("token endpoint {url} cut off: {e}")))?
            .to_bytes();
        if !status.is_success() {
            return Err(ProxyError::Credential(format!(
                "token endpoint {url} returned {status}"
            )));
        }
        serde_json::from_slice(&body).map_err(|e| {
            ProxyError::Credential(format!("token endpoint {url} returned invalid JSON: {e}"))
        })
    }
}

/// The service root: everything before the first `/rest/` or `/sharing/`.
fn token_service_base(url: &str) -> String {
    let lower = url.to_ascii_lowercase();
    let cut = ["/rest/", "/sharing/"]
        .iter()
        .filter_map(|marker| lower.find(marker))
        .min();
    match cut {
        Some(at) => url[..at].to_string(),
        None => url.trim_end_matches('/').to_string(),
    }
}

/// A rule fronted by a portal (served from a different host than the OAuth
/// issuer) needs the issuer token exchanged for a server token.
fn needs_portal_exchange(rule_url: &str, oauth2_endpoint: &str) -> bool {
    let rule_host = crate::urls::parse_and_fix_url_parts(rule_url).hostname;
    let issuer_host = crate::urls::parse_and_fix_url_parts(oauth2_endpoint).hostname;
    !rule_host.eq_ignore_ascii_case(&issuer_host)
}

/// Portal responses carry `token`, OAuth2 issuers `access_token`.
fn extract_token(value: &serde_json::Value) -> Option<String> {
    value
        .get("token")
        .or_else(|| value.get("access_token"))
        .and_then(|token| token.as_str())
        .map(str::to_string)
}

/// Expiry from an `expires` epoch-milliseconds or `expires_in` seconds
/// field, else the default lifetime.
fn extract_expiry(value: &serde_json::Value) -> Instant {
    let now = Instant::now();
    if let Some(epoch_ms) = value.get("expires").and_then(|v| v.as_i64()) {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let remaining = epoch_ms - now_ms;
        if remaining > 0 {
            return now + Duration::from_millis(remaining as u64);
        }
    }
    if let Some(seconds) = value.get("expires_in").and_then(|v| v.as_i64()) {
        if seconds > 0 {
            return now + Duration::from_secs(seconds as u64);
        }
    }
    now + DEFAULT_TOKEN_LIFETIME
}

fn encode_form(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{}={}", form_escape(key), form_escape(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn form_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
