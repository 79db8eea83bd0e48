//! Upstream dispatch.
//!
//! Builds the outbound URL (directly from the matched rule, or through its
//! host redirect), injects the acquired token as a query parameter, rewrites
//! headers, and pipes the exchange. A 401/403/498/499 from an upstream with
//! configured credentials invalidates the token cache and retries once.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, error, warn};

use crate::error::{error_response, ProxyError};
use crate::rules::ServiceRule;
use crate::urls::{self, ParsedRequest, UrlParts};
use crate::AppState;

pub type UpstreamClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Build the shared upstream client, able to reach plain and TLS origins.
/// Hosts without a system certificate store fall back to the bundled roots.
pub fn build_upstream_client() -> UpstreamClient {
    let connector = match hyper_rustls::HttpsConnectorBuilder::new().with_native_roots() {
        Ok(with_roots) => with_roots.https_or_http().enable_http1().build(),
        Err(_) => hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build(),
    };
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(32)
        .build(connector)
}

const HOP_BY_HOP: [&str; 9] = [
    "host",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authorization",
    "proxy-connection",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

/// Upstream statuses that signal a stale or rejected token.
pub fn should_retry_with_token(status: StatusCode, credentials_configured: bool) -> bool {
    credentials_configured && matches!(status.as_u16(), 401 | 403 | 498 | 499)
}

/// The outbound URL for a request, with the token already merged into the
/// query string. Without a matched rule (permissive mode) the target is taken
/// from the encoded proxy path as-is.
pub fn outbound_url(
    rule: Option<&ServiceRule>,
    parsed: &ParsedRequest,
    referrer_key: &str,
    token: Option<(&str, &str)>,
) -> Result<String, ProxyError> {
    let request_parts = urls::request_parts(parsed);
    match rule {
        Some(rule) => match &rule.host_redirect {
            Some(redirect) => Ok(host_redirect_url(
                redirect,
                &request_parts,
                parsed,
                referrer_key,
                token,
            )),
            None => Ok(urls::build_outbound_url(
                &rule.url,
                &rule.parts,
                &request_parts,
                &parsed.query,
                token,
            )),
        },
        None => {
            if request_parts.hostname == "*" {
                return Err(ProxyError::Parse(format!(
                    "no upstream host in {}",
                    parsed.proxy_path
                )));
            }
            let protocol = if parsed.protocol == "*" {
                "http"
            } else {
                parsed.protocol.as_str()
            };
            let mut url = format!("{}://{}", protocol, parsed.proxy_path.trim_start_matches('/'));
            let merged = urls::merge_query("", &parsed.query, token);
            if !merged.is_empty() {
                url.push('?');
                url.push_str(&merged);
            }
            Ok(url)
        }
    }
}

/// Host-redirect rewrite: the redirect supplies the hostname, the most
/// specific non-wildcard source wins for protocol and port (redirect, then
/// the request, then the referrer), and the incoming path and query survive.
fn host_redirect_url(
    redirect: &UrlParts,
    request: &UrlParts,
    parsed: &ParsedRequest,
    referrer_key: &str,
    token: Option<(&str, &str)>,
) -> String {
    let referrer = urls::parse_and_fix_url_parts(referrer_key);
    let protocol = best_match_component(&redirect.protocol, &parsed.protocol, &referrer.protocol)
        .unwrap_or_else(|| "http".to_string());
    let port = best_match_component(&redirect.port, &request.port, &referrer.port);

    let mut url = format!("{}://{}", protocol, redirect.hostname);
    if let Some(port) = port {
        url.push(':');
        url.push_str(&port);
    }
    if request.path != "*" {
        url.push_str(&request.path);
    }
    let merged = urls::merge_query(&redirect.query, &parsed.query, token);
    if !merged.is_empty() {
        url.push('?');
        url.push_str(&merged);
    }
    url
}

fn best_match_component(redirect: &str, request: &str, referrer: &str) -> Option<String> {
    [redirect, request, referrer]
        .iter()
        .find(|value| !value.is_empty() && **value != "*")
        .map(|value| value.to_string())
}

/// Proxy one request to its upstream and stream the response back.
pub async fn handle_proxy(
    state: &Arc<AppState>,
    parsed: ParsedRequest,
    rule: Option<(usize, &ServiceRule)>,
    referrer_key: &str,
    method: Method,
    headers: HeaderMap,
    body: Body,
    client_addr: SocketAddr,
) -> Response {
    // Buffer the client body once so the credential retry can resend it.
    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("failed to read request body: {e}"),
                &parsed.proxy_path,
            );
        }
    };

    let mut token_value: Option<String> = None;
    if let Some((index, rule)) = rule {
        if rule.credentials.configured() {
            match state.tokens.get_token(index, rule, referrer_key).await {
                Ok(token) => token_value = token,
                Err(e) => {
                    warn!("credential acquisition failed for {}: {e}", rule.url);
                    return e.to_response(&parsed.proxy_path);
                }
            }
        }
    }

    let mut attempt = 0;
    loop {
        let token_pair = rule.and_then(|(_, rule)| {
            token_value
                .as_deref()
                .map(|token| (rule.token_param_name.as_str(), token))
        });
        let url = match outbound_url(rule.map(|(_, r)| r), &parsed, referrer_key, token_pair) {
            Ok(url) => url,
            Err(e) => return e.to_response(&parsed.proxy_path),
        };
        let uri: Uri = match url.parse() {
            Ok(uri) => uri,
            Err(e) => {
                return ProxyError::Parse(format!("invalid upstream URL {url}: {e}"))
                    .to_response(&url)
            }
        };

        let outbound =
            match build_outbound_request(&method, &headers, &uri, body_bytes.clone(), client_addr)
            {
                Ok(request) => request,
                Err(e) => return e.to_response(&url),
            };

        debug!("proxying {} {} upstream", method, uri);
        let response =
            match tokio::time::timeout(state.upstream_timeout, state.client.request(outbound)).await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    error!("upstream request to {uri} failed: {e}");
                    return ProxyError::UpstreamTransport(e.to_string()).to_response(&url);
                }
                Err(_) => {
                    error!("upstream request to {uri} timed out");
                    return ProxyError::UpstreamTransport(format!("upstream {uri} timed out"))
                        .to_response(&url);
                }
            };

        if attempt == 0 && should_retry_with_token(response.status(), token_value.is_some()) {
            if let Some((index, rule)) = rule {
                attempt += 1;
                debug!(
                    "upstream returned {}, refreshing credentials for {}",
                    response.status(),
                    rule.url
                );
                state.tokens.invalidate(index).await;
                match state.tokens.get_token(index, rule, referrer_key).await {
                    Ok(fresh) => {
                        token_value = fresh;
                        continue;
                    }
                    Err(e) => {
                        // Pass the original upstream verdict through.
                        warn!("credential refresh failed for {}: {e}", rule.url);
                        return forward_response(response);
                    }
                }
            }
        }

        return forward_response(response);
    }
}

fn build_outbound_request(
    method: &Method,
    headers: &HeaderMap,
    uri: &Uri,
    body: Bytes,
    client_addr: SocketAddr,
) -> Result<hyper::Request<Full<Bytes>>, ProxyError> {
    let mut builder = hyper::Request::builder().method(method.clone()).uri(uri.clone());

    for (name, value) in headers {
        if is_hop_by_hop(name.as_str()) || name.as_str() == "x-forwarded-for" {
            continue;
        }
        builder = builder.header(name, value);
    }

    if let Some(host) = uri.host() {
        let host_header = match uri.port_u16() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        builder = builder.header(header::HOST, host_header);
    }

    builder = builder.header("x-forwarded-for", forwarded_for(headers, client_addr));

    builder
        .body(Full::new(body))
        .map_err(|e| ProxyError::UpstreamTransport(format!("failed to build upstream request: {e}")))
}

fn forwarded_for(headers: &HeaderMap, client_addr: SocketAddr) -> String {
    match headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        Some(existing) => format!("{}, {}", existing, client_addr.ip()),
        None => client_addr.ip().to_string(),
    }
}

/// Pipe the upstream response through: status kept, hop-by-hop headers
/// dropped, the WMS XML content type substituted, body streamed.
fn forward_response(response: hyper::Response<hyper::body::Incoming>) -> Response {
    let (parts, body) = response.into_parts();
    let mut builder = Response::builder().status(parts.status);

    for (name, value) in parts.headers.iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if name == &header::CONTENT_TYPE {
            if let Some(rewritten) = rewrite_content_type(value) {
                builder = builder.header(name, rewritten);
                continue;
            }
        }
        builder = builder.header(name, value);
    }

    builder.body(Body::new(body)).unwrap_or_else(|e| {
        error!("failed to assemble upstream response: {e}");
        (StatusCode::INTERNAL_SERVER_ERROR, "upstream response error").into_response()
    })
}

/// Some WMS servers emit `application/vnd.ogc.wms_xml`; clients want XML.
fn rewrite_content_type(value: &HeaderValue) -> Option<HeaderValue> {
    let text = value.to_str().ok()?;
    if !text.contains("application/vnd.ogc.wms_xml") {
        return None;
    }
    Some(HeaderValue::from_static("text/xml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerUrlConfig;
    use crate::rules::ServiceRule;
    use crate::urls::parse_url_request;

    fn compile(config: ServerUrlConfig) -> ServiceRule {
        ServiceRule::compile(&config)
    }

    fn listen() -> Vec<String> {
        vec!["/proxy".to_string()]
    }

    #[test]
    fn outbound_from_rule_keeps_trailing_path() {
        let rule = compile(ServerUrlConfig {
            url: "https://geo.example.com/rest".to_string(),
            match_all: true,
            ..ServerUrlConfig::default()
        });
        let parsed =
            parse_url_request("/proxy/http/geo.example.com/rest/info/", &listen(), true).unwrap();
        let url = outbound_url(Some(&rule), &parsed, "*", None).unwrap();
        assert_eq!(url, "https://geo.example.com/rest/info/");
    }

    #[test]
    fn host_redirect_replaces_authority_only() {
        let rule = compile(ServerUrlConfig {
            url: "https://geo.example.com".to_string(),
            match_all: true,
            host_redirect: Some("https://redirect.example.com:8443".to_string()),
            ..ServerUrlConfig::default()
        });
        let parsed = parse_url_request("/proxy/geo.example.com/path?q=1", &listen(), true).unwrap();
        let url = outbound_url(Some(&rule), &parsed, "*", None).unwrap();
        assert_eq!(url, "https://redirect.example.com:8443/path?q=1");
    }

    #[test]
    fn host_redirect_protocol_falls_back_to_request() {
        let rule = compile(ServerUrlConfig {
            url: "http://geo.example.com".to_string(),
            match_all: true,
            host_redirect: Some("redirect.example.com".to_string()),
            ..ServerUrlConfig::default()
        });
        let parsed = parse_url_request("/proxy/http/geo.example.com/a", &listen(), true).unwrap();
        let url = outbound_url(Some(&rule), &parsed, "https://apps.example.com", None).unwrap();
        assert_eq!(url, "http://redirect.example.com/a");
    }

    #[test]
    fn token_is_injected_into_query() {
        let rule = compile(ServerUrlConfig {
            url: "https://geo.example.com/rest".to_string(),
            match_all: true,
            ..ServerUrlConfig::default()
        });
        let parsed = parse_url_request(
            "/proxy/https/geo.example.com/rest/layers?f=json&token=stale",
            &listen(),
            true,
        )
        .unwrap();
        let url = outbound_url(Some(&rule), &parsed, "*", Some(("token", "fresh"))).unwrap();
        assert_eq!(
            url,
            "https://geo.example.com/rest/layers?f=json&token=fresh"
        );
    }

    #[test]
    fn permissive_mode_dispatches_without_a_rule() {
        let parsed =
            parse_url_request("/proxy/geo.example.com/path?q=1", &listen(), false).unwrap();
        let url = outbound_url(None, &parsed, "*", None).unwrap();
        assert_eq!(url, "http://geo.example.com/path?q=1");
    }

    #[test]
    fn retry_statuses() {
        for code in [401u16, 403, 498, 499] {
            assert!(should_retry_with_token(
                StatusCode::from_u16(code).unwrap(),
                true
            ));
            assert!(!should_retry_with_token(
                StatusCode::from_u16(code).unwrap(),
                false
            ));
        }
        assert!(!should_retry_with_token(StatusCode::OK, true));
        assert!(!should_retry_with_token(StatusCode::INTERNAL_SERVER_ERROR, true));
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("transfer-encoding"));
        assert!(is_hop_by_hop("Proxy-Authorization"));
        assert!(!is_hop_by_hop("content-type"));
        assert!(!is_hop_by_hop("authorization"));
    }

    #[test]
    fn wms_content_type_is_rewritten() {
        let rewritten =
            rewrite_content_type(&HeaderValue::from_static("application/vnd.ogc.wms_xml"))
                .unwrap();
        assert_eq!(rewritten, "text/xml");
        assert!(rewrite_content_type(&HeaderValue::from_static("application/json")).is_none());
    }

    #[test]
    fn forwarded_for_appends_client() {
        let addr: SocketAddr = "203.0.113.7:54321".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(forwarded_for(&headers, addr), "203.0.113.7");

        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(forwarded_for(&headers, addr), "198.51.100.2, 203.0.113.7");
    }

    #[test]
    fn outbound_request_rewrites_host() {
        let uri: Uri = "https://geo.example.com:6443/rest/info".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("proxy.local"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let addr: SocketAddr = "203.0.113.7:54321".parse().unwrap();
        let request =
            build_outbound_request(&Method::GET, &headers, &uri, Bytes::new(), addr).unwrap();

        assert_eq!(
            request.headers().get(header::HOST).unwrap(),
            "geo.example.com:6443"
        );
        assert!(request.headers().get(header::CONNECTION).is_none());
        assert_eq!(
            request.headers().get(header::ACCEPT).unwrap(),
            "application/json"
        );
        assert_eq!(
            request.headers().get("x-forwarded-for").unwrap(),
            "203.0.113.7"
        );
    }

    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::routing::{get, post};

    use crate::config::ProxyConfig;
    use crate::ratemeter::RateMeter;
    use crate::rules::{ReferrerList, RuleTable};
    use crate::status::ProxyStats;
    use crate::tokens::TokenCache;

    async fn spawn_upstream(router: axum::Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            config: ProxyConfig::default(),
            rules: Arc::new(RuleTable::compile(&[])),
            referrers: ReferrerList::compile(&["*".to_string()], false),
            meter: Arc::new(RateMeter::new()),
            tokens: TokenCache::new(build_upstream_client(), Duration::from_secs(5)),
            client: build_upstream_client(),
            stats: ProxyStats::new(),
            upstream_timeout: Duration::from_secs(5),
        })
    }

    fn client_addr() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    #[tokio::test]
    async fn proxies_upstream_response_with_content_type_rewrite() {
        let app = axum::Router::new().route(
            "/rest/capabilities",
            get(|| async {
                Response::builder()
                    .header(header::CONTENT_TYPE, "application/vnd.ogc.wms_xml")
                    .header("x-upstream", "yes")
                    .body(Body::from("<WMT_MS_Capabilities/>"))
                    .unwrap()
            }),
        );
        let addr = spawn_upstream(app).await;
        let state = test_state();

        let rule = compile(ServerUrlConfig {
            url: format!("http://{addr}/rest"),
            match_all: true,
            ..ServerUrlConfig::default()
        });
        let parsed = parse_url_request(
            &format!("/proxy/http/{addr}/rest/capabilities"),
            &listen(),
            true,
        )
        .unwrap();

        let response = handle_proxy(
            &state,
            parsed,
            Some((0, &rule)),
            "*",
            Method::GET,
            HeaderMap::new(),
            Body::empty(),
            client_addr(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/xml"
        );
        assert_eq!(response.headers().get("x-upstream").unwrap(), "yes");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"<WMT_MS_Capabilities/>");
    }

    #[tokio::test]
    async fn stale_token_triggers_exactly_one_refresh() {
        let token_calls = Arc::new(AtomicU32::new(0));
        let data_calls = Arc::new(AtomicU32::new(0));

        let token_counter = token_calls.clone();
        let data_counter = data_calls.clone();
        let app = axum::Router::new()
            .route(
                "/sharing/generateToken",
                post(move || {
                    let calls = token_counter.clone();
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        axum::Json(serde_json::json!({ "token": format!("tok-{n}") }))
                    }
                }),
            )
            .route(
                "/rest/data",
                get(move || {
                    let calls = data_counter.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            Response::builder()
                                .status(StatusCode::from_u16(498).unwrap())
                                .body(Body::from("invalid token"))
                                .unwrap()
                        } else {
                            Response::new(Body::from("payload"))
                        }
                    }
                }),
            );
        let addr = spawn_upstream(app).await;
        let state = test_state();

        let rule = compile(ServerUrlConfig {
            url: format!("http://{addr}/rest"),
            match_all: true,
            username: Some("svc".to_string()),
            password: Some("secret".to_string()),
            token_service_url: Some(format!("http://{addr}/sharing/generateToken")),
            ..ServerUrlConfig::default()
        });
        let parsed =
            parse_url_request(&format!("/proxy/http/{addr}/rest/data"), &listen(), true).unwrap();

        let response = handle_proxy(
            &state,
            parsed,
            Some((0, &rule)),
            "*",
            Method::GET,
            HeaderMap::new(),
            Body::empty(),
            client_addr(),
        )
        .await;

        // The client sees one clean 200; the 498 stayed internal.
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"payload");
        assert_eq!(token_calls.load(Ordering::SeqCst), 2);
        assert_eq!(data_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_upstream_rejection_passes_through() {
        let token_calls = Arc::new(AtomicU32::new(0));
        let token_counter = token_calls.clone();
        let app = axum::Router::new()
            .route(
                "/sharing/generateToken",
                post(move || {
                    let calls = token_counter.clone();
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        axum::Json(serde_json::json!({ "token": format!("tok-{n}") }))
                    }
                }),
            )
            .route(
                "/rest/data",
                get(|| async {
                    Response::builder()
                        .status(StatusCode::from_u16(499).unwrap())
                        .body(Body::from("token required"))
                        .unwrap()
                }),
            );
        let addr = spawn_upstream(app).await;
        let state = test_state();

        let rule = compile(ServerUrlConfig {
            url: format!("http://{addr}/rest"),
            match_all: true,
            username: Some("svc".to_string()),
            password: Some("secret".to_string()),
            token_service_url: Some(format!("http://{addr}/sharing/generateToken")),
            ..ServerUrlConfig::default()
        });
        let parsed =
            parse_url_request(&format!("/proxy/http/{addr}/rest/data"), &listen(), true).unwrap();

        let response = handle_proxy(
            &state,
            parsed,
            Some((0, &rule)),
            "*",
            Method::GET,
            HeaderMap::new(),
            Body::empty(),
            client_addr(),
        )
        .await;

        // Retried once, then the upstream verdict is forwarded verbatim.
        assert_eq!(response.status().as_u16(), 499);
        assert_eq!(token_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreachable_upstream_yields_standard_error_body() {
        // Grab a free port and release it so the connect is refused.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let state = test_state();
        let rule = compile(ServerUrlConfig {
            url: format!("http://{addr}/rest"),
            match_all: true,
            ..ServerUrlConfig::default()
        });
        let parsed =
            parse_url_request(&format!("/proxy/http/{addr}/rest/info"), &listen(), true).unwrap();

        let response = handle_proxy(
            &state,
            parsed,
            Some((0, &rule)),
            "*",
            Method::GET,
            HeaderMap::new(),
            Body::empty(),
            client_addr(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["code"], 500);
        assert_eq!(value["error"]["details"], value["error"]["message"]);
        assert!(value["request"].as_str().unwrap().contains("/rest/info"));
    }

    #[tokio::test]
    async fn request_body_and_method_survive_the_hop() {
        let app = axum::Router::new().route(
            "/rest/submit",
            post(|body: String| async move { format!("echo:{body}") }),
        );
        let addr = spawn_upstream(app).await;
        let state = test_state();

        let rule = compile(ServerUrlConfig {
            url: format!("http://{addr}/rest"),
            match_all: true,
            ..ServerUrlConfig::default()
        });
        let parsed =
            parse_url_request(&format!("/proxy/http/{addr}/rest/submit"), &listen(), true)
                .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain"),
        );
        let response = handle_proxy(
            &state,
            parsed,
            Some((0, &rule)),
            "*",
            Method::POST,
            headers,
            Body::from("f=json&where=1%3D1"),
            client_addr(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"echo:f=json&where=1%3D1");
    }
}
