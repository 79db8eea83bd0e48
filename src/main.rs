//! geoproxy - forwarding reverse proxy for geospatial REST services.
//!
//! Each request is validated against a referrer allow-list, matched to a
//! configured upstream rule, admitted through a per-referrer rate meter,
//! enriched with upstream credentials where the rule requires them, and
//! streamed to its upstream.

mod config;
mod dispatch;
mod error;
mod ratemeter;
mod rules;
mod status;
mod tokens;
mod urls;

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use hyper_util::rt::TokioIo;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::signal;
use tokio_rustls::TlsAcceptor;
use tower::Service;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::ProxyConfig;
use crate::dispatch::UpstreamClient;
use crate::error::ProxyError;
use crate::ratemeter::RateMeter;
use crate::rules::{ReferrerList, RuleTable};
use crate::status::ProxyStats;
use crate::tokens::TokenCache;

/// Shared per-process state handed to every request.
pub struct AppState {
    pub config: ProxyConfig,
    pub rules: Arc<RuleTable>,
    pub referrers: ReferrerList,
    pub meter: Arc<RateMeter>,
    pub tokens: TokenCache,
    pub client: UpstreamClient,
    pub stats: ProxyStats,
    pub upstream_timeout: Duration,
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "proxy-config.json".to_string());
    let loaded = match config::load_config(Path::new(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("geoproxy: {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&loaded.proxy_config) {
        eprintln!("geoproxy: {e:#}");
        std::process::exit(1);
    }

    info!(
        "geoproxy {} starting from {}",
        status::VERSION,
        config_path
    );

    let rules = Arc::new(RuleTable::compile(&loaded.server_urls));
    if rules.is_empty() && loaded.proxy_config.must_match {
        warn!("no upstream rules configured; every proxied request will be refused");
    }
    let referrers = ReferrerList::compile(
        &loaded.proxy_config.allowed_referrers,
        loaded.proxy_config.match_all_referrer,
    );
    let meter = Arc::new(RateMeter::new());
    let client = dispatch::build_upstream_client();
    let upstream_timeout = Duration::from_secs(loaded.proxy_config.upstream_timeout_secs);
    let tokens = TokenCache::new(client.clone(), upstream_timeout);

    info!("compiled {} upstream rules", rules.len());
    let reaper = meter.spawn_reaper();

    let state = Arc::new(AppState {
        config: loaded.proxy_config.clone(),
        rules,
        referrers,
        meter,
        tokens,
        client,
        stats: ProxyStats::new(),
        upstream_timeout,
    });

    let app = Router::new()
        .fallback(handle_request)
        .with_state(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let result = if state.config.use_https {
        serve_tls(addr, app, &state.config).await
    } else {
        serve_plain(addr, app).await
    };

    reaper.abort();
    if let Err(e) = result {
        error!("server error: {e:#}");
        std::process::exit(1);
    }
    info!("geoproxy stopped");
}

/// Fallback handler running the per-request pipeline.
async fn handle_request(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
) -> Response {
    state.stats.record_attempt();

    let incoming = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let path = req.uri().path().to_string();
    let headers = req.headers().clone();
    let raw_referrer = headers
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    debug!("request {} from {}", incoming, addr);

    // The liveness probe bypasses referrer and rate checks.
    if path == state.config.ping_path {
        return status::ping_response(raw_referrer.as_deref());
    }

    let referrer_key = match state.referrers.validate(raw_referrer.as_deref()) {
        Some(key) => key,
        None => {
            state.stats.record_error();
            let denied = raw_referrer.unwrap_or_default();
            warn!("rejected referrer {:?} for {}", denied, incoming);
            return ProxyError::ReferrerDenied(denied).to_response(&incoming);
        }
    };

    if path == state.config.status_path {
        return status::status_page(
            &state.stats,
            &state.referrers.display_entries(),
            &state.meter.database_dump(),
        );
    }

    let parsed = match urls::parse_url_request(
        &incoming,
        &state.config.listen_uri,
        state.config.must_match,
    ) {
        Some(parsed) => parsed,
        None => {
            state.stats.record_error();
            return ProxyError::Parse(incoming.clone()).to_response(&incoming);
        }
    };
    debug!(
        "parsed {} into {} ({})",
        parsed.listen_path, parsed.proxy_path, parsed.protocol
    );

    let request_parts = urls::request_parts(&parsed);
    let matched = state.rules.find(&request_parts);
    if matched.is_none() && state.config.must_match {
        state.stats.record_error();
        debug!("no rule for {}", parsed.proxy_path);
        return ProxyError::NoRuleMatch(parsed.proxy_path.clone()).to_response(&incoming);
    }

    if let Some((index, rule)) = matched {
        match state.meter.is_under_rate(&referrer_key, index, rule) {
            Ok(true) => {}
            Ok(false) => {
                state.stats.record_error();
                debug!("throttled {} for {}", referrer_key, rule.url);
                return ProxyError::RateExceeded(referrer_key.clone()).to_response(&incoming);
            }
            Err(e) => {
                state.stats.record_error();
                error!("{e}");
                return e.to_response(&incoming);
            }
        }
    }

    let method = req.method().clone();
    let body = req.into_body();
    let response = dispatch::handle_proxy(
        &state,
        parsed,
        matched,
        &referrer_key,
        method,
        headers,
        body,
        addr,
    )
    .await;

    if response.status().is_server_error() {
        state.stats.record_error();
    } else {
        state.stats.record_valid();
    }
    response
}

async fn serve_plain(addr: SocketAddr, app: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("geoproxy listening on http://{}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn serve_tls(addr: SocketAddr, app: Router, config: &ProxyConfig) -> anyhow::Result<()> {
    let tls_config = load_tls_config(config)?;
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("geoproxy listening on https://{}", addr);

    loop {
        let (stream, remote_addr) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(_) => continue,
            },
            _ = shutdown_signal() => return Ok(()),
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    let io = TokioIo::new(tls_stream);
                    let service = hyper::service::service_fn(
                        move |mut req: hyper::Request<hyper::body::Incoming>| {
                            let mut app = app.clone();
                            async move {
                                req.extensions_mut().insert(ConnectInfo(remote_addr));
                                let req = req.map(axum::body::Body::new);
                                let response = app.call(req).await.unwrap_or_else(|_| {
                                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                                        .into_response()
                                });
                                Ok::<_, std::convert::Infallible>(response)
                            }
                        },
                    );

                    if let Err(err) = hyper_util::server::conn::auto::Builder::new(
                        hyper_util::rt::TokioExecutor::new(),
                    )
                    .serve_connection(io, service)
                    .await
                    {
                        if !is_common_connection_error(err.as_ref()) {
                            error!("error serving connection: {err:?}");
                        }
                    }
                }
                Err(e) => {
                    if !is_common_connection_error(&e) {
                        warn!("TLS accept error: {e}");
                    }
                }
            }
        });
    }
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        return;
    }
    info!("shutdown signal received");
}

/// Whether an error is a routine client disconnect not worth logging loudly.
fn is_common_connection_error(err: &dyn std::error::Error) -> bool {
    let text = format!("{err:?}");
    text.contains("BrokenPipe")
        || text.contains("ConnectionReset")
        || text.contains("UnexpectedEof")
        || text.contains("ConnectionAborted")
        || text.contains("NotConnected")
        || text.contains("TimedOut")
        || text.contains("IncompleteMessage")
}

fn load_tls_config(config: &ProxyConfig) -> anyhow::Result<rustls::ServerConfig> {
    let (certs, key) = if let Some(bundle) = &config.https_pfx_file {
        load_pem_bundle(Path::new(bundle))?
    } else {
        let cert_path = config
            .https_certificate_file
            .as_ref()
            .context("useHTTPS requires httpsCertificateFile or httpsPfxFile")?;
        let key_path = config
            .https_key_file
            .as_ref()
            .context("useHTTPS requires httpsKeyFile or httpsPfxFile")?;
        load_key_pair(Path::new(cert_path), Path::new(key_path))?
    };

    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("invalid TLS certificate or key")
}

fn load_key_pair(
    cert_path: &Path,
    key_path: &Path,
) -> anyhow::Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert_file = &mut BufReader::new(
        File::open(cert_path).with_context(|| format!("failed to open {}", cert_path.display()))?,
    );
    let certs = rustls_pemfile::certs(cert_file).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        anyhow::bail!("no certificates found in {}", cert_path.display());
    }

    let key_file = &mut BufReader::new(
        File::open(key_path).with_context(|| format!("failed to open {}", key_path.display()))?,
    );
    let key = read_private_key(key_file)
        .with_context(|| format!("no usable private key in {}", key_path.display()))?;
    Ok((certs, key))
}

/// A combined PEM bundle carrying both the certificate chain and the key.
fn load_pem_bundle(
    path: &Path,
) -> anyhow::Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let raw = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(raw.as_slice()))
        .collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        anyhow::bail!("no certificates found in {}", path.display());
    }
    let key = read_private_key(&mut BufReader::new(raw.as_slice()))
        .with_context(|| format!("no usable private key in {}", path.display()))?;
    Ok((certs, key))
}

fn read_private_key(reader: &mut dyn std::io::BufRead) -> anyhow::Result<PrivateKeyDer<'static>> {
    for item in rustls_pemfile::read_all(reader) {
        match item? {
            rustls_pemfile::Item::Pkcs1Key(key) => return Ok(key.into()),
            rustls_pemfile::Item::Pkcs8Key(key) => return Ok(key.into()),
            rustls_pemfile::Item::Sec1Key(key) => return Ok(key.into()),
            _ => {}
        }
    }
    anyhow::bail!("no private key found")
}

fn init_logging(config: &ProxyConfig) -> anyhow::Result<()> {
    let filter = config.log_level.to_filter();

    let console_layer = config
        .log_to_console
        .then(|| tracing_subscriber::fmt::layer().with_target(false));

    let file_layer = match log_file_target(config) {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn log_file_target(config: &ProxyConfig) -> Option<PathBuf> {
    let name = config.log_file_name.as_deref()?;
    Some(match config.log_file_path.as_deref() {
        Some(dir) => Path::new(dir).join(name),
        None => PathBuf::from(name),
    })
}
