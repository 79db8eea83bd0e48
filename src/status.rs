//! Request counters and the local ping/status endpoints.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};

use crate::ratemeter::BucketSnapshot;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Process-wide request counters.
pub struct ProxyStats {
    pub attempted_requests: AtomicU64,
    pub valid_processed_requests: AtomicU64,
    pub error_processed_requests: AtomicU64,
    start_time: Instant,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self {
            attempted_requests: AtomicU64::new(0),
            valid_processed_requests: AtomicU64::new(0),
            error_processed_requests: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_attempt(&self) {
        self.attempted_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_valid(&self) {
        self.valid_processed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_processed_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for ProxyStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Liveness probe; no referrer or rate-meter checks apply.
pub fn ping_response(referrer: Option<&str>) -> Response {
    let body = serde_json::json!({
        "Proxy Version": VERSION,
        "Configuration File": "OK",
        "Log File": "OK",
        "referrer": referrer.unwrap_or(""),
    });
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// The referrer-gated status page: version, uptime, counters, the allowed
/// referrer list and a dump of the rate-meter buckets.
pub fn status_page(
    stats: &ProxyStats,
    allowed_referrers: &[String],
    meter_dump: &[BucketSnapshot],
) -> Response {
    let mut referrer_items = String::new();
    for referrer in allowed_referrers {
        referrer_items.push_str(&format!("<li><code>{referrer}</code></li>\n"));
    }
    if referrer_items.is_empty() {
        referrer_items.push_str("<li><em>none configured</em></li>\n");
    }

    let mut meter_rows = String::new();
    for row in meter_dump {
        meter_rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{:.1}</td><td>{:.0}</td><td>{}s ago</td></tr>\n",
            row.referrer,
            row.rule_url,
            row.tokens,
            row.capacity,
            row.idle.as_secs()
        ));
    }
    if meter_rows.is_empty() {
        meter_rows.push_str("<tr><td colspan=\"5\"><em>no active buckets</em></td></tr>\n");
    }

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta http-equiv="refresh" content="10">
    <title>geoproxy status</title>
    <style>
        body {{ font-family: sans-serif; margin: 2em; color: #222; }}
        h1 {{ border-bottom: 2px solid #888; padding-bottom: 0.3em; }}
        table {{ border-collapse: collapse; margin-top: 0.5em; }}
        th, td {{ border: 1px solid #aaa; padding: 6px 12px; text-align: left; }}
        th {{ background: #eee; }}
        .counters span {{ margin-right: 2em; }}
    </style>
</head>
<body>
    <h1>geoproxy {version}</h1>
    <p>Uptime: {uptime}</p>
    <p class="counters">
        <span>Attempted: <strong>{attempted}</strong></span>
        <span>Processed: <strong>{processed}</strong></span>
        <span>Rejected: <strong>{rejected}</strong></span>
    </p>

    <h2>Allowed referrers</h2>
    <ul>
{referrers}    </ul>

    <h2>Rate meter</h2>
    <table>
        <thead>
            <tr><th>Referrer</th><th>Rule</th><th>Tokens</th><th>Capacity</th><th>Last use</th></tr>
        </thead>
        <tbody>
{meter_rows}        </tbody>
    </table>
</body>
</html>"#,
        version = VERSION,
        uptime = format_duration(stats.uptime()),
        attempted = stats.attempted_requests.load(Ordering::Relaxed),
        processed = stats.valid_processed_requests.load(Ordering::Relaxed),
        rejected = stats.error_processed_requests.load(Ordering::Relaxed),
        referrers = referrer_items,
        meter_rows = meter_rows,
    );

    Html(html).into_response()
}

/// Format a duration into a human readable string.
fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
