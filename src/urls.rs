//! Tolerant URL handling for the proxy's request encodings.
//!
//! Clients reach an upstream through several equivalent spellings
//! (`/proxy/http/host/path`, `/proxy?http://host/path`, `/proxy/host/path`),
//! and rules carry wildcard parts. Nothing here is an RFC URL, so the parsing
//! is deliberate string surgery over an ordered separator table.

/// A request line decomposed into the proxy's own terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    /// The local prefix the proxy answered on.
    pub listen_path: String,
    /// The encoded upstream target, always with one leading `/`.
    pub proxy_path: String,
    /// `http`, `https`, or `*` when the encoding carried no scheme.
    pub protocol: String,
    /// The raw query string, without the `?`.
    pub query: String,
}

/// URL parts for rule and referrer matching. Any field may be the literal
/// `*`, which matches anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub protocol: String,
    pub hostname: String,
    pub port: String,
    pub path: String,
    pub query: String,
}

/// Separators embedded as a path segment; checked first, in this order.
const SEGMENT_HINTS: [(&str, &str); 3] = [("/http/", "http"), ("/https/", "https"), ("/*/", "*")];

/// Query-style separators carrying a full scheme; checked after the segment
/// hints, in this order.
const QUERY_HINTS: [(&str, &str); 4] = [
    ("?http://", "http"),
    ("?https://", "https"),
    ("&http://", "http"),
    ("&https://", "https"),
];

/// Decompose an incoming request line into listen path, upstream target,
/// protocol and query. Returns `None` for an empty request, or when no
/// configured listen prefix matches and `must_match` holds.
pub fn parse_url_request(
    incoming: &str,
    listen_uris: &[String],
    must_match: bool,
) -> Option<ParsedRequest> {
    if incoming.is_empty() {
        return None;
    }

    for (separator, protocol) in SEGMENT_HINTS.iter().chain(QUERY_HINTS.iter()) {
        if let Some(at) = incoming.find(separator) {
            let listen_path = incoming[..at].to_string();
            let (proxy_path, query) = split_query(&lead_slash(&incoming[at + separator.len()..]));
            return Some(ParsedRequest {
                listen_path,
                proxy_path,
                protocol: (*protocol).to_string(),
                query,
            });
        }
    }

    // No protocol hint: split on the last occurrence of a listen prefix.
    for uri in listen_uris {
        if uri.is_empty() {
            continue;
        }
        if let Some(at) = incoming.rfind(uri.as_str()) {
            let end = at + uri.len();
            let (proxy_path, query) = split_query(&lead_slash(&incoming[end..]));
            return Some(ParsedRequest {
                listen_path: incoming[..end].to_string(),
                proxy_path,
                protocol: "*".to_string(),
                query,
            });
        }
    }

    if must_match {
        return None;
    }
    let (proxy_path, query) = split_query(&lead_slash(incoming));
    Some(ParsedRequest {
        listen_path: String::new(),
        proxy_path,
        protocol: "*".to_string(),
        query,
    })
}

fn lead_slash(rest: &str) -> String {
    format!("/{}", rest.trim_start_matches('/'))
}

fn split_query(path: &str) -> (String, String) {
    match path.find('?') {
        Some(at) => (path[..at].to_string(), path[at + 1..].to_string()),
        None => (path.to_string(), String::new()),
    }
}

/// Normalize a possibly partial URL into [`UrlParts`]. Scheme-less input is
/// parsed as path-only, a missing hostname is peeled off the leading path
/// segment, a trailing `:` is stripped from the protocol, and empty fields
/// become `*`.
pub fn parse_and_fix_url_parts(url: &str) -> UrlParts {
    let (without_query, query) = split_query(url.trim());

    let (mut protocol, mut rest) = match without_query.find("://") {
        Some(at) => (
            without_query[..at].to_string(),
            without_query[at + 3..].to_string(),
        ),
        None => (String::new(), without_query),
    };
    // A bare "https:" style token is a protocol, not a host.
    if protocol.is_empty() && rest.len() > 1 && rest.ends_with(':') && !rest.contains(['/', '.']) {
        protocol = rest.trim_end_matches(':').to_string();
        rest = String::new();
    }

    let (mut hostname, mut path) = if protocol.is_empty() {
        (String::new(), rest)
    } else {
        match rest.find('/') {
            Some(at) => (rest[..at].to_string(), rest[at..].to_string()),
            None => (rest, String::new()),
        }
    };

    if hostname.is_empty() && !path.is_empty() && path != "*" {
        let bare = path.trim_start_matches('/');
        match bare.find('/') {
            Some(at) => {
                hostname = bare[..at].to_string();
                path = bare[at..].to_string();
            }
            None => {
                hostname = bare.to_string();
                path = String::new();
            }
        }
    }

    let mut port = String::new();
    if let Some(at) = hostname.rfind(':') {
        port = hostname[at + 1..].to_string();
        hostname.truncate(at);
    }

    UrlParts {
        protocol: star_if_empty(protocol),
        hostname: star_if_empty(hostname),
        port: star_if_empty(port),
        path: star_if_empty(path),
        query,
    }
}

fn star_if_empty(value: String) -> String {
    if value.is_empty() {
        "*".to_string()
    } else {
        value
    }
}

/// Segment-wise domain comparison: counts must agree, and each pattern
/// segment is `*` or a case-insensitive match.
pub fn domains_match(pattern: &str, candidate: &str) -> bool {
    if pattern == "*" || candidate == "*" {
        return true;
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let candidate: Vec<&str> = candidate.split('.').collect();
    if pattern.len() != candidate.len() {
        return false;
    }
    pattern
        .iter()
        .zip(candidate.iter())
        .all(|(p, c)| *p == "*" || p.eq_ignore_ascii_case(c))
}

pub fn protocols_match(a: &str, b: &str) -> bool {
    a == "*" || b == "*" || a.eq_ignore_ascii_case(b)
}

pub fn ports_match(a: &str, b: &str) -> bool {
    a == "*" || b == "*" || a == b
}

/// Rule path policy: `match_all` rules accept any path under the rule's
/// prefix, others require equality.
pub fn paths_match(rule_path: &str, request_path: &str, match_all: bool) -> bool {
    if rule_path == "*" {
        return true;
    }
    let rule = rule_path.to_ascii_lowercase();
    let request = request_path.to_ascii_lowercase();
    if match_all {
        request.starts_with(&rule)
    } else {
        request == rule
    }
}

/// Whether a request's parts fall under a rule's parts.
pub fn url_parts_match(request: &UrlParts, rule: &UrlParts, match_all: bool) -> bool {
    domains_match(&rule.hostname, &request.hostname)
        && protocols_match(&rule.protocol, &request.protocol)
        && ports_match(&rule.port, &request.port)
        && paths_match(&rule.path, &request.path, match_all)
}

/// URL parts of the upstream target encoded in a parsed request.
pub fn request_parts(parsed: &ParsedRequest) -> UrlParts {
    let mut parts = parse_and_fix_url_parts(&parsed.proxy_path);
    parts.protocol = parsed.protocol.clone();
    if !parsed.query.is_empty() {
        parts.query = parsed.query.clone();
    }
    parts
}

/// Build the outbound URL from a matched rule: the rule URL plus the
/// request's trailing path, with the merged query string appended.
pub fn build_outbound_url(
    rule_url: &str,
    rule_parts: &UrlParts,
    request: &UrlParts,
    request_query: &str,
    token: Option<(&str, &str)>,
) -> String {
    let trailing = if rule_parts.path == "*" || request.path == "*" {
        String::new()
    } else {
        request.path[rule_parts.path.len().min(request.path.len())..].to_string()
    };

    let base = rule_url.split('?').next().unwrap_or(rule_url);
    let mut url = join_path(base, &trailing);
    let merged = merge_query(&rule_parts.query, request_query, token);
    if !merged.is_empty() {
        url.push('?');
        url.push_str(&merged);
    }
    url
}

fn join_path(base: &str, trailing: &str) -> String {
    if trailing.is_empty() {
        return base.to_string();
    }
    let base = base.trim_end_matches('/');
    if trailing.starts_with('/') {
        format!("{base}{trailing}")
    } else {
        format!("{base}/{trailing}")
    }
}

/// Merge query strings: rule parameters first, then request parameters, with
/// the rule winning conflicts; the token parameter goes last and overwrites.
pub fn merge_query(rule_query: &str, request_query: &str, token: Option<(&str, &str)>) -> String {
    let mut merged = parse_query(rule_query);
    for (key, value) in parse_query(request_query) {
        if !merged.iter().any(|(existing, _)| *existing == key) {
            merged.push((key, value));
        }
    }
    if let Some((param, value)) = token {
        merged.retain(|(key, _)| key != param);
        merged.push((param.to_string(), Some(value.to_string())));
    }
    merged
        .into_iter()
        .map(|(key, value)| match value {
            Some(value) => format!("{key}={value}"),
            None => key,
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn parse_query(query: &str) -> Vec<(String, Option<String>)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), Some(value.to_string())),
            None => (pair.to_string(), None),
        })
        .collect()
}
