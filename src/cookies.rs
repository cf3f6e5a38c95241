//! `CookieSet` — normalize, merge, and filter cookies across the three
//! representations this service touches: the debug-protocol `Network.Cookie`
//! shape, the HTTP-client jar entries `reqwest` hands back on a response, and
//! the internal [`CookieState`] used everywhere else. Identity is always the
//! normalized `(name, domain, path)` triple; each representation is unified
//! through an explicit converter rather than sharing a struct across layers.

use chromiumoxide::cdp::browser_protocol::network::{Cookie as CdpCookie, CookieParam};

/// A single cookie in the service's internal representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieState {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
    pub secure: Option<bool>,
    pub http_only: Option<bool>,
    pub expires: Option<f64>,
}

impl CookieState {
    /// Identity key: `(name, normalized_domain, path_or_slash)`. Domain is
    /// normalized by stripping a leading dot; path defaults to `"/"`.
    pub fn key(&self) -> (String, String, String) {
        let domain = self
            .domain
            .as_deref()
            .unwrap_or("")
            .trim_start_matches('.')
            .to_string();
        let path = self.path.clone().unwrap_or_else(|| "/".to_string());
        (self.name.clone(), domain, path)
    }
}

/// Build a [`CookieState`] from a debug-protocol cookie record. All fields
/// are copied verbatim.
pub fn from_protocol_cookie(cookie: &CdpCookie) -> CookieState {
    CookieState {
        name: cookie.name.clone(),
        value: cookie.value.clone(),
        domain: Some(cookie.domain.clone()),
        path: Some(cookie.path.clone()),
        secure: Some(cookie.secure),
        http_only: Some(cookie.http_only),
        expires: Some(*cookie.expires),
    }
}

/// Build a [`CookieState`] from an HTTP-client jar entry parsed off a
/// response's `Set-Cookie` header.
pub fn from_httpclient_cookie(cookie: &reqwest::cookie::Cookie<'_>) -> CookieState {
    CookieState {
        name: cookie.name().to_string(),
        value: cookie.value().to_string(),
        domain: cookie.domain().map(str::to_string),
        path: cookie.path().map(str::to_string),
        secure: Some(cookie.secure()),
        http_only: Some(cookie.http_only()),
        expires: cookie
            .expires()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64()),
    }
}

/// Does `cookie` apply to `url`'s host? The cookie matches iff its domain
/// (leading dot stripped) is empty, equals the host, or the host is a
/// dot-suffix of it. A URL with no host matches every cookie.
pub fn matches_url(cookie: &CookieState, url: &url::Url) -> bool {
    let Some(host) = url.host_str() else {
        return true;
    };
    let domain = cookie
        .domain
        .as_deref()
        .unwrap_or("")
        .trim_start_matches('.');
    domain.is_empty() || host == domain || host.ends_with(&format!(".{domain}"))
}

/// Like [`matches_url`], but a cookie with an absent domain is treated as
/// matching the request host (the common case for cookies just read off a
/// plain HTTP response, which carries no explicit `Domain` attribute).
pub fn filter_for_url(cookies: &[CookieState], url: &url::Url) -> Vec<CookieState> {
    let Some(host) = url.host_str() else {
        return cookies.to_vec();
    };
    cookies
        .iter()
        .filter(|cookie| {
            let domain = cookie
                .domain
                .as_deref()
                .unwrap_or(host)
                .trim_start_matches('.');
            domain.is_empty() || host == domain || host.ends_with(&format!(".{domain}"))
        })
        .cloned()
        .collect()
}

/// Left-fold `updates` over `existing`, keyed by `(name, domain, path)`; the
/// latest write wins. Returned in first-insertion order of keys, so repeated
/// merges are idempotent: `merge(merge(a, b), b) == merge(a, b)`.
pub fn merge(existing: &[CookieState], updates: &[CookieState]) -> Vec<CookieState> {
    let mut order: Vec<(String, String, String)> = Vec::new();
    let mut table: std::collections::HashMap<(String, String, String), CookieState> =
        std::collections::HashMap::new();

    for cookie in existing.iter().chain(updates.iter()) {
        let key = cookie.key();
        if !table.contains_key(&key) {
            order.push(key.clone());
        }
        table.insert(key, cookie.clone());
    }

    order
        .into_iter()
        .map(|key| table.remove(&key).expect("key was just inserted"))
        .collect()
}

/// Produce a `Cookie:` header value suitable for an outbound `reqwest`
/// request; each cookie's path defaults to `"/"` if absent.
pub fn to_request_jar(cookies: &[CookieState]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Produce a debug-protocol "set cookie" parameter. If the cookie carries a
/// domain, pass it through; otherwise pass `url` as the scoping hint.
pub fn to_protocol_param(cookie: &CookieState, url: &str) -> CookieParam {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone());
    builder = match &cookie.domain {
        Some(domain) => builder.domain(domain.clone()),
        None => builder.url(url.to_string()),
    };
    if let Some(path) = &cookie.path {
        builder = builder.path(path.clone());
    }
    if let Some(secure) = cookie.secure {
        builder = builder.secure(secure);
    }
    if let Some(http_only) = cookie.http_only {
        builder = builder.http_only(http_only);
    }
    builder.build().expect("name and value are always set")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, domain: Option<&str>, path: Option<&str>, value: &str) -> CookieState {
        CookieState {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.map(str::to_string),
            path: path.map(str::to_string),
            secure: None,
            http_only: None,
            expires: None,
        }
    }

    #[test]
    fn merge_replaces_on_key_collision() {
        let existing = vec![cookie("a", Some("example.com"), Some("/"), "v1")];
        let updates = vec![
            cookie("a", Some("example.com"), Some("/"), "v2"),
            cookie("b", Some("example.com"), Some("/"), "v3"),
        ];
        let merged = merge(&existing, &updates);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "a");
        assert_eq!(merged[0].value, "v2");
        assert_eq!(merged[1].name, "b");
        assert_eq!(merged[1].value, "v3");
    }

    #[test]
    fn merge_is_idempotent() {
        let a = vec![cookie("a", Some("example.com"), Some("/"), "v1")];
        let b = vec![cookie("a", Some("example.com"), Some("/"), "v2")];
        let once = merge(&a, &b);
        let twice = merge(&once, &b);
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_preserves_first_insertion_order() {
        let existing = vec![
            cookie("z", Some("example.com"), Some("/"), "1"),
            cookie("a", Some("example.com"), Some("/"), "2"),
        ];
        let updates = vec![cookie("z", Some("example.com"), Some("/"), "3")];
        let merged = merge(&existing, &updates);
        assert_eq!(merged[0].name, "z");
        assert_eq!(merged[1].name, "a");
    }

    #[test]
    fn matches_url_strips_leading_dot() {
        let cookie = cookie("a", Some(".example.com"), None, "v");
        let url = url::Url::parse("https://example.com/page").unwrap();
        assert!(matches_url(&cookie, &url));
    }

    #[test]
    fn matches_url_allows_subdomain() {
        let cookie = cookie("a", Some("example.com"), None, "v");
        let url = url::Url::parse("https://www.example.com/page").unwrap();
        assert!(matches_url(&cookie, &url));
    }

    #[test]
    fn matches_url_rejects_unrelated_domain() {
        let cookie = cookie("a", Some("example.com"), None, "v");
        let url = url::Url::parse("https://evil.com/page").unwrap();
        assert!(!matches_url(&cookie, &url));
    }

    #[test]
    fn matches_url_empty_domain_matches_everything() {
        let cookie = cookie("a", None, None, "v");
        let url = url::Url::parse("https://example.com/page").unwrap();
        assert!(matches_url(&cookie, &url));
    }

    #[test]
    fn filter_for_url_treats_absent_domain_as_request_host() {
        let url = url::Url::parse("https://example.com/page").unwrap();
        let cookies = vec![
            cookie("a", None, None, "v1"),
            cookie("b", Some("other.com"), None, "v2"),
        ];
        let filtered = filter_for_url(&cookies, &url);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "a");
    }

    #[test]
    fn filter_for_url_is_monotone() {
        let url = url::Url::parse("https://example.com/page").unwrap();
        let base = vec![cookie("a", Some("example.com"), None, "v1")];
        let mut extended = base.clone();
        extended.push(cookie("b", Some("other.com"), None, "v2"));

        let base_filtered = filter_for_url(&base, &url);
        let extended_filtered = filter_for_url(&extended, &url);
        assert_eq!(base_filtered, extended_filtered);
    }

    #[test]
    fn to_request_jar_joins_name_value_pairs() {
        let cookies = vec![
            cookie("a", None, None, "1"),
            cookie("b", None, None, "2"),
        ];
        assert_eq!(to_request_jar(&cookies), "a=1; b=2");
    }
}
