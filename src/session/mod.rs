//! Per-domain session state and the plain/browser fetch flows that update it.
//!
//! A session starts uninitialized: the first request for a domain always
//! goes through [`browser_flow`], which also records the request headers
//! Chromium actually sent. Every later request tries [`plain_flow`] first —
//! a direct HTTP GET replaying those headers and whatever cookies the
//! session has accumulated — and only escalates back to the browser when
//! the plain response looks wrong (missing a required element, matching a
//! caller-specified "force browser" selector, or erroring outright).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::browser::capture::{self, BrowserResponseInfo};
use crate::browser::BrowserPool;
use crate::cookies::{self, CookieState};
use crate::core::config::FetchConfig;
use crate::core::types::FetchRequest;
use crate::error::FetchError;
use crate::selectors::evaluate_plain_html;

pub use state::{SessionState, SessionStore};

mod state;

/// Hop-by-hop and otherwise-unsafe-to-replay headers, dropped whenever
/// headers cross from one transport to another (browser → plain HTTP, or
/// plain HTTP → browser-seeded request).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "proxy-connection",
    "content-length",
    "accept-encoding",
    "upgrade",
    "upgrade-insecure-requests",
    "te",
    "trailers",
    "transfer-encoding",
];

fn sanitize_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| !HOP_BY_HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// The outcome of either flow, normalized before being handed back to the
/// HTTP layer and folded into session state.
pub struct PageResult {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub used_browser: bool,
    pub request_headers: HashMap<String, String>,
    pub cookies: Vec<CookieState>,
}

/// A plain-HTTP response captured so it can be replayed into the browser via
/// request interception instead of re-fetching it over the network.
struct PlainSnapshot {
    status_code: u16,
    headers: Vec<(String, String)>,
    body: bytes::Bytes,
    request_headers: HashMap<String, String>,
}

/// Coordinates session lookup and flow selection for a single incoming
/// request. Owns no state itself — it borrows the shared pool/store/client
/// from [`crate::core::app_state::AppState`].
pub struct SessionDispatcher<'a> {
    pub pool: &'a BrowserPool,
    pub store: &'a SessionStore,
    pub http: &'a reqwest::Client,
    pub config: &'a FetchConfig,
}

impl<'a> SessionDispatcher<'a> {
    pub async fn fetch(&self, payload: FetchRequest) -> Result<PageResult, FetchError> {
        let url = url::Url::parse(&payload.url)
            .map_err(|err| FetchError::Validation {
                field: "url".to_string(),
                detail: format!("not a valid URL: {err}"),
            })?;
        let domain = url.host_str().unwrap_or_default().to_lowercase();
        let state = self.store.get_state(&domain).await;

        let mut guard = state.lock().await;
        let result = if !guard.initialized {
            let result = browser_flow(&payload, &guard, &domain, self.pool, self.config, None).await?;
            guard.initialized = true;
            result
        } else {
            plain_flow(&payload, &guard, &domain, self.pool, self.config, self.http).await?
        };

        guard.cookies = result.cookies.clone();
        if result.used_browser {
            guard.request_headers = Some(result.request_headers.clone());
        }
        Ok(result)
    }
}

/// Run the full browser pipeline: lease a tab, navigate (or hydrate a
/// snapshot), wait for the page to settle, capture the response, export
/// cookies. `snapshot` being `Some` means a plain-HTTP fetch already ran and
/// its bytes should be replayed into the browser instead of navigating live.
async fn browser_flow(
    payload: &FetchRequest,
    state: &SessionState,
    domain: &str,
    pool: &BrowserPool,
    config: &FetchConfig,
    snapshot: Option<PlainSnapshot>,
) -> Result<PageResult, FetchError> {
    info!(
        domain,
        mode = if snapshot.is_some() { "snapshot replay" } else { "live navigation" },
        "using browser pipeline"
    );

    let manager = pool.get(domain).await.map_err(FetchError::Browser)?;
    let tab = manager
        .tab(&state.cookies, &payload.url)
        .await
        .map_err(FetchError::Browser)?;

    let (response_info, html): (BrowserResponseInfo, String) = if let Some(snapshot) = &snapshot {
        hydrate_with_snapshot(&tab, &payload.url, snapshot)
            .await
            .map_err(FetchError::Browser)?;
        let html = await_rendered_html(&tab, payload, config).await?;
        (
            BrowserResponseInfo {
                status_code: snapshot.status_code,
                headers: snapshot.headers.clone(),
                request_headers: snapshot.request_headers.clone(),
            },
            html,
        )
    } else {
        // Subscribe before navigating: chromiumoxide does not replay events
        // emitted before a listener is registered, so the two event streams
        // this depends on must be live before `Page.navigate` is issued, not
        // merely scheduled via `tokio::spawn`.
        let capture = capture::subscribe(&tab).await.map_err(FetchError::Browser)?;

        let (frame_tx, frame_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let capture_task = tokio::spawn(capture.await_result(frame_rx, ready_rx));

        let navigate = tab.execute(
            chromiumoxide::cdp::browser_protocol::page::NavigateParams::new(payload.url.clone()),
        );
        let navigated = navigate.await;

        let navigated = match navigated {
            Ok(resp) => resp,
            Err(err) => {
                let _ = frame_tx.send(chromiumoxide::cdp::browser_protocol::page::FrameId::new(
                    String::new(),
                ));
                capture_task.abort();
                return Err(FetchError::NavigationFailed(err.to_string()));
            }
        };

        if let Some(error_text) = &navigated.result.error_text {
            capture_task.abort();
            return Err(FetchError::NavigationFailed(format!(
                "navigation failed for {}: {error_text}",
                payload.url
            )));
        }

        let _ = frame_tx.send(navigated.result.frame_id.clone());

        let html = match await_rendered_html(&tab, payload, config).await {
            Ok(html) => {
                let _ = ready_tx.send(());
                html
            }
            Err(err) => {
                let _ = ready_tx.send(());
                capture_task.abort();
                return Err(err);
            }
        };

        let response_info = capture_task
            .await
            .map_err(|err| FetchError::Browser(anyhow::anyhow!("capture task panicked: {err}")))?
            .map_err(FetchError::Browser)?;

        (response_info, html)
    };

    let effective_headers = match &snapshot {
        None => response_info.request_headers.clone(),
        Some(snapshot) => state
            .request_headers
            .clone()
            .unwrap_or_else(|| snapshot.request_headers.clone()),
    };

    let parsed_url = url::Url::parse(&payload.url)
        .map_err(|err| FetchError::Validation { field: "url".to_string(), detail: err.to_string() })?;
    let cookies = manager.export_cookies(&parsed_url).await;
    let filtered_cookies = cookies::filter_for_url(&cookies, &parsed_url);

    info!(
        domain,
        status = response_info.status_code,
        "browser pipeline complete"
    );

    Ok(PageResult {
        status_code: response_info.status_code,
        headers: response_info.headers,
        body: html,
        used_browser: true,
        request_headers: effective_headers,
        cookies: filtered_cookies,
    })
}

async fn hydrate_with_snapshot(
    tab: &chromiumoxide::Page,
    url: &str,
    snapshot: &PlainSnapshot,
) -> anyhow::Result<()> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use chromiumoxide::cdp::browser_protocol::fetch;
    use chromiumoxide::cdp::browser_protocol::network::ResourceType;
    use chromiumoxide::cdp::browser_protocol::page::NavigateParams;

    tab.execute(fetch::EnableParams {
        patterns: Some(vec![fetch::RequestPattern {
            url_pattern: Some("*".to_string()),
            resource_type: Some(ResourceType::Document),
            request_stage: Some(fetch::RequestStage::Request),
        }]),
        handle_auth_requests: Some(false),
    })
    .await?;

    let mut paused = tab.event_listener::<fetch::EventRequestPaused>().await?;
    tab.execute(NavigateParams::new(url.to_string())).await?;

    let event = futures::StreamExt::next(&mut paused)
        .await
        .ok_or_else(|| anyhow::anyhow!("navigation never produced an interceptable request"))?;

    let header_entries: Vec<fetch::HeaderEntry> = snapshot
        .headers
        .iter()
        .map(|(name, value)| fetch::HeaderEntry {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    let body = STANDARD.encode(&snapshot.body);

    tab.execute(fetch::FulfillRequestParams {
        request_id: event.request_id.clone(),
        response_code: snapshot.status_code as i64,
        response_headers: Some(header_entries),
        binary_response_headers: None,
        body: Some(body),
        response_phrase: None,
    })
    .await?;

    tab.execute(fetch::DisableParams::default()).await?;
    Ok(())
}

async fn await_rendered_html(
    tab: &chromiumoxide::Page,
    payload: &FetchRequest,
    config: &FetchConfig,
) -> Result<String, FetchError> {
    let ready_timeout = Duration::from_secs_f64(
        payload
            .wait_timeout
            .max(config.resolve_ready_state_timeout_secs() as f64),
    );
    let ready_target = config.resolve_ready_state_target();

    debug!(url = %payload.url, target = %ready_target, "waiting for document ready state");
    tokio::time::timeout(ready_timeout, wait_for_ready_state(tab, &ready_target))
        .await
        .map_err(|_| {
            warn!(url = %payload.url, "timed out waiting for ready state");
            FetchError::ReadyStateTimeout
        })?
        .map_err(FetchError::Browser)?;

    if let Some(selector) = &payload.wait_for_element {
        let wait_timeout = Duration::from_secs_f64(payload.wait_timeout);
        debug!(url = %payload.url, selector, "waiting for element");
        tokio::time::timeout(wait_timeout, wait_for_selector(tab, selector))
            .await
            .map_err(|_| {
                warn!(url = %payload.url, selector, "timed out waiting for selector");
                FetchError::SelectorTimeout
            })?
            .map_err(FetchError::Browser)?;
    }

    tab.content().await.map_err(|err| FetchError::Browser(err.into()))
}

async fn wait_for_ready_state(tab: &chromiumoxide::Page, target: &str) -> anyhow::Result<()> {
    loop {
        let state: String = tab
            .evaluate("document.readyState")
            .await?
            .into_value()
            .unwrap_or_default();
        if state == target {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn wait_for_selector(tab: &chromiumoxide::Page, selector: &str) -> anyhow::Result<()> {
    loop {
        if tab.find_element(selector).await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Try a direct HTTP GET first, falling back to [`browser_flow`] whenever
/// the session has no stored headers yet, the request itself fails, or the
/// response fails the caller's wait conditions.
async fn plain_flow(
    payload: &FetchRequest,
    state: &SessionState,
    domain: &str,
    pool: &BrowserPool,
    config: &FetchConfig,
    client: &reqwest::Client,
) -> Result<PageResult, FetchError> {
    let Some(stored_headers) = &state.request_headers else {
        info!(domain, "no stored headers yet; falling back to browser immediately");
        return Box::pin(browser_flow(payload, state, domain, pool, config, None)).await;
    };

    let headers = sanitize_headers(stored_headers);
    let mut header_map = reqwest::header::HeaderMap::new();
    for (name, value) in &headers {
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_bytes()),
            reqwest::header::HeaderValue::from_str(value),
        ) {
            header_map.insert(name, value);
        }
    }
    let cookie_header = cookies::to_request_jar(&state.cookies);
    if !cookie_header.is_empty() {
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&cookie_header) {
            header_map.insert(reqwest::header::COOKIE, value);
        }
    }

    let response = match client.get(&payload.url).headers(header_map).send().await {
        Ok(response) => response,
        Err(err) => {
            warn!(domain, %err, "plain HTTP request failed; falling back to browser");
            return Box::pin(browser_flow(payload, state, domain, pool, config, None)).await;
        }
    };

    let status_code = response.status().as_u16();
    let header_list: Vec<(String, String)> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    let cookie_updates: Vec<CookieState> = response
        .cookies()
        .map(|c| cookies::from_httpclient_cookie(&c))
        .collect();

    let url = url::Url::parse(&payload.url)
        .map_err(|err| FetchError::Validation { field: "url".to_string(), detail: err.to_string() })?;
    let body_bytes = response.bytes().await.map_err(|err| FetchError::Browser(err.into()))?;
    let body_text = String::from_utf8_lossy(&body_bytes).into_owned();

    let merged_cookies = cookies::merge(&state.cookies, &cookie_updates);
    let filtered_cookies = cookies::filter_for_url(&merged_cookies, &url);

    let (wait_present, blocking_selector) =
        evaluate_plain_html(&body_text, payload.wait_for_element.as_deref(), &payload.browser_on_elements)?;

    let mut fallback = false;
    if !wait_present {
        info!(
            domain,
            selector = ?payload.wait_for_element,
            "falling back to browser because wait selector was not present"
        );
        fallback = true;
    }
    if let Some(selector) = &blocking_selector {
        info!(domain, selector, "falling back to browser because blocking selector matched");
        fallback = true;
    }

    if fallback {
        let snapshot = PlainSnapshot {
            status_code,
            headers: header_list,
            body: body_bytes,
            request_headers: headers,
        };
        let fallback_state = SessionState {
            cookies: filtered_cookies,
            initialized: state.initialized,
            request_headers: state.request_headers.clone(),
        };
        return Box::pin(browser_flow(
            payload,
            &fallback_state,
            domain,
            pool,
            config,
            Some(snapshot),
        ))
        .await;
    }

    debug!(domain, status_code, "plain flow succeeded");
    Ok(PageResult {
        status_code,
        headers: header_list,
        body: body_text,
        used_browser: false,
        request_headers: stored_headers.clone(),
        cookies: filtered_cookies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use std::net::SocketAddr;

    #[test]
    fn sanitize_headers_drops_hop_by_hop_case_insensitively() {
        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), "UA/1".to_string());
        headers.insert("Host".to_string(), "example.com".to_string());
        headers.insert("Connection".to_string(), "keep-alive".to_string());
        headers.insert("CONTENT-LENGTH".to_string(), "12".to_string());
        headers.insert("Accept-Language".to_string(), "en".to_string());

        let sanitized = sanitize_headers(&headers);
        assert_eq!(sanitized.len(), 2);
        assert_eq!(sanitized.get("User-Agent"), Some(&"UA/1".to_string()));
        assert_eq!(sanitized.get("Accept-Language"), Some(&"en".to_string()));
        assert!(!sanitized.contains_key("Host"));
        assert!(!sanitized.contains_key("Connection"));
        assert!(!sanitized.contains_key("CONTENT-LENGTH"));
    }

    /// Spins a local server on an ephemeral port, the way the teacher's own
    /// sandbox integration tests do, and runs `plain_flow` directly against
    /// it so the escalation-free success path is exercised without needing a
    /// real browser.
    async fn spawn_local_server(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind failed");
        let addr = listener.local_addr().expect("local_addr failed");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        addr
    }

    async fn ok_page() -> axum::response::Response {
        use axum::http::header;
        use axum::response::IntoResponse;
        (
            [(header::SET_COOKIE, "session=abc123; Path=/")],
            "<html><body><div class='ok'>hi</div></body></html>",
        )
            .into_response()
    }

    fn test_state(request_headers: HashMap<String, String>, cookies: Vec<CookieState>) -> SessionState {
        SessionState {
            cookies,
            initialized: true,
            request_headers: Some(request_headers),
        }
    }

    #[tokio::test]
    async fn plain_flow_succeeds_without_escalating_when_wait_condition_met() {
        let addr = spawn_local_server(Router::new().route("/ok", get(ok_page))).await;
        let pool = BrowserPool::new(crate::core::config::FetchConfig::default());
        let client = reqwest::Client::new();

        let mut stored_headers = HashMap::new();
        stored_headers.insert("user-agent".to_string(), "UA/1".to_string());
        let state = test_state(stored_headers, vec![]);

        let payload = FetchRequest {
            url: format!("http://{addr}/ok"),
            wait_for_element: Some(".ok".to_string()),
            browser_on_elements: vec![],
            wait_timeout: 10.0,
        };

        let result = plain_flow(&payload, &state, "127.0.0.1", &pool, &crate::core::config::FetchConfig::default(), &client)
            .await
            .expect("plain_flow should succeed");

        assert!(!result.used_browser);
        assert_eq!(result.status_code, 200);
        assert!(result.body.contains("hi"));
        assert_eq!(result.request_headers.get("user-agent"), Some(&"UA/1".to_string()));
    }

    #[tokio::test]
    async fn plain_flow_merges_cookies_from_response_into_session_cookies() {
        let addr = spawn_local_server(Router::new().route("/ok", get(ok_page))).await;
        let pool = BrowserPool::new(crate::core::config::FetchConfig::default());
        let client = reqwest::Client::new();

        let mut stored_headers = HashMap::new();
        stored_headers.insert("user-agent".to_string(), "UA/1".to_string());
        let existing_cookie = CookieState {
            name: "session".to_string(),
            value: "stale".to_string(),
            domain: Some("127.0.0.1".to_string()),
            path: Some("/".to_string()),
            secure: None,
            http_only: None,
            expires: None,
        };
        let state = test_state(stored_headers, vec![existing_cookie]);

        let payload = FetchRequest {
            url: format!("http://{addr}/ok"),
            wait_for_element: None,
            browser_on_elements: vec![],
            wait_timeout: 10.0,
        };

        let result = plain_flow(&payload, &state, "127.0.0.1", &pool, &crate::core::config::FetchConfig::default(), &client)
            .await
            .expect("plain_flow should succeed");

        assert!(!result.used_browser);
        let session_cookie = result
            .cookies
            .iter()
            .find(|c| c.name == "session")
            .expect("session cookie present");
        assert_eq!(session_cookie.value, "abc123");
    }
}
