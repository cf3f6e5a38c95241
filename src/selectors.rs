//! CSS selector evaluation against already-fetched HTML: does a selector
//! match (and is it even valid syntax), and is the page showing a Cloudflare
//! interstitial. Used by the plain-HTTP flow to decide whether a response is
//! good enough to return as-is or whether the request needs to be escalated
//! to a full browser render.

use scraper::{Html, Selector};

use crate::error::FetchError;

/// Selectors and text fragments that show up on a Cloudflare "checking your
/// browser" interstitial. Matching any of these means the plain HTTP
/// response is not the real page.
const CLOUDFLARE_CHALLENGE_SELECTORS: &[&str] = &[
    "#challenge-running",
    "#challenge-body-text",
    "#challenge-stage",
    "#cf-spinner-please-wait",
    ".cf-browser-verification",
    "form#challenge-form",
    "div[data-translate='checking_browser']",
];

const CLOUDFLARE_TEXT_MARKERS: &[&str] = &[
    "checking your browser before accessing",
    "please stand by, while we are checking your browser",
    "ddos protection by cloudflare",
    "enable javascript and cookies to continue",
];

/// Parse `selector` and report whether it matches anything in `html`.
/// A syntactically invalid selector is a client error, not a miss, so it's
/// surfaced as a [`FetchError::Validation`] naming `field` rather than
/// folding into a `false` result.
pub fn selector_exists(html: &Html, selector: &str, field: &str) -> Result<bool, FetchError> {
    let parsed = Selector::parse(selector).map_err(|err| FetchError::Validation {
        field: field.to_string(),
        detail: format!("invalid CSS selector for {field}: {selector} ({err:?})"),
    })?;
    Ok(html.select(&parsed).next().is_some())
}

/// Does `html` contain a Cloudflare challenge marker, either as a known
/// selector or as one of the interstitial's stock phrases?
pub fn detect_cloudflare_challenge(html: &Html) -> bool {
    for raw in CLOUDFLARE_CHALLENGE_SELECTORS {
        if let Ok(selector) = Selector::parse(raw) {
            if html.select(&selector).next().is_some() {
                return true;
            }
        }
    }
    let text: String = html
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    CLOUDFLARE_TEXT_MARKERS
        .iter()
        .any(|marker| text.contains(marker))
}

/// Evaluate a plain-HTTP response body against the caller's wait conditions.
///
/// Returns `(wait_present, blocking_selector)`:
/// - `wait_present` is `true` when no `wait_for_element` was requested, or
///   when it was requested and is present in the document.
/// - `blocking_selector` names the first entry in `browser_on_elements` that
///   matched, if any — its presence means the caller asked to force a
///   browser render whenever this selector shows up (e.g. an anti-bot
///   placeholder), so the plain response should not be trusted even though
///   it parsed fine.
///
/// A Cloudflare challenge is detected as a side effect but intentionally not
/// part of the returned tuple: the call site only acts on `wait_present` and
/// `blocking_selector`, treating a Cloudflare page as just another case
/// where the requested element never showed up.
pub fn evaluate_plain_html(
    html: &str,
    wait_for_element: Option<&str>,
    browser_on_elements: &[String],
) -> Result<(bool, Option<String>), FetchError> {
    let document = Html::parse_document(html);

    let wait_present = match wait_for_element {
        Some(selector) => selector_exists(&document, selector, "wait_for_element")?,
        None => true,
    };

    let mut blocking_selector = None;
    for selector in browser_on_elements {
        if selector_exists(&document, selector, "browser_on_elements")? {
            blocking_selector = Some(selector.clone());
            break;
        }
    }

    let _ = detect_cloudflare_challenge(&document);

    Ok((wait_present, blocking_selector))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_exists_finds_present_element() {
        let html = Html::parse_document("<html><body><div id='x'>hi</div></body></html>");
        assert!(selector_exists(&html, "#x", "wait_for_element").unwrap());
    }

    #[test]
    fn selector_exists_false_for_absent_element() {
        let html = Html::parse_document("<html><body><div id='x'>hi</div></body></html>");
        assert!(!selector_exists(&html, "#y", "wait_for_element").unwrap());
    }

    #[test]
    fn selector_exists_rejects_invalid_syntax() {
        let html = Html::parse_document("<html><body></body></html>");
        let err = selector_exists(&html, "##bad", "wait_for_element").unwrap_err();
        match err {
            FetchError::Validation { field, .. } => assert_eq!(field, "wait_for_element"),
            other => panic!("expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn detect_cloudflare_challenge_matches_known_selector() {
        let html = Html::parse_document("<html><body><div id='challenge-running'></div></body></html>");
        assert!(detect_cloudflare_challenge(&html));
    }

    #[test]
    fn detect_cloudflare_challenge_matches_text_marker() {
        let html =
            Html::parse_document("<html><body>DDoS protection by Cloudflare</body></html>");
        assert!(detect_cloudflare_challenge(&html));
    }

    #[test]
    fn detect_cloudflare_challenge_false_for_normal_page() {
        let html = Html::parse_document("<html><body><p>hello world</p></body></html>");
        assert!(!detect_cloudflare_challenge(&html));
    }

    #[test]
    fn evaluate_plain_html_no_wait_condition_is_present() {
        let (wait_present, blocking) =
            evaluate_plain_html("<html><body></body></html>", None, &[]).unwrap();
        assert!(wait_present);
        assert!(blocking.is_none());
    }

    #[test]
    fn evaluate_plain_html_detects_missing_wait_target() {
        let (wait_present, _) =
            evaluate_plain_html("<html><body></body></html>", Some("#missing"), &[]).unwrap();
        assert!(!wait_present);
    }

    #[test]
    fn evaluate_plain_html_reports_first_matching_blocking_selector() {
        let html = "<html><body><div class='antibot'></div></body></html>";
        let (_, blocking) = evaluate_plain_html(
            html,
            None,
            &[".missing".to_string(), ".antibot".to_string()],
        )
        .unwrap();
        assert_eq!(blocking, Some(".antibot".to_string()));
    }

    #[test]
    fn evaluate_plain_html_propagates_invalid_selector_error() {
        let err = evaluate_plain_html("<html></html>", Some("##bad"), &[]).unwrap_err();
        assert!(matches!(err, FetchError::Validation { .. }));
    }
}
