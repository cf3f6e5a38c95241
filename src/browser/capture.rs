//! Reconstructing the final top-level Document response for a live
//! navigation out of a stream of CDP network events.
//!
//! A navigation can produce several `Network.responseReceived` events of
//! type `Document` (redirects each get one). The one that matters is the
//! last one carrying the frame id the navigation actually committed to,
//! which `Page.navigate` only reveals once it returns. So capture has to
//! start listening before the navigate call resolves, buffer every Document
//! response it sees, then once the frame id and a page-ready signal are both
//! in hand, pick the right buffered entry.
//!
//! Subscription and consumption are split into two steps ([`subscribe`] and
//! [`Capture::await_result`]) on purpose: `subscribe` must be awaited
//! directly by the caller, before `Page.navigate` is issued, because
//! chromiumoxide does not replay events emitted before a listener exists.
//! Spawning the whole thing as one task — as opposed to just the background
//! buffering loops — would race the navigate call against the listener
//! registration.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use anyhow::{anyhow, Result};
use chromiumoxide::cdp::browser_protocol::network::{
    EventRequestWillBeSent, EventResponseReceived, RequestId, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::FrameId;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

/// The response the browser actually served for the navigated-to document,
/// plus the request headers Chromium sent — used downstream to decide the
/// session's `effective_headers` for future plain-HTTP attempts.
#[derive(Debug, Clone)]
pub struct BrowserResponseInfo {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub request_headers: HashMap<String, String>,
}

type DocumentEvent = (
    Option<FrameId>,
    u16,
    Vec<(String, String)>,
    HashMap<String, String>,
);

fn headers_from_cdp(headers: &serde_json::Value) -> HashMap<String, String> {
    headers
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn headers_from_cdp_list(headers: &serde_json::Value) -> Vec<(String, String)> {
    headers
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Document-response buffer plus the background tasks feeding it from the
/// two CDP event streams. Produced by [`subscribe`]; consumed once by
/// [`Capture::await_result`].
pub struct Capture {
    document_events: Arc<StdMutex<Vec<DocumentEvent>>>,
    document_available: Arc<Notify>,
    request_task: JoinHandle<()>,
    response_task: JoinHandle<()>,
}

/// Subscribe to the Document-typed `RequestWillBeSent`/`ResponseReceived`
/// events on `page` and start buffering them in the background.
///
/// Callers MUST `.await` this directly — not inside a spawned task — before
/// issuing `Page.navigate`. `page.event_listener` only starts receiving
/// events once its registration round-trip completes; a task spawned with
/// `tokio::spawn` is merely scheduled, not run, so navigating before this
/// call resolves can lose the Document events for that navigation entirely.
pub async fn subscribe(page: &Page) -> Result<Capture> {
    let mut request_stream = page.event_listener::<EventRequestWillBeSent>().await?;
    let mut response_stream = page.event_listener::<EventResponseReceived>().await?;

    let request_headers_map: Arc<StdMutex<HashMap<RequestId, HashMap<String, String>>>> =
        Arc::new(StdMutex::new(HashMap::new()));
    let document_events: Arc<StdMutex<Vec<DocumentEvent>>> = Arc::new(StdMutex::new(Vec::new()));
    let document_available = Arc::new(Notify::new());

    let req_map = Arc::clone(&request_headers_map);
    let request_task = tokio::spawn(async move {
        while let Some(event) = request_stream.next().await {
            if event.r#type != Some(ResourceType::Document) {
                continue;
            }
            req_map.lock().unwrap().insert(
                event.request_id.clone(),
                headers_from_cdp(event.request.headers.inner()),
            );
        }
    });

    let doc_events = Arc::clone(&document_events);
    let doc_available = Arc::clone(&document_available);
    let req_map_for_response = Arc::clone(&request_headers_map);
    let response_task = tokio::spawn(async move {
        while let Some(event) = response_stream.next().await {
            if event.r#type != ResourceType::Document {
                continue;
            }
            let request_headers = req_map_for_response
                .lock()
                .unwrap()
                .remove(&event.request_id)
                .unwrap_or_default();
            doc_events.lock().unwrap().push((
                event.frame_id.clone(),
                event.response.status as u16,
                headers_from_cdp_list(event.response.headers.inner()),
                request_headers,
            ));
            doc_available.notify_one();
        }
    });

    Ok(Capture {
        document_events,
        document_available,
        request_task,
        response_task,
    })
}

impl Capture {
    /// Await the top-level frame id and the page-ready signal, then return
    /// the buffered Document response matching that frame (falling back to
    /// the last Document response seen if none matches).
    ///
    /// While waiting for the first Document response to arrive, this also
    /// watches `page_ready`: if the page is reported ready before any
    /// Document response was ever observed — which should not happen in
    /// practice, since rendering implies a document arrived, but could
    /// follow from a lost event — the wait stops immediately rather than
    /// blocking on a notification that may never come, and the lookup below
    /// naturally resolves to the "no document response captured" error.
    ///
    /// Event listeners are torn down on every exit path (success, navigation
    /// error, or cancellation) since both background tasks are aborted here
    /// regardless of how the wait ends.
    pub async fn await_result(
        self,
        navigation_frame: oneshot::Receiver<FrameId>,
        mut page_ready: oneshot::Receiver<()>,
    ) -> Result<BrowserResponseInfo> {
        let Capture {
            document_events,
            document_available,
            request_task,
            response_task,
        } = self;

        let outcome = async {
            let frame_id = navigation_frame
                .await
                .map_err(|_| anyhow!("navigation never produced a frame id"))?;

            loop {
                if !document_events.lock().unwrap().is_empty() {
                    break;
                }
                tokio::select! {
                    _ = document_available.notified() => {}
                    _ = &mut page_ready => break,
                }
            }

            // `page_ready` may already be resolved above; awaiting it again
            // just returns immediately (or errs, if already taken), which is
            // fine either way — the result depends only on `document_events`.
            let _ = page_ready.await;

            let events = document_events.lock().unwrap();
            let selected = events
                .iter()
                .rev()
                .find(|entry| entry.0.as_ref() == Some(&frame_id))
                .or_else(|| events.last())
                .cloned()
                .ok_or_else(|| anyhow!("no document response captured for navigation"))?;

            let (_, status_code, headers, request_headers) = selected;
            Ok(BrowserResponseInfo {
                status_code,
                headers,
                request_headers,
            })
        }
        .await;

        request_task.abort();
        response_task.abort();

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_from_cdp_extracts_string_values_only() {
        let value = serde_json::json!({"a": "1", "b": 2, "c": "3"});
        let headers = headers_from_cdp(&value);
        assert_eq!(headers.get("a"), Some(&"1".to_string()));
        assert_eq!(headers.get("c"), Some(&"3".to_string()));
        assert!(!headers.contains_key("b"));
    }
}
