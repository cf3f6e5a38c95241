use serde::{Deserialize, Serialize};

/// `browser_on_elements` accepts either a bare selector string or a list of
/// selectors on the wire. Normalized to `Vec<String>` immediately after
/// deserialization so the rest of the service never deals with the tagged shape.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringOrList::One(s) => vec![s],
            StringOrList::Many(v) => v,
        }
    }
}

fn default_wait_timeout() -> f64 {
    10.0
}

fn deserialize_browser_on_elements<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<StringOrList> = Option::deserialize(deserializer)?;
    Ok(raw
        .map(StringOrList::into_vec)
        .unwrap_or_default()
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Request body for `POST /get`.
///
/// `wait_for_element` and `browser_on_elements` are normalized at the wire
/// boundary (trimmed, empty entries dropped); `wait_timeout` bounds are
/// enforced by [`FetchRequest::validate`], not by serde itself, since an
/// out-of-range value should surface as a 400 naming the field rather than a
/// generic deserialization error.
#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default)]
    pub wait_for_element: Option<String>,
    #[serde(default, deserialize_with = "deserialize_browser_on_elements")]
    pub browser_on_elements: Vec<String>,
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout: f64,
}

impl FetchRequest {
    /// Trims `wait_for_element`, collapsing an empty/whitespace-only value to
    /// `None`, and checks `wait_timeout` falls in `0 < t <= 120`.
    pub fn validate(mut self) -> Result<Self, crate::error::FetchError> {
        self.wait_for_element = self
            .wait_for_element
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if !(self.wait_timeout > 0.0 && self.wait_timeout <= 120.0) {
            return Err(crate::error::FetchError::Validation {
                field: "wait_timeout".to_string(),
                detail: format!(
                    "wait_timeout must satisfy 0 < t <= 120, got {}",
                    self.wait_timeout
                ),
            });
        }
        Ok(self)
    }
}

/// A single response header, serialized with a lower-cased name per the
/// wire contract (order preserved, duplicates retained).
#[derive(Debug, Clone, Serialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

pub fn aggregate_headers(headers: &[(String, String)]) -> Vec<HeaderEntry> {
    headers
        .iter()
        .map(|(name, value)| HeaderEntry {
            name: name.to_ascii_lowercase(),
            value: value.clone(),
        })
        .collect()
}

/// Response body for `POST /get`.
#[derive(Debug, Serialize)]
pub struct FetchResponse {
    pub status_code: u16,
    pub used_browser: bool,
    pub headers: Vec<HeaderEntry>,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browser_on_elements_accepts_bare_string() {
        let req: FetchRequest =
            serde_json::from_str(r#"{"url":"https://example.com","browser_on_elements":"  .foo  "}"#)
                .unwrap();
        assert_eq!(req.browser_on_elements, vec![".foo".to_string()]);
    }

    #[test]
    fn browser_on_elements_accepts_list_and_drops_empties() {
        let req: FetchRequest = serde_json::from_str(
            r#"{"url":"https://example.com","browser_on_elements":[" .a ", "", "  "]}"#,
        )
        .unwrap();
        assert_eq!(req.browser_on_elements, vec![".a".to_string()]);
    }

    #[test]
    fn browser_on_elements_defaults_to_empty() {
        let req: FetchRequest = serde_json::from_str(r#"{"url":"https://example.com"}"#).unwrap();
        assert!(req.browser_on_elements.is_empty());
    }

    #[test]
    fn wait_for_element_blank_collapses_to_none() {
        let req: FetchRequest =
            serde_json::from_str(r#"{"url":"https://example.com","wait_for_element":"   "}"#)
                .unwrap();
        let req = req.validate().unwrap();
        assert!(req.wait_for_element.is_none());
    }

    #[test]
    fn wait_timeout_out_of_range_rejected() {
        let req: FetchRequest =
            serde_json::from_str(r#"{"url":"https://example.com","wait_timeout":0}"#).unwrap();
        assert!(req.validate().is_err());

        let req: FetchRequest =
            serde_json::from_str(r#"{"url":"https://example.com","wait_timeout":121}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn default_wait_timeout_is_ten() {
        let req: FetchRequest = serde_json::from_str(r#"{"url":"https://example.com"}"#).unwrap();
        assert_eq!(req.wait_timeout, 10.0);
    }
}
