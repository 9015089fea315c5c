//! Blocking HTTP data provider.
//!
//! Talks to a JSON data gateway exposing two endpoints:
//!
//! - `POST {base}/data/snapshot` with `{"universe": [..], "fields": [..]}`
//! - `POST {base}/data/history` with `{"universe": [..], "fields": [..], "parameters": {..}}`
//!
//! Both answer `{"headers": [..], "data": [[..], ..]}`. The first header is
//! the instrument, history responses carry the observation date second.
//! Headers may be plain strings or objects with a `name` member.

use crate::provider::{DataProvider, HistoryParams, ProviderError, RawFrame};
use crate::value::Value;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct TableResponse {
    headers: Vec<Header>,
    #[serde(default)]
    data: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Header {
    Name(String),
    Described { name: String },
}

impl Header {
    fn into_name(self) -> String {
        match self {
            Header::Name(name) | Header::Described { name } => name,
        }
    }
}

/// HTTP data provider.
pub struct HttpProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: Option<String>,
    open: AtomicBool,
}

impl HttpProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("esgpanel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            open: AtomicBool::new(false),
        })
    }

    fn post(&self, path: &str, body: serde_json::Value, dated: bool) -> Result<RawFrame, ProviderError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(ProviderError::SessionClosed);
        }

        let url = format!("{}/{path}", self.base_url);
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.send().map_err(transport_error)?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }
        if status == reqwest::StatusCode::REQUEST_TIMEOUT {
            return Err(ProviderError::Timeout(format!("HTTP {status} from {url}")));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderError::AuthenticationRequired(format!(
                "HTTP {status} from {url}"
            )));
        }
        if status.is_server_error() {
            return Err(ProviderError::Unavailable {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let detail = resp.text().unwrap_or_default();
            return Err(ProviderError::Rejected(format!("HTTP {status}: {detail}")));
        }

        let table: TableResponse = resp.json().map_err(|e| {
            if e.is_decode() {
                ProviderError::ResponseFormatChanged(format!("failed to decode {url}: {e}"))
            } else {
                transport_error(e)
            }
        })?;
        parse_table(table, dated)
    }
}

/// Classify a failure to exchange bytes with the gateway. A connection that
/// broke before or after the request was accepted is transient.
fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() || e.is_body() {
        ProviderError::NetworkUnreachable(e.to_string())
    } else if e.is_builder() {
        ProviderError::Client(e.to_string())
    } else {
        ProviderError::Rejected(e.to_string())
    }
}

/// Turn a decoded response into a raw frame.
fn parse_table(table: TableResponse, dated: bool) -> Result<RawFrame, ProviderError> {
    let key_width = if dated { 2 } else { 1 };
    let headers: Vec<String> = table.headers.into_iter().map(Header::into_name).collect();
    if headers.len() < key_width {
        return Err(ProviderError::ResponseFormatChanged(format!(
            "expected at least {key_width} headers, got {}",
            headers.len()
        )));
    }

    let mut frame = RawFrame::new(headers[key_width..].to_vec());
    let mut undated = 0usize;
    for (i, row) in table.data.into_iter().enumerate() {
        if row.len() != headers.len() {
            return Err(ProviderError::ResponseFormatChanged(format!(
                "row {i} has {} cells, expected {}",
                row.len(),
                headers.len()
            )));
        }
        let instrument = match &row[0] {
            serde_json::Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            other => {
                return Err(ProviderError::ResponseFormatChanged(format!(
                    "row {i} has no instrument: {other}"
                )))
            }
        };
        let date = if dated {
            match &row[1] {
                serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                _ => {
                    undated += 1;
                    continue;
                }
            }
        } else {
            None
        };
        let values = row[key_width..].iter().map(Value::from_json).collect();
        frame
            .push(instrument, date, values)
            .map_err(|e| ProviderError::ResponseFormatChanged(e.to_string()))?;
    }

    if undated > 0 {
        tracing::debug!(undated, "skipped history rows without a date");
    }
    Ok(frame)
}

impl DataProvider for HttpProvider {
    fn name(&self) -> &str {
        "http_gateway"
    }

    fn open_session(&self) -> Result<(), ProviderError> {
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn close_session(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn get_data(&self, universe: &[String], fields: &[String]) -> Result<RawFrame, ProviderError> {
        let body = json!({ "universe": universe, "fields": fields });
        self.post("data/snapshot", body, false)
    }

    fn get_history(
        &self,
        universe: &[String],
        fields: &[String],
        params: &HistoryParams,
    ) -> Result<RawFrame, ProviderError> {
        let body = json!({ "universe": universe, "fields": fields, "parameters": params });
        self.post("data/history", body, true)
    }
}
