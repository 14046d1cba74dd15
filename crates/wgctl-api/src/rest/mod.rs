// Generic JSON REST plumbing shared by the appliance clients.
//
// Both appliance families expose CRUD over JSON, but disagree on verbs,
// authentication and error bodies. The shared pieces live here: request
// options, the success/error envelope, URL construction, per-call timeouts
// and response decoding into `JsonObject` values.

pub mod mikrotik;
pub mod pfsense;

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::Error;
use crate::json::JsonObject;

/// Longest raw body kept inside a deserialization error.
const BODY_PREVIEW_LEN: usize = 512;

// ── Request options ─────────────────────────────────────────────────

/// Filters and projections for list/get requests.
///
/// Filters become query parameters. The property list restricts the
/// returned fields where the API supports it (`.proplist` on RouterOS;
/// pfSense ignores it).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub filters: Vec<(String, String)>,
    pub proplist: Vec<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    pub fn proplist<I, S>(mut self, props: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.proplist.extend(props.into_iter().map(Into::into));
        self
    }
}

// ── Envelope ────────────────────────────────────────────────────────

/// Outcome tag of an API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStatus {
    Ok,
    Error,
}

/// Error payload carried by a failed envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub detail: String,
}

/// Tagged success/error envelope normalized from either appliance family.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiEnvelope {
    pub status: ApiStatus,
    /// HTTP status code of the response.
    pub code: u16,
    pub data: Option<Value>,
    pub error: Option<ApiErrorBody>,
}

impl ApiEnvelope {
    pub fn ok(code: u16, data: Option<Value>) -> Self {
        Self {
            status: ApiStatus::Ok,
            code,
            data,
            error: None,
        }
    }

    pub fn error(code: u16, error: ApiErrorBody) -> Self {
        Self {
            status: ApiStatus::Error,
            code,
            data: None,
            error: Some(error),
        }
    }

    /// Unwrap the envelope, turning the error case into [`Error::Api`].
    pub fn into_result(self, backend: &'static str) -> Result<Value, Error> {
        match self.status {
            ApiStatus::Ok => Ok(self.data.unwrap_or_default()),
            ApiStatus::Error => {
                let body = self.error.unwrap_or_default();
                Err(Error::Api {
                    backend,
                    status: self.code,
                    code: body.code,
                    message: body.message,
                    detail: body.detail,
                })
            }
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Append `path` to the base URL's path and attach query parameters.
pub(crate) fn endpoint_url(base: &Url, path: &str, query: &[(String, String)]) -> Url {
    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    url.set_query(None);
    if !query.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    url
}

/// Bound a request future by the per-call timeout.
pub(crate) async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::Timeout {
            timeout_secs: timeout.as_secs(),
        })?
}

pub(crate) fn deserialization_error(err: &serde_json::Error, body: &str) -> Error {
    let mut preview: String = body.chars().take(BODY_PREVIEW_LEN).collect();
    if preview.len() < body.len() {
        preview.push('…');
    }
    Error::Deserialization {
        message: err.to_string(),
        body: preview,
    }
}

/// Decode a data payload as a list of objects. `null` is an empty list and
/// a bare object is a one-element list.
pub(crate) fn decode_list(data: Value) -> Result<Vec<JsonObject>, Error> {
    match data {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(JsonObject::from(map)),
                other => Err(unexpected_shape("object", &other)),
            })
            .collect(),
        Value::Object(map) => Ok(vec![JsonObject::from(map)]),
        other => Err(unexpected_shape("array", &other)),
    }
}

/// Decode a data payload as a single object. `null` is an empty object.
pub(crate) fn decode_object(data: Value) -> Result<JsonObject, Error> {
    match data {
        Value::Null => Ok(JsonObject::new()),
        Value::Object(map) => Ok(JsonObject::from(map)),
        other => Err(unexpected_shape("object", &other)),
    }
}

fn unexpected_shape(expected: &str, got: &Value) -> Error {
    Error::Deserialization {
        message: format!("expected JSON {expected}"),
        body: got.to_string().chars().take(BODY_PREVIEW_LEN).collect(),
    }
}
