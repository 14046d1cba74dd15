// pfSense REST API client (pfrest v2).
//
// Auth: X-API-Key header.
// Every response is wrapped as `{code, status, response_id, message, data}`.
// Success means a 2xx status and `status` of "ok" or "success"; an empty
// 2xx body (some DELETE handlers) is success without data.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::{
    ApiEnvelope, ApiErrorBody, RequestOptions, decode_list, decode_object,
    deserialization_error, endpoint_url, with_timeout,
};
use crate::error::Error;
use crate::json::JsonObject;
use crate::transport::TransportConfig;

const BACKEND: &str = "pfsense";

/// Code reported when the appliance returns an unparseable error response.
pub const ERROR_CODE_UNKNOWN: i64 = 700;
/// Code reported for an empty non-success response body.
pub const ERROR_CODE_EMPTY_RESPONSE: i64 = 701;

#[derive(Deserialize)]
struct ResponseWrapper {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    status: String,
    #[serde(default)]
    response_id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

impl ResponseWrapper {
    fn into_envelope(self, http_status: StatusCode) -> ApiEnvelope {
        let ok_status = self.status.eq_ignore_ascii_case("ok")
            || self.status.eq_ignore_ascii_case("success");
        if http_status.is_success() && ok_status {
            return ApiEnvelope::ok(http_status.as_u16(), Some(self.data));
        }
        let message = if self.message.is_empty() {
            self.status
        } else {
            self.message
        };
        ApiEnvelope::error(
            http_status.as_u16(),
            ApiErrorBody {
                code: if self.code == 0 {
                    i64::from(http_status.as_u16())
                } else {
                    self.code
                },
                message,
                detail: self.response_id,
            },
        )
    }
}

/// Async client for the pfSense REST API.
pub struct PfsenseClient {
    http: reqwest::Client,
    base_url: Url,
    timeout: Duration,
}

impl PfsenseClient {
    // ── Constructors ─────────────────────────────────────────────────

    /// Build from an API key and transport config.
    ///
    /// `base_url` is the appliance root (e.g. `https://fw.example.com`);
    /// endpoint paths carry the `/api/v2` prefix.
    pub fn new(
        base_url: Url,
        api_key: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        let mut key_value =
            HeaderValue::from_str(api_key.expose_secret()).map_err(|e| Error::Authentication {
                message: format!("invalid API key header value: {e}"),
            })?;
        key_value.set_sensitive(true);
        headers.insert("X-API-Key", key_value);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = transport.build_client(headers)?;
        Ok(Self {
            http,
            base_url,
            timeout: transport.timeout,
        })
    }

    /// Wrap an existing `reqwest::Client` (caller manages auth headers).
    pub fn with_client(http: reqwest::Client, base_url: Url, timeout: Duration) -> Self {
        Self {
            http,
            base_url,
            timeout,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Operations ───────────────────────────────────────────────────

    /// GET a collection endpoint. Filters become query parameters.
    pub async fn query(&self, path: &str, opts: &RequestOptions) -> Result<Vec<JsonObject>, Error> {
        let url = endpoint_url(&self.base_url, path, &opts.filters);
        debug!("GET {url}");
        decode_list(self.execute(self.http.get(url)).await?)
    }

    /// GET a single object.
    pub async fn get(&self, path: &str, opts: &RequestOptions) -> Result<JsonObject, Error> {
        let url = endpoint_url(&self.base_url, path, &opts.filters);
        debug!("GET {url}");
        decode_object(self.execute(self.http.get(url)).await?)
    }

    /// POST a new object, returning the created representation.
    pub async fn create(&self, path: &str, payload: &JsonObject) -> Result<JsonObject, Error> {
        let url = endpoint_url(&self.base_url, path, &[]);
        debug!("POST {url}");
        decode_object(self.execute(self.http.post(url).json(payload)).await?)
    }

    /// PATCH an existing object, returning the updated representation.
    pub async fn update(&self, path: &str, payload: &JsonObject) -> Result<JsonObject, Error> {
        let url = endpoint_url(&self.base_url, path, &[]);
        debug!("PATCH {url}");
        decode_object(self.execute(self.http.patch(url).json(payload)).await?)
    }

    /// DELETE an object.
    pub async fn delete(&self, path: &str) -> Result<(), Error> {
        let url = endpoint_url(&self.base_url, path, &[]);
        debug!("DELETE {url}");
        self.execute(self.http.delete(url)).await.map(|_| ())
    }

    // ── Transport ────────────────────────────────────────────────────

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Value, Error> {
        with_timeout(self.timeout, async {
            let resp = request.send().await?;
            let status = resp.status();
            let body = resp.text().await?;
            parse_response(status, &body)
        })
        .await
    }
}

fn parse_response(status: StatusCode, body: &str) -> Result<Value, Error> {
    if body.trim().is_empty() {
        if status.is_success() {
            return Ok(Value::Null);
        }
        return ApiEnvelope::error(
            status.as_u16(),
            ApiErrorBody {
                code: ERROR_CODE_EMPTY_RESPONSE,
                message: format!("empty response with HTTP {status}"),
                detail: String::new(),
            },
        )
        .into_result(BACKEND);
    }

    match serde_json::from_str::<ResponseWrapper>(body) {
        Ok(wrapper) => wrapper.into_envelope(status).into_result(BACKEND),
        Err(e) if status.is_success() => Err(deserialization_error(&e, body)),
        Err(_) => ApiEnvelope::error(
            status.as_u16(),
            ApiErrorBody {
                code: ERROR_CODE_UNKNOWN,
                message: body.chars().take(200).collect(),
                detail: String::new(),
            },
        )
        .into_result(BACKEND),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_requires_ok_status_word() {
        let body = json!({"code": 200, "status": "ok", "data": [{"name": "tun_wg0"}]}).to_string();
        let data = parse_response(StatusCode::OK, &body).unwrap();
        assert_eq!(data[0]["name"], "tun_wg0");

        let body = json!({"code": 200, "status": "success", "data": {}}).to_string();
        assert!(parse_response(StatusCode::OK, &body).is_ok());

        let body = json!({"code": 200, "status": "failed", "message": "nope"}).to_string();
        let err = parse_response(StatusCode::OK, &body).unwrap_err();
        assert!(matches!(err, Error::Api { ref message, .. } if message == "nope"));
    }

    #[test]
    fn error_wrapper_keeps_code_and_response_id() {
        let body = json!({
            "code": 404,
            "status": "not found",
            "response_id": "WIREGUARD_TUNNEL_NOT_FOUND",
            "message": "Tunnel with ID 3 does not exist"
        })
        .to_string();
        let err = parse_response(StatusCode::NOT_FOUND, &body).unwrap_err();
        assert!(err.is_not_found());
        match err {
            Error::Api { code, detail, .. } => {
                assert_eq!(code, 404);
                assert_eq!(detail, "WIREGUARD_TUNNEL_NOT_FOUND");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_bodies() {
        assert_eq!(parse_response(StatusCode::NO_CONTENT, "").unwrap(), Value::Null);
        let err = parse_response(StatusCode::BAD_GATEWAY, "  ").unwrap_err();
        assert_eq!(err.api_error_code(), Some(ERROR_CODE_EMPTY_RESPONSE));
        assert!(err.is_transient());
    }

    #[test]
    fn html_error_page_is_unknown_code() {
        let err = parse_response(StatusCode::FORBIDDEN, "<html>denied</html>").unwrap_err();
        assert_eq!(err.api_error_code(), Some(ERROR_CODE_UNKNOWN));
    }
}
