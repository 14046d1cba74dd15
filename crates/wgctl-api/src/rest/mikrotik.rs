// RouterOS REST API client.
//
// Base path: the `/rest` root of the router (e.g. `https://10.0.0.1/rest`).
// Auth: HTTP Basic on every request.
// Successful responses are the raw JSON payload; failures carry
// `{"error": <code>, "message": ..., "detail": ...}`.

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

const BACKEND: &str = "mikrotik";

/// Code reported when the router returns an unparseable error response.
pub const ERROR_CODE_UNKNOWN: i64 = 600;

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    detail: String,
}

/// Async client for the RouterOS v7 REST API.
pub struct MikrotikClient {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    password: SecretString,
    timeout: Duration,
}

impl MikrotikClient {
    // ── Constructors ─────────────────────────────────────────────────

    pub fn new(
        base_url: Url,
        username: String,
        password: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = transport.build_client(headers)?;
        Ok(Self::with_client(
            http,
            base_url,
            username,
            password,
            transport.timeout,
        ))
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        username: String,
        password: SecretString,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url,
            username,
            password,
            timeout,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Operations ───────────────────────────────────────────────────

    /// GET a menu (e.g. `/interface/wireguard`) with filters and `.proplist`.
    pub async fn query(&self, path: &str, opts: &RequestOptions) -> Result<Vec<JsonObject>, Error> {
        let url = endpoint_url(&self.base_url, path, &query_params(opts));
        debug!("GET {url}");
        decode_list(self.execute(self.http.get(url)).await?)
    }

    /// GET a single item (e.g. `/interface/*1`).
    pub async fn get(&self, path: &str, opts: &RequestOptions) -> Result<JsonObject, Error> {
        let url = endpoint_url(&self.base_url, path, &query_params(opts));
        debug!("GET {url}");
        decode_object(self.execute(self.http.get(url)).await?)
    }

    /// PUT a new item into a menu, returning it with its `.id`.
    pub async fn create(&self, path: &str, payload: &JsonObject) -> Result<JsonObject, Error> {
        let url = endpoint_url(&self.base_url, path, &[]);
        debug!("PUT {url}");
        decode_object(self.execute(self.http.put(url).json(payload)).await?)
    }

    /// PATCH an existing item.
    pub async fn update(&self, path: &str, payload: &JsonObject) -> Result<JsonObject, Error> {
        let url = endpoint_url(&self.base_url, path, &[]);
        debug!("PATCH {url}");
        decode_object(self.execute(self.http.patch(url).json(payload)).await?)
    }

    /// DELETE an item.
    pub async fn delete(&self, path: &str) -> Result<(), Error> {
        let url = endpoint_url(&self.base_url, path, &[]);
        debug!("DELETE {url}");
        self.execute(self.http.delete(url)).await.map(|_| ())
    }

    /// POST a console command whose reply is a list (e.g. `/tool/ping`).
    pub async fn exec_list(&self, path: &str, payload: &JsonObject) -> Result<Vec<JsonObject>, Error> {
        let url = endpoint_url(&self.base_url, path, &[]);
        debug!("POST {url}");
        decode_list(self.execute(self.http.post(url).json(payload)).await?)
    }

    /// POST a console command, discarding its reply (e.g. `/ip/dns/set`).
    pub async fn exec(&self, path: &str, payload: &JsonObject) -> Result<(), Error> {
        let url = endpoint_url(&self.base_url, path, &[]);
        debug!("POST {url}");
        self.execute(self.http.post(url).json(payload)).await.map(|_| ())
    }

    // ── Transport ────────────────────────────────────────────────────

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Value, Error> {
        let request = request.basic_auth(&self.username, Some(self.password.expose_secret()));
        with_timeout(self.timeout, async {
            let resp = request.send().await?;
            let status = resp.status();
            let body = resp.text().await?;
            parse_response(status, &body)
        })
        .await
    }
}

fn query_params(opts: &RequestOptions) -> Vec<(String, String)> {
    let mut params = opts.filters.clone();
    if !opts.proplist.is_empty() {
        params.push((".proplist".to_owned(), opts.proplist.join(",")));
    }
    params
}

fn parse_response(status: StatusCode, body: &str) -> Result<Value, Error> {
    if status.is_success() {
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(body).map_err(|e| deserialization_error(&e, body));
    }

    let error = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(resp) => ApiErrorBody {
            code: if resp.error == 0 {
                i64::from(status.as_u16())
            } else {
                resp.error
            },
            message: resp.message,
            detail: resp.detail,
        },
        Err(_) => ApiErrorBody {
            code: ERROR_CODE_UNKNOWN,
            message: format!("HTTP {status}"),
            detail: body.chars().take(200).collect(),
        },
    };
    ApiEnvelope::error(status.as_u16(), error).into_result(BACKEND)
}
