#![allow(clippy::unwrap_used)]
// Integration tests for `PfsenseClient` using wiremock.

use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wgctl_api::{Error, JsonObject, PfsenseClient, RequestOptions, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, PfsenseClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let client = PfsenseClient::with_client(reqwest::Client::new(), base_url, Duration::from_secs(5));
    (server, client)
}

fn ok(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "code": 200,
        "status": "ok",
        "response_id": "SUCCESS",
        "message": "",
        "data": data
    }))
}

// ── Authentication ──────────────────────────────────────────────────

#[tokio::test]
async fn test_api_key_header_is_sent() {
    let server = MockServer::start().await;
    let key: SecretString = "s3cret".to_string().into();
    let client = PfsenseClient::new(
        Url::parse(&server.uri()).unwrap(),
        &key,
        &TransportConfig::default(),
    )
    .unwrap();

    Mock::given(method("GET"))
        .and(path("/api/v2/vpn/wireguard/tunnels"))
        .and(header("X-API-Key", "s3cret"))
        .respond_with(ok(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let tunnels = client
        .query("/api/v2/vpn/wireguard/tunnels", &RequestOptions::new())
        .await
        .unwrap();
    assert!(tunnels.is_empty());
}

// ── Queries ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_query_with_filters() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v2/vpn/wireguard/tunnels"))
        .and(query_param("name", "tun_wg0"))
        .respond_with(ok(json!([{"id": 0, "name": "tun_wg0", "listenport": "51820"}])))
        .mount(&server)
        .await;

    let opts = RequestOptions::new()
        .filter("name", "tun_wg0")
        .proplist(["ignored"]);
    let tunnels = client
        .query("/api/v2/vpn/wireguard/tunnels", &opts)
        .await
        .unwrap();

    assert_eq!(tunnels.len(), 1);
    assert_eq!(tunnels[0].get_int("listenport"), 51820);
    assert_eq!(tunnels[0].get_string("id"), "0");
}

#[tokio::test]
async fn test_not_found_envelope() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v2/vpn/wireguard/tunnel/9"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": 404,
            "status": "not found",
            "response_id": "MODEL_OBJECT_NOT_FOUND",
            "message": "Object with ID `9` does not exist"
        })))
        .mount(&server)
        .await;

    let err = client
        .get("/api/v2/vpn/wireguard/tunnel/9", &RequestOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "expected not-found, got {err:?}");
}

// ── Mutations ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_posts_payload() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v2/vpn/wireguard/tunnel"))
        .and(body_json(json!({"name": "tun_wg1"})))
        .respond_with(ok(json!({"id": 1, "name": "tun_wg1"})))
        .expect(1)
        .mount(&server)
        .await;

    let created = client
        .create(
            "/api/v2/vpn/wireguard/tunnel",
            &JsonObject::new().with("name", "tun_wg1"),
        )
        .await
        .unwrap();
    assert_eq!(created.get_string("id"), "1");
}

#[tokio::test]
async fn test_update_uses_patch() {
    let (server, client) = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/api/v2/vpn/wireguard/peer/3"))
        .respond_with(ok(json!({"id": 3})))
        .expect(1)
        .mount(&server)
        .await;

    client
        .update(
            "/api/v2/vpn/wireguard/peer/3",
            &JsonObject::new().with("disabled", true),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_with_empty_body() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/api/v2/vpn/wireguard/peer/3"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    client.delete("/api/v2/vpn/wireguard/peer/3").await.unwrap();
}

#[tokio::test]
async fn test_timeout_is_enforced() {
    let server = MockServer::start().await;
    let client = PfsenseClient::with_client(
        reqwest::Client::new(),
        Url::parse(&server.uri()).unwrap(),
        Duration::from_millis(50),
    );

    Mock::given(method("GET"))
        .respond_with(ok(json!([])).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let err = client
        .query("/api/v2/vpn/wireguard/peers", &RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "got {err:?}");
}
