#![allow(clippy::unwrap_used)]
// Integration tests for the pfSense and RouterOS backends against a
// wiremock appliance.

mod common;

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use wiremock::matchers::{body_json, body_partial_json, header_exists, method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use common::{KEY_A, KEY_B, RaiseFlag, Switched, mikrotik_backend, pf_ok, pfsense_backend};
use wgctl_core::{
    Cidr, ControllerBackend, CoreError, InterfaceIdentifier, PeerIdentifier, PeerTransform,
};

const TUNNELS: &str = "/api/v2/vpn/wireguard/tunnels";
const TUNNEL: &str = "/api/v2/vpn/wireguard/tunnel";
const PEERS: &str = "/api/v2/vpn/wireguard/peers";
const PEER: &str = "/api/v2/vpn/wireguard/peer";

fn tun() -> InterfaceIdentifier {
    InterfaceIdentifier::new("tun_wg0")
}

fn allow(list: &'static str) -> PeerTransform {
    Box::new(move |mut pp| {
        pp.allowed_ips = Cidr::parse_list(list)?;
        Ok(pp)
    })
}

async fn requests_with(server: &MockServer, verb: &str, url_path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == verb && r.url.path() == url_path)
        .collect()
}

// ── Fake pfSense peer table ─────────────────────────────────────────

/// Peer collection that grows with every POST, like the appliance does.
#[derive(Clone, Default)]
struct PeerTable {
    peers: Arc<Mutex<Vec<Value>>>,
}

struct ListPeers(PeerTable);

impl Respond for ListPeers {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        pf_ok(Value::Array(self.0.peers.lock().unwrap().clone()))
    }
}

struct CreatePeer(PeerTable);

impl Respond for CreatePeer {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = request.body_json().unwrap();
        let mut peers = self.0.peers.lock().unwrap();
        let created = json!({
            "id": peers.len(),
            "name": body["name"],
            "tun": body["interface"],
            "publickey": body["publickey"],
            "allowedips": body["allowedips"],
        });
        peers.push(created.clone());
        // slow enough that an unserialized second save would race past the lookup
        pf_ok(created).set_delay(Duration::from_millis(100))
    }
}

// ── pfSense ─────────────────────────────────────────────────────────

#[tokio::test]
async fn pfsense_creates_missing_tunnel_exactly_once() {
    let server = MockServer::start().await;
    let created = Arc::new(AtomicBool::new(false));
    let tunnel = json!({"id": 0, "name": "tun_wg0", "descr": "office"});

    Mock::given(method("GET"))
        .and(path(TUNNELS))
        .respond_with(Switched {
            flag: Arc::clone(&created),
            before: pf_ok(json!([])),
            after: pf_ok(json!([tunnel])),
        })
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TUNNEL))
        .and(body_partial_json(json!({"name": "tun_wg0"})))
        .respond_with(RaiseFlag {
            flag: Arc::clone(&created),
            response: pf_ok(tunnel.clone()),
        })
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{TUNNEL}/0")))
        .respond_with(pf_ok(json!({
            "id": 0,
            "name": "tun_wg0",
            "listenport": "51820",
            "addresses": [{"address": "10.0.0.1", "mask": 24}],
            "enabled": true,
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("{TUNNEL}/0")))
        .respond_with(pf_ok(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = pfsense_backend(&server);
    backend
        .save_interface(
            &tun(),
            Box::new(|mut pi| {
                assert_eq!(pi.listen_port, 51820);
                assert_eq!(Cidr::list_to_string(&pi.addresses), "10.0.0.1/24");
                pi.listen_port = 51821;
                pi.device_up = true;
                Ok(pi)
            }),
        )
        .await
        .unwrap();

    let patches = requests_with(&server, "PATCH", &format!("{TUNNEL}/0")).await;
    let body: Value = patches[0].body_json().unwrap();
    assert_eq!(body["listenport"], "51821");
    assert_eq!(body["addresses"], "10.0.0.1/24");
    assert_eq!(body["description"], "office");
    assert_eq!(body["disabled"], "false");
}

#[tokio::test]
async fn pfsense_concurrent_saves_of_one_peer_create_it_once() {
    let server = MockServer::start().await;
    let table = PeerTable::default();

    Mock::given(method("GET"))
        .and(path(PEERS))
        .respond_with(ListPeers(table.clone()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(PEER))
        .respond_with(CreatePeer(table.clone()))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path_regex(r"^/api/v2/vpn/wireguard/peer/\d+$"))
        .respond_with(pf_ok(json!({})))
        .expect(3)
        .mount(&server)
        .await;

    let backend = pfsense_backend(&server);
    let (id_a, id_b) = (PeerIdentifier::new(KEY_A), PeerIdentifier::new(KEY_B));
    let (first, second, other) = tokio::join!(
        backend.save_peer(&tun(), &id_a, allow("10.0.0.2/32")),
        backend.save_peer(&tun(), &id_a, allow("10.0.0.2/32,10.0.0.3/32")),
        backend.save_peer(&tun(), &id_b, allow("10.0.0.4/32")),
    );
    first.unwrap();
    second.unwrap();
    other.unwrap();

    let creates = requests_with(&server, "POST", PEER).await;
    let mut created_keys: Vec<String> = creates
        .iter()
        .map(|r| r.body_json::<Value>().unwrap()["publickey"].as_str().unwrap().to_owned())
        .collect();
    created_keys.sort();
    let mut expected = vec![KEY_A.to_owned(), KEY_B.to_owned()];
    expected.sort();
    assert_eq!(created_keys, expected);
}

#[tokio::test]
async fn pfsense_listing_fails_whole_when_one_detail_fails() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(TUNNELS))
        .respond_with(pf_ok(json!([
            {"id": 0, "name": "tun_wg0"},
            {"id": 1, "name": "tun_wg1"},
            {"id": 2, "name": "tun_wg2"},
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{TUNNEL}/1")))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "code": 500,
            "status": "server error",
            "message": "tunnel detail unavailable",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/v2/vpn/wireguard/tunnel/[02]$"))
        .respond_with(pf_ok(json!({"listenport": 51820})))
        .mount(&server)
        .await;

    let err = pfsense_backend(&server).get_interfaces().await.unwrap_err();
    assert!(matches!(err, CoreError::RemoteApi { .. }), "got {err:?}");
}

#[tokio::test]
async fn pfsense_peers_are_filtered_by_tunnel_and_imported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PEERS))
        .respond_with(pf_ok(json!([
            {
                "id": 4,
                "tun": "tun_wg0",
                "publickey": KEY_A,
                "descr": "laptop",
                "endpoint": "198.51.100.7",
                "port": "51820",
                "allowedips": [{"address": "10.0.0.2", "mask": 32}],
                "persistentkeepalive": "25",
                "enabled": false,
                "disabled": true,
            },
            {"id": 5, "tun": "tun_wg9", "publickey": KEY_B},
        ])))
        .mount(&server)
        .await;

    let backend = pfsense_backend(&server);
    let peers = backend.get_peers(&tun()).await.unwrap();
    assert_eq!(peers.len(), 1);
    let pp = &peers[0];
    assert_eq!(pp.identifier.as_str(), KEY_A);
    assert_eq!(pp.endpoint, "198.51.100.7:51820");
    assert_eq!(pp.persistent_keepalive, 25);
    assert_eq!(Cidr::list_to_string(&pp.allowed_ips), "10.0.0.2/32");

    let iface = wgctl_core::InterfaceConfig::new(tun(), backend.id().clone());
    let peer = backend.import_peer(pp, &iface);
    assert_eq!(peer.display_name, "laptop");
    assert!(peer.is_disabled());
}

#[tokio::test]
async fn pfsense_unsupported_operations() {
    let server = MockServer::start().await;
    let backend = pfsense_backend(&server);

    let err = backend.ping_addresses("10.0.0.2").await.unwrap_err();
    assert!(matches!(err, CoreError::Unimplemented { operation: "ping", .. }));

    backend.set_dns(&tun(), "10.0.0.53", "").await.unwrap();
    backend.unset_dns(&tun(), "10.0.0.53", "").await.unwrap();
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn pfsense_delete_of_unknown_peer_is_a_no_op() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PEERS))
        .respond_with(pf_ok(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(pf_ok(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    pfsense_backend(&server)
        .delete_peer(&tun(), &PeerIdentifier::new(KEY_A))
        .await
        .unwrap();
}

#[tokio::test]
async fn pfsense_peer_on_blank_or_other_tunnel_is_not_ours() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PEERS))
        .respond_with(pf_ok(json!([
            {"id": 7, "tun": "", "publickey": KEY_A},
            {"id": 8, "tun": "tun_wg9", "publickey": KEY_A},
        ])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(pf_ok(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    pfsense_backend(&server)
        .delete_peer(&tun(), &PeerIdentifier::new(KEY_A))
        .await
        .unwrap();
}

#[tokio::test]
async fn pfsense_peer_without_tunnel_field_is_trusted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PEERS))
        .respond_with(pf_ok(json!([{"id": 3, "publickey": KEY_A}])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{PEER}/3")))
        .respond_with(pf_ok(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    pfsense_backend(&server)
        .delete_peer(&tun(), &PeerIdentifier::new(KEY_A))
        .await
        .unwrap();
}

// ── RouterOS ────────────────────────────────────────────────────────

async fn mount_wg0(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/interface/wireguard"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            ".id": "*1",
            "name": "wg0",
            "listen-port": "13231",
            "mtu": "1420",
            "private-key": "cHJpdmF0ZQ==",
            "public-key": "cHVibGlj",
            "disabled": "false",
            "running": "true",
        }])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/interface/*1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "wg0",
            "rx-byte": "1024",
            "tx-byte": "2048",
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn mikrotik_interface_update_diffs_addresses() {
    let server = MockServer::start().await;
    mount_wg0(&server).await;
    Mock::given(method("GET"))
        .and(path("/ip/address"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {".id": "*A", "address": "10.0.0.1/24", "network": "10.0.0.0"},
            {".id": "*B", "address": "10.5.0.1/24", "network": "10.5.0.0"},
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ipv6/address"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/interface/wireguard/*1"))
        .and(header_exists("authorization"))
        .and(body_partial_json(json!({"listen-port": "51820", "mtu": "1380"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/ip/address/*B"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/ip/address"))
        .and(body_json(json!({"address": "10.6.0.1/24", "interface": "wg0"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({".id": "*C"})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = mikrotik_backend(&server);
    backend
        .save_interface(
            &InterfaceIdentifier::new("wg0"),
            Box::new(|mut pi| {
                assert_eq!(pi.listen_port, 13231);
                assert_eq!(pi.bytes_download, 1024);
                pi.listen_port = 51820;
                pi.mtu = 1380;
                pi.addresses = Cidr::parse_list("10.0.0.1/24,10.6.0.1/24")?;
                Ok(pi)
            }),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn mikrotik_dns_servers_are_merged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ip/dns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"servers": "1.1.1.1,10.0.0.53"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ip/dns/set"))
        .and(body_json(json!({"servers": "1.1.1.1,10.0.0.53,10.0.0.54"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let backend = mikrotik_backend(&server);
    let wg0 = InterfaceIdentifier::new("wg0");
    backend.set_dns(&wg0, "10.0.0.53, 10.0.0.54", "").await.unwrap();
    // already present, nothing written
    backend.set_dns(&wg0, "10.0.0.53", "").await.unwrap();
}

#[tokio::test]
async fn mikrotik_dns_servers_are_removed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ip/dns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"servers": "1.1.1.1,10.0.0.53"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ip/dns/set"))
        .and(body_json(json!({"servers": "1.1.1.1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    mikrotik_backend(&server)
        .unset_dns(&InterfaceIdentifier::new("wg0"), "10.0.0.53", "")
        .await
        .unwrap();
}

#[tokio::test]
async fn mikrotik_ping_and_hooks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tool/ping"))
        .and(body_partial_json(json!({"address": "10.0.0.2", "count": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"host": "10.0.0.2", "sent": "1", "received": "1", "avg-rtt": "3ms"},
        ])))
        .mount(&server)
        .await;

    let backend = mikrotik_backend(&server);
    let result = backend.ping_addresses("10.0.0.2").await.unwrap();
    assert!(result.is_reachable());
    assert_eq!(result.average_rtt(), Some(Duration::from_millis(3)));

    let err = backend
        .execute_interface_hook(&InterfaceIdentifier::new("wg0"), "echo up")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Unimplemented { .. }));
}

#[tokio::test]
async fn mikrotik_api_errors_carry_the_router_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/interface/wireguard"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": 401,
            "message": "Unauthorized",
        })))
        .mount(&server)
        .await;

    let err = mikrotik_backend(&server).get_interfaces().await.unwrap_err();
    let CoreError::RemoteApi { backend, source, .. } = err else {
        panic!("expected a remote API error");
    };
    assert_eq!(backend, "rb1");
    assert!(source.to_string().contains("Unauthorized"), "{source}");
}
