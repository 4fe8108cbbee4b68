//! Integration tests driving the relay over real WebSocket connections.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use zkpf_agent_relay::{Relay, RelayConfig};
use zkpf_wallet_agent::{
    Address, AgentConfig, MemoryTrustStore, RegisteredUser, SealedKeyStore, WalletAgent,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ORIGIN: &str = "https://shop.example";
const ADDRESS: &str = "0xabc";
const PASSWORD: &str = "correct horse";

/// Start a relay for an agent with one linked account, logged in if `login`.
async fn start_relay(login: bool) -> (SocketAddr, CancellationToken) {
    let store = Arc::new(MemoryTrustStore::new());
    let (sealed, _) = SealedKeyStore::generate(PASSWORD).unwrap();
    store.install_key_material(sealed).await;
    store
        .register_user(RegisteredUser {
            address: Address::from(ADDRESS),
            alias: None,
            registered_at: Utc::now(),
        })
        .await;

    let (agent, _resync) = WalletAgent::builder(AgentConfig::default())
        .store(store)
        .build()
        .unwrap();
    if login {
        agent.unlock(&Address::from(ADDRESS), PASSWORD).await.unwrap();
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(Relay::new(agent, &RelayConfig::default()).serve(listener, shutdown.clone()));

    (addr, shutdown)
}

async fn page(addr: SocketAddr, origin: Option<&'static str>) -> Socket {
    let mut request = format!("ws://{addr}/").into_client_request().unwrap();
    if let Some(origin) = origin {
        request
            .headers_mut()
            .insert("Origin", HeaderValue::from_static(origin));
    }
    let (socket, _) = connect_async(request).await.unwrap();
    socket
}

async fn ui(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/ui")).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, value: Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

async fn next_json(socket: &mut Socket) -> Value {
    let read = async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str::<Value>(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {other:?}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), read)
        .await
        .expect("no message within 10s")
}

#[tokio::test]
async fn test_page_query_round_trip() {
    let (addr, shutdown) = start_relay(true).await;
    let mut page = page(addr, Some(ORIGIN)).await;

    send(
        &mut page,
        json!({ "type": "QUERY", "requestId": "r-1", "query": "session", "args": { "address": ADDRESS } }),
    )
    .await;
    let envelope = next_json(&mut page).await;

    assert_eq!(envelope["requestId"], "r-1");
    assert_eq!(envelope["code"], 200);
    assert_eq!(envelope["response"]["address"], ADDRESS);
    shutdown.cancel();
}

#[tokio::test]
async fn test_ui_decides_page_request() {
    let (addr, shutdown) = start_relay(true).await;
    let mut ui = ui(addr).await;
    let mut page = page(addr, Some(ORIGIN)).await;

    send(
        &mut page,
        json!({ "type": "QUERY", "requestId": "r-1", "query": "approveProof", "args": { "address": ADDRESS } }),
    )
    .await;

    let asked = next_json(&mut ui).await;
    assert_eq!(asked["type"], "APPROVAL_REQUEST");
    assert_eq!(asked["requestId"], "r-1");
    assert_eq!(asked["action"], "proof.approve");
    assert_eq!(asked["domain"], ORIGIN);

    // A page cannot approve its own request.
    send(
        &mut page,
        json!({ "type": "ACTION_RESPONSE", "requestId": "r-1", "data": { "decision": "approved", "response": "forged" } }),
    )
    .await;
    send(
        &mut ui,
        json!({
            "type": "ACTION_RESPONSE",
            "clientId": asked["clientId"],
            "requestId": "r-1",
            "data": { "decision": "rejected", "response": { "reason": "no" } }
        }),
    )
    .await;

    let envelope = next_json(&mut page).await;
    assert_eq!(envelope["code"], 403);
    assert_eq!(envelope["response"], json!({ "reason": "no" }));
    assert_eq!(envelope["error"]["key"], "user-rejected");
    shutdown.cancel();
}

#[tokio::test]
async fn test_page_without_origin_is_refused() {
    let (addr, shutdown) = start_relay(true).await;
    let mut page = page(addr, None).await;

    send(
        &mut page,
        json!({ "type": "QUERY", "requestId": "r-1", "query": "session", "domain": ORIGIN, "args": { "address": ADDRESS } }),
    )
    .await;
    let envelope = next_json(&mut page).await;

    assert_eq!(envelope["code"], 500);
    assert_eq!(envelope["error"]["key"], "missing-origin");
    shutdown.cancel();
}

#[tokio::test]
async fn test_reauth_without_approval_surface_answers_401() {
    let (addr, shutdown) = start_relay(false).await;
    let mut page = page(addr, Some(ORIGIN)).await;

    send(
        &mut page,
        json!({ "type": "QUERY", "requestId": "r-1", "query": "user", "args": { "address": ADDRESS } }),
    )
    .await;
    let envelope = tokio::time::timeout(Duration::from_secs(5), next_json(&mut page))
        .await
        .expect("no envelope while approval surface is absent");

    assert_eq!(envelope["code"], 401);
    assert_eq!(envelope["error"]["key"], "account-not-logged-in");
    assert_eq!(envelope["error"]["response"]["action"], "account.login");
    shutdown.cancel();
}

#[tokio::test]
async fn test_same_request_id_from_two_pages_is_decided_separately() {
    let (addr, shutdown) = start_relay(true).await;
    let mut ui = ui(addr).await;
    let mut shop = page(addr, Some(ORIGIN)).await;
    let mut other = page(addr, Some("https://other.example")).await;

    let ask = json!({ "type": "QUERY", "requestId": "1", "query": "approveProof", "args": { "address": ADDRESS } });
    send(&mut shop, ask.clone()).await;
    let first = next_json(&mut ui).await;
    send(&mut other, ask).await;
    let second = next_json(&mut ui).await;
    assert_eq!(first["domain"], ORIGIN);
    assert_ne!(first["clientId"], second["clientId"]);

    send(
        &mut ui,
        json!({
            "type": "ACTION_RESPONSE",
            "clientId": first["clientId"],
            "requestId": "1",
            "data": { "decision": "approved", "response": { "proof": "shop-proof" } }
        }),
    )
    .await;

    let envelope = next_json(&mut shop).await;
    assert_eq!(envelope["code"], 200);
    assert_eq!(envelope["response"]["proof"], "shop-proof");

    let leaked = tokio::time::timeout(Duration::from_millis(300), next_json(&mut other)).await;
    assert!(leaked.is_err());
    shutdown.cancel();
}
