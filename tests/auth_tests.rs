mod common;

use bitvavo::core::config::ExchangeConfig;
use bitvavo::core::errors::ExchangeError;
use bitvavo::core::kernel::HmacSigner;
use bitvavo::exchanges::bitvavo::types::{OrderStatus, Side};
use bitvavo::exchanges::bitvavo::{FillListener, OrderListener};
use common::{mock, next_event, wait_until, ws_config, MockConnection};
use secrecy::Secret;
use serde_json::{json, Value};

fn credentials() -> ExchangeConfig {
    ExchangeConfig::new("test-key".to_string(), "test-secret".to_string())
}

fn account_subscribe(markets: &[&str]) -> Value {
    json!({
        "action": "subscribe",
        "channels": [{"name": "account", "markets": markets}]
    })
}

async fn expect_authenticate(conn: &mut MockConnection) {
    let frame = conn.next_json().await;
    assert_eq!(frame["action"], "authenticate");
    assert_eq!(frame["key"], "test-key");

    let timestamp = frame["timestamp"].as_u64().unwrap();
    let signer = HmacSigner::new(
        Secret::new("test-key".to_string()),
        Secret::new("test-secret".to_string()),
        10_000,
    );
    assert_eq!(
        frame["signature"],
        signer
            .create_signature("GET", "/websocket", b"", timestamp)
            .unwrap()
    );
}

#[tokio::test]
async fn test_authenticate_precedes_subscribe() {
    let (connector, mut server) = mock();
    let listener = OrderListener::connect_with(connector, ws_config(), &credentials())
        .await
        .unwrap();
    let mut conn = server.accept().await;

    let stream = listener.subscribe(["BTC-EUR"]).await.unwrap();
    expect_authenticate(&mut conn).await;
    conn.assert_silent().await;

    conn.push(json!({"event": "authenticate", "authenticated": true}));
    assert_eq!(conn.next_json().await, account_subscribe(&["BTC-EUR"]));

    conn.push(json!({"event": "subscribed", "subscriptions": {"account": ["BTC-EUR"]}}));
    conn.push(json!({
        "event": "order",
        "orderId": "80b5f04d",
        "market": "BTC-EUR",
        "created": 1_548_666_570_234_i64,
        "updated": 1_548_666_570_234_i64,
        "status": "new",
        "side": "buy",
        "orderType": "limit",
        "amount": "0.1",
        "amountRemaining": "0.1",
        "price": "30000",
        "timeInForce": "GTC",
        "postOnly": false,
        "visible": true
    }));
    conn.push(json!({
        "event": "fill",
        "timestamp": 1_548_666_712_071_i64,
        "market": "BTC-EUR",
        "orderId": "80b5f04d",
        "fillId": "f1",
        "side": "buy",
        "amount": "0.1",
        "price": "30000",
        "taker": true
    }));

    let order = next_event(&stream).await.unwrap();
    assert_eq!(order.order_id, "80b5f04d");
    assert_eq!(order.status, OrderStatus::New);
    assert_eq!(order.side, Side::Buy);
    assert_eq!(listener.confirmed_subscriptions().len(), 1);
}

#[tokio::test]
async fn test_rejected_authentication_is_reported() {
    let (connector, mut server) = mock();
    let listener = FillListener::connect_with(connector, ws_config(), &credentials())
        .await
        .unwrap();
    let mut conn = server.accept().await;

    let stream = listener.subscribe(["BTC-EUR"]).await.unwrap();
    expect_authenticate(&mut conn).await;

    conn.push(json!({"event": "authenticate", "authenticated": false}));
    assert!(matches!(
        next_event(&stream).await,
        Err(ExchangeError::NotAuthenticated)
    ));
    conn.assert_silent().await;
    assert!(listener.confirmed_subscriptions().is_empty());
}

#[tokio::test]
async fn test_each_subscribe_gets_its_own_handshake() {
    let (connector, mut server) = mock();
    let listener = OrderListener::connect_with(connector, ws_config(), &credentials())
        .await
        .unwrap();
    let mut conn = server.accept().await;

    listener.subscribe(["BTC-EUR"]).await.unwrap();
    listener.subscribe(["ETH-EUR"]).await.unwrap();
    expect_authenticate(&mut conn).await;
    expect_authenticate(&mut conn).await;

    conn.push(json!({"event": "authenticate", "authenticated": true}));
    assert_eq!(conn.next_json().await, account_subscribe(&["BTC-EUR"]));
    conn.push(json!({"event": "authenticate", "authenticated": true}));
    assert_eq!(conn.next_json().await, account_subscribe(&["ETH-EUR"]));

    conn.push(json!({"event": "authenticate", "authenticated": true}));
    conn.assert_silent().await;
}

#[tokio::test]
async fn test_reconnect_authenticates_before_resubscribing() {
    let (connector, mut server) = mock();
    let listener = OrderListener::connect_with(connector, ws_config(), &credentials())
        .await
        .unwrap();
    let mut conn = server.accept().await;

    listener.subscribe(["BTC-EUR", "ETH-EUR"]).await.unwrap();
    expect_authenticate(&mut conn).await;
    conn.push(json!({"event": "authenticate", "authenticated": true}));
    conn.next_json().await;
    conn.push(json!({"event": "subscribed", "subscriptions": {"account": ["ETH-EUR"]}}));
    wait_until(|| !listener.confirmed_subscriptions().is_empty()).await;

    for _ in 0..2 {
        drop(conn);
        conn = server.accept().await;
        expect_authenticate(&mut conn).await;
        conn.assert_silent().await;

        conn.push(json!({"event": "authenticate", "authenticated": true}));
        assert_eq!(conn.next_json().await, account_subscribe(&["ETH-EUR"]));
        conn.assert_silent().await;
    }
}

#[tokio::test]
async fn test_reconnect_carries_unanswered_handshake() {
    let (connector, mut server) = mock();
    let listener = OrderListener::connect_with(connector, ws_config(), &credentials())
        .await
        .unwrap();
    let mut conn = server.accept().await;

    listener.subscribe(["BTC-EUR"]).await.unwrap();
    expect_authenticate(&mut conn).await;

    drop(conn);
    let mut conn = server.accept().await;
    expect_authenticate(&mut conn).await;
    conn.push(json!({"event": "authenticate", "authenticated": true}));
    assert_eq!(conn.next_json().await, account_subscribe(&["BTC-EUR"]));
    conn.assert_silent().await;
}

#[tokio::test]
async fn test_confirmation_from_dropped_connection_is_not_reused() {
    let (connector, mut server) = mock();
    let listener = OrderListener::connect_with(connector, ws_config(), &credentials())
        .await
        .unwrap();
    let mut conn = server.accept().await;

    let stream = listener.subscribe(["BTC-EUR"]).await.unwrap();
    expect_authenticate(&mut conn).await;
    conn.push(json!({"event": "authenticate", "authenticated": true}));
    drop(conn);

    let mut conn = server.accept().await;
    expect_authenticate(&mut conn).await;
    conn.assert_silent().await;

    conn.push(json!({"event": "authenticate", "authenticated": false}));
    assert!(matches!(
        next_event(&stream).await,
        Err(ExchangeError::NotAuthenticated)
    ));
    conn.assert_silent().await;
    assert!(listener.confirmed_subscriptions().is_empty());
}

#[tokio::test]
async fn test_restored_subscribe_waits_for_new_confirmation() {
    let (connector, mut server) = mock();
    let listener = OrderListener::connect_with(connector, ws_config(), &credentials())
        .await
        .unwrap();
    let mut conn = server.accept().await;

    listener.subscribe(["BTC-EUR"]).await.unwrap();
    expect_authenticate(&mut conn).await;
    conn.push(json!({"event": "authenticate", "authenticated": true}));
    drop(conn);

    let mut conn = server.accept().await;
    expect_authenticate(&mut conn).await;
    conn.assert_silent().await;

    conn.push(json!({"event": "authenticate", "authenticated": true}));
    assert_eq!(conn.next_json().await, account_subscribe(&["BTC-EUR"]));
    conn.assert_silent().await;
}

#[tokio::test]
async fn test_missing_credentials_are_rejected() {
    let (connector, _server) = mock();
    let result =
        OrderListener::connect_with(connector, ws_config(), &ExchangeConfig::read_only()).await;
    assert!(matches!(result, Err(ExchangeError::AuthError(_))));
}

#[tokio::test]
async fn test_close_clears_account_subscriptions() {
    let (connector, mut server) = mock();
    let listener = OrderListener::connect_with(connector, ws_config(), &credentials())
        .await
        .unwrap();
    let mut conn = server.accept().await;

    assert!(matches!(
        listener.close().await,
        Err(ExchangeError::NoSubscriptions)
    ));

    let stream = listener.subscribe(["BTC-EUR"]).await.unwrap();
    expect_authenticate(&mut conn).await;
    conn.push(json!({"event": "authenticate", "authenticated": true}));
    conn.next_json().await;
    conn.push(json!({"event": "subscribed", "subscriptions": {"account": ["BTC-EUR"]}}));
    wait_until(|| !listener.confirmed_subscriptions().is_empty()).await;

    listener.close().await.unwrap();
    assert_eq!(
        conn.next_json().await,
        json!({
            "action": "unsubscribe",
            "channels": [{"name": "account", "markets": ["BTC-EUR"]}]
        })
    );
    assert!(stream.recv().await.is_none());
}
