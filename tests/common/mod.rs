#![allow(dead_code)]

use async_trait::async_trait;
use bitvavo::core::errors::ExchangeError;
use bitvavo::core::kernel::{WsConfig, WsConnector, WsSink, WsStream};
use bitvavo::exchanges::bitvavo::EventStream;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(2);
pub const QUIET: Duration = Duration::from_millis(100);

/// Server side of one in-memory connection
pub struct MockConnection {
    outbound: fmpsc::UnboundedReceiver<Message>,
    inbound: fmpsc::UnboundedSender<Result<Message, ExchangeError>>,
}

impl MockConnection {
    /// Next JSON frame the client sent
    pub async fn next_json(&mut self) -> Value {
        loop {
            let message = timeout(WAIT, self.outbound.next())
                .await
                .expect("timed out waiting for client frame")
                .expect("client closed the connection");
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).expect("client sent invalid JSON");
            }
        }
    }

    /// Asserts the client sends nothing for a short while.
    pub async fn assert_silent(&mut self) {
        loop {
            match timeout(QUIET, self.outbound.next()).await {
                Err(_) | Ok(None) => return,
                Ok(Some(Message::Text(text))) => panic!("unexpected client frame: {}", text),
                Ok(Some(_)) => continue,
            }
        }
    }

    pub fn push(&self, value: Value) {
        self.push_raw(&value.to_string());
    }

    pub fn push_raw(&self, text: &str) {
        self.inbound
            .unbounded_send(Ok(Message::Text(text.to_string())))
            .expect("client stopped reading");
    }
}

/// Hands every connection the client dials to the test.
pub struct MockConnector {
    connections: mpsc::UnboundedSender<MockConnection>,
}

#[async_trait]
impl WsConnector for MockConnector {
    async fn connect(&self) -> Result<(WsSink, WsStream), ExchangeError> {
        let (out_tx, out_rx) = fmpsc::unbounded();
        let (in_tx, in_rx) = fmpsc::unbounded();
        self.connections
            .send(MockConnection {
                outbound: out_rx,
                inbound: in_tx,
            })
            .map_err(|_| ExchangeError::NetworkError("mock server gone".to_string()))?;

        let sink = out_tx.sink_map_err(|e| ExchangeError::NetworkError(e.to_string()));
        Ok((Box::pin(sink), Box::pin(in_rx)))
    }
}

pub struct MockServer {
    connections: mpsc::UnboundedReceiver<MockConnection>,
}

impl MockServer {
    pub async fn accept(&mut self) -> MockConnection {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }
}

pub fn mock() -> (MockConnector, MockServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MockConnector { connections: tx },
        MockServer { connections: rx },
    )
}

pub fn ws_config() -> WsConfig {
    WsConfig::new("ws://mock", "bitvavo").with_reconnect_delay_ms(10)
}

pub async fn next_event<T: Send + 'static>(stream: &EventStream<T>) -> Result<T, ExchangeError> {
    timeout(WAIT, stream.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream ended")
}

/// Polls `condition` until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}
