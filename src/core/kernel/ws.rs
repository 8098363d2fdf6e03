use crate::core::errors::ExchangeError;
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt, TryFutureExt};
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

/// Write half of an established connection
pub type WsSink = Pin<Box<dyn Sink<Message, Error = ExchangeError> + Send>>;

/// Read half of an established connection
pub type WsStream = Pin<Box<dyn Stream<Item = Result<Message, ExchangeError>> + Send>>;

/// Optional hook receiving connection lifecycle messages
pub type DebugFn = Arc<dyn Fn(&str) + Send + Sync>;

/// WebSocket transport configuration
#[derive(Clone)]
pub struct WsConfig {
    pub url: String,
    /// Exchange name for logging/tracing
    pub exchange_name: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Capacity of the inbound frame queue
    pub message_buffer_size: usize,
    /// Delay between reconnection attempts in milliseconds
    pub reconnect_delay_ms: u64,
    /// `None` keeps retrying until cancelled
    pub max_reconnect_attempts: Option<u32>,
    pub debug: Option<DebugFn>,
}

impl fmt::Debug for WsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConfig")
            .field("url", &self.url)
            .field("exchange_name", &self.exchange_name)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("message_buffer_size", &self.message_buffer_size)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("has_debug", &self.debug.is_some())
            .finish()
    }
}

impl WsConfig {
    pub fn new(url: impl Into<String>, exchange_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            exchange_name: exchange_name.into(),
            connect_timeout_ms: 10_000,
            message_buffer_size: 1024,
            reconnect_delay_ms: 1_000,
            max_reconnect_attempts: None,
            debug: None,
        }
    }

    pub fn with_reconnect_delay_ms(mut self, reconnect_delay_ms: u64) -> Self {
        self.reconnect_delay_ms = reconnect_delay_ms;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    pub fn with_message_buffer_size(mut self, message_buffer_size: usize) -> Self {
        self.message_buffer_size = message_buffer_size;
        self
    }

    pub fn with_debug(mut self, debug: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.debug = Some(Arc::new(debug));
        self
    }
}

/// Lifecycle of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Closed,
}

/// Establishes a connection and hands back its two halves.
///
/// The transport calls this once at start-up and again for every
/// reconnection attempt.
#[async_trait]
pub trait WsConnector: Send + Sync + 'static {
    async fn connect(&self) -> Result<(WsSink, WsStream), ExchangeError>;
}

/// Receives inbound text frames and reconnect notifications.
///
/// `on_frame` is awaited once per frame, in arrival order, together with the
/// generation of the connection the frame was read from. `on_reconnect`
/// runs after a replacement connection is usable and before reading from it
/// resumes.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    async fn on_frame(&self, generation: u64, frame: String);

    async fn on_reconnect(&self);
}

/// Tungstenite-based connector
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    url: String,
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    pub fn from_config(config: &WsConfig) -> Self {
        Self {
            url: config.url.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }
}

#[async_trait]
impl WsConnector for TungsteniteConnector {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn connect(&self) -> Result<(WsSink, WsStream), ExchangeError> {
        let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                ExchangeError::ConnectionTimeout("WebSocket connection timeout".to_string())
            })?
            .map_err(|e| {
                ExchangeError::NetworkError(format!("WebSocket connection failed: {}", e))
            })?;

        let (write, read) = ws_stream.split();
        let sink = write.sink_map_err(|e| {
            ExchangeError::NetworkError(format!("Failed to send message: {}", e))
        });
        let stream = read.map(|message| {
            message.map_err(|e| ExchangeError::NetworkError(format!("WebSocket error: {}", e)))
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

enum ReadOutcome {
    Disconnected(String),
    Cancelled,
}

struct TransportInner {
    exchange_name: String,
    writer: Mutex<Option<WsSink>>,
    /// Bumped under the writer lock whenever a connection is installed
    generation: AtomicU64,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
    debug: Option<DebugFn>,
}

/// Self-healing WebSocket connection.
///
/// A reader task pushes text frames into a bounded queue and owns the
/// reconnect loop. A dispatch task drains the queue into the
/// [`FrameHandler`]. Both stop when the cancellation token fires.
#[derive(Clone)]
pub struct WsTransport {
    inner: Arc<TransportInner>,
}

impl fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsTransport")
            .field("exchange", &self.inner.exchange_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl WsTransport {
    /// Dial the first connection and start the reader and dispatch tasks.
    ///
    /// A failure to establish the first connection is returned; failures
    /// after that are healed by the reconnect loop.
    #[instrument(skip_all, fields(exchange = %config.exchange_name, url = %config.url))]
    pub async fn connect<C: WsConnector>(
        connector: C,
        config: WsConfig,
        handler: Arc<dyn FrameHandler>,
        cancel: CancellationToken,
    ) -> Result<Self, ExchangeError> {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let transport = Self {
            inner: Arc::new(TransportInner {
                exchange_name: config.exchange_name.clone(),
                writer: Mutex::new(None),
                generation: AtomicU64::new(0),
                state,
                cancel,
                debug: config.debug.clone(),
            }),
        };

        let (sink, stream) = match connector.connect().await {
            Ok(halves) => halves,
            Err(e) => {
                transport.set_state(ConnectionState::Closed);
                return Err(e);
            }
        };
        let generation = transport.install_writer(sink).await;
        transport.emit_debug("websocket connected");

        let (frames_tx, frames_rx) = mpsc::channel(config.message_buffer_size.max(1));
        tokio::spawn(dispatch_frames(
            frames_rx,
            Arc::clone(&handler),
            transport.inner.cancel.clone(),
        ));
        tokio::spawn(
            transport
                .clone()
                .run(connector, config, stream, generation, frames_tx, handler),
        );

        Ok(transport)
    }

    /// Send a message on the current connection.
    ///
    /// Fails immediately while no connection is established.
    pub async fn send(&self, message: Message) -> Result<(), ExchangeError> {
        let mut writer = self.inner.writer.lock().await;
        let sink = writer
            .as_mut()
            .ok_or_else(|| ExchangeError::NetworkError("WebSocket not connected".to_string()))?;
        trace!(exchange = %self.inner.exchange_name, "sending {:?}", message);
        sink.send(message).await
    }

    /// Send a message only if connection `generation` is still the current
    /// one.
    pub async fn send_on(&self, generation: u64, message: Message) -> Result<(), ExchangeError> {
        let mut writer = self.inner.writer.lock().await;
        if self.generation() != generation {
            return Err(ExchangeError::NetworkError(format!(
                "WebSocket connection {} was replaced",
                generation
            )));
        }
        let sink = writer
            .as_mut()
            .ok_or_else(|| ExchangeError::NetworkError("WebSocket not connected".to_string()))?;
        trace!(exchange = %self.inner.exchange_name, generation, "sending {:?}", message);
        sink.send(message).await
    }

    /// Identifies the most recently established connection, starting at 1.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Stop both tasks and close the connection.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    async fn run<C: WsConnector>(
        self,
        connector: C,
        config: WsConfig,
        mut stream: WsStream,
        mut generation: u64,
        frames: mpsc::Sender<(u64, String)>,
        handler: Arc<dyn FrameHandler>,
    ) {
        loop {
            match self.read_frames(&mut stream, generation, &frames).await {
                ReadOutcome::Cancelled => break,
                ReadOutcome::Disconnected(reason) => {
                    self.inner.writer.lock().await.take();
                    self.set_state(ConnectionState::Disconnected);
                    warn!(exchange = %self.inner.exchange_name, %reason, "WebSocket disconnected");
                    self.emit_debug(&format!("websocket disconnected with error: {}", reason));
                }
            }

            match self.reconnect(&connector, &config).await {
                Some((next, next_generation)) => {
                    stream = next;
                    generation = next_generation;
                    self.emit_debug("websocket reconnected");
                    handler.on_reconnect().await;
                }
                None => break,
            }
        }

        if let Some(mut sink) = self.inner.writer.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!(exchange = %self.inner.exchange_name, "error while closing WebSocket: {}", e);
            }
        }
        self.set_state(ConnectionState::Closed);
    }

    async fn read_frames(
        &self,
        stream: &mut WsStream,
        generation: u64,
        frames: &mpsc::Sender<(u64, String)>,
    ) -> ReadOutcome {
        let cancel = &self.inner.cancel;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return ReadOutcome::Cancelled,
                next = stream.next() => next,
            };

            let text = match next {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(exchange = %self.inner.exchange_name, "dropping non UTF-8 binary frame: {}", e);
                        continue;
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = self.send(Message::Pong(payload)).await {
                        warn!(exchange = %self.inner.exchange_name, "Failed to send pong: {}", e);
                    }
                    continue;
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(frame))) => {
                    return ReadOutcome::Disconnected(format!("closed by server: {:?}", frame))
                }
                Some(Err(e)) => return ReadOutcome::Disconnected(e.to_string()),
                None => return ReadOutcome::Disconnected("stream ended".to_string()),
            };

            trace!(exchange = %self.inner.exchange_name, "received {}", text);
            tokio::select! {
                _ = cancel.cancelled() => return ReadOutcome::Cancelled,
                sent = frames.send((generation, text)) => {
                    if sent.is_err() {
                        return ReadOutcome::Cancelled;
                    }
                }
            }
        }
    }

    async fn reconnect<C: WsConnector>(
        &self,
        connector: &C,
        config: &WsConfig,
    ) -> Option<(WsStream, u64)> {
        self.set_state(ConnectionState::Reconnecting);

        let interval = FixedInterval::from_millis(config.reconnect_delay_ms);
        let delays: Box<dyn Iterator<Item = Duration> + Send> = match config.max_reconnect_attempts {
            Some(attempts) => Box::new(interval.take(attempts as usize)),
            None => Box::new(interval),
        };

        let attempt = move || {
            self.emit_debug("websocket reconnecting...");
            connector.connect().map_err(move |e| {
                self.emit_debug(&format!("websocket error while reconnecting: {}", e));
                e
            })
        };

        let result = tokio::select! {
            _ = self.inner.cancel.cancelled() => return None,
            result = Retry::spawn(delays, attempt) => result,
        };

        match result {
            Ok((sink, stream)) => {
                let generation = self.install_writer(sink).await;
                Some((stream, generation))
            }
            Err(e) => {
                error!(exchange = %self.inner.exchange_name, "giving up on reconnecting: {}", e);
                None
            }
        }
    }

    async fn install_writer(&self, sink: WsSink) -> u64 {
        let mut writer = self.inner.writer.lock().await;
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *writer = Some(sink);
        drop(writer);
        self.set_state(ConnectionState::Connected);
        generation
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            debug!(exchange = %self.inner.exchange_name, ?previous, ?state, "connection state changed");
        }
    }

    fn emit_debug(&self, message: &str) {
        debug!(exchange = %self.inner.exchange_name, "{}", message);
        if let Some(debug) = &self.inner.debug {
            debug(message);
        }
    }
}

async fn dispatch_frames(
    mut frames: mpsc::Receiver<(u64, String)>,
    handler: Arc<dyn FrameHandler>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => frame,
        };
        let Some((generation, frame)) = frame else { break };
        handler.on_frame(generation, frame).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::timeout;

    struct Peer {
        outbound: fmpsc::UnboundedReceiver<Message>,
        inbound: fmpsc::UnboundedSender<Result<Message, ExchangeError>>,
    }

    impl Peer {
        fn push_text(&self, text: &str) {
            self.inbound
                .unbounded_send(Ok(Message::Text(text.to_string())))
                .unwrap();
        }
    }

    struct TestConnector {
        peers: mpsc::UnboundedSender<Peer>,
        attempts: Arc<AtomicUsize>,
        succeed_first: usize,
    }

    #[async_trait]
    impl WsConnector for TestConnector {
        async fn connect(&self) -> Result<(WsSink, WsStream), ExchangeError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt >= self.succeed_first {
                return Err(ExchangeError::NetworkError("refused".to_string()));
            }
            let (out_tx, out_rx) = fmpsc::unbounded();
            let (in_tx, in_rx) = fmpsc::unbounded();
            self.peers
                .send(Peer {
                    outbound: out_rx,
                    inbound: in_tx,
                })
                .map_err(|_| ExchangeError::NetworkError("test gone".to_string()))?;
            let sink = out_tx.sink_map_err(|e| ExchangeError::NetworkError(e.to_string()));
            Ok((Box::pin(sink), Box::pin(in_rx)))
        }
    }

    struct Recorder {
        frames: mpsc::UnboundedSender<(u64, String)>,
        reconnects: mpsc::UnboundedSender<()>,
    }

    #[async_trait]
    impl FrameHandler for Recorder {
        async fn on_frame(&self, generation: u64, frame: String) {
            let _ = self.frames.send((generation, frame));
        }

        async fn on_reconnect(&self) {
            let _ = self.reconnects.send(());
        }
    }

    struct Harness {
        transport: WsTransport,
        peers: mpsc::UnboundedReceiver<Peer>,
        frames: mpsc::UnboundedReceiver<(u64, String)>,
        reconnects: mpsc::UnboundedReceiver<()>,
        attempts: Arc<AtomicUsize>,
    }

    async fn harness(succeed_first: usize, config: WsConfig) -> Harness {
        let (peers_tx, peers) = mpsc::unbounded_channel();
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (reconnects_tx, reconnects) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicUsize::new(0));
        let connector = TestConnector {
            peers: peers_tx,
            attempts: Arc::clone(&attempts),
            succeed_first,
        };
        let handler = Arc::new(Recorder {
            frames: frames_tx,
            reconnects: reconnects_tx,
        });
        let transport = WsTransport::connect(connector, config, handler, CancellationToken::new())
            .await
            .unwrap();
        Harness {
            transport,
            peers,
            frames,
            reconnects,
            attempts,
        }
    }

    fn test_config() -> WsConfig {
        WsConfig::new("ws://test", "test").with_reconnect_delay_ms(10)
    }

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_frames_are_dispatched_in_order() {
        let mut h = harness(usize::MAX, test_config().with_message_buffer_size(1)).await;
        let peer = h.peers.recv().await.unwrap();

        for i in 0..5 {
            peer.push_text(&format!("frame-{}", i));
        }
        for i in 0..5 {
            let (generation, frame) = timeout(WAIT, h.frames.recv()).await.unwrap().unwrap();
            assert_eq!(generation, 1);
            assert_eq!(frame, format!("frame-{}", i));
        }
        assert!(h.transport.is_connected());
    }

    #[tokio::test]
    async fn test_reconnect_notifies_handler_after_new_connection() {
        let mut h = harness(usize::MAX, test_config()).await;
        let first = h.peers.recv().await.unwrap();
        drop(first);

        let second = timeout(WAIT, h.peers.recv()).await.unwrap().unwrap();
        timeout(WAIT, h.reconnects.recv()).await.unwrap().unwrap();
        assert_eq!(h.transport.state(), ConnectionState::Connected);

        h.transport
            .send(Message::Text("hello".to_string()))
            .await
            .unwrap();
        let mut outbound = second.outbound;
        let sent = timeout(WAIT, outbound.next()).await.unwrap().unwrap();
        assert_eq!(sent, Message::Text("hello".to_string()));

        second.inbound
            .unbounded_send(Ok(Message::Text("after".to_string())))
            .unwrap();
        let (generation, frame) = timeout(WAIT, h.frames.recv()).await.unwrap().unwrap();
        assert_eq!(generation, 2);
        assert_eq!(frame, "after");
    }

    #[tokio::test]
    async fn test_frames_carry_the_generation_they_were_read_on() {
        let mut h = harness(usize::MAX, test_config()).await;
        let first = h.peers.recv().await.unwrap();
        assert_eq!(h.transport.generation(), 1);

        first.push_text("old");
        drop(first);
        let mut second = timeout(WAIT, h.peers.recv()).await.unwrap().unwrap();
        timeout(WAIT, h.reconnects.recv()).await.unwrap().unwrap();
        second.push_text("new");

        let old = timeout(WAIT, h.frames.recv()).await.unwrap().unwrap();
        let new = timeout(WAIT, h.frames.recv()).await.unwrap().unwrap();
        assert_eq!(old, (1, "old".to_string()));
        assert_eq!(new, (2, "new".to_string()));

        let stale = h.transport.send_on(1, Message::Text("late".to_string())).await;
        assert!(matches!(stale, Err(ExchangeError::NetworkError(_))));
        h.transport
            .send_on(2, Message::Text("current".to_string()))
            .await
            .unwrap();
        let sent = timeout(WAIT, second.outbound.next()).await.unwrap().unwrap();
        assert_eq!(sent, Message::Text("current".to_string()));
    }

    #[tokio::test]
    async fn test_ping_is_answered_with_pong() {
        let mut h = harness(usize::MAX, test_config()).await;
        let mut peer = h.peers.recv().await.unwrap();

        peer.inbound
            .unbounded_send(Ok(Message::Ping(vec![1, 2, 3])))
            .unwrap();
        let reply = timeout(WAIT, peer.outbound.next()).await.unwrap().unwrap();
        assert_eq!(reply, Message::Pong(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_bounded_reconnect_gives_up_and_closes() {
        let config = test_config().with_max_reconnect_attempts(2);
        let mut h = harness(1, config).await;
        let peer = h.peers.recv().await.unwrap();
        let mut states = h.transport.state_changes();
        drop(peer);

        timeout(WAIT, states.wait_for(|state| *state == ConnectionState::Closed))
            .await
            .unwrap()
            .unwrap();
        // initial connect + first try + two retries
        assert_eq!(h.attempts.load(Ordering::SeqCst), 4);
        assert!(h.reconnects.try_recv().is_err());

        let result = h.transport.send(Message::Text("late".to_string())).await;
        assert!(matches!(result, Err(ExchangeError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_close_stops_transport() {
        let mut h = harness(usize::MAX, test_config()).await;
        let _peer = h.peers.recv().await.unwrap();
        let mut states = h.transport.state_changes();

        h.transport.close();

        timeout(WAIT, states.wait_for(|state| *state == ConnectionState::Closed))
            .await
            .unwrap()
            .unwrap();
        assert!(h.transport.send(Message::Text("x".to_string())).await.is_err());
    }

    #[tokio::test]
    async fn test_initial_connect_failure_is_returned() {
        let (peers_tx, _peers) = mpsc::unbounded_channel();
        let (frames_tx, _frames) = mpsc::unbounded_channel();
        let (reconnects_tx, _reconnects) = mpsc::unbounded_channel();
        let connector = TestConnector {
            peers: peers_tx,
            attempts: Arc::new(AtomicUsize::new(0)),
            succeed_first: 0,
        };
        let handler = Arc::new(Recorder {
            frames: frames_tx,
            reconnects: reconnects_tx,
        });

        let result =
            WsTransport::connect(connector, test_config(), handler, CancellationToken::new()).await;
        assert!(matches!(result, Err(ExchangeError::NetworkError(_))));
    }
}
