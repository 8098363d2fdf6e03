use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::WsCodec;
use crate::core::kernel::ws::{
    ConnectionState, FrameHandler, TungsteniteConnector, WsConfig, WsConnector, WsTransport,
};
use crate::exchanges::bitvavo::codec::{BitvavoCodec, WsFrame};
use crate::exchanges::bitvavo::registry::SubscriptionRegistry;
use crate::exchanges::bitvavo::subscription::{
    Channel, EventKind, Interval, Subscribed, Subscription,
};
use crate::exchanges::bitvavo::types::{
    Authenticate, Book, Candle, Fill, Order, Ticker, Ticker24h, Ticker24hData, Trade,
};
use crate::exchanges::bitvavo::websocket_config;
use async_trait::async_trait;
use futures_util::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

/// Item of every listener stream: a decoded value or the error that
/// replaced it.
pub type ListenerEvent<T> = Result<T, ExchangeError>;

/// A push channel and the event that carries its data.
pub trait Topic: Send + Sync + 'static {
    type Value: DeserializeOwned + Send + 'static;

    const CHANNEL: Channel;
    const EVENT: EventKind;

    /// Values carried by one event, each delivered as its own stream item.
    fn decode(payload: Value) -> Result<Vec<Self::Value>, ExchangeError> {
        Ok(vec![serde_json::from_value(payload)?])
    }
}

/// Topic readable without credentials
pub trait PublicTopic: Topic {}

/// Topic that requires the authenticate handshake first
pub trait PrivateTopic: Topic {}

#[derive(Debug)]
pub struct TickerTopic;

impl Topic for TickerTopic {
    type Value = Ticker;
    const CHANNEL: Channel = Channel::Ticker;
    const EVENT: EventKind = EventKind::Ticker;
}

impl PublicTopic for TickerTopic {}

#[derive(Debug)]
pub struct Ticker24hTopic;

impl Topic for Ticker24hTopic {
    type Value = Ticker24hData;
    const CHANNEL: Channel = Channel::Ticker24h;
    const EVENT: EventKind = EventKind::Ticker24h;

    fn decode(payload: Value) -> Result<Vec<Self::Value>, ExchangeError> {
        let batch: Ticker24h = serde_json::from_value(payload)?;
        Ok(batch.data)
    }
}

impl PublicTopic for Ticker24hTopic {}

#[derive(Debug)]
pub struct BookTopic;

impl Topic for BookTopic {
    type Value = Book;
    const CHANNEL: Channel = Channel::Book;
    const EVENT: EventKind = EventKind::Book;
}

impl PublicTopic for BookTopic {}

#[derive(Debug)]
pub struct CandlesTopic;

impl Topic for CandlesTopic {
    type Value = Candle;
    const CHANNEL: Channel = Channel::Candles;
    const EVENT: EventKind = EventKind::Candle;
}

impl PublicTopic for CandlesTopic {}

#[derive(Debug)]
pub struct TradesTopic;

impl Topic for TradesTopic {
    type Value = Trade;
    const CHANNEL: Channel = Channel::Trades;
    const EVENT: EventKind = EventKind::Trade;
}

impl PublicTopic for TradesTopic {}

#[derive(Debug)]
pub struct OrderTopic;

impl Topic for OrderTopic {
    type Value = Order;
    const CHANNEL: Channel = Channel::Account;
    const EVENT: EventKind = EventKind::Order;
}

impl PrivateTopic for OrderTopic {}

#[derive(Debug)]
pub struct FillTopic;

impl Topic for FillTopic {
    type Value = Fill;
    const CHANNEL: Channel = Channel::Account;
    const EVENT: EventKind = EventKind::Fill;
}

impl PrivateTopic for FillTopic {}

/// Handle on a listener's single output queue.
///
/// Every `subscribe` hands out a clone of the same queue. The stream ends
/// once the listener is closed and buffered events are drained.
pub struct EventStream<T> {
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<ListenerEvent<T>>>>,
}

impl<T> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            receiver: Arc::clone(&self.receiver),
        }
    }
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> EventStream<T> {
    fn new(receiver: mpsc::Receiver<ListenerEvent<T>>) -> Self {
        Self {
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
        }
    }

    /// Next event, or `None` once the listener is closed.
    pub async fn recv(&self) -> Option<ListenerEvent<T>> {
        self.receiver.lock().await.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = ListenerEvent<T>> + Send {
        futures_util::stream::unfold(self, |events| async move {
            let event = events.recv().await?;
            Some((event, events))
        })
    }
}

/// An `authenticate` answer and the connection it arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AuthResult {
    pub(crate) generation: u64,
    pub(crate) authenticated: bool,
}

/// Receivers consumed by the one background task a listener runs.
pub(crate) struct BackgroundChannels {
    pub(crate) reconnects: mpsc::UnboundedReceiver<()>,
    pub(crate) auth_results: Option<mpsc::UnboundedReceiver<AuthResult>>,
}

/// Routes decoded frames: confirmations into the registry, data and errors
/// onto the output queue.
pub(crate) struct ListenerHandler<T: Topic> {
    pub(crate) codec: BitvavoCodec,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) cancel: CancellationToken,
    events: Mutex<Option<mpsc::Sender<ListenerEvent<T::Value>>>>,
    reconnects: mpsc::UnboundedSender<()>,
    background_started: AtomicBool,
    auth_results: Option<mpsc::UnboundedSender<AuthResult>>,
    _topic: PhantomData<T>,
}

impl<T: Topic> ListenerHandler<T> {
    /// Push onto the output queue, giving up if the listener is cancelled.
    pub(crate) async fn emit(&self, event: ListenerEvent<T::Value>) {
        let sender = lock(&self.events).clone();
        let Some(sender) = sender else {
            return;
        };
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            sent = sender.send(event) => {
                if sent.is_err() {
                    debug!(channel = %T::CHANNEL, "event stream dropped");
                }
            }
        }
    }

    fn close_events(&self) {
        lock(&self.events).take();
    }

    async fn handle_event(&self, generation: u64, kind: EventKind, payload: Value) {
        match kind {
            EventKind::Subscribed => {
                let confirmed = serde_json::from_value::<Subscribed>(payload)
                    .map_err(ExchangeError::from)
                    .and_then(|event| self.registry.confirm(T::CHANNEL, event));
                if let Err(e) = confirmed {
                    self.emit(Err(e)).await;
                }
            }
            EventKind::Unsubscribed => match serde_json::from_value::<Subscribed>(payload) {
                Ok(event) => self.registry.release(T::CHANNEL, event),
                Err(e) => self.emit(Err(e.into())).await,
            },
            EventKind::Authenticate => {
                let Some(auth_results) = &self.auth_results else {
                    trace!(channel = %T::CHANNEL, "ignoring authenticate event");
                    return;
                };
                match serde_json::from_value::<Authenticate>(payload) {
                    Ok(event) => {
                        let result = AuthResult {
                            generation,
                            authenticated: event.authenticated,
                        };
                        if auth_results.send(result).is_err() {
                            debug!(channel = %T::CHANNEL, "authenticate result without handshake task");
                        }
                    }
                    Err(e) => self.emit(Err(e.into())).await,
                }
            }
            kind if kind == T::EVENT => match T::decode(payload) {
                Ok(values) => {
                    for value in values {
                        self.emit(Ok(value)).await;
                    }
                }
                Err(e) => self.emit(Err(e)).await,
            },
            other => trace!(channel = %T::CHANNEL, event = %other, "ignoring event"),
        }
    }
}

#[async_trait]
impl<T: Topic> FrameHandler for ListenerHandler<T> {
    async fn on_frame(&self, generation: u64, frame: String) {
        match self.codec.decode_message(&frame) {
            Ok(WsFrame::Event { kind, payload }) => {
                self.handle_event(generation, kind, payload).await;
            }
            Ok(WsFrame::Error(error)) => self.emit(Err(error.into())).await,
            Err(e) => {
                debug!(channel = %T::CHANNEL, "failed to decode frame {}: {}", frame, e);
                self.emit(Err(e)).await;
            }
        }
    }

    async fn on_reconnect(&self) {
        if !self.background_started.load(Ordering::Acquire) {
            debug!(channel = %T::CHANNEL, "reconnected before any subscription");
            return;
        }
        if self.reconnects.send(()).is_err() {
            debug!(channel = %T::CHANNEL, "reconnect signal without background task");
        }
    }
}

/// Streaming listener for one channel on its own connection.
///
/// Public channels use [`Listener::subscribe`]; the account channel goes
/// through [`crate::exchanges::bitvavo::AuthListener`].
pub struct Listener<T: Topic> {
    pub(crate) transport: WsTransport,
    pub(crate) handler: Arc<ListenerHandler<T>>,
    stream: EventStream<T::Value>,
    background: Mutex<Option<BackgroundChannels>>,
}

impl<T: Topic> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("channel", &T::CHANNEL)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl<T: PublicTopic> Listener<T> {
    /// Connect to the configured (or default) endpoint.
    pub async fn new(config: &ExchangeConfig) -> Result<Self, ExchangeError> {
        Self::with_config(websocket_config(config)).await
    }

    pub async fn with_config(config: WsConfig) -> Result<Self, ExchangeError> {
        Self::connect_with(TungsteniteConnector::from_config(&config), config).await
    }

    pub async fn connect_with<C: WsConnector>(
        connector: C,
        config: WsConfig,
    ) -> Result<Self, ExchangeError> {
        Self::establish(connector, config, false).await
    }

    pub async fn subscribe<I, S>(&self, markets: I) -> Result<EventStream<T::Value>, ExchangeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe_with(markets, []).await
    }

    /// Request `markets` (and `intervals`, for candles) on this channel.
    ///
    /// Validation happens before anything is sent. The registry is only
    /// updated once the server confirms.
    #[instrument(skip_all, fields(exchange = "bitvavo", channel = %T::CHANNEL))]
    pub async fn subscribe_with<I, S>(
        &self,
        markets: I,
        intervals: impl IntoIterator<Item = Interval>,
    ) -> Result<EventStream<T::Value>, ExchangeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let subscription = Subscription::new(T::CHANNEL, markets, intervals)?;
        let message = self.handler.codec.encode_subscription(&[subscription])?;

        self.start_resubscriber();
        self.transport.send(message).await?;
        Ok(self.stream())
    }

    fn start_resubscriber(&self) {
        let Some(channels) = self.claim_background() else {
            return;
        };
        tokio::spawn(resubscribe(
            self.transport.clone(),
            Arc::clone(&self.handler),
            channels.reconnects,
        ));
    }
}

impl<T: Topic> Listener<T> {
    pub(crate) async fn establish<C: WsConnector>(
        connector: C,
        config: WsConfig,
        authenticated: bool,
    ) -> Result<Self, ExchangeError> {
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(config.message_buffer_size.max(1));
        let (reconnects_tx, reconnects_rx) = mpsc::unbounded_channel();
        let (auth_tx, auth_rx) = if authenticated {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let handler = Arc::new(ListenerHandler {
            codec: BitvavoCodec::new(),
            registry: SubscriptionRegistry::new(),
            cancel: cancel.clone(),
            events: Mutex::new(Some(events_tx)),
            reconnects: reconnects_tx,
            background_started: AtomicBool::new(false),
            auth_results: auth_tx,
            _topic: PhantomData,
        });
        let frame_handler: Arc<dyn FrameHandler> = handler.clone();
        let transport = WsTransport::connect(connector, config, frame_handler, cancel).await?;

        Ok(Self {
            transport,
            handler,
            stream: EventStream::new(events_rx),
            background: Mutex::new(Some(BackgroundChannels {
                reconnects: reconnects_rx,
                auth_results: auth_rx,
            })),
        })
    }

    /// Hands out the background receivers exactly once.
    pub(crate) fn claim_background(&self) -> Option<BackgroundChannels> {
        let channels = lock(&self.background).take()?;
        self.handler.background_started.store(true, Ordering::Release);
        Some(channels)
    }

    pub async fn unsubscribe<I, S>(&self, markets: I) -> Result<(), ExchangeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unsubscribe_with(markets, []).await
    }

    #[instrument(skip_all, fields(exchange = "bitvavo", channel = %T::CHANNEL))]
    pub async fn unsubscribe_with<I, S>(
        &self,
        markets: I,
        intervals: impl IntoIterator<Item = Interval>,
    ) -> Result<(), ExchangeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.handler.registry.is_empty() {
            return Err(ExchangeError::NoSubscriptions);
        }
        let subscription = Subscription::new(T::CHANNEL, markets, intervals)?;
        let message = self.handler.codec.encode_unsubscription(&[subscription])?;
        self.transport.send(message).await
    }

    /// Unsubscribe everything confirmed, then stop the connection and end
    /// the output stream.
    #[instrument(skip_all, fields(exchange = "bitvavo", channel = %T::CHANNEL))]
    pub async fn close(&self) -> Result<(), ExchangeError> {
        let subscriptions = self.handler.registry.subscriptions();
        if subscriptions.is_empty() {
            return Err(ExchangeError::NoSubscriptions);
        }

        let unsubscribed = match self.handler.codec.encode_unsubscription(&subscriptions) {
            Ok(message) => self.transport.send(message).await,
            Err(e) => Err(e),
        };
        if let Err(e) = unsubscribed {
            warn!("failed to unsubscribe while closing: {}", e);
        }

        self.handler.registry.clear();
        self.transport.close();
        self.handler.close_events();
        Ok(())
    }

    pub fn stream(&self) -> EventStream<T::Value> {
        self.stream.clone()
    }

    /// Snapshot of what the server has confirmed
    pub fn confirmed_subscriptions(&self) -> Vec<Subscription> {
        self.handler.registry.subscriptions()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.transport.state_changes()
    }
}

impl<T: Topic> Drop for Listener<T> {
    fn drop(&mut self) {
        self.handler.cancel.cancel();
    }
}

/// Replays the confirmed state once per reconnect.
async fn resubscribe<T: Topic>(
    transport: WsTransport,
    handler: Arc<ListenerHandler<T>>,
    mut reconnects: mpsc::UnboundedReceiver<()>,
) {
    loop {
        tokio::select! {
            _ = handler.cancel.cancelled() => break,
            signal = reconnects.recv() => {
                if signal.is_none() {
                    break;
                }
            }
        }

        let subscriptions = handler.registry.subscriptions();
        if subscriptions.is_empty() {
            debug!(channel = %T::CHANNEL, "nothing confirmed, skipping resubscribe");
            continue;
        }

        debug!(channel = %T::CHANNEL, count = subscriptions.len(), "resubscribing");
        let result = match handler.codec.encode_subscription(&subscriptions) {
            Ok(message) => transport.send(message).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            handler.emit(Err(e)).await;
        }
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
