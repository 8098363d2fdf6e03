use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::WsCodec;
use crate::core::kernel::signer::HmacSigner;
use crate::core::kernel::ws::{
    ConnectionState, TungsteniteConnector, WsConfig, WsConnector, WsTransport,
};
use crate::exchanges::bitvavo::codec::BitvavoCodec;
use crate::exchanges::bitvavo::listener::{
    AuthResult, EventStream, Listener, ListenerHandler, PrivateTopic, Topic,
};
use crate::exchanges::bitvavo::subscription::Subscription;
use crate::exchanges::bitvavo::websocket_config;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, instrument};

#[derive(Debug, Default)]
struct PendingEntries {
    next_id: u64,
    queue: VecDeque<(u64, Vec<Subscription>)>,
}

/// Subscriptions waiting for their `authenticate` confirmation, oldest
/// first. Each authenticate frame sent has exactly one entry here.
#[derive(Debug, Default)]
struct PendingQueue {
    entries: Mutex<PendingEntries>,
}

impl PendingQueue {
    /// Returns the id that [`PendingQueue::remove`] takes back.
    fn push_back(&self, subscriptions: Vec<Subscription>) -> u64 {
        let mut entries = self.lock();
        let id = entries.next_id;
        entries.next_id += 1;
        entries.queue.push_back((id, subscriptions));
        id
    }

    fn push_front(&self, subscriptions: Vec<Subscription>) {
        let mut entries = self.lock();
        let id = entries.next_id;
        entries.next_id += 1;
        entries.queue.push_front((id, subscriptions));
    }

    fn pop_front(&self) -> Option<Vec<Subscription>> {
        self.lock().queue.pop_front().map(|(_, subscriptions)| subscriptions)
    }

    fn remove(&self, id: u64) -> Option<Vec<Subscription>> {
        let mut entries = self.lock();
        let position = entries.queue.iter().position(|(entry, _)| *entry == id)?;
        entries.queue.remove(position).map(|(_, subscriptions)| subscriptions)
    }

    fn drain(&self) -> Vec<Subscription> {
        self.lock()
            .queue
            .drain(..)
            .flat_map(|(_, subscriptions)| subscriptions)
            .collect()
    }

    fn clear(&self) {
        self.lock().queue.clear();
    }

    fn lock(&self) -> MutexGuard<'_, PendingEntries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Listener for the account channel.
///
/// Every subscribe is preceded by an `authenticate` action; the subscribe
/// itself is only sent once the server confirms. After a reconnect the
/// confirmed state is restored through the same handshake.
pub struct AuthListener<T: PrivateTopic> {
    listener: Listener<T>,
    signer: Arc<HmacSigner>,
    pending: Arc<PendingQueue>,
}

impl<T: PrivateTopic> fmt::Debug for AuthListener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthListener")
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}

impl<T: PrivateTopic> AuthListener<T> {
    pub async fn new(config: &ExchangeConfig) -> Result<Self, ExchangeError> {
        Self::with_config(config, websocket_config(config)).await
    }

    pub async fn with_config(
        config: &ExchangeConfig,
        ws_config: WsConfig,
    ) -> Result<Self, ExchangeError> {
        let connector = TungsteniteConnector::from_config(&ws_config);
        Self::connect_with(connector, ws_config, config).await
    }

    pub async fn connect_with<C: WsConnector>(
        connector: C,
        ws_config: WsConfig,
        config: &ExchangeConfig,
    ) -> Result<Self, ExchangeError> {
        if !config.has_credentials() {
            return Err(ExchangeError::AuthError(
                "API key and secret are required for the account channel".to_string(),
            ));
        }
        let signer = Arc::new(HmacSigner::new(
            config.api_key.clone(),
            config.secret_key.clone(),
            config.access_window_ms,
        ));
        let listener = Listener::establish(connector, ws_config, true).await?;

        Ok(Self {
            listener,
            signer,
            pending: Arc::default(),
        })
    }

    /// Authenticate, then subscribe to `markets` once the server accepts.
    ///
    /// A rejected handshake arrives on the stream as
    /// [`ExchangeError::NotAuthenticated`].
    #[instrument(skip_all, fields(exchange = "bitvavo", channel = %T::CHANNEL))]
    pub async fn subscribe<I, S>(&self, markets: I) -> Result<EventStream<T::Value>, ExchangeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let subscription = Subscription::new(T::CHANNEL, markets, [])?;

        self.start_handshake();
        let entry = self.pending.push_back(vec![subscription]);
        if let Err(e) = send_authentication(&self.listener.transport, &self.signer).await {
            self.pending.remove(entry);
            return Err(e);
        }
        Ok(self.listener.stream())
    }

    pub async fn unsubscribe<I, S>(&self, markets: I) -> Result<(), ExchangeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.listener.unsubscribe(markets).await
    }

    pub async fn close(&self) -> Result<(), ExchangeError> {
        self.listener.close().await?;
        self.pending.clear();
        Ok(())
    }

    pub fn stream(&self) -> EventStream<T::Value> {
        self.listener.stream()
    }

    pub fn confirmed_subscriptions(&self) -> Vec<Subscription> {
        self.listener.confirmed_subscriptions()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.listener.connection_state()
    }

    fn start_handshake(&self) {
        let Some(channels) = self.listener.claim_background() else {
            return;
        };
        let Some(auth_results) = channels.auth_results else {
            return;
        };
        tokio::spawn(coordinate(
            self.listener.transport.clone(),
            Arc::clone(&self.listener.handler),
            Arc::clone(&self.signer),
            Arc::clone(&self.pending),
            channels.reconnects,
            auth_results,
        ));
    }
}

async fn send_authentication(
    transport: &WsTransport,
    signer: &HmacSigner,
) -> Result<(), ExchangeError> {
    let timestamp = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default();
    let message = BitvavoCodec::new().encode_authentication(signer, timestamp)?;
    transport.send(message).await
}

/// Pairs authenticate confirmations with pending subscriptions and
/// re-runs the handshake after every reconnect.
///
/// A confirmation only counts for the connection it arrived on. Answers
/// read from a replaced connection are dropped, leaving their entries for
/// the reconnect branch to restore.
async fn coordinate<T: Topic>(
    transport: WsTransport,
    handler: Arc<ListenerHandler<T>>,
    signer: Arc<HmacSigner>,
    pending: Arc<PendingQueue>,
    mut reconnects: mpsc::UnboundedReceiver<()>,
    mut auth_results: mpsc::UnboundedReceiver<AuthResult>,
) {
    let cancel = handler.cancel.clone();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(()) = reconnects.recv() => {
                // confirmations for frames sent on the old connection never arrive
                let mut stranded = pending.drain();
                stranded.extend(handler.registry.subscriptions());
                let restore = Subscription::merge(stranded);
                if restore.is_empty() {
                    debug!(channel = %T::CHANNEL, "nothing to restore after reconnect");
                    continue;
                }

                let entry = pending.push_back(restore);
                if let Err(e) = send_authentication(&transport, &signer).await {
                    pending.remove(entry);
                    handler.emit(Err(e)).await;
                }
            }
            Some(result) = auth_results.recv() => {
                if result.generation != transport.generation() {
                    debug!(
                        channel = %T::CHANNEL,
                        generation = result.generation,
                        "dropping authenticate confirmation from a replaced connection"
                    );
                    continue;
                }
                let Some(subscriptions) = pending.pop_front() else {
                    debug!(channel = %T::CHANNEL, "authenticate confirmation without pending subscription");
                    continue;
                };
                if !result.authenticated {
                    handler.emit(Err(ExchangeError::NotAuthenticated)).await;
                    continue;
                }

                let message = match handler.codec.encode_subscription(&subscriptions) {
                    Ok(message) => message,
                    Err(e) => {
                        handler.emit(Err(e)).await;
                        continue;
                    }
                };
                if let Err(e) = transport.send_on(result.generation, message).await {
                    // the reconnect signal that follows restores it
                    debug!(channel = %T::CHANNEL, "subscribe not sent, keeping it pending: {}", e);
                    pending.push_front(subscriptions);
                }
            }
            else => break,
        }
    }
}
