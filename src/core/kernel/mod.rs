/// Exchange-agnostic transport kernel
///
/// ## Transport Layer
/// - `WsTransport`: self-healing WebSocket connection with a bounded frame
///   queue, a dispatch task and a reconnect loop
/// - `WsConnector`: how a connection is dialled (`TungsteniteConnector` in
///   production, in-memory connectors in tests)
/// - `RestClient`: HTTP client interface with rate-limit bookkeeping
///
/// ## Authentication
/// - `Signer`: pluggable request signing
/// - `HmacSigner`: HMAC-SHA256 over the versioned request path
///
/// ## Message Handling
/// - `WsCodec`: exchange-specific message encoding/decoding
///
/// The kernel contains no exchange-specific message formats; those live in
/// the exchange codecs.
///
/// ```rust,no_run
/// use bitvavo::core::kernel::*;
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// struct Print;
///
/// #[async_trait::async_trait]
/// impl FrameHandler for Print {
///     async fn on_frame(&self, generation: u64, frame: String) {
///         println!("[{}] {}", generation, frame);
///     }
///
///     async fn on_reconnect(&self) {}
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = WsConfig::new("wss://ws.bitvavo.com/v2", "bitvavo");
/// let connector = TungsteniteConnector::from_config(&config);
/// let transport =
///     WsTransport::connect(connector, config, Arc::new(Print), CancellationToken::new()).await?;
/// transport.close();
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod rest;
pub mod signer;
pub mod ws;

pub use codec::WsCodec;
pub use rest::{
    RateLimit, RateLimitTracker, ReqwestRest, RestClient, RestClientBuilder, RestClientConfig,
};
pub use signer::{HmacSigner, SignatureResult, Signer};
pub use ws::{
    ConnectionState, DebugFn, FrameHandler, TungsteniteConnector, WsConfig, WsConnector, WsSink,
    WsStream, WsTransport,
};
