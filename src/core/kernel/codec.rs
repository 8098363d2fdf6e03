use crate::core::errors::ExchangeError;
use tokio_tungstenite::tungstenite::Message;

/// Codec trait for exchange-specific WebSocket message encoding/decoding
///
/// Converts between the exchange's control/data frames and typed values.
/// Control frames at the socket level (ping, pong, close) never reach the
/// codec; the transport handles them.
pub trait WsCodec: Send + Sync + 'static {
    /// The unit of subscription understood by the exchange
    type Subscription;

    /// The type representing parsed inbound frames
    type Message: Send;

    /// Encode a subscription request into a WebSocket message
    fn encode_subscription(
        &self,
        subscriptions: &[Self::Subscription],
    ) -> Result<Message, ExchangeError>;

    /// Encode an unsubscription request into a WebSocket message
    fn encode_unsubscription(
        &self,
        subscriptions: &[Self::Subscription],
    ) -> Result<Message, ExchangeError>;

    /// Decode a text frame into a typed message
    ///
    /// Every failure is returned as an error; the caller decides whether the
    /// stream continues.
    fn decode_message(&self, text: &str) -> Result<Self::Message, ExchangeError>;
}
