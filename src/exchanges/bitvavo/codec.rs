use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::WsCodec;
use crate::core::kernel::signer::HmacSigner;
use crate::exchanges::bitvavo::subscription::{Channel, EventKind, Interval, Subscription};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

/// Path signed by the `authenticate` action
const WEBSOCKET_AUTH_PATH: &str = "/websocket";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Authenticate,
    Subscribe,
    Unsubscribe,
}

#[derive(Serialize)]
struct ChannelOut<'a> {
    name: Channel,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    interval: Vec<Interval>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    markets: Vec<&'a str>,
}

impl<'a> From<&'a Subscription> for ChannelOut<'a> {
    fn from(subscription: &'a Subscription) -> Self {
        Self {
            name: subscription.channel(),
            interval: subscription.intervals().collect(),
            markets: subscription.markets().collect(),
        }
    }
}

#[derive(Serialize)]
struct MessageOut<'a> {
    action: Action,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    channels: Vec<ChannelOut<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
}

/// Error object pushed by the server instead of an event
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrame {
    pub error_code: i64,
    pub error: String,
    #[serde(default)]
    pub action: Option<String>,
}

impl From<ErrorFrame> for ExchangeError {
    fn from(frame: ErrorFrame) -> Self {
        Self::ApiError {
            code: frame.error_code,
            message: frame.error,
            action: frame.action,
        }
    }
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum WsFrame {
    /// Event-tagged frame; the payload is the whole object, tag included
    Event { kind: EventKind, payload: Value },
    Error(ErrorFrame),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BitvavoCodec;

impl BitvavoCodec {
    pub fn new() -> Self {
        Self
    }

    /// `authenticate` action signed for `GET /websocket` with an empty body
    pub fn encode_authentication(
        &self,
        signer: &HmacSigner,
        timestamp: u64,
    ) -> Result<Message, ExchangeError> {
        let signature = signer.create_signature("GET", WEBSOCKET_AUTH_PATH, b"", timestamp)?;
        Self::to_message(&MessageOut {
            action: Action::Authenticate,
            channels: Vec::new(),
            key: Some(signer.api_key()),
            signature: Some(signature),
            timestamp: Some(timestamp),
        })
    }

    fn encode_channels(
        action: Action,
        subscriptions: &[Subscription],
    ) -> Result<Message, ExchangeError> {
        if subscriptions.is_empty() {
            return Err(ExchangeError::InvalidParameters(format!(
                "refusing to {:?} without channels",
                action
            )));
        }
        Self::to_message(&MessageOut {
            action,
            channels: subscriptions.iter().map(ChannelOut::from).collect(),
            key: None,
            signature: None,
            timestamp: None,
        })
    }

    fn to_message(message: &MessageOut<'_>) -> Result<Message, ExchangeError> {
        Ok(Message::Text(serde_json::to_string(message)?))
    }
}

impl WsCodec for BitvavoCodec {
    type Subscription = Subscription;
    type Message = WsFrame;

    fn encode_subscription(
        &self,
        subscriptions: &[Subscription],
    ) -> Result<Message, ExchangeError> {
        Self::encode_channels(Action::Subscribe, subscriptions)
    }

    fn encode_unsubscription(
        &self,
        subscriptions: &[Subscription],
    ) -> Result<Message, ExchangeError> {
        Self::encode_channels(Action::Unsubscribe, subscriptions)
    }

    fn decode_message(&self, text: &str) -> Result<WsFrame, ExchangeError> {
        let value: Value = serde_json::from_str(text)?;

        match value.get("event") {
            Some(Value::String(event)) => Ok(WsFrame::Event {
                kind: event.parse()?,
                payload: value,
            }),
            Some(other) => Err(ExchangeError::DecodeError(format!(
                "event tag is not a string: {}",
                other
            ))),
            None => serde_json::from_value::<ErrorFrame>(value)
                .map(WsFrame::Error)
                .map_err(|e| {
                    ExchangeError::DecodeError(format!(
                        "frame is neither an event nor an error: {}",
                        e
                    ))
                }),
        }
    }
}
