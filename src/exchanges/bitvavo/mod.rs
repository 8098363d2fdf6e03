pub mod auth;
pub mod codec;
pub mod listener;
pub mod registry;
pub mod rest;
pub mod subscription;
pub mod types;

use crate::core::config::ExchangeConfig;
use crate::core::kernel::WsConfig;

pub use auth::AuthListener;
pub use codec::{BitvavoCodec, ErrorFrame, WsFrame};
pub use listener::{
    BookTopic, CandlesTopic, EventStream, FillTopic, Listener, ListenerEvent, OrderTopic,
    PrivateTopic, PublicTopic, Ticker24hTopic, TickerTopic, Topic, TradesTopic,
};
pub use registry::SubscriptionRegistry;
pub use rest::{create_bitvavo_rest, BitvavoRest};
pub use subscription::{Channel, EventKind, Interval, Subscription};

pub const WS_URL: &str = "wss://ws.bitvavo.com/v2";
pub const API_URL: &str = "https://api.bitvavo.com/v2";

pub type TickerListener = Listener<TickerTopic>;
pub type Ticker24hListener = Listener<Ticker24hTopic>;
pub type BookListener = Listener<BookTopic>;
pub type CandlesListener = Listener<CandlesTopic>;
pub type TradesListener = Listener<TradesTopic>;
pub type OrderListener = AuthListener<OrderTopic>;
pub type FillListener = AuthListener<FillTopic>;

/// Socket settings for `config`, falling back to the public endpoint.
pub fn websocket_config(config: &ExchangeConfig) -> WsConfig {
    let url = config.ws_url.clone().unwrap_or_else(|| WS_URL.to_string());
    WsConfig::new(url, "bitvavo")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_config_defaults_to_public_endpoint() {
        let config = websocket_config(&ExchangeConfig::read_only());
        assert_eq!(config.url, WS_URL);
        assert_eq!(config.message_buffer_size, 1024);

        let custom = ExchangeConfig::read_only().ws_url("ws://localhost:9000".to_string());
        assert_eq!(websocket_config(&custom).url, "ws://localhost:9000");
    }
}
