use crate::core::errors::ExchangeError;
use crate::exchanges::bitvavo::subscription::Interval;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    New,
    AwaitingTrigger,
    Canceled,
    CanceledAuction,
    CanceledSelfTradePrevention,
    #[serde(rename = "canceledIOC")]
    CanceledIoc,
    #[serde(rename = "canceledFOK")]
    CanceledFok,
    CanceledMarketProtection,
    CanceledPostOnly,
    Filled,
    PartiallyFilled,
    Expired,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    StopLossLimit,
    TakeProfit,
    TakeProfitLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SelfTradePrevention {
    DecrementAndCancel,
    CancelOldest,
    CancelNewest,
    CancelBoth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerType {
    Price,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerReference {
    LastTrade,
    BestBid,
    BestAsk,
    MidPrice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MarketStatus {
    Trading,
    Halted,
    Auction,
}

/// Best bid/ask update. Fields absent from an update are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub market: String,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub best_bid: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub best_bid_size: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub best_ask: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub best_ask_size: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub last_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker24h {
    pub data: Vec<Ticker24hData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24hData {
    pub market: String,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub open: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub high: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub low: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub last: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub volume: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub volume_quote: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub bid: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub bid_size: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub ask: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub ask_size: Option<Decimal>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub start_timestamp: Option<i64>,
    #[serde(default)]
    pub open_timestamp: Option<i64>,
    #[serde(default)]
    pub close_timestamp: Option<i64>,
}

/// Order book update (socket) or snapshot (REST)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub market: String,
    pub nonce: i64,
    pub bids: Vec<Page>,
    pub asks: Vec<Page>,
}

/// One price level, `[price, size]` on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "(String, String)", into = "(String, String)")]
pub struct Page {
    pub price: Decimal,
    pub size: Decimal,
}

impl TryFrom<(String, String)> for Page {
    type Error = ExchangeError;

    fn try_from((price, size): (String, String)) -> Result<Self, Self::Error> {
        Ok(Self {
            price: parse_decimal(&price, "price")?,
            size: parse_decimal(&size, "size")?,
        })
    }
}

impl From<Page> for (String, String) {
    fn from(page: Page) -> Self {
        (page.price.to_string(), page.size.to_string())
    }
}

/// A single OHLCV candle for one market and interval
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawCandleEvent")]
pub struct Candle {
    pub market: String,
    pub interval: Interval,
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Deserialize)]
struct RawCandleEvent {
    market: String,
    interval: Interval,
    candle: Vec<(i64, String, String, String, String, String)>,
}

impl TryFrom<RawCandleEvent> for Candle {
    type Error = ExchangeError;

    fn try_from(raw: RawCandleEvent) -> Result<Self, Self::Error> {
        let [(timestamp, open, high, low, close, volume)]: [_; 1] =
            raw.candle.try_into().map_err(|candles: Vec<_>| {
                ExchangeError::DecodeError(format!(
                    "expected length 1 for candle, but was {}",
                    candles.len()
                ))
            })?;

        Ok(Self {
            market: raw.market,
            interval: raw.interval,
            timestamp,
            open: parse_decimal(&open, "open")?,
            high: parse_decimal(&high, "high")?,
            low: parse_decimal(&low, "low")?,
            close: parse_decimal(&close, "close")?,
            volume: parse_decimal(&volume, "volume")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub market: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub side: Side,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub fill_id: String,
    pub market: String,
    pub order_id: String,
    pub timestamp: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub side: Side,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub taker: bool,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub fee: Option<Decimal>,
    #[serde(default)]
    pub fee_currency: Option<String>,
    #[serde(default)]
    pub settled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub market: String,
    pub created: i64,
    pub updated: i64,
    pub status: OrderStatus,
    pub side: Side,
    pub order_type: OrderType,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub amount: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub amount_remaining: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub on_hold: Option<Decimal>,
    #[serde(default)]
    pub on_hold_currency: Option<String>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub trigger_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub trigger_amount: Option<Decimal>,
    #[serde(default)]
    pub trigger_type: Option<TriggerType>,
    #[serde(default)]
    pub trigger_reference: Option<TriggerReference>,
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
    #[serde(default)]
    pub post_only: bool,
    #[serde(default)]
    pub self_trade_prevention: Option<SelfTradePrevention>,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub fills: Vec<Fill>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub filled_amount: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub filled_amount_quote: Option<Decimal>,
    #[serde(default)]
    pub fee_currency: Option<String>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub fee_paid: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub market: String,
    pub status: MarketStatus,
    pub base: String,
    pub quote: String,
    pub price_precision: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub min_order_in_base_asset: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub min_order_in_quote_asset: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub max_order_in_base_asset: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub max_order_in_quote_asset: Option<Decimal>,
    #[serde(default)]
    pub order_types: Vec<OrderType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub fees: Fees,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fees {
    #[serde(with = "rust_decimal::serde::str")]
    pub taker: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub maker: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ServerTime {
    pub time: i64,
}

/// Payload of the `authenticate` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Authenticate {
    pub authenticated: bool,
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(raw)
        .map_err(|e| ExchangeError::DecodeError(format!("invalid {} '{}': {}", field, raw, e)))
}
