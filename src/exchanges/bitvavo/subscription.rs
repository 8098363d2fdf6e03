use crate::core::errors::ExchangeError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Named stream on the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Account,
    Book,
    Candles,
    Trades,
    Ticker,
    Ticker24h,
}

impl Channel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Book => "book",
            Self::Candles => "candles",
            Self::Trades => "trades",
            Self::Ticker => "ticker",
            Self::Ticker24h => "ticker24h",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account" => Ok(Self::Account),
            "book" => Ok(Self::Book),
            "candles" => Ok(Self::Candles),
            "trades" => Ok(Self::Trades),
            "ticker" => Ok(Self::Ticker),
            "ticker24h" => Ok(Self::Ticker24h),
            other => Err(ExchangeError::DecodeError(format!("unknown channel '{}'", other))),
        }
    }
}

/// Candle interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    Minutes1,
    #[serde(rename = "5m")]
    Minutes5,
    #[serde(rename = "15m")]
    Minutes15,
    #[serde(rename = "30m")]
    Minutes30,
    #[serde(rename = "1h")]
    Hours1,
    #[serde(rename = "2h")]
    Hours2,
    #[serde(rename = "4h")]
    Hours4,
    #[serde(rename = "6h")]
    Hours6,
    #[serde(rename = "8h")]
    Hours8,
}

impl Interval {
    pub const ALL: [Self; 9] = [
        Self::Minutes1,
        Self::Minutes5,
        Self::Minutes15,
        Self::Minutes30,
        Self::Hours1,
        Self::Hours2,
        Self::Hours4,
        Self::Hours6,
        Self::Hours8,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minutes1 => "1m",
            Self::Minutes5 => "5m",
            Self::Minutes15 => "15m",
            Self::Minutes30 => "30m",
            Self::Hours1 => "1h",
            Self::Hours2 => "2h",
            Self::Hours4 => "4h",
            Self::Hours6 => "6h",
            Self::Hours8 => "8h",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|interval| interval.as_str() == s)
            .ok_or_else(|| ExchangeError::DecodeError(format!("unknown interval '{}'", s)))
    }
}

/// Value of the `event` tag on inbound frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Subscribed,
    Unsubscribed,
    Authenticate,
    Ticker,
    Ticker24h,
    Trade,
    Candle,
    Book,
    Order,
    Fill,
}

impl EventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribed => "subscribed",
            Self::Unsubscribed => "unsubscribed",
            Self::Authenticate => "authenticate",
            Self::Ticker => "ticker",
            Self::Ticker24h => "ticker24h",
            Self::Trade => "trade",
            Self::Candle => "candle",
            Self::Book => "book",
            Self::Order => "order",
            Self::Fill => "fill",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscribed" => Ok(Self::Subscribed),
            "unsubscribed" => Ok(Self::Unsubscribed),
            "authenticate" => Ok(Self::Authenticate),
            "ticker" => Ok(Self::Ticker),
            "ticker24h" => Ok(Self::Ticker24h),
            "trade" => Ok(Self::Trade),
            "candle" => Ok(Self::Candle),
            "book" => Ok(Self::Book),
            "order" => Ok(Self::Order),
            "fill" => Ok(Self::Fill),
            other => Err(ExchangeError::DecodeError(format!("unknown event '{}'", other))),
        }
    }
}

/// One channel entry of a subscribe or unsubscribe request.
///
/// A candles subscription always carries at least one interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    channel: Channel,
    markets: BTreeSet<String>,
    intervals: BTreeSet<Interval>,
}

impl Subscription {
    pub fn new<I, S>(
        channel: Channel,
        markets: I,
        intervals: impl IntoIterator<Item = Interval>,
    ) -> Result<Self, ExchangeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let subscription = Self::confirmed(
            channel,
            markets.into_iter().map(Into::into).collect(),
            intervals.into_iter().collect(),
        );
        if channel == Channel::Candles && subscription.intervals.is_empty() {
            return Err(ExchangeError::InvalidParameters(
                "candles subscription requires at least one interval".to_string(),
            ));
        }
        Ok(subscription)
    }

    /// Builds an entry from server-confirmed state, skipping validation.
    pub(crate) fn confirmed(
        channel: Channel,
        markets: BTreeSet<String>,
        intervals: BTreeSet<Interval>,
    ) -> Self {
        Self {
            channel,
            markets,
            intervals,
        }
    }

    /// Collapses entries sharing a channel and interval set into one entry
    /// with the union of their markets.
    pub fn merge(subscriptions: impl IntoIterator<Item = Self>) -> Vec<Self> {
        let mut merged: BTreeMap<(Channel, BTreeSet<Interval>), BTreeSet<String>> = BTreeMap::new();
        for subscription in subscriptions {
            merged
                .entry((subscription.channel, subscription.intervals))
                .or_default()
                .extend(subscription.markets);
        }
        merged
            .into_iter()
            .map(|((channel, intervals), markets)| Self::confirmed(channel, markets, intervals))
            .collect()
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn markets(&self) -> impl Iterator<Item = &str> {
        self.markets.iter().map(String::as_str)
    }

    pub fn intervals(&self) -> impl Iterator<Item = Interval> + '_ {
        self.intervals.iter().copied()
    }
}

/// Payload of `subscribed` and `unsubscribed` events: the full active set
/// of the connection after the server applied the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Subscribed {
    #[serde(default)]
    pub subscriptions: BTreeMap<Channel, ChannelSubscriptions>,
}

/// Active markets of one channel; candles are keyed by interval first.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ChannelSubscriptions {
    Markets(BTreeSet<String>),
    Intervals(BTreeMap<Interval, BTreeSet<String>>),
}

impl ChannelSubscriptions {
    /// Drops intervals that no longer carry any market.
    pub fn pruned(self) -> Self {
        match self {
            Self::Markets(markets) => Self::Markets(markets),
            Self::Intervals(mut intervals) => {
                intervals.retain(|_, markets| !markets.is_empty());
                Self::Intervals(intervals)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Markets(markets) => markets.is_empty(),
            Self::Intervals(intervals) => intervals.values().all(BTreeSet::is_empty),
        }
    }

    /// One entry per interval, so the interval to markets mapping survives.
    pub fn to_subscriptions(&self, channel: Channel) -> Vec<Subscription> {
        match self {
            Self::Markets(markets) if markets.is_empty() => Vec::new(),
            Self::Markets(markets) => vec![Subscription::confirmed(
                channel,
                markets.clone(),
                BTreeSet::new(),
            )],
            Self::Intervals(intervals) => intervals
                .iter()
                .filter(|(_, markets)| !markets.is_empty())
                .map(|(interval, markets)| {
                    Subscription::confirmed(channel, markets.clone(), BTreeSet::from([*interval]))
                })
                .collect(),
        }
    }
}
