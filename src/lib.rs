pub mod core;
pub mod exchanges;

pub use crate::core::{config::ExchangeConfig, errors::ExchangeError};
pub use exchanges::bitvavo::{
    BookListener, CandlesListener, FillListener, OrderListener, Ticker24hListener,
    TickerListener, TradesListener,
};
