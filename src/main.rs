use bitvavo::exchanges::bitvavo::{create_bitvavo_rest, OrderListener, TickerListener};
use bitvavo::ExchangeConfig;
use std::time::Duration;
use tracing::{info, warn};

const MARKETS: [&str; 2] = ["BTC-EUR", "ETH-EUR"];

#[cfg(feature = "env-file")]
fn load_config() -> ExchangeConfig {
    ExchangeConfig::from_env_auto("BITVAVO").unwrap_or_else(|_| ExchangeConfig::read_only())
}

#[cfg(not(feature = "env-file"))]
fn load_config() -> ExchangeConfig {
    ExchangeConfig::from_env("BITVAVO").unwrap_or_else(|_| ExchangeConfig::read_only())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = load_config();

    let rest = create_bitvavo_rest(&config)?;
    let server_time = rest.get_time().await?;
    info!(server_time, "connected to REST api");

    let tickers = TickerListener::new(&config).await?;
    let stream = tickers.subscribe(MARKETS).await?;
    for _ in 0..10 {
        match stream.recv().await {
            Some(Ok(ticker)) => info!(
                market = %ticker.market,
                bid = ?ticker.best_bid,
                ask = ?ticker.best_ask,
                "ticker"
            ),
            Some(Err(e)) => warn!("ticker stream error: {}", e),
            None => break,
        }
    }
    if let Err(e) = tickers.close().await {
        warn!("closing ticker listener: {}", e);
    }

    if !config.has_credentials() {
        info!("no credentials configured, skipping account stream");
        return Ok(());
    }

    let orders = OrderListener::new(&config).await?;
    let stream = orders.subscribe(MARKETS).await?;
    let deadline = tokio::time::sleep(Duration::from_secs(60));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            event = stream.recv() => match event {
                Some(Ok(order)) => info!(?order, "order update"),
                Some(Err(e)) => warn!("order stream error: {}", e),
                None => break,
            },
        }
    }
    if let Err(e) = orders.close().await {
        warn!("closing order listener: {}", e);
    }

    Ok(())
}
