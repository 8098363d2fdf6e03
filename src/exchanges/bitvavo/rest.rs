use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::kernel::{HmacSigner, ReqwestRest, RestClient, RestClientBuilder, RestClientConfig};
use crate::exchanges::bitvavo::types::{Account, Book, Market, ServerTime, Ticker24hData};
use crate::exchanges::bitvavo::API_URL;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::instrument;

const RATE_LIMIT_REMAINING_HEADER: &str = "Bitvavo-Ratelimit-Remaining";
const RATE_LIMIT_RESET_AT_HEADER: &str = "Bitvavo-Ratelimit-Resetat";

/// Request/response endpoints used alongside the socket listeners.
#[derive(Debug)]
pub struct BitvavoRest<R: RestClient = ReqwestRest> {
    rest_client: R,
}

impl<R: RestClient> BitvavoRest<R> {
    pub fn new(rest_client: R) -> Self {
        Self { rest_client }
    }

    /// Server time in unix milliseconds
    #[instrument(skip(self), fields(exchange = "bitvavo"))]
    pub async fn get_time(&self) -> Result<i64, ExchangeError> {
        let time: ServerTime = self.rest_client.get_json("/time", &[], false).await?;
        Ok(time.time)
    }

    #[instrument(skip(self), fields(exchange = "bitvavo"))]
    pub async fn get_markets(&self) -> Result<Vec<Market>, ExchangeError> {
        self.rest_client.get_json("/markets", &[], false).await
    }

    #[instrument(skip(self), fields(exchange = "bitvavo"))]
    pub async fn get_market(&self, market: &str) -> Result<Market, ExchangeError> {
        self.rest_client
            .get_json("/markets", &[("market", market)], false)
            .await
    }

    /// Book snapshot; `depth` limits the number of levels per side.
    #[instrument(skip(self), fields(exchange = "bitvavo"))]
    pub async fn get_order_book(
        &self,
        market: &str,
        depth: Option<u64>,
    ) -> Result<Book, ExchangeError> {
        let endpoint = format!("/{}/book", market);
        let depth = depth.map(|d| d.to_string());
        let params: Vec<(&str, &str)> = depth.iter().map(|d| ("depth", d.as_str())).collect();
        self.rest_client.get_json(&endpoint, &params, false).await
    }

    #[instrument(skip(self), fields(exchange = "bitvavo"))]
    pub async fn get_ticker_24h(&self, market: &str) -> Result<Ticker24hData, ExchangeError> {
        self.rest_client
            .get_json("/ticker/24h", &[("market", market)], false)
            .await
    }

    /// Fee tier of the authenticated account
    #[instrument(skip(self), fields(exchange = "bitvavo"))]
    pub async fn get_account(&self) -> Result<Account, ExchangeError> {
        self.rest_client.get_json("/account", &[], true).await
    }

    /// Remaining weight, `-1` before the first response
    pub fn rate_limit(&self) -> i64 {
        self.rest_client.rate_limit().remaining
    }

    pub fn rate_limit_reset_at(&self) -> Option<DateTime<Utc>> {
        self.rest_client.rate_limit().reset_at
    }
}

/// REST client for `config`; requests are signed when credentials are set.
pub fn create_bitvavo_rest(
    config: &ExchangeConfig,
) -> Result<BitvavoRest<ReqwestRest>, ExchangeError> {
    let base_url = config
        .base_url
        .clone()
        .unwrap_or_else(|| API_URL.to_string());
    let rest_config = RestClientConfig::new(base_url, "bitvavo".to_string())
        .with_rate_limit_headers(RATE_LIMIT_REMAINING_HEADER, RATE_LIMIT_RESET_AT_HEADER);

    let mut builder = RestClientBuilder::new(rest_config);
    if config.has_credentials() {
        builder = builder.with_signer(Arc::new(HmacSigner::new(
            config.api_key.clone(),
            config.secret_key.clone(),
            config.access_window_ms,
        )));
    }

    Ok(BitvavoRest::new(builder.build()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::RateLimit;
    use async_trait::async_trait;
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Request {
        endpoint: String,
        params: Vec<(String, String)>,
        authenticated: bool,
    }

    struct RecordingRest {
        response: Value,
        requests: Mutex<Vec<Request>>,
    }

    impl RecordingRest {
        fn answering(response: Value) -> Self {
            Self {
                response,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn last_request(&self) -> Request {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl RestClient for RecordingRest {
        async fn get(
            &self,
            endpoint: &str,
            query_params: &[(&str, &str)],
            authenticated: bool,
        ) -> Result<Value, ExchangeError> {
            self.requests.lock().unwrap().push(Request {
                endpoint: endpoint.to_string(),
                params: query_params
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
                authenticated,
            });
            Ok(self.response.clone())
        }

        async fn get_json<T: DeserializeOwned>(
            &self,
            endpoint: &str,
            query_params: &[(&str, &str)],
            authenticated: bool,
        ) -> Result<T, ExchangeError> {
            let value = self.get(endpoint, query_params, authenticated).await?;
            Ok(serde_json::from_value(value)?)
        }

        fn rate_limit(&self) -> RateLimit {
            RateLimit {
                remaining: 990,
                reset_at: DateTime::from_timestamp_millis(1_700_000_000_000),
            }
        }
    }

    #[tokio::test]
    async fn test_get_time() {
        let rest = BitvavoRest::new(RecordingRest::answering(json!({"time": 1_700_000_000_123_i64})));
        assert_eq!(rest.get_time().await.unwrap(), 1_700_000_000_123);
        assert_eq!(rest.rest_client.last_request().endpoint, "/time");
    }

    #[tokio::test]
    async fn test_order_book_depth_is_optional() {
        let rest = BitvavoRest::new(RecordingRest::answering(json!({
            "market": "BTC-EUR",
            "nonce": 42,
            "bids": [["30000", "0.5"]],
            "asks": []
        })));

        let book = rest.get_order_book("BTC-EUR", Some(5)).await.unwrap();
        assert_eq!(book.bids.len(), 1);
        assert_eq!(
            rest.rest_client.last_request(),
            Request {
                endpoint: "/BTC-EUR/book".to_string(),
                params: vec![("depth".to_string(), "5".to_string())],
                authenticated: false,
            }
        );

        rest.get_order_book("BTC-EUR", None).await.unwrap();
        assert!(rest.rest_client.last_request().params.is_empty());
    }

    #[tokio::test]
    async fn test_account_is_signed() {
        let rest = BitvavoRest::new(RecordingRest::answering(json!({
            "fees": {"taker": "0.0025", "maker": "0.0015", "volume": "10000.00"}
        })));

        let account = rest.get_account().await.unwrap();
        assert_eq!(account.fees.taker.to_string(), "0.0025");
        assert!(rest.rest_client.last_request().authenticated);
    }

    #[test]
    fn test_rate_limit_accessors() {
        let rest = BitvavoRest::new(RecordingRest::answering(Value::Null));
        assert_eq!(rest.rate_limit(), 990);
        assert_eq!(
            rest.rate_limit_reset_at().map(|t| t.timestamp_millis()),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn test_factory_without_credentials() {
        let rest = create_bitvavo_rest(&ExchangeConfig::read_only()).unwrap();
        assert_eq!(rest.rate_limit(), -1);
        assert!(rest.rate_limit_reset_at().is_none());
    }
}
