use crate::core::errors::ExchangeError;
use crate::core::kernel::signer::Signer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{instrument, trace};

/// REST client trait for making HTTP requests
#[async_trait]
pub trait RestClient: Send + Sync {
    /// Make a GET request
    ///
    /// # Arguments
    /// * `endpoint` - The API endpoint path
    /// * `query_params` - Query parameters as key-value pairs
    /// * `authenticated` - Whether to sign the request
    async fn get(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        authenticated: bool,
    ) -> Result<Value, ExchangeError>;

    /// Make a GET request with strongly-typed response
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        authenticated: bool,
    ) -> Result<T, ExchangeError>;

    /// Snapshot of the server-reported rate limit
    fn rate_limit(&self) -> RateLimit;
}

/// Rate limit as last reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Remaining weight, `-1` until the first response is seen
    pub remaining: i64,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Tracks the rate-limit headers of every response.
#[derive(Debug)]
pub struct RateLimitTracker {
    remaining_header: String,
    reset_at_header: String,
    remaining: AtomicI64,
    reset_at_ms: AtomicI64,
}

impl RateLimitTracker {
    pub fn new(remaining_header: impl Into<String>, reset_at_header: impl Into<String>) -> Self {
        Self {
            remaining_header: remaining_header.into(),
            reset_at_header: reset_at_header.into(),
            remaining: AtomicI64::new(-1),
            reset_at_ms: AtomicI64::new(0),
        }
    }

    /// Absent headers leave the state untouched; present but malformed
    /// headers are an error.
    pub fn update(&self, headers: &HeaderMap) -> Result<(), ExchangeError> {
        if let Some(remaining) = self.header_i64(headers, &self.remaining_header)? {
            self.remaining.store(remaining, Ordering::Relaxed);
        }
        if let Some(reset_at) = self.header_i64(headers, &self.reset_at_header)? {
            self.reset_at_ms.store(reset_at, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> RateLimit {
        let reset_at_ms = self.reset_at_ms.load(Ordering::Relaxed);
        RateLimit {
            remaining: self.remaining.load(Ordering::Relaxed),
            reset_at: if reset_at_ms > 0 {
                DateTime::<Utc>::from_timestamp_millis(reset_at_ms)
            } else {
                None
            },
        }
    }

    fn header_i64(&self, headers: &HeaderMap, name: &str) -> Result<Option<i64>, ExchangeError> {
        let Some(value) = headers.get(name) else {
            return Ok(None);
        };
        value
            .to_str()
            .ok()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .map(Some)
            .ok_or_else(|| {
                ExchangeError::DecodeError(format!("invalid value for header {}: {:?}", name, value))
            })
    }
}

/// Configuration for the REST client
#[derive(Clone, Debug)]
pub struct RestClientConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Exchange name for logging and tracing
    pub exchange_name: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string to include in requests
    pub user_agent: String,
    /// (remaining, reset-at) rate-limit header names
    pub rate_limit_headers: Option<(String, String)>,
}

impl RestClientConfig {
    pub fn new(base_url: String, exchange_name: String) -> Self {
        Self {
            base_url,
            exchange_name,
            timeout_seconds: 30,
            user_agent: "bitvavo-rs/0.1".to_string(),
            rate_limit_headers: None,
        }
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_rate_limit_headers(
        mut self,
        remaining: impl Into<String>,
        reset_at: impl Into<String>,
    ) -> Self {
        self.rate_limit_headers = Some((remaining.into(), reset_at.into()));
        self
    }
}

/// Builder for creating REST client instances
pub struct RestClientBuilder {
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
}

impl RestClientBuilder {
    pub fn new(config: RestClientConfig) -> Self {
        Self {
            config,
            signer: None,
        }
    }

    /// Set the signer for authenticated requests
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn build(self) -> Result<ReqwestRest, ExchangeError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(self.config.timeout_seconds))
            .user_agent(&self.config.user_agent)
            .build()?;

        let rate_limit = self
            .config
            .rate_limit_headers
            .as_ref()
            .map(|(remaining, reset_at)| Arc::new(RateLimitTracker::new(remaining, reset_at)));

        Ok(ReqwestRest {
            client,
            config: self.config,
            signer: self.signer,
            rate_limit,
        })
    }
}

/// Error body returned with non-2xx responses
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_code: i64,
    error: String,
}

/// Implementation of `RestClient` using reqwest
#[derive(Clone)]
pub struct ReqwestRest {
    client: Client,
    config: RestClientConfig,
    signer: Option<Arc<dyn Signer>>,
    rate_limit: Option<Arc<RateLimitTracker>>,
}

impl std::fmt::Debug for ReqwestRest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestRest")
            .field("config", &self.config)
            .field("has_signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

impl ReqwestRest {
    fn get_timestamp() -> Result<u64, ExchangeError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .map_err(|e| ExchangeError::AuthError(format!("Failed to get timestamp: {}", e)))
    }

    fn build_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url, endpoint)
    }

    fn create_query_string(params: &[(&str, &str)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    #[instrument(skip(self, response), fields(exchange = %self.config.exchange_name, status = %response.status()))]
    async fn handle_response(&self, response: Response) -> Result<Value, ExchangeError> {
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.update(response.headers())?;
        }

        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            ExchangeError::NetworkError(format!("Failed to read response body: {}", e))
        })?;

        trace!("Response body: {}", response_text);

        if status.is_success() {
            Ok(serde_json::from_str(&response_text)?)
        } else {
            Err(match serde_json::from_str::<ErrorBody>(&response_text) {
                Ok(body) => ExchangeError::ApiError {
                    code: body.error_code,
                    message: body.error,
                    action: None,
                },
                Err(_) => ExchangeError::ApiError {
                    code: i64::from(status.as_u16()),
                    message: response_text,
                    action: None,
                },
            })
        }
    }

    #[instrument(skip(self, body), fields(exchange = %self.config.exchange_name, method = %method, endpoint = %endpoint))]
    async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        query_params: &[(&str, &str)],
        body: &[u8],
        authenticated: bool,
    ) -> Result<Value, ExchangeError> {
        let url = self.build_url(endpoint);
        let mut request = self.client.request(method.clone(), &url);

        if authenticated {
            let signer = self.signer.as_ref().ok_or_else(|| {
                ExchangeError::AuthError(
                    "Authentication required but no signer provided".to_string(),
                )
            })?;
            let query_string = Self::create_query_string(query_params);
            let timestamp = Self::get_timestamp()?;
            let (headers, signed_params) =
                signer.sign_request(method.as_str(), endpoint, &query_string, body, timestamp)?;

            for (key, value) in headers {
                request = request.header(&key, &value);
            }
            if !signed_params.is_empty() {
                request = request.query(&signed_params);
            }
        } else if !query_params.is_empty() {
            request = request.query(query_params);
        }

        if !body.is_empty() {
            request = request
                .header("Content-Type", "application/json")
                .body(body.to_vec());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExchangeError::NetworkError(format!("Request failed: {}", e)))?;

        self.handle_response(response).await
    }
}

#[async_trait]
impl RestClient for ReqwestRest {
    #[instrument(skip(self, query_params), fields(exchange = %self.config.exchange_name, endpoint = %endpoint, param_count = query_params.len()))]
    async fn get(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        authenticated: bool,
    ) -> Result<Value, ExchangeError> {
        self.make_request(Method::GET, endpoint, query_params, &[], authenticated)
            .await
    }

    #[instrument(skip(self, query_params), fields(exchange = %self.config.exchange_name, endpoint = %endpoint, param_count = query_params.len()))]
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query_params: &[(&str, &str)],
        authenticated: bool,
    ) -> Result<T, ExchangeError> {
        let value = self
            .make_request(Method::GET, endpoint, query_params, &[], authenticated)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    fn rate_limit(&self) -> RateLimit {
        self.rate_limit.as_ref().map_or(
            RateLimit {
                remaining: -1,
                reset_at: None,
            },
            |tracker| tracker.snapshot(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn tracker() -> RateLimitTracker {
        RateLimitTracker::new("Bitvavo-Ratelimit-Remaining", "Bitvavo-Ratelimit-Resetat")
    }

    #[test]
    fn test_rate_limit_starts_unknown() {
        let snapshot = tracker().snapshot();
        assert_eq!(snapshot.remaining, -1);
        assert!(snapshot.reset_at.is_none());
    }

    #[test]
    fn test_rate_limit_updates_from_headers() {
        let tracker = tracker();
        let mut headers = HeaderMap::new();
        headers.insert("bitvavo-ratelimit-remaining", HeaderValue::from_static("995"));
        headers.insert(
            "bitvavo-ratelimit-resetat",
            HeaderValue::from_static("1700000000000"),
        );

        tracker.update(&headers).unwrap();
        let snapshot = tracker.snapshot();

        assert_eq!(snapshot.remaining, 995);
        assert_eq!(
            snapshot.reset_at.map(|t| t.timestamp_millis()),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn test_rate_limit_ignores_missing_headers() {
        let tracker = tracker();
        let mut headers = HeaderMap::new();
        headers.insert("bitvavo-ratelimit-remaining", HeaderValue::from_static("10"));
        tracker.update(&headers).unwrap();

        tracker.update(&HeaderMap::new()).unwrap();
        assert_eq!(tracker.snapshot().remaining, 10);
    }

    #[test]
    fn test_rate_limit_rejects_malformed_header() {
        let tracker = tracker();
        let mut headers = HeaderMap::new();
        headers.insert("bitvavo-ratelimit-remaining", HeaderValue::from_static("lots"));

        assert!(matches!(
            tracker.update(&headers),
            Err(ExchangeError::DecodeError(_))
        ));
        assert_eq!(tracker.snapshot().remaining, -1);
    }

    #[test]
    fn test_query_string() {
        assert_eq!(
            ReqwestRest::create_query_string(&[("market", "BTC-EUR"), ("depth", "10")]),
            "market=BTC-EUR&depth=10"
        );
        assert_eq!(ReqwestRest::create_query_string(&[]), "");
    }
}
