use crate::core::errors::ExchangeError;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::collections::HashMap;

/// Result type for signing operations: (headers, `query_params`)
pub type SignatureResult = Result<(HashMap<String, String>, Vec<(String, String)>), ExchangeError>;

/// Signer trait for request authentication
///
/// Implementations turn a request description into the headers and query
/// parameters the exchange expects on an authenticated call.
pub trait Signer: Send + Sync {
    /// Sign a request and return headers and query parameters
    ///
    /// # Arguments
    /// * `method` - HTTP method (GET, POST, etc.)
    /// * `endpoint` - API endpoint path, relative to the versioned base URL
    /// * `query_string` - Query string (without leading '?')
    /// * `body` - Raw request body bytes
    /// * `timestamp` - Request timestamp in milliseconds
    fn sign_request(
        &self,
        method: &str,
        endpoint: &str,
        query_string: &str,
        body: &[u8],
        timestamp: u64,
    ) -> SignatureResult;
}

/// HMAC-SHA256 signer for the versioned Bitvavo API.
///
/// The signed payload is `timestamp + method + "/v2" + path + body`, hex
/// encoded. The same signature authenticates REST calls and the WebSocket
/// `authenticate` action (`GET /websocket`, empty body).
pub struct HmacSigner {
    api_key: Secret<String>,
    secret_key: Secret<String>,
    access_window_ms: u16,
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner")
            .field("access_window_ms", &self.access_window_ms)
            .finish_non_exhaustive()
    }
}

impl HmacSigner {
    pub fn new(api_key: Secret<String>, secret_key: Secret<String>, access_window_ms: u16) -> Self {
        Self {
            api_key,
            secret_key,
            access_window_ms,
        }
    }

    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Hex HMAC-SHA256 over `timestamp + method + "/v2" + path + body`.
    pub fn create_signature(
        &self,
        method: &str,
        path: &str,
        body: &[u8],
        timestamp: u64,
    ) -> Result<String, ExchangeError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.expose_secret().as_bytes())
            .map_err(|e| ExchangeError::AuthError(format!("Invalid secret key: {}", e)))?;

        mac.update(timestamp.to_string().as_bytes());
        mac.update(method.as_bytes());
        mac.update(b"/v2");
        mac.update(path.as_bytes());
        mac.update(body);

        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl Signer for HmacSigner {
    fn sign_request(
        &self,
        method: &str,
        endpoint: &str,
        query_string: &str,
        body: &[u8],
        timestamp: u64,
    ) -> SignatureResult {
        let path = if query_string.is_empty() {
            endpoint.to_string()
        } else {
            format!("{}?{}", endpoint, query_string)
        };
        let signature = self.create_signature(method, &path, body, timestamp)?;

        let mut headers = HashMap::new();
        headers.insert("Bitvavo-Access-Key".to_string(), self.api_key().to_string());
        headers.insert("Bitvavo-Access-Signature".to_string(), signature);
        headers.insert("Bitvavo-Access-Timestamp".to_string(), timestamp.to_string());
        headers.insert(
            "Bitvavo-Access-Window".to_string(),
            self.access_window_ms.to_string(),
        );
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        Ok((headers, split_query_string(query_string)))
    }
}

pub(crate) fn split_query_string(query_string: &str) -> Vec<(String, String)> {
    if query_string.is_empty() {
        return Vec::new();
    }
    query_string
        .split('&')
        .filter_map(|param| {
            param
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}
