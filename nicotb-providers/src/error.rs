//! Shared provider client error types
//!
//! Common error enum and body-reading helpers used by the platform clients
//! and the session negotiator.

use thiserror::Error;

/// Maximum response body size for provider HTTP calls (16 MB).
/// Prevents OOM from malicious or misconfigured upstream servers.
pub const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

/// Common error type for all provider HTTP clients.
#[derive(Debug, Error)]
pub enum ProviderClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error {status} for {url}")]
    Http { status: reqwest::StatusCode, url: String },

    #[error("Parse error: {0}")]
    Parse(String),

    /// The session-open call answered without session data.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The platform offered no negotiation path for the content.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    #[error("Response too large ({size} bytes, max {MAX_RESPONSE_SIZE})")]
    ResponseTooLarge { size: u64 },
}

/// Read a response body with the size limit applied.
///
/// Checks the `Content-Length` hint first (if available), then enforces the
/// limit on the actual body bytes.
async fn bytes_with_limit(response: reqwest::Response) -> Result<Vec<u8>, ProviderClientError> {
    if let Some(cl) = response.content_length() {
        if cl as usize > MAX_RESPONSE_SIZE {
            return Err(ProviderClientError::ResponseTooLarge { size: cl });
        }
    }
    let bytes = response.bytes().await?;
    if bytes.len() > MAX_RESPONSE_SIZE {
        return Err(ProviderClientError::ResponseTooLarge { size: bytes.len() as u64 });
    }
    Ok(bytes.to_vec())
}

/// Read a response body with size limit and deserialize as JSON.
pub async fn json_with_limit<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProviderClientError> {
    let bytes = bytes_with_limit(response).await?;
    serde_json::from_slice(&bytes).map_err(Into::into)
}

/// Read a response body with size limit as UTF-8 text.
pub async fn text_with_limit(response: reqwest::Response) -> Result<String, ProviderClientError> {
    let bytes = bytes_with_limit(response).await?;
    String::from_utf8(bytes).map_err(|e| ProviderClientError::Parse(format!("body is not UTF-8: {e}")))
}

/// Check HTTP response status before processing body.
pub fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, ProviderClientError> {
    let status = resp.status();
    if status.is_client_error() || status.is_server_error() {
        return Err(ProviderClientError::Http {
            status,
            url: resp.url().to_string(),
        });
    }
    Ok(resp)
}

impl From<reqwest::Error> for ProviderClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<reqwest::header::InvalidHeaderValue> for ProviderClientError {
    fn from(err: reqwest::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<url::ParseError> for ProviderClientError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_network() {
        let err = ProviderClientError::Network("connection refused".to_string());
        assert_eq!(err.to_string(), "Network error: connection refused");
    }

    #[test]
    fn test_error_display_http() {
        let err = ProviderClientError::Http {
            status: reqwest::StatusCode::NOT_FOUND,
            url: "http://embed.nicovideo.jp/play/sm9".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error 404 Not Found for http://embed.nicovideo.jp/play/sm9");
    }

    #[test]
    fn test_error_display_forbidden() {
        let err = ProviderClientError::Forbidden("session rejected".to_string());
        assert_eq!(err.to_string(), "Forbidden: session rejected");
    }

    #[test]
    fn test_error_display_not_found() {
        let err = ProviderClientError::NotFound("sm9".to_string());
        assert_eq!(err.to_string(), "Not found: sm9");
    }

    #[test]
    fn test_error_display_response_too_large() {
        let err = ProviderClientError::ResponseTooLarge { size: 20_000_000 };
        let msg = err.to_string();
        assert!(msg.contains("20000000"));
        assert!(msg.contains(&MAX_RESPONSE_SIZE.to_string()));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: ProviderClientError = json_err.into();
        assert!(matches!(err, ProviderClientError::Parse(_)));
    }

    #[test]
    fn test_error_from_url_parse() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: ProviderClientError = url_err.into();
        assert!(matches!(err, ProviderClientError::InvalidConfig(_)));
    }
}
