//! CLOB auth error normalization and classification
//!
//! Auth failures arrive in two shapes: an HTTP response with a status and
//! a JSON `{error}`/`{message}` body, or a transport error with no status
//! at all. Everything is normalized into [`ErrorInfo`] at the boundary so
//! the derivation engine never inspects heterogeneous shapes directly.
//!
//! Classification is exact on the status code, not just the message text:
//! a 401 "invalid l1 request headers" triggers the swap-and-retry path
//! while a 400 "could not create api key" means the wallet has never
//! traded, and misrouting one as the other picks the wrong remediation.

use serde::Deserialize;
use std::fmt;

/// Normalized view of a failed auth call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// HTTP status code, if the failure produced a response at all
    pub status: Option<u16>,
    pub message: String,
}

/// CLOB API error response body
#[derive(Debug, Deserialize)]
struct ClobErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorInfo {
    /// Normalize an HTTP response into error info, preferring the JSON
    /// `error`/`message` fields and falling back to the raw body.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = match serde_json::from_str::<ClobErrorBody>(body) {
            Ok(parsed) => parsed
                .error
                .or(parsed.message)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| body.to_string()),
            Err(_) => body.to_string(),
        };
        Self {
            status: Some(status),
            message,
        }
    }

    /// Normalize a transport-level failure (timeout, DNS, connect)
    pub fn from_transport(err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "Request timed out".to_string()
        } else if err.is_connect() {
            "Connection failed".to_string()
        } else {
            err.to_string()
        };
        Self {
            status: None,
            message,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Message with the documented fallback for empty extractions
    pub fn message_or_unknown(&self) -> &str {
        if self.message.is_empty() {
            "Unknown error"
        } else {
            &self.message
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "{}: {}", code, self.message_or_unknown()),
            None => write!(f, "{}", self.message_or_unknown()),
        }
    }
}

/// True iff the error is the CLOB's "invalid L1 request headers" 401.
/// This is the signature that drives the swapped-address retry.
pub fn is_invalid_l1_headers(err: &ErrorInfo) -> bool {
    err.status == Some(401)
        && err
            .message
            .to_lowercase()
            .contains("invalid l1 request headers")
}

/// True iff the CLOB refused to create an API key (400), which in
/// practice means the wallet has never traded on the exchange.
pub fn is_could_not_create_key(err: &ErrorInfo) -> bool {
    err.status == Some(400)
        && err
            .message
            .to_lowercase()
            .contains("could not create api key")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_l1_requires_exact_401() {
        let hit = ErrorInfo::from_response(401, r#"{"error":"Invalid L1 Request headers"}"#);
        assert!(is_invalid_l1_headers(&hit));

        // Same text, wrong status: must not match
        let wrong_status = ErrorInfo::from_response(400, r#"{"error":"Invalid L1 Request headers"}"#);
        assert!(!is_invalid_l1_headers(&wrong_status));

        let no_status = ErrorInfo::other("invalid l1 request headers");
        assert!(!is_invalid_l1_headers(&no_status));
    }

    #[test]
    fn could_not_create_key_requires_exact_400() {
        let hit = ErrorInfo::from_response(400, r#"{"error":"could not create api key"}"#);
        assert!(is_could_not_create_key(&hit));

        let wrong_status = ErrorInfo::from_response(401, r#"{"error":"could not create api key"}"#);
        assert!(!is_could_not_create_key(&wrong_status));
    }

    #[test]
    fn classification_is_case_insensitive() {
        let err = ErrorInfo::from_response(401, r#"{"message":"INVALID L1 REQUEST HEADERS"}"#);
        assert!(is_invalid_l1_headers(&err));
    }

    #[test]
    fn from_response_prefers_error_field() {
        let err = ErrorInfo::from_response(400, r#"{"error":"first","message":"second"}"#);
        assert_eq!(err.message, "first");

        let err = ErrorInfo::from_response(400, r#"{"message":"only"}"#);
        assert_eq!(err.message, "only");
    }

    #[test]
    fn from_response_falls_back_to_raw_body() {
        let err = ErrorInfo::from_response(502, "Bad Gateway");
        assert_eq!(err.message, "Bad Gateway");
        assert_eq!(err.status, Some(502));
    }

    #[test]
    fn empty_message_displays_unknown() {
        let err = ErrorInfo::from_response(500, "");
        assert_eq!(err.message_or_unknown(), "Unknown error");
        assert_eq!(err.to_string(), "500: Unknown error");
    }
}
