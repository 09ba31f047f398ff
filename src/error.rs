//! Error types for telephony operations
//!
//! Errors are classified by recoverability:
//! - Retryable: network issues, timeouts, rate limits, generic API failures
//! - Terminal: the call resource is gone, malformed configuration
//! - RequiresUserAction: revoked or unrefreshable RingCentral credentials

use thiserror::Error;

/// Message fragment the CRM status route forwards when a RingOut id expired.
const RINGOUT_NOT_FOUND: &str = "Resource for parameter [ringOutId] is not found";

/// Error types for calls against the CRM's RingCentral routes
#[derive(Debug, Error)]
pub enum TelephonyError {
    // Retryable errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("RingCentral rate limit exceeded")]
    RateLimited,

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    // Terminal errors
    #[error("Call resource not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Requires user action
    #[error("RingCentral token expired or revoked")]
    AuthExpired,

    #[error("RingCentral re-authentication required: {0}")]
    ReauthRequired(String),
}

impl TelephonyError {
    /// Classify a failed HTTP response from its status code and error message.
    ///
    /// The CRM routes do not always map upstream failures onto the right
    /// status code, so the message is inspected as well.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if status == 404
            || message.contains(RINGOUT_NOT_FOUND)
            || message.contains("Resource not found")
        {
            return TelephonyError::NotFound(message);
        }
        if status == 429 || lower.contains("rate limit") {
            return TelephonyError::RateLimited;
        }
        if status == 401
            || message.contains("invalid_grant")
            || message.contains("Token is revoked")
        {
            return TelephonyError::AuthExpired;
        }
        if status == 408 {
            return TelephonyError::Timeout(message);
        }
        TelephonyError::Api { status, message }
    }

    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TelephonyError::Network(_)
                | TelephonyError::Timeout(_)
                | TelephonyError::RateLimited
                | TelephonyError::Api { .. }
                | TelephonyError::MalformedResponse(_)
        )
    }

    /// Returns true if this error requires user action to resolve
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            TelephonyError::AuthExpired | TelephonyError::ReauthRequired(_)
        )
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            TelephonyError::Network(_) => "Check your internet connection and try again.",
            TelephonyError::Timeout(_) => "RingCentral took too long to answer. Try again.",
            TelephonyError::RateLimited => "Wait a few minutes before polling again.",
            TelephonyError::Api { .. } => "Check the server logs for details.",
            TelephonyError::MalformedResponse(_) => "The server returned an unexpected payload.",
            TelephonyError::NotFound(_) => "The call has ended. Start a new call if needed.",
            TelephonyError::Config(_) => "Check your configuration in ~/.policydesk/config.json",
            TelephonyError::AuthExpired => "Refresh the RingCentral session and try again.",
            TelephonyError::ReauthRequired(_) => {
                "Re-authenticate with RingCentral from the telephony settings page."
            }
        }
    }
}

impl From<reqwest::Error> for TelephonyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TelephonyError::Timeout(err.to_string())
        } else if err.is_decode() {
            TelephonyError::MalformedResponse(err.to_string())
        } else {
            TelephonyError::Network(err.to_string())
        }
    }
}

impl From<url::ParseError> for TelephonyError {
    fn from(err: url::ParseError) -> Self {
        TelephonyError::Config(format!("invalid API base URL: {}", err))
    }
}

/// Serializable error representation for the UI layer
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiError {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorType {
    Retryable,
    NonRetryable,
    RequiresUserAction,
}

impl From<&TelephonyError> for UiError {
    fn from(err: &TelephonyError) -> Self {
        let error_type = if err.requires_user_action() {
            ErrorType::RequiresUserAction
        } else if err.is_retryable() {
            ErrorType::Retryable
        } else {
            ErrorType::NonRetryable
        };

        UiError {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ringout_message_is_not_found_even_on_500() {
        let err = TelephonyError::from_status(
            500,
            "Resource for parameter [ringOutId] is not found",
        );
        assert!(matches!(err, TelephonyError::NotFound(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn rate_limit_detected_from_message_case_insensitively() {
        let err = TelephonyError::from_status(401, "RingCentral Rate limit exceeded");
        assert!(matches!(err, TelephonyError::RateLimited));
        assert!(matches!(
            TelephonyError::from_status(429, ""),
            TelephonyError::RateLimited
        ));
    }

    #[test]
    fn revoked_token_requires_user_action() {
        let err = TelephonyError::from_status(400, "invalid_grant: Token is revoked");
        assert!(matches!(err, TelephonyError::AuthExpired));
        let ui = UiError::from(&err);
        assert_eq!(ui.error_type, ErrorType::RequiresUserAction);
        assert!(!ui.can_retry);
    }

    #[test]
    fn plain_server_error_is_retryable_api_error() {
        let err = TelephonyError::from_status(502, "Bad gateway");
        assert!(matches!(err, TelephonyError::Api { status: 502, .. }));
        assert_eq!(UiError::from(&err).error_type, ErrorType::Retryable);
    }
}
