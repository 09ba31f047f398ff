//! RingCentral telephony integration.
//!
//! The CRM's web tier owns the RingCentral OAuth session and exposes a small
//! set of `/api/ringcentral/*` routes. This module talks to those routes and
//! tracks outbound RingOut calls until they finish.
//!
//! Modules:
//! - auth: session check/refresh/logout and the refresh-then-retry policy
//! - client: HTTP client implementing the `Dialer` and `CallStatusSource` traits
//! - session: `PollSession` value object with pure backoff transitions
//! - poller: cancellable background status poll loop

pub mod auth;
pub mod client;
pub mod poller;
pub mod session;

use serde::{Deserialize, Serialize};

/// Base polling cadence for call status checks.
pub const BASE_POLL_INTERVAL_MS: u64 = 15_000;

/// Lowest accepted base polling cadence.
pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;

/// Consecutive generic failures after which polling gives up.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;

pub const CALL_PATH: &str = "/api/ringcentral/call";
pub const CALL_STATUS_PATH: &str = "/api/ringcentral/call-status";
pub const END_CALL_PATH: &str = "/api/ringcentral/end-call";
pub const AUTH_PATH: &str = "/api/ringcentral/auth";
pub const SMS_PATH: &str = "/api/ringcentral/sms";

/// RingCentral integration configuration stored in ~/.policydesk/config.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RingCentralConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Origin of the CRM web app that hosts the `/api/ringcentral` routes.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    /// Per-request timeout; the status route itself gives up after 25 s.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_api_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    BASE_POLL_INTERVAL_MS
}

fn default_max_consecutive_errors() -> u32 {
    MAX_CONSECUTIVE_ERRORS
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for RingCentralConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            api_base_url: default_api_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            max_consecutive_errors: default_max_consecutive_errors(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Lifecycle phase of an outbound call as seen by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallPhase {
    Ringing,
    Connected,
    Success,
    Failed,
    Busy,
    Ended,
}

impl CallPhase {
    /// Map a RingOut `callStatus` string onto a phase.
    ///
    /// `NotFound` is what the status route reports once RingCentral has
    /// cleaned up a finished RingOut, so it counts as ended.
    pub fn from_call_status(value: &str) -> Self {
        match value {
            "Success" => CallPhase::Success,
            "Failed" | "Error" | "CannotReach" | "NoAnsweringMachine" => CallPhase::Failed,
            "Busy" => CallPhase::Busy,
            "NotFound" | "Finished" => CallPhase::Ended,
            "InProgress" | "Answered" => CallPhase::Connected,
            _ => CallPhase::Ringing,
        }
    }

    /// Success, Failed, Busy and the logical Ended marker stop polling.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallPhase::Success | CallPhase::Failed | CallPhase::Busy | CallPhase::Ended
        )
    }
}

// ============================================================================
// Wire types for the CRM routes
// ============================================================================

/// Body returned by `GET /api/ringcentral/call-status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStatusReport {
    #[serde(default)]
    pub status_description: Option<String>,
    #[serde(default)]
    pub next_step: Option<String>,
    #[serde(default)]
    pub troubleshooting: Vec<String>,
    #[serde(default)]
    pub call_details: Option<CallDetails>,
    /// Raw route shape: `{ success, data: { callStatus } }`.
    #[serde(default)]
    pub data: Option<CallStatusData>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallDetails {
    #[serde(default)]
    pub status: Option<CallDetailsStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallDetailsStatus {
    #[serde(default)]
    pub call_status: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStatusData {
    #[serde(default)]
    pub call_status: Option<String>,
    #[serde(default)]
    pub status: Option<CallDetailsStatus>,
}

impl CallStatusReport {
    /// The raw `callStatus` string, wherever the route put it.
    pub fn call_status(&self) -> Option<&str> {
        self.call_details
            .as_ref()
            .and_then(|d| d.status.as_ref())
            .and_then(|s| s.call_status.as_deref())
            .or_else(|| {
                let data = self.data.as_ref()?;
                data.call_status
                    .as_deref()
                    .or_else(|| data.status.as_ref()?.call_status.as_deref())
            })
    }

    /// Phase derived from `callStatus`; `Ringing` when the route omitted it.
    pub fn phase(&self) -> CallPhase {
        self.call_status()
            .map(CallPhase::from_call_status)
            .unwrap_or(CallPhase::Ringing)
    }
}

/// Body returned by `POST /api/ringcentral/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedCall {
    pub call_id: String,
}

/// Body returned by `POST /api/ringcentral/sms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentSms {
    /// RingCentral message id; the route forwards it as a number or a string.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected message id, got {}",
            other
        ))),
    }
}

/// Error body shape shared by every CRM route.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    #[serde(default, rename = "rateLimited")]
    pub rate_limited: bool,
}

impl ApiErrorBody {
    /// Parse an error body, downgrading anything unparseable to a generic
    /// "Unknown error" instead of failing.
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| ApiErrorBody {
            error: Some("Unknown error".to_string()),
            ..Default::default()
        })
    }

    pub fn message(&self) -> String {
        let base = self.error.clone().unwrap_or_else(|| "Unknown error".to_string());
        match &self.details {
            Some(serde_json::Value::String(d)) => format!("{}: {}", base, d),
            _ => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_reads_call_details_status() {
        let report: CallStatusReport = serde_json::from_str(
            r#"{"statusDescription":"Call connected","nextStep":"Wait",
                "callDetails":{"status":{"callStatus":"Busy"}},
                "timestamp":"2026-10-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(report.call_status(), Some("Busy"));
        assert_eq!(report.phase(), CallPhase::Busy);
        assert!(report.phase().is_terminal());
    }

    #[test]
    fn report_reads_route_data_not_found_marker() {
        let report: CallStatusReport = serde_json::from_str(
            r#"{"success":true,"data":{"callStatus":"NotFound","message":"Call has ended"}}"#,
        )
        .unwrap();
        assert_eq!(report.phase(), CallPhase::Ended);
    }

    #[test]
    fn report_without_status_is_ringing() {
        let report: CallStatusReport = serde_json::from_str("{}").unwrap();
        assert_eq!(report.phase(), CallPhase::Ringing);
        assert!(!report.phase().is_terminal());
    }

    #[test]
    fn malformed_error_body_downgrades_to_unknown() {
        let body = ApiErrorBody::parse("<html>Gateway Timeout</html>");
        assert_eq!(body.message(), "Unknown error");
        let body = ApiErrorBody::parse(r#"{"error":"Call failed","details":"no caller id"}"#);
        assert_eq!(body.message(), "Call failed: no caller id");
    }

    #[test]
    fn sent_sms_accepts_numeric_and_string_ids() {
        let sent: SentSms = serde_json::from_str(
            r#"{"id":1234567890,"status":"Sent","timestamp":"2026-10-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(sent.id, "1234567890");
        assert_eq!(sent.status.as_deref(), Some("Sent"));

        let sent: SentSms = serde_json::from_str(r#"{"id":"abc"}"#).unwrap();
        assert_eq!(sent.id, "abc");
        assert!(serde_json::from_str::<SentSms>(r#"{"id":null}"#).is_err());
    }
}
