//! RingCentral session handling through the CRM's auth route.
//!
//! The web tier keeps the OAuth tokens; callers only ever ask it to check,
//! expose, refresh or drop the session. Operations that fail with an expired
//! token get exactly one refresh-and-retry before the user is asked to
//! re-authenticate.

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TelephonyError;

/// Actions accepted by `GET /api/ringcentral/auth?action=...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthAction {
    Check,
    Token,
    Refresh,
    Logout,
}

impl AuthAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthAction::Check => "check",
            AuthAction::Token => "token",
            AuthAction::Refresh => "refresh",
            AuthAction::Logout => "logout",
        }
    }
}

impl std::str::FromStr for AuthAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "check" => Ok(AuthAction::Check),
            "token" => Ok(AuthAction::Token),
            "refresh" => Ok(AuthAction::Refresh),
            "logout" => Ok(AuthAction::Logout),
            other => Err(format!("unknown auth action: {}", other)),
        }
    }
}

/// Body returned by the auth route.
///
/// `check` answers `{ authenticated }`, `token` adds the token pair and
/// expiry (epoch millis), `logout` and `refresh` answer `{ success }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthStatus {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl AuthStatus {
    /// Whether the route considers the session usable after this action.
    pub fn session_ok(&self) -> bool {
        self.authenticated || self.success
    }

    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    /// True when the token expiry is known and already in the past.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at_utc().map(|exp| exp <= now).unwrap_or(false)
    }
}

/// Anything that can drive the auth route.
#[async_trait]
pub trait SessionAuth: Send + Sync {
    async fn auth(&self, action: AuthAction) -> Result<AuthStatus, TelephonyError>;
}

/// Run `op`, refreshing the RingCentral session once if it reports an expired
/// token.
///
/// - refresh succeeds: `op` runs again; a second auth failure becomes
///   `ReauthRequired`
/// - refresh is rate limited: `RateLimited` is returned so callers back off
/// - refresh fails any other way: `ReauthRequired`
pub async fn with_refresh<A, F, Fut, T>(auth: &A, mut op: F) -> Result<T, TelephonyError>
where
    A: SessionAuth + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TelephonyError>>,
{
    match op().await {
        Err(TelephonyError::AuthExpired) => {}
        other => return other,
    }

    log::info!("RingCentral auth: session expired, attempting token refresh");
    match auth.auth(AuthAction::Refresh).await {
        Ok(status) if status.session_ok() => {
            log::info!("RingCentral auth: token refreshed, retrying request");
            op().await.map_err(|e| match e {
                TelephonyError::AuthExpired => TelephonyError::ReauthRequired(
                    "token still rejected after refresh".to_string(),
                ),
                other => other,
            })
        }
        Ok(status) => {
            let reason = status
                .message
                .unwrap_or_else(|| "refresh did not restore the session".to_string());
            log::warn!("RingCentral auth: refresh rejected: {}", reason);
            Err(TelephonyError::ReauthRequired(reason))
        }
        Err(TelephonyError::RateLimited) => {
            log::warn!("RingCentral auth: rate limited during token refresh, backing off");
            Err(TelephonyError::RateLimited)
        }
        Err(e) => {
            log::warn!("RingCentral auth: refresh failed: {}", e);
            Err(TelephonyError::ReauthRequired(e.to_string()))
        }
    }
}
