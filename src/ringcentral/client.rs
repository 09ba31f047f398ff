//! HTTP client for the CRM's `/api/ringcentral/*` routes.
//!
//! Uses reqwest against the configured web-app origin. Each capability the
//! poller and CLI need is a narrow trait, so the SDK-facing side can be
//! swapped (or faked in tests) without probing object shapes at runtime.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use url::Url;

use super::auth::{with_refresh, AuthAction, AuthStatus, SessionAuth};
use super::{
    ApiErrorBody, CallStatusReport, PlacedCall, RingCentralConfig, SentSms, AUTH_PATH, CALL_PATH,
    CALL_STATUS_PATH, END_CALL_PATH, SMS_PATH,
};
use crate::error::TelephonyError;

/// Places and hangs up outbound calls.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn place_call(&self, to: &str) -> Result<PlacedCall, TelephonyError>;
    async fn end_call(&self, call_id: &str) -> Result<(), TelephonyError>;
}

/// Reports the current status of a call.
#[async_trait]
pub trait CallStatusSource: Send + Sync {
    async fn fetch_status(&self, call_id: &str) -> Result<CallStatusReport, TelephonyError>;
}

/// Sends text messages from the account's configured number.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_sms(&self, to: &str, text: &str) -> Result<SentSms, TelephonyError>;
}

pub struct RingCentralClient {
    client: reqwest::Client,
    base_url: Url,
}

impl RingCentralClient {
    pub fn new(config: &RingCentralConfig) -> Result<Self, TelephonyError> {
        if !config.enabled {
            return Err(TelephonyError::Config(
                "RingCentral integration is disabled".to_string(),
            ));
        }
        let base_url = Url::parse(&config.api_base_url)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| TelephonyError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, TelephonyError> {
        Ok(self.base_url.join(path)?)
    }

    async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, TelephonyError> {
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        decode_body(status, &text)
    }

    async fn fetch_status_once(&self, call_id: &str) -> Result<CallStatusReport, TelephonyError> {
        let mut url = self.endpoint(CALL_STATUS_PATH)?;
        url.query_pairs_mut()
            .append_pair("callId", call_id)
            .append_pair("verbose", "true");
        log::debug!("Call status: GET {}", url);
        let resp = self.client.get(url).send().await?;
        Self::read_json(resp).await
    }

    async fn place_call_once(&self, to: &str) -> Result<PlacedCall, TelephonyError> {
        let resp = self
            .client
            .post(self.endpoint(CALL_PATH)?)
            .json(&serde_json::json!({ "to": to }))
            .send()
            .await?;
        Self::read_json(resp).await
    }

    async fn send_sms_once(&self, to: &str, text: &str) -> Result<SentSms, TelephonyError> {
        let resp = self
            .client
            .post(self.endpoint(SMS_PATH)?)
            .json(&serde_json::json!({ "to": to, "text": text }))
            .send()
            .await?;
        Self::read_json(resp).await
    }

    async fn end_call_once(&self, call_id: &str) -> Result<(), TelephonyError> {
        let resp = self
            .client
            .post(self.endpoint(END_CALL_PATH)?)
            .json(&serde_json::json!({ "callId": call_id }))
            .send()
            .await?;
        let _: serde_json::Value = Self::read_json(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionAuth for RingCentralClient {
    async fn auth(&self, action: AuthAction) -> Result<AuthStatus, TelephonyError> {
        let mut url = self.endpoint(AUTH_PATH)?;
        url.query_pairs_mut().append_pair("action", action.as_str());
        let resp = self.client.get(url).send().await?;
        Self::read_json(resp).await
    }
}

#[async_trait]
impl Dialer for RingCentralClient {
    async fn place_call(&self, to: &str) -> Result<PlacedCall, TelephonyError> {
        let to = to.trim();
        if to.is_empty() {
            return Err(TelephonyError::Config("\"to\" number is required".to_string()));
        }
        let placed = with_refresh(self, || self.place_call_once(to)).await?;
        log::info!("RingOut: placed call {} to {}", placed.call_id, to);
        Ok(placed)
    }

    async fn end_call(&self, call_id: &str) -> Result<(), TelephonyError> {
        with_refresh(self, || self.end_call_once(call_id)).await?;
        log::info!("RingOut: ended call {}", call_id);
        Ok(())
    }
}

#[async_trait]
impl CallStatusSource for RingCentralClient {
    async fn fetch_status(&self, call_id: &str) -> Result<CallStatusReport, TelephonyError> {
        with_refresh(self, || self.fetch_status_once(call_id)).await
    }
}

#[async_trait]
impl Messenger for RingCentralClient {
    async fn send_sms(&self, to: &str, text: &str) -> Result<SentSms, TelephonyError> {
        let to = to.trim();
        if to.is_empty() || text.trim().is_empty() {
            return Err(TelephonyError::Config(
                "\"to\" and \"text\" are required".to_string(),
            ));
        }
        let sent = with_refresh(self, || self.send_sms_once(to, text)).await?;
        log::info!("SMS: sent message {} to {}", sent.id, to);
        Ok(sent)
    }
}

/// Decode a JSON body, classifying non-2xx responses by status + error text.
fn decode_body<T: DeserializeOwned>(status: u16, text: &str) -> Result<T, TelephonyError> {
    if !(200..300).contains(&status) {
        let body = ApiErrorBody::parse(text);
        if body.rate_limited {
            return Err(TelephonyError::RateLimited);
        }
        return Err(TelephonyError::from_status(status, body.message()));
    }

    serde_json::from_str(text).map_err(|e| {
        TelephonyError::MalformedResponse(format!("{}: {}", e, truncate(text, 200)))
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
