use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use courier_core::domain::channel::Channel;
use courier_core::domain::tenant::TenantId;

use crate::adapter::{AdapterError, ChannelAdapter, LoginCode, SecondFactorVerdict, SendReceipt};

/// Connection settings for one provider bridge process.
#[derive(Clone)]
pub struct HttpBridgeSettings {
    pub base_url: String,
    pub auth_token: Option<SecretString>,
    pub request_timeout: Duration,
}

/// Adapter speaking the bridge HTTP protocol: a sidecar process owns the
/// actual provider connection and exposes send/login/logout endpoints.
pub struct HttpBridgeAdapter {
    channel: Channel,
    settings: HttpBridgeSettings,
    client: reqwest::Client,
}

impl HttpBridgeAdapter {
    pub fn new(channel: Channel, settings: HttpBridgeSettings) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|error| AdapterError::Protocol(format!("http client setup failed: {error}")))?;

        Ok(Self { channel, settings, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, AdapterError> {
        let mut request = self.client.post(self.endpoint(path)).json(body);
        if let Some(token) = &self.settings.auth_token {
            request = request.bearer_auth(token.expose_secret());
        }

        debug!(channel = self.channel.as_str(), path, "bridge request");
        let response = request.send().await.map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        response
            .json::<Resp>()
            .await
            .map_err(|error| AdapterError::Protocol(format!("invalid bridge response: {error}")))
    }
}

fn classify_transport_error(error: reqwest::Error) -> AdapterError {
    if error.is_timeout() {
        AdapterError::Timeout(error.to_string())
    } else {
        AdapterError::Unreachable(error.to_string())
    }
}

fn classify_status(status: StatusCode, detail: &str) -> AdapterError {
    if status.is_client_error() {
        AdapterError::Rejected(format!("{status}: {detail}"))
    } else {
        AdapterError::Unreachable(format!("{status}: {detail}"))
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    tenant_id: &'a str,
    to_peer: &'a str,
    text: &'a str,
    attachments: &'a [String],
}

#[derive(Deserialize)]
struct SendResponse {
    provider_message_id: Option<String>,
}

#[derive(Serialize)]
struct SessionRequest<'a> {
    tenant_id: &'a str,
}

#[derive(Deserialize)]
struct LoginCodeResponse {
    code_id: String,
    payload: String,
    expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct SecondFactorRequest<'a> {
    tenant_id: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct SecondFactorResponse {
    verdict: SecondFactorVerdict,
}

#[derive(Deserialize)]
struct AckResponse {}

#[async_trait]
impl ChannelAdapter for HttpBridgeAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        tenant_id: &TenantId,
        to_peer: &str,
        text: &str,
        attachments: &[String],
    ) -> Result<SendReceipt, AdapterError> {
        let tenant = tenant_id.0.to_string();
        let response: SendResponse = self
            .post("send", &SendRequest { tenant_id: &tenant, to_peer, text, attachments })
            .await?;
        Ok(SendReceipt { provider_message_id: response.provider_message_id })
    }

    async fn start_login(&self, tenant_id: &TenantId) -> Result<LoginCode, AdapterError> {
        let tenant = tenant_id.0.to_string();
        let response: LoginCodeResponse =
            self.post("session/start", &SessionRequest { tenant_id: &tenant }).await?;
        Ok(LoginCode {
            code_id: response.code_id,
            payload: response.payload,
            expires_at: response.expires_at,
        })
    }

    async fn submit_second_factor(
        &self,
        tenant_id: &TenantId,
        password: &str,
    ) -> Result<SecondFactorVerdict, AdapterError> {
        let tenant = tenant_id.0.to_string();
        let response: SecondFactorResponse = self
            .post("session/second-factor", &SecondFactorRequest { tenant_id: &tenant, password })
            .await?;
        Ok(response.verdict)
    }

    async fn logout(&self, tenant_id: &TenantId) -> Result<(), AdapterError> {
        let tenant = tenant_id.0.to_string();
        let _ack: AckResponse =
            self.post("session/logout", &SessionRequest { tenant_id: &tenant }).await?;
        Ok(())
    }
}
