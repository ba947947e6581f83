//! An issuing authority reached over HTTP

use async_trait::async_trait;
use reqwest::header;
use serde::Serialize;

use super::{IssuanceError, IssuanceTransport};
use crate::issuance::dto::{ErrorBody, IssuedTokens, LoginRequest, SignupProfile};
use crate::RefreshTokenRef;

/// An issuing authority exposing `login`, `signup`, and `refresh` endpoints
///
/// The endpoints are resolved relative to `base_url`, so a base of
/// `https://auth.example.com/api/auth/` yields
/// `https://auth.example.com/api/auth/login`.
///
/// The client used here should not carry the authorization middleware.
/// Renewal requests are authorized by the refresh token alone, and a
/// rejected renewal must end the session rather than trigger another renewal.
#[derive(Debug, Clone)]
pub struct HttpIssuance {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl HttpIssuance {
    /// Constructs a new HTTP issuance transport
    pub fn new(client: reqwest::Client, base_url: reqwest::Url) -> Self {
        let base_url = if base_url.path().ends_with('/') {
            base_url
        } else {
            let mut url = base_url;
            let path = format!("{}/", url.path());
            url.set_path(&path);
            url
        };

        Self { client, base_url }
    }

    fn endpoint(&self, name: &'static str) -> Result<reqwest::Url, IssuanceError> {
        self.base_url
            .join(name)
            .map_err(|e| IssuanceError::Transport(e.into()))
    }
}

#[async_trait]
impl IssuanceTransport for HttpIssuance {
    async fn login(&self, request: &LoginRequest) -> Result<IssuedTokens, IssuanceError> {
        let req = self.client.post(self.endpoint("login")?).json(request);
        request_tokens("login", req).await
    }

    async fn signup(&self, profile: &SignupProfile) -> Result<IssuedTokens, IssuanceError> {
        let req = self.client.post(self.endpoint("signup")?).json(profile);
        request_tokens("signup", req).await
    }

    async fn renew(&self, refresh_token: &RefreshTokenRef) -> Result<IssuedTokens, IssuanceError> {
        #[derive(Serialize)]
        struct Empty {}

        let mut bearer = header::HeaderValue::try_from(format!("Bearer {}", refresh_token.as_str()))
            .map_err(|e| IssuanceError::Transport(e.into()))?;
        bearer.set_sensitive(true);

        let req = self
            .client
            .post(self.endpoint("refresh")?)
            .header(header::AUTHORIZATION, bearer)
            .json(&Empty {});
        request_tokens("refresh", req).await
    }
}

#[tracing::instrument(err, skip(req))]
async fn request_tokens(
    flow: &'static str,
    req: reqwest::RequestBuilder,
) -> Result<IssuedTokens, IssuanceError> {
    tracing::trace!("requesting tokens from authority");

    let resp = req
        .send()
        .await
        .map_err(|e| IssuanceError::Transport(e.into()))?;

    let status = resp.status();
    tracing::debug!(
        response.status = status.as_u16(),
        "received token response from issuing authority"
    );

    let body = resp
        .bytes()
        .await
        .map_err(|e| IssuanceError::Transport(e.into()))?;

    if !status.is_success() {
        let raw = String::from_utf8_lossy(&body);
        return Err(IssuanceError::Rejected {
            status: status.as_u16(),
            message: ErrorBody::reason(&raw),
        });
    }

    let tokens: IssuedTokens =
        serde_json::from_slice(&body).map_err(|e| IssuanceError::MalformedResponse(e.into()))?;

    tracing::info!(
        lifetime_ms = tokens.expires_in,
        token_type = %tokens.token_type,
        message = tokens.message.as_deref().unwrap_or_default(),
        "received new tokens"
    );

    Ok(tokens)
}
