//! The issuing authority: where credentials come from

use std::error;

use async_trait::async_trait;
use thiserror::Error;

use crate::RefreshTokenRef;

pub mod dto;
#[cfg(feature = "http")]
pub mod http;

pub use dto::{Address, IssuedTokens, LoginRequest, SignupProfile};
#[cfg(feature = "http")]
pub use http::HttpIssuance;

/// An asynchronous transport to the authority that issues credentials
#[async_trait]
pub trait IssuanceTransport: Send + Sync {
    /// Exchanges a login identifier and password for credentials
    async fn login(&self, request: &LoginRequest) -> Result<IssuedTokens, IssuanceError>;

    /// Creates a new account and returns credentials for it
    async fn signup(&self, profile: &SignupProfile) -> Result<IssuedTokens, IssuanceError>;

    /// Exchanges a refresh token for a fresh set of credentials
    async fn renew(&self, refresh_token: &RefreshTokenRef) -> Result<IssuedTokens, IssuanceError>;
}

#[async_trait]
impl<T: IssuanceTransport + ?Sized> IssuanceTransport for std::sync::Arc<T> {
    #[inline]
    async fn login(&self, request: &LoginRequest) -> Result<IssuedTokens, IssuanceError> {
        (**self).login(request).await
    }

    #[inline]
    async fn signup(&self, profile: &SignupProfile) -> Result<IssuedTokens, IssuanceError> {
        (**self).signup(profile).await
    }

    #[inline]
    async fn renew(&self, refresh_token: &RefreshTokenRef) -> Result<IssuedTokens, IssuanceError> {
        (**self).renew(refresh_token).await
    }
}

/// An error while requesting credentials from the issuing authority
#[derive(Debug, Error)]
pub enum IssuanceError {
    /// The authority answered with an error status
    #[error("issuing authority rejected the request with status {status}: {message}")]
    Rejected {
        /// The HTTP status code
        status: u16,
        /// The reason given by the authority
        message: String,
    },
    /// The authority could not be reached, or the response could not be read
    #[error("unable to communicate with issuing authority")]
    Transport(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// The authority answered successfully but the body was not a token response
    #[error("issuing authority sent a malformed token response")]
    MalformedResponse(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

impl IssuanceError {
    /// Whether the authority refused the presented credentials
    pub fn is_authorization_rejected(&self) -> bool {
        matches!(self, Self::Rejected { status: 401, .. })
    }

    /// The human-readable reason given by the authority, if any
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Rejected { message, .. } => Some(message),
            _ => None,
        }
    }
}
