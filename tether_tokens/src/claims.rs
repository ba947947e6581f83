//! Decoding of the claims carried by an access token
//!
//! Access tokens are signed JWTs. The client never holds the signing key, so
//! the payload is read without verification: it is only used to learn when the
//! token expires and who it was issued to. The server remains the authority on
//! whether a token is acceptable.

use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Deserialize;
use tether_clock::UnixMillis;
use thiserror::Error;

use crate::{AccessTokenRef, Subject, SubjectRef};

/// The credential could not be parsed into a header, payload, and signature
/// with a readable payload
#[derive(Clone, Copy, Debug, Error)]
#[error("malformed credential")]
pub struct MalformedCredential {
    _p: (),
}

const fn malformed_credential() -> MalformedCredential {
    MalformedCredential { _p: () }
}

/// The claims of an access token relevant to session management
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claims {
    subject: Option<Subject>,
    expires_at: UnixMillis,
    issued_at: Option<UnixMillis>,
}

impl Claims {
    /// The subject the token was issued to, if stated
    #[inline]
    pub fn subject(&self) -> Option<&SubjectRef> {
        self.subject.as_deref()
    }

    /// The time at which the token stops being accepted
    #[inline]
    pub fn expires_at(&self) -> UnixMillis {
        self.expires_at
    }

    /// The time at which the token was issued, if stated
    #[inline]
    pub fn issued_at(&self) -> Option<UnixMillis> {
        self.issued_at
    }

    /// Whether the token is still unexpired at `now`
    #[inline]
    pub fn is_valid_at(&self, now: UnixMillis) -> bool {
        self.expires_at > now
    }

    /// Consumes the claims, returning the subject
    pub fn into_subject(self) -> Option<Subject> {
        self.subject
    }
}

#[derive(Deserialize)]
struct RawClaims {
    exp: f64,
    #[serde(default)]
    iat: Option<f64>,
    #[serde(default)]
    sub: Option<Subject>,
}

/// Whole seconds of a NumericDate, which may carry a fraction
fn numeric_date(secs: f64) -> UnixMillis {
    UnixMillis::from_secs(secs.floor() as u64)
}

macro_rules! expect_three {
    ($iter:expr) => {{
        let mut i = $iter;
        match (i.next(), i.next(), i.next(), i.next()) {
            (Some(first), Some(second), Some(third), None) => Some((first, second, third)),
            _ => None,
        }
    }};
}

/// Decodes the claims of an access token without verifying its signature
///
/// # Errors
///
/// Returns [`MalformedCredential`] if the token is not three `.`-separated
/// segments, if the payload is not base64url-encoded JSON, or if the payload
/// lacks a numeric `exp` claim. Callers should treat this as "the credential is
/// not valid" rather than reporting it.
pub fn decode(token: &AccessTokenRef) -> Result<Claims, MalformedCredential> {
    let (_header, payload, _signature) =
        expect_three!(token.as_str().split('.')).ok_or_else(malformed_credential)?;

    let raw = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| malformed_credential())?;
    let claims: RawClaims = serde_json::from_slice(&raw).map_err(|_| malformed_credential())?;

    Ok(Claims {
        subject: claims.sub,
        expires_at: numeric_date(claims.exp),
        issued_at: claims.iat.map(numeric_date),
    })
}
