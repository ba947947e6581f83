//! Middleware to authorize outgoing requests with the current session
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AuthorizationMiddleware`] in the middleware stack to attach
//! the access token held by an [`AuthSession`] to each outbound request.
//!
//! If the API rejects the token with `401 Unauthorized`, the middleware asks
//! the session for a renewed token and replays the request once with it. The
//! caller only ever sees the response to the replay. Any number of requests
//! can be rejected at the same time; they all wait on a single renewal.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place, allowing overrides to be specified as required. Such requests
//! are never replayed.
//!
//! ```
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//! use tether_reqwest::AuthorizationMiddleware;
//! use tether_tokens::{
//!     issuance::HttpIssuance, stores::InMemoryCredentialStore, AuthSession, SessionConfig,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let session = AuthSession::new(
//!     InMemoryCredentialStore::new(),
//!     HttpIssuance::new(
//!         Client::new(),
//!         "https://auth.example.com/api/auth/".parse().unwrap(),
//!     ),
//!     SessionConfig::default(),
//! );
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AuthorizationMiddleware::new(session))
//!     .build();
//!
//! let req = client
//!     .get("https://example.com");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! The middleware can also be configured to add an authorization token
//! only conditionally. This can be useful in the event that you want to
//! use a single common middleware stack with multiple potential backends
//! and want to ensure that the session's token is only sent to its own API.
//!
//! These predicates can be composed together to evaluate more complex
//! requirements prior to attaching a token to a request.
//!
//! ```
//! use predicates::prelude::PredicateBooleanExt;
//! use tether_reqwest::{AuthorizationMiddleware, ExactHostMatch, HttpsOnly};
//! # use tether_tokens::{
//! #     issuance::HttpIssuance, stores::InMemoryCredentialStore, AuthSession, SessionConfig,
//! # };
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! # let session = AuthSession::new(
//! #     InMemoryCredentialStore::new(),
//! #     HttpIssuance::new(reqwest::Client::new(), "https://auth.example.com/".parse().unwrap()),
//! #     SessionConfig::default(),
//! # );
//!
//! AuthorizationMiddleware::new(session)
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("api.example.com")));
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use bytes::{BufMut, BytesMut};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response, StatusCode};
use reqwest_middleware::{Error, Middleware, Next, Result};
use tether_tokens::{claims, AccessTokenRef, AuthSession};

/// A middleware that authorizes outgoing requests with the session's access
/// token, renewing and replaying once if the token is rejected
#[derive(Clone, Debug)]
pub struct AuthorizationMiddleware<P> {
    session: AuthSession,
    predicate: P,
}

impl AuthorizationMiddleware<AnyRequest> {
    /// Construct a new middleware from a session
    ///
    /// By default, this middleware will authorize every request. To change
    /// this behavior, provide a custom predicate with
    /// [`with_predicate()`][Self::with_predicate()].
    pub fn new(session: AuthSession) -> Self {
        Self {
            session,
            predicate: AnyRequest,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AuthorizationMiddleware<P> {
        AuthorizationMiddleware {
            session: self.session,
            predicate,
        }
    }
}

impl<P> AuthorizationMiddleware<P> {
    fn bearer(&self, token: &AccessTokenRef) -> Result<header::HeaderValue> {
        if tracing::enabled!(tracing::Level::TRACE) {
            let now = self.session.state().now();
            match claims::decode(token) {
                Ok(claims) => tracing::trace!(
                    token.valid = claims.is_valid_at(now),
                    token.expiry = claims.expires_at().0,
                    token.issued = claims.issued_at().map(|t| t.0),
                    now = now.0,
                    "attaching access token"
                ),
                Err(_) => tracing::trace!("attaching undecodable access token"),
            }
        }

        let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
        header_value.put_slice(b"Bearer ");
        header_value.put_slice(token.as_str().as_bytes());
        let mut value =
            header::HeaderValue::from_maybe_shared(header_value).map_err(Error::middleware)?;
        value.set_sensitive(true);
        Ok(value)
    }
}

#[async_trait::async_trait]
impl<P> Middleware for AuthorizationMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if req.headers().contains_key(header::AUTHORIZATION) || !self.predicate.eval(&req) {
            return next.run(req, extensions).await;
        }

        let Some(token) = self.session.access_token() else {
            tracing::trace!("no access token available, sending request unauthorized");
            return next.run(req, extensions).await;
        };

        let pristine = req.try_clone();
        req.headers_mut()
            .insert(header::AUTHORIZATION, self.bearer(&token)?);

        let resp = next.clone().run(req, extensions).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        let Some(mut replay) = pristine else {
            tracing::debug!("access token rejected, but request cannot be replayed");
            return Ok(resp);
        };

        tracing::debug!(
            url = %replay.url(),
            "access token rejected, renewing before replay"
        );
        let renewed = self
            .session
            .renew_rejected(&token)
            .await
            .map_err(Error::middleware)?;

        replay
            .headers_mut()
            .insert(header::AUTHORIZATION, self.bearer(&renewed)?);
        next.run(replay, extensions).await
    }
}

/// Attach an access token to every request
#[derive(Clone, Copy, Debug, Default)]
pub struct AnyRequest;

impl Predicate<Request> for AnyRequest {
    #[inline]
    fn eval(&self, _: &Request) -> bool {
        true
    }
}

impl reflection::PredicateReflection for AnyRequest {}
impl fmt::Display for AnyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any request")
    }
}

/// Only attach an access token if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "scheme",
                    req.url().scheme().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only attach an access token if the request is being sent to the exact host specified
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Construct a new predicate from a host string
    pub fn new<S>(host: S) -> Self
    where
        S: ToString,
    {
        Self {
            host: host.to_string(),
        }
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().host_str() == Some(&self.host)
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "host",
                    req.url()
                        .host_str()
                        .unwrap_or("<value not valid utf-8>")
                        .to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("host == ")?;
        f.write_str(&self.host)
    }
}
