//! Session state and background management of bearer credentials for API clients
//!
//! This library keeps a client's access token fresh without the rest of the
//! application having to think about it. Credentials obtained by logging in are
//! persisted to a [`CredentialStore`][stores::CredentialStore], the derived
//! session state is published to anyone watching, and a single-shot timer renews
//! the access token shortly before it expires.
//!
//! When a token is rejected anyway, as can happen after the machine sleeps or the
//! clock drifts, renewal can also be requested on demand. Concurrent requests for
//! renewal are collapsed so that the issuing authority only ever sees one renewal
//! at a time, and every caller waiting on it receives the same outcome. A failed
//! renewal ends the session.
//!
//! # General Flow
//!
//! On application start-up, construct an [`AuthSession`] from a credential store
//! and a transport to the issuing authority. Any credentials left in the store
//! from a previous run are picked up and, if still valid, scheduled for renewal.
//!
//! ```no_run
//! use tether_tokens::{
//!     issuance::HttpIssuance, stores::FileCredentialStore, AuthSession, SessionConfig,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let issuance = HttpIssuance::new(
//!     reqwest::Client::new(),
//!     reqwest::Url::parse("https://auth.example.com/api/auth/")?,
//! );
//! let store = FileCredentialStore::new("credentials.json");
//!
//! let session = AuthSession::new(store, issuance, SessionConfig::default());
//!
//! if !session.is_authenticated() {
//!     session.login("alice", "secret123").await?;
//! }
//!
//! tracing::info!(
//!     token = format_args!("{:#?}", session.access_token()),
//!     "current access token"
//! );
//! # Ok(())
//! # }
//! ```
//!
//! Outbound API calls should go through the middleware in `tether_reqwest`, which
//! attaches the access token and recovers from a rejected token by renewing and
//! replaying the request once.
//!
//! This crate includes an example of a session persisted to a file in the examples
//! folder.
//!
//! # Features
//!
//! * `http` (default): Provides [`HttpIssuance`][issuance::HttpIssuance], an issuing
//!   authority reached with [reqwest].
//! * `test-util`: Exposes the [`testing`] module, with a scripted issuing authority
//!   and helpers for minting tokens and following tokio's paused clock.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod auth;
mod braids;
pub mod claims;
pub mod coordinator;
pub mod issuance;
pub mod scheduler;
mod session;
pub mod stores;
#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod testing;

pub use auth::{AuthSession, SessionConfig};
pub use braids::*;
pub use coordinator::RenewalFailed;
pub use session::{SessionClosed, SessionSnapshot, SessionState, SessionWatcher};
