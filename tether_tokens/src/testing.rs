//! Test doubles for exercising sessions without a live issuing authority
//!
//! Available to this crate's tests and, behind the `test-util` feature, to
//! dependents that want to drive a session deterministically.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine as _};
use tether_clock::{Clock, UnixMillis};

use crate::{
    issuance::{IssuanceError, IssuanceTransport, IssuedTokens, LoginRequest, SignupProfile},
    AccessToken, RefreshToken, RefreshTokenRef,
};

static TOKEN_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Mints an unsigned-but-well-formed access token
///
/// Every minted token carries a distinct `jti`, so two tokens for the same
/// subject and expiry never compare equal.
pub fn mint_token(subject: Option<&str>, expires_at: UnixMillis) -> AccessToken {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);

    let mut claims = serde_json::json!({
        "exp": expires_at.as_secs(),
        "jti": TOKEN_SEQUENCE.fetch_add(1, Ordering::Relaxed),
    });
    if let Some(subject) = subject {
        claims["sub"] = subject.into();
    }
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());

    AccessToken::new(format!("{header}.{payload}.dGVzdC1zaWduYXR1cmU"))
}

/// A wall clock that follows tokio's (possibly paused) notion of time
///
/// Under `#[tokio::test(start_paused = true)]`, advancing tokio's time moves
/// this clock forward by the same amount, so timers and token expiry agree.
#[derive(Clone, Debug)]
pub struct PausedClock {
    wall_base: UnixMillis,
    instant_base: tokio::time::Instant,
}

impl PausedClock {
    /// Constructs a clock reading `start` at the current tokio instant
    pub fn new(start: UnixMillis) -> Self {
        Self {
            wall_base: start,
            instant_base: tokio::time::Instant::now(),
        }
    }
}

impl Clock for PausedClock {
    fn now(&self) -> UnixMillis {
        self.wall_base + self.instant_base.elapsed()
    }
}

struct Account {
    password: String,
    subject: String,
}

#[derive(Default)]
struct Ledger {
    accounts: HashMap<String, Account>,
    outstanding: HashMap<String, String>,
    issued: u64,
    rejection: Option<(u16, String)>,
    presented: Vec<RefreshToken>,
}

/// An in-process issuing authority with scripted behavior
///
/// Refresh tokens are rotated on every use: each one is accepted exactly
/// once, and presenting an unknown or spent refresh token is answered with a
/// 401, as a real authority would.
pub struct ScriptedIssuance {
    clock: Arc<dyn Clock + Send + Sync>,
    lifetime: Duration,
    latency: Duration,
    ledger: Mutex<Ledger>,
    login_calls: AtomicUsize,
    renew_calls: AtomicUsize,
}

impl fmt::Debug for ScriptedIssuance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ScriptedIssuance")
            .field("lifetime", &self.lifetime)
            .field("latency", &self.latency)
            .field("login_calls", &self.login_calls())
            .field("renew_calls", &self.renew_calls())
            .finish_non_exhaustive()
    }
}

impl ScriptedIssuance {
    /// Constructs an authority that issues 60 second access tokens against `clock`
    pub fn new(clock: impl Clock + Send + Sync + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
            lifetime: Duration::from_secs(60),
            latency: Duration::ZERO,
            ledger: Mutex::default(),
            login_calls: AtomicUsize::new(0),
            renew_calls: AtomicUsize::new(0),
        }
    }

    /// Registers an account that can log in
    pub fn with_account(self, login_id: &str, password: &str, subject: &str) -> Self {
        self.ledger().accounts.insert(
            login_id.to_owned(),
            Account {
                password: password.to_owned(),
                subject: subject.to_owned(),
            },
        );
        self
    }

    /// Sets the lifetime of issued access tokens
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Delays every renewal by `latency` before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn issue(&self, ledger: &mut Ledger, subject: &str) -> IssuedTokens {
        ledger.issued += 1;
        let refresh = format!("R{}", ledger.issued);
        ledger
            .outstanding
            .insert(refresh.clone(), subject.to_owned());

        IssuedTokens {
            access_token: mint_token(Some(subject), self.clock.now() + self.lifetime),
            refresh_token: RefreshToken::new(refresh),
            expires_in: u64::try_from(self.lifetime.as_millis()).unwrap_or(u64::MAX),
            token_type: "Bearer".into(),
            message: None,
        }
    }

    /// Issues credentials for `subject` without going through a login
    pub fn grant(&self, subject: &str) -> IssuedTokens {
        let mut ledger = self.ledger();
        self.issue(&mut ledger, subject)
    }

    /// Answers every subsequent renewal with the given error status
    pub fn reject_renewals(&self, status: u16, message: &str) {
        self.ledger().rejection = Some((status, message.to_owned()));
    }

    /// The number of login requests received
    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    /// The number of renewal requests received
    pub fn renew_calls(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }

    /// Every refresh token presented for renewal, in order
    pub fn presented_refresh_tokens(&self) -> Vec<RefreshToken> {
        self.ledger().presented.clone()
    }
}

fn rejected(status: u16, message: &str) -> IssuanceError {
    IssuanceError::Rejected {
        status,
        message: message.to_owned(),
    }
}

#[async_trait]
impl IssuanceTransport for ScriptedIssuance {
    async fn login(&self, request: &LoginRequest) -> Result<IssuedTokens, IssuanceError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);

        let mut ledger = self.ledger();
        let subject = match ledger.accounts.get(request.user_login_id.as_str()) {
            Some(account) if account.password == request.password.as_str() => {
                account.subject.clone()
            }
            _ => return Err(rejected(401, "Invalid credentials")),
        };
        Ok(self.issue(&mut ledger, &subject))
    }

    async fn signup(&self, profile: &SignupProfile) -> Result<IssuedTokens, IssuanceError> {
        let mut ledger = self.ledger();
        let login_id = profile.user_login_id.as_str();
        if ledger.accounts.contains_key(login_id) {
            return Err(rejected(400, "Signup failed"));
        }

        ledger.accounts.insert(
            login_id.to_owned(),
            Account {
                password: profile.user_password.as_str().to_owned(),
                subject: login_id.to_owned(),
            },
        );
        Ok(self.issue(&mut ledger, login_id))
    }

    async fn renew(&self, refresh_token: &RefreshTokenRef) -> Result<IssuedTokens, IssuanceError> {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        self.ledger().presented.push(refresh_token.to_owned());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut ledger = self.ledger();
        if let Some((status, message)) = &ledger.rejection {
            return Err(rejected(*status, message));
        }

        match ledger.outstanding.remove(refresh_token.as_str()) {
            Some(subject) => Ok(self.issue(&mut ledger, &subject)),
            None => Err(rejected(401, "Token refresh failed")),
        }
    }
}
