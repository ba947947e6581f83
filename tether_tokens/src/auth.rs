use std::{
    error, fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use tether_clock::{Clock, System, UnixMillis};

use crate::{
    claims,
    coordinator::{RenewalCoordinator, RenewalFailed},
    issuance::{IssuanceError, IssuanceTransport, IssuedTokens, LoginRequest, SignupProfile},
    scheduler::RenewalScheduler,
    session::{SessionSnapshot, SessionState, SessionWatcher},
    stores::CredentialStore,
    AccessToken, AccessTokenRef, LoginId, Password, Subject,
};

/// Configuration for an [`AuthSession`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    renewal_skew: Duration,
}

impl Default for SessionConfig {
    #[inline]
    fn default() -> Self {
        Self {
            renewal_skew: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    /// Constructs a configuration that renews `renewal_skew` ahead of expiry
    #[inline]
    pub const fn new(renewal_skew: Duration) -> Self {
        Self { renewal_skew }
    }

    /// Sets how long before expiry the access token is proactively renewed
    #[inline]
    #[must_use]
    pub const fn with_renewal_skew(mut self, renewal_skew: Duration) -> Self {
        self.renewal_skew = renewal_skew;
        self
    }

    /// How long before expiry the access token is proactively renewed
    #[inline]
    pub const fn renewal_skew(&self) -> Duration {
        self.renewal_skew
    }
}

struct Shared {
    state: SessionState,
    scheduler: RenewalScheduler,
    coordinator: RenewalCoordinator,
    transport: Arc<dyn IssuanceTransport>,
    /// Advanced whenever the session is replaced or ended
    epoch: Mutex<u64>,
}

type FireFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

impl Shared {
    fn epoch(&self) -> MutexGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a new session from freshly issued credentials
    fn establish(self: &Arc<Self>, tokens: &IssuedTokens) {
        let mut epoch = self.epoch();
        *epoch = epoch.wrapping_add(1);
        self.apply(tokens);
    }

    fn apply(self: &Arc<Self>, tokens: &IssuedTokens) {
        self.state
            .set_credentials(&tokens.access_token, &tokens.refresh_token);
        self.arm(&tokens.access_token);
    }

    fn arm(self: &Arc<Self>, token: &AccessTokenRef) {
        let now = self.state.now();
        self.scheduler
            .arm(token, now, Self::on_fire(Arc::downgrade(self)));
    }

    fn on_fire(session: Weak<Self>) -> FireFuture {
        Box::pin(async move {
            let Some(session) = session.upgrade() else {
                return;
            };

            tracing::debug!("access token nearing expiry, renewing");
            // Failure has already ended the session.
            let _ = session.renew().await;
        })
    }

    async fn renew(self: &Arc<Self>) -> Result<AccessToken, RenewalFailed> {
        self.coordinator
            .renew_with(|| Arc::clone(self).attempt_renewal())
            .await
    }

    async fn attempt_renewal(self: Arc<Self>) -> Result<AccessToken, RenewalFailed> {
        let started = *self.epoch();
        let Some(renewal) = self.state.renewal_credential() else {
            tracing::warn!("no refresh token available, ending session");
            self.end();
            return Err(RenewalFailed::MissingRenewalCredential);
        };

        let result = self.transport.renew(&renewal).await;

        let mut epoch = self.epoch();
        if *epoch != started {
            tracing::debug!(
                renewed = result.is_ok(),
                "session ended while renewing, discarding outcome"
            );
            return Err(RenewalFailed::SessionEnded);
        }

        match result {
            Ok(tokens) => {
                self.apply(&tokens);
                drop(epoch);
                tracing::info!(
                    lifetime_ms = tokens.expires_in,
                    message = tokens.message.as_deref().unwrap_or_default(),
                    "session renewed"
                );
                Ok(tokens.access_token)
            }
            Err(err) => {
                self.close(&mut epoch);
                drop(epoch);
                tracing::warn!(
                    error = (&err as &dyn error::Error),
                    "renewal failed, ending session"
                );
                Err(RenewalFailed::Rejected(Arc::new(err)))
            }
        }
    }

    fn end(&self) {
        self.close(&mut self.epoch());
    }

    fn close(&self, epoch: &mut u64) {
        *epoch = epoch.wrapping_add(1);
        self.scheduler.disarm();
        self.state.clear();
    }
}

/// A client session: stored credentials, proactive renewal, and single-flight
/// reactive renewal behind one handle
///
/// Cloning is cheap and every clone refers to the same session. The renewal
/// timer does not keep the session alive; once every handle is dropped,
/// renewal stops.
#[derive(Clone)]
pub struct AuthSession {
    shared: Arc<Shared>,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("state", &self.shared.state)
            .field("scheduler", &self.shared.scheduler)
            .field("coordinator", &self.shared.coordinator)
            .finish_non_exhaustive()
    }
}

impl AuthSession {
    /// Constructs a session against the system clock
    ///
    /// See [`with_clock`][AuthSession::with_clock].
    pub fn new(
        store: impl CredentialStore + 'static,
        transport: impl IssuanceTransport + 'static,
        config: SessionConfig,
    ) -> Self {
        Self::with_clock(store, transport, config, System)
    }

    /// Constructs a session that tells time by `clock`
    ///
    /// Whatever credentials `store` already holds are picked up. If the
    /// stored access token is still comfortably valid, the renewal timer is
    /// armed for it immediately.
    pub fn with_clock(
        store: impl CredentialStore + 'static,
        transport: impl IssuanceTransport + 'static,
        config: SessionConfig,
        clock: impl Clock + Send + Sync + 'static,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: SessionState::new(store, Arc::new(clock)),
            scheduler: RenewalScheduler::new(config.renewal_skew()),
            coordinator: RenewalCoordinator::new(),
            transport: Arc::new(transport),
            epoch: Mutex::new(0),
        });

        if let Some(token) = shared.state.access_credential() {
            shared.arm(&token);
        }

        Self { shared }
    }

    /// Logs in with a login identifier and password
    ///
    /// On success the new credentials are stored, observers are notified, and
    /// the renewal timer is armed. On failure the session is left as it was.
    ///
    /// # Errors
    ///
    /// Returns the authority's refusal or the transport failure.
    pub async fn login(
        &self,
        login_id: impl Into<LoginId>,
        password: impl Into<Password>,
    ) -> Result<SessionSnapshot, IssuanceError> {
        let request = LoginRequest::new(login_id, password);
        let tokens = self.shared.transport.login(&request).await?;
        self.shared.establish(&tokens);

        let snapshot = self.snapshot();
        tracing::info!(
            subject = snapshot.subject().map(|s| s.as_str()),
            message = tokens.message.as_deref().unwrap_or_default(),
            "logged in"
        );
        Ok(snapshot)
    }

    /// Registers a new account and logs into it
    ///
    /// # Errors
    ///
    /// Returns the authority's refusal or the transport failure.
    pub async fn signup(&self, profile: &SignupProfile) -> Result<SessionSnapshot, IssuanceError> {
        let tokens = self.shared.transport.signup(profile).await?;
        self.shared.establish(&tokens);

        let snapshot = self.snapshot();
        tracing::info!(
            subject = snapshot.subject().map(|s| s.as_str()),
            message = tokens.message.as_deref().unwrap_or_default(),
            "signed up"
        );
        Ok(snapshot)
    }

    /// Renews the access token, joining any renewal already in flight
    ///
    /// # Errors
    ///
    /// Any failure ends the session before it is returned.
    pub async fn renew(&self) -> Result<AccessToken, RenewalFailed> {
        self.shared.renew().await
    }

    /// Obtains an access token to replace one the API has rejected
    ///
    /// If the session already holds a different, still valid access token,
    /// some other renewal has completed since `rejected` was read and that
    /// token is returned as is. Otherwise this renews.
    ///
    /// # Errors
    ///
    /// Any failure ends the session before it is returned.
    pub async fn renew_rejected(
        &self,
        rejected: &AccessTokenRef,
    ) -> Result<AccessToken, RenewalFailed> {
        if let Some(current) = self.shared.state.access_credential() {
            let now = self.shared.state.now();
            let superseded = current.as_str() != rejected.as_str()
                && claims::decode(&current).is_ok_and(|c| c.is_valid_at(now));

            if superseded {
                tracing::debug!("rejected access token already superseded");
                return Ok(current);
            }
        }

        self.renew().await
    }

    /// Ends the session, removing stored credentials and cancelling renewal
    pub fn logout(&self) {
        self.shared.end();
        tracing::info!("logged out");
    }

    /// The current access token, if any
    ///
    /// The token is returned even if it has expired.
    pub fn access_token(&self) -> Option<AccessToken> {
        self.shared.state.access_credential()
    }

    /// Whether the current access token is present and unexpired
    pub fn is_authenticated(&self) -> bool {
        self.shared.state.is_authenticated()
    }

    /// The subject of the current access token
    pub fn subject(&self) -> Option<Subject> {
        self.shared.state.subject()
    }

    /// The most recently published state of the session
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.snapshot()
    }

    /// Subscribes to changes in the state of the session
    pub fn watch(&self) -> SessionWatcher {
        self.shared.state.subscribe()
    }

    /// The underlying session state
    pub fn state(&self) -> &SessionState {
        &self.shared.state
    }

    /// When the renewal timer will fire, if it is armed
    pub fn renewal_scheduled_at(&self) -> Option<UnixMillis> {
        self.shared.scheduler.armed_until()
    }

    /// Whether a renewal is currently in flight
    pub fn is_renewing(&self) -> bool {
        self.shared.coordinator.is_in_flight()
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        stores::{CredentialKey, InMemoryCredentialStore},
        testing::{PausedClock, ScriptedIssuance},
        RefreshToken,
    };

    const START: UnixMillis = UnixMillis(1_700_000_000_000);

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn authority(clock: &PausedClock) -> Arc<ScriptedIssuance> {
        Arc::new(
            ScriptedIssuance::new(clock.clone()).with_account("alice", "secret123", "alice"),
        )
    }

    fn session_with(
        store: InMemoryCredentialStore,
        issuance: &Arc<ScriptedIssuance>,
        clock: &PausedClock,
    ) -> AuthSession {
        AuthSession::with_clock(
            store,
            Arc::clone(issuance),
            SessionConfig::default(),
            clock.clone(),
        )
    }

    #[test]
    fn default_config_renews_ten_seconds_early() {
        assert_eq!(SessionConfig::default().renewal_skew(), secs(10));
        assert_eq!(
            SessionConfig::new(secs(1))
                .with_renewal_skew(secs(30))
                .renewal_skew(),
            secs(30)
        );
    }

    mod when_logging_in {
        use super::*;

        #[tokio::test(start_paused = true)]
        #[traced_test]
        async fn session_becomes_authenticated_and_arms_renewal() {
            let clock = PausedClock::new(START);
            let issuance = authority(&clock);
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);

            let snapshot = session.login("alice", "secret123").await.unwrap();

            assert!(snapshot.is_authenticated());
            assert_eq!(snapshot.subject().map(|s| s.as_str()), Some("alice"));
            assert!(session.is_authenticated());
            assert_eq!(session.renewal_scheduled_at(), Some(START + secs(50)));
            assert_eq!(
                session.state().renewal_credential(),
                Some(RefreshToken::from_static("R1"))
            );
            assert!(logs_contain("logged in"));
        }

        #[tokio::test(start_paused = true)]
        async fn bad_password_leaves_the_session_signed_out() {
            let clock = PausedClock::new(START);
            let issuance = authority(&clock);
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);

            let err = session.login("alice", "hunter2").await.unwrap_err();

            assert_eq!(err.message(), Some("Invalid credentials"));
            assert!(!session.is_authenticated());
            assert_eq!(session.snapshot(), SessionSnapshot::signed_out());
            assert_eq!(session.renewal_scheduled_at(), None);
        }

        #[tokio::test(start_paused = true)]
        async fn signup_logs_the_new_account_in() {
            let clock = PausedClock::new(START);
            let issuance = authority(&clock);
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);

            let profile = SignupProfile {
                user_first_name: "Bob".into(),
                user_last_name: "Builder".into(),
                user_email: "bob@example.com".into(),
                user_phone_number: "555-0101".into(),
                user_date_of_birth: "1985-01-02".into(),
                addresses: Vec::new(),
                user_login_id: LoginId::from_static("bob"),
                user_password: Password::from_static("canwefixit"),
            };
            let snapshot = session.signup(&profile).await.unwrap();

            assert!(snapshot.is_authenticated());
            assert_eq!(snapshot.subject().map(|s| s.as_str()), Some("bob"));
            assert_eq!(session.renewal_scheduled_at(), Some(START + secs(50)));
        }
    }

    mod when_the_renewal_timer_fires {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn credentials_rotate_and_the_timer_rearms() {
            let clock = PausedClock::new(START);
            let issuance = authority(&clock);
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);
            session.login("alice", "secret123").await.unwrap();
            let first = session.access_token().unwrap();

            tokio::time::sleep(secs(49)).await;
            assert_eq!(issuance.renew_calls(), 0);

            tokio::time::sleep(secs(2)).await;
            assert_eq!(issuance.renew_calls(), 1);
            assert_eq!(
                issuance.presented_refresh_tokens(),
                vec![RefreshToken::from_static("R1")]
            );
            assert_ne!(session.access_token(), Some(first));
            assert_eq!(
                session.state().renewal_credential(),
                Some(RefreshToken::from_static("R2"))
            );
            assert_eq!(session.renewal_scheduled_at(), Some(START + secs(100)));
            assert_eq!(session.subject().as_deref().map(|s| s.as_str()), Some("alice"));
        }

        #[tokio::test(start_paused = true)]
        async fn renewal_repeats_for_as_long_as_the_session_lives() {
            let clock = PausedClock::new(START);
            let issuance = authority(&clock);
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);
            session.login("alice", "secret123").await.unwrap();

            tokio::time::sleep(secs(151)).await;

            assert_eq!(issuance.renew_calls(), 3);
            assert!(session.is_authenticated());
            assert_eq!(session.renewal_scheduled_at(), Some(START + secs(200)));
        }

        #[tokio::test(start_paused = true)]
        async fn watchers_see_the_renewed_session() {
            let clock = PausedClock::new(START);
            let issuance = authority(&clock);
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);
            session.login("alice", "secret123").await.unwrap();
            let mut watcher = session.watch();

            let seen = watcher.changed().await.unwrap();

            assert_eq!(clock.now(), START + secs(50));
            assert!(seen.is_authenticated());
            assert_eq!(seen.subject().map(|s| s.as_str()), Some("alice"));
        }

        #[tokio::test(start_paused = true)]
        async fn a_failed_renewal_ends_the_session() {
            let clock = PausedClock::new(START);
            let issuance = authority(&clock);
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);
            session.login("alice", "secret123").await.unwrap();
            issuance.reject_renewals(401, "Token refresh failed");

            tokio::time::sleep(secs(51)).await;

            assert_eq!(issuance.renew_calls(), 1);
            assert!(!session.is_authenticated());
            assert_eq!(session.snapshot(), SessionSnapshot::signed_out());
            assert_eq!(session.access_token(), None);
            assert_eq!(session.renewal_scheduled_at(), None);

            tokio::time::sleep(secs(120)).await;
            assert_eq!(issuance.renew_calls(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn dropping_the_session_stops_renewal() {
            let clock = PausedClock::new(START);
            let issuance = authority(&clock);
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);
            session.login("alice", "secret123").await.unwrap();

            drop(session);
            tokio::time::sleep(secs(120)).await;

            assert_eq!(issuance.renew_calls(), 0);
        }
    }

    mod when_renewing_on_demand {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn concurrent_renewals_share_one_call() {
            let clock = PausedClock::new(START);
            let issuance = Arc::new(
                ScriptedIssuance::new(clock.clone())
                    .with_account("alice", "secret123", "alice")
                    .with_latency(Duration::from_millis(300)),
            );
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);
            session.login("alice", "secret123").await.unwrap();

            let (a, b, c) = tokio::join!(session.renew(), session.renew(), session.renew());

            assert_eq!(issuance.renew_calls(), 1);
            let a = a.unwrap();
            assert_eq!(b.unwrap(), a);
            assert_eq!(c.unwrap(), a);
            assert_eq!(session.access_token(), Some(a));
            assert!(!session.is_renewing());
        }

        #[tokio::test(start_paused = true)]
        async fn every_waiter_sees_the_same_failure() {
            let clock = PausedClock::new(START);
            let issuance = Arc::new(
                ScriptedIssuance::new(clock.clone())
                    .with_account("alice", "secret123", "alice")
                    .with_latency(Duration::from_millis(300)),
            );
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);
            session.login("alice", "secret123").await.unwrap();
            issuance.reject_renewals(401, "Token refresh failed");

            let (a, b) = tokio::join!(session.renew(), session.renew());

            match (a, b) {
                (Err(RenewalFailed::Rejected(a)), Err(RenewalFailed::Rejected(b))) => {
                    assert!(Arc::ptr_eq(&a, &b));
                    assert_eq!(a.message(), Some("Token refresh failed"));
                }
                other => panic!("expected a shared rejection, got {other:?}"),
            }
            assert_eq!(issuance.renew_calls(), 1);
            assert!(!session.is_authenticated());
        }

        #[tokio::test(start_paused = true)]
        async fn renewing_without_a_refresh_token_fails() {
            let clock = PausedClock::new(START);
            let issuance = authority(&clock);
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);

            let err = session.renew().await.unwrap_err();

            assert!(matches!(err, RenewalFailed::MissingRenewalCredential));
            assert_eq!(issuance.renew_calls(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn a_superseded_rejection_reuses_the_newer_token() {
            let clock = PausedClock::new(START);
            let issuance = authority(&clock);
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);
            session.login("alice", "secret123").await.unwrap();
            let stale = session.access_token().unwrap();
            let fresh = session.renew().await.unwrap();

            let reused = session.renew_rejected(&stale).await.unwrap();

            assert_eq!(reused, fresh);
            assert_eq!(issuance.renew_calls(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn rejecting_the_current_token_renews() {
            let clock = PausedClock::new(START);
            let issuance = authority(&clock);
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);
            session.login("alice", "secret123").await.unwrap();
            let current = session.access_token().unwrap();

            let renewed = session.renew_rejected(&current).await.unwrap();

            assert_ne!(renewed, current);
            assert_eq!(issuance.renew_calls(), 1);
        }
    }

    mod when_restoring {
        use super::*;

        fn seeded(tokens: &IssuedTokens) -> InMemoryCredentialStore {
            InMemoryCredentialStore::new()
                .with(CredentialKey::Access, tokens.access_token.as_str())
                .with(CredentialKey::Renewal, tokens.refresh_token.as_str())
        }

        #[tokio::test(start_paused = true)]
        async fn a_valid_stored_token_arms_renewal() {
            let clock = PausedClock::new(START);
            let issuance = authority(&clock);
            let store = seeded(&issuance.grant("bob"));

            let session = session_with(store, &issuance, &clock);

            assert!(session.is_authenticated());
            assert_eq!(session.subject().as_deref().map(|s| s.as_str()), Some("bob"));
            assert_eq!(session.renewal_scheduled_at(), Some(START + secs(50)));

            tokio::time::sleep(secs(51)).await;
            assert_eq!(issuance.renew_calls(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn an_expired_stored_token_waits_for_demand() {
            let clock = PausedClock::new(START);
            let issuance = Arc::new(ScriptedIssuance::new(clock.clone()).with_lifetime(secs(5)));
            let store = seeded(&issuance.grant("bob"));

            tokio::time::sleep(secs(10)).await;
            let session = session_with(store, &issuance, &clock);

            assert!(!session.is_authenticated());
            assert_eq!(session.renewal_scheduled_at(), None);

            session.renew().await.unwrap();
            assert!(session.is_authenticated());
            assert_eq!(issuance.renew_calls(), 1);
        }
    }

    mod when_logging_out {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn credentials_are_removed_and_renewal_cancelled() {
            let clock = PausedClock::new(START);
            let issuance = authority(&clock);
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);
            session.login("alice", "secret123").await.unwrap();
            let mut watcher = session.watch();

            session.logout();

            assert_eq!(session.renewal_scheduled_at(), None);
            assert_eq!(session.access_token(), None);
            assert_eq!(session.state().renewal_credential(), None);
            assert_eq!(watcher.changed().await.unwrap(), SessionSnapshot::signed_out());

            tokio::time::sleep(secs(120)).await;
            assert_eq!(issuance.renew_calls(), 0);
        }

        fn slow_authority(clock: &PausedClock) -> Arc<ScriptedIssuance> {
            Arc::new(
                ScriptedIssuance::new(clock.clone())
                    .with_account("alice", "secret123", "alice")
                    .with_latency(Duration::from_millis(300)),
            )
        }

        #[tokio::test(start_paused = true)]
        async fn an_in_flight_renewal_does_not_sign_back_in() {
            let clock = PausedClock::new(START);
            let issuance = slow_authority(&clock);
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);
            session.login("alice", "secret123").await.unwrap();

            let renewing = tokio::spawn({
                let session = session.clone();
                async move { session.renew().await }
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(session.is_renewing());

            session.logout();
            let result = renewing.await.unwrap();

            assert!(matches!(result, Err(RenewalFailed::SessionEnded)));
            assert_eq!(issuance.renew_calls(), 1);
            assert!(!session.is_authenticated());
            assert_eq!(session.access_token(), None);
            assert_eq!(session.state().renewal_credential(), None);
            assert_eq!(session.renewal_scheduled_at(), None);

            tokio::time::sleep(secs(120)).await;
            assert_eq!(issuance.renew_calls(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn an_in_flight_renewal_does_not_overwrite_a_new_login() {
            let clock = PausedClock::new(START);
            let issuance = slow_authority(&clock);
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);
            session.login("alice", "secret123").await.unwrap();

            let renewing = tokio::spawn({
                let session = session.clone();
                async move { session.renew().await }
            });
            tokio::time::sleep(Duration::from_millis(100)).await;

            session.logout();
            session.login("alice", "secret123").await.unwrap();
            let access = session.access_token();
            let renewal = session.state().renewal_credential();

            let result = renewing.await.unwrap();

            assert!(matches!(result, Err(RenewalFailed::SessionEnded)));
            assert!(session.is_authenticated());
            assert_eq!(session.access_token(), access);
            assert_eq!(session.state().renewal_credential(), renewal);
            assert!(session.renewal_scheduled_at().is_some());
        }

        #[tokio::test(start_paused = true)]
        async fn logging_out_twice_is_harmless() {
            let clock = PausedClock::new(START);
            let issuance = authority(&clock);
            let session = session_with(InMemoryCredentialStore::new(), &issuance, &clock);

            session.logout();
            session.logout();

            assert_eq!(session.snapshot(), SessionSnapshot::signed_out());
        }
    }
}
