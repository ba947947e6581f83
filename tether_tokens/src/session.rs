use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tether_clock::{Clock, UnixMillis};
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    claims::{self, Claims},
    stores::{CredentialKey, CredentialStore},
    AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef, Subject, SubjectRef,
};

/// The observable state of a session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    authenticated: bool,
    subject: Option<Subject>,
}

impl SessionSnapshot {
    /// A snapshot of a session with no credentials
    pub const fn signed_out() -> Self {
        Self {
            authenticated: false,
            subject: None,
        }
    }

    fn derive(token: Option<&AccessTokenRef>, now: UnixMillis) -> Self {
        match token.map(claims::decode) {
            Some(Ok(claims)) => Self {
                authenticated: claims.is_valid_at(now),
                subject: claims.into_subject(),
            },
            Some(Err(_)) | None => Self::signed_out(),
        }
    }

    /// Whether the stored access token was valid when this snapshot was published
    #[inline]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// The subject of the stored access token
    #[inline]
    pub fn subject(&self) -> Option<&SubjectRef> {
        self.subject.as_deref()
    }
}

/// The session state publisher has been dropped and no further updates will arrive
#[derive(Clone, Copy, Debug, Error)]
#[error("session has been dropped")]
pub struct SessionClosed {
    _p: (),
}

/// A read-only observer of session state
///
/// Observers see every published snapshot's latest value; intermediate values
/// published between two reads may be skipped.
#[derive(Clone, Debug)]
pub struct SessionWatcher {
    watcher: watch::Receiver<SessionSnapshot>,
}

impl SessionWatcher {
    /// The most recently published snapshot
    pub fn current(&self) -> SessionSnapshot {
        self.watcher.borrow().clone()
    }

    /// Waits until a new snapshot is published, then returns it
    ///
    /// # Errors
    ///
    /// Returns [`SessionClosed`] once the session has been dropped.
    pub async fn changed(&mut self) -> Result<SessionSnapshot, SessionClosed> {
        self.watcher
            .changed()
            .await
            .map_err(|_| SessionClosed { _p: () })?;
        Ok(self.watcher.borrow_and_update().clone())
    }
}

/// Process-wide session state derived from the stored credentials
///
/// The credentials themselves live only in the [`CredentialStore`]; every
/// read goes through it. The derived [`SessionSnapshot`] is republished to
/// all watchers whenever the credentials are set or cleared.
pub struct SessionState {
    store: Mutex<Box<dyn CredentialStore>>,
    clock: Arc<dyn Clock + Send + Sync>,
    publisher: watch::Sender<SessionSnapshot>,
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("snapshot", &*self.publisher.borrow())
            .finish_non_exhaustive()
    }
}

impl SessionState {
    /// Constructs session state from whatever credentials `store` already holds
    pub fn new(
        store: impl CredentialStore + 'static,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let token = store.get(CredentialKey::Access).map(AccessToken::new);
        let snapshot = SessionSnapshot::derive(token.as_deref(), clock.now());

        tracing::debug!(
            authenticated = snapshot.authenticated,
            subject = snapshot.subject.as_ref().map(|s| s.as_str()),
            "restored session state"
        );

        let (publisher, _) = watch::channel(snapshot);

        Self {
            store: Mutex::new(Box::new(store)),
            clock,
            publisher,
        }
    }

    fn store(&self) -> MutexGuard<'_, Box<dyn CredentialStore>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current time according to the session's clock
    #[inline]
    pub fn now(&self) -> UnixMillis {
        self.clock.now()
    }

    /// Reads the current access token
    pub fn access_credential(&self) -> Option<AccessToken> {
        self.store().get(CredentialKey::Access).map(AccessToken::new)
    }

    /// Reads the current refresh token
    pub fn renewal_credential(&self) -> Option<RefreshToken> {
        self.store()
            .get(CredentialKey::Renewal)
            .map(RefreshToken::new)
    }

    /// Decodes the claims of the current access token
    ///
    /// An absent or malformed token yields `None`.
    pub fn claims(&self) -> Option<Claims> {
        let token = self.access_credential()?;
        claims::decode(&token).ok()
    }

    /// Whether the current access token is present and unexpired
    ///
    /// This is evaluated afresh on each call.
    pub fn is_authenticated(&self) -> bool {
        let now = self.now();
        self.claims().is_some_and(|c| c.is_valid_at(now))
    }

    /// The subject of the current access token
    pub fn subject(&self) -> Option<Subject> {
        self.claims().and_then(Claims::into_subject)
    }

    /// The most recently published snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.publisher.borrow().clone()
    }

    /// Subscribes to snapshot updates
    pub fn subscribe(&self) -> SessionWatcher {
        SessionWatcher {
            watcher: self.publisher.subscribe(),
        }
    }

    /// Stores a new pair of credentials and publishes the derived snapshot
    pub fn set_credentials(&self, access: &AccessTokenRef, renewal: &RefreshTokenRef) {
        {
            let mut store = self.store();
            for (key, value) in [
                (CredentialKey::Access, access.as_str()),
                (CredentialKey::Renewal, renewal.as_str()),
            ] {
                if let Err(error) = store.set(key, value) {
                    tracing::warn!(
                        credential = %key,
                        error = (&*error as &dyn std::error::Error),
                        "unable to persist credential"
                    );
                }
            }
        }

        let snapshot = SessionSnapshot::derive(Some(access), self.now());
        tracing::debug!(
            authenticated = snapshot.authenticated,
            subject = snapshot.subject.as_ref().map(|s| s.as_str()),
            "publishing session state"
        );
        self.publisher.send_replace(snapshot);
    }

    /// Removes both credentials and publishes a signed-out snapshot
    pub fn clear(&self) {
        {
            let mut store = self.store();
            for key in [CredentialKey::Access, CredentialKey::Renewal] {
                if let Err(error) = store.remove(key) {
                    tracing::warn!(
                        credential = %key,
                        error = (&*error as &dyn std::error::Error),
                        "unable to remove credential"
                    );
                }
            }
        }

        tracing::debug!("publishing signed-out session state");
        self.publisher.send_replace(SessionSnapshot::signed_out());
    }
}
