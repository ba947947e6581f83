use std::{
    fmt,
    future::Future,
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::{issuance::IssuanceError, AccessToken};

/// A renewal attempt did not produce a new access token
///
/// Every caller waiting on the same attempt receives a clone of the same error.
#[derive(Clone, Debug, Error)]
pub enum RenewalFailed {
    /// There was no refresh token to renew with
    #[error("no refresh token available to renew the session")]
    MissingRenewalCredential,
    /// The issuing authority refused or failed to renew the session
    #[error("issuing authority did not renew the session")]
    Rejected(#[source] Arc<IssuanceError>),
    /// The session was ended or replaced while the renewal was in flight
    ///
    /// Whatever the authority answered was discarded.
    #[error("session ended while the renewal was in flight")]
    SessionEnded,
    /// The renewal attempt ended without reporting an outcome
    #[error("renewal attempt was abandoned before completing")]
    Abandoned,
}

type Outcome = Result<AccessToken, RenewalFailed>;

#[derive(Default)]
enum Slot {
    #[default]
    Idle,
    InFlight(Vec<oneshot::Sender<Outcome>>),
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Publishes the outcome of the in-flight attempt to every subscriber and
/// returns the slot to idle
///
/// Dropping without an outcome, as happens if the attempt panics, reports
/// [`RenewalFailed::Abandoned`].
struct Settlement {
    slot: Arc<Mutex<Slot>>,
    outcome: Option<Outcome>,
}

impl Settlement {
    fn settle(mut self, outcome: Outcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for Settlement {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or(Err(RenewalFailed::Abandoned));
        let subscribers = match mem::take(&mut *lock(&self.slot)) {
            Slot::InFlight(subscribers) => subscribers,
            Slot::Idle => Vec::new(),
        };

        tracing::trace!(
            subscribers = subscribers.len(),
            success = outcome.is_ok(),
            "settling renewal attempt"
        );

        for subscriber in subscribers {
            let _ = subscriber.send(outcome.clone());
        }
    }
}

/// Collapses concurrent renewal requests into a single attempt
///
/// Whichever caller finds the coordinator idle starts the attempt; everyone
/// arriving while it is in flight waits for the same outcome. At most one
/// attempt is ever outstanding.
#[derive(Default)]
pub struct RenewalCoordinator {
    slot: Arc<Mutex<Slot>>,
}

impl fmt::Debug for RenewalCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RenewalCoordinator")
            .field("in_flight", &self.is_in_flight())
            .finish()
    }
}

impl RenewalCoordinator {
    /// Constructs an idle coordinator
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a renewal attempt is currently outstanding
    pub fn is_in_flight(&self) -> bool {
        matches!(*lock(&self.slot), Slot::InFlight(_))
    }

    /// Obtains a renewed access token, starting `attempt` only if no other
    /// attempt is in flight
    ///
    /// The attempt runs on its own task, so it completes even if every
    /// caller waiting on it is dropped. Whatever the attempt does before
    /// returning happens before any caller observes its outcome.
    ///
    /// # Errors
    ///
    /// Returns the attempt's error, shared with every other caller that
    /// waited on the same attempt.
    pub async fn renew_with<F, Fut>(&self, attempt: F) -> Result<AccessToken, RenewalFailed>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let leader = {
            let mut slot = lock(&self.slot);
            match &mut *slot {
                Slot::InFlight(subscribers) => {
                    subscribers.push(tx);
                    tracing::debug!(
                        waiting = subscribers.len(),
                        "joining renewal already in flight"
                    );
                    false
                }
                Slot::Idle => {
                    *slot = Slot::InFlight(vec![tx]);
                    true
                }
            }
        };

        if leader {
            tracing::debug!("starting renewal attempt");
            let settlement = Settlement {
                slot: Arc::clone(&self.slot),
                outcome: None,
            };
            let attempt = attempt();
            tokio::spawn(async move {
                settlement.settle(attempt.await);
            });
        }

        rx.await.unwrap_or(Err(RenewalFailed::Abandoned))
    }
}
