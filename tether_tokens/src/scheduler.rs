use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tether_clock::UnixMillis;
use tokio::{runtime::Handle, task::AbortHandle};

use crate::{claims, AccessTokenRef};

struct ArmedTimer {
    generation: u64,
    fires_at: UnixMillis,
    handle: AbortHandle,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    armed: Option<ArmedTimer>,
}

impl Slot {
    fn disarm(&mut self) -> Option<UnixMillis> {
        let timer = self.armed.take()?;
        timer.handle.abort();
        Some(timer.fires_at)
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A single-shot timer that triggers renewal shortly before a token expires
///
/// At most one timer is live at a time: arming always cancels whatever was
/// armed before.
pub struct RenewalScheduler {
    skew: Duration,
    slot: Arc<Mutex<Slot>>,
}

impl fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("skew", &self.skew)
            .field("armed_until", &self.armed_until())
            .finish()
    }
}

impl RenewalScheduler {
    /// Constructs a scheduler that fires `skew` ahead of each token's expiry
    pub fn new(skew: Duration) -> Self {
        Self {
            skew,
            slot: Arc::default(),
        }
    }

    /// The margin subtracted from a token's expiry
    #[inline]
    pub fn skew(&self) -> Duration {
        self.skew
    }

    /// Arms the timer for `token`, cancelling any previously armed timer
    ///
    /// `on_fire` runs once the token is within `skew` of expiring. Nothing is
    /// armed if the token cannot be decoded, if it is already within `skew` of
    /// expiring as of `now`, or if there is no async runtime to run the timer
    /// on. In those cases renewal is left to happen on demand.
    ///
    /// Returns the time at which the timer will fire, if armed.
    pub fn arm<F>(&self, token: &AccessTokenRef, now: UnixMillis, on_fire: F) -> Option<UnixMillis>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slot = lock(&self.slot);
        if let Some(previous) = slot.disarm() {
            tracing::trace!(fires_at = previous.0, "cancelled previous renewal timer");
        }

        let Ok(claims) = claims::decode(token) else {
            tracing::debug!("access token is malformed, not scheduling renewal");
            return None;
        };

        let fires_at = claims.expires_at() - self.skew;
        let Some(delay) = now.until(fires_at) else {
            tracing::debug!(
                expiry = claims.expires_at().0,
                now = now.0,
                "access token is too close to expiry, renewal will happen on demand"
            );
            return None;
        };

        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("no async runtime available, not scheduling renewal");
            return None;
        };

        slot.generation += 1;
        let generation = slot.generation;
        let shared = Arc::clone(&self.slot);

        // The slot lock is still held, so the task cannot look for itself
        // before it has been recorded.
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            {
                let mut slot = lock(&shared);
                match &slot.armed {
                    Some(timer) if timer.generation == generation => slot.armed = None,
                    _ => return,
                }
            }

            tracing::trace!(fires_at = fires_at.0, "renewal timer fired");
            on_fire.await;
        });

        slot.armed = Some(ArmedTimer {
            generation,
            fires_at,
            handle: task.abort_handle(),
        });

        tracing::debug!(
            fires_at = fires_at.0,
            delay_ms = delay.as_millis() as u64,
            "armed renewal timer"
        );

        Some(fires_at)
    }

    /// Cancels the armed timer, if any
    pub fn disarm(&self) {
        if let Some(fires_at) = lock(&self.slot).disarm() {
            tracing::debug!(fires_at = fires_at.0, "disarmed renewal timer");
        }
    }

    /// The time at which the armed timer will fire, if one is armed
    pub fn armed_until(&self) -> Option<UnixMillis> {
        lock(&self.slot).armed.as_ref().map(|t| t.fires_at)
    }
}

impl Drop for RenewalScheduler {
    fn drop(&mut self) {
        lock(&self.slot).disarm();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::testing::{mint_token, PausedClock};
    use tether_clock::Clock;

    const SKEW: Duration = Duration::from_secs(10);
    const START: UnixMillis = UnixMillis(1_700_000_000_000);

    fn bump(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_skew_ahead_of_expiry() {
        let clock = PausedClock::new(START);
        let scheduler = RenewalScheduler::new(SKEW);
        let fired = Arc::new(AtomicUsize::new(0));

        let token = mint_token(Some("alice"), START + Duration::from_secs(60));
        let fires_at = scheduler.arm(&token, clock.now(), bump(&fired));

        assert_eq!(fires_at, Some(START + Duration::from_secs(50)));
        assert_eq!(scheduler.armed_until(), fires_at);

        tokio::time::sleep(Duration::from_secs(49)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.armed_until(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_cancels_the_previous_timer() {
        let clock = PausedClock::new(START);
        let scheduler = RenewalScheduler::new(SKEW);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler.arm(
            &mint_token(None, START + Duration::from_secs(20)),
            clock.now(),
            bump(&first),
        );
        let fires_at = scheduler.arm(
            &mint_token(None, START + Duration::from_secs(120)),
            clock.now(),
            bump(&second),
        );
        assert_eq!(fires_at, Some(START + Duration::from_secs(110)));

        tokio::time::sleep(Duration::from_secs(111)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_cancels_and_is_idempotent() {
        let clock = PausedClock::new(START);
        let scheduler = RenewalScheduler::new(SKEW);
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.arm(
            &mint_token(None, START + Duration::from_secs(60)),
            clock.now(),
            bump(&fired),
        );
        scheduler.disarm();
        scheduler.disarm();
        assert_eq!(scheduler.armed_until(), None);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn token_within_skew_is_not_scheduled() {
        let clock = PausedClock::new(START);
        let scheduler = RenewalScheduler::new(SKEW);
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.arm(
            &mint_token(None, START + Duration::from_secs(60)),
            clock.now(),
            bump(&fired),
        );
        let fires_at = scheduler.arm(
            &mint_token(None, START + Duration::from_secs(10)),
            clock.now(),
            bump(&fired),
        );

        assert_eq!(fires_at, None);
        assert_eq!(scheduler.armed_until(), None);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_token_is_not_scheduled() {
        let clock = PausedClock::new(START);
        let scheduler = RenewalScheduler::new(SKEW);
        let fired = Arc::new(AtomicUsize::new(0));

        let token = crate::AccessToken::from_static("opaque");
        assert_eq!(scheduler.arm(&token, clock.now(), bump(&fired)), None);
        assert_eq!(scheduler.armed_until(), None);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn a_firing_timer_can_rearm_without_cancelling_itself() {
        let clock = PausedClock::new(START);
        let scheduler = Arc::new(RenewalScheduler::new(SKEW));
        let completed = Arc::new(AtomicUsize::new(0));

        let on_fire = {
            let scheduler = Arc::clone(&scheduler);
            let completed = Arc::clone(&completed);
            let clock = clock.clone();
            async move {
                let next = mint_token(None, clock.now() + Duration::from_secs(60));
                scheduler.arm(&next, clock.now(), async {});
                tokio::task::yield_now().await;
                completed.fetch_add(1, Ordering::SeqCst);
            }
        };

        scheduler.arm(
            &mint_token(None, START + Duration::from_secs(60)),
            clock.now(),
            on_fire,
        );

        tokio::time::sleep(Duration::from_secs(51)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(
            scheduler.armed_until(),
            Some(START + Duration::from_secs(100))
        );
    }

    #[test]
    fn arming_without_a_runtime_does_nothing() {
        let scheduler = RenewalScheduler::new(SKEW);
        let token = mint_token(None, START + Duration::from_secs(60));

        assert_eq!(scheduler.arm(&token, START, async {}), None);
        assert_eq!(scheduler.armed_until(), None);
    }
}
