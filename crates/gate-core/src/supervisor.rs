//! Bounded retry supervision for the device links.
//!
//! The supervisor drives a [`Supervised`] link until it reports itself
//! satisfied. There is no "give up" result: after [`RetryPolicy::max_trials`]
//! consecutive failures the device is restarted through [`Restart`], which
//! never returns.

use embedded_hal_async::delay::DelayNs;
use log::error;

use crate::config::{MAX_RETRY_TRIALS, RETRY_INTERVAL_MS};

/// A link (network association, broker session, ...) the supervisor keeps up.
pub trait Supervised {
    /// Try once to bring the link up. May be a no-op when the link is
    /// re-established by someone else (e.g. the Wi-Fi driver).
    fn attempt(&mut self) -> impl Future<Output = ()>;

    /// Polled, never blocking, check of the link state.
    fn is_satisfied(&mut self) -> bool;

    /// Diagnostics hook, called once per failed attempt with the 1-based trial number.
    fn on_attempt_failed(&mut self, trial: u32);
}

/// Full, unrecoverable device restart.
pub trait Restart {
    fn restart(&mut self) -> !;
}

/// Fixed-interval retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause after each failed attempt
    pub interval_ms: u32,
    /// Failed attempts before restarting
    pub max_trials: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval_ms: RETRY_INTERVAL_MS,
            max_trials: MAX_RETRY_TRIALS,
        }
    }
}

/// Drives [`Supervised`] links under a [`RetryPolicy`], owning the pause
/// delay and the restart primitive.
pub struct RetrySupervisor<D, R> {
    delay: D,
    restart: R,
    policy: RetryPolicy,
}

impl<D, R> RetrySupervisor<D, R>
where
    D: DelayNs,
    R: Restart,
{
    /// Create a new supervisor with the default 500 ms / 60 trial policy
    pub fn new(delay: D, restart: R) -> Self {
        Self::with_policy(delay, restart, RetryPolicy::default())
    }

    /// Create a new supervisor with a custom retry budget
    pub fn with_policy(delay: D, restart: R, policy: RetryPolicy) -> Self {
        Self {
            delay,
            restart,
            policy,
        }
    }

    /// Plain pause on the supervisor's delay, outside any retry budget.
    pub async fn pause(&mut self, ms: u32) {
        self.delay.delay_ms(ms).await;
    }

    /// Runs `link` until it is satisfied, restarting the device when the
    /// retry budget is exhausted.
    ///
    /// Returns immediately, without calling [`Supervised::attempt`], when the
    /// link is already up. Each failed attempt is counted, reported, checked
    /// against the budget and then followed by a blocking pause.
    pub async fn run_until<L: Supervised>(&mut self, link: &mut L) {
        let mut trial: u32 = 0;

        while !link.is_satisfied() {
            link.attempt().await;

            if !link.is_satisfied() {
                trial += 1;
                link.on_attempt_failed(trial);

                if trial >= self.policy.max_trials {
                    error!("Restarting device after {} failed attempts...", trial);
                    self.restart.restart();
                }

                self.delay.delay_ms(self.policy.interval_ms).await;
            }
        }
    }
}
