//! Keyed timers for reclassification delays and monitor polling.
//!
//! A timer is identified by a [`TimerKey`]; scheduling a key that is already
//! pending replaces the old timer. Every arm returns a fresh token and an
//! expiration is only acted upon if [`Scheduler::fired`] confirms the token
//! is still current, so a timer that was cancelled or superseded after it
//! already queued its expiration is dropped.

use ahash::AHashMap as HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::trace;

use crate::daemon::Event;

pub type TimerToken = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKey {
    /// Deferred reclassification of a pid.
    Reclassify(u32),
    IoWait,
    Swap,
    /// Periodic /proc scan.
    Scan,
}

pub trait Scheduler {
    /// Arms a one-shot timer, replacing any pending timer for `key`.
    fn schedule_after(&mut self, key: TimerKey, delay: Duration) -> TimerToken;

    /// Arms a repeating timer, replacing any pending timer for `key`.
    fn schedule_periodic(&mut self, key: TimerKey, period: Duration) -> TimerToken;

    /// Cancels the timer for `key`. Returns whether one was pending.
    fn cancel(&mut self, key: TimerKey) -> bool;

    /// Validates an expiration. Returns false for stale tokens. A valid
    /// one-shot expiration disarms the key.
    fn fired(&mut self, key: TimerKey, token: TimerToken) -> bool;

    fn is_pending(&self, key: TimerKey) -> bool;

    /// Current time on the scheduler's clock.
    fn now(&self) -> Instant;

    /// Cancels every timer whose key matches `pred`.
    fn cancel_where(&mut self, pred: &dyn Fn(TimerKey) -> bool);
}

// ---------------------------------------------------------------------------
// Tokio
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct TokioTimer {
    token: TimerToken,
    periodic: bool,
    handle: AbortHandle,
}

/// Timers backed by tokio tasks that post [`Event::Timer`] into the
/// dispatch channel. Must be used from within a tokio runtime.
#[derive(Debug)]
pub struct TokioScheduler {
    tx: UnboundedSender<Event>,
    timers: HashMap<TimerKey, TokioTimer>,
    next_token: TimerToken,
}

impl TokioScheduler {
    pub fn new(tx: UnboundedSender<Event>) -> Self {
        Self {
            tx,
            timers: HashMap::new(),
            next_token: 1,
        }
    }

    fn arm(&mut self, key: TimerKey, delay: Duration, periodic: bool) -> TimerToken {
        self.cancel(key);
        let token = self.next_token;
        self.next_token += 1;
        let tx = self.tx.clone();

        let task = if periodic {
            tokio::spawn(async move {
                let start = tokio::time::Instant::now() + delay;
                let mut interval = tokio::time::interval_at(start, delay);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    if tx.send(Event::Timer { key, token }).is_err() {
                        break;
                    }
                }
            })
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Event::Timer { key, token });
            })
        };
        let handle = task.abort_handle();

        trace!("Armed {:?} token {} in {:?}", key, token, delay);
        self.timers.insert(
            key,
            TokioTimer {
                token,
                periodic,
                handle,
            },
        );
        token
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_after(&mut self, key: TimerKey, delay: Duration) -> TimerToken {
        self.arm(key, delay, false)
    }

    fn schedule_periodic(&mut self, key: TimerKey, period: Duration) -> TimerToken {
        self.arm(key, period, true)
    }

    fn cancel(&mut self, key: TimerKey) -> bool {
        match self.timers.remove(&key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    fn fired(&mut self, key: TimerKey, token: TimerToken) -> bool {
        let periodic = match self.timers.get(&key) {
            Some(timer) if timer.token == token => timer.periodic,
            _ => return false,
        };
        if !periodic {
            self.timers.remove(&key);
        }
        true
    }

    fn is_pending(&self, key: TimerKey) -> bool {
        self.timers.contains_key(&key)
    }

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn cancel_where(&mut self, pred: &dyn Fn(TimerKey) -> bool) {
        self.timers.retain(|key, timer| {
            if pred(*key) {
                timer.handle.abort();
                false
            } else {
                true
            }
        });
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for timer in self.timers.values() {
            timer.handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Virtual clock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct ManualTimer {
    token: TimerToken,
    due: Instant,
    period: Option<Duration>,
    /// One-shot that already expired and awaits `fired`.
    expired: bool,
}

/// Deterministic scheduler driven by [`ManualScheduler::advance`].
#[derive(Debug)]
pub struct ManualScheduler {
    now: Instant,
    timers: HashMap<TimerKey, ManualTimer>,
    next_token: TimerToken,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            now: Instant::now(),
            timers: HashMap::new(),
            next_token: 1,
        }
    }

    fn arm(&mut self, key: TimerKey, delay: Duration, period: Option<Duration>) -> TimerToken {
        let token = self.next_token;
        self.next_token += 1;
        self.timers.insert(
            key,
            ManualTimer {
                token,
                due: self.now + delay,
                period,
                expired: false,
            },
        );
        token
    }

    /// Moves the clock forward by `by` and returns every expiration that
    /// happened meanwhile, in time order.
    pub fn advance(&mut self, by: Duration) -> Vec<(TimerKey, TimerToken)> {
        let target = self.now + by;
        let mut out = Vec::new();

        loop {
            let next = self
                .timers
                .iter()
                .filter(|(_, t)| !t.expired && t.due <= target)
                .min_by_key(|(_, t)| (t.due, t.token))
                .map(|(k, _)| *k);
            let Some(key) = next else {
                break;
            };
            let Some(timer) = self.timers.get_mut(&key) else {
                break;
            };
            self.now = self.now.max(timer.due);
            out.push((key, timer.token));
            match timer.period {
                Some(period) if !period.is_zero() => timer.due += period,
                _ => timer.expired = true,
            }
        }

        self.now = target;
        out
    }

    /// Time until the earliest pending expiration.
    pub fn next_due(&self) -> Option<Duration> {
        self.timers
            .values()
            .filter(|t| !t.expired)
            .map(|t| t.due.saturating_duration_since(self.now))
            .min()
    }

    pub fn pending(&self) -> usize {
        self.timers.values().filter(|t| !t.expired).count()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_after(&mut self, key: TimerKey, delay: Duration) -> TimerToken {
        self.arm(key, delay, None)
    }

    fn schedule_periodic(&mut self, key: TimerKey, period: Duration) -> TimerToken {
        self.arm(key, period, Some(period))
    }

    fn cancel(&mut self, key: TimerKey) -> bool {
        self.timers.remove(&key).is_some()
    }

    fn fired(&mut self, key: TimerKey, token: TimerToken) -> bool {
        let one_shot = match self.timers.get(&key) {
            Some(timer) if timer.token == token => timer.period.is_none(),
            _ => return false,
        };
        if one_shot {
            self.timers.remove(&key);
        }
        true
    }

    fn is_pending(&self, key: TimerKey) -> bool {
        self.timers.contains_key(&key)
    }

    fn now(&self) -> Instant {
        self.now
    }

    fn cancel_where(&mut self, pred: &dyn Fn(TimerKey) -> bool) {
        self.timers.retain(|key, _| !pred(*key));
    }
}
