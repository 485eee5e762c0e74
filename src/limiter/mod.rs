//! Dual rate limiting for quota-limited downstream APIs.
//!
//! Two independently-armed limiters guard a downstream call:
//! [`RequestLimiter`] bounds call frequency (a token bucket with burst 1),
//! [`QuotaLimiter`] bounds a consumable cost budget per window. A strategy
//! typically acquires both before issuing a request.
//!
//! Both are safe under unbounded concurrent callers. Waiters are served in
//! FIFO order: reservations are taken under an async mutex whose wait queue
//! is fair, and each caller then sleeps until its own slot.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

/// Errors constructing or using a limiter.
#[derive(Debug, Error)]
pub enum LimiterError {
    /// A limiter rate of zero would block every caller forever.
    #[error("limiter rate must be greater than zero")]
    ZeroRate,

    /// The requested cost can never fit in one window.
    #[error("requested {cost} units exceeds the per-window budget of {budget}")]
    CostExceedsBudget {
        /// Units requested.
        cost: u64,
        /// Budget per window.
        budget: u64,
    },
}

/// Token bucket limiting request frequency, burst 1.
///
/// One token becomes available every `interval`; `acquire` suspends until
/// the caller's token is due. Cancellation is dropping the future; a
/// cancelled caller's reserved slot goes unused rather than being handed
/// back.
pub struct RequestLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RequestLimiter {
    /// Limiter refilling one token every `60s / max_per_minute`.
    pub fn per_minute(max_per_minute: u32) -> Result<Self, LimiterError> {
        if max_per_minute == 0 {
            return Err(LimiterError::ZeroRate);
        }
        Ok(Self::new(Duration::from_secs(60) / max_per_minute))
    }

    /// Limiter with an explicit refill interval.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// The refill interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Suspend until a token is available.
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

struct QuotaState {
    window_start: Instant,
    used: u64,
}

/// Consumable budget of `budget` units per `window`.
///
/// `acquire(cost)` suspends until `cost` units fit into the current window
/// and decrements atomically. The budget resets when a window elapses;
/// unused budget does not carry over.
pub struct QuotaLimiter {
    budget: u64,
    window: Duration,
    state: Mutex<QuotaState>,
}

impl QuotaLimiter {
    /// Budget of `units_per_minute` cost units, resetting every minute.
    pub fn per_minute(units_per_minute: u64) -> Result<Self, LimiterError> {
        Self::new(units_per_minute, Duration::from_secs(60))
    }

    /// Budget of `budget` units per `window`.
    pub fn new(budget: u64, window: Duration) -> Result<Self, LimiterError> {
        if budget == 0 || window.is_zero() {
            return Err(LimiterError::ZeroRate);
        }
        Ok(Self {
            budget,
            window,
            state: Mutex::new(QuotaState {
                window_start: Instant::now(),
                used: 0,
            }),
        })
    }

    /// The per-window budget.
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Units still available in the current window.
    pub async fn remaining(&self) -> u64 {
        let mut state = self.state.lock().await;
        self.roll_window(&mut state);
        self.budget - state.used
    }

    /// Suspend until `cost` units are available, then consume them.
    ///
    /// Fails fast when `cost` exceeds the whole budget, since no window
    /// could ever satisfy it.
    pub async fn acquire(&self, cost: u64) -> Result<(), LimiterError> {
        if cost > self.budget {
            return Err(LimiterError::CostExceedsBudget {
                cost,
                budget: self.budget,
            });
        }

        loop {
            let window_end = {
                let mut state = self.state.lock().await;
                self.roll_window(&mut state);

                if state.used + cost <= self.budget {
                    let before = state.used;
                    state.used += cost;
                    // Flag the window that crosses half the budget, once
                    if before * 2 <= self.budget && state.used * 2 > self.budget {
                        warn!(
                            used = state.used,
                            budget = self.budget,
                            "quota window past 50% usage"
                        );
                    }
                    return Ok(());
                }

                state.window_start + self.window
            };
            tokio::time::sleep_until(window_end).await;
        }
    }

    /// Reset the window if one or more full periods have elapsed.
    fn roll_window(&self, state: &mut QuotaState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.window_start);
        if elapsed >= self.window {
            let periods = (elapsed.as_nanos() / self.window.as_nanos()) as u32;
            state.window_start += self.window * periods;
            state.used = 0;
        }
    }
}
