//! Budget Tracker
//!
//! Rolling 24h admission control over spend.
//!
//! Two admission styles are supported:
//!
//! - **Check then record** (default): [`BudgetTracker::can_spend`] before the
//!   call, [`BudgetTracker::record_spending`] after it. Requests admitted
//!   concurrently near the limit can jointly overrun it by at most the sum of
//!   their costs.
//! - **Reserve**: [`BudgetTracker::try_reserve`] debits up front and returns a
//!   [`BudgetReservation`]; committing replaces the reserved amount with the
//!   actual cost, dropping it credits the amount back.
//!
//! When the window expires spend resets to zero and the reset instant moves
//! forward by whole windows, so a long idle period never leaves it in the past.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use super::config::BudgetConfig;

/// Length of one budget window
pub const BUDGET_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
struct BudgetState {
    daily_limit: f64,
    current_spend: f64,
    reset_at: Instant,
    /// Incremented on every reset; reservations from an older window no
    /// longer touch the current spend.
    window: u64,
    alerted: bool,
}

impl BudgetState {
    fn roll_window(&mut self, now: Instant) {
        if now <= self.reset_at {
            return;
        }
        while self.reset_at < now {
            self.reset_at += BUDGET_WINDOW;
        }
        self.current_spend = 0.0;
        self.window += 1;
        self.alerted = false;
        info!(window = self.window, "Budget window reset");
    }

    fn fits(&self, amount: f64) -> bool {
        self.current_spend + amount <= self.daily_limit
    }

    fn percent(&self) -> f64 {
        if self.daily_limit == 0.0 {
            0.0
        } else {
            self.current_spend / self.daily_limit * 100.0
        }
    }
}

/// Point-in-time view of the budget
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BudgetSnapshot {
    /// Limit per window in USD
    pub daily_limit: f64,
    /// Spend in the current window
    pub current_spend: f64,
    /// Spend as a percentage of the limit
    pub percent: f64,
    /// Seconds until the window resets
    pub resets_in_secs: u64,
}

/// Daily spend limiter
pub struct BudgetTracker {
    state: Mutex<BudgetState>,
    alert_threshold_percent: f64,
}

impl BudgetTracker {
    /// Create a tracker with a fresh window starting now
    #[must_use]
    pub fn new(daily_limit: f64) -> Self {
        Self {
            state: Mutex::new(BudgetState {
                daily_limit,
                current_spend: 0.0,
                reset_at: Instant::now() + BUDGET_WINDOW,
                window: 0,
                alerted: false,
            }),
            alert_threshold_percent: 100.0,
        }
    }

    /// Create a tracker from configuration
    #[must_use]
    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.daily_limit_usd).with_alert_threshold(config.alert_threshold_percent)
    }

    /// Warn once per window when spend crosses this percentage
    #[must_use]
    pub fn with_alert_threshold(mut self, percent: f64) -> Self {
        self.alert_threshold_percent = percent;
        self
    }

    /// Whether `amount` more can be spent in the current window
    pub fn can_spend(&self, amount: f64) -> bool {
        let mut state = self.state.lock();
        state.roll_window(Instant::now());
        state.fits(amount)
    }

    /// Add `amount` to the current window's spend
    pub fn record_spending(&self, amount: f64) {
        let mut state = self.state.lock();
        state.roll_window(Instant::now());
        state.current_spend += amount;
        self.check_alert(&mut state);
    }

    /// Atomically admit and debit `amount`
    ///
    /// Returns `None` if the amount does not fit in the remaining budget.
    pub fn try_reserve(self: &Arc<Self>, amount: f64) -> Option<BudgetReservation> {
        let mut state = self.state.lock();
        state.roll_window(Instant::now());
        if !state.fits(amount) {
            return None;
        }

        state.current_spend += amount;
        self.check_alert(&mut state);

        Some(BudgetReservation {
            tracker: Arc::clone(self),
            amount,
            window: state.window,
            settled: false,
        })
    }

    /// Spend in the current window
    pub fn current_spend(&self) -> f64 {
        let mut state = self.state.lock();
        state.roll_window(Instant::now());
        state.current_spend
    }

    /// Configured limit per window
    pub fn daily_limit(&self) -> f64 {
        self.state.lock().daily_limit
    }

    /// Spend as a percentage of the limit (0 when the limit is 0)
    pub fn budget_percent(&self) -> f64 {
        let mut state = self.state.lock();
        state.roll_window(Instant::now());
        state.percent()
    }

    /// Current state for reporting
    pub fn snapshot(&self) -> BudgetSnapshot {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.roll_window(now);
        BudgetSnapshot {
            daily_limit: state.daily_limit,
            current_spend: state.current_spend,
            percent: state.percent(),
            resets_in_secs: state.reset_at.saturating_duration_since(now).as_secs(),
        }
    }

    fn settle(&self, reserved: f64, actual: f64, window: u64) {
        let mut state = self.state.lock();
        state.roll_window(Instant::now());
        if state.window == window {
            state.current_spend = (state.current_spend - reserved).max(0.0);
        }
        state.current_spend += actual;
        self.check_alert(&mut state);
    }

    fn check_alert(&self, state: &mut BudgetState) {
        if !state.alerted && state.percent() >= self.alert_threshold_percent {
            state.alerted = true;
            warn!(
                spend = state.current_spend,
                limit = state.daily_limit,
                threshold_percent = self.alert_threshold_percent,
                "Budget alert threshold crossed"
            );
        }
    }
}

/// A tentative debit against a [`BudgetTracker`]
///
/// Dropping an uncommitted reservation credits the amount back.
#[must_use = "dropping a reservation releases it immediately"]
pub struct BudgetReservation {
    tracker: Arc<BudgetTracker>,
    amount: f64,
    window: u64,
    settled: bool,
}

impl BudgetReservation {
    /// Amount held by this reservation
    pub fn amount(&self) -> f64 {
        self.amount
    }

    /// Replace the reservation with the actual cost
    pub fn commit(mut self, actual: f64) {
        self.settled = true;
        self.tracker.settle(self.amount, actual, self.window);
    }
}

impl Drop for BudgetReservation {
    fn drop(&mut self) {
        if !self.settled {
            self.tracker.settle(self.amount, 0.0, self.window);
        }
    }
}

impl std::fmt::Debug for BudgetReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetReservation")
            .field("amount", &self.amount)
            .field("window", &self.window)
            .field("settled", &self.settled)
            .finish_non_exhaustive()
    }
}
