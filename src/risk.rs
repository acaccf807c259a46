// =============================================================================
// Global Risk Monitor — portfolio-wide circuit breaker (spec §4.3)
// =============================================================================
//
// Generalizes the teacher's four-breaker `RiskEngine` (daily loss,
// consecutive losses, max drawdown, trade limit) into the spec's single
// `canOpen()`/`trigger()` circuit-breaker contract with a cooldown window
// rather than a sticky "KILLED" flag. The teacher's breaker list stays as
// the *reasons* `trigger()` can be called with; what changes is that a trip
// now auto-clears after `circuit_breaker_cooldown` instead of requiring a
// manual reset, and the day-rollover bug is fixed: `peak_portfolio_value` is
// a running maximum that is never reset, only `daily_pnl` and
// `circuit_breaker_active` clear at UTC midnight (spec §4.3, P11).

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerInfo {
    pub name: String,
    pub current: f64,
    pub limit: f64,
    pub tripped: bool,
}

/// Full snapshot of the risk monitor's internal state, for the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub risk_mode: String,
    #[serde(default)]
    pub daily_pnl: f64,
    #[serde(default)]
    pub daily_pnl_pct: f64,
    #[serde(default)]
    pub remaining_daily_loss_pct: f64,
    #[serde(default)]
    pub consecutive_losses: u32,
    #[serde(default)]
    pub daily_trades_count: u32,
    #[serde(default)]
    pub daily_wins: u32,
    #[serde(default)]
    pub daily_losses: u32,
    #[serde(default)]
    pub drawdown_pct: f64,
    #[serde(default)]
    pub peak_portfolio_value: f64,
    #[serde(default)]
    pub circuit_breaker_active: bool,
    #[serde(default)]
    pub circuit_breaker_reason: Option<String>,
    #[serde(default)]
    pub circuit_breakers: Vec<CircuitBreakerInfo>,
    #[serde(default)]
    pub current_date: String,
}

// ---------------------------------------------------------------------------
// Internal mutable state (behind RwLock)
// ---------------------------------------------------------------------------

struct Inner {
    daily_pnl: f64,
    consecutive_losses: u32,
    daily_trades_count: u32,
    daily_wins: u32,
    daily_losses: u32,
    /// Running maximum of portfolio value observed, across all days. Never
    /// reset by day rollover — see P11.
    peak_portfolio_value: f64,
    current_date: String,
    circuit_breaker_active: bool,
    circuit_breaker_until: Option<DateTime<Utc>>,
    circuit_breaker_reason: Option<String>,
    killed: bool,
}

// ---------------------------------------------------------------------------
// Global Risk Monitor
// ---------------------------------------------------------------------------

pub struct RiskMonitor {
    state: RwLock<Inner>,
    /// Starting capital for the current session (used for percentage calcs).
    capital: f64,
    /// Maximum daily loss allowed as a fraction (e.g. 0.03 = 3%).
    max_daily_loss_pct: f64,
    /// Maximum consecutive losing trades before a breaker trip.
    max_consecutive_losses: u32,
    /// Maximum portfolio drawdown from peak, as a fraction.
    max_drawdown_pct: f64,
    /// Maximum number of trades per day.
    max_daily_trades: u32,
    /// Circuit breaker cooldown once tripped (default 60 min, spec §4.3).
    circuit_breaker_cooldown: Duration,
}

impl RiskMonitor {
    pub fn new(
        capital: f64,
        max_daily_loss_pct: f64,
        max_consecutive_losses: u32,
        max_drawdown_pct: f64,
        max_daily_trades: u32,
        circuit_breaker_cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let today = now.format("%Y-%m-%d").to_string();
        info!(
            capital,
            max_daily_loss_pct,
            max_consecutive_losses,
            max_drawdown_pct,
            max_daily_trades,
            "risk monitor initialised"
        );

        Self {
            state: RwLock::new(Inner {
                daily_pnl: 0.0,
                consecutive_losses: 0,
                daily_trades_count: 0,
                daily_wins: 0,
                daily_losses: 0,
                peak_portfolio_value: capital,
                current_date: today,
                circuit_breaker_active: false,
                circuit_breaker_until: None,
                circuit_breaker_reason: None,
                killed: false,
            }),
            capital,
            max_daily_loss_pct,
            max_consecutive_losses,
            max_drawdown_pct,
            max_daily_trades,
            circuit_breaker_cooldown,
        }
    }

    // -------------------------------------------------------------------------
    // Trade recording
    // -------------------------------------------------------------------------

    /// Record the realized PnL of a completed trade and update counters.
    /// Auto-trips the circuit breaker if the resulting state crosses a
    /// threshold.
    pub fn record_trade_result(&self, pnl: f64, now: DateTime<Utc>) {
        self.maybe_roll_day(now);
        let trip_reason = {
            let mut s = self.state.write();

            s.daily_pnl += pnl;
            s.daily_trades_count += 1;

            if pnl >= 0.0 {
                s.daily_wins += 1;
                s.consecutive_losses = 0;
            } else {
                s.daily_losses += 1;
                s.consecutive_losses += 1;
            }

            debug!(
                pnl,
                daily_pnl = s.daily_pnl,
                consecutive_losses = s.consecutive_losses,
                daily_trades = s.daily_trades_count,
                "trade result recorded"
            );

            self.breach_reason(&s)
        };

        if let Some(reason) = trip_reason {
            self.trigger(&reason, now);
        }
    }

    /// Update the running peak portfolio value. Never decreases.
    pub fn mark(&self, portfolio_value: f64) {
        let mut s = self.state.write();
        if portfolio_value > s.peak_portfolio_value {
            s.peak_portfolio_value = portfolio_value;
        }
    }

    /// `updatePnl` — apply a realized delta directly (e.g. from a
    /// reconciliation event) without going through `record_trade_result`'s
    /// win/loss streak bookkeeping.
    pub fn update_pnl(&self, realized_delta: f64, now: DateTime<Utc>) {
        self.maybe_roll_day(now);
        self.state.write().daily_pnl += realized_delta;
    }

    // -------------------------------------------------------------------------
    // Pre-trade gate
    // -------------------------------------------------------------------------

    /// `canOpen()` — false if the circuit breaker is active and its cooldown
    /// hasn't elapsed, or if the daily-loss / drawdown limits are breached.
    /// Exits are never blocked by this check; callers only consult it before
    /// opening new positions.
    pub fn can_open(&self, now: DateTime<Utc>) -> (bool, Option<String>) {
        self.maybe_roll_day(now);
        let mut s = self.state.write();

        if s.killed {
            return (false, Some("kill switch activated".to_string()));
        }

        if s.circuit_breaker_active {
            if s.circuit_breaker_until.map(|until| now < until).unwrap_or(false) {
                return (false, s.circuit_breaker_reason.clone());
            }
            // cooldown elapsed — auto-clear.
            s.circuit_breaker_active = false;
            s.circuit_breaker_until = None;
            s.circuit_breaker_reason = None;
        }

        if let Some(reason) = self.breach_reason(&s) {
            return (false, Some(reason));
        }

        (true, None)
    }

    /// `trigger(reason)` — force-activate the circuit breaker, blocking new
    /// entries until `circuit_breaker_cooldown` elapses. Existing positions
    /// may still be closed; this never blocks exits.
    pub fn trigger(&self, reason: &str, now: DateTime<Utc>) {
        let mut s = self.state.write();
        s.circuit_breaker_active = true;
        s.circuit_breaker_until = Some(now + self.circuit_breaker_cooldown);
        s.circuit_breaker_reason = Some(reason.to_string());
        warn!(reason, until = %s.circuit_breaker_until.unwrap(), "circuit breaker tripped");
    }

    // -------------------------------------------------------------------------
    // State snapshot
    // -------------------------------------------------------------------------

    pub fn get_state(&self, now: DateTime<Utc>) -> RiskState {
        self.maybe_roll_day(now);
        let s = self.state.read();

        let daily_pnl_pct = if self.capital > 0.0 {
            (s.daily_pnl / self.capital) * 100.0
        } else {
            0.0
        };
        let remaining_daily_loss_pct =
            (self.max_daily_loss_pct * 100.0) - ((-s.daily_pnl / self.capital.max(1.0)) * 100.0);

        let breakers = self.build_circuit_breaker_info(&s);

        RiskState {
            risk_mode: self.risk_mode_label(&s),
            daily_pnl: s.daily_pnl,
            daily_pnl_pct,
            remaining_daily_loss_pct: remaining_daily_loss_pct.max(0.0),
            consecutive_losses: s.consecutive_losses,
            daily_trades_count: s.daily_trades_count,
            daily_wins: s.daily_wins,
            daily_losses: s.daily_losses,
            drawdown_pct: self.drawdown_pct(&s),
            peak_portfolio_value: s.peak_portfolio_value,
            circuit_breaker_active: s.circuit_breaker_active,
            circuit_breaker_reason: s.circuit_breaker_reason.clone(),
            circuit_breakers: breakers,
            current_date: s.current_date.clone(),
        }
    }

    /// Activate the kill switch — blocks all trading until manually cleared
    /// via a fresh `RiskMonitor` (or a dedicated admin endpoint, out of
    /// scope here).
    pub fn kill(&self) {
        let mut s = self.state.write();
        s.killed = true;
        warn!("kill switch activated — all trading halted");
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Day rollover (spec §4.3, P11): at UTC midnight, reset `daily_pnl` and
    /// clear the circuit breaker; `peak_portfolio_value` is left untouched.
    /// This is the one deliberate divergence from the teacher's
    /// `maybe_reset_daily`, which also reset `peak_equity_today`.
    fn maybe_roll_day(&self, now: DateTime<Utc>) {
        let today = now.format("%Y-%m-%d").to_string();
        {
            let s = self.state.read();
            if s.current_date == today {
                return;
            }
        }
        let mut s = self.state.write();
        if s.current_date != today {
            info!(old_date = %s.current_date, new_date = %today, "day rolled — resetting daily risk counters");
            s.daily_pnl = 0.0;
            s.consecutive_losses = 0;
            s.daily_trades_count = 0;
            s.daily_wins = 0;
            s.daily_losses = 0;
            s.current_date = today;
            s.circuit_breaker_active = false;
            s.circuit_breaker_until = None;
            s.circuit_breaker_reason = None;
        }
    }

    fn drawdown_pct(&self, s: &Inner) -> f64 {
        let current_equity = self.capital + s.daily_pnl;
        if s.peak_portfolio_value > 0.0 {
            ((s.peak_portfolio_value - current_equity) / s.peak_portfolio_value).max(0.0)
        } else {
            0.0
        }
    }

    /// Returns `Some(reason)` if daily-loss or drawdown limits are currently
    /// breached (independent of whether the breaker has already tripped).
    fn breach_reason(&self, s: &Inner) -> Option<String> {
        let daily_loss_pct = if self.capital > 0.0 {
            (-s.daily_pnl) / self.capital
        } else {
            0.0
        };
        if daily_loss_pct > self.max_daily_loss_pct {
            return Some(format!(
                "daily loss {:.2}% exceeds limit {:.2}%",
                daily_loss_pct * 100.0,
                self.max_daily_loss_pct * 100.0
            ));
        }
        if s.consecutive_losses >= self.max_consecutive_losses {
            return Some(format!(
                "{} consecutive losses (limit {})",
                s.consecutive_losses, self.max_consecutive_losses
            ));
        }
        let drawdown_pct = self.drawdown_pct(s);
        if drawdown_pct > self.max_drawdown_pct {
            return Some(format!(
                "drawdown {:.2}% exceeds limit {:.2}%",
                drawdown_pct * 100.0,
                self.max_drawdown_pct * 100.0
            ));
        }
        if s.daily_trades_count >= self.max_daily_trades {
            return Some(format!(
                "{} trades today (limit {})",
                s.daily_trades_count, self.max_daily_trades
            ));
        }
        None
    }

    fn risk_mode_label(&self, s: &Inner) -> String {
        if s.killed {
            return "KILLED".to_string();
        }
        if s.circuit_breaker_active {
            return "BREAKER_TRIPPED".to_string();
        }
        let daily_loss_pct = if self.capital > 0.0 {
            (-s.daily_pnl) / self.capital
        } else {
            0.0
        };
        if daily_loss_pct >= self.max_daily_loss_pct * 0.75
            || s.consecutive_losses as f64 >= self.max_consecutive_losses as f64 * 0.75
        {
            "Cautious".to_string()
        } else {
            "Normal".to_string()
        }
    }

    fn build_circuit_breaker_info(&self, s: &Inner) -> Vec<CircuitBreakerInfo> {
        let daily_loss_pct = if self.capital > 0.0 {
            ((-s.daily_pnl) / self.capital) * 100.0
        } else {
            0.0
        };
        let drawdown_pct = self.drawdown_pct(s) * 100.0;

        vec![
            CircuitBreakerInfo {
                name: "Daily Loss".to_string(),
                current: daily_loss_pct.max(0.0),
                limit: self.max_daily_loss_pct * 100.0,
                tripped: daily_loss_pct > self.max_daily_loss_pct * 100.0,
            },
            CircuitBreakerInfo {
                name: "Consecutive Losses".to_string(),
                current: s.consecutive_losses as f64,
                limit: self.max_consecutive_losses as f64,
                tripped: s.consecutive_losses >= self.max_consecutive_losses,
            },
            CircuitBreakerInfo {
                name: "Max Drawdown".to_string(),
                current: drawdown_pct,
                limit: self.max_drawdown_pct * 100.0,
                tripped: drawdown_pct > self.max_drawdown_pct * 100.0,
            },
            CircuitBreakerInfo {
                name: "Trade Limit".to_string(),
                current: s.daily_trades_count as f64,
                limit: self.max_daily_trades as f64,
                tripped: s.daily_trades_count >= self.max_daily_trades,
            },
        ]
    }
}

impl std::fmt::Debug for RiskMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskMonitor")
            .field("capital", &self.capital)
            .field("max_daily_loss_pct", &self.max_daily_loss_pct)
            .field("max_consecutive_losses", &self.max_consecutive_losses)
            .field("max_drawdown_pct", &self.max_drawdown_pct)
            .field("max_daily_trades", &self.max_daily_trades)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(capital: f64) -> RiskMonitor {
        RiskMonitor::new(capital, 0.03, 5, 0.05, 50, Duration::minutes(60), Utc::now())
    }

    #[test]
    fn can_open_when_clean() {
        let m = monitor(10_000.0);
        let (ok, reason) = m.can_open(Utc::now());
        assert!(ok);
        assert!(reason.is_none());
    }

    #[test]
    fn daily_loss_breach_blocks_new_entries_but_trigger_is_explicit() {
        let m = monitor(10_000.0);
        let now = Utc::now();
        m.record_trade_result(-400.0, now); // -4% > 3% limit, auto-trips
        let (ok, reason) = m.can_open(now);
        assert!(!ok);
        assert!(reason.is_some());
    }

    #[test]
    fn trigger_blocks_until_cooldown_elapses() {
        let m = monitor(10_000.0);
        let now = Utc::now();
        m.trigger("manual test trip", now);
        assert!(!m.can_open(now).0);
        assert!(m.can_open(now + Duration::minutes(61)).0);
    }

    #[test]
    fn day_rollover_resets_daily_pnl_but_not_peak() {
        let m = monitor(10_000.0);
        let day1 = Utc::now();
        m.mark(11_000.0);
        m.record_trade_result(-50.0, day1);

        let day2 = day1 + Duration::days(1);
        let state = m.get_state(day2);
        assert_eq!(state.daily_pnl, 0.0);
        assert_eq!(state.peak_portfolio_value, 11_000.0);
    }

    #[test]
    fn consecutive_losses_breach_trips_breaker() {
        let m = monitor(10_000.0);
        let now = Utc::now();
        for _ in 0..5 {
            m.record_trade_result(-1.0, now);
        }
        assert!(!m.can_open(now).0);
    }

    #[test]
    fn mark_never_decreases_peak() {
        let m = monitor(10_000.0);
        m.mark(12_000.0);
        m.mark(9_000.0);
        assert_eq!(m.get_state(Utc::now()).peak_portfolio_value, 12_000.0);
    }
}
