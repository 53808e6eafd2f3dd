//! Per-agent token budget ledger.
//!
//! [`BudgetLedger`] is an in-memory, lock-protected store of cumulative
//! token counters per (agent, window), window ∈ {day, week, month}. Each
//! window has a rolling start timestamp; counters reset lazily when the
//! window advances. All writes go through one lock, so the observed
//! running total is monotonic per agent until rollover.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use tb_agents::Agent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetWindow {
    Day,
    Week,
    Month,
}

impl BudgetWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetWindow::Day => "day",
            BudgetWindow::Week => "week",
            BudgetWindow::Month => "month",
        }
    }

    const ALL: [BudgetWindow; 3] = [BudgetWindow::Day, BudgetWindow::Week, BudgetWindow::Month];

    /// Start of the window containing `now` (UTC midnight boundaries;
    /// weeks start Monday).
    fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is valid")
            .and_utc();
        match self {
            BudgetWindow::Day => midnight,
            BudgetWindow::Week => {
                midnight - Duration::days(now.weekday().num_days_from_monday() as i64)
            }
            BudgetWindow::Month => {
                let first = now
                    .date_naive()
                    .with_day(1)
                    .expect("day 1 is valid")
                    .and_hms_opt(0, 0, 0)
                    .expect("midnight is valid");
                first.and_utc()
            }
        }
    }

    fn limit_for(&self, agent: &Agent) -> u64 {
        match self {
            BudgetWindow::Day => agent.daily_token_limit,
            BudgetWindow::Week => agent.weekly_token_limit,
            BudgetWindow::Month => agent.monthly_token_limit,
        }
    }
}

/// Returned when a budget check fails.
#[derive(Debug, Clone, Copy)]
pub struct BudgetExceeded {
    pub window: BudgetWindow,
    pub used: u64,
    pub limit: u64,
}

/// One rolling counter.
#[derive(Debug, Clone, Copy)]
struct WindowUsage {
    start: DateTime<Utc>,
    tokens: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct AgentUsage {
    day: Option<WindowUsage>,
    week: Option<WindowUsage>,
    month: Option<WindowUsage>,
}

impl AgentUsage {
    fn slot(&mut self, window: BudgetWindow) -> &mut Option<WindowUsage> {
        match window {
            BudgetWindow::Day => &mut self.day,
            BudgetWindow::Week => &mut self.week,
            BudgetWindow::Month => &mut self.month,
        }
    }

    /// Tokens in the window containing `now` (0 after rollover).
    fn current(&self, window: BudgetWindow, now: DateTime<Utc>) -> u64 {
        let slot = match window {
            BudgetWindow::Day => &self.day,
            BudgetWindow::Week => &self.week,
            BudgetWindow::Month => &self.month,
        };
        match slot {
            Some(usage) if usage.start == window.start(now) => usage.tokens,
            _ => 0,
        }
    }
}

/// Snapshot of one agent's usage across windows.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStatus {
    pub agent_id: String,
    pub day_tokens: u64,
    pub week_tokens: u64,
    pub month_tokens: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BudgetLedger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct BudgetLedger {
    usage: RwLock<HashMap<String, AgentUsage>>,
}

impl BudgetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the agent against its three window limits (0 = unlimited).
    pub fn check(&self, agent: &Agent) -> Result<(), BudgetExceeded> {
        self.check_at(agent, Utc::now())
    }

    pub fn check_at(&self, agent: &Agent, now: DateTime<Utc>) -> Result<(), BudgetExceeded> {
        let usage = self.usage.read();
        let entry = match usage.get(&agent.id) {
            Some(e) => *e,
            None => return Ok(()),
        };

        for window in BudgetWindow::ALL {
            let limit = window.limit_for(agent);
            if limit == 0 {
                continue;
            }
            let used = entry.current(window, now);
            if used >= limit {
                return Err(BudgetExceeded {
                    window,
                    used,
                    limit,
                });
            }
        }
        Ok(())
    }

    /// Add `tokens` to all three windows, rolling any that advanced.
    pub fn record(&self, agent_id: &str, tokens: u64) {
        self.record_at(agent_id, tokens, Utc::now());
    }

    pub fn record_at(&self, agent_id: &str, tokens: u64, now: DateTime<Utc>) {
        let mut usage = self.usage.write();
        let entry = usage.entry(agent_id.to_string()).or_default();
        for window in BudgetWindow::ALL {
            let start = window.start(now);
            let slot = entry.slot(window);
            match slot {
                Some(current) if current.start == start => current.tokens += tokens,
                _ => {
                    *slot = Some(WindowUsage {
                        start,
                        tokens,
                    });
                }
            }
        }
    }

    pub fn status(&self, agent_id: &str) -> BudgetStatus {
        let now = Utc::now();
        let usage = self.usage.read();
        let entry = usage.get(agent_id).copied().unwrap_or_default();
        BudgetStatus {
            agent_id: agent_id.to_string(),
            day_tokens: entry.current(BudgetWindow::Day, now),
            week_tokens: entry.current(BudgetWindow::Week, now),
            month_tokens: entry.current(BudgetWindow::Month, now),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
