// spend.rs — Cumulative spend tracking per agent per period.
//
// A SpendLedger holds one counter per period (daily, monthly). Each counter
// remembers which period it belongs to via a period key ("2026-10-16",
// "2026-10"). Resets are computed at read time: a counter whose key differs
// from the current key reads as zero. There is no background reset job, so a
// reset can never be missed.
//
// The ledger also keeps the timestamps of the last hour's committed
// transactions, for per-minute and per-hour frequency limits.
//
// The SpendAggregator wraps ledgers for many agents behind per-agent locks.
// The evaluator holds an agent's lock for the whole read → decide → commit
// section, which closes the check-then-commit race for two requests racing
// against the same limit. Different agents never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Tolerance for floating-point limit comparisons (149.99 + 350.01 must equal 500).
const LIMIT_EPSILON: f64 = 1e-9;

/// True if `total` is strictly above `limit`, ignoring float rounding noise.
pub fn exceeds_limit(total: f64, limit: f64) -> bool {
    total - limit > LIMIT_EPSILON
}

/// A spend accounting window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    /// Calendar day in the engine's local offset.
    Daily,
    /// Calendar month in the engine's local offset.
    Monthly,
}

impl Period {
    pub const ALL: [Period; 2] = [Period::Daily, Period::Monthly];

    /// The key identifying the window that contains `at`.
    pub fn key(&self, at: DateTime<FixedOffset>) -> String {
        match self {
            Period::Daily => at.format("%Y-%m-%d").to_string(),
            Period::Monthly => at.format("%Y-%m").to_string(),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Period::Daily => write!(f, "daily"),
            Period::Monthly => write!(f, "monthly"),
        }
    }
}

/// A sliding window for transaction frequency limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VelocityWindow {
    Minute,
    Hour,
}

impl VelocityWindow {
    pub const ALL: [VelocityWindow; 2] = [VelocityWindow::Minute, VelocityWindow::Hour];

    pub fn duration(&self) -> Duration {
        match self {
            VelocityWindow::Minute => Duration::minutes(1),
            VelocityWindow::Hour => Duration::hours(1),
        }
    }
}

impl std::fmt::Display for VelocityWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VelocityWindow::Minute => write!(f, "minute"),
            VelocityWindow::Hour => write!(f, "hour"),
        }
    }
}

/// Running total for a single period window.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PeriodCounter {
    /// Which window `amount` belongs to. Empty means never written.
    #[serde(default)]
    pub period_key: String,
    #[serde(default)]
    pub amount: f64,
}

impl PeriodCounter {
    fn current(&self, key: &str) -> f64 {
        if self.period_key == key {
            self.amount
        } else {
            0.0
        }
    }

    fn add(&mut self, key: String, amount: f64) {
        if self.period_key != key {
            self.period_key = key;
            self.amount = 0.0;
        }
        self.amount += amount;
    }
}

/// Spend state for one agent. Persisted alongside the agent record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SpendLedger {
    #[serde(default)]
    pub daily: PeriodCounter,
    #[serde(default)]
    pub monthly: PeriodCounter,
    /// Commit times of transactions in the last hour, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent: Vec<DateTime<Utc>>,
}

impl SpendLedger {
    fn counter(&self, period: Period) -> &PeriodCounter {
        match period {
            Period::Daily => &self.daily,
            Period::Monthly => &self.monthly,
        }
    }

    fn counter_mut(&mut self, period: Period) -> &mut PeriodCounter {
        match period {
            Period::Daily => &mut self.daily,
            Period::Monthly => &mut self.monthly,
        }
    }

    /// Running total for the window containing `at`.
    pub fn current_spend(&self, period: Period, at: DateTime<FixedOffset>) -> f64 {
        self.counter(period).current(&period.key(at))
    }

    /// `current + proposed > limit`.
    pub fn would_exceed(
        &self,
        period: Period,
        limit: f64,
        proposed: f64,
        at: DateTime<FixedOffset>,
    ) -> bool {
        exceeds_limit(self.current_spend(period, at) + proposed, limit)
    }

    /// Add `amount` to one period's counter, rolling the window if needed.
    pub fn commit(&mut self, period: Period, amount: f64, at: DateTime<FixedOffset>) {
        let key = period.key(at);
        self.counter_mut(period).add(key, amount);
    }

    /// Add `amount` to every period counter and note the transaction time.
    /// Called once per ALLOWED request.
    pub fn record(&mut self, amount: f64, at: DateTime<FixedOffset>) {
        for period in Period::ALL {
            self.commit(period, amount, at);
        }
        let at = at.with_timezone(&Utc);
        let horizon = at - VelocityWindow::Hour.duration();
        self.recent.retain(|t| *t > horizon);
        self.recent.push(at);
    }

    /// Undo a [`SpendLedger::record`] made at `at`. Counters that have
    /// already rolled to a new window are left alone.
    pub fn release(&mut self, amount: f64, at: DateTime<FixedOffset>) {
        for period in Period::ALL {
            let key = period.key(at);
            let counter = self.counter_mut(period);
            if counter.period_key == key {
                counter.amount = (counter.amount - amount).max(0.0);
            }
        }
        let at = at.with_timezone(&Utc);
        if let Some(pos) = self.recent.iter().rposition(|t| *t == at) {
            self.recent.remove(pos);
        }
    }

    /// Committed transactions in the `window` ending at `at`.
    pub fn transactions_within(&self, window: VelocityWindow, at: DateTime<FixedOffset>) -> usize {
        let at = at.with_timezone(&Utc);
        let since = at - window.duration();
        self.recent.iter().filter(|t| **t > since && **t <= at).count()
    }
}

/// Concurrent spend state for many agents.
///
/// `Mutex<HashMap<_, Arc<Mutex<_>>>>`: the outer lock is held only long
/// enough to find (or create) an agent's entry; the inner lock serializes
/// evaluation for that one agent.
#[derive(Debug, Default)]
pub struct SpendAggregator {
    ledgers: Mutex<HashMap<String, Arc<Mutex<SpendLedger>>>>,
}

impl SpendAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to an agent's ledger.
    ///
    /// If the aggregator has not seen the agent yet, the ledger is seeded
    /// from `seed` (typically the agent's persisted spend state).
    pub fn with_ledger<R>(
        &self,
        agent_id: &str,
        seed: impl FnOnce() -> SpendLedger,
        f: impl FnOnce(&mut SpendLedger) -> R,
    ) -> R {
        let entry = {
            let mut ledgers = lock(&self.ledgers);
            ledgers
                .entry(agent_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(seed())))
                .clone()
        };
        let mut ledger = lock(&entry);
        f(&mut ledger)
    }

    pub fn current_spend(&self, agent_id: &str, period: Period, at: DateTime<FixedOffset>) -> f64 {
        self.with_ledger(agent_id, SpendLedger::default, |l| l.current_spend(period, at))
    }

    pub fn would_exceed(
        &self,
        agent_id: &str,
        period: Period,
        limit: f64,
        proposed: f64,
        at: DateTime<FixedOffset>,
    ) -> bool {
        self.with_ledger(agent_id, SpendLedger::default, |l| {
            l.would_exceed(period, limit, proposed, at)
        })
    }

    pub fn commit(&self, agent_id: &str, period: Period, amount: f64, at: DateTime<FixedOffset>) {
        self.with_ledger(agent_id, SpendLedger::default, |l| l.commit(period, amount, at))
    }

    /// Roll back a commit made for `agent_id` at `at`.
    pub fn release(&self, agent_id: &str, amount: f64, at: DateTime<FixedOffset>) {
        self.with_ledger(agent_id, SpendLedger::default, |l| l.release(amount, at))
    }

    /// Replace an agent's in-memory ledger with state read from storage.
    pub fn reseed(&self, agent_id: &str, ledger: SpendLedger) {
        self.with_ledger(agent_id, SpendLedger::default, |l| *l = ledger)
    }

    /// Copy of an agent's ledger, if the aggregator has one.
    pub fn snapshot(&self, agent_id: &str) -> Option<SpendLedger> {
        let entry = lock(&self.ledgers).get(agent_id).cloned()?;
        let ledger = lock(&entry).clone();
        Some(ledger)
    }
}

// A panic while holding a ledger lock leaves plain numbers behind, which are
// still consistent, so a poisoned lock is recovered rather than propagated.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::thread;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .unwrap()
    }

    #[test]
    fn budget_boundary_is_inclusive() {
        let now = at(2026, 10, 16, 12);
        let mut ledger = SpendLedger::default();
        ledger.commit(Period::Daily, 450.0, now);

        assert!(!ledger.would_exceed(Period::Daily, 500.0, 50.0, now));
        assert!(ledger.would_exceed(Period::Daily, 500.0, 50.01, now));
    }

    #[test]
    fn float_noise_does_not_trip_the_limit() {
        let now = at(2026, 10, 16, 12);
        let mut ledger = SpendLedger::default();
        ledger.commit(Period::Daily, 149.99, now);
        assert!(!ledger.would_exceed(Period::Daily, 500.0, 350.01, now));
    }

    #[test]
    fn daily_counter_resets_at_midnight() {
        let mut ledger = SpendLedger::default();
        ledger.record(120.0, at(2026, 10, 16, 23));

        assert_eq!(ledger.current_spend(Period::Daily, at(2026, 10, 16, 23)), 120.0);
        assert_eq!(ledger.current_spend(Period::Daily, at(2026, 10, 17, 0)), 0.0);
        // Same month, so the monthly counter carries over.
        assert_eq!(ledger.current_spend(Period::Monthly, at(2026, 10, 17, 0)), 120.0);
    }

    #[test]
    fn monthly_counter_resets_on_first_of_month() {
        let mut ledger = SpendLedger::default();
        ledger.record(300.0, at(2026, 10, 31, 9));
        assert_eq!(ledger.current_spend(Period::Monthly, at(2026, 11, 1, 0)), 0.0);

        ledger.record(10.0, at(2026, 11, 1, 0));
        assert_eq!(ledger.monthly.period_key, "2026-11");
        assert_eq!(ledger.monthly.amount, 10.0);
    }

    #[test]
    fn local_offset_moves_the_day_boundary() {
        // 23:30 UTC is already the next day at UTC+02:00.
        let utc = FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2026, 10, 16, 23, 30, 0).unwrap();
        let local = utc.with_timezone(&FixedOffset::east_opt(2 * 3600).unwrap());
        assert_eq!(Period::Daily.key(utc), "2026-10-16");
        assert_eq!(Period::Daily.key(local), "2026-10-17");
    }

    #[test]
    fn aggregator_seeds_once_from_persisted_state() {
        let now = at(2026, 10, 16, 12);
        let mut persisted = SpendLedger::default();
        persisted.record(200.0, now);

        let agg = SpendAggregator::new();
        let seeded = agg.with_ledger("a1", || persisted.clone(), |l| l.current_spend(Period::Daily, now));
        assert_eq!(seeded, 200.0);

        agg.commit("a1", Period::Daily, 50.0, now);
        // A second seed is ignored: the in-memory ledger is authoritative.
        let after = agg.with_ledger("a1", SpendLedger::default, |l| l.current_spend(Period::Daily, now));
        assert_eq!(after, 250.0);
        assert_eq!(agg.current_spend("a1", Period::Daily, now), 250.0);
        assert!(agg.would_exceed("a1", Period::Daily, 300.0, 50.01, now));
    }

    #[test]
    fn concurrent_check_and_commit_never_overspends() {
        let now = at(2026, 10, 16, 12);
        let agg = Arc::new(SpendAggregator::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let agg = Arc::clone(&agg);
                thread::spawn(move || {
                    agg.with_ledger("a1", SpendLedger::default, |l| {
                        if l.would_exceed(Period::Daily, 500.0, 100.0, now) {
                            false
                        } else {
                            l.record(100.0, now);
                            true
                        }
                    })
                })
            })
            .collect();

        let approved = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(approved, 5);
        assert_eq!(agg.current_spend("a1", Period::Daily, now), 500.0);
    }

    #[test]
    fn release_undoes_a_record() {
        let now = at(2026, 10, 16, 12);
        let agg = SpendAggregator::new();
        agg.with_ledger("a1", SpendLedger::default, |l| l.record(100.0, now));
        agg.with_ledger("a1", SpendLedger::default, |l| l.record(40.0, now));

        agg.release("a1", 100.0, now);
        let ledger = agg.snapshot("a1").unwrap();
        assert_eq!(ledger.current_spend(Period::Daily, now), 40.0);
        assert_eq!(ledger.current_spend(Period::Monthly, now), 40.0);
        assert_eq!(ledger.transactions_within(VelocityWindow::Minute, now), 1);
    }

    #[test]
    fn release_after_rollover_leaves_new_window_alone() {
        let mut ledger = SpendLedger::default();
        ledger.record(30.0, at(2026, 10, 17, 0));
        ledger.release(100.0, at(2026, 10, 16, 23));
        assert_eq!(ledger.current_spend(Period::Daily, at(2026, 10, 17, 0)), 30.0);
        // Same month, so the monthly counter takes the rollback.
        assert_eq!(ledger.current_spend(Period::Monthly, at(2026, 10, 17, 0)), 0.0);
    }

    #[test]
    fn velocity_counts_slide_and_prune() {
        let start = at(2026, 10, 16, 12);
        let mut ledger = SpendLedger::default();
        for secs in [0, 20, 40, 70] {
            ledger.record(1.0, start + Duration::seconds(secs));
        }
        let now = start + Duration::seconds(75);
        assert_eq!(ledger.transactions_within(VelocityWindow::Minute, now), 3);
        assert_eq!(ledger.transactions_within(VelocityWindow::Hour, now), 4);

        // Entries older than an hour are dropped on the next record.
        ledger.record(1.0, start + Duration::minutes(61));
        assert_eq!(ledger.recent.len(), 2);
        assert_eq!(
            ledger.transactions_within(VelocityWindow::Hour, start + Duration::minutes(61)),
            2
        );
    }

    #[test]
    fn reseed_replaces_in_memory_state() {
        let now = at(2026, 10, 16, 12);
        let agg = SpendAggregator::new();
        agg.commit("a1", Period::Daily, 50.0, now);

        let mut stored = SpendLedger::default();
        stored.record(320.0, now);
        agg.reseed("a1", stored);
        assert_eq!(agg.current_spend("a1", Period::Daily, now), 320.0);
    }

    #[test]
    fn ledger_without_recent_still_parses() {
        let ledger: SpendLedger = serde_json::from_str(
            r#"{"daily":{"period_key":"2026-10-16","amount":5.0},"monthly":{"period_key":"2026-10","amount":5.0}}"#,
        )
        .unwrap();
        assert!(ledger.recent.is_empty());
    }

    #[test]
    fn snapshot_of_unknown_agent_is_none() {
        assert!(SpendAggregator::new().snapshot("ghost").is_none());
    }
}
