//! Tiered narration quota accounting.
//!
//! Usage is measured in chapter-narrations per calendar month. The check
//! and the commit are a single atomic operation on the store, so two
//! concurrent runs can never both pass the check before either commits.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::NarrationError;

/// Subscription tier, mapping to a fixed monthly narration allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Basic,
    Pro,
}

impl Tier {
    /// Chapter-narrations allowed per month. The free tier has none:
    /// narration is categorically unavailable there.
    pub fn monthly_allowance(&self) -> u32 {
        match self {
            Tier::Free => 0,
            Tier::Basic => 10,
            Tier::Pro => 50,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Basic => write!(f, "basic"),
            Tier::Pro => write!(f, "pro"),
        }
    }
}

/// A user's narration usage within the current billing period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaState {
    pub tier: Tier,
    pub period_start: DateTime<Utc>,
    pub units_used: u32,
    pub units_limit: u32,
}

impl QuotaState {
    pub fn new(tier: Tier, now: DateTime<Utc>) -> Self {
        Self {
            tier,
            period_start: now,
            units_used: 0,
            units_limit: tier.monthly_allowance(),
        }
    }

    /// Reset usage if `now` falls in a different calendar month than the
    /// period start. One-shot, evaluated on access; no background timer.
    pub fn rollover(&mut self, now: DateTime<Utc>) {
        let same_period = now.year() == self.period_start.year()
            && now.month() == self.period_start.month();
        if !same_period {
            self.units_used = 0;
            self.period_start = now;
        }
    }

    pub fn remaining(&self) -> u32 {
        self.units_limit.saturating_sub(self.units_used)
    }

    /// Pure predicate: would a reservation of `units` fit entirely within
    /// the remaining allowance? Always false on the free tier.
    pub fn can_reserve(&self, units: u32) -> bool {
        self.tier != Tier::Free && units <= self.remaining()
    }
}

/// Result of an atomic reservation attempt.
#[derive(Debug, Clone)]
pub enum ReserveOutcome {
    /// Units were committed; carries the state after the commit.
    Reserved(QuotaState),
    /// The request would not fit; nothing was committed.
    Denied(QuotaState),
}

/// Persistence seam for quota state, keyed by user.
///
/// `try_reserve` must be atomic with respect to concurrent callers:
/// rollover, check, and commit happen under one transactional
/// read-modify-write. That guarantee lives here, not in the orchestrator.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn load(&self, user_id: &str) -> Result<Option<QuotaState>>;

    /// Atomically roll the period over if needed, evaluate the request
    /// against the remaining allowance, and commit it if it fits.
    async fn try_reserve(
        &self,
        user_id: &str,
        units: u32,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome>;

    /// Return previously reserved units to the allowance.
    async fn release(&self, user_id: &str, units: u32) -> Result<()>;
}

/// In-memory quota store. A single lock covers check-and-commit, which
/// gives the atomicity the trait requires.
#[derive(Default)]
pub struct MemoryQuotaStore {
    states: Mutex<HashMap<String, QuotaState>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, user_id: impl Into<String>, state: QuotaState) {
        self.states.lock().await.insert(user_id.into(), state);
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn load(&self, user_id: &str) -> Result<Option<QuotaState>> {
        Ok(self.states.lock().await.get(user_id).cloned())
    }

    async fn try_reserve(
        &self,
        user_id: &str,
        units: u32,
        now: DateTime<Utc>,
    ) -> Result<ReserveOutcome> {
        let mut states = self.states.lock().await;
        let state = states
            .get_mut(user_id)
            .ok_or_else(|| anyhow::anyhow!("no quota record for user {}", user_id))?;

        state.rollover(now);

        if state.can_reserve(units) {
            state.units_used += units;
            Ok(ReserveOutcome::Reserved(state.clone()))
        } else {
            Ok(ReserveOutcome::Denied(state.clone()))
        }
    }

    async fn release(&self, user_id: &str, units: u32) -> Result<()> {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(user_id) {
            state.units_used = state.units_used.saturating_sub(units);
        }
        Ok(())
    }
}

/// Gates narration runs against the user's monthly allowance.
pub struct QuotaLedger {
    store: Arc<dyn QuotaStore>,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn QuotaStore>) -> Self {
        Self { store }
    }

    /// Reserve `units` chapter-narrations, all or nothing. A run that does
    /// not fit entirely is rejected before any job is submitted.
    pub async fn reserve(&self, user_id: &str, units: u32) -> crate::error::Result<QuotaState> {
        let outcome = self
            .store
            .try_reserve(user_id, units, Utc::now())
            .await
            .map_err(NarrationError::QuotaStore)?;

        match outcome {
            ReserveOutcome::Reserved(state) => {
                debug!(
                    "reserved {} unit(s) for {}: {}/{} used",
                    units, user_id, state.units_used, state.units_limit
                );
                Ok(state)
            }
            ReserveOutcome::Denied(state) => Err(NarrationError::QuotaExceeded {
                requested: units,
                used: state.units_used,
                limit: state.units_limit,
            }),
        }
    }

    /// Return units for chapters that were reserved but not narrated.
    pub async fn release(&self, user_id: &str, units: u32) -> crate::error::Result<()> {
        self.store
            .release(user_id, units)
            .await
            .map_err(NarrationError::QuotaStore)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_free_tier_never_reserves() {
        let state = QuotaState::new(Tier::Free, date(2026, 8, 1));
        for n in 1..=5 {
            assert!(!state.can_reserve(n));
        }
    }

    #[test]
    fn test_can_reserve_within_allowance() {
        let mut state = QuotaState::new(Tier::Basic, date(2026, 8, 1));
        assert!(state.can_reserve(10));
        assert!(!state.can_reserve(11));
        state.units_used = 7;
        assert!(state.can_reserve(3));
        assert!(!state.can_reserve(4));
    }

    #[test]
    fn test_rollover_resets_on_month_change() {
        let mut state = QuotaState::new(Tier::Pro, date(2026, 7, 31));
        state.units_used = 42;

        // Same month: nothing changes.
        state.rollover(date(2026, 7, 31));
        assert_eq!(state.units_used, 42);

        state.rollover(date(2026, 8, 1));
        assert_eq!(state.units_used, 0);
        assert_eq!(state.period_start, date(2026, 8, 1));
    }

    #[test]
    fn test_rollover_on_year_boundary() {
        let mut state = QuotaState::new(Tier::Pro, date(2025, 12, 15));
        state.units_used = 3;
        state.rollover(date(2026, 1, 2));
        assert_eq!(state.units_used, 0);
    }

    #[tokio::test]
    async fn test_sequential_reserves_never_exceed_limit() {
        let store = MemoryQuotaStore::new();
        store
            .set("u1", QuotaState::new(Tier::Basic, Utc::now()))
            .await;

        let mut reserved = 0;
        for _ in 0..20 {
            match store.try_reserve("u1", 3, Utc::now()).await.unwrap() {
                ReserveOutcome::Reserved(state) => {
                    reserved += 3;
                    assert!(state.units_used <= state.units_limit);
                }
                ReserveOutcome::Denied(state) => {
                    assert!(state.units_used + 3 > state.units_limit);
                }
            }
        }
        assert_eq!(reserved, 9); // 3 grants of 3 fit within 10
    }

    #[tokio::test]
    async fn test_ledger_maps_denial_to_quota_exceeded() {
        let store = Arc::new(MemoryQuotaStore::new());
        store
            .set("u1", QuotaState::new(Tier::Free, Utc::now()))
            .await;
        let ledger = QuotaLedger::new(store);

        let err = ledger.reserve("u1", 1).await.unwrap_err();
        assert!(matches!(
            err,
            NarrationError::QuotaExceeded {
                requested: 1,
                used: 0,
                limit: 0
            }
        ));
    }

    #[tokio::test]
    async fn test_release_returns_units() {
        let store = Arc::new(MemoryQuotaStore::new());
        store
            .set("u1", QuotaState::new(Tier::Basic, Utc::now()))
            .await;
        let ledger = QuotaLedger::new(Arc::clone(&store) as Arc<dyn QuotaStore>);

        ledger.reserve("u1", 4).await.unwrap();
        ledger.release("u1", 2).await.unwrap();

        let state = store.load("u1").await.unwrap().unwrap();
        assert_eq!(state.units_used, 2);
    }

    #[tokio::test]
    async fn test_release_saturates_at_zero() {
        let store = MemoryQuotaStore::new();
        store
            .set("u1", QuotaState::new(Tier::Basic, Utc::now()))
            .await;
        store.release("u1", 99).await.unwrap();
        let state = store.load("u1").await.unwrap().unwrap();
        assert_eq!(state.units_used, 0);
    }

    #[tokio::test]
    async fn test_unknown_user_is_an_error() {
        let store = MemoryQuotaStore::new();
        assert!(store.try_reserve("ghost", 1, Utc::now()).await.is_err());
    }
}
