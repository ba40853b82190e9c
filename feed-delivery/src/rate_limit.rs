use futures::future::join_all;
use interfaces::{DeliveryCountFilter, DeliveryRecordStore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{RateLimit, Result};

/// Reported as `remaining` when no limits apply.
pub const UNLIMITED_REMAINING: u64 = u64::MAX;

/// Usage of a single configured window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowUsage {
    pub limit: u64,
    pub time_window_seconds: u64,
    pub current_count: u64,
    pub remaining: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitCheck {
    pub under_limit: bool,
    pub remaining: u64,
    pub windows: Vec<WindowUsage>,
}

impl LimitCheck {
    pub fn unlimited() -> Self {
        Self { under_limit: true, remaining: UNLIMITED_REMAINING, windows: Vec::new() }
    }

    /// The window with the least allowance left. Ties keep configuration order.
    pub fn most_restrictive(&self) -> Option<&WindowUsage> {
        self.windows.iter().min_by_key(|window| window.remaining)
    }

    /// Charges `extra` deliveries that the store cannot see yet against every window.
    pub fn with_additional(self, extra: u64) -> Self {
        if extra == 0 || self.windows.is_empty() {
            return self;
        }
        let windows: Vec<WindowUsage> = self
            .windows
            .into_iter()
            .map(|window| {
                let current_count = window.current_count.saturating_add(extra);
                WindowUsage {
                    current_count,
                    remaining: window.limit.saturating_sub(current_count),
                    ..window
                }
            })
            .collect();
        let remaining = windows.iter().map(|w| w.remaining).min().unwrap_or(UNLIMITED_REMAINING);
        let under_limit = windows.iter().all(|w| w.remaining > 0);
        Self { under_limit, remaining, windows }
    }
}

/// Computes remaining allowance for a scope over every configured window.
///
/// Every call reads counts from the store; nothing is cached between calls.
pub async fn get_under_limit_check(
    store: &dyn DeliveryRecordStore,
    scope: &DeliveryCountFilter,
    limits: &[RateLimit],
) -> Result<LimitCheck> {
    if limits.is_empty() {
        return Ok(LimitCheck::unlimited());
    }

    let counts = join_all(
        limits
            .iter()
            .map(|limit| store.count_deliveries_in_past_timeframe(scope, limit.time_window_seconds)),
    )
    .await;

    let mut windows = Vec::with_capacity(limits.len());
    for (limit, count) in limits.iter().zip(counts) {
        let current_count = count?;
        windows.push(WindowUsage {
            limit: limit.limit,
            time_window_seconds: limit.time_window_seconds,
            current_count,
            remaining: limit.limit.saturating_sub(current_count),
        });
    }

    let remaining = windows.iter().map(|w| w.remaining).min().unwrap_or(UNLIMITED_REMAINING);
    let under_limit = windows.iter().all(|w| w.remaining > 0);

    debug!(
        "Rate limit check for feed {:?} medium {:?}: remaining {}, under limit {}",
        scope.feed_id, scope.medium_id, remaining, under_limit
    );

    Ok(LimitCheck { under_limit, remaining, windows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::InMemoryDeliveryRecordStore;
    use chrono::{Duration, Utc};
    use interfaces::{Article, ArticleDeliveryState, DeliveryRecord, DeliveryStatus};

    async fn store_with_sent(ages_seconds: &[i64]) -> InMemoryDeliveryRecordStore {
        let store = InMemoryDeliveryRecordStore::new();
        for (index, age) in ages_seconds.iter().enumerate() {
            let article = Article::new(format!("a-{}", index));
            let state = ArticleDeliveryState::new(format!("d-{}", index), "m1", &article, DeliveryStatus::Sent);
            store
                .insert_record(DeliveryRecord::from_state("feed-1", &state, Utc::now() - Duration::seconds(*age)))
                .await;
        }
        store
    }

    fn limit(limit: u64, time_window_seconds: u64) -> RateLimit {
        RateLimit { limit, time_window_seconds }
    }

    #[tokio::test]
    async fn remaining_is_minimum_across_windows() -> Result<()> {
        let store = store_with_sent(&[60, 60, 60, 1200]).await;
        let check = get_under_limit_check(
            &store,
            &DeliveryCountFilter::medium("m1"),
            &[limit(10, 3600), limit(4, 600)],
        )
        .await?;

        assert!(check.under_limit);
        assert_eq!(check.remaining, 1);
        assert_eq!(check.windows[0].current_count, 4);
        assert_eq!(check.windows[1].current_count, 3);
        assert_eq!(check.most_restrictive().map(|w| w.time_window_seconds), Some(600));
        Ok(())
    }

    #[tokio::test]
    async fn remaining_floors_at_zero_when_over_limit() -> Result<()> {
        let store = store_with_sent(&[10, 20, 30, 40, 50]).await;
        let check = get_under_limit_check(&store, &DeliveryCountFilter::feed("feed-1"), &[limit(2, 3600)]).await?;

        assert!(!check.under_limit);
        assert_eq!(check.remaining, 0);
        assert_eq!(check.windows[0].current_count, 5);
        Ok(())
    }

    #[tokio::test]
    async fn no_limits_is_unlimited() -> Result<()> {
        let store = store_with_sent(&[10]).await;
        let check = get_under_limit_check(&store, &DeliveryCountFilter::feed("feed-1"), &[]).await?;

        assert!(check.under_limit);
        assert_eq!(check.remaining, UNLIMITED_REMAINING);
        assert!(check.windows.is_empty());
        assert_eq!(check.with_additional(5).remaining, UNLIMITED_REMAINING);
        Ok(())
    }

    #[tokio::test]
    async fn additional_deliveries_are_charged_to_every_window() -> Result<()> {
        let store = store_with_sent(&[10]).await;
        let check = get_under_limit_check(
            &store,
            &DeliveryCountFilter::medium("m1"),
            &[limit(5, 3600), limit(3, 600)],
        )
        .await?
        .with_additional(2);

        assert!(!check.under_limit);
        assert_eq!(check.remaining, 0);
        assert_eq!(check.windows[0].remaining, 2);
        assert_eq!(check.windows[1].current_count, 3);
        Ok(())
    }
}
