//! Per-invocation stage recorder used by preview and diagnostic runs.
//!
//! A context is bound to the current tokio task with [`start_context`]. Code
//! anywhere below it records through the free functions in this module; when
//! no context is bound every call is a no-op, so live delivery pays nothing.
//! Spawned tasks do not inherit task-locals, wrap them with [`propagate`].

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::preview::stages::{StageKind, StageResult};
use crate::types::Article;

tokio::task_local! {
    static ACTIVE_CONTEXT: Arc<InstrumentationContext>;
}

pub struct InstrumentationContext {
    targets: Vec<String>,
    target_set: HashSet<String>,
    logs: Mutex<HashMap<String, Vec<StageResult>>>,
    ended: AtomicBool,
}

impl InstrumentationContext {
    fn new(target_hashes: Vec<String>) -> Self {
        let target_set = target_hashes.iter().cloned().collect();
        Self {
            targets: target_hashes,
            target_set,
            logs: Mutex::new(HashMap::new()),
            ended: AtomicBool::new(false),
        }
    }

    fn is_active(&self) -> bool {
        !self.ended.load(Ordering::Acquire)
    }

    fn record(&self, hash: &str, stage: StageResult) {
        if !self.is_active() || !self.target_set.contains(hash) {
            return;
        }
        // A poisoned lock only loses diagnostics.
        if let Ok(mut logs) = self.logs.lock() {
            let log = logs.entry(hash.to_string()).or_default();
            if should_record(log, stage.kind()) {
                log.push(stage);
            }
        }
    }

    fn log_for(&self, hash: &str) -> Vec<StageResult> {
        self.logs
            .lock()
            .ok()
            .and_then(|logs| logs.get(hash).cloned())
            .unwrap_or_default()
    }

    fn all_logs(&self) -> HashMap<String, Vec<StageResult>> {
        self.logs.lock().map(|logs| logs.clone()).unwrap_or_default()
    }
}

/// Decides whether `next` may be appended to an article's stage log.
///
/// A failed terminal stage closes the log. A failed id comparison admits only
/// the passing comparison that could override it; once that passes, the log
/// is open again.
pub fn should_record(log: &[StageResult], next: StageKind) -> bool {
    if log.iter().any(|stage| stage.failed() && stage.kind().is_terminal()) {
        return false;
    }

    let id_failed = log
        .iter()
        .any(|stage| stage.kind() == StageKind::IdComparison && stage.failed());
    if !id_failed {
        return true;
    }

    let passing_recorded = log.iter().find(|stage| stage.kind() == StageKind::PassingComparison);
    match passing_recorded {
        Some(stage) => stage.passed(),
        None => next == StageKind::PassingComparison,
    }
}

/// Runs `body` with a fresh recorder for `target_hashes` bound to this task.
pub async fn start_context<F>(target_hashes: Vec<String>, body: F) -> F::Output
where
    F: Future,
{
    let context = Arc::new(InstrumentationContext::new(target_hashes));
    ACTIVE_CONTEXT.scope(context, body).await
}

/// Handle to the recorder bound to the current task.
#[derive(Clone)]
pub struct ContextHandle(Arc<InstrumentationContext>);

pub fn current() -> Option<ContextHandle> {
    ACTIVE_CONTEXT.try_with(|context| ContextHandle(context.clone())).ok()
}

/// Carries the current recorder, if any, into a future that will run on another task.
pub fn propagate<F>(future: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let handle = current();
    async move {
        match handle {
            Some(ContextHandle(context)) => ACTIVE_CONTEXT.scope(context, future).await,
            None => future.await,
        }
    }
}

pub fn is_active() -> bool {
    ACTIVE_CONTEXT.try_with(|context| context.is_active()).unwrap_or(false)
}

/// First target hash, for single-article callers.
pub fn target_hash() -> Option<String> {
    ACTIVE_CONTEXT
        .try_with(|context| context.targets.first().cloned())
        .ok()
        .flatten()
}

pub fn is_target(hash: &str) -> bool {
    ACTIVE_CONTEXT
        .try_with(|context| context.is_active() && context.target_set.contains(hash))
        .unwrap_or(false)
}

pub fn record(hash: &str, stage: StageResult) {
    let _ = ACTIVE_CONTEXT.try_with(|context| context.record(hash, stage));
}

/// Records the stage `build` returns for every target article in `articles`.
///
/// `build` is only invoked for targets; returning `None` records nothing.
pub fn record_for_targets<F>(articles: &[Article], mut build: F)
where
    F: FnMut(&Article) -> Option<StageResult>,
{
    if !is_active() {
        return;
    }
    for article in articles.iter().filter(|article| is_target(&article.id_hash)) {
        if let Some(stage) = build(article) {
            record(&article.id_hash, stage);
        }
    }
}

pub fn log_for(hash: &str) -> Vec<StageResult> {
    ACTIVE_CONTEXT
        .try_with(|context| context.log_for(hash))
        .unwrap_or_default()
}

pub fn all_logs() -> HashMap<String, Vec<StageResult>> {
    ACTIVE_CONTEXT
        .try_with(|context| context.all_logs())
        .unwrap_or_default()
}

/// Stops further recording in the current context. Logs already captured stay readable.
pub fn end_early() {
    let _ = ACTIVE_CONTEXT.try_with(|context| context.ended.store(true, Ordering::Release));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::stages::{
        FeedRateLimitDetails, IdComparisonDetails, PassingComparisonDetails, StageStatus,
    };

    fn id_stage(status: StageStatus) -> StageResult {
        StageResult::id_comparison(
            status,
            IdComparisonDetails {
                article_id_hash: "h".to_string(),
                found_in_hot_partition: status == StageStatus::Failed,
                found_in_cold_partition: false,
                is_new: status == StageStatus::Passed,
            },
        )
    }

    fn passing_stage(status: StageStatus) -> StageResult {
        StageResult::passing_comparison(
            status,
            PassingComparisonDetails {
                comparison_fields: vec!["title".to_string()],
                active_fields: vec!["title".to_string()],
                changed_fields: Vec::new(),
            },
        )
    }

    fn feed_limit_stage(status: StageStatus) -> StageResult {
        StageResult::feed_rate_limit(
            status,
            FeedRateLimitDetails {
                current_count: 0,
                limit: 1,
                time_window_seconds: 86_400,
                remaining: 1,
                would_exceed: false,
            },
        )
    }

    #[test]
    fn terminal_failure_closes_the_log() {
        let log = vec![id_stage(StageStatus::Passed), feed_limit_stage(StageStatus::Failed)];
        for kind in [StageKind::MediumFilter, StageKind::MediumRateLimit, StageKind::PassingComparison] {
            assert!(!should_record(&log, kind));
        }
    }

    #[test]
    fn id_failure_only_admits_passing_comparison() {
        let log = vec![id_stage(StageStatus::Failed)];
        assert!(should_record(&log, StageKind::PassingComparison));
        assert!(!should_record(&log, StageKind::DateCheck));
        assert!(!should_record(&log, StageKind::MediumFilter));
    }

    #[test]
    fn passing_override_reopens_the_log() {
        let readmitted = vec![id_stage(StageStatus::Failed), passing_stage(StageStatus::Passed)];
        assert!(should_record(&readmitted, StageKind::DateCheck));
        assert!(should_record(&readmitted, StageKind::FeedRateLimit));

        let rejected = vec![id_stage(StageStatus::Failed), passing_stage(StageStatus::Failed)];
        assert!(!should_record(&rejected, StageKind::DateCheck));
        assert!(!should_record(&rejected, StageKind::PassingComparison));
    }

    #[test]
    fn non_terminal_failures_do_not_suppress() {
        let log = vec![
            id_stage(StageStatus::Passed),
            StageResult::skipped(StageKind::MediumFilter),
        ];
        assert!(should_record(&log, StageKind::MediumRateLimit));
    }

    #[tokio::test]
    async fn inactive_outside_a_context() {
        assert!(!is_active());
        assert_eq!(target_hash(), None);
        record("h1", id_stage(StageStatus::Passed));
        assert!(all_logs().is_empty());
        assert!(log_for("h1").is_empty());
    }

    #[tokio::test]
    async fn records_only_target_hashes() {
        let logs = start_context(vec!["h1".to_string(), "h2".to_string()], async {
            assert!(is_active());
            assert_eq!(target_hash().as_deref(), Some("h1"));
            record("h1", id_stage(StageStatus::Passed));
            record("other", id_stage(StageStatus::Passed));
            record("h1", feed_limit_stage(StageStatus::Passed));
            all_logs()
        })
        .await;

        assert_eq!(logs.len(), 1);
        let kinds: Vec<StageKind> = logs["h1"].iter().map(StageResult::kind).collect();
        assert_eq!(kinds, vec![StageKind::IdComparison, StageKind::FeedRateLimit]);
    }

    #[tokio::test]
    async fn body_errors_propagate() {
        let result: std::result::Result<(), String> =
            start_context(vec!["h1".to_string()], async { Err("store down".to_string()) }).await;
        assert_eq!(result, Err("store down".to_string()));
    }

    #[tokio::test]
    async fn end_early_keeps_logs_and_ignores_later_records() {
        let logs = start_context(vec!["h1".to_string()], async {
            record("h1", id_stage(StageStatus::Passed));
            end_early();
            assert!(!is_active());
            record("h1", feed_limit_stage(StageStatus::Passed));
            log_for("h1")
        })
        .await;
        assert_eq!(logs.len(), 1);
    }

    #[tokio::test]
    async fn record_for_targets_skips_absent_and_none() {
        let a = Article::new("a");
        let b = Article::new("b");
        let c = Article::new("c");
        let targets = vec![a.id_hash.clone(), b.id_hash.clone(), "missing".to_string()];
        let articles = vec![a.clone(), b.clone(), c.clone()];

        let logs = start_context(targets, async {
            let mut built = Vec::new();
            record_for_targets(&articles, |article| {
                built.push(article.id.clone());
                (article.id == "a").then(|| id_stage(StageStatus::Passed))
            });
            (built, all_logs())
        })
        .await;

        assert_eq!(logs.0, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(logs.1.len(), 1);
        assert!(logs.1.contains_key(&a.id_hash));
    }

    #[tokio::test]
    async fn propagate_carries_context_into_spawned_tasks() {
        let logs = start_context(vec!["h1".to_string()], async {
            let spawned = tokio::spawn(propagate(async {
                record("h1", id_stage(StageStatus::Passed));
            }));
            let _ = spawned.await;
            tokio::spawn(async {
                record("h1", feed_limit_stage(StageStatus::Passed));
            })
            .await
            .ok();
            log_for("h1")
        })
        .await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].kind(), StageKind::IdComparison);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_contexts_are_isolated() {
        let first = tokio::spawn(start_context(vec!["a".to_string()], async {
            for _ in 0..50 {
                record("a", id_stage(StageStatus::Passed));
                record("b", id_stage(StageStatus::Passed));
                tokio::task::yield_now().await;
            }
            all_logs()
        }));
        let second = tokio::spawn(start_context(vec!["b".to_string()], async {
            for _ in 0..50 {
                record("b", feed_limit_stage(StageStatus::Passed));
                record("a", feed_limit_stage(StageStatus::Passed));
                tokio::task::yield_now().await;
            }
            all_logs()
        }));

        let first = first.await.expect("first context task");
        let second = second.await.expect("second context task");

        assert_eq!(first.keys().collect::<Vec<_>>(), vec!["a"]);
        assert!(first["a"].iter().all(|s| s.kind() == StageKind::IdComparison));
        assert_eq!(second.keys().collect::<Vec<_>>(), vec!["b"]);
        assert!(second["b"].iter().all(|s| s.kind() == StageKind::FeedRateLimit));
    }
}
