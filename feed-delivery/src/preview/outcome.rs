use serde::{Deserialize, Serialize};

use crate::preview::stages::{StageKind, StageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    WouldDeliver,
    WouldDeliverPassingComparison,
    FilteredByMediumFilter,
    RateLimitedMedium,
    FilteredByDateCheck,
    RateLimitedFeed,
    BlockedByComparison,
    DuplicateId,
    FirstRunBaseline,
    FeedUnchanged,
    FeedError,
    MixedResults,
}

impl Outcome {
    /// Position in the severity order, least severe first. Mixed results sit outside it.
    pub fn severity(&self) -> Option<usize> {
        const ORDER: [Outcome; 11] = [
            Outcome::WouldDeliver,
            Outcome::WouldDeliverPassingComparison,
            Outcome::FilteredByMediumFilter,
            Outcome::RateLimitedMedium,
            Outcome::FilteredByDateCheck,
            Outcome::RateLimitedFeed,
            Outcome::BlockedByComparison,
            Outcome::DuplicateId,
            Outcome::FirstRunBaseline,
            Outcome::FeedUnchanged,
            Outcome::FeedError,
        ];
        ORDER.iter().position(|outcome| outcome == self)
    }

    pub fn default_reason(&self) -> &'static str {
        match self {
            Outcome::WouldDeliver => "Article passes all checks and would be delivered.",
            Outcome::WouldDeliverPassingComparison => {
                "Article ID was already seen, but passes because a comparison field has changed."
            }
            Outcome::FilteredByMediumFilter => {
                "Article filtered out by this connection's filter expression."
            }
            Outcome::RateLimitedMedium => "This connection has reached its rate limit.",
            Outcome::FilteredByDateCheck => {
                "Article is older than the configured date threshold and will not be delivered."
            }
            Outcome::RateLimitedFeed => "Feed has reached its daily article delivery limit.",
            Outcome::BlockedByComparison => "Article blocked by comparison field(s).",
            Outcome::DuplicateId => {
                "Article ID has already been seen and stored. It will not be delivered again."
            }
            Outcome::FirstRunBaseline => {
                "Feed has no prior articles stored. This is a first-run baseline - all current articles will be stored but not delivered."
            }
            Outcome::FeedUnchanged => {
                "Feed content has not changed since the last check. No articles will be processed."
            }
            Outcome::FeedError => "An error occurred while evaluating this article.",
            Outcome::MixedResults => "Mixed results across connections.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedOutcome {
    pub outcome: Outcome,
    pub outcome_reason: String,
}

impl ResolvedOutcome {
    pub fn new(outcome: Outcome) -> Self {
        Self { outcome, outcome_reason: outcome.default_reason().to_string() }
    }
}

fn find(stages: &[StageResult], kind: StageKind) -> Option<&StageResult> {
    stages.iter().find(|stage| stage.kind() == kind)
}

fn failed(stages: &[StageResult], kind: StageKind) -> bool {
    find(stages, kind).map_or(false, StageResult::failed)
}

/// Maps a canonical stage list to the first applicable outcome.
pub fn resolve_outcome(stages: &[StageResult]) -> ResolvedOutcome {
    if let Some(StageResult::FeedState { details: Some(details), .. }) = find(stages, StageKind::FeedState) {
        if details.is_first_run {
            return ResolvedOutcome::new(Outcome::FirstRunBaseline);
        }
    }

    if failed(stages, StageKind::IdComparison) {
        let readmitted = find(stages, StageKind::PassingComparison).map_or(false, StageResult::passed);
        return if readmitted {
            ResolvedOutcome::new(Outcome::WouldDeliverPassingComparison)
        } else {
            ResolvedOutcome::new(Outcome::DuplicateId)
        };
    }

    if let Some(stage) = find(stages, StageKind::BlockingComparison).filter(|stage| stage.failed()) {
        let fields = match stage {
            StageResult::BlockingComparison { details: Some(details), .. } => {
                details.blocked_by_fields.join(", ")
            }
            _ => String::new(),
        };
        return ResolvedOutcome {
            outcome: Outcome::BlockedByComparison,
            outcome_reason: format!("Article blocked by comparison field(s): {}", fields),
        };
    }

    let ordered = [
        (StageKind::DateCheck, Outcome::FilteredByDateCheck),
        (StageKind::FeedRateLimit, Outcome::RateLimitedFeed),
        (StageKind::MediumRateLimit, Outcome::RateLimitedMedium),
        (StageKind::MediumFilter, Outcome::FilteredByMediumFilter),
    ];
    for (kind, outcome) in ordered {
        if failed(stages, kind) {
            return ResolvedOutcome::new(outcome);
        }
    }

    ResolvedOutcome::new(Outcome::WouldDeliver)
}

/// Article-level outcome from the per-medium outcomes.
pub fn aggregate_outcomes(per_medium: &[ResolvedOutcome]) -> Option<ResolvedOutcome> {
    let first = per_medium.first()?;
    if per_medium.iter().all(|resolved| resolved.outcome == first.outcome) {
        return Some(first.clone());
    }

    let most_severe = per_medium
        .iter()
        .max_by_key(|resolved| resolved.outcome.severity())
        .map(|resolved| resolved.outcome)
        .unwrap_or(first.outcome);

    Some(ResolvedOutcome {
        outcome: Outcome::MixedResults,
        outcome_reason: format!(
            "{} Most restrictive: {:?}.",
            Outcome::MixedResults.default_reason(),
            most_severe
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preview::stages::{
        build_complete_stage_list, BlockingComparisonDetails, FeedStateDetails, StageStatus,
    };

    fn first_run() -> StageResult {
        StageResult::feed_state(
            StageStatus::Failed,
            FeedStateDetails {
                has_prior_articles: false,
                is_first_run: true,
                stored_comparison_names: Vec::new(),
            },
        )
    }

    #[test]
    fn skipped_everything_would_deliver() {
        let stages = build_complete_stage_list(&[]);
        assert_eq!(resolve_outcome(&stages).outcome, Outcome::WouldDeliver);
    }

    #[test]
    fn first_run_overrides_every_other_stage() {
        let mut stages = build_complete_stage_list(&[first_run()]);
        for stage in stages.iter_mut().skip(1) {
            *stage = match stage.kind() {
                StageKind::BlockingComparison => StageResult::blocking_comparison(
                    StageStatus::Failed,
                    BlockingComparisonDetails {
                        comparison_fields: vec!["title".to_string()],
                        active_fields: vec!["title".to_string()],
                        blocked_by_fields: vec!["title".to_string()],
                    },
                ),
                _ => StageResult::skipped(stage.kind()),
            };
        }
        let resolved = resolve_outcome(&stages);
        assert_eq!(resolved.outcome, Outcome::FirstRunBaseline);
        assert!(resolved.outcome_reason.contains("first-run baseline"));
    }

    #[test]
    fn blocked_reason_names_fields() {
        let stages = build_complete_stage_list(&[StageResult::blocking_comparison(
            StageStatus::Failed,
            BlockingComparisonDetails {
                comparison_fields: vec!["title".to_string(), "link".to_string()],
                active_fields: vec!["title".to_string(), "link".to_string()],
                blocked_by_fields: vec!["link".to_string()],
            },
        )]);
        let resolved = resolve_outcome(&stages);
        assert_eq!(resolved.outcome, Outcome::BlockedByComparison);
        assert_eq!(resolved.outcome_reason, "Article blocked by comparison field(s): link");
    }

    #[test]
    fn aggregation_rules() {
        let deliver = ResolvedOutcome::new(Outcome::WouldDeliver);
        let filtered = ResolvedOutcome::new(Outcome::FilteredByMediumFilter);

        let same = aggregate_outcomes(&[deliver.clone(), deliver.clone()]);
        assert_eq!(same.map(|r| r.outcome), Some(Outcome::WouldDeliver));

        let mixed = aggregate_outcomes(&[deliver, filtered]).expect("two mediums");
        assert_eq!(mixed.outcome, Outcome::MixedResults);
        assert!(mixed.outcome_reason.contains("FilteredByMediumFilter"));

        assert_eq!(aggregate_outcomes(&[]), None);
    }
}
