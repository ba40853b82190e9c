use serde::{Deserialize, Serialize};

use crate::filters::{FilterExplanation, FilterExpression};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    FeedState,
    IdComparison,
    BlockingComparison,
    PassingComparison,
    DateCheck,
    FeedRateLimit,
    MediumFilter,
    MediumRateLimit,
}

/// Fixed report order. Part of the public contract.
pub const CANONICAL_STAGES: [StageKind; 8] = [
    StageKind::FeedState,
    StageKind::IdComparison,
    StageKind::BlockingComparison,
    StageKind::PassingComparison,
    StageKind::DateCheck,
    StageKind::FeedRateLimit,
    StageKind::MediumFilter,
    StageKind::MediumRateLimit,
];

impl StageKind {
    /// A failure of one of these ends evaluation for the article.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageKind::FeedState
                | StageKind::BlockingComparison
                | StageKind::DateCheck
                | StageKind::FeedRateLimit
        )
    }

    /// Stages evaluated per medium rather than once per article.
    pub fn is_medium_specific(&self) -> bool {
        matches!(self, StageKind::MediumFilter | StageKind::MediumRateLimit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Passed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn from_passed(passed: bool) -> Self {
        if passed {
            StageStatus::Passed
        } else {
            StageStatus::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStateDetails {
    pub has_prior_articles: bool,
    pub is_first_run: bool,
    pub stored_comparison_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdComparisonDetails {
    pub article_id_hash: String,
    pub found_in_hot_partition: bool,
    pub found_in_cold_partition: bool,
    pub is_new: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingComparisonDetails {
    pub comparison_fields: Vec<String>,
    pub active_fields: Vec<String>,
    pub blocked_by_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassingComparisonDetails {
    pub comparison_fields: Vec<String>,
    pub active_fields: Vec<String>,
    pub changed_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateCheckDetails {
    pub article_date: Option<String>,
    pub threshold: i64,
    pub date_placeholders: Vec<String>,
    pub age_ms: Option<i64>,
    pub within_threshold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRateLimitDetails {
    pub current_count: u64,
    pub limit: u64,
    pub time_window_seconds: u64,
    pub remaining: u64,
    pub would_exceed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediumFilterDetails {
    pub medium_id: String,
    pub filter_expression: Option<FilterExpression>,
    pub filter_result: bool,
    pub explain_blocked: Vec<FilterExplanation>,
    pub explain_matched: Vec<FilterExplanation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediumRateLimitDetails {
    pub medium_id: String,
    pub current_count: u64,
    pub limit: u64,
    pub time_window_seconds: u64,
    pub remaining: u64,
    pub would_exceed: bool,
}

/// One checkpoint's result. `details` is absent only for synthesized skips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage")]
pub enum StageResult {
    FeedState {
        status: StageStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<FeedStateDetails>,
    },
    IdComparison {
        status: StageStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<IdComparisonDetails>,
    },
    BlockingComparison {
        status: StageStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<BlockingComparisonDetails>,
    },
    PassingComparison {
        status: StageStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<PassingComparisonDetails>,
    },
    DateCheck {
        status: StageStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<DateCheckDetails>,
    },
    FeedRateLimit {
        status: StageStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<FeedRateLimitDetails>,
    },
    MediumFilter {
        status: StageStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<MediumFilterDetails>,
    },
    MediumRateLimit {
        status: StageStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<MediumRateLimitDetails>,
    },
}

impl StageResult {
    pub fn feed_state(status: StageStatus, details: FeedStateDetails) -> Self {
        StageResult::FeedState { status, details: Some(details) }
    }

    pub fn id_comparison(status: StageStatus, details: IdComparisonDetails) -> Self {
        StageResult::IdComparison { status, details: Some(details) }
    }

    pub fn blocking_comparison(status: StageStatus, details: BlockingComparisonDetails) -> Self {
        StageResult::BlockingComparison { status, details: Some(details) }
    }

    pub fn passing_comparison(status: StageStatus, details: PassingComparisonDetails) -> Self {
        StageResult::PassingComparison { status, details: Some(details) }
    }

    pub fn date_check(status: StageStatus, details: DateCheckDetails) -> Self {
        StageResult::DateCheck { status, details: Some(details) }
    }

    pub fn feed_rate_limit(status: StageStatus, details: FeedRateLimitDetails) -> Self {
        StageResult::FeedRateLimit { status, details: Some(details) }
    }

    pub fn medium_filter(status: StageStatus, details: MediumFilterDetails) -> Self {
        StageResult::MediumFilter { status, details: Some(details) }
    }

    pub fn medium_rate_limit(status: StageStatus, details: MediumRateLimitDetails) -> Self {
        StageResult::MediumRateLimit { status, details: Some(details) }
    }

    /// Placeholder for a stage that never ran.
    pub fn skipped(kind: StageKind) -> Self {
        let status = StageStatus::Skipped;
        match kind {
            StageKind::FeedState => StageResult::FeedState { status, details: None },
            StageKind::IdComparison => StageResult::IdComparison { status, details: None },
            StageKind::BlockingComparison => StageResult::BlockingComparison { status, details: None },
            StageKind::PassingComparison => StageResult::PassingComparison { status, details: None },
            StageKind::DateCheck => StageResult::DateCheck { status, details: None },
            StageKind::FeedRateLimit => StageResult::FeedRateLimit { status, details: None },
            StageKind::MediumFilter => StageResult::MediumFilter { status, details: None },
            StageKind::MediumRateLimit => StageResult::MediumRateLimit { status, details: None },
        }
    }

    pub fn kind(&self) -> StageKind {
        match self {
            StageResult::FeedState { .. } => StageKind::FeedState,
            StageResult::IdComparison { .. } => StageKind::IdComparison,
            StageResult::BlockingComparison { .. } => StageKind::BlockingComparison,
            StageResult::PassingComparison { .. } => StageKind::PassingComparison,
            StageResult::DateCheck { .. } => StageKind::DateCheck,
            StageResult::FeedRateLimit { .. } => StageKind::FeedRateLimit,
            StageResult::MediumFilter { .. } => StageKind::MediumFilter,
            StageResult::MediumRateLimit { .. } => StageKind::MediumRateLimit,
        }
    }

    pub fn status(&self) -> StageStatus {
        match self {
            StageResult::FeedState { status, .. }
            | StageResult::IdComparison { status, .. }
            | StageResult::BlockingComparison { status, .. }
            | StageResult::PassingComparison { status, .. }
            | StageResult::DateCheck { status, .. }
            | StageResult::FeedRateLimit { status, .. }
            | StageResult::MediumFilter { status, .. }
            | StageResult::MediumRateLimit { status, .. } => *status,
        }
    }

    pub fn passed(&self) -> bool {
        self.status() == StageStatus::Passed
    }

    pub fn failed(&self) -> bool {
        self.status() == StageStatus::Failed
    }

    /// The medium a per-medium stage belongs to.
    pub fn medium_id(&self) -> Option<&str> {
        match self {
            StageResult::MediumFilter { details: Some(details), .. } => Some(&details.medium_id),
            StageResult::MediumRateLimit { details: Some(details), .. } => Some(&details.medium_id),
            _ => None,
        }
    }
}

/// Orders `stages` canonically and fills every missing kind with a skip.
///
/// When a kind appears more than once the first occurrence wins.
pub fn build_complete_stage_list(stages: &[StageResult]) -> Vec<StageResult> {
    CANONICAL_STAGES
        .iter()
        .map(|kind| {
            stages
                .iter()
                .find(|stage| stage.kind() == *kind)
                .cloned()
                .unwrap_or_else(|| StageResult::skipped(*kind))
        })
        .collect()
}
