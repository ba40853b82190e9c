use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::filters::FilterExpression;

pub use interfaces::defs::{
    Article, ArticleDeliveryState, DeliveryErrorCode, DeliveryRecord, DeliveryStatus,
};

/// A configured delivery target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medium {
    pub id: String,
    /// Destination handed to the channel client. No route means nothing to deliver to.
    pub route: Option<String>,
    #[serde(default)]
    pub details: Value,
    pub filters: Option<MediumFilters>,
    #[serde(default)]
    pub rate_limits: Vec<RateLimit>,
}

impl Medium {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            route: Some(format!("medium://{}", id)),
            id,
            details: Value::Null,
            filters: None,
            rate_limits: Vec::new(),
        }
    }

    pub fn with_filter(mut self, expression: FilterExpression) -> Self {
        self.filters = Some(MediumFilters { expression });
        self
    }

    pub fn with_rate_limit(mut self, limit: u64, time_window_seconds: u64) -> Self {
        self.rate_limits.push(RateLimit { limit, time_window_seconds });
        self
    }

    pub fn without_route(mut self) -> Self {
        self.route = None;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediumFilters {
    pub expression: FilterExpression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub limit: u64,
    pub time_window_seconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateCheckOptions {
    pub old_article_date_diff_ms_threshold: Option<i64>,
    pub date_placeholders: Option<Vec<String>>,
}

/// Per-feed comparison settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonConfig {
    #[serde(default)]
    pub blocking_comparisons: Vec<String>,
    #[serde(default)]
    pub passing_comparisons: Vec<String>,
    pub date_checks: Option<DateCheckOptions>,
}

impl ComparisonConfig {
    pub fn with_blocking(mut self, fields: &[&str]) -> Self {
        self.blocking_comparisons = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_passing(mut self, fields: &[&str]) -> Self {
        self.passing_comparisons = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_date_threshold_ms(mut self, threshold: i64) -> Self {
        let mut checks = self.date_checks.take().unwrap_or_default();
        checks.old_article_date_diff_ms_threshold = Some(threshold);
        self.date_checks = Some(checks);
        self
    }

    /// Blocking and passing names, deduplicated, in configuration order.
    pub fn all_comparisons(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.blocking_comparisons.iter().chain(self.passing_comparisons.iter()) {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

/// One problem found while validating caller input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into() }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

// Error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] interfaces::StoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid input: {}", format_issues(.0))]
    Validation(Vec<ValidationIssue>),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_convert_into_pipeline_errors() {
        let err: PipelineError = interfaces::StoreError::RecordNotFound { id: "d-1".to_string() }.into();
        assert!(matches!(err, PipelineError::Store(_)));
    }

    #[test]
    fn validation_error_lists_every_issue() {
        let err = PipelineError::Validation(vec![
            ValidationIssue::new("feed.id", "Expected a non-empty feed id"),
            ValidationIssue::new("mediums[0].id", "Duplicate medium id m1"),
        ]);
        assert_eq!(
            err.to_string(),
            "Invalid input: feed.id: Expected a non-empty feed id; mediums[0].id: Duplicate medium id m1"
        );
    }
}
