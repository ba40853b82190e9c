use std::collections::HashSet;

use crate::filters;
use crate::types::{ComparisonConfig, Medium, ValidationIssue};

pub fn validate_comparison_config(config: &ComparisonConfig, path: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let names = config
        .blocking_comparisons
        .iter()
        .map(|name| ("blockingComparisons", name))
        .chain(config.passing_comparisons.iter().map(|name| ("passingComparisons", name)));
    for (list, name) in names {
        if name.trim().is_empty() {
            issues.push(ValidationIssue::new(
                format!("{}.{}", path, list),
                "Comparison names must not be empty",
            ));
        }
    }

    if let Some(threshold) = config
        .date_checks
        .as_ref()
        .and_then(|checks| checks.old_article_date_diff_ms_threshold)
    {
        if threshold < 0 {
            issues.push(ValidationIssue::new(
                format!("{}.dateChecks.oldArticleDateDiffMsThreshold", path),
                "Expected a non-negative threshold",
            ));
        }
    }

    issues
}

pub fn validate_mediums(mediums: &[Medium], path: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut seen = HashSet::new();

    for (index, medium) in mediums.iter().enumerate() {
        let medium_path = format!("{}[{}]", path, index);

        if medium.id.trim().is_empty() {
            issues.push(ValidationIssue::new(format!("{}.id", medium_path), "Expected a non-empty medium id"));
        } else if !seen.insert(medium.id.as_str()) {
            issues.push(ValidationIssue::new(
                format!("{}.id", medium_path),
                format!("Duplicate medium id {}", medium.id),
            ));
        }

        for (limit_index, limit) in medium.rate_limits.iter().enumerate() {
            if limit.limit == 0 {
                issues.push(ValidationIssue::new(
                    format!("{}.rateLimits[{}].limit", medium_path, limit_index),
                    "Expected a positive limit",
                ));
            }
            if limit.time_window_seconds == 0 {
                issues.push(ValidationIssue::new(
                    format!("{}.rateLimits[{}].timeWindowSeconds", medium_path, limit_index),
                    "Expected a positive time window",
                ));
            }
        }

        if let Some(filters) = &medium.filters {
            issues.extend(filters::validate(
                &filters.expression,
                &format!("{}.filters.expression", medium_path),
            ));
        }
    }

    issues
}
