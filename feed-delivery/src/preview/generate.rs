use futures::future::join_all;
use interfaces::{ArticleFieldStore, DeliveryRecordStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::channels::DiagnosticChannelClient;
use crate::comparison::compare_and_select_deliverable;
use crate::delivery::{deliver, DeliverOptions};
use crate::preview::context;
use crate::preview::outcome::{aggregate_outcomes, resolve_outcome, Outcome, ResolvedOutcome};
use crate::preview::stages::{
    build_complete_stage_list, FeedStateDetails, StageKind, StageResult, StageStatus, CANONICAL_STAGES,
};
use crate::stores::{ReadOnlyArticleFieldStore, ReadOnlyDeliveryRecordStore};
use crate::types::{Article, ComparisonConfig, Medium, PipelineError, Result, ValidationIssue};
use crate::validation::{validate_comparison_config, validate_mediums};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewFeed {
    pub id: String,
    #[serde(flatten)]
    pub comparisons: ComparisonConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewInput {
    pub feed: PreviewFeed,
    #[serde(default)]
    pub mediums: Vec<Medium>,
    pub article_day_limit: u64,
    /// Everything the feed currently contains.
    pub all_articles: Vec<Article>,
    /// The articles to report on. Each must also appear in `all_articles`.
    pub target_articles: Vec<Article>,
    #[serde(default)]
    pub summary_only: bool,
    /// The caller already knows the feed content did not change.
    #[serde(default)]
    pub feed_unchanged: bool,
}

pub struct PreviewDependencies<'a> {
    pub article_field_store: &'a dyn ArticleFieldStore,
    pub delivery_record_store: &'a dyn DeliveryRecordStore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediumPreviewResult {
    pub medium_id: String,
    pub outcome: Outcome,
    pub outcome_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<StageResult>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticlePreviewResult {
    pub article_id: String,
    pub article_id_hash: String,
    pub article_title: Option<String>,
    pub outcome: Outcome,
    pub outcome_reason: String,
    pub medium_results: Vec<MediumPreviewResult>,
    /// Article-level stages, without any medium-specific results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<StageResult>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewError {
    pub article_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub results: Vec<ArticlePreviewResult>,
    pub errors: Vec<PreviewError>,
    pub stages: Vec<StageKind>,
}

impl PreviewResponse {
    pub fn empty() -> Self {
        Self { results: Vec::new(), errors: Vec::new(), stages: CANONICAL_STAGES.to_vec() }
    }
}

pub fn validate_preview_input(input: &PreviewInput) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if input.feed.id.trim().is_empty() {
        issues.push(ValidationIssue::new("feed.id", "Expected a non-empty feed id"));
    }
    issues.extend(validate_comparison_config(&input.feed.comparisons, "feed"));
    issues.extend(validate_mediums(&input.mediums, "mediums"));

    let known: HashSet<&str> = input.all_articles.iter().map(|a| a.id_hash.as_str()).collect();
    for (index, article) in input.target_articles.iter().enumerate() {
        if !known.contains(article.id_hash.as_str()) {
            issues.push(ValidationIssue::new(
                format!("targetArticles[{}]", index),
                format!("Target article {} is not among allArticles", article.id),
            ));
        }
    }

    issues
}

/// Reports what live delivery would do for each target article, without
/// writing anything or contacting any delivery channel.
pub async fn generate_preview(input: &PreviewInput, deps: &PreviewDependencies<'_>) -> Result<PreviewResponse> {
    let issues = validate_preview_input(input);
    if !issues.is_empty() {
        return Err(PipelineError::Validation(issues));
    }

    if input.target_articles.is_empty() {
        return Ok(PreviewResponse::empty());
    }

    let mut target_hashes: Vec<String> = Vec::new();
    for article in &input.target_articles {
        if !target_hashes.contains(&article.id_hash) {
            target_hashes.push(article.id_hash.clone());
        }
    }

    let article_store = ReadOnlyArticleFieldStore::new(deps.article_field_store);
    let record_store = ReadOnlyDeliveryRecordStore::new(deps.delivery_record_store);
    let channel_client = DiagnosticChannelClient;

    let (logs, errors) = context::start_context(target_hashes.clone(), async {
        if input.feed_unchanged {
            context::record_for_targets(&input.target_articles, |_| {
                Some(StageResult::feed_state(
                    StageStatus::Passed,
                    FeedStateDetails {
                        has_prior_articles: true,
                        is_first_run: false,
                        stored_comparison_names: Vec::new(),
                    },
                ))
            });
            context::end_early();
            return Ok::<_, PipelineError>((context::all_logs(), Vec::new()));
        }

        let mut field_batch = article_store.start_context();
        let comparison = compare_and_select_deliverable(
            &article_store,
            field_batch.as_mut(),
            &input.feed.id,
            &input.all_articles,
            &input.feed.comparisons,
        )
        .await?;

        let options = DeliverOptions {
            feed_id: &input.feed.id,
            article_day_limit: input.article_day_limit,
            delivery_record_store: &record_store,
            channel_client: &channel_client,
            event_publisher: None,
        };

        let simulations = comparison
            .articles_to_deliver
            .iter()
            .filter(|article| target_hashes.contains(&article.id_hash))
            .map(|article| {
                let options = &options;
                let record_store = &record_store;
                async move {
                    let mut record_batch = record_store.start_context();
                    let outcome = deliver(
                        std::slice::from_ref(article),
                        &input.mediums,
                        options,
                        record_batch.as_mut(),
                    )
                    .await;
                    (article, outcome)
                }
            });

        let mut errors = Vec::new();
        for (article, outcome) in join_all(simulations).await {
            if let Err(e) = outcome {
                warn!("Preview simulation failed for article {}: {}", article.id, e);
                errors.push(PreviewError { article_id: article.id.clone(), message: e.to_string() });
            }
        }

        Ok((context::all_logs(), errors))
    })
    .await?;

    let failed: HashMap<&str, &str> = errors
        .iter()
        .map(|error| (error.article_id.as_str(), error.message.as_str()))
        .collect();

    let mut results = Vec::with_capacity(input.target_articles.len());
    for article in &input.target_articles {
        let log = logs.get(&article.id_hash).map(Vec::as_slice).unwrap_or(&[]);
        let error = failed.get(article.id.as_str()).copied();
        results.push(build_article_result(article, log, input, error));
    }

    info!(
        "Generated preview for feed {}: {} results, {} errors",
        input.feed.id,
        results.len(),
        errors.len()
    );

    Ok(PreviewResponse { results, errors, stages: CANONICAL_STAGES.to_vec() })
}

fn build_article_result(
    article: &Article,
    log: &[StageResult],
    input: &PreviewInput,
    error: Option<&str>,
) -> ArticlePreviewResult {
    let shared: Vec<StageResult> = log
        .iter()
        .filter(|stage| !stage.kind().is_medium_specific())
        .cloned()
        .collect();

    let medium_results: Vec<MediumPreviewResult> = input
        .mediums
        .iter()
        .map(|medium| {
            let combined: Vec<StageResult> = shared
                .iter()
                .cloned()
                .chain(
                    log.iter()
                        .filter(|stage| stage.medium_id() == Some(medium.id.as_str()))
                        .cloned(),
                )
                .collect();
            let complete = build_complete_stage_list(&combined);
            let resolved = apply_overrides(resolve_outcome(&complete), input.feed_unchanged, error);
            MediumPreviewResult {
                medium_id: medium.id.clone(),
                outcome: resolved.outcome,
                outcome_reason: resolved.outcome_reason,
                stages: (!input.summary_only).then_some(complete),
            }
        })
        .collect();

    let shared_complete = build_complete_stage_list(&shared);
    let per_medium: Vec<ResolvedOutcome> = medium_results
        .iter()
        .map(|result| ResolvedOutcome {
            outcome: result.outcome,
            outcome_reason: result.outcome_reason.clone(),
        })
        .collect();
    let resolved = aggregate_outcomes(&per_medium)
        .unwrap_or_else(|| apply_overrides(resolve_outcome(&shared_complete), input.feed_unchanged, error));

    ArticlePreviewResult {
        article_id: article.id.clone(),
        article_id_hash: article.id_hash.clone(),
        article_title: article.title().map(str::to_string),
        outcome: resolved.outcome,
        outcome_reason: resolved.outcome_reason,
        medium_results,
        stages: (!input.summary_only).then_some(shared_complete),
    }
}

fn apply_overrides(resolved: ResolvedOutcome, feed_unchanged: bool, error: Option<&str>) -> ResolvedOutcome {
    if let Some(message) = error {
        return ResolvedOutcome {
            outcome: Outcome::FeedError,
            outcome_reason: format!("{} {}", Outcome::FeedError.default_reason(), message),
        };
    }
    if feed_unchanged {
        return ResolvedOutcome::new(Outcome::FeedUnchanged);
    }
    resolved
}
