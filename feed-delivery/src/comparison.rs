use chrono::{DateTime, Utc};
use interfaces::{hash_value, ArticleFieldContext, ArticleFieldStore, Partition};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::config::DEFAULT_DATE_PLACEHOLDERS;
use crate::preview::context;
use crate::preview::stages::{
    BlockingComparisonDetails, DateCheckDetails, FeedStateDetails, IdComparisonDetails,
    PassingComparisonDetails, StageResult, StageStatus,
};
use crate::types::{Article, ComparisonConfig, DateCheckOptions, Result};
use crate::utils::parse_article_date;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComparisonResult {
    /// Oldest first.
    pub articles_to_deliver: Vec<Article>,
    pub articles_blocked: Vec<Article>,
    pub articles_passed: Vec<Article>,
    pub is_first_run: bool,
}

/// Decides which of a feed's current articles are new or changed enough to deliver.
///
/// Reads go to `store`; every write is buffered in `batch` and only becomes
/// visible once the caller flushes it.
pub async fn compare_and_select_deliverable(
    store: &dyn ArticleFieldStore,
    batch: &mut dyn ArticleFieldContext,
    feed_id: &str,
    articles: &[Article],
    config: &ComparisonConfig,
) -> Result<ComparisonResult> {
    let all_comparisons = config.all_comparisons();

    if articles.is_empty() {
        debug!("No articles to compare for feed {}", feed_id);
        return Ok(ComparisonResult::default());
    }

    // One fetch may list the same id more than once; the first occurrence wins.
    let mut seen_hashes = HashSet::new();
    let unique: Vec<Article> = articles
        .iter()
        .filter(|article| seen_hashes.insert(article.id_hash.as_str()))
        .cloned()
        .collect();
    if unique.len() < articles.len() {
        debug!(
            "Feed {}: dropped {} repeated article ids",
            feed_id,
            articles.len() - unique.len()
        );
    }
    let articles = unique.as_slice();

    if !store.has_prior_articles_stored(feed_id).await? {
        context::record_for_targets(articles, |_| {
            Some(StageResult::feed_state(
                StageStatus::Failed,
                FeedStateDetails {
                    has_prior_articles: false,
                    is_first_run: true,
                    stored_comparison_names: Vec::new(),
                },
            ))
        });

        batch.store_articles(feed_id, articles, &all_comparisons).await?;
        if !all_comparisons.is_empty() {
            batch.store_comparison_names(feed_id, &all_comparisons).await?;
        }

        info!(
            "First run for feed {}: stored {} articles as baseline",
            feed_id,
            articles.len()
        );
        return Ok(ComparisonResult { is_first_run: true, ..Default::default() });
    }

    let stored_names = store.get_stored_comparison_names(feed_id).await?;
    let mut stored_sorted: Vec<String> = stored_names.iter().cloned().collect();
    stored_sorted.sort();
    context::record_for_targets(articles, |_| {
        Some(StageResult::feed_state(
            StageStatus::Passed,
            FeedStateDetails {
                has_prior_articles: true,
                is_first_run: false,
                stored_comparison_names: stored_sorted.clone(),
            },
        ))
    });

    let active_blocking = active_fields(&config.blocking_comparisons, &stored_names);
    let active_passing = active_fields(&config.passing_comparisons, &stored_names);
    let unstored: Vec<String> = all_comparisons
        .iter()
        .filter(|name| !stored_names.contains(*name))
        .cloned()
        .collect();

    let id_hashes: Vec<String> = articles.iter().map(|article| article.id_hash.clone()).collect();
    let found_hot = store.find_stored_article_ids(feed_id, &id_hashes, Partition::Hot).await?;
    let not_hot: Vec<String> = id_hashes
        .iter()
        .filter(|hash| !found_hot.contains(*hash))
        .cloned()
        .collect();
    let found_cold = if not_hot.is_empty() {
        HashSet::new()
    } else {
        store.find_stored_article_ids(feed_id, &not_hot, Partition::Cold).await?
    };

    context::record_for_targets(articles, |article| {
        let in_hot = found_hot.contains(&article.id_hash);
        let in_cold = found_cold.contains(&article.id_hash);
        let is_new = !in_hot && !in_cold;
        Some(StageResult::id_comparison(
            StageStatus::from_passed(is_new),
            IdComparisonDetails {
                article_id_hash: article.id_hash.clone(),
                found_in_hot_partition: in_hot,
                found_in_cold_partition: in_cold,
                is_new,
            },
        ))
    });

    let (new_articles, seen_articles): (Vec<Article>, Vec<Article>) = articles
        .iter()
        .cloned()
        .partition(|article| !found_hot.contains(&article.id_hash) && !found_cold.contains(&article.id_hash));
    let restored: Vec<Article> = seen_articles
        .iter()
        .filter(|article| found_cold.contains(&article.id_hash))
        .cloned()
        .collect();

    let mut past_blocks = Vec::new();
    let mut articles_blocked = Vec::new();
    for article in &new_articles {
        let mut blocked_by = Vec::new();
        for field in &active_blocking {
            if field_value_stored(store, feed_id, article, field).await? == Some(true) {
                blocked_by.push(field.clone());
            }
        }

        if !config.blocking_comparisons.is_empty() && context::is_target(&article.id_hash) {
            context::record(
                &article.id_hash,
                StageResult::blocking_comparison(
                    StageStatus::from_passed(blocked_by.is_empty()),
                    BlockingComparisonDetails {
                        comparison_fields: config.blocking_comparisons.clone(),
                        active_fields: active_blocking.clone(),
                        blocked_by_fields: blocked_by.clone(),
                    },
                ),
            );
        }

        if blocked_by.is_empty() {
            past_blocks.push(article.clone());
        } else {
            debug!("Article {} blocked by fields {:?}", article.id, blocked_by);
            articles_blocked.push(article.clone());
        }
    }

    let mut articles_passed = Vec::new();
    for article in &seen_articles {
        let mut changed = Vec::new();
        for field in &active_passing {
            if field_value_stored(store, feed_id, article, field).await? == Some(false) {
                changed.push(field.clone());
            }
        }

        if !config.passing_comparisons.is_empty() && context::is_target(&article.id_hash) {
            context::record(
                &article.id_hash,
                StageResult::passing_comparison(
                    StageStatus::from_passed(!changed.is_empty()),
                    PassingComparisonDetails {
                        comparison_fields: config.passing_comparisons.clone(),
                        active_fields: active_passing.clone(),
                        changed_fields: changed.clone(),
                    },
                ),
            );
        }

        if !changed.is_empty() {
            debug!("Seen article {} passes on changed fields {:?}", article.id, changed);
            articles_passed.push(article.clone());
        }
    }

    let mut candidates: Vec<Article> = past_blocks.into_iter().chain(articles_passed.iter().cloned()).collect();
    candidates.reverse();

    let now = Utc::now();
    let mut articles_to_deliver = Vec::with_capacity(candidates.len());
    for article in candidates {
        let check = config
            .date_checks
            .as_ref()
            .and_then(|options| check_article_date(&article, options, now));
        match check {
            Some((within, details)) => {
                if context::is_target(&article.id_hash) {
                    context::record(
                        &article.id_hash,
                        StageResult::date_check(StageStatus::from_passed(within), details),
                    );
                }
                if within {
                    articles_to_deliver.push(article);
                } else {
                    debug!("Article {} is older than the date threshold", article.id);
                }
            }
            None => articles_to_deliver.push(article),
        }
    }

    if !new_articles.is_empty() {
        batch.store_articles(feed_id, &new_articles, &all_comparisons).await?;
    }
    if !restored.is_empty() {
        batch.store_articles(feed_id, &restored, &[]).await?;
    }
    if !seen_articles.is_empty() && !all_comparisons.is_empty() {
        batch.store_article_fields(feed_id, &seen_articles, &all_comparisons).await?;
    }
    if !unstored.is_empty() {
        info!("Feed {} storing new comparison baselines for {:?}", feed_id, unstored);
        batch.store_comparison_names(feed_id, &unstored).await?;
    }

    info!(
        "Feed {}: {} articles, {} new, {} blocked, {} passed, {} to deliver",
        feed_id,
        articles.len(),
        new_articles.len(),
        articles_blocked.len(),
        articles_passed.len(),
        articles_to_deliver.len()
    );

    Ok(ComparisonResult {
        articles_to_deliver,
        articles_blocked,
        articles_passed,
        is_first_run: false,
    })
}

fn active_fields(configured: &[String], stored: &HashSet<String>) -> Vec<String> {
    configured.iter().filter(|name| stored.contains(*name)).cloned().collect()
}

/// Whether the article's value for `field` is already stored. `None` when the
/// article has no usable value, which neither blocks nor passes.
async fn field_value_stored(
    store: &dyn ArticleFieldStore,
    feed_id: &str,
    article: &Article,
    field: &str,
) -> Result<Option<bool>> {
    let value = match article.field(field).filter(|value| !value.is_empty()) {
        Some(value) => value,
        None => return Ok(None),
    };
    let exists = store
        .some_fields_exist(feed_id, &[(field.to_string(), hash_value(value))])
        .await?;
    Ok(Some(exists))
}

/// Evaluates the age threshold. `None` when no threshold is configured.
///
/// The first placeholder holding a parseable date is used. Articles with no
/// date, or dated in the future, are within the threshold.
pub fn check_article_date(
    article: &Article,
    options: &DateCheckOptions,
    now: DateTime<Utc>,
) -> Option<(bool, DateCheckDetails)> {
    let threshold = options.old_article_date_diff_ms_threshold.filter(|ms| *ms > 0)?;
    let placeholders: Vec<String> = options
        .date_placeholders
        .clone()
        .filter(|placeholders| !placeholders.is_empty())
        .unwrap_or_else(|| DEFAULT_DATE_PLACEHOLDERS.iter().map(|p| p.to_string()).collect());

    let date = placeholders.iter().find_map(|key| {
        article
            .raw
            .get(key)
            .or_else(|| article.flattened.get(key))
            .and_then(|value| parse_article_date(value))
    });

    let (within, age_ms) = match date {
        Some(date) => {
            let age_ms = now.signed_duration_since(date).num_milliseconds();
            (age_ms < 0 || age_ms <= threshold, Some(age_ms))
        }
        None => (true, None),
    };

    Some((
        within,
        DateCheckDetails {
            article_date: date.map(|date| date.to_rfc3339()),
            threshold,
            date_placeholders: placeholders,
            age_ms,
            within_threshold: within,
        },
    ))
}
