use interfaces::{
    ChannelResponse, DeliveryChannelClient, DeliveryCountFilter, DeliveryJobMeta, DeliveryRecordContext,
    DeliveryRecordStore, DispatchJob, EventPublisher,
};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SECONDS_PER_DAY;
use crate::delivery_result::{process_delivery_result, publish_remediation, ProcessedDelivery};
use crate::filters::CompiledFilter;
use crate::preview::context;
use crate::preview::stages::{
    FeedRateLimitDetails, MediumFilterDetails, MediumRateLimitDetails, StageResult, StageStatus,
};
use crate::rate_limit::{get_under_limit_check, LimitCheck};
use crate::types::{
    Article, ArticleDeliveryState, DeliveryErrorCode, DeliveryStatus, Medium, RateLimit, Result,
};

/// Collaborators and limits for one delivery batch.
pub struct DeliverOptions<'a> {
    pub feed_id: &'a str,
    pub article_day_limit: u64,
    pub delivery_record_store: &'a dyn DeliveryRecordStore,
    pub channel_client: &'a dyn DeliveryChannelClient,
    pub event_publisher: Option<&'a dyn EventPublisher>,
}

/// Deliveries made earlier in this batch. The store only sees them after a flush.
#[derive(Default)]
struct BatchUsage {
    feed: u64,
    per_medium: HashMap<String, u64>,
}

/// Produces one delivery attempt per (article, medium) pair and buffers the
/// resulting states in `batch`.
///
/// Returned states follow article order, then medium order, then payload part order.
pub async fn deliver(
    articles: &[Article],
    mediums: &[Medium],
    options: &DeliverOptions<'_>,
    batch: &mut dyn DeliveryRecordContext,
) -> Result<Vec<ArticleDeliveryState>> {
    let mut usage = BatchUsage::default();
    let mut states = Vec::new();
    let filters: HashMap<&str, CompiledFilter<'_>> = mediums
        .iter()
        .filter_map(|medium| {
            medium
                .filters
                .as_ref()
                .map(|filters| (medium.id.as_str(), CompiledFilter::new(&filters.expression)))
        })
        .collect();

    for article in articles {
        let feed_limit = [RateLimit {
            limit: options.article_day_limit,
            time_window_seconds: SECONDS_PER_DAY,
        }];
        let feed_check = get_under_limit_check(
            options.delivery_record_store,
            &DeliveryCountFilter::feed(options.feed_id),
            &feed_limit,
        )
        .await?
        .with_additional(usage.feed);

        record_feed_limit(article, &feed_check);

        if !feed_check.under_limit {
            debug!("Feed {} is over its daily limit, skipping article {}", options.feed_id, article.id);
            for medium in mediums {
                states.push(
                    ArticleDeliveryState::new(
                        Uuid::new_v4().to_string(),
                        &medium.id,
                        article,
                        DeliveryStatus::RateLimited,
                    )
                    .with_error(DeliveryErrorCode::Internal, "Feed daily article limit reached"),
                );
            }
            continue;
        }

        for medium in mediums {
            let filter = filters.get(medium.id.as_str());
            let medium_states = deliver_to_medium(article, medium, filter, options, &mut usage).await?;
            states.extend(medium_states);
        }
    }

    if !states.is_empty() {
        batch.store(options.feed_id, &states, false).await?;
    }

    let sent = states
        .iter()
        .filter(|state| state.parent_id.is_none() && state.status.counts_as_delivery())
        .count();
    info!(
        "Feed {}: {} delivery attempts for {} articles, {} delivered or queued",
        options.feed_id,
        states.len(),
        articles.len(),
        sent
    );

    Ok(states)
}

fn record_feed_limit(article: &Article, check: &LimitCheck) {
    if !context::is_target(&article.id_hash) {
        return;
    }
    if let Some(window) = check.windows.first() {
        context::record(
            &article.id_hash,
            StageResult::feed_rate_limit(
                StageStatus::from_passed(check.under_limit),
                FeedRateLimitDetails {
                    current_count: window.current_count,
                    limit: window.limit,
                    time_window_seconds: window.time_window_seconds,
                    remaining: window.remaining,
                    would_exceed: window.remaining == 0,
                },
            ),
        );
    }
}

async fn deliver_to_medium(
    article: &Article,
    medium: &Medium,
    filter: Option<&CompiledFilter<'_>>,
    options: &DeliverOptions<'_>,
    usage: &mut BatchUsage,
) -> Result<Vec<ArticleDeliveryState>> {
    let new_state = |status: DeliveryStatus| {
        ArticleDeliveryState::new(Uuid::new_v4().to_string(), &medium.id, article, status)
    };

    if let (Some(filters), Some(filter)) = (&medium.filters, filter) {
        let result = filter.evaluate(article);
        if context::is_target(&article.id_hash) {
            context::record(
                &article.id_hash,
                StageResult::medium_filter(
                    StageStatus::from_passed(result.passed),
                    MediumFilterDetails {
                        medium_id: medium.id.clone(),
                        filter_expression: Some(filters.expression.clone()),
                        filter_result: result.passed,
                        explain_blocked: result.explain_blocked.clone(),
                        explain_matched: result.explain_matched.clone(),
                    },
                ),
            );
        }

        if !result.passed {
            debug!("Article {} filtered out for medium {}", article.id, medium.id);
            let detail = json!({ "explainBlocked": result.explain_blocked }).to_string();
            return Ok(vec![new_state(DeliveryStatus::FilteredOut).with_external_detail(detail)]);
        }
    }

    if !medium.rate_limits.is_empty() {
        let dispatched = usage.per_medium.get(&medium.id).copied().unwrap_or(0);
        let check = get_under_limit_check(
            options.delivery_record_store,
            &DeliveryCountFilter::medium(&medium.id),
            &medium.rate_limits,
        )
        .await?
        .with_additional(dispatched);

        if let (true, Some(window)) = (context::is_target(&article.id_hash), check.most_restrictive()) {
            context::record(
                &article.id_hash,
                StageResult::medium_rate_limit(
                    StageStatus::from_passed(check.under_limit),
                    MediumRateLimitDetails {
                        medium_id: medium.id.clone(),
                        current_count: window.current_count,
                        limit: window.limit,
                        time_window_seconds: window.time_window_seconds,
                        remaining: window.remaining,
                        would_exceed: window.remaining == 0,
                    },
                ),
            );
        }

        if !check.under_limit {
            debug!("Medium {} is over its rate limit, skipping article {}", medium.id, article.id);
            return Ok(vec![new_state(DeliveryStatus::MediumRateLimitedByUser)]);
        }
    }

    let route = match &medium.route {
        Some(route) => route.clone(),
        None => {
            return Ok(vec![new_state(DeliveryStatus::Failed).with_error(
                DeliveryErrorCode::NoChannelOrWebhook,
                "Medium has no delivery destination configured",
            )]);
        }
    };

    let payloads = options.channel_client.build_payloads(article, &medium.details);
    if payloads.is_empty() {
        return Ok(vec![new_state(DeliveryStatus::Failed).with_error(
            DeliveryErrorCode::ArticleProcessingError,
            "Delivery channel produced no payload for the article",
        )]);
    }

    let mut states = Vec::with_capacity(payloads.len());
    let parent_id = Uuid::new_v4().to_string();

    for (index, payload) in payloads.into_iter().enumerate() {
        let delivery_id = if index == 0 { parent_id.clone() } else { Uuid::new_v4().to_string() };
        let meta = DeliveryJobMeta {
            delivery_id: delivery_id.clone(),
            feed_id: options.feed_id.to_string(),
            medium_id: medium.id.clone(),
            article_id: article.id.clone(),
            article_id_hash: article.id_hash.clone(),
        };
        let job = DispatchJob { route: route.clone(), payload, meta: meta.clone() };

        let mut state = ArticleDeliveryState::new(delivery_id, &medium.id, article, DeliveryStatus::PendingDelivery);
        if index > 0 {
            state = state.with_parent(parent_id.clone());
        }

        let processed = match options.channel_client.dispatch(job).await {
            Ok(ChannelResponse::Queued) => None,
            Ok(ChannelResponse::Completed { status, body }) => {
                Some(process_delivery_result(&meta, Ok((status, &body))))
            }
            Err(err) => Some(process_delivery_result(&meta, Err(&err))),
        };

        if let Some(processed) = processed {
            apply_processed(&mut state, &processed);
            if let (Some(publisher), Some(event)) = (options.event_publisher, processed.remediation.as_ref()) {
                publish_remediation(publisher, event).await;
            }
        }

        let delivered = state.status.counts_as_delivery();
        states.push(state);

        if index == 0 {
            if !delivered {
                break;
            }
            usage.feed += 1;
            *usage.per_medium.entry(medium.id.clone()).or_default() += 1;
        }
    }

    Ok(states)
}

fn apply_processed(state: &mut ArticleDeliveryState, processed: &ProcessedDelivery) {
    state.status = processed.status;
    state.error_code = processed.error_code;
    state.internal_message = processed.internal_message.clone();
    state.external_detail = processed.external_detail.clone();
}
