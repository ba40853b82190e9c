use interfaces::{
    ArticleFieldContext, ArticleFieldStore, DeliveryChannelClient, DeliveryRecordContext, DeliveryRecordStore,
    EventPublisher,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::comparison::compare_and_select_deliverable;
use crate::delivery::{deliver, DeliverOptions};
use crate::types::{Article, ArticleDeliveryState, ComparisonConfig, Medium, PipelineError, Result};
use crate::validation::{validate_comparison_config, validate_mediums};

/// A freshly parsed feed, ready for the decision pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEvent {
    pub feed_id: String,
    #[serde(default)]
    pub comparisons: ComparisonConfig,
    #[serde(default)]
    pub mediums: Vec<Medium>,
    pub article_day_limit: u64,
    pub articles: Vec<Article>,
}

pub struct FeedEventDependencies<'a> {
    pub article_field_store: &'a dyn ArticleFieldStore,
    pub delivery_record_store: &'a dyn DeliveryRecordStore,
    pub channel_client: &'a dyn DeliveryChannelClient,
    pub event_publisher: Option<&'a dyn EventPublisher>,
}

/// Runs comparison and delivery for one feed event.
///
/// Both batches are flushed whether or not the pipeline succeeded.
pub async fn handle_feed_event(event: &FeedEvent, deps: &FeedEventDependencies<'_>) -> Result<Vec<ArticleDeliveryState>> {
    let mut issues = validate_comparison_config(&event.comparisons, "comparisons");
    issues.extend(validate_mediums(&event.mediums, "mediums"));
    if !issues.is_empty() {
        return Err(PipelineError::Validation(issues));
    }

    let mut record_batch = deps.delivery_record_store.start_context();
    let mut field_batch = deps.article_field_store.start_context();

    let outcome = run_pipeline(event, deps, field_batch.as_mut(), record_batch.as_mut()).await;

    let records_flushed = record_batch.flush_pending_inserts().await;
    let fields_flushed = field_batch.flush_pending_inserts().await;

    if let Err(e) = &records_flushed {
        error!("Failed to flush delivery records for feed {}: {}", event.feed_id, e);
    }
    if let Err(e) = &fields_flushed {
        error!("Failed to flush article fields for feed {}: {}", event.feed_id, e);
    }

    let states = outcome?;
    records_flushed?;
    fields_flushed?;
    Ok(states)
}

async fn run_pipeline(
    event: &FeedEvent,
    deps: &FeedEventDependencies<'_>,
    field_batch: &mut dyn ArticleFieldContext,
    record_batch: &mut dyn DeliveryRecordContext,
) -> Result<Vec<ArticleDeliveryState>> {
    let comparison = compare_and_select_deliverable(
        deps.article_field_store,
        field_batch,
        &event.feed_id,
        &event.articles,
        &event.comparisons,
    )
    .await?;

    if comparison.articles_to_deliver.is_empty() {
        info!("Feed {}: nothing to deliver", event.feed_id);
        return Ok(Vec::new());
    }

    let options = DeliverOptions {
        feed_id: &event.feed_id,
        article_day_limit: event.article_day_limit,
        delivery_record_store: deps.delivery_record_store,
        channel_client: deps.channel_client,
        event_publisher: deps.event_publisher,
    };

    deliver(&comparison.articles_to_deliver, &event.mediums, &options, record_batch).await
}

/// Drops all dedup state for a deleted feed.
pub async fn handle_feed_deleted(feed_id: &str, article_field_store: &dyn ArticleFieldStore) -> Result<()> {
    article_field_store.clear(feed_id).await?;
    info!("Cleared dedup state for deleted feed {}", feed_id);
    Ok(())
}
