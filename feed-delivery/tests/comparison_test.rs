mod common;

use chrono::{Duration, Utc};
use common::{article, init_tracing, FEED_ID};
use feed_delivery::{compare_and_select_deliverable, ComparisonConfig, ComparisonResult, InMemoryArticleFieldStore, Result};
use interfaces::{ArticleFieldStore, Partition};

async fn run(store: &InMemoryArticleFieldStore, articles: &[feed_delivery::Article], config: &ComparisonConfig) -> Result<ComparisonResult> {
    let mut batch = store.start_context();
    let result = compare_and_select_deliverable(store, batch.as_mut(), FEED_ID, articles, config).await?;
    batch.flush_pending_inserts().await?;
    Ok(result)
}

fn ids(result: &ComparisonResult) -> Vec<&str> {
    result.articles_to_deliver.iter().map(|a| a.id.as_str()).collect()
}

#[tokio::test]
async fn test_first_run_stores_baseline_without_delivering() -> Result<()> {
    init_tracing();
    let store = InMemoryArticleFieldStore::new();
    let config = ComparisonConfig::default().with_blocking(&["title"]);
    let articles = vec![article("a", "Alpha"), article("b", "Beta")];

    let first = run(&store, &articles, &config).await?;
    assert!(first.is_first_run);
    assert!(first.articles_to_deliver.is_empty());

    let second = run(&store, &articles, &config).await?;
    assert!(!second.is_first_run);
    assert!(second.articles_to_deliver.is_empty());

    let names = store.get_stored_comparison_names(FEED_ID).await?;
    assert!(names.contains("title"));
    Ok(())
}

#[tokio::test]
async fn test_unflushed_writes_are_not_visible() -> Result<()> {
    init_tracing();
    let store = InMemoryArticleFieldStore::new();
    let config = ComparisonConfig::default();
    let articles = vec![article("a", "Alpha")];

    let mut batch = store.start_context();
    let first = compare_and_select_deliverable(&store, batch.as_mut(), FEED_ID, &articles, &config).await?;
    assert!(first.is_first_run);
    assert!(!store.has_prior_articles_stored(FEED_ID).await?);

    let written = batch.flush_pending_inserts().await?;
    assert!(written > 0);
    assert!(store.has_prior_articles_stored(FEED_ID).await?);
    Ok(())
}

#[tokio::test]
async fn test_new_articles_are_delivered_oldest_first() -> Result<()> {
    init_tracing();
    let store = InMemoryArticleFieldStore::new();
    let config = ComparisonConfig::default();
    run(&store, &[article("a", "Alpha")], &config).await?;

    // Feeds list newest first.
    let current = vec![article("c", "Gamma"), article("b", "Beta"), article("a", "Alpha")];
    let result = run(&store, &current, &config).await?;

    assert_eq!(ids(&result), vec!["b", "c"]);
    Ok(())
}

#[tokio::test]
async fn test_blocking_comparison_excludes_repeated_title() -> Result<()> {
    init_tracing();
    let store = InMemoryArticleFieldStore::new();
    let config = ComparisonConfig::default().with_blocking(&["title"]);
    run(&store, &[article("a", "Shared headline")], &config).await?;

    let current = vec![article("b", "Shared headline"), article("c", "Fresh headline")];
    let result = run(&store, &current, &config).await?;

    assert_eq!(ids(&result), vec!["c"]);
    assert_eq!(result.articles_blocked.len(), 1);
    assert_eq!(result.articles_blocked[0].id, "b");
    Ok(())
}

#[tokio::test]
async fn test_missing_field_does_not_block() -> Result<()> {
    init_tracing();
    let store = InMemoryArticleFieldStore::new();
    let config = ComparisonConfig::default().with_blocking(&["author"]);
    run(&store, &[article("a", "Alpha").with_field("author", "Ann")], &config).await?;

    let result = run(&store, &[article("b", "Beta")], &config).await?;

    assert_eq!(ids(&result), vec!["b"]);
    assert!(result.articles_blocked.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_passing_comparison_readmits_changed_article() -> Result<()> {
    init_tracing();
    let store = InMemoryArticleFieldStore::new();
    let config = ComparisonConfig::default().with_passing(&["title"]);
    run(&store, &[article("a", "Original title")], &config).await?;

    let unchanged = run(&store, &[article("a", "Original title")], &config).await?;
    assert!(unchanged.articles_to_deliver.is_empty());

    let changed = run(&store, &[article("a", "Edited title")], &config).await?;
    assert_eq!(ids(&changed), vec!["a"]);
    assert_eq!(changed.articles_passed.len(), 1);

    // The edited value is stored now, so the same edit does not pass twice.
    let repeated = run(&store, &[article("a", "Edited title")], &config).await?;
    assert!(repeated.articles_to_deliver.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_comparison_added_later_starts_as_baseline() -> Result<()> {
    init_tracing();
    let store = InMemoryArticleFieldStore::new();
    run(&store, &[article("a", "Shared headline")], &ComparisonConfig::default()).await?;

    // "title" has no stored baseline yet, so it cannot block on this run.
    let config = ComparisonConfig::default().with_blocking(&["title"]);
    let result = run(&store, &[article("b", "Shared headline")], &config).await?;
    assert_eq!(ids(&result), vec!["b"]);
    assert!(store.get_stored_comparison_names(FEED_ID).await?.contains("title"));

    let next = run(&store, &[article("c", "Shared headline")], &config).await?;
    assert!(next.articles_to_deliver.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cold_partition_ids_are_restored_not_delivered() -> Result<()> {
    init_tracing();
    let store = InMemoryArticleFieldStore::new().with_hot_partition_age(Duration::days(30));
    let old = article("a", "Alpha");
    store.insert_at(FEED_ID, &old, &[], Utc::now() - Duration::days(45)).await;

    let hot = store.find_stored_article_ids(FEED_ID, &[old.id_hash.clone()], Partition::Hot).await?;
    assert!(hot.is_empty());

    let result = run(&store, &[old.clone()], &ComparisonConfig::default()).await?;
    assert!(!result.is_first_run);
    assert!(result.articles_to_deliver.is_empty());

    let hot = store.find_stored_article_ids(FEED_ID, &[old.id_hash.clone()], Partition::Hot).await?;
    assert!(hot.contains(&old.id_hash));
    Ok(())
}

#[tokio::test]
async fn test_date_check_drops_old_articles() -> Result<()> {
    init_tracing();
    let store = InMemoryArticleFieldStore::new();
    let config = ComparisonConfig::default().with_date_threshold_ms(Duration::days(1).num_milliseconds());
    run(&store, &[article("a", "Alpha")], &config).await?;

    let stale = article("old", "Old").with_raw("date", (Utc::now() - Duration::days(100)).to_rfc3339());
    let fresh = article("new", "New").with_raw("date", (Utc::now() - Duration::hours(1)).to_rfc3339());
    let undated = article("undated", "Undated");

    let result = run(&store, &[stale, fresh, undated], &config).await?;
    assert_eq!(ids(&result), vec!["undated", "new"]);
    Ok(())
}

#[tokio::test]
async fn test_zero_threshold_disables_date_check() -> Result<()> {
    init_tracing();
    let store = InMemoryArticleFieldStore::new();
    let config = ComparisonConfig::default().with_date_threshold_ms(0);
    run(&store, &[article("a", "Alpha")], &config).await?;

    let stale = article("old", "Old").with_raw("date", (Utc::now() - Duration::days(400)).to_rfc3339());
    let result = run(&store, &[stale], &config).await?;
    assert_eq!(ids(&result), vec!["old"]);
    Ok(())
}

#[tokio::test]
async fn test_clear_resets_feed_to_first_run() -> Result<()> {
    init_tracing();
    let store = InMemoryArticleFieldStore::new();
    let config = ComparisonConfig::default().with_blocking(&["title"]);
    run(&store, &[article("a", "Alpha")], &config).await?;
    assert!(store.stored_value_count(FEED_ID).await > 0);

    store.clear(FEED_ID).await?;
    assert_eq!(store.stored_value_count(FEED_ID).await, 0);

    let result = run(&store, &[article("b", "Beta")], &config).await?;
    assert!(result.is_first_run);
    Ok(())
}

#[tokio::test]
async fn test_repeated_id_in_one_fetch_is_delivered_once() -> Result<()> {
    init_tracing();
    let store = InMemoryArticleFieldStore::new();
    let config = ComparisonConfig::default();
    run(&store, &[article("base", "Base")], &config).await?;

    let result = run(&store, &[article("dup", "Dup"), article("dup", "Dup")], &config).await?;
    assert_eq!(ids(&result), vec!["dup"]);

    let again = run(&store, &[article("dup", "Dup")], &config).await?;
    assert!(again.articles_to_deliver.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_any_blocking_field_collision_blocks() -> Result<()> {
    init_tracing();
    let store = InMemoryArticleFieldStore::new();
    let config = ComparisonConfig::default().with_blocking(&["title", "link"]);
    let seeded = article("a", "First title").with_field("link", "https://example.com/story");
    run(&store, &[seeded], &config).await?;

    let same_link = article("b", "Another title").with_field("link", "https://example.com/story");
    let distinct = article("c", "Third title").with_field("link", "https://example.com/other");
    let result = run(&store, &[same_link, distinct], &config).await?;

    assert_eq!(ids(&result), vec!["c"]);
    assert_eq!(result.articles_blocked.len(), 1);
    assert_eq!(result.articles_blocked[0].id, "b");
    Ok(())
}

#[tokio::test]
async fn test_any_passing_field_change_readmits() -> Result<()> {
    init_tracing();
    let store = InMemoryArticleFieldStore::new();
    let config = ComparisonConfig::default().with_passing(&["title", "summary"]);
    run(&store, &[article("a", "Title").with_field("summary", "Short summary")], &config).await?;

    let result = run(&store, &[article("a", "Title").with_field("summary", "Longer summary")], &config).await?;

    assert_eq!(ids(&result), vec!["a"]);
    assert_eq!(result.articles_passed.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_passing_field_never_readmits() -> Result<()> {
    init_tracing();
    let store = InMemoryArticleFieldStore::new();
    let config = ComparisonConfig::default().with_passing(&["summary"]);
    run(&store, &[article("a", "Title").with_field("summary", "Short summary")], &config).await?;

    let dropped = run(&store, &[article("a", "Title")], &config).await?;
    assert!(dropped.articles_to_deliver.is_empty());
    assert!(dropped.articles_passed.is_empty());

    let emptied = run(&store, &[article("a", "Title").with_field("summary", "")], &config).await?;
    assert!(emptied.articles_to_deliver.is_empty());
    Ok(())
}
