//! Store adapters behind the `interfaces` traits.

use chrono::{DateTime, Duration, Utc};
use interfaces::hash_value;

use crate::types::Article;

pub mod memory;
pub mod postgres;
pub mod read_only;

pub use memory::{InMemoryArticleFieldStore, InMemoryDeliveryRecordStore};
pub use postgres::{PgArticleFieldStore, PgDeliveryRecordStore};
pub use read_only::{ReadOnlyArticleFieldStore, ReadOnlyDeliveryRecordStore};

/// Field name under which article id hashes are stored.
pub const ID_FIELD: &str = "id";

const MAX_WINDOW_SECONDS: i64 = 100 * 365 * 86_400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRow {
    pub feed_id: String,
    pub field_name: String,
    pub value_hash: String,
}

/// Rows to persist for `articles`. Empty and missing values are skipped.
pub fn field_rows(feed_id: &str, articles: &[Article], field_names: &[String], include_ids: bool) -> Vec<FieldRow> {
    let mut rows = Vec::new();
    for article in articles {
        if include_ids {
            rows.push(FieldRow {
                feed_id: feed_id.to_string(),
                field_name: ID_FIELD.to_string(),
                value_hash: article.id_hash.clone(),
            });
        }
        for name in field_names.iter().filter(|name| name.as_str() != ID_FIELD) {
            if let Some(value) = article.field(name).filter(|value| !value.is_empty()) {
                rows.push(FieldRow {
                    feed_id: feed_id.to_string(),
                    field_name: name.clone(),
                    value_hash: hash_value(value),
                });
            }
        }
    }
    rows
}

/// Start of a trailing window of `seconds`, clamped to a sane range.
pub(crate) fn window_start(seconds: u64) -> DateTime<Utc> {
    let seconds = i64::try_from(seconds).unwrap_or(i64::MAX).min(MAX_WINDOW_SECONDS);
    Utc::now()
        .checked_sub_signed(Duration::seconds(seconds))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
