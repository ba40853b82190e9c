pub mod channels;
pub mod comparison;
pub mod config;
pub mod delivery;
pub mod delivery_result;
pub mod feed_event;
pub mod filters;
pub mod preview;
pub mod rate_limit;
pub mod stores;
pub mod types;
pub mod utils;
pub mod validation;

pub use types::*;
pub use channels::DiagnosticChannelClient;
pub use comparison::{compare_and_select_deliverable, ComparisonResult};
pub use config::PipelineConfig;
pub use delivery::{deliver, DeliverOptions};
pub use delivery_result::{handle_delivery_result, process_delivery_result, ProcessedDelivery, RemediationEvent};
pub use feed_event::{handle_feed_deleted, handle_feed_event, FeedEvent, FeedEventDependencies};
pub use filters::{evaluate, CompiledFilter, FilterExpression, FilterResult};
pub use preview::{generate_preview, PreviewDependencies, PreviewInput, PreviewResponse};
pub use rate_limit::{get_under_limit_check, LimitCheck};
pub use stores::{InMemoryArticleFieldStore, InMemoryDeliveryRecordStore, PgArticleFieldStore, PgDeliveryRecordStore};
