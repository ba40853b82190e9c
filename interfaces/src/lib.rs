pub mod channel;
pub mod defs;
pub mod state;

pub use channel::{
    ChannelResponse, DeliveryChannelClient, DeliveryJobMeta, DeliveryResultReport, DispatchJob,
    EventPublisher, PublishError, TransportError,
};
pub use defs::{
    hash_value, Article, ArticleDeliveryState, DeliveryCountFilter, DeliveryErrorCode, DeliveryLog,
    DeliveryLogQuery, DeliveryLogStatus, DeliveryRecord, DeliveryStatus, DeliveryStatusUpdate,
};
pub use state::{
    ArticleFieldContext, ArticleFieldStore, DeliveryRecordContext, DeliveryRecordStore, Partition,
    StoreError, StoreResult,
};
