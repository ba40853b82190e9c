use async_trait::async_trait;
use interfaces::{ChannelResponse, DeliveryChannelClient, DispatchJob, TransportError};
use serde_json::Value;
use tracing::debug;

/// Channel client for dry runs. Every job succeeds and nothing leaves the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticChannelClient;

#[async_trait]
impl DeliveryChannelClient for DiagnosticChannelClient {
    async fn dispatch(&self, job: DispatchJob) -> Result<ChannelResponse, TransportError> {
        debug!(
            "Diagnostic dispatch for article {} to medium {}",
            job.meta.article_id, job.meta.medium_id
        );
        Ok(ChannelResponse::Completed { status: 200, body: Value::Null })
    }
}
