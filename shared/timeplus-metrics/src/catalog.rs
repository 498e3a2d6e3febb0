//! Stream catalog seam used by metrics series

use async_trait::async_trait;
use timeplus_client::{IngestPayload, StreamDef, TimeplusClient};

/// The registry and ingest calls a metrics series needs
#[async_trait]
pub trait StreamCatalog: Send + Sync + 'static {
    async fn exist_stream(&self, name: &str) -> timeplus_client::Result<bool>;

    async fn get_stream(&self, name: &str) -> timeplus_client::Result<StreamDef>;

    async fn create_stream(&self, stream: &StreamDef) -> timeplus_client::Result<()>;

    async fn insert_data(&self, payload: &IngestPayload) -> timeplus_client::Result<()>;
}

#[async_trait]
impl StreamCatalog for TimeplusClient {
    async fn exist_stream(&self, name: &str) -> timeplus_client::Result<bool> {
        TimeplusClient::exist_stream(self, name).await
    }

    async fn get_stream(&self, name: &str) -> timeplus_client::Result<StreamDef> {
        TimeplusClient::get_stream(self, name).await
    }

    async fn create_stream(&self, stream: &StreamDef) -> timeplus_client::Result<()> {
        TimeplusClient::create_stream(self, stream).await
    }

    async fn insert_data(&self, payload: &IngestPayload) -> timeplus_client::Result<()> {
        TimeplusClient::insert_data(self, payload).await
    }
}
