use async_trait::async_trait;
use tracing::info;

use crate::error::ProducerError;

pub mod kafka;

/// A fully-formed broker record: SLOPS always picks an explicit partition,
/// never leaving it to the broker client's own partitioner.
#[derive(Debug, Clone)]
pub struct ProduceRecord {
    pub key: String,
    pub payload: String,
    pub partition: i32,
    pub headers: Vec<(&'static str, Vec<u8>)>,
}

#[async_trait]
pub trait EventSink {
    async fn send(&self, record: ProduceRecord) -> Result<(), ProducerError>;
}

/// A sink that logs records instead of producing them, for local
/// development (`print_sink` config flag).
pub struct PrintSink;

#[async_trait]
impl EventSink for PrintSink {
    async fn send(&self, record: ProduceRecord) -> Result<(), ProducerError> {
        info!(
            key = %record.key,
            partition = record.partition,
            headers = record.headers.len(),
            "print sink: {}",
            record.payload
        );
        Ok(())
    }
}
