use thiserror::Error;

/// Error taxonomy for the consumer side. Transport errors are the only ones
/// that ever abort the consume loop; decode failures are degraded paths that
/// get logged and skipped so one malformed record can't wedge a partition.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("failed to create consumer: {0}")]
    ClientConfig(#[source] rdkafka::error::KafkaError),

    #[error("failed to subscribe to topic {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: rdkafka::error::KafkaError,
    },

    #[error("kafka transport error: {0}")]
    Transport(#[from] rdkafka::error::KafkaError),

    #[error("failed to commit offset: {0}")]
    Commit(#[source] rdkafka::error::KafkaError),
}
