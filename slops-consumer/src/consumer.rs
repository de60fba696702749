use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;

use health::HealthHandle;

use crate::config::Config;
use crate::error::ConsumerError;
use crate::handoff::{self, HandoffHooks};

/// Runs the consume loop, restarting it with exponential backoff if the
/// underlying transport errors out. A transport error is not expected to be
/// permanent (broker restarts, rebalance churn), so this never gives up —
/// it is the caller's job to stop polling on shutdown.
pub async fn run(
    config: &Config,
    hooks: Arc<dyn HandoffHooks>,
    liveness: Option<Arc<HealthHandle>>,
) {
    let attempt = || try_run(config, hooks.clone(), liveness.clone());

    let result = attempt
        .retry(ExponentialBuilder::default())
        .when(|_: &ConsumerError| true)
        .notify(|err, dur| {
            tracing::error!("consumer restarting after {dur:?}: {err}");
        })
        .await;

    if let Err(err) = result {
        tracing::error!("consumer loop gave up: {err}");
    }
}

async fn try_run(
    config: &Config,
    hooks: Arc<dyn HandoffHooks>,
    liveness: Option<Arc<HealthHandle>>,
) -> Result<(), ConsumerError> {
    let consumer = create_consumer(config)?;

    loop {
        let message = consumer.recv().await?;

        if let Some(handle) = &liveness {
            handle.report_healthy_blocking();
        }

        let key = message
            .key()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned());

        match handoff::decode_sync_event(message.headers()) {
            Ok(Some(marker)) => {
                handoff::interpret(message.partition(), &marker, hooks.as_ref());
            }
            Ok(None) => {
                tracing::debug!(key = ?key, "record has no SyncEvent header, treating as legacy");
            }
            Err(err) => {
                tracing::warn!(key = ?key, %err, "failed to decode SyncEvent header, skipping marker");
            }
        }

        consumer
            .commit_message(&message, CommitMode::Async)
            .map_err(ConsumerError::Commit)?;
    }
}

fn create_consumer(config: &Config) -> Result<StreamConsumer, ConsumerError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("group.id", &config.kafka_group_id)
        .set("bootstrap.servers", &config.kafka_hosts)
        .set(
            "session.timeout.ms",
            config.kafka_session_timeout_ms.to_string(),
        )
        .set("enable.auto.commit", "false")
        .set("enable.partition.eof", "false")
        .set("auto.offset.reset", "earliest")
        .create()
        .map_err(ConsumerError::ClientConfig)?;

    consumer
        .subscribe(&[&config.kafka_topic])
        .map_err(|source| ConsumerError::Subscribe {
            topic: config.kafka_topic.clone(),
            source,
        })?;

    Ok(consumer)
}
