use std::time::Duration;

use async_trait::async_trait;
use health::HealthHandle;
use metrics::{counter, gauge};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::OwnedHeaders;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::error::ProducerError;
use crate::sinks::{EventSink, ProduceRecord};

struct KafkaContext {
    liveness: HealthHandle,
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // The main rdkafka loop calling us back is itself a liveness signal.
        self.liveness.report_healthy_blocking();

        gauge!("slops_kafka_callback_queue_depth").set(stats.replyq as f64);
        gauge!("slops_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("slops_kafka_producer_queue_depth_limit").set(stats.msg_max as f64);

        for (_, broker) in stats.brokers {
            let id_string = format!("{}", broker.nodeid);
            gauge!("slops_kafka_broker_requests_pending", "broker" => id_string.clone())
                .set(broker.outbuf_cnt as f64);
            counter!("slops_kafka_broker_tx_errors_total", "broker" => id_string)
                .absolute(broker.txerrs);
        }
    }
}

#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer<KafkaContext>,
    topic: String,
    successes_tx: mpsc::UnboundedSender<()>,
    errors_tx: mpsc::UnboundedSender<String>,
}

impl KafkaSink {
    pub fn new(config: KafkaConfig, liveness: HealthHandle) -> anyhow::Result<KafkaSink> {
        let (producer, topic) = Self::connect(config, liveness)?;

        // Two dedicated background tasks drain the broker's asynchronous
        // delivery outcomes so `send` itself never waits on an ack: one for
        // successes, one for errors. `send` only blocks on the producer's
        // own internal queue, which `send_result` fills synchronously.
        let (successes_tx, mut successes_rx) = mpsc::unbounded_channel::<()>();
        let (errors_tx, mut errors_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while successes_rx.recv().await.is_some() {
                counter!("slops_producer_records_sent_total").increment(1);
            }
        });

        tokio::spawn(async move {
            while let Some(description) = errors_rx.recv().await {
                counter!("slops_producer_broker_errors_total").increment(1);
                error!("failed to produce to Kafka: {}", description);
            }
        });

        Ok(KafkaSink {
            producer,
            topic,
            successes_tx,
            errors_tx,
        })
    }

    fn connect(
        config: KafkaConfig,
        liveness: HealthHandle,
    ) -> anyhow::Result<(FutureProducer<KafkaContext>, String)> {
        info!("connecting to Kafka brokers at {}...", config.kafka_hosts);

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set("compression.codec", config.kafka_compression_codec)
            .set(
                "queue.buffering.max.kbytes",
                (config.kafka_producer_queue_mib * 1024).to_string(),
            );

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };

        debug!("rdkafka configuration: {:?}", client_config);
        let producer: FutureProducer<KafkaContext> =
            client_config.create_with_context(KafkaContext { liveness })?;

        _ = producer
            .client()
            .fetch_metadata(None, Timeout::After(Duration::new(10, 0)))?;
        info!("connected to Kafka brokers");

        Ok((producer, config.kafka_topic))
    }

    pub fn flush(&self) -> Result<(), KafkaError> {
        self.producer.flush(Duration::new(30, 0))
    }
}

#[cfg(test)]
impl KafkaSink {
    /// Builds a sink without spawning the drain workers, handing the raw
    /// outcome channels back to the caller instead — tests assert on
    /// delivery outcomes directly rather than scraping metrics.
    fn new_for_test(
        config: KafkaConfig,
        liveness: HealthHandle,
    ) -> anyhow::Result<(
        KafkaSink,
        mpsc::UnboundedReceiver<()>,
        mpsc::UnboundedReceiver<String>,
    )> {
        let (producer, topic) = Self::connect(config, liveness)?;
        let (successes_tx, successes_rx) = mpsc::unbounded_channel::<()>();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel::<String>();
        Ok((
            KafkaSink {
                producer,
                topic,
                successes_tx,
                errors_tx,
            },
            successes_rx,
            errors_rx,
        ))
    }
}

#[async_trait]
impl EventSink for KafkaSink {
    /// Enqueues with `send_result`, which copies the record into librdkafka's
    /// internal queue and returns immediately — it does not wait for a
    /// broker ack. The handed-back `DeliveryFuture` is awaited on a spawned
    /// task that forwards the eventual outcome to one of the two drain
    /// channels, so the caller observes only enqueue failures (full local
    /// queue, oversized message) synchronously; broker acknowledgement is
    /// observed and counted asynchronously.
    async fn send(&self, record: ProduceRecord) -> Result<(), ProducerError> {
        let mut headers = OwnedHeaders::new();
        for (name, value) in &record.headers {
            headers = headers.insert(rdkafka::message::Header {
                key: name,
                value: Some(value),
            });
        }

        let enqueued = self.producer.send_result(FutureRecord {
            topic: &self.topic,
            payload: Some(&record.payload),
            key: Some(&record.key),
            partition: Some(record.partition),
            timestamp: None,
            headers: Some(headers),
        });

        let delivery = match enqueued {
            Ok(delivery) => delivery,
            Err((err, _)) => {
                counter!("slops_producer_broker_errors_total").increment(1);
                error!("failed to enqueue record for Kafka: {}", err);
                return match err.rdkafka_error_code() {
                    Some(RDKafkaErrorCode::MessageSizeTooLarge) => {
                        Err(ProducerError::Internal("message too large for broker".into()))
                    }
                    _ => Err(ProducerError::Internal(err.to_string())),
                };
            }
        };

        let successes_tx = self.successes_tx.clone();
        let errors_tx = self.errors_tx.clone();
        tokio::spawn(async move {
            match delivery.await {
                Ok(Ok(_)) => {
                    let _ = successes_tx.send(());
                }
                Ok(Err((err, _))) => {
                    let _ = errors_tx.send(err.to_string());
                }
                Err(_) => {
                    let _ = errors_tx.send("delivery future canceled".to_string());
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use health::HealthRegistry;
    use rdkafka::mocking::MockCluster;
    use rdkafka::producer::DefaultProducerContext;
    use rdkafka::types::{RDKafkaApiKey, RDKafkaRespErr};
    use time::Duration as TimeDuration;

    async fn start_on_mocked_sink() -> (
        MockCluster<'static, DefaultProducerContext>,
        KafkaSink,
        mpsc::UnboundedReceiver<()>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let registry = HealthRegistry::new("liveness");
        let handle = registry
            .register("kafka".to_string(), TimeDuration::seconds(30))
            .await;
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        let config = config::KafkaConfig {
            kafka_producer_linger_ms: 0,
            kafka_producer_queue_mib: 50,
            kafka_message_timeout_ms: 500,
            kafka_compression_codec: "none".to_string(),
            kafka_hosts: cluster.bootstrap_servers(),
            kafka_topic: "slops".to_string(),
            kafka_tls: false,
        };
        let (sink, successes_rx, errors_rx) =
            KafkaSink::new_for_test(config, handle).expect("failed to create sink");
        (cluster, sink, successes_rx, errors_rx)
    }

    fn sample_record() -> ProduceRecord {
        ProduceRecord {
            key: "x".to_string(),
            payload: "hello".to_string(),
            partition: 0,
            headers: vec![("Producer", b"test-instance".to_vec())],
        }
    }

    #[tokio::test]
    async fn send_returns_before_the_broker_ack_and_reports_success_asynchronously() {
        let (_cluster, sink, mut successes_rx, _errors_rx) = start_on_mocked_sink().await;

        // Warm up: the very first sends can fail synchronously while the
        // mock cluster's metadata propagates.
        for _ in 0..20 {
            if sink.send(sample_record()).await.is_ok() {
                break;
            }
        }
        sink.send(sample_record())
            .await
            .expect("enqueue should succeed once producer is warmed up");

        tokio::time::timeout(Duration::from_secs(5), successes_rx.recv())
            .await
            .expect("success drain worker should observe the delivery within the timeout")
            .expect("success channel should not have been closed");
    }

    #[tokio::test]
    async fn unretriable_broker_error_surfaces_on_the_error_drain_channel() {
        let (cluster, sink, _successes_rx, mut errors_rx) = start_on_mocked_sink().await;
        for _ in 0..20 {
            if sink.send(sample_record()).await.is_ok() {
                break;
            }
        }

        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_MSG_SIZE_TOO_LARGE; 1];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);

        // Enqueue itself still succeeds — the broker rejection only shows up
        // once the delivery future resolves, on the error drain channel.
        sink.send(sample_record())
            .await
            .expect("enqueue should succeed regardless of the injected broker error");

        tokio::time::timeout(Duration::from_secs(5), errors_rx.recv())
            .await
            .expect("error drain worker should observe the broker rejection within the timeout")
            .expect("error channel should not have been closed");
    }
}
