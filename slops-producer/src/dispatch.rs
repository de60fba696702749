//! C5: producer dispatch — decides the final partition for a message,
//! stamps the hand-off marker, and submits to the broker client.
//!
//! Grounded on `SLOPSProducer/cmd/producer.go`'s `Produce` for the
//! variadic-partition submit shape, adapted to the explicit `ProduceRecord`
//! the local [`EventSink`] trait expects.

use std::sync::Arc;

use slops_common::{fnv1a_partition, HEADER_PRODUCER, HEADER_SYNC_EVENT};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ProducerError;
use crate::event::NewMessageRequest;
use crate::hotkey::should_sample;
use crate::message_set::MessageSetMap;
use crate::partition_map::PartitionMap;
use crate::prometheus::report_dispatch_error;
use crate::sinks::{EventSink, ProduceRecord};

pub struct Dispatcher<S: EventSink> {
    partition_map: Arc<PartitionMap>,
    message_sets: Arc<MessageSetMap>,
    sample_tx: mpsc::Sender<String>,
    sink: S,
    partitions: u32,
    sample_threshold: f64,
    vanilla: bool,
    instance_id: String,
}

impl<S: EventSink> Dispatcher<S> {
    pub fn new(
        partition_map: Arc<PartitionMap>,
        message_sets: Arc<MessageSetMap>,
        sample_tx: mpsc::Sender<String>,
        sink: S,
        partitions: u32,
        sample_threshold: f64,
        vanilla: bool,
        instance_id: String,
    ) -> Self {
        Self {
            partition_map,
            message_sets,
            sample_tx,
            sink,
            partitions,
            sample_threshold,
            vanilla,
            instance_id,
        }
    }

    fn choose_partition(&self, key: &str) -> u32 {
        if self.vanilla {
            return fnv1a_partition(key, self.partitions);
        }
        match self.partition_map.lookup(key) {
            Some(record) => record.partition,
            None => fnv1a_partition(key, self.partitions),
        }
    }

    fn producer_header(&self) -> (&'static str, Vec<u8>) {
        (HEADER_PRODUCER, self.instance_id.clone().into_bytes())
    }

    pub async fn dispatch(&self, request: NewMessageRequest) -> Result<(), ProducerError> {
        if !self.vanilla && should_sample(self.sample_threshold) {
            // Best-effort: a full channel means we simply drop the sample.
            // Producers must never block on hot-key tracking.
            if self.sample_tx.try_send(request.key.clone()).is_err() {
                report_dispatch_error("sample_channel_full");
            }
        }

        let partition = self.choose_partition(&request.key);

        if self.vanilla {
            return self
                .sink
                .send(ProduceRecord {
                    key: request.key,
                    payload: request.body,
                    partition: partition as i32,
                    headers: vec![self.producer_header()],
                })
                .await;
        }

        let (marker, changed) = self
            .message_sets
            .advance_for(&request.key, partition as i32);

        if changed {
            // A dedicated zero-body hand-off control record closes out the
            // set on the old partition.
            self.sink
                .send(ProduceRecord {
                    key: request.key.clone(),
                    payload: String::new(),
                    partition: marker.src_partition,
                    headers: vec![
                        self.producer_header(),
                        (HEADER_SYNC_EVENT, marker.encode()),
                    ],
                })
                .await?;
            debug!(key = %request.key, from = marker.src_partition, to = marker.dest_partition, "emitted hand-off control record");
        }

        self.sink
            .send(ProduceRecord {
                key: request.key,
                payload: request.body,
                partition: marker.dest_partition,
                headers: vec![self.producer_header(), (HEADER_SYNC_EVENT, marker.encode())],
            })
            .await
    }
}
