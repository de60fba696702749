use rdkafka::message::{BorrowedHeaders, Headers};

use slops_common::{MarkerError, MessageSetMarker, HEADER_SYNC_EVENT};

/// Application-level extension point. The consumer owns the decision of what
/// "flush buffered state" and "stitch per-key order" actually mean; this
/// trait is the seam between the wire format and that policy.
pub trait HandoffHooks: Send + Sync {
    /// The terminal hand-off record of a set on the partition the consumer
    /// is currently reading has been observed: any per-key buffering for
    /// `key` on this partition can be flushed.
    fn on_shift_key(&self, key: &str);

    /// `marker.key` has started set `marker.dest_index` on
    /// `marker.dest_partition`, migrated from
    /// `marker.src_partition:marker.src_index`.
    fn on_sync_event(&self, marker: &MessageSetMarker);
}

/// Pulls the `SyncEvent` header off a consumed record and decodes it. A
/// missing header means a legacy (pre-SLOPS) record; callers should treat
/// `Ok(None)` as "process the payload and move on" rather than an error. A
/// present-but-malformed header is `Err`, which callers log and skip.
pub fn decode_sync_event(
    headers: Option<&BorrowedHeaders>,
) -> Result<Option<MessageSetMarker>, MarkerError> {
    let Some(headers) = headers else {
        return Ok(None);
    };

    for header in headers.iter() {
        if header.key == HEADER_SYNC_EVENT {
            let Some(value) = header.value else {
                return Ok(None);
            };
            return MessageSetMarker::decode(value).map(Some);
        }
    }

    Ok(None)
}

/// Runs the interpretation steps against an already-decoded marker and the
/// partition the record was actually read from, invoking whichever hooks
/// apply. `record_partition` is the partition number the consumer observed
/// the record on, independent of whatever `marker.dest_partition` claims.
///
/// A migration is produced as two records sharing one marker: a zero-body
/// hand-off record on the old partition and the payload on the new one (see
/// the producer's dispatch step). Both carry `src_partition/src_index` set,
/// so gating `on_sync_event` on the record actually being on
/// `dest_partition` keeps it from firing twice for a single migration — once
/// on the closing record, again on the record that starts the new set.
pub fn interpret(record_partition: i32, marker: &MessageSetMarker, hooks: &dyn HandoffHooks) {
    if marker.dest_partition != record_partition {
        hooks.on_shift_key(&marker.key);
        return;
    }

    if marker.src_partition >= 0 && marker.src_index >= 0 {
        hooks.on_sync_event(marker);
    }
}

/// Default hook implementation for the binary: logs both events instead of
/// doing any application-level stitching. A real consumer embedding this
/// crate as a library would supply its own `HandoffHooks`.
#[derive(Default)]
pub struct LoggingHooks;

impl HandoffHooks for LoggingHooks {
    fn on_shift_key(&self, key: &str) {
        tracing::info!(key, "shift: set on the old partition is complete");
    }

    fn on_sync_event(&self, marker: &MessageSetMarker) {
        tracing::info!(
            key = marker.key,
            src_partition = marker.src_partition,
            src_index = marker.src_index,
            dest_partition = marker.dest_partition,
            dest_index = marker.dest_index,
            "sync: key migrated to a new partition"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHooks {
        shift_keys: Mutex<Vec<String>>,
        sync_events: Mutex<Vec<MessageSetMarker>>,
    }

    impl HandoffHooks for RecordingHooks {
        fn on_shift_key(&self, key: &str) {
            self.shift_keys.lock().unwrap().push(key.to_owned());
        }

        fn on_sync_event(&self, marker: &MessageSetMarker) {
            self.sync_events.lock().unwrap().push(marker.clone());
        }
    }

    #[test]
    fn new_stream_marker_triggers_neither_hook() {
        let hooks = RecordingHooks::default();
        let marker = MessageSetMarker {
            key: "k".to_owned(),
            src_partition: -1,
            src_index: -1,
            dest_partition: 0,
            dest_index: 0,
        };

        interpret(0, &marker, &hooks);

        assert!(hooks.shift_keys.lock().unwrap().is_empty());
        assert!(hooks.sync_events.lock().unwrap().is_empty());
    }

    #[test]
    fn steady_state_marker_on_its_own_partition_triggers_neither_hook() {
        let hooks = RecordingHooks::default();
        let marker = MessageSetMarker {
            key: "k".to_owned(),
            src_partition: -1,
            src_index: -1,
            dest_partition: 2,
            dest_index: 3,
        };

        interpret(2, &marker, &hooks);

        assert!(hooks.shift_keys.lock().unwrap().is_empty());
        assert!(hooks.sync_events.lock().unwrap().is_empty());
    }

    /// Mirrors the consumer-ordering scenario: a hand-off control record on
    /// the old partition (`onShiftKey` only), followed by the payload's
    /// first record on the new partition (`onSyncEvent` only), in that
    /// order.
    #[test]
    fn handoff_then_migrated_payload_fires_shift_then_sync() {
        let hooks = RecordingHooks::default();

        let handoff_record = MessageSetMarker {
            key: "k".to_owned(),
            src_partition: 0,
            src_index: 0,
            dest_partition: 1,
            dest_index: 1,
        };
        interpret(0, &handoff_record, &hooks);

        let migrated_payload = MessageSetMarker {
            key: "k".to_owned(),
            src_partition: 0,
            src_index: 0,
            dest_partition: 1,
            dest_index: 1,
        };
        interpret(1, &migrated_payload, &hooks);

        assert_eq!(
            hooks.shift_keys.lock().unwrap().as_slice(),
            &["k".to_owned()]
        );
        let sync_events = hooks.sync_events.lock().unwrap();
        assert_eq!(sync_events.len(), 1);
        assert_eq!(sync_events[0].dest_partition, 1);
        assert_eq!(sync_events[0].dest_index, 1);
        assert_eq!(sync_events[0].src_partition, 0);
        assert_eq!(sync_events[0].src_index, 0);
    }

    #[test]
    fn absent_header_decodes_to_legacy_none() {
        assert_eq!(decode_sync_event(None), Ok(None));
    }
}
