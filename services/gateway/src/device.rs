// The gateway-local half of the handoff (§3 Device State, §4.2): a
// per-device ordered buffer plus the frame-to-Reading transforms §4.1
// describes. Everything here is plain data and async I/O against the
// durable queue — no socket or registry concerns, so it is exercised by
// unit tests without a live connection.

use durable_queue::{DurableQueue, QueueError};
use ingest_protocol::{encode_reading, DataFrame, Payload, Reading, ReadingMeta, ReadingSource};

#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("failed to encode a buffered reading: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// A device's in-memory buffer of accepted Readings, bounded by
/// `BUFFER_SIZE` (§3 invariant 4). Owned exclusively by that device's
/// connection task, so append and flush are never concurrent with each
/// other for the same device (§5).
pub struct DeviceBuffer {
    node_id: String,
    buffer_size: usize,
    pending: Vec<Reading>,
}

impl DeviceBuffer {
    pub fn new(node_id: impl Into<String>, buffer_size: usize) -> Self {
        Self {
            node_id: node_id.into(),
            buffer_size,
            pending: Vec::new(),
        }
    }

    pub fn push(&mut self, reading: Reading) {
        self.pending.push(reading);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// True once the buffer has reached `BUFFER_SIZE`; the caller flushes
    /// immediately when this flips, keeping the buffer strictly below the
    /// threshold after every successful flush (§3 invariant 4).
    pub fn should_flush(&self) -> bool {
        self.pending.len() >= self.buffer_size
    }

    /// Append the whole buffer to the durable queue in one atomic batch,
    /// then clear it. On failure the buffer is left untouched so the next
    /// trigger (another reading, or disconnect) retries the same entries
    /// (§4.2 Failure).
    pub async fn flush(&mut self, queue: &DurableQueue) -> Result<usize, FlushError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let encoded = self
            .pending
            .iter()
            .map(encode_reading)
            .collect::<Result<Vec<_>, _>>()?;
        queue.enqueue_batch(&self.node_id, &encoded).await?;
        let count = self.pending.len();
        self.pending.clear();
        Ok(count)
    }
}

/// Transform a `/save` payload into a Reading (§4.1). `deviceId` is pulled
/// out of the object and carried as `meta.rawDeviceId`; it is not part of
/// the payload bag handed to the store.
pub fn reading_from_save_object(
    node_id: &str,
    obj: &serde_json::Map<String, serde_json::Value>,
    ts: i64,
    auto_identified: bool,
) -> Reading {
    let raw_device_id = obj
        .get("deviceId")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned);
    let mut payload = obj.clone();
    payload.remove("deviceId");
    Reading {
        node_id: node_id.to_owned(),
        ts,
        payload: Payload::from_map(payload),
        meta: ReadingMeta::esp32(raw_device_id, auto_identified),
    }
}

/// Transform a legacy `data`/`bulk:data` frame into a Reading (§4.1).
pub fn reading_from_data_frame(frame: DataFrame, ts: i64, auto_identified: bool) -> Reading {
    Reading {
        node_id: frame.node_id,
        ts,
        payload: Payload::from_map(frame.payload),
        meta: ReadingMeta {
            source: ReadingSource::Socketio,
            raw_device_id: None,
            auto_identified,
        },
    }
}

/// `ESP32_<first 8 chars of socketId>` — the fallback device id when a
/// `/save` frame omits `deviceId` (§4.1 Auto-identification rule).
pub fn synthesize_device_id(socket_id: &str) -> String {
    let prefix_len = socket_id.len().min(8);
    format!("ESP32_{}", &socket_id[..prefix_len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_below_threshold_does_not_flush() {
        let mut buffer = DeviceBuffer::new("node-a", 100);
        for i in 0..99 {
            buffer.push(reading_from_data_frame(
                DataFrame {
                    node_id: "node-a".to_owned(),
                    payload: serde_json::Map::new(),
                },
                i,
                false,
            ));
        }
        assert_eq!(buffer.len(), 99);
        assert!(!buffer.should_flush());
    }

    #[test]
    fn buffer_hits_exactly_buffer_size_after_one_more_reading() {
        let mut buffer = DeviceBuffer::new("node-a", 100);
        for i in 0..99 {
            buffer.push(reading_from_data_frame(
                DataFrame {
                    node_id: "node-a".to_owned(),
                    payload: serde_json::Map::new(),
                },
                i,
                false,
            ));
        }
        buffer.push(reading_from_data_frame(
            DataFrame {
                node_id: "node-a".to_owned(),
                payload: serde_json::Map::new(),
            },
            99,
            false,
        ));
        assert_eq!(buffer.len(), 100);
        assert!(buffer.should_flush());
    }

    #[test]
    fn reading_from_save_object_extracts_device_id_and_strips_it_from_payload() {
        let obj = serde_json::Map::from_iter([
            ("deviceId".to_owned(), serde_json::json!("ESP32_A")),
            ("min".to_owned(), serde_json::json!(10.0)),
            ("max".to_owned(), serde_json::json!(20.0)),
        ]);
        let reading = reading_from_save_object("ESP32_A", &obj, 1_000, true);
        assert_eq!(reading.meta.raw_device_id.as_deref(), Some("ESP32_A"));
        assert!(reading.meta.auto_identified);
        assert_eq!(reading.payload.metric("min"), Some(10.0));
        assert_eq!(reading.payload.0.get("deviceId"), None);
    }

    #[test]
    fn reading_from_data_frame_carries_socketio_source() {
        let frame = DataFrame {
            node_id: "node-a".to_owned(),
            payload: serde_json::Map::from_iter([("current".to_owned(), serde_json::json!(3.5))]),
        };
        let reading = reading_from_data_frame(frame, 42, false);
        assert_eq!(reading.meta.source, ingest_protocol::ReadingSource::Socketio);
        assert_eq!(reading.payload.metric("current"), Some(3.5));
    }

    #[test]
    fn synthesize_device_id_takes_first_eight_chars() {
        assert_eq!(synthesize_device_id("abcdefgh12345"), "ESP32_abcdefgh");
        assert_eq!(synthesize_device_id("abc"), "ESP32_abc");
    }

    #[test]
    fn new_buffer_is_empty() {
        // flush() itself needs a live queue and is covered by the
        // gateway's integration tests.
        let buffer = DeviceBuffer::new("node-a", 10);
        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);
    }
}
