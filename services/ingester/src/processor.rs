// The per-node processing loop (§4.3). One of these runs per active node,
// spawned by discovery and torn down once its queue drains to empty.

use std::time::Duration;

use durable_queue::DurableQueue;
use ingest_protocol::Record;
use sqlx::PgPool;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::config::Config;

/// Drains `node_id`'s queue until empty, flushing on size or on a 2 s
/// timer, whichever comes first. Returns once the queue is observed empty
/// so the caller can release the node's exclusivity marker.
pub async fn run_node_loop(node_id: String, queue: DurableQueue, db: PgPool, config: Config) {
    let mut flush_deadline: Option<Instant> = None;

    loop {
        let len = match queue.queue_len(&node_id).await {
            Ok(len) => len,
            Err(err) => {
                warn!(%node_id, error = %err, "failed to read queue length, retrying");
                sleep(Duration::from_millis(config.poll_interval_ms)).await;
                continue;
            }
        };

        if len == 0 {
            break;
        }

        let due = flush_deadline.is_some_and(|deadline| Instant::now() >= deadline);
        if len >= config.batch_size as i64 || due {
            flush_once(&node_id, &queue, &db, &config).await;
            flush_deadline = None;
            continue;
        }

        if flush_deadline.is_none() {
            flush_deadline =
                Some(Instant::now() + Duration::from_millis(config.flush_interval_ms));
        }

        sleep(Duration::from_millis(config.poll_interval_ms)).await;
    }

    info!(%node_id, "queue drained, releasing node");
}

/// One flush: pop up to `batch_size` entries, allocate their sequence
/// range, bulk-insert, and update metrics. Parse failures drop the
/// offending entry; insert failures dead-letter the whole batch rather
/// than requeueing it (§7 simplification).
async fn flush_once(node_id: &str, queue: &DurableQueue, db: &PgPool, config: &Config) {
    let entries = match queue.dequeue_batch(node_id, config.batch_size).await {
        Ok(entries) => entries,
        Err(err) => {
            warn!(%node_id, error = %err, "failed to dequeue batch");
            return;
        }
    };
    if entries.is_empty() {
        return;
    }

    let mut readings = Vec::with_capacity(entries.len());
    for entry in entries {
        match ingest_protocol::decode_reading(&entry) {
            Ok(reading) => readings.push(reading),
            Err(err) => warn!(%node_id, error = %err, "dropping malformed queue entry"),
        }
    }

    if readings.is_empty() {
        return;
    }

    let count = readings.len() as i64;
    let seq_base = match queue.allocate_seq_range(node_id, count).await {
        Ok(seq_base) => seq_base,
        Err(err) => {
            warn!(%node_id, error = %err, "failed to allocate sequence range, dead-lettering batch");
            dead_letter_readings(queue, node_id, &readings).await;
            return;
        }
    };

    let records: Vec<Record> = readings
        .into_iter()
        .enumerate()
        .map(|(i, reading)| Record::from_reading(reading, seq_base + i as i64))
        .collect();

    match ts_store::insert_records(db, &records).await {
        Ok(inserted) => {
            let flushed_at = crate::now_ms();
            if let Err(err) = queue.record_flush(node_id, count, flushed_at).await {
                warn!(%node_id, error = %err, "failed to update flush metrics");
            }
            info!(%node_id, batch_len = records.len(), inserted, "flushed batch");
        }
        Err(err) => {
            warn!(%node_id, error = %err, "bulk insert failed, dead-lettering batch");
            dead_letter_records(queue, node_id, &records).await;
        }
    }
}

async fn dead_letter_readings(queue: &DurableQueue, node_id: &str, readings: &[ingest_protocol::Reading]) {
    let encoded: Vec<String> = readings
        .iter()
        .filter_map(|r| ingest_protocol::encode_reading(r).ok())
        .collect();
    if let Err(err) = queue.dead_letter(node_id, &encoded).await {
        warn!(%node_id, error = %err, "failed to dead-letter batch");
    }
}

async fn dead_letter_records(queue: &DurableQueue, node_id: &str, records: &[Record]) {
    let encoded: Vec<String> = records
        .iter()
        .filter_map(|r| serde_json::to_string(r).ok())
        .collect();
    if let Err(err) = queue.dead_letter(node_id, &encoded).await {
        warn!(%node_id, error = %err, "failed to dead-letter batch");
    }
}
