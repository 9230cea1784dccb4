// ts-store: the time-series store the batch ingester writes into and the
// gateway's REST surface reads back out of. Backed by Postgres via sqlx,
// standing in for the document store the original system used — the bulk
// write path and the unique (node_id, seq) constraint are what the spec
// actually depends on, and Postgres gives us both with ordinary SQL.

use ingest_protocol::{Payload, Record};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("malformed record payload: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub async fn create_pool(database_url: &str) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("time-series store migrations applied");
    Ok(())
}

/// Bulk-insert records. Duplicate `(node_id, seq)` pairs are dropped
/// silently (`ON CONFLICT DO NOTHING`) rather than treated as an error,
/// since batch retries after a partial flush are expected to overlap.
/// Returns the number of rows actually inserted.
pub async fn insert_records(pool: &PgPool, records: &[Record]) -> StoreResult<u64> {
    if records.is_empty() {
        return Ok(0);
    }

    let node_ids: Vec<String> = records.iter().map(|r| r.node_id.clone()).collect();
    let seqs: Vec<i64> = records.iter().map(|r| r.seq).collect();
    let timestamps: Vec<i64> = records.iter().map(|r| r.ts).collect();
    let payloads: Vec<serde_json::Value> = records
        .iter()
        .map(|r| serde_json::to_value(&r.payload))
        .collect::<Result<_, _>>()?;
    let metas: Vec<serde_json::Value> = records
        .iter()
        .map(|r| serde_json::to_value(&r.meta))
        .collect::<Result<_, _>>()?;

    let result = sqlx::query(
        r#"INSERT INTO records (node_id, seq, ts, payload, meta)
           SELECT * FROM UNNEST($1::text[], $2::bigint[], $3::bigint[], $4::jsonb[], $5::jsonb[])
           ON CONFLICT (node_id, seq) DO NOTHING"#,
    )
    .bind(node_ids)
    .bind(seqs)
    .bind(timestamps)
    .bind(payloads)
    .bind(metas)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// The highest sequence number stored for a node, or `None` if it has no
/// records yet. Used both by the ingester (to resume sequence allocation
/// after a restart) and by the sync endpoint's default cursor.
pub async fn latest_seq(pool: &PgPool, node_id: &str) -> StoreResult<Option<i64>> {
    let row = sqlx::query("SELECT max(seq) AS seq FROM records WHERE node_id = $1")
        .bind(node_id)
        .fetch_one(pool)
        .await?;
    Ok(row.try_get::<Option<i64>, _>("seq")?)
}

#[derive(Debug, Clone, Copy)]
pub enum SeriesRange {
    Time { from_ts: Option<i64>, to_ts: Option<i64> },
    Seq { from_seq: Option<i64>, to_seq: Option<i64> },
    All,
}

/// Fetch a node's series for the given range, newest last, capped at `limit`.
pub async fn query_series(
    pool: &PgPool,
    node_id: &str,
    range: SeriesRange,
    limit: i64,
) -> StoreResult<Vec<Record>> {
    let rows = match range {
        SeriesRange::Time { from_ts, to_ts } => {
            sqlx::query(
                r#"SELECT node_id, seq, ts, payload, meta FROM records
                   WHERE node_id = $1
                     AND ($2::bigint IS NULL OR ts >= $2)
                     AND ($3::bigint IS NULL OR ts <= $3)
                   ORDER BY seq ASC
                   LIMIT $4"#,
            )
            .bind(node_id)
            .bind(from_ts)
            .bind(to_ts)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        SeriesRange::Seq { from_seq, to_seq } => {
            sqlx::query(
                r#"SELECT node_id, seq, ts, payload, meta FROM records
                   WHERE node_id = $1
                     AND ($2::bigint IS NULL OR seq >= $2)
                     AND ($3::bigint IS NULL OR seq <= $3)
                   ORDER BY seq ASC
                   LIMIT $4"#,
            )
            .bind(node_id)
            .bind(from_seq)
            .bind(to_seq)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        SeriesRange::All => {
            sqlx::query(
                r#"SELECT node_id, seq, ts, payload, meta FROM records
                   WHERE node_id = $1
                   ORDER BY seq ASC
                   LIMIT $2"#,
            )
            .bind(node_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };

    rows.into_iter().map(row_to_record).collect()
}

/// Records strictly after `last_seq` (or everything, if `last_seq` is
/// `None`), ordered oldest-first — the gap-recovery replay path.
pub async fn query_sync(
    pool: &PgPool,
    node_id: &str,
    last_seq: Option<i64>,
) -> StoreResult<Vec<Record>> {
    let rows = sqlx::query(
        r#"SELECT node_id, seq, ts, payload, meta FROM records
           WHERE node_id = $1 AND seq > $2
           ORDER BY seq ASC"#,
    )
    .bind(node_id)
    .bind(last_seq.unwrap_or(0))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(row_to_record).collect()
}

fn row_to_record(row: sqlx::postgres::PgRow) -> StoreResult<Record> {
    let payload_json: serde_json::Value = row.try_get("payload")?;
    let meta_json: serde_json::Value = row.try_get("meta")?;
    Ok(Record {
        node_id: row.try_get("node_id")?,
        seq: row.try_get("seq")?,
        ts: row.try_get("ts")?,
        payload: serde_json::from_value::<Payload>(payload_json)?,
        meta: serde_json::from_value(meta_json)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_range_variants_construct() {
        let time = SeriesRange::Time {
            from_ts: Some(1),
            to_ts: None,
        };
        let seq = SeriesRange::Seq {
            from_seq: None,
            to_seq: Some(9),
        };
        assert!(matches!(time, SeriesRange::Time { .. }));
        assert!(matches!(seq, SeriesRange::Seq { .. }));
        assert!(matches!(SeriesRange::All, SeriesRange::All));
    }
}
