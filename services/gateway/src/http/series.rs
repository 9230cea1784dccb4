// §4.4 historical query endpoints: series window, latest record, and the
// sync/replay gap-recovery query (§4.5).

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use ingest_protocol::{Record, SeriesQuery, SyncQuery};
use ts_store::SeriesRange;

use crate::errors::{GatewayError, HttpResult};
use crate::state::AppState;

/// `GET /api/series/:nodeId?fromTs&toTs|fromSeq&toSeq&limit=1000`.
pub async fn get_series(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Query(query): Query<SeriesQuery>,
) -> HttpResult<impl IntoResponse> {
    let range = resolve_range(&query)?;
    let records = ts_store::query_series(&state.db, &node_id, range, query.limit)
        .await
        .map_err(GatewayError::internal)?;
    Ok(Json(records))
}

/// Time range and sequence range are mutually exclusive (§4.4).
fn resolve_range(query: &SeriesQuery) -> Result<SeriesRange, GatewayError> {
    let has_time = query.from_ts.is_some() || query.to_ts.is_some();
    let has_seq = query.from_seq.is_some() || query.to_seq.is_some();
    if has_time && has_seq {
        return Err(GatewayError::BadRequest(
            "fromTs/toTs and fromSeq/toSeq are mutually exclusive".to_owned(),
        ));
    }
    if has_time {
        return Ok(SeriesRange::Time {
            from_ts: query.from_ts,
            to_ts: query.to_ts,
        });
    }
    if has_seq {
        return Ok(SeriesRange::Seq {
            from_seq: query.from_seq,
            to_seq: query.to_seq,
        });
    }
    Ok(SeriesRange::All)
}

/// `GET /api/latest/:nodeId` — the Record with the highest `seq`, or null.
pub async fn get_latest(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> HttpResult<impl IntoResponse> {
    let latest = ts_store::latest_seq(&state.db, &node_id)
        .await
        .map_err(GatewayError::internal)?;
    let Some(seq) = latest else {
        return Ok(Json(Option::<Record>::None));
    };
    let records = ts_store::query_series(
        &state.db,
        &node_id,
        SeriesRange::Seq {
            from_seq: Some(seq),
            to_seq: Some(seq),
        },
        1,
    )
    .await
    .map_err(GatewayError::internal)?;
    Ok(Json(records.into_iter().next()))
}

/// `GET /api/sync/:nodeId?lastSeq=<N>` — all Records with `seq > lastSeq`,
/// ordered by `seq`. Missing `lastSeq` is a 400 (§4.4).
pub async fn get_sync(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Query(query): Query<SyncQuery>,
) -> HttpResult<impl IntoResponse> {
    let Some(last_seq) = query.last_seq else {
        return Err(GatewayError::BadRequest("lastSeq is required".to_owned()));
    };
    let records = ts_store::query_sync(&state.db, &node_id, Some(last_seq))
        .await
        .map_err(GatewayError::internal)?;
    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_range_defaults_to_all_with_no_bounds() {
        let query = SeriesQuery {
            from_ts: None,
            to_ts: None,
            from_seq: None,
            to_seq: None,
            limit: 1000,
        };
        assert!(matches!(resolve_range(&query).unwrap(), SeriesRange::All));
    }

    #[test]
    fn resolve_range_rejects_mixed_time_and_seq_bounds() {
        let query = SeriesQuery {
            from_ts: Some(1),
            to_ts: None,
            from_seq: Some(1),
            to_seq: None,
            limit: 1000,
        };
        assert!(resolve_range(&query).is_err());
    }

    #[test]
    fn resolve_range_accepts_time_only_bounds() {
        let query = SeriesQuery {
            from_ts: Some(1),
            to_ts: Some(2),
            from_seq: None,
            to_seq: None,
            limit: 1000,
        };
        assert!(matches!(
            resolve_range(&query).unwrap(),
            SeriesRange::Time { .. }
        ));
    }

    #[test]
    fn resolve_range_accepts_seq_only_bounds() {
        let query = SeriesQuery {
            from_ts: None,
            to_ts: None,
            from_seq: Some(1),
            to_seq: Some(2),
            limit: 1000,
        };
        assert!(matches!(
            resolve_range(&query).unwrap(),
            SeriesRange::Seq { .. }
        ));
    }
}
