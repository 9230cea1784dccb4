// ingest-protocol: wire types shared by the gateway and the batch ingester.
//
// Device and dashboard socket frames share a single JSON envelope of the
// shape `{"event": "<name>", "data": <payload>}`. This is the one deliberate
// transport substitution from the original Socket.IO wire format: one frame
// per WebSocket text message instead of a per-event-name multiplexed
// connection. The event vocabulary and payload shapes are unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Core data model: Reading / Record
// ---------------------------------------------------------------------------

/// Where a Reading came from. Carried in `meta.source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingSource {
    Esp32,
    Socketio,
}

/// Open-schema metric bag. Values are kept as `serde_json::Value` rather
/// than a closed numeric type so unexpected fields from a device round-trip
/// untouched instead of being dropped at the parse boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub BTreeMap<String, serde_json::Value>);

impl Payload {
    pub fn from_map(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map.into_iter().collect())
    }

    /// Numeric read of a known metric name (`min`, `max`, `avg`, `current`, ...).
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(serde_json::Value::as_f64)
    }
}

/// Metadata attached to every Reading/Record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingMeta {
    pub source: ReadingSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_device_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_identified: bool,
}

impl ReadingMeta {
    pub fn esp32(raw_device_id: Option<String>, auto_identified: bool) -> Self {
        Self {
            source: ReadingSource::Esp32,
            raw_device_id,
            auto_identified,
        }
    }

    pub fn socketio() -> Self {
        Self {
            source: ReadingSource::Socketio,
            raw_device_id: None,
            auto_identified: false,
        }
    }
}

/// A measurement in flight, before sequence assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub node_id: String,
    /// Milliseconds since the Unix epoch, assigned by the gateway at receipt.
    pub ts: i64,
    pub payload: Payload,
    pub meta: ReadingMeta,
}

/// A Reading with a gap-free per-node sequence number, as written to the
/// time-series store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub node_id: String,
    /// Strictly positive; unique together with `node_id`.
    pub seq: i64,
    pub ts: i64,
    pub payload: Payload,
    pub meta: ReadingMeta,
}

impl Record {
    pub fn from_reading(reading: Reading, seq: i64) -> Self {
        Self {
            node_id: reading.node_id,
            seq,
            ts: reading.ts,
            payload: reading.payload,
            meta: reading.meta,
        }
    }
}

/// Encode a Reading as the durable queue's UTF-8 JSON line format.
pub fn encode_reading(reading: &Reading) -> Result<String, serde_json::Error> {
    serde_json::to_string(reading)
}

/// Decode a durable queue entry back into a Reading.
pub fn decode_reading(entry: &str) -> Result<Reading, serde_json::Error> {
    serde_json::from_str(entry)
}

// ---------------------------------------------------------------------------
// Socket wire protocol: device/dashboard -> gateway
// ---------------------------------------------------------------------------

/// `identify {type, nodeId|deviceId, metadata?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyFrame {
    #[serde(rename = "type")]
    pub role: IdentifyRole,
    #[serde(rename = "nodeId", default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(rename = "deviceId", default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl IdentifyFrame {
    /// The id a node identifies under, preferring `nodeId` over `deviceId`.
    pub fn resolved_node_id(&self) -> Option<&str> {
        self.node_id
            .as_deref()
            .or(self.device_id.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifyRole {
    Node,
    Client,
}

/// `/save` may arrive as a parsed JSON object or as a JSON-encoded string;
/// both are accepted per §4.1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SaveBody {
    Object(serde_json::Map<String, serde_json::Value>),
    Text(String),
}

impl SaveBody {
    /// Normalize into a plain object, parsing the string form if needed.
    pub fn into_object(
        self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, serde_json::Error> {
        match self {
            SaveBody::Object(obj) => Ok(obj),
            SaveBody::Text(text) => match serde_json::from_str(&text)? {
                serde_json::Value::Object(obj) => Ok(obj),
                other => {
                    let mut obj = serde_json::Map::new();
                    obj.insert("value".to_owned(), other);
                    Ok(obj)
                }
            },
        }
    }
}

/// Legacy `data`/`bulk:data` reading shape: a node id plus an open metric bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// `subscribe nodeId` / `unsubscribe nodeId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomFrame {
    #[serde(rename = "nodeId")]
    pub node_id: String,
}

/// Every frame a device or dashboard may send to the gateway, tagged by
/// `event` with the payload under `data` — e.g.
/// `{"event":"/save","data":{"deviceId":"ESP32_A","min":10}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    #[serde(rename = "identify")]
    Identify(IdentifyFrame),
    #[serde(rename = "/save")]
    Save(SaveBody),
    #[serde(rename = "data")]
    Data(DataFrame),
    #[serde(rename = "bulk:data")]
    BulkData(Vec<DataFrame>),
    #[serde(rename = "subscribe")]
    Subscribe(RoomFrame),
    #[serde(rename = "unsubscribe")]
    Unsubscribe(RoomFrame),
}

// ---------------------------------------------------------------------------
// Socket wire protocol: gateway -> dashboard
// ---------------------------------------------------------------------------

/// Snapshot of a connected node, as sent in `nodes:list` and `/api/nodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub connected_at: i64,
    pub last_data_at: Option<i64>,
}

/// Broadcast frames fanned out to every connected dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum DashboardFrame {
    #[serde(rename = "node:connected")]
    NodeConnected {
        node_id: String,
        metadata: serde_json::Map<String, serde_json::Value>,
    },
    #[serde(rename = "node:disconnected")]
    NodeDisconnected { node_id: String },
    #[serde(rename = "nodes:list")]
    NodesList(Vec<NodeInfo>),
    #[serde(rename = "data:live")]
    DataLive(Reading),
}

// ---------------------------------------------------------------------------
// Socket wire protocol: gateway -> device (commands)
// ---------------------------------------------------------------------------

/// Fixed command-name-to-wire-event mapping (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetThreshold,
    Stop,
    Start,
    Reset,
}

impl Command {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "setThreshold" => Some(Self::SetThreshold),
            "stop" => Some(Self::Stop),
            "start" => Some(Self::Start),
            "reset" => Some(Self::Reset),
            _ => None,
        }
    }

    pub fn wire_event(self) -> &'static str {
        match self {
            Self::SetThreshold => "/threshold/set",
            Self::Stop => "/stop",
            Self::Start => "/start",
            Self::Reset => "/reset",
        }
    }
}

/// The two-element `["<event>", data]` frame sent to a device. Tuple structs
/// with more than one field serialize as a JSON array, which gives us this
/// shape without a hand-rolled `Serialize` impl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame(pub String, pub serde_json::Value);

impl CommandFrame {
    pub fn new(command: Command, data: serde_json::Value) -> Self {
        Self(command.wire_event().to_owned(), data)
    }
}

// ---------------------------------------------------------------------------
// REST surface types (§4.4)
// ---------------------------------------------------------------------------

/// `GET /api/series/:nodeId` query parameters. Time range and sequence range
/// are mutually exclusive (enforced by the gateway, not by this type).
#[derive(Debug, Clone, Deserialize)]
pub struct SeriesQuery {
    #[serde(rename = "fromTs", default)]
    pub from_ts: Option<i64>,
    #[serde(rename = "toTs", default)]
    pub to_ts: Option<i64>,
    #[serde(rename = "fromSeq", default)]
    pub from_seq: Option<i64>,
    #[serde(rename = "toSeq", default)]
    pub to_seq: Option<i64>,
    #[serde(default = "default_series_limit")]
    pub limit: i64,
}

fn default_series_limit() -> i64 {
    1000
}

/// `GET /api/sync/:nodeId` query parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncQuery {
    #[serde(rename = "lastSeq")]
    pub last_seq: Option<i64>,
}

/// Body of `POST /api/command/:nodeId`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// `metrics:<nodeId>` hash contents, also the body of `GET /api/metrics/:nodeId`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub total_records: i64,
    pub last_flush: Option<i64>,
}

/// The frozen REST error envelope from §7: `{success:false, error:<message>}`.
#[derive(Debug, Clone, Serialize)]
pub struct HttpErrorEnvelope {
    pub success: bool,
    pub error: String,
}

impl HttpErrorEnvelope {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_save_object_round_trips() {
        let json = r#"{"event":"/save","data":{"deviceId":"ESP32_A","min":10,"max":20}}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame {
            ClientFrame::Save(SaveBody::Object(obj)) => {
                assert_eq!(obj.get("deviceId").unwrap(), "ESP32_A");
            }
            other => panic!("expected Save(Object), got {other:?}"),
        }
    }

    #[test]
    fn client_frame_save_string_body_parses_to_object() {
        let json = r#"{"event":"/save","data":"{\"deviceId\":\"ESP32_A\",\"avg\":15}"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        let ClientFrame::Save(body) = frame else {
            panic!("expected Save variant");
        };
        let obj = body.into_object().unwrap();
        assert_eq!(obj.get("deviceId").unwrap(), "ESP32_A");
        assert_eq!(obj.get("avg").unwrap(), 15.0);
    }

    #[test]
    fn client_frame_bulk_data_carries_multiple_readings() {
        let json = r#"{"event":"bulk:data","data":[{"nodeId":"A","current":1},{"nodeId":"A","current":2}]}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame {
            ClientFrame::BulkData(items) => assert_eq!(items.len(), 2),
            other => panic!("expected BulkData, got {other:?}"),
        }
    }

    #[test]
    fn identify_frame_prefers_node_id_over_device_id() {
        let frame = IdentifyFrame {
            role: IdentifyRole::Node,
            node_id: Some("A".to_owned()),
            device_id: Some("B".to_owned()),
            metadata: serde_json::Map::new(),
        };
        assert_eq!(frame.resolved_node_id(), Some("A"));
    }

    #[test]
    fn identify_frame_falls_back_to_device_id() {
        let frame = IdentifyFrame {
            role: IdentifyRole::Node,
            node_id: None,
            device_id: Some("B".to_owned()),
            metadata: serde_json::Map::new(),
        };
        assert_eq!(frame.resolved_node_id(), Some("B"));
    }

    #[test]
    fn command_frame_serializes_as_two_element_array() {
        let frame =
            CommandFrame::new(Command::SetThreshold, serde_json::json!({"threshold": 80}));
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"["/threshold/set",{"threshold":80}]"#);
    }

    #[test]
    fn command_parse_rejects_unknown_names() {
        assert!(Command::parse("setThreshold").is_some());
        assert!(Command::parse("frobnicate").is_none());
    }

    #[test]
    fn dashboard_frame_data_live_round_trips_without_seq() {
        let reading = Reading {
            node_id: "A".to_owned(),
            ts: 1000,
            payload: Payload(BTreeMap::from([("avg".to_owned(), serde_json::json!(15.0))])),
            meta: ReadingMeta::esp32(Some("ESP32_A".to_owned()), true),
        };
        let frame = DashboardFrame::DataLive(reading.clone());
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"event\":\"data:live\""));
        let back: DashboardFrame = serde_json::from_str(&json).unwrap();
        match back {
            DashboardFrame::DataLive(r) => assert_eq!(r, reading),
            other => panic!("expected DataLive, got {other:?}"),
        }
    }

    #[test]
    fn record_from_reading_carries_seq() {
        let reading = Reading {
            node_id: "A".to_owned(),
            ts: 1000,
            payload: Payload::default(),
            meta: ReadingMeta::socketio(),
        };
        let record = Record::from_reading(reading, 7);
        assert_eq!(record.seq, 7);
        assert_eq!(record.node_id, "A");
    }

    #[test]
    fn encode_decode_reading_round_trips() {
        let reading = Reading {
            node_id: "A".to_owned(),
            ts: 42,
            payload: Payload(BTreeMap::from([(
                "current".to_owned(),
                serde_json::json!(3.5),
            )])),
            meta: ReadingMeta::socketio(),
        };
        let encoded = encode_reading(&reading).unwrap();
        let decoded = decode_reading(&encoded).unwrap();
        assert_eq!(decoded, reading);
    }

    #[test]
    fn payload_metric_reads_known_numeric_field() {
        let payload = Payload(BTreeMap::from([
            ("avg".to_owned(), serde_json::json!(15.5)),
            ("label".to_owned(), serde_json::json!("ok")),
        ]));
        assert_eq!(payload.metric("avg"), Some(15.5));
        assert_eq!(payload.metric("label"), None);
        assert_eq!(payload.metric("missing"), None);
    }
}
