//! Tagged binary codec for control events.
//!
//! Every field is written as `(tag: u8, len: u32 big-endian, bytes)`. Readers
//! iterate the fields of a block and skip tags they do not recognize, which
//! is what keeps old readers compatible with newer writers. Nested messages
//! (payloads, table names, assignments) are themselves field blocks carried
//! in a single outer field.

use crate::error::WireError;
use crate::{
    CommitCompletePayload, CommitReadyPayload, CommitRequestPayload, CommitResponsePayload,
    CommitTablePayload, DataFileDescriptor, Event, EventPayload, EventType, TableName,
    TopicPartitionOffset, MAX_EVENT_SIZE, WIRE_VERSION,
};
use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

// Envelope tags
const TAG_ID: u8 = 1;
const TAG_GROUP_ID: u8 = 2;
const TAG_TYPE: u8 = 3;
const TAG_TIMESTAMP: u8 = 4;
const TAG_PAYLOAD: u8 = 5;

// Payload tags (shared across payload types; meaning depends on the type)
const TAG_COMMIT_ID: u8 = 1;
const TAG_TABLE: u8 = 2;
const TAG_PARTITION: u8 = 3;
const TAG_DATA_FILES: u8 = 4;
const TAG_DELETE_FILES: u8 = 5;
const TAG_ASSIGNMENT: u8 = 2;
const TAG_SNAPSHOT_ID: u8 = 3;
const TAG_VTTS: u8 = 4;
const TAG_COMPLETE_VTTS: u8 = 2;

// Table name tags
const TAG_NAMESPACE_LEVEL: u8 = 1;
const TAG_NAME: u8 = 2;

// Assignment tags
const TAG_TP_TOPIC: u8 = 1;
const TAG_TP_PARTITION: u8 = 2;
const TAG_TP_OFFSET: u8 = 3;
const TAG_TP_TIMESTAMP: u8 = 4;

/// Encode an event into a control-topic record value.
pub fn encode_event(event: &Event) -> Result<Bytes, WireError> {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_u8(WIRE_VERSION);

    put_field(&mut buf, TAG_ID, event.id.as_bytes());
    put_field(&mut buf, TAG_GROUP_ID, event.group_id.as_bytes());
    put_field(&mut buf, TAG_TYPE, &[event.event_type().as_u8()]);
    put_field(&mut buf, TAG_TIMESTAMP, &event.timestamp_ms.to_be_bytes());

    let payload = encode_payload(&event.payload)?;
    put_field(&mut buf, TAG_PAYLOAD, &payload);

    if buf.len() > MAX_EVENT_SIZE {
        return Err(WireError::TooLarge(buf.len()));
    }
    Ok(buf.freeze())
}

/// Decode a control-topic record value into an event.
pub fn decode_event(bytes: &[u8]) -> Result<Event, WireError> {
    if bytes.is_empty() {
        return Err(WireError::Truncated("version"));
    }
    let version = bytes[0];
    if version > WIRE_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }

    let mut id = None;
    let mut group_id = None;
    let mut event_type = None;
    let mut timestamp_ms = None;
    let mut payload_bytes: Option<&[u8]> = None;

    for field in Fields::new(&bytes[1..]) {
        let (tag, value) = field?;
        match tag {
            TAG_ID => id = Some(read_uuid("id", value)?),
            TAG_GROUP_ID => group_id = Some(read_string("group_id", value)?),
            TAG_TYPE => {
                let raw = *value.first().ok_or(WireError::Truncated("type"))?;
                event_type =
                    Some(EventType::from_u8(raw).ok_or(WireError::UnknownEventType(raw))?);
            }
            TAG_TIMESTAMP => timestamp_ms = Some(read_i64("timestamp", value)?),
            TAG_PAYLOAD => payload_bytes = Some(value),
            _ => {} // unknown envelope field, skip
        }
    }

    let event_type = event_type.ok_or(WireError::MissingField("type"))?;
    let payload_bytes = payload_bytes.ok_or(WireError::MissingField("payload"))?;

    Ok(Event {
        id: id.ok_or(WireError::MissingField("id"))?,
        group_id: group_id.ok_or(WireError::MissingField("group_id"))?,
        timestamp_ms: timestamp_ms.ok_or(WireError::MissingField("timestamp"))?,
        payload: decode_payload(event_type, payload_bytes)?,
    })
}

fn encode_payload(payload: &EventPayload) -> Result<BytesMut, WireError> {
    let mut buf = BytesMut::with_capacity(128);
    match payload {
        EventPayload::CommitRequest(p) => {
            put_field(&mut buf, TAG_COMMIT_ID, p.commit_id.as_bytes());
        }
        EventPayload::CommitResponse(p) => {
            put_field(&mut buf, TAG_COMMIT_ID, p.commit_id.as_bytes());
            let table = encode_table_name(&p.table_name);
            put_field(&mut buf, TAG_TABLE, &table);
            let partition = json_bytes("partition", &p.partition)?;
            put_field(&mut buf, TAG_PARTITION, &partition);
            let data = json_bytes("data_files", &p.data_files)?;
            put_field(&mut buf, TAG_DATA_FILES, &data);
            let deletes = json_bytes("delete_files", &p.delete_files)?;
            put_field(&mut buf, TAG_DELETE_FILES, &deletes);
        }
        EventPayload::CommitReady(p) => {
            put_field(&mut buf, TAG_COMMIT_ID, p.commit_id.as_bytes());
            for assignment in &p.assignments {
                let block = encode_assignment(assignment);
                put_field(&mut buf, TAG_ASSIGNMENT, &block);
            }
        }
        EventPayload::CommitTable(p) => {
            put_field(&mut buf, TAG_COMMIT_ID, p.commit_id.as_bytes());
            let table = encode_table_name(&p.table_name);
            put_field(&mut buf, TAG_TABLE, &table);
            if let Some(snapshot_id) = p.snapshot_id {
                put_field(&mut buf, TAG_SNAPSHOT_ID, &snapshot_id.to_be_bytes());
            }
            if let Some(vtts) = p.vtts_ms {
                put_field(&mut buf, TAG_VTTS, &vtts.to_be_bytes());
            }
        }
        EventPayload::CommitComplete(p) => {
            put_field(&mut buf, TAG_COMMIT_ID, p.commit_id.as_bytes());
            if let Some(vtts) = p.vtts_ms {
                put_field(&mut buf, TAG_COMPLETE_VTTS, &vtts.to_be_bytes());
            }
        }
    }
    Ok(buf)
}

fn decode_payload(event_type: EventType, bytes: &[u8]) -> Result<EventPayload, WireError> {
    match event_type {
        EventType::CommitRequest => {
            let mut commit_id = None;
            for field in Fields::new(bytes) {
                let (tag, value) = field?;
                if tag == TAG_COMMIT_ID {
                    commit_id = Some(read_uuid("commit_id", value)?);
                }
            }
            Ok(EventPayload::CommitRequest(CommitRequestPayload {
                commit_id: commit_id.ok_or(WireError::MissingField("commit_id"))?,
            }))
        }
        EventType::CommitResponse => {
            let mut commit_id = None;
            let mut table_name = None;
            let mut partition = serde_json::Value::Null;
            let mut data_files = Vec::new();
            let mut delete_files = Vec::new();
            for field in Fields::new(bytes) {
                let (tag, value) = field?;
                match tag {
                    TAG_COMMIT_ID => commit_id = Some(read_uuid("commit_id", value)?),
                    TAG_TABLE => table_name = Some(decode_table_name(value)?),
                    TAG_PARTITION => partition = json_value("partition", value)?,
                    TAG_DATA_FILES => data_files = json_files("data_files", value)?,
                    TAG_DELETE_FILES => delete_files = json_files("delete_files", value)?,
                    _ => {}
                }
            }
            Ok(EventPayload::CommitResponse(CommitResponsePayload {
                commit_id: commit_id.ok_or(WireError::MissingField("commit_id"))?,
                table_name: table_name.ok_or(WireError::MissingField("table_name"))?,
                partition,
                data_files,
                delete_files,
            }))
        }
        EventType::CommitReady => {
            let mut commit_id = None;
            let mut assignments = Vec::new();
            for field in Fields::new(bytes) {
                let (tag, value) = field?;
                match tag {
                    TAG_COMMIT_ID => commit_id = Some(read_uuid("commit_id", value)?),
                    TAG_ASSIGNMENT => assignments.push(decode_assignment(value)?),
                    _ => {}
                }
            }
            Ok(EventPayload::CommitReady(CommitReadyPayload {
                commit_id: commit_id.ok_or(WireError::MissingField("commit_id"))?,
                assignments,
            }))
        }
        EventType::CommitTable => {
            let mut commit_id = None;
            let mut table_name = None;
            let mut snapshot_id = None;
            let mut vtts_ms = None;
            for field in Fields::new(bytes) {
                let (tag, value) = field?;
                match tag {
                    TAG_COMMIT_ID => commit_id = Some(read_uuid("commit_id", value)?),
                    TAG_TABLE => table_name = Some(decode_table_name(value)?),
                    TAG_SNAPSHOT_ID => snapshot_id = Some(read_i64("snapshot_id", value)?),
                    TAG_VTTS => vtts_ms = Some(read_i64("vtts", value)?),
                    _ => {}
                }
            }
            Ok(EventPayload::CommitTable(CommitTablePayload {
                commit_id: commit_id.ok_or(WireError::MissingField("commit_id"))?,
                table_name: table_name.ok_or(WireError::MissingField("table_name"))?,
                snapshot_id,
                vtts_ms,
            }))
        }
        EventType::CommitComplete => {
            let mut commit_id = None;
            let mut vtts_ms = None;
            for field in Fields::new(bytes) {
                let (tag, value) = field?;
                match tag {
                    TAG_COMMIT_ID => commit_id = Some(read_uuid("commit_id", value)?),
                    TAG_COMPLETE_VTTS => vtts_ms = Some(read_i64("vtts", value)?),
                    _ => {}
                }
            }
            Ok(EventPayload::CommitComplete(CommitCompletePayload {
                commit_id: commit_id.ok_or(WireError::MissingField("commit_id"))?,
                vtts_ms,
            }))
        }
    }
}

fn encode_table_name(table: &TableName) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64);
    for level in &table.namespace {
        put_field(&mut buf, TAG_NAMESPACE_LEVEL, level.as_bytes());
    }
    put_field(&mut buf, TAG_NAME, table.name.as_bytes());
    buf
}

fn decode_table_name(bytes: &[u8]) -> Result<TableName, WireError> {
    let mut namespace = Vec::new();
    let mut name = None;
    for field in Fields::new(bytes) {
        let (tag, value) = field?;
        match tag {
            TAG_NAMESPACE_LEVEL => namespace.push(read_string("namespace", value)?),
            TAG_NAME => name = Some(read_string("table", value)?),
            _ => {}
        }
    }
    Ok(TableName {
        namespace,
        name: name.ok_or(WireError::MissingField("table"))?,
    })
}

fn encode_assignment(tpo: &TopicPartitionOffset) -> BytesMut {
    let mut buf = BytesMut::with_capacity(48);
    put_field(&mut buf, TAG_TP_TOPIC, tpo.topic.as_bytes());
    put_field(&mut buf, TAG_TP_PARTITION, &tpo.partition.to_be_bytes());
    if let Some(offset) = tpo.offset {
        put_field(&mut buf, TAG_TP_OFFSET, &offset.to_be_bytes());
    }
    if let Some(ts) = tpo.timestamp_ms {
        put_field(&mut buf, TAG_TP_TIMESTAMP, &ts.to_be_bytes());
    }
    buf
}

fn decode_assignment(bytes: &[u8]) -> Result<TopicPartitionOffset, WireError> {
    let mut topic = None;
    let mut partition = None;
    let mut offset = None;
    let mut timestamp_ms = None;
    for field in Fields::new(bytes) {
        let (tag, value) = field?;
        match tag {
            TAG_TP_TOPIC => topic = Some(read_string("topic", value)?),
            TAG_TP_PARTITION => partition = Some(read_i32("partition", value)?),
            TAG_TP_OFFSET => offset = Some(read_i64("offset", value)?),
            TAG_TP_TIMESTAMP => timestamp_ms = Some(read_i64("timestamp", value)?),
            _ => {}
        }
    }
    Ok(TopicPartitionOffset {
        topic: topic.ok_or(WireError::MissingField("topic"))?,
        partition: partition.ok_or(WireError::MissingField("partition"))?,
        offset,
        timestamp_ms,
    })
}

// ============================================================================
// Field primitives
// ============================================================================

fn put_field(buf: &mut BytesMut, tag: u8, value: &[u8]) {
    buf.put_u8(tag);
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

/// Iterator over `(tag, value)` fields of a block.
struct Fields<'a> {
    buf: &'a [u8],
}

impl<'a> Fields<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = Result<(u8, &'a [u8]), WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.is_empty() {
            return None;
        }
        if self.buf.len() < 5 {
            self.buf = &[];
            return Some(Err(WireError::Truncated("field header")));
        }
        let tag = self.buf[0];
        let len = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
        let rest = &self.buf[5..];
        if rest.len() < len {
            self.buf = &[];
            return Some(Err(WireError::Truncated("field value")));
        }
        let (value, remainder) = rest.split_at(len);
        self.buf = remainder;
        Some(Ok((tag, value)))
    }
}

fn read_uuid(field: &'static str, value: &[u8]) -> Result<Uuid, WireError> {
    Uuid::from_slice(value).map_err(|e| WireError::invalid(field, e.to_string()))
}

fn read_string(field: &'static str, value: &[u8]) -> Result<String, WireError> {
    std::str::from_utf8(value)
        .map(str::to_string)
        .map_err(|e| WireError::invalid(field, e.to_string()))
}

fn read_i64(field: &'static str, value: &[u8]) -> Result<i64, WireError> {
    let arr: [u8; 8] = value
        .try_into()
        .map_err(|_| WireError::invalid(field, format!("expected 8 bytes, got {}", value.len())))?;
    Ok(i64::from_be_bytes(arr))
}

fn read_i32(field: &'static str, value: &[u8]) -> Result<i32, WireError> {
    let arr: [u8; 4] = value
        .try_into()
        .map_err(|_| WireError::invalid(field, format!("expected 4 bytes, got {}", value.len())))?;
    Ok(i32::from_be_bytes(arr))
}

fn json_bytes<T: serde::Serialize>(field: &'static str, value: &T) -> Result<Vec<u8>, WireError> {
    serde_json::to_vec(value).map_err(|e| WireError::invalid(field, e.to_string()))
}

fn json_value(field: &'static str, value: &[u8]) -> Result<serde_json::Value, WireError> {
    serde_json::from_slice(value).map_err(|e| WireError::invalid(field, e.to_string()))
}

fn json_files(field: &'static str, value: &[u8]) -> Result<Vec<DataFileDescriptor>, WireError> {
    serde_json::from_slice(value).map_err(|e| WireError::invalid(field, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(payload: EventPayload) {
        let event = Event::new("cg-control", payload);
        let bytes = encode_event(&event).unwrap();
        let decoded = decode_event(&bytes).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_round_trip_commit_request() {
        round_trip(EventPayload::CommitRequest(CommitRequestPayload {
            commit_id: Uuid::new_v4(),
        }));
    }

    #[test]
    fn test_round_trip_commit_response() {
        round_trip(EventPayload::CommitResponse(CommitResponsePayload {
            commit_id: Uuid::new_v4(),
            table_name: TableName::parse("db.events"),
            partition: json!({"day": "2023-05-18"}),
            data_files: vec![DataFileDescriptor::data("s3://b/data/f1.parquet", 100, 2048)],
            delete_files: vec![],
        }));
    }

    #[test]
    fn test_round_trip_commit_ready() {
        round_trip(EventPayload::CommitReady(CommitReadyPayload {
            commit_id: Uuid::new_v4(),
            assignments: vec![
                TopicPartitionOffset {
                    topic: "orders".to_string(),
                    partition: 0,
                    offset: Some(103),
                    timestamp_ms: Some(1_684_408_953_000),
                },
                TopicPartitionOffset {
                    topic: "orders".to_string(),
                    partition: 1,
                    offset: None,
                    timestamp_ms: None,
                },
            ],
        }));
    }

    #[test]
    fn test_round_trip_commit_table() {
        round_trip(EventPayload::CommitTable(CommitTablePayload {
            commit_id: Uuid::new_v4(),
            table_name: TableName::parse("db.events"),
            snapshot_id: Some(42),
            vtts_ms: Some(1_684_408_953_000),
        }));
        round_trip(EventPayload::CommitTable(CommitTablePayload {
            commit_id: Uuid::new_v4(),
            table_name: TableName::parse("db.events"),
            snapshot_id: None,
            vtts_ms: None,
        }));
    }

    #[test]
    fn test_round_trip_commit_complete() {
        round_trip(EventPayload::CommitComplete(CommitCompletePayload {
            commit_id: Uuid::new_v4(),
            vtts_ms: Some(1_684_408_953_000),
        }));
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let event = Event::new(
            "cg-control",
            EventPayload::CommitRequest(CommitRequestPayload {
                commit_id: Uuid::new_v4(),
            }),
        );
        let bytes = encode_event(&event).unwrap();

        // Append an unknown envelope field a future writer might add.
        let mut extended = BytesMut::from(&bytes[..]);
        put_field(&mut extended, 200, b"future data");

        let decoded = decode_event(&extended).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_newer_version_rejected() {
        let event = Event::new(
            "cg-control",
            EventPayload::CommitRequest(CommitRequestPayload {
                commit_id: Uuid::new_v4(),
            }),
        );
        let bytes = encode_event(&event).unwrap();
        let mut bumped = bytes.to_vec();
        bumped[0] = WIRE_VERSION + 1;
        assert!(matches!(
            decode_event(&bumped),
            Err(WireError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_truncated_event_rejected() {
        let event = Event::new(
            "cg-control",
            EventPayload::CommitRequest(CommitRequestPayload {
                commit_id: Uuid::new_v4(),
            }),
        );
        let bytes = encode_event(&event).unwrap();
        assert!(decode_event(&bytes[..bytes.len() - 3]).is_err());
        assert!(decode_event(&[]).is_err());
    }
}
