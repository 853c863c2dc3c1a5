//! End-to-end stream decoding through the public API, with the schema loaded
//! from JSON the way the metadata front end would deliver it.

use anyhow::Result;
use serde_json::json;

use ctfread::{
    ByteOrder, DecodeError, EventSchema, IntegerType, StreamSchema, TraceSchema, TypeNode,
    decode_stream, decode_streams,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn demo_trace() -> Result<TraceSchema> {
    let uint = |bits: u64| json!({"kind": "integer", "size-bits": bits});
    let trace: TraceSchema = serde_json::from_value(json!({
        "byte-order": "little-endian",
        "packet-header": {"kind": "struct", "members": [
            {"name": "magic", "type": uint(32)},
            {"name": "stream_id", "type": uint(32)},
        ]},
        "streams": [{
            "id": 0,
            "packet-context": {"kind": "struct", "members": [
                {"name": "content_size", "type": uint(32)},
                {"name": "packet_size", "type": uint(32)},
            ]},
            "event-header": {"kind": "struct", "members": [
                {"name": "id", "type": uint(8)},
                {"name": "timestamp", "type": uint(8)},
            ]},
            "clock": {"frequency": 1000, "offset-seconds": 0, "offset-cycles": 100},
            "events": [
                {"id": 0, "name": "state-change", "payload": {"kind": "struct", "members": [
                    {"name": "state", "type": {"kind": "enum",
                        "repr": uint(8),
                        "mappings": [
                            {"lo": 0, "hi": 0, "label": "INIT"},
                            {"lo": 1, "hi": 1, "label": "RUNNING"},
                        ]}},
                    {"name": "count", "type": uint(16)},
                ]}},
                {"id": 1, "name": "message", "payload": {"kind": "struct", "members": [
                    {"name": "msg", "type": {"kind": "string"}},
                ]}},
            ],
        }],
    }))?;
    trace.validate()?;
    Ok(trace)
}

/// One packet: header, context, a state-change and a message event, then
/// padding up to the declared packet size.
fn demo_buffer() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&0x0001_FAC1u32.to_le_bytes()); // magic
    buf.extend_from_slice(&0u32.to_le_bytes()); // stream_id
    buf.extend_from_slice(&208u32.to_le_bytes()); // content_size, bits
    buf.extend_from_slice(&224u32.to_le_bytes()); // packet_size, bits
    buf.extend_from_slice(&[0, 5, 1, 7, 0]); // id 0, ts 5, RUNNING, count 7
    buf.extend_from_slice(&[1, 9]); // id 1, ts 9
    buf.extend_from_slice(b"hi\0");
    buf.extend_from_slice(&[0xAA, 0xBB]); // padding
    buf
}

#[test]
fn json_schema_decodes_demo_packet() -> Result<()> {
    init_logging();
    let trace = demo_trace()?;
    let packets = decode_stream(&trace, &demo_buffer())?;
    assert_eq!(packets.len(), 1);

    let packet = &packets[0];
    let header = packet.header.as_ref().unwrap().as_struct().unwrap();
    assert_eq!(header.get_u64("magic"), Some(0x0001_FAC1));
    assert_eq!(header.get_u64("stream_id"), Some(0));

    let context = packet.context.as_ref().unwrap().as_struct().unwrap();
    assert_eq!(context.get_u64("content_size"), Some(208));

    assert_eq!(packet.events.len(), 2);
    let state_change = &packet.events[0];
    assert_eq!(state_change.name, "state-change");
    // clock offset 100 cycles on top of the raw header value
    assert_eq!(state_change.timestamp, Some(105));
    let payload = state_change.payload.as_ref().unwrap().as_struct().unwrap();
    assert_eq!(payload.get_u64("count"), Some(7));

    let message = &packet.events[1];
    assert_eq!(message.name, "message");
    assert_eq!(message.timestamp, Some(109));
    let payload = message.payload.as_ref().unwrap().as_struct().unwrap();
    match payload.get("msg").unwrap() {
        ctfread::DecodedValue::String(s) => assert_eq!(s, "hi"),
        other => panic!("expected string payload, got {other:?}"),
    }
    Ok(())
}

#[test]
fn truncated_buffer_reports_offset_and_path() -> Result<()> {
    let trace = demo_trace()?;
    let mut buf = demo_buffer();
    buf.truncate(18); // cuts into the first event's count member
    // content_size still claims 208 bits, past the truncated end
    let err = decode_stream(&trace, &buf).unwrap_err();
    assert!(matches!(err, DecodeError::OutOfBounds { .. }));
    Ok(())
}

#[test]
fn unknown_event_id_is_fatal() -> Result<()> {
    let trace = demo_trace()?;
    let mut buf = demo_buffer();
    buf[16] = 77; // first event id
    let err = decode_stream(&trace, &buf).unwrap_err();
    match err {
        DecodeError::UnknownEventId { id, offset } => {
            assert_eq!(id, 77);
            assert_eq!(offset, 16);
        }
        other => panic!("expected UnknownEventId, got {other:?}"),
    }
    Ok(())
}

#[test]
fn big_endian_sub_byte_fields_decode() -> Result<()> {
    let payload = TypeNode::Struct(ctfread::StructType::new(vec![
        ctfread::StructMember {
            name: "flags".to_string(),
            ty: TypeNode::Integer(IntegerType { align_bits: 1, ..IntegerType::unsigned(4) }),
        },
        ctfread::StructMember {
            name: "value".to_string(),
            ty: TypeNode::Integer(IntegerType { align_bits: 1, ..IntegerType::unsigned(12) }),
        },
    ]));
    let stream = StreamSchema {
        id: 0,
        packet_context: None,
        event_header: None,
        event_context: None,
        events: vec![EventSchema {
            id: 0,
            name: "packed".to_string(),
            context: None,
            payload: Some(payload),
        }],
        clock: None,
        timestamp_member: "timestamp".to_string(),
        id_member: "id".to_string(),
    };
    let trace = TraceSchema::new(ByteOrder::BigEndian, None, vec![stream])?;

    // Big-endian bit order: the first 4 bits are the high nibble.
    let packets = decode_stream(&trace, &[0xAB, 0xCD])?;
    let payload = packets[0].events[0].payload.as_ref().unwrap().as_struct().unwrap();
    assert_eq!(payload.get_u64("flags"), Some(0xA));
    assert_eq!(payload.get_u64("value"), Some(0xBCD));
    Ok(())
}

#[test]
fn parallel_stream_buffers_decode_in_input_order() -> Result<()> {
    let trace = demo_trace()?;
    let good = demo_buffer();
    let mut bad = demo_buffer();
    bad[16] = 77;

    let results = decode_streams(&trace, &[&good, &bad, &good]);
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(DecodeError::UnknownEventId { .. })));
    assert!(results[2].is_ok());
    Ok(())
}
