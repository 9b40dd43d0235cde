//! A richer end-to-end exercise than `tests/simple.rs`: enumerations, floats, arrays,
//! sequences, a stream-event-context and event-context scope, a `loglevel` attribute, and a
//! writer-path round-trip through [`ctf_ir::field_value::FieldValue::serialize`] written to a
//! real file and read back via [`ctf_ir::ReadMedium`].
use ctf_ir::event_class::AttributeValue;
use ctf_ir::field_class::{enumeration_add_mapping, struct_add_field, ByteOrder, Encoding, FieldClass, IntegerBase};
use ctf_ir::field_value::FieldValue;
use ctf_ir::{BifirReader, ClockClass, EventClass, FieldValueKind, ReadMedium, StreamClass, Trace};
use pretty_assertions::assert_eq;
use std::io::Write;
use test_log::test;

fn u8_fc() -> FieldClass {
    FieldClass::new_integer(8, false, IntegerBase::default(), Encoding::default(), ByteOrder::default()).unwrap()
}
fn u16_be() -> FieldClass {
    FieldClass::new_integer(16, false, IntegerBase::default(), Encoding::default(), ByteOrder::BigEndian).unwrap()
}
fn u32_be() -> FieldClass {
    FieldClass::new_integer(32, false, IntegerBase::default(), Encoding::default(), ByteOrder::BigEndian).unwrap()
}

/// A stream with: packet header (magic, stream_id), packet context (packet_size,
/// content_size, sequence_number), event header (id, timestamp mapped to a clock), a
/// stream-event-context (cpu_id), and three event classes:
/// - `"enums"`: an enumeration field plus a `loglevel` attribute.
/// - `"floats"`: an f32 and an f64 field plus an event-context scope.
/// - `"arrays"`: a fixed-length array of u8 and a sequence of u8 whose length is a sibling
///   field, exercising both compound kinds end to end.
fn full_trace() -> Trace {
    let trace = Trace::new();

    let packet_header = FieldClass::new_struct(8);
    struct_add_field(&packet_header, "magic", u32_be()).unwrap();
    struct_add_field(&packet_header, "stream_id", u32_be()).unwrap();
    trace.set_packet_header(packet_header).unwrap();

    let packet_context = FieldClass::new_struct(8);
    struct_add_field(&packet_context, "packet_size", u32_be()).unwrap();
    struct_add_field(&packet_context, "content_size", u32_be()).unwrap();
    struct_add_field(&packet_context, "sequence_number", u32_be()).unwrap();

    let event_header = FieldClass::new_struct(8);
    struct_add_field(&event_header, "id", u8_fc()).unwrap();
    struct_add_field(&event_header, "timestamp", u32_be()).unwrap();

    let stream_event_context = FieldClass::new_struct(8);
    struct_add_field(&stream_event_context, "cpu_id", u8_fc()).unwrap();

    let sc = StreamClass::new(0);
    sc.set_packet_context(packet_context).unwrap();
    sc.set_event_header(event_header).unwrap();
    sc.set_stream_event_context(stream_event_context).unwrap();
    sc.set_mapped_clock(ClockClass::new("timer")).unwrap();
    trace.add_stream_class(sc.clone()).unwrap();

    let enum_container = u8_fc();
    let state_enum = FieldClass::new_enumeration(enum_container).unwrap();
    enumeration_add_mapping(&state_enum, "IDLE", 0, 0).unwrap();
    enumeration_add_mapping(&state_enum, "RUNNING", 1, 19).unwrap();
    enumeration_add_mapping(&state_enum, "STOPPED", 20, 255).unwrap();
    let enums_payload = FieldClass::new_struct(8);
    struct_add_field(&enums_payload, "state", state_enum).unwrap();
    let enums_ec = EventClass::new(0, "enums", enums_payload).unwrap();
    enums_ec.set_attribute("loglevel", AttributeValue::Int(2)).unwrap();
    sc.add_event_class(enums_ec).unwrap();

    let f32_fc = FieldClass::new_float(8, 24, ByteOrder::BigEndian).unwrap();
    let f64_fc = FieldClass::new_float(11, 53, ByteOrder::BigEndian).unwrap();
    let floats_payload = FieldClass::new_struct(8);
    struct_add_field(&floats_payload, "f32", f32_fc).unwrap();
    struct_add_field(&floats_payload, "f64", f64_fc).unwrap();
    let floats_ec = EventClass::new(1, "floats", floats_payload).unwrap();
    let floats_context = FieldClass::new_struct(8);
    struct_add_field(&floats_context, "ercc", u32_be()).unwrap();
    floats_ec.set_context(floats_context).unwrap();
    sc.add_event_class(floats_ec).unwrap();

    let arrays_payload = FieldClass::new_struct(8);
    struct_add_field(&arrays_payload, "fixed", FieldClass::new_array(4, u8_fc())).unwrap();
    struct_add_field(&arrays_payload, "n", u8_fc()).unwrap();
    struct_add_field(&arrays_payload, "variable", FieldClass::new_sequence("n", u8_fc())).unwrap();
    let arrays_ec = EventClass::new(2, "arrays", arrays_payload).unwrap();
    sc.add_event_class(arrays_ec).unwrap();

    trace
}

fn unsigned_field(value: &FieldValue, name: &str) -> u64 {
    match value.get_field_by_name(name).unwrap().kind() {
        FieldValueKind::Unsigned(n) => *n,
        other => panic!("expected unsigned field '{name}', got {other:?}"),
    }
}

fn unsigned(v: &FieldValue) -> u64 {
    match v.kind() {
        FieldValueKind::Unsigned(n) => *n,
        other => panic!("expected unsigned, got {other:?}"),
    }
}

fn push_be_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

/// Hand-encodes one packet carrying all three event classes, mirroring the bit layout
/// `full_trace`'s schema describes: packet header, packet context, then each event's
/// header + stream-event-context + (context, for `floats`) + payload, in order.
fn encode_packet() -> Vec<u8> {
    let mut body = Vec::new();

    // enums event: header{id=0, ts=0}, sec{cpu_id=1}, payload{state=5 -> RUNNING}
    body.push(0);
    push_be_u32(&mut body, 0);
    body.push(1);
    body.push(5);

    // floats event: header{id=1, ts=1}, sec{cpu_id=1}, context{ercc=7}, payload{f32, f64}
    body.push(1);
    push_be_u32(&mut body, 1);
    body.push(1);
    push_be_u32(&mut body, 7);
    body.extend_from_slice(&1.5f32.to_be_bytes());
    body.extend_from_slice(&2.5f64.to_be_bytes());

    // arrays event: header{id=2, ts=2}, sec{cpu_id=1}, payload{fixed=[1,2,3,4], n=3, variable=[9,8,7]}
    body.push(2);
    push_be_u32(&mut body, 2);
    body.push(1);
    body.extend_from_slice(&[1, 2, 3, 4]);
    body.push(3);
    body.extend_from_slice(&[9, 8, 7]);

    // header(magic, stream_id) + context(packet_size, content_size, sequence_number) = 5 * 32 bits
    let fixed_bits = 32 * 5;
    let content_size_bits = fixed_bits + (body.len() as u32 * 8);

    let mut out = Vec::new();
    push_be_u32(&mut out, 0xC1FC_1FC1);
    push_be_u32(&mut out, 0);
    let packet_size_bits = content_size_bits; // no trailing padding in this fixture
    push_be_u32(&mut out, packet_size_bits);
    push_be_u32(&mut out, content_size_bits);
    push_be_u32(&mut out, 7); // sequence_number
    out.extend_from_slice(&body);
    out
}

#[test]
fn full_trace_decodes_enums_floats_and_arrays() {
    let trace = full_trace();
    let bytes = encode_packet();
    let mut reader = BifirReader::new(trace, ctf_ir::SliceMedium::new(&bytes));

    let header = reader.get_header().unwrap().unwrap();
    assert_eq!(unsigned_field(&header, "stream_id"), 0);
    let context = reader.get_context().unwrap().unwrap();
    assert_eq!(unsigned_field(&context, "sequence_number"), 7);

    let enums = reader.get_next_event().unwrap().unwrap();
    assert_eq!(enums.event_class.name().as_str(), "enums");
    assert_eq!(enums.event_class.attribute("loglevel"), Some(AttributeValue::Int(2)));
    assert_eq!(unsigned_field(enums.stream_event_context.as_ref().unwrap(), "cpu_id"), 1);
    assert_eq!(unsigned_field(&enums.payload, "state"), 5);

    let floats = reader.get_next_event().unwrap().unwrap();
    assert_eq!(floats.event_class.name().as_str(), "floats");
    assert_eq!(unsigned_field(floats.context.as_ref().unwrap(), "ercc"), 7);
    match floats.payload.get_field_by_name("f32").unwrap().kind() {
        FieldValueKind::Float(v) => assert!((v.0 - 1.5).abs() < 1e-6),
        other => panic!("expected float, got {other:?}"),
    }
    match floats.payload.get_field_by_name("f64").unwrap().kind() {
        FieldValueKind::Float(v) => assert!((v.0 - 2.5).abs() < 1e-12),
        other => panic!("expected float, got {other:?}"),
    }

    let arrays = reader.get_next_event().unwrap().unwrap();
    assert_eq!(arrays.event_class.name().as_str(), "arrays");
    let FieldValueKind::Array(fixed) = arrays.payload.get_field_by_name("fixed").unwrap().kind() else {
        unreachable!()
    };
    assert_eq!(fixed.iter().map(unsigned).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    let FieldValueKind::Sequence(variable) = arrays.payload.get_field_by_name("variable").unwrap().kind() else {
        unreachable!()
    };
    assert_eq!(variable.iter().map(unsigned).collect::<Vec<_>>(), vec![9, 8, 7]);

    assert!(reader.get_next_event().unwrap().is_none());
}

/// Writer-path round-trip: builds a payload value tree by hand,
/// serializes it, writes the bytes to a real temp file, then decodes it back through
/// [`BifirReader`] over a [`ReadMedium`] and checks the values survive bit-for-bit.
#[test]
fn serialize_then_decode_round_trip_via_temp_file() {
    let u16_field = u16_be();
    let payload_fc = FieldClass::new_struct(8);
    struct_add_field(&payload_fc, "a", u8_fc()).unwrap();
    struct_add_field(&payload_fc, "b", u16_field).unwrap();

    let mut value = FieldValue::create(&payload_fc);
    value.get_field_by_name_mut("a").unwrap().set_unsigned(9).unwrap();
    value.get_field_by_name_mut("b").unwrap().set_unsigned(4660).unwrap(); // 0x1234

    let mut encoded = Vec::new();
    value.serialize(&mut encoded, 0).unwrap();
    assert_eq!(encoded, vec![9, 0x12, 0x34]);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&encoded).unwrap();
    file.flush().unwrap();

    let read_back = std::fs::read(file.path()).unwrap();
    assert_eq!(read_back, encoded);

    let mut cursor = ctf_ir::bitcursor::AlignedCursor::default();
    let scopes = ctf_ir::btr::ScopeValues::default();
    let decoded = ctf_ir::btr::decode_scope(&payload_fc, &read_back, &mut cursor, &scopes, ctf_ir::Scope::EventPayload).unwrap();
    assert_eq!(unsigned_field(&decoded, "a"), 9);
    assert_eq!(unsigned_field(&decoded, "b"), 4660);

    // Also exercise the ReadMedium path directly against the same bytes.
    let reopened = std::fs::File::open(file.path()).unwrap();
    let mut medium = ReadMedium::new(reopened);
    let chunk = ctf_ir::Medium::request_bytes(&mut medium, 64).unwrap();
    assert_eq!(chunk, &encoded[..]);
}
