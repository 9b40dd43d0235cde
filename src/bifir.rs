//! Binary file/packet reader: sequences the binary type reader's per-field decoding into
//! full packets, packet header, packet context, then events in a loop bounded by the
//! packet's content size.
//!
//! The pull-model [`BifirReader`] is driven from a [`crate::medium::Medium`]; the push-model
//! [`PacketDecoder`] is a [`tokio_util::codec::Decoder`] over whole packets (see `demos/`).
use crate::bitcursor::AlignedCursor;
use crate::btr::{self, ScopeValues};
use crate::error::{DecodeError, MediumStatus};
use crate::event_class::EventClass;
use crate::field_value::{FieldValue, FieldValueKind};
use crate::medium::Medium;
use crate::path::Scope;
use crate::stream_class::StreamClass;
use crate::trace::Trace;
use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::debug;

/// How many bytes a [`BifirReader`] asks its medium for at a time when it runs out; an
/// arbitrary, generous default.
const REQUEST_CHUNK: usize = 4096;

/// Driven by successful scope decodes and by the content of decoded fields.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum ReaderState {
    Init,
    PacketHeader,
    PacketContext,
    EventHeader,
    StreamEventContext,
    EventContext,
    EventPayload,
    PacketEnd,
}

/// An event fully decoded by [`BifirReader::get_next_event`]: the matched event class plus
/// every scope's decoded value that belongs to it.
#[derive(Clone, Debug)]
pub struct DecodedEvent {
    pub event_class: EventClass,
    pub header: FieldValue,
    pub stream_event_context: Option<FieldValue>,
    pub context: Option<FieldValue>,
    pub payload: FieldValue,
}

fn field_as_u64(value: &FieldValue, name: &str) -> Result<u64, DecodeError> {
    let field = value
        .get_field_by_name(name)
        .ok_or_else(|| DecodeError::Invalid(format!("missing expected field '{name}'")))?;
    match field.kind() {
        FieldValueKind::Unsigned(n) => Ok(*n),
        FieldValueKind::Signed(n) if *n >= 0 => Ok(*n as u64),
        other => Err(DecodeError::Invalid(format!(
            "field '{name}' is not a non-negative integer (got {other:?})"
        ))),
    }
}

/// The core, buffer-agnostic packet state machine: given a byte slice that may or may not
/// yet hold a whole packet, decodes as much as it can and reports [`DecodeError::Again`] for
/// the rest. Shared by [`BifirReader`] (pull-model, growing its own buffer from a [`Medium`])
/// and [`PacketDecoder`] (push-model, handed bytes by `tokio_util`).
struct PacketCursor {
    trace: Trace,
    state: ReaderState,
    stream_class: Option<StreamClass>,
    event_class: Option<EventClass>,
    cursor: AlignedCursor,
    packet_size_bits: Option<u64>,
    content_size_bits: Option<u64>,
    scopes: ScopeValues,
}

impl PacketCursor {
    fn new(trace: Trace) -> Self {
        Self {
            trace,
            state: ReaderState::Init,
            stream_class: None,
            event_class: None,
            cursor: AlignedCursor::default(),
            packet_size_bits: None,
            content_size_bits: None,
            scopes: ScopeValues::default(),
        }
    }

    fn reset_for_next_packet(&mut self) {
        self.state = ReaderState::Init;
        self.stream_class = None;
        self.event_class = None;
        self.cursor = AlignedCursor::default();
        self.packet_size_bits = None;
        self.content_size_bits = None;
        self.scopes = ScopeValues::default();
    }

    /// `get_header()` decodes `trace.packet.header`, selecting the stream class from its
    /// `stream_id` field. A trace with no packet header advances directly to packet
    /// context.
    fn header(&mut self, buf: &[u8]) -> Result<Option<FieldValue>, DecodeError> {
        if self.state != ReaderState::Init {
            return Ok(self.scopes.packet_header.clone());
        }
        let Some(fc) = self.trace.packet_header() else {
            self.state = ReaderState::PacketHeader;
            if self.trace.stream_classes().len() == 1 {
                self.stream_class = self.trace.stream_classes().into_iter().next();
            }
            return Ok(None);
        };
        let mut attempt = self.cursor;
        let value = btr::decode_scope(&fc, buf, &mut attempt, &self.scopes, Scope::PacketHeader)?;
        let stream_id = field_as_u64(&value, "stream_id")?;
        let stream_class = self
            .trace
            .stream_class_by_id(stream_id)
            .ok_or_else(|| DecodeError::Invalid(format!("no stream class with id {stream_id}")))?;
        self.cursor = attempt;
        self.stream_class = Some(stream_class);
        self.scopes.set(Scope::PacketHeader, value.clone());
        self.state = ReaderState::PacketHeader;
        Ok(Some(value))
    }

    /// `get_context()` decodes `stream.packet.context`, extracting the conventional
    /// `packet_size`/`content_size` fields (bits) that bound event decoding and packet
    /// skipping.
    fn context(&mut self, buf: &[u8]) -> Result<Option<FieldValue>, DecodeError> {
        if self.state != ReaderState::PacketHeader {
            if matches!(
                self.state,
                ReaderState::PacketContext
                    | ReaderState::EventHeader
                    | ReaderState::StreamEventContext
                    | ReaderState::EventContext
                    | ReaderState::EventPayload
            ) {
                return Ok(self.scopes.packet_context.clone());
            }
            return Err(DecodeError::Invalid("get_context called out of sequence".into()));
        }
        let stream_class = self
            .stream_class
            .clone()
            .ok_or_else(|| DecodeError::Invalid("no stream class selected before packet context".into()))?;
        let Some(fc) = stream_class.packet_context() else {
            self.state = ReaderState::PacketContext;
            return Ok(None);
        };
        let mut attempt = self.cursor;
        let value = btr::decode_scope(&fc, buf, &mut attempt, &self.scopes, Scope::PacketContext)?;
        let packet_size_bits = field_as_u64(&value, "packet_size")?;
        let content_size_bits = field_as_u64(&value, "content_size")?;
        self.cursor = attempt;
        self.packet_size_bits = Some(packet_size_bits);
        self.content_size_bits = Some(content_size_bits);
        self.scopes.set(Scope::PacketContext, value.clone());
        self.state = ReaderState::PacketContext;
        Ok(Some(value))
    }

    fn content_remaining(&self) -> bool {
        match self.content_size_bits {
            Some(bits) => (self.cursor.cursor_bits() as u64) < bits,
            // No packet context to bound content: caller learns the end from medium Eof.
            None => true,
        }
    }

    /// `get_next_event()` decodes one event's header, stream-event-context, context and
    /// payload, selecting the event class from the header's `id` field. Ensures
    /// `get_header`/`get_context` have run first (idempotently, on a trace with no header or
    /// context scope). Returns `Ok(None)` once the packet's content is exhausted; the caller
    /// decides whether that means the next packet or the end of the stream.
    fn next_event(&mut self, buf: &[u8]) -> Result<Option<DecodedEvent>, DecodeError> {
        if self.state == ReaderState::Init {
            self.header(buf)?;
        }
        if self.state == ReaderState::PacketHeader {
            self.context(buf)?;
        }
        if !matches!(
            self.state,
            ReaderState::PacketContext
                | ReaderState::EventHeader
                | ReaderState::StreamEventContext
                | ReaderState::EventContext
                | ReaderState::EventPayload
        ) {
            return Err(DecodeError::Invalid("get_next_event called out of sequence".into()));
        }

        if !self.content_remaining() {
            self.state = ReaderState::PacketEnd;
            return Ok(None);
        }

        let stream_class = self
            .stream_class
            .clone()
            .ok_or_else(|| DecodeError::Invalid("no stream class selected".into()))?;
        let event_header_fc = stream_class
            .event_header()
            .ok_or_else(|| DecodeError::Invalid("stream class has no event header".into()))?;

        let mut attempt = self.cursor;
        let header = btr::decode_scope(&event_header_fc, buf, &mut attempt, &self.scopes, Scope::EventHeader)?;
        let event_id = field_as_u64(&header, "id")?;
        let event_class = stream_class
            .event_class_by_id(event_id)
            .ok_or_else(|| DecodeError::Invalid(format!("no event class with id {event_id}")))?;
        self.cursor = attempt;
        self.scopes.set(Scope::EventHeader, header.clone());
        self.event_class = Some(event_class.clone());
        self.state = ReaderState::EventHeader;

        let stream_event_context = match stream_class.stream_event_context() {
            Some(fc) => {
                let mut attempt = self.cursor;
                let value =
                    btr::decode_scope(&fc, buf, &mut attempt, &self.scopes, Scope::StreamEventContext)?;
                self.cursor = attempt;
                self.scopes.set(Scope::StreamEventContext, value.clone());
                Some(value)
            }
            None => None,
        };
        self.state = ReaderState::StreamEventContext;

        let context = match event_class.context() {
            Some(fc) => {
                let mut attempt = self.cursor;
                let value = btr::decode_scope(&fc, buf, &mut attempt, &self.scopes, Scope::EventContext)?;
                self.cursor = attempt;
                self.scopes.set(Scope::EventContext, value.clone());
                Some(value)
            }
            None => None,
        };
        self.state = ReaderState::EventContext;

        let payload_fc = event_class.payload();
        let mut attempt = self.cursor;
        let payload = btr::decode_scope(&payload_fc, buf, &mut attempt, &self.scopes, Scope::EventPayload)?;
        self.cursor = attempt;
        self.scopes.set(Scope::EventPayload, payload.clone());
        self.state = ReaderState::EventPayload;

        debug!(event_id, "decoded event");
        Ok(Some(DecodedEvent {
            event_class,
            header,
            stream_event_context,
            context,
            payload,
        }))
    }

    /// Bytes consumed from the start of the current packet so far, rounded up to whole bytes
    /// (a medium only lends whole bytes).
    fn consumed_bytes(&self) -> usize {
        self.cursor.cursor_bits().div_ceil(8)
    }
}

/// Pull-model reader: grows its own buffer from a [`Medium`] as each scope demands more
/// bytes.
pub struct BifirReader<M> {
    medium: M,
    cursor: PacketCursor,
    buf: Vec<u8>,
}

impl<M: Medium> BifirReader<M> {
    pub fn new(trace: Trace, medium: M) -> Self {
        Self {
            medium,
            cursor: PacketCursor::new(trace),
            buf: Vec::new(),
        }
    }

    fn grow_buffer(&mut self) -> Result<(), DecodeError> {
        match self.medium.request_bytes(REQUEST_CHUNK) {
            Ok(slice) => {
                if slice.is_empty() {
                    return Err(DecodeError::Eof);
                }
                self.buf.extend_from_slice(slice);
                Ok(())
            }
            Err(MediumStatus::Again) => Err(DecodeError::Again),
            Err(MediumStatus::Eof) => Err(DecodeError::Eof),
            Err(MediumStatus::Error) => Err(DecodeError::Invalid("medium reported an error".into())),
        }
    }

    /// Retries `op` against `self.buf`, pulling more bytes from the medium each time it
    /// reports [`DecodeError::Again`], until it succeeds or the medium itself runs dry.
    fn drive<T>(&mut self, mut op: impl FnMut(&mut PacketCursor, &[u8]) -> Result<T, DecodeError>) -> Result<T, DecodeError> {
        loop {
            match op(&mut self.cursor, &self.buf) {
                Err(DecodeError::Again) => self.grow_buffer()?,
                other => return other,
            }
        }
    }

    pub fn get_header(&mut self) -> Result<Option<FieldValue>, DecodeError> {
        self.drive(|cursor, buf| cursor.header(buf))
    }

    pub fn get_context(&mut self) -> Result<Option<FieldValue>, DecodeError> {
        self.drive(|cursor, buf| cursor.context(buf))
    }

    /// Decodes the next event, transparently crossing into subsequent packets: once a
    /// packet's content is exhausted, skips to its `packet_size_bits` boundary and resumes
    /// decoding from a fresh packet header, exactly as an explicit `goto_next_packet()`
    /// would, rather than requiring the caller to notice end-of-packet and drive that call
    /// itself. Returns `Ok(None)` only once the medium has no further packet to offer.
    pub fn get_next_event(&mut self) -> Result<Option<DecodedEvent>, DecodeError> {
        loop {
            match self.drive(|cursor, buf| cursor.next_event(buf))? {
                Some(event) => return Ok(Some(event)),
                None => {
                    if self.advance_to_next_packet_if_more_data()? {
                        continue;
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Skips the bytes of the current (exhausted) packet, up to `packet_size_bits` (or
    /// however much of it was consumed, if that is unknown), and resets the cursor to
    /// `Init`. Returns `false` without resetting anything if the medium has nothing beyond
    /// the current packet to offer, distinguishing a clean end of stream from a truncated
    /// next packet.
    fn advance_to_next_packet_if_more_data(&mut self) -> Result<bool, DecodeError> {
        let total_bytes = match self.cursor.packet_size_bits {
            Some(bits) => (bits as usize).div_ceil(8),
            None => self.cursor.consumed_bytes(),
        };
        loop {
            if self.buf.len() > total_bytes {
                self.buf.drain(0..total_bytes);
                self.cursor.reset_for_next_packet();
                return Ok(true);
            }
            match self.grow_buffer() {
                Ok(()) => continue,
                Err(DecodeError::Eof) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
    }

    /// `goto_next_packet()` skips whatever remains of the current packet (using
    /// `packet_size_bits` if known, else letting the medium run out) and resets to `Init`,
    /// ready for the next packet's header.
    pub fn goto_next_packet(&mut self) -> Result<(), DecodeError> {
        if let Some(total_bits) = self.cursor.packet_size_bits {
            let total_bytes = (total_bits as usize).div_ceil(8);
            while self.buf.len() < total_bytes {
                self.grow_buffer()?;
            }
            self.buf.drain(0..total_bytes);
        } else {
            self.buf.clear();
        }
        self.cursor.reset_for_next_packet();
        Ok(())
    }

    /// `reset()` forgets the cursor entirely; the next bytes pulled from the medium are
    /// assumed to be the first bytes of a fresh packet.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.cursor.reset_for_next_packet();
    }
}

/// A whole packet, as assembled by [`PacketDecoder`].
#[derive(Clone, Debug)]
pub struct DecodedPacket {
    pub header: Option<FieldValue>,
    pub context: Option<FieldValue>,
    pub events: Vec<DecodedEvent>,
}

fn decode_packet_from_slice(trace: &Trace, buf: &[u8]) -> Result<(DecodedPacket, usize), DecodeError> {
    let mut cursor = PacketCursor::new(trace.clone());
    let header = cursor.header(buf)?;
    let context = cursor.context(buf)?;
    let mut events = Vec::new();
    while let Some(event) = cursor.next_event(buf)? {
        events.push(event);
    }
    let consumed = match cursor.packet_size_bits {
        Some(bits) => (bits as usize).div_ceil(8),
        None => cursor.consumed_bytes(),
    };
    if buf.len() < consumed {
        return Err(DecodeError::Again);
    }
    Ok((DecodedPacket { header, context, events }, consumed))
}

/// Push-model half: a [`tokio_util::codec::Decoder`] over whole packets (see
/// `demos/events_async.rs`). `Ok(None)` on a partial packet tells the framework to wait for
/// more bytes, exactly as [`BifirReader`]'s `Again` does for the pull model. Each call decodes
/// at most one packet's worth of events, regardless of how many further packets are already
/// buffered in `src`.
pub struct PacketDecoder {
    trace: Trace,
}

impl PacketDecoder {
    pub fn new(trace: Trace) -> Self {
        Self { trace }
    }
}

impl Decoder for PacketDecoder {
    type Item = DecodedPacket;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        match decode_packet_from_slice(&self.trace, src) {
            Ok((packet, consumed)) => {
                src.advance(consumed);
                Ok(Some(packet))
            }
            Err(DecodeError::Again) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            Ok(None)
        } else {
            self.decode(src)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock_class::ClockClass;
    use crate::event_class::EventClass;
    use crate::field_class::{struct_add_field, ByteOrder, Encoding, FieldClass, IntegerBase};
    use crate::medium::SliceMedium;
    use crate::stream_class::StreamClass;

    fn u32_fc() -> FieldClass {
        FieldClass::new_integer(32, false, IntegerBase::default(), Encoding::default(), ByteOrder::BigEndian).unwrap()
    }
    fn u8_fc() -> FieldClass {
        FieldClass::new_integer(8, false, IntegerBase::default(), Encoding::default(), ByteOrder::default()).unwrap()
    }

    /// Packet header `{magic, stream_id}`, packet context `{packet_size, content_size}`,
    /// event header `{id}`, single event class with payload `{x: u8}`.
    fn two_packet_trace() -> Trace {
        let trace = Trace::new();

        let packet_header = FieldClass::new_struct(8);
        struct_add_field(&packet_header, "magic", u32_fc()).unwrap();
        struct_add_field(&packet_header, "stream_id", u32_fc()).unwrap();
        trace.set_packet_header(packet_header).unwrap();

        let packet_context = FieldClass::new_struct(8);
        struct_add_field(&packet_context, "packet_size", u32_fc()).unwrap();
        struct_add_field(&packet_context, "content_size", u32_fc()).unwrap();

        let event_header = FieldClass::new_struct(8);
        struct_add_field(&event_header, "id", u8_fc()).unwrap();

        let sc = StreamClass::new(0);
        sc.set_packet_context(packet_context).unwrap();
        sc.set_event_header(event_header).unwrap();
        sc.set_mapped_clock(ClockClass::new("clk")).unwrap();
        trace.add_stream_class(sc.clone()).unwrap();

        let payload = FieldClass::new_struct(8);
        struct_add_field(&payload, "x", u8_fc()).unwrap();
        let ec = EventClass::new(0, "ev", payload).unwrap();
        sc.add_event_class(ec).unwrap();

        trace
    }

    /// Encodes one packet: `magic`, `stream_id=0`, `packet_size`/`content_size` bits, one
    /// event `{id: 0, x}`, padded out to a fixed total packet size with zero bytes.
    const PACKET_SIZE_BITS: u32 = 256;

    fn encode_packet(x: u8) -> Vec<u8> {
        let header_and_context_bits = 32 * 4; // magic, stream_id, packet_size, content_size
        let event_bits = 8 + 8; // id, x
        let content_size_bits = header_and_context_bits + event_bits;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xC1FC_1FC1u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&PACKET_SIZE_BITS.to_be_bytes());
        bytes.extend_from_slice(&content_size_bits.to_be_bytes());
        bytes.push(0); // event id
        bytes.push(x);
        bytes.resize((PACKET_SIZE_BITS as usize).div_ceil(8), 0);
        bytes
    }

    /// Three consecutive `get_next_event` calls, with no explicit `goto_next_packet` in
    /// between, walk across the packet boundary on their own: first event, second packet's
    /// event, then a clean `None` once both packets are spent.
    #[test]
    fn get_next_event_crosses_packet_boundary_without_explicit_goto() {
        let trace = two_packet_trace();
        let mut all = encode_packet(0xAA);
        all.extend(encode_packet(0xBB));

        let mut reader = BifirReader::new(trace, SliceMedium::new(&all));

        let first = reader.get_next_event().unwrap().unwrap();
        assert_eq!(field_as_u64(&first.payload, "x").unwrap(), 0xAA);

        let second = reader.get_next_event().unwrap().unwrap();
        assert_eq!(field_as_u64(&second.payload, "x").unwrap(), 0xBB);

        assert!(reader.get_next_event().unwrap().is_none());
    }

    /// An explicit `goto_next_packet` after the first packet's content is exhausted also
    /// reaches the second packet's event, as an alternative to the fully automatic crossing.
    #[test]
    fn explicit_goto_next_packet_also_reaches_second_packet() {
        let trace = two_packet_trace();
        let mut all = encode_packet(0xAA);
        all.extend(encode_packet(0xBB));

        let mut reader = BifirReader::new(trace, SliceMedium::new(&all));

        let first = reader.get_next_event().unwrap().unwrap();
        assert_eq!(field_as_u64(&first.payload, "x").unwrap(), 0xAA);

        reader.goto_next_packet().unwrap();

        let second = reader.get_next_event().unwrap().unwrap();
        assert_eq!(field_as_u64(&second.payload, "x").unwrap(), 0xBB);
    }

    #[test]
    fn decoder_yields_packets_as_bytes_arrive() {
        let trace = two_packet_trace();
        let bytes = encode_packet(0x42);

        let mut decoder = PacketDecoder::new(trace);
        let mut src = BytesMut::new();
        src.extend_from_slice(&bytes[..8]);
        assert!(decoder.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(&bytes[8..]);
        let packet = decoder.decode(&mut src).unwrap().unwrap();
        assert_eq!(packet.events.len(), 1);
        assert_eq!(field_as_u64(&packet.events[0].payload, "x").unwrap(), 0x42);
        assert!(src.is_empty());
    }

    #[test]
    fn again_on_truncated_packet() {
        let trace = two_packet_trace();
        let bytes = encode_packet(0x11);
        let mut reader = BifirReader::new(trace, SliceMedium::new(&bytes[..4]));
        assert!(matches!(reader.get_header(), Err(DecodeError::Eof)));
    }
}
