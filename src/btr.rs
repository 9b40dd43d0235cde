//! Binary type reader: a stateful visitor that walks a field class against a byte buffer,
//! producing a field-value tree.
//!
//! Per DESIGN.md, this crate simplifies true mid-field suspension: `decode_scope` assumes
//! its buffer already holds the whole scope (the caller sizes its request using the packet
//! context before calling in), and surfaces [`DecodeError::Again`] rather than resuming a
//! half-decoded field.
use crate::bitcursor::{apply_byte_order, read_bits_msb, AlignedCursor};
use crate::error::DecodeError;
use crate::field_class::{ByteOrder, FieldClass, FieldClassKind};
use crate::field_value::{FieldValue, FieldValueKind};
use crate::path::{FieldPath, Scope, CURRENT_ELEMENT};
use crate::resolver::EnvValue;
use internment::Intern;
use tracing::trace;

/// The field-value roots of scopes already fully decoded earlier in the same packet, in
/// on-wire layout order. Mirrors [`crate::resolver::ScopeRoots`] but holds decoded values
/// instead of schema nodes.
#[derive(Clone, Debug, Default)]
pub struct ScopeValues {
    pub packet_header: Option<FieldValue>,
    pub packet_context: Option<FieldValue>,
    pub event_header: Option<FieldValue>,
    pub stream_event_context: Option<FieldValue>,
    pub event_context: Option<FieldValue>,
    pub event_payload: Option<FieldValue>,
}

impl ScopeValues {
    pub fn get(&self, scope: Scope) -> Option<&FieldValue> {
        match scope {
            Scope::PacketHeader => self.packet_header.as_ref(),
            Scope::PacketContext => self.packet_context.as_ref(),
            Scope::EventHeader => self.event_header.as_ref(),
            Scope::StreamEventContext => self.stream_event_context.as_ref(),
            Scope::EventContext => self.event_context.as_ref(),
            Scope::EventPayload => self.event_payload.as_ref(),
        }
    }

    pub fn set(&mut self, scope: Scope, value: FieldValue) {
        match scope {
            Scope::PacketHeader => self.packet_header = Some(value),
            Scope::PacketContext => self.packet_context = Some(value),
            Scope::EventHeader => self.event_header = Some(value),
            Scope::StreamEventContext => self.stream_event_context = Some(value),
            Scope::EventContext => self.event_context = Some(value),
            Scope::EventPayload => self.event_payload = Some(value),
        }
    }
}

fn walk_value_indexes(mut current: FieldValue, indexes: &[i64]) -> Option<FieldValue> {
    for &idx in indexes {
        if idx == CURRENT_ELEMENT {
            // A resolved reference through an array/sequence element is not supported by this
            // reader's sequence-length/variant-tag lookup (see DESIGN.md).
            return None;
        }
        current = current.get_field_by_index(idx as usize)?.clone();
    }
    Some(current)
}

/// Resolves an already-validated [`FieldPath`] against either the scope root currently being
/// decoded (using the fields of that scope's root struct decoded so far) or an earlier,
/// already fully-decoded scope.
fn resolve_decoded_path(
    scopes: &ScopeValues,
    current_scope: Scope,
    root_fields_so_far: &[(Intern<String>, FieldValue)],
    path: &FieldPath,
) -> Option<FieldValue> {
    if path.root() == current_scope {
        let (first, rest) = path.indexes().split_first()?;
        if *first == CURRENT_ELEMENT {
            return None;
        }
        let head = root_fields_so_far.get(*first as usize)?.1.clone();
        walk_value_indexes(head, rest)
    } else {
        let root = scopes.get(path.root())?.clone();
        walk_value_indexes(root, path.indexes())
    }
}

fn resolved_byte_order(order: ByteOrder) -> ByteOrder {
    if order == ByteOrder::Native {
        if cfg!(target_endian = "little") {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    } else {
        order
    }
}

fn decode_unsigned(buf: &[u8], cursor: &mut AlignedCursor, size_bits: u8, order: ByteOrder) -> Result<u64, DecodeError> {
    cursor.align_to(if size_bits % 8 == 0 { 8 } else { 1 });
    let raw = read_bits_msb(buf, cursor, size_bits)?;
    Ok(apply_byte_order(raw, size_bits, resolved_byte_order(order)))
}

fn sign_extend(value: u64, size_bits: u8) -> i64 {
    if size_bits == 64 {
        return value as i64;
    }
    let shift = 64 - size_bits;
    ((value << shift) as i64) >> shift
}

/// Decodes `fc` out of `buf` at `cursor`, resolving sequence lengths and variant tags against
/// `scopes` (earlier scopes) and `root_fields_so_far` (siblings already decoded within the
/// current scope's root struct).
pub fn decode_node(
    fc: &FieldClass,
    buf: &[u8],
    cursor: &mut AlignedCursor,
    scopes: &ScopeValues,
    current_scope: Scope,
    root_fields_so_far: &[(Intern<String>, FieldValue)],
) -> Result<FieldValue, DecodeError> {
    cursor.align_to(fc.alignment());
    let kind_snapshot = fc.kind_ref().kind_name();
    trace!(kind = kind_snapshot, bit = cursor.cursor_bits(), "decoding field");

    match &*fc.kind_ref() {
        FieldClassKind::Integer(i) => {
            let raw = decode_unsigned(buf, cursor, i.size_bits, i.byte_order)?;
            let mut v = FieldValue::create(fc);
            if i.signed {
                v.set_signed(sign_extend(raw, i.size_bits))
                    .map_err(|e| DecodeError::Invalid(e.to_string()))?;
            } else {
                v.set_unsigned(raw).map_err(|e| DecodeError::Invalid(e.to_string()))?;
            }
            Ok(v)
        }
        FieldClassKind::Float(f) => {
            let size_bits = f.size_bits() as u8;
            let raw = decode_unsigned(buf, cursor, size_bits, f.byte_order)?;
            let value = if size_bits == 32 {
                f32::from_bits(raw as u32) as f64
            } else if size_bits == 64 {
                f64::from_bits(raw)
            } else {
                return Err(DecodeError::Invalid(format!("unsupported float width {size_bits}")));
            };
            let mut v = FieldValue::create(fc);
            v.set_float(value).map_err(|e| DecodeError::Invalid(e.to_string()))?;
            Ok(v)
        }
        FieldClassKind::Enumeration(e) => {
            let FieldClassKind::Integer(container) = &*e.container.kind_ref() else {
                return Err(DecodeError::Invalid("enumeration container must be an integer".into()));
            };
            let raw = decode_unsigned(buf, cursor, container.size_bits, container.byte_order)?;
            let mut v = FieldValue::create(fc);
            if container.signed {
                v.set_signed(sign_extend(raw, container.size_bits))
                    .map_err(|e| DecodeError::Invalid(e.to_string()))?;
            } else {
                v.set_unsigned(raw).map_err(|e| DecodeError::Invalid(e.to_string()))?;
            }
            Ok(v)
        }
        FieldClassKind::String(_) => {
            cursor.align_to(8);
            let mut bytes = Vec::new();
            loop {
                let b = read_bits_msb(buf, cursor, 8)? as u8;
                if b == 0 {
                    break;
                }
                bytes.push(b);
            }
            let mut v = FieldValue::create(fc);
            v.set_string(String::from_utf8_lossy(&bytes).to_string())
                .map_err(|e| DecodeError::Invalid(e.to_string()))?;
            Ok(v)
        }
        FieldClassKind::Struct(s) => {
            let mut fields = Vec::with_capacity(s.fields.len());
            for field in &s.fields {
                let value = decode_node(&field.fc, buf, cursor, scopes, current_scope, root_fields_so_far)?;
                fields.push((field.name, value));
            }
            Ok(FieldValue::create_struct_from(fc, fields))
        }
        FieldClassKind::Variant(v) => {
            let path = v
                .resolved_tag_field_path
                .clone()
                .ok_or_else(|| DecodeError::Invalid("variant has no resolved tag path".into()))?;
            let tag_value = resolve_decoded_path(scopes, current_scope, root_fields_so_far, &path)
                .ok_or_else(|| DecodeError::Invalid("variant tag reference did not resolve to a decoded value".into()))?;
            let discriminant = match tag_value.kind() {
                FieldValueKind::Signed(n) => *n,
                FieldValueKind::Unsigned(n) => *n as i64,
                _ => return Err(DecodeError::Invalid("variant tag value is not an integer".into())),
            };
            let tag_enum_fc = v
                .resolved_tag_enum_fc
                .clone()
                .ok_or_else(|| DecodeError::Invalid("variant has no resolved tag enumeration".into()))?;
            let label = match &*tag_enum_fc.kind_ref() {
                FieldClassKind::Enumeration(e) => e.labels_for(discriminant).next(),
                _ => None,
            }
            .ok_or_else(|| DecodeError::Invalid("variant tag value matched no enumeration label".into()))?;
            let selector_fc = v
                .selectors
                .iter()
                .find(|(l, _)| *l == label)
                .map(|(_, fc)| fc.clone())
                .ok_or_else(|| DecodeError::Invalid(format!("no variant selector for label '{label}'")))?;
            let selected = decode_node(&selector_fc, buf, cursor, scopes, current_scope, root_fields_so_far)?;
            Ok(FieldValue::create_variant_from(fc, label, selected))
        }
        FieldClassKind::Array(a) => {
            let mut elements = Vec::with_capacity(a.length as usize);
            for _ in 0..a.length {
                elements.push(decode_node(&a.element, buf, cursor, scopes, current_scope, root_fields_so_far)?);
            }
            Ok(FieldValue::create_array_from(fc, elements))
        }
        FieldClassKind::Sequence(s) => {
            let length = if let Some(path) = &s.resolved_length_field_path {
                let len_value = resolve_decoded_path(scopes, current_scope, root_fields_so_far, path)
                    .ok_or_else(|| DecodeError::Invalid("sequence length reference did not resolve to a decoded value".into()))?;
                match len_value.kind() {
                    FieldValueKind::Unsigned(n) => *n,
                    FieldValueKind::Signed(n) if *n >= 0 => *n as u64,
                    _ => return Err(DecodeError::Invalid("sequence length value is not a non-negative integer".into())),
                }
            } else {
                return Err(DecodeError::Invalid("sequence has no resolved length".into()));
            };
            let mut elements = Vec::with_capacity(length as usize);
            for _ in 0..length {
                elements.push(decode_node(&s.element, buf, cursor, scopes, current_scope, root_fields_so_far)?);
            }
            Ok(FieldValue::create_sequence_from(fc, elements))
        }
        FieldClassKind::Unknown => Err(DecodeError::Invalid("cannot decode an unknown field class".into())),
    }
}

/// Decodes an entire scope, whose field class must be a struct, resolving sequence/variant
/// references against `scopes` (earlier, completed scopes) and the fields of this scope's own
/// root decoded so far.
pub fn decode_scope(
    fc: &FieldClass,
    buf: &[u8],
    cursor: &mut AlignedCursor,
    scopes: &ScopeValues,
    scope: Scope,
) -> Result<FieldValue, DecodeError> {
    let FieldClassKind::Struct(s) = &*fc.kind_ref() else {
        return Err(DecodeError::Invalid("a scope root field class must be a struct".into()));
    };
    let fields_fc: Vec<_> = s.fields.iter().map(|f| (f.name, f.fc.clone())).collect();
    drop(fc.kind_ref());

    cursor.align_to(fc.alignment());
    let mut fields = Vec::with_capacity(fields_fc.len());
    for (name, field_fc) in fields_fc {
        let value = decode_node(&field_fc, buf, cursor, scopes, scope, &fields)?;
        fields.push((name, value));
    }
    Ok(FieldValue::create_struct_from(fc, fields))
}

/// An `env.` constant length never needs decode-time resolution; surfaced
/// here so `decode_node`'s sequence arm could be extended to accept it if a future schema uses
/// a constant-length sequence (currently every [`FieldClass::new_sequence`] call sets a textual
/// reference, resolved to either a field path or an `EnvValue` by the validator).
pub fn constant_length(value: &EnvValue) -> Option<u64> {
    match value {
        EnvValue::Integer(n) if *n >= 0 => Some(*n as u64),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::field_class::{
        enumeration_add_mapping, struct_add_field, variant_add_selector, variant_set_tag_name, Encoding, IntegerBase,
    };
    use crate::validator;

    fn u8_fc() -> FieldClass {
        FieldClass::new_integer(8, false, IntegerBase::default(), Encoding::default(), ByteOrder::default()).unwrap()
    }
    fn u16_fc(order: ByteOrder) -> FieldClass {
        FieldClass::new_integer(16, false, IntegerBase::default(), Encoding::default(), order).unwrap()
    }

    #[test]
    fn decodes_flat_struct_of_integers() {
        let st = FieldClass::new_struct(8);
        struct_add_field(&st, "a", u8_fc()).unwrap();
        struct_add_field(&st, "b", u16_fc(ByteOrder::BigEndian)).unwrap();

        let buf = [7u8, 1, 44];
        let mut cursor = AlignedCursor::default();
        let scopes = ScopeValues::default();
        let value = decode_scope(&st, &buf, &mut cursor, &scopes, Scope::EventPayload).unwrap();
        assert_eq!(value.get_field_by_name("a").unwrap().kind(), &FieldValueKind::Unsigned(7));
        assert_eq!(value.get_field_by_name("b").unwrap().kind(), &FieldValueKind::Unsigned(300));
    }

    #[test]
    fn decodes_sequence_whose_length_is_a_sibling_field() {
        let payload = FieldClass::new_struct(8);
        struct_add_field(&payload, "n", u8_fc()).unwrap();
        struct_add_field(&payload, "s", FieldClass::new_sequence("n", u8_fc())).unwrap();

        let mut roots = crate::resolver::ScopeRoots::default();
        roots.set(Scope::EventPayload, payload.clone());
        let env = Default::default();
        validator::validate(&mut roots, &env, &[Scope::EventPayload]).unwrap();
        let validated = roots.event_payload.unwrap();

        let buf = [3u8, 10, 20, 30];
        let mut cursor = AlignedCursor::default();
        let scopes = ScopeValues::default();
        let value = decode_scope(&validated, &buf, &mut cursor, &scopes, Scope::EventPayload).unwrap();
        let FieldValueKind::Sequence(elements) = value.get_field_by_name("s").unwrap().kind() else {
            unreachable!()
        };
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[2].kind(), &FieldValueKind::Unsigned(30));
    }

    #[test]
    fn decodes_variant_selected_by_sibling_enum_tag() {
        let payload = FieldClass::new_struct(8);
        let tag_enum = FieldClass::new_enumeration(u8_fc()).unwrap();
        enumeration_add_mapping(&tag_enum, "a", 0, 0).unwrap();
        enumeration_add_mapping(&tag_enum, "b", 1, 1).unwrap();
        struct_add_field(&payload, "choice", tag_enum).unwrap();

        let variant = FieldClass::new_variant();
        variant_set_tag_name(&variant, "choice").unwrap();
        variant_add_selector(&variant, "a", u8_fc()).unwrap();
        variant_add_selector(&variant, "b", u16_fc(ByteOrder::BigEndian)).unwrap();
        struct_add_field(&payload, "v", variant).unwrap();

        let mut roots = crate::resolver::ScopeRoots::default();
        roots.set(Scope::EventPayload, payload);
        let env = Default::default();
        validator::validate(&mut roots, &env, &[Scope::EventPayload]).unwrap();
        let validated = roots.event_payload.unwrap();

        let buf = [1u8, 1, 44];
        let mut cursor = AlignedCursor::default();
        let scopes = ScopeValues::default();
        let value = decode_scope(&validated, &buf, &mut cursor, &scopes, Scope::EventPayload).unwrap();
        let FieldValueKind::Variant(Some((label, v))) = value.get_field_by_name("v").unwrap().kind() else {
            unreachable!()
        };
        assert_eq!(label.as_str(), "b");
        assert_eq!(v.kind(), &FieldValueKind::Unsigned(300));
    }

    #[test]
    fn truncated_buffer_yields_again() {
        let st = FieldClass::new_struct(8);
        struct_add_field(&st, "a", u16_fc(ByteOrder::BigEndian)).unwrap();
        let buf = [1u8];
        let mut cursor = AlignedCursor::default();
        let scopes = ScopeValues::default();
        assert!(matches!(
            decode_scope(&st, &buf, &mut cursor, &scopes, Scope::EventPayload),
            Err(DecodeError::Again)
        ));
    }
}
