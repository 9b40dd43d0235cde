//! Field-value graph: typed instances conforming to a field-class graph, created, read and
//! mutated independently of it.
use crate::bitcursor::{apply_byte_order, write_bits_msb, AlignedCursor};
use crate::clock_class::ClockClass;
use crate::error::Error;
use crate::field_class::{ByteOrder, FieldClass, FieldClassKind};
use internment::Intern;
use ordered_float::OrderedFloat;
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
pub enum FieldValueKind {
    /// A leaf (integer, float, string, enumeration) that has not yet been assigned.
    Unset,
    Signed(i64),
    Unsigned(u64),
    Float(OrderedFloat<f64>),
    String(String),
    Struct(Vec<(Intern<String>, FieldValue)>),
    /// Empty until `set_tag` selects a child.
    Variant(Option<(Intern<String>, Box<FieldValue>)>),
    Array(Vec<FieldValue>),
    /// Empty until `set_length` allocates children.
    Sequence(Vec<FieldValue>),
}

/// One node of the value tree. Owns its children directly (unlike [`FieldClass`], value
/// trees are not shared graphs): a value instance belongs to exactly one event or packet.
#[derive(Clone, Debug, Serialize)]
pub struct FieldValue {
    #[serde(skip)]
    fc: FieldClass,
    kind: FieldValueKind,
}

impl FieldValue {
    /// `create(fc)` allocates a default-initialized tree whose shape equals
    /// `fc`'s, except variants (empty), sequences (empty) and struct fields (present, each
    /// freshly defaulted).
    pub fn create(fc: &FieldClass) -> FieldValue {
        let kind = match &*fc.kind_ref() {
            FieldClassKind::Unknown
            | FieldClassKind::Integer(_)
            | FieldClassKind::Float(_)
            | FieldClassKind::Enumeration(_)
            | FieldClassKind::String(_) => FieldValueKind::Unset,
            FieldClassKind::Struct(s) => FieldValueKind::Struct(
                s.fields.iter().map(|f| (f.name, FieldValue::create(&f.fc))).collect(),
            ),
            FieldClassKind::Variant(_) => FieldValueKind::Variant(None),
            FieldClassKind::Array(a) => {
                FieldValueKind::Array((0..a.length).map(|_| FieldValue::create(&a.element)).collect())
            }
            FieldClassKind::Sequence(_) => FieldValueKind::Sequence(Vec::new()),
        };
        FieldValue { fc: fc.clone(), kind }
    }

    pub fn field_class(&self) -> &FieldClass {
        &self.fc
    }

    pub fn kind(&self) -> &FieldValueKind {
        &self.kind
    }

    pub fn get_field_by_name(&self, name: &str) -> Option<&FieldValue> {
        match &self.kind {
            FieldValueKind::Struct(fields) => fields.iter().find(|(n, _)| n.as_str() == name).map(|(_, v)| v),
            FieldValueKind::Variant(Some((label, v))) if label.as_str() == name => Some(v),
            _ => None,
        }
    }

    pub fn get_field_by_name_mut(&mut self, name: &str) -> Option<&mut FieldValue> {
        match &mut self.kind {
            FieldValueKind::Struct(fields) => fields.iter_mut().find(|(n, _)| n.as_str() == name).map(|(_, v)| v),
            FieldValueKind::Variant(Some((label, v))) if label.as_str() == name => Some(v),
            _ => None,
        }
    }

    pub fn get_field_by_index(&self, index: usize) -> Option<&FieldValue> {
        match &self.kind {
            FieldValueKind::Struct(fields) => fields.get(index).map(|(_, v)| v),
            FieldValueKind::Array(elements) | FieldValueKind::Sequence(elements) => elements.get(index),
            FieldValueKind::Variant(Some((_, v))) if index == 0 => Some(v),
            _ => None,
        }
    }

    pub fn get_field_by_index_mut(&mut self, index: usize) -> Option<&mut FieldValue> {
        match &mut self.kind {
            FieldValueKind::Struct(fields) => fields.get_mut(index).map(|(_, v)| v),
            FieldValueKind::Array(elements) | FieldValueKind::Sequence(elements) => elements.get_mut(index),
            FieldValueKind::Variant(Some((_, v))) if index == 0 => Some(v),
            _ => None,
        }
    }

    /// `variant.set_tag(label)` selects the variant's active child.
    pub fn set_tag(&mut self, label: &str) -> Result<(), Error> {
        let FieldClassKind::Variant(v) = &*self.fc.kind_ref() else {
            return Err(Error::BadType("set_tag on a non-variant value".into()));
        };
        let (interned, selector_fc) = v
            .selectors
            .iter()
            .find(|(l, _)| l.as_str() == label)
            .map(|(l, fc)| (*l, fc.clone()))
            .ok_or_else(|| Error::NotFound(label.to_string()))?;
        self.kind = FieldValueKind::Variant(Some((interned, Box::new(FieldValue::create(&selector_fc)))));
        Ok(())
    }

    /// `sequence.set_length(n)` allocates `n` default-initialized children.
    pub fn set_length(&mut self, n: usize) -> Result<(), Error> {
        let FieldClassKind::Sequence(s) = &*self.fc.kind_ref() else {
            return Err(Error::BadType("set_length on a non-sequence value".into()));
        };
        let element_fc = s.element.clone();
        self.kind = FieldValueKind::Sequence((0..n).map(|_| FieldValue::create(&element_fc)).collect());
        Ok(())
    }

    fn mapped_clock(&self) -> Option<ClockClass> {
        match &*self.fc.kind_ref() {
            FieldClassKind::Integer(i) => i.mapped_clock.clone(),
            _ => None,
        }
    }

    fn check_integer_range(&self, signed: bool, value_bits: u8) -> Result<(), Error> {
        let FieldClassKind::Integer(i) = &*self.fc.kind_ref() else {
            return Err(Error::BadType("set_signed/set_unsigned on a non-integer value".into()));
        };
        if i.signed != signed {
            return Err(Error::BadType("signedness mismatch assigning integer value".into()));
        }
        if value_bits > i.size_bits {
            return Err(Error::OutOfRange(format!(
                "value needs {value_bits} bits but field class is {} bits wide",
                i.size_bits
            )));
        }
        Ok(())
    }

    /// `set_signed(value)`. Out-of-range values fail `OutOfRange`; assigning a clock-mapped
    /// field advances that clock's monotonic `current_value`.
    pub fn set_signed(&mut self, value: i64) -> Result<(), Error> {
        let needed_bits = 64 - (value ^ (value >> 63)).leading_zeros() as u8 + 1;
        self.check_integer_range(true, needed_bits.max(1))?;
        self.kind = FieldValueKind::Signed(value);
        if let Some(clock) = self.mapped_clock() {
            clock.advance(value as u64);
        }
        Ok(())
    }

    /// `set_unsigned(value)`.
    pub fn set_unsigned(&mut self, value: u64) -> Result<(), Error> {
        let needed_bits = (64 - value.leading_zeros()).max(1) as u8;
        self.check_integer_range(false, needed_bits)?;
        self.kind = FieldValueKind::Unsigned(value);
        if let Some(clock) = self.mapped_clock() {
            clock.advance(value);
        }
        Ok(())
    }

    /// `set_float(value)`.
    pub fn set_float(&mut self, value: f64) -> Result<(), Error> {
        if !matches!(&*self.fc.kind_ref(), FieldClassKind::Float(_)) {
            return Err(Error::BadType("set_float on a non-float value".into()));
        }
        self.kind = FieldValueKind::Float(OrderedFloat(value));
        Ok(())
    }

    /// `set_string(value)`.
    pub fn set_string(&mut self, value: impl Into<String>) -> Result<(), Error> {
        if !matches!(&*self.fc.kind_ref(), FieldClassKind::String(_)) {
            return Err(Error::BadType("set_string on a non-string value".into()));
        }
        self.kind = FieldValueKind::String(value.into());
        Ok(())
    }

    /// `deep_copy`: the field-class graph is shared (cloning an `Rc` bumps its strong
    /// count); only the value tree itself is duplicated.
    pub fn deep_copy(&self) -> FieldValue {
        self.clone()
    }

    /// `validate`: every leaf must have been assigned.
    pub fn validate(&self) -> Result<(), Error> {
        match &self.kind {
            FieldValueKind::Unset => Err(Error::ValidationFailed("unassigned leaf field value".into())),
            FieldValueKind::Signed(_) | FieldValueKind::Unsigned(_) | FieldValueKind::Float(_) | FieldValueKind::String(_) => {
                Ok(())
            }
            FieldValueKind::Struct(fields) => fields.iter().try_for_each(|(_, v)| v.validate()),
            FieldValueKind::Variant(selected) => selected
                .as_ref()
                .ok_or_else(|| Error::ValidationFailed("variant value has no tag selected".into()))
                .and_then(|(_, v)| v.validate()),
            FieldValueKind::Array(elements) | FieldValueKind::Sequence(elements) => {
                elements.iter().try_for_each(|v| v.validate())
            }
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

    /// `serialize(stream_pos)` appends this value's bits to `out`, starting at bit
    /// `stream_pos` (shared with sibling fields so alignment padding accumulates correctly
    /// across an entire event or packet), returning the new bit position. Integers and
    /// floats follow the field class's byte order; strings are NUL-terminated.
    pub fn serialize(&self, out: &mut Vec<u8>, stream_pos: usize) -> Result<usize, Error> {
        let mut cursor = AlignedCursor::default();
        cursor.increment(stream_pos);
        cursor.align_to(self.fc.alignment());
        self.serialize_at(out, &mut cursor)?;
        Ok(cursor.cursor_bits())
    }

    fn serialize_at(&self, out: &mut Vec<u8>, cursor: &mut AlignedCursor) -> Result<(), Error> {
        match (&*self.fc.kind_ref(), &self.kind) {
            (FieldClassKind::Integer(i), FieldValueKind::Unsigned(v)) => {
                let ordered = apply_byte_order(*v, i.size_bits, Self::resolved_byte_order(i.byte_order));
                write_bits_msb(out, cursor, i.size_bits, ordered);
            }
            (FieldClassKind::Integer(i), FieldValueKind::Signed(v)) => {
                let mask = if i.size_bits == 64 { u64::MAX } else { (1u64 << i.size_bits) - 1 };
                let raw = (*v as u64) & mask;
                let ordered = apply_byte_order(raw, i.size_bits, Self::resolved_byte_order(i.byte_order));
                write_bits_msb(out, cursor, i.size_bits, ordered);
            }
            (FieldClassKind::Float(f), FieldValueKind::Float(v)) => {
                let size_bits = f.size_bits() as u8;
                let raw = if size_bits == 32 {
                    (v.0 as f32).to_bits() as u64
                } else {
                    v.0.to_bits()
                };
                let ordered = apply_byte_order(raw, size_bits, Self::resolved_byte_order(f.byte_order));
                write_bits_msb(out, cursor, size_bits, ordered);
            }
            (FieldClassKind::Enumeration(e), FieldValueKind::Signed(v)) => {
                let FieldClassKind::Integer(container) = &*e.container.kind_ref() else {
                    return Err(Error::BadType("enumeration container must be an integer".into()));
                };
                let mask = if container.size_bits == 64 { u64::MAX } else { (1u64 << container.size_bits) - 1 };
                write_bits_msb(out, cursor, container.size_bits, (*v as u64) & mask);
            }
            (FieldClassKind::Enumeration(e), FieldValueKind::Unsigned(v)) => {
                let FieldClassKind::Integer(container) = &*e.container.kind_ref() else {
                    return Err(Error::BadType("enumeration container must be an integer".into()));
                };
                write_bits_msb(out, cursor, container.size_bits, *v);
            }
            (FieldClassKind::String(_), FieldValueKind::String(s)) => {
                cursor.align_to(8);
                for b in s.as_bytes() {
                    write_bits_msb(out, cursor, 8, *b as u64);
                }
                write_bits_msb(out, cursor, 8, 0);
            }
            (FieldClassKind::Struct(_), FieldValueKind::Struct(fields)) => {
                for (_, field) in fields {
                    cursor.align_to(field.fc.alignment());
                    field.serialize_at(out, cursor)?;
                }
            }
            (FieldClassKind::Variant(_), FieldValueKind::Variant(Some((_, v)))) => {
                cursor.align_to(v.fc.alignment());
                v.serialize_at(out, cursor)?;
            }
            (FieldClassKind::Array(_), FieldValueKind::Array(elements))
            | (FieldClassKind::Sequence(_), FieldValueKind::Sequence(elements)) => {
                for element in elements {
                    cursor.align_to(element.fc.alignment());
                    element.serialize_at(out, cursor)?;
                }
            }
            _ => return Err(Error::ValidationFailed("value shape does not match its field class".into())),
        }
        Ok(())
    }
}
