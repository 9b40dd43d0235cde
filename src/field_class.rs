//! The schema: field classes describe the bit layout and semantics of every
//! field in every scope.
//!
//! Field classes are reference-counted, multi-owner nodes. Access is single-threaded
//! cooperative, with no concurrency across traces, so `Rc<RefCell<_>>` gives acquire,
//! release-on-clone/drop, and serialised mutation.
use crate::clock_class::ClockClass;
use crate::error::Error;
use crate::path::FieldPath;
use derive_more::Display;
use fxhash::FxHashMap;
use internment::Intern;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display)]
#[display("{}")]
pub enum ByteOrder {
    #[display("le")]
    LittleEndian,
    #[display("be")]
    BigEndian,
    /// Resolved to the host's byte order before `compare()`.
    #[default]
    #[display("native")]
    Native,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display)]
pub enum IntegerBase {
    #[display("bin")]
    Binary,
    #[display("oct")]
    Octal,
    #[default]
    #[display("dec")]
    Decimal,
    #[display("hex")]
    Hexadecimal,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Display)]
pub enum Encoding {
    #[default]
    #[display("none")]
    None,
    #[display("utf8")]
    Utf8,
    #[display("ascii")]
    Ascii,
}

/// Inclusive `[begin, end]` range of an enumeration mapping. Interpreted signed or unsigned
/// depending on the enumeration's container integer.
pub type EnumRange = (i64, i64);

#[derive(Clone, Debug)]
pub struct IntegerFc {
    pub size_bits: u8,
    pub signed: bool,
    pub base: IntegerBase,
    pub encoding: Encoding,
    pub byte_order: ByteOrder,
    pub mapped_clock: Option<ClockClass>,
}

#[derive(Clone, Debug)]
pub struct FloatFc {
    pub exponent_digits: u8,
    pub mantissa_digits: u8,
    pub byte_order: ByteOrder,
}

impl FloatFc {
    pub fn size_bits(&self) -> u16 {
        self.exponent_digits as u16 + self.mantissa_digits as u16
    }
}

#[derive(Clone, Debug)]
pub struct EnumerationFc {
    pub container: FieldClass,
    /// Ordered; ranges may overlap and a label may repeat across several ranges.
    pub mappings: Vec<(Intern<String>, Vec<EnumRange>)>,
}

impl EnumerationFc {
    /// Lazy sequence of labels whose range covers `value`.
    pub fn labels_for(&self, value: i64) -> impl Iterator<Item = Intern<String>> + '_ {
        self.mappings.iter().filter_map(move |(label, ranges)| {
            ranges
                .iter()
                .any(|(b, e)| value >= *b && value <= *e)
                .then_some(*label)
        })
    }
}

#[derive(Clone, Debug)]
pub struct StringFc {
    pub encoding: Encoding,
}

#[derive(Clone, Debug)]
pub struct StructField {
    pub name: Intern<String>,
    pub fc: FieldClass,
}

#[derive(Clone, Debug, Default)]
pub struct StructFc {
    pub fields: Vec<StructField>,
    /// Companion lookup table kept in sync with `fields` so `field_index_by_name` is O(1)
    /// amortised.
    name_index: FxHashMap<Intern<String>, usize>,
    pub minimum_alignment: u16,
}

impl StructFc {
    pub fn field_index_by_name(&self, name: &str) -> Option<usize> {
        self.name_index.get(&Intern::new(name.to_owned())).copied()
    }
}

#[derive(Clone, Debug, Default)]
pub struct VariantFc {
    /// Unresolved textual reference to the tag field, e.g. `"choice"` or `"event.fields.choice"`.
    pub tag_name: Option<String>,
    /// Ordered; labels must be a subset of the resolved enumeration's labels.
    pub selectors: Vec<(Intern<String>, FieldClass)>,
    pub resolved_tag_field_path: Option<FieldPath>,
    pub resolved_tag_enum_fc: Option<FieldClass>,
}

#[derive(Clone, Debug)]
pub struct ArrayFc {
    pub length: u64,
    pub element: FieldClass,
}

#[derive(Clone, Debug)]
pub struct SequenceFc {
    pub length_field_name: String,
    pub element: FieldClass,
    pub resolved_length_field_path: Option<FieldPath>,
}

#[derive(Clone, Debug)]
pub enum FieldClassKind {
    Unknown,
    Integer(IntegerFc),
    Float(FloatFc),
    Enumeration(EnumerationFc),
    String(StringFc),
    Struct(StructFc),
    Variant(VariantFc),
    Array(ArrayFc),
    Sequence(SequenceFc),
}

impl FieldClassKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Enumeration(_) => "enumeration",
            Self::String(_) => "string",
            Self::Struct(_) => "struct",
            Self::Variant(_) => "variant",
            Self::Array(_) => "array",
            Self::Sequence(_) => "sequence",
        }
    }
}

#[derive(Debug)]
struct FieldClassInner {
    kind: FieldClassKind,
    alignment: u16,
    frozen: bool,
}

/// A schema node. Cheap to clone: cloning bumps the `Rc` strong count rather than
/// deep-copying the graph.
#[derive(Clone, Debug)]
pub struct FieldClass(Rc<RefCell<FieldClassInner>>);

impl PartialEq for FieldClass {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for FieldClass {}

fn default_alignment(kind: &FieldClassKind) -> u16 {
    match kind {
        FieldClassKind::Integer(i) => {
            if i.size_bits % 8 == 0 {
                8
            } else {
                1
            }
        }
        FieldClassKind::Float(_) => 8,
        FieldClassKind::String(_) => 8,
        FieldClassKind::Enumeration(e) => e.container.alignment(),
        FieldClassKind::Struct(s) => s
            .fields
            .iter()
            .map(|f| f.fc.alignment())
            .chain(std::iter::once(s.minimum_alignment.max(1)))
            .max()
            .unwrap_or(1),
        FieldClassKind::Variant(v) => v
            .selectors
            .iter()
            .map(|(_, fc)| fc.alignment())
            .max()
            .unwrap_or(1),
        FieldClassKind::Array(a) => a.element.alignment(),
        FieldClassKind::Sequence(s) => s.element.alignment(),
        FieldClassKind::Unknown => 1,
    }
}

impl FieldClass {
    fn new(kind: FieldClassKind) -> Self {
        let alignment = default_alignment(&kind);
        Self(Rc::new(RefCell::new(FieldClassInner {
            kind,
            alignment,
            frozen: false,
        })))
    }

    pub fn new_integer(
        size_bits: u8,
        signed: bool,
        base: IntegerBase,
        encoding: Encoding,
        byte_order: ByteOrder,
    ) -> Result<Self, Error> {
        if size_bits == 0 || size_bits > 64 {
            return Err(Error::InvalidArgument(format!(
                "integer size_bits {size_bits} out of range [1,64]"
            )));
        }
        Ok(Self::new(FieldClassKind::Integer(IntegerFc {
            size_bits,
            signed,
            base,
            encoding,
            byte_order,
            mapped_clock: None,
        })))
    }

    pub fn new_float(
        exponent_digits: u8,
        mantissa_digits: u8,
        byte_order: ByteOrder,
    ) -> Result<Self, Error> {
        if exponent_digits == 0 || mantissa_digits == 0 {
            return Err(Error::InvalidArgument(
                "float exponent/mantissa digits must each be >= 1".into(),
            ));
        }
        Ok(Self::new(FieldClassKind::Float(FloatFc {
            exponent_digits,
            mantissa_digits,
            byte_order,
        })))
    }

    pub fn new_enumeration(container: FieldClass) -> Result<Self, Error> {
        if !matches!(container.kind_ref(), FieldClassKind::Integer(_)) {
            return Err(Error::BadType(
                "enumeration container must be an integer field class".into(),
            ));
        }
        Ok(Self::new(FieldClassKind::Enumeration(EnumerationFc {
            container,
            mappings: Vec::new(),
        })))
    }

    pub fn new_string(encoding: Encoding) -> Self {
        Self::new(FieldClassKind::String(StringFc { encoding }))
    }

    pub fn new_struct(minimum_alignment: u16) -> Self {
        Self::new(FieldClassKind::Struct(StructFc {
            fields: Vec::new(),
            name_index: FxHashMap::default(),
            minimum_alignment,
        }))
    }

    pub fn new_variant() -> Self {
        Self::new(FieldClassKind::Variant(VariantFc::default()))
    }

    pub fn new_array(length: u64, element: FieldClass) -> Self {
        Self::new(FieldClassKind::Array(ArrayFc { length, element }))
    }

    pub fn new_sequence(length_field_name: impl Into<String>, element: FieldClass) -> Self {
        Self::new(FieldClassKind::Sequence(SequenceFc {
            length_field_name: length_field_name.into(),
            element,
            resolved_length_field_path: None,
        }))
    }

    pub fn kind_ref(&self) -> Ref<'_, FieldClassKind> {
        Ref::map(self.0.borrow(), |i| &i.kind)
    }

    pub fn kind_mut(&self) -> Result<RefMut<'_, FieldClassKind>, Error> {
        if self.is_frozen() {
            return Err(Error::Frozen);
        }
        Ok(RefMut::map(self.0.borrow_mut(), |i| &mut i.kind))
    }

    pub fn alignment(&self) -> u16 {
        self.0.borrow().alignment
    }

    pub fn is_frozen(&self) -> bool {
        self.0.borrow().frozen
    }

    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Recursively marks `self` and every transitively referenced class as frozen.
    pub fn freeze(&self) {
        if self.is_frozen() {
            return;
        }
        self.0.borrow_mut().frozen = true;
        let children: Vec<FieldClass> = match &self.0.borrow().kind {
            FieldClassKind::Struct(s) => s.fields.iter().map(|f| f.fc.clone()).collect(),
            FieldClassKind::Variant(v) => v.selectors.iter().map(|(_, fc)| fc.clone()).collect(),
            FieldClassKind::Array(a) => vec![a.element.clone()],
            FieldClassKind::Sequence(s) => vec![s.element.clone()],
            FieldClassKind::Enumeration(e) => vec![e.container.clone()],
            FieldClassKind::Integer(_)
            | FieldClassKind::Float(_)
            | FieldClassKind::String(_)
            | FieldClassKind::Unknown => Vec::new(),
        };
        for child in children {
            child.freeze();
        }
    }

    /// Structural equality modulo `frozen` and ownership identity.
    /// `native` byte order is treated as equal to the host's resolved order prior to comparing.
    pub fn compare(a: &FieldClass, b: &FieldClass) -> bool {
        fn bo_eq(x: ByteOrder, y: ByteOrder) -> bool {
            fn resolved(b: ByteOrder) -> ByteOrder {
                if b == ByteOrder::Native {
                    if cfg!(target_endian = "little") {
                        ByteOrder::LittleEndian
                    } else {
                        ByteOrder::BigEndian
                    }
                } else {
                    b
                }
            }
            resolved(x) == resolved(y)
        }

        let ka = a.0.borrow();
        let kb = b.0.borrow();
        match (&ka.kind, &kb.kind) {
            (FieldClassKind::Unknown, FieldClassKind::Unknown) => true,
            (FieldClassKind::Integer(x), FieldClassKind::Integer(y)) => {
                x.size_bits == y.size_bits
                    && x.signed == y.signed
                    && x.base == y.base
                    && x.encoding == y.encoding
                    && bo_eq(x.byte_order, y.byte_order)
            }
            (FieldClassKind::Float(x), FieldClassKind::Float(y)) => {
                x.exponent_digits == y.exponent_digits
                    && x.mantissa_digits == y.mantissa_digits
                    && bo_eq(x.byte_order, y.byte_order)
            }
            (FieldClassKind::Enumeration(x), FieldClassKind::Enumeration(y)) => {
                let (cx, cy) = (x.container.clone(), y.container.clone());
                let mappings_eq = x.mappings == y.mappings;
                drop(ka);
                drop(kb);
                mappings_eq && Self::compare(&cx, &cy)
            }
            (FieldClassKind::String(x), FieldClassKind::String(y)) => x.encoding == y.encoding,
            (FieldClassKind::Struct(x), FieldClassKind::Struct(y)) => {
                if x.fields.len() != y.fields.len() || x.minimum_alignment != y.minimum_alignment {
                    return false;
                }
                let pairs: Vec<_> = x
                    .fields
                    .iter()
                    .zip(y.fields.iter())
                    .map(|(fx, fy)| (fx.name, fx.fc.clone(), fy.name, fy.fc.clone()))
                    .collect();
                drop(ka);
                drop(kb);
                pairs
                    .into_iter()
                    .all(|(nx, fx, ny, fy)| nx == ny && Self::compare(&fx, &fy))
            }
            (FieldClassKind::Variant(x), FieldClassKind::Variant(y)) => {
                if x.tag_name != y.tag_name || x.selectors.len() != y.selectors.len() {
                    return false;
                }
                let pairs: Vec<_> = x
                    .selectors
                    .iter()
                    .zip(y.selectors.iter())
                    .map(|((nx, fx), (ny, fy))| (*nx, fx.clone(), *ny, fy.clone()))
                    .collect();
                drop(ka);
                drop(kb);
                pairs
                    .into_iter()
                    .all(|(nx, fx, ny, fy)| nx == ny && Self::compare(&fx, &fy))
            }
            (FieldClassKind::Array(x), FieldClassKind::Array(y)) => {
                let (lx, ex) = (x.length, x.element.clone());
                let (ly, ey) = (y.length, y.element.clone());
                drop(ka);
                drop(kb);
                lx == ly && Self::compare(&ex, &ey)
            }
            (FieldClassKind::Sequence(x), FieldClassKind::Sequence(y)) => {
                let (nx, ex) = (x.length_field_name.clone(), x.element.clone());
                let (ny, ey) = (y.length_field_name.clone(), y.element.clone());
                drop(ka);
                drop(kb);
                nx == ny && Self::compare(&ex, &ey)
            }
            _ => false,
        }
    }

    /// Deep copy; resets `frozen`. Does not copy resolved references: the validator
    /// recomputes them on reinsertion.
    pub fn copy(&self) -> FieldClass {
        let kind = match &self.0.borrow().kind {
            FieldClassKind::Unknown => FieldClassKind::Unknown,
            FieldClassKind::Integer(i) => FieldClassKind::Integer(i.clone()),
            FieldClassKind::Float(f) => FieldClassKind::Float(f.clone()),
            FieldClassKind::Enumeration(e) => FieldClassKind::Enumeration(EnumerationFc {
                container: e.container.copy(),
                mappings: e.mappings.clone(),
            }),
            FieldClassKind::String(s) => FieldClassKind::String(s.clone()),
            FieldClassKind::Struct(s) => {
                let mut name_index = FxHashMap::default();
                let fields = s
                    .fields
                    .iter()
                    .enumerate()
                    .map(|(i, f)| {
                        name_index.insert(f.name, i);
                        StructField {
                            name: f.name,
                            fc: f.fc.copy(),
                        }
                    })
                    .collect();
                FieldClassKind::Struct(StructFc {
                    fields,
                    name_index,
                    minimum_alignment: s.minimum_alignment,
                })
            }
            FieldClassKind::Variant(v) => FieldClassKind::Variant(VariantFc {
                tag_name: v.tag_name.clone(),
                selectors: v
                    .selectors
                    .iter()
                    .map(|(label, fc)| (*label, fc.copy()))
                    .collect(),
                // resolved references are recomputed by the validator, not copied
                resolved_tag_field_path: None,
                resolved_tag_enum_fc: None,
            }),
            FieldClassKind::Array(a) => FieldClassKind::Array(ArrayFc {
                length: a.length,
                element: a.element.copy(),
            }),
            FieldClassKind::Sequence(s) => FieldClassKind::Sequence(SequenceFc {
                length_field_name: s.length_field_name.clone(),
                element: s.element.copy(),
                resolved_length_field_path: None,
            }),
        };
        Self::new(kind)
    }
}

/// Appends `fc` to a struct's ordered field list.
pub fn struct_add_field(owner: &FieldClass, name: impl Into<String>, fc: FieldClass) -> Result<(), Error> {
    if owner.is_frozen() {
        return Err(Error::Frozen);
    }
    let name = name.into();
    if !is_valid_identifier(&name) {
        return Err(Error::InvalidArgument(format!(
            "'{name}' is not a valid TSDL identifier"
        )));
    }
    let interned = Intern::new(name.clone());
    let mut inner = owner.0.borrow_mut();
    let FieldClassKind::Struct(s) = &mut inner.kind else {
        return Err(Error::BadType("add_field on non-struct field class".into()));
    };
    if s.name_index.contains_key(&interned) {
        return Err(Error::Duplicate(name));
    }
    let idx = s.fields.len();
    s.name_index.insert(interned, idx);
    s.fields.push(StructField { name: interned, fc });
    drop(inner);
    owner.recompute_alignment();
    Ok(())
}

/// Appends a selector to a variant. The label is checked against the resolved
/// enumeration only later, by the resolver.
pub fn variant_add_selector(owner: &FieldClass, label: impl Into<String>, fc: FieldClass) -> Result<(), Error> {
    if owner.is_frozen() {
        return Err(Error::Frozen);
    }
    let label = label.into();
    let interned = Intern::new(label.clone());
    let mut inner = owner.0.borrow_mut();
    let FieldClassKind::Variant(v) = &mut inner.kind else {
        return Err(Error::BadType("add_selector on non-variant field class".into()));
    };
    if v.selectors.iter().any(|(l, _)| *l == interned) {
        return Err(Error::Duplicate(label));
    }
    v.selectors.push((interned, fc));
    drop(inner);
    owner.recompute_alignment();
    Ok(())
}

/// Sets the (unresolved) textual tag reference of a variant, e.g. from a builder call
/// mirroring the TSDL `variant <...>` tag clause.
pub fn variant_set_tag_name(owner: &FieldClass, tag_name: impl Into<String>) -> Result<(), Error> {
    if owner.is_frozen() {
        return Err(Error::Frozen);
    }
    let mut inner = owner.0.borrow_mut();
    let FieldClassKind::Variant(v) = &mut inner.kind else {
        return Err(Error::BadType("set_tag_name on non-variant field class".into()));
    };
    v.tag_name = Some(tag_name.into());
    Ok(())
}

/// Adds a mapping to an enumeration. Overlap is allowed; the same label may map
/// several ranges.
pub fn enumeration_add_mapping(
    owner: &FieldClass,
    label: impl Into<String>,
    begin: i64,
    end: i64,
) -> Result<(), Error> {
    if owner.is_frozen() {
        return Err(Error::Frozen);
    }
    let interned = Intern::new(label.into());
    let mut inner = owner.0.borrow_mut();
    let FieldClassKind::Enumeration(e) = &mut inner.kind else {
        return Err(Error::BadType("add_mapping on non-enumeration field class".into()));
    };
    if let Some((_, ranges)) = e.mappings.iter_mut().find(|(l, _)| *l == interned) {
        ranges.push((begin, end));
    } else {
        e.mappings.push((interned, vec![(begin, end)]));
    }
    Ok(())
}

impl FieldClass {
    fn recompute_alignment(&self) {
        let new_align = default_alignment(&self.0.borrow().kind);
        self.0.borrow_mut().alignment = new_align;
    }
}

/// A TSDL identifier: starts with a letter or underscore, followed by letters, digits or
/// underscores, and is not empty.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod test {
    use super::*;

    fn u8_fc() -> FieldClass {
        FieldClass::new_integer(8, false, IntegerBase::default(), Encoding::default(), ByteOrder::default()).unwrap()
    }

    #[test]
    fn integer_size_out_of_range_rejected() {
        assert!(FieldClass::new_integer(0, false, Default::default(), Default::default(), Default::default()).is_err());
        assert!(FieldClass::new_integer(65, false, Default::default(), Default::default(), Default::default()).is_err());
    }

    #[test]
    fn struct_add_field_rejects_duplicates_and_bad_identifiers() {
        let st = FieldClass::new_struct(8);
        struct_add_field(&st, "a", u8_fc()).unwrap();
        assert_eq!(struct_add_field(&st, "a", u8_fc()), Err(Error::Duplicate("a".into())));
        assert!(matches!(
            struct_add_field(&st, "1bad", u8_fc()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn struct_field_index_by_name_matches_insertion_order() {
        let st = FieldClass::new_struct(8);
        struct_add_field(&st, "a", u8_fc()).unwrap();
        struct_add_field(&st, "b", u8_fc()).unwrap();
        let FieldClassKind::Struct(s) = &*st.kind_ref() else {
            unreachable!()
        };
        assert_eq!(s.field_index_by_name("a"), Some(0));
        assert_eq!(s.field_index_by_name("b"), Some(1));
        assert_eq!(s.field_index_by_name("c"), None);
    }

    #[test]
    fn frozen_struct_rejects_further_mutation() {
        let st = FieldClass::new_struct(8);
        struct_add_field(&st, "a", u8_fc()).unwrap();
        st.freeze();
        assert_eq!(struct_add_field(&st, "b", u8_fc()), Err(Error::Frozen));
    }

    #[test]
    fn copy_resets_frozen_and_compares_equal() {
        let st = FieldClass::new_struct(8);
        struct_add_field(&st, "a", u8_fc()).unwrap();
        st.freeze();
        let copy = st.copy();
        assert!(!copy.is_frozen());
        assert!(FieldClass::compare(&st, &copy));
    }

    #[test]
    fn enumeration_labels_for_supports_overlapping_ranges() {
        let container = u8_fc();
        let e = FieldClass::new_enumeration(container).unwrap();
        enumeration_add_mapping(&e, "a", 0, 5).unwrap();
        enumeration_add_mapping(&e, "b", 3, 10).unwrap();
        let FieldClassKind::Enumeration(en) = &*e.kind_ref() else {
            unreachable!()
        };
        let labels: Vec<_> = en.labels_for(4).map(|l| l.to_string()).collect();
        assert_eq!(labels, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn struct_alignment_is_max_of_fields_and_minimum() {
        let st = FieldClass::new_struct(32);
        struct_add_field(&st, "a", u8_fc()).unwrap();
        assert_eq!(st.alignment(), 32);
    }
}
