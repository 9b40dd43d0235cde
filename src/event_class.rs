//! Event classes: ID, name, optional context, non-empty payload, and the known-key
//! attribute bag.
use crate::error::Error;
use crate::field_class::{FieldClass, FieldClassKind};
use fxhash::FxHashMap;
use internment::Intern;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    UInt(u64),
    Int(i64),
    Str(String),
}

#[derive(Debug)]
struct EventClassInner {
    id: u64,
    name: Intern<String>,
    context: Option<FieldClass>,
    payload: FieldClass,
    attributes: FxHashMap<String, AttributeValue>,
    frozen: bool,
}

/// A schema owner. Frozen on `stream_class.add_event_class(ec)`.
#[derive(Clone, Debug)]
pub struct EventClass(Rc<RefCell<EventClassInner>>);

impl PartialEq for EventClass {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for EventClass {}

impl EventClass {
    /// `payload` must be a non-empty struct field class.
    pub fn new(id: u64, name: impl Into<String>, payload: FieldClass) -> Result<Self, Error> {
        let is_nonempty_struct = match &*payload.kind_ref() {
            FieldClassKind::Struct(s) => !s.fields.is_empty(),
            _ => false,
        };
        if !is_nonempty_struct {
            return Err(Error::InvalidArgument(
                "event class payload must be a non-empty struct field class".into(),
            ));
        }
        let name = name.into();
        let mut attributes = FxHashMap::default();
        attributes.insert("id".to_string(), AttributeValue::UInt(id));
        attributes.insert("name".to_string(), AttributeValue::Str(name.clone()));
        Ok(Self(Rc::new(RefCell::new(EventClassInner {
            id,
            name: Intern::new(name),
            context: None,
            payload,
            attributes,
            frozen: false,
        }))))
    }

    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    pub fn name(&self) -> Intern<String> {
        self.0.borrow().name
    }

    pub fn payload(&self) -> FieldClass {
        self.0.borrow().payload.clone()
    }

    pub fn context(&self) -> Option<FieldClass> {
        self.0.borrow().context.clone()
    }

    pub fn set_context(&self, context: FieldClass) -> Result<(), Error> {
        if self.is_frozen() {
            return Err(Error::Frozen);
        }
        self.0.borrow_mut().context = Some(context);
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.0.borrow().frozen
    }

    /// `loglevel` must be a non-negative integer; `model.emf.uri` and unknown keys are
    /// strings accepted and round-tripped.
    pub fn set_attribute(&self, key: impl Into<String>, value: AttributeValue) -> Result<(), Error> {
        if self.is_frozen() {
            return Err(Error::Frozen);
        }
        let key = key.into();
        if key == "loglevel" {
            if let AttributeValue::Int(v) = &value {
                if *v < 0 {
                    return Err(Error::InvalidArgument("loglevel must be >= 0".into()));
                }
            }
        }
        self.0.borrow_mut().attributes.insert(key, value);
        Ok(())
    }

    pub fn attribute(&self, key: &str) -> Option<AttributeValue> {
        self.0.borrow().attributes.get(key).cloned()
    }

    pub(crate) fn freeze(&self) {
        self.0.borrow_mut().frozen = true;
        self.payload().freeze();
        if let Some(ctx) = self.context() {
            ctx.freeze();
        }
    }

    /// Replaces `context`/`payload` with their validated copies (called by
    /// [`crate::stream_class::StreamClass::add_event_class`] after validation succeeds).
    pub(crate) fn replace_validated_scopes(&self, context: Option<FieldClass>, payload: FieldClass) {
        let mut inner = self.0.borrow_mut();
        inner.context = context;
        inner.payload = payload;
    }
}
