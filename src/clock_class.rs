//! Clock classes: name, UUID, frequency, and a monotonic current value advanced as a side
//! effect of assigning mapped integer field values.
use std::cell::RefCell;
use std::rc::Rc;
use uuid::Uuid;

/// `ns_from_cycles(freq, cycles) = cycles` when `freq == 10^9`, else `floor(10^9 * cycles / freq)`.
pub fn ns_from_cycles(freq: u64, cycles: u64) -> u64 {
    if freq == 1_000_000_000 {
        cycles
    } else {
        ((cycles as u128) * 1_000_000_000 / freq as u128) as u64
    }
}

#[derive(Debug)]
struct ClockClassInner {
    name: String,
    uuid: Option<Uuid>,
    frequency: u64,
    precision: u64,
    offset_seconds: i64,
    offset_cycles: u64,
    absolute: bool,
    description: Option<String>,
    /// Writer-mode monotonic value; gated by `has_value` so reader-mode clocks (whose trace
    /// never advances a clock by assignment) don't expose a stale value.
    current_value: u64,
    has_value: bool,
}

/// A schema owner analogous to trace/stream-class/event-class, but shared by reference
/// (an `Integer` field class may map to one) rather than owned by a single parent, so it is
/// `Rc<RefCell<_>>` like [`crate::field_class::FieldClass`].
#[derive(Clone, Debug)]
pub struct ClockClass(Rc<RefCell<ClockClassInner>>);

impl PartialEq for ClockClass {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for ClockClass {}

impl ClockClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Rc::new(RefCell::new(ClockClassInner {
            name: name.into(),
            uuid: None,
            frequency: 1_000_000_000,
            precision: 0,
            offset_seconds: 0,
            offset_cycles: 0,
            absolute: false,
            description: None,
            current_value: 0,
            has_value: false,
        })))
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn set_uuid(&self, uuid: Uuid) {
        self.0.borrow_mut().uuid = Some(uuid);
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.0.borrow().uuid
    }

    pub fn set_frequency(&self, hz: u64) {
        self.0.borrow_mut().frequency = hz;
    }

    pub fn frequency(&self) -> u64 {
        self.0.borrow().frequency
    }

    pub fn set_precision(&self, precision: u64) {
        self.0.borrow_mut().precision = precision;
    }

    pub fn precision(&self) -> u64 {
        self.0.borrow().precision
    }

    pub fn set_offset(&self, seconds: i64, cycles: u64) {
        let mut inner = self.0.borrow_mut();
        inner.offset_seconds = seconds;
        inner.offset_cycles = cycles;
    }

    pub fn set_absolute(&self, absolute: bool) {
        self.0.borrow_mut().absolute = absolute;
    }

    pub fn is_absolute(&self) -> bool {
        self.0.borrow().absolute
    }

    pub fn set_description(&self, description: impl Into<String>) {
        self.0.borrow_mut().description = Some(description.into());
    }

    pub fn description(&self) -> Option<String> {
        self.0.borrow().description.clone()
    }

    /// Clears `has_value`, as happens when the owning trace is non-writer (reader mode):
    /// the clock tracks no monotonic writer-side state.
    pub fn clear_value(&self) {
        let mut inner = self.0.borrow_mut();
        inner.has_value = false;
        inner.current_value = 0;
    }

    /// Advances the monotonic current value. Called as a side effect of assigning an
    /// integer field value mapped to this clock class.
    pub fn advance(&self, value: u64) {
        let mut inner = self.0.borrow_mut();
        inner.current_value = value;
        inner.has_value = true;
    }

    pub fn current_value(&self) -> Option<u64> {
        let inner = self.0.borrow();
        inner.has_value.then_some(inner.current_value)
    }

    /// Real-time value in nanoseconds: `offset_s*10^9 + floor((offset_cycles+value)*10^9/frequency)`.
    pub fn value_ns(&self, value: u64) -> u64 {
        let inner = self.0.borrow();
        let offset_s_ns = (inner.offset_seconds as i128) * 1_000_000_000;
        let cycles_ns = ns_from_cycles(inner.frequency, inner.offset_cycles + value) as i128;
        (offset_s_ns + cycles_ns) as u64
    }
}
