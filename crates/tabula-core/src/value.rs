//! Runtime values
//!
//! [`Value`] is the tagged payload of an instance slot and of rule
//! evaluation: the kind tag and the payload cannot disagree, unlike a
//! C-style union. [`ObjectHandle`] makes sub-record ownership explicit, and
//! [`ConstantValue`] is the `Send + Sync` scalar subset that rule operand
//! constants are allowed to carry.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use tabula_types::{Continuous, Date, Symbol, Time, Timestamp, ValueKind};

use crate::block::{ContinuousValueBlock, ObjectArrayValueBlock, SymbolValueBlock};
use crate::object::Instance;

/// A relation value: one sub-record, owned or borrowed.
///
/// Owned handles are destroyed with their parent (the parent holds the
/// intended last strong count); referenced handles are never freed by the
/// holder.
#[derive(Clone)]
pub enum ObjectHandle {
    Owned(Rc<Instance>),
    Referenced(Rc<Instance>),
}

impl ObjectHandle {
    pub fn instance(&self) -> &Rc<Instance> {
        match self {
            ObjectHandle::Owned(o) | ObjectHandle::Referenced(o) => o,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, ObjectHandle::Owned(_))
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.is_owned() { "Owned" } else { "Referenced" };
        write!(
            f,
            "{}({} #{})",
            tag,
            self.instance().class().name,
            self.instance().creation_index()
        )
    }
}

impl PartialEq for ObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(self.instance(), other.instance())
    }
}

/// A tagged runtime value.
#[derive(Clone)]
pub enum Value {
    Continuous(Continuous),
    Symbol(Symbol),
    Date(Date),
    Time(Time),
    Timestamp(Timestamp),
    Text(String),
    /// One sub-record; `None` is the missing relation.
    Object(Option<ObjectHandle>),
    /// A table of sub-records; empty is the missing table.
    ObjectArray(Vec<ObjectHandle>),
    /// Opaque payload; the engine stores and hands it back, nothing more.
    Structure(Option<Rc<dyn Any>>),
    ContinuousBlock(Rc<ContinuousValueBlock>),
    SymbolBlock(Rc<SymbolValueBlock>),
    ObjectArrayBlock(Rc<ObjectArrayValueBlock>),
}

impl Value {
    /// Kind tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Continuous(_) => ValueKind::Continuous,
            Value::Symbol(_) => ValueKind::Symbol,
            Value::Date(_) => ValueKind::Date,
            Value::Time(_) => ValueKind::Time,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::Text(_) => ValueKind::Text,
            Value::Object(_) => ValueKind::Object,
            Value::ObjectArray(_) => ValueKind::ObjectArray,
            Value::Structure(_) => ValueKind::Structure,
            Value::ContinuousBlock(_) => ValueKind::ContinuousBlock,
            Value::SymbolBlock(_) => ValueKind::SymbolBlock,
            Value::ObjectArrayBlock(_) => ValueKind::ObjectArrayBlock,
        }
    }

    /// The per-kind missing value.
    pub fn missing(kind: ValueKind) -> Value {
        match kind {
            ValueKind::Continuous => Value::Continuous(Continuous::MISSING),
            ValueKind::Symbol => Value::Symbol(Symbol::empty()),
            ValueKind::Date => Value::Date(Date::INVALID),
            ValueKind::Time => Value::Time(Time::INVALID),
            ValueKind::Timestamp => Value::Timestamp(Timestamp::INVALID),
            ValueKind::Text => Value::Text(String::new()),
            ValueKind::Object => Value::Object(None),
            ValueKind::ObjectArray => Value::ObjectArray(Vec::new()),
            ValueKind::Structure => Value::Structure(None),
            ValueKind::ContinuousBlock => Value::ContinuousBlock(ContinuousValueBlock::empty_rc()),
            ValueKind::SymbolBlock => Value::SymbolBlock(SymbolValueBlock::empty_rc()),
            ValueKind::ObjectArrayBlock => {
                Value::ObjectArrayBlock(ObjectArrayValueBlock::empty_rc())
            }
        }
    }

    pub fn as_continuous(&self) -> Option<Continuous> {
        match self {
            Value::Continuous(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<Date> {
        match self {
            Value::Date(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Option<ObjectHandle>> {
        match self {
            Value::Object(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object_array(&self) -> Option<&[ObjectHandle]> {
        match self {
            Value::ObjectArray(v) => Some(v),
            _ => None,
        }
    }

    /// Rough heap footprint, used by the compute-all memory guard.
    pub fn estimated_size(&self) -> usize {
        let base = std::mem::size_of::<Value>();
        match self {
            Value::Text(s) => base + s.len(),
            Value::ObjectArray(handles) => base + handles.len() * std::mem::size_of::<ObjectHandle>(),
            Value::ContinuousBlock(b) => base + b.len() * 12,
            Value::SymbolBlock(b) => base + b.len() * 12,
            Value::ObjectArrayBlock(b) => base + b.len() * 32,
            _ => base,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Continuous(v) => write!(f, "Continuous({v})"),
            Value::Symbol(v) => write!(f, "Symbol({v:?})"),
            Value::Date(v) => write!(f, "Date({v})"),
            Value::Time(v) => write!(f, "Time({v})"),
            Value::Timestamp(v) => write!(f, "Timestamp({v})"),
            Value::Text(v) => write!(f, "Text({v:?})"),
            Value::Object(v) => write!(f, "Object({v:?})"),
            Value::ObjectArray(v) => write!(f, "ObjectArray[{}]", v.len()),
            Value::Structure(v) => write!(f, "Structure({})", if v.is_some() { "set" } else { "none" }),
            Value::ContinuousBlock(b) => write!(f, "ContinuousBlock[{}]", b.len()),
            Value::SymbolBlock(b) => write!(f, "SymbolBlock[{}]", b.len()),
            Value::ObjectArrayBlock(b) => write!(f, "ObjectArrayBlock[{}]", b.len()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Continuous(a), Value::Continuous(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::ObjectArray(a), Value::ObjectArray(b)) => a == b,
            // Opaque payloads compare by identity.
            (Value::Structure(a), Value::Structure(b)) => match (a, b) {
                (None, None) => true,
                (Some(x), Some(y)) => Rc::ptr_eq(x, y),
                _ => false,
            },
            (Value::ContinuousBlock(a), Value::ContinuousBlock(b)) => Rc::ptr_eq(a, b),
            (Value::SymbolBlock(a), Value::SymbolBlock(b)) => Rc::ptr_eq(a, b),
            (Value::ObjectArrayBlock(a), Value::ObjectArrayBlock(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Scalar constant usable as a rule operand.
///
/// Constants must be shareable by the process-wide rule registry, so
/// relation, structure and block payloads are excluded by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Continuous(Continuous),
    Symbol(Symbol),
    Date(Date),
    Time(Time),
    Timestamp(Timestamp),
    Text(String),
}

impl ConstantValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            ConstantValue::Continuous(_) => ValueKind::Continuous,
            ConstantValue::Symbol(_) => ValueKind::Symbol,
            ConstantValue::Date(_) => ValueKind::Date,
            ConstantValue::Time(_) => ValueKind::Time,
            ConstantValue::Timestamp(_) => ValueKind::Timestamp,
            ConstantValue::Text(_) => ValueKind::Text,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ConstantValue::Continuous(v) => Value::Continuous(*v),
            ConstantValue::Symbol(v) => Value::Symbol(v.clone()),
            ConstantValue::Date(v) => Value::Date(*v),
            ConstantValue::Time(v) => Value::Time(*v),
            ConstantValue::Timestamp(v) => Value::Timestamp(*v),
            ConstantValue::Text(v) => Value::Text(v.clone()),
        }
    }
}

impl fmt::Display for ConstantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstantValue::Continuous(v) => write!(f, "{v}"),
            ConstantValue::Symbol(v) => write!(f, "{v}"),
            ConstantValue::Date(v) => write!(f, "{v}"),
            ConstantValue::Time(v) => write!(f, "{v}"),
            ConstantValue::Timestamp(v) => write!(f, "{v}"),
            ConstantValue::Text(v) => write!(f, "{v:?}"),
        }
    }
}
