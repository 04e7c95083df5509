use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::ManuallyDrop;
use std::ptr;

use super::{Externs, Ident, Primitive, RawHandle, TypeId};

/// An owned reference to a host value.
pub struct Value {
    raw: RawHandle,
    externs: Externs,
}

impl Value {
    /// Adopt one reference to `raw`; it is released when the `Value` drops.
    pub fn from_raw(externs: Externs, raw: RawHandle) -> Self {
        Value { raw, externs }
    }

    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    pub fn externs(&self) -> &Externs {
        &self.externs
    }

    /// Give up ownership of the reference without releasing it.
    pub fn into_raw(self) -> RawHandle {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so `externs` is moved out exactly once.
        drop(unsafe { ptr::read(&this.externs) });
        this.raw
    }

    pub fn ident(&self) -> Ident {
        self.externs.host().identify(self.raw)
    }

    pub fn type_id(&self) -> TypeId {
        self.ident().type_id
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.externs
            .host()
            .project_field(self.raw, name)
            .map(|raw| self.externs.wrap(raw))
    }

    pub fn load(&self) -> Option<Primitive> {
        self.externs
            .host()
            .load(self.raw)
            .map(|p| p.map(|raw| self.externs.wrap(raw)))
    }

    pub fn as_str(&self) -> Option<String> {
        match self.load()? {
            Primitive::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.load()? {
            Primitive::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        match self.load()? {
            Primitive::Bytes(b) => Some(b),
            Primitive::Str(s) => Some(s.into_bytes()),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<Vec<Value>> {
        match self.load()? {
            Primitive::Tuple(items) => Some(items),
            _ => None,
        }
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        Value {
            raw: self.externs.host().clone_ref(self.raw),
            externs: self.externs.clone(),
        }
    }
}

impl Drop for Value {
    fn drop(&mut self) {
        self.externs.host().drop_ref(self.raw);
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw || self.externs.host().equals(self.raw, other.raw)
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.externs.host().stringify(self.raw))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({})", self.externs.host().stringify(self.raw))
    }
}

/// A Value together with its identity, usable as a Param.
#[derive(Clone)]
pub struct Key {
    ident: Ident,
    value: Value,
}

impl Key {
    pub fn new(value: Value) -> Self {
        Key {
            ident: value.ident(),
            value,
        }
    }

    pub fn type_id(&self) -> &TypeId {
        &self.ident.type_id
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.ident == other.ident && self.value == other.value
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ident.hash(state);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.ident.type_id, self.value)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
