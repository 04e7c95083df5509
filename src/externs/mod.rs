//! The host-callback boundary.
//!
//! Rule bodies and the values they produce live in a *host* (a managed
//! language runtime, or the in-process [`NativeHost`]). The engine never looks
//! inside host values: every access goes through the [`Host`] vtable over
//! opaque, reference-counted [`RawHandle`]s.
//!
//! [`Value`] is the engine-side owner of one host reference. Cloning a `Value`
//! calls [`Host::clone_ref`]; dropping it calls [`Host::drop_ref`] exactly once.
//!
//! Ownership convention for the raw vtable: handles passed *into* the host
//! (inside a [`Primitive`], call arguments or a [`GeneratorInput`]) are
//! transferred to the host, and handles returned *from* the host are owned by
//! the caller.

pub mod native;
mod value;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use native::{NativeGenerator, NativeHost, StepFn};
pub use value::{Key, Value};

/// The name of a host type.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(Arc<str>);

impl TypeId {
    pub fn new(name: impl AsRef<str>) -> Self {
        TypeId(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn str() -> Self {
        TypeId::new("str")
    }

    pub fn int() -> Self {
        TypeId::new("int")
    }

    pub fn tuple() -> Self {
        TypeId::new("tuple")
    }

    pub fn bytes() -> Self {
        TypeId::new("bytes")
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeId {
    fn from(name: &str) -> Self {
        TypeId::new(name)
    }
}

/// An opaque reference to a host object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RawHandle(pub u64);

/// Identity of a host value: its hash and its type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ident {
    pub hash: u64,
    pub type_id: TypeId,
}

/// Primitive data the engine can store into (and load from) the host.
///
/// Generic over the handle type: the raw vtable speaks `Primitive<RawHandle>`,
/// engine code speaks `Primitive<Value>`.
#[derive(Clone, Debug)]
pub enum Primitive<H = Value> {
    Bytes(Vec<u8>),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Tuple(Vec<H>),
    Dict(BTreeMap<String, H>),
}

impl<H> Primitive<H> {
    pub fn map<T>(self, mut f: impl FnMut(H) -> T) -> Primitive<T> {
        match self {
            Primitive::Bytes(b) => Primitive::Bytes(b),
            Primitive::Str(s) => Primitive::Str(s),
            Primitive::Int(i) => Primitive::Int(i),
            Primitive::Float(x) => Primitive::Float(x),
            Primitive::Bool(b) => Primitive::Bool(b),
            Primitive::Tuple(items) => Primitive::Tuple(items.into_iter().map(f).collect()),
            Primitive::Dict(fields) => {
                Primitive::Dict(fields.into_iter().map(|(k, v)| (k, f(v))).collect())
            }
        }
    }
}

/// A request for one Product computed over explicit param values.
#[derive(Clone, Debug)]
pub struct Get<H = Value> {
    pub product: TypeId,
    pub inputs: Vec<H>,
}

impl<H> Get<H> {
    pub fn new(product: impl Into<TypeId>, inputs: Vec<H>) -> Self {
        Get {
            product: product.into(),
            inputs,
        }
    }

    pub fn map<T>(self, f: impl FnMut(H) -> T) -> Get<T> {
        Get {
            product: self.product,
            inputs: self.inputs.into_iter().map(f).collect(),
        }
    }
}

/// A batch of Gets resolved concurrently.
///
/// Unless `partial` is set, the first failing member fails the whole batch.
/// With `partial`, every member is delivered and failures arrive as exception
/// values in their slot.
#[derive(Clone, Debug)]
pub struct GetMulti<H = Value> {
    pub gets: Vec<Get<H>>,
    pub partial: bool,
}

impl<H> GetMulti<H> {
    pub fn new(gets: Vec<Get<H>>) -> Self {
        GetMulti {
            gets,
            partial: false,
        }
    }

    pub fn partial(gets: Vec<Get<H>>) -> Self {
        GetMulti {
            gets,
            partial: true,
        }
    }

    pub fn map<T>(self, mut f: impl FnMut(H) -> T) -> GetMulti<T> {
        GetMulti {
            gets: self.gets.into_iter().map(|g| g.map(&mut f)).collect(),
            partial: self.partial,
        }
    }
}

/// What the engine sends into a suspended rule body.
#[derive(Clone, Debug)]
pub enum GeneratorInput<H = Value> {
    Initial,
    Arg(H),
    Err(H),
}

impl<H> GeneratorInput<H> {
    pub fn map<T>(self, mut f: impl FnMut(H) -> T) -> GeneratorInput<T> {
        match self {
            GeneratorInput::Initial => GeneratorInput::Initial,
            GeneratorInput::Arg(h) => GeneratorInput::Arg(f(h)),
            GeneratorInput::Err(h) => GeneratorInput::Err(f(h)),
        }
    }
}

/// What a rule body answers with after one step.
#[derive(Clone, Debug)]
pub enum GeneratorResponse<H = Value> {
    Get(Get<H>),
    GetMulti(GetMulti<H>),
    Break(H),
    Throw(H),
}

impl<H> GeneratorResponse<H> {
    pub fn map<T>(self, mut f: impl FnMut(H) -> T) -> GeneratorResponse<T> {
        match self {
            GeneratorResponse::Get(get) => GeneratorResponse::Get(get.map(f)),
            GeneratorResponse::GetMulti(multi) => GeneratorResponse::GetMulti(multi.map(f)),
            GeneratorResponse::Break(h) => GeneratorResponse::Break(f(h)),
            GeneratorResponse::Throw(h) => GeneratorResponse::Throw(f(h)),
        }
    }
}

/// Outcome of invoking a rule body.
#[derive(Clone, Debug)]
pub enum CallResult<H = Value> {
    /// The body completed synchronously.
    Return(H),
    /// The body is a resumable computation to be driven with `generator_send`.
    Generator(H),
    /// The body raised.
    Throw(H),
}

impl<H> CallResult<H> {
    pub fn map<T>(self, mut f: impl FnMut(H) -> T) -> CallResult<T> {
        match self {
            CallResult::Return(h) => CallResult::Return(f(h)),
            CallResult::Generator(h) => CallResult::Generator(f(h)),
            CallResult::Throw(h) => CallResult::Throw(f(h)),
        }
    }
}

/// The vtable a host implements.
pub trait Host: Send + Sync + 'static {
    fn identify(&self, handle: RawHandle) -> Ident;

    fn equals(&self, lhs: RawHandle, rhs: RawHandle) -> bool;

    /// Take an additional reference to `handle`.
    fn clone_ref(&self, handle: RawHandle) -> RawHandle;

    /// Release one reference to `handle`.
    fn drop_ref(&self, handle: RawHandle);

    fn stringify(&self, handle: RawHandle) -> String;

    fn project_field(&self, handle: RawHandle, field: &str) -> Option<RawHandle>;

    fn store(&self, type_id: &TypeId, primitive: Primitive<RawHandle>) -> RawHandle;

    fn load(&self, handle: RawHandle) -> Option<Primitive<RawHandle>>;

    fn call(&self, func: RawHandle, args: Vec<RawHandle>) -> CallResult<RawHandle>;

    fn generator_send(
        &self,
        generator: RawHandle,
        input: GeneratorInput<RawHandle>,
    ) -> GeneratorResponse<RawHandle>;

    fn create_exception(&self, message: &str) -> RawHandle;
}

/// Engine-side entry points into a [`Host`], producing owned [`Value`]s.
#[derive(Clone)]
pub struct Externs {
    host: Arc<dyn Host>,
}

impl Externs {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Externs { host }
    }

    pub(crate) fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    /// Take ownership of a raw handle returned by the host.
    pub fn wrap(&self, raw: RawHandle) -> Value {
        Value::from_raw(self.clone(), raw)
    }

    pub fn store(&self, type_id: &TypeId, primitive: Primitive) -> Value {
        let raw = self.host.store(type_id, primitive.map(Value::into_raw));
        self.wrap(raw)
    }

    pub fn store_str(&self, type_id: &TypeId, s: impl Into<String>) -> Value {
        self.store(type_id, Primitive::Str(s.into()))
    }

    pub fn store_int(&self, type_id: &TypeId, i: i64) -> Value {
        self.store(type_id, Primitive::Int(i))
    }

    pub fn store_bytes(&self, type_id: &TypeId, bytes: Vec<u8>) -> Value {
        self.store(type_id, Primitive::Bytes(bytes))
    }

    pub fn store_tuple(&self, items: Vec<Value>) -> Value {
        self.store(&TypeId::tuple(), Primitive::Tuple(items))
    }

    pub fn store_dict(
        &self,
        type_id: &TypeId,
        fields: impl IntoIterator<Item = (String, Value)>,
    ) -> Value {
        self.store(type_id, Primitive::Dict(fields.into_iter().collect()))
    }

    pub fn create_exception(&self, message: &str) -> Value {
        self.wrap(self.host.create_exception(message))
    }

    pub fn call(&self, func: &Value, args: Vec<Value>) -> CallResult {
        let args = args.into_iter().map(Value::into_raw).collect();
        self.host
            .call(func.raw(), args)
            .map(|raw| self.wrap(raw))
    }

    pub fn generator_send(&self, generator: &Value, input: GeneratorInput) -> GeneratorResponse {
        self.host
            .generator_send(generator.raw(), input.map(Value::into_raw))
            .map(|raw| self.wrap(raw))
    }
}

impl fmt::Debug for Externs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Externs")
    }
}
