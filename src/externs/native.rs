//! An in-process [`Host`] whose values are typed primitives and whose rule
//! bodies are Rust closures and step state machines.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::{
    CallResult, Externs, GeneratorInput, GeneratorResponse, Host, Ident, Primitive, RawHandle,
    TypeId, Value,
};

type NativeFunction = Arc<dyn Fn(&Externs, Vec<Value>) -> CallResult + Send + Sync>;

/// A rule body suspended between steps.
pub trait NativeGenerator: Send {
    fn resume(&mut self, externs: &Externs, input: GeneratorInput) -> GeneratorResponse;
}

/// A [`NativeGenerator`] built from a closure.
pub struct StepFn<F>(pub F);

impl<F> NativeGenerator for StepFn<F>
where
    F: FnMut(&Externs, GeneratorInput) -> GeneratorResponse + Send,
{
    fn resume(&mut self, externs: &Externs, input: GeneratorInput) -> GeneratorResponse {
        (self.0)(externs, input)
    }
}

enum Object {
    Data {
        type_id: TypeId,
        primitive: Primitive<RawHandle>,
    },
    Function {
        name: String,
        func: NativeFunction,
    },
    Generator {
        name: String,
        state: Mutex<Box<dyn NativeGenerator>>,
    },
    Exception {
        message: String,
    },
}

struct Slot {
    refs: usize,
    object: Arc<Object>,
}

pub struct NativeHost {
    this: Weak<NativeHost>,
    objects: DashMap<u64, Slot>,
    next_handle: AtomicU64,
}

impl NativeHost {
    pub fn new() -> Arc<NativeHost> {
        Arc::new_cyclic(|this| NativeHost {
            this: this.clone(),
            objects: DashMap::new(),
            next_handle: AtomicU64::new(1),
        })
    }

    pub fn externs(self: &Arc<Self>) -> Externs {
        Externs::new(self.clone())
    }

    /// Number of host objects currently referenced from anywhere.
    pub fn live_handles(&self) -> usize {
        self.objects.len()
    }

    /// Register a rule body that receives its selected arguments and answers
    /// with a [`CallResult`].
    pub fn function<F>(self: &Arc<Self>, name: &str, func: F) -> Value
    where
        F: Fn(&Externs, Vec<Value>) -> CallResult + Send + Sync + 'static,
    {
        let raw = self.insert(Object::Function {
            name: name.to_string(),
            func: Arc::new(func),
        });
        self.externs().wrap(raw)
    }

    /// Register a rule body that completes synchronously.
    pub fn simple_function<F>(self: &Arc<Self>, name: &str, func: F) -> Value
    where
        F: Fn(&Externs, Vec<Value>) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.function(name, move |externs, args| match func(externs, args) {
            Ok(value) => CallResult::Return(value),
            Err(message) => CallResult::Throw(externs.create_exception(&message)),
        })
    }

    /// Register a rule body that, per call, builds a fresh generator.
    pub fn generator_function<F, G>(self: &Arc<Self>, name: &str, factory: F) -> Value
    where
        F: Fn(&Externs, Vec<Value>) -> G + Send + Sync + 'static,
        G: NativeGenerator + 'static,
    {
        let this = self.this.clone();
        let generator_name = name.to_string();
        self.function(name, move |externs, args| {
            let generator = factory(externs, args);
            match this.upgrade() {
                Some(host) => {
                    let raw = host.insert(Object::Generator {
                        name: generator_name.clone(),
                        state: Mutex::new(Box::new(generator)),
                    });
                    CallResult::Generator(externs.wrap(raw))
                }
                None => CallResult::Throw(externs.create_exception("host is shutting down")),
            }
        })
    }

    fn insert(&self, object: Object) -> RawHandle {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.objects.insert(
            id,
            Slot {
                refs: 1,
                object: Arc::new(object),
            },
        );
        RawHandle(id)
    }

    fn object(&self, handle: RawHandle) -> Option<Arc<Object>> {
        self.objects.get(&handle.0).map(|slot| slot.object.clone())
    }

    fn self_externs(&self) -> Option<Externs> {
        self.this.upgrade().map(|host| Externs::new(host))
    }

    fn release(&self, object: &Object) {
        if let Object::Data { primitive, .. } = object {
            match primitive {
                Primitive::Tuple(items) => items.iter().for_each(|h| self.drop_ref(*h)),
                Primitive::Dict(fields) => fields.values().for_each(|h| self.drop_ref(*h)),
                _ => {}
            }
        }
    }

    fn hash_object(&self, handle: RawHandle, state: &mut DefaultHasher) {
        match self.object(handle).as_deref() {
            Some(Object::Data { type_id, primitive }) => {
                type_id.hash(state);
                match primitive {
                    Primitive::Bytes(b) => b.hash(state),
                    Primitive::Str(s) => s.hash(state),
                    Primitive::Int(i) => i.hash(state),
                    Primitive::Float(x) => x.to_bits().hash(state),
                    Primitive::Bool(b) => b.hash(state),
                    Primitive::Tuple(items) => {
                        items.len().hash(state);
                        for item in items {
                            self.hash_object(*item, state);
                        }
                    }
                    Primitive::Dict(fields) => {
                        fields.len().hash(state);
                        for (name, item) in fields {
                            name.hash(state);
                            self.hash_object(*item, state);
                        }
                    }
                }
            }
            Some(Object::Exception { message }) => message.hash(state),
            Some(_) | None => handle.0.hash(state),
        }
    }

    fn type_of(object: Option<&Object>) -> TypeId {
        match object {
            Some(Object::Data { type_id, .. }) => type_id.clone(),
            Some(Object::Function { .. }) => TypeId::new("function"),
            Some(Object::Generator { .. }) => TypeId::new("generator"),
            Some(Object::Exception { .. }) => TypeId::new("exception"),
            None => TypeId::new("unknown"),
        }
    }

    fn primitives_equal(&self, lhs: &Primitive<RawHandle>, rhs: &Primitive<RawHandle>) -> bool {
        match (lhs, rhs) {
            (Primitive::Bytes(a), Primitive::Bytes(b)) => a == b,
            (Primitive::Str(a), Primitive::Str(b)) => a == b,
            (Primitive::Int(a), Primitive::Int(b)) => a == b,
            (Primitive::Float(a), Primitive::Float(b)) => a.to_bits() == b.to_bits(),
            (Primitive::Bool(a), Primitive::Bool(b)) => a == b,
            (Primitive::Tuple(a), Primitive::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.equals(*x, *y))
            }
            (Primitive::Dict(a), Primitive::Dict(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, x), (kb, y))| ka == kb && self.equals(*x, *y))
            }
            _ => false,
        }
    }

    fn render(&self, type_id: &TypeId, primitive: &Primitive<RawHandle>) -> String {
        match primitive {
            Primitive::Bytes(b) => match std::str::from_utf8(b) {
                Ok(s) => s.to_string(),
                Err(_) => format!("<{} bytes>", b.len()),
            },
            Primitive::Str(s) => s.clone(),
            Primitive::Int(i) => i.to_string(),
            Primitive::Float(x) => x.to_string(),
            Primitive::Bool(b) => b.to_string(),
            Primitive::Tuple(items) => {
                let items: Vec<String> = items.iter().map(|h| self.stringify(*h)).collect();
                format!("({})", items.join(", "))
            }
            Primitive::Dict(fields) => {
                let fields: Vec<String> = fields
                    .iter()
                    .map(|(k, h)| format!("{}={}", k, self.stringify(*h)))
                    .collect();
                format!("{}({})", type_id, fields.join(", "))
            }
        }
    }
}

impl Host for NativeHost {
    fn identify(&self, handle: RawHandle) -> Ident {
        let mut state = DefaultHasher::new();
        self.hash_object(handle, &mut state);
        Ident {
            hash: state.finish(),
            type_id: Self::type_of(self.object(handle).as_deref()),
        }
    }

    fn equals(&self, lhs: RawHandle, rhs: RawHandle) -> bool {
        if lhs == rhs {
            return true;
        }
        match (self.object(lhs).as_deref(), self.object(rhs).as_deref()) {
            (
                Some(Object::Data {
                    type_id: ta,
                    primitive: a,
                }),
                Some(Object::Data {
                    type_id: tb,
                    primitive: b,
                }),
            ) => ta == tb && self.primitives_equal(a, b),
            (Some(Object::Exception { message: a }), Some(Object::Exception { message: b })) => {
                a == b
            }
            _ => false,
        }
    }

    fn clone_ref(&self, handle: RawHandle) -> RawHandle {
        if let Some(mut slot) = self.objects.get_mut(&handle.0) {
            slot.refs += 1;
        }
        handle
    }

    fn drop_ref(&self, handle: RawHandle) {
        let last = match self.objects.get_mut(&handle.0) {
            Some(mut slot) => {
                slot.refs = slot.refs.saturating_sub(1);
                slot.refs == 0
            }
            None => false,
        };
        if !last {
            return;
        }
        // Removal happens outside the shard guard: releasing children re-enters the map.
        if let Some((_, slot)) = self.objects.remove_if(&handle.0, |_, slot| slot.refs == 0) {
            self.release(&slot.object);
        }
    }

    fn stringify(&self, handle: RawHandle) -> String {
        match self.object(handle).as_deref() {
            Some(Object::Data { type_id, primitive }) => self.render(type_id, primitive),
            Some(Object::Function { name, .. }) => format!("<function {name}>"),
            Some(Object::Generator { name, .. }) => format!("<generator {name}>"),
            Some(Object::Exception { message }) => message.clone(),
            None => format!("<released handle {}>", handle.0),
        }
    }

    fn project_field(&self, handle: RawHandle, field: &str) -> Option<RawHandle> {
        match self.object(handle).as_deref() {
            Some(Object::Data {
                primitive: Primitive::Dict(fields),
                ..
            }) => fields.get(field).map(|h| self.clone_ref(*h)),
            _ => None,
        }
    }

    fn store(&self, type_id: &TypeId, primitive: Primitive<RawHandle>) -> RawHandle {
        self.insert(Object::Data {
            type_id: type_id.clone(),
            primitive,
        })
    }

    fn load(&self, handle: RawHandle) -> Option<Primitive<RawHandle>> {
        match self.object(handle).as_deref() {
            Some(Object::Data { primitive, .. }) => {
                Some(primitive.clone().map(|h| self.clone_ref(h)))
            }
            _ => None,
        }
    }

    fn call(&self, func: RawHandle, args: Vec<RawHandle>) -> CallResult<RawHandle> {
        let Some(externs) = self.self_externs() else {
            return CallResult::Throw(self.create_exception("host is shutting down"));
        };
        let args: Vec<Value> = args.into_iter().map(|raw| externs.wrap(raw)).collect();
        match self.object(func).as_deref() {
            Some(Object::Function { func, .. }) => func(&externs, args).map(Value::into_raw),
            _ => CallResult::Throw(
                self.create_exception(&format!("{} is not callable", self.stringify(func))),
            ),
        }
    }

    fn generator_send(
        &self,
        generator: RawHandle,
        input: GeneratorInput<RawHandle>,
    ) -> GeneratorResponse<RawHandle> {
        let Some(externs) = self.self_externs() else {
            return GeneratorResponse::Throw(self.create_exception("host is shutting down"));
        };
        let input = input.map(|raw| externs.wrap(raw));
        match self.object(generator).as_deref() {
            Some(Object::Generator { state, .. }) => {
                state.lock().resume(&externs, input).map(Value::into_raw)
            }
            _ => GeneratorResponse::Throw(self.create_exception(&format!(
                "{} is not a generator",
                self.stringify(generator)
            ))),
        }
    }

    fn create_exception(&self, message: &str) -> RawHandle {
        self.insert(Object::Exception {
            message: message.to_string(),
        })
    }
}

impl fmt::Debug for NativeHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHost")
            .field("live_handles", &self.objects.len())
            .finish()
    }
}
