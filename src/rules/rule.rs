use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::externs::{TypeId, Value};

/// A set of param types, ordered for stable identity.
pub type ParamTypes = BTreeSet<TypeId>;

/// Unique rule name.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(Arc<str>);

impl RuleId {
    pub fn new(name: impl AsRef<str>) -> Self {
        RuleId(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A dependency of a rule: a product, requested with some extra params.
///
/// Static selectors have no provided types. A declared `Get` provides the
/// types of its input values.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyKey {
    pub product: TypeId,
    pub provided: Vec<TypeId>,
}

impl DependencyKey {
    /// Input types are sorted; repeated types are kept so callers can reject them.
    pub fn new(product: TypeId, provided: impl IntoIterator<Item = TypeId>) -> Self {
        let mut provided: Vec<TypeId> = provided.into_iter().collect();
        provided.sort();
        DependencyKey { product, provided }
    }

    pub fn select(product: TypeId) -> Self {
        DependencyKey {
            product,
            provided: Vec::new(),
        }
    }

    pub fn provides_params(&self) -> bool {
        !self.provided.is_empty()
    }

    /// An input type given more than once, if any.
    pub fn repeated_input(&self) -> Option<&TypeId> {
        self.provided
            .windows(2)
            .find(|pair| pair[0] == pair[1])
            .map(|pair| &pair[0])
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.provided.is_empty() {
            return write!(f, "{}", self.product);
        }
        let provided: Vec<&str> = self.provided.iter().map(|t| t.name()).collect();
        write!(f, "Get({}, [{}])", self.product, provided.join(", "))
    }
}

/// Rule bodies implemented by the engine itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    ReadFile,
    RunProcess,
}

#[derive(Clone, Debug)]
pub enum RuleBody {
    /// A host callable invoked with the selected values.
    Host(Value),
    Intrinsic(Intrinsic),
}

/// Type names used by the intrinsic rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Types {
    pub path: TypeId,
    pub file_content: TypeId,
    pub process: TypeId,
    pub process_result: TypeId,
}

impl Default for Types {
    fn default() -> Self {
        Types {
            path: TypeId::new("Path"),
            file_content: TypeId::new("FileContent"),
            process: TypeId::new("Process"),
            process_result: TypeId::new("ProcessResult"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Rule {
    pub id: RuleId,
    pub product: TypeId,
    pub selects: Vec<TypeId>,
    pub gets: Vec<DependencyKey>,
    pub cacheable: bool,
    pub priority: i32,
    pub body: RuleBody,
}

impl Rule {
    pub fn builder(name: impl AsRef<str>, product: impl Into<TypeId>) -> RuleBuilder {
        RuleBuilder {
            id: RuleId::new(name),
            product: product.into(),
            selects: Vec::new(),
            gets: Vec::new(),
            cacheable: true,
            priority: 0,
        }
    }

    pub fn is_intrinsic(&self) -> bool {
        matches!(self.body, RuleBody::Intrinsic(_))
    }

    /// Every dependency the rule may request, selects first.
    pub fn dependency_keys(&self) -> impl Iterator<Item = DependencyKey> + '_ {
        self.selects
            .iter()
            .cloned()
            .map(DependencyKey::select)
            .chain(self.gets.iter().cloned())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let selects: Vec<&str> = self.selects.iter().map(|t| t.name()).collect();
        write!(f, "{}({}) -> {}", self.id, selects.join(", "), self.product)
    }
}

/// Builder returned by [`Rule::builder`]; finished by `body` or `intrinsic`.
pub struct RuleBuilder {
    id: RuleId,
    product: TypeId,
    selects: Vec<TypeId>,
    gets: Vec<DependencyKey>,
    cacheable: bool,
    priority: i32,
}

impl RuleBuilder {
    pub fn select(mut self, product: impl Into<TypeId>) -> Self {
        self.selects.push(product.into());
        self
    }

    /// Declare a Get the body may issue: `product` computed with params of the `inputs` types.
    pub fn get<I, T>(mut self, product: impl Into<TypeId>, inputs: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TypeId>,
    {
        self.gets.push(DependencyKey::new(
            product.into(),
            inputs.into_iter().map(Into::into),
        ));
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn body(self, func: Value) -> Rule {
        self.finish(RuleBody::Host(func))
    }

    pub fn intrinsic(self, intrinsic: Intrinsic) -> Rule {
        self.finish(RuleBody::Intrinsic(intrinsic))
    }

    fn finish(self, body: RuleBody) -> Rule {
        Rule {
            id: self.id,
            product: self.product,
            selects: self.selects,
            gets: self.gets,
            cacheable: self.cacheable,
            priority: self.priority,
            body,
        }
    }
}
