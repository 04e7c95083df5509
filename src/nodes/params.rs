use std::fmt;

use crate::externs::{Key, TypeId};
use crate::rules::ParamTypes;

/// A set of typed param values holding at most one value per type.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Params(Vec<Key>);

impl Params {
    pub fn new(keys: impl IntoIterator<Item = Key>) -> Self {
        let mut params = Params::default();
        for key in keys {
            params.put(key);
        }
        params
    }

    /// Insert `key`, replacing any existing value of the same type.
    pub fn put(&mut self, key: Key) {
        match self.0.binary_search_by(|k| k.type_id().cmp(key.type_id())) {
            Ok(idx) => self.0[idx] = key,
            Err(idx) => self.0.insert(idx, key),
        }
    }

    pub fn find(&self, type_id: &TypeId) -> Option<&Key> {
        self.0
            .binary_search_by(|k| k.type_id().cmp(type_id))
            .ok()
            .map(|idx| &self.0[idx])
    }

    pub fn types(&self) -> ParamTypes {
        self.0.iter().map(|k| k.type_id().clone()).collect()
    }

    /// Only the keys whose type is in `types`.
    pub fn restrict(&self, types: &ParamTypes) -> Params {
        Params(
            self.0
                .iter()
                .filter(|k| types.contains(k.type_id()))
                .cloned()
                .collect(),
        )
    }

    pub fn keys(&self) -> &[Key] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.0.iter().map(|k| k.to_string()).collect();
        write!(f, "{}", keys.join(", "))
    }
}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Params({})", self)
    }
}
