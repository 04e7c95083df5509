use async_trait::async_trait;
use dashmap::DashMap;

use super::{Digest, Store};
use crate::error::StoreResult;

/// An in-memory [`Store`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: DashMap<Digest, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn store_bytes(&self, bytes: Vec<u8>) -> StoreResult<Digest> {
        let digest = Digest::of_bytes(&bytes);
        self.blobs.entry(digest).or_insert(bytes);
        Ok(digest)
    }

    async fn load_bytes(&self, digest: Digest) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.blobs.get(&digest).map(|b| b.clone()))
    }
}
