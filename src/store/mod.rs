//! Content-addressed storage for file contents and directory trees.
//!
//! The store's own retention is independent of the node graph: evicting a
//! node never deletes the blobs it produced.

mod memory;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{StoreError, StoreResult};

pub use memory::MemoryStore;

/// A SHA-256 hash.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Fingerprint(Sha256::digest(bytes).into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint<{}>", self.to_hex())
    }
}

/// Content address of a blob: its hash and length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest {
    pub hash: Fingerprint,
    pub size_bytes: usize,
}

impl Digest {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Digest {
            hash: Fingerprint::of(bytes),
            size_bytes: bytes.len(),
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hash, self.size_bytes)
    }
}

/// A flat directory tree: relative file path to file digest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub files: BTreeMap<String, Digest>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, digest: Digest) -> Self {
        self.files.insert(path.into(), digest);
        self
    }

    pub(crate) fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn store_bytes(&self, bytes: Vec<u8>) -> StoreResult<Digest>;

    async fn load_bytes(&self, digest: Digest) -> StoreResult<Option<Vec<u8>>>;

    async fn store_directory(&self, directory: &Directory) -> StoreResult<Digest> {
        self.store_bytes(directory.to_bytes()?).await
    }

    async fn load_directory(&self, digest: Digest) -> StoreResult<Option<Directory>> {
        match self.load_bytes(digest).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Union of several directories. The same path with different contents is a conflict.
    async fn merge_directories(&self, digests: Vec<Digest>) -> StoreResult<Digest> {
        let mut merged = Directory::new();
        for digest in digests {
            let directory = self
                .load_directory(digest)
                .await?
                .ok_or_else(|| StoreError::NotFound(digest.to_string()))?;
            for (path, file) in directory.files {
                match merged.files.get(&path) {
                    Some(existing) if *existing != file => {
                        return Err(StoreError::MergeConflict {
                            path,
                            existing: existing.to_string(),
                            incoming: file.to_string(),
                        });
                    }
                    _ => {
                        merged.files.insert(path, file);
                    }
                }
            }
        }
        self.store_directory(&merged).await
    }
}
