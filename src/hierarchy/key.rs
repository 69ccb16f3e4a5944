//! Version keys of cached hierarchies.

use std::collections::BTreeSet;
use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::model::ModelProvider;

/// Computes the version key of a hierarchy from its dependency set.
pub trait CacheKeyService: Send + Sync + fmt::Debug {
    /// Key of `name` given the current content of every dependency. Fails
    /// when a dependency no longer exists.
    fn gen_key(
        &self,
        name: &str,
        dependencies: &BTreeSet<String>,
        model: &dyn ModelProvider,
    ) -> Result<String>;
}

/// SHA-256 over the name and each dependency's id and content hash, in
/// sorted dependency order.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256KeyService;

impl CacheKeyService for Sha256KeyService {
    fn gen_key(
        &self,
        name: &str,
        dependencies: &BTreeSet<String>,
        model: &dyn ModelProvider,
    ) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        for dependency in dependencies {
            hasher.update([0u8]);
            hasher.update(dependency.as_bytes());
            hasher.update([b'=']);
            hasher.update(model.content_hash(dependency)?.as_bytes());
        }
        Ok(hex::encode(hasher.finalize()))
    }
}
