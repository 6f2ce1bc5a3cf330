//! Cache key derivation.
//!
//! Identity keys are `{prefix}:{id}`. Query keys are
//! `{prefix}:{shape}:{hash}` where `hash` is the first 8 bytes of the SHA-256
//! of the parameters' JSON, hex encoded. Every shape a generator may mint is
//! registered up front so selective invalidation can sweep `{prefix}:{shape}:*`.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::domain::entity::Entity;

/// Query shapes minted by the cached repository itself.
pub const SHAPE_ALL: &str = "all";
pub const SHAPE_ONE: &str = "one";
pub const SHAPE_PAGINATED: &str = "paginated";
pub const SHAPE_COUNT: &str = "count";
pub const SHAPE_EXISTS: &str = "exists";

pub const REPOSITORY_SHAPES: [&str; 5] = [
    SHAPE_ALL,
    SHAPE_ONE,
    SHAPE_PAGINATED,
    SHAPE_COUNT,
    SHAPE_EXISTS,
];

const QUERY_HASH_BYTES: usize = 8;

pub struct KeyGenerator<T> {
    prefix: Arc<str>,
    shapes: Arc<BTreeSet<String>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for KeyGenerator<T> {
    fn clone(&self) -> Self {
        Self {
            prefix: Arc::clone(&self.prefix),
            shapes: Arc::clone(&self.shapes),
            _entity: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for KeyGenerator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGenerator")
            .field("prefix", &self.prefix)
            .field("shapes", &self.shapes)
            .finish()
    }
}

impl<T: Entity> KeyGenerator<T> {
    /// Generator with the repository shapes registered.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_shapes(prefix, REPOSITORY_SHAPES)
    }

    pub fn with_shapes<I, S>(prefix: impl Into<String>, shapes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registered: BTreeSet<String> =
            REPOSITORY_SHAPES.iter().map(|s| s.to_string()).collect();
        registered.extend(shapes.into_iter().map(Into::into));
        Self {
            prefix: Arc::from(prefix.into()),
            shapes: Arc::new(registered),
            _entity: PhantomData,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key(&self, entity: &T) -> String {
        self.key_by_id(entity.id())
    }

    pub fn key_by_id(&self, id: &T::Id) -> String {
        format!("{}:{}", self.prefix, id)
    }

    pub fn query_key<P>(&self, shape: &str, params: &P) -> String
    where
        P: Serialize + ?Sized,
    {
        if !self.shapes.contains(shape) {
            warn!(
                prefix = %self.prefix,
                shape,
                "Query key shape is not registered; selective invalidation will not sweep it"
            );
        }
        let body = match serde_json::to_vec(params) {
            Ok(body) => body,
            Err(err) => {
                warn!(
                    prefix = %self.prefix,
                    shape,
                    error = %err,
                    "Failed to serialize query parameters; hashing empty body"
                );
                Vec::new()
            }
        };
        format!("{}:{}:{}", self.prefix, shape, hash_body(&body))
    }

    /// `{prefix}:{shape}:*` for every registered shape.
    pub fn shape_patterns(&self) -> Vec<String> {
        self.shapes
            .iter()
            .map(|shape| format!("{}:{}:*", self.prefix, shape))
            .collect()
    }

    /// Pattern covering the whole namespace.
    pub fn namespace_pattern(&self) -> String {
        format!("{}:*", self.prefix)
    }
}

fn hash_body(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    hex::encode(&digest[..QUERY_HASH_BYTES])
}
