//! Identity contract shared by every persisted record.
//!
//! Repositories and caches are generic over [`Entity`]; a record only has to
//! expose its identifier and write timestamps to plug in.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use serde::{Serialize, de::DeserializeOwned};
use time::OffsetDateTime;

/// Identifier types usable as repository and cache keys.
///
/// `Display` drives the identity cache key, so two distinct identifiers must
/// never render to the same string.
pub trait EntityId:
    Clone + Eq + Hash + Display + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> EntityId for T where
    T: Clone + Eq + Hash + Display + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A domain record with an immutable identity and mutable write timestamps.
pub trait Entity: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Id: EntityId;

    fn id(&self) -> &Self::Id;

    fn set_id(&mut self, id: Self::Id);

    fn created_at(&self) -> OffsetDateTime;

    fn set_created_at(&mut self, at: OffsetDateTime);

    fn updated_at(&self) -> OffsetDateTime;

    fn set_updated_at(&mut self, at: OffsetDateTime);
}

/// Implements [`Entity`] for a struct with `id`, `created_at` and `updated_at` fields.
macro_rules! impl_entity {
    ($record:ty, $id:ty) => {
        impl $crate::domain::entity::Entity for $record {
            type Id = $id;

            fn id(&self) -> &Self::Id {
                &self.id
            }

            fn set_id(&mut self, id: Self::Id) {
                self.id = id;
            }

            fn created_at(&self) -> ::time::OffsetDateTime {
                self.created_at
            }

            fn set_created_at(&mut self, at: ::time::OffsetDateTime) {
                self.created_at = at;
            }

            fn updated_at(&self) -> ::time::OffsetDateTime {
                self.updated_at
            }

            fn set_updated_at(&mut self, at: ::time::OffsetDateTime) {
                self.updated_at = at;
            }
        }
    };
}

pub(crate) use impl_entity;
