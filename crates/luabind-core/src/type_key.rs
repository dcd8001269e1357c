//! Stable identity of host types.

use std::any::TypeId;
use std::hash::{Hash, Hasher};

/// Identity key of a host type.
///
/// Wraps [`TypeId`] and keeps the Rust type name around for diagnostics.
/// Equality and hashing only consider the `TypeId`.
#[derive(Debug, Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key of the type `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Underlying `TypeId`.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Full Rust path of the type.
    pub fn rust_name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the Rust type name, without generic arguments.
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        base.rsplit("::").next().unwrap_or(base)
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for TypeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_name())
    }
}
