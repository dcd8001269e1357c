//! Type registry for the Lua binding layer.
//!
//! [`TypeRegistry`] maps host types to [`TypeRecord`]s, the per-type metadata
//! the dispatch protocol consults on every attribute access.

mod record;
mod registry;

pub use record::{
    AttributeHooks, IndexGetter, IndexHook, IndexSetter, NewIndexHook, Property, PropertyGetter,
    PropertySetter, TypeFlags, TypeRecord,
};
pub use registry::{TypeDecl, TypeRegistry};
