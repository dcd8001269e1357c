//! Core types for binding host objects into Lua.
//!
//! This crate holds the pieces shared by the registry and the binding facade:
//!
//! - [`BindError`]: the single error taxonomy of the bridge
//! - [`TypeKey`]: stable identity of a host type
//! - [`Object`], [`Upcast`], [`VirtualUpcast`]: capability traits a host
//!   type implements, and [`VirtualBase`] for ancestors shared in a diamond
//! - [`Cast`], [`BasePath`]: erased base-pointer resolution
//! - [`SharedObject`]: erased shared ownership
//! - [`BindOptions`]: per-runtime configuration

mod cast;
mod error;
mod object;
mod options;
mod type_key;

pub use cast::{BasePath, Cast, CellCast, MutCast, PathError, RefCast};
pub use error::{BindError, BindErrorKind, BindResult, IndexAccess};
pub use object::{
    AsAny, Object, SharedObject, Upcast, VirtualBase, VirtualUpcast, concrete_key,
};
pub use options::{BindOptions, IndexBase};
pub use type_key::TypeKey;
