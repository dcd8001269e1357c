//! Lua bindings for host objects.
//!
//! `luabind` exposes Rust types to Lua 5.4 through [`mlua`]. A bound type
//! gets a class table named after it holding its constructors and class
//! functions; its instances are userdata whose attribute access is routed
//! through the type's registered properties, functions and array accessors,
//! falling back to a per-instance table for anything else.
//!
//! # Example
//!
//! ```ignore
//! use luabind::prelude::*;
//!
//! let lua = Lua::new();
//! luabind::init(&lua, BindOptions::default());
//!
//! Class::<Account>::register(&lua, "Account")?
//!     .constructor("new", |_, balance: f64| Ok(Account::new(balance)))?
//!     .property_readonly("balance", |acc: &Account| acc.balance)?;
//!
//! lua.load("local a = Account:new(10); print(a.balance)").exec()?;
//! ```
//!
//! # Ownership
//!
//! Objects enter Lua engine-owned ([`Owned`], [`push_owned`]), shared
//! ([`SharedRef`], [`SharedBase`], [`push_shared`]) or host-owned
//! ([`HostRef`], [`push_host`]). See [`handle`] for how each is finalised.
//!
//! # Diamonds
//!
//! An ancestor shared by two bases lives in one [`VirtualBase`]. The
//! intermediate types implement [`VirtualUpcast`] and declare it with
//! [`ClassDecl::virtual_base`]; the most-derived type gives both of them the
//! same storage.

mod adapter;
pub mod class;
pub mod convert;
pub mod dispatch;
pub mod function;
pub mod handle;

use std::rc::Rc;

use mlua::Lua;
use tracing::debug;

pub use luabind_core::{
    AsAny, BasePath, BindError, BindErrorKind, BindOptions, BindResult, Cast, IndexAccess,
    IndexBase, Object, PathError, SharedObject, TypeKey, Upcast, VirtualBase, VirtualUpcast,
};
pub use luabind_registry::{TypeFlags, TypeRecord, TypeRegistry};

pub use class::{Class, ClassDecl};
pub use convert::{FromArgs, FromScript, ObjectRef, Owned, Pair, SharedBase, SharedRef};
pub use function::{function, raw_function};
pub use handle::{
    HostRef, Lifetime, ObjectHandle, adhoc_table, ensure_adhoc_table, handle_ref, is_released,
    push_host, push_owned, push_shared, release, set_adhoc_table,
};

/// Install the binding registry in `lua` with `options`.
///
/// Calling this is optional; the first registration installs a registry
/// with default options. Calling it again replaces the options and keeps
/// every registered type.
pub fn init(lua: &Lua, options: BindOptions) -> Rc<TypeRegistry> {
    debug!(
        index_base = ?options.index_base,
        strict_keys = options.strict_keys,
        "binding registry initialised"
    );
    TypeRegistry::install(lua, options)
}

pub mod prelude {
    pub use crate::class::{Class, ClassDecl};
    pub use crate::convert::{ObjectRef, Owned, Pair, SharedBase, SharedRef};
    pub use crate::function::{function, raw_function};
    pub use crate::handle::{HostRef, push_host, push_owned, push_shared, release};
    pub use luabind_core::{
        BindError, BindOptions, BindResult, IndexBase, Object, Upcast, VirtualBase, VirtualUpcast,
    };
    pub use mlua::Lua;
}
