//! TypeRegistry - per-runtime table of bound host types.
//!
//! This module provides [`TypeRegistry`], the store that maps each registered
//! host type to its [`TypeRecord`]. One registry exists per `Lua` instance. It
//! lives in the runtime's application-data slot, is created lazily by
//! [`TypeRegistry::get`] and is dropped together with the `Lua` value, so no
//! state is shared between runtimes.
//!
//! # Registration Rules
//!
//! - Registration is idempotent by host type: registering a type again
//!   returns the existing record untouched.
//! - Bases must already be registered. A missing base fails with
//!   [`BindError::RegistrationOrder`] and nothing is stored.
//! - Display names are unique across types.
//!
//! # Base-Path Table
//!
//! At registration every reachable ancestor gets exactly one [`BasePath`].
//! Bases are walked in declaration order and the first path to an ancestor
//! wins, so in a diamond the shared ancestor is always reached through the
//! first-declared base.
//!
//! A diamond is only accepted when its shared ancestor is a virtual base
//! (held in one `VirtualBase` and declared through `VirtualUpcast`) on every
//! path. An ancestor embedded by value twice fails with
//! [`BindError::AmbiguousBase`] before anything is stored.
//!
//! # Thread Safety
//!
//! `TypeRegistry` is **not thread-safe**. It uses `Rc` and `RefCell` and is
//! only touched from the thread that owns the `Lua` instance, matching the
//! runtime's own single-threaded execution model.
//!
//! # Example
//!
//! ```ignore
//! let registry = TypeRegistry::get(&lua);
//! let decl = TypeDecl::new(TypeKey::of::<Account>(), "Account", hooks);
//! let (record, created) = registry.register(&lua, decl)?;
//! assert!(created);
//! assert!(Rc::ptr_eq(&record, &registry.find_by_static::<Account>().unwrap()));
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use mlua::Lua;
use rustc_hash::FxHashMap;
use tracing::debug;

use luabind_core::{BasePath, BindError, BindOptions, BindResult, Cast, TypeKey};

use crate::{AttributeHooks, TypeRecord};

/// Everything needed to register one host type.
#[derive(Debug, Clone)]
pub struct TypeDecl {
    key: TypeKey,
    name: String,
    bases: Vec<Cast>,
    hooks: AttributeHooks,
}

impl TypeDecl {
    pub fn new(key: TypeKey, name: impl Into<String>, hooks: AttributeHooks) -> Self {
        Self {
            key,
            name: name.into(),
            bases: Vec::new(),
            hooks,
        }
    }

    /// Declare a direct base through its upcast. Order matters.
    pub fn base(mut self, cast: Cast) -> Self {
        self.bases.push(cast);
        self
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Per-runtime registry of bound host types.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    options: RefCell<BindOptions>,
    records: RefCell<FxHashMap<TypeKey, Rc<TypeRecord>>>,
    names: RefCell<FxHashMap<String, TypeKey>>,
}

impl TypeRegistry {
    /// Create a detached registry.
    pub fn new(options: BindOptions) -> Self {
        Self {
            options: RefCell::new(options),
            ..Self::default()
        }
    }

    /// The registry of `lua`, created with default options on first use.
    pub fn get(lua: &Lua) -> Rc<TypeRegistry> {
        if let Some(existing) = lua.app_data_ref::<Rc<TypeRegistry>>() {
            return Rc::clone(&existing);
        }
        let registry = Rc::new(TypeRegistry::new(BindOptions::default()));
        lua.set_app_data(Rc::clone(&registry));
        debug!("type registry created");
        registry
    }

    /// The registry of `lua` with `options` applied.
    pub fn install(lua: &Lua, options: BindOptions) -> Rc<TypeRegistry> {
        let registry = Self::get(lua);
        registry.set_options(options);
        registry
    }

    pub fn options(&self) -> BindOptions {
        self.options.borrow().clone()
    }

    pub fn set_options(&self, options: BindOptions) {
        debug!(?options, "binding options set");
        *self.options.borrow_mut() = options;
    }

    // ==========================================================================
    // Registration
    // ==========================================================================

    /// Register a host type.
    ///
    /// Returns the record and whether it was created by this call. The class
    /// table is created and published as the global named after the type.
    pub fn register(&self, lua: &Lua, decl: TypeDecl) -> BindResult<(Rc<TypeRecord>, bool)> {
        if let Some(existing) = self.find(decl.key) {
            return Ok((existing, false));
        }

        if let Some(existing) = self.names.borrow().get(&decl.name) {
            return Err(BindError::DuplicateName {
                name: decl.name.clone(),
                existing: existing.rust_name().to_string(),
            });
        }

        let mut bases = Vec::with_capacity(decl.bases.len());
        for cast in &decl.bases {
            let base = self
                .find(cast.to())
                .ok_or_else(|| BindError::RegistrationOrder {
                    type_name: decl.name.clone(),
                    base: cast.to().short_name().to_string(),
                })?;
            bases.push(base);
        }

        let paths = resolution_table(decl.key, &decl.bases, &bases).map_err(|ancestor| {
            BindError::AmbiguousBase {
                type_name: decl.name.clone(),
                base: self.display_name(ancestor),
            }
        })?;

        let class_table = lua.create_table()?;
        let class_key = lua.create_registry_value(class_table.clone())?;
        lua.globals().set(decl.name.as_str(), class_table)?;

        let record = Rc::new(TypeRecord::new(
            decl.name.clone(),
            decl.key,
            bases,
            paths,
            decl.hooks,
            class_key,
        ));

        self.records
            .borrow_mut()
            .insert(decl.key, Rc::clone(&record));
        self.names.borrow_mut().insert(decl.name.clone(), decl.key);

        debug!(
            type_name = %decl.name,
            rust_name = decl.key.rust_name(),
            bases = record.bases().len(),
            "type registered"
        );
        Ok((record, true))
    }

    // ==========================================================================
    // Lookup
    // ==========================================================================

    /// Record for a type key.
    pub fn find(&self, key: TypeKey) -> Option<Rc<TypeRecord>> {
        self.records.borrow().get(&key).cloned()
    }

    /// Record for the statically known type `T`.
    pub fn find_by_static<T: 'static>(&self) -> Option<Rc<TypeRecord>> {
        self.find(TypeKey::of::<T>())
    }

    /// Record published under a display name.
    pub fn find_by_name(&self, name: &str) -> Option<Rc<TypeRecord>> {
        let key = self.names.borrow().get(name).copied()?;
        self.find(key)
    }

    /// Most specific record for an object.
    ///
    /// Looks up the object's concrete type first, then the static type the
    /// host handed it over as. The flag is `true` when the static fallback was
    /// used.
    pub fn find_by_dynamic_and_static(
        &self,
        dynamic: TypeKey,
        static_key: TypeKey,
    ) -> Option<(Rc<TypeRecord>, bool)> {
        if let Some(record) = self.find(dynamic) {
            return Some((record, false));
        }
        self.find(static_key).map(|record| (record, true))
    }

    /// Display name of a type: its registered name, or the Rust short name.
    pub fn display_name(&self, key: TypeKey) -> String {
        match self.find(key) {
            Some(record) => record.name().to_string(),
            None => key.short_name().to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    /// Registered display names, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.names.borrow().keys().cloned().collect();
        names.sort();
        names
    }
}

/// One path per reachable ancestor, first-declared base wins.
///
/// An ancestor reached through two bases must sit behind the same virtual
/// anchor on both paths; otherwise the object would hold two copies of it and
/// the offending ancestor is returned.
fn resolution_table(
    key: TypeKey,
    casts: &[Cast],
    bases: &[Rc<TypeRecord>],
) -> Result<FxHashMap<TypeKey, BasePath>, TypeKey> {
    let mut paths: FxHashMap<TypeKey, BasePath> = FxHashMap::default();
    paths.insert(key, BasePath::identity(key));
    for (cast, base) in casts.iter().zip(bases) {
        for (ancestor, path) in base.paths() {
            let candidate = path.prepend(*cast);
            match paths.get(ancestor) {
                None => {
                    paths.insert(*ancestor, candidate);
                }
                Some(existing) => {
                    let anchor = existing.virtual_anchor();
                    if anchor.is_none() || anchor != candidate.virtual_anchor() {
                        return Err(*ancestor);
                    }
                }
            }
        }
    }
    Ok(paths)
}
