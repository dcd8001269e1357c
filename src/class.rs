//! Class builder for binding host types.
//!
//! [`Class`] registers a host type and attaches its constructors, functions,
//! properties and array accessors. Registration creates a class table that
//! is published as a global named after the type; constructors and class
//! functions live there and are called with a colon:
//!
//! ```lua
//! local acc = Account:new(100)
//! acc:deposit(10)
//! print(acc.balance)
//! ```
//!
//! # Example
//!
//! ```ignore
//! Class::<Account>::register(&lua, "Account")?
//!     .constructor("new", |_, balance: f64| Ok(Account::new(balance)))?
//!     .method_mut("deposit", |_, acc: &mut Account, amount: f64| {
//!         acc.balance += amount;
//!         Ok(())
//!     })?
//!     .property("balance", |acc: &Account| acc.balance, |acc, v: f64| acc.balance = v)?
//!     .property_readonly("bankName", |acc: &Account| acc.bank.clone())?;
//!
//! Class::<SpecialAccount>::declare("SpecialAccount")
//!     .base::<Account>()
//!     .register(&lua)?
//!     .property_readonly("limit", |acc: &SpecialAccount| acc.limit)?;
//! ```
//!
//! In a diamond the shared ancestor is declared with
//! [`ClassDecl::virtual_base`] by each intermediate type; registering a type
//! that would embed one ancestor twice fails.
//!
//! Every registered type also gets `delete`, both as an instance function
//! and in its class table, which releases the object immediately.

use std::marker::PhantomData;
use std::rc::Rc;

use mlua::{AnyUserData, IntoLua, IntoLuaMulti, Lua, MultiValue, Value};
use tracing::debug;

use luabind_core::{BindResult, Cast, Object, TypeKey, Upcast, VirtualUpcast};
use luabind_registry::{
    IndexGetter, IndexSetter, Property, PropertyGetter, PropertySetter, TypeDecl, TypeFlags,
    TypeRecord, TypeRegistry,
};

use crate::adapter::{self, guard};
use crate::convert::{FromArgs, FromScript, Owned, SharedRef};
use crate::dispatch::HOOKS;
use crate::handle::handle_ref;

/// Argument position of the assigned value in `obj.key = value`.
const ASSIGNED_VALUE_POSITION: usize = 3;

/// Declaration of a type that has bases.
///
/// Created by [`Class::declare`]; bases are resolved when
/// [`ClassDecl::register`] runs.
pub struct ClassDecl<T: Object> {
    name: String,
    bases: Vec<Cast>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Object> ClassDecl<T> {
    /// Declare a direct base. Bases are searched in declaration order.
    pub fn base<B: Object>(mut self) -> Self
    where
        T: Upcast<B>,
    {
        self.bases.push(Cast::upcast::<T, B>());
        self
    }

    /// Declare a direct base held in shared
    /// [`VirtualBase`](luabind_core::VirtualBase) storage.
    ///
    /// Every base of a diamond that leads to the shared ancestor declares it
    /// this way, so all views of one object reach the same ancestor.
    pub fn virtual_base<B: Object>(mut self) -> Self
    where
        T: VirtualUpcast<B>,
    {
        self.bases.push(Cast::virtual_upcast::<T, B>());
        self
    }

    /// Register the type. Every declared base must already be registered.
    pub fn register(self, lua: &Lua) -> BindResult<Class<'_, T>> {
        let registry = TypeRegistry::get(lua);
        let decl = self
            .bases
            .into_iter()
            .fold(TypeDecl::new(TypeKey::of::<T>(), self.name, HOOKS), |decl, cast| {
                decl.base(cast)
            });
        let (record, created) = registry.register(lua, decl)?;
        if created {
            let delete = adapter::delete(lua)?;
            record.add_function(lua, "delete", delete.clone())?;
            record.class_table(lua)?.set("delete", delete)?;
        }
        Ok(Class {
            lua,
            record,
            _marker: PhantomData,
        })
    }
}

/// Builder attaching members to a registered host type.
pub struct Class<'lua, T: Object> {
    lua: &'lua Lua,
    record: Rc<TypeRecord>,
    _marker: PhantomData<fn() -> T>,
}

impl<'lua, T: Object> Class<'lua, T> {
    /// Start declaring `T` under `name`.
    pub fn declare(name: impl Into<String>) -> ClassDecl<T> {
        ClassDecl {
            name: name.into(),
            bases: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Register `T` without bases.
    ///
    /// Registering a type again returns a builder for the existing record.
    pub fn register(lua: &'lua Lua, name: impl Into<String>) -> BindResult<Self> {
        Self::declare(name).register(lua)
    }

    pub fn record(&self) -> &Rc<TypeRecord> {
        &self.record
    }

    pub fn name(&self) -> &str {
        self.record.name()
    }

    // ========================================================================
    // Constructors and class functions
    // ========================================================================

    /// Bind `new()` producing `T::default()`.
    pub fn default_constructor(self) -> BindResult<Self>
    where
        T: Default,
    {
        self.record.insert_flags(TypeFlags::DEFAULT_CONSTRUCTIBLE);
        self.constructor("new", |_, ()| Ok(T::default()))
    }

    /// Bind a constructor producing an engine-owned object.
    pub fn constructor<A, F>(self, name: &str, f: F) -> BindResult<Self>
    where
        A: FromArgs,
        F: Fn(&Lua, A) -> mlua::Result<T> + 'static,
    {
        self.class_function(name, move |lua, args: A| f(lua, args).map(Owned))
    }

    /// Bind a constructor producing a shared-owned object.
    pub fn shared_constructor<A, F>(self, name: &str, f: F) -> BindResult<Self>
    where
        A: FromArgs,
        F: Fn(&Lua, A) -> mlua::Result<T> + 'static,
    {
        self.class_function(name, move |lua, args: A| f(lua, args).map(SharedRef::new))
    }

    /// Bind a constructor that converts its own arguments.
    ///
    /// `f` receives the arguments after the class table and is expected to
    /// return the new object, typically through [`Owned`] or [`SharedRef`].
    pub fn raw_constructor<R, F>(self, name: &str, f: F) -> BindResult<Self>
    where
        R: IntoLuaMulti,
        F: Fn(&Lua, MultiValue) -> mlua::Result<R> + 'static,
    {
        self.raw_class_function(name, f)
    }

    /// Bind a function in the class table, called as `Type:name(...)`.
    pub fn class_function<A, R, F>(self, name: &str, f: F) -> BindResult<Self>
    where
        A: FromArgs,
        R: IntoLuaMulti,
        F: Fn(&Lua, A) -> mlua::Result<R> + 'static,
    {
        let function = adapter::class_function(self.lua, f)?;
        self.record.class_table(self.lua)?.set(name, function)?;
        debug!(type_name = %self.record.name(), member = name, "class function bound");
        Ok(self)
    }

    /// Bind a class function that converts its own arguments.
    pub fn raw_class_function<R, F>(self, name: &str, f: F) -> BindResult<Self>
    where
        R: IntoLuaMulti,
        F: Fn(&Lua, MultiValue) -> mlua::Result<R> + 'static,
    {
        let function = adapter::raw_class_function(self.lua, f)?;
        self.record.class_table(self.lua)?.set(name, function)?;
        debug!(type_name = %self.record.name(), member = name, "class function bound");
        Ok(self)
    }

    // ========================================================================
    // Instance functions
    // ========================================================================

    /// Bind an instance function with shared access to the object.
    pub fn method<A, R, F>(self, name: &str, f: F) -> BindResult<Self>
    where
        A: FromArgs,
        R: IntoLuaMulti,
        F: Fn(&Lua, &T, A) -> mlua::Result<R> + 'static,
    {
        let function = adapter::method(self.lua, f)?;
        self.record.add_function(self.lua, name, function)?;
        Ok(self)
    }

    /// Bind an instance function with mutable access to the object.
    pub fn method_mut<A, R, F>(self, name: &str, f: F) -> BindResult<Self>
    where
        A: FromArgs,
        R: IntoLuaMulti,
        F: Fn(&Lua, &mut T, A) -> mlua::Result<R> + 'static,
    {
        let function = adapter::method_mut(self.lua, f)?;
        self.record.add_function(self.lua, name, function)?;
        Ok(self)
    }

    /// Bind an instance function that receives the raw Lua arguments,
    /// starting with the object itself.
    pub fn raw_function<R, F>(self, name: &str, f: F) -> BindResult<Self>
    where
        R: IntoLuaMulti,
        F: Fn(&Lua, MultiValue) -> mlua::Result<R> + 'static,
    {
        let function = adapter::raw_function(self.lua, f)?;
        self.record.add_function(self.lua, name, function)?;
        Ok(self)
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Bind a read-write property.
    pub fn property<R, V, G, S>(self, name: &str, get: G, set: S) -> BindResult<Self>
    where
        R: IntoLua,
        V: FromScript,
        G: Fn(&T) -> R + 'static,
        S: Fn(&mut T, V) + 'static,
    {
        self.record
            .add_property(name, Property::read_write(getter(get), setter(set)));
        Ok(self)
    }

    /// Bind a property that rejects writes.
    pub fn property_readonly<R, G>(self, name: &str, get: G) -> BindResult<Self>
    where
        R: IntoLua,
        G: Fn(&T) -> R + 'static,
    {
        self.record.add_property(name, Property::read_only(getter(get)));
        Ok(self)
    }

    /// Bind a property that rejects reads.
    pub fn property_writeonly<V, S>(self, name: &str, set: S) -> BindResult<Self>
    where
        V: FromScript,
        S: Fn(&mut T, V) + 'static,
    {
        self.record.add_property(name, Property::write_only(setter(set)));
        Ok(self)
    }

    /// Bind a property whose accessors work on the raw userdata.
    pub fn raw_property<R, G, S>(self, name: &str, get: G, set: S) -> BindResult<Self>
    where
        R: IntoLua,
        G: Fn(&Lua, &AnyUserData) -> mlua::Result<R> + 'static,
        S: Fn(&Lua, &AnyUserData, Value) -> mlua::Result<()> + 'static,
    {
        let set: PropertySetter = Rc::new(move |lua: &Lua, ud: &AnyUserData, value: Value| {
            guard(|| set(lua, ud, value))
        });
        self.record
            .add_property(name, Property::read_write(raw_getter(get), set));
        Ok(self)
    }

    /// Bind a read-only property working on the raw userdata.
    pub fn raw_property_readonly<R, G>(self, name: &str, get: G) -> BindResult<Self>
    where
        R: IntoLua,
        G: Fn(&Lua, &AnyUserData) -> mlua::Result<R> + 'static,
    {
        self.record.add_property(name, Property::read_only(raw_getter(get)));
        Ok(self)
    }

    // ========================================================================
    // Array access
    // ========================================================================

    /// Bind `obj[i]` reads. `get` receives the zero-based index.
    pub fn array_access<R, G>(self, get: G) -> BindResult<Self>
    where
        R: IntoLua,
        G: Fn(&T, i64) -> mlua::Result<R> + 'static,
    {
        self.record.set_index_getter(index_getter(get));
        debug!(type_name = %self.record.name(), "array getter bound");
        Ok(self)
    }

    /// Bind `obj[i]` reads and writes. Both receive the zero-based index.
    pub fn array_access_mut<R, V, G, S>(self, get: G, set: S) -> BindResult<Self>
    where
        R: IntoLua,
        V: FromScript,
        G: Fn(&T, i64) -> mlua::Result<R> + 'static,
        S: Fn(&mut T, i64, V) -> mlua::Result<()> + 'static,
    {
        self.record.set_index_getter(index_getter(get));
        self.record.set_index_setter(index_setter(set));
        debug!(type_name = %self.record.name(), "array accessors bound");
        Ok(self)
    }
}

// ============================================================================
// Accessor adapters
// ============================================================================

fn getter<T, R, G>(get: G) -> PropertyGetter
where
    T: Object,
    R: IntoLua,
    G: Fn(&T) -> R + 'static,
{
    Rc::new(move |lua: &Lua, ud: &AnyUserData| {
        let handle = handle_ref(ud)?;
        let value = guard(|| Ok(handle.with_ref(|object: &T| get(object))?))?;
        value.into_lua(lua)
    })
}

fn raw_getter<R, G>(get: G) -> PropertyGetter
where
    R: IntoLua,
    G: Fn(&Lua, &AnyUserData) -> mlua::Result<R> + 'static,
{
    Rc::new(move |lua: &Lua, ud: &AnyUserData| guard(|| get(lua, ud))?.into_lua(lua))
}

fn setter<T, V, S>(set: S) -> PropertySetter
where
    T: Object,
    V: FromScript,
    S: Fn(&mut T, V) + 'static,
{
    Rc::new(move |lua: &Lua, ud: &AnyUserData, value: Value| {
        let value = V::from_script(lua, value, ASSIGNED_VALUE_POSITION)?;
        let handle = handle_ref(ud)?;
        guard(|| Ok(handle.with_mut(|object: &mut T| set(object, value))?))
    })
}

fn index_getter<T, R, G>(get: G) -> IndexGetter
where
    T: Object,
    R: IntoLua,
    G: Fn(&T, i64) -> mlua::Result<R> + 'static,
{
    Rc::new(move |lua: &Lua, ud: &AnyUserData, index: i64| {
        let handle = handle_ref(ud)?;
        let value = guard(|| handle.with_ref(|object: &T| get(object, index))?)?;
        value.into_lua(lua)
    })
}

fn index_setter<T, V, S>(set: S) -> IndexSetter
where
    T: Object,
    V: FromScript,
    S: Fn(&mut T, i64, V) -> mlua::Result<()> + 'static,
{
    Rc::new(move |lua: &Lua, ud: &AnyUserData, index: i64, value: Value| {
        let value = V::from_script(lua, value, ASSIGNED_VALUE_POSITION)?;
        let handle = handle_ref(ud)?;
        guard(|| handle.with_mut(|object: &mut T| set(object, index, value))?)
    })
}
