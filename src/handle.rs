//! Object handles: the userdata that carries a host object into Lua.
//!
//! Every bound object that Lua can see is an [`ObjectHandle`] inside a Lua
//! userdata. The handle records how the object is owned:
//!
//! | Lifetime | Storage                | Finalisation                      |
//! |----------|------------------------|-----------------------------------|
//! | Engine   | `Box<dyn Object>`      | dropped by the collector          |
//! | Host     | `NonNull<dyn Object>`  | never freed by the bridge         |
//! | Shared   | erased `Rc<RefCell<T>>`| strong count decremented          |
//!
//! All three share one dispatch surface. Release, explicit or by the
//! collector, swaps the state to `Released` before the old value is dropped,
//! so anything that runs during destruction sees a dead handle instead of a
//! half-destroyed object.
//!
//! # Example
//!
//! ```ignore
//! let ud = push_owned::<Account, Account>(&lua, Account::new(10.0))?;
//! lua.globals().set("acc", &ud)?;
//! assert!(release(&ud)?);
//! assert!(lua.load("return acc.balance").exec().is_err());
//! ```

use std::cell::{RefCell, RefMut};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;
use std::rc::Rc;

use mlua::{
    AnyUserData, IntoLua, Lua, MetaMethod, Table, UserData, UserDataMethods, UserDataRef, Value,
};
use tracing::{debug, trace};

use luabind_core::{
    BasePath, BindError, BindResult, Cast, Object, PathError, SharedObject, TypeKey, Upcast,
};
use luabind_registry::{TypeRecord, TypeRegistry};

use crate::dispatch;

// ============================================================================
// Ownership
// ============================================================================

/// Lifetime regime of a handle. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Owned by the Lua collector.
    Engine,
    /// Owned by the host; the bridge only borrows.
    Host,
    /// Reference counted, shared with the host.
    Shared,
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifetime::Engine => write!(f, "engine"),
            Lifetime::Host => write!(f, "host"),
            Lifetime::Shared => write!(f, "shared"),
        }
    }
}

/// Live state of a handle.
pub enum Ownership {
    Engine(Box<dyn Object>),
    Host(NonNull<dyn Object>),
    Shared(SharedObject),
    Released,
}

impl Ownership {
    fn lifetime(&self) -> Option<Lifetime> {
        match self {
            Ownership::Engine(_) => Some(Lifetime::Engine),
            Ownership::Host(_) => Some(Lifetime::Host),
            Ownership::Shared(_) => Some(Lifetime::Shared),
            Ownership::Released => None,
        }
    }
}

// ============================================================================
// ObjectHandle
// ============================================================================

/// Bridge-managed wrapper binding one host object to one Lua value.
pub struct ObjectHandle {
    state: RefCell<Ownership>,
    lifetime: Lifetime,
    record: Option<Rc<TypeRecord>>,
    /// Projection to the static type when only the static type is registered.
    view: Option<Cast>,
    concrete: TypeKey,
    type_name: String,
}

impl ObjectHandle {
    /// Build a handle for `ownership`, resolving its record.
    ///
    /// `to_static` projects the concrete type to the type the host handed the
    /// object over as. The concrete type's record wins; when it is not
    /// registered the static type's record is used through the projection.
    /// Without a static type only the concrete record is looked up.
    fn build(lua: &Lua, ownership: Ownership, concrete: TypeKey, to_static: Option<Cast>) -> Self {
        let registry = TypeRegistry::get(lua);
        let (record, view) = match to_static {
            Some(to_static) => match registry.find_by_dynamic_and_static(concrete, to_static.to()) {
                Some((record, true)) => (Some(record), Some(to_static)),
                Some((record, false)) => (Some(record), None),
                None => (None, None),
            },
            None => (registry.find(concrete), None),
        };
        let type_name = match &record {
            Some(record) => record.name().to_string(),
            None => concrete.short_name().to_string(),
        };
        let lifetime = ownership.lifetime().unwrap_or(Lifetime::Engine);
        Self {
            state: RefCell::new(ownership),
            lifetime,
            record,
            view,
            concrete,
            type_name,
        }
    }

    fn push(
        lua: &Lua,
        ownership: Ownership,
        concrete: TypeKey,
        to_static: Option<Cast>,
    ) -> mlua::Result<AnyUserData> {
        let handle = Self::build(lua, ownership, concrete, to_static);
        trace!(
            type_name = %handle.type_name,
            lifetime = %handle.lifetime,
            view = handle.view.is_some(),
            "handle created"
        );
        lua.create_userdata(handle)
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// Registered name of the dispatch type, or the Rust short name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Record used for dispatch, if the type is bound.
    pub fn record(&self) -> Option<&Rc<TypeRecord>> {
        self.record.as_ref()
    }

    /// Concrete Rust type of the wrapped object.
    pub fn concrete_type(&self) -> TypeKey {
        self.concrete
    }

    pub fn is_released(&self) -> bool {
        self.state
            .try_borrow()
            .map(|state| matches!(*state, Ownership::Released))
            .unwrap_or(false)
    }

    /// Thin address of the live object, `None` once released.
    pub fn address(&self) -> Option<*const ()> {
        let state = self.state.try_borrow().ok()?;
        match &*state {
            Ownership::Engine(object) => Some(&**object as *const dyn Object as *const ()),
            Ownership::Host(ptr) => Some(ptr.as_ptr() as *const ()),
            Ownership::Shared(shared) => shared.cell().map(|cell| cell.as_ptr() as *const ()),
            Ownership::Released => None,
        }
    }

    /// The shared state, if this handle is shared-owned.
    pub fn shared(&self) -> BindResult<Option<SharedObject>> {
        let state = self.state.try_borrow().map_err(|_| self.busy())?;
        match &*state {
            Ownership::Shared(shared) => Ok(Some(shared.clone())),
            Ownership::Released => Err(self.released()),
            _ => Ok(None),
        }
    }

    /// Projection to the static type, when dispatch goes through it.
    pub fn view(&self) -> Option<Cast> {
        self.view
    }

    /// Path from the wrapped object to `target`, through the view if any.
    pub fn base_path(&self, target: TypeKey) -> Option<BasePath> {
        let path = self.record.as_deref()?.path_to(target)?;
        Some(match self.view {
            Some(view) => path.prepend(view),
            None => path.clone(),
        })
    }

    /// Whether the object can be borrowed as `target`.
    pub fn can_view(&self, target: TypeKey) -> bool {
        let through_record = self
            .record
            .as_ref()
            .is_some_and(|record| record.derives_from(target));
        through_record || (self.view.is_none() && self.concrete == target)
    }

    /// Finalise the object now.
    ///
    /// Returns `false` if the handle was already released. Host-owned objects
    /// are forgotten, never freed.
    pub fn release(&self) -> BindResult<bool> {
        let previous = {
            let mut state: RefMut<'_, Ownership> =
                self.state.try_borrow_mut().map_err(|_| self.busy())?;
            mem::replace(&mut *state, Ownership::Released)
        };
        let released = !matches!(previous, Ownership::Released);
        drop(previous);
        if released {
            debug!(type_name = %self.type_name, lifetime = %self.lifetime, "object released");
        }
        Ok(released)
    }

    // ========================================================================
    // Object access
    // ========================================================================

    fn with_object<R>(&self, f: impl FnOnce(&dyn Object) -> R) -> BindResult<R> {
        let state = self.state.try_borrow().map_err(|_| self.busy())?;
        match &*state {
            Ownership::Engine(object) => Ok(f(&**object)),
            // SAFETY: a host-owned handle is only created through `HostRef`,
            // whose contract keeps the pointee alive and unaliased while Lua
            // can reach the handle.
            Ownership::Host(ptr) => Ok(f(unsafe { ptr.as_ref() })),
            Ownership::Shared(shared) => {
                let cell = shared.cell().ok_or_else(|| self.mismatch(shared.type_key()))?;
                let object = cell.try_borrow().map_err(|_| self.busy())?;
                Ok(f(&*object))
            }
            Ownership::Released => Err(self.released()),
        }
    }

    fn with_object_mut<R>(&self, f: impl FnOnce(&mut dyn Object) -> R) -> BindResult<R> {
        let mut state = self.state.try_borrow_mut().map_err(|_| self.busy())?;
        match &mut *state {
            Ownership::Engine(object) => Ok(f(&mut **object)),
            // SAFETY: see `with_object`.
            Ownership::Host(ptr) => Ok(f(unsafe { ptr.as_mut() })),
            Ownership::Shared(shared) => {
                let cell = shared.cell().ok_or_else(|| self.mismatch(shared.type_key()))?;
                let mut object = cell.try_borrow_mut().map_err(|_| self.busy())?;
                Ok(f(&mut *object))
            }
            Ownership::Released => Err(self.released()),
        }
    }

    /// Borrow the object as `U`, one of its registered ancestors or itself.
    ///
    /// Virtual ancestors are borrowed from their shared cell for the duration
    /// of `f`.
    pub fn with_ref<U: Object, R>(&self, f: impl FnOnce(&U) -> R) -> BindResult<R> {
        let target = TypeKey::of::<U>();
        let path = self.record.as_deref().and_then(|record| record.path_to(target));
        let view = self.view;
        let found = self.with_object(|object| {
            let typed = |object: &dyn Object| object.as_any().downcast_ref::<U>().map(f);
            let resolved = |object: &dyn Object| match path {
                Some(path) => path.visit(object, typed),
                None => Ok(typed(object)),
            };
            match view {
                Some(view) => view.visit(object, resolved).and_then(|found| found),
                None => resolved(object),
            }
        })?;
        self.finish_access(found, target)
    }

    /// Mutably borrow the object as `U`.
    pub fn with_mut<U: Object, R>(&self, f: impl FnOnce(&mut U) -> R) -> BindResult<R> {
        let target = TypeKey::of::<U>();
        let path = self.record.as_deref().and_then(|record| record.path_to(target));
        let view = self.view;
        let found = self.with_object_mut(|object| {
            let typed = |object: &mut dyn Object| object.as_any_mut().downcast_mut::<U>().map(f);
            let resolved = |object: &mut dyn Object| match path {
                Some(path) => path.visit_mut(object, typed),
                None => Ok(typed(object)),
            };
            match view {
                Some(view) => view.visit_mut(object, resolved).and_then(|found| found),
                None => resolved(object),
            }
        })?;
        self.finish_access(found, target)
    }

    fn finish_access<R>(
        &self,
        found: Result<Option<R>, PathError>,
        target: TypeKey,
    ) -> BindResult<R> {
        match found {
            Ok(Some(value)) => Ok(value),
            Ok(None) | Err(PathError::Mismatch) => Err(self.mismatch(target)),
            Err(PathError::Busy) => Err(self.busy()),
        }
    }

    fn busy(&self) -> BindError {
        BindError::ObjectBusy {
            type_name: self.type_name.clone(),
        }
    }

    fn released(&self) -> BindError {
        BindError::released(&self.type_name)
    }

    fn mismatch(&self, target: TypeKey) -> BindError {
        BindError::handle_mismatch(target.short_name(), &self.type_name)
    }
}

impl Drop for ObjectHandle {
    fn drop(&mut self) {
        let previous = mem::replace(self.state.get_mut(), Ownership::Released);
        if !matches!(previous, Ownership::Released) {
            trace!(type_name = %self.type_name, lifetime = %self.lifetime, "handle finalised");
        }
        drop(previous);
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_released() {
            write!(f, "{} (released)", self.type_name)
        } else {
            write!(f, "{} ({})", self.type_name, self.lifetime)
        }
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("type_name", &self.type_name)
            .field("lifetime", &self.lifetime)
            .field("released", &self.is_released())
            .field("view", &self.view)
            .finish()
    }
}

impl UserData for ObjectHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_function(
            MetaMethod::Index,
            |lua, (ud, key): (AnyUserData, Value)| dispatch::index_entry(lua, &ud, key),
        );
        methods.add_meta_function(
            MetaMethod::NewIndex,
            |lua, (ud, key, value): (AnyUserData, Value, Value)| {
                dispatch::new_index_entry(lua, &ud, key, value)
            },
        );
        methods.add_meta_method(MetaMethod::ToString, |_, handle, ()| Ok(handle.to_string()));
    }
}

// ============================================================================
// Host API
// ============================================================================

/// Borrow the handle inside a userdata.
pub fn handle_ref(ud: &AnyUserData) -> BindResult<UserDataRef<ObjectHandle>> {
    ud.borrow::<ObjectHandle>().map_err(BindError::from)
}

/// Explicitly release the object behind `ud`.
pub fn release(ud: &AnyUserData) -> BindResult<bool> {
    handle_ref(ud)?.release()
}

/// Whether the object behind `ud` was released.
pub fn is_released(ud: &AnyUserData) -> BindResult<bool> {
    Ok(handle_ref(ud)?.is_released())
}

/// The ad-hoc field table of `ud`, if one was created.
pub fn adhoc_table(ud: &AnyUserData) -> mlua::Result<Option<Table>> {
    match ud.user_value::<Value>()? {
        Value::Table(table) => Ok(Some(table)),
        _ => Ok(None),
    }
}

/// The ad-hoc field table of `ud`, created on first use.
pub fn ensure_adhoc_table(lua: &Lua, ud: &AnyUserData) -> mlua::Result<Table> {
    if let Some(table) = adhoc_table(ud)? {
        return Ok(table);
    }
    let table = lua.create_table()?;
    ud.set_user_value(table.clone())?;
    Ok(table)
}

/// Replace or clear the ad-hoc field table of `ud`.
pub fn set_adhoc_table(ud: &AnyUserData, table: Option<Table>) -> mlua::Result<()> {
    match table {
        Some(table) => ud.set_user_value(table),
        None => ud.set_user_value(Value::Nil),
    }
}

/// Move `value` into Lua as an engine-owned object of static type `S`.
pub fn push_owned<S: Object, X: Upcast<S>>(lua: &Lua, value: X) -> mlua::Result<AnyUserData> {
    ObjectHandle::push(
        lua,
        Ownership::Engine(Box::new(value)),
        TypeKey::of::<X>(),
        Some(Cast::upcast::<X, S>()),
    )
}

/// Share `value` with Lua as an object of static type `S`.
pub fn push_shared<S: Object, X: Upcast<S>>(
    lua: &Lua,
    value: Rc<RefCell<X>>,
) -> mlua::Result<AnyUserData> {
    ObjectHandle::push(
        lua,
        Ownership::Shared(SharedObject::new(value)),
        TypeKey::of::<X>(),
        Some(Cast::upcast::<X, S>()),
    )
}

/// Push an erased shared object, reusing the view of the handle it came from.
pub(crate) fn push_shared_object(
    lua: &Lua,
    shared: SharedObject,
    view: Option<Cast>,
) -> mlua::Result<AnyUserData> {
    let concrete = shared.type_key();
    ObjectHandle::push(lua, Ownership::Shared(shared), concrete, view)
}

/// Lend a host-owned object to Lua as static type `S`.
///
/// # Safety
///
/// Same contract as [`HostRef::upcast`].
pub unsafe fn push_host<S: Object, X: Upcast<S>>(
    lua: &Lua,
    ptr: NonNull<X>,
) -> mlua::Result<AnyUserData> {
    // SAFETY: forwarded to the caller.
    unsafe { HostRef::<S>::upcast(ptr) }.into_userdata(lua)
}

/// A host-owned object on its way into Lua.
///
/// If the object reports outstanding shared ownership through
/// [`Object::shared_self`], the handle is created shared-owned instead.
pub struct HostRef<T: Object> {
    ptr: NonNull<dyn Object>,
    concrete: TypeKey,
    to_static: Cast,
    _marker: PhantomData<*const T>,
}

impl<T: Object> HostRef<T> {
    /// Lend `ptr` to Lua.
    ///
    /// # Safety
    ///
    /// The pointee must stay alive and must not be moved until every Lua
    /// value referring to it is gone or the handle was released. The host
    /// must not hold a reference to it while Lua code runs.
    pub unsafe fn new(ptr: NonNull<T>) -> Self {
        // SAFETY: forwarded to the caller.
        unsafe { Self::upcast(ptr) }
    }

    /// Lend a derived object to Lua under the static type `T`.
    ///
    /// # Safety
    ///
    /// Same contract as [`HostRef::new`].
    pub unsafe fn upcast<X: Upcast<T>>(ptr: NonNull<X>) -> Self {
        let ptr: NonNull<dyn Object> = ptr;
        Self {
            ptr,
            concrete: TypeKey::of::<X>(),
            to_static: Cast::upcast::<X, T>(),
            _marker: PhantomData,
        }
    }

    fn into_userdata(self, lua: &Lua) -> mlua::Result<AnyUserData> {
        // SAFETY: the constructor contract keeps the pointee alive.
        let shared = unsafe { self.ptr.as_ref() }.shared_self();
        let ownership = match shared {
            Some(shared) => {
                debug!(
                    rust_name = self.concrete.rust_name(),
                    "host pointer promoted to shared"
                );
                Ownership::Shared(shared)
            }
            None => Ownership::Host(self.ptr),
        };
        ObjectHandle::push(lua, ownership, self.concrete, Some(self.to_static))
    }
}

impl<T: Object> IntoLua for HostRef<T> {
    fn into_lua(self, lua: &Lua) -> mlua::Result<Value> {
        self.into_userdata(lua).map(Value::UserData)
    }
}
