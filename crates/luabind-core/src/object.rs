//! Capability traits for bindable host types.
//!
//! A host type becomes bindable by implementing [`Object`]. The blanket
//! [`AsAny`] supertrait gives the bridge access to the most-derived concrete
//! type of any `&dyn Object`, which is how the registry finds the most
//! specific record for an object that was handed over under a base type.
//!
//! Inheritance is expressed with [`Upcast`]: a derived type embeds its bases
//! and projects to them by reference. An ancestor reached through several
//! bases (a diamond) is held in a [`VirtualBase`] instead, and the bases that
//! share it implement [`VirtualUpcast`], so every path reaches one storage
//! location.
//!
//! # Example
//!
//! ```ignore
//! struct Account { balance: f64 }
//! impl Object for Account {}
//!
//! struct SpecialAccount { account: Account, limit: i32 }
//! impl Object for SpecialAccount {}
//!
//! impl Upcast<Account> for SpecialAccount {
//!     fn upcast(&self) -> &Account { &self.account }
//!     fn upcast_mut(&mut self) -> &mut Account { &mut self.account }
//! }
//! ```

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use crate::TypeKey;

/// Access to the concrete type behind a trait object.
///
/// Implemented for every `'static` type. Always call these through a
/// `&dyn Object`; calling them on a `Box<dyn Object>` reports the box.
pub trait AsAny: Any {
    /// Borrow as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;

    /// Borrow as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Key of the concrete type.
    fn type_key(&self) -> TypeKey;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_key(&self) -> TypeKey {
        TypeKey::of::<T>()
    }
}

/// A host type that can live behind an object handle.
pub trait Object: AsAny {
    /// Outstanding shared ownership of this object, if any.
    ///
    /// When a host-owned pointer to an object is pushed into Lua and this
    /// returns `Some`, the handle is created as shared-owned instead.
    /// Types that keep a `Weak<RefCell<Self>>` to themselves override this.
    fn shared_self(&self) -> Option<SharedObject> {
        None
    }
}

/// Projection from a derived type to one of its direct bases.
///
/// Every type is its own identity base.
pub trait Upcast<B: Object>: Object {
    /// Borrow the embedded base.
    fn upcast(&self) -> &B;

    /// Mutably borrow the embedded base.
    fn upcast_mut(&mut self) -> &mut B;
}

impl<T: Object> Upcast<T> for T {
    fn upcast(&self) -> &T {
        self
    }

    fn upcast_mut(&mut self) -> &mut T {
        self
    }
}

/// Projection from a type to an ancestor it shares with sibling bases.
///
/// Unlike [`Upcast`] the ancestor is not embedded by value but held in a
/// [`VirtualBase`]; the most-derived type hands the same allocation to every
/// base that declares it.
pub trait VirtualUpcast<B: Object>: Object {
    /// The shared ancestor storage.
    fn virtual_base(&self) -> &VirtualBase<B>;
}

// ============================================================================
// Virtual bases
// ============================================================================

/// Single storage for an ancestor shared by several bases of one object.
///
/// ```ignore
/// let base = VirtualBase::new(Base::default());
/// let derived = Derived {
///     child1: Child1 { base: base.share(), c1: 0 },
///     child2: Child2 { base, c2: 0 },
/// };
/// ```
pub struct VirtualBase<B> {
    cell: Rc<RefCell<B>>,
}

impl<B: Object> VirtualBase<B> {
    pub fn new(value: B) -> Self {
        Self {
            cell: Rc::new(RefCell::new(value)),
        }
    }

    /// Another handle to the same ancestor.
    pub fn share(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }

    /// Whether both point at the same ancestor.
    pub fn ptr_eq(&self, other: &VirtualBase<B>) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    /// Panics if the ancestor is mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, B> {
        self.cell.borrow()
    }

    /// Panics if the ancestor is borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, B> {
        self.cell.borrow_mut()
    }

    /// The storage as an erased cell.
    pub fn erased(&self) -> Rc<RefCell<dyn Object>> {
        self.cell.clone()
    }
}

impl<B: Object + Default> Default for VirtualBase<B> {
    fn default() -> Self {
        Self::new(B::default())
    }
}

impl<B: Object> std::fmt::Debug for VirtualBase<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualBase")
            .field("type", &TypeKey::of::<B>().short_name())
            .field("strong_count", &Rc::strong_count(&self.cell))
            .finish()
    }
}

/// Concrete type key of a trait object.
pub fn concrete_key(object: &dyn Object) -> TypeKey {
    object.type_key()
}

// ============================================================================
// Shared ownership
// ============================================================================

/// Type-erased `Rc<RefCell<T>>` for some bindable `T`.
///
/// Cloning increments the strong count; dropping decrements it. Reading the
/// value back as a typed `Rc` is a checked downcast to the exact type.
#[derive(Clone)]
pub struct SharedObject {
    state: Rc<dyn Any>,
    project: fn(&dyn Any) -> Option<&RefCell<dyn Object>>,
    key: TypeKey,
}

fn project_cell<T: Object>(state: &dyn Any) -> Option<&RefCell<dyn Object>> {
    state
        .downcast_ref::<RefCell<T>>()
        .map(|cell| cell as &RefCell<dyn Object>)
}

impl SharedObject {
    /// Erase a shared host object.
    pub fn new<T: Object>(shared: Rc<RefCell<T>>) -> Self {
        let state: Rc<dyn Any> = shared;
        Self {
            state,
            project: project_cell::<T>,
            key: TypeKey::of::<T>(),
        }
    }

    /// Key of the wrapped concrete type.
    pub fn type_key(&self) -> TypeKey {
        self.key
    }

    /// The wrapped cell as a trait object.
    pub fn cell(&self) -> Option<&RefCell<dyn Object>> {
        (self.project)(&*self.state)
    }

    /// Recover the typed `Rc` if the concrete type is exactly `T`.
    pub fn downcast<T: Object>(&self) -> Option<Rc<RefCell<T>>> {
        Rc::clone(&self.state).downcast::<RefCell<T>>().ok()
    }

    /// Current strong reference count.
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.state)
    }

    /// Whether both wrap the same allocation.
    pub fn ptr_eq(&self, other: &SharedObject) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl std::fmt::Debug for SharedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedObject")
            .field("type", &self.key.short_name())
            .field("strong_count", &self.strong_count())
            .finish()
    }
}
