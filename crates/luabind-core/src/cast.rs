//! Base-pointer resolution.
//!
//! A [`Cast`] is one upcast step from a concrete derived type to one of its
//! direct bases, erased to plain function pointers. A [`BasePath`] chains
//! casts from a most-derived type to any reachable ancestor.
//!
//! A step is either an embedded projection ([`Upcast`]) or a virtual one
//! ([`VirtualUpcast`]) that reaches the shared cell of an ancestor. Because a
//! virtual step has to borrow that cell, paths are walked by handing the
//! resolved object to a callback instead of returning a reference.
//!
//! Paths are computed once at registration time and cached in the type
//! record, so dispatch never has to search the hierarchy for a projection.

use std::cell::RefCell;
use std::rc::Rc;

use crate::{Object, TypeKey, Upcast, VirtualUpcast};

/// Erased shared projection.
pub type RefCast = fn(&dyn Object) -> Option<&dyn Object>;

/// Erased mutable projection.
pub type MutCast = fn(&mut dyn Object) -> Option<&mut dyn Object>;

/// Erased projection to a shared ancestor cell.
pub type CellCast = fn(&dyn Object) -> Option<Rc<RefCell<dyn Object>>>;

/// Why a path could not be walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    /// An intermediate object was not of the step's source type.
    Mismatch,
    /// A virtual ancestor is already borrowed incompatibly.
    Busy,
}

fn upcast_ref<D: Upcast<B>, B: Object>(object: &dyn Object) -> Option<&dyn Object> {
    object
        .as_any()
        .downcast_ref::<D>()
        .map(|derived| Upcast::<B>::upcast(derived) as &dyn Object)
}

fn upcast_mut<D: Upcast<B>, B: Object>(object: &mut dyn Object) -> Option<&mut dyn Object> {
    object
        .as_any_mut()
        .downcast_mut::<D>()
        .map(|derived| Upcast::<B>::upcast_mut(derived) as &mut dyn Object)
}

fn upcast_cell<D: VirtualUpcast<B>, B: Object>(
    object: &dyn Object,
) -> Option<Rc<RefCell<dyn Object>>> {
    object
        .as_any()
        .downcast_ref::<D>()
        .map(|derived| VirtualUpcast::<B>::virtual_base(derived).erased())
}

#[derive(Clone, Copy)]
enum Projection {
    Embedded { get: RefCast, get_mut: MutCast },
    Virtual { cell: CellCast },
}

/// One upcast step `from -> to`.
#[derive(Clone, Copy)]
pub struct Cast {
    from: TypeKey,
    to: TypeKey,
    projection: Projection,
}

impl Cast {
    /// Cast from `D` to its embedded base `B`.
    pub fn upcast<D: Upcast<B>, B: Object>() -> Self {
        Self {
            from: TypeKey::of::<D>(),
            to: TypeKey::of::<B>(),
            projection: Projection::Embedded {
                get: upcast_ref::<D, B>,
                get_mut: upcast_mut::<D, B>,
            },
        }
    }

    /// Cast from `D` to the shared ancestor `B`.
    pub fn virtual_upcast<D: VirtualUpcast<B>, B: Object>() -> Self {
        Self {
            from: TypeKey::of::<D>(),
            to: TypeKey::of::<B>(),
            projection: Projection::Virtual {
                cell: upcast_cell::<D, B>,
            },
        }
    }

    /// Source type.
    pub fn from(&self) -> TypeKey {
        self.from
    }

    /// Target type.
    pub fn to(&self) -> TypeKey {
        self.to
    }

    /// Whether the target lives in shared ancestor storage.
    pub fn is_virtual(&self) -> bool {
        matches!(self.projection, Projection::Virtual { .. })
    }

    /// Project `object`, which must be exactly the source type, and pass the
    /// target to `f`.
    pub fn visit<R>(
        &self,
        object: &dyn Object,
        f: impl FnOnce(&dyn Object) -> R,
    ) -> Result<R, PathError> {
        match self.projection {
            Projection::Embedded { get, .. } => {
                let target = get(object).ok_or(PathError::Mismatch)?;
                Ok(f(target))
            }
            Projection::Virtual { cell } => {
                let cell = cell(object).ok_or(PathError::Mismatch)?;
                let target = cell.try_borrow().map_err(|_| PathError::Busy)?;
                Ok(f(&*target))
            }
        }
    }

    /// Mutable variant of [`Cast::visit`].
    pub fn visit_mut<R>(
        &self,
        object: &mut dyn Object,
        f: impl FnOnce(&mut dyn Object) -> R,
    ) -> Result<R, PathError> {
        match self.projection {
            Projection::Embedded { get_mut, .. } => {
                let target = get_mut(object).ok_or(PathError::Mismatch)?;
                Ok(f(target))
            }
            Projection::Virtual { cell } => {
                let cell = cell(&*object).ok_or(PathError::Mismatch)?;
                let mut target = cell.try_borrow_mut().map_err(|_| PathError::Busy)?;
                Ok(f(&mut *target))
            }
        }
    }
}

impl std::fmt::Debug for Cast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_virtual() { "virtual " } else { "" };
        write!(f, "Cast({kind}{} -> {})", self.from, self.to)
    }
}

/// Chain of casts from a concrete type to one ancestor.
///
/// The identity path has no steps.
#[derive(Debug, Clone)]
pub struct BasePath {
    target: TypeKey,
    steps: Rc<[Cast]>,
}

impl BasePath {
    /// Path from a type to itself.
    pub fn identity(key: TypeKey) -> Self {
        Self {
            target: key,
            steps: Rc::from(Vec::new()),
        }
    }

    /// This path, reached through `head` first.
    pub fn prepend(&self, head: Cast) -> Self {
        let mut steps = Vec::with_capacity(self.steps.len() + 1);
        steps.push(head);
        steps.extend(self.steps.iter().copied());
        Self {
            target: self.target,
            steps: Rc::from(steps),
        }
    }

    /// The ancestor this path ends at.
    pub fn target(&self) -> TypeKey {
        self.target
    }

    /// Number of upcast steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True for the identity path.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The individual steps, outermost first.
    pub fn steps(&self) -> &[Cast] {
        &self.steps
    }

    /// The last shared ancestor this path passes through.
    ///
    /// Two paths to the same ancestor reach one storage location exactly
    /// when they share an anchor.
    pub fn virtual_anchor(&self) -> Option<TypeKey> {
        self.steps
            .iter()
            .rev()
            .find(|step| step.is_virtual())
            .map(Cast::to)
    }

    /// Walk the path from a concrete object and pass the ancestor to `f`.
    pub fn visit<R>(
        &self,
        object: &dyn Object,
        f: impl FnOnce(&dyn Object) -> R,
    ) -> Result<R, PathError> {
        visit_steps(&self.steps, object, f)
    }

    /// Mutable variant of [`BasePath::visit`].
    pub fn visit_mut<R>(
        &self,
        object: &mut dyn Object,
        f: impl FnOnce(&mut dyn Object) -> R,
    ) -> Result<R, PathError> {
        visit_steps_mut(&self.steps, object, f)
    }
}

fn visit_steps<R, F>(steps: &[Cast], object: &dyn Object, f: F) -> Result<R, PathError>
where
    F: FnOnce(&dyn Object) -> R,
{
    match steps.split_first() {
        None => Ok(f(object)),
        Some((head, rest)) => head.visit(object, |next| visit_steps(rest, next, f))?,
    }
}

fn visit_steps_mut<R, F>(steps: &[Cast], object: &mut dyn Object, f: F) -> Result<R, PathError>
where
    F: FnOnce(&mut dyn Object) -> R,
{
    match steps.split_first() {
        None => Ok(f(object)),
        Some((head, rest)) => head.visit_mut(object, |next| visit_steps_mut(rest, next, f))?,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VirtualBase;

    struct A {
        value: i32,
    }
    impl Object for A {}

    struct B1 {
        a: A,
    }
    impl Object for B1 {}
    impl Upcast<A> for B1 {
        fn upcast(&self) -> &A {
            &self.a
        }
        fn upcast_mut(&mut self) -> &mut A {
            &mut self.a
        }
    }

    struct D {
        b1: B1,
    }
    impl Object for D {}
    impl Upcast<B1> for D {
        fn upcast(&self) -> &B1 {
            &self.b1
        }
        fn upcast_mut(&mut self) -> &mut B1 {
            &mut self.b1
        }
    }

    #[test]
    fn single_cast_projects() {
        let cast = Cast::upcast::<B1, A>();
        let b1 = B1 { a: A { value: 4 } };
        let value = cast
            .visit(&b1, |a| a.as_any().downcast_ref::<A>().unwrap().value)
            .unwrap();
        assert_eq!(value, 4);
        assert!(!cast.is_virtual());
        assert_eq!(cast.from(), TypeKey::of::<B1>());
        assert_eq!(cast.to(), TypeKey::of::<A>());
    }

    #[test]
    fn cast_rejects_wrong_source() {
        let cast = Cast::upcast::<B1, A>();
        let a = A { value: 1 };
        assert_eq!(cast.visit(&a, |_| ()), Err(PathError::Mismatch));
    }

    #[test]
    fn path_chains_steps() {
        let path = BasePath::identity(TypeKey::of::<A>())
            .prepend(Cast::upcast::<B1, A>())
            .prepend(Cast::upcast::<D, B1>());
        assert_eq!(path.len(), 2);
        assert_eq!(path.target(), TypeKey::of::<A>());
        assert_eq!(path.virtual_anchor(), None);

        let mut d = D {
            b1: B1 { a: A { value: 1 } },
        };
        path.visit_mut(&mut d, |a| {
            a.as_any_mut().downcast_mut::<A>().unwrap().value = 11;
        })
        .unwrap();
        assert_eq!(d.b1.a.value, 11);

        let value = path
            .visit(&d, |a| a.as_any().downcast_ref::<A>().unwrap().value)
            .unwrap();
        assert_eq!(value, 11);
    }

    #[test]
    fn identity_path_is_empty() {
        let path = BasePath::identity(TypeKey::of::<A>());
        assert!(path.is_empty());
        let a = A { value: 2 };
        assert!(path.visit(&a, |_| ()).is_ok());
    }

    struct Shared {
        a: VirtualBase<A>,
    }
    impl Object for Shared {}
    impl VirtualUpcast<A> for Shared {
        fn virtual_base(&self) -> &VirtualBase<A> {
            &self.a
        }
    }

    #[test]
    fn virtual_step_reaches_shared_storage() {
        let a = VirtualBase::new(A { value: 1 });
        let mut first = Shared { a: a.share() };
        let second = Shared { a };
        let cast = Cast::virtual_upcast::<Shared, A>();
        assert!(cast.is_virtual());
        let path = BasePath::identity(TypeKey::of::<A>()).prepend(cast);
        assert_eq!(path.virtual_anchor(), Some(TypeKey::of::<A>()));

        cast.visit_mut(&mut first, |a| {
            a.as_any_mut().downcast_mut::<A>().unwrap().value = 5;
        })
        .unwrap();
        let value = cast
            .visit(&second, |a| a.as_any().downcast_ref::<A>().unwrap().value)
            .unwrap();
        assert_eq!(value, 5);
    }

    #[test]
    fn virtual_step_reports_busy_ancestor() {
        let shared = Shared {
            a: VirtualBase::new(A { value: 1 }),
        };
        let held = shared.a.borrow_mut();
        let cast = Cast::virtual_upcast::<Shared, A>();
        assert_eq!(cast.visit(&shared, |_| ()), Err(PathError::Busy));
        drop(held);
        assert!(cast.visit(&shared, |_| ()).is_ok());
    }
}
