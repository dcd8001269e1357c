//! Conversion of Lua values into host arguments, and host objects into Lua.
//!
//! [`FromScript`] is implemented for scalars, strings, Lua reference types,
//! [`Pair`] and the object wrappers. Every conversion knows the position of
//! the argument it converts, so mismatches read
//! `Argument at 2 has invalid type. Expecting 'string', but got 'userdata'.`
//!
//! Return values use mlua's `IntoLua` / `IntoLuaMulti`. Host objects leave
//! through one of the wrappers:
//!
//! - [`Owned<T>`]: moved into Lua, engine-owned
//! - [`SharedRef<T>`]: shared with Lua through `Rc<RefCell<T>>`
//! - [`HostRef<T>`](crate::HostRef): lent to Lua, host-owned
//!
//! Arguments that refer to bound objects come in as [`ObjectRef<T>`]
//! (borrowing access), [`Owned<T>`] (a clone), [`SharedRef<T>`] (the same
//! `Rc` the handle holds, exact type only) or [`SharedBase<T>`] (shared
//! ownership of any object derived from `T`).

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use mlua::{AnyUserData, Function, IntoLua, Lua, Table, Value};

use luabind_core::{
    BasePath, BindError, BindResult, Cast, Object, PathError, SharedObject, TypeKey,
};
use luabind_registry::TypeRegistry;

use crate::handle::{ObjectHandle, handle_ref, push_owned, push_shared, push_shared_object};

/// Conversion of one Lua argument into a host value.
pub trait FromScript: Sized {
    fn from_script(lua: &Lua, value: Value, position: usize) -> BindResult<Self>;
}

/// A fixed-size argument list.
pub trait FromArgs: Sized {
    /// Number of arguments expected.
    const ARITY: usize;

    /// Convert `args`, numbering them from `first_position`.
    fn from_args(lua: &Lua, args: Vec<Value>, first_position: usize) -> BindResult<Self>;
}

/// How a value is named in mismatch messages.
///
/// Bound objects are named by their registered type, everything else by the
/// Lua type name.
pub fn describe(value: &Value) -> String {
    if let Value::UserData(ud) = value {
        if let Ok(handle) = ud.borrow::<ObjectHandle>() {
            return handle.type_name().to_string();
        }
    }
    value.type_name().to_string()
}

fn expected_name<T: 'static>(lua: &Lua) -> String {
    TypeRegistry::get(lua).display_name(TypeKey::of::<T>())
}

// ============================================================================
// Scalars and Lua values
// ============================================================================

impl FromScript for bool {
    fn from_script(_lua: &Lua, value: Value, position: usize) -> BindResult<Self> {
        match value {
            Value::Boolean(flag) => Ok(flag),
            other => Err(BindError::type_mismatch(position, "boolean", describe(&other))),
        }
    }
}

fn integer_value(value: &Value, position: usize) -> BindResult<i64> {
    match value {
        Value::Integer(integer) => Ok(*integer),
        Value::Number(number) if number.is_finite() && number.fract() == 0.0 => {
            Ok(*number as i64)
        }
        other => Err(BindError::type_mismatch(position, "integer", describe(other))),
    }
}

macro_rules! impl_from_script_integer {
    ($($ty:ty),*) => {
        $(
            impl FromScript for $ty {
                fn from_script(_lua: &Lua, value: Value, position: usize) -> BindResult<Self> {
                    let integer = integer_value(&value, position)?;
                    <$ty>::try_from(integer).map_err(|_| {
                        BindError::type_mismatch(position, stringify!($ty), integer.to_string())
                    })
                }
            }
        )*
    };
}

impl_from_script_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl FromScript for f64 {
    fn from_script(_lua: &Lua, value: Value, position: usize) -> BindResult<Self> {
        match value {
            Value::Number(number) => Ok(number),
            Value::Integer(integer) => Ok(integer as f64),
            other => Err(BindError::type_mismatch(position, "number", describe(&other))),
        }
    }
}

impl FromScript for f32 {
    fn from_script(lua: &Lua, value: Value, position: usize) -> BindResult<Self> {
        f64::from_script(lua, value, position).map(|number| number as f32)
    }
}

impl FromScript for String {
    fn from_script(_lua: &Lua, value: Value, position: usize) -> BindResult<Self> {
        match value {
            Value::String(string) => Ok(string.to_string_lossy().into()),
            other => Err(BindError::type_mismatch(position, "string", describe(&other))),
        }
    }
}

impl FromScript for Value {
    fn from_script(_lua: &Lua, value: Value, _position: usize) -> BindResult<Self> {
        Ok(value)
    }
}

impl FromScript for Table {
    fn from_script(_lua: &Lua, value: Value, position: usize) -> BindResult<Self> {
        match value {
            Value::Table(table) => Ok(table),
            other => Err(BindError::type_mismatch(position, "table", describe(&other))),
        }
    }
}

impl FromScript for Function {
    fn from_script(_lua: &Lua, value: Value, position: usize) -> BindResult<Self> {
        match value {
            Value::Function(function) => Ok(function),
            other => Err(BindError::type_mismatch(position, "function", describe(&other))),
        }
    }
}

impl FromScript for AnyUserData {
    fn from_script(_lua: &Lua, value: Value, position: usize) -> BindResult<Self> {
        match value {
            Value::UserData(ud) => Ok(ud),
            other => Err(BindError::type_mismatch(position, "userdata", describe(&other))),
        }
    }
}

impl<T: FromScript> FromScript for Option<T> {
    fn from_script(lua: &Lua, value: Value, position: usize) -> BindResult<Self> {
        match value {
            Value::Nil => Ok(None),
            other => T::from_script(lua, other, position).map(Some),
        }
    }
}

// ============================================================================
// Pair
// ============================================================================

/// Two values travelling as a two-element Lua sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Pair<A, B>(pub A, pub B);

impl<A: FromScript, B: FromScript> FromScript for Pair<A, B> {
    fn from_script(lua: &Lua, value: Value, position: usize) -> BindResult<Self> {
        let table = match value {
            Value::Table(table) if table.raw_len() == 2 => table,
            Value::Table(_) => {
                return Err(BindError::type_mismatch(position, "pair", "table"));
            }
            other => return Err(BindError::type_mismatch(position, "pair", describe(&other))),
        };
        let first = A::from_script(lua, table.raw_get::<Value>(1)?, position)?;
        let second = B::from_script(lua, table.raw_get::<Value>(2)?, position)?;
        Ok(Pair(first, second))
    }
}

impl<A: IntoLua, B: IntoLua> IntoLua for Pair<A, B> {
    fn into_lua(self, lua: &Lua) -> mlua::Result<Value> {
        let table = lua.create_table_with_capacity(2, 0)?;
        table.raw_set(1, self.0)?;
        table.raw_set(2, self.1)?;
        Ok(Value::Table(table))
    }
}

impl<A, B> From<(A, B)> for Pair<A, B> {
    fn from((first, second): (A, B)) -> Self {
        Pair(first, second)
    }
}

// ============================================================================
// Object wrappers
// ============================================================================

/// Borrowing access to a bound object passed in from Lua.
///
/// Works for every lifetime regime and for any registered ancestor `T` of
/// the object's type.
pub struct ObjectRef<T: Object> {
    userdata: AnyUserData,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Object> ObjectRef<T> {
    /// Borrow the object as `T`.
    pub fn borrow<R>(&self, f: impl FnOnce(&T) -> R) -> BindResult<R> {
        handle_ref(&self.userdata)?.with_ref(f)
    }

    /// Mutably borrow the object as `T`.
    pub fn borrow_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> BindResult<R> {
        handle_ref(&self.userdata)?.with_mut(f)
    }

    pub fn userdata(&self) -> &AnyUserData {
        &self.userdata
    }

    pub fn into_userdata(self) -> AnyUserData {
        self.userdata
    }
}

impl<T: Object> Clone for ObjectRef<T> {
    fn clone(&self) -> Self {
        Self {
            userdata: self.userdata.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Object> FromScript for ObjectRef<T> {
    fn from_script(lua: &Lua, value: Value, position: usize) -> BindResult<Self> {
        let userdata = match value {
            Value::UserData(ud) => ud,
            other => {
                return Err(BindError::type_mismatch(
                    position,
                    expected_name::<T>(lua),
                    describe(&other),
                ));
            }
        };
        {
            let handle = userdata.borrow::<ObjectHandle>().map_err(|_| {
                BindError::type_mismatch(position, expected_name::<T>(lua), "userdata")
            })?;
            if handle.is_released() {
                return Err(BindError::released(handle.type_name()));
            }
            if !handle.can_view(TypeKey::of::<T>()) {
                return Err(BindError::type_mismatch(
                    position,
                    expected_name::<T>(lua),
                    handle.type_name(),
                ));
            }
        }
        Ok(Self {
            userdata,
            _marker: PhantomData,
        })
    }
}

impl<T: Object> IntoLua for ObjectRef<T> {
    fn into_lua(self, _lua: &Lua) -> mlua::Result<Value> {
        Ok(Value::UserData(self.userdata))
    }
}

/// A host object moved into Lua, or copied out of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Owned<T>(pub T);

impl<T: Object> IntoLua for Owned<T> {
    fn into_lua(self, lua: &Lua) -> mlua::Result<Value> {
        push_owned::<T, T>(lua, self.0).map(Value::UserData)
    }
}

impl<T: Object + Clone> FromScript for Owned<T> {
    fn from_script(lua: &Lua, value: Value, position: usize) -> BindResult<Self> {
        let object = ObjectRef::<T>::from_script(lua, value, position)?;
        object.borrow(|value| Owned(value.clone()))
    }
}

/// A host object shared with Lua.
#[derive(Debug)]
pub struct SharedRef<T>(pub Rc<RefCell<T>>);

impl<T> SharedRef<T> {
    pub fn new(value: T) -> Self {
        SharedRef(Rc::new(RefCell::new(value)))
    }

    pub fn into_inner(self) -> Rc<RefCell<T>> {
        self.0
    }
}

impl<T> Clone for SharedRef<T> {
    fn clone(&self) -> Self {
        SharedRef(Rc::clone(&self.0))
    }
}

impl<T: Object> IntoLua for SharedRef<T> {
    fn into_lua(self, lua: &Lua) -> mlua::Result<Value> {
        push_shared::<T, T>(lua, self.0).map(Value::UserData)
    }
}

impl<T: Object> FromScript for SharedRef<T> {
    fn from_script(lua: &Lua, value: Value, position: usize) -> BindResult<Self> {
        let ud = match value {
            Value::UserData(ud) => ud,
            other => {
                return Err(BindError::type_mismatch(
                    position,
                    expected_name::<T>(lua),
                    describe(&other),
                ));
            }
        };
        let handle = ud.borrow::<ObjectHandle>().map_err(|_| {
            BindError::type_mismatch(position, expected_name::<T>(lua), "userdata")
        })?;
        match handle.shared()? {
            Some(shared) => shared.downcast::<T>().map(SharedRef).ok_or_else(|| {
                BindError::type_mismatch(position, expected_name::<T>(lua), handle.type_name())
            }),
            None => Err(BindError::type_mismatch(
                position,
                format!("shared {}", expected_name::<T>(lua)),
                format!("{} {}", handle.lifetime(), handle.type_name()),
            )),
        }
    }
}

/// A shared host object viewed as one of its registered bases.
///
/// Accepts every shared handle whose type derives from `T` and keeps a
/// strong reference to the object, so ownership outlives the call. Use
/// [`SharedRef`] when the exact concrete `Rc<RefCell<T>>` is needed.
pub struct SharedBase<T> {
    shared: SharedObject,
    path: BasePath,
    view: Option<Cast>,
    type_name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Object> SharedBase<T> {
    /// The erased shared state.
    pub fn shared(&self) -> &SharedObject {
        &self.shared
    }

    /// The concrete object, if it is exactly `U`.
    pub fn downcast<U: Object>(&self) -> Option<Rc<RefCell<U>>> {
        self.shared.downcast::<U>()
    }

    /// Borrow the object as `T`.
    pub fn borrow<R>(&self, f: impl FnOnce(&T) -> R) -> BindResult<R> {
        let cell = self.cell()?;
        let object = cell.try_borrow().map_err(|_| self.busy())?;
        let found = self
            .path
            .visit(&*object, |base| base.as_any().downcast_ref::<T>().map(f));
        self.finish(found)
    }

    /// Mutably borrow the object as `T`.
    pub fn borrow_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> BindResult<R> {
        let cell = self.cell()?;
        let mut object = cell.try_borrow_mut().map_err(|_| self.busy())?;
        let found = self.path.visit_mut(&mut *object, |base| {
            base.as_any_mut().downcast_mut::<T>().map(f)
        });
        self.finish(found)
    }

    fn cell(&self) -> BindResult<&RefCell<dyn Object>> {
        self.shared.cell().ok_or_else(|| self.mismatch())
    }

    fn finish<R>(&self, found: Result<Option<R>, PathError>) -> BindResult<R> {
        match found {
            Ok(Some(value)) => Ok(value),
            Ok(None) | Err(PathError::Mismatch) => Err(self.mismatch()),
            Err(PathError::Busy) => Err(self.busy()),
        }
    }

    fn busy(&self) -> BindError {
        BindError::ObjectBusy {
            type_name: self.type_name.clone(),
        }
    }

    fn mismatch(&self) -> BindError {
        BindError::handle_mismatch(TypeKey::of::<T>().short_name(), &self.type_name)
    }
}

impl<T> Clone for SharedBase<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            path: self.path.clone(),
            view: self.view,
            type_name: self.type_name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for SharedBase<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBase")
            .field("type_name", &self.type_name)
            .field("shared", &self.shared)
            .finish()
    }
}

impl<T: Object> FromScript for SharedBase<T> {
    fn from_script(lua: &Lua, value: Value, position: usize) -> BindResult<Self> {
        let ud = match value {
            Value::UserData(ud) => ud,
            other => {
                return Err(BindError::type_mismatch(
                    position,
                    expected_name::<T>(lua),
                    describe(&other),
                ));
            }
        };
        let handle = ud.borrow::<ObjectHandle>().map_err(|_| {
            BindError::type_mismatch(position, expected_name::<T>(lua), "userdata")
        })?;
        let Some(shared) = handle.shared()? else {
            return Err(BindError::type_mismatch(
                position,
                format!("shared {}", expected_name::<T>(lua)),
                format!("{} {}", handle.lifetime(), handle.type_name()),
            ));
        };
        let path = handle.base_path(TypeKey::of::<T>()).ok_or_else(|| {
            BindError::type_mismatch(position, expected_name::<T>(lua), handle.type_name())
        })?;
        Ok(Self {
            shared,
            path,
            view: handle.view(),
            type_name: handle.type_name().to_string(),
            _marker: PhantomData,
        })
    }
}

impl<T: Object> IntoLua for SharedBase<T> {
    fn into_lua(self, lua: &Lua) -> mlua::Result<Value> {
        push_shared_object(lua, self.shared, self.view).map(Value::UserData)
    }
}

// ============================================================================
// Argument lists
// ============================================================================

macro_rules! impl_from_args {
    ($count:expr; $($name:ident),*) => {
        impl<$($name: FromScript),*> FromArgs for ($($name,)*) {
            const ARITY: usize = $count;

            #[allow(unused_variables, unused_mut, unused_assignments)]
            fn from_args(lua: &Lua, args: Vec<Value>, first_position: usize) -> BindResult<Self> {
                let mut args = args.into_iter();
                let mut position = first_position;
                Ok(($({
                    let value = args.next().unwrap_or(Value::Nil);
                    let converted = $name::from_script(lua, value, position)?;
                    position += 1;
                    converted
                },)*))
            }
        }
    };
}

impl_from_args!(0;);
impl_from_args!(1; A);
impl_from_args!(2; A, B);
impl_from_args!(3; A, B, C);
impl_from_args!(4; A, B, C, D);
impl_from_args!(5; A, B, C, D, E);
impl_from_args!(6; A, B, C, D, E, F);
impl_from_args!(7; A, B, C, D, E, F, G);
impl_from_args!(8; A, B, C, D, E, F, G, H);

impl<T: FromScript> FromArgs for T {
    const ARITY: usize = 1;

    fn from_args(lua: &Lua, args: Vec<Value>, first_position: usize) -> BindResult<Self> {
        let value = args.into_iter().next().unwrap_or(Value::Nil);
        T::from_script(lua, value, first_position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luabind_core::BindErrorKind;

    #[test]
    fn integers_accept_integral_numbers_only() {
        let lua = Lua::new();
        assert_eq!(i32::from_script(&lua, Value::Integer(7), 1).unwrap(), 7);
        assert_eq!(i32::from_script(&lua, Value::Number(7.0), 1).unwrap(), 7);

        let err = i32::from_script(&lua, Value::Number(1.5), 2).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Argument at 2 has invalid type. Expecting 'integer', but got 'number'."
        );
    }

    #[test]
    fn integers_are_range_checked() {
        let lua = Lua::new();
        let err = u8::from_script(&lua, Value::Integer(300), 1).unwrap_err();
        assert_eq!(err.kind(), BindErrorKind::TypeMismatch);
        assert!(err.to_string().contains("'u8'"));
    }

    #[test]
    fn booleans_are_strict() {
        let lua = Lua::new();
        assert!(bool::from_script(&lua, Value::Boolean(true), 1).unwrap());
        let err = bool::from_script(&lua, Value::Integer(1), 3).unwrap_err();
        assert!(err.to_string().contains("Expecting 'boolean', but got 'integer'"));
    }

    #[test]
    fn strings_and_numbers() {
        let lua = Lua::new();
        let value = Value::String(lua.create_string("abc").unwrap());
        assert_eq!(String::from_script(&lua, value, 1).unwrap(), "abc");
        assert_eq!(f64::from_script(&lua, Value::Integer(2), 1).unwrap(), 2.0);

        let err = String::from_script(&lua, Value::Nil, 1).unwrap_err();
        assert!(err.to_string().contains("but got 'nil'"));
    }

    #[test]
    fn option_maps_nil() {
        let lua = Lua::new();
        assert_eq!(Option::<i64>::from_script(&lua, Value::Nil, 1).unwrap(), None);
        assert_eq!(
            Option::<i64>::from_script(&lua, Value::Integer(4), 1).unwrap(),
            Some(4)
        );
    }

    #[test]
    fn pair_needs_two_elements() {
        let lua = Lua::new();
        let table: Table = lua.load("return { 5, 'five' }").eval().unwrap();
        let pair = Pair::<i64, String>::from_script(&lua, Value::Table(table), 1).unwrap();
        assert_eq!(pair, Pair(5, "five".to_string()));

        let table: Table = lua.load("return { 1, 2, 3 }").eval().unwrap();
        let err = Pair::<i64, i64>::from_script(&lua, Value::Table(table), 1).unwrap_err();
        assert!(err.to_string().contains("Expecting 'pair'"));
    }

    #[test]
    fn pair_into_lua_is_sequence() {
        let lua = Lua::new();
        let value = Pair(1, "one").into_lua(&lua).unwrap();
        let table = value.as_table().unwrap();
        assert_eq!(table.raw_len(), 2);
        assert_eq!(table.raw_get::<String>(2).unwrap(), "one");
    }

    #[test]
    fn argument_lists_number_positions() {
        let lua = Lua::new();
        let args = vec![
            Value::Integer(1),
            Value::String(lua.create_string("x").unwrap()),
        ];
        let (a, b) = <(i64, String)>::from_args(&lua, args, 2).unwrap();
        assert_eq!((a, b.as_str()), (1, "x"));

        let args = vec![Value::Integer(1), Value::Integer(2)];
        let err = <(i64, String)>::from_args(&lua, args, 2).unwrap_err();
        assert!(err.to_string().starts_with("Argument at 3"));
    }

    #[test]
    fn arity_constants() {
        assert_eq!(<() as FromArgs>::ARITY, 0);
        assert_eq!(<i64 as FromArgs>::ARITY, 1);
        assert_eq!(<(i64, bool, String) as FromArgs>::ARITY, 3);
    }
}
