//! Call adapters.
//!
//! Each adapter turns a typed host closure into a Lua function with the
//! calling convention of its binding site:
//!
//! | Site            | Lua arguments                 | Positions start at |
//! |-----------------|-------------------------------|--------------------|
//! | instance method | `self, args...`               | 2                  |
//! | class function  | `ClassTable, args...`         | 2                  |
//! | free function   | `args...`                     | 1                  |
//!
//! Arity is checked before any conversion and never counts the receiver or
//! the class table. Panics in host code are caught here and reported as
//! [`BindError::HostPanic`].

use std::panic::{self, AssertUnwindSafe};

use mlua::{Function, IntoLuaMulti, Lua, MultiValue, Value};

use luabind_core::{BindError, BindResult, Object};

use crate::convert::{FromArgs, FromScript, ObjectRef};
use crate::handle::release;

/// Run host code, turning a panic into a script-level error.
pub(crate) fn guard<R>(f: impl FnOnce() -> mlua::Result<R>) -> mlua::Result<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(BindError::from_panic(&*payload).into()),
    }
}

fn check_arity(expected: usize, actual: usize) -> BindResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(BindError::arity(expected, actual))
    }
}

/// Split off the receiver or class-table slot.
fn split_first(args: MultiValue) -> (Value, Vec<Value>) {
    let mut args = args.into_iter();
    let first = args.next().unwrap_or(Value::Nil);
    (first, args.collect())
}

pub(crate) fn method<T, A, R, F>(lua: &Lua, f: F) -> mlua::Result<Function>
where
    T: Object,
    A: FromArgs,
    R: IntoLuaMulti,
    F: Fn(&Lua, &T, A) -> mlua::Result<R> + 'static,
{
    lua.create_function(move |lua, args: MultiValue| {
        let (receiver, rest) = split_first(args);
        check_arity(A::ARITY, rest.len())?;
        let this = ObjectRef::<T>::from_script(lua, receiver, 1)?;
        let args = A::from_args(lua, rest, 2)?;
        let result = guard(|| this.borrow(|object| f(lua, object, args))?)?;
        result.into_lua_multi(lua)
    })
}

pub(crate) fn method_mut<T, A, R, F>(lua: &Lua, f: F) -> mlua::Result<Function>
where
    T: Object,
    A: FromArgs,
    R: IntoLuaMulti,
    F: Fn(&Lua, &mut T, A) -> mlua::Result<R> + 'static,
{
    lua.create_function(move |lua, args: MultiValue| {
        let (receiver, rest) = split_first(args);
        check_arity(A::ARITY, rest.len())?;
        let this = ObjectRef::<T>::from_script(lua, receiver, 1)?;
        let args = A::from_args(lua, rest, 2)?;
        let result = guard(|| this.borrow_mut(|object| f(lua, object, args))?)?;
        result.into_lua_multi(lua)
    })
}

pub(crate) fn class_function<A, R, F>(lua: &Lua, f: F) -> mlua::Result<Function>
where
    A: FromArgs,
    R: IntoLuaMulti,
    F: Fn(&Lua, A) -> mlua::Result<R> + 'static,
{
    lua.create_function(move |lua, args: MultiValue| {
        let (_class_table, rest) = split_first(args);
        check_arity(A::ARITY, rest.len())?;
        let args = A::from_args(lua, rest, 2)?;
        guard(|| f(lua, args))?.into_lua_multi(lua)
    })
}

pub(crate) fn raw_class_function<R, F>(lua: &Lua, f: F) -> mlua::Result<Function>
where
    R: IntoLuaMulti,
    F: Fn(&Lua, MultiValue) -> mlua::Result<R> + 'static,
{
    lua.create_function(move |lua, args: MultiValue| {
        let (_class_table, rest) = split_first(args);
        guard(|| f(lua, MultiValue::from_vec(rest)))?.into_lua_multi(lua)
    })
}

pub(crate) fn free_function<A, R, F>(lua: &Lua, f: F) -> mlua::Result<Function>
where
    A: FromArgs,
    R: IntoLuaMulti,
    F: Fn(&Lua, A) -> mlua::Result<R> + 'static,
{
    lua.create_function(move |lua, args: MultiValue| {
        let args: Vec<Value> = args.into_iter().collect();
        check_arity(A::ARITY, args.len())?;
        let args = A::from_args(lua, args, 1)?;
        guard(|| f(lua, args))?.into_lua_multi(lua)
    })
}

pub(crate) fn raw_function<R, F>(lua: &Lua, f: F) -> mlua::Result<Function>
where
    R: IntoLuaMulti,
    F: Fn(&Lua, MultiValue) -> mlua::Result<R> + 'static,
{
    lua.create_function(move |lua, args: MultiValue| guard(|| f(lua, args))?.into_lua_multi(lua))
}

/// The `delete` function every bound type gets.
///
/// Releases the receiver. It works as `obj:delete()`, `Type.delete(obj)` and
/// `Type:delete(obj)`; a leading class table is skipped and any argument after
/// the receiver is an arity error.
pub(crate) fn delete(lua: &Lua) -> mlua::Result<Function> {
    lua.create_function(|_, args: MultiValue| {
        let mut args = args.into_iter().peekable();
        let position = match args.peek() {
            Some(Value::Table(_)) => {
                args.next();
                2
            }
            _ => 1,
        };
        let receiver = args.next();
        check_arity(0, args.count())?;
        match receiver {
            Some(Value::UserData(ud)) => {
                release(&ud)?;
                Ok(())
            }
            other => {
                let actual = other.as_ref().map_or("no value", Value::type_name);
                Err(BindError::type_mismatch(position, "userdata", actual).into())
            }
        }
    })
}
