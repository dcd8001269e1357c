//! Free functions exported as Lua globals.

use mlua::{IntoLuaMulti, Lua, MultiValue};
use tracing::debug;

use luabind_core::BindResult;

use crate::adapter;
use crate::convert::FromArgs;

/// Export `f` as the global `name`.
///
/// ```ignore
/// function(&lua, "add", |_, (a, b): (i64, i64)| Ok(a + b))?;
/// ```
pub fn function<A, R, F>(lua: &Lua, name: &str, f: F) -> BindResult<()>
where
    A: FromArgs,
    R: IntoLuaMulti,
    F: Fn(&Lua, A) -> mlua::Result<R> + 'static,
{
    let function = adapter::free_function(lua, f)?;
    lua.globals().set(name, function)?;
    debug!(name, arity = A::ARITY, "function exported");
    Ok(())
}

/// Export `f` as the global `name`, passing the Lua arguments through.
pub fn raw_function<R, F>(lua: &Lua, name: &str, f: F) -> BindResult<()>
where
    R: IntoLuaMulti,
    F: Fn(&Lua, MultiValue) -> mlua::Result<R> + 'static,
{
    let function = adapter::raw_function(lua, f)?;
    lua.globals().set(name, function)?;
    debug!(name, "raw function exported");
    Ok(())
}
