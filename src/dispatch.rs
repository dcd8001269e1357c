//! Member dispatch protocol.
//!
//! These are the `__index` / `__newindex` entry points Lua runs on every
//! attribute access of a bound object.
//!
//! # Read Path
//!
//! 1. Keys other than integers (or integral floats) and strings are rejected
//!    with `InvalidKey`.
//! 2. Integer keys go to the array getter of the type or its nearest base that
//!    binds one. Without one the access fails with `CapabilityMissing`.
//! 3. String keys look at the type's properties, then its functions, then
//!    each base in declaration order, depth first. The first hit wins.
//! 4. Misses fall through to the per-instance ad-hoc table.
//!
//! # Write Path
//!
//! Integer keys need an array setter. String keys look for a property
//! through the same chain; a property without setter rejects the write with
//! `ReadOnly`. Anything else is stored in the ad-hoc table.
//!
//! A property declared on a shared ancestor in a diamond is always reached
//! through the first-declared base: first-declared-base-wins, not "most
//! specific".

use std::rc::Rc;

use mlua::{AnyUserData, Function, Lua, Value};
use tracing::trace;

use luabind_core::{BindError, BindOptions, BindResult, IndexAccess};
use luabind_registry::{
    AttributeHooks, IndexGetter, IndexSetter, Property, TypeRecord, TypeRegistry,
};

use crate::handle::{adhoc_table, ensure_adhoc_table, handle_ref};

/// Hooks installed for every type registered through the class builder.
pub(crate) const HOOKS: AttributeHooks = AttributeHooks { index, new_index };

/// A classified attribute key.
#[derive(Debug, Clone, PartialEq)]
enum Key {
    Index(i64),
    Name(String),
}

fn classify(key: &Value) -> BindResult<Key> {
    match key {
        Value::Integer(index) => Ok(Key::Index(*index)),
        Value::Number(number) if number.is_finite() && number.fract() == 0.0 => {
            Ok(Key::Index(*number as i64))
        }
        Value::String(name) => Ok(Key::Name(name.to_string_lossy().into())),
        other => Err(BindError::InvalidKey {
            actual: other.type_name().to_string(),
        }),
    }
}

enum Member {
    Property(Property),
    Function(Function),
}

fn find_member(lua: &Lua, record: &TypeRecord, name: &str) -> mlua::Result<Option<Member>> {
    if let Some(property) = record.property(name) {
        return Ok(Some(Member::Property(property)));
    }
    if let Some(function) = record.function(lua, name)? {
        return Ok(Some(Member::Function(function)));
    }
    for base in record.bases() {
        if let Some(member) = find_member(lua, base, name)? {
            return Ok(Some(member));
        }
    }
    Ok(None)
}

fn find_property(record: &TypeRecord, name: &str) -> Option<Property> {
    record.property(name).or_else(|| {
        record
            .bases()
            .iter()
            .find_map(|base| find_property(base, name))
    })
}

fn find_index_getter(record: &TypeRecord) -> Option<IndexGetter> {
    record.index_getter().or_else(|| {
        record
            .bases()
            .iter()
            .find_map(|base| find_index_getter(base))
    })
}

fn find_index_setter(record: &TypeRecord) -> Option<IndexSetter> {
    record.index_setter().or_else(|| {
        record
            .bases()
            .iter()
            .find_map(|base| find_index_setter(base))
    })
}

// ============================================================================
// Entry points
// ============================================================================

/// `__index` of every object handle.
pub(crate) fn index_entry(lua: &Lua, ud: &AnyUserData, key: Value) -> mlua::Result<Value> {
    match live_record(ud)? {
        Some(record) => (record.hooks().index)(lua, ud, &record, key),
        None => index_with(lua, ud, None, key),
    }
}

/// `__newindex` of every object handle.
pub(crate) fn new_index_entry(
    lua: &Lua,
    ud: &AnyUserData,
    key: Value,
    value: Value,
) -> mlua::Result<()> {
    match live_record(ud)? {
        Some(record) => (record.hooks().new_index)(lua, ud, &record, key, value),
        None => new_index_with(lua, ud, None, key, value),
    }
}

fn live_record(ud: &AnyUserData) -> BindResult<Option<Rc<TypeRecord>>> {
    let handle = handle_ref(ud)?;
    if handle.is_released() {
        return Err(BindError::released(handle.type_name()));
    }
    Ok(handle.record().cloned())
}

/// Default read hook.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn index(
    lua: &Lua,
    ud: &AnyUserData,
    record: &Rc<TypeRecord>,
    key: Value,
) -> mlua::Result<Value> {
    index_with(lua, ud, Some(record), key)
}

/// Default write hook.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn new_index(
    lua: &Lua,
    ud: &AnyUserData,
    record: &Rc<TypeRecord>,
    key: Value,
    value: Value,
) -> mlua::Result<()> {
    new_index_with(lua, ud, Some(record), key, value)
}

fn index_with(
    lua: &Lua,
    ud: &AnyUserData,
    record: Option<&Rc<TypeRecord>>,
    key: Value,
) -> mlua::Result<Value> {
    let options = TypeRegistry::get(lua).options();
    match classify(&key)? {
        Key::Index(index) => {
            let getter = record
                .and_then(|record| find_index_getter(record))
                .ok_or_else(|| capability_missing(ud, IndexAccess::Read))?;
            getter(lua, ud, options.index_base.to_host(index))
        }
        Key::Name(name) => {
            let member = match record {
                Some(record) => find_member(lua, record, &name)?,
                None => None,
            };
            match member {
                Some(Member::Property(property)) => match property.getter {
                    Some(getter) => getter(lua, ud),
                    None => Err(BindError::WriteOnly { name }.into()),
                },
                Some(Member::Function(function)) => Ok(Value::Function(function)),
                None => read_adhoc(ud, &name, key, &options),
            }
        }
    }
}

fn new_index_with(
    lua: &Lua,
    ud: &AnyUserData,
    record: Option<&Rc<TypeRecord>>,
    key: Value,
    value: Value,
) -> mlua::Result<()> {
    let options = TypeRegistry::get(lua).options();
    match classify(&key)? {
        Key::Index(index) => {
            let setter = record
                .and_then(|record| find_index_setter(record))
                .ok_or_else(|| capability_missing(ud, IndexAccess::Write))?;
            setter(lua, ud, options.index_base.to_host(index), value)
        }
        Key::Name(name) => {
            let property = record.and_then(|record| find_property(record, &name));
            match property {
                Some(property) => match property.setter {
                    Some(setter) => setter(lua, ud, value),
                    None => Err(BindError::ReadOnly { name }.into()),
                },
                None => {
                    trace!(member = %name, "stored in ad-hoc table");
                    ensure_adhoc_table(lua, ud)?.raw_set(key, value)
                }
            }
        }
    }
}

fn read_adhoc(
    ud: &AnyUserData,
    name: &str,
    key: Value,
    options: &BindOptions,
) -> mlua::Result<Value> {
    let value = match adhoc_table(ud)? {
        Some(table) => table.raw_get::<Value>(key)?,
        None => Value::Nil,
    };
    if value.is_nil() {
        trace!(member = name, "ad-hoc miss");
        if options.strict_keys {
            let type_name = handle_ref(ud)?.type_name().to_string();
            return Err(BindError::UnknownKey {
                type_name,
                key: name.to_string(),
            }
            .into());
        }
    }
    Ok(value)
}

fn capability_missing(ud: &AnyUserData, access: IndexAccess) -> BindError {
    let type_name = match handle_ref(ud) {
        Ok(handle) => handle.type_name().to_string(),
        Err(err) => return err,
    };
    BindError::CapabilityMissing { type_name, access }
}
