//! TypeRecord - the bindable surface of one host type.
//!
//! A record is created once per host type by
//! [`TypeRegistry::register`](crate::TypeRegistry::register) and shared by
//! every handle of that type. Its identity (name, key, bases, base-path table,
//! attribute hooks, class table) is fixed at creation; its member tables can
//! keep growing as later binding calls attach functions and properties.
//!
//! Member callables are stored as reference-counted closures and are cloned
//! out of the tables before being invoked, so host code running inside a
//! getter may freely bind more members.

use std::cell::{Cell, Ref, RefCell};
use std::rc::Rc;

use bitflags::bitflags;
use mlua::{AnyUserData, Function, Lua, RegistryKey, Table, Value};
use rustc_hash::FxHashMap;
use tracing::debug;

use luabind_core::{BasePath, TypeKey};

// ============================================================================
// Hook and accessor types
// ============================================================================

/// Attribute read hook (`__index`) for one type.
pub type IndexHook = fn(&Lua, &AnyUserData, &Rc<TypeRecord>, Value) -> mlua::Result<Value>;

/// Attribute write hook (`__newindex`) for one type.
pub type NewIndexHook = fn(&Lua, &AnyUserData, &Rc<TypeRecord>, Value, Value) -> mlua::Result<()>;

/// The pair of attribute hooks installed for a type at registration.
#[derive(Clone, Copy)]
pub struct AttributeHooks {
    pub index: IndexHook,
    pub new_index: NewIndexHook,
}

impl std::fmt::Debug for AttributeHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AttributeHooks")
    }
}

/// Property getter operating on the raw handle.
pub type PropertyGetter = Rc<dyn Fn(&Lua, &AnyUserData) -> mlua::Result<Value>>;

/// Property setter operating on the raw handle.
pub type PropertySetter = Rc<dyn Fn(&Lua, &AnyUserData, Value) -> mlua::Result<()>>;

/// Array element getter. Receives the zero-based host index.
pub type IndexGetter = Rc<dyn Fn(&Lua, &AnyUserData, i64) -> mlua::Result<Value>>;

/// Array element setter. Receives the zero-based host index.
pub type IndexSetter = Rc<dyn Fn(&Lua, &AnyUserData, i64, Value) -> mlua::Result<()>>;

/// A bound property: getter, setter, or both.
#[derive(Clone, Default)]
pub struct Property {
    pub getter: Option<PropertyGetter>,
    pub setter: Option<PropertySetter>,
}

impl Property {
    pub fn read_write(getter: PropertyGetter, setter: PropertySetter) -> Self {
        Self {
            getter: Some(getter),
            setter: Some(setter),
        }
    }

    pub fn read_only(getter: PropertyGetter) -> Self {
        Self {
            getter: Some(getter),
            setter: None,
        }
    }

    pub fn write_only(setter: PropertySetter) -> Self {
        Self {
            getter: None,
            setter: Some(setter),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.setter.is_none()
    }
}

impl std::fmt::Debug for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("getter", &self.getter.is_some())
            .field("setter", &self.setter.is_some())
            .finish()
    }
}

bitflags! {
    /// Capabilities recorded on a type as binding calls attach them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TypeFlags: u8 {
        /// Has at least one declared base.
        const HAS_BASES = 1 << 0;
        /// A zero-argument `new` was bound.
        const DEFAULT_CONSTRUCTIBLE = 1 << 1;
        /// An array getter was bound.
        const INDEX_GET = 1 << 2;
        /// An array setter was bound.
        const INDEX_SET = 1 << 3;
    }
}

#[derive(Default)]
struct Members {
    functions: FxHashMap<String, RegistryKey>,
    properties: FxHashMap<String, Property>,
    index_getter: Option<IndexGetter>,
    index_setter: Option<IndexSetter>,
}

// ============================================================================
// TypeRecord
// ============================================================================

/// Registry entry describing one host type.
pub struct TypeRecord {
    name: String,
    key: TypeKey,
    bases: Vec<Rc<TypeRecord>>,
    paths: FxHashMap<TypeKey, BasePath>,
    hooks: AttributeHooks,
    class_table: RegistryKey,
    flags: Cell<TypeFlags>,
    members: RefCell<Members>,
}

impl TypeRecord {
    pub(crate) fn new(
        name: String,
        key: TypeKey,
        bases: Vec<Rc<TypeRecord>>,
        paths: FxHashMap<TypeKey, BasePath>,
        hooks: AttributeHooks,
        class_table: RegistryKey,
    ) -> Self {
        let flags = if bases.is_empty() {
            TypeFlags::empty()
        } else {
            TypeFlags::HAS_BASES
        };
        Self {
            name,
            key,
            bases,
            paths,
            hooks,
            class_table,
            flags: Cell::new(flags),
            members: RefCell::new(Members::default()),
        }
    }

    /// Display name, also the global the class table is published under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Direct bases in declaration order.
    pub fn bases(&self) -> &[Rc<TypeRecord>] {
        &self.bases
    }

    pub fn hooks(&self) -> AttributeHooks {
        self.hooks
    }

    pub fn flags(&self) -> TypeFlags {
        self.flags.get()
    }

    pub fn insert_flags(&self, flags: TypeFlags) {
        self.flags.set(self.flags.get() | flags);
    }

    /// Cached path from this type to `ancestor`, including itself.
    pub fn path_to(&self, ancestor: TypeKey) -> Option<&BasePath> {
        self.paths.get(&ancestor)
    }

    /// Whether `ancestor` is this type or reachable through its bases.
    pub fn derives_from(&self, ancestor: TypeKey) -> bool {
        self.paths.contains_key(&ancestor)
    }

    pub(crate) fn paths(&self) -> &FxHashMap<TypeKey, BasePath> {
        &self.paths
    }

    /// The class table holding constructors and class functions.
    pub fn class_table(&self, lua: &Lua) -> mlua::Result<Table> {
        lua.registry_value(&self.class_table)
    }

    // ========================================================================
    // Member tables
    // ========================================================================

    /// Bind an instance function. Replaces any previous binding of `name`.
    pub fn add_function(&self, lua: &Lua, name: &str, function: Function) -> mlua::Result<()> {
        let key = lua.create_registry_value(function)?;
        let replaced = self
            .members
            .borrow_mut()
            .functions
            .insert(name.to_string(), key);
        debug!(
            type_name = %self.name,
            member = name,
            replaced = replaced.is_some(),
            "function bound"
        );
        Ok(())
    }

    /// Bind a property. Replaces any previous binding of `name`.
    pub fn add_property(&self, name: &str, property: Property) {
        debug!(
            type_name = %self.name,
            member = name,
            read_only = property.is_read_only(),
            "property bound"
        );
        self.members
            .borrow_mut()
            .properties
            .insert(name.to_string(), property);
    }

    pub fn set_index_getter(&self, getter: IndexGetter) {
        self.members.borrow_mut().index_getter = Some(getter);
        self.insert_flags(TypeFlags::INDEX_GET);
    }

    pub fn set_index_setter(&self, setter: IndexSetter) {
        self.members.borrow_mut().index_setter = Some(setter);
        self.insert_flags(TypeFlags::INDEX_SET);
    }

    /// Own instance function `name`, not looking at bases.
    pub fn function(&self, lua: &Lua, name: &str) -> mlua::Result<Option<Function>> {
        let members = self.members.borrow();
        match members.functions.get(name) {
            Some(key) => lua.registry_value(key).map(Some),
            None => Ok(None),
        }
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.members.borrow().functions.contains_key(name)
    }

    /// Own property `name`, not looking at bases.
    pub fn property(&self, name: &str) -> Option<Property> {
        self.members.borrow().properties.get(name).cloned()
    }

    pub fn index_getter(&self) -> Option<IndexGetter> {
        self.members.borrow().index_getter.clone()
    }

    pub fn index_setter(&self) -> Option<IndexSetter> {
        self.members.borrow().index_setter.clone()
    }

    /// Names of own functions and properties, sorted.
    pub fn member_names(&self) -> Vec<String> {
        let members: Ref<'_, Members> = self.members.borrow();
        let mut names: Vec<String> = members
            .functions
            .keys()
            .chain(members.properties.keys())
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for TypeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bases: Vec<&str> = self.bases.iter().map(|base| base.name()).collect();
        f.debug_struct("TypeRecord")
            .field("name", &self.name)
            .field("rust_name", &self.key.rust_name())
            .field("bases", &bases)
            .field("flags", &self.flags.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(lua: &Lua) -> TypeRecord {
        fn index(_: &Lua, _: &AnyUserData, _: &Rc<TypeRecord>, _: Value) -> mlua::Result<Value> {
            Ok(Value::Nil)
        }
        fn new_index(
            _: &Lua,
            _: &AnyUserData,
            _: &Rc<TypeRecord>,
            _: Value,
            _: Value,
        ) -> mlua::Result<()> {
            Ok(())
        }

        let key = TypeKey::of::<u8>();
        let mut paths = FxHashMap::default();
        paths.insert(key, BasePath::identity(key));
        TypeRecord::new(
            "Byte".to_string(),
            key,
            Vec::new(),
            paths,
            AttributeHooks { index, new_index },
            lua.create_registry_value(lua.create_table().unwrap())
                .unwrap(),
        )
    }

    #[test]
    fn functions_round_trip_through_registry() {
        let lua = Lua::new();
        let record = record(&lua);
        let function = lua.create_function(|_, ()| Ok(42)).unwrap();

        record.add_function(&lua, "answer", function).unwrap();
        assert!(record.has_function("answer"));

        let found = record.function(&lua, "answer").unwrap().unwrap();
        assert_eq!(found.call::<i64>(()).unwrap(), 42);
        assert!(record.function(&lua, "missing").unwrap().is_none());
    }

    #[test]
    fn properties_keep_accessor_shape() {
        let lua = Lua::new();
        let record = record(&lua);
        let getter: PropertyGetter = Rc::new(|_: &Lua, _: &AnyUserData| Ok(Value::Integer(1)));

        record.add_property("size", Property::read_only(getter));
        let property = record.property("size").unwrap();
        assert!(property.is_read_only());
        assert!(property.getter.is_some());
        assert!(record.property("other").is_none());
        assert_eq!(record.member_names(), vec!["size".to_string()]);
    }

    #[test]
    fn index_hooks_set_flags() {
        let lua = Lua::new();
        let record = record(&lua);
        assert!(record.flags().is_empty());

        let getter: IndexGetter =
            Rc::new(|_: &Lua, _: &AnyUserData, index: i64| Ok(Value::Integer(index)));
        record.set_index_getter(getter);
        assert!(record.flags().contains(TypeFlags::INDEX_GET));
        assert!(!record.flags().contains(TypeFlags::INDEX_SET));
        assert!(record.index_getter().is_some());
        assert!(record.index_setter().is_none());
    }

    #[test]
    fn identity_path_present() {
        let lua = Lua::new();
        let record = record(&lua);
        assert!(record.derives_from(TypeKey::of::<u8>()));
        assert!(!record.derives_from(TypeKey::of::<u16>()));
        assert!(record.path_to(TypeKey::of::<u8>()).unwrap().is_empty());
    }
}
