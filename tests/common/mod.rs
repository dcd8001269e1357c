//! Shared fixtures for the integration tests.
//!
//! Provides a bank-account hierarchy with live-instance counters, and small
//! helpers for running Lua snippets and pulling bound objects back out.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use luabind::{
    BindError, BindOptions, BindResult, Class, FromScript, Object, ObjectRef, Upcast, function,
    push_shared,
};
use mlua::{FromLuaMulti, Lua, Value};

thread_local! {
    static LIVE_ACCOUNTS: Cell<i64> = const { Cell::new(0) };
    static SERVICE_FLAG: Cell<i32> = const { Cell::new(0) };
}

/// Number of `Account` values alive on this thread.
pub fn live_accounts() -> i64 {
    LIVE_ACCOUNTS.with(|live| live.get())
}

/// Which `service` implementation ran last.
pub fn service_flag() -> i32 {
    SERVICE_FLAG.with(|flag| flag.get())
}

fn set_service_flag(value: i32) {
    SERVICE_FLAG.with(|flag| flag.set(value));
}

// =============================================================================
// Accounts
// =============================================================================

#[derive(Debug)]
pub struct Account {
    pub balance: i64,
    name: String,
    bank_name: String,
}

impl Account {
    pub fn new(balance: i64) -> Self {
        LIVE_ACCOUNTS.with(|live| live.set(live.get() + 1));
        Self {
            balance,
            name: String::new(),
            bank_name: "BelovedBank".to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = format!("{}::{}", self.bank_name, name);
    }

    pub fn bank_name(&self) -> &str {
        &self.bank_name
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clone for Account {
    fn clone(&self) -> Self {
        let mut copy = Account::new(self.balance);
        copy.name = self.name.clone();
        copy
    }
}

impl Drop for Account {
    fn drop(&mut self) {
        LIVE_ACCOUNTS.with(|live| live.set(live.get() - 1));
    }
}

impl Object for Account {}

#[derive(Debug)]
pub struct SpecialAccount {
    pub account: Account,
    pub limit: i64,
}

impl Default for SpecialAccount {
    fn default() -> Self {
        Self {
            account: Account::default(),
            limit: 10,
        }
    }
}

impl Object for SpecialAccount {}

impl Upcast<Account> for SpecialAccount {
    fn upcast(&self) -> &Account {
        &self.account
    }

    fn upcast_mut(&mut self) -> &mut Account {
        &mut self.account
    }
}

/// Slots the `setAccount` / `setSpecialAccount` globals store into.
#[derive(Default, Clone)]
pub struct AccountSlots {
    pub account: Rc<RefCell<Option<Rc<RefCell<Account>>>>>,
    pub special: Rc<RefCell<Option<Rc<RefCell<SpecialAccount>>>>>,
}

/// Bind `Account`, `SpecialAccount` and their helper functions.
pub fn bind_accounts(lua: &Lua) -> BindResult<AccountSlots> {
    Class::<Account>::register(lua, "Account")?
        .default_constructor()?
        .constructor("newWithInt", |_, balance: i64| Ok(Account::new(balance)))?
        .shared_constructor("makeShared", |_, ()| Ok(Account::default()))?
        .shared_constructor("makeSharedWithInt", |_, balance: i64| {
            Ok(Account::new(balance))
        })?
        .method("getBalance", |_, account: &Account, ()| Ok(account.balance))?
        .method_mut("setBalance", |_, account: &mut Account, balance: i64| {
            account.balance = balance;
            Ok(())
        })?
        .method("service", |_, _: &Account, ()| {
            set_service_flag(1);
            Ok(())
        })?
        .property(
            "balance",
            |account: &Account| account.balance,
            |account: &mut Account, balance: i64| account.balance = balance,
        )?
        .property_readonly("bankName", |account: &Account| {
            account.bank_name().to_string()
        })?
        .property(
            "name",
            |account: &Account| account.name().to_string(),
            |account: &mut Account, name: String| account.set_name(&name),
        )?;

    Class::<SpecialAccount>::declare("SpecialAccount")
        .base::<Account>()
        .register(lua)?
        .shared_constructor("makeShared", |_, ()| Ok(SpecialAccount::default()))?
        .method("service", |_, _: &SpecialAccount, ()| {
            set_service_flag(2);
            Ok(())
        })?
        .property_readonly("limit", |account: &SpecialAccount| account.limit)?
        .method_mut("setLimit", |_, account: &mut SpecialAccount, limit: i64| {
            account.limit = limit;
            Ok(())
        })?;

    function(lua, "createAccount", |lua, special: bool| {
        if special {
            let account = Rc::new(RefCell::new(SpecialAccount::default()));
            push_shared::<Account, SpecialAccount>(lua, account)
        } else {
            push_shared::<Account, Account>(lua, Rc::new(RefCell::new(Account::default())))
        }
    })?;

    let slots = AccountSlots::default();
    let account = Rc::clone(&slots.account);
    function(lua, "setAccount", move |_, shared: luabind::SharedRef<Account>| {
        *account.borrow_mut() = Some(shared.into_inner());
        Ok(())
    })?;
    let special = Rc::clone(&slots.special);
    function(
        lua,
        "setSpecialAccount",
        move |_, shared: luabind::SharedRef<SpecialAccount>| {
            *special.borrow_mut() = Some(shared.into_inner());
            Ok(())
        },
    )?;
    Ok(slots)
}

// =============================================================================
// Lua helpers
// =============================================================================

/// A fresh runtime with default options.
pub fn lua() -> Lua {
    let lua = Lua::new();
    luabind::init(&lua, BindOptions::default());
    lua
}

/// Run a chunk, panicking with the Lua message on failure.
pub fn run(lua: &Lua, source: &str) {
    if let Err(err) = lua.load(source).exec() {
        panic!("script failed: {err}");
    }
}

/// Evaluate a chunk and convert its result.
pub fn eval<T: FromLuaMulti>(lua: &Lua, source: &str) -> T {
    lua.load(source)
        .eval()
        .unwrap_or_else(|err| panic!("script failed: {err}"))
}

/// Evaluate a chunk returning a bound object.
pub fn eval_object<T: Object>(lua: &Lua, source: &str) -> ObjectRef<T> {
    let value: Value = eval(lua, source);
    ObjectRef::from_script(lua, value, 1).unwrap_or_else(|err| panic!("not an object: {err}"))
}

/// Run a chunk that must fail, returning the error.
pub fn run_err(lua: &Lua, source: &str) -> mlua::Error {
    match lua.load(source).exec() {
        Ok(()) => panic!("script unexpectedly succeeded:\n{source}"),
        Err(err) => err,
    }
}

/// Run a chunk that must fail with a message containing `expected`.
pub fn run_expecting_error(lua: &Lua, source: &str, expected: &str) {
    let err = run_err(lua, source);
    let message = err.to_string();
    assert!(
        message.contains(expected),
        "expected error containing {expected:?}, got {message:?}"
    );
}

/// The binding error carried by a Lua error.
pub fn bind_error(err: &mlua::Error) -> &BindError {
    BindError::from_lua(err).unwrap_or_else(|| panic!("not a binding error: {err}"))
}

/// Run two full collection cycles.
pub fn collect(lua: &Lua) {
    lua.gc_collect().unwrap();
    lua.gc_collect().unwrap();
}
