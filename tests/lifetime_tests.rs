//! Lifetime tests: engine-owned, shared and host-owned objects, explicit
//! release and collector finalisation.

mod common;

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::rc::{Rc, Weak};

use common::*;
use luabind::{
    BindErrorKind, Class, FromScript, Lifetime, Object, ObjectRef, Owned, SharedObject, SharedRef,
    function, handle_ref, is_released, push_host, push_owned, release,
};
use mlua::{AnyUserData, Value};

// =============================================================================
// Engine-owned
// =============================================================================

#[test]
fn test_ctor_dtor() {
    let lua = lua();
    bind_accounts(&lua).unwrap();
    let base = live_accounts();

    run(&lua, "a1 = Account:new() a2 = Account:newWithInt(7)");
    assert_eq!(live_accounts(), base + 2);

    {
        let a2 = eval_object::<Account>(&lua, "return a2");
        assert_eq!(a2.borrow(|a| a.balance).unwrap(), 7);
    }
    assert_eq!(live_accounts(), base + 2);

    run(&lua, "a1 = nil");
    collect(&lua);
    assert_eq!(live_accounts(), base + 1);

    run(&lua, "a2 = nil");
    collect(&lua);
    assert_eq!(live_accounts(), base);
}

thread_local! {
    static DELETED: Cell<usize> = const { Cell::new(0) };
}

#[derive(Default)]
struct Deletable;

impl Object for Deletable {}

impl Drop for Deletable {
    fn drop(&mut self) {
        DELETED.with(|deleted| deleted.set(deleted.get() + 1));
    }
}

fn deleted() -> usize {
    DELETED.with(|deleted| deleted.get())
}

fn bind_deletable(lua: &mlua::Lua) {
    Class::<Deletable>::register(lua, "Deletable")
        .unwrap()
        .default_constructor()
        .unwrap()
        .shared_constructor("makeShared", |_, ()| Ok(Deletable))
        .unwrap()
        .method("ping", |_, _: &Deletable, ()| Ok("pong"))
        .unwrap();
}

#[test]
fn test_explicit_delete() {
    let lua = lua();
    bind_deletable(&lua);
    let base = deleted();

    run(&lua, "obj = Deletable:new() obj:delete()");
    assert_eq!(deleted(), base + 1);

    run(&lua, "obj = Deletable:makeShared() obj:delete()");
    assert_eq!(deleted(), base + 2);

    run(&lua, "obj = Deletable:new() Deletable.delete(obj)");
    assert_eq!(deleted(), base + 3);

    // Finalisation after an explicit delete does not drop again.
    run(&lua, "obj = nil");
    collect(&lua);
    assert_eq!(deleted(), base + 3);
}

#[test]
fn test_delete_releases_receiver() {
    let lua = lua();
    bind_deletable(&lua);
    let base = deleted();

    let err = run_err(&lua, "a = Deletable:new() b = Deletable:new() a:delete(b)");
    assert_eq!(bind_error(&err).kind(), BindErrorKind::ArityMismatch);
    assert!(
        err.to_string()
            .contains("Invalid number of arguments, should be 0, but 1 were given.")
    );
    let pongs: (String, String) = eval(&lua, "return a:ping(), b:ping()");
    assert_eq!(pongs, ("pong".to_string(), "pong".to_string()));
    assert_eq!(deleted(), base);

    run(&lua, "Deletable:delete(a)");
    assert_eq!(deleted(), base + 1);
    run_expecting_error(&lua, "return a:ping()", "released object");
    let pong: String = eval(&lua, "return b:ping()");
    assert_eq!(pong, "pong");
}

#[test]
fn test_use_after_release() {
    let lua = lua();
    bind_deletable(&lua);

    run(&lua, "obj = Deletable:new() obj:delete()");
    let err = run_err(&lua, "return obj:ping()");
    assert_eq!(bind_error(&err).kind(), BindErrorKind::UseAfterRelease);
    assert!(
        err.to_string()
            .contains("attempt to use released object of type 'Deletable'")
    );

    run_expecting_error(&lua, "obj.field = 1", "released object");
    run_expecting_error(&lua, "obj:delete()", "released object");

    let rendered: String = eval(&lua, "return tostring(obj)");
    assert_eq!(rendered, "Deletable (released)");

    // Passing a released object as an argument fails the same way.
    function(&lua, "touch", |_, _: ObjectRef<Deletable>| Ok(())).unwrap();
    run_expecting_error(&lua, "touch(obj)", "released object");
}

#[test]
fn test_host_release() {
    let lua = lua();
    bind_deletable(&lua);
    let base = deleted();

    let ud = push_owned::<Deletable, Deletable>(&lua, Deletable).unwrap();
    assert!(!is_released(&ud).unwrap());
    assert!(release(&ud).unwrap());
    assert!(!release(&ud).unwrap());
    assert!(is_released(&ud).unwrap());
    assert_eq!(deleted(), base + 1);
}

// =============================================================================
// Shared
// =============================================================================

#[test]
fn test_shared_count_returns_to_one() {
    let lua = lua();
    bind_accounts(&lua).unwrap();

    let address: Rc<Cell<usize>> = Rc::default();
    let expected = Rc::clone(&address);
    function(&lua, "testShared", move |_, a: SharedRef<Account>| {
        assert_eq!(a.0.as_ptr() as usize, expected.get());
        assert_eq!(a.0.borrow().balance, 10);
        a.0.borrow_mut().balance = 11;
        Ok(())
    })
    .unwrap();
    let expected = Rc::clone(&address);
    function(&lua, "testRef", move |_, a: ObjectRef<Account>| {
        a.borrow_mut(|a| {
            assert_eq!(a as *mut Account as usize, expected.get());
            assert_eq!(a.balance, 11);
            a.balance = 12;
        })?;
        Ok(())
    })
    .unwrap();
    let expected = Rc::clone(&address);
    function(&lua, "testCopy", move |_, a: Owned<Account>| {
        assert_ne!(&a.0 as *const Account as usize, expected.get());
        assert_eq!(a.0.balance, 12);
        Ok(())
    })
    .unwrap();

    let value: Value = eval(&lua, "a = Account:makeSharedWithInt(10) return a");
    let shared = SharedRef::<Account>::from_script(&lua, value, 1).unwrap();
    address.set(shared.0.as_ptr() as usize);
    assert_eq!(Rc::strong_count(&shared.0), 2);

    let live = live_accounts();
    run(&lua, "testShared(a) testRef(a) testCopy(a)");
    assert_eq!(live_accounts(), live);
    assert_eq!(shared.0.borrow().balance, 12);

    run(&lua, "a = nil");
    collect(&lua);
    assert_eq!(Rc::strong_count(&shared.0), 1);

    let before = live_accounts();
    drop(shared);
    assert_eq!(live_accounts(), before - 1);
}

#[test]
fn test_shared_destroyed_after_last_reference() {
    let lua = lua();
    bind_accounts(&lua).unwrap();
    let base = live_accounts();

    run(&lua, "s = Account:makeShared() t = s");
    assert_eq!(live_accounts(), base + 1);

    run(&lua, "s = nil");
    collect(&lua);
    assert_eq!(live_accounts(), base + 1);

    run(&lua, "t = nil");
    collect(&lua);
    assert_eq!(live_accounts(), base);
}

// =============================================================================
// Host-owned
// =============================================================================

struct Node {
    me: Weak<RefCell<Node>>,
    value: i64,
}

impl Object for Node {
    fn shared_self(&self) -> Option<SharedObject> {
        self.me.upgrade().map(SharedObject::new)
    }
}

fn bind_node(lua: &mlua::Lua) {
    Class::<Node>::register(lua, "Node")
        .unwrap()
        .property("value", |n: &Node| n.value, |n: &mut Node, v: i64| n.value = v)
        .unwrap();
}

#[test]
fn test_host_owned_is_never_freed() {
    let lua = lua();
    bind_node(&lua);

    let mut node = Node {
        me: Weak::new(),
        value: 1,
    };
    let ud = unsafe { push_host::<Node, Node>(&lua, NonNull::from(&mut node)) }.unwrap();
    assert_eq!(handle_ref(&ud).unwrap().lifetime(), Lifetime::Host);
    lua.globals().set("n", ud.clone()).unwrap();

    run(&lua, "n.value = 5 n:delete() n = nil");
    drop(ud);
    collect(&lua);

    // The bridge forgot the object but never dropped it.
    assert_eq!(node.value, 5);
}

#[test]
fn test_host_owned_promotes_to_shared() {
    let lua = lua();
    bind_node(&lua);

    let node = Rc::new_cyclic(|me| {
        RefCell::new(Node {
            me: me.clone(),
            value: 3,
        })
    });
    let ptr = NonNull::new(node.as_ptr()).unwrap();
    let ud: AnyUserData = unsafe { push_host::<Node, Node>(&lua, ptr) }.unwrap();

    {
        let handle = handle_ref(&ud).unwrap();
        assert_eq!(handle.lifetime(), Lifetime::Shared);
        let shared = handle.shared().unwrap().unwrap();
        assert!(Rc::ptr_eq(&shared.downcast::<Node>().unwrap(), &node));
    }
    assert_eq!(Rc::strong_count(&node), 2);

    lua.globals().set("n", ud).unwrap();
    run(&lua, "n.value = 9 n = nil");
    collect(&lua);
    assert_eq!(Rc::strong_count(&node), 1);
    assert_eq!(node.borrow().value, 9);
}

#[test]
fn test_owned_argument_copies_out() {
    let lua = lua();
    bind_accounts(&lua).unwrap();
    let kept: Rc<RefCell<Vec<Account>>> = Rc::default();
    let sink = Rc::clone(&kept);
    function(&lua, "keep", move |_, account: Owned<Account>| {
        sink.borrow_mut().push(account.0);
        Ok(())
    })
    .unwrap();

    run(&lua, "a = Account:newWithInt(4) keep(a) a.balance = 8");
    assert_eq!(kept.borrow()[0].balance, 4);
    let balance: i64 = eval(&lua, "return a.balance");
    assert_eq!(balance, 8);
}
