use std::any::Any;
use std::rc::Rc;

use lunaria::{BridgeError, CmpOp, HostValue, Lua, LuaProxy, RunMode};

fn global_proxy(lua: &Lua, name: &str) -> LuaProxy {
    match lua.globals().get(&HostValue::Text(name.into())).unwrap() {
        HostValue::Proxy(proxy) => proxy,
        other => panic!("expected proxy for global `{name}`, got {other:?}"),
    }
}

#[test]
fn primitives_round_trip() {
    let lua = Lua::open();
    let globals = lua.globals();
    let key = HostValue::Text("v".into());

    globals.set(&key, &HostValue::Bool(true)).unwrap();
    assert!(matches!(globals.get(&key).unwrap(), HostValue::Bool(true)));

    globals.set(&key, &HostValue::Int(-7)).unwrap();
    assert_eq!(globals.get(&key).unwrap().as_int(), Some(-7));

    globals.set(&key, &HostValue::Float(2.5)).unwrap();
    assert!(matches!(globals.get(&key).unwrap(), HostValue::Float(x) if x == 2.5));

    globals.set(&key, &HostValue::Text("héllo".into())).unwrap();
    assert_eq!(globals.get(&key).unwrap().as_text(), Some("héllo"));

    // a float carrying an exact integer comes back as an integer
    globals.set(&key, &HostValue::Float(3.0)).unwrap();
    assert_eq!(globals.get(&key).unwrap().as_int(), Some(3));
}

#[test]
fn invalid_utf8_round_trips_as_bytes() {
    let lua = Lua::open();
    let globals = lua.globals();
    let key = HostValue::Text("blob".into());

    let payload = vec![0xff, 0x00, 0x61];
    globals.set(&key, &HostValue::Bytes(payload.clone())).unwrap();
    match globals.get(&key).unwrap() {
        HostValue::Bytes(bytes) => assert_eq!(bytes, payload),
        other => panic!("expected bytes, got {other:?}"),
    }

    // a byte string born on the Lua side converts the same way
    lua.execute("raw = '\\255\\000a'").unwrap();
    match globals.get(&HostValue::Text("raw".into())).unwrap() {
        HostValue::Bytes(bytes) => assert_eq!(bytes, payload),
        other => panic!("expected bytes, got {other:?}"),
    }
}

#[test]
fn set_then_get_then_delete() {
    let lua = Lua::open();
    lua.execute("t = {}").unwrap();
    let t = global_proxy(&lua, "t");
    let key = HostValue::Text("slot".into());

    t.set(&key, &HostValue::Int(11)).unwrap();
    assert_eq!(t.get(&key).unwrap().as_int(), Some(11));

    t.set(&key, &HostValue::None).unwrap();
    assert!(t.get(&key).unwrap().is_none());
}

#[test]
fn opaque_host_objects_round_trip_by_identity() {
    let lua = Lua::open();
    let globals = lua.globals();
    let key = HostValue::Text("payload".into());

    let object: Rc<dyn Any> = Rc::new(String::from("cargo"));
    globals.set(&key, &HostValue::Opaque(Rc::clone(&object))).unwrap();
    assert_eq!(lua.eval("type(payload)").unwrap().as_text(), Some("userdata"));
    match globals.get(&key).unwrap() {
        HostValue::Opaque(back) => assert!(Rc::ptr_eq(&back, &object)),
        other => panic!("expected opaque, got {other:?}"),
    }
}

#[test]
fn eval_and_execute() {
    let lua = Lua::open();
    assert_eq!(lua.eval("1+1").unwrap().as_int(), Some(2));
    assert_eq!(lua.run("1+1", RunMode::Evaluate).unwrap().as_int(), Some(2));
    assert!(lua.execute("x = 1").unwrap().is_none());

    let error = lua.execute("error('boom')").unwrap_err();
    match &error {
        BridgeError::Execution(message) => assert!(message.contains("boom")),
        other => panic!("expected execution error, got {other:?}"),
    }
}

#[test]
fn globals_scenario() {
    let lua = Lua::open();
    lua.execute("x = {1,2,3}").unwrap();
    let mut x = global_proxy(&lua, "x");
    assert_eq!(x.length().unwrap(), 3);
    let values: Vec<i64> = x
        .iter()
        .map(|item| item.unwrap().as_int().unwrap())
        .collect();
    assert_eq!(values, vec![1, 2, 3]);
}

#[test]
fn iteration_follows_insertion_order_and_exhausts() {
    let lua = Lua::open();
    lua.execute("t = {10, 20} t.extra = 30").unwrap();
    let mut t = global_proxy(&lua, "t");

    let mut iter = t.iter();
    let first: Vec<i64> = iter
        .by_ref()
        .map(|item| item.unwrap().as_int().unwrap())
        .collect();
    assert_eq!(first, vec![10, 20, 30]);

    // an exhausted iterator stays exhausted
    assert!(iter.next().is_none());
}

#[test]
fn iteration_resumes_after_dropping_the_iterator() {
    let lua = Lua::open();
    lua.execute("t = {1, 2, 3}").unwrap();
    let mut t = global_proxy(&lua, "t");

    let first = {
        let mut iter = t.iter();
        iter.next().unwrap().unwrap().as_int().unwrap()
    };
    assert_eq!(first, 1);

    // the cursor persists on the proxy, so a new iterator continues
    let rest: Vec<i64> = t
        .iter()
        .map(|item| item.unwrap().as_int().unwrap())
        .collect();
    assert_eq!(rest, vec![2, 3]);
}

#[test]
fn invoke_result_arity_contract() {
    let lua = Lua::open();
    lua.execute(
        "function none() end function one() return 7 end function three() return 1, 'two', 3 end",
    )
    .unwrap();

    assert!(global_proxy(&lua, "none").call(&[]).unwrap().is_none());
    assert_eq!(global_proxy(&lua, "one").call(&[]).unwrap().as_int(), Some(7));
    match global_proxy(&lua, "three").call(&[]).unwrap() {
        HostValue::Tuple(items) => {
            assert_eq!(items.len(), 3);
            assert_eq!(items[0].as_int(), Some(1));
            assert_eq!(items[1].as_text(), Some("two"));
            assert_eq!(items[2].as_int(), Some(3));
        }
        other => panic!("expected tuple, got {other:?}"),
    }
}

#[test]
fn invoke_with_arguments() {
    let lua = Lua::open();
    lua.execute("function add(a, b) return a + b end").unwrap();
    let add = global_proxy(&lua, "add");
    let sum = add.call(&[HostValue::Int(2), HostValue::Int(40)]).unwrap();
    assert_eq!(sum.as_int(), Some(42));
}

#[test]
fn unconvertible_arguments_report_their_position() {
    let lua = Lua::open();
    lua.execute("function id(v) return v end").unwrap();
    let id = global_proxy(&lua, "id");
    let error = id
        .call(&[HostValue::Int(1), HostValue::Tuple(vec![])])
        .unwrap_err();
    assert!(matches!(error, BridgeError::ArgumentConversion(2)));
}

#[test]
fn wrong_kind_operations_fail_cleanly() {
    let lua = Lua::open();
    lua.execute("t = {} function f() end").unwrap();
    let t = global_proxy(&lua, "t");
    let f = global_proxy(&lua, "f");
    let key = HostValue::Text("k".into());

    assert!(matches!(t.call(&[]).unwrap_err(), BridgeError::NotCallable));
    assert!(matches!(f.get(&key).unwrap_err(), BridgeError::NotIndexable));
    assert!(matches!(
        f.set(&key, &HostValue::Int(1)).unwrap_err(),
        BridgeError::NotMutable
    ));

    // a failed operation must not poison later ones
    t.set(&key, &HostValue::Int(5)).unwrap();
    assert_eq!(t.get(&key).unwrap().as_int(), Some(5));
}

#[test]
fn tuples_do_not_cross_into_lua() {
    let lua = Lua::open();
    let globals = lua.globals();
    let error = globals
        .set(&HostValue::Text("t".into()), &HostValue::Tuple(vec![]))
        .unwrap_err();
    assert!(matches!(error, BridgeError::ValueConversion));
}

#[test]
fn proxy_comparisons() {
    let lua = Lua::open();
    lua.execute("t = {} u = {}").unwrap();
    let t1 = global_proxy(&lua, "t");
    let t2 = global_proxy(&lua, "t");
    let u = global_proxy(&lua, "u");

    // two proxies over the same table are equal
    assert!(t1
        .compare(&HostValue::Proxy(t2), CmpOp::Eq)
        .unwrap());
    let u = HostValue::Proxy(u);
    assert!(!t1.compare(&u, CmpOp::Eq).unwrap());
    assert!(t1.compare(&u, CmpOp::Ne).unwrap());

    // a non-proxy operand is "not equal", never an error
    assert!(!t1.compare(&HostValue::Int(3), CmpOp::Eq).unwrap());
    assert!(t1.compare(&HostValue::Int(3), CmpOp::Ne).unwrap());
    assert!(!t1.compare(&HostValue::Int(3), CmpOp::Lt).unwrap());

    // ordering tables has no meaning and surfaces the runtime's error
    assert!(matches!(
        t1.compare(&u, CmpOp::Lt).unwrap_err(),
        BridgeError::Execution(_)
    ));
}

#[test]
fn proxies_from_another_interpreter_do_not_cross() {
    let lua_a = Lua::open();
    let lua_b = Lua::open();
    lua_a.execute("t = {}").unwrap();
    let foreign = HostValue::Proxy(global_proxy(&lua_a, "t"));

    let error = lua_b
        .globals()
        .set(&HostValue::Text("t".into()), &foreign)
        .unwrap_err();
    assert!(matches!(error, BridgeError::ValueConversion));

    // and they never compare equal to anything over there
    lua_b.execute("t = {}").unwrap();
    let local = global_proxy(&lua_b, "t");
    assert!(!local.compare(&foreign, CmpOp::Eq).unwrap());
}

#[test]
fn to_text_uses_tostring_metamethod() {
    let lua = Lua::open();
    lua.execute("t = setmetatable({}, {__tostring = function() return 'custom' end}) u = {}")
        .unwrap();
    assert_eq!(global_proxy(&lua, "t").to_text(), "custom");
    let plain = global_proxy(&lua, "u").to_text();
    assert!(plain.starts_with("<lua table at 0x"), "got {plain}");
}

#[test]
fn dropping_proxies_releases_registry_roots() {
    let lua = Lua::open();
    lua.execute("t = {1, 2}").unwrap();
    assert_eq!(lua.registry_len(), 0);
    {
        let mut t = global_proxy(&lua, "t");
        assert_eq!(lua.registry_len(), 1);
        // a half-finished iteration pins a cursor root too
        let mut iter = t.iter();
        assert!(iter.next().is_some());
        drop(iter);
        assert_eq!(lua.registry_len(), 2);
    }
    // proxy drop releases both the value root and the cursor
    assert_eq!(lua.registry_len(), 0);
}

#[test]
fn try_clone_creates_an_independent_root() {
    let lua = Lua::open();
    lua.execute("t = {}").unwrap();
    let t = global_proxy(&lua, "t");
    let copy = HostValue::Proxy(t.try_clone().unwrap());
    assert_eq!(lua.registry_len(), 2);
    assert!(t.compare(&copy, CmpOp::Eq).unwrap());
    drop(t);
    assert_eq!(lua.registry_len(), 1);
    drop(copy);
    assert_eq!(lua.registry_len(), 0);
}

#[test]
fn proxies_keep_the_interpreter_alive_after_close() {
    let lua = Lua::open();
    lua.execute("t = {}").unwrap();
    let t = global_proxy(&lua, "t");
    lua.close();
    // the shared state stays valid for the surviving proxy
    t.set(&HostValue::Text("k".into()), &HostValue::Int(1)).unwrap();
    assert_eq!(t.get(&HostValue::Text("k".into())).unwrap().as_int(), Some(1));
}

#[test]
fn require_returns_module_proxies() {
    let lua = Lua::open();
    let module = match lua.require("string").unwrap() {
        HostValue::Proxy(proxy) => proxy,
        other => panic!("expected module proxy, got {other:?}"),
    };
    let upper = match module.get(&HostValue::Text("upper".into())).unwrap() {
        HostValue::Proxy(proxy) => proxy,
        other => panic!("expected function proxy, got {other:?}"),
    };
    let result = upper.call(&[HostValue::Text("abc".into())]).unwrap();
    assert_eq!(result.as_text(), Some("ABC"));

    let error = lua.require("nope").unwrap_err();
    assert!(error.to_string().contains("module 'nope' not found"));
}

#[test]
fn nested_tables_come_back_as_proxies() {
    let lua = Lua::open();
    lua.execute("t = {inner = {value = 9}}").unwrap();
    let t = global_proxy(&lua, "t");
    let inner = match t.get(&HostValue::Text("inner".into())).unwrap() {
        HostValue::Proxy(proxy) => proxy,
        other => panic!("expected proxy, got {other:?}"),
    };
    assert_eq!(
        inner.get(&HostValue::Text("value".into())).unwrap().as_int(),
        Some(9)
    );
}
