use lunaria::{HostValue, Lua};

fn eval_int(lua: &Lua, source: &str) -> i64 {
    match lua.eval(source).unwrap() {
        HostValue::Int(i) => i,
        other => panic!("expected integer from `{source}`, got {other:?}"),
    }
}

fn eval_text(lua: &Lua, source: &str) -> String {
    match lua.eval(source).unwrap() {
        HostValue::Text(s) => s,
        other => panic!("expected text from `{source}`, got {other:?}"),
    }
}

fn eval_bool(lua: &Lua, source: &str) -> bool {
    match lua.eval(source).unwrap() {
        HostValue::Bool(b) => b,
        other => panic!("expected boolean from `{source}`, got {other:?}"),
    }
}

#[test]
fn arithmetic_and_precedence() {
    let lua = Lua::open();
    assert_eq!(eval_int(&lua, "1 + 1"), 2);
    assert_eq!(eval_int(&lua, "2 + 3 * 4"), 14);
    assert_eq!(eval_int(&lua, "(2 + 3) * 4"), 20);
    assert_eq!(eval_int(&lua, "10 % 3"), 1);
    assert_eq!(eval_int(&lua, "2 ^ 10"), 1024);
    assert_eq!(eval_int(&lua, "-2 ^ 2"), -4);
    match lua.eval("7 / 2").unwrap() {
        HostValue::Float(x) => assert_eq!(x, 3.5),
        other => panic!("expected float, got {other:?}"),
    }
}

#[test]
fn string_coercion_in_arithmetic() {
    let lua = Lua::open();
    assert_eq!(eval_int(&lua, "'10' + 5"), 15);
    assert_eq!(eval_int(&lua, "'2' * '3'"), 6);
}

#[test]
fn concatenation() {
    let lua = Lua::open();
    assert_eq!(eval_text(&lua, "'foo' .. 'bar'"), "foobar");
    assert_eq!(eval_text(&lua, "'n = ' .. 42"), "n = 42");
    assert_eq!(eval_text(&lua, "1 .. 2 .. 3"), "123");
}

#[test]
fn comparisons_and_logic() {
    let lua = Lua::open();
    assert!(eval_bool(&lua, "1 < 2"));
    assert!(eval_bool(&lua, "'abc' < 'abd'"));
    assert!(eval_bool(&lua, "2 >= 2"));
    assert!(eval_bool(&lua, "1 ~= 2"));
    assert!(eval_bool(&lua, "not nil"));
    // and/or return an operand, not a boolean
    assert_eq!(eval_int(&lua, "nil or 5"), 5);
    assert_eq!(eval_int(&lua, "1 and 2"), 2);
    assert!(!eval_bool(&lua, "false and 1"));
}

#[test]
fn comparing_mismatched_types_is_an_error() {
    let lua = Lua::open();
    let error = lua.eval("1 < 'x'").unwrap_err();
    assert!(error.to_string().contains("compare"));
}

#[test]
fn length_operator() {
    let lua = Lua::open();
    assert_eq!(eval_int(&lua, "#'hello'"), 5);
    assert_eq!(eval_int(&lua, "#{10, 20, 30}"), 3);
}

#[test]
fn globals_persist_across_chunks_but_locals_do_not() {
    let lua = Lua::open();
    lua.execute("answer = 42").unwrap();
    assert_eq!(eval_int(&lua, "answer"), 42);
    lua.execute("local hidden = 1").unwrap();
    assert!(lua.eval("hidden").unwrap().is_none());
}

#[test]
fn multiple_assignment() {
    let lua = Lua::open();
    lua.execute("a, b = 1, 2").unwrap();
    lua.execute("a, b = b, a").unwrap();
    assert_eq!(eval_int(&lua, "a"), 2);
    assert_eq!(eval_int(&lua, "b"), 1);
    // missing values pad with nil
    lua.execute("c, d = 7").unwrap();
    assert_eq!(eval_int(&lua, "c"), 7);
    assert!(lua.eval("d").unwrap().is_none());
}

#[test]
fn control_flow() {
    let lua = Lua::open();
    lua.execute(
        "if 1 > 2 then r = 'a' elseif 2 > 1 then r = 'b' else r = 'c' end",
    )
    .unwrap();
    assert_eq!(eval_text(&lua, "r"), "b");

    lua.execute("s = 0 local i = 1 while i <= 4 do s = s + i i = i + 1 end")
        .unwrap();
    assert_eq!(eval_int(&lua, "s"), 10);

    lua.execute("t = 0 for i = 1, 5 do t = t + i end").unwrap();
    assert_eq!(eval_int(&lua, "t"), 15);

    lua.execute("u = 0 for i = 10, 1, -3 do u = u + i end").unwrap();
    assert_eq!(eval_int(&lua, "u"), 22);

    lua.execute("v = 0 repeat v = v + 1 until v >= 3").unwrap();
    assert_eq!(eval_int(&lua, "v"), 3);

    lua.execute("w = 0 while true do w = w + 1 if w == 7 then break end end")
        .unwrap();
    assert_eq!(eval_int(&lua, "w"), 7);
}

#[test]
fn functions_and_recursion() {
    let lua = Lua::open();
    lua.execute("function fib(n) if n < 2 then return n end return fib(n-1) + fib(n-2) end")
        .unwrap();
    assert_eq!(eval_int(&lua, "fib(10)"), 55);
}

#[test]
fn closures_capture_upvalues() {
    let lua = Lua::open();
    lua.execute(
        "function make() local n = 0 return function() n = n + 1 return n end end counter = make()",
    )
    .unwrap();
    assert_eq!(eval_int(&lua, "counter()"), 1);
    assert_eq!(eval_int(&lua, "counter()"), 2);
}

#[test]
fn local_functions_can_recurse() {
    let lua = Lua::open();
    lua.execute(
        "local function fact(n) if n <= 1 then return 1 end return n * fact(n - 1) end r = fact(5)",
    )
    .unwrap();
    assert_eq!(eval_int(&lua, "r"), 120);
}

#[test]
fn tables_and_indexing() {
    let lua = Lua::open();
    lua.execute("t = {10, 20, x = 'why', [99] = 'niner'}").unwrap();
    assert_eq!(eval_int(&lua, "t[1]"), 10);
    assert_eq!(eval_int(&lua, "t[2]"), 20);
    assert_eq!(eval_text(&lua, "t.x"), "why");
    assert_eq!(eval_text(&lua, "t[99]"), "niner");
    // integral float keys address the same slot as integers
    assert_eq!(eval_int(&lua, "t[1.0]"), 10);
    // assigning nil deletes
    lua.execute("t.x = nil").unwrap();
    assert!(lua.eval("t.x").unwrap().is_none());
}

#[test]
fn nested_table_assignment() {
    let lua = Lua::open();
    lua.execute("t = {inner = {}} t.inner.value = 5").unwrap();
    assert_eq!(eval_int(&lua, "t.inner.value"), 5);
}

#[test]
fn base_library() {
    let lua = Lua::open();
    assert_eq!(eval_text(&lua, "type({})"), "table");
    assert_eq!(eval_text(&lua, "type('')"), "string");
    assert_eq!(eval_text(&lua, "type(print)"), "function");
    assert_eq!(eval_text(&lua, "tostring(12)"), "12");
    assert_eq!(eval_text(&lua, "tostring(nil)"), "nil");
    assert_eq!(eval_int(&lua, "tonumber('17')"), 17);
    assert!(lua.eval("tonumber('bogus')").unwrap().is_none());
    assert_eq!(eval_int(&lua, "assert(3)"), 3);
}

#[test]
fn error_and_assert_raise() {
    let lua = Lua::open();
    let error = lua.execute("error('boom')").unwrap_err();
    assert!(error.to_string().contains("boom"));
    let error = lua.execute("assert(false, 'sad')").unwrap_err();
    assert!(error.to_string().contains("sad"));
    let error = lua.execute("assert(nil)").unwrap_err();
    assert!(error.to_string().contains("assertion failed"));
}

#[test]
fn next_walks_insertion_order() {
    let lua = Lua::open();
    lua.execute("t = {} t.first = 1 t.second = 2 k1, v1 = next(t) k2, v2 = next(t, k1) k3 = next(t, k2)")
        .unwrap();
    assert_eq!(eval_text(&lua, "k1"), "first");
    assert_eq!(eval_int(&lua, "v1"), 1);
    assert_eq!(eval_text(&lua, "k2"), "second");
    assert_eq!(eval_int(&lua, "v2"), 2);
    assert!(lua.eval("k3").unwrap().is_none());
}

#[test]
fn metatable_tostring() {
    let lua = Lua::open();
    lua.execute("t = setmetatable({}, {__tostring = function() return 'custom' end})")
        .unwrap();
    assert_eq!(eval_text(&lua, "tostring(t)"), "custom");
    assert!(eval_bool(&lua, "getmetatable(t) ~= nil"));
}

#[test]
fn require_string_module() {
    let lua = Lua::open();
    assert_eq!(eval_text(&lua, "require('string').upper('abc')"), "ABC");
    assert_eq!(eval_text(&lua, "require('string').lower('ABC')"), "abc");
    assert_eq!(eval_int(&lua, "require('string').len('abcd')"), 4);
    assert_eq!(eval_text(&lua, "require('string').sub('hello', 2, 4)"), "ell");
    assert_eq!(eval_text(&lua, "require('string').sub('hello', -3)"), "llo");
    assert_eq!(eval_text(&lua, "require('string').rep('ab', 3)"), "ababab");
}

#[test]
fn require_math_module() {
    let lua = Lua::open();
    assert_eq!(eval_int(&lua, "require('math').floor(3.7)"), 3);
    assert_eq!(eval_int(&lua, "require('math').ceil(3.2)"), 4);
    assert_eq!(eval_int(&lua, "require('math').abs(-5)"), 5);
    assert_eq!(eval_int(&lua, "require('math').sqrt(49)"), 7);
    assert_eq!(eval_int(&lua, "require('math').max(1, 9, 4)"), 9);
    assert_eq!(eval_int(&lua, "require('math').min(1, 9, 4)"), 1);
}

#[test]
fn require_caches_modules() {
    let lua = Lua::open();
    assert!(eval_bool(
        &lua,
        "require('math') == require('math')"
    ));
}

#[test]
fn require_unknown_module_fails() {
    let lua = Lua::open();
    let error = lua.execute("require('nope')").unwrap_err();
    assert!(error.to_string().contains("module 'nope' not found"));
}

#[test]
fn multi_return_and_truncation() {
    let lua = Lua::open();
    lua.execute("function pair() return 1, 2 end").unwrap();
    // last call in a list expands
    lua.execute("a, b = pair()").unwrap();
    assert_eq!(eval_int(&lua, "a"), 1);
    assert_eq!(eval_int(&lua, "b"), 2);
    // in the middle of an expression it truncates to one value
    assert_eq!(eval_int(&lua, "pair() + 10"), 11);
    // table constructors expand a trailing call
    assert_eq!(eval_int(&lua, "#{pair()}"), 2);
}

#[test]
fn string_byte_indexing() {
    let lua = Lua::open();
    assert_eq!(eval_text(&lua, "('abc')[2]"), "b");
    assert!(lua.eval("('abc')[7]").unwrap().is_none());
}

#[test]
fn comments_are_skipped() {
    let lua = Lua::open();
    lua.execute("-- a line comment\nx = 1 --[[ a block\ncomment ]] + 2")
        .unwrap();
    assert_eq!(eval_int(&lua, "x"), 3);
}

#[test]
fn syntax_errors_surface_as_load_errors() {
    let lua = Lua::open();
    let error = lua.execute("local = 5").unwrap_err();
    assert!(error.to_string().contains("error loading code"));
    let error = lua.execute("if true then").unwrap_err();
    assert!(error.to_string().contains("error loading code"));
}

#[test]
fn indexing_non_tables_is_an_error() {
    let lua = Lua::open();
    let error = lua.eval("(5)[1]").unwrap_err();
    assert!(error.to_string().contains("attempt to index"));
    let error = lua.execute("x = nil x.y = 1").unwrap_err();
    assert!(error.to_string().contains("attempt to index"));
}

#[test]
fn engine_runs_chunks_directly() {
    use lunaria::{runtime::Interpreter, stdlib};
    let mut interp = Interpreter::new();
    stdlib::install(&mut interp);
    let values = interp.run_source("return 1 + 2, 'x'").unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values[0].to_string(), "3");
    assert_eq!(values[1].to_string(), "x");
}

#[test]
fn calling_non_functions_is_an_error() {
    let lua = Lua::open();
    let error = lua.eval("(42)()").unwrap_err();
    assert!(error.to_string().contains("attempt to call"));
}
