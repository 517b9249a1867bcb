use std::cell::RefCell;
use std::rc::Rc;

use crate::{
    diagnostics::{Diagnostic, Result},
    runtime::{coerce_number, Interpreter},
    value::{LuaKey, LuaTable, LuaValue, NativeFunction},
};

/// Installs the base library into an interpreter's globals.
pub fn install(interp: &mut Interpreter) {
    let natives: &[NativeFunction] = &[
        NativeFunction {
            name: "print",
            callback: lua_print,
        },
        NativeFunction {
            name: "type",
            callback: lua_type,
        },
        NativeFunction {
            name: "tostring",
            callback: lua_tostring,
        },
        NativeFunction {
            name: "tonumber",
            callback: lua_tonumber,
        },
        NativeFunction {
            name: "error",
            callback: lua_error,
        },
        NativeFunction {
            name: "assert",
            callback: lua_assert,
        },
        NativeFunction {
            name: "next",
            callback: lua_next,
        },
        NativeFunction {
            name: "setmetatable",
            callback: lua_setmetatable,
        },
        NativeFunction {
            name: "getmetatable",
            callback: lua_getmetatable,
        },
        NativeFunction {
            name: "require",
            callback: lua_require,
        },
    ];
    for native in natives {
        interp.set_global(
            native.name,
            LuaValue::Native(Rc::new(NativeFunction {
                name: native.name,
                callback: native.callback,
            })),
        );
    }
}

fn lua_print(interp: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        parts.push(interp.tostring_value(arg)?);
    }
    println!("{}", parts.join("\t"));
    Ok(Vec::new())
}

fn lua_type(_: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    let value = args.first().cloned().unwrap_or(LuaValue::Nil);
    Ok(vec![LuaValue::string(value.type_name())])
}

fn lua_tostring(interp: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    let value = args.first().cloned().unwrap_or(LuaValue::Nil);
    let text = interp.tostring_value(&value)?;
    Ok(vec![LuaValue::string(&text)])
}

fn lua_tonumber(_: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    let value = args.first().cloned().unwrap_or(LuaValue::Nil);
    Ok(vec![match coerce_number(&value) {
        Some(n) => LuaValue::Number(n),
        None => LuaValue::Nil,
    }])
}

fn lua_error(interp: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    let value = args.first().cloned().unwrap_or(LuaValue::Nil);
    let message = interp.tostring_value(&value)?;
    Err(Diagnostic::runtime(message).into())
}

fn lua_assert(interp: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    let value = args.first().cloned().unwrap_or(LuaValue::Nil);
    if value.is_truthy() {
        return Ok(args.to_vec());
    }
    let message = match args.get(1) {
        Some(message) => interp.tostring_value(message)?,
        None => "assertion failed!".to_string(),
    };
    Err(Diagnostic::runtime(message).into())
}

fn lua_next(_: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    let table = match args.first() {
        Some(LuaValue::Table(table)) => Rc::clone(table),
        other => {
            return Err(Diagnostic::runtime(format!(
                "bad argument #1 to 'next' (table expected, got {})",
                other.map(LuaValue::type_name).unwrap_or("no value")
            ))
            .into())
        }
    };
    let key = match args.get(1) {
        None | Some(LuaValue::Nil) => None,
        Some(value) => Some(LuaKey::from_value(value)?),
    };
    let next = table.borrow().next_after(key.as_ref())?;
    match next {
        Some((key, value)) => Ok(vec![key.to_value(), value]),
        None => Ok(vec![LuaValue::Nil]),
    }
}

fn lua_setmetatable(_: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    let table = match args.first() {
        Some(LuaValue::Table(table)) => Rc::clone(table),
        _ => {
            return Err(Diagnostic::runtime(
                "bad argument #1 to 'setmetatable' (table expected)",
            )
            .into())
        }
    };
    match args.get(1) {
        Some(LuaValue::Table(meta)) => {
            table.borrow_mut().metatable = Some(Rc::clone(meta));
        }
        Some(LuaValue::Nil) | None => {
            table.borrow_mut().metatable = None;
        }
        _ => {
            return Err(Diagnostic::runtime(
                "bad argument #2 to 'setmetatable' (nil or table expected)",
            )
            .into())
        }
    }
    Ok(vec![LuaValue::Table(table)])
}

fn lua_getmetatable(_: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    if let Some(LuaValue::Table(table)) = args.first() {
        if let Some(meta) = &table.borrow().metatable {
            return Ok(vec![LuaValue::Table(Rc::clone(meta))]);
        }
    }
    Ok(vec![LuaValue::Nil])
}

fn lua_require(interp: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    let name = match args.first() {
        Some(LuaValue::Str(s)) => String::from_utf8_lossy(s.as_bytes()).into_owned(),
        _ => {
            return Err(Diagnostic::runtime(
                "bad argument #1 to 'require' (string expected)",
            )
            .into())
        }
    };
    if let Some(module) = interp.loaded.get(&name) {
        return Ok(vec![module.clone()]);
    }
    let module = builtin_module(&name)
        .ok_or_else(|| Diagnostic::runtime(format!("module '{name}' not found")))?;
    interp.loaded.insert(name, module.clone());
    Ok(vec![module])
}

/// Preloaded library modules handed out by `require`.
fn builtin_module(name: &str) -> Option<LuaValue> {
    match name {
        "string" => Some(module_table(&[
            ("upper", string_upper),
            ("lower", string_lower),
            ("len", string_len),
            ("sub", string_sub),
            ("rep", string_rep),
        ])),
        "math" => {
            let module = module_table(&[
                ("floor", math_floor),
                ("ceil", math_ceil),
                ("abs", math_abs),
                ("sqrt", math_sqrt),
                ("max", math_max),
                ("min", math_min),
            ]);
            if let LuaValue::Table(table) = &module {
                let mut table = table.borrow_mut();
                table.set(
                    LuaKey::Str(Rc::new("pi".into())),
                    LuaValue::Number(std::f64::consts::PI),
                );
                table.set(
                    LuaKey::Str(Rc::new("huge".into())),
                    LuaValue::Number(f64::INFINITY),
                );
            }
            Some(module)
        }
        _ => None,
    }
}

fn module_table(
    entries: &[(&'static str, fn(&mut Interpreter, &[LuaValue]) -> Result<Vec<LuaValue>>)],
) -> LuaValue {
    let table = Rc::new(RefCell::new(LuaTable::new()));
    {
        let mut table = table.borrow_mut();
        for (name, callback) in entries {
            table.set(
                LuaKey::Str(Rc::new((*name).into())),
                LuaValue::Native(Rc::new(NativeFunction {
                    name,
                    callback: *callback,
                })),
            );
        }
    }
    LuaValue::Table(table)
}

fn string_arg(args: &[LuaValue], index: usize, who: &str) -> Result<Vec<u8>> {
    match args.get(index) {
        Some(LuaValue::Str(s)) => Ok(s.as_bytes().to_vec()),
        Some(LuaValue::Number(n)) => Ok(crate::value::format_number(*n).into_bytes()),
        other => Err(Diagnostic::runtime(format!(
            "bad argument #{} to '{who}' (string expected, got {})",
            index + 1,
            other.map(LuaValue::type_name).unwrap_or("no value")
        ))
        .into()),
    }
}

fn number_arg(args: &[LuaValue], index: usize, who: &str) -> Result<f64> {
    args.get(index).and_then(coerce_number).ok_or_else(|| {
        Diagnostic::runtime(format!(
            "bad argument #{} to '{who}' (number expected)",
            index + 1
        ))
        .into()
    })
}

fn string_upper(_: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    let bytes = string_arg(args, 0, "upper")?;
    Ok(vec![LuaValue::bytes(
        bytes.iter().map(|b| b.to_ascii_uppercase()).collect(),
    )])
}

fn string_lower(_: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    let bytes = string_arg(args, 0, "lower")?;
    Ok(vec![LuaValue::bytes(
        bytes.iter().map(|b| b.to_ascii_lowercase()).collect(),
    )])
}

fn string_len(_: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    let bytes = string_arg(args, 0, "len")?;
    Ok(vec![LuaValue::Number(bytes.len() as f64)])
}

fn string_sub(_: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    let bytes = string_arg(args, 0, "sub")?;
    let len = bytes.len() as i64;
    let mut start = number_arg(args, 1, "sub")? as i64;
    let mut finish = match args.get(2) {
        Some(value) => coerce_number(value).map(|n| n as i64).unwrap_or(-1),
        None => -1,
    };
    // Negative positions count from the end of the string.
    if start < 0 {
        start = (len + start + 1).max(1);
    } else if start == 0 {
        start = 1;
    }
    if finish < 0 {
        finish = len + finish + 1;
    } else if finish > len {
        finish = len;
    }
    if start > finish {
        return Ok(vec![LuaValue::bytes(Vec::new())]);
    }
    let slice = bytes[(start - 1) as usize..finish as usize].to_vec();
    Ok(vec![LuaValue::bytes(slice)])
}

fn string_rep(_: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    let bytes = string_arg(args, 0, "rep")?;
    let count = number_arg(args, 1, "rep")? as i64;
    let mut out = Vec::new();
    for _ in 0..count.max(0) {
        out.extend_from_slice(&bytes);
    }
    Ok(vec![LuaValue::bytes(out)])
}

fn math_floor(_: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    Ok(vec![LuaValue::Number(number_arg(args, 0, "floor")?.floor())])
}

fn math_ceil(_: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    Ok(vec![LuaValue::Number(number_arg(args, 0, "ceil")?.ceil())])
}

fn math_abs(_: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    Ok(vec![LuaValue::Number(number_arg(args, 0, "abs")?.abs())])
}

fn math_sqrt(_: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    Ok(vec![LuaValue::Number(number_arg(args, 0, "sqrt")?.sqrt())])
}

fn math_max(_: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    let mut best = number_arg(args, 0, "max")?;
    for index in 1..args.len() {
        best = best.max(number_arg(args, index, "max")?);
    }
    Ok(vec![LuaValue::Number(best)])
}

fn math_min(_: &mut Interpreter, args: &[LuaValue]) -> Result<Vec<LuaValue>> {
    let mut best = number_arg(args, 0, "min")?;
    for index in 1..args.len() {
        best = best.min(number_arg(args, index, "min")?);
    }
    Ok(vec![LuaValue::Number(best)])
}
