use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::{
    diagnostics::{BridgeError, BridgeResult},
    proxy::LuaProxy,
    state::{LuaState, StateRef},
    value::{ForeignCell, LuaValue},
};

/// A value as seen from the host side of the bridge.
///
/// `Tuple` only ever travels host-ward (a multi-return crossing the
/// boundary); pushing one back into Lua is a conversion error. `Opaque`
/// carries a host object through Lua untouched.
pub enum HostValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// A Lua string that was not valid UTF-8.
    Bytes(Vec<u8>),
    Tuple(Vec<HostValue>),
    Opaque(Rc<dyn Any>),
    Proxy(LuaProxy),
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::None => write!(f, "None"),
            HostValue::Bool(b) => write!(f, "Bool({b})"),
            HostValue::Int(i) => write!(f, "Int({i})"),
            HostValue::Float(x) => write!(f, "Float({x})"),
            HostValue::Text(s) => write!(f, "Text({s:?})"),
            HostValue::Bytes(b) => write!(f, "Bytes({b:?})"),
            HostValue::Tuple(items) => f.debug_tuple("Tuple").field(items).finish(),
            HostValue::Opaque(rc) => write!(f, "Opaque({:p})", Rc::as_ptr(rc)),
            HostValue::Proxy(_) => write!(f, "Proxy"),
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::None => write!(f, "nil"),
            HostValue::Bool(b) => write!(f, "{b}"),
            HostValue::Int(i) => write!(f, "{i}"),
            HostValue::Float(x) => write!(f, "{x}"),
            HostValue::Text(s) => write!(f, "{s}"),
            HostValue::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            HostValue::Tuple(items) => {
                let mut first = true;
                for item in items {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            HostValue::Opaque(rc) => write!(f, "<host object at {:p}>", Rc::as_ptr(rc)),
            HostValue::Proxy(proxy) => write!(f, "{}", proxy.to_text()),
        }
    }
}

impl HostValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            HostValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            HostValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, HostValue::None)
    }
}

/// Converts the stack slot at `slot` into a host value.
///
/// Scalars copy across; strings come out as `Text` when UTF-8 and
/// `Bytes` otherwise; numbers with an exact integer value become `Int`.
/// Host objects round-trip out of their wrapper. Tables and functions
/// are moved into the registry behind a proxy; for any other kind the
/// slot is left in place.
pub fn to_host(state: &StateRef, locked: &mut LuaState, slot: i32) -> HostValue {
    let value = locked.peek(slot);
    match value {
        LuaValue::Nil => HostValue::None,
        LuaValue::Boolean(b) => HostValue::Bool(b),
        LuaValue::Number(n) => {
            if n.fract() == 0.0 && (n as i64 as f64) == n {
                HostValue::Int(n as i64)
            } else {
                HostValue::Float(n)
            }
        }
        LuaValue::Str(s) => match std::str::from_utf8(s.as_bytes()) {
            Ok(text) => HostValue::Text(text.to_string()),
            Err(_) => HostValue::Bytes(s.as_bytes().to_vec()),
        },
        LuaValue::Foreign(cell) => HostValue::Opaque(Rc::clone(&cell.object)),
        LuaValue::Table(_) | LuaValue::Function(_) | LuaValue::Native(_) => {
            let key = locked.register(slot);
            HostValue::Proxy(LuaProxy::new(Rc::clone(state), key))
        }
    }
}

/// Pushes a host value onto the Lua stack. On failure nothing is pushed.
pub fn push_host(
    state: &StateRef,
    locked: &mut LuaState,
    value: &HostValue,
) -> BridgeResult<()> {
    match value {
        HostValue::None => locked.push(LuaValue::Nil),
        HostValue::Bool(b) => locked.push(LuaValue::Boolean(*b)),
        HostValue::Int(i) => locked.push(LuaValue::Number(*i as f64)),
        HostValue::Float(x) => locked.push(LuaValue::Number(*x)),
        HostValue::Text(s) => locked.push(LuaValue::string(s)),
        HostValue::Bytes(b) => locked.push(LuaValue::bytes(b.clone())),
        HostValue::Opaque(rc) => locked.push(LuaValue::Foreign(Rc::new(ForeignCell {
            object: Rc::clone(rc),
        }))),
        HostValue::Proxy(proxy) => {
            // A proxy can only re-enter the state it came from.
            if !Rc::ptr_eq(proxy.state(), state) {
                return Err(BridgeError::Conversion);
            }
            locked.fetch(proxy.key())?;
        }
        HostValue::Tuple(_) => return Err(BridgeError::Conversion),
    }
    Ok(())
}
