use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::{
    ast::Stmt,
    diagnostics::{Diagnostic, Result},
    environment::EnvironmentRef,
    runtime::Interpreter,
};

/// A Lua byte string. Not required to be valid UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LuaStr(pub Vec<u8>);

impl LuaStr {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for LuaStr {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl fmt::Display for LuaStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// An interpreted Lua function closing over its defining environment.
#[derive(Debug)]
pub struct LuaFunction {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub env: EnvironmentRef,
}

/// A function implemented in Rust and installed as a Lua global.
pub struct NativeFunction {
    pub name: &'static str,
    pub callback: fn(&mut Interpreter, &[LuaValue]) -> Result<Vec<LuaValue>>,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// Host object carried through Lua opaquely. The Lua side can store and
/// pass these around but cannot inspect them.
pub struct ForeignCell {
    pub object: Rc<dyn Any>,
}

impl fmt::Debug for ForeignCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignCell({:p})", Rc::as_ptr(&self.object))
    }
}

#[derive(Debug, Clone)]
pub enum LuaValue {
    Nil,
    Boolean(bool),
    Number(f64),
    Str(Rc<LuaStr>),
    Table(Rc<RefCell<LuaTable>>),
    Function(Rc<LuaFunction>),
    Native(Rc<NativeFunction>),
    Foreign(Rc<ForeignCell>),
}

impl LuaValue {
    pub fn string(text: &str) -> Self {
        LuaValue::Str(Rc::new(LuaStr::from(text)))
    }

    pub fn bytes(bytes: Vec<u8>) -> Self {
        LuaValue::Str(Rc::new(LuaStr(bytes)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            LuaValue::Nil => "nil",
            LuaValue::Boolean(_) => "boolean",
            LuaValue::Number(_) => "number",
            LuaValue::Str(_) => "string",
            LuaValue::Table(_) => "table",
            LuaValue::Function(_) | LuaValue::Native(_) => "function",
            LuaValue::Foreign(_) => "userdata",
        }
    }

    /// Lua truthiness: only `nil` and `false` are falsey.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    /// Raw equality, without metamethods. Numbers and strings compare by
    /// value, reference types by identity.
    pub fn raw_equals(&self, other: &LuaValue) -> bool {
        match (self, other) {
            (LuaValue::Nil, LuaValue::Nil) => true,
            (LuaValue::Boolean(a), LuaValue::Boolean(b)) => a == b,
            (LuaValue::Number(a), LuaValue::Number(b)) => a == b,
            (LuaValue::Str(a), LuaValue::Str(b)) => a == b,
            (LuaValue::Table(a), LuaValue::Table(b)) => Rc::ptr_eq(a, b),
            (LuaValue::Function(a), LuaValue::Function(b)) => Rc::ptr_eq(a, b),
            (LuaValue::Native(a), LuaValue::Native(b)) => Rc::ptr_eq(a, b),
            (LuaValue::Foreign(a), LuaValue::Foreign(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Stable address used for default textual rendering of reference
    /// values.
    pub fn address(&self) -> Option<usize> {
        match self {
            LuaValue::Table(rc) => Some(Rc::as_ptr(rc) as usize),
            LuaValue::Function(rc) => Some(Rc::as_ptr(rc) as *const u8 as usize),
            LuaValue::Native(rc) => Some(Rc::as_ptr(rc) as *const u8 as usize),
            LuaValue::Foreign(rc) => Some(Rc::as_ptr(rc) as *const u8 as usize),
            _ => None,
        }
    }
}

impl fmt::Display for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaValue::Nil => write!(f, "nil"),
            LuaValue::Boolean(b) => write!(f, "{b}"),
            LuaValue::Number(n) => write!(f, "{}", format_number(*n)),
            LuaValue::Str(s) => write!(f, "{s}"),
            other => match other.address() {
                Some(addr) => write!(f, "<lua {} at {addr:#x}>", other.type_name()),
                None => write!(f, "<lua {}>", other.type_name()),
            },
        }
    }
}

/// Integral finite numbers render without a trailing `.0`.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Normalized table key. Number keys with no fractional part collapse to
/// `Int`, so `t[1]` and `t[1.0]` address the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LuaKey {
    Boolean(bool),
    Int(i64),
    /// Non-integral number, stored as raw bits.
    Float(u64),
    Str(Rc<LuaStr>),
    /// Reference value keyed by identity.
    Ref(RefKey),
}

/// Pins a reference value for use as a table key. Hashing and equality go
/// through the pointer, matching Lua's identity semantics.
#[derive(Debug, Clone)]
pub struct RefKey(pub LuaValue);

impl PartialEq for RefKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.raw_equals(&other.0)
    }
}

impl Eq for RefKey {}

impl Hash for RefKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.0.address() {
            Some(addr) => addr.hash(state),
            None => 0usize.hash(state),
        }
    }
}

impl LuaKey {
    /// Builds a key from a value, normalizing integral numbers.
    pub fn from_value(value: &LuaValue) -> std::result::Result<Self, Diagnostic> {
        match value {
            LuaValue::Nil => Err(Diagnostic::runtime("table index is nil")),
            LuaValue::Boolean(b) => Ok(LuaKey::Boolean(*b)),
            LuaValue::Number(n) => {
                if n.is_nan() {
                    return Err(Diagnostic::runtime("table index is NaN"));
                }
                if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                    Ok(LuaKey::Int(*n as i64))
                } else {
                    Ok(LuaKey::Float(n.to_bits()))
                }
            }
            LuaValue::Str(s) => Ok(LuaKey::Str(Rc::clone(s))),
            other => Ok(LuaKey::Ref(RefKey(other.clone()))),
        }
    }

    pub fn to_value(&self) -> LuaValue {
        match self {
            LuaKey::Boolean(b) => LuaValue::Boolean(*b),
            LuaKey::Int(i) => LuaValue::Number(*i as f64),
            LuaKey::Float(bits) => LuaValue::Number(f64::from_bits(*bits)),
            LuaKey::Str(s) => LuaValue::Str(Rc::clone(s)),
            LuaKey::Ref(r) => r.0.clone(),
        }
    }
}

/// A Lua table: an insertion-ordered map plus an optional metatable.
#[derive(Debug, Default)]
pub struct LuaTable {
    pub entries: IndexMap<LuaKey, LuaValue>,
    pub metatable: Option<Rc<RefCell<LuaTable>>>,
}

impl LuaTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &LuaKey) -> LuaValue {
        self.entries.get(key).cloned().unwrap_or(LuaValue::Nil)
    }

    /// Assigning nil removes the entry, so iteration never yields nils.
    pub fn set(&mut self, key: LuaKey, value: LuaValue) {
        if matches!(value, LuaValue::Nil) {
            self.entries.shift_remove(&key);
        } else {
            self.entries.insert(key, value);
        }
    }

    /// Border length: the count of consecutive integer keys from 1.
    pub fn length(&self) -> i64 {
        let mut len = 0i64;
        while self.entries.contains_key(&LuaKey::Int(len + 1)) {
            len += 1;
        }
        len
    }

    /// Insertion-order traversal step. `None` input starts the walk; the
    /// result is `None` once the table is exhausted.
    pub fn next_after(
        &self,
        key: Option<&LuaKey>,
    ) -> std::result::Result<Option<(LuaKey, LuaValue)>, Diagnostic> {
        let index = match key {
            None => 0,
            Some(key) => match self.entries.get_index_of(key) {
                Some(idx) => idx + 1,
                None => return Err(Diagnostic::runtime("invalid key to 'next'")),
            },
        };
        Ok(self
            .entries
            .get_index(index)
            .map(|(k, v)| (k.clone(), v.clone())))
    }
}
