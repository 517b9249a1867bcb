use std::fmt;
use std::rc::Rc;

use crate::{
    bridge,
    convert::{push_host, to_host, HostValue},
    diagnostics::{BridgeError, BridgeResult},
    state::{with_stack_guard, CompareOp, RegistryKey, StateRef},
    value::LuaValue,
};

/// Comparison operators available on a proxy. The greater-than forms
/// are evaluated by swapping operands over the interpreter's `<`/`<=`
/// primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Host-side handle to a Lua value that has no host representation
/// (tables and functions).
///
/// The proxy owns a registry root keeping the value alive, plus a
/// transient cursor root while an iteration is in flight. Holding a
/// proxy also keeps the interpreter itself alive, so a proxy outliving
/// its [`crate::bridge::Lua`] handle remains usable.
///
/// Every operation fetches the rooted value, works on the interpreter's
/// value stack and leaves that stack empty again before returning, on
/// success and on failure alike.
pub struct LuaProxy {
    state: StateRef,
    value_ref: RegistryKey,
    iter_cursor: Option<RegistryKey>,
}

impl LuaProxy {
    pub(crate) fn new(state: StateRef, value_ref: RegistryKey) -> Self {
        Self {
            state,
            value_ref,
            iter_cursor: None,
        }
    }

    pub(crate) fn state(&self) -> &StateRef {
        &self.state
    }

    pub(crate) fn key(&self) -> &RegistryKey {
        &self.value_ref
    }

    /// Creates a second, independently-owned proxy to the same Lua value.
    pub fn try_clone(&self) -> BridgeResult<LuaProxy> {
        let key = with_stack_guard(&self.state, |locked| {
            locked.fetch(&self.value_ref)?;
            Ok(locked.register(-1))
        })?;
        Ok(LuaProxy::new(Rc::clone(&self.state), key))
    }

    /// Reads `self[key]`. The wrapped value must be indexable (a table,
    /// or a string under the byte-access convention).
    pub fn get(&self, key: &HostValue) -> BridgeResult<HostValue> {
        with_stack_guard(&self.state, |locked| {
            locked.fetch(&self.value_ref)?;
            match locked.type_of(-1) {
                "table" | "string" => {}
                _ => return Err(BridgeError::NotIndexable),
            }
            push_host(&self.state, locked, key).map_err(|error| match error {
                BridgeError::LostReference => error,
                _ => BridgeError::KeyConversion,
            })?;
            locked.index_get()?;
            Ok(to_host(&self.state, locked, -1))
        })
    }

    /// Writes `self[key] = value`. Only tables are mutable; passing
    /// [`HostValue::None`] deletes the key.
    pub fn set(&self, key: &HostValue, value: &HostValue) -> BridgeResult<()> {
        with_stack_guard(&self.state, |locked| {
            locked.fetch(&self.value_ref)?;
            if locked.type_of(-1) != "table" {
                return Err(BridgeError::NotMutable);
            }
            push_host(&self.state, locked, key).map_err(|error| match error {
                BridgeError::LostReference => error,
                _ => BridgeError::KeyConversion,
            })?;
            push_host(&self.state, locked, value).map_err(|error| match error {
                BridgeError::LostReference => error,
                _ => BridgeError::ValueConversion,
            })?;
            locked.index_set()
        })
    }

    /// Calls the wrapped value with the given arguments. Zero results
    /// come back as [`HostValue::None`], one as itself, several as a
    /// [`HostValue::Tuple`].
    pub fn call(&self, args: &[HostValue]) -> BridgeResult<HostValue> {
        with_stack_guard(&self.state, |locked| {
            locked.fetch(&self.value_ref)?;
            if locked.type_of(-1) != "function" {
                return Err(BridgeError::NotCallable);
            }
            bridge::push_args_and_call(&self.state, locked, args)
        })
    }

    /// Length of the wrapped value via the interpreter's `#` operator.
    pub fn length(&self) -> BridgeResult<i64> {
        with_stack_guard(&self.state, |locked| {
            locked.fetch(&self.value_ref)?;
            locked.length_of(-1)
        })
    }

    /// Compares against another host value with the interpreter's own
    /// comparison primitives. A non-proxy operand, or a proxy from a
    /// different interpreter, is defined as unequal and never an error.
    pub fn compare(&self, other: &HostValue, op: CmpOp) -> BridgeResult<bool> {
        let other = match other {
            HostValue::Proxy(proxy) if Rc::ptr_eq(&proxy.state, &self.state) => proxy,
            _ => return Ok(op == CmpOp::Ne),
        };
        with_stack_guard(&self.state, |locked| {
            // gt/ge swap operands and reuse lt/le.
            let (first, second, primitive) = match op {
                CmpOp::Eq | CmpOp::Ne => (self, other, CompareOp::Eq),
                CmpOp::Lt => (self, other, CompareOp::Lt),
                CmpOp::Le => (self, other, CompareOp::Le),
                CmpOp::Gt => (other, self, CompareOp::Lt),
                CmpOp::Ge => (other, self, CompareOp::Le),
            };
            locked.fetch(&first.value_ref)?;
            locked.fetch(&second.value_ref)?;
            let outcome = locked.compare(primitive)?;
            Ok(if op == CmpOp::Ne { !outcome } else { outcome })
        })
    }

    /// Single-pass iteration over the wrapped collection's values in
    /// the table's native enumeration order. The cursor lives on the
    /// proxy, so only one traversal can be in flight at a time; the
    /// mutable borrow makes a second concurrent one a compile error.
    /// An exhausted iterator stays exhausted.
    pub fn iter(&mut self) -> ProxyIter<'_> {
        ProxyIter {
            proxy: self,
            done: false,
        }
    }

    /// Text rendering via the value's `__tostring` metamethod when
    /// present, else a synthetic `<lua KIND at ADDRESS>` tag. Never
    /// fails; conversion problems fall back to the synthetic form.
    pub fn to_text(&self) -> String {
        let rendered = with_stack_guard(&self.state, |locked| {
            locked.fetch(&self.value_ref)?;
            locked.tostring_slot(-1)
        });
        match rendered {
            Ok(text) => text,
            Err(_) => {
                let fallback = with_stack_guard(&self.state, |locked| {
                    locked.fetch(&self.value_ref)?;
                    let value = locked.peek(-1);
                    Ok(match value.address() {
                        Some(addr) => format!("<lua {} at {addr:#x}>", value.type_name()),
                        None => format!("<lua {}>", value.type_name()),
                    })
                });
                fallback.unwrap_or_else(|_| "<lua lost reference>".to_string())
            }
        }
    }
}

impl fmt::Display for LuaProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_text())
    }
}

impl fmt::Debug for LuaProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LuaProxy({})", self.value_ref.raw())
    }
}

impl Drop for LuaProxy {
    fn drop(&mut self) {
        let mut state = self.state.borrow_mut();
        state.release_raw(self.value_ref.raw());
        if let Some(cursor) = self.iter_cursor.take() {
            state.release(cursor);
        }
    }
}

/// Lazy traversal handle produced by [`LuaProxy::iter`].
pub struct ProxyIter<'a> {
    proxy: &'a mut LuaProxy,
    done: bool,
}

impl ProxyIter<'_> {
    /// One `next`-style step: fetch the table, push the persisted
    /// cursor key (nil on the first step), advance, convert the value
    /// and persist the new key as the cursor.
    fn step(&mut self) -> BridgeResult<Option<HostValue>> {
        let state = Rc::clone(&self.proxy.state);
        with_stack_guard(&state, |locked| {
            locked.fetch(&self.proxy.value_ref)?;
            match &self.proxy.iter_cursor {
                Some(cursor) => locked.fetch(cursor)?,
                None => locked.push(LuaValue::Nil),
            }
            if locked.next_entry()? {
                // Stack holds table, key, value. The key is discarded
                // host-side but persisted as the new cursor.
                let value = to_host(&state, locked, -1);
                let next_cursor = locked.register(-2);
                if let Some(previous) = self.proxy.iter_cursor.take() {
                    locked.release(previous);
                }
                self.proxy.iter_cursor = Some(next_cursor);
                Ok(Some(value))
            } else {
                if let Some(previous) = self.proxy.iter_cursor.take() {
                    locked.release(previous);
                }
                Ok(None)
            }
        })
    }
}

impl Iterator for ProxyIter<'_> {
    type Item = BridgeResult<HostValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}
