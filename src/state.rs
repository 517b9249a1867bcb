use std::cell::RefCell;
use std::rc::Rc;

use crate::{
    ast::Chunk,
    diagnostics::{BridgeError, BridgeResult, SourceSpan},
    parser,
    runtime::Interpreter,
    stdlib,
    value::{LuaFunction, LuaKey, LuaValue},
};

pub type StateRef = Rc<RefCell<LuaState>>;

/// Owned handle into the registry. Not cloneable, so a slot can only be
/// released once; dropping the key without releasing leaks the slot,
/// which proxy destructors avoid by releasing explicitly.
#[derive(Debug)]
pub struct RegistryKey(u32);

impl RegistryKey {
    pub(crate) fn raw(&self) -> u32 {
        self.0
    }
}

/// Comparison requested through the bridge. `Eq` and the two "less"
/// forms are primitive; the "greater" forms are derived by swapping
/// operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
}

/// An interpreter wrapped behind a value stack and a registry, the only
/// surface the bridge layer touches.
///
/// Stack slots are addressed with signed indices: positive from the
/// bottom (1 is the first slot), negative from the top (-1 is the top).
pub struct LuaState {
    interp: Interpreter,
    stack: Vec<LuaValue>,
    registry: Vec<Option<LuaValue>>,
    free: Vec<u32>,
}

impl LuaState {
    /// Creates a fresh state with the base library installed.
    pub fn open() -> StateRef {
        let mut interp = Interpreter::new();
        stdlib::install(&mut interp);
        Rc::new(RefCell::new(Self {
            interp,
            stack: Vec::new(),
            registry: Vec::new(),
            free: Vec::new(),
        }))
    }

    fn resolve(&self, slot: i32) -> Option<usize> {
        let len = self.stack.len() as i32;
        let index = if slot < 0 { len + slot } else { slot - 1 };
        if index >= 0 && index < len {
            Some(index as usize)
        } else {
            None
        }
    }

    pub fn top(&self) -> usize {
        self.stack.len()
    }

    pub fn push(&mut self, value: LuaValue) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> LuaValue {
        self.stack.pop().unwrap_or(LuaValue::Nil)
    }

    pub fn peek(&self, slot: i32) -> LuaValue {
        self.resolve(slot)
            .map(|index| self.stack[index].clone())
            .unwrap_or(LuaValue::Nil)
    }

    /// Drops every stack slot. Bridge operations call this on both the
    /// success and the failure path.
    pub fn clear(&mut self) {
        self.stack.clear();
    }

    pub fn push_globals(&mut self) {
        self.push(LuaValue::Table(self.interp.globals()));
    }

    pub fn push_global(&mut self, name: &str) {
        let value = self.interp.get_global(name);
        self.push(value);
    }

    pub fn type_of(&self, slot: i32) -> &'static str {
        match self.resolve(slot) {
            Some(index) => self.stack[index].type_name(),
            None => "nil",
        }
    }

    /// Duplicates the value at `slot` into a fresh registry root and
    /// returns the handle. The stack is left untouched.
    pub fn register(&mut self, slot: i32) -> RegistryKey {
        let value = self.peek(slot);
        match self.free.pop() {
            Some(index) => {
                self.registry[index as usize] = Some(value);
                RegistryKey(index + 1)
            }
            None => {
                self.registry.push(Some(value));
                RegistryKey(self.registry.len() as u32)
            }
        }
    }

    /// Pushes the registered value back onto the stack.
    pub fn fetch(&mut self, key: &RegistryKey) -> BridgeResult<()> {
        let value = self
            .registry
            .get((key.0 - 1) as usize)
            .and_then(|slot| slot.clone())
            .ok_or(BridgeError::LostReference)?;
        self.push(value);
        Ok(())
    }

    pub fn release(&mut self, key: RegistryKey) {
        self.release_raw(key.0);
    }

    pub(crate) fn release_raw(&mut self, raw: u32) {
        let index = (raw - 1) as usize;
        if let Some(slot) = self.registry.get_mut(index) {
            if slot.take().is_some() {
                self.free.push(raw - 1);
            }
        }
    }

    /// Count of live registry slots. Useful for leak checks.
    pub fn registry_len(&self) -> usize {
        self.registry.iter().filter(|slot| slot.is_some()).count()
    }

    /// Compiles a source chunk and pushes it as a callable value.
    pub fn load(&mut self, source: &str) -> BridgeResult<()> {
        let chunk: Chunk = parser::parse_chunk(source)
            .map_err(|diag| BridgeError::Execution(format!("error loading code: {diag}")))?;
        let function = LuaFunction {
            name: None,
            params: Vec::new(),
            body: chunk.body,
            env: self.interp.root_env(),
        };
        self.push(LuaValue::Function(Rc::new(function)));
        Ok(())
    }

    /// Protected call. Expects the callee followed by `nargs` arguments
    /// on the stack; pops them, pushes the results, and returns the
    /// result count. On failure the whole stack is cleared.
    pub fn call(&mut self, nargs: usize) -> BridgeResult<usize> {
        if self.stack.len() < nargs + 1 {
            self.clear();
            return Err(BridgeError::Execution("stack underflow in call".into()));
        }
        let args = self.stack.split_off(self.stack.len() - nargs);
        let callee = self.pop();
        match self
            .interp
            .call_value(&callee, &args, SourceSpan::new(0, 0))
        {
            Ok(results) => {
                let count = results.len();
                self.stack.extend(results);
                Ok(count)
            }
            Err(error) => {
                self.clear();
                Err(BridgeError::Execution(error.to_string()))
            }
        }
    }

    /// Pops a key and an object, pushes `object[key]`.
    pub fn index_get(&mut self) -> BridgeResult<()> {
        let key = self.pop();
        let object = self.pop();
        match self
            .interp
            .index_value(&object, &key, SourceSpan::new(0, 0))
        {
            Ok(value) => {
                self.push(value);
                Ok(())
            }
            Err(error) => {
                self.clear();
                Err(BridgeError::Execution(error.to_string()))
            }
        }
    }

    /// Pops a value, a key and an object, performs `object[key] = value`.
    pub fn index_set(&mut self) -> BridgeResult<()> {
        let value = self.pop();
        let key = self.pop();
        let object = self.pop();
        match self
            .interp
            .setindex_value(&object, &key, value, SourceSpan::new(0, 0))
        {
            Ok(()) => Ok(()),
            Err(error) => {
                self.clear();
                Err(BridgeError::Execution(error.to_string()))
            }
        }
    }

    pub fn length_of(&mut self, slot: i32) -> BridgeResult<i64> {
        let value = self.peek(slot);
        match self.interp.length_of(&value, SourceSpan::new(0, 0)) {
            Ok(len) => Ok(len),
            Err(error) => {
                self.clear();
                Err(BridgeError::Execution(error.to_string()))
            }
        }
    }

    /// Compares the values at slots -2 and -1 without popping them.
    pub fn compare(&mut self, op: CompareOp) -> BridgeResult<bool> {
        let lhs = self.peek(-2);
        let rhs = self.peek(-1);
        match op {
            CompareOp::Eq => Ok(lhs.raw_equals(&rhs)),
            CompareOp::Lt | CompareOp::Le => {
                let binop = if op == CompareOp::Lt {
                    crate::ast::BinaryOp::Less
                } else {
                    crate::ast::BinaryOp::LessEqual
                };
                match self.interp.order(binop, &lhs, &rhs, SourceSpan::new(0, 0)) {
                    Ok(value) => Ok(value.is_truthy()),
                    Err(error) => {
                        self.clear();
                        Err(BridgeError::Execution(error.to_string()))
                    }
                }
            }
        }
    }

    /// Traversal step mirroring `next`. Expects `[table, key]` on the
    /// stack (key may be nil to start); pops the key. When an entry
    /// follows, pushes the new key then its value and returns true.
    /// When the table is exhausted, pops the table too and returns false.
    pub fn next_entry(&mut self) -> BridgeResult<bool> {
        let key = self.pop();
        let table = match self.peek(-1) {
            LuaValue::Table(table) => table,
            other => {
                self.clear();
                return Err(BridgeError::Execution(format!(
                    "attempt to iterate a {} value",
                    other.type_name()
                )));
            }
        };
        let key = match key {
            LuaValue::Nil => None,
            other => Some(LuaKey::from_value(&other).map_err(|diag| {
                self.stack.clear();
                BridgeError::Execution(diag.to_string())
            })?),
        };
        let step = table.borrow().next_after(key.as_ref());
        match step {
            Ok(Some((next_key, value))) => {
                self.push(next_key.to_value());
                self.push(value);
                Ok(true)
            }
            Ok(None) => {
                self.pop();
                Ok(false)
            }
            Err(error) => {
                self.clear();
                Err(BridgeError::Execution(error.to_string()))
            }
        }
    }

    /// Renders the value at `slot`, honoring `__tostring`.
    pub fn tostring_slot(&mut self, slot: i32) -> BridgeResult<String> {
        let value = self.peek(slot);
        self.interp
            .tostring_value(&value)
            .map_err(|error| BridgeError::Execution(error.to_string()))
    }
}

/// Runs a bridge operation and unconditionally clears the value stack
/// afterwards, keeping the stack-empty invariant on every path.
pub fn with_stack_guard<T>(
    state: &StateRef,
    f: impl FnOnce(&mut LuaState) -> BridgeResult<T>,
) -> BridgeResult<T> {
    let mut state = state.borrow_mut();
    let result = f(&mut state);
    state.clear();
    result
}
