use std::rc::Rc;

use crate::{
    convert::{push_host, to_host, HostValue},
    diagnostics::{BridgeError, BridgeResult},
    proxy::LuaProxy,
    state::{with_stack_guard, LuaState, StateRef},
};

/// How [`Lua::run`] treats its source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run the source as a statement chunk.
    Execute,
    /// Treat the source as an expression and return its value.
    Evaluate,
}

/// An embedded Lua interpreter instance.
///
/// Owns the interpreter handle for the duration of the embedding.
/// Proxies handed out by [`Lua::globals`] and friends share ownership
/// of the underlying state, so dropping the `Lua` while proxies are
/// alive keeps the interpreter running until the last proxy goes away.
pub struct Lua {
    state: StateRef,
}

impl Default for Lua {
    fn default() -> Self {
        Self::open()
    }
}

impl Lua {
    /// Opens a fresh interpreter with the base library installed.
    pub fn open() -> Self {
        Self {
            state: LuaState::open(),
        }
    }

    /// Shuts the interpreter down. Consuming the handle means code
    /// cannot use it afterwards; proxies still alive keep the state
    /// valid until they drop.
    pub fn close(self) {}

    /// Compiles and runs `source`, converting what the chunk returns.
    pub fn execute(&self, source: &str) -> BridgeResult<HostValue> {
        self.run(source, RunMode::Execute)
    }

    /// Evaluates `source` as a single expression.
    pub fn eval(&self, source: &str) -> BridgeResult<HostValue> {
        self.run(source, RunMode::Evaluate)
    }

    pub fn run(&self, source: &str, mode: RunMode) -> BridgeResult<HostValue> {
        let prefixed;
        let source = match mode {
            RunMode::Execute => source,
            RunMode::Evaluate => {
                prefixed = format!("return {source}");
                &prefixed
            }
        };
        with_stack_guard(&self.state, |locked| {
            locked.load(source)?;
            finish_call(&self.state, locked, 0)
        })
    }

    /// Proxy over the interpreter's globals table.
    pub fn globals(&self) -> LuaProxy {
        let key = {
            let mut locked = self.state.borrow_mut();
            locked.push_globals();
            let key = locked.register(-1);
            locked.clear();
            key
        };
        LuaProxy::new(Rc::clone(&self.state), key)
    }

    /// Loads a module by calling the interpreter's own `require`.
    pub fn require(&self, name: &str) -> BridgeResult<HostValue> {
        with_stack_guard(&self.state, |locked| {
            locked.push_global("require");
            if locked.type_of(-1) == "nil" {
                return Err(BridgeError::Execution("require is not defined".into()));
            }
            push_args_and_call(&self.state, locked, &[HostValue::Text(name.to_string())])
        })
    }

    /// Live registry root count, for leak diagnostics in tests.
    pub fn registry_len(&self) -> usize {
        self.state.borrow().registry_len()
    }
}

/// Pushes `args` after an already-pushed callee, then performs the
/// protected call and converts the results. The first unconvertible
/// argument aborts with its one-based position.
pub(crate) fn push_args_and_call(
    state: &StateRef,
    locked: &mut LuaState,
    args: &[HostValue],
) -> BridgeResult<HostValue> {
    for (position, arg) in args.iter().enumerate() {
        push_host(state, locked, arg).map_err(|error| match error {
            BridgeError::LostReference => error,
            _ => BridgeError::ArgumentConversion(position + 1),
        })?;
    }
    finish_call(state, locked, args.len())
}

/// Runs the protected call for a callee and `nargs` arguments already
/// on the stack, then applies the result-count contract: zero results
/// become none, one becomes itself, several become a tuple.
pub(crate) fn finish_call(
    state: &StateRef,
    locked: &mut LuaState,
    nargs: usize,
) -> BridgeResult<HostValue> {
    let count = locked.call(nargs)?;
    match count {
        0 => Ok(HostValue::None),
        1 => Ok(to_host(state, locked, -1)),
        n => {
            let base = locked.top() - n;
            let mut items = Vec::with_capacity(n);
            for offset in 0..n {
                items.push(to_host(state, locked, (base + offset + 1) as i32));
            }
            Ok(HostValue::Tuple(items))
        }
    }
}
