//! Lunaria embeds a small Lua interpreter in a Rust host and bridges
//! values across the boundary.
//!
//! The engine side (lexer, parser, tree-walking runtime) executes a Lua
//! subset. The bridge side talks to it exclusively through a narrow
//! stack-and-registry surface, converting primitives by value and
//! wrapping tables and functions in [`LuaProxy`] handles that index,
//! call, iterate and compare from Rust.
//!
//! ```no_run
//! use lunaria::{HostValue, Lua};
//!
//! let lua = Lua::open();
//! lua.execute("x = {1, 2, 3}").unwrap();
//! let globals = lua.globals();
//! if let HostValue::Proxy(x) = globals.get(&HostValue::Text("x".into())).unwrap() {
//!     assert_eq!(x.length().unwrap(), 3);
//! }
//! ```

pub mod ast;
pub mod bridge;
pub mod convert;
pub mod diagnostics;
pub mod environment;
pub mod lexer;
pub mod parser;
pub mod proxy;
pub mod repl;
pub mod runtime;
pub mod state;
pub mod stdlib;
pub mod value;

pub use bridge::{Lua, RunMode};
pub use convert::HostValue;
pub use diagnostics::{
    BridgeError, BridgeResult, Diagnostic, DiagnosticKind, LunariaError, Result, SourceSpan,
};
pub use proxy::{CmpOp, LuaProxy, ProxyIter};
pub use repl::Repl;
