use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::LuaValue;

pub type EnvironmentRef = Rc<RefCell<Environment>>;

/// A lexical scope for `local` bindings. Globals live in the interpreter's
/// globals table, not here.
#[derive(Debug, Default)]
pub struct Environment {
    values: IndexMap<String, LuaValue>,
    parent: Option<EnvironmentRef>,
}

impl Environment {
    pub fn new() -> EnvironmentRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn with_parent(parent: EnvironmentRef) -> EnvironmentRef {
        Rc::new(RefCell::new(Self {
            values: IndexMap::new(),
            parent: Some(parent),
        }))
    }

    /// Declares a fresh local in this scope, shadowing any outer binding.
    pub fn define(&mut self, name: impl Into<String>, value: LuaValue) {
        self.values.insert(name.into(), value);
    }

    /// Resolves a name through the scope chain. `None` means the name is
    /// not a local and should be looked up in the globals table.
    pub fn get(&self, name: &str) -> Option<LuaValue> {
        if let Some(value) = self.values.get(name) {
            return Some(value.clone());
        }
        match &self.parent {
            Some(parent) => parent.borrow().get(name),
            None => None,
        }
    }

    /// Assigns to an existing local. Returns false when no enclosing scope
    /// declares the name, in which case the write goes to the globals.
    pub fn assign(&mut self, name: &str, value: LuaValue) -> bool {
        if let Some(slot) = self.values.get_mut(name) {
            *slot = value;
            return true;
        }
        match &self.parent {
            Some(parent) => parent.borrow_mut().assign(name, value),
            None => false,
        }
    }
}
