use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;

use crate::{
    diagnostics::SourceSpan,
    script::{source::SourceFile, value::Value},
};

pub type ScopeRef = Rc<RefCell<Scope>>;

/// Where a binding was declared in source.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub origin: Rc<SourceFile>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub mutable: bool,
    pub declared_at: Option<Declaration>,
}

#[derive(Debug, Clone)]
pub enum ScopeError {
    Undefined,
    Immutable(Option<Declaration>),
}

#[derive(Debug, Default)]
pub struct Scope {
    parent: Option<ScopeRef>,
    bindings: IndexMap<String, Binding>,
}

impl Scope {
    pub fn new() -> ScopeRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn with_parent(parent: ScopeRef) -> ScopeRef {
        Rc::new(RefCell::new(Self {
            parent: Some(parent),
            bindings: IndexMap::new(),
        }))
    }

    /// Declares `name`, replacing any earlier binding in this scope.
    pub fn define(&mut self, name: String, value: Value, mutable: bool, declared_at: Option<Declaration>) {
        self.bindings.insert(
            name,
            Binding {
                value,
                mutable,
                declared_at,
            },
        );
    }

    pub fn lookup(scope: &ScopeRef, name: &str) -> Option<Value> {
        let current = scope.borrow();
        if let Some(binding) = current.bindings.get(name) {
            return Some(binding.value.clone());
        }
        let parent = current.parent.clone()?;
        drop(current);
        Scope::lookup(&parent, name)
    }

    pub fn assign(scope: &ScopeRef, name: &str, value: Value) -> Result<(), ScopeError> {
        let mut current = scope.borrow_mut();
        if let Some(binding) = current.bindings.get_mut(name) {
            if !binding.mutable {
                return Err(ScopeError::Immutable(binding.declared_at.clone()));
            }
            binding.value = value;
            return Ok(());
        }
        let parent = current.parent.clone().ok_or(ScopeError::Undefined)?;
        drop(current);
        Scope::assign(&parent, name, value)
    }
}
