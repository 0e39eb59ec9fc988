//! Variable environments.
//!
//! An environment is a chain of scopes, innermost first.  Scopes are created
//! on block, loop-body and call entry and dropped on exit, except a closure's
//! captured chain, which lives as long as any function value holding it.
//! Mutation is last-writer-wins: every holder of a chain observes earlier
//! holders' assignments.

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::diag::RuntimeError;
use crate::interner::Symbol;
use crate::value::{TypeKind, Value};

/// One variable slot: the recorded type, the value (absent until
/// initialized), and whether the slot was declared `var`.
struct Slot {
    ty: TypeKind,
    dynamic: bool,
    value: Option<Value>,
}

pub struct Scope {
    parent: Option<Rc<Scope>>,
    slots: RefCell<HashMap<Symbol, Slot>>,
}

impl Scope {
    /// Creates an outermost (global) scope.
    pub fn global() -> Rc<Scope> {
        Rc::new(Scope {
            parent: None,
            slots: RefCell::new(HashMap::new()),
        })
    }

    /// Creates a new innermost scope chained to `parent`.
    pub fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            parent: Some(parent.clone()),
            slots: RefCell::new(HashMap::new()),
        })
    }

    /// Declares `name` in this scope.  Fails if the name already exists
    /// here; shadowing an enclosing scope is fine.  A `var` declaration
    /// records the initializer's runtime type (or stays `var` until first
    /// assignment).
    pub fn declare(
        &self,
        ty: TypeKind,
        name: &Symbol,
        value: Option<Value>,
    ) -> Result<(), RuntimeError> {
        let dynamic = ty == TypeKind::Dynamic;
        if let Some(v) = &value {
            if !v.fits(ty) {
                return Err(RuntimeError::AssignTypeMismatch {
                    name: name.name().to_owned(),
                    declared: ty.to_string(),
                    offered: v.type_kind().to_string(),
                });
            }
        }
        let recorded = match (&value, dynamic) {
            (Some(v), true) => v.type_kind(),
            _ => ty,
        };
        match self.slots.borrow_mut().entry(name.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(Slot {
                    ty: recorded,
                    dynamic,
                    value,
                });
                Ok(())
            }
            Entry::Occupied(_) => Err(RuntimeError::RedeclaredVariable(name.name().to_owned())),
        }
    }

    /// Assigns to the nearest slot named `name`, searching outward.  A
    /// non-dynamic slot rejects values of a different runtime type; a
    /// dynamic slot re-records its type.
    pub fn assign(&self, name: &Symbol, value: Value) -> Result<(), RuntimeError> {
        if self.assign_here(name, &value)? {
            return Ok(());
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => Err(RuntimeError::UndefinedVariable(name.name().to_owned())),
        }
    }

    /// Reads the nearest slot named `name`, searching outward.  Reading an
    /// uninitialized slot is an error.
    pub fn get(&self, name: &Symbol) -> Result<Value, RuntimeError> {
        if let Some(slot) = self.slots.borrow().get(name) {
            return match &slot.value {
                Some(v) => Ok(v.clone()),
                None => Err(RuntimeError::UninitializedVariable(name.name().to_owned())),
            };
        }
        match &self.parent {
            Some(parent) => parent.get(name),
            None => Err(RuntimeError::UndefinedVariable(name.name().to_owned())),
        }
    }

    /// Reads `name` from exactly the scope `distance` hops out, per the
    /// resolver's annotation.
    pub fn get_at(&self, distance: usize, name: &Symbol) -> Result<Value, RuntimeError> {
        let scope = self.ancestor(distance)?;
        match scope.slots.borrow().get(name) {
            Some(Slot { value: Some(v), .. }) => Ok(v.clone()),
            Some(Slot { value: None, .. }) => {
                Err(RuntimeError::UninitializedVariable(name.name().to_owned()))
            }
            None => Err(RuntimeError::UndefinedVariable(name.name().to_owned())),
        }
    }

    /// Assigns `name` in exactly the scope `distance` hops out.
    pub fn assign_at(
        &self,
        distance: usize,
        name: &Symbol,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let scope = self.ancestor(distance)?;
        if scope.assign_here(name, &value)? {
            Ok(())
        } else {
            Err(RuntimeError::UndefinedVariable(name.name().to_owned()))
        }
    }

    /// Assigns in this scope only.  Ok(false) when the name is absent here.
    fn assign_here(&self, name: &Symbol, value: &Value) -> Result<bool, RuntimeError> {
        let mut slots = self.slots.borrow_mut();
        let slot = match slots.get_mut(name) {
            Some(slot) => slot,
            None => return Ok(false),
        };
        if slot.dynamic {
            slot.ty = value.type_kind();
        } else if !value.fits(slot.ty) {
            return Err(RuntimeError::AssignTypeMismatch {
                name: name.name().to_owned(),
                declared: slot.ty.to_string(),
                offered: value.type_kind().to_string(),
            });
        }
        slot.value = Some(value.clone());
        Ok(true)
    }

    fn ancestor(&self, distance: usize) -> Result<&Scope, RuntimeError> {
        let mut scope = self;
        for _ in 0..distance {
            scope = scope
                .parent
                .as_deref()
                .ok_or_else(|| RuntimeError::UndefinedVariable("<scope>".to_owned()))?;
        }
        Ok(scope)
    }
}

// Shallow on purpose: a scope can hold a function whose closure is this very
// scope.
impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .slots
            .borrow()
            .keys()
            .map(|s| s.name().to_owned())
            .collect();
        f.debug_struct("Scope")
            .field("names", &names)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::Context;

    #[test]
    fn declare_and_get() -> Result<(), RuntimeError> {
        let ctx = Context::new();
        let scope = Scope::global();
        let x = ctx.symbol("x");
        scope.declare(TypeKind::Int, &x, Some(Value::Int(42)))?;
        assert_eq!(scope.get(&x)?, Value::Int(42));
        Ok(())
    }

    #[test]
    fn redeclare_in_same_scope_fails() {
        let ctx = Context::new();
        let scope = Scope::global();
        let x = ctx.symbol("x");
        scope.declare(TypeKind::Int, &x, Some(Value::Int(1))).unwrap();
        match scope.declare(TypeKind::Int, &x, Some(Value::Int(2))) {
            Err(RuntimeError::RedeclaredVariable(name)) if name == "x" => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn shadowing_in_child_scope_is_fine() -> Result<(), RuntimeError> {
        let ctx = Context::new();
        let outer = Scope::global();
        let x = ctx.symbol("x");
        outer.declare(TypeKind::Int, &x, Some(Value::Int(1)))?;
        let inner = Scope::child(&outer);
        inner.declare(TypeKind::Int, &x, Some(Value::Int(2)))?;
        assert_eq!(inner.get(&x)?, Value::Int(2));
        assert_eq!(outer.get(&x)?, Value::Int(1));
        Ok(())
    }

    #[test]
    fn assign_reaches_outward() -> Result<(), RuntimeError> {
        let ctx = Context::new();
        let outer = Scope::global();
        let x = ctx.symbol("x");
        outer.declare(TypeKind::Int, &x, Some(Value::Int(1)))?;
        let inner = Scope::child(&outer);
        inner.assign(&x, Value::Int(5))?;
        assert_eq!(outer.get(&x)?, Value::Int(5));
        Ok(())
    }

    #[test]
    fn static_slot_rejects_other_type() {
        let ctx = Context::new();
        let scope = Scope::global();
        let x = ctx.symbol("x");
        scope.declare(TypeKind::Int, &x, Some(Value::Int(5))).unwrap();
        match scope.assign(&x, Value::Double(2.5)) {
            Err(RuntimeError::AssignTypeMismatch { declared, offered, .. })
                if declared == "int" && offered == "double" => {}
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn dynamic_slot_retypes() -> Result<(), RuntimeError> {
        let ctx = Context::new();
        let scope = Scope::global();
        let x = ctx.symbol("x");
        scope.declare(TypeKind::Dynamic, &x, Some(Value::Int(5)))?;
        scope.assign(&x, Value::Double(2.5))?;
        assert_eq!(scope.get(&x)?, Value::Double(2.5));
        Ok(())
    }

    #[test]
    fn uninitialized_read_fails() {
        let ctx = Context::new();
        let scope = Scope::global();
        let x = ctx.symbol("x");
        scope.declare(TypeKind::Int, &x, None).unwrap();
        match scope.get(&x) {
            Err(RuntimeError::UninitializedVariable(name)) if name == "x" => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn unknown_name_fails() {
        let ctx = Context::new();
        let scope = Scope::global();
        match scope.get(&ctx.symbol("ghost")) {
            Err(RuntimeError::UndefinedVariable(name)) if name == "ghost" => (),
            out => panic!("unexpected output: {:?}", out),
        }
    }

    #[test]
    fn get_at_skips_shadowing_scopes() -> Result<(), RuntimeError> {
        let ctx = Context::new();
        let outer = Scope::global();
        let x = ctx.symbol("x");
        outer.declare(TypeKind::Int, &x, Some(Value::Int(1)))?;
        let inner = Scope::child(&outer);
        inner.declare(TypeKind::Int, &x, Some(Value::Int(2)))?;
        assert_eq!(inner.get_at(0, &x)?, Value::Int(2));
        assert_eq!(inner.get_at(1, &x)?, Value::Int(1));
        Ok(())
    }
}
