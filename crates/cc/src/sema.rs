//! Symbol table data: [`Object`] (named entities), [`Relocation`] (global
//! initializer fixups), and [`Scope`] (the lexical-scope stack).
//!
//! This mirrors spec §3's Object/Relocation/Scope entries. Objects are
//! arena-allocated alongside types and AST nodes so `VarRef`s in the AST can
//! borrow them directly instead of going through a lookup table at codegen
//! time.

use crate::ast::Node;
use crate::types::Type;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

/// A named or anonymous entity with a type and role flags (spec §3).
pub struct Object<'a> {
    pub name: String,
    pub ty: &'a Type<'a>,
    pub is_local: bool,
    pub is_static: bool,
    pub is_definition: Cell<bool>,
    pub is_tentative: Cell<bool>,
    pub is_tls: bool,
    pub is_inline: bool,
    pub is_live: Cell<bool>,
    pub is_function: bool,
    pub is_variadic: bool,

    /// Locals: byte offset from the frame pointer, negative (spec §3
    /// invariant). Assigned by codegen's frame-layout pass, hence `Cell`.
    pub stack_offset: Cell<i64>,

    /// Functions only.
    pub func: Option<FunctionObject<'a>>,

    /// Variables only: serialized initializer bytes and relocation list for
    /// file-scope objects with a constant initializer.
    pub init_data: RefCell<Option<InitData>>,
}

pub struct FunctionObject<'a> {
    pub params: RefCell<Vec<&'a Object<'a>>>,
    pub body: RefCell<Option<&'a Node<'a>>>,
    pub locals: RefCell<Vec<&'a Object<'a>>>,
    pub static_locals: RefCell<Vec<&'a Object<'a>>>,
    /// Functions this one calls, for the static-inline liveness DFS
    /// (spec §4.3, see [`crate::liveness`]).
    pub calls: RefCell<Vec<String>>,
    pub dealloc_vla: Cell<bool>,
    /// `VlaSizeVar(i)` (spec §3's Type data model) resolves to
    /// `vla_vars.borrow()[i]`, the hidden `unsigned long` local holding that
    /// VLA's byte size — indexed rather than borrowed directly so `Type`
    /// stays independent of any one function's local table.
    pub vla_vars: RefCell<Vec<&'a Object<'a>>>,
    /// True if the body (transitively) calls `setjmp`/a `longjmp`-family
    /// function, which disables stack-slot reuse for the whole function
    /// (spec §4.4's `dont_reuse_stack`).
    pub dont_reuse_stack: Cell<bool>,
    /// Size, in bytes, of the largest outgoing stack-argument area needed by
    /// any call in this function — contributes to frame size.
    pub max_call_stack_args: Cell<i64>,
}

/// A byte offset inside a global initializer, a symbol-name reference, and
/// an addend (spec §3's Relocation). Rendered as `.quad "name"+addend`.
#[derive(Debug, Clone)]
pub struct Relocation {
    pub offset: i64,
    pub symbol: String,
    pub addend: i64,
}

#[derive(Debug, Clone, Default)]
pub struct InitData {
    pub bytes: Vec<u8>,
    pub relocations: Vec<Relocation>,
}

/// A name binding: a variable/object, or a typedef, or an enum constant
/// value — these three share one namespace in C.
#[derive(Clone)]
pub enum VarScopeEntry<'a> {
    Var(&'a Object<'a>),
    Typedef(&'a Type<'a>),
    EnumConst(&'a Type<'a>, i64),
}

/// A lexical scope: variables/typedefs/enum-constants in one map, struct/
/// union/enum tags in another, linked to a parent. Scopes are pushed/popped
/// around blocks, function bodies, and compound literals (spec §3).
pub struct Scope<'a> {
    pub vars: HashMap<String, VarScopeEntry<'a>>,
    pub tags: HashMap<String, &'a Type<'a>>,
    pub is_temporary: bool,
}

impl<'a> Scope<'a> {
    pub fn new(is_temporary: bool) -> Self {
        Scope { vars: HashMap::new(), tags: HashMap::new(), is_temporary }
    }
}

/// The scope stack threaded through declaration parsing. Innermost scope is
/// last; lookups walk from the end toward the front.
pub struct ScopeStack<'a> {
    scopes: Vec<Scope<'a>>,
}

impl<'a> ScopeStack<'a> {
    pub fn new() -> Self {
        ScopeStack { scopes: vec![Scope::new(false)] }
    }

    pub fn push(&mut self, is_temporary: bool) {
        self.scopes.push(Scope::new(is_temporary));
    }

    pub fn pop(&mut self) {
        self.scopes.pop();
        debug_assert!(!self.scopes.is_empty(), "popped the file scope");
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_file_scope(&self) -> bool {
        self.scopes.len() == 1
    }

    pub fn declare_var(&mut self, name: impl Into<String>, entry: VarScopeEntry<'a>) {
        self.scopes.last_mut().unwrap().vars.insert(name.into(), entry);
    }

    pub fn declare_tag(&mut self, name: impl Into<String>, ty: &'a Type<'a>) {
        self.scopes.last_mut().unwrap().tags.insert(name.into(), ty);
    }

    pub fn find_var(&self, name: &str) -> Option<&VarScopeEntry<'a>> {
        self.scopes.iter().rev().find_map(|s| s.vars.get(name))
    }

    pub fn find_var_in_current(&self, name: &str) -> Option<&VarScopeEntry<'a>> {
        self.scopes.last().unwrap().vars.get(name)
    }

    pub fn find_tag(&self, name: &str) -> Option<&'a Type<'a>> {
        self.scopes.iter().rev().find_map(|s| s.tags.get(name)).copied()
    }
}

impl<'a> Default for ScopeStack<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeArena;

    #[test]
    fn inner_scope_shadows_outer() {
        let arena = TypeArena::new();
        let mut stack = ScopeStack::new();
        stack.declare_var("x", VarScopeEntry::Typedef(arena.int()));
        stack.push(false);
        stack.declare_var("x", VarScopeEntry::Typedef(arena.double()));
        match stack.find_var("x") {
            Some(VarScopeEntry::Typedef(t)) => assert!(t.is_float()),
            _ => panic!("expected shadowed typedef"),
        }
        stack.pop();
        match stack.find_var("x") {
            Some(VarScopeEntry::Typedef(t)) => assert!(t.is_integer()),
            _ => panic!("expected outer typedef"),
        }
    }

    #[test]
    fn file_scope_is_depth_one() {
        let stack: ScopeStack = ScopeStack::new();
        assert!(stack.is_file_scope());
        assert_eq!(stack.depth(), 1);
    }
}
