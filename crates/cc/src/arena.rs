//! Translation-unit-scoped bump allocation for the AST/type/object graph.
//!
//! Grounded on the teacher workspace's `runtime/src/arena.rs` thread-local
//! value arena, but simplified for a one-shot use: a compiler invocation
//! allocates everything it needs for exactly one translation unit and then
//! exits (or starts the next one fresh), so there is no thread-local storage
//! and no periodic reset-on-threshold policy — the whole arena is dropped at
//! once when the [`TranslationUnit`] goes out of scope.

use crate::ast::Node;
use crate::sema::Object;
use crate::types::Type;
use bumpalo::Bump;

/// Owns the bump allocator backing every `Type`, `Node`, and `Object`
/// produced while compiling one translation unit.
pub struct TranslationUnit {
    bump: Bump,
}

impl TranslationUnit {
    pub fn new() -> Self {
        TranslationUnit { bump: Bump::new() }
    }

    pub fn alloc_type<'a>(&'a self, ty: Type<'a>) -> &'a Type<'a> {
        self.bump.alloc(ty)
    }

    pub fn alloc_node<'a>(&'a self, node: Node<'a>) -> &'a Node<'a> {
        self.bump.alloc(node)
    }

    pub fn alloc_object<'a>(&'a self, obj: Object<'a>) -> &'a Object<'a> {
        self.bump.alloc(obj)
    }

    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }
}

impl Default for TranslationUnit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::FileId;
    use std::cell::{Cell, RefCell};

    #[test]
    fn allocated_bytes_grows_with_use() {
        let tu = TranslationUnit::new();
        let before = tu.allocated_bytes();
        let _obj = tu.alloc_object(Object {
            name: "x".into(),
            ty: tu.alloc_type(Type {
                kind: crate::types::TypeKind::Int,
                size: Cell::new(4),
                align: Cell::new(4),
                is_unsigned: false,
                origin: None,
            }),
            is_local: true,
            is_static: false,
            is_definition: Cell::new(true),
            is_tentative: Cell::new(false),
            is_tls: false,
            is_inline: false,
            is_live: Cell::new(true),
            is_function: false,
            is_variadic: false,
            stack_offset: Cell::new(-8),
            func: None,
            init_data: RefCell::new(None),
        });
        assert!(tu.allocated_bytes() >= before);
        let _ = FileId(0);
    }
}
