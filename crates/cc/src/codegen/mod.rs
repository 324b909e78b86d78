//! x86-64 SysV ABI code generation (spec §4.4).
//!
//! The phase is split the way the original groups it: [`state`] owns the
//! output buffer and the per-function virtual spill stack; [`abi`] classifies
//! aggregate arguments/returns into GP/FP register chunks; [`cast`] is the
//! from/to numeric-conversion dispatch table; [`expr`]/[`stmt`] walk the AST;
//! [`call`] handles the SysV calling convention at call sites and `va_arg`;
//! [`function`] lays out one function's frame and emits its prologue/
//! epilogue; [`data`] emits global variable definitions.
//!
//! [`generate`] drives the whole translation unit: mark static-inline
//! liveness, then emit each live global in declaration order, finishing with
//! the `.note.GNU-stack` marker spec §6 requires of the output.

pub mod abi;
pub mod call;
pub mod cast;
pub mod data;
pub mod error;
pub mod expr;
pub mod function;
pub mod state;
pub mod stmt;

use crate::sema::Object;
use error::CodeGenError;
use state::CodeGen;

/// Emit GNU-assembler text for every live global in `globals`, in order.
///
/// Liveness (spec §4.3's static-inline suppression) must already have been
/// computed by [`crate::liveness::mark_live`] before this is called; this
/// function only reads `is_live`, it does not run the DFS itself, since the
/// parser is what assembles each function's `calls` set as it goes.
pub fn generate<'a>(globals: &[&'a Object<'a>]) -> Result<String, CodeGenError> {
    let mut cg = CodeGen::new();

    for obj in globals {
        if obj.is_function {
            if !obj.is_live.get() {
                continue;
            }
            if obj.func.as_ref().is_some_and(|f| f.body.borrow().is_none()) {
                // Declaration only, no definition to emit.
                continue;
            }
            function::gen_function(&mut cg, obj)?;
        } else {
            data::emit_global(&mut cg, obj)?;
        }
    }

    cg.emit(format_args!("  .section .note.GNU-stack,\"\",@progbits"))?;
    Ok(cg.out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::TranslationUnit;
    use crate::sema::{FunctionObject, InitData, Relocation};
    use crate::types::TypeArena;
    use std::cell::{Cell, RefCell};

    #[test]
    fn emits_note_gnu_stack_trailer() {
        let out = generate(&[]).unwrap();
        assert!(out.contains(".section .note.GNU-stack,\"\",@progbits"));
    }

    #[test]
    fn dead_static_inline_function_is_skipped() {
        let arena = TypeArena::new();
        let tu = TranslationUnit::default();
        let ty = arena.int();
        let dead = tu.alloc_object(Object {
            name: "helper".into(),
            ty,
            is_local: false,
            is_static: true,
            is_definition: Cell::new(true),
            is_tentative: Cell::new(false),
            is_tls: false,
            is_inline: true,
            is_live: Cell::new(false),
            is_function: true,
            is_variadic: false,
            stack_offset: Cell::new(0),
            func: Some(FunctionObject {
                params: RefCell::new(Vec::new()),
                body: RefCell::new(None),
                locals: RefCell::new(Vec::new()),
                static_locals: RefCell::new(Vec::new()),
                calls: RefCell::new(Vec::new()),
                dealloc_vla: Cell::new(false),
                vla_vars: RefCell::new(Vec::new()),
                dont_reuse_stack: Cell::new(false),
                max_call_stack_args: Cell::new(0),
            }),
            init_data: RefCell::new(None),
        });
        let out = generate(&[dead]).unwrap();
        assert!(!out.contains("helper"));
    }

    #[test]
    fn global_variable_initializer_is_emitted() {
        let arena = TypeArena::new();
        let tu = TranslationUnit::default();
        let ty = arena.int();
        let g = tu.alloc_object(Object {
            name: "x".into(),
            ty,
            is_local: false,
            is_static: false,
            is_definition: Cell::new(true),
            is_tentative: Cell::new(false),
            is_tls: false,
            is_inline: false,
            is_live: Cell::new(true),
            is_function: false,
            is_variadic: false,
            stack_offset: Cell::new(0),
            func: None,
            init_data: RefCell::new(Some(InitData {
                bytes: vec![2, 0, 0, 0],
                relocations: Vec::<Relocation>::new(),
            })),
        });
        let out = generate(&[g]).unwrap();
        assert!(out.contains("\"x\":"));
        assert!(out.contains(".note.GNU-stack"));
    }
}
