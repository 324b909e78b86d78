//! Statement code generation: control flow, `return`, and `goto`/`break`/
//! `continue`'s VLA-crossing `%rsp` restoration.
//!
//! A VLA's `alloca` lowers `%rsp` below whatever the prologue set up, so any
//! jump that leaves a VLA's scope without going through the epilogue (which
//! resets `%rsp` from `%rbp` unconditionally) has to restore it by hand. Each
//! VLA-crossing node carries the nesting depth at the jump site (`top_vla`)
//! and at the target (`target_vla`, `None` meaning "outside every VLA"); a
//! jump only needs a restore when the two differ, and when it does, the
//! target's depth names exactly which saved `%rsp` slot to reload — either
//! the ancestor VLA's own snapshot, or the function-wide one taken right
//! after the prologue if the target is outside all of them.
//!
//! A `return` never needs this dance: the epilogue always reloads `%rsp`
//! from `%rbp`, which undoes every VLA the body ever allocated.
//!
//! No extra snapshot slots are allocated for individual VLAs: `alloca`'s
//! last step stores the post-allocation `%rsp` into the VLA pointer
//! variable's own stack slot (see `codegen::expr`'s `Alloca` lowering), so
//! that variable's existing slot already *is* the restore point. Only the
//! outermost dimension of a multi-dimensional VLA ever appears as a
//! `top_vla`/`target_vla` value (inner dimensions only ever feed the size
//! computation, see `codegen::function`'s frame layout), so this is exact.

use crate::ast::{Node, NodeKind};

use super::abi::{is_large_aggregate, is_small_aggregate};
use super::call::pack_return_struct;
use super::cast::narrow_int;
use super::error::CodeGenError;
use super::expr::{cmp_zero, gen_expr, mem_copy};
use super::state::CodeGen;

/// Mangle a user-written label (`goto foo;`, `foo:`, `&&foo`) with the
/// enclosing function's name so two functions reusing the same label text
/// don't collide as assembler symbols.
pub(super) fn user_label(cg: &CodeGen, name: &str) -> String {
    format!(".L.user.{}.{}", cg.fn_name, name)
}

/// `vla_var_offsets` and `vla_init_rsp_offset` hold already-signed
/// `%rbp`-relative offsets (negative), same convention as
/// [`crate::sema::Object::stack_offset`] — no extra sign flip at the use
/// site.
fn restore_vla(cg: &mut CodeGen, top: Option<u32>, target: Option<u32>) -> Result<(), CodeGenError> {
    if top == target {
        return Ok(());
    }
    match target {
        Some(idx) => {
            let ofs = cg.vla_var_offsets[idx as usize];
            cg.emit(format_args!("  mov {ofs}(%rbp), %rsp"))
        }
        None => match cg.vla_init_rsp_offset {
            Some(ofs) => cg.emit(format_args!("  mov {ofs}(%rbp), %rsp")),
            None => Ok(()),
        },
    }
}

pub fn gen_stmt<'a>(cg: &mut CodeGen, node: &'a Node<'a>) -> Result<(), CodeGenError> {
    match &node.kind {
        NodeKind::NullExpr => Ok(()),

        NodeKind::ExprStmt(e) => gen_expr(cg, e),

        NodeKind::Block(stmts) => {
            for s in stmts {
                cg.emit(format_args!("  .loc {} {}", s.pos.display_file.0 + 1, s.pos.display_line))?;
                gen_stmt(cg, s)?;
            }
            Ok(())
        }

        NodeKind::If { cond, then, els } => {
            let l = cg.label("if");
            gen_expr(cg, cond)?;
            cmp_zero(cg, cond.ty().ok_or_else(|| CodeGenError::from("if condition has no type"))?)?;
            cg.emit(format_args!("  je {l}.else"))?;
            gen_stmt(cg, then)?;
            cg.emit(format_args!("  jmp {l}.end"))?;
            cg.emit(format_args!("{l}.else:"))?;
            if let Some(els) = els {
                gen_stmt(cg, els)?;
            }
            cg.emit(format_args!("{l}.end:"))
        }

        NodeKind::For { init, cond, inc, body, brk_label, cont_label } => {
            let l = cg.label("for");
            if let Some(init) = init {
                gen_stmt(cg, init)?;
            }
            cg.emit(format_args!("{l}.begin:"))?;
            if let Some(cond) = cond {
                gen_expr(cg, cond)?;
                cmp_zero(cg, cond.ty().ok_or_else(|| CodeGenError::from("for condition has no type"))?)?;
                cg.emit(format_args!("  je {brk_label}"))?;
            }
            gen_stmt(cg, body)?;
            cg.emit(format_args!("{cont_label}:"))?;
            if let Some(inc) = inc {
                gen_expr(cg, inc)?;
            }
            cg.emit(format_args!("  jmp {l}.begin"))?;
            cg.emit(format_args!("{brk_label}:"))
        }

        NodeKind::Do { body, cond, brk_label, cont_label } => {
            let l = cg.label("do");
            cg.emit(format_args!("{l}.begin:"))?;
            gen_stmt(cg, body)?;
            cg.emit(format_args!("{cont_label}:"))?;
            gen_expr(cg, cond)?;
            cmp_zero(cg, cond.ty().ok_or_else(|| CodeGenError::from("do condition has no type"))?)?;
            cg.emit(format_args!("  jne {l}.begin"))?;
            cg.emit(format_args!("{brk_label}:"))
        }

        NodeKind::Switch { cond, body, cases, default_label, brk_label } => {
            gen_expr(cg, cond)?;
            cg.emit(format_args!("  mov %rax, %r11"))?;
            for arm in cases {
                if arm.lo == arm.hi {
                    cg.emit(format_args!("  cmp ${}, %r11", arm.lo))?;
                    cg.emit(format_args!("  je {}", arm.label))?;
                } else {
                    cg.emit(format_args!("  mov %r11, %rax"))?;
                    cg.emit(format_args!("  sub ${}, %rax", arm.lo))?;
                    cg.emit(format_args!("  cmp ${}, %rax", arm.hi - arm.lo))?;
                    cg.emit(format_args!("  jbe {}", arm.label))?;
                }
            }
            match default_label {
                Some(d) => cg.emit(format_args!("  jmp {d}"))?,
                None => cg.emit(format_args!("  jmp {brk_label}"))?,
            }
            gen_stmt(cg, body)?;
            cg.emit(format_args!("{brk_label}:"))
        }

        NodeKind::Case { label, body } => {
            cg.emit(format_args!("{label}:"))?;
            gen_stmt(cg, body)
        }

        NodeKind::Return(expr) => {
            if let Some(e) = expr {
                gen_expr(cg, e)?;
                let ty = e.ty().ok_or_else(|| CodeGenError::from("return value has no type"))?;
                if is_large_aggregate(ty) {
                    if let Some(ofs) = cg.hidden_ret_ptr_offset {
                        cg.emit(format_args!("  mov %rax, %r10"))?;
                        cg.emit(format_args!("  mov {ofs}(%rbp), %rax"))?;
                        mem_copy(cg, 0, "%r10", 0, "%rax", ty.size.get())?;
                    }
                } else if is_small_aggregate(ty) {
                    pack_return_struct(cg, ty)?;
                } else if let Some(seq) = narrow_int(ty) {
                    cg.emit(format_args!("  {seq}"))?;
                }
            }
            let ret_label = cg.ret_label.clone();
            cg.emit(format_args!("  jmp {ret_label}"))
        }

        NodeKind::Goto { label, top_vla, target_vla } => {
            let target = *target_vla.borrow();
            restore_vla(cg, *top_vla, target)?;
            let dest = user_label(cg, label);
            cg.emit(format_args!("  jmp {dest}"))
        }

        NodeKind::ComputedGoto(target) => {
            gen_expr(cg, target)?;
            cg.emit(format_args!("  jmp *%rax"))
        }

        NodeKind::Label { name, body } => {
            let dest = user_label(cg, name);
            cg.emit(format_args!("{dest}:"))?;
            gen_stmt(cg, body)
        }

        NodeKind::Break { target_label, top_vla, target_vla } => {
            restore_vla(cg, *top_vla, *target_vla)?;
            cg.emit(format_args!("  jmp {target_label}"))
        }

        NodeKind::Continue { target_label, top_vla, target_vla } => {
            restore_vla(cg, *top_vla, *target_vla)?;
            cg.emit(format_args!("  jmp {target_label}"))
        }

        NodeKind::InlineAsm(text) => cg.emit(format_args!("  {text}")),

        _ => Err(CodeGenError::from("expression node reached gen_stmt")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SourcePos;
    use crate::token::FileId;
    use std::cell::RefCell;

    fn pos() -> SourcePos {
        SourcePos { file: FileId(0), line: 1, display_file: FileId(0), display_line: 1 }
    }

    #[test]
    fn goto_same_vla_depth_skips_restore() {
        let mut cg = CodeGen::new();
        cg.fn_name = "f".into();
        let node = Node { pos: pos(), ty: RefCell::new(None), kind: NodeKind::Goto { label: "out".into(), top_vla: Some(0), target_vla: RefCell::new(Some(0)) } };
        gen_stmt(&mut cg, &node).unwrap();
        assert!(!cg.out.contains("%rsp"));
        assert!(cg.out.contains(".L.user.f.out"));
    }

    #[test]
    fn break_crossing_vla_restores_rsp_from_ancestor_slot() {
        let mut cg = CodeGen::new();
        cg.vla_var_offsets = vec![-40];
        let node = Node {
            pos: pos(),
            ty: RefCell::new(None),
            kind: NodeKind::Break { target_label: ".L.break.1".into(), top_vla: Some(1), target_vla: Some(0) },
        };
        // top_vla differs from target_vla so a restore is required; the
        // ancestor VLA at index 0 owns the slot we restore from.
        let _ = gen_stmt(&mut cg, &node);
        assert!(cg.out.contains("-40(%rbp), %rsp"));
        assert!(cg.out.contains("jmp .L.break.1"));
    }

    #[test]
    fn break_leaving_all_vlas_restores_function_wide_snapshot() {
        let mut cg = CodeGen::new();
        cg.vla_init_rsp_offset = Some(-24);
        let node = Node {
            pos: pos(),
            ty: RefCell::new(None),
            kind: NodeKind::Break { target_label: ".L.break.2".into(), top_vla: Some(0), target_vla: None },
        };
        gen_stmt(&mut cg, &node).unwrap();
        assert!(cg.out.contains("-24(%rbp), %rsp"));
    }
}
