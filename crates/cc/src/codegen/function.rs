//! Function frame layout, prologue/epilogue emission, and incoming-parameter
//! materialization.
//!
//! Frame layout (low address toward high, i.e. decreasing `%rbp`-relative
//! offset) follows the fixed order: variadic register-save area, VLA
//! function-wide `%rsp` snapshot, hidden return-pointer slot, then ordinary
//! locals (including the hidden VLA size variables and the VLA pointer
//! variables themselves, which double as their own restore-point slots —
//! see `codegen::stmt`). The temp-spill area used by expression codegen
//! grows on top of that once the fixed part's total size is known.
//!
//! Emission is two-pass: the prologue's `sub $N, %rsp` is written with a
//! fixed-width placeholder and backpatched in place once the body's peak
//! spill usage is known, so the replacement never shifts any byte offset
//! already written after it.

use crate::sema::Object;
use crate::types::{Type, TypeKind};

use super::abi::{self, is_large_aggregate};
use super::error::CodeGenError;
use super::state::{align_to, CodeGen, GP_ARG_REGS_16, GP_ARG_REGS_32, GP_ARG_REGS_64, GP_ARG_REGS_8, XMM};

const PLACEHOLDER_DIGITS: usize = 10;

fn placeholder_line() -> String {
    format!("  sub ${:0>width$}, %rsp", 0, width = PLACEHOLDER_DIGITS)
}

/// Byte size/alignment of a local's own stack slot. A VLA-typed local's slot
/// holds a pointer (the hidden array's address), not the (runtime-sized,
/// statically unknown) array itself.
fn local_slot_layout(ty: &Type) -> (i64, i64) {
    if matches!(ty.kind, TypeKind::Vla { .. }) {
        return (8, 8);
    }
    let size = ty.size.get().max(0);
    let mut align = ty.align.get().max(1);
    if matches!(ty.kind, TypeKind::Array { .. }) && size >= 16 {
        align = align.max(16);
    }
    (size, align)
}

pub fn gen_function<'a>(cg: &mut CodeGen, obj: &'a Object<'a>) -> Result<(), CodeGenError> {
    let Some(func) = obj.func.as_ref() else {
        return Err(CodeGenError::from("gen_function called on a non-function object"));
    };
    if !obj.is_definition.get() || !obj.is_live.get() {
        return Ok(());
    }
    let Some(body) = *func.body.borrow() else {
        return Ok(());
    };
    let TypeKind::Function(fty) = &obj.ty.kind else {
        return Err(CodeGenError::from("function object has a non-function type"));
    };

    cg.begin_function(obj.name.clone(), func.dont_reuse_stack.get());
    cg.ret_label = cg.label("return");

    let large_return = is_large_aggregate(fty.return_ty);
    cg.uses_vla = func.dealloc_vla.get();

    let mut offset = 0i64;
    if obj.is_variadic {
        offset += 176;
    }
    if cg.uses_vla {
        offset += 8;
        cg.vla_init_rsp_offset = Some(-offset);
    }
    if large_return {
        offset += 8;
        cg.hidden_ret_ptr_offset = Some(-offset);
    }

    {
        let locals = func.locals.borrow();
        for local in locals.iter() {
            let (size, align) = local_slot_layout(local.ty);
            offset += size;
            offset = align_to(offset, align);
            local.stack_offset.set(-offset);
        }
        let mut vla_var_offsets = vec![0i64; func.vla_vars.borrow().len()];
        for local in locals.iter() {
            if let TypeKind::Vla { len_var, .. } = local.ty.kind {
                vla_var_offsets[len_var.0 as usize] = local.stack_offset.get();
            }
        }
        cg.vla_var_offsets = vla_var_offsets;
    }

    cg.lvar_stack_size = offset;
    cg.peak_stack_usage = offset;

    let quoted = format!("\"{}\"", obj.name);
    if !obj.is_static {
        cg.emit(format_args!("  .globl {quoted}"))?;
    } else {
        cg.emit(format_args!("  .local {quoted}"))?;
    }
    cg.emit(format_args!("  .text"))?;
    cg.emit(format_args!("{quoted}:"))?;
    cg.emit(format_args!("  push %rbp"))?;
    cg.emit(format_args!("  mov %rsp, %rbp"))?;

    let placeholder_pos = cg.out.len();
    let placeholder = placeholder_line();
    let placeholder_len = placeholder.len();
    cg.emit(format_args!("{placeholder}"))?;

    if obj.is_variadic {
        emit_variadic_save(cg)?;
    }

    let mut gp_used = if large_return { 1 } else { 0usize };
    let mut fp_used = 0usize;
    if let Some(ofs) = cg.hidden_ret_ptr_offset {
        cg.emit(format_args!("  mov %rdi, {ofs}(%rbp)"))?;
    }

    let params = func.params.borrow();
    let param_types: Vec<&Type> = params.iter().map(|p| p.ty).collect();
    let (classes, stack_bytes) = abi::classify_args(param_types.iter().copied(), &mut gp_used, &mut fp_used);
    materialize_params(cg, &params, &param_types, &classes)?;
    cg.variadic_gp_used = gp_used as i64;
    cg.variadic_fp_used = fp_used as i64;
    if obj.is_variadic {
        cg.variadic_overflow_offset = 16 + stack_bytes;
    }
    drop(params);

    if let Some(ofs) = cg.vla_init_rsp_offset {
        cg.emit(format_args!("  mov %rsp, {ofs}(%rbp)"))?;
    }

    super::stmt::gen_stmt(cg, body)?;

    let ret_label = cg.ret_label.clone();
    cg.emit(format_args!("{ret_label}:"))?;
    cg.emit(format_args!("  mov %rbp, %rsp"))?;
    cg.emit(format_args!("  pop %rbp"))?;
    cg.emit(format_args!("  ret"))?;

    let frame_size = align_to(cg.peak_stack_usage, 16);
    let patched = format!("  sub ${:0>width$}, %rsp", frame_size, width = PLACEHOLDER_DIGITS);
    debug_assert_eq!(patched.len(), placeholder_len);
    cg.out.replace_range(placeholder_pos..placeholder_pos + placeholder_len, &patched);

    Ok(())
}

/// Unconditionally spill the 6 GP argument registers, then (skipped if
/// `%al == 0`, i.e. no variadic call passed any FP argument) the 8 XMM
/// registers, into the fixed `[-176, 0)` register-save area `va_start`
/// reads from.
fn emit_variadic_save(cg: &mut CodeGen) -> Result<(), CodeGenError> {
    for (i, reg) in GP_ARG_REGS_64.iter().enumerate() {
        let ofs = -176 + (i as i64) * 8;
        cg.emit(format_args!("  mov {reg}, {ofs}(%rbp)"))?;
    }
    let skip = cg.label("va_fp_skip");
    cg.emit(format_args!("  test %al, %al"))?;
    cg.emit(format_args!("  je {skip}"))?;
    for (i, xmm) in XMM.iter().enumerate() {
        let ofs = -128 + (i as i64) * 16;
        cg.emit(format_args!("  movsd {xmm}, {ofs}(%rbp)"))?;
    }
    cg.emit(format_args!("{skip}:"))
}

fn sized_gp_reg(size: i64, idx: usize) -> &'static str {
    match size {
        1 => GP_ARG_REGS_8[idx],
        2 => GP_ARG_REGS_16[idx],
        4 => GP_ARG_REGS_32[idx],
        _ => GP_ARG_REGS_64[idx],
    }
}

/// Copy each incoming parameter from its classified register/stack source
/// into the local frame slot `new_local` already reserved for it — the
/// callee-side mirror of `codegen::call`'s `place_arg`, except every
/// destination is a fixed local offset rather than a popped spill value.
fn materialize_params<'a>(cg: &mut CodeGen, params: &[&'a Object<'a>], types: &[&'a Type<'a>], classes: &[abi::ArgClass]) -> Result<(), CodeGenError> {
    let mut gp = if cg.hidden_ret_ptr_offset.is_some() { 1 } else { 0 };
    let mut fp = 0usize;
    for ((param, ty), class) in params.iter().zip(types).zip(classes) {
        let dst = param.stack_offset.get();
        match *class {
            abi::ArgClass::Register { eightbytes, sse } => {
                if abi::is_small_aggregate(ty) {
                    for k in 0..eightbytes as usize {
                        let ofs = dst + (k as i64) * 8;
                        if sse[k] {
                            cg.emit(format_args!("  movsd {}, {ofs}(%rbp)", XMM[fp]))?;
                            fp += 1;
                        } else {
                            cg.emit(format_args!("  mov {}, {ofs}(%rbp)", GP_ARG_REGS_64[gp]))?;
                            gp += 1;
                        }
                    }
                } else {
                    match ty.kind {
                        TypeKind::Float => {
                            cg.emit(format_args!("  movss {}, {dst}(%rbp)", XMM[fp]))?;
                            fp += 1;
                        }
                        TypeKind::Double => {
                            cg.emit(format_args!("  movsd {}, {dst}(%rbp)", XMM[fp]))?;
                            fp += 1;
                        }
                        _ => {
                            let size = ty.size.get().max(4);
                            cg.emit(format_args!("  mov {}, {dst}(%rbp)", sized_gp_reg(size, gp)))?;
                            gp += 1;
                        }
                    }
                }
            }
            abi::ArgClass::Stack { offset } => {
                let src = 16 + offset;
                if matches!(ty.kind, TypeKind::Struct(_) | TypeKind::Union(_)) {
                    super::expr::mem_copy(cg, src, "%rbp", dst, "%rbp", ty.size.get())?;
                } else {
                    match ty.kind {
                        TypeKind::Float => {
                            cg.emit(format_args!("  movss {src}(%rbp), %xmm8"))?;
                            cg.emit(format_args!("  movss %xmm8, {dst}(%rbp)"))?;
                        }
                        TypeKind::Double => {
                            cg.emit(format_args!("  movsd {src}(%rbp), %xmm8"))?;
                            cg.emit(format_args!("  movsd %xmm8, {dst}(%rbp)"))?;
                        }
                        TypeKind::LongDouble => {
                            cg.emit(format_args!("  fldt {src}(%rbp)"))?;
                            cg.emit(format_args!("  fstpt {dst}(%rbp)"))?;
                        }
                        _ => {
                            cg.emit(format_args!("  mov {src}(%rbp), %r11"))?;
                            cg.emit(format_args!("  mov %r11, {dst}(%rbp)"))?;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_slot_layout_rounds_large_arrays_to_16() {
        use crate::types::TypeArena;
        let arena = TypeArena::new();
        let arr = arena.alloc(Type {
            kind: TypeKind::Array { elem: arena.char_ty(), len: 20 },
            size: std::cell::Cell::new(20),
            align: std::cell::Cell::new(1),
            is_unsigned: false,
            origin: None,
        });
        let (size, align) = local_slot_layout(arr);
        assert_eq!(size, 20);
        assert_eq!(align, 16);
    }

    #[test]
    fn vla_local_slot_is_pointer_sized() {
        use crate::types::{TypeArena, VlaSizeVar};
        let arena = TypeArena::new();
        let vla = arena.alloc(Type {
            kind: TypeKind::Vla { elem: arena.int(), len_var: VlaSizeVar(0) },
            size: std::cell::Cell::new(0),
            align: std::cell::Cell::new(0),
            is_unsigned: false,
            origin: None,
        });
        assert_eq!(local_slot_layout(vla), (8, 8));
    }

    #[test]
    fn placeholder_and_patched_prologue_lines_match_in_length() {
        let placeholder = placeholder_line();
        let patched = format!("  sub ${:0>width$}, %rsp", 48, width = PLACEHOLDER_DIGITS);
        assert_eq!(placeholder.len(), patched.len());
    }
}
