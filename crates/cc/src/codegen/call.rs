//! Function call codegen and the `va_start`/`va_arg` machinery.
//!
//! Every argument is evaluated left to right and spilled to the virtual
//! stack first, exactly like a binary operator's operands ("evaluate lhs,
//! push, evaluate rhs") — this guarantees a later argument's evaluation
//! can't clobber an earlier one's already-computed value. Only once every
//! argument (and, for an indirect call, the callee expression itself) has a
//! value parked on the spill stack do we classify the whole list per SysV
//! and pop values back out into the registers/stack slots the
//! classification picked.

use crate::ast::{Callee, Node, NodeKind, VarRef};
use crate::types::{Type, TypeKind};

use super::abi::{self, is_large_aggregate, is_small_aggregate, ArgClass};
use super::cast;
use super::error::CodeGenError;
use super::expr::{gen_expr, load, mem_copy};
use super::state::{align_to, CodeGen, GP_ARG_REGS_64, XMM};

/// One scalar eightbyte's source/destination kind, independent of direction.
#[derive(Clone, Copy)]
enum Slot {
    Gp(&'static str),
    Sse(usize),
}

/// Where one argument's value(s) end up, computed in left-to-right argument
/// order up front so the actual register names don't depend on the order
/// values get popped back off the spill stack.
enum Dest {
    Scalar(Slot),
    Struct { slots: Vec<Slot> },
    Stack { offset: i64, is_aggregate: bool },
}

fn compute_dests<'a>(arg_types: &[&'a Type<'a>], classes: &[ArgClass], gp_start: usize, fp_start: usize) -> Vec<Dest> {
    let mut gp = gp_start;
    let mut fp = fp_start;
    let mut dests = Vec::with_capacity(classes.len());
    for (ty, class) in arg_types.iter().zip(classes) {
        match *class {
            ArgClass::Stack { offset } => {
                dests.push(Dest::Stack { offset, is_aggregate: matches!(ty.kind, TypeKind::Struct(_) | TypeKind::Union(_)) });
            }
            ArgClass::Register { eightbytes, sse } => {
                let mut slots = Vec::new();
                for k in 0..eightbytes as usize {
                    if sse[k] {
                        slots.push(Slot::Sse(fp));
                        fp += 1;
                    } else {
                        slots.push(Slot::Gp(GP_ARG_REGS_64[gp]));
                        gp += 1;
                    }
                }
                if is_small_aggregate(ty) {
                    dests.push(Dest::Struct { slots });
                } else {
                    dests.push(Dest::Scalar(slots[0]));
                }
            }
        }
    }
    dests
}

/// Pop one already-evaluated argument (a scalar value, or a struct/union's
/// *address*, per the aggregate-value-is-its-address convention in
/// `expr.rs`) into its destination.
fn place_arg<'a>(cg: &mut CodeGen, ty: &'a Type<'a>, dest: &Dest) -> Result<(), CodeGenError> {
    match dest {
        Dest::Scalar(Slot::Gp(reg)) => cg.pop(reg),
        Dest::Scalar(Slot::Sse(idx)) => cg.popf(XMM[*idx]),
        Dest::Struct { slots } => {
            cg.pop("%r11")?;
            for (k, slot) in slots.iter().enumerate() {
                let ofs = (k * 8) as i64;
                match slot {
                    Slot::Gp(reg) => cg.emit(format_args!("  mov {ofs}(%r11), {reg}")),
                    Slot::Sse(idx) => cg.emit(format_args!("  movsd {ofs}(%r11), {}", XMM[*idx])),
                }?;
            }
            Ok(())
        }
        Dest::Stack { offset, is_aggregate } => {
            if *is_aggregate {
                cg.pop("%r11")?;
                mem_copy(cg, 0, "%r11", *offset, "%rsp", ty.size.get())
            } else {
                match ty.kind {
                    TypeKind::Float | TypeKind::Double => {
                        cg.popf("%xmm8")?;
                        cg.emit(format_args!("  movsd %xmm8, {offset}(%rsp)"))
                    }
                    TypeKind::LongDouble => {
                        cg.pop_x87()?;
                        cg.emit(format_args!("  fstpt {offset}(%rsp)"))
                    }
                    _ => {
                        cg.pop("%r11")?;
                        cg.emit(format_args!("  mov %r11, {offset}(%rsp)"))
                    }
                }
            }
        }
    }
}

fn push_arg<'a>(cg: &mut CodeGen, ty: &'a Type<'a>) -> Result<(), CodeGenError> {
    match ty.kind {
        TypeKind::Float | TypeKind::Double => cg.pushf(),
        TypeKind::LongDouble => cg.push_x87(),
        _ => cg.push(),
    }
}

pub fn gen_call<'a>(cg: &mut CodeGen, node: &'a Node<'a>) -> Result<(), CodeGenError> {
    let NodeKind::FuncCall { callee, args } = &node.kind else { unreachable!() };
    let ret_ty = node.ty().ok_or_else(|| CodeGenError::from("call has no result type"))?;
    let large_return = is_large_aggregate(ret_ty);

    for a in args {
        gen_expr(cg, a)?;
        push_arg(cg, a.ty().ok_or_else(|| CodeGenError::from("call argument has no type"))?)?;
    }
    let indirect_target = match callee {
        Callee::Indirect(target) => {
            gen_expr(cg, target)?;
            cg.push()?;
            true
        }
        Callee::Named(_) => false,
    };

    let mut gp_used = if large_return { 1 } else { 0 };
    let mut fp_used = 0usize;
    let arg_types: Vec<&Type> = args.iter().map(|a| a.ty().unwrap()).collect();
    let (classes, stack_bytes) = abi::classify_args(arg_types.iter().copied(), &mut gp_used, &mut fp_used);
    let dests = compute_dests(&arg_types, &classes, if large_return { 1 } else { 0 }, 0);
    let stack_bytes = align_to(stack_bytes, 16);

    let return_buf_offset = if large_return { Some(cg.reserve_bytes(ret_ty.size.get())) } else { None };

    if stack_bytes > 0 {
        cg.emit(format_args!("  sub ${stack_bytes}, %rsp"))?;
    }
    for (i, dest) in dests.iter().enumerate().rev() {
        place_arg(cg, arg_types[i], dest)?;
    }
    if indirect_target {
        cg.pop("%r10")?;
    }
    if let Some(ofs) = return_buf_offset {
        cg.emit(format_args!("  lea -{ofs}(%rbp), %rdi"))?;
    }
    if is_variadic_callee_guess(callee) {
        cg.emit(format_args!("  mov ${fp_used}, %eax"))?;
    }
    match callee {
        Callee::Named(name) => cg.emit(format_args!("  call \"{name}\""))?,
        Callee::Indirect(_) => cg.emit(format_args!("  call *%r10"))?,
    }
    if stack_bytes > 0 {
        cg.emit(format_args!("  add ${stack_bytes}, %rsp"))?;
    }

    if large_return {
        // The callee hands the hidden pointer back in %rax too; nothing
        // further to do.
        return Ok(());
    }
    if is_small_aggregate(ret_ty) {
        return unpack_return_struct(cg, ret_ty);
    }
    narrow_call_result(cg, ret_ty)
}

/// We don't carry prototype information for indirect calls through a
/// function pointer at this call site (only the pointee's `FunctionType`,
/// which does record variadicity) — named calls look the callee's type up
/// directly. Either way this only affects whether `%al` carries the SSE
/// argument count, which a non-variadic callee simply ignores.
fn is_variadic_callee_guess(callee: &Callee) -> bool {
    match callee {
        Callee::Named(_) => true,
        Callee::Indirect(target) => match target.ty().map(|t| &t.kind) {
            Some(TypeKind::Pointer(inner)) => matches!(&inner.kind, TypeKind::Function(f) if f.is_variadic),
            Some(TypeKind::Function(f)) => f.is_variadic,
            _ => false,
        },
    }
}

fn narrow_call_result(cg: &mut CodeGen, ty: &Type) -> Result<(), CodeGenError> {
    if let Some(seq) = cast::narrow_int(ty) {
        cg.emit(format_args!("  {seq}"))?;
    }
    Ok(())
}

/// After a call returning a small struct/union, the value arrived in up to
/// two registers (classified like an argument). Materialize it into a fresh
/// buffer and leave that buffer's address in `%rax`, matching the
/// aggregate-value-is-its-address convention used everywhere else.
fn unpack_return_struct(cg: &mut CodeGen, ty: &Type) -> Result<(), CodeGenError> {
    let sse0 = abi::has_flonum1(ty);
    let sse1 = ty.size.get() > 8 && abi::has_flonum2(ty);
    let ofs = cg.reserve_bytes(ty.size.get());
    if sse0 {
        cg.emit(format_args!("  movsd %xmm0, -{ofs}(%rbp)"))?;
    } else {
        cg.emit(format_args!("  mov %rax, -{ofs}(%rbp)"))?;
    }
    if ty.size.get() > 8 {
        if sse1 {
            cg.emit(format_args!("  movsd %xmm1, -{}(%rbp)", ofs - 8))?;
        } else {
            let reg = if sse0 { "%rax" } else { "%rdx" };
            cg.emit(format_args!("  mov {reg}, -{}(%rbp)", ofs - 8))?;
        }
    }
    cg.emit(format_args!("  lea -{ofs}(%rbp), %rax"))
}

/// Pack a struct/union return value (whose address is in `%rax`, per
/// convention) into the registers the SysV classification assigns it —
/// the return-side mirror of [`unpack_return_struct`]. Used by
/// `codegen::stmt`'s `return` lowering.
pub fn pack_return_struct(cg: &mut CodeGen, ty: &Type) -> Result<(), CodeGenError> {
    let sse0 = abi::has_flonum1(ty);
    let sse1 = ty.size.get() > 8 && abi::has_flonum2(ty);
    cg.emit(format_args!("  mov %rax, %r11"))?;
    if sse0 {
        cg.emit(format_args!("  movsd (%r11), %xmm0"))?;
    } else {
        cg.emit(format_args!("  mov (%r11), %rax"))?;
    }
    if ty.size.get() > 8 {
        let reg = if sse1 { "%xmm1" } else if sse0 { "%rax" } else { "%rdx" };
        let insn = if sse1 { "movsd" } else { "mov" };
        cg.emit(format_args!("  {insn} 8(%r11), {reg}"))?;
    }
    Ok(())
}

/// `__builtin_va_start(ap, last)`: populate the four `va_list` fields from
/// the running register-consumption counts the prologue recorded plus the
/// two fixed areas of the register-save area.
pub fn gen_va_start<'a>(cg: &mut CodeGen, ap: &'a Node<'a>, _last_param: VarRef<'a>) -> Result<(), CodeGenError> {
    gen_expr(cg, ap)?;
    cg.emit(format_args!("  mov %rax, %r11"))?;
    cg.emit(format_args!("  movl ${}, (%r11)", cg.variadic_gp_used * 8))?;
    cg.emit(format_args!("  movl ${}, 4(%r11)", 48 + cg.variadic_fp_used * 16))?;
    cg.emit(format_args!("  lea {}(%rbp), %rax", cg.variadic_overflow_offset))?;
    cg.emit(format_args!("  mov %rax, 8(%r11)"))?;
    cg.emit(format_args!("  lea -176(%rbp), %rax"))?;
    cg.emit(format_args!("  mov %rax, 16(%r11)"))
}

/// `__builtin_va_arg(ap, T)`: fetch the next argument of type `T`, advancing
/// `ap`'s register or overflow-area cursor.
pub fn gen_va_arg<'a>(cg: &mut CodeGen, ap: &'a Node<'a>, ty: &'a Type<'a>) -> Result<(), CodeGenError> {
    gen_expr(cg, ap)?;
    cg.emit(format_args!("  mov %rax, %r11"))?;

    if matches!(ty.kind, TypeKind::LongDouble) || matches!(ty.kind, TypeKind::Struct(_) | TypeKind::Union(_)) {
        return gen_va_arg_overflow(cg, ty);
    }

    let is_fp = matches!(ty.kind, TypeKind::Float | TypeKind::Double);
    let (max_offset, offset_field, step) = if is_fp { (176i64, 4i64, 16i64) } else { (48i64, 0i64, 8i64) };
    let l_stack = cg.label("va_stack");
    let l_end = cg.label("va_end");

    cg.emit(format_args!("  movl {offset_field}(%r11), %eax"))?;
    cg.emit(format_args!("  cmp ${max_offset}, %eax"))?;
    cg.emit(format_args!("  jae {l_stack}"))?;
    cg.emit(format_args!("  mov 16(%r11), %rdx"))?;
    cg.emit(format_args!("  add %rax, %rdx"))?;
    cg.emit(format_args!("  add ${step}, %eax"))?;
    cg.emit(format_args!("  movl %eax, {offset_field}(%r11)"))?;
    cg.emit(format_args!("  jmp {l_end}"))?;
    cg.emit(format_args!("{l_stack}:"))?;
    cg.emit(format_args!("  mov 8(%r11), %rdx"))?;
    cg.emit(format_args!("  lea 8(%rdx), %rax"))?;
    cg.emit(format_args!("  mov %rax, 8(%r11)"))?;
    cg.emit(format_args!("{l_end}:"))?;
    cg.emit(format_args!("  mov %rdx, %rax"))?;
    load(cg, ty)
}

/// Aggregates and `long double` varargs are conservatively fetched from the
/// overflow area only — the common case for a correctly prototyped variadic
/// call, and simpler than replicating the full eightbyte-classification walk
/// for the register-save path (noted as a simplification in DESIGN.md).
fn gen_va_arg_overflow(cg: &mut CodeGen, ty: &Type) -> Result<(), CodeGenError> {
    cg.emit(format_args!("  mov 8(%r11), %rdx"))?;
    let size = align_to(ty.size.get().max(8), 8);
    cg.emit(format_args!("  lea {size}(%rdx), %rax"))?;
    cg.emit(format_args!("  mov %rax, 8(%r11)"))?;
    cg.emit(format_args!("  mov %rdx, %rax"))?;
    load(cg, ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_dests_assigns_registers_in_argument_order() {
        use crate::types::TypeArena;
        let arena = TypeArena::new();
        let int_ty = arena.int();
        let arg_types = vec![int_ty, int_ty];
        let classes = vec![
            ArgClass::Register { eightbytes: 1, sse: [false, false] },
            ArgClass::Register { eightbytes: 1, sse: [false, false] },
        ];
        let dests = compute_dests(&arg_types, &classes, 0, 0);
        match (&dests[0], &dests[1]) {
            (Dest::Scalar(Slot::Gp(a)), Dest::Scalar(Slot::Gp(b))) => {
                assert_eq!(*a, "%rdi");
                assert_eq!(*b, "%rsi");
            }
            _ => panic!("expected two GP scalar destinations"),
        }
    }
}
