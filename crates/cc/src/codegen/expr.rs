//! Expression code generation: producing an address (`gen_addr`) or a value
//! in `%rax`/`%xmm0`/the x87 top-of-stack (`gen_expr`) for every
//! [`NodeKind`] that isn't purely a statement form.
//!
//! A struct/union-typed expression's "value" is its address, left in `%rax`
//! — the same convention the reference implementation uses, since a whole
//! aggregate can't live in one register. [`load`] is a no-op for these types
//! for exactly that reason.

use crate::ast::{Node, NodeKind};
use crate::sema::Object;
use crate::types::{Type, TypeKind};

use super::cast;
use super::error::CodeGenError;
use super::state::{reg_ax, reg_dx, regop_ax, CodeGen};

/// Compute the address of an lvalue into `%rax`.
pub fn gen_addr<'a>(cg: &mut CodeGen, node: &'a Node<'a>) -> Result<(), CodeGenError> {
    match &node.kind {
        NodeKind::Var(vref) => gen_var_addr(cg, vref.object),
        NodeKind::Deref(inner) => gen_expr(cg, inner),
        NodeKind::StrLit { label } => cg.emit(format_args!("  lea \"{label}\"(%rip), %rax")),
        NodeKind::Member { base, member_index } => {
            gen_member_base_addr(cg, base)?;
            let offset = member_offset(base, *member_index)?;
            cg.emit(format_args!("  add ${offset}, %rax"))
        }
        NodeKind::FuncCall { .. } | NodeKind::Assign { .. } | NodeKind::Cond { .. } | NodeKind::StmtExpr(_) | NodeKind::VaArg { .. } => {
            // These evaluate to a struct/union address directly in %rax
            // already, same as `gen_addr` would compute — see the module
            // doc comment.
            gen_expr(cg, node)
        }
        _ => Err(CodeGenError::from("not an lvalue")),
    }
}

/// `Member`'s base might itself be one of the value-producing forms above
/// (e.g. `f().field` or `(a, s).field`), in which case its "address" is
/// simply its value (already a struct address per the %rax convention).
fn gen_member_base_addr<'a>(cg: &mut CodeGen, base: &'a Node<'a>) -> Result<(), CodeGenError> {
    match &base.kind {
        NodeKind::FuncCall { .. } | NodeKind::Assign { .. } | NodeKind::Cond { .. } | NodeKind::StmtExpr(_) | NodeKind::VaArg { .. } => {
            gen_expr(cg, base)
        }
        _ => gen_addr(cg, base),
    }
}

fn member_offset<'a>(base: &'a Node<'a>, index: usize) -> Result<i64, CodeGenError> {
    let ty = base.ty().ok_or_else(|| CodeGenError::from("member base has no type"))?;
    match &ty.kind {
        TypeKind::Struct(agg) | TypeKind::Union(agg) => Ok(agg.members[index].offset),
        _ => Err(CodeGenError::from("member access on non-aggregate")),
    }
}

fn gen_var_addr(cg: &mut CodeGen, obj: &Object) -> Result<(), CodeGenError> {
    if matches!(obj.ty.kind, TypeKind::Vla { .. }) {
        return cg.emit(format_args!("  mov {}(%rbp), %rax", obj.stack_offset.get()));
    }
    if obj.is_local {
        return cg.emit(format_args!("  lea {}(%rbp), %rax", obj.stack_offset.get()));
    }
    if obj.is_tls {
        cg.emit(format_args!("  mov %fs:0, %rax"))?;
        return cg.emit(format_args!("  add $\"{}\"@tpoff, %rax", obj.name));
    }
    cg.emit(format_args!("  lea \"{}\"(%rip), %rax", obj.name))
}

/// Load the value an address in `%rax` points to, according to `ty`.
pub fn load(cg: &mut CodeGen, ty: &Type) -> Result<(), CodeGenError> {
    match ty.kind {
        TypeKind::Array { .. } | TypeKind::Vla { .. } | TypeKind::Struct(_) | TypeKind::Union(_) | TypeKind::Function(_) => Ok(()),
        TypeKind::Float => cg.emit(format_args!("  movss (%rax), %xmm0")),
        TypeKind::Double => cg.emit(format_args!("  movsd (%rax), %xmm0")),
        TypeKind::LongDouble => cg.emit(format_args!("  fninit\n  fldt (%rax)")),
        _ => {
            let insn = if ty.is_unsigned { "movz" } else { "movs" };
            match ty.size.get() {
                1 => cg.emit(format_args!("  {insn}bl (%rax), {}", regop_ax(4))),
                2 => cg.emit(format_args!("  {insn}wl (%rax), {}", regop_ax(4))),
                4 => cg.emit(format_args!("  movl (%rax), %eax")),
                _ => cg.emit(format_args!("  mov (%rax), %rax")),
            }
        }
    }
}

/// Store `%rax`/`%xmm0`/x87-top to the address on top of the virtual stack.
pub fn store(cg: &mut CodeGen, ty: &Type) -> Result<(), CodeGenError> {
    cg.pop("%rcx")?;
    match ty.kind {
        TypeKind::Struct(_) | TypeKind::Union(_) => mem_copy(cg, 0, "%rax", 0, "%rcx", ty.size.get()),
        TypeKind::Float => cg.emit(format_args!("  movss %xmm0, (%rcx)")),
        TypeKind::Double => cg.emit(format_args!("  movsd %xmm0, (%rcx)")),
        TypeKind::LongDouble => cg.emit(format_args!("  fstpt (%rcx)\n  fninit\n  fldt (%rcx)")),
        _ => match ty.size.get() {
            1 => cg.emit(format_args!("  mov %al, (%rcx)")),
            2 => cg.emit(format_args!("  mov %ax, (%rcx)")),
            4 => cg.emit(format_args!("  mov %eax, (%rcx)")),
            _ => cg.emit(format_args!("  mov %rax, (%rcx)")),
        },
    }
}

/// Copy `size` bytes from `[sptr+sofs]` to `[dptr+dofs]`, in units no larger
/// than 8 bytes via a general-purpose register (a simplified version of the
/// reference implementation's copy loop, which also has a 16-byte `movups`
/// fast path we skip for simplicity).
pub fn mem_copy(cg: &mut CodeGen, sofs: i64, sptr: &str, dofs: i64, dptr: &str, size: i64) -> Result<(), CodeGenError> {
    let mut i = 0;
    while i < size {
        let rem = size - i;
        let chunk = if rem >= 8 { 8 } else if rem >= 4 { 4 } else if rem >= 2 { 2 } else { 1 };
        cg.emit(format_args!("  mov {}({sptr}), {}", i + sofs, reg_dx(chunk)))?;
        cg.emit(format_args!("  mov {}, {}({dptr})", reg_dx(chunk), i + dofs))?;
        i += chunk;
    }
    Ok(())
}

pub fn mem_zero(cg: &mut CodeGen, dofs: i64, dptr: &str, size: i64) -> Result<(), CodeGenError> {
    cg.emit(format_args!("  xor %eax, %eax"))?;
    let mut i = 0;
    while i < size {
        let rem = size - i;
        let chunk = if rem >= 8 { 8 } else if rem >= 4 { 4 } else if rem >= 2 { 2 } else { 1 };
        cg.emit(format_args!("  mov {}, {}({dptr})", reg_ax(chunk), i + dofs))?;
        i += chunk;
    }
    Ok(())
}

pub(super) fn cmp_zero(cg: &mut CodeGen, ty: &Type) -> Result<(), CodeGenError> {
    match ty.kind {
        TypeKind::Float => {
            cg.emit(format_args!("  xorps %xmm1, %xmm1"))?;
            cg.emit(format_args!("  ucomiss %xmm1, %xmm0"))
        }
        TypeKind::Double => {
            cg.emit(format_args!("  xorpd %xmm1, %xmm1"))?;
            cg.emit(format_args!("  ucomisd %xmm1, %xmm0"))
        }
        TypeKind::LongDouble => {
            cg.emit(format_args!("  fldz"))?;
            cg.emit(format_args!("  fucomip"))?;
            cg.emit(format_args!("  fstp %st(0)"))
        }
        _ if ty.size.get() <= 4 => cg.emit(format_args!("  test %eax, %eax")),
        _ => cg.emit(format_args!("  test %rax, %rax")),
    }
}

fn bin_ty<'a>(a: &'a Node<'a>, b: &'a Node<'a>) -> Result<&'a Type<'a>, CodeGenError> {
    a.ty().or_else(|| b.ty()).ok_or_else(|| CodeGenError::from("untyped binary operand"))
}

pub fn gen_expr<'a>(cg: &mut CodeGen, node: &'a Node<'a>) -> Result<(), CodeGenError> {
    match &node.kind {
        NodeKind::NullExpr => Ok(()),
        NodeKind::Num(v) => gen_num(cg, node, *v),
        NodeKind::FloatNum(v) => gen_float_num(cg, node, *v),
        NodeKind::Var(_) => {
            gen_addr(cg, node)?;
            load(cg, node.ty().ok_or_else(|| CodeGenError::from("var has no type"))?)
        }
        NodeKind::StrLit { .. } => unreachable!("string literals are lowered to Var by the parser"),
        NodeKind::Pos(inner) => gen_expr(cg, inner),
        NodeKind::Neg(inner) => {
            gen_expr(cg, inner)?;
            match node.ty().map(|t| &t.kind) {
                Some(TypeKind::Float) => {
                    cg.emit(format_args!("  mov $1, %rax\n  shl $31, %rax\n  movq %rax, %xmm1\n  xorps %xmm1, %xmm0"))
                }
                Some(TypeKind::Double) => {
                    cg.emit(format_args!("  mov $1, %rax\n  shl $63, %rax\n  movq %rax, %xmm1\n  xorpd %xmm1, %xmm0"))
                }
                Some(TypeKind::LongDouble) => cg.emit(format_args!("  fchs")),
                _ => cg.emit(format_args!("  neg %rax")),
            }
        }
        NodeKind::Not(inner) => {
            gen_expr(cg, inner)?;
            cmp_zero(cg, inner.ty().unwrap_or(node.ty().unwrap()))?;
            cg.emit(format_args!("  sete %al\n  movzbl %al, %eax"))
        }
        NodeKind::BitNot(inner) => {
            gen_expr(cg, inner)?;
            cg.emit(format_args!("  not %rax"))
        }
        NodeKind::LogAnd(a, b) => {
            let l = cg.label("false");
            gen_expr(cg, a)?;
            cmp_zero(cg, a.ty().unwrap())?;
            cg.emit(format_args!("  je {l}"))?;
            gen_expr(cg, b)?;
            cmp_zero(cg, b.ty().unwrap())?;
            cg.emit(format_args!("  je {l}"))?;
            cg.emit(format_args!("  mov $1, %eax\n  jmp {l}.end"))?;
            cg.emit(format_args!("{l}:\n  mov $0, %eax"))?;
            cg.emit(format_args!("{l}.end:"))
        }
        NodeKind::LogOr(a, b) => {
            let l = cg.label("true");
            gen_expr(cg, a)?;
            cmp_zero(cg, a.ty().unwrap())?;
            cg.emit(format_args!("  jne {l}"))?;
            gen_expr(cg, b)?;
            cmp_zero(cg, b.ty().unwrap())?;
            cg.emit(format_args!("  jne {l}"))?;
            cg.emit(format_args!("  mov $0, %eax\n  jmp {l}.end"))?;
            cg.emit(format_args!("{l}:\n  mov $1, %eax"))?;
            cg.emit(format_args!("{l}.end:"))
        }
        NodeKind::Add(a, b) | NodeKind::Sub(a, b) | NodeKind::Mul(a, b) | NodeKind::Div(a, b) | NodeKind::Mod(a, b)
        | NodeKind::BitAnd(a, b) | NodeKind::BitOr(a, b) | NodeKind::BitXor(a, b) | NodeKind::Shl(a, b) | NodeKind::Shr(a, b)
        | NodeKind::Eq(a, b) | NodeKind::Ne(a, b) | NodeKind::Lt(a, b) | NodeKind::Le(a, b) => gen_binary(cg, node, a, b),
        NodeKind::Deref(inner) => {
            gen_expr(cg, inner)?;
            load(cg, node.ty().ok_or_else(|| CodeGenError::from("deref has no type"))?)
        }
        NodeKind::Addr(inner) => gen_addr(cg, inner),
        NodeKind::Member { .. } => {
            gen_addr(cg, node)?;
            let ty = node.ty().ok_or_else(|| CodeGenError::from("member has no type"))?;
            load(cg, ty)?;
            if let NodeKind::Member { base, member_index } = &node.kind {
                let base_ty = base.ty().unwrap();
                if let TypeKind::Struct(agg) | TypeKind::Union(agg) = &base_ty.kind {
                    if let Some(bf) = agg.members[*member_index].bitfield {
                        cg.emit(format_args!("  shl ${}, %rax", 64 - bf.bit_width - bf.bit_offset))?;
                        if ty.is_unsigned {
                            cg.emit(format_args!("  shr ${}, %rax", 64 - bf.bit_width))?;
                        } else {
                            cg.emit(format_args!("  sar ${}, %rax", 64 - bf.bit_width))?;
                        }
                    }
                }
            }
            Ok(())
        }
        NodeKind::Assign { lhs, rhs } => gen_assign(cg, lhs, rhs),
        NodeKind::Cast(inner) => {
            gen_expr(cg, inner)?;
            let from = inner.ty().ok_or_else(|| CodeGenError::from("cast source has no type"))?;
            let to = node.ty().ok_or_else(|| CodeGenError::from("cast target has no type"))?;
            gen_cast(cg, from, to)
        }
        NodeKind::Cond { cond, then, els } => {
            let l = cg.label("cond");
            gen_expr(cg, cond)?;
            cmp_zero(cg, cond.ty().unwrap())?;
            cg.emit(format_args!("  je {l}.else"))?;
            gen_expr(cg, then)?;
            cg.emit(format_args!("  jmp {l}.end"))?;
            cg.emit(format_args!("{l}.else:"))?;
            gen_expr(cg, els)?;
            cg.emit(format_args!("{l}.end:"))
        }
        NodeKind::Chain { cond, rhs } => {
            let l = cg.label("chain");
            gen_expr(cg, cond)?;
            cmp_zero(cg, cond.ty().unwrap())?;
            cg.emit(format_args!("  jne {l}.end"))?;
            gen_expr(cg, rhs)?;
            cg.emit(format_args!("{l}.end:"))
        }
        NodeKind::Comma(a, b) => {
            gen_expr(cg, a)?;
            gen_expr(cg, b)
        }
        NodeKind::FuncCall { .. } => super::call::gen_call(cg, node),
        NodeKind::StmtExpr(block) => {
            if let NodeKind::Block(stmts) = &block.kind {
                for s in stmts {
                    super::stmt::gen_stmt(cg, s)?;
                }
            }
            Ok(())
        }
        NodeKind::CompoundLiteral { label } => cg.emit(format_args!("  lea \"{label}\"(%rip), %rax")),
        NodeKind::Memzero { var } => mem_zero(cg, var.object.stack_offset.get(), "%rbp", var.object.ty.size.get()),
        NodeKind::Alloca(size) => {
            gen_expr(cg, size)?;
            cg.emit(format_args!("  sub %rax, %rsp\n  and $-16, %rsp\n  mov %rsp, %rax"))
        }
        NodeKind::VaStart { ap, last_param } => super::call::gen_va_start(cg, ap, last_param),
        NodeKind::VaCopy { dst, src } => {
            gen_addr(cg, dst)?;
            cg.push()?;
            gen_addr(cg, src)?;
            cg.emit(format_args!("  mov (%rax), %rcx\n  mov %rcx, %rdx"))?;
            cg.pop("%rax")?;
            mem_copy(cg, 0, "%rdx", 0, "%rax", 24)
        }
        NodeKind::VaArg { ap } => super::call::gen_va_arg(cg, ap, node.ty().ok_or_else(|| CodeGenError::from("va_arg has no type"))?),
        NodeKind::LabelVal(label) => {
            let dest = super::stmt::user_label(cg, label);
            cg.emit(format_args!("  lea \"{dest}\"(%rip), %rax"))
        }
        _ => Err(CodeGenError::from("statement node reached gen_expr")),
    }
}

fn gen_num(cg: &mut CodeGen, node: &Node, v: i128) -> Result<(), CodeGenError> {
    let _ = node;
    cg.emit(format_args!("  mov ${}, %rax", v as i64))
}

fn gen_float_num(cg: &mut CodeGen, node: &Node, v: f64) -> Result<(), CodeGenError> {
    match node.ty().map(|t| &t.kind) {
        Some(TypeKind::Float) => {
            let bits = (v as f32).to_bits();
            cg.emit(format_args!("  mov ${bits}, %eax\n  movq %rax, %xmm0"))
        }
        Some(TypeKind::LongDouble) => {
            let bits = v.to_bits();
            cg.emit(format_args!("  movabs ${bits}, %rax\n  push %rax\n  fninit\n  fldl (%rsp)\n  add $8, %rsp"))
        }
        _ => {
            let bits = v.to_bits();
            cg.emit(format_args!("  movabs ${bits}, %rax\n  movq %rax, %xmm0"))
        }
    }
}

fn gen_assign<'a>(cg: &mut CodeGen, lhs: &'a Node<'a>, rhs: &'a Node<'a>) -> Result<(), CodeGenError> {
    gen_addr(cg, lhs)?;
    cg.push()?;
    gen_expr(cg, rhs)?;

    if let NodeKind::Member { base, member_index } = &lhs.kind {
        let base_ty = base.ty().unwrap();
        if let TypeKind::Struct(agg) | TypeKind::Union(agg) = &base_ty.kind {
            if let Some(bf) = agg.members[*member_index].bitfield {
                return gen_bitfield_assign(cg, lhs.ty().unwrap(), bf);
            }
        }
    }

    store(cg, lhs.ty().ok_or_else(|| CodeGenError::from("assign target has no type"))?)
}

fn gen_bitfield_assign(cg: &mut CodeGen, field_ty: &Type, bf: crate::types::Bitfield) -> Result<(), CodeGenError> {
    let mask = (1i64 << bf.bit_width) - 1;
    cg.emit(format_args!("  mov ${mask}, %rcx\n  and %rcx, %rax\n  mov %rax, %rdx"))?;
    cg.pop("%rax")?;
    cg.push()?;
    load(cg, field_ty)?;
    let full_mask = !(mask << bf.bit_offset);
    cg.emit(format_args!("  mov ${full_mask}, %rcx\n  and %rcx, %rax"))?;
    cg.emit(format_args!("  mov %rdx, %rcx\n  shl ${}, %rcx\n  or %rcx, %rax", bf.bit_offset))?;
    store(cg, field_ty)?;
    cg.emit(format_args!("  mov %rdx, %rax"))?;
    if !field_ty.is_unsigned {
        cg.emit(format_args!("  shl ${}, %rax\n  sar ${}, %rax", 64 - bf.bit_width, 64 - bf.bit_width))?;
    }
    Ok(())
}

fn gen_cast(cg: &mut CodeGen, from: &Type, to: &Type) -> Result<(), CodeGenError> {
    if matches!(to.kind, TypeKind::Void) {
        return Ok(());
    }
    if matches!(to.kind, TypeKind::Bool) {
        cmp_zero(cg, from)?;
        return cg.emit(format_args!("  setne %al\n  movzx %al, %eax"));
    }
    let (fc, tc) = (cast::classify(from), cast::classify(to));
    match cast::convert(fc, tc) {
        Some(seq) => cg.emit(format_args!("  {seq}")),
        None => Ok(()),
    }
}

fn gen_binary<'a>(cg: &mut CodeGen, node: &'a Node<'a>, a: &'a Node<'a>, b: &'a Node<'a>) -> Result<(), CodeGenError> {
    let ty = bin_ty(a, b)?;
    if ty.is_float() {
        return gen_float_binary(cg, node, a, b, ty);
    }

    gen_expr(cg, a)?;
    cg.push()?;
    gen_expr(cg, b)?;
    cg.emit(format_args!("  mov %rax, %rdi"))?;
    cg.pop("%rax")?;

    let size = ty.size.get().max(a.ty().map(|t| t.size.get()).unwrap_or(8));
    let ax = reg_ax(size.max(4));
    let dst = if size <= 4 { "%edi" } else { "%rdi" };

    match &node.kind {
        NodeKind::Add(..) => cg.emit(format_args!("  add {dst}, {ax}")),
        NodeKind::Sub(..) => cg.emit(format_args!("  sub {dst}, {ax}")),
        NodeKind::Mul(..) => cg.emit(format_args!("  imul {dst}, {ax}")),
        NodeKind::Div(..) | NodeKind::Mod(..) => gen_divmod(cg, node, ty, size),
        NodeKind::BitAnd(..) => cg.emit(format_args!("  and {dst}, {ax}")),
        NodeKind::BitOr(..) => cg.emit(format_args!("  or {dst}, {ax}")),
        NodeKind::BitXor(..) => cg.emit(format_args!("  xor {dst}, {ax}")),
        NodeKind::Shl(..) => cg.emit(format_args!("  mov %edi, %ecx\n  shl %cl, {ax}")),
        NodeKind::Shr(..) => {
            if ty.is_unsigned {
                cg.emit(format_args!("  mov %edi, %ecx\n  shr %cl, {ax}"))
            } else {
                cg.emit(format_args!("  mov %edi, %ecx\n  sar %cl, {ax}"))
            }
        }
        NodeKind::Eq(..) | NodeKind::Ne(..) | NodeKind::Lt(..) | NodeKind::Le(..) => gen_int_compare(cg, node, ty),
        _ => unreachable!(),
    }
}

fn gen_divmod(cg: &mut CodeGen, node: &Node, ty: &Type, size: i64) -> Result<(), CodeGenError> {
    let is_mod = matches!(node.kind, NodeKind::Mod(..));
    if ty.is_unsigned {
        if size <= 4 {
            cg.emit(format_args!("  mov $0, %edx\n  div %edi"))?;
        } else {
            cg.emit(format_args!("  mov $0, %rdx\n  div %rdi"))?;
        }
    } else if size <= 4 {
        cg.emit(format_args!("  cdq\n  idiv %edi"))?;
    } else {
        cg.emit(format_args!("  cqo\n  idiv %rdi"))?;
    }
    if is_mod {
        cg.emit(format_args!("  mov %edx, %eax"))?;
    }
    Ok(())
}

fn gen_int_compare(cg: &mut CodeGen, node: &Node, ty: &Type) -> Result<(), CodeGenError> {
    cg.emit(format_args!("  cmp %edi, %eax"))?;
    let setcc = match (&node.kind, ty.is_unsigned) {
        (NodeKind::Eq(..), _) => "sete",
        (NodeKind::Ne(..), _) => "setne",
        (NodeKind::Lt(..), false) => "setl",
        (NodeKind::Lt(..), true) => "setb",
        (NodeKind::Le(..), false) => "setle",
        (NodeKind::Le(..), true) => "setbe",
        _ => unreachable!(),
    };
    cg.emit(format_args!("  {setcc} %al\n  movzbl %al, %eax"))
}

fn gen_float_binary<'a>(cg: &mut CodeGen, node: &'a Node<'a>, a: &'a Node<'a>, b: &'a Node<'a>, ty: &Type) -> Result<(), CodeGenError> {
    if matches!(ty.kind, TypeKind::LongDouble) {
        return gen_x87_binary(cg, node, a, b);
    }
    let (mov, suffix) = if matches!(ty.kind, TypeKind::Float) { ("movss", "ss") } else { ("movsd", "sd") };
    gen_expr(cg, a)?;
    cg.emit(format_args!("  {mov} %xmm0, %xmm1"))?;
    gen_expr(cg, b)?;
    cg.emit(format_args!("  {mov} %xmm0, %xmm0"))?;
    cg.emit(format_args!("  {mov} %xmm1, %xmm1"))?;
    match &node.kind {
        NodeKind::Add(..) => cg.emit(format_args!("  add{suffix} %xmm1, %xmm0")),
        NodeKind::Sub(..) => {
            // `xmm1 - xmm0`: subtract needs operands swapped back into order.
            cg.emit(format_args!("  sub{suffix} %xmm0, %xmm1\n  movaps %xmm1, %xmm0"))
        }
        NodeKind::Mul(..) => cg.emit(format_args!("  mul{suffix} %xmm1, %xmm0")),
        NodeKind::Div(..) => cg.emit(format_args!("  div{suffix} %xmm0, %xmm1\n  movaps %xmm1, %xmm0")),
        NodeKind::Eq(..) | NodeKind::Ne(..) | NodeKind::Lt(..) | NodeKind::Le(..) => {
            let cmp = if matches!(ty.kind, TypeKind::Float) { "ucomiss" } else { "ucomisd" };
            cg.emit(format_args!("  {cmp} %xmm0, %xmm1"))?;
            let setcc = match &node.kind {
                NodeKind::Eq(..) => "sete",
                NodeKind::Ne(..) => "setne",
                NodeKind::Lt(..) => "setb",
                NodeKind::Le(..) => "setbe",
                _ => unreachable!(),
            };
            cg.emit(format_args!("  {setcc} %al\n  movzbl %al, %eax"))
        }
        _ => unreachable!(),
    }
}

/// Simplified x87 binary op: evaluate left, push, evaluate right, pop left
/// back onto the x87 stack, then combine. The reference implementation keeps
/// both live on the x87 register stack at once; we round-trip through the
/// virtual stack since it makes ordering uniform with the int/SSE paths.
fn gen_x87_binary<'a>(cg: &mut CodeGen, node: &'a Node<'a>, a: &'a Node<'a>, b: &'a Node<'a>) -> Result<(), CodeGenError> {
    gen_expr(cg, a)?;
    cg.push_x87()?;
    gen_expr(cg, b)?;
    cg.pop_x87()?;
    match &node.kind {
        NodeKind::Add(..) => cg.emit(format_args!("  faddp")),
        NodeKind::Sub(..) => cg.emit(format_args!("  fsubrp")),
        NodeKind::Mul(..) => cg.emit(format_args!("  fmulp")),
        NodeKind::Div(..) => cg.emit(format_args!("  fdivrp")),
        NodeKind::Eq(..) | NodeKind::Ne(..) | NodeKind::Lt(..) | NodeKind::Le(..) => {
            cg.emit(format_args!("  fucomip\n  fstp %st(0)"))?;
            let setcc = match &node.kind {
                NodeKind::Eq(..) => "sete",
                NodeKind::Ne(..) => "setne",
                NodeKind::Lt(..) => "seta",
                NodeKind::Le(..) => "setae",
                _ => unreachable!(),
            };
            cg.emit(format_args!("  {setcc} %al\n  movzbl %al, %eax"))
        }
        _ => unreachable!(),
    }
}
