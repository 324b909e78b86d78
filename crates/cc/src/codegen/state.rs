//! Codegen output buffer, the virtual stack used for spilling intermediate
//! values, and the bookkeeping that's live only while one function's body is
//! being emitted.
//!
//! Grounded on the original compiler's temp-stack scheme: expressions spill
//! to named offsets below the frame pointer instead of real `push`/`pop`
//! instructions, so a deeply nested expression can't overflow the actual
//! machine stack in a way that misaligns the frame. Offsets are reused as
//! soon as a value is popped unless the function can't safely reuse stack
//! slots (`dont_reuse_stack`, set when the body calls `setjmp`).

use super::error::CodeGenError;
use std::fmt::Write as _;

pub const GP_ARG_REGS_64: [&str; 6] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];
pub const GP_ARG_REGS_32: [&str; 6] = ["%edi", "%esi", "%edx", "%ecx", "%r8d", "%r9d"];
pub const GP_ARG_REGS_16: [&str; 6] = ["%di", "%si", "%dx", "%cx", "%r8w", "%r9w"];
pub const GP_ARG_REGS_8: [&str; 6] = ["%dil", "%sil", "%dl", "%cl", "%r8b", "%r9b"];
pub const GP_MAX: usize = 6;
pub const FP_MAX: usize = 8;
pub const XMM: [&str; 8] = ["%xmm0", "%xmm1", "%xmm2", "%xmm3", "%xmm4", "%xmm5", "%xmm6", "%xmm7"];

pub struct CodeGen {
    pub out: String,
    pub label_seq: u64,
    /// Byte offsets (below `%rbp`, i.e. already negated) currently pushed on
    /// the virtual spill stack.
    tmp_stack: Vec<i64>,
    /// High-water mark of the virtual stack this function has used so far;
    /// becomes part of the frame size.
    pub peak_stack_usage: i64,
    /// Size of the local-variable area (locals + VLA size slots + register
    /// param save area), fixed before any expression codegen for the
    /// function runs.
    pub lvar_stack_size: i64,
    pub dont_reuse_stack: bool,
    pub fn_name: String,
    /// GP/SSE registers consumed by the current function's *named*
    /// parameters, recorded by the prologue so `va_start` knows where the
    /// first variadic argument's register slot is.
    pub variadic_gp_used: i64,
    pub variadic_fp_used: i64,
    /// `%rbp`-relative byte offset of the first stack-passed vararg, i.e.
    /// just past the last named stack parameter.
    pub variadic_overflow_offset: i64,
    /// Whether the function being emitted uses VLAs, and if so, where the
    /// function-wide "initial `%rsp`" snapshot lives.
    pub uses_vla: bool,
    pub vla_init_rsp_offset: Option<i64>,
    /// `%rbp`-relative byte offset of the hidden return-pointer slot, for
    /// functions returning a struct/union larger than 16 bytes.
    pub hidden_ret_ptr_offset: Option<i64>,
    /// Label the function body's `return` lowering jumps to; the real
    /// epilogue is emitted once under this label after the body.
    pub ret_label: String,
    /// `%rbp`-relative byte offset of each VLA-typed local's own stack slot,
    /// indexed by that VLA's `VlaSizeVar`, so statement codegen can restore
    /// `%rsp` on a crossing jump without threading the `FunctionObject`
    /// through. No separate snapshot memory is needed: `alloca`'s last step
    /// stores the post-allocation `%rsp` into the VLA pointer variable
    /// itself, so the variable's existing slot already holds it. Entries for
    /// an inner dimension of a multi-dimensional VLA are never populated —
    /// only a declaration's outermost dimension ever becomes a `cur_vla`
    /// value — and are never indexed.
    pub vla_var_offsets: Vec<i64>,
}

impl CodeGen {
    pub fn new() -> Self {
        CodeGen {
            out: String::new(),
            label_seq: 0,
            tmp_stack: Vec::new(),
            peak_stack_usage: 0,
            lvar_stack_size: 0,
            dont_reuse_stack: false,
            fn_name: String::new(),
            variadic_gp_used: 0,
            variadic_fp_used: 0,
            variadic_overflow_offset: 0,
            uses_vla: false,
            vla_init_rsp_offset: None,
            hidden_ret_ptr_offset: None,
            ret_label: String::new(),
            vla_var_offsets: Vec::new(),
        }
    }

    /// Reset the per-function scratch fields before emitting a new
    /// function's body; `out` and `label_seq` stay cumulative across the
    /// whole translation unit.
    pub fn begin_function(&mut self, fn_name: String, dont_reuse_stack: bool) {
        self.tmp_stack.clear();
        self.peak_stack_usage = 0;
        self.lvar_stack_size = 0;
        self.dont_reuse_stack = dont_reuse_stack;
        self.fn_name = fn_name;
        self.variadic_gp_used = 0;
        self.variadic_fp_used = 0;
        self.variadic_overflow_offset = 0;
        self.uses_vla = false;
        self.vla_init_rsp_offset = None;
        self.hidden_ret_ptr_offset = None;
        self.ret_label = String::new();
        self.vla_var_offsets.clear();
    }

    pub fn emit(&mut self, line: std::fmt::Arguments) -> Result<(), CodeGenError> {
        self.out.write_fmt(line)?;
        self.out.push('\n');
        Ok(())
    }

    pub fn label(&mut self, kind: &str) -> String {
        self.label_seq += 1;
        format!(".L.{kind}.{}", self.label_seq)
    }

    /// Reserve `n` consecutive 8-byte slots on the virtual stack and return
    /// the (positive) byte offset of the first one, below `%rbp`.
    fn reserve(&mut self, slots: i64) -> i64 {
        let offset = if self.dont_reuse_stack {
            self.peak_stack_usage += 8 * slots;
            self.peak_stack_usage
        } else {
            let base = self.tmp_stack.last().copied().unwrap_or(self.lvar_stack_size);
            let pos = base + 8 * slots;
            self.peak_stack_usage = self.peak_stack_usage.max(pos);
            pos
        };
        self.tmp_stack.push(offset);
        offset
    }

    fn release(&mut self) -> i64 {
        self.tmp_stack.pop().expect("spill stack underflow")
    }

    /// Reserve an arbitrary byte-sized buffer (rounded up to 8-byte slots)
    /// on the virtual stack, e.g. for materializing a small-struct call
    /// return into something addressable. Returns the positive byte offset
    /// of the buffer's low address, below `%rbp`.
    pub fn reserve_bytes(&mut self, size: i64) -> i64 {
        let slots = (size.max(1) + 7) / 8;
        self.reserve(slots)
    }

    /// Spill `%rax` to a fresh slot.
    pub fn push(&mut self) -> Result<(), CodeGenError> {
        let ofs = self.reserve(1);
        self.emit(format_args!("  mov %rax, -{ofs}(%rbp)"))
    }

    /// Pop the most recent spill into `reg`.
    pub fn pop(&mut self, reg: &str) -> Result<(), CodeGenError> {
        let ofs = self.release();
        self.emit(format_args!("  mov -{ofs}(%rbp), {reg}"))
    }

    pub fn pushf(&mut self) -> Result<(), CodeGenError> {
        let ofs = self.reserve(1);
        self.emit(format_args!("  movsd %xmm0, -{ofs}(%rbp)"))
    }

    pub fn popf(&mut self, xmm: &str) -> Result<(), CodeGenError> {
        let ofs = self.release();
        self.emit(format_args!("  movsd -{ofs}(%rbp), {xmm}"))
    }

    pub fn push_x87(&mut self) -> Result<(), CodeGenError> {
        let ofs = self.reserve(2);
        self.emit(format_args!("  fstpt -{ofs}(%rbp)"))
    }

    pub fn pop_x87(&mut self) -> Result<(), CodeGenError> {
        let ofs = self.release();
        self.emit(format_args!("  fldt -{ofs}(%rbp)"))
    }
}

impl Default for CodeGen {
    fn default() -> Self {
        Self::new()
    }
}

pub fn align_to(n: i64, align: i64) -> i64 {
    (n + align - 1) / align * align
}

pub fn reg_ax(size: i64) -> &'static str {
    match size {
        1 => "%al",
        2 => "%ax",
        4 => "%eax",
        _ => "%rax",
    }
}

pub fn reg_dx(size: i64) -> &'static str {
    match size {
        1 => "%dl",
        2 => "%dx",
        4 => "%edx",
        _ => "%rdx",
    }
}

/// `%eax`/`%rax` sized to hold a value of `size` bytes for arithmetic (no
/// 8/16-bit operand forms — sub-int values always live sign/zero-extended in
/// the low bits of a 32- or 64-bit register, see [`super::expr::load`]).
pub fn regop_ax(size: i64) -> &'static str {
    if size == 8 { "%rax" } else { "%eax" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_reuses_slot_when_stack_reuse_allowed() {
        let mut cg = CodeGen::new();
        cg.lvar_stack_size = 16;
        cg.push().unwrap();
        cg.pop("%rcx").unwrap();
        cg.push().unwrap();
        assert_eq!(cg.peak_stack_usage, 24);
    }

    #[test]
    fn dont_reuse_stack_keeps_growing() {
        let mut cg = CodeGen::new();
        cg.lvar_stack_size = 16;
        cg.dont_reuse_stack = true;
        cg.push().unwrap();
        cg.pop("%rcx").unwrap();
        cg.push().unwrap();
        assert_eq!(cg.peak_stack_usage, 16);
    }
}
