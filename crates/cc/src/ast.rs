//! The typed AST produced by the parser/semantic analyzer.
//!
//! `Node` is a tagged variant carrying a source token, a result type filled
//! in during analysis, and kind-specific children (spec §3). As in the type
//! arena, nodes borrow from a per-translation-unit [`bumpalo::Bump`] so the
//! tree can freely cross-reference siblings (e.g. a `goto`'s `target_vla`)
//! without reference counting.

use crate::types::Type;
use std::cell::RefCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePos {
    pub file: crate::token::FileId,
    pub line: u32,
    /// File/line as remapped by `#line` (spec §4.1 "Line control"); equal to
    /// `file`/`line` unless a `#line` directive was active. `.loc` emission
    /// uses these so debug-info line numbers follow `#line`, matching
    /// `__FILE__`/`__LINE__`.
    pub display_file: crate::token::FileId,
    pub display_line: u32,
}

/// One AST node. `ty` starts `None` and is filled in by the analyzer; every
/// node that survives analysis has `ty.is_some()` (spec §8's invariant).
pub struct Node<'a> {
    pub pos: SourcePos,
    pub ty: RefCell<Option<&'a Type<'a>>>,
    pub kind: NodeKind<'a>,
}

pub enum NodeKind<'a> {
    // ---- literals / references ----
    Num(i128),
    FloatNum(f64),
    Var(VarRef<'a>),
    StrLit { label: String },

    // ---- arithmetic / logical ----
    Add(&'a Node<'a>, &'a Node<'a>),
    Sub(&'a Node<'a>, &'a Node<'a>),
    Mul(&'a Node<'a>, &'a Node<'a>),
    Div(&'a Node<'a>, &'a Node<'a>),
    Mod(&'a Node<'a>, &'a Node<'a>),
    BitAnd(&'a Node<'a>, &'a Node<'a>),
    BitOr(&'a Node<'a>, &'a Node<'a>),
    BitXor(&'a Node<'a>, &'a Node<'a>),
    Shl(&'a Node<'a>, &'a Node<'a>),
    Shr(&'a Node<'a>, &'a Node<'a>),
    Neg(&'a Node<'a>),
    Pos(&'a Node<'a>),
    Not(&'a Node<'a>),
    BitNot(&'a Node<'a>),
    LogAnd(&'a Node<'a>, &'a Node<'a>),
    LogOr(&'a Node<'a>, &'a Node<'a>),

    // ---- comparisons ----
    Eq(&'a Node<'a>, &'a Node<'a>),
    Ne(&'a Node<'a>, &'a Node<'a>),
    Lt(&'a Node<'a>, &'a Node<'a>),
    Le(&'a Node<'a>, &'a Node<'a>),

    // ---- lvalues / memory ----
    Deref(&'a Node<'a>),
    Addr(&'a Node<'a>),
    Member { base: &'a Node<'a>, member_index: usize },
    Assign { lhs: &'a Node<'a>, rhs: &'a Node<'a> },
    Cast(&'a Node<'a>),
    Cond { cond: &'a Node<'a>, then: &'a Node<'a>, els: &'a Node<'a> },
    Comma(&'a Node<'a>, &'a Node<'a>),
    /// `a ?: b` (GNU extension, spec §4.3): `cond` is evaluated exactly once;
    /// if it is non-zero its value is the result, otherwise `rhs` is
    /// evaluated and used. No separate temporary is materialized — `cond`'s
    /// value is still live in the accumulator register at the point codegen
    /// tests it, so the "cache `a`, test it, yield it or `b`" shortcut falls
    /// out of ordinary compare-and-branch code.
    Chain { cond: &'a Node<'a>, rhs: &'a Node<'a> },
    FuncCall { callee: Callee<'a>, args: Vec<&'a Node<'a>> },
    StmtExpr(&'a Node<'a>),
    CompoundLiteral { label: String },
    Memzero { var: VarRef<'a> },
    Alloca(&'a Node<'a>),
    VaStart { ap: &'a Node<'a>, last_param: VarRef<'a> },
    VaCopy { dst: &'a Node<'a>, src: &'a Node<'a> },
    VaArg { ap: &'a Node<'a> },
    LabelVal(String),

    // ---- statements ----
    If { cond: &'a Node<'a>, then: &'a Node<'a>, els: Option<&'a Node<'a>> },
    For {
        init: Option<&'a Node<'a>>,
        cond: Option<&'a Node<'a>>,
        inc: Option<&'a Node<'a>>,
        body: &'a Node<'a>,
        brk_label: String,
        cont_label: String,
    },
    Do { body: &'a Node<'a>, cond: &'a Node<'a>, brk_label: String, cont_label: String },
    Switch { cond: &'a Node<'a>, body: &'a Node<'a>, cases: Vec<CaseArm>, default_label: Option<String>, brk_label: String },
    Case { label: String, body: &'a Node<'a> },
    Block(Vec<&'a Node<'a>>),
    Return(Option<&'a Node<'a>>),
    /// `target_vla` starts unresolved and is filled in once the whole
    /// function body has been parsed and every label's VLA depth is known
    /// (a `goto` may target a label that appears lexically later, spec
    /// §4.3's "resolution happens after the body is parsed").
    Goto { label: String, top_vla: Option<u32>, target_vla: RefCell<Option<u32>> },
    ComputedGoto(&'a Node<'a>),
    Label { name: String, body: &'a Node<'a> },
    Break { target_label: String, top_vla: Option<u32>, target_vla: Option<u32> },
    Continue { target_label: String, top_vla: Option<u32>, target_vla: Option<u32> },
    ExprStmt(&'a Node<'a>),
    NullExpr,
    InlineAsm(String),
}

/// The thing being called: a direct reference by name (the common case,
/// resolved to a symbol at emission time) or an arbitrary expression yielding
/// a function pointer (`(*fp)(...)`, `table[i](...)`).
pub enum Callee<'a> {
    Named(String),
    Indirect(&'a Node<'a>),
}

/// A case arm's low/high bound (GNU `case LO ... HI:` ranges collapse to
/// `lo == hi` for the ordinary single-value form).
#[derive(Debug, Clone)]
pub struct CaseArm {
    pub lo: i64,
    pub hi: i64,
    pub label: String,
}

/// Reference to a named object (spec §3's Object). Locals carry a stack
/// offset assigned during codegen's frame-layout pass; that offset lives on
/// the `Object` itself (see [`crate::sema::Object`]), not here — `VarRef`
/// just identifies *which* object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarRef<'a> {
    pub object: &'a crate::sema::Object<'a>,
}

impl<'a> Node<'a> {
    pub fn ty(&self) -> Option<&'a Type<'a>> {
        *self.ty.borrow()
    }

    pub fn set_ty(&self, ty: &'a Type<'a>) {
        *self.ty.borrow_mut() = ty.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::FileId;

    #[test]
    fn node_type_starts_unset_and_can_be_filled() {
        let arena = crate::types::TypeArena::new();
        let node = Node {
            pos: SourcePos { file: FileId(0), line: 1, display_file: FileId(0), display_line: 1 },
            ty: RefCell::new(None),
            kind: NodeKind::Num(14),
        };
        assert!(node.ty().is_none());
        node.set_ty(arena.int());
        assert!(node.ty().is_some());
    }
}
