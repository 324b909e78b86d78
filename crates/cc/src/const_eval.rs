//! Constant expression evaluation (spec §4.2).
//!
//! Two evaluators live here because the two call sites need different input
//! shapes: `#if`/`#elif` evaluates directly over a flat token slice (nothing
//! else about the preprocessor needs an AST), while initializer folding
//! evaluates over the typed [`Node`] tree the parser builds. Both share the
//! same recursive-descent grammar (spec §4.2's precedence table) and the same
//! "integer constant expressions only admit a restricted subexpression set"
//! rule, just applied to different trees.

use crate::ast::{Node, NodeKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstEvalError {
    pub message: String,
}

impl std::fmt::Display for ConstEvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "not a constant expression: {}", self.message)
    }
}

impl std::error::Error for ConstEvalError {}

// ---------------------------------------------------------------------
// Token-level evaluator for `#if`/`#elif` conditions.
// ---------------------------------------------------------------------

pub mod tokens {
    use super::ConstEvalError;
    use crate::token::{NumKind, Token, TokenKind};

    struct Cursor<'a> {
        toks: &'a [Token],
        pos: usize,
    }

    impl<'a> Cursor<'a> {
        fn peek(&self) -> Option<&'a Token> {
            self.toks.get(self.pos)
        }
        fn bump(&mut self) -> Option<&'a Token> {
            let t = self.toks.get(self.pos);
            self.pos += 1;
            t
        }
        fn eat(&mut self, text: &str) -> bool {
            if self.peek().is_some_and(|t| t.is(text)) {
                self.pos += 1;
                true
            } else {
                false
            }
        }
    }

    /// Evaluate a fully `defined`-resolved `#if` condition to an integer.
    /// Any identifier still present (an undefined macro, per the standard) is
    /// treated as the integer `0`.
    pub fn eval(toks: &[Token]) -> Result<i64, ConstEvalError> {
        let mut c = Cursor { toks, pos: 0 };
        let v = cond(&mut c)?;
        Ok(v)
    }

    fn cond(c: &mut Cursor) -> Result<i64, ConstEvalError> {
        let v = logor(c)?;
        if c.eat("?") {
            let then_v = cond(c)?;
            if !c.eat(":") {
                return Err(ConstEvalError { message: "expected ':'".into() });
            }
            let else_v = cond(c)?;
            return Ok(if v != 0 { then_v } else { else_v });
        }
        Ok(v)
    }

    fn logor(c: &mut Cursor) -> Result<i64, ConstEvalError> {
        let mut v = logand(c)?;
        while c.eat("||") {
            let rhs = logand(c)?;
            v = ((v != 0) || (rhs != 0)) as i64;
        }
        Ok(v)
    }

    fn logand(c: &mut Cursor) -> Result<i64, ConstEvalError> {
        let mut v = bitor(c)?;
        while c.eat("&&") {
            let rhs = bitor(c)?;
            v = ((v != 0) && (rhs != 0)) as i64;
        }
        Ok(v)
    }

    fn bitor(c: &mut Cursor) -> Result<i64, ConstEvalError> {
        let mut v = bitxor(c)?;
        while c.eat("|") {
            v |= bitxor(c)?;
        }
        Ok(v)
    }

    fn bitxor(c: &mut Cursor) -> Result<i64, ConstEvalError> {
        let mut v = bitand(c)?;
        while c.eat("^") {
            v ^= bitand(c)?;
        }
        Ok(v)
    }

    fn bitand(c: &mut Cursor) -> Result<i64, ConstEvalError> {
        let mut v = equality(c)?;
        while c.eat("&") {
            v &= equality(c)?;
        }
        Ok(v)
    }

    fn equality(c: &mut Cursor) -> Result<i64, ConstEvalError> {
        let mut v = relational(c)?;
        loop {
            if c.eat("==") {
                v = (v == relational(c)?) as i64;
            } else if c.eat("!=") {
                v = (v != relational(c)?) as i64;
            } else {
                break;
            }
        }
        Ok(v)
    }

    fn relational(c: &mut Cursor) -> Result<i64, ConstEvalError> {
        let mut v = shift(c)?;
        loop {
            if c.eat("<") {
                v = (v < shift(c)?) as i64;
            } else if c.eat("<=") {
                v = (v <= shift(c)?) as i64;
            } else if c.eat(">") {
                v = (v > shift(c)?) as i64;
            } else if c.eat(">=") {
                v = (v >= shift(c)?) as i64;
            } else {
                break;
            }
        }
        Ok(v)
    }

    fn shift(c: &mut Cursor) -> Result<i64, ConstEvalError> {
        let mut v = additive(c)?;
        loop {
            if c.eat("<<") {
                v <<= additive(c)?;
            } else if c.eat(">>") {
                v >>= additive(c)?;
            } else {
                break;
            }
        }
        Ok(v)
    }

    fn additive(c: &mut Cursor) -> Result<i64, ConstEvalError> {
        let mut v = multiplicative(c)?;
        loop {
            if c.eat("+") {
                v += multiplicative(c)?;
            } else if c.eat("-") {
                v -= multiplicative(c)?;
            } else {
                break;
            }
        }
        Ok(v)
    }

    fn multiplicative(c: &mut Cursor) -> Result<i64, ConstEvalError> {
        let mut v = unary(c)?;
        loop {
            if c.eat("*") {
                v *= unary(c)?;
            } else if c.eat("/") {
                let rhs = unary(c)?;
                if rhs == 0 {
                    return Err(ConstEvalError { message: "division by zero".into() });
                }
                v /= rhs;
            } else if c.eat("%") {
                let rhs = unary(c)?;
                if rhs == 0 {
                    return Err(ConstEvalError { message: "division by zero".into() });
                }
                v %= rhs;
            } else {
                break;
            }
        }
        Ok(v)
    }

    fn unary(c: &mut Cursor) -> Result<i64, ConstEvalError> {
        if c.eat("+") {
            return unary(c);
        }
        if c.eat("-") {
            return Ok(-unary(c)?);
        }
        if c.eat("!") {
            return Ok((unary(c)? == 0) as i64);
        }
        if c.eat("~") {
            return Ok(!unary(c)?);
        }
        primary(c)
    }

    fn primary(c: &mut Cursor) -> Result<i64, ConstEvalError> {
        if c.eat("(") {
            let v = cond(c)?;
            if !c.eat(")") {
                return Err(ConstEvalError { message: "expected ')'".into() });
            }
            return Ok(v);
        }
        let Some(t) = c.bump() else {
            return Err(ConstEvalError { message: "unexpected end of expression".into() });
        };
        match &t.kind {
            TokenKind::Num(n) => {
                if n.is_float {
                    return Err(ConstEvalError {
                        message: "floating constant not permitted in #if".into(),
                    });
                }
                let v = if matches!(n.kind, NumKind::ULong | NumKind::UInt) {
                    n.int_value
                } else {
                    n.int_value
                };
                Ok(v)
            }
            TokenKind::Ident => Ok(0), // undefined identifier, treated as 0 per C17 6.10.1p4
            other => Err(ConstEvalError { message: format!("unexpected token in #if: {other:?}") }),
        }
    }
}

// ---------------------------------------------------------------------
// AST-level evaluator for initializer / case-label / array-bound folding.
// ---------------------------------------------------------------------

/// A folded constant: either a plain integer or an integer with a symbolic
/// base address (`&global + N`), for relocatable initializers (spec §4.4's
/// Relocation).
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Int(i128),
    Float(f64),
    Symbol { label: String, addend: i64 },
}

/// Fold a node into a plain integer, failing if it is not an integer
/// constant expression (spec §4.2). This is the form most call sites need:
/// array bounds, case labels, bit-field widths, `enum` initializers.
pub fn eval(node: &Node) -> Result<i128, ConstEvalError> {
    match eval2(node)? {
        Const::Int(v) => Ok(v),
        Const::Float(f) => Ok(f as i128),
        Const::Symbol { label, .. } => {
            Err(ConstEvalError { message: format!("'{label}' is not an integer constant") })
        }
    }
}

/// Speculative form used where failure is not fatal (e.g. `Parser` probing
/// whether a `case` label or an array bound is foldable before committing to
/// a VLA) — an ordinary `Result`, never exceptional control flow.
pub fn is_const_expr(node: &Node) -> bool {
    eval2(node).is_ok()
}

/// The general form: folds to a plain value or to a global-symbol-plus-offset
/// relocation, as needed for `static` initializers like `int *p = &g + 4;`.
pub fn eval2(node: &Node) -> Result<Const, ConstEvalError> {
    match &node.kind {
        NodeKind::Num(v) => Ok(Const::Int(*v)),
        NodeKind::FloatNum(f) => Ok(Const::Float(*f)),

        NodeKind::Add(l, r) => arith(l, r, |a, b| a + b, |a, b| a + b, |label, addend, delta| Const::Symbol { label, addend: addend + delta }),
        NodeKind::Sub(l, r) => {
            let lv = eval2(l)?;
            match (&lv, eval2(r)) {
                (Const::Symbol { label, addend }, Ok(Const::Int(d))) => {
                    Ok(Const::Symbol { label: label.clone(), addend: addend - (d as i64) })
                }
                _ => arith(l, r, |a, b| a - b, |a, b| a - b, |label, addend, delta| Const::Symbol { label, addend: addend - delta }),
            }
        }
        NodeKind::Mul(l, r) => int_arith(l, r, |a, b| a.wrapping_mul(b)),
        NodeKind::Div(l, r) => {
            let b = eval(r)?;
            if b == 0 {
                return Err(ConstEvalError { message: "division by zero".into() });
            }
            Ok(Const::Int(eval(l)? / b))
        }
        NodeKind::Mod(l, r) => {
            let b = eval(r)?;
            if b == 0 {
                return Err(ConstEvalError { message: "division by zero".into() });
            }
            Ok(Const::Int(eval(l)? % b))
        }
        NodeKind::BitAnd(l, r) => int_arith(l, r, |a, b| a & b),
        NodeKind::BitOr(l, r) => int_arith(l, r, |a, b| a | b),
        NodeKind::BitXor(l, r) => int_arith(l, r, |a, b| a ^ b),
        NodeKind::Shl(l, r) => int_arith(l, r, |a, b| a << (b as u32 & 127)),
        NodeKind::Shr(l, r) => int_arith(l, r, |a, b| a >> (b as u32 & 127)),
        NodeKind::Neg(n) => Ok(Const::Int(-eval(n)?)),
        NodeKind::Pos(n) => eval2(n),
        NodeKind::Not(n) => Ok(Const::Int((eval(n)? == 0) as i128)),
        NodeKind::BitNot(n) => Ok(Const::Int(!eval(n)?)),
        NodeKind::LogAnd(l, r) => Ok(Const::Int(((eval(l)? != 0) && (eval(r)? != 0)) as i128)),
        NodeKind::LogOr(l, r) => Ok(Const::Int(((eval(l)? != 0) || (eval(r)? != 0)) as i128)),

        NodeKind::Eq(l, r) => Ok(Const::Int((eval(l)? == eval(r)?) as i128)),
        NodeKind::Ne(l, r) => Ok(Const::Int((eval(l)? != eval(r)?) as i128)),
        NodeKind::Lt(l, r) => Ok(Const::Int((eval(l)? < eval(r)?) as i128)),
        NodeKind::Le(l, r) => Ok(Const::Int((eval(l)? <= eval(r)?) as i128)),

        NodeKind::Cond { cond, then, els } => {
            if eval(cond)? != 0 { eval2(then) } else { eval2(els) }
        }
        NodeKind::Comma(_, r) => eval2(r),

        NodeKind::Addr(inner) => match &inner.kind {
            NodeKind::Var(v) if !v.object.is_local => {
                Ok(Const::Symbol { label: v.object.name.clone(), addend: 0 })
            }
            _ => Err(ConstEvalError { message: "address of non-global is not a constant".into() }),
        },
        NodeKind::StrLit { label } => Ok(Const::Symbol { label: label.clone(), addend: 0 }),

        NodeKind::Cast(inner) => {
            let v = eval2(inner)?;
            match (node.ty(), v) {
                (Some(ty), Const::Int(i)) if ty.is_float() => Ok(Const::Float(i as f64)),
                (Some(ty), Const::Float(f)) if ty.is_integer() => Ok(Const::Int(f as i128)),
                (_, other) => Ok(other),
            }
        }

        other => Err(ConstEvalError { message: format!("{} is not a constant expression", node_kind_name(other)) }),
    }
}

fn arith(
    l: &Node,
    r: &Node,
    int_op: fn(i128, i128) -> i128,
    float_op: fn(f64, f64) -> f64,
    sym_op: fn(String, i64, i64) -> Const,
) -> Result<Const, ConstEvalError> {
    let lv = eval2(l)?;
    let rv = eval2(r)?;
    match (lv, rv) {
        (Const::Symbol { label, addend }, Const::Int(d)) => Ok(sym_op(label, addend, d as i64)),
        (Const::Int(d), Const::Symbol { label, addend }) => Ok(sym_op(label, addend, d as i64)),
        (Const::Float(a), Const::Float(b)) => Ok(Const::Float(float_op(a, b))),
        (Const::Float(a), Const::Int(b)) => Ok(Const::Float(float_op(a, b as f64))),
        (Const::Int(a), Const::Float(b)) => Ok(Const::Float(float_op(a as f64, b))),
        (Const::Int(a), Const::Int(b)) => Ok(Const::Int(int_op(a, b))),
        (Const::Symbol { label, .. }, _) | (_, Const::Symbol { label, .. }) => {
            Err(ConstEvalError { message: format!("cannot combine two relocations ('{label}')") })
        }
    }
}

fn int_arith(l: &Node, r: &Node, op: fn(i128, i128) -> i128) -> Result<Const, ConstEvalError> {
    Ok(Const::Int(op(eval(l)?, eval(r)?)))
}

fn node_kind_name(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Var(_) => "a variable reference",
        NodeKind::FuncCall { .. } => "a function call",
        NodeKind::Assign { .. } => "an assignment",
        NodeKind::Deref(_) => "a pointer dereference",
        _ => "this expression",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{FileId, NumKind, NumLiteral, Token, TokenKind};

    fn num_tok(text: &str, v: i64) -> Token {
        Token::new(
            TokenKind::Num(NumLiteral { text: text.into(), int_value: v, float_value: 0.0, is_float: false, kind: NumKind::Int }),
            text,
            FileId(0),
            0,
        )
    }

    fn punct(s: &str) -> Token {
        Token::new(TokenKind::Punct, s, FileId(0), 0)
    }

    #[test]
    fn token_eval_honors_precedence() {
        // 2 + 3 * 4 == 14
        let toks = vec![num_tok("2", 2), punct("+"), num_tok("3", 3), punct("*"), num_tok("4", 4)];
        assert_eq!(tokens::eval(&toks).unwrap(), 14);
    }

    #[test]
    fn token_eval_division_by_zero_errors() {
        let toks = vec![num_tok("1", 1), punct("/"), num_tok("0", 0)];
        assert!(tokens::eval(&toks).is_err());
    }

    #[test]
    fn token_eval_ternary() {
        let toks = vec![
            num_tok("0", 0), punct("?"), num_tok("1", 1), punct(":"), num_tok("2", 2),
        ];
        assert_eq!(tokens::eval(&toks).unwrap(), 2);
    }

    #[test]
    fn ast_eval_folds_arithmetic() {
        use std::cell::RefCell;
        use crate::ast::SourcePos;
        let five = Node { pos: SourcePos { file: FileId(0), line: 0, display_file: FileId(0), display_line: 0 }, ty: RefCell::new(None), kind: NodeKind::Num(5) };
        let nine = Node { pos: SourcePos { file: FileId(0), line: 0, display_file: FileId(0), display_line: 0 }, ty: RefCell::new(None), kind: NodeKind::Num(9) };
        let add = Node { pos: SourcePos { file: FileId(0), line: 0, display_file: FileId(0), display_line: 0 }, ty: RefCell::new(None), kind: NodeKind::Add(&five, &nine) };
        assert_eq!(eval(&add).unwrap(), 14);
    }

    #[test]
    fn ast_eval_rejects_function_call() {
        use std::cell::RefCell;
        use crate::ast::SourcePos;
        let call = Node {
            pos: SourcePos { file: FileId(0), line: 0, display_file: FileId(0), display_line: 0 },
            ty: RefCell::new(None),
            kind: NodeKind::FuncCall { callee: crate::ast::Callee::Named("f".into()), args: vec![] },
        };
        assert!(!is_const_expr(&call));
    }
}
