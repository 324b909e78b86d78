//! Recursive-descent parser and semantic analyzer (spec §4.3).
//!
//! Consumes the preprocessed token list and produces a typed [`Node`] tree
//! per top-level object, folding declaration specifiers, laying out structs/
//! unions/enums through [`crate::types`], lowering initializers and VLAs, and
//! resolving goto/label VLA crossings once a function body is complete.
//! Constant-expression probes (array bounds, case labels, `static`
//! initializers) go through [`crate::const_eval`]; nothing here duplicates
//! that evaluator.

use crate::arena::TranslationUnit;
use crate::ast::{Callee, CaseArm, Node, NodeKind, SourcePos, VarRef};
use crate::const_eval;
use crate::sema::{FunctionObject, InitData, Object, Relocation, Scope, ScopeStack, VarScopeEntry};
use crate::token::{FileId, NumKind, Token, TokenKind, WideKind};
use crate::types::{
    array_alignment, bitfield_promote, decay, integer_promote, layout_struct, layout_union,
    usual_arith_conversion, Aggregate, Bitfield, FunctionType, Member, Type, TypeArena, TypeKind,
    VlaSizeVar,
};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub file: FileId,
    pub line: u32,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: error: {}", self.file.0, self.line, self.message)
    }
}
impl std::error::Error for ParseError {}

type PResult<T> = Result<T, ParseError>;

/// A file-scope string or compound literal, keyed by its synthesized label.
/// Codegen resolves [`crate::ast::NodeKind::StrLit`] and `CompoundLiteral`
/// references against whichever of (globals, current function's locals)
/// actually owns the label.
pub struct ParseOutput<'a> {
    pub globals: Vec<&'a Object<'a>>,
    pub warnings: Vec<String>,
}

/// Declaration-specifier accumulator flags (spec §4.3's bitmask counter).
mod spec_bits {
    pub const VOID: u32 = 1 << 0;
    pub const BOOL: u32 = 1 << 2;
    pub const CHAR: u32 = 1 << 4;
    pub const SHORT: u32 = 1 << 6;
    pub const INT: u32 = 1 << 8;
    pub const LONG: u32 = 1 << 10;
    pub const FLOAT: u32 = 1 << 12;
    pub const DOUBLE: u32 = 1 << 14;
    pub const OTHER: u32 = 1 << 16;
    pub const SIGNED: u32 = 1 << 17;
    pub const UNSIGNED: u32 = 1 << 18;
}

#[derive(Default, Clone, Copy)]
struct VarAttr {
    is_typedef: bool,
    is_static: bool,
    is_extern: bool,
    is_inline: bool,
    is_tls: bool,
}

/// VLA-crossing bookkeeping, label table, and pending-goto list for the
/// function currently being parsed (spec §4.3's VLA lowering / §4.5).
struct FuncState<'a> {
    object: &'a Object<'a>,
    gotos: Vec<&'a Node<'a>>,
    labels: HashMap<String, Option<u32>>,
    cur_vla: Option<u32>,
    brk_label: Option<String>,
    cont_label: Option<String>,
    brk_vla: Option<u32>,
    cont_vla: Option<u32>,
    label_seq: u32,
}

pub struct Parser<'a> {
    tu: &'a TranslationUnit,
    ty: &'a TypeArena,
    toks: Vec<Token>,
    pos: usize,
    scopes: ScopeStack<'a>,
    globals: Vec<&'a Object<'a>>,
    anon_seq: u32,
    label_seq: u32,
    warnings: Vec<String>,
    cur: Option<FuncState<'a>>,
    file: FileId,
    /// Parameter names captured by the most recent [`Parser::func_params`]
    /// call, consumed by [`Parser::function_definition`] once the matching
    /// function object exists. `declspec`/`declarator` build the type first;
    /// names ride along on the side since `FunctionType` only stores types.
    pending_named_params: Option<Vec<String>>,
    /// Case arms collected for the innermost `switch` currently being parsed.
    pending_cases: Vec<CaseArm>,
    /// The innermost `switch` currently being parsed's `default:` label, once
    /// one has been seen.
    pending_default: Option<String>,
    /// Length expressions of not-yet-instantiated VLA dimensions, indexed
    /// by the placeholder `VlaSizeVar` a `TypeKind::Vla` carries between
    /// `array_dimensions` (where the expression is parsed) and
    /// `instantiate_vla` (where it is consumed and replaced with a real
    /// index into the enclosing function's `vla_vars`).
    vla_pending: Vec<&'a Node<'a>>,

    // Cached scalar/builtin types, allocated once.
    t_void: &'a Type<'a>,
    t_bool: &'a Type<'a>,
    t_pchar: &'a Type<'a>,
    t_char: &'a Type<'a>,
    t_uchar: &'a Type<'a>,
    t_short: &'a Type<'a>,
    t_ushort: &'a Type<'a>,
    t_int: &'a Type<'a>,
    t_uint: &'a Type<'a>,
    t_long: &'a Type<'a>,
    t_ulong: &'a Type<'a>,
    t_llong: &'a Type<'a>,
    t_ullong: &'a Type<'a>,
    t_float: &'a Type<'a>,
    t_double: &'a Type<'a>,
    t_ldouble: &'a Type<'a>,
    t_va_list: &'a Type<'a>,
}

impl<'a> Parser<'a> {
    pub fn new(tu: &'a TranslationUnit, ty: &'a TypeArena, toks: Vec<Token>, file: FileId) -> Self {
        let t_void = ty.void();
        let t_bool = ty.bool_ty();
        let t_pchar = ty.char_ty();
        let t_char = ty.schar();
        let t_uchar = ty.uchar();
        let t_short = ty.short();
        let t_ushort = ty.ushort();
        let t_int = ty.int();
        let t_uint = ty.uint();
        let t_long = ty.long();
        let t_ulong = ty.ulong();
        let t_llong = ty.long();
        let t_ullong = ty.ulong();
        let t_float = ty.float();
        let t_double = ty.double();
        let t_ldouble = ty.long_double();

        // `va_list` is a one-element array of the SysV register-save
        // descriptor struct, matching the ABI's actual layout (spec §4.4's
        // `va_arg` machinery: gp_offset:4, fp_offset:4, overflow_arg_area:8,
        // reg_save_area:8).
        let mut members = vec![
            Member { name: "gp_offset".into(), ty: t_uint, index: 0, offset: 0, bitfield: None },
            Member { name: "fp_offset".into(), ty: t_uint, index: 1, offset: 0, bitfield: None },
            Member {
                name: "overflow_arg_area".into(),
                ty: ty.alloc(Type {
                    kind: TypeKind::Pointer(t_void),
                    size: Cell::new(8),
                    align: Cell::new(8),
                    is_unsigned: false,
                    origin: None,
                }),
                index: 2,
                offset: 0,
                bitfield: None,
            },
            Member {
                name: "reg_save_area".into(),
                ty: ty.alloc(Type {
                    kind: TypeKind::Pointer(t_void),
                    size: Cell::new(8),
                    align: Cell::new(8),
                    is_unsigned: false,
                    origin: None,
                }),
                index: 3,
                offset: 0,
                bitfield: None,
            },
        ];
        let (sz, al) = layout_struct(&mut members, false);
        let va_struct = ty.alloc(Type {
            kind: TypeKind::Struct(Aggregate {
                tag: Some("__va_list_tag".into()),
                members,
                is_flexible: false,
                is_packed: false,
            }),
            size: Cell::new(sz),
            align: Cell::new(al),
            is_unsigned: false,
            origin: None,
        });
        let t_va_list = ty.alloc(Type {
            kind: TypeKind::Array { elem: va_struct, len: 1 },
            size: Cell::new(sz),
            align: Cell::new(al),
            is_unsigned: false,
            origin: None,
        });

        Parser {
            tu,
            ty,
            toks,
            pos: 0,
            scopes: ScopeStack::new(),
            globals: Vec::new(),
            anon_seq: 0,
            label_seq: 0,
            warnings: Vec::new(),
            cur: None,
            file,
            pending_named_params: None,
            pending_cases: Vec::new(),
            pending_default: None,
            vla_pending: Vec::new(),
            t_void,
            t_bool,
            t_pchar,
            t_char,
            t_uchar,
            t_short,
            t_ushort,
            t_int,
            t_uint,
            t_long,
            t_ulong,
            t_llong,
            t_ullong,
            t_float,
            t_double,
            t_ldouble,
            t_va_list,
        }
    }

    // ----------------------------------------------------------------
    // Token cursor
    // ----------------------------------------------------------------

    fn cur(&self) -> &Token {
        &self.toks[self.pos]
    }

    fn at(&self, off: usize) -> &Token {
        self.toks.get(self.pos + off).unwrap_or_else(|| self.toks.last().unwrap())
    }

    fn is_eof(&self) -> bool {
        self.cur().is_eof()
    }

    fn is(&self, s: &str) -> bool {
        self.cur().is(s)
    }

    fn bump(&mut self) -> Token {
        let t = self.toks[self.pos].clone();
        if !t.is_eof() {
            self.pos += 1;
        }
        t
    }

    fn consume(&mut self, s: &str) -> bool {
        if self.is(s) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, s: &str) -> PResult<()> {
        if self.consume(s) {
            Ok(())
        } else {
            Err(self.err(format!("expected '{s}', found '{}'", self.cur().text)))
        }
    }

    fn expect_ident(&mut self) -> PResult<String> {
        if self.cur().is_ident() {
            Ok(self.bump().text.to_string())
        } else {
            Err(self.err(format!("expected identifier, found '{}'", self.cur().text)))
        }
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError { message: message.into(), file: self.cur().file, line: self.cur().line }
    }

    fn pos_here(&self) -> SourcePos {
        let t = self.cur();
        SourcePos { file: t.file, line: t.line, display_file: t.display_file, display_line: t.display_line }
    }

    fn node(&self, pos: SourcePos, kind: NodeKind<'a>) -> &'a Node<'a> {
        self.tu.alloc_node(Node { pos, ty: RefCell::new(None), kind })
    }

    fn fresh_label(&mut self, kind: &str) -> String {
        self.label_seq += 1;
        format!(".L.{kind}.{}", self.label_seq)
    }

    fn fresh_name(&mut self, prefix: &str) -> String {
        self.anon_seq += 1;
        format!("{prefix}.{}", self.anon_seq)
    }

    // ----------------------------------------------------------------
    // Entry point
    // ----------------------------------------------------------------

    pub fn parse_translation_unit(mut self) -> PResult<ParseOutput<'a>> {
        while !self.is_eof() {
            if self.consume(";") {
                continue;
            }
            self.top_level_decl()?;
        }
        self.resolve_liveness_seeds();
        Ok(ParseOutput { globals: self.globals, warnings: self.warnings })
    }

    /// Record nothing extra here; the static-inline liveness DFS itself runs
    /// in [`crate::liveness`] over the finished global list.
    fn resolve_liveness_seeds(&self) {}

    fn top_level_decl(&mut self) -> PResult<()> {
        let mut attr = VarAttr::default();
        let basety = self.declspec(Some(&mut attr))?;

        if self.consume(";") {
            return Ok(());
        }

        // First declarator: peek ahead to see if this is a function
        // definition (`ident ( ... ) {`), a function prototype, or a
        // variable declaration list.
        let mut first = true;
        loop {
            let (ty, name_tok) = self.declarator(basety)?;
            let Some(name_tok) = name_tok else {
                return Err(self.err("expected declarator name"));
            };
            let name = name_tok.text.to_string();

            if attr.is_typedef {
                self.scopes.declare_var(name, VarScopeEntry::Typedef(ty));
                if !self.consume(",") {
                    self.expect(";")?;
                    return Ok(());
                }
                first = false;
                let _ = first;
                continue;
            }

            if matches!(ty.kind, TypeKind::Function(_)) && first && self.is("{") {
                self.function_definition(name, ty, &attr)?;
                return Ok(());
            }

            self.global_variable(name, ty, &attr)?;
            if !self.consume(",") {
                self.expect(";")?;
                return Ok(());
            }
            first = false;
        }
    }

    // ----------------------------------------------------------------
    // Declaration specifiers
    // ----------------------------------------------------------------

    fn is_typename(&self) -> bool {
        if self.cur().is_ident() {
            return matches!(self.scopes.find_var(&self.cur().text), Some(VarScopeEntry::Typedef(_)));
        }
        if !self.cur().kind.eq(&TokenKind::Keyword) {
            return false;
        }
        matches!(
            self.cur().text.as_ref(),
            "void" | "_Bool" | "char" | "short" | "int" | "long" | "float" | "double" | "signed"
                | "unsigned" | "struct" | "union" | "enum" | "typeof" | "__typeof__" | "__typeof"
                | "const" | "volatile" | "restrict" | "__restrict" | "__restrict__" | "static"
                | "extern" | "inline" | "__inline" | "__inline__" | "_Thread_local" | "auto"
                | "register" | "typedef" | "_Atomic" | "_Noreturn" | "__signed__" | "__const"
                | "__extension__"
        )
    }

    fn declspec(&mut self, mut attr: Option<&mut VarAttr>) -> PResult<&'a Type<'a>> {
        use spec_bits::*;
        let mut counter = 0u32;
        let mut ty: Option<&'a Type<'a>> = None;

        loop {
            if !self.is_typename() {
                break;
            }
            // Storage-class / qualifier keywords consumed and recorded, not
            // folded into the type bitmask.
            if self.consume("typedef") {
                if let Some(a) = attr.as_deref_mut() {
                    a.is_typedef = true;
                }
                continue;
            }
            if self.consume("static") {
                if let Some(a) = attr.as_deref_mut() {
                    a.is_static = true;
                }
                continue;
            }
            if self.consume("extern") {
                if let Some(a) = attr.as_deref_mut() {
                    a.is_extern = true;
                }
                continue;
            }
            if self.is("inline") || self.is("__inline") || self.is("__inline__") {
                self.bump();
                if let Some(a) = attr.as_deref_mut() {
                    a.is_inline = true;
                }
                continue;
            }
            if self.consume("_Thread_local") {
                if let Some(a) = attr.as_deref_mut() {
                    a.is_tls = true;
                }
                continue;
            }
            if self.consume("const")
                || self.consume("volatile")
                || self.consume("restrict")
                || self.consume("__restrict")
                || self.consume("__restrict__")
                || self.consume("auto")
                || self.consume("register")
                || self.consume("_Atomic")
                || self.consume("_Noreturn")
                || self.consume("__extension__")
                || self.consume("__const")
            {
                continue;
            }

            if self.is("struct") {
                ty = Some(self.struct_union_specifier(true)?);
                counter += OTHER;
                continue;
            }
            if self.is("union") {
                ty = Some(self.struct_union_specifier(false)?);
                counter += OTHER;
                continue;
            }
            if self.is("enum") {
                ty = Some(self.enum_specifier()?);
                counter += OTHER;
                continue;
            }
            if self.is("typeof") || self.is("__typeof__") || self.is("__typeof") {
                self.bump();
                self.expect("(")?;
                let inner = self.typename_or_expr_type()?;
                self.expect(")")?;
                ty = Some(inner);
                counter += OTHER;
                continue;
            }
            if self.cur().is_ident() {
                // Typedef name.
                if let Some(VarScopeEntry::Typedef(t)) = self.scopes.find_var(&self.cur().text) {
                    ty = Some(*t);
                    counter += OTHER;
                    self.bump();
                    continue;
                }
                break;
            }

            counter += match self.cur().text.as_ref() {
                "void" => VOID,
                "_Bool" => BOOL,
                "char" => CHAR,
                "short" => SHORT,
                "int" => INT,
                "long" => LONG,
                "float" => FLOAT,
                "double" => DOUBLE,
                "signed" | "__signed__" => SIGNED,
                "unsigned" => UNSIGNED,
                _ => break,
            };
            self.bump();

            ty = Some(match counter {
                c if c == VOID => self.t_void,
                c if c == BOOL => self.t_bool,
                c if c == CHAR => self.t_pchar,
                c if c == SIGNED + CHAR => self.t_char,
                c if c == UNSIGNED + CHAR => self.t_uchar,
                c if c == SHORT || c == SHORT + INT || c == SIGNED + SHORT || c == SIGNED + SHORT + INT => {
                    self.t_short
                }
                c if c == UNSIGNED + SHORT || c == UNSIGNED + SHORT + INT => self.t_ushort,
                c if c == INT || c == SIGNED || c == SIGNED + INT || c == 0 => self.t_int,
                c if c == UNSIGNED || c == UNSIGNED + INT => self.t_uint,
                c if c == LONG || c == LONG + INT || c == SIGNED + LONG || c == SIGNED + LONG + INT => {
                    self.t_long
                }
                c if c == LONG + LONG
                    || c == LONG + LONG + INT
                    || c == SIGNED + LONG + LONG
                    || c == SIGNED + LONG + LONG + INT =>
                {
                    self.t_llong
                }
                c if c == UNSIGNED + LONG || c == UNSIGNED + LONG + INT => self.t_ulong,
                c if c == UNSIGNED + LONG + LONG || c == UNSIGNED + LONG + LONG + INT => self.t_ullong,
                c if c == FLOAT => self.t_float,
                c if c == DOUBLE => self.t_double,
                c if c == LONG + DOUBLE => self.t_ldouble,
                _ => return Err(self.err("invalid combination of type specifiers")),
            });
        }

        Ok(ty.unwrap_or(self.t_int))
    }

    /// `typeof(expr)` support: if what follows looks like a type name, parse
    /// it as one; otherwise parse and discard an expression, returning its
    /// static type. Locals referenced are looked up in the current scope.
    fn typename_or_expr_type(&mut self) -> PResult<&'a Type<'a>> {
        if self.is_typename() {
            return self.typename();
        }
        let e = self.expr()?;
        self.type_check(e)
    }

    fn struct_union_specifier(&mut self, is_struct: bool) -> PResult<&'a Type<'a>> {
        self.bump(); // struct | union
        let is_packed = self.consume_gnu_attributes();

        let tag = if self.cur().is_ident() { Some(self.bump().text.to_string()) } else { None };

        if !self.is("{") {
            // Reference to a (possibly forward-declared) tag.
            if let Some(tag) = &tag {
                if let Some(t) = self.scopes.find_tag(tag) {
                    return Ok(t);
                }
                let incomplete = self.ty.alloc(Type {
                    kind: if is_struct {
                        TypeKind::Struct(Aggregate { tag: Some(tag.clone()), members: vec![], is_flexible: false, is_packed })
                    } else {
                        TypeKind::Union(Aggregate { tag: Some(tag.clone()), members: vec![], is_flexible: false, is_packed })
                    },
                    size: Cell::new(-1),
                    align: Cell::new(1),
                    is_unsigned: false,
                    origin: None,
                });
                self.scopes.declare_tag(tag.clone(), incomplete);
                return Ok(incomplete);
            }
            return Err(self.err("expected struct/union tag or body"));
        }

        self.bump(); // {
        let mut members = Vec::new();
        let mut is_flexible = false;
        let mut idx = 0usize;
        while !self.consume("}") {
            let mut field_attr = VarAttr::default();
            let basety = self.declspec(Some(&mut field_attr))?;
            let mut first = true;
            while !self.consume(";") {
                if !first {
                    self.expect(",")?;
                }
                first = false;
                let (mut mty, name_tok) = self.declarator(basety)?;
                let bitfield = if self.consume(":") {
                    let w = self.const_expr()?;
                    Some(Bitfield { bit_offset: 0, bit_width: w.max(0) as u32 })
                } else {
                    None
                };
                self.consume_gnu_attributes();
                let name = name_tok.map(|t| t.text.to_string()).unwrap_or_default();
                if matches!(mty.kind, TypeKind::Array { len: 0, .. }) || (!mty.is_complete() && matches!(mty.kind, TypeKind::Array { .. })) {
                    is_flexible = true;
                }
                if matches!(mty.kind, TypeKind::Array { .. }) && mty.size.get() < 0 {
                    // Flexible array member: zero-length, no incomplete-type error.
                    mty = self.ty.alloc(Type {
                        kind: TypeKind::Array { elem: mty.base().unwrap_or(self.t_int), len: 0 },
                        size: Cell::new(0),
                        align: Cell::new(mty.align.get().max(1)),
                        is_unsigned: false,
                        origin: None,
                    });
                }
                members.push(Member { name, ty: mty, index: idx, offset: 0, bitfield });
                idx += 1;
            }
        }

        let (size, align) = if is_struct {
            layout_struct(&mut members, is_packed)
        } else {
            layout_union(&members, is_packed)
        };
        let kind = if is_struct {
            TypeKind::Struct(Aggregate { tag: tag.clone(), members, is_flexible, is_packed })
        } else {
            TypeKind::Union(Aggregate { tag: tag.clone(), members, is_flexible, is_packed })
        };
        let ty = self.ty.alloc(Type {
            kind,
            size: Cell::new(size),
            align: Cell::new(align),
            is_unsigned: false,
            origin: None,
        });
        if let Some(tag) = tag {
            self.scopes.declare_tag(tag, ty);
        }
        Ok(ty)
    }

    /// Consume `__attribute__((...))` clusters, reporting whether `packed`
    /// was among them (spec §4.1's narrow attribute support: only `packed`).
    fn consume_gnu_attributes(&mut self) -> bool {
        let mut packed = false;
        loop {
            if self.is("__attribute__") || self.is("__asm__") {
                let is_attr = self.is("__attribute__");
                self.bump();
                let mut depth = 0i32;
                loop {
                    if self.consume("(") {
                        depth += 1;
                        continue;
                    }
                    if self.is_eof() {
                        break;
                    }
                    if is_attr && self.cur().is("packed") {
                        packed = true;
                    }
                    if self.consume(")") {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                        continue;
                    }
                    self.bump();
                }
                continue;
            }
            break;
        }
        packed
    }

    fn enum_specifier(&mut self) -> PResult<&'a Type<'a>> {
        self.bump(); // enum
        let tag = if self.cur().is_ident() { Some(self.bump().text.to_string()) } else { None };

        let mut underlying: &'a Type<'a> = self.t_int;
        if self.consume(":") {
            underlying = self.typename()?;
        }

        if !self.is("{") {
            if let Some(tag) = &tag {
                if let Some(t) = self.scopes.find_tag(tag) {
                    return Ok(t);
                }
            }
            return Err(self.err("undeclared enum tag"));
        }
        self.bump();

        let mut value: i64 = 0;
        let mut saw_negative = false;
        let mut max_magnitude: u64 = 0;
        let mut first = true;
        while !self.consume("}") {
            if !first {
                self.expect(",")?;
                if self.consume("}") {
                    break;
                }
            }
            first = false;
            let name = self.expect_ident()?;
            if self.consume("=") {
                value = self.const_expr()?;
            }
            if value < 0 {
                saw_negative = true;
            }
            max_magnitude = max_magnitude.max(value.unsigned_abs());
            self.scopes.declare_var(name, VarScopeEntry::EnumConst(underlying, value));
            value += 1;
        }

        let underlying = if saw_negative {
            if max_magnitude > i32::MAX as u64 { self.t_long } else { self.t_int }
        } else if max_magnitude > u32::MAX as u64 {
            self.t_ulong
        } else if max_magnitude > i32::MAX as u64 {
            self.t_uint
        } else {
            underlying
        };

        let ty = self.ty.alloc(Type {
            kind: TypeKind::Enum { underlying },
            size: Cell::new(underlying.size.get()),
            align: Cell::new(underlying.align.get()),
            is_unsigned: underlying.is_unsigned,
            origin: None,
        });
        if let Some(tag) = tag {
            self.scopes.declare_tag(tag, ty);
        }
        Ok(ty)
    }

    // ----------------------------------------------------------------
    // Declarators
    // ----------------------------------------------------------------

    fn pointer_to(&self, base: &'a Type<'a>) -> &'a Type<'a> {
        self.ty.alloc(Type {
            kind: TypeKind::Pointer(base),
            size: Cell::new(8),
            align: Cell::new(8),
            is_unsigned: false,
            origin: None,
        })
    }

    fn typename(&mut self) -> PResult<&'a Type<'a>> {
        let base = self.declspec(None)?;
        let (ty, _name) = self.abstract_declarator(base)?;
        Ok(ty)
    }

    fn abstract_declarator(&mut self, base: &'a Type<'a>) -> PResult<(&'a Type<'a>, Option<Token>)> {
        self.declarator(base)
    }

    /// Parses pointer/array/function declarator syntax around a base type,
    /// using the standard two-pass technique for parenthesized declarators
    /// (`int (*fp)(int)`): the parens are skipped once to parse the
    /// outer suffix, then re-parsed to fill in the inner declarator.
    fn declarator(&mut self, mut base: &'a Type<'a>) -> PResult<(&'a Type<'a>, Option<Token>)> {
        while self.consume("*") {
            base = self.pointer_to(base);
            while self.consume("const")
                || self.consume("volatile")
                || self.consume("restrict")
                || self.consume("__restrict")
                || self.consume("__restrict__")
            {}
        }

        if self.consume("(") {
            let start = self.pos;
            self.skip_balanced_parens();
            let outer = self.type_suffix(base)?;
            let end = self.pos;
            self.pos = start;
            let (final_ty, name) = self.declarator(outer)?;
            self.pos = end;
            return Ok((final_ty, name));
        }

        let name = if self.cur().is_ident() { Some(self.bump()) } else { None };
        let ty = self.type_suffix(base)?;
        Ok((ty, name))
    }

    fn skip_balanced_parens(&mut self) {
        let mut depth = 1i32;
        while depth > 0 && !self.is_eof() {
            if self.is("(") {
                depth += 1;
            } else if self.is(")") {
                depth -= 1;
            }
            self.pos += 1;
        }
    }

    fn type_suffix(&mut self, ty: &'a Type<'a>) -> PResult<&'a Type<'a>> {
        if self.consume("(") {
            return self.func_params(ty);
        }
        if self.consume("[") {
            return self.array_dimensions(ty);
        }
        Ok(ty)
    }

    fn array_dimensions(&mut self, base: &'a Type<'a>) -> PResult<&'a Type<'a>> {
        // Swallow array-qualifier keywords (`static`, `const`, ...) that may
        // appear inside `[...]` for function parameters.
        while self.consume("static") || self.consume("const") || self.consume("restrict") {}

        if self.consume("]") {
            let elem = self.type_suffix(base)?;
            return Ok(self.ty.alloc(Type {
                kind: TypeKind::Array { elem, len: -1 },
                size: Cell::new(-1),
                align: Cell::new(elem.align.get()),
                is_unsigned: false,
                origin: None,
            }));
        }

        // A VLA's length expression is any non-constant integer expression.
        let len_tok_pos = self.pos;
        let len_expr = self.assign()?;
        self.expect("]")?;
        let elem = self.type_suffix(base)?;

        if let Ok(n) = const_eval::eval(len_expr) {
            let len = n as i64;
            let size = if elem.size.get() < 0 { -1 } else { elem.size.get() * len };
            let align = if size >= 16 { array_alignment(size, elem.align.get()) } else { elem.align.get() };
            return Ok(self.ty.alloc(Type {
                kind: TypeKind::Array { elem, len },
                size: Cell::new(size),
                align: Cell::new(align),
                is_unsigned: false,
                origin: None,
            }));
        }

        // VLA: the hidden size-variable object is created later, in
        // `instantiate_vla`, once we know which function (if any) owns this
        // declarator — a VLA type can be built speculatively (e.g. inside a
        // `sizeof` abstract-declarator) before that's decided. Stash the raw
        // length expression and carry its index as a placeholder `VlaSizeVar`
        // until then.
        let _ = len_tok_pos;
        let placeholder = VlaSizeVar(self.vla_pending.len() as u32);
        self.vla_pending.push(len_expr);
        Ok(self.ty.alloc(Type {
            kind: TypeKind::Vla { elem, len_var: placeholder },
            size: Cell::new(-1),
            align: Cell::new(elem.align.get().max(8)),
            is_unsigned: false,
            origin: None,
        }))
    }

    fn func_params(&mut self, return_ty: &'a Type<'a>) -> PResult<&'a Type<'a>> {
        if self.consume("void") && self.is(")") {
            self.bump();
            return Ok(self.ty.alloc(Type {
                kind: TypeKind::Function(FunctionType { return_ty, params: vec![], is_variadic: false, is_oldstyle: false }),
                size: Cell::new(1),
                align: Cell::new(1),
                is_unsigned: false,
                origin: None,
            }));
        }

        if self.is(")") {
            self.bump();
            // No prototype at all: old-style, unknown parameters.
            return Ok(self.ty.alloc(Type {
                kind: TypeKind::Function(FunctionType { return_ty, params: vec![], is_variadic: false, is_oldstyle: true }),
                size: Cell::new(1),
                align: Cell::new(1),
                is_unsigned: false,
                origin: None,
            }));
        }

        // K&R old-style: a bare identifier list with no type specifiers.
        if self.cur().is_ident() && !self.is_typename_ahead() {
            let mut names = vec![self.bump().text.to_string()];
            while self.consume(",") {
                names.push(self.expect_ident()?);
            }
            self.expect(")")?;
            let _ = names;
            return Ok(self.ty.alloc(Type {
                kind: TypeKind::Function(FunctionType { return_ty, params: vec![], is_variadic: false, is_oldstyle: true }),
                size: Cell::new(1),
                align: Cell::new(1),
                is_unsigned: false,
                origin: None,
            }));
        }

        let mut params = Vec::new();
        let mut names = Vec::new();
        let mut is_variadic = false;
        loop {
            if self.consume("...") {
                is_variadic = true;
                break;
            }
            let basety = self.declspec(None)?;
            let (mut pty, name) = self.declarator(basety)?;
            // Array/function parameters decay (spec §4.2).
            if matches!(pty.kind, TypeKind::Array { .. } | TypeKind::Vla { .. }) {
                pty = self.pointer_to(pty.base().unwrap());
            }
            if matches!(pty.kind, TypeKind::Function(_)) {
                pty = self.pointer_to(pty);
            }
            params.push(pty);
            names.push(name.map(|t| t.text.to_string()).unwrap_or_default());
            if !self.consume(",") {
                break;
            }
        }
        self.expect(")")?;
        self.pending_named_params = Some(names);
        Ok(self.ty.alloc(Type {
            kind: TypeKind::Function(FunctionType { return_ty, params, is_variadic, is_oldstyle: false }),
            size: Cell::new(1),
            align: Cell::new(1),
            is_unsigned: false,
            origin: None,
        }))
    }

    fn is_typename_ahead(&self) -> bool {
        matches!(self.at(1).text.as_ref(), ",") || self.at(1).is(")")
    }

    // ----------------------------------------------------------------
    // Top-level objects
    // ----------------------------------------------------------------

    fn global_variable(&mut self, name: String, ty: &'a Type<'a>, attr: &VarAttr) -> PResult<()> {
        let obj = self.tu.alloc_object(Object {
            name: name.clone(),
            ty,
            is_local: false,
            is_static: attr.is_static,
            is_definition: Cell::new(!attr.is_extern),
            is_tentative: Cell::new(!attr.is_extern && !self.is("=")),
            is_tls: attr.is_tls,
            is_inline: false,
            is_live: Cell::new(true),
            is_function: false,
            is_variadic: false,
            stack_offset: Cell::new(0),
            func: None,
            init_data: RefCell::new(None),
        });
        self.scopes.declare_var(name, VarScopeEntry::Var(obj));

        if self.consume("=") {
            obj.is_tentative.set(false);
            let mut bytes = vec![0u8; ty.size.get().max(0) as usize];
            let mut relocs = Vec::new();
            let (init, final_ty) = self.parse_initializer(ty)?;
            self.lower_global_init(&init, final_ty, &mut bytes, &mut relocs, 0)?;
            bytes.resize(final_ty.size.get().max(0) as usize, 0);
            *obj.init_data.borrow_mut() = Some(InitData { bytes, relocations: relocs });
        }
        self.globals.push(obj);
        Ok(())
    }

    fn function_definition(&mut self, name: String, ty: &'a Type<'a>, attr: &VarAttr) -> PResult<()> {
        let TypeKind::Function(fty) = &ty.kind else { unreachable!() };
        let is_variadic = fty.is_variadic;

        let obj = self.tu.alloc_object(Object {
            name: name.clone(),
            ty,
            is_local: false,
            is_static: attr.is_static,
            is_definition: Cell::new(true),
            is_tentative: Cell::new(false),
            is_tls: false,
            is_inline: attr.is_inline,
            is_live: Cell::new(!attr.is_inline || !attr.is_static),
            is_function: true,
            is_variadic,
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
        self.scopes.declare_var(name, VarScopeEntry::Var(obj));
        self.globals.push(obj);

        self.scopes.push(false);
        self.cur = Some(FuncState {
            object: obj,
            gotos: Vec::new(),
            labels: HashMap::new(),
            cur_vla: None,
            brk_label: None,
            cont_label: None,
            brk_vla: None,
            cont_vla: None,
            label_seq: 0,
        });

        let named = self.pending_named_params.take().unwrap_or_default();
        let mut params = Vec::new();
        for (i, pty) in fty.params.iter().enumerate() {
            let pname = named.get(i).cloned().filter(|n| !n.is_empty()).unwrap_or_else(|| format!("__p{i}"));
            params.push(self.new_local(pname, pty));
        }
        if let Some(func) = &obj.func {
            *func.params.borrow_mut() = params;
        }

        self.expect("{")?;
        let body = self.compound_stmt()?;
        if let Some(func) = &obj.func {
            *func.body.borrow_mut() = Some(body);
        }

        let fs = self.cur.take().unwrap();
        self.resolve_gotos(&fs);
        if let Some(func) = &obj.func {
            func.dealloc_vla.set(fs.cur_vla.is_some() || !func.vla_vars.borrow().is_empty());
        }
        self.scopes.pop();
        Ok(())
    }

    fn resolve_gotos(&self, fs: &FuncState<'a>) {
        for g in &fs.gotos {
            if let NodeKind::Goto { label, target_vla, .. } = &g.kind {
                let resolved = fs.labels.get(label).copied().flatten();
                *target_vla.borrow_mut() = resolved;
            }
        }
    }

    fn new_local(&mut self, name: String, ty: &'a Type<'a>) -> &'a Object<'a> {
        let obj = self.tu.alloc_object(Object {
            name: name.clone(),
            ty,
            is_local: true,
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
            init_data: RefCell::new(None),
        });
        self.scopes.declare_var(name, VarScopeEntry::Var(obj));
        if let Some(fs) = &self.cur {
            if let Some(func) = &fs.object.func {
                func.locals.borrow_mut().push(obj);
            }
        }
        obj
    }

    fn new_static_local(&mut self, name: String, ty: &'a Type<'a>) -> &'a Object<'a> {
        let label = self.fresh_name(&format!("__static.{name}"));
        let obj = self.tu.alloc_object(Object {
            name: label,
            ty,
            is_local: false,
            is_static: true,
            is_definition: Cell::new(true),
            is_tentative: Cell::new(false),
            is_tls: false,
            is_inline: false,
            is_live: Cell::new(true),
            is_function: false,
            is_variadic: false,
            stack_offset: Cell::new(0),
            func: None,
            init_data: RefCell::new(None),
        });
        self.scopes.declare_var(name, VarScopeEntry::Var(obj));
        if let Some(fs) = &self.cur {
            if let Some(func) = &fs.object.func {
                func.static_locals.borrow_mut().push(obj);
            }
        }
        self.globals.push(obj);
        obj
    }

    // ----------------------------------------------------------------
    // Statements
    // ----------------------------------------------------------------

    fn compound_stmt(&mut self) -> PResult<&'a Node<'a>> {
        let pos = self.pos_here();
        self.scopes.push(false);
        let mut stmts = Vec::new();
        while !self.consume("}") {
            if self.is_typename() && !self.is("case") && !self.is("default") {
                self.declaration(&mut stmts)?;
            } else {
                stmts.push(self.stmt()?);
            }
        }
        self.scopes.pop();
        Ok(self.node(pos, NodeKind::Block(stmts)))
    }

    fn declaration(&mut self, out: &mut Vec<&'a Node<'a>>) -> PResult<()> {
        let mut attr = VarAttr::default();
        let basety = self.declspec(Some(&mut attr))?;
        if self.consume(";") {
            return Ok(());
        }
        let mut first = true;
        loop {
            if !first {
                if !self.consume(",") {
                    break;
                }
            }
            first = false;
            let pos = self.pos_here();
            let (ty, name_tok) = self.declarator(basety)?;
            let Some(name_tok) = name_tok else { return Err(self.err("expected declarator name")) };
            let name = name_tok.text.to_string();

            if attr.is_typedef {
                self.scopes.declare_var(name, VarScopeEntry::Typedef(ty));
                continue;
            }

            let ty = self.instantiate_vla(ty, out, pos)?;

            if attr.is_static {
                let obj = self.new_static_local(name, ty);
                if self.consume("=") {
                    let (init, final_ty) = self.parse_initializer(ty)?;
                    let mut bytes = vec![0u8; final_ty.size.get().max(0) as usize];
                    let mut relocs = Vec::new();
                    self.lower_global_init(&init, final_ty, &mut bytes, &mut relocs, 0)?;
                    *obj.init_data.borrow_mut() = Some(InitData { bytes, relocations: relocs });
                }
                continue;
            }

            let obj = self.new_local(name, ty);

            if let TypeKind::Vla { len_var, .. } = ty.kind {
                // `x = alloca(hidden_size)`: the declared variable's stack
                // slot holds the address alloca returns, same as an ordinary
                // pointer local (spec §4.3's VLA lowering).
                let size_obj = self
                    .cur
                    .as_ref()
                    .and_then(|fs| fs.object.func.as_ref())
                    .map(|f| f.vla_vars.borrow()[len_var.0 as usize])
                    .ok_or_else(|| self.err_here(pos, "VLA outside function"))?;
                let size_read = self.node(pos, NodeKind::Var(VarRef { object: size_obj }));
                size_read.set_ty(self.t_ulong);
                let alloca = self.node(pos, NodeKind::Alloca(size_read));
                alloca.set_ty(self.pointer_to(ty.base().unwrap()));
                let var_node = self.node(pos, NodeKind::Var(VarRef { object: obj }));
                let assign = self.node(pos, NodeKind::Assign { lhs: var_node, rhs: alloca });
                out.push(self.node(pos, NodeKind::ExprStmt(assign)));
                if let Some(fs) = &mut self.cur {
                    fs.cur_vla = Some(len_var.0);
                }
            }

            if self.consume("=") {
                let (init, final_ty) = self.parse_initializer(ty)?;
                let base = self.node(pos, NodeKind::Var(VarRef { object: obj }));
                let zero = self.node(pos, NodeKind::Memzero { var: VarRef { object: obj } });
                let mut assigns = Vec::new();
                self.lower_local_init(&init, final_ty, base, pos, &mut assigns)?;
                let mut block = vec![zero];
                block.extend(assigns.into_iter().map(|e| self.node(pos, NodeKind::ExprStmt(e))));
                out.push(self.node(pos, NodeKind::Block(block)));
            }
        }
        self.expect(";")?;
        Ok(())
    }

    /// Instantiate a (possibly nested) VLA type against the function
    /// currently being parsed: for each dimension, innermost first, emits
    /// `hidden_size = length * element_runtime_size` into `out` and returns
    /// the type with its `len_var` rebound from the parse-time placeholder
    /// (an index into `vla_pending`) to a real index into the function's
    /// `vla_vars` (spec §4.3's VLA lowering, "chaining when dimensions are
    /// themselves VLA"). Non-VLA types pass through unchanged.
    fn instantiate_vla(
        &mut self,
        ty: &'a Type<'a>,
        out: &mut Vec<&'a Node<'a>>,
        pos: SourcePos,
    ) -> PResult<&'a Type<'a>> {
        let TypeKind::Vla { elem, len_var } = &ty.kind else { return Ok(ty) };
        let placeholder = len_var.0;
        let elem = self.instantiate_vla(elem, out, pos)?;

        let len_expr = self.vla_pending[placeholder as usize];

        let elem_runtime_size = match elem.kind {
            TypeKind::Vla { len_var: inner, .. } => {
                let inner_obj = self
                    .cur
                    .as_ref()
                    .and_then(|fs| fs.object.func.as_ref())
                    .map(|f| f.vla_vars.borrow()[inner.0 as usize])
                    .ok_or_else(|| self.err_here(pos, "VLA outside function"))?;
                self.node(pos, NodeKind::Var(VarRef { object: inner_obj }))
            }
            _ => {
                let n = self.node(pos, NodeKind::Num(elem.size.get().max(0) as i128));
                n.set_ty(self.t_ulong);
                n
            }
        };
        elem_runtime_size.set_ty(self.t_ulong);
        let size_expr = self.node(pos, NodeKind::Mul(len_expr, elem_runtime_size));
        size_expr.set_ty(self.t_ulong);

        let size_obj = self.new_local(self.fresh_name("__vla_size"), self.t_ulong);
        let idx = {
            let fs = self.cur.as_mut().ok_or_else(|| self.err_here(pos, "VLA outside function"))?;
            let func = fs.object.func.as_ref().unwrap();
            func.vla_vars.borrow_mut().push(size_obj);
            func.vla_vars.borrow().len() as u32 - 1
        };

        let size_var = self.node(pos, NodeKind::Var(VarRef { object: size_obj }));
        size_var.set_ty(self.t_ulong);
        let assign = self.node(pos, NodeKind::Assign { lhs: size_var, rhs: size_expr });
        assign.set_ty(self.t_ulong);
        out.push(self.node(pos, NodeKind::ExprStmt(assign)));

        let vla_ty = self.ty.alloc(Type {
            kind: TypeKind::Vla { elem, len_var: VlaSizeVar(idx) },
            size: Cell::new(-1),
            align: Cell::new(elem.align.get().max(8)),
            is_unsigned: false,
            origin: None,
        });
        Ok(vla_ty)
    }

    fn stmt(&mut self) -> PResult<&'a Node<'a>> {
        let pos = self.pos_here();

        if self.consume("{") {
            return self.compound_stmt();
        }
        if self.consume(";") {
            return Ok(self.node(pos, NodeKind::NullExpr));
        }
        if self.consume("if") {
            self.expect("(")?;
            let cond = self.expr()?;
            self.expect(")")?;
            let then = self.stmt()?;
            let els = if self.consume("else") { Some(self.stmt()?) } else { None };
            return Ok(self.node(pos, NodeKind::If { cond, then, els }));
        }
        if self.consume("for") {
            return self.for_stmt(pos);
        }
        if self.consume("while") {
            self.expect("(")?;
            let cond = self.expr()?;
            self.expect(")")?;
            return self.loop_body(pos, None, Some(cond), None);
        }
        if self.consume("do") {
            let brk = self.fresh_label("break");
            let cont = self.fresh_label("continue");
            let saved = self.swap_loop_labels(Some(brk.clone()), Some(cont.clone()));
            let body = self.stmt()?;
            self.restore_loop_labels(saved);
            self.expect("while")?;
            self.expect("(")?;
            let cond = self.expr()?;
            self.expect(")")?;
            self.expect(";")?;
            return Ok(self.node(pos, NodeKind::Do { body, cond, brk_label: brk, cont_label: cont }));
        }
        if self.consume("switch") {
            return self.switch_stmt(pos);
        }
        if self.consume("case") {
            return self.case_stmt(pos);
        }
        if self.consume("default") {
            self.expect(":")?;
            let label = self.fresh_label("default");
            self.pending_default = Some(label.clone());
            let body = self.stmt()?;
            return Ok(self.node(pos, NodeKind::Case { label, body }));
        }
        if self.consume("break") {
            self.expect(";")?;
            let fs = self.cur.as_ref().ok_or_else(|| self.err_here(pos, "break outside loop/switch"))?;
            let target = fs.brk_label.clone().ok_or_else(|| self.err_here(pos, "break outside loop/switch"))?;
            return Ok(self.node(pos, NodeKind::Break { target_label: target, top_vla: fs.cur_vla, target_vla: fs.brk_vla }));
        }
        if self.consume("continue") {
            self.expect(";")?;
            let fs = self.cur.as_ref().ok_or_else(|| self.err_here(pos, "continue outside loop"))?;
            let target = fs.cont_label.clone().ok_or_else(|| self.err_here(pos, "continue outside loop"))?;
            return Ok(self.node(pos, NodeKind::Continue { target_label: target, top_vla: fs.cur_vla, target_vla: fs.cont_vla }));
        }
        if self.consume("goto") {
            if self.consume("*") {
                let target = self.expr()?;
                self.expect(";")?;
                return Ok(self.node(pos, NodeKind::ComputedGoto(target)));
            }
            let label = self.expect_ident()?;
            self.expect(";")?;
            let top_vla = self.cur.as_ref().and_then(|fs| fs.cur_vla);
            let node = self.node(pos, NodeKind::Goto { label, top_vla, target_vla: RefCell::new(None) });
            if let Some(fs) = &mut self.cur {
                fs.gotos.push(node);
            }
            return Ok(node);
        }
        if self.consume("return") {
            if self.consume(";") {
                return Ok(self.node(pos, NodeKind::Return(None)));
            }
            let e = self.expr()?;
            self.expect(";")?;
            return Ok(self.node(pos, NodeKind::Return(Some(e))));
        }
        if self.is("__asm__") || self.is("asm") {
            self.bump();
            while self.consume("volatile") || self.consume("__volatile__") {}
            self.expect("(")?;
            let mut text = String::new();
            let mut depth = 1i32;
            while depth > 0 {
                if self.is("(") {
                    depth += 1;
                } else if self.is(")") {
                    depth -= 1;
                    if depth == 0 {
                        self.bump();
                        break;
                    }
                }
                let t = self.bump();
                text.push_str(&t.text);
                text.push(' ');
            }
            self.expect(";")?;
            return Ok(self.node(pos, NodeKind::InlineAsm(text)));
        }

        // Labeled statement: `ident :` (not a ternary or bitfield colon,
        // which never appear as the second token of a statement).
        if self.cur().is_ident() && self.at(1).is(":") {
            let label = self.bump().text.to_string();
            self.bump(); // :
            let body = self.stmt()?;
            if let Some(fs) = &mut self.cur {
                fs.label_seq += 1;
                let vla = fs.cur_vla;
                fs.labels.insert(label.clone(), vla);
            }
            return Ok(self.node(pos, NodeKind::Label { name: label, body }));
        }

        let e = self.expr()?;
        self.expect(";")?;
        Ok(self.node(pos, NodeKind::ExprStmt(e)))
    }

    fn err_here(&self, pos: SourcePos, msg: &str) -> ParseError {
        ParseError { message: msg.into(), file: pos.file, line: pos.line }
    }

    fn swap_loop_labels(&mut self, brk: Option<String>, cont: Option<String>) -> (Option<String>, Option<String>, Option<u32>, Option<u32>) {
        let fs = self.cur.as_mut().unwrap();
        let saved = (fs.brk_label.take(), fs.cont_label.take(), fs.brk_vla, fs.cont_vla);
        fs.brk_label = brk;
        fs.cont_label = cont;
        fs.brk_vla = fs.cur_vla;
        fs.cont_vla = fs.cur_vla;
        saved
    }

    fn restore_loop_labels(&mut self, saved: (Option<String>, Option<String>, Option<u32>, Option<u32>)) {
        let fs = self.cur.as_mut().unwrap();
        fs.brk_label = saved.0;
        fs.cont_label = saved.1;
        fs.brk_vla = saved.2;
        fs.cont_vla = saved.3;
    }

    fn for_stmt(&mut self, pos: SourcePos) -> PResult<&'a Node<'a>> {
        self.expect("(")?;
        self.scopes.push(false);
        let init = if self.is_typename() {
            let mut stmts = Vec::new();
            self.declaration(&mut stmts)?;
            if stmts.is_empty() {
                None
            } else {
                Some(&*self.node(pos, NodeKind::Block(stmts)))
            }
        } else if self.consume(";") {
            None
        } else {
            let e = self.expr()?;
            self.expect(";")?;
            Some(&*self.node(pos, NodeKind::ExprStmt(e)))
        };
        let cond = if self.is(";") { None } else { Some(self.expr()?) };
        self.expect(";")?;
        let inc = if self.is(")") { None } else { Some(self.expr()?) };
        self.expect(")")?;
        let result = self.loop_body(pos, init, cond, inc)?;
        self.scopes.pop();
        Ok(result)
    }

    fn loop_body(
        &mut self,
        pos: SourcePos,
        init: Option<&'a Node<'a>>,
        cond: Option<&'a Node<'a>>,
        inc: Option<&'a Node<'a>>,
    ) -> PResult<&'a Node<'a>> {
        let brk = self.fresh_label("break");
        let cont = self.fresh_label("continue");
        let saved = self.swap_loop_labels(Some(brk.clone()), Some(cont.clone()));
        let body = self.stmt()?;
        self.restore_loop_labels(saved);
        Ok(self.node(pos, NodeKind::For { init, cond, inc, body, brk_label: brk, cont_label: cont }))
    }

    fn switch_stmt(&mut self, pos: SourcePos) -> PResult<&'a Node<'a>> {
        self.expect("(")?;
        let cond = self.expr()?;
        self.expect(")")?;
        let brk = self.fresh_label("break");
        let saved_brk = {
            let fs = self.cur.as_mut().unwrap();
            let saved = (fs.brk_label.take(), fs.brk_vla);
            fs.brk_label = Some(brk.clone());
            fs.brk_vla = fs.cur_vla;
            saved
        };
        let saved_cases = std::mem::take(&mut self.pending_cases);
        let saved_default = self.pending_default.take();
        let body = self.stmt()?;
        let cases = std::mem::replace(&mut self.pending_cases, saved_cases);
        let default_label = std::mem::replace(&mut self.pending_default, saved_default);
        {
            let fs = self.cur.as_mut().unwrap();
            fs.brk_label = saved_brk.0;
            fs.brk_vla = saved_brk.1;
        }
        Ok(self.node(pos, NodeKind::Switch { cond, body, cases, default_label, brk_label: brk }))
    }

    fn case_stmt(&mut self, pos: SourcePos) -> PResult<&'a Node<'a>> {
        let lo = self.const_expr()?;
        let hi = if self.consume("...") { self.const_expr()? } else { lo };
        self.expect(":")?;
        let label = self.fresh_label("case");
        self.pending_cases.push(CaseArm { lo, hi, label: label.clone() });
        let body = self.stmt()?;
        Ok(self.node(pos, NodeKind::Case { label, body }))
    }

    // ----------------------------------------------------------------
    // Expressions (lowest to highest precedence)
    // ----------------------------------------------------------------

    fn expr(&mut self) -> PResult<&'a Node<'a>> {
        let mut node = self.assign()?;
        while self.consume(",") {
            let pos = self.pos_here();
            let rhs = self.assign()?;
            node = self.node(pos, NodeKind::Comma(node, rhs));
        }
        Ok(node)
    }

    fn const_expr(&mut self) -> PResult<i64> {
        let pos = self.pos_here();
        let e = self.cond()?;
        const_eval::eval(e).map(|v| v as i64).map_err(|err| self.err_here(pos, &err.message))
    }

    fn assign(&mut self) -> PResult<&'a Node<'a>> {
        let lhs = self.cond()?;
        let pos = self.pos_here();
        macro_rules! compound {
            ($kind:ident) => {{
                self.bump();
                let rhs = self.assign()?;
                let val = self.node(pos, NodeKind::$kind(lhs, rhs));
                return Ok(self.node(pos, NodeKind::Assign { lhs, rhs: val }));
            }};
        }
        if self.is("=") {
            self.bump();
            let rhs = self.assign()?;
            return Ok(self.node(pos, NodeKind::Assign { lhs, rhs }));
        }
        if self.is("+=") { compound!(Add) }
        if self.is("-=") { compound!(Sub) }
        if self.is("*=") { compound!(Mul) }
        if self.is("/=") { compound!(Div) }
        if self.is("%=") { compound!(Mod) }
        if self.is("&=") { compound!(BitAnd) }
        if self.is("|=") { compound!(BitOr) }
        if self.is("^=") { compound!(BitXor) }
        if self.is("<<=") { compound!(Shl) }
        if self.is(">>=") { compound!(Shr) }
        Ok(lhs)
    }

    fn cond(&mut self) -> PResult<&'a Node<'a>> {
        let c = self.logor()?;
        let pos = self.pos_here();
        if self.consume("?") {
            if self.consume(":") {
                let rhs = self.cond()?;
                return Ok(self.node(pos, NodeKind::Chain { cond: c, rhs }));
            }
            let then = self.expr()?;
            self.expect(":")?;
            let els = self.cond()?;
            return Ok(self.node(pos, NodeKind::Cond { cond: c, then, els }));
        }
        Ok(c)
    }

    fn logor(&mut self) -> PResult<&'a Node<'a>> {
        let mut n = self.logand()?;
        while self.is("||") {
            let pos = self.pos_here();
            self.bump();
            let rhs = self.logand()?;
            n = self.node(pos, NodeKind::LogOr(n, rhs));
        }
        Ok(n)
    }
    fn logand(&mut self) -> PResult<&'a Node<'a>> {
        let mut n = self.bitor()?;
        while self.is("&&") {
            let pos = self.pos_here();
            self.bump();
            let rhs = self.bitor()?;
            n = self.node(pos, NodeKind::LogAnd(n, rhs));
        }
        Ok(n)
    }
    fn bitor(&mut self) -> PResult<&'a Node<'a>> {
        let mut n = self.bitxor()?;
        while self.is("|") {
            let pos = self.pos_here();
            self.bump();
            let rhs = self.bitxor()?;
            n = self.node(pos, NodeKind::BitOr(n, rhs));
        }
        Ok(n)
    }
    fn bitxor(&mut self) -> PResult<&'a Node<'a>> {
        let mut n = self.bitand()?;
        while self.is("^") {
            let pos = self.pos_here();
            self.bump();
            let rhs = self.bitand()?;
            n = self.node(pos, NodeKind::BitXor(n, rhs));
        }
        Ok(n)
    }
    fn bitand(&mut self) -> PResult<&'a Node<'a>> {
        let mut n = self.equality()?;
        while self.is("&") {
            let pos = self.pos_here();
            self.bump();
            let rhs = self.equality()?;
            n = self.node(pos, NodeKind::BitAnd(n, rhs));
        }
        Ok(n)
    }
    fn equality(&mut self) -> PResult<&'a Node<'a>> {
        let mut n = self.relational()?;
        loop {
            let pos = self.pos_here();
            if self.consume("==") {
                let rhs = self.relational()?;
                n = self.node(pos, NodeKind::Eq(n, rhs));
            } else if self.consume("!=") {
                let rhs = self.relational()?;
                n = self.node(pos, NodeKind::Ne(n, rhs));
            } else {
                break;
            }
        }
        Ok(n)
    }
    fn relational(&mut self) -> PResult<&'a Node<'a>> {
        let mut n = self.shift()?;
        loop {
            let pos = self.pos_here();
            if self.consume("<") {
                let rhs = self.shift()?;
                n = self.node(pos, NodeKind::Lt(n, rhs));
            } else if self.consume("<=") {
                let rhs = self.shift()?;
                n = self.node(pos, NodeKind::Le(n, rhs));
            } else if self.consume(">") {
                let rhs = self.shift()?;
                n = self.node(pos, NodeKind::Lt(rhs, n));
            } else if self.consume(">=") {
                let rhs = self.shift()?;
                n = self.node(pos, NodeKind::Le(rhs, n));
            } else {
                break;
            }
        }
        Ok(n)
    }
    fn shift(&mut self) -> PResult<&'a Node<'a>> {
        let mut n = self.additive()?;
        loop {
            let pos = self.pos_here();
            if self.consume("<<") {
                let rhs = self.additive()?;
                n = self.node(pos, NodeKind::Shl(n, rhs));
            } else if self.consume(">>") {
                let rhs = self.additive()?;
                n = self.node(pos, NodeKind::Shr(n, rhs));
            } else {
                break;
            }
        }
        Ok(n)
    }

    /// Pointer-aware `+`/`-`: scales an integer operand by the pointee size
    /// and lowers pointer-pointer subtraction to a byte-difference divide.
    fn new_add(&mut self, pos: SourcePos, lhs: &'a Node<'a>, rhs: &'a Node<'a>) -> PResult<&'a Node<'a>> {
        let lt = self.type_check(lhs)?;
        let rt = self.type_check(rhs)?;
        if lt.is_numeric() && rt.is_numeric() {
            return Ok(self.node(pos, NodeKind::Add(lhs, rhs)));
        }
        if lt.is_pointer() && rt.is_pointer() {
            return Err(self.err_here(pos, "invalid operands to binary +"));
        }
        let (ptr, ptr_ty, int) = if lt.is_pointer() { (lhs, lt, rhs) } else { (rhs, rt, lhs) };
        let elem_size = ptr_ty.base().map(|b| b.size.get().max(1)).unwrap_or(1);
        let scale = self.node(pos, NodeKind::Num(elem_size as i128));
        let scaled = self.node(pos, NodeKind::Mul(int, scale));
        Ok(self.node(pos, NodeKind::Add(ptr, scaled)))
    }

    fn new_sub(&mut self, pos: SourcePos, lhs: &'a Node<'a>, rhs: &'a Node<'a>) -> PResult<&'a Node<'a>> {
        let lt = self.type_check(lhs)?;
        let rt = self.type_check(rhs)?;
        if lt.is_numeric() && rt.is_numeric() {
            return Ok(self.node(pos, NodeKind::Sub(lhs, rhs)));
        }
        if lt.is_pointer() && rt.is_pointer() {
            let elem_size = lt.base().map(|b| b.size.get().max(1)).unwrap_or(1);
            let diff = self.node(pos, NodeKind::Sub(lhs, rhs));
            let scale = self.node(pos, NodeKind::Num(elem_size as i128));
            return Ok(self.node(pos, NodeKind::Div(diff, scale)));
        }
        if lt.is_pointer() && rt.is_numeric() {
            let elem_size = lt.base().map(|b| b.size.get().max(1)).unwrap_or(1);
            let scale = self.node(pos, NodeKind::Num(elem_size as i128));
            let scaled = self.node(pos, NodeKind::Mul(rhs, scale));
            return Ok(self.node(pos, NodeKind::Sub(lhs, scaled)));
        }
        Err(self.err_here(pos, "invalid operands to binary -"))
    }

    fn additive(&mut self) -> PResult<&'a Node<'a>> {
        let mut n = self.multiplicative()?;
        loop {
            let pos = self.pos_here();
            if self.consume("+") {
                let rhs = self.multiplicative()?;
                n = self.new_add(pos, n, rhs)?;
            } else if self.consume("-") {
                let rhs = self.multiplicative()?;
                n = self.new_sub(pos, n, rhs)?;
            } else {
                break;
            }
        }
        Ok(n)
    }
    fn multiplicative(&mut self) -> PResult<&'a Node<'a>> {
        let mut n = self.cast()?;
        loop {
            let pos = self.pos_here();
            if self.consume("*") {
                let rhs = self.cast()?;
                n = self.node(pos, NodeKind::Mul(n, rhs));
            } else if self.consume("/") {
                let rhs = self.cast()?;
                n = self.node(pos, NodeKind::Div(n, rhs));
            } else if self.consume("%") {
                let rhs = self.cast()?;
                n = self.node(pos, NodeKind::Mod(n, rhs));
            } else {
                break;
            }
        }
        Ok(n)
    }

    fn cast(&mut self) -> PResult<&'a Node<'a>> {
        let pos = self.pos_here();
        if self.is("(") && self.is_typename_at(1) {
            self.bump();
            let ty = self.typename()?;
            self.expect(")")?;
            if self.is("{") {
                return self.compound_literal(pos, ty);
            }
            let inner = self.cast()?;
            let node = self.node(pos, NodeKind::Cast(inner));
            node.set_ty(ty);
            return Ok(node);
        }
        self.unary()
    }

    /// Typedef/keyword lookahead at a given offset from the cursor, used to
    /// disambiguate a cast/compound-literal `(` from a parenthesized
    /// expression without backtracking a whole sub-parse.
    fn is_typename_at(&self, off: usize) -> bool {
        let t = self.at(off);
        if t.is_ident() {
            return matches!(self.scopes.find_var(&t.text), Some(VarScopeEntry::Typedef(_)));
        }
        matches!(
            t.text.as_ref(),
            "void" | "_Bool" | "char" | "short" | "int" | "long" | "float" | "double" | "signed"
                | "unsigned" | "struct" | "union" | "enum" | "typeof" | "__typeof__" | "__typeof"
                | "const" | "volatile" | "_Atomic"
        )
    }

    fn compound_literal(&mut self, pos: SourcePos, ty: &'a Type<'a>) -> PResult<&'a Node<'a>> {
        let (init, final_ty) = self.parse_initializer(ty)?;
        if self.scopes.is_file_scope() || self.cur.is_none() {
            let label = self.fresh_name(".L.compound");
            let obj = self.tu.alloc_object(Object {
                name: label.clone(),
                ty: final_ty,
                is_local: false,
                is_static: true,
                is_definition: Cell::new(true),
                is_tentative: Cell::new(false),
                is_tls: false,
                is_inline: false,
                is_live: Cell::new(true),
                is_function: false,
                is_variadic: false,
                stack_offset: Cell::new(0),
                func: None,
                init_data: RefCell::new(None),
            });
            let mut bytes = vec![0u8; final_ty.size.get().max(0) as usize];
            let mut relocs = Vec::new();
            self.lower_global_init(&init, final_ty, &mut bytes, &mut relocs, 0)?;
            *obj.init_data.borrow_mut() = Some(InitData { bytes, relocations: relocs });
            self.globals.push(obj);
            let node = self.node(pos, NodeKind::CompoundLiteral { label });
            node.set_ty(final_ty);
            return Ok(node);
        }
        let obj = self.new_local(self.fresh_name(".L.compound"), final_ty);
        let base = self.node(pos, NodeKind::Var(VarRef { object: obj }));
        let zero = self.node(pos, NodeKind::Memzero { var: VarRef { object: obj } });
        let mut assigns = Vec::new();
        self.lower_local_init(&init, final_ty, base, pos, &mut assigns)?;
        let mut stmts = vec![self.node(pos, NodeKind::ExprStmt(zero))];
        stmts.extend(assigns.into_iter().map(|e| self.node(pos, NodeKind::ExprStmt(e))));
        stmts.push(self.node(pos, NodeKind::ExprStmt(base)));
        let block = self.node(pos, NodeKind::Block(stmts));
        let expr = self.node(pos, NodeKind::StmtExpr(block));
        expr.set_ty(final_ty);
        Ok(expr)
    }

    fn unary(&mut self) -> PResult<&'a Node<'a>> {
        let pos = self.pos_here();
        if self.consume("+") {
            return Ok(self.node(pos, NodeKind::Pos(self.cast()?)));
        }
        if self.consume("-") {
            return Ok(self.node(pos, NodeKind::Neg(self.cast()?)));
        }
        if self.consume("&") {
            if self.consume("&") {
                // `&&label` computed-goto address-of-label.
                let label = self.expect_ident()?;
                return Ok(self.node(pos, NodeKind::LabelVal(label)));
            }
            return Ok(self.node(pos, NodeKind::Addr(self.cast()?)));
        }
        if self.consume("*") {
            return Ok(self.node(pos, NodeKind::Deref(self.cast()?)));
        }
        if self.consume("!") {
            return Ok(self.node(pos, NodeKind::Not(self.cast()?)));
        }
        if self.consume("~") {
            return Ok(self.node(pos, NodeKind::BitNot(self.cast()?)));
        }
        if self.consume("++") {
            let operand = self.unary()?;
            let one = self.node(pos, NodeKind::Num(1));
            let added = self.new_add(pos, operand, one)?;
            return Ok(self.node(pos, NodeKind::Assign { lhs: operand, rhs: added }));
        }
        if self.consume("--") {
            let operand = self.unary()?;
            let one = self.node(pos, NodeKind::Num(1));
            let subbed = self.new_sub(pos, operand, one)?;
            return Ok(self.node(pos, NodeKind::Assign { lhs: operand, rhs: subbed }));
        }
        if self.is("sizeof") {
            return self.sizeof_expr();
        }
        if self.is("_Alignof") || self.is("__alignof__") || self.is("__alignof") {
            self.bump();
            self.expect("(")?;
            let ty = self.typename()?;
            self.expect(")")?;
            return Ok(self.node(pos, NodeKind::Num(ty.align.get() as i128)));
        }
        self.postfix()
    }

    fn sizeof_expr(&mut self) -> PResult<&'a Node<'a>> {
        let pos = self.pos_here();
        self.bump(); // sizeof
        if self.is("(") && self.is_typename_at(1) {
            self.bump();
            let ty = self.typename()?;
            self.expect(")")?;
            if let TypeKind::Vla { .. } = ty.kind {
                return self.vla_runtime_size(pos, ty);
            }
            return Ok(self.node(pos, NodeKind::Num(ty.size.get().max(0) as i128)));
        }
        let operand = self.unary()?;
        let ty = self.type_check(operand)?;
        if let TypeKind::Vla { .. } = ty.kind {
            return self.vla_runtime_size(pos, ty);
        }
        Ok(self.node(pos, NodeKind::Num(ty.size.get().max(0) as i128)))
    }

    fn vla_runtime_size(&mut self, pos: SourcePos, ty: &'a Type<'a>) -> PResult<&'a Node<'a>> {
        let TypeKind::Vla { len_var, .. } = ty.kind else { unreachable!() };
        let fs = self.cur.as_ref().ok_or_else(|| self.err_here(pos, "VLA outside function"))?;
        let func = fs.object.func.as_ref().unwrap();
        let vars = func.vla_vars.borrow();
        let obj = vars
            .get(len_var.0 as usize)
            .copied()
            .ok_or_else(|| self.err_here(pos, "unresolved VLA size variable"))?;
        Ok(self.node(pos, NodeKind::Var(VarRef { object: obj })))
    }

    fn postfix(&mut self) -> PResult<&'a Node<'a>> {
        let mut n = self.primary()?;
        loop {
            let pos = self.pos_here();
            if self.consume("[") {
                let idx = self.expr()?;
                self.expect("]")?;
                let added = self.new_add(pos, n, idx)?;
                n = self.node(pos, NodeKind::Deref(added));
            } else if self.consume(".") {
                let name = self.expect_ident()?;
                n = self.member_access(pos, n, &name)?;
            } else if self.consume("->") {
                let name = self.expect_ident()?;
                let deref = self.node(pos, NodeKind::Deref(n));
                n = self.member_access(pos, deref, &name)?;
            } else if self.consume("++") {
                n = self.postinc(pos, n, true)?;
            } else if self.consume("--") {
                n = self.postinc(pos, n, false)?;
            } else {
                break;
            }
        }
        Ok(n)
    }

    /// `x++`/`x--`: evaluated as `(typeof x)((x += 1) - 1)` style using a
    /// statement expression so the old value is yielded without a fresh
    /// temporary object.
    fn postinc(&mut self, pos: SourcePos, operand: &'a Node<'a>, inc: bool) -> PResult<&'a Node<'a>> {
        let one = self.node(pos, NodeKind::Num(1));
        let delta = if inc { self.new_add(pos, operand, one)? } else { self.new_sub(pos, operand, one)? };
        let assign = self.node(pos, NodeKind::Assign { lhs: operand, rhs: delta });
        let back = if inc { self.new_sub(pos, assign, one)? } else { self.new_add(pos, assign, one)? };
        Ok(back)
    }

    fn member_access(&mut self, pos: SourcePos, base: &'a Node<'a>, name: &str) -> PResult<&'a Node<'a>> {
        let bty = self.type_check(base)?;
        let (TypeKind::Struct(agg) | TypeKind::Union(agg)) = &bty.kind else {
            return Err(self.err_here(pos, "not a struct or union"));
        };
        let idx = agg
            .members
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| self.err_here(pos, &format!("no member named '{name}'")))?;
        Ok(self.node(pos, NodeKind::Member { base, member_index: idx }))
    }

    fn primary(&mut self) -> PResult<&'a Node<'a>> {
        let pos = self.pos_here();

        if self.consume("(") {
            if self.is("{") {
                self.bump();
                let body = self.compound_stmt()?;
                self.expect(")")?;
                return Ok(self.node(pos, NodeKind::StmtExpr(body)));
            }
            let e = self.expr()?;
            self.expect(")")?;
            return Ok(e);
        }

        if self.is("__builtin_va_start") {
            self.bump();
            self.expect("(")?;
            let ap = self.assign()?;
            self.expect(",")?;
            let _ = self.assign()?; // last named parameter, resolved via current func's last param
            self.expect(")")?;
            let last_param = self
                .cur
                .as_ref()
                .and_then(|fs| fs.object.func.as_ref().unwrap().params.borrow().last().copied())
                .ok_or_else(|| self.err_here(pos, "va_start outside variadic function"))?;
            return Ok(self.node(pos, NodeKind::VaStart { ap, last_param: VarRef { object: last_param } }));
        }
        if self.is("__builtin_va_copy") {
            self.bump();
            self.expect("(")?;
            let dst = self.assign()?;
            self.expect(",")?;
            let src = self.assign()?;
            self.expect(")")?;
            return Ok(self.node(pos, NodeKind::VaCopy { dst, src }));
        }
        if self.is("__builtin_va_end") {
            self.bump();
            self.expect("(")?;
            let _ = self.assign()?;
            self.expect(")")?;
            return Ok(self.node(pos, NodeKind::NullExpr));
        }
        if self.is("__builtin_va_arg") {
            self.bump();
            self.expect("(")?;
            let ap = self.assign()?;
            self.expect(",")?;
            let ty = self.typename()?;
            self.expect(")")?;
            let node = self.node(pos, NodeKind::VaArg { ap });
            node.set_ty(ty);
            return Ok(node);
        }
        if self.is("__builtin_alloca") {
            self.bump();
            self.expect("(")?;
            let size = self.assign()?;
            self.expect(")")?;
            return Ok(self.node(pos, NodeKind::Alloca(size)));
        }
        if self.is("__builtin_types_compatible_p") {
            self.bump();
            self.expect("(")?;
            let a = self.typename()?;
            self.expect(",")?;
            let b = self.typename()?;
            self.expect(")")?;
            return Ok(self.node(pos, NodeKind::Num(a.is_compatible(b) as i128)));
        }
        if self.is("__builtin_reg_class") {
            // Classifies a type for the SysV register-save area used by
            // `va_arg`'s generated expansion: 0 = integer/pointer (consumed
            // from the general-purpose save slots), 1 = float/double
            // (consumed from the SSE slots), 2 = anything else (structs,
            // long double) which `va_arg` instead reads from the overflow
            // area. Mirrors widcc's builtin of the same name.
            self.bump();
            self.expect("(")?;
            let ty = self.typename()?;
            self.expect(")")?;
            let class = if ty.is_float() {
                1
            } else if matches!(ty.kind, TypeKind::Struct(_) | TypeKind::Union(_) | TypeKind::LongDouble) {
                2
            } else {
                0
            };
            return Ok(self.node(pos, NodeKind::Num(class as i128)));
        }
        if self.is("__builtin_constant_p") {
            self.bump();
            self.expect("(")?;
            let e = self.assign()?;
            self.expect(")")?;
            let is_const = const_eval::is_const_expr(e);
            return Ok(self.node(pos, NodeKind::Num(is_const as i128)));
        }
        if self.is("__builtin_expect") {
            self.bump();
            self.expect("(")?;
            let e = self.assign()?;
            self.expect(",")?;
            let _ = self.assign()?;
            self.expect(")")?;
            return Ok(e);
        }
        if self.is("__builtin_offsetof") {
            self.bump();
            self.expect("(")?;
            let ty = self.typename()?;
            self.expect(",")?;
            let name = self.expect_ident()?;
            self.expect(")")?;
            let (TypeKind::Struct(agg) | TypeKind::Union(agg)) = &ty.kind else {
                return Err(self.err_here(pos, "offsetof target is not a struct/union"));
            };
            let m = agg.members.iter().find(|m| m.name == name).ok_or_else(|| self.err_here(pos, "no such member"))?;
            return Ok(self.node(pos, NodeKind::Num(m.offset as i128)));
        }

        match &self.cur().kind {
            TokenKind::Num(lit) => {
                let lit = lit.clone();
                self.bump();
                if lit.is_float {
                    let node = self.node(pos, NodeKind::FloatNum(lit.float_value));
                    node.set_ty(match lit.kind {
                        NumKind::Float => self.t_float,
                        NumKind::LongDouble => self.t_ldouble,
                        _ => self.t_double,
                    });
                    return Ok(node);
                }
                let node = self.node(pos, NodeKind::Num(lit.int_value));
                node.set_ty(match lit.kind {
                    NumKind::Int => self.t_int,
                    NumKind::UInt => self.t_uint,
                    NumKind::Long => self.t_long,
                    NumKind::ULong => self.t_ulong,
                    _ => self.t_int,
                });
                return Ok(node);
            }
            TokenKind::Str(lit) => {
                let lit = lit.clone();
                self.bump();
                let label = self.fresh_name(".LC");
                let elem = match lit.wide {
                    WideKind::Narrow | WideKind::Utf8 => self.t_pchar,
                    WideKind::Utf16 => self.t_ushort,
                    WideKind::Utf32 | WideKind::Wchar => self.t_int,
                };
                let unit = elem.size.get().max(1) as usize;
                let len = lit.bytes.len() / unit.max(1) + 1;
                let aty = self.ty.alloc(Type {
                    kind: TypeKind::Array { elem, len: len as i64 },
                    size: Cell::new(len as i64 * elem.size.get().max(1)),
                    align: Cell::new(elem.align.get()),
                    is_unsigned: false,
                    origin: None,
                });
                let mut bytes = lit.bytes.clone();
                bytes.resize(bytes.len() + unit, 0);
                let obj = self.tu.alloc_object(Object {
                    name: label.clone(),
                    ty: aty,
                    is_local: false,
                    is_static: true,
                    is_definition: Cell::new(true),
                    is_tentative: Cell::new(false),
                    is_tls: false,
                    is_inline: false,
                    is_live: Cell::new(true),
                    is_function: false,
                    is_variadic: false,
                    stack_offset: Cell::new(0),
                    func: None,
                    init_data: RefCell::new(Some(InitData { bytes, relocations: vec![] })),
                });
                self.globals.push(obj);
                let node = self.node(pos, NodeKind::StrLit { label });
                node.set_ty(aty);
                return Ok(node);
            }
            _ => {}
        }

        if self.cur().is_ident() {
            let name = self.bump().text.to_string();
            if self.is("(") {
                return self.funcall(pos, name);
            }
            match self.scopes.find_var(&name) {
                Some(VarScopeEntry::Var(obj)) => {
                    return Ok(self.node(pos, NodeKind::Var(VarRef { object: obj })));
                }
                Some(VarScopeEntry::EnumConst(ty, v)) => {
                    let node = self.node(pos, NodeKind::Num(*v as i128));
                    node.set_ty(ty);
                    return Ok(node);
                }
                Some(VarScopeEntry::Typedef(_)) | None => {
                    return Err(self.err_here(pos, &format!("undeclared identifier '{name}'")));
                }
            }
        }

        Err(self.err_here(pos, &format!("unexpected token '{}'", self.cur().text)))
    }

    fn funcall(&mut self, pos: SourcePos, name: String) -> PResult<&'a Node<'a>> {
        self.expect("(")?;
        let mut args = Vec::new();
        if !self.is(")") {
            loop {
                args.push(self.assign()?);
                if !self.consume(",") {
                    break;
                }
            }
        }
        self.expect(")")?;

        let is_named_fn = matches!(self.scopes.find_var(&name), Some(VarScopeEntry::Var(o)) if o.is_function)
            || self.scopes.find_var(&name).is_none();

        if is_named_fn {
            if let Some(fs) = &mut self.cur {
                if let Some(func) = &fs.object.func {
                    func.calls.borrow_mut().push(name.clone());
                }
            }
            let ret_ty = match self.scopes.find_var(&name) {
                Some(VarScopeEntry::Var(o)) => match &o.ty.kind {
                    TypeKind::Function(f) => Some(f.return_ty),
                    _ => None,
                },
                _ => None,
            };
            let node = self.node(pos, NodeKind::FuncCall { callee: Callee::Named(name), args });
            if let Some(rt) = ret_ty {
                node.set_ty(rt);
            } else {
                node.set_ty(self.t_int);
            }
            return Ok(node);
        }

        // Function pointer call through a variable.
        let VarScopeEntry::Var(obj) = self.scopes.find_var(&name).unwrap().clone() else {
            return Err(self.err_here(pos, "call target is not callable"));
        };
        let callee = self.node(pos, NodeKind::Var(VarRef { object: obj }));
        let ret_ty = match decay(obj.ty, self.ty).kind {
            TypeKind::Pointer(inner) => match &inner.kind {
                TypeKind::Function(f) => f.return_ty,
                _ => self.t_int,
            },
            TypeKind::Function(ref f) => f.return_ty,
            _ => self.t_int,
        };
        let node = self.node(pos, NodeKind::FuncCall { callee: Callee::Indirect(callee), args });
        node.set_ty(ret_ty);
        Ok(node)
    }

    // ----------------------------------------------------------------
    // Type checking (fills `Node::ty`, the minimum needed for codegen to
    // pick instruction widths and perform usual arithmetic conversions)
    // ----------------------------------------------------------------

    fn type_check(&self, n: &'a Node<'a>) -> PResult<&'a Type<'a>> {
        if let Some(t) = n.ty() {
            return Ok(t);
        }
        let t = self.infer_type(n)?;
        n.set_ty(t);
        Ok(t)
    }

    fn infer_type(&self, n: &'a Node<'a>) -> PResult<&'a Type<'a>> {
        match &n.kind {
            NodeKind::Num(_) => Ok(self.t_int),
            NodeKind::FloatNum(_) => Ok(self.t_double),
            NodeKind::Var(v) => Ok(v.object.ty),
            NodeKind::StrLit { .. } | NodeKind::CompoundLiteral { .. } => {
                n.ty().ok_or_else(|| self.err_here(n.pos, "internal: literal missing precomputed type"))
            }
            NodeKind::Add(a, b) | NodeKind::Sub(a, b) | NodeKind::Mul(a, b) | NodeKind::Div(a, b) => {
                let (at, bt) = (self.type_check(a)?, self.type_check(b)?);
                Ok(usual_arith_conversion(at, bt, self.ty))
            }
            NodeKind::Mod(a, b) | NodeKind::BitAnd(a, b) | NodeKind::BitOr(a, b) | NodeKind::BitXor(a, b) => {
                let (at, bt) = (self.type_check(a)?, self.type_check(b)?);
                Ok(usual_arith_conversion(at, bt, self.ty))
            }
            NodeKind::Shl(a, _) | NodeKind::Shr(a, _) => Ok(integer_promote(self.type_check(a)?, self.ty)),
            NodeKind::Neg(a) | NodeKind::Pos(a) => Ok(self.type_check(a)?),
            NodeKind::BitNot(a) => Ok(integer_promote(self.type_check(a)?, self.ty)),
            NodeKind::Not(_)
            | NodeKind::LogAnd(_, _)
            | NodeKind::LogOr(_, _)
            | NodeKind::Eq(_, _)
            | NodeKind::Ne(_, _)
            | NodeKind::Lt(_, _)
            | NodeKind::Le(_, _) => Ok(self.t_int),
            NodeKind::Deref(a) => {
                let t = self.type_check(a)?;
                t.base().ok_or_else(|| self.err_here(n.pos, "dereferencing non-pointer"))
            }
            NodeKind::Addr(a) => Ok(self.pointer_to(self.type_check(a)?)),
            NodeKind::Member { base, member_index } => {
                let bt = self.type_check(base)?;
                match &bt.kind {
                    TypeKind::Struct(agg) | TypeKind::Union(agg) => Ok(agg.members[*member_index].ty),
                    _ => Err(self.err_here(n.pos, "member access on non-aggregate")),
                }
            }
            NodeKind::Assign { lhs, .. } => self.type_check(lhs),
            NodeKind::Cast(_) => n.ty().ok_or_else(|| self.err_here(n.pos, "internal: cast missing type")),
            NodeKind::Cond { then, els, .. } => {
                let (tt, et) = (self.type_check(then)?, self.type_check(els)?);
                if tt.is_numeric() && et.is_numeric() {
                    Ok(usual_arith_conversion(tt, et, self.ty))
                } else {
                    Ok(tt)
                }
            }
            NodeKind::Comma(_, b) => self.type_check(b),
            NodeKind::Chain { cond, rhs } => {
                let (ct, rt) = (self.type_check(cond)?, self.type_check(rhs)?);
                if ct.is_numeric() && rt.is_numeric() {
                    Ok(usual_arith_conversion(ct, rt, self.ty))
                } else {
                    Ok(ct)
                }
            }
            NodeKind::FuncCall { .. } => n.ty().ok_or(self.err_here(n.pos, "internal: call missing type")).or(Ok(self.t_int)),
            NodeKind::StmtExpr(_) => n.ty().ok_or_else(|| self.err_here(n.pos, "internal: stmt-expr missing type")),
            NodeKind::Memzero { .. } | NodeKind::VaStart { .. } | NodeKind::VaCopy { .. } | NodeKind::NullExpr => Ok(self.t_void),
            NodeKind::Alloca(_) => Ok(self.pointer_to(self.t_void)),
            NodeKind::VaArg { .. } => n.ty().ok_or_else(|| self.err_here(n.pos, "internal: va_arg missing type")),
            NodeKind::LabelVal(_) => Ok(self.pointer_to(self.t_void)),
            _ => Ok(self.t_int),
        }
    }

    // ----------------------------------------------------------------
    // Initializers
    // ----------------------------------------------------------------

    fn parse_initializer(&mut self, ty: &'a Type<'a>) -> PResult<(InitNode<'a>, &'a Type<'a>)> {
        match &ty.kind {
            TypeKind::Array { elem, len } if *len < 0 || self.is("{") => {
                self.parse_array_initializer(ty, *elem, *len)
            }
            TypeKind::Struct(agg) if !agg.is_flexible || self.is("{") => self.parse_struct_initializer(ty),
            TypeKind::Union(_) => self.parse_union_initializer(ty),
            _ => {
                let braced = self.consume("{");
                let e = self.assign()?;
                if braced {
                    self.consume(",");
                    self.expect("}")?;
                }
                Ok((InitNode::Scalar(Some(e)), ty))
            }
        }
    }

    fn parse_array_initializer(
        &mut self,
        ty: &'a Type<'a>,
        elem: &'a Type<'a>,
        declared_len: i64,
    ) -> PResult<(InitNode<'a>, &'a Type<'a>)> {
        // String literal initializing a char array: `char s[] = "hi"`.
        if matches!(elem.kind, TypeKind::Char | TypeKind::SChar) {
            if let TokenKind::Str(lit) = &self.cur().kind.clone() {
                let pos = self.pos_here();
                self.bump();
                let mut items = Vec::new();
                for b in &lit.bytes {
                    let e = self.node(pos, NodeKind::Num(*b as i128));
                    items.push(InitNode::Scalar(Some(e)));
                }
                items.push(InitNode::Scalar(Some(self.node(pos, NodeKind::Num(0)))));
                let len = if declared_len >= 0 { declared_len } else { items.len() as i64 };
                items.resize_with(len.max(0) as usize, || InitNode::Scalar(None));
                let final_ty = self.array_of(elem, len);
                return Ok((InitNode::Array { elem_ty: elem, items, is_flexible: false }, final_ty));
            }
        }

        self.expect("{")?;
        let mut items = Vec::new();
        while !self.is("}") {
            let (item, _) = self.parse_initializer(elem)?;
            items.push(item);
            if !self.consume(",") {
                break;
            }
        }
        self.expect("}")?;
        let len = if declared_len >= 0 { declared_len } else { items.len() as i64 };
        items.resize_with(len.max(0) as usize, || InitNode::Scalar(None));
        let final_ty = self.array_of(elem, len);
        Ok((InitNode::Array { elem_ty: elem, items, is_flexible: false }, final_ty))
    }

    fn array_of(&self, elem: &'a Type<'a>, len: i64) -> &'a Type<'a> {
        let size = if elem.size.get() < 0 { -1 } else { elem.size.get() * len };
        let align = if size >= 16 { array_alignment(size, elem.align.get()) } else { elem.align.get() };
        self.ty.alloc(Type {
            kind: TypeKind::Array { elem, len },
            size: Cell::new(size),
            align: Cell::new(align),
            is_unsigned: false,
            origin: None,
        })
    }

    fn parse_struct_initializer(&mut self, ty: &'a Type<'a>) -> PResult<(InitNode<'a>, &'a Type<'a>)> {
        let TypeKind::Struct(agg) = &ty.kind else { unreachable!() };
        let braced = self.consume("{");
        let mut items = Vec::new();
        for m in &agg.members {
            if self.is("}") || self.is_eof() {
                break;
            }
            let (item, _) = self.parse_initializer(m.ty)?;
            items.push(item);
            if !braced {
                break;
            }
            if !self.consume(",") {
                break;
            }
        }
        if braced {
            self.expect("}")?;
        }
        while items.len() < agg.members.len() {
            items.push(InitNode::Scalar(None));
        }
        Ok((InitNode::Struct { items }, ty))
    }

    fn parse_union_initializer(&mut self, ty: &'a Type<'a>) -> PResult<(InitNode<'a>, &'a Type<'a>)> {
        let TypeKind::Union(agg) = &ty.kind else { unreachable!() };
        let braced = self.consume("{");
        let mut items: Vec<Option<InitNode<'a>>> = agg.members.iter().map(|_| None).collect();
        if !agg.members.is_empty() && !(self.is("}")) {
            let (item, _) = self.parse_initializer(agg.members[0].ty)?;
            items[0] = Some(item);
        }
        if braced {
            self.consume(",");
            self.expect("}")?;
        }
        Ok((InitNode::Union { active: Some(0), items }, ty))
    }

    /// Builds an in-order list of `lhs = rhs` assignment-expression nodes
    /// that realize `init` into the object addressed by `base` (already a
    /// `Var`/`Member`/`Deref` lvalue node), leaving untouched elements as the
    /// `Memzero` already emitted for the whole object.
    fn lower_local_init(
        &mut self,
        init: &InitNode<'a>,
        ty: &'a Type<'a>,
        base: &'a Node<'a>,
        pos: SourcePos,
        out: &mut Vec<&'a Node<'a>>,
    ) -> PResult<()> {
        match init {
            InitNode::Scalar(Some(e)) => {
                out.push(self.node(pos, NodeKind::Assign { lhs: base, rhs: e }));
                Ok(())
            }
            InitNode::Scalar(None) => Ok(()),
            InitNode::Array { items, .. } => {
                let TypeKind::Array { elem, .. } = &ty.kind else { return Ok(()) };
                for (i, item) in items.iter().enumerate() {
                    let idx = self.node(pos, NodeKind::Num(i as i128));
                    let addr = self.new_add(pos, base, idx)?;
                    let lv = self.node(pos, NodeKind::Deref(addr));
                    self.lower_local_init(item, elem, lv, pos, out)?;
                }
                Ok(())
            }
            InitNode::Struct { items } => {
                let TypeKind::Struct(agg) = &ty.kind else { return Ok(()) };
                for (i, item) in items.iter().enumerate() {
                    let m = &agg.members[i];
                    let lv = self.node(pos, NodeKind::Member { base, member_index: i });
                    self.lower_local_init(item, m.ty, lv, pos, out)?;
                }
                Ok(())
            }
            InitNode::Union { active, items } => {
                let TypeKind::Union(agg) = &ty.kind else { return Ok(()) };
                if let Some(i) = active {
                    if let Some(item) = &items[*i] {
                        let m = &agg.members[*i];
                        let lv = self.node(pos, NodeKind::Member { base, member_index: *i });
                        self.lower_local_init(item, m.ty, lv, pos, out)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn lower_global_init(
        &mut self,
        init: &InitNode<'a>,
        ty: &'a Type<'a>,
        bytes: &mut Vec<u8>,
        relocs: &mut Vec<Relocation>,
        offset: i64,
    ) -> PResult<()> {
        match init {
            InitNode::Scalar(Some(e)) => self.write_scalar(*e, ty, bytes, relocs, offset),
            InitNode::Scalar(None) => Ok(()),
            InitNode::Array { items, .. } => {
                let TypeKind::Array { elem, .. } = &ty.kind else { return Ok(()) };
                let stride = elem.size.get().max(0);
                for (i, item) in items.iter().enumerate() {
                    self.lower_global_init(item, elem, bytes, relocs, offset + stride * i as i64)?;
                }
                Ok(())
            }
            InitNode::Struct { items } => {
                let TypeKind::Struct(agg) = &ty.kind else { return Ok(()) };
                for (i, item) in items.iter().enumerate() {
                    let m = &agg.members[i];
                    self.lower_global_init(item, m.ty, bytes, relocs, offset + m.offset)?;
                }
                Ok(())
            }
            InitNode::Union { active, items } => {
                let TypeKind::Union(agg) = &ty.kind else { return Ok(()) };
                if let Some(i) = active {
                    if let Some(item) = &items[*i] {
                        self.lower_global_init(item, agg.members[*i].ty, bytes, relocs, offset)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn write_scalar(
        &mut self,
        e: &'a Node<'a>,
        ty: &'a Type<'a>,
        bytes: &mut Vec<u8>,
        relocs: &mut Vec<Relocation>,
        offset: i64,
    ) -> PResult<()> {
        let pos = e.pos;
        let need = (offset + ty.size.get().max(0)) as usize;
        if bytes.len() < need {
            bytes.resize(need, 0);
        }
        let c = const_eval::eval2(e).map_err(|err| self.err_here(pos, &err.message))?;

        if ty.is_float() {
            let v = match c {
                const_eval::Const::Float(f) => f,
                const_eval::Const::Int(i) => i as f64,
                const_eval::Const::Symbol { label, .. } => {
                    return Err(self.err_here(pos, &format!("'{label}' is not a valid floating initializer")))
                }
            };
            let sz = ty.size.get().max(1) as usize;
            if sz == 4 {
                bytes[offset as usize..offset as usize + 4].copy_from_slice(&(v as f32).to_le_bytes());
            } else {
                let raw = v.to_le_bytes();
                bytes[offset as usize..offset as usize + sz.min(8)].copy_from_slice(&raw[..sz.min(8)]);
            }
            return Ok(());
        }

        match c {
            const_eval::Const::Int(v) => {
                let n = v as i64;
                let sz = ty.size.get().max(1) as usize;
                let le = n.to_le_bytes();
                bytes[offset as usize..offset as usize + sz].copy_from_slice(&le[..sz]);
                Ok(())
            }
            const_eval::Const::Float(f) => {
                let n = f as i64;
                let sz = ty.size.get().max(1) as usize;
                bytes[offset as usize..offset as usize + sz].copy_from_slice(&n.to_le_bytes()[..sz]);
                Ok(())
            }
            const_eval::Const::Symbol { label, addend } => {
                relocs.push(Relocation { offset, symbol: label, addend });
                Ok(())
            }
        }
    }
}

/// A parsed-but-not-yet-lowered initializer tree, shaped like the
/// declaration it fills (scalar leaves, or nested array/struct/union
/// layers). Two lowering passes consume it: one emits an assignment chain
/// for locals, the other serializes directly to bytes plus relocations for
/// statics (spec §4.3's initializer handling).
enum InitNode<'a> {
    Scalar(Option<&'a Node<'a>>),
    Array { elem_ty: &'a Type<'a>, items: Vec<InitNode<'a>>, is_flexible: bool },
    Struct { items: Vec<InitNode<'a>> },
    Union { active: Option<usize>, items: Vec<Option<InitNode<'a>>> },
}
