//! `rcc` — a self-contained C compiler core targeting the x86-64 System V
//! ABI on Linux (spec §1).
//!
//! The pipeline is strictly one-directional: `tokens → preprocessed tokens →
//! AST + global symbol table → assembly text` (spec §2). Each arrow is one
//! module boundary below:
//!
//! - [`lexer`] / [`token`]: the raw-text tokenizer and the shared token/file
//!   data model. The lexer is an external collaborator per spec §1's scope
//!   boundary, but a reference implementation lives here so the crate is
//!   runnable end to end without a separate front end.
//! - [`preprocessor`]: macro expansion, conditional inclusion, `#include`.
//! - [`types`]: the C type system — representation, compatibility, usual
//!   arithmetic conversion, struct/union/array layout.
//! - [`ast`] / [`sema`] / [`parser`] / [`const_eval`]: the recursive-descent
//!   parser and semantic analyzer, the symbol table it builds, and the
//!   constant-expression evaluator it leans on for array bounds, `case`
//!   labels, and global initializers.
//! - [`liveness`]: static-inline liveness propagation across the call graph
//!   the parser records as it goes.
//! - [`codegen`]: x86-64 SysV ABI emission.
//! - [`arena`]: the translation-unit-scoped bump allocator backing `Type`,
//!   `Node`, and `Object`.

pub mod arena;
pub mod ast;
pub mod codegen;
pub mod config;
pub mod const_eval;
pub mod lexer;
pub mod liveness;
pub mod parser;
pub mod preprocessor;
pub mod sema;
pub mod token;
pub mod types;

use preprocessor::{IncludeResolver, PpError, Preprocessor};
use token::FileId;
use types::TypeArena;

/// Crate-wide error aggregate (SPEC_FULL.md §A.2). Each phase keeps its own
/// error type with full diagnostic detail (file/line/column, per spec §7);
/// this just lets the driver propagate any of them with `?` and print them
/// uniformly.
#[derive(Debug)]
pub enum CompileError {
    Preprocess(PpError),
    Parse(parser::ParseError),
    CodeGen(codegen::error::CodeGenError),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Preprocess(e) => write!(f, "{e}"),
            CompileError::Parse(e) => write!(f, "{e}"),
            CompileError::CodeGen(e) => write!(f, "error: {e}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<PpError> for CompileError {
    fn from(e: PpError) -> Self {
        CompileError::Preprocess(e)
    }
}
impl From<parser::ParseError> for CompileError {
    fn from(e: parser::ParseError) -> Self {
        CompileError::Parse(e)
    }
}
impl From<codegen::error::CodeGenError> for CompileError {
    fn from(e: codegen::error::CodeGenError) -> Self {
        CompileError::CodeGen(e)
    }
}

/// Everything a completed compilation produced besides the assembly text
/// itself: non-fatal preprocessor/parser warnings (spec §7's "warnings are
/// emitted ... and compilation continues").
pub struct CompileOutput {
    pub assembly: String,
    pub warnings: Vec<String>,
}

/// Run the full pipeline on one already-lexed translation unit: preprocess,
/// parse + analyze, propagate static-inline liveness, and generate assembly.
///
/// `tokens` is the raw token stream for the root file (as produced by
/// [`lexer::tokenize`] or an external front end); `root_file` names the file
/// those tokens came from, already registered in `pp.files`.
pub fn compile_translation_unit(
    pp: &mut Preprocessor,
    tokens: Vec<token::Token>,
    root_file: FileId,
    resolver: &mut dyn IncludeResolver,
) -> Result<CompileOutput, CompileError> {
    let preprocessed = pp.preprocess(tokens, resolver)?;

    let tu = arena::TranslationUnit::new();
    let ty_arena = TypeArena::new();
    let parsed = parser::Parser::new(&tu, &ty_arena, preprocessed, root_file).parse_translation_unit()?;

    liveness::mark_live(&parsed.globals);
    let assembly = codegen::generate(&parsed.globals)?;

    let mut warnings = pp.warnings.clone();
    warnings.extend(parsed.warnings);

    Ok(CompileOutput { assembly, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use preprocessor::NullResolver;

    fn compile_str(src: &str) -> CompileOutput {
        let mut pp = Preprocessor::new("t.c");
        let file = pp.files.intern("t.c");
        let tokens = lexer::tokenize(src, file);
        let mut resolver = NullResolver;
        compile_translation_unit(&mut pp, tokens, file, &mut resolver).expect("compilation failed")
    }

    #[test]
    fn constant_return_folds_to_a_literal_mov() {
        // spec §8 scenario 1.
        let out = compile_str("int main(){return 2+3*4;}");
        assert!(out.assembly.contains("$14"));
    }

    #[test]
    fn object_like_macro_initializes_global() {
        // spec §8 scenario 2.
        let out = compile_str("#define F(x) x+x\nint a=F(3);\n");
        assert!(out.assembly.contains("\"a\":"));
    }

    #[test]
    fn ends_with_note_gnu_stack() {
        let out = compile_str("int main(){return 0;}");
        assert!(out.assembly.trim_end().ends_with(".section .note.GNU-stack,\"\",@progbits"));
    }
}
