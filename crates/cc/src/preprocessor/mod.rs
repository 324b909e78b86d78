//! The macro-expansion preprocessor (spec §4.1).
//!
//! Transforms a raw token list into a macro-expanded, conditionally-included
//! token list. The phase is split into focused submodules:
//!
//! - [`macro_table`]: `Macro` definitions and the LIFO "lock stack" that
//!   implements the painter's-trick self-reference guard.
//! - [`expand`]: the expansion cursor walk, argument binding, and
//!   substitution (`#`, `##`, `__VA_OPT__`).
//! - [`cond`]: `#if`/`#ifdef`/.../`#endif` conditional-inclusion bookkeeping
//!   and the `defined` operator.
//! - [`directive`]: directive dispatch (`#define`, `#undef`, `#include`,
//!   `#line`, `#pragma`, `#error`/`#warning`) and the built-in object-like
//!   macros (`__FILE__`, `__LINE__`, `__COUNTER__`, ...).
//!
//! All preprocessor state — the macro table, the lock stack, the
//! conditional-inclusion stack, the `__COUNTER__` counter, the set of
//! once-only/guarded files — lives in one [`Preprocessor`] context passed
//! explicitly through every call, per spec §9's "no process-wide
//! singletons" redesign note.

pub mod cond;
pub mod directive;
pub mod expand;
pub mod macro_table;

use crate::token::{FileId, FileTable, Token};
use macro_table::MacroTable;
use std::collections::HashSet;

/// Resolves `#include` paths to file contents. The filesystem walk itself is
/// an external collaborator (spec §1's scope boundary); the preprocessor only
/// needs these three resolution strategies.
pub trait IncludeResolver {
    /// `#include "file"`: try the including file's directory first, then the
    /// search list.
    fn resolve_quoted(&mut self, name: &str, from_file: FileId) -> Option<(FileId, String)>;
    /// `#include <file>`: search list only.
    fn resolve_angled(&mut self, name: &str) -> Option<(FileId, String)>;
    /// `#include_next`: continue the search from after the including file's
    /// own resolution point.
    fn resolve_next(&mut self, name: &str, from_file: FileId) -> Option<(FileId, String)>;
}

/// A resolver that finds nothing; useful for unit tests and for `-E`-only
/// pipelines that are guaranteed not to hit an `#include`.
#[derive(Default)]
pub struct NullResolver;

impl IncludeResolver for NullResolver {
    fn resolve_quoted(&mut self, _name: &str, _from_file: FileId) -> Option<(FileId, String)> {
        None
    }
    fn resolve_angled(&mut self, _name: &str) -> Option<(FileId, String)> {
        None
    }
    fn resolve_next(&mut self, _name: &str, _from_file: FileId) -> Option<(FileId, String)> {
        None
    }
}

/// Fatal preprocessor diagnostics (spec §4.1 "Failure modes", §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PpError {
    pub message: String,
    pub file: FileId,
    pub line: u32,
}

impl std::fmt::Display for PpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: error: {}", self.file.0, self.line, self.message)
    }
}

impl std::error::Error for PpError {}

/// All process-wide preprocessor state, explicit and passed by `&mut`
/// reference instead of living in statics (spec §9).
pub struct Preprocessor {
    pub macros: MacroTable,
    pub files: FileTable,
    pub cond_stack: Vec<cond::CondFrame>,
    pub counter: u64,
    pub once_files: HashSet<FileId>,
    /// Header guard detected on a file's first pass: `#endif` annotated with
    /// the guard macro name lets a later `#include` of the same file become
    /// a no-op once the guard macro is defined (spec §4.1's include-guard
    /// optimization).
    pub guards: std::collections::HashMap<FileId, String>,
    pub base_file: String,
    pub warnings: Vec<String>,
}

impl Preprocessor {
    pub fn new(base_file: impl Into<String>) -> Self {
        Preprocessor {
            macros: MacroTable::new(),
            files: FileTable::new(),
            cond_stack: Vec::new(),
            counter: 0,
            once_files: HashSet::new(),
            guards: std::collections::HashMap::new(),
            base_file: base_file.into(),
            warnings: Vec::new(),
        }
    }

    /// Run the full pipeline: directive processing (which recursively drives
    /// `#include`) interleaved with macro expansion, producing a flat,
    /// EOF-terminated token list ready for the parser.
    pub fn preprocess(
        &mut self,
        tokens: Vec<Token>,
        resolver: &mut dyn IncludeResolver,
    ) -> Result<Vec<Token>, PpError> {
        let after_directives = directive::process(self, tokens, resolver)?;
        let expanded = expand::expand_all(self, after_directives)?;
        expand::adjacent_string_concat(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_on_already_preprocessed_stream() {
        // Preprocessing a stream with no directives and no macro-triggering
        // identifiers is the identity (spec §8 round-trip property).
        let mut pp = Preprocessor::new("t.c");
        let mut files = FileTable::new();
        let fid = files.intern("t.c");
        pp.files = files;
        let toks = crate::preprocessor::expand::tokenize_for_test("int x ;", fid);
        let mut resolver = NullResolver;
        let out = pp.preprocess(toks.clone(), &mut resolver).unwrap();
        let texts: Vec<_> = out.iter().map(|t| t.text.to_string()).collect();
        let expected: Vec<_> = toks.iter().map(|t| t.text.to_string()).collect();
        assert_eq!(texts, expected);
    }
}
