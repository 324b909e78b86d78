//! Token model and shared source-position data.
//!
//! Tokens are produced by the (external) lexer, walked and re-spliced by the
//! preprocessor, and finally consumed by the parser. A [`Token`] is a small,
//! cheaply-cloned value: the actual lexeme text lives in the arena-owned
//! [`TokenText`] the token points at, and token *lists* are plain `Vec`s
//! rather than a hand-rolled linked list — splicing during macro expansion is
//! implemented as `Vec` surgery (`splice`) instead of pointer relinking, which
//! is both simpler and, for the list lengths a single translation unit
//! produces, not a meaningful performance concern.

use std::fmt;
use std::rc::Rc;

bitflags::bitflags! {
    /// Per-token flags carried through preprocessing.
    ///
    /// `AT_BOL` and `HAS_SPACE` are needed by the preprocessor (directive
    /// recognition, stringize spacing); `DONT_EXPAND` is the painter's-trick
    /// flag that breaks self-referential macro expansion (see
    /// [`crate::preprocessor::expand`]).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TokenFlags: u8 {
        /// First token on its source line.
        const AT_BOL        = 0b0000_0001;
        /// Preceded by whitespace (not counting newlines already covered by AT_BOL).
        const HAS_SPACE      = 0b0000_0010;
        /// Locked against expansion because it names a macro currently on the
        /// expansion stack (the painter's trick).
        const DONT_EXPAND    = 0b0000_0100;
        /// Produced by `##` pasting of an empty argument; dropped post-substitution.
        const PASTE_MARKER   = 0b0000_1000;
    }
}

/// What kind of lexeme a [`Token`] carries.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident,
    Keyword,
    Punct,
    Num(NumLiteral),
    Str(StrLiteral),
    /// Marks a change of input file (push/pop during `#include`).
    FileMarker,
    /// Produced and consumed internally during `##` pasting.
    PasteMarker,
    Eof,
}

/// A parsed numeric literal's value and inferred type, filled in once the
/// lexeme is recognized as a number (the external lexer hands us raw text;
/// parsing digits into a typed value happens here since it is needed by both
/// the preprocessor's `#if` evaluator and the parser's literal nodes).
#[derive(Debug, Clone, PartialEq)]
pub struct NumLiteral {
    pub text: Rc<str>,
    pub int_value: i64,
    pub float_value: f64,
    pub is_float: bool,
    pub kind: NumKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumKind {
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
    LongDouble,
}

/// A parsed string/char literal: raw bytes plus the element type the lexer
/// determined from its prefix (`""`, `u8""`, `u""`, `U""`, `L""`).
#[derive(Debug, Clone, PartialEq)]
pub struct StrLiteral {
    pub bytes: Vec<u8>,
    pub wide: WideKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WideKind {
    Narrow,
    Utf8,
    Utf16,
    Utf32,
    Wchar,
}

/// An `__attribute__((...))` entry attached to the token that follows the
/// cluster. Only `packed` is recognized (spec §4.1's "Adjacency & attribute
/// filtering"); anything else is parsed and discarded so unsupported
/// attributes don't break parsing of otherwise-valid source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    Packed,
}

/// A single preprocessing/compilation token.
///
/// `origin` is a non-owning back-reference (by index into the owning
/// [`TokenStream`]) to the macro-expansion-site token, used only for
/// diagnostics; it is `None` for tokens that came straight from source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: Rc<str>,
    pub file: FileId,
    pub line: u32,
    pub display_file: FileId,
    pub display_line: u32,
    pub flags: TokenFlags,
    pub origin: Option<usize>,
    pub attrs: Vec<Attribute>,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<Rc<str>>, file: FileId, line: u32) -> Self {
        Token {
            kind,
            text: text.into(),
            file,
            line,
            display_file: file,
            display_line: line,
            flags: TokenFlags::empty(),
            origin: None,
            attrs: Vec::new(),
        }
    }

    pub fn eof(file: FileId, line: u32) -> Self {
        let mut t = Token::new(TokenKind::Eof, "", file, line);
        t.flags.insert(TokenFlags::AT_BOL);
        t
    }

    pub fn is(&self, text: &str) -> bool {
        matches!(self.kind, TokenKind::Punct | TokenKind::Keyword | TokenKind::Ident) && &*self.text == text
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    pub fn is_ident(&self) -> bool {
        matches!(self.kind, TokenKind::Ident)
    }

    pub fn at_bol(&self) -> bool {
        self.flags.contains(TokenFlags::AT_BOL)
    }

    pub fn has_space(&self) -> bool {
        self.flags.contains(TokenFlags::HAS_SPACE)
    }

    pub fn locked(&self) -> bool {
        self.flags.contains(TokenFlags::DONT_EXPAND)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Interned source file identity. Files are registered once (by the include
/// machinery or the driver for the root file) and referenced by this small
/// copyable id everywhere else, instead of passing `Rc<str>`/`PathBuf` paths
/// through every token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

#[derive(Debug, Default)]
pub struct FileTable {
    names: Vec<Rc<str>>,
}

impl FileTable {
    pub fn new() -> Self {
        FileTable { names: Vec::new() }
    }

    pub fn intern(&mut self, name: impl Into<Rc<str>>) -> FileId {
        let name = name.into();
        if let Some(pos) = self.names.iter().position(|n| *n == name) {
            return FileId(pos as u32);
        }
        self.names.push(name);
        FileId((self.names.len() - 1) as u32)
    }

    pub fn name(&self, id: FileId) -> &str {
        &self.names[id.0 as usize]
    }
}

/// A mutable, splice-in-place sequence of tokens, EOF-terminated (spec §3
/// invariant). This is the unit the preprocessor consumes and produces: macro
/// expansion replaces a contiguous run in place via [`Vec::splice`].
#[derive(Debug, Default)]
pub struct TokenStream {
    pub tokens: Vec<Token>,
}

impl TokenStream {
    pub fn new(tokens: Vec<Token>) -> Self {
        debug_assert!(
            tokens.last().is_some_and(Token::is_eof),
            "token stream must be EOF-terminated"
        );
        TokenStream { tokens }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eof_is_at_bol() {
        let t = Token::eof(FileId(0), 1);
        assert!(t.at_bol());
        assert!(t.is_eof());
    }

    #[test]
    fn file_table_interns_by_name() {
        let mut table = FileTable::new();
        let a = table.intern("a.c");
        let b = table.intern("b.c");
        let a2 = table.intern("a.c");
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(table.name(a), "a.c");
    }

    #[test]
    fn token_stream_requires_eof_terminator() {
        let stream = TokenStream::new(vec![Token::eof(FileId(0), 0)]);
        assert_eq!(stream.tokens.len(), 1);
    }
}
