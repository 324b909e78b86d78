//! The raw-text tokenizer. Produces the flat, EOF-terminated [`Token`]
//! sequence the preprocessor and parser both operate on.
//!
//! Digraphs (`<%`, `%:`, ...) are deliberately not recognized, matching the
//! stance taken in the original this spec was distilled from.

use crate::token::{FileId, NumKind, NumLiteral, StrLiteral, Token, TokenFlags, TokenKind, WideKind};

const KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "_Alignas", "_Alignof", "_Atomic", "_Bool",
    "_Complex", "_Generic", "_Imaginary", "_Noreturn", "_Static_assert", "_Thread_local",
    "__attribute__", "__asm__", "asm", "__extension__", "__restrict", "__restrict__",
    "__inline", "__inline__", "__const", "__signed__", "typeof", "__typeof__", "__typeof",
];

const PUNCTUATORS: &[&str] = &[
    "<<=", ">>=", "...", "->", "++", "--", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+=",
    "-=", "*=", "/=", "%=", "&=", "|=", "^=", "##", "::", "[", "]", "(", ")", "{", "}", ".", "&",
    "*", "+", "-", "~", "!", "/", "%", "<", ">", "^", "|", "?", ":", ";", "=", ",", "#",
];

struct Lexer<'s> {
    src: &'s [u8],
    pos: usize,
    line: u32,
    file: FileId,
}

/// Tokenize one file's contents. Line continuations (`\` immediately
/// followed by a newline) are spliced away before lexing starts, which keeps
/// line numbers correct for everything else.
pub fn tokenize(src: &str, file: FileId) -> Vec<Token> {
    let spliced = splice_continuations(src);
    let mut lx = Lexer { src: spliced.as_bytes(), pos: 0, line: 1, file };
    let mut tokens = Vec::new();
    let mut at_bol = true;
    loop {
        let had_space = lx.skip_space_and_comments(&mut at_bol);
        if lx.pos >= lx.src.len() {
            break;
        }
        let line = lx.line;
        let start_at_bol = at_bol;
        at_bol = false;
        let kind = lx.lex_one();
        let Some((kind, text)) = kind else { continue };
        let mut tok = Token::new(kind, text, file, line);
        tok.flags.set(TokenFlags::HAS_SPACE, had_space);
        tok.flags.set(TokenFlags::AT_BOL, start_at_bol);
        tokens.push(tok);
    }
    tokens.push(Token::eof(file, lx.line));
    tokens
}

fn splice_continuations(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('\n') => {
                    chars.next();
                    continue;
                }
                Some('\r') => {
                    chars.next();
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    continue;
                }
                _ => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

impl<'s> Lexer<'s> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn skip_space_and_comments(&mut self, at_bol: &mut bool) -> bool {
        let mut had_space = false;
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') => {
                    self.pos += 1;
                    had_space = true;
                }
                Some(b'\n') => {
                    self.pos += 1;
                    self.line += 1;
                    *at_bol = true;
                    had_space = true;
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while self.peek().is_some_and(|c| c != b'\n') {
                        self.pos += 1;
                    }
                    had_space = true;
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.pos += 2;
                    while self.pos < self.src.len() {
                        if self.peek() == Some(b'*') && self.peek_at(1) == Some(b'/') {
                            self.pos += 2;
                            break;
                        }
                        if self.peek() == Some(b'\n') {
                            self.line += 1;
                        }
                        self.pos += 1;
                    }
                    had_space = true;
                }
                _ => break,
            }
        }
        had_space
    }

    fn lex_one(&mut self) -> Option<(TokenKind, String)> {
        let c = self.peek()?;

        if is_ident_start(c) {
            return Some(self.lex_ident());
        }
        if c.is_ascii_digit() || (c == b'.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
            return Some(self.lex_number());
        }
        if c == b'"' {
            return Some(self.lex_string(WideKind::Narrow, 0));
        }
        if c == b'\'' {
            return Some(self.lex_char());
        }
        if matches!(c, b'L' | b'u' | b'U') {
            if let Some(tok) = self.try_prefixed_literal() {
                return Some(tok);
            }
        }
        self.lex_punct()
    }

    fn try_prefixed_literal(&mut self) -> Option<(TokenKind, String)> {
        let rest = &self.src[self.pos..];
        let (wide, prefix_len) = if rest.starts_with(b"u8\"") {
            (WideKind::Utf8, 2)
        } else if rest.starts_with(b"u8'") {
            (WideKind::Utf8, 2)
        } else if rest.starts_with(b"L\"") || rest.starts_with(b"L'") {
            (WideKind::Wchar, 1)
        } else if rest.starts_with(b"u\"") || rest.starts_with(b"u'") {
            (WideKind::Utf16, 1)
        } else if rest.starts_with(b"U\"") || rest.starts_with(b"U'") {
            (WideKind::Utf32, 1)
        } else {
            return None;
        };
        self.pos += prefix_len;
        if self.peek() == Some(b'"') {
            Some(self.lex_string(wide, prefix_len))
        } else {
            Some(self.lex_char())
        }
    }

    fn lex_ident(&mut self) -> (TokenKind, String) {
        let start = self.pos;
        while self.peek().is_some_and(|c| is_ident_continue(c)) {
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let kind = if KEYWORDS.contains(&text.as_str()) { TokenKind::Keyword } else { TokenKind::Ident };
        (kind, text)
    }

    fn lex_number(&mut self) -> (TokenKind, String) {
        let start = self.pos;
        // Hex/binary prefix.
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X')) {
            self.pos += 2;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
        } else if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'b') | Some(b'B')) {
            self.pos += 2;
            while matches!(self.peek(), Some(b'0') | Some(b'1')) {
                self.pos += 1;
            }
        } else {
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') {
            is_float = true;
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E') | Some(b'p') | Some(b'P')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let mut is_unsigned = false;
        let mut long_count = 0;
        loop {
            match self.peek() {
                Some(b'u') | Some(b'U') => {
                    is_unsigned = true;
                    self.pos += 1;
                }
                Some(b'l') | Some(b'L') => {
                    long_count += 1;
                    self.pos += 1;
                }
                Some(b'f') | Some(b'F') if is_float => {
                    self.pos += 1;
                }
                _ => break,
            }
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        let digits: String = text.chars().take_while(|c| c.is_ascii_hexdigit() || *c == '.' || *c == 'x' || *c == 'X').collect();
        let kind = if is_float {
            NumLiteral {
                text: text.clone().into(),
                int_value: 0,
                float_value: digits.parse().unwrap_or(0.0),
                is_float: true,
                kind: if long_count > 0 { NumKind::LongDouble } else { NumKind::Double },
            }
        } else {
            let v = parse_int_literal(&text);
            NumLiteral {
                text: text.clone().into(),
                int_value: v,
                float_value: 0.0,
                is_float: false,
                kind: match (long_count, is_unsigned) {
                    (0, false) => NumKind::Int,
                    (0, true) => NumKind::UInt,
                    (_, false) => NumKind::Long,
                    (_, true) => NumKind::ULong,
                },
            }
        };
        (TokenKind::Num(kind), text)
    }

    fn lex_string(&mut self, wide: WideKind, prefix_len: usize) -> (TokenKind, String) {
        let raw_start = self.pos - prefix_len;
        self.pos += 1; // opening quote
        let mut bytes = Vec::new();
        while let Some(c) = self.peek() {
            if c == b'"' {
                self.pos += 1;
                break;
            }
            if c == b'\\' {
                self.pos += 1;
                bytes.push(self.lex_escape());
                continue;
            }
            if c == b'\n' {
                break;
            }
            bytes.push(c);
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.src[raw_start..self.pos]).into_owned();
        (TokenKind::Str(StrLiteral { bytes, wide }), text)
    }

    fn lex_char(&mut self) -> (TokenKind, String) {
        let start = self.pos;
        self.pos += 1; // opening quote
        let mut value: i64 = 0;
        while let Some(c) = self.peek() {
            if c == b'\'' {
                self.pos += 1;
                break;
            }
            if c == b'\\' {
                self.pos += 1;
                value = self.lex_escape() as i64;
                continue;
            }
            value = c as i64;
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        (
            TokenKind::Num(NumLiteral {
                text: text.clone().into(),
                int_value: value,
                float_value: 0.0,
                is_float: false,
                kind: NumKind::Int,
            }),
            text,
        )
    }

    fn lex_escape(&mut self) -> u8 {
        let Some(c) = self.peek() else { return b'\\' };
        self.pos += 1;
        match c {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'0' => 0,
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'"' => b'"',
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'v' => 0x0b,
            b'x' => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                    self.pos += 1;
                }
                let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("0");
                u8::from_str_radix(text, 16).unwrap_or(0)
            }
            other => other,
        }
    }

    fn lex_punct(&mut self) -> Option<(TokenKind, String)> {
        let rest = &self.src[self.pos..];
        for p in PUNCTUATORS {
            if rest.starts_with(p.as_bytes()) {
                self.pos += p.len();
                return Some((TokenKind::Punct, (*p).to_string()));
            }
        }
        // Unrecognized byte: consume it as a one-character punctuator so the
        // lexer always makes progress rather than looping.
        let c = self.peek()?;
        self.pos += 1;
        Some((TokenKind::Punct, (c as char).to_string()))
    }
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80
}

fn parse_int_literal(text: &str) -> i64 {
    let digits: String = text.chars().take_while(|c| !matches!(c, 'u' | 'U' | 'l' | 'L')).collect();
    if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).unwrap_or(0)
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).unwrap_or(0)
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits, 8).unwrap_or(0)
    } else {
        digits.parse().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Token> {
        tokenize(src, FileId(0))
    }

    #[test]
    fn lexes_simple_declaration() {
        let out = toks("int x = 14;");
        let texts: Vec<_> = out.iter().map(|t| t.text.to_string()).collect();
        assert_eq!(texts, vec!["int", "x", "=", "14", ";", ""]);
    }

    #[test]
    fn hex_and_octal_literals_parse_correctly() {
        let out = toks("0x1F 017");
        match &out[0].kind {
            TokenKind::Num(n) => assert_eq!(n.int_value, 31),
            _ => panic!(),
        }
        match &out[1].kind {
            TokenKind::Num(n) => assert_eq!(n.int_value, 15),
            _ => panic!(),
        }
    }

    #[test]
    fn string_literal_unescapes() {
        let out = toks(r#""a\nb""#);
        match &out[0].kind {
            TokenKind::Str(s) => assert_eq!(s.bytes, b"a\nb"),
            _ => panic!(),
        }
    }

    #[test]
    fn line_continuation_is_spliced_away() {
        let out = toks("int x \\\n= 1;");
        assert_eq!(out[1].line, 1);
    }

    #[test]
    fn multi_char_punctuators_are_greedy() {
        let out = toks("a <<= b");
        assert_eq!(out[1].text.as_ref(), "<<=");
    }

    #[test]
    fn line_comment_and_block_comment_are_skipped() {
        let out = toks("int x; // trailing\n/* block */ int y;");
        let texts: Vec<_> = out.iter().map(|t| t.text.to_string()).collect();
        assert_eq!(texts, vec!["int", "x", ";", "int", "y", ";", ""]);
    }

    #[test]
    fn keyword_is_tagged_as_keyword() {
        let out = toks("return");
        assert!(matches!(out[0].kind, TokenKind::Keyword));
    }
}
