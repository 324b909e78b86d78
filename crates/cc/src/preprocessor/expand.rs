//! Macro expansion: the cursor walk, argument binding, and substitution.

use super::macro_table::{BuiltinMacro, Macro, MacroBody};
use super::{PpError, Preprocessor};
use crate::token::{FileId, Token, TokenFlags, TokenKind};

/// Walk the whole token list, expanding macros left to right until the
/// cursor reaches EOF. Tokens spliced in by an expansion are re-scanned in
/// place, same as the source algorithm in spec §4.1.
pub fn expand_all(pp: &mut Preprocessor, tokens: Vec<Token>) -> Result<Vec<Token>, PpError> {
    expand_bounded(pp, tokens, pp.macros.locks.len())
}

/// Expand a macro argument once, in isolation, before it is substituted into
/// a macro body (spec §4.1(d), `original_source/preprocess.c`'s `expand_arg`).
/// The result is cached per-argument by the caller so a parameter referenced
/// more than once in the replacement list (e.g. `#define SQ(x) ((x)*(x))`)
/// expands its argument exactly once, matching stateful builtins like
/// `__COUNTER__` producing the same value at every use site.
fn expand_argument(pp: &mut Preprocessor, raw: &[Token]) -> Result<Vec<Token>, PpError> {
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    let file = raw[0].file;
    let line = raw[0].line;
    let mut with_eof = raw.to_vec();
    with_eof.push(Token::eof(file, line));
    let mut expanded = expand_bounded(pp, with_eof, pp.macros.locks.len())?;
    expanded.pop(); // drop the sentinel EOF pushed above
    Ok(expanded)
}

/// The cursor walk shared by [`expand_all`] and [`expand_argument`]. `floor`
/// is the lock-stack depth this call must not pop below: a nested call (over
/// an argument's own small token vector) has cursor values that are only
/// meaningful relative to *that* vector, so it must never release a lock
/// pushed by an enclosing scan over an unrelated, larger vector.
fn expand_bounded(pp: &mut Preprocessor, mut tokens: Vec<Token>, floor: usize) -> Result<Vec<Token>, PpError> {
    let mut i = 0usize;
    while i < tokens.len() {
        pp.macros.release_locks_above(floor, i);

        let tok = &tokens[i];
        if tok.is_eof() {
            break;
        }
        if !tok.is_ident() || tok.locked() {
            i += 1;
            continue;
        }

        let name = tok.text.to_string();
        let Some(mac) = pp.macros.get(&name).cloned() else {
            i += 1;
            continue;
        };

        if pp.macros.is_locked(&name) {
            // Actively expanding this macro already: lock it against itself
            // (the painter's trick) and move past it.
            tokens[i].flags.insert(TokenFlags::DONT_EXPAND);
            i += 1;
            continue;
        }

        match mac.body {
            MacroBody::Builtin(b) => {
                let replacement = expand_builtin(pp, b, &tokens[i]);
                tokens.splice(i..=i, replacement);
                // Builtins self-replace with literal values; nothing to lock
                // or rescan further since the result never re-triggers them.
            }
            MacroBody::Object(ref body) => {
                let has_space = tokens[i].has_space();
                let at_bol = tokens[i].at_bol();
                let mut replacement = clone_with_origin(body, i);
                apply_leading_flags(&mut replacement, has_space, at_bol);
                let stop_index = i + replacement.len();
                tokens.splice(i..=i, replacement);
                pp.macros.push_lock(name, stop_index);
            }
            MacroBody::Function { ref params, ref variadic_name, ref body } => {
                // Function-like macro use requires `(` immediately after
                // (spec §4.1). Without it, this identifier is not a macro
                // invocation at all.
                let Some(open_paren) = next_significant(&tokens, i + 1) else {
                    i += 1;
                    continue;
                };
                if !tokens[open_paren].is("(") {
                    i += 1;
                    continue;
                }

                let (args, close_paren) = match split_arguments(&tokens, open_paren) {
                    Some(v) => v,
                    None => {
                        return Err(PpError {
                            message: format!("unterminated argument list for macro '{}'", name),
                            file: tokens[i].file,
                            line: tokens[i].line,
                        });
                    }
                };

                let variadic_args: Vec<Token> = if variadic_name.is_some() && args.len() > params.len() {
                    join_with_commas(&args[params.len()..])
                } else {
                    Vec::new()
                };

                let bound = bind_params(params, variadic_name.as_deref(), &args, &variadic_args);
                let substituted = substitute(pp, body, &bound, variadic_name.is_some() && !variadic_args.is_empty())?;

                let has_space = tokens[i].has_space();
                let at_bol = tokens[i].at_bol();
                let mut replacement = clone_with_origin(&substituted, i);
                apply_leading_flags(&mut replacement, has_space, at_bol);
                let stop_index = i + replacement.len();
                tokens.splice(i..=close_paren, replacement);
                pp.macros.push_lock(name, stop_index);
            }
        }
    }
    Ok(tokens)
}

fn clone_with_origin(body: &[Token], origin: usize) -> Vec<Token> {
    body.iter()
        .cloned()
        .map(|mut t| {
            t.origin = Some(origin);
            t
        })
        .collect()
}

fn apply_leading_flags(tokens: &mut [Token], has_space: bool, at_bol: bool) {
    if let Some(first) = tokens.first_mut() {
        first.flags.set(TokenFlags::HAS_SPACE, has_space);
        first.flags.set(TokenFlags::AT_BOL, at_bol);
    }
}

fn next_significant(tokens: &[Token], from: usize) -> Option<usize> {
    if from < tokens.len() { Some(from) } else { None }
}

/// Split a function-macro call's argument list on top-level commas,
/// respecting nested parens/brackets/braces. Returns the per-argument token
/// slices and the index of the matching close paren.
fn split_arguments(tokens: &[Token], open_paren: usize) -> Option<(Vec<Vec<Token>>, usize)> {
    let mut depth = 0i32;
    let mut args: Vec<Vec<Token>> = vec![Vec::new()];
    let mut i = open_paren;
    loop {
        if i >= tokens.len() || tokens[i].is_eof() {
            return None;
        }
        let t = &tokens[i];
        if t.is("(") {
            depth += 1;
            if depth > 1 {
                args.last_mut().unwrap().push(t.clone());
            }
        } else if t.is(")") {
            depth -= 1;
            if depth == 0 {
                if args.len() == 1 && args[0].is_empty() {
                    args.clear();
                }
                return Some((args, i));
            }
            args.last_mut().unwrap().push(t.clone());
        } else if t.is(",") && depth == 1 {
            args.push(Vec::new());
        } else if depth >= 1 {
            args.last_mut().unwrap().push(t.clone());
        }
        i += 1;
    }
}

fn join_with_commas(args: &[Vec<Token>]) -> Vec<Token> {
    let mut out = Vec::new();
    for (idx, a) in args.iter().enumerate() {
        if idx > 0 {
            out.push(Token::new(TokenKind::Punct, ",", FileId(0), 0));
        }
        out.extend(a.iter().cloned());
    }
    out
}

struct BoundArg {
    raw: Vec<Token>,
    expanded: std::cell::RefCell<Option<Vec<Token>>>,
}

fn bind_params(
    params: &[String],
    variadic_name: Option<&str>,
    args: &[Vec<Token>],
    variadic_args: &[Token],
) -> Vec<(String, BoundArg)> {
    let mut bound = Vec::new();
    for (idx, p) in params.iter().enumerate() {
        let raw = args.get(idx).cloned().unwrap_or_default();
        bound.push((p.clone(), BoundArg { raw, expanded: std::cell::RefCell::new(None) }));
    }
    if let Some(va) = variadic_name {
        bound.push((
            va.to_string(),
            BoundArg { raw: variadic_args.to_vec(), expanded: std::cell::RefCell::new(None) },
        ));
    }
    bound
}

/// Apply `#`, `##`, `__VA_OPT__`, and plain parameter substitution to a
/// macro body (spec §4.1 "Substitution").
fn substitute(
    pp: &mut Preprocessor,
    body: &[Token],
    bound: &[(String, BoundArg)],
    va_non_empty: bool,
) -> Result<Vec<Token>, PpError> {
    let mut out: Vec<Token> = Vec::new();
    let mut i = 0usize;
    while i < body.len() {
        let t = &body[i];

        if t.is("#") && i + 1 < body.len() {
            let param_name = body[i + 1].text.to_string();
            if let Some((_, arg)) = bound.iter().find(|(n, _)| *n == param_name) {
                out.push(stringize(&arg.raw, t));
                i += 2;
                continue;
            }
        }

        if t.is("__VA_OPT__") && i + 1 < body.len() && body[i + 1].is("(") {
            let (inner, end) = extract_paren_group(body, i + 1);
            if va_non_empty {
                let substituted_inner = substitute(pp, &inner, bound, va_non_empty)?;
                out.extend(substituted_inner);
            } else {
                out.push(paste_marker(t));
            }
            i = end + 1;
            continue;
        }

        if t.is_ident() {
            if let Some((_, arg)) = bound.iter().find(|(n, _)| *n == t.text.as_ref()) {
                // `## param` / `param ##` handled by the paste pass below via
                // raw tokens; plain reference uses the cached expansion.
                let next_is_paste = body.get(i + 1).is_some_and(|n| n.is("##"));
                let prev_is_paste = out.last().is_some_and(|p| p.is("##"));
                if next_is_paste || prev_is_paste {
                    out.extend(if arg.raw.is_empty() {
                        vec![paste_marker(t)]
                    } else {
                        arg.raw.clone()
                    });
                } else {
                    let cached = arg.expanded.borrow().clone();
                    let expanded = match cached {
                        Some(e) => e,
                        None => {
                            let e = expand_argument(pp, &arg.raw)?;
                            *arg.expanded.borrow_mut() = Some(e.clone());
                            e
                        }
                    };
                    out.extend(expanded);
                }
                i += 1;
                continue;
            }
        }

        out.push(t.clone());
        i += 1;
    }

    paste_pass(out)
}

fn extract_paren_group(body: &[Token], open: usize) -> (Vec<Token>, usize) {
    let mut depth = 0i32;
    let mut inner = Vec::new();
    let mut i = open;
    loop {
        let t = &body[i];
        if t.is("(") {
            depth += 1;
            if depth > 1 {
                inner.push(t.clone());
            }
        } else if t.is(")") {
            depth -= 1;
            if depth == 0 {
                return (inner, i);
            }
            inner.push(t.clone());
        } else {
            inner.push(t.clone());
        }
        i += 1;
    }
}

fn stringize(raw: &[Token], at: &Token) -> Token {
    let mut s = String::new();
    for (idx, t) in raw.iter().enumerate() {
        if idx > 0 && t.has_space() {
            s.push(' ');
        }
        if matches!(t.kind, TokenKind::Str(_)) {
            s.push_str(&t.text.replace('\\', "\\\\").replace('"', "\\\""));
        } else {
            s.push_str(&t.text);
        }
    }
    let bytes = s.into_bytes();
    Token::new(
        TokenKind::Str(crate::token::StrLiteral { bytes, wide: crate::token::WideKind::Narrow }),
        at.text.clone(),
        at.file,
        at.line,
    )
}

fn paste_marker(at: &Token) -> Token {
    let mut t = Token::new(TokenKind::PasteMarker, "", at.file, at.line);
    t.flags.insert(TokenFlags::PASTE_MARKER);
    t
}

/// Resolve every `##` operator left to right: concatenate the surrounding
/// tokens' text and re-tokenize; a paste must yield exactly one token (spec
/// §4.1/§7). Paste markers left over from empty-argument pastes are dropped.
fn paste_pass(tokens: Vec<Token>) -> Result<Vec<Token>, PpError> {
    let mut out: Vec<Token> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].is("##") {
            let lhs = out.pop();
            let rhs = tokens.get(i + 1).cloned();
            match (lhs, rhs) {
                (Some(l), Some(r)) if matches!(r.flags.contains(TokenFlags::PASTE_MARKER), true) => {
                    out.push(l);
                    i += 2;
                }
                (Some(l), Some(r)) if l.flags.contains(TokenFlags::PASTE_MARKER) => {
                    out.push(r);
                    i += 2;
                }
                (Some(l), Some(r)) => {
                    let pasted_text = format!("{}{}", l.text, r.text);
                    if let Some(tok) = retokenize_one(&pasted_text, &l) {
                        out.push(tok);
                    } else {
                        return Err(PpError {
                            message: format!(
                                "pasting \"{}\" and \"{}\" does not give a valid preprocessing token",
                                l.text, r.text
                            ),
                            file: l.file,
                            line: l.line,
                        });
                    }
                    i += 2;
                }
                (l, _) => {
                    if let Some(l) = l {
                        out.push(l);
                    }
                    i += 1;
                }
            }
            continue;
        }
        if tokens[i].flags.contains(TokenFlags::PASTE_MARKER) && !surrounded_by_hash_hash(&tokens, i) {
            i += 1;
            continue;
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    Ok(out)
}

fn surrounded_by_hash_hash(tokens: &[Token], i: usize) -> bool {
    tokens.get(i.wrapping_sub(1)).is_some_and(|t| t.is("##"))
        || tokens.get(i + 1).is_some_and(|t| t.is("##"))
}

/// Re-lex a pasted token's text. A real lexer is out of scope (spec §1);
/// this recognizes the shapes `##` pasting actually produces in practice
/// (identifiers, numbers, and a short list of multi-char punctuators) and
/// rejects anything that would require splitting into more than one token.
fn retokenize_one(text: &str, like: &Token) -> Option<Token> {
    if text.is_empty() {
        return None;
    }
    let is_ident_char = |c: char| c.is_alphanumeric() || c == '_';
    if text.chars().all(is_ident_char) {
        let first = text.chars().next().unwrap();
        if first.is_ascii_digit() {
            return Some(Token::new(
                TokenKind::Num(crate::token::NumLiteral {
                    text: text.into(),
                    int_value: text.parse().unwrap_or(0),
                    float_value: 0.0,
                    is_float: false,
                    kind: crate::token::NumKind::Int,
                }),
                text,
                like.file,
                like.line,
            ));
        }
        return Some(Token::new(TokenKind::Ident, text, like.file, like.line));
    }
    const MULTI_PUNCT: &[&str] = &[
        "==", "!=", "<=", ">=", "&&", "||", "++", "--", "->", "<<", ">>", "+=", "-=", "*=", "/=",
        "%=", "&=", "|=", "^=", "::",
    ];
    if MULTI_PUNCT.contains(&text) {
        return Some(Token::new(TokenKind::Punct, text, like.file, like.line));
    }
    None
}

fn expand_builtin(pp: &mut Preprocessor, b: BuiltinMacro, at: &Token) -> Vec<Token> {
    let text = match b {
        BuiltinMacro::File => format!("\"{}\"", pp.files.name(at.display_file)),
        BuiltinMacro::Line => at.display_line.to_string(),
        BuiltinMacro::Counter => {
            let v = pp.counter;
            pp.counter += 1;
            v.to_string()
        }
        BuiltinMacro::Date => "\"??? ?? ????\"".to_string(),
        BuiltinMacro::Time => "\"??:??:??\"".to_string(),
        BuiltinMacro::Timestamp => "\"??? ??? ?? ??:??:?? ????\"".to_string(),
        BuiltinMacro::BaseFile => format!("\"{}\"", pp.base_file),
        BuiltinMacro::StdcVersion => "201710L".to_string(),
    };
    match b {
        BuiltinMacro::Line | BuiltinMacro::Counter => vec![Token::new(
            TokenKind::Num(crate::token::NumLiteral {
                text: text.clone().into(),
                int_value: text.parse().unwrap_or(0),
                float_value: 0.0,
                is_float: false,
                kind: crate::token::NumKind::Int,
            }),
            text,
            at.file,
            at.line,
        )],
        BuiltinMacro::StdcVersion => vec![Token::new(
            TokenKind::Num(crate::token::NumLiteral {
                text: text.clone().into(),
                int_value: 201710,
                float_value: 0.0,
                is_float: false,
                kind: crate::token::NumKind::Long,
            }),
            text,
            at.file,
            at.line,
        )],
        _ => vec![Token::new(
            TokenKind::Str(crate::token::StrLiteral {
                bytes: text.trim_matches('"').as_bytes().to_vec(),
                wide: crate::token::WideKind::Narrow,
            }),
            text,
            at.file,
            at.line,
        )],
    }
}

/// Adjacent string-literal concatenation (spec §4.1's post-pass). A narrow
/// literal next to a wide one takes the wide literal's kind; two literals
/// with distinct, non-narrow wide kinds (e.g. `L"a" u"b"`) is an error per
/// spec §4.1, not a silent pick of one side.
pub fn adjacent_string_concat(tokens: Vec<Token>) -> Result<Vec<Token>, PpError> {
    use crate::token::WideKind;
    let mut out: Vec<Token> = Vec::new();
    for t in tokens {
        if let (TokenKind::Str(s), Some(prev)) = (&t.kind, out.last_mut()) {
            if let TokenKind::Str(prev_s) = &mut prev.kind {
                let wide = match (prev_s.wide, s.wide) {
                    (a, WideKind::Narrow) => a,
                    (WideKind::Narrow, b) => b,
                    (a, b) if a == b => a,
                    (a, b) => {
                        return Err(PpError {
                            message: format!("cannot concatenate string literals of incompatible kinds {a:?} and {b:?}"),
                            file: t.file,
                            line: t.line,
                        });
                    }
                };
                prev_s.bytes.extend_from_slice(&s.bytes);
                prev_s.wide = wide;
                continue;
            }
        }
        out.push(t);
    }
    Ok(out)
}

#[cfg(test)]
pub fn tokenize_for_test(src: &str, file: FileId) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut at_bol = true;
    for (line_no, line) in src.lines().enumerate() {
        for word in line.split_whitespace() {
            let kind = if word.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                TokenKind::Num(crate::token::NumLiteral {
                    text: word.into(),
                    int_value: word.parse().unwrap_or(0),
                    float_value: 0.0,
                    is_float: false,
                    kind: crate::token::NumKind::Int,
                })
            } else if word.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_') {
                TokenKind::Ident
            } else {
                TokenKind::Punct
            };
            let mut t = Token::new(kind, word, file, line_no as u32);
            t.flags.set(TokenFlags::AT_BOL, at_bol);
            at_bol = false;
            tokens.push(t);
        }
    }
    tokens.push(Token::eof(file, src.lines().count() as u32));
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessor::macro_table::Macro;

    fn ident(text: &str, file: FileId) -> Token {
        Token::new(TokenKind::Ident, text, file, 0)
    }

    #[test]
    fn object_like_macro_expands_in_place() {
        let mut pp = Preprocessor::new("t.c");
        let fid = pp.files.intern("t.c");
        pp.macros.define(Macro {
            name: "FOO".into(),
            body: MacroBody::Object(vec![
                Token::new(TokenKind::Num(crate::token::NumLiteral {
                    text: "42".into(),
                    int_value: 42,
                    float_value: 0.0,
                    is_float: false,
                    kind: crate::token::NumKind::Int,
                }), "42", fid, 0),
            ]),
        });
        let tokens = vec![ident("FOO", fid), Token::eof(fid, 0)];
        let out = expand_all(&mut pp, tokens).unwrap();
        assert_eq!(out[0].text.as_ref(), "42");
    }

    #[test]
    fn self_referential_object_macro_does_not_loop() {
        let mut pp = Preprocessor::new("t.c");
        let fid = pp.files.intern("t.c");
        // #define FOO FOO + 1
        pp.macros.define(Macro {
            name: "FOO".into(),
            body: MacroBody::Object(vec![
                ident("FOO", fid),
                Token::new(TokenKind::Punct, "+", fid, 0),
                Token::new(TokenKind::Num(crate::token::NumLiteral {
                    text: "1".into(), int_value: 1, float_value: 0.0, is_float: false,
                    kind: crate::token::NumKind::Int,
                }), "1", fid, 0),
            ]),
        });
        let tokens = vec![ident("FOO", fid), Token::eof(fid, 0)];
        let out = expand_all(&mut pp, tokens).unwrap();
        // FOO -> FOO + 1, inner FOO locked -> stays FOO
        let texts: Vec<_> = out.iter().map(|t| t.text.to_string()).collect();
        assert_eq!(texts, vec!["FOO", "+", "1", ""]);
    }

    #[test]
    fn function_macro_substitutes_args() {
        let mut pp = Preprocessor::new("t.c");
        let fid = pp.files.intern("t.c");
        // #define F(x) x+x
        pp.macros.define(Macro {
            name: "F".into(),
            body: MacroBody::Function {
                params: vec!["x".into()],
                variadic_name: None,
                body: vec![
                    ident("x", fid),
                    Token::new(TokenKind::Punct, "+", fid, 0),
                    ident("x", fid),
                ],
            },
        });
        let tokens = vec![
            ident("F", fid),
            Token::new(TokenKind::Punct, "(", fid, 0),
            Token::new(TokenKind::Num(crate::token::NumLiteral {
                text: "3".into(), int_value: 3, float_value: 0.0, is_float: false,
                kind: crate::token::NumKind::Int,
            }), "3", fid, 0),
            Token::new(TokenKind::Punct, ")", fid, 0),
            Token::eof(fid, 0),
        ];
        let out = expand_all(&mut pp, tokens).unwrap();
        let texts: Vec<_> = out.iter().map(|t| t.text.to_string()).collect();
        assert_eq!(texts, vec!["3", "+", "3", ""]);
    }

    #[test]
    fn stringize_preserves_text() {
        let mut pp = Preprocessor::new("t.c");
        let fid = pp.files.intern("t.c");
        // #define STR(x) #x
        pp.macros.define(Macro {
            name: "STR".into(),
            body: MacroBody::Function {
                params: vec!["x".into()],
                variadic_name: None,
                body: vec![Token::new(TokenKind::Punct, "#", fid, 0), ident("x", fid)],
            },
        });
        let mut hello = ident("hello", fid);
        let mut world = ident("world", fid);
        world.flags.insert(TokenFlags::HAS_SPACE);
        hello.flags.remove(TokenFlags::HAS_SPACE);
        let tokens = vec![
            ident("STR", fid),
            Token::new(TokenKind::Punct, "(", fid, 0),
            hello,
            world,
            Token::new(TokenKind::Punct, ")", fid, 0),
            Token::eof(fid, 0),
        ];
        let out = expand_all(&mut pp, tokens).unwrap();
        match &out[0].kind {
            TokenKind::Str(s) => assert_eq!(String::from_utf8_lossy(&s.bytes), "hello world"),
            other => panic!("expected string literal, got {:?}", other),
        }
    }

    #[test]
    fn paste_concatenates_tokens() {
        let mut pp = Preprocessor::new("t.c");
        let fid = pp.files.intern("t.c");
        // #define CAT(a,b) a ## b
        pp.macros.define(Macro {
            name: "CAT".into(),
            body: MacroBody::Function {
                params: vec!["a".into(), "b".into()],
                variadic_name: None,
                body: vec![ident("a", fid), Token::new(TokenKind::Punct, "##", fid, 0), ident("b", fid)],
            },
        });
        let tokens = vec![
            ident("CAT", fid),
            Token::new(TokenKind::Punct, "(", fid, 0),
            ident("foo", fid),
            Token::new(TokenKind::Punct, ",", fid, 0),
            ident("bar", fid),
            Token::new(TokenKind::Punct, ")", fid, 0),
            Token::eof(fid, 0),
        ];
        let out = expand_all(&mut pp, tokens).unwrap();
        assert_eq!(out[0].text.as_ref(), "foobar");
    }

    #[test]
    fn argument_used_twice_expands_only_once() {
        // #define F(x) x x
        // F(__COUNTER__) must substitute the *same* counter value at both
        // occurrences: the argument is expanded once and the result reused,
        // not independently re-expanded per splice site.
        let mut pp = Preprocessor::new("t.c");
        let fid = pp.files.intern("t.c");
        pp.macros.define(Macro {
            name: "F".into(),
            body: MacroBody::Function {
                params: vec!["x".into()],
                variadic_name: None,
                body: vec![ident("x", fid), ident("x", fid)],
            },
        });
        let tokens = vec![
            ident("F", fid),
            Token::new(TokenKind::Punct, "(", fid, 0),
            ident("__COUNTER__", fid),
            Token::new(TokenKind::Punct, ")", fid, 0),
            Token::eof(fid, 0),
        ];
        let out = expand_all(&mut pp, tokens).unwrap();
        let texts: Vec<_> = out.iter().map(|t| t.text.to_string()).filter(|t| !t.is_empty()).collect();
        assert_eq!(texts, vec!["0", "0"]);
    }

    #[test]
    fn nested_macro_in_argument_is_expanded() {
        // #define INNER 5
        // #define F(x) x+x
        // F(INNER) -> 5+5, not INNER+INNER.
        let mut pp = Preprocessor::new("t.c");
        let fid = pp.files.intern("t.c");
        pp.macros.define(Macro {
            name: "INNER".into(),
            body: MacroBody::Object(vec![Token::new(
                TokenKind::Num(crate::token::NumLiteral {
                    text: "5".into(), int_value: 5, float_value: 0.0, is_float: false,
                    kind: crate::token::NumKind::Int,
                }),
                "5", fid, 0,
            )]),
        });
        pp.macros.define(Macro {
            name: "F".into(),
            body: MacroBody::Function {
                params: vec!["x".into()],
                variadic_name: None,
                body: vec![ident("x", fid), Token::new(TokenKind::Punct, "+", fid, 0), ident("x", fid)],
            },
        });
        let tokens = vec![
            ident("F", fid),
            Token::new(TokenKind::Punct, "(", fid, 0),
            ident("INNER", fid),
            Token::new(TokenKind::Punct, ")", fid, 0),
            Token::eof(fid, 0),
        ];
        let out = expand_all(&mut pp, tokens).unwrap();
        let texts: Vec<_> = out.iter().map(|t| t.text.to_string()).filter(|t| !t.is_empty()).collect();
        assert_eq!(texts, vec!["5", "+", "5"]);
    }

    fn str_tok(bytes: &[u8], wide: crate::token::WideKind, file: FileId) -> Token {
        Token::new(TokenKind::Str(crate::token::StrLiteral { bytes: bytes.to_vec(), wide }), "", file, 0)
    }

    #[test]
    fn narrow_and_wide_adjacent_strings_take_the_wide_kind() {
        let fid = FileId(0);
        let tokens = vec![
            str_tok(b"a", crate::token::WideKind::Narrow, fid),
            str_tok(b"b", crate::token::WideKind::Utf16, fid),
            Token::eof(fid, 0),
        ];
        let out = adjacent_string_concat(tokens).unwrap();
        match &out[0].kind {
            TokenKind::Str(s) => {
                assert_eq!(s.wide, crate::token::WideKind::Utf16);
                assert_eq!(s.bytes, b"ab");
            }
            other => panic!("expected string literal, got {other:?}"),
        }
    }

    #[test]
    fn incompatible_wide_kinds_are_a_preprocessor_error() {
        let fid = FileId(0);
        let tokens = vec![
            str_tok(b"a", crate::token::WideKind::Wchar, fid),
            str_tok(b"b", crate::token::WideKind::Utf32, fid),
            Token::eof(fid, 0),
        ];
        assert!(adjacent_string_concat(tokens).is_err());
    }
}
