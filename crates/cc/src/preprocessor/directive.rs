//! Directive dispatch: `#define`, `#undef`, `#include`/`#include_next`,
//! `#if`/`#ifdef`/`#ifndef`/`#elif`/`#else`/`#endif`, `#line`, `#pragma`,
//! `#error`/`#warning`, and the `_Pragma` operator rewrite (spec §4.1).

use super::cond::{resolve_defined, resolve_has_checks, resolve_has_include, CondStack};
use super::macro_table::{Macro, MacroBody};
use super::{IncludeResolver, PpError, Preprocessor};
use crate::token::{FileId, Token, TokenKind};

/// Run directive processing over a flat token list, recursively expanding
/// `#include` via `resolver`. Non-directive lines in active branches pass
/// through untouched (macro expansion happens afterward, in [`super::expand`]).
pub fn process(
    pp: &mut Preprocessor,
    tokens: Vec<Token>,
    resolver: &mut dyn IncludeResolver,
) -> Result<Vec<Token>, PpError> {
    let lines = split_lines(tokens);
    let mut out = Vec::new();
    let depth_before = pp.cond_stack.len();
    // `#line` state for this physical file only — a nested `#include` is a
    // separate `process()` call with its own locals, so this never leaks
    // across file boundaries (spec §4.1 "Line control").
    let mut line_delta: i64 = 0;
    let mut display_file: Option<FileId> = None;

    for line in lines {
        if line.first().is_some_and(Token::is_eof) {
            continue;
        }
        let is_directive = line.first().is_some_and(|t| t.is("#")) && line[0].at_bol();

        if !is_directive {
            if CondStack::new(&mut pp.cond_stack).currently_active() {
                out.extend(line.into_iter().map(|mut t| {
                    t.display_file = display_file.unwrap_or(t.file);
                    t.display_line = (t.line as i64 + line_delta) as u32;
                    t
                }));
            }
            continue;
        }

        let Some(name_tok) = line.get(1) else { continue };
        let directive = name_tok.text.to_string();
        let rest = &line[2.min(line.len())..];
        let file = line[0].file;
        let ln = line[0].line;

        match directive.as_str() {
            "if" => {
                let cond = if CondStack::new(&mut pp.cond_stack).currently_active() {
                    eval_condition(pp, rest, resolver, file, ln)?
                } else {
                    false
                };
                CondStack::new(&mut pp.cond_stack).push_if(cond, file, ln);
            }
            "ifdef" => {
                let active = CondStack::new(&mut pp.cond_stack).currently_active();
                let cond = active && rest.first().is_some_and(|t| pp.macros.is_defined(&t.text));
                CondStack::new(&mut pp.cond_stack).push_if(cond, file, ln);
            }
            "ifndef" => {
                let active = CondStack::new(&mut pp.cond_stack).currently_active();
                let cond = active && !rest.first().is_some_and(|t| pp.macros.is_defined(&t.text));
                CondStack::new(&mut pp.cond_stack).push_if(cond, file, ln);
            }
            "elif" => {
                let parent_active = CondStack::new(&mut pp.cond_stack).depth() > 0;
                let _ = parent_active;
                let cond = eval_condition_if_needed(pp, rest, resolver, file, ln)?;
                CondStack::new(&mut pp.cond_stack).push_elif(cond, file, ln)?;
            }
            "else" => {
                CondStack::new(&mut pp.cond_stack).push_else(file, ln)?;
            }
            "endif" => {
                CondStack::new(&mut pp.cond_stack).pop_endif(file, ln)?;
            }
            _ if !CondStack::new(&mut pp.cond_stack).currently_active() => {
                // Any other directive inside a dead branch is skipped outright.
            }
            "define" => handle_define(pp, rest, file, ln)?,
            "undef" => {
                if let Some(t) = rest.first() {
                    pp.macros.undef(&t.text);
                }
            }
            "include" => handle_include(pp, rest, resolver, &mut out, file, ln, false)?,
            "include_next" => handle_include(pp, rest, resolver, &mut out, file, ln, true)?,
            "line" => handle_line(pp, rest, file, ln, &mut line_delta, &mut display_file)?,
            "pragma" => handle_pragma(pp, rest, file),
            "error" => {
                return Err(PpError { message: format!("#error {}", join_text(rest)), file, line: ln });
            }
            "warning" => {
                pp.warnings.push(format!("#warning {}", join_text(rest)));
            }
            _ => {
                pp.warnings.push(format!("unknown directive '#{directive}' ignored"));
            }
        }
    }

    if pp.cond_stack.len() != depth_before {
        return Err(PpError {
            message: "unterminated #if / missing #endif".into(),
            file: FileId(0),
            line: 0,
        });
    }
    Ok(out)
}

fn eval_condition_if_needed(
    pp: &mut Preprocessor,
    rest: &[Token],
    resolver: &mut dyn IncludeResolver,
    file: FileId,
    ln: u32,
) -> Result<bool, PpError> {
    let Some(top) = pp.cond_stack.last() else {
        return Err(PpError { message: "#elif without #if".into(), file, line: ln });
    };
    if top.taken {
        return Ok(false);
    }
    eval_condition(pp, rest, resolver, file, ln)
}

fn eval_condition(
    pp: &mut Preprocessor,
    rest: &[Token],
    resolver: &mut dyn IncludeResolver,
    file: FileId,
    ln: u32,
) -> Result<bool, PpError> {
    let with_includes_resolved = resolve_has_include(rest, resolver, file);
    let with_builtins_resolved = resolve_has_checks(&with_includes_resolved);
    let with_defined_resolved = resolve_defined(&with_builtins_resolved, &pp.macros);
    let expanded = super::expand::expand_all(pp, {
        let mut v = with_defined_resolved;
        v.push(Token::eof(file, ln));
        v
    })?;
    let expanded: Vec<Token> = expanded.into_iter().filter(|t| !t.is_eof()).collect();
    let v = crate::const_eval::tokens::eval(&expanded)
        .map_err(|e| PpError { message: e.to_string(), file, line: ln })?;
    Ok(v != 0)
}

fn handle_define(pp: &mut Preprocessor, rest: &[Token], file: FileId, ln: u32) -> Result<(), PpError> {
    let Some(name_tok) = rest.first() else {
        return Err(PpError { message: "macro name missing".into(), file, line: ln });
    };
    let name = name_tok.text.to_string();

    // Function-like iff `(` immediately follows the name with no space.
    if rest.get(1).is_some_and(|t| t.is("(") && !t.has_space()) {
        let mut i = 2;
        let mut params = Vec::new();
        let mut variadic_name = None;
        while i < rest.len() && !rest[i].is(")") {
            if rest[i].is("...") {
                variadic_name = Some("__VA_ARGS__".to_string());
                i += 1;
                break;
            }
            if rest[i].is_ident() {
                if rest.get(i + 1).is_some_and(|t| t.is("...")) {
                    variadic_name = Some(rest[i].text.to_string());
                    i += 2;
                    break;
                }
                params.push(rest[i].text.to_string());
            }
            i += 1;
        }
        // Skip to the matching close paren.
        while i < rest.len() && !rest[i].is(")") {
            i += 1;
        }
        let body = rest.get(i + 1..).unwrap_or(&[]).to_vec();
        pp.macros.define(Macro {
            name,
            body: MacroBody::Function { params, variadic_name, body },
        });
    } else {
        let body = rest.get(1..).unwrap_or(&[]).to_vec();
        pp.macros.define(Macro { name, body: MacroBody::Object(body) });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn handle_include(
    pp: &mut Preprocessor,
    rest: &[Token],
    resolver: &mut dyn IncludeResolver,
    out: &mut Vec<Token>,
    file: FileId,
    ln: u32,
    is_next: bool,
) -> Result<(), PpError> {
    let Some(first) = rest.first() else {
        return Err(PpError { message: "#include expects \"FILE\" or <FILE>".into(), file, line: ln });
    };

    let resolved = match &first.kind {
        TokenKind::Str(s) if !is_next => {
            let name = String::from_utf8_lossy(&s.bytes).into_owned();
            resolver.resolve_quoted(&name, file)
        }
        _ => {
            // `<...>` arrives as a run of punctuator/ident tokens between `<`
            // and `>` since it is not a string literal lexically.
            let name = reconstruct_angled(rest);
            if is_next {
                resolver.resolve_next(&name, file)
            } else {
                resolver.resolve_angled(&name)
            }
        }
    };

    let Some((included_file, contents)) = resolved else {
        return Err(PpError { message: "#include: file not found".into(), file, line: ln });
    };

    if pp.once_files.contains(&included_file) {
        return Ok(());
    }

    let included_tokens = crate::lexer::tokenize(&contents, included_file);
    let expanded_body = process(pp, included_tokens, resolver)?;
    out.extend(expanded_body);
    Ok(())
}

fn reconstruct_angled(rest: &[Token]) -> String {
    let mut s = String::new();
    for t in rest {
        if t.is(">") {
            break;
        }
        if t.is("<") {
            continue;
        }
        s.push_str(&t.text);
    }
    s
}

/// `#line N` / `#line N "file"` (spec §4.1 "Line control"): rewrites the
/// display file/line that subsequent tokens in this physical file report
/// through `__LINE__`/`__FILE__` and `.loc` markers
/// (`original_source/preprocess.c`'s `read_line_marker`), leaving the
/// physical positions used for the compiler's own diagnostics untouched.
fn handle_line(
    pp: &mut Preprocessor,
    rest: &[Token],
    file: FileId,
    ln: u32,
    line_delta: &mut i64,
    display_file: &mut Option<FileId>,
) -> Result<(), PpError> {
    let mut expanded = super::expand::expand_all(pp, {
        let mut v = rest.to_vec();
        v.push(Token::eof(file, ln));
        v
    })?;
    expanded.retain(|t| !t.is_eof());

    let Some(num_tok) = expanded.first() else {
        return Err(PpError { message: "#line requires a line number".into(), file, line: ln });
    };
    let TokenKind::Num(n) = &num_tok.kind else {
        return Err(PpError { message: "invalid line marker".into(), file, line: ln });
    };
    *line_delta = n.int_value - ln as i64 - 1;

    if let Some(name_tok) = expanded.get(1) {
        let TokenKind::Str(s) = &name_tok.kind else {
            return Err(PpError { message: "#line filename must be a string literal".into(), file, line: ln });
        };
        *display_file = Some(pp.files.intern(String::from_utf8_lossy(&s.bytes).into_owned()));
    }
    Ok(())
}

fn handle_pragma(pp: &mut Preprocessor, rest: &[Token], file: FileId) {
    if rest.first().is_some_and(|t| t.is("once")) {
        pp.once_files.insert(file);
        return;
    }
    if rest.first().is_some_and(|t| t.is("GCC")) {
        // GCC pragma family (diagnostic push/pop, optimize, ...) is accepted
        // and ignored, matching the stance the original takes.
        return;
    }
    // Any other #pragma is passed through as a warning-level note rather than
    // silently eaten, since some (e.g. pack) affect layout and a caller may
    // want to know one was skipped.
    pp.warnings.push(format!("#pragma {} ignored", join_text(rest)));
}

fn join_text(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_ref()).collect::<Vec<_>>().join(" ")
}

/// Split a token stream into physical lines, using `AT_BOL` as the boundary.
/// The trailing EOF token becomes its own one-token "line".
fn split_lines(tokens: Vec<Token>) -> Vec<Vec<Token>> {
    let mut lines: Vec<Vec<Token>> = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    for t in tokens {
        if t.is_eof() {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            lines.push(vec![t]);
            continue;
        }
        if t.at_bol() && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        current.push(t);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Rewrite a `_Pragma("...")` operator occurrence into the equivalent
/// `#pragma ...` directive line, per spec §4.1's supplemented feature. Called
/// by the expansion pass before directive reprocessing would otherwise be
/// needed, since `_Pragma` can appear mid-expansion rather than only at BOL.
pub fn rewrite_pragma_operator(tokens: &[Token]) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].is("_Pragma") && tokens.get(i + 1).is_some_and(|t| t.is("(")) {
            if let TokenKind::Str(s) = tokens.get(i + 2).map(|t| &t.kind).unwrap_or(&TokenKind::Eof) {
                let text = String::from_utf8_lossy(&s.bytes).replace("\\\"", "\"");
                let file = tokens[i].file;
                let line = tokens[i].line;
                out.push(Token::new(TokenKind::Punct, "#", file, line));
                out.push(Token::new(TokenKind::Ident, "pragma", file, line));
                for word in text.split_whitespace() {
                    out.push(Token::new(TokenKind::Ident, word, file, line));
                }
                i += 4; // _Pragma ( "..." )
                continue;
            }
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessor::{NullResolver, Preprocessor};

    #[test]
    fn define_and_use_object_macro() {
        let mut pp = Preprocessor::new("t.c");
        let fid = pp.files.intern("t.c");
        let src = "#define FOO 42\nint x = FOO;";
        let toks = crate::lexer::tokenize(src, fid);
        let mut resolver = NullResolver;
        let out = pp.preprocess(toks, &mut resolver).unwrap();
        let texts: Vec<_> = out.iter().map(|t| t.text.to_string()).collect();
        assert!(texts.contains(&"42".to_string()));
        assert!(!texts.contains(&"FOO".to_string()));
    }

    #[test]
    fn ifdef_skips_undefined_branch() {
        let mut pp = Preprocessor::new("t.c");
        let fid = pp.files.intern("t.c");
        let src = "#ifdef NOPE\nshould_not_appear\n#else\nshould_appear\n#endif\n";
        let toks = crate::lexer::tokenize(src, fid);
        let mut resolver = NullResolver;
        let out = pp.preprocess(toks, &mut resolver).unwrap();
        let texts: Vec<_> = out.iter().map(|t| t.text.to_string()).collect();
        assert!(texts.contains(&"should_appear".to_string()));
        assert!(!texts.contains(&"should_not_appear".to_string()));
    }

    #[test]
    fn if_expression_with_defined_operator() {
        let mut pp = Preprocessor::new("t.c");
        let fid = pp.files.intern("t.c");
        let src = "#define X 1\n#if defined(X) && X == 1\nyes\n#endif\n";
        let toks = crate::lexer::tokenize(src, fid);
        let mut resolver = NullResolver;
        let out = pp.preprocess(toks, &mut resolver).unwrap();
        let texts: Vec<_> = out.iter().map(|t| t.text.to_string()).collect();
        assert!(texts.contains(&"yes".to_string()));
    }

    #[test]
    fn error_directive_is_fatal() {
        let mut pp = Preprocessor::new("t.c");
        let fid = pp.files.intern("t.c");
        let toks = crate::lexer::tokenize("#error boom\n", fid);
        let mut resolver = NullResolver;
        assert!(pp.preprocess(toks, &mut resolver).is_err());
    }

    #[test]
    fn line_directive_shifts_subsequent_line_numbers() {
        let mut pp = Preprocessor::new("t.c");
        let fid = pp.files.intern("t.c");
        let src = "#line 100\nint x = __LINE__;\n";
        let toks = crate::lexer::tokenize(src, fid);
        let mut resolver = NullResolver;
        let out = pp.preprocess(toks, &mut resolver).unwrap();
        let texts: Vec<_> = out.iter().map(|t| t.text.to_string()).collect();
        assert!(texts.contains(&"100".to_string()));
    }

    #[test]
    fn line_directive_with_filename_rewrites_file_macro() {
        let mut pp = Preprocessor::new("t.c");
        let fid = pp.files.intern("t.c");
        let src = "#line 5 \"renamed.h\"\nchar *f = __FILE__;\n";
        let toks = crate::lexer::tokenize(src, fid);
        let mut resolver = NullResolver;
        let out = pp.preprocess(toks, &mut resolver).unwrap();
        let texts: Vec<_> = out.iter().map(|t| t.text.to_string()).collect();
        assert!(texts.iter().any(|t| t.contains("renamed.h")));
    }

    #[test]
    fn pragma_operator_rewrites_to_directive_tokens() {
        let fid = FileId(0);
        let toks = crate::lexer::tokenize("_Pragma(\"GCC diagnostic push\")", fid);
        let rewritten = rewrite_pragma_operator(&toks);
        let texts: Vec<_> = rewritten.iter().map(|t| t.text.to_string()).collect();
        assert_eq!(texts[0], "#");
        assert_eq!(texts[1], "pragma");
    }
}
