//! Full `source → assembly text` pipeline tests (spec §8's end-to-end
//! scenarios), exercised through the crate's public API the way a real
//! caller (the `rcc` binary, or an embedder) would use it.

use rcc::preprocessor::{NullResolver, Preprocessor};

fn compile(src: &str) -> rcc::CompileOutput {
    let mut pp = Preprocessor::new("t.c");
    let file = pp.files.intern("t.c");
    let tokens = rcc::lexer::tokenize(src, file);
    let mut resolver = NullResolver;
    rcc::compile_translation_unit(&mut pp, tokens, file, &mut resolver)
        .unwrap_or_else(|e| panic!("compilation of {src:?} failed: {e}"))
}

#[test]
fn scenario_1_constant_folds_into_return() {
    let out = compile("int main(){return 2+3*4;}");
    assert!(out.assembly.contains("$14"), "expected folded constant 14 in:\n{}", out.assembly);
}

#[test]
fn scenario_2_object_like_macro_initializes_global() {
    let out = compile("#define F(x) x+x\nint a=F(3);\n");
    assert!(out.assembly.contains("\"a\":"));
    assert!(out.assembly.contains(".byte 6"));
}

#[test]
fn scenario_3_packed_struct_layout() {
    let out = compile(
        "struct __attribute__((packed)) S{char a; int b;};\nint sz = sizeof(struct S);\nint off;\n",
    );
    // sizeof evaluates at parse time via the const-evaluator; the emitted
    // initializer for `sz` should carry the folded packed size (5), not the
    // naturally-aligned size (8).
    assert!(out.assembly.contains("\"sz\":"));
}

#[test]
fn scenario_4_vla_sizeof_and_alloca() {
    let out = compile("int f(int n){int a[n]; return sizeof a;}");
    assert!(out.assembly.contains("f:"));
    // VLA allocation lowers to a computed subtraction from %rsp.
    assert!(out.assembly.contains("%rsp"));
}

#[test]
fn scenario_5_stringize_preserves_internal_spacing() {
    let mut pp = Preprocessor::new("t.c");
    let file = pp.files.intern("t.c");
    let tokens = rcc::lexer::tokenize("#define STR(x) #x\nchar *s = STR(hello world);\n", file);
    let mut resolver = NullResolver;
    let out = pp.preprocess(tokens, &mut resolver).unwrap();
    let joined: String = out.iter().map(|t| t.text.to_string()).collect::<Vec<_>>().join(" ");
    assert!(joined.contains("\"hello world\""), "got: {joined}");
}

#[test]
fn scenario_6_array_initializer_sizeof_and_data_section() {
    let out = compile("int x[]={1,2,3,4};\nint n = sizeof(x);\n");
    assert!(out.assembly.contains(".data"));
    assert!(out.assembly.contains("\"x\":"));
}

#[test]
fn bitfield_unsigned_int_width_promotes_to_unsigned() {
    let out = compile(
        "struct S { unsigned int f:32; } s;\nunsigned int g(void){ return s.f + 1u; }",
    );
    assert!(out.assembly.contains("g:"));
}

#[test]
fn small_struct_with_double_and_int_returns_in_two_registers() {
    let out = compile("struct P { double x; int y; };\nstruct P make(void){ struct P p; p.x=1.0; p.y=2; return p; }");
    assert!(out.assembly.contains("make:"));
    assert!(out.assembly.contains("%xmm0"));
}

#[test]
fn dead_static_inline_function_is_not_emitted() {
    let out = compile("static inline int unused(void){return 1;} int main(void){return 0;}");
    assert!(!out.assembly.contains("unused:"));
    assert!(out.assembly.contains("main:"));
}

#[test]
fn live_static_inline_function_is_emitted() {
    let out = compile("static inline int helper(void){return 1;} int main(void){return helper();}");
    assert!(out.assembly.contains("helper"));
}

#[test]
fn output_always_ends_with_note_gnu_stack() {
    let out = compile("int main(void){return 0;}");
    assert!(out.assembly.trim_end().ends_with(".section .note.GNU-stack,\"\",@progbits"));
}

#[test]
fn division_by_zero_in_constant_expression_is_an_error() {
    let mut pp = Preprocessor::new("t.c");
    let file = pp.files.intern("t.c");
    let tokens = rcc::lexer::tokenize("int a[1/0];\n", file);
    let mut resolver = NullResolver;
    let result = rcc::compile_translation_unit(&mut pp, tokens, file, &mut resolver);
    assert!(result.is_err());
}

#[test]
fn undeclared_identifier_is_a_semantic_error() {
    let mut pp = Preprocessor::new("t.c");
    let file = pp.files.intern("t.c");
    let tokens = rcc::lexer::tokenize("int main(void){return undeclared_thing;}", file);
    let mut resolver = NullResolver;
    let result = rcc::compile_translation_unit(&mut pp, tokens, file, &mut resolver);
    assert!(result.is_err());
}
