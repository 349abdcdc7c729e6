//! Parser diagnostics: every failure mode reports a stable message and
//! the parser stops at the first fatal error.

use viper_il::parser::parse;

fn parse_err(src: &str) -> String {
    parse(src).expect_err("parse should fail").to_string()
}

#[test]
fn missing_version_directive() {
    let msg = parse_err("target \"x86_64-unknown-unknown\"\n");
    assert!(msg.contains("missing 'il' version directive"), "{}", msg);

    let msg = parse_err("\n\n");
    assert!(msg.contains("missing 'il' version directive"), "{}", msg);
}

#[test]
fn missing_version_token() {
    let msg = parse_err("il\ntarget \"x86_64-unknown-unknown\"\n");
    assert!(msg.contains("missing version after 'il' directive"), "{}", msg);
}

#[test]
fn bom_and_leading_whitespace_accepted() {
    let module = parse("\u{feff}il 0.2.0\nfunc @main() -> i64 {\nentry:\n  ret 0\n}\n").unwrap();
    assert_eq!(module.functions.len(), 1);
    assert_eq!(module.functions[0].blocks.len(), 1);

    let module = parse("    il 0.2.0\nfunc @main() -> i64 {\nentry:\n  ret 0\n}\n").unwrap();
    assert_eq!(module.functions.len(), 1);
}

#[test]
fn comment_headers_before_version() {
    let src = "// header line 1\n// header line 2\nil 0.2.0\nfunc @main() -> i64 {\nentry:\n  ret 0\n}\n";
    let module = parse(src).unwrap();
    assert_eq!(module.functions.len(), 1);

    let src = "# hash comment\nil 0.2.0\nfunc @main() -> i64 {\nentry:\n  ret 0\n}\n";
    assert!(parse(src).is_ok());
}

#[test]
fn keyword_boundary_func() {
    let msg = parse_err("il 0.1.2\nfunction @main() -> void {\nentry:\n  ret\n}\n");
    assert!(msg.contains("unexpected line: function"), "{}", msg);
}

#[test]
fn keyword_boundary_labels() {
    // Labels that merely start with a keyword are plain labels.
    let src = "il 0.1.2\nfunc @main() -> void {\nentry:\n  br extern_label\nextern_label:\n  ret\n}\n";
    let module = parse(src).unwrap();
    let fn_ = &module.functions[0];
    assert_eq!(fn_.blocks.len(), 2);
    assert_eq!(fn_.blocks[1].label, "extern_label");

    let src = "il 0.2.0\nglobal str @greeting = \"hello\"\nfunc @main() -> void {\nglobal_loop:\n  ret\n}\n";
    let module = parse(src).unwrap();
    assert_eq!(module.globals[0].name, "greeting");
    assert_eq!(module.functions[0].blocks[0].label, "global_loop");
}

#[test]
fn missing_eq_after_result() {
    let msg = parse_err("il 0.2.0\nfunc @main() -> i64 {\nentry:\n  %0 iadd.ovf 1, 2\n}\n");
    assert!(msg.contains("missing '='"), "{}", msg);
}

#[test]
fn first_error_wins() {
    // Both lines are malformed; only the first is reported.
    let err = parse("il 0.1.2\nfunc @main() -> i64 {\nentry:\n  %0 iadd.ovf 1, 2\n  foo %1\n}\n")
        .expect_err("parse should fail");
    assert!(err.message.contains("missing '='"), "{}", err.message);
    assert!(!err.message.contains("unknown opcode"), "{}", err.message);
}

#[test]
fn unknown_temp() {
    let msg = parse_err("il 0.1.2\nfunc @main() -> i64 {\nentry:\n  %t0 = iadd.ovf %undef, 1\n  ret 0\n}\n");
    assert!(msg.contains("unknown temp '%undef'"), "{}", msg);
}

#[test]
fn extern_missing_arrow() {
    let msg = parse_err("il 0.1.2\nextern @foo(i64)\nfunc @main() -> i64 {\nentry:\n  ret 0\n}\n");
    assert!(msg.contains("missing '->'"), "{}", msg);
}

#[test]
fn call_trailing_junk() {
    let msg = parse_err(
        "il 0.1.2\nextern @foo() -> void\nfunc @main() -> void {\nentry:\n  %x = call @foo() junk\n  ret\n}\n",
    );
    assert!(msg.contains("malformed call"), "{}", msg);
}

#[test]
fn missing_operand_between_commas() {
    let err = parse(
        "il 0.1.2\nextern @print(str) -> void\nfunc @main() -> void {\nentry:\n  call @print(\"hello\", )\n  ret\n}\n",
    )
    .expect_err("parse should fail");
    let msg = err.to_string();
    assert!(msg.contains("line 5"), "{}", msg);
    assert!(msg.contains("malformed call"), "{}", msg);
}

#[test]
fn missing_operand_in_branch_args() {
    let err = parse(
        "il 0.1.2\nfunc @main() -> void {\nentry:\n  br ^dest(1, )\ndest(%value:i32):\n  ret\n}\n",
    )
    .expect_err("parse should fail");
    let msg = err.to_string();
    assert!(msg.contains("line 4"), "{}", msg);
    assert!(msg.contains("malformed br"), "{}", msg);
}

#[test]
fn branch_missing_label() {
    let msg = parse_err("il 0.2.0\nfunc @main() -> void {\nentry:\n  br label ^(\"arg\")\n}\n");
    assert!(msg.contains("malformed branch target"), "{}", msg);
    assert!(msg.contains("missing label"), "{}", msg);
}

#[test]
fn function_name_trailing_spaces_trimmed() {
    let src = "il 0.1.2\nfunc @caller() -> void {\nentry:\n  call @callee()\n  ret\n}\n\nfunc @callee   () -> void {\nentry:\n  ret\n}\n";
    let module = parse(src).unwrap();
    assert_eq!(module.functions[1].name, "callee");
    viper_il::verify::verify(&module).unwrap();
}

#[test]
fn global_missing_at() {
    let msg = parse_err("il 0.2.0\nglobal greeting = \"hi\"\n");
    assert!(msg.contains("missing '@'"), "{}", msg);
}

#[test]
fn global_missing_name() {
    let msg = parse_err("il 0.1.2\nfunc @main() -> void {\nentry:\n  %addr = addr_of @\n  ret\n}\n");
    assert!(msg.contains("missing global name"), "{}", msg);
}

#[test]
fn global_missing_type() {
    let msg = parse_err("il 0.1.2\nglobal @g = \"lit\"\n");
    assert!(msg.contains("missing global type"), "{}", msg);
}

#[test]
fn global_unsupported_type() {
    let msg = parse_err("il 0.1.2\nglobal const void @g = 0\n");
    assert!(msg.contains("unsupported global type 'void'"), "{}", msg);
}

#[test]
fn global_missing_const_qualifier() {
    let msg = parse_err("il 0.1.2\nglobal mutable str @message = \"nope\"\n");
    assert!(msg.contains("missing 'const'"), "{}", msg);
}

#[test]
fn global_missing_quotes() {
    let msg = parse_err("il 0.2.0\nglobal const str @greeting = hello\n");
    assert!(
        msg.contains("missing opening '\"'") || msg.contains("missing closing '\"'"),
        "{}",
        msg
    );
}

#[test]
fn global_trailing_characters() {
    let msg = parse_err("il 0.1.2\nglobal const str @greeting = \"hello\" junk\n");
    assert!(msg.contains("unexpected characters after closing '\"'"), "{}", msg);
}

#[test]
fn unknown_escape() {
    let msg = parse_err("il 0.1.2\nglobal const str @bad = \"\\q\"\n");
    assert!(msg.contains("unknown escape"), "{}", msg);
}

#[test]
fn global_initializers() {
    let src = r#"il 0.1.2
global i64 @counter = 42
global const f64 @ratio = 3.5
global const str @message = "ok"
global ptr @message_ptr = @message
global ptr @nil = null
func @main() -> void {
entry:
  ret
}
"#;
    let module = parse(src).unwrap();
    assert_eq!(module.globals.len(), 5);

    let counter = module.find_global("counter").unwrap();
    assert_eq!(counter.ty, viper_il::Type::I64);
    assert!(!counter.is_const);
    assert_eq!(counter.init, viper_il::Value::const_int(42));

    let ratio = module.find_global("ratio").unwrap();
    assert!(ratio.is_const);
    assert_eq!(ratio.init, viper_il::Value::const_float(3.5));

    let message = module.find_global("message").unwrap();
    assert_eq!(message.init, viper_il::Value::const_str("ok"));

    let ptr = module.find_global("message_ptr").unwrap();
    assert_eq!(ptr.init, viper_il::Value::global_addr("message"));

    let nil = module.find_global("nil").unwrap();
    assert_eq!(nil.init, viper_il::Value::NullPtr);
}

#[test]
fn float_specials() {
    let src = r#"il 0.1.2
extern @rt_print_f64(f64) -> void
func @main() -> void {
entry:
  call @rt_print_f64(NaN)
  call @rt_print_f64(Inf)
  call @rt_print_f64(+Inf)
  call @rt_print_f64(-Inf)
  ret
}
"#;
    let module = parse(src).unwrap();
    let instrs = &module.functions[0].blocks[0].instructions;
    let float_arg = |i: usize| match &instrs[i].operands[0] {
        viper_il::Value::ConstFloat(f) => *f,
        other => panic!("expected float, got {:?}", other),
    };
    assert!(float_arg(0).is_nan());
    assert_eq!(float_arg(1), f64::INFINITY);
    assert_eq!(float_arg(2), f64::INFINITY);
    assert_eq!(float_arg(3), f64::NEG_INFINITY);
}

#[test]
fn string_escapes_decode() {
    let src = r#"il 0.1.2
global const str @nl = "\n"
global const str @tab = "tab:\t"
global const str @quote = "quote:\""
global const str @mix = "slashes\\ and hex\x21"
"#;
    let module = parse(src).unwrap();
    assert_eq!(module.find_global("nl").unwrap().init, viper_il::Value::const_str("\n"));
    assert_eq!(module.find_global("tab").unwrap().init, viper_il::Value::const_str("tab:\t"));
    assert_eq!(module.find_global("quote").unwrap().init, viper_il::Value::const_str("quote:\""));
    assert_eq!(
        module.find_global("mix").unwrap().init,
        viper_il::Value::const_str("slashes\\ and hex!")
    );
}

#[test]
fn result_type_annotations() {
    let src = r#"il 0.1
func @main() -> i64 {
entry:
  %f:f32 = sitofp 7
  %g:f32 = fadd %f, 2.5
  %back = cast.fp_to_si.rte.chk %g
  ret %back
}
"#;
    let module = parse(src).unwrap();
    let instrs = &module.functions[0].blocks[0].instructions;
    assert_eq!(instrs[0].ty, viper_il::Type::F32);
    assert_eq!(instrs[1].ty, viper_il::Type::F32);
    assert_eq!(instrs[2].ty, viper_il::Type::I64);
}

#[test]
fn alias_mnemonics_normalise() {
    let src = "il 0.1\nfunc @main() -> i64 {\nentry:\n  %t = mul 10, 2\n  %r = add %t, 0\n  ret %r\n}\n";
    let module = parse(src).unwrap();
    let instrs = &module.functions[0].blocks[0].instructions;
    assert_eq!(instrs[0].op, viper_il::Opcode::IMul);
    assert_eq!(instrs[1].op, viper_il::Opcode::IAdd);
}
