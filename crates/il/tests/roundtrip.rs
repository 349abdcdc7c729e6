//! Print/parse round-trip guarantees
//!
//! For every module the parser accepts, parsing the canonical printout
//! reconstructs an equal module, and printing again reproduces the text
//! byte for byte.

use viper_il::parser::parse;
use viper_il::printer::{print_canonical, print_pretty};

const FIXTURES: &[&str] = &[
    // Hello with a conditional
    r#"il 0.1.2
extern @rt_print_str(str) -> void
global const str @.L0 = "HELLO"
func @main() -> i64 {
entry:
  %s0 = const_str @.L0
  call @rt_print_str(%s0)
  %c = scmp.lt 1, 2
  cbr %c, yes, no
yes:
  ret 0
no:
  ret 1
}
"#,
    // Sum loop with block params
    r#"il 0.1.2
func @main() -> i64 {
entry:
  br loop(0, 0)
loop(%i: i64, %acc: i64):
  %done = scmp.ge %i, 10
  cbr %done, exit(%acc), body(%i, %acc)
body(%j: i64, %a: i64):
  %a2 = iadd.ovf %a, %j
  %j2 = iadd.ovf %j, 1
  br loop(%j2, %a2)
exit(%r: i64):
  ret %r
}
"#,
    // Checked arithmetic and casts
    r#"il 0.1
func @checked(%x: i64) -> i64 {
entry:
  %a = iadd.ovf %x, 1
  %b = sdiv.chk0 %a, 3
  %f = sitofp %b
  %g = fmul %f, 2.5
  %r = cast.fp_to_si.rte.chk %g
  %n:i16 = cast.si_narrow.chk %r
  %w = zext1 true
  ret %w
}
"#,
    // Memory traffic
    r#"il 0.2.0
func @mem() -> i64 {
entry:
  %slot = alloca 8
  store i64, %slot, 7
  %v = load i64, %slot
  %p = gep %slot, 0
  ret %v
}
"#,
    // Switch and trap
    r#"il 0.2.0
func @sw(%x: i32) -> i64 {
entry:
  switch.i32 %x, other(0), 1 -> one(1), 2 -> two(2)
one(%a: i64):
  ret %a
two(%b: i64):
  ret %b
other(%c: i64):
  trap
}
"#,
    // Target directive and qualified names
    r#"il 0.1.2
target "x86_64-unknown-linux-gnu"
func @a.b.f() -> i64 {
entry:
  %t0 = call.indirect @a.b.g
  ret %t0
}
func @a.b.g() -> i64 {
entry:
  ret 7
}
"#,
    // String escapes survive
    r#"il 0.1.2
global const str @nl = "\n"
global const str @mix = "slashes\\ and hex!"
func @with_literals() -> str {
entry:
  %literal = const_str "line\n\t\"quote\"\\path!"
  ret %literal
}
"#,
    // Floats including negative zero and specials as call args
    r#"il 0.1.2
extern @rt_print_f64(f64) -> void
global const f64 @zero = -0.0
func @main() -> void {
entry:
  call @rt_print_f64(NaN)
  call @rt_print_f64(Inf)
  call @rt_print_f64(-Inf)
  call @rt_print_f64(-0.0)
  ret
}
"#,
];

#[test]
fn canonical_roundtrip_is_identity() {
    for (index, src) in FIXTURES.iter().enumerate() {
        let m1 = parse(src).unwrap_or_else(|e| panic!("fixture {}: {}", index, e));
        let s1 = print_canonical(&m1);
        let m2 = parse(&s1).unwrap_or_else(|e| panic!("fixture {} reparse: {}\n{}", index, e, s1));
        assert_eq!(m1, m2, "fixture {} module changed across roundtrip", index);
        let s2 = print_canonical(&m2);
        assert_eq!(s1, s2, "fixture {} text not stable", index);
    }
}

#[test]
fn pretty_roundtrip_reaches_same_module() {
    for src in FIXTURES {
        let m1 = parse(src).unwrap();
        let m2 = parse(&print_pretty(&m1)).unwrap();
        assert_eq!(m1, m2);
    }
}

#[test]
fn newline_literal_prints_escaped() {
    let src = "il 0.1\nglobal const str @nl = \"\\n\"\nfunc @main() -> void {\nentry:\n  ret\n}\n";
    let module = parse(src).unwrap();
    let text = print_canonical(&module);
    assert!(text.contains("\"\\n\""), "{}", text);
    assert!(!text.contains("= \"\n\""), "raw newline leaked into literal");

    // Stable across a second cycle too.
    let again = print_canonical(&parse(&text).unwrap());
    assert_eq!(text, again);
}

#[test]
fn negative_zero_preserved() {
    let src = "il 0.1\nfunc @neg_zero() -> f64 {\nentry:\n  ret -0.0\n}\n";
    let module = parse(src).unwrap();
    let text = print_canonical(&module);
    assert!(text.contains("-0.0"), "{}", text);
}

#[test]
fn bool_constants_print_symbolically() {
    let src = "il 0.1\nfunc @main() -> i64 {\nentry:\n  %b = const_i1 true\n  %w = zext1 %b\n  cbr %b, yes, no\nyes:\n  ret %w\nno:\n  ret 0\n}\n";
    let module = parse(src).unwrap();
    let text = print_canonical(&module);
    assert!(text.contains("const_i1 true"), "{}", text);
    assert!(!text.contains("const_i1 1"), "{}", text);
}

#[test]
fn attribute_brackets_print_sorted() {
    let src = "il 0.1\nfunc @f() -> void [noinline, cold] {\nentry:\n  ret\n}\n";
    let module = parse(src).unwrap();
    let text = print_canonical(&module);
    assert!(text.contains("[cold, noinline]"), "{}", text);
    // Sorted form is a fixpoint.
    let again = print_canonical(&parse(&text).unwrap());
    assert_eq!(text, again);
}

#[test]
fn zero_arg_branch_shorthand() {
    // `br exit` and `br exit()` parse to the same module.
    let a = parse("il 0.1\nfunc @f() -> i64 {\nentry:\n  br exit\nexit:\n  ret 0\n}\n").unwrap();
    let b = parse("il 0.1\nfunc @f() -> i64 {\nentry:\n  br exit()\nexit:\n  ret 0\n}\n").unwrap();
    assert_eq!(a, b);
}

#[test]
fn caret_branch_targets_accepted() {
    let a = parse("il 0.1\nfunc @f() -> i64 {\nentry:\n  br ^exit(3)\nexit(%v: i64):\n  ret %v\n}\n")
        .unwrap();
    let text = print_canonical(&a);
    // Canonical form drops the caret.
    assert!(text.contains("br exit(3)"), "{}", text);
}

#[test]
fn randomised_modules_roundtrip() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use viper_il::opcode::Opcode;
    use viper_il::types::Type;
    use viper_il::value::Value;
    use viper_il::{IrBuilder, Module};

    let arith = [Opcode::IAddOvf, Opcode::ISubOvf, Opcode::IMulOvf, Opcode::SDivChk0];
    let cmps = [Opcode::ICmpEq, Opcode::ICmpNe, Opcode::SCmpLt, Opcode::SCmpGe];

    for seed in 0..16u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut module = Module::new();
        let mut b = IrBuilder::new(&mut module);
        let f = b.start_function("main", Type::I64, Vec::new());
        let entry = b.create_block(f, "entry");
        b.set_insert_point(f, entry);

        let mut temps: Vec<Value> = Vec::new();
        let count = rng.gen_range(3..20);
        for _ in 0..count {
            let pick_operand = |rng: &mut StdRng, temps: &[Value]| {
                if !temps.is_empty() && rng.gen_bool(0.5) {
                    temps[rng.gen_range(0..temps.len())].clone()
                } else {
                    let v: i64 = rng.gen_range(-1000..1000);
                    Value::const_int(if v == 0 { 1 } else { v })
                }
            };
            let lhs = pick_operand(&mut rng, &temps);
            let rhs = pick_operand(&mut rng, &temps);
            if rng.gen_ratio(1, 4) {
                let op = cmps[rng.gen_range(0..cmps.len())];
                b.emit_binary(op, Type::I1, lhs, rhs);
            } else {
                let op = arith[rng.gen_range(0..arith.len())];
                let rhs = if op == Opcode::SDivChk0 {
                    Value::const_int(rng.gen_range(1..1000))
                } else {
                    rhs
                };
                let result = b.emit_binary(op, Type::I64, lhs, rhs);
                temps.push(result);
            }
        }
        let ret = temps.last().cloned().unwrap_or(Value::const_int(42));
        b.emit_ret(Some(ret));

        let s1 = print_canonical(&module);
        let m2 = parse(&s1).unwrap_or_else(|e| panic!("seed {}: {}\n{}", seed, e, s1));
        assert_eq!(print_canonical(&m2), s1, "seed {} unstable", seed);
    }
}
