//! Textual serialisation of IL modules
//!
//! The printer is the inverse of the parser: for every module the parser
//! accepts, `parse(print_canonical(m))` reconstructs an equal module.
//! Two modes exist. Pretty indents instructions and separates functions
//! with blank lines; Canonical emits the minimal deterministic form used
//! for golden files and diffing. Both print the same tokens: the modes
//! differ in whitespace only.

use std::fmt::Write as _;

use crate::escape;
use crate::function::{BasicBlock, Function, Instr};
use crate::module::Module;
use crate::opcode::Opcode;
use crate::types::Type;
use crate::value::Value;

/// Output formatting style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Pretty,
    Canonical,
}

/// Serialise a module to IL text.
pub fn print(module: &Module, mode: Mode) -> String {
    let mut out = String::new();
    let pretty = mode == Mode::Pretty;

    let _ = writeln!(out, "il {}", module.version);
    if let Some(target) = &module.target {
        let _ = writeln!(out, "target \"{}\"", escape::encode(target));
    }
    for ext in &module.externs {
        let params: Vec<&str> = ext.params.iter().map(Type::name).collect();
        let _ = writeln!(
            out,
            "extern @{}({}) -> {}",
            ext.name,
            params.join(", "),
            ext.ret_type
        );
    }
    for global in &module.globals {
        let qualifier = if global.is_const { "const " } else { "" };
        let _ = writeln!(
            out,
            "global {}{} @{} = {}",
            qualifier,
            global.ty,
            global.name,
            format_value(&global.init, None)
        );
    }
    for function in &module.functions {
        if pretty {
            let _ = writeln!(out);
        }
        print_function(&mut out, function, pretty);
    }
    out
}

/// Serialise in pretty mode.
pub fn print_pretty(module: &Module) -> String {
    print(module, Mode::Pretty)
}

/// Serialise in canonical mode.
pub fn print_canonical(module: &Module) -> String {
    print(module, Mode::Canonical)
}

fn print_function(out: &mut String, function: &Function, pretty: bool) {
    let params = function
        .params
        .iter()
        .map(|p| format!("%{}: {}", p.name, p.ty))
        .collect::<Vec<_>>()
        .join(", ");
    let mut header = format!("func @{}({}) -> {}", function.name, params, function.ret_type);
    if !function.attrs.is_empty() {
        let mut attrs = function.attrs.clone();
        attrs.sort();
        let _ = write!(header, " [{}]", attrs.join(", "));
    }
    let _ = writeln!(out, "{} {{", header);
    for block in &function.blocks {
        print_block(out, function, block, pretty);
    }
    let _ = writeln!(out, "}}");
}

fn print_block(out: &mut String, function: &Function, block: &BasicBlock, pretty: bool) {
    if block.params.is_empty() {
        let _ = writeln!(out, "{}:", block.label);
    } else {
        let params = block
            .params
            .iter()
            .map(|p| format!("%{}: {}", temp_name(function, p.id, &p.name), p.ty))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "{}({}):", block.label, params);
    }
    for instr in &block.instructions {
        if pretty {
            out.push_str("  ");
        }
        print_instr(out, function, instr);
        out.push('\n');
    }
}

fn print_instr(out: &mut String, function: &Function, instr: &Instr) {
    if let Some(result) = instr.result {
        let _ = write!(out, "%{}", fallback_name(function, result));
        // Load and store carry their type as the first operand token;
        // other ops annotate the result when it deviates from the
        // opcode's default.
        let annotate = instr.op != Opcode::Load
            && instr.op != Opcode::Store
            && instr.ty != instr.op.default_result_type();
        if annotate {
            let _ = write!(out, ":{}", instr.ty);
        }
        out.push_str(" = ");
    }
    out.push_str(instr.op.mnemonic());

    match instr.op {
        Opcode::Call => {
            let callee = instr.callee.as_deref().unwrap_or("");
            let args = join_values(function, &instr.operands);
            let _ = write!(out, " @{}({})", callee, args);
        }
        Opcode::CallIndirect => {
            let _ = write!(out, " {}", format_value(&instr.operands[0], Some(function)));
            if instr.operands.len() > 1 {
                let args = join_values(function, &instr.operands[1..]);
                let _ = write!(out, "({})", args);
            }
        }
        Opcode::Br | Opcode::ResumeLabel => {
            let _ = write!(out, " {}", format_target(function, instr, 0));
        }
        Opcode::CBr => {
            let _ = write!(
                out,
                " {}, {}, {}",
                format_value(&instr.operands[0], Some(function)),
                format_target(function, instr, 0),
                format_target(function, instr, 1)
            );
        }
        Opcode::SwitchI32 => {
            let _ = write!(
                out,
                " {}, {}",
                format_value(&instr.operands[0], Some(function)),
                format_target(function, instr, 0)
            );
            for (case_idx, case_value) in instr.operands[1..].iter().enumerate() {
                let _ = write!(
                    out,
                    ", {} -> {}",
                    format_value(case_value, Some(function)),
                    format_target(function, instr, case_idx + 1)
                );
            }
        }
        Opcode::Load => {
            let _ = write!(
                out,
                " {}, {}",
                instr.ty,
                format_value(&instr.operands[0], Some(function))
            );
        }
        Opcode::Store => {
            let _ = write!(
                out,
                " {}, {}, {}",
                instr.ty,
                format_value(&instr.operands[0], Some(function)),
                format_value(&instr.operands[1], Some(function))
            );
        }
        _ => {
            if !instr.operands.is_empty() {
                let _ = write!(out, " {}", join_values(function, &instr.operands));
            }
        }
    }
}

fn format_target(function: &Function, instr: &Instr, index: usize) -> String {
    let label = &instr.labels[index];
    let args = instr.br_args.get(index).map(Vec::as_slice).unwrap_or(&[]);
    if args.is_empty() {
        label.clone()
    } else {
        format!("{}({})", label, join_values(function, args))
    }
}

fn join_values(function: &Function, values: &[Value]) -> String {
    values
        .iter()
        .map(|v| format_value(v, Some(function)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Display name for a temp id: the recorded name, or a positional
/// fallback for ids created without one.
fn fallback_name(function: &Function, id: u32) -> String {
    match function.value_name(id) {
        Some(name) => name.to_string(),
        None => format!("t{}", id),
    }
}

fn temp_name(function: &Function, id: u32, stored: &str) -> String {
    if stored.is_empty() {
        fallback_name(function, id)
    } else {
        stored.to_string()
    }
}

fn format_value(value: &Value, function: Option<&Function>) -> String {
    match value {
        Value::Temp(id) => match function {
            Some(f) => format!("%{}", fallback_name(f, *id)),
            None => format!("%t{}", id),
        },
        Value::ConstInt { value, is_bool } => {
            if *is_bool {
                if *value != 0 { "true".into() } else { "false".into() }
            } else {
                value.to_string()
            }
        }
        Value::ConstFloat(f) => format_float(*f),
        Value::ConstStr(s) => format!("\"{}\"", escape::encode(s)),
        Value::GlobalAddr(name) => format!("@{}", name),
        Value::NullPtr => "null".into(),
    }
}

/// Shortest round-trip float form with a forced decimal point; specials
/// use the spellings the parser recognises.
fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Inf" } else { "-Inf" }.to_string();
    }
    let text = format!("{}", f);
    if text.contains('.') || text.contains('e') || text.contains('E') {
        text
    } else {
        format!("{}.0", text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IrBuilder;

    #[test]
    fn test_format_float_specials() {
        assert_eq!(format_float(3.5), "3.5");
        assert_eq!(format_float(-0.0), "-0.0");
        assert_eq!(format_float(7.0), "7.0");
        assert_eq!(format_float(f64::NAN), "NaN");
        assert_eq!(format_float(f64::INFINITY), "Inf");
        assert_eq!(format_float(f64::NEG_INFINITY), "-Inf");
    }

    #[test]
    fn test_bool_operands_print_symbolically() {
        assert_eq!(format_value(&Value::const_bool(true), None), "true");
        assert_eq!(format_value(&Value::const_bool(false), None), "false");
        assert_eq!(format_value(&Value::const_int(1), None), "1");
    }

    #[test]
    fn test_qualified_function_name_survives() {
        let mut module = Module::new();
        let mut b = IrBuilder::new(&mut module);
        let f = b.start_function("a.b.f", Type::I64, Vec::new());
        let entry = b.create_block(f, "entry");
        b.set_insert_point(f, entry);
        b.emit_ret(Some(Value::const_int(0)));
        let text = print_pretty(&module);
        assert!(text.contains("func @a.b.f("));
    }

    #[test]
    fn test_attrs_print_sorted() {
        let mut module = Module::new();
        let mut b = IrBuilder::new(&mut module);
        let f = b.start_function("f", Type::Void, Vec::new());
        let entry = b.create_block(f, "entry");
        b.set_insert_point(f, entry);
        b.emit_ret(None);
        module.functions[0].attrs = vec!["noinline".to_string(), "cold".to_string()];
        let text = print_canonical(&module);
        assert!(text.contains("[cold, noinline]"));
    }
}
