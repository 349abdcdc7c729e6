//! Execution tracing
//!
//! Two modes, both off by default. IL-level tracing prints every
//! executed instruction with its operand values; boolean constants
//! render as `true`/`false`, matching the printer, so trace output stays
//! symmetrical with the textual form. Source-level tracing prints the
//! source line recorded for the instruction, collapsing runs of the
//! same line.

use viper_il::function::Instr;
use viper_il::value::Value;

use crate::slot::Slot;

/// Trace verbosity for a VM run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceMode {
    #[default]
    Off,
    /// One line per executed IL instruction
    Il,
    /// One line per source line transition
    Src,
}

/// Render an operand for the trace: constants from their literal form,
/// temporaries from the evaluated slot.
pub(crate) fn render_operand(value: &Value, slot: Option<Slot>) -> String {
    match value {
        Value::ConstInt { value, is_bool } => {
            if *is_bool {
                if *value != 0 { "true".into() } else { "false".into() }
            } else {
                value.to_string()
            }
        }
        Value::ConstFloat(f) => format!("{}", f),
        Value::ConstStr(s) => format!("{:?}", s),
        Value::GlobalAddr(name) => format!("@{}", name),
        Value::NullPtr => "null".into(),
        Value::Temp(id) => match slot {
            Some(slot) => format!("%{}={}", id, slot.as_i64()),
            None => format!("%{}", id),
        },
    }
}

/// One IL-level trace line for an instruction about to execute.
pub(crate) fn render_instr(
    function_name: &str,
    block_label: &str,
    instr: &Instr,
    slots: &[Option<Slot>],
) -> String {
    let mut line = format!("[{}:{}] {}", function_name, block_label, instr.op);
    for (index, operand) in instr.operands.iter().enumerate() {
        if index > 0 {
            line.push(',');
        }
        line.push(' ');
        line.push_str(&render_operand(operand, slots.get(index).copied().flatten()));
    }
    for (label, args) in instr.labels.iter().zip(&instr.br_args) {
        line.push_str(&format!(" ^{}", label));
        if !args.is_empty() {
            let rendered: Vec<String> =
                args.iter().map(|a| render_operand(a, None)).collect();
            line.push_str(&format!("({})", rendered.join(", ")));
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use viper_il::opcode::Opcode;

    #[test]
    fn test_bool_constants_render_symbolically() {
        assert_eq!(render_operand(&Value::const_bool(true), None), "true");
        assert_eq!(render_operand(&Value::const_bool(false), None), "false");
        assert_eq!(render_operand(&Value::const_int(0), None), "0");
    }

    #[test]
    fn test_instr_line_mentions_block_and_opcode() {
        let mut cbr = Instr::new(Opcode::CBr);
        cbr.operands.push(Value::const_bool(true));
        cbr.labels.push("then".into());
        cbr.labels.push("other".into());
        cbr.br_args.push(vec![Value::const_bool(false)]);
        cbr.br_args.push(vec![]);
        let line = render_instr("main", "entry", &cbr, &[None]);
        assert!(line.contains("[main:entry] cbr true"));
        assert!(line.contains("^then(false)"));
    }
}
