//! Peephole simplification
//!
//! Algebraic identities on single instructions: additive and
//! multiplicative identities, annihilators, self-cancellation, and
//! constant-condition branch collapse. Replacements are collected into
//! one substitution map and applied in a single sweep, so wide functions
//! never pay a quadratic rescan per rewrite.
//!
//! Deliberate non-rewrites, pinned by tests: double negation
//! (`isub 0, (isub 0, x)`) is left alone, and `imul x, 2^n` is never
//! strength-reduced to a shift.

use std::collections::HashMap;

use viper_il::function::{Function, Instr};
use viper_il::module::Module;
use viper_il::opcode::Opcode;
use viper_il::value::Value;

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::ConstInt { value, .. } => Some(*value),
        _ => None,
    }
}

/// The value an instruction simplifies to, when an identity applies.
fn simplify(instr: &Instr) -> Option<Value> {
    use Opcode::*;
    let lhs = instr.operands.first()?;
    let rhs = instr.operands.get(1)?;
    let lhs_int = as_int(lhs);
    let rhs_int = as_int(rhs);

    match instr.op {
        // x + 0 and 0 + x; adding zero cannot overflow, so the checked
        // form qualifies too.
        IAdd | IAddOvf => {
            if rhs_int == Some(0) {
                return Some(lhs.clone());
            }
            if lhs_int == Some(0) {
                return Some(rhs.clone());
            }
            None
        }
        // x * 1, 1 * x, x * 0, 0 * x.
        IMul | IMulOvf => {
            if rhs_int == Some(1) {
                return Some(lhs.clone());
            }
            if lhs_int == Some(1) {
                return Some(rhs.clone());
            }
            if rhs_int == Some(0) || lhs_int == Some(0) {
                return Some(Value::const_int(0));
            }
            None
        }
        // x - x is zero regardless of overflow checking; x - 0 is x.
        ISub | ISubOvf => {
            if lhs.same_as(rhs) && matches!(lhs, Value::Temp(_)) {
                return Some(Value::const_int(0));
            }
            if rhs_int == Some(0) {
                return Some(lhs.clone());
            }
            None
        }
        Shl | LShr => (rhs_int == Some(0)).then(|| lhs.clone()),
        SDiv | SDivChk0 => (rhs_int == Some(1)).then(|| lhs.clone()),
        SRem | SRemChk0 => (rhs_int == Some(1)).then(|| Value::const_int(0)),
        And => (rhs_int == Some(0) || lhs_int == Some(0)).then(|| Value::const_int(0)),
        Or => (rhs_int == Some(-1) || lhs_int == Some(-1)).then(|| Value::const_int(-1)),
        Xor => (lhs.same_as(rhs) && matches!(lhs, Value::Temp(_)))
            .then(|| Value::const_int(0)),
        ICmpEq => (lhs.same_as(rhs) && matches!(lhs, Value::Temp(_)))
            .then(|| Value::const_bool(true)),
        _ => None,
    }
}

/// Run peephole simplification over the module. Returns whether any
/// identity fired.
pub fn peephole(module: &mut Module) -> bool {
    let mut any = false;
    for function in &mut module.functions {
        any |= peephole_function(function);
    }
    any
}

fn peephole_function(function: &mut Function) -> bool {
    let mut replacements: HashMap<u32, Value> = HashMap::new();

    for block in &function.blocks {
        for instr in &block.instructions {
            let Some(result) = instr.result else {
                continue;
            };
            if let Some(replacement) = simplify(instr) {
                // Chase chains so a replacement never points at another
                // rewritten temp.
                let resolved = match &replacement {
                    Value::Temp(id) => replacements.get(id).cloned().unwrap_or(replacement),
                    _ => replacement,
                };
                replacements.insert(result, resolved);
            }
        }
    }

    let changed = !replacements.is_empty();
    if changed {
        for block in &mut function.blocks {
            for instr in &mut block.instructions {
                instr.for_each_value_mut(|value| {
                    if let Value::Temp(id) = value {
                        if let Some(replacement) = replacements.get(id) {
                            *value = replacement.clone();
                        }
                    }
                });
            }
            block
                .instructions
                .retain(|instr| !instr.result.is_some_and(|r| replacements.contains_key(&r)));
        }
    }

    // Branch collapse: literal conditions and indistinguishable edges.
    let mut branches = 0usize;
    for block in &mut function.blocks {
        let Some(terminator) = block.terminator_mut() else {
            continue;
        };
        if terminator.op != Opcode::CBr || terminator.labels.len() != 2 {
            continue;
        }
        let taken = match terminator.operands.first().and_then(as_int) {
            Some(value) => Some(if value != 0 { 0 } else { 1 }),
            None => (terminator.labels[0] == terminator.labels[1]
                && terminator.br_args[0] == terminator.br_args[1])
                .then_some(0),
        };
        if let Some(taken) = taken {
            let mut br = Instr::new(Opcode::Br);
            br.labels.push(terminator.labels[taken].clone());
            br.br_args.push(terminator.br_args[taken].clone());
            br.loc = terminator.loc;
            *terminator = br;
            branches += 1;
        }
    }

    if changed || branches > 0 {
        tracing::debug!(
            target: "peephole",
            function = %function.name,
            values = replacements.len(),
            branches,
            "applied identities"
        );
    }
    changed || branches > 0
}
