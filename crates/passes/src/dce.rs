//! Trivial dead-code elimination
//!
//! Syntactic use counting over temporaries, then four removals: loads
//! whose result is never read, stores into allocas that are never
//! loaded, allocas without loads, and calls to pure helpers whose result
//! is unused. Unused block parameters are pruned together with the
//! matching entry of every predecessor's argument vector. Only obvious
//! dead code goes; anything with a possible side effect stays.

use std::collections::HashMap;

use viper_il::effects::{self, EffectClass};
use viper_il::function::Function;
use viper_il::module::Module;
use viper_il::opcode::Opcode;
use viper_il::value::Value;

/// Count syntactic references to every temp. Block parameters are
/// seeded with zero entries so unused ones are visible.
fn count_uses(function: &Function) -> HashMap<u32, usize> {
    let mut uses: HashMap<u32, usize> = HashMap::new();
    for block in &function.blocks {
        for param in &block.params {
            uses.entry(param.id).or_insert(0);
        }
        for instr in &block.instructions {
            instr.for_each_value(|value| {
                if let Value::Temp(id) = value {
                    *uses.entry(*id).or_insert(0) += 1;
                }
            });
        }
    }
    uses
}

/// Whether a call's result (if any) being unused makes the call dead.
fn call_is_droppable(instr: &viper_il::function::Instr, uses: &HashMap<u32, usize>) -> bool {
    let Some(callee) = instr.callee.as_deref() else {
        return false;
    };
    if effects::effect_of(callee) != EffectClass::Pure {
        return false;
    }
    match instr.result {
        Some(result) => uses.get(&result).copied().unwrap_or(0) == 0,
        // A pure call whose value nobody even binds is dead outright.
        None => true,
    }
}

/// Run DCE over every function in the module. Returns whether anything
/// was removed.
pub fn dce(module: &mut Module) -> bool {
    let mut changed = false;
    for function in &mut module.functions {
        changed |= dce_function(function);
    }
    changed
}

fn dce_function(function: &mut Function) -> bool {
    let uses = count_uses(function);

    // Which allocas ever feed a load.
    let mut has_load: HashMap<u32, bool> = HashMap::new();
    for block in &function.blocks {
        for instr in &block.instructions {
            if instr.op == Opcode::Alloca {
                if let Some(result) = instr.result {
                    has_load.entry(result).or_insert(false);
                }
            }
            if instr.op == Opcode::Load {
                if let Some(Value::Temp(id)) = instr.operands.first() {
                    has_load.insert(*id, true);
                }
            }
        }
    }

    let mut removed = 0usize;
    for block in &mut function.blocks {
        block.instructions.retain(|instr| {
            let dead = match instr.op {
                Opcode::Load => instr
                    .result
                    .is_some_and(|r| uses.get(&r).copied().unwrap_or(0) == 0),
                Opcode::Store => match instr.operands.first() {
                    Some(Value::Temp(id)) => has_load.get(id) == Some(&false),
                    _ => false,
                },
                Opcode::Alloca => instr
                    .result
                    .is_some_and(|r| has_load.get(&r) == Some(&false)),
                Opcode::Call => call_is_droppable(instr, &uses),
                _ => false,
            };
            if dead {
                removed += 1;
            }
            !dead
        });
    }

    // Prune unused block parameters, trimming predecessor args at the
    // matching index. Walk indices in reverse so earlier removals do not
    // shift pending ones. The precomputed counts keep this linear in the
    // number of operands.
    for block_index in 0..function.blocks.len() {
        let label = function.blocks[block_index].label.clone();
        for param_index in (0..function.blocks[block_index].params.len()).rev() {
            let id = function.blocks[block_index].params[param_index].id;
            if uses.get(&id).copied().unwrap_or(0) != 0 {
                continue;
            }
            function.blocks[block_index].params.remove(param_index);
            for pred in &mut function.blocks {
                for instr in &mut pred.instructions {
                    if !instr.op.is_branch() {
                        continue;
                    }
                    for edge in 0..instr.labels.len() {
                        if instr.labels[edge] == label
                            && edge < instr.br_args.len()
                            && param_index < instr.br_args[edge].len()
                        {
                            instr.br_args[edge].remove(param_index);
                        }
                    }
                }
            }
            removed += 1;
        }
    }

    if removed > 0 {
        tracing::debug!(
            target: "dce",
            function = %function.name,
            removed,
            "eliminated dead code"
        );
    }
    removed > 0
}
