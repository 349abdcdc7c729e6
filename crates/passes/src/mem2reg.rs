//! Stack slot promotion
//!
//! Rewrites allocas that are only ever loaded and stored through their
//! own pointer into pure SSA data flow: loads become the reaching stored
//! value, stores disappear, and block parameters materialise the merge
//! points. A slot escapes promotion the moment its pointer is used any
//! other way (gep, call argument, stored as a value) or its accesses
//! disagree on the access type.
//!
//! Parameters are inserted in every non-entry block where the slot is
//! live-in; the unanimous-value and unused-parameter canonicalisations
//! in SimplifyCFG shrink that conservative placement afterwards.

use std::collections::{HashMap, HashSet};

use viper_il::function::{Function, Param};
use viper_il::module::Module;
use viper_il::opcode::Opcode;
use viper_il::types::Type;
use viper_il::value::Value;

use crate::analysis::build_cfg;

/// Promotion statistics, reported through `--mem2reg-stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mem2RegStats {
    pub promoted_vars: usize,
    pub removed_loads: usize,
    pub removed_stores: usize,
}

/// Run promotion over every function, accumulating statistics. Returns
/// whether any slot was promoted.
pub fn mem2reg(module: &mut Module, stats: Option<&mut Mem2RegStats>) -> bool {
    let mut total = Mem2RegStats::default();
    for function in &mut module.functions {
        let function_stats = promote_function(function);
        total.promoted_vars += function_stats.promoted_vars;
        total.removed_loads += function_stats.removed_loads;
        total.removed_stores += function_stats.removed_stores;
    }
    let changed = total.promoted_vars > 0;
    if let Some(out) = stats {
        *out = total;
    }
    changed
}

/// A candidate stack slot and the access type all its users agree on.
struct Slot {
    id: u32,
    ty: Type,
}

/// Typed zero used when a load can execute before any store.
fn zero_of(ty: Type) -> Value {
    match ty {
        Type::I1 => Value::const_bool(false),
        Type::F32 | Type::F64 => Value::const_float(0.0),
        Type::Ptr => Value::NullPtr,
        Type::Str => Value::const_str(""),
        _ => Value::const_int(0),
    }
}

/// Collect promotable slots: every use of the alloca's result must be
/// the pointer operand of a load or store, and all accesses must share
/// one type.
fn collect_slots(function: &Function) -> Vec<Slot> {
    let mut alloca_ids: HashSet<u32> = HashSet::new();
    for block in &function.blocks {
        for instr in &block.instructions {
            if instr.op == Opcode::Alloca {
                if let Some(result) = instr.result {
                    alloca_ids.insert(result);
                }
            }
        }
    }

    let mut disqualified: HashSet<u32> = HashSet::new();
    let mut access_type: HashMap<u32, Type> = HashMap::new();

    for block in &function.blocks {
        for instr in &block.instructions {
            match instr.op {
                Opcode::Load | Opcode::Store => {
                    if let Some(Value::Temp(id)) = instr.operands.first() {
                        if alloca_ids.contains(id) {
                            match access_type.get(id) {
                                Some(seen) if *seen != instr.ty => {
                                    disqualified.insert(*id);
                                }
                                None => {
                                    access_type.insert(*id, instr.ty);
                                }
                                _ => {}
                            }
                        }
                    }
                    // The stored value itself must not be a slot pointer.
                    if instr.op == Opcode::Store {
                        if let Some(Value::Temp(id)) = instr.operands.get(1) {
                            if alloca_ids.contains(id) {
                                disqualified.insert(*id);
                            }
                        }
                    }
                }
                _ => {
                    instr.for_each_value(|value| {
                        if let Value::Temp(id) = value {
                            if alloca_ids.contains(id) {
                                disqualified.insert(*id);
                            }
                        }
                    });
                }
            }
        }
    }

    alloca_ids
        .into_iter()
        .filter(|id| !disqualified.contains(id))
        .filter_map(|id| access_type.get(&id).map(|&ty| Slot { id, ty }))
        .collect()
}

/// Blocks where a slot's value is needed on entry: a load is upward
/// exposed, or a successor needs it.
fn live_in_blocks(function: &Function, slot: u32) -> HashSet<String> {
    let cfg = build_cfg(function);
    let mut gen_use: HashSet<&str> = HashSet::new();
    let mut has_def: HashSet<&str> = HashSet::new();
    for block in &function.blocks {
        for instr in &block.instructions {
            let touches = matches!(instr.operands.first(), Some(Value::Temp(id)) if *id == slot);
            if instr.op == Opcode::Load && touches && !has_def.contains(block.label.as_str()) {
                gen_use.insert(&block.label);
            }
            if instr.op == Opcode::Store && touches {
                has_def.insert(&block.label);
            }
        }
    }

    let mut live_in: HashSet<String> = gen_use.iter().map(|s| s.to_string()).collect();
    let mut changed = true;
    while changed {
        changed = false;
        for block in function.blocks.iter().rev() {
            let needed_by_succ = cfg
                .successors(&block.label)
                .iter()
                .any(|succ| live_in.contains(succ));
            if needed_by_succ
                && !has_def.contains(block.label.as_str())
                && live_in.insert(block.label.clone())
            {
                changed = true;
            }
        }
    }
    // Successor liveness also makes the value live out of defining
    // blocks, which the rewrite handles by forwarding the stored value;
    // live-in is only about needing a parameter.
    live_in
}

fn promote_function(function: &mut Function) -> Mem2RegStats {
    let slots = collect_slots(function);
    if slots.is_empty() {
        return Mem2RegStats::default();
    }

    let mut stats = Mem2RegStats {
        promoted_vars: slots.len(),
        ..Mem2RegStats::default()
    };

    // Existing display names, to keep generated parameter names unique.
    let mut taken_names: HashSet<String> = function
        .value_names
        .iter()
        .flatten()
        .cloned()
        .collect();

    // Insert a parameter per (live-in non-entry block, slot), recording
    // (block label, slot id) → param id.
    let mut slot_params: HashMap<(String, u32), u32> = HashMap::new();
    for slot in &slots {
        let base = function
            .value_name(slot.id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("slot{}", slot.id));
        let live_in = live_in_blocks(function, slot.id);
        let mut counter = 0usize;
        for block_index in 1..function.blocks.len() {
            let label = function.blocks[block_index].label.clone();
            if !live_in.contains(&label) {
                continue;
            }
            let mut name = format!("{}.{}", base, counter);
            while taken_names.contains(&name) {
                counter += 1;
                name = format!("{}.{}", base, counter);
            }
            counter += 1;
            taken_names.insert(name.clone());
            let id = function.new_temp(Some(&name));
            function.blocks[block_index].params.push(Param {
                name,
                ty: slot.ty,
                id,
            });
            slot_params.insert((label, slot.id), id);
        }
    }

    let slot_types: HashMap<u32, Type> = slots.iter().map(|s| (s.id, s.ty)).collect();
    // Load results replaced by reaching values.
    let mut load_replacements: HashMap<u32, Value> = HashMap::new();

    for block_index in 0..function.blocks.len() {
        let label = function.blocks[block_index].label.clone();

        // Reaching value per slot at this point in the block.
        let mut current: HashMap<u32, Value> = HashMap::new();
        for slot in &slots {
            if let Some(&param_id) = slot_params.get(&(label.clone(), slot.id)) {
                current.insert(slot.id, Value::temp(param_id));
            }
        }

        let block = &mut function.blocks[block_index];
        let mut rewritten = Vec::with_capacity(block.instructions.len());
        for mut instr in block.instructions.drain(..) {
            let slot_access = match instr.operands.first() {
                Some(Value::Temp(id)) if slot_types.contains_key(id) => Some(*id),
                _ => None,
            };
            match (instr.op, slot_access) {
                (Opcode::Alloca, _)
                    if instr.result.is_some_and(|r| slot_types.contains_key(&r)) => {}
                (Opcode::Store, Some(slot)) => {
                    current.insert(slot, instr.operands[1].clone());
                    stats.removed_stores += 1;
                }
                (Opcode::Load, Some(slot)) => {
                    let value = current
                        .get(&slot)
                        .cloned()
                        .unwrap_or_else(|| zero_of(slot_types[&slot]));
                    if let Some(result) = instr.result {
                        load_replacements.insert(result, value);
                    }
                    stats.removed_loads += 1;
                }
                _ => {
                    // Feed successors that expect a slot parameter.
                    if instr.op.is_branch() {
                        for edge in 0..instr.labels.len() {
                            let target = instr.labels[edge].clone();
                            for slot in &slots {
                                if !slot_params.contains_key(&(target.clone(), slot.id)) {
                                    continue;
                                }
                                let value = current
                                    .get(&slot.id)
                                    .cloned()
                                    .unwrap_or_else(|| zero_of(slot.ty));
                                instr.br_args[edge].push(value);
                            }
                        }
                    }
                    rewritten.push(instr);
                }
            }
        }
        block.instructions = rewritten;
    }

    // Loads may feed instructions in later blocks (or chains of loads);
    // resolve chains before the final sweep.
    let resolved: HashMap<u32, Value> = load_replacements
        .iter()
        .map(|(&id, value)| {
            let mut value = value.clone();
            let mut hops = 0;
            while let Value::Temp(next) = value {
                match load_replacements.get(&next) {
                    Some(replacement) if hops < 64 => {
                        value = replacement.clone();
                        hops += 1;
                    }
                    _ => {
                        value = Value::Temp(next);
                        break;
                    }
                }
            }
            (id, value)
        })
        .collect();
    for block in &mut function.blocks {
        for instr in &mut block.instructions {
            instr.for_each_value_mut(|value| {
                if let Value::Temp(id) = value {
                    if let Some(replacement) = resolved.get(id) {
                        *value = replacement.clone();
                    }
                }
            });
        }
    }

    tracing::debug!(
        target: "mem2reg",
        function = %function.name,
        promoted = stats.promoted_vars,
        loads = stats.removed_loads,
        stores = stats.removed_stores,
        "promoted stack slots"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use viper_il::parser::parse;

    fn promote(src: &str) -> (Module, Mem2RegStats) {
        let mut module = parse(src).unwrap();
        viper_il::verify::verify(&module).unwrap();
        let mut stats = Mem2RegStats::default();
        mem2reg(&mut module, Some(&mut stats));
        viper_il::verify::verify(&module).unwrap();
        (module, stats)
    }

    #[test]
    fn test_straight_line_promotion() {
        let (module, stats) = promote(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  %slot = alloca 8\n  store i64, %slot, 7\n  %v = load i64, %slot\n  ret %v\n}\n",
        );
        let instrs = &module.functions[0].blocks[0].instructions;
        assert_eq!(instrs.len(), 1);
        assert_eq!(instrs[0].operands[0], Value::const_int(7));
        assert_eq!(
            stats,
            Mem2RegStats { promoted_vars: 1, removed_loads: 1, removed_stores: 1 }
        );
    }

    #[test]
    fn test_store_load_store_load() {
        let (module, _) = promote(
            "il 0.1\nextern @rt_print_i64(i64) -> void\nfunc @f() -> i64 {\nentry:\n  %slot = alloca 8\n  store i64, %slot, 1\n  %a = load i64, %slot\n  call @rt_print_i64(%a)\n  store i64, %slot, 2\n  %b = load i64, %slot\n  ret %b\n}\n",
        );
        let instrs = &module.functions[0].blocks[0].instructions;
        // Only the call and ret survive; each saw the right value.
        assert_eq!(instrs.len(), 2);
        assert_eq!(instrs[0].operands[0], Value::const_int(1));
        assert_eq!(instrs[1].operands[0], Value::const_int(2));
    }

    #[test]
    fn test_branch_merge_gets_parameter() {
        let (module, stats) = promote(
            r#"il 0.1
func @f(%c: i1) -> i64 {
entry(%c: i1):
  %slot = alloca 8
  store i64, %slot, 0
  cbr %c, then, join
then:
  store i64, %slot, 5
  br join
join:
  %v = load i64, %slot
  ret %v
}
"#,
        );
        assert_eq!(stats.promoted_vars, 1);
        let function = &module.functions[0];
        let join = function.find_block("join").unwrap();
        assert_eq!(join.params.len(), 1, "merge point needs a parameter");
        // Each predecessor forwards its reaching value.
        let entry_term = function.blocks[0].terminator().unwrap();
        let join_edge = entry_term.label_index("join").unwrap();
        assert_eq!(entry_term.br_args[join_edge], vec![Value::const_int(0)]);
        let then_term = function.find_block("then").unwrap().terminator().unwrap();
        assert_eq!(then_term.br_args[0], vec![Value::const_int(5)]);
        // The load is gone; ret reads the parameter.
        assert_eq!(join.instructions.len(), 1);
        assert_eq!(join.instructions[0].operands[0], Value::temp(join.params[0].id));
    }

    #[test]
    fn test_loop_carried_slot() {
        let (module, _) = promote(
            r#"il 0.1
func @f() -> i64 {
entry:
  %slot = alloca 8
  store i64, %slot, 0
  br loop
loop:
  %v = load i64, %slot
  %n = iadd.ovf %v, 1
  store i64, %slot, %n
  %done = scmp.ge %n, 10
  cbr %done, exit, loop
exit:
  %r = load i64, %slot
  ret %r
}
"#,
        );
        let function = &module.functions[0];
        assert!(function
            .blocks
            .iter()
            .all(|b| b.instructions.iter().all(|i| i.op != Opcode::Load
                && i.op != Opcode::Store
                && i.op != Opcode::Alloca)));
        let loop_block = function.find_block("loop").unwrap();
        assert_eq!(loop_block.params.len(), 1);
    }

    #[test]
    fn test_escaping_slot_not_promoted() {
        // Passing the pointer to a call disqualifies the slot.
        let (module, stats) = promote(
            "il 0.1\nextern @rt_arr_i32_len(ptr) -> i64\nfunc @f() -> i64 {\nentry:\n  %slot = alloca 8\n  store i64, %slot, 7\n  %n = call @rt_arr_i32_len(%slot)\n  %v = load i64, %slot\n  ret %v\n}\n",
        );
        assert_eq!(stats.promoted_vars, 0);
        let instrs = &module.functions[0].blocks[0].instructions;
        assert!(instrs.iter().any(|i| i.op == Opcode::Alloca));
        assert!(instrs.iter().any(|i| i.op == Opcode::Store));
    }

    #[test]
    fn test_gep_use_not_promoted() {
        let (_, stats) = promote(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  %slot = alloca 16\n  %p = gep %slot, 8\n  store i64, %slot, 7\n  %v = load i64, %slot\n  ret %v\n}\n",
        );
        assert_eq!(stats.promoted_vars, 0);
    }

    #[test]
    fn test_load_before_store_sees_zero() {
        let (module, _) = promote(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  %slot = alloca 8\n  %v = load i64, %slot\n  ret %v\n}\n",
        );
        let instrs = &module.functions[0].blocks[0].instructions;
        assert_eq!(instrs.len(), 1);
        assert_eq!(instrs[0].operands[0], Value::const_int(0));
    }
}
