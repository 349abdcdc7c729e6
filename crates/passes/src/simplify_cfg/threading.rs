//! Jump threading
//!
//! When a predecessor passes a constant to a block parameter that is the
//! sole operand of that block's `cbr`, and the block contains nothing but
//! the `cbr`, the predecessor can jump straight to the selected
//! successor. Arguments are rewritten through the parameter mapping so
//! pass-through values land where the intermediate block would have sent
//! them. Blocks with real work are never threaded; duplicating
//! instruction sequences is out of scope.

use std::collections::HashMap;

use viper_il::function::Function;
use viper_il::opcode::Opcode;
use viper_il::value::Value;

use super::{substitute, Ctx};

/// Index of the block parameter the `cbr` condition reads, if the block
/// is a bare `cbr` over one of its own parameters.
fn condition_param_index(function: &Function, block_index: usize) -> Option<usize> {
    let block = &function.blocks[block_index];
    if block.instructions.len() != 1 {
        return None;
    }
    let terminator = &block.instructions[0];
    if terminator.op != Opcode::CBr || terminator.labels.len() != 2 {
        return None;
    }
    // Distinct successors only; a degenerate cbr is branch folding's job.
    if terminator.labels[0] == terminator.labels[1] {
        return None;
    }
    let cond_id = terminator.operands.first()?.as_temp()?;
    block.params.iter().position(|p| p.id == cond_id)
}

struct Candidate {
    pred_index: usize,
    pred_edge: usize,
    new_target: String,
    new_args: Vec<Value>,
    through: String,
}

pub(crate) fn thread_jumps(ctx: &mut Ctx<'_>) -> bool {
    let function = &*ctx.function;
    let mut candidates: Vec<Candidate> = Vec::new();

    for block_index in 0..function.blocks.len() {
        let block = &function.blocks[block_index];
        if ctx.is_eh_sensitive(&block.label) {
            continue;
        }
        let Some(cond_param) = condition_param_index(function, block_index) else {
            continue;
        };
        let terminator = &block.instructions[0];

        for (pred_index, pred) in function.blocks.iter().enumerate() {
            if pred_index == block_index || ctx.is_eh_sensitive(&pred.label) {
                continue;
            }
            let Some(pred_term) = pred.terminator() else {
                continue;
            };
            for (pred_edge, target) in pred_term.labels.iter().enumerate() {
                if *target != block.label {
                    continue;
                }
                let Some(args) = pred_term.br_args.get(pred_edge) else {
                    continue;
                };
                if args.len() != block.params.len() {
                    continue;
                }
                // The condition must arrive as an integer constant.
                let Some(Value::ConstInt { value, .. }) = args.get(cond_param) else {
                    continue;
                };
                let taken = if *value != 0 { 0 } else { 1 };
                let new_target = terminator.labels[taken].clone();

                // Substitute the intermediate block's params with this
                // predecessor's arguments inside the outgoing args.
                let map: HashMap<u32, Value> = block
                    .params
                    .iter()
                    .map(|p| p.id)
                    .zip(args.iter().cloned())
                    .collect();
                let new_args = terminator.br_args[taken]
                    .iter()
                    .map(|v| substitute(v, &map))
                    .collect();

                candidates.push(Candidate {
                    pred_index,
                    pred_edge,
                    new_target,
                    new_args,
                    through: block.label.clone(),
                });
            }
        }
    }

    let changed = !candidates.is_empty();
    for candidate in candidates {
        let pred = &mut ctx.function.blocks[candidate.pred_index];
        let Some(terminator) = pred.terminator_mut() else {
            continue;
        };
        if candidate.pred_edge >= terminator.labels.len() {
            continue;
        }
        terminator.labels[candidate.pred_edge] = candidate.new_target.clone();
        terminator.br_args[candidate.pred_edge] = candidate.new_args;
        ctx.stats.jumps_threaded += 1;
        tracing::debug!(
            target: "simplify_cfg",
            function = %ctx.function.name,
            through = %candidate.through,
            to = %candidate.new_target,
            "threaded jump"
        );
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::super::SimplifyCfg;
    use viper_il::parser::parse;
    use viper_il::{Opcode, Value};

    fn run_aggressive(src: &str) -> viper_il::Module {
        let mut module = parse(src).unwrap();
        viper_il::verify::verify(&module).unwrap();
        SimplifyCfg::new(true).run(&mut module.functions[0]);
        viper_il::verify::verify(&module).unwrap();
        module
    }

    #[test]
    fn test_true_constant_threads_to_first_target() {
        let module = run_aggressive(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  br mid(true)\nmid(%cond: i1):\n  cbr %cond, t1, t2\nt1:\n  ret 1\nt2:\n  ret 2\n}\n",
        );
        let function = &module.functions[0];
        // Entry ends up returning 1 directly once cleanup runs.
        let entry = &function.blocks[0];
        let term = entry.terminator().unwrap();
        assert_eq!(term.op, Opcode::Ret);
        assert_eq!(term.operands[0], Value::const_int(1));
    }

    #[test]
    fn test_false_constant_threads_to_second_target() {
        let module = run_aggressive(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  br mid(false)\nmid(%cond: i1):\n  cbr %cond, t1, t2\nt1:\n  ret 1\nt2:\n  ret 2\n}\n",
        );
        let term = module.functions[0].blocks[0].terminator().unwrap();
        assert_eq!(term.op, Opcode::Ret);
        assert_eq!(term.operands[0], Value::const_int(2));
    }

    #[test]
    fn test_pass_through_args_substituted() {
        let module = run_aggressive(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  br mid(true, 42)\nmid(%cond: i1, %val: i64):\n  cbr %cond, target(%val), target(0)\ntarget(%r: i64):\n  ret %r\n}\n",
        );
        let term = module.functions[0].blocks[0].terminator().unwrap();
        assert_eq!(term.op, Opcode::Ret);
        assert_eq!(term.operands[0], Value::const_int(42));
    }

    #[test]
    fn test_multi_pred_block_threads_each_edge() {
        // Two predecessors feed constant conditions, so merging cannot
        // fire; each edge must be redirected around `mid` individually.
        let mut module = parse(
            "il 0.1\nfunc @f(%c: i1) -> i64 {\nentry(%c: i1):\n  cbr %c, p1, p2\np1:\n  br mid(true)\np2:\n  br mid(false)\nmid(%cond: i1):\n  cbr %cond, t1, t2\nt1:\n  ret 1\nt2:\n  ret 2\n}\n",
        )
        .unwrap();
        let mut ctx = super::super::Ctx {
            eh_sensitive: module.functions[0].eh_sensitive_labels(),
            function: &mut module.functions[0],
            stats: Default::default(),
        };
        assert!(super::thread_jumps(&mut ctx));
        assert_eq!(ctx.stats.jumps_threaded, 2);
        let function = &module.functions[0];
        let p1_term = function.find_block("p1").unwrap().terminator().unwrap();
        assert_eq!(p1_term.labels, vec!["t1".to_string()]);
        let p2_term = function.find_block("p2").unwrap().terminator().unwrap();
        assert_eq!(p2_term.labels, vec!["t2".to_string()]);
    }

    #[test]
    fn test_non_constant_condition_not_threaded() {
        let mut module = parse(
            "il 0.1\nfunc @f(%c: i1) -> i64 {\nentry(%c: i1):\n  br mid(%c)\nmid(%cond: i1):\n  cbr %cond, t1, t2\nt1:\n  ret 1\nt2:\n  ret 2\n}\n",
        )
        .unwrap();
        // Run only the threading rewrite so merging does not disturb the
        // shape under test.
        let mut ctx = super::super::Ctx {
            eh_sensitive: module.functions[0].eh_sensitive_labels(),
            function: &mut module.functions[0],
            stats: Default::default(),
        };
        assert!(!super::thread_jumps(&mut ctx));
    }

    #[test]
    fn test_block_with_extra_work_not_threaded() {
        let mut module = parse(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  br mid(true)\nmid(%cond: i1):\n  %x = iadd.ovf 1, 2\n  cbr %cond, t1(%x), t2(%x)\nt1(%a: i64):\n  ret %a\nt2(%b: i64):\n  ret %b\n}\n",
        )
        .unwrap();
        let mut ctx = super::super::Ctx {
            eh_sensitive: module.functions[0].eh_sensitive_labels(),
            function: &mut module.functions[0],
            stats: Default::default(),
        };
        assert!(!super::thread_jumps(&mut ctx));
    }
}
