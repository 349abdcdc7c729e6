//! Block parameter canonicalisation
//!
//! Two shrinking rules keep block signatures minimal: a parameter whose
//! incoming value is identical on every predecessor edge is replaced by
//! that value, and a parameter nobody reads is dropped. In both cases
//! the matching entry in every predecessor's argument vector is erased
//! in lockstep so edges stay arity-correct.

use std::collections::HashMap;

use viper_il::function::Function;
use viper_il::value::Value;

use super::{substitute_in_block, Ctx};

/// Collect (block index of predecessor, edge index) pairs targeting a label.
fn incoming_edges(function: &Function, label: &str) -> Vec<(usize, usize)> {
    let mut edges = Vec::new();
    for (pred_index, pred) in function.blocks.iter().enumerate() {
        let Some(terminator) = pred.terminator() else {
            continue;
        };
        for (edge_index, target) in terminator.labels.iter().enumerate() {
            if target == label {
                edges.push((pred_index, edge_index));
            }
        }
    }
    edges
}

/// Erase argument `param_index` from every edge into `label`.
fn erase_arg_everywhere(function: &mut Function, label: &str, param_index: usize) {
    for pred in &mut function.blocks {
        let Some(terminator) = pred.terminator_mut() else {
            continue;
        };
        for edge_index in 0..terminator.labels.len() {
            if terminator.labels[edge_index] != label {
                continue;
            }
            if let Some(args) = terminator.br_args.get_mut(edge_index) {
                if param_index < args.len() {
                    args.remove(param_index);
                }
            }
        }
    }
}

/// Replace parameters that receive one unanimous value from every
/// predecessor, repeating until a fixed point.
fn shrink_params_equal_across_preds(ctx: &mut Ctx<'_>, block_index: usize) -> usize {
    let mut removed = 0usize;
    loop {
        let mut removed_this_round = false;

        let mut param_index = 0;
        while param_index < ctx.function.blocks[block_index].params.len() {
            let label = ctx.function.blocks[block_index].label.clone();
            let param_id = ctx.function.blocks[block_index].params[param_index].id;
            let param_count = ctx.function.blocks[block_index].params.len();

            let mut common: Option<Value> = None;
            let mut mismatch = false;
            for (pred_index, edge_index) in incoming_edges(ctx.function, &label) {
                let terminator = ctx.function.blocks[pred_index]
                    .terminator()
                    .expect("edge implies terminator");
                let Some(args) = terminator.br_args.get(edge_index) else {
                    mismatch = true;
                    break;
                };
                if args.len() != param_count {
                    mismatch = true;
                    break;
                }
                let incoming = &args[param_index];
                // A value fed from the parameter itself says nothing.
                if incoming.as_temp() == Some(param_id) {
                    mismatch = true;
                    break;
                }
                match &common {
                    None => common = Some(incoming.clone()),
                    Some(seen) if seen.same_as(incoming) => {}
                    Some(_) => {
                        mismatch = true;
                        break;
                    }
                }
            }

            let Some(replacement) = common.filter(|_| !mismatch) else {
                param_index += 1;
                continue;
            };

            let map: HashMap<u32, Value> = [(param_id, replacement)].into_iter().collect();
            substitute_in_block(&mut ctx.function.blocks[block_index], &map);
            erase_arg_everywhere(ctx.function, &label, param_index);
            ctx.function.blocks[block_index].params.remove(param_index);
            removed += 1;
            removed_this_round = true;
        }

        if !removed_this_round {
            break;
        }
    }
    removed
}

/// Drop parameters whose SSA id is never referenced anywhere in the
/// function.
fn drop_unused_params(ctx: &mut Ctx<'_>, block_index: usize) -> usize {
    let mut removed = 0usize;
    let mut param_index = 0;
    while param_index < ctx.function.blocks[block_index].params.len() {
        let label = ctx.function.blocks[block_index].label.clone();
        let param_id = ctx.function.blocks[block_index].params[param_index].id;

        let mut used = false;
        for (other_index, other) in ctx.function.blocks.iter().enumerate() {
            for instr in &other.instructions {
                // The argument that feeds this parameter is not a use of
                // it; skip exactly those slots.
                for operand in &instr.operands {
                    if operand.as_temp() == Some(param_id) {
                        used = true;
                    }
                }
                for (edge_index, args) in instr.br_args.iter().enumerate() {
                    let feeds_self = instr
                        .labels
                        .get(edge_index)
                        .is_some_and(|target| *target == label);
                    for (arg_index, arg) in args.iter().enumerate() {
                        if arg.as_temp() != Some(param_id) {
                            continue;
                        }
                        if feeds_self && arg_index == param_index {
                            continue;
                        }
                        used = true;
                    }
                }
            }
            let _ = other_index;
            if used {
                break;
            }
        }

        if used {
            param_index += 1;
            continue;
        }

        erase_arg_everywhere(ctx.function, &label, param_index);
        ctx.function.blocks[block_index].params.remove(param_index);
        removed += 1;
    }
    removed
}

pub(crate) fn canonicalize_params_and_args(ctx: &mut Ctx<'_>) -> bool {
    let mut changed = false;

    for block_index in 0..ctx.function.blocks.len() {
        // The entry block's parameters mirror the function signature and
        // stay put even when an argumentless caller cannot be seen here.
        if block_index == 0 {
            continue;
        }
        if ctx.is_eh_sensitive(&ctx.function.blocks[block_index].label) {
            continue;
        }
        if ctx.function.blocks[block_index].params.is_empty() {
            continue;
        }

        let shrunk = shrink_params_equal_across_preds(ctx, block_index);
        if shrunk > 0 {
            changed = true;
            ctx.stats.params_shrunk += shrunk;
            tracing::debug!(
                target: "simplify_cfg",
                function = %ctx.function.name,
                block = %ctx.function.blocks[block_index].label,
                removed = shrunk,
                "replaced duplicated params"
            );
        }

        if ctx.function.blocks[block_index].params.is_empty() {
            continue;
        }

        let dropped = drop_unused_params(ctx, block_index);
        if dropped > 0 {
            changed = true;
            ctx.stats.params_shrunk += dropped;
            tracing::debug!(
                target: "simplify_cfg",
                function = %ctx.function.name,
                block = %ctx.function.blocks[block_index].label,
                removed = dropped,
                "dropped unused params"
            );
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::super::{Ctx, SimplifyCfgStats};
    use viper_il::parser::parse;
    use viper_il::Value;

    fn run(src: &str) -> (viper_il::Module, SimplifyCfgStats) {
        let mut module = parse(src).unwrap();
        let mut ctx = Ctx {
            eh_sensitive: module.functions[0].eh_sensitive_labels(),
            function: &mut module.functions[0],
            stats: SimplifyCfgStats::default(),
        };
        super::canonicalize_params_and_args(&mut ctx);
        let stats = ctx.stats;
        (module, stats)
    }

    #[test]
    fn test_unanimous_param_inlined() {
        let (module, stats) = run(
            "il 0.1\nfunc @f(%c: i1) -> i64 {\nentry(%c: i1):\n  cbr %c, join(7), join(7)\njoin(%v: i64):\n  ret %v\n}\n",
        );
        let function = &module.functions[0];
        let join = function.find_block("join").unwrap();
        assert!(join.params.is_empty());
        assert_eq!(join.instructions[0].operands[0], Value::const_int(7));
        // Edges trimmed in lockstep.
        let term = function.blocks[0].terminator().unwrap();
        assert!(term.br_args.iter().all(|args| args.is_empty()));
        assert_eq!(stats.params_shrunk, 1);
    }

    #[test]
    fn test_divergent_params_stay() {
        let (module, _) = run(
            "il 0.1\nfunc @f(%c: i1) -> i64 {\nentry(%c: i1):\n  cbr %c, join(1), join(2)\njoin(%v: i64):\n  ret %v\n}\n",
        );
        let join = module.functions[0].find_block("join").unwrap();
        assert_eq!(join.params.len(), 1);
    }

    #[test]
    fn test_unused_param_dropped() {
        let (module, stats) = run(
            "il 0.1\nfunc @f(%c: i1) -> i64 {\nentry(%c: i1):\n  cbr %c, join(1, 10), join(2, 10)\njoin(%v: i64, %unused: i64):\n  ret %v\n}\n",
        );
        let function = &module.functions[0];
        let join = function.find_block("join").unwrap();
        // %unused dropped; %v stays (two different incoming values),
        // and the unanimous 10 for %unused went away with it.
        assert_eq!(join.params.len(), 1);
        assert_eq!(join.params[0].name, "v");
        let term = function.blocks[0].terminator().unwrap();
        assert_eq!(term.br_args[0].len(), 1);
        assert_eq!(term.br_args[1].len(), 1);
        assert!(stats.params_shrunk >= 1);
    }

    #[test]
    fn test_loop_carried_param_not_replaced() {
        // join receives 0 from entry and its own %v from the back edge;
        // the self-feeding arg must not count as unanimous.
        let (module, _) = run(
            "il 0.1\nfunc @f(%c: i1) -> i64 {\nentry(%c: i1):\n  br loop(0)\nloop(%v: i64):\n  cbr %c, loop(%v), exit\nexit:\n  ret %v\n}\n",
        );
        let loop_block = module.functions[0].find_block("loop").unwrap();
        assert_eq!(loop_block.params.len(), 1);
    }
}
