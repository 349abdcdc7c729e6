//! Single-predecessor block merging
//!
//! A block with exactly one predecessor edge, reached by an
//! unconditional branch, is spliced into that predecessor: incoming
//! arguments substitute the block's parameters, the predecessor's branch
//! is replaced by the block's body, and labels in the inherited
//! terminator that named the merged block are renamed to keep self-loops
//! intact.

use std::collections::HashMap;

use viper_il::opcode::Opcode;
use viper_il::value::Value;

use super::{substitute_in_block, Ctx};

/// Find the single predecessor edge of `block_index`, ignoring
/// self-edges. Returns the predecessor's block index when exactly one
/// edge targets the block.
fn sole_predecessor(ctx: &Ctx<'_>, block_index: usize) -> Option<usize> {
    let label = &ctx.function.blocks[block_index].label;
    let mut found: Option<usize> = None;
    let mut edges = 0usize;
    for (index, candidate) in ctx.function.blocks.iter().enumerate() {
        if index == block_index {
            continue;
        }
        let Some(terminator) = candidate.terminator() else {
            continue;
        };
        for target in &terminator.labels {
            if target == label {
                edges += 1;
                if edges == 1 {
                    found = Some(index);
                }
            }
        }
    }
    (edges == 1).then_some(found).flatten()
}

/// Attempt to merge `block_index` into its sole predecessor. Returns
/// true when the block was spliced away.
fn merge_single_pred(ctx: &mut Ctx<'_>, block_index: usize) -> bool {
    if block_index == 0 {
        return false;
    }
    if ctx.is_eh_sensitive(&ctx.function.blocks[block_index].label) {
        return false;
    }

    let Some(pred_index) = sole_predecessor(ctx, block_index) else {
        return false;
    };

    {
        // A self-looping block may only merge when it has no parameters:
        // the relabelled back-edge must still satisfy the surviving
        // block's arity.
        let block = &ctx.function.blocks[block_index];
        let has_self_edge = block
            .terminator()
            .map(|t| t.labels.iter().any(|l| *l == block.label))
            .unwrap_or(false);
        if has_self_edge && !block.params.is_empty() {
            return false;
        }
    }

    {
        let pred = &ctx.function.blocks[pred_index];
        let Some(terminator) = pred.terminator() else {
            return false;
        };
        // Only a plain `br` into the block qualifies.
        if terminator.op != Opcode::Br || terminator.labels.len() != 1 {
            return false;
        }
        if terminator.labels[0] != ctx.function.blocks[block_index].label {
            return false;
        }
        let incoming = terminator.br_args.first().map(Vec::len).unwrap_or(0);
        if incoming != ctx.function.blocks[block_index].params.len() {
            return false;
        }
    }

    // Detach the block, substitute its params, then splice.
    let mut block = ctx.function.blocks.remove(block_index);
    let pred_index = if pred_index > block_index {
        pred_index - 1
    } else {
        pred_index
    };

    let pred = &mut ctx.function.blocks[pred_index];
    let incoming_args = pred
        .terminator()
        .and_then(|t| t.br_args.first().cloned())
        .unwrap_or_default();
    let map: HashMap<u32, Value> = block
        .params
        .iter()
        .map(|p| p.id)
        .zip(incoming_args.into_iter())
        .collect();
    substitute_in_block(&mut block, &map);

    // Self-loop edges must now name the surviving block.
    let merged_label = block.label.clone();
    let survivor_label = pred.label.clone();
    if let Some(terminator) = block.terminator_mut() {
        for label in &mut terminator.labels {
            if *label == merged_label {
                *label = survivor_label.clone();
            }
        }
    }

    pred.instructions.pop();
    pred.instructions.append(&mut block.instructions);

    ctx.stats.blocks_merged += 1;
    tracing::debug!(
        target: "simplify_cfg",
        function = %ctx.function.name,
        merged = %block.label,
        into = %ctx.function.blocks[pred_index].label,
        "merged block into predecessor"
    );
    true
}

pub(crate) fn merge_single_pred_blocks(ctx: &mut Ctx<'_>) -> bool {
    let mut changed = false;
    let mut index = 0;
    while index < ctx.function.blocks.len() {
        if merge_single_pred(ctx, index) {
            changed = true;
            // Indices shifted; retry the same slot.
            continue;
        }
        index += 1;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::super::{Ctx, SimplifyCfgStats};
    use viper_il::parser::parse;
    use viper_il::{Opcode, Value};

    fn run(src: &str) -> viper_il::Module {
        let mut module = parse(src).unwrap();
        let mut ctx = Ctx {
            eh_sensitive: module.functions[0].eh_sensitive_labels(),
            function: &mut module.functions[0],
            stats: SimplifyCfgStats::default(),
        };
        super::merge_single_pred_blocks(&mut ctx);
        module
    }

    #[test]
    fn test_straight_line_merge() {
        let module = run(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  %a = iadd.ovf 1, 2\n  br next(%a)\nnext(%v: i64):\n  %b = iadd.ovf %v, 3\n  ret %b\n}\n",
        );
        let function = &module.functions[0];
        assert_eq!(function.blocks.len(), 1);
        assert_eq!(function.blocks[0].label, "entry");
        // %v was substituted with %a.
        let add = &function.blocks[0].instructions[1];
        assert_eq!(add.op, Opcode::IAddOvf);
        assert_eq!(add.operands[0], Value::temp(0));
    }

    #[test]
    fn test_two_preds_do_not_merge() {
        let module = run(
            "il 0.1\nfunc @f(%c: i1) -> i64 {\nentry(%c: i1):\n  cbr %c, join(1), join(2)\njoin(%v: i64):\n  ret %v\n}\n",
        );
        assert_eq!(module.functions[0].blocks.len(), 2);
    }

    #[test]
    fn test_self_loop_edges_relabelled() {
        // A parameterless self-looping block merges; its back-edge must
        // then target the surviving block.
        let module = run(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  br spin\nspin:\n  %c = const_i1 true\n  cbr %c, spin, exit\nexit:\n  ret 0\n}\n",
        );
        let function = &module.functions[0];
        assert!(function.find_block("spin").is_none());
        let entry_term = function.blocks[0].terminator().unwrap();
        assert_eq!(entry_term.op, Opcode::CBr);
        assert!(entry_term.labels.contains(&"entry".to_string()));
    }

    #[test]
    fn test_self_loop_with_params_not_merged() {
        let module = run(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  br loop(0)\nloop(%i: i64):\n  %n = iadd.ovf %i, 1\n  %d = scmp.ge %n, 10\n  cbr %d, exit(%n), loop(%n)\nexit(%r: i64):\n  ret %r\n}\n",
        );
        assert!(module.functions[0].find_block("loop").is_some());
    }
}
