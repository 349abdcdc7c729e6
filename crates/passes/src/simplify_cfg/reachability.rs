//! Unreachable block removal
//!
//! Breadth-first search from the entry block over terminator labels;
//! blocks the walk never visits are erased. Before a block is erased,
//! every branch edge naming it (label plus the parallel argument vector)
//! is removed from the surviving blocks so branch metadata stays
//! consistent.

use std::collections::{HashMap, VecDeque};

use super::Ctx;

/// Reachability mask over block indices, seeded from index 0.
fn mark_reachable(function: &viper_il::Function) -> Vec<bool> {
    let mut reachable = vec![false; function.blocks.len()];
    if function.blocks.is_empty() {
        return reachable;
    }
    let label_to_index: HashMap<&str, usize> = function
        .blocks
        .iter()
        .enumerate()
        .map(|(index, block)| (block.label.as_str(), index))
        .collect();

    let mut worklist = VecDeque::new();
    reachable[0] = true;
    worklist.push_back(0usize);

    while let Some(index) = worklist.pop_front() {
        let Some(terminator) = function.blocks[index].terminator() else {
            continue;
        };
        for label in &terminator.labels {
            if let Some(&succ) = label_to_index.get(label.as_str()) {
                if !reachable[succ] {
                    reachable[succ] = true;
                    worklist.push_back(succ);
                }
            }
        }
    }
    reachable
}

pub(crate) fn remove_unreachable_blocks(ctx: &mut Ctx<'_>) -> bool {
    let reachable = mark_reachable(ctx.function);

    let doomed: Vec<usize> = (1..ctx.function.blocks.len())
        .filter(|&index| !reachable[index])
        .collect();

    let mut removed = 0usize;
    // Erase back to front so pending indices stay valid.
    for &index in doomed.iter().rev() {
        if ctx.is_eh_sensitive(&ctx.function.blocks[index].label) {
            continue;
        }
        let label = ctx.function.blocks[index].label.clone();

        for block in &mut ctx.function.blocks {
            for instr in &mut block.instructions {
                if instr.labels.is_empty() {
                    continue;
                }
                let mut edge = 0;
                while edge < instr.labels.len() {
                    if instr.labels[edge] == label {
                        instr.labels.remove(edge);
                        if edge < instr.br_args.len() {
                            instr.br_args.remove(edge);
                        }
                        // switch.i32 case values pair with case edges;
                        // drop the matching case operand (edge 0 is the
                        // default and has no paired operand).
                        if instr.op == viper_il::Opcode::SwitchI32 && edge > 0 {
                            if edge < instr.operands.len() {
                                instr.operands.remove(edge);
                            }
                        }
                    } else {
                        edge += 1;
                    }
                }
            }
        }

        ctx.function.blocks.remove(index);
        removed += 1;
    }

    if removed > 0 {
        ctx.stats.unreachable_removed += removed;
        tracing::debug!(
            target: "simplify_cfg",
            function = %ctx.function.name,
            count = removed,
            "erased unreachable blocks"
        );
        return true;
    }
    false
}
