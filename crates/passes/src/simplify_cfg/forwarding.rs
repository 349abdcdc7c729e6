//! Empty forwarding-block elimination
//!
//! A forwarder is a block whose entire body is one unconditional branch.
//! Every predecessor edge is redirected to the forwarder's successor,
//! with the successor's arguments rewritten by substituting the
//! forwarder's parameters with the values each predecessor supplied. The
//! emptied block is erased once no edge targets it.

use std::collections::HashMap;

use viper_il::opcode::Opcode;
use viper_il::value::Value;

use super::{substitute, Ctx};

/// Shape test: a single unconditional branch to somewhere else, with the
/// block's parameters (its only local definitions) used nowhere but its
/// own branch arguments.
fn is_forwarder(ctx: &Ctx<'_>, index: usize) -> bool {
    let block = &ctx.function.blocks[index];
    if index == 0 || ctx.is_eh_sensitive(&block.label) {
        return false;
    }
    if block.instructions.len() != 1 {
        return false;
    }
    let branch = &block.instructions[0];
    if branch.op != Opcode::Br || branch.labels.len() != 1 {
        return false;
    }
    if branch.labels[0] == block.label {
        return false;
    }
    // Params may not leak into other blocks.
    let param_ids: Vec<u32> = block.params.iter().map(|p| p.id).collect();
    if param_ids.is_empty() {
        return true;
    }
    for (other_index, other) in ctx.function.blocks.iter().enumerate() {
        if other_index == index {
            continue;
        }
        let mut leaked = false;
        for instr in &other.instructions {
            instr.for_each_value(|value| {
                if let Value::Temp(id) = value {
                    if param_ids.contains(id) {
                        leaked = true;
                    }
                }
            });
        }
        if leaked {
            return false;
        }
    }
    true
}

pub(crate) fn remove_empty_forwarders(ctx: &mut Ctx<'_>) -> bool {
    let mut changed = false;

    let mut index = 0;
    while index < ctx.function.blocks.len() {
        if !is_forwarder(ctx, index) {
            index += 1;
            continue;
        }

        let block = &ctx.function.blocks[index];
        let label = block.label.clone();
        let param_ids: Vec<u32> = block.params.iter().map(|p| p.id).collect();
        let branch = &block.instructions[0];
        let successor = branch.labels[0].clone();
        let forward_args = branch.br_args[0].clone();

        // Redirect every predecessor edge through the substitution of
        // this block's params with that predecessor's incoming args.
        let mut redirected = false;
        let function = &mut *ctx.function;
        for pred_index in 0..function.blocks.len() {
            if pred_index == index {
                continue;
            }
            let pred = &mut function.blocks[pred_index];
            let Some(terminator) = pred.terminator_mut() else {
                continue;
            };
            for edge in 0..terminator.labels.len() {
                if terminator.labels[edge] != label {
                    continue;
                }
                let incoming = terminator.br_args[edge].clone();
                let map: HashMap<u32, Value> = param_ids
                    .iter()
                    .copied()
                    .zip(incoming.into_iter())
                    .collect();
                terminator.labels[edge] = successor.clone();
                terminator.br_args[edge] =
                    forward_args.iter().map(|v| substitute(v, &map)).collect();
                redirected = true;
            }
        }

        // No edges can name the forwarder any more; drop it.
        ctx.function.blocks.remove(index);
        ctx.stats.empty_removed += 1;
        changed = true;
        if redirected {
            tracing::debug!(
                target: "simplify_cfg",
                function = %ctx.function.name,
                block = %label,
                to = %successor,
                "bypassed forwarding block"
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

    fn run(src: &str) -> viper_il::Module {
        let mut module = parse(src).unwrap();
        let mut ctx = Ctx {
            eh_sensitive: module.functions[0].eh_sensitive_labels(),
            function: &mut module.functions[0],
            stats: SimplifyCfgStats::default(),
        };
        super::remove_empty_forwarders(&mut ctx);
        module
    }

    #[test]
    fn test_forwarder_args_substituted() {
        let module = run(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  br mid(7)\nmid(%p: i64):\n  br exit(%p)\nexit(%r: i64):\n  ret %r\n}\n",
        );
        let function = &module.functions[0];
        assert!(function.find_block("mid").is_none());
        let entry_term = function.blocks[0].terminator().unwrap();
        assert_eq!(entry_term.labels, vec!["exit".to_string()]);
        assert_eq!(entry_term.br_args[0], vec![Value::const_int(7)]);
    }

    #[test]
    fn test_block_with_work_not_removed() {
        let module = run(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  br mid(7)\nmid(%p: i64):\n  %q = iadd.ovf %p, 1\n  br exit(%q)\nexit(%r: i64):\n  ret %r\n}\n",
        );
        assert!(module.functions[0].find_block("mid").is_some());
    }

    #[test]
    fn test_param_leak_blocks_removal() {
        // %p escapes into exit's body, so mid must stay.
        let module = run(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  br mid(7)\nmid(%p: i64):\n  br exit\nexit:\n  ret %p\n}\n",
        );
        assert!(module.functions[0].find_block("mid").is_some());
    }

    #[test]
    fn test_multiple_preds_each_substituted() {
        let module = run(
            "il 0.1\nfunc @f(%c: i1) -> i64 {\nentry(%c: i1):\n  cbr %c, mid(1), mid(2)\nmid(%p: i64):\n  br exit(%p)\nexit(%r: i64):\n  ret %r\n}\n",
        );
        let function = &module.functions[0];
        assert!(function.find_block("mid").is_none());
        let term = function.blocks[0].terminator().unwrap();
        assert_eq!(term.labels, vec!["exit".to_string(), "exit".to_string()]);
        assert_eq!(term.br_args[0], vec![Value::const_int(1)]);
        assert_eq!(term.br_args[1], vec![Value::const_int(2)]);
    }
}
