//! Trivial branch folding
//!
//! Rewrites `switch.i32` instructions whose edges all reach one block and
//! `cbr` instructions with literal or indifferent conditions into plain
//! `br` terminators. Folding only inspects the terminator itself; the
//! cheap shape makes this safe to run every iteration.

use viper_il::function::Instr;
use viper_il::opcode::Opcode;
use viper_il::value::Value;

use super::Ctx;

/// Build the replacement `br` keeping the source location.
fn br_to(original: &Instr, label: String, args: Vec<Value>) -> Instr {
    let mut br = Instr::new(Opcode::Br);
    br.labels.push(label);
    br.br_args.push(args);
    br.loc = original.loc;
    br
}

/// Fold `switch.i32` terminators whose cases all target one block with
/// identical argument vectors.
pub(crate) fn fold_trivial_switches(ctx: &mut Ctx<'_>) -> bool {
    let Ctx {
        function,
        eh_sensitive,
        stats,
    } = ctx;
    let mut changed = false;
    for block in &mut function.blocks {
        if eh_sensitive.contains(&block.label) {
            continue;
        }
        let Some(terminator) = block.terminator_mut() else {
            continue;
        };
        if terminator.op != Opcode::SwitchI32 || terminator.labels.is_empty() {
            continue;
        }
        let first_label = &terminator.labels[0];
        let first_args = &terminator.br_args[0];
        let uniform = terminator
            .labels
            .iter()
            .zip(&terminator.br_args)
            .all(|(label, args)| label == first_label && args == first_args);
        if !uniform {
            continue;
        }
        let replacement = br_to(terminator, first_label.clone(), first_args.clone());
        *terminator = replacement;
        stats.switch_to_br += 1;
        changed = true;
    }
    if changed {
        tracing::debug!(target: "simplify_cfg", function = %function.name, "folded trivial switches");
    }
    changed
}

/// Fold `cbr` terminators with a literal condition or identical edges.
pub(crate) fn fold_trivial_cbrs(ctx: &mut Ctx<'_>) -> bool {
    let Ctx {
        function,
        eh_sensitive,
        stats,
    } = ctx;
    let mut changed = false;
    for block in &mut function.blocks {
        if eh_sensitive.contains(&block.label) {
            continue;
        }
        let Some(terminator) = block.terminator_mut() else {
            continue;
        };
        if terminator.op != Opcode::CBr || terminator.labels.len() != 2 {
            continue;
        }

        // Literal condition selects one edge.
        if let Some(Value::ConstInt { value, .. }) = terminator.operands.first() {
            let index = if *value != 0 { 0 } else { 1 };
            let replacement = br_to(
                terminator,
                terminator.labels[index].clone(),
                terminator.br_args[index].clone(),
            );
            *terminator = replacement;
            stats.cbr_to_br += 1;
            changed = true;
            continue;
        }

        // Both edges identical: the condition is irrelevant.
        if terminator.labels[0] == terminator.labels[1]
            && terminator.br_args[0] == terminator.br_args[1]
        {
            let replacement = br_to(
                terminator,
                terminator.labels[0].clone(),
                terminator.br_args[0].clone(),
            );
            *terminator = replacement;
            stats.cbr_to_br += 1;
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::super::{Ctx, SimplifyCfgStats};
    use viper_il::parser::parse;
    use viper_il::Opcode;

    fn fold_cbrs(src: &str) -> viper_il::Module {
        let mut module = parse(src).unwrap();
        let mut ctx = Ctx {
            eh_sensitive: module.functions[0].eh_sensitive_labels(),
            function: &mut module.functions[0],
            stats: SimplifyCfgStats::default(),
        };
        super::fold_trivial_cbrs(&mut ctx);
        super::fold_trivial_switches(&mut ctx);
        module
    }

    #[test]
    fn test_cbr_true_picks_first_edge() {
        let module = fold_cbrs(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  cbr true, a, b\na:\n  ret 1\nb:\n  ret 2\n}\n",
        );
        let term = module.functions[0].blocks[0].terminator().unwrap();
        assert_eq!(term.op, Opcode::Br);
        assert_eq!(term.labels, vec!["a".to_string()]);
    }

    #[test]
    fn test_cbr_false_picks_second_edge() {
        let module = fold_cbrs(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  cbr false, a, b\na:\n  ret 1\nb:\n  ret 2\n}\n",
        );
        let term = module.functions[0].blocks[0].terminator().unwrap();
        assert_eq!(term.op, Opcode::Br);
        assert_eq!(term.labels, vec!["b".to_string()]);
    }

    #[test]
    fn test_cbr_same_target_needs_matching_args() {
        // Differing argument vectors keep the cbr alive.
        let module = fold_cbrs(
            "il 0.1\nfunc @f(%c: i1) -> i64 {\nentry(%c: i1):\n  cbr %c, j(1), j(2)\nj(%v: i64):\n  ret %v\n}\n",
        );
        let term = module.functions[0].blocks[0].terminator().unwrap();
        assert_eq!(term.op, Opcode::CBr);

        let module = fold_cbrs(
            "il 0.1\nfunc @f(%c: i1) -> i64 {\nentry(%c: i1):\n  cbr %c, j(1), j(1)\nj(%v: i64):\n  ret %v\n}\n",
        );
        let term = module.functions[0].blocks[0].terminator().unwrap();
        assert_eq!(term.op, Opcode::Br);
    }

    #[test]
    fn test_uniform_switch_folds() {
        let module = fold_cbrs(
            "il 0.1\nfunc @f(%x: i32) -> i64 {\nentry(%x: i32):\n  switch.i32 %x, j(5), 1 -> j(5), 2 -> j(5)\nj(%v: i64):\n  ret %v\n}\n",
        );
        let term = module.functions[0].blocks[0].terminator().unwrap();
        assert_eq!(term.op, Opcode::Br);
        assert_eq!(term.br_args[0], vec![viper_il::Value::const_int(5)]);
    }
}
