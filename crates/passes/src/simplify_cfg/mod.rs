//! Control-flow graph simplification
//!
//! Fixed-point driver over a suite of local rewrites: trivial switch and
//! conditional-branch folding, empty-forwarder elimination,
//! single-predecessor merging, unreachable-block removal, and block
//! parameter canonicalisation, plus jump threading in aggressive mode.
//! Each rewrite lives in its own submodule and communicates through the
//! shared [`Ctx`].
//!
//! Blocks that participate in exception handling (targets of
//! `resume.label`) are never rewritten. The driver iterates until no
//! rewrite fires, bounded at eight rounds; debug builds validate the
//! branch metadata between rounds.

mod branch_folding;
mod forwarding;
mod merging;
mod params;
mod reachability;
mod threading;

use std::collections::HashMap;
use std::collections::HashSet;

use viper_il::function::Function;
use viper_il::value::Value;

/// Aggregated statistics from one pass invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimplifyCfgStats {
    pub cbr_to_br: usize,
    pub switch_to_br: usize,
    pub empty_removed: usize,
    pub blocks_merged: usize,
    pub unreachable_removed: usize,
    pub params_shrunk: usize,
    pub jumps_threaded: usize,
}

/// Per-run context shared by the rewrite modules.
pub(crate) struct Ctx<'f> {
    pub function: &'f mut Function,
    pub eh_sensitive: HashSet<String>,
    pub stats: SimplifyCfgStats,
}

impl<'f> Ctx<'f> {
    fn new(function: &'f mut Function) -> Ctx<'f> {
        let eh_sensitive = function.eh_sensitive_labels();
        Ctx {
            function,
            eh_sensitive,
            stats: SimplifyCfgStats::default(),
        }
    }

    pub fn is_eh_sensitive(&self, label: &str) -> bool {
        self.eh_sensitive.contains(label)
    }
}

/// Substitute a value through an id → replacement map.
pub(crate) fn substitute(value: &Value, map: &HashMap<u32, Value>) -> Value {
    match value {
        Value::Temp(id) => map.get(id).cloned().unwrap_or_else(|| value.clone()),
        _ => value.clone(),
    }
}

/// Rewrite every operand and branch argument of a block in place.
pub(crate) fn substitute_in_block(
    block: &mut viper_il::function::BasicBlock,
    map: &HashMap<u32, Value>,
) {
    for instr in &mut block.instructions {
        instr.for_each_value_mut(|value| {
            if let Value::Temp(id) = value {
                if let Some(replacement) = map.get(id) {
                    *value = replacement.clone();
                }
            }
        });
    }
}

/// CFG simplification pass.
pub struct SimplifyCfg {
    aggressive: bool,
}

impl SimplifyCfg {
    pub fn new(aggressive: bool) -> SimplifyCfg {
        SimplifyCfg { aggressive }
    }

    /// Run to fixpoint on one function. Returns whether anything changed
    /// and the accumulated statistics.
    pub fn run(&self, function: &mut Function) -> (bool, SimplifyCfgStats) {
        let mut ctx = Ctx::new(function);
        let mut changed_any = false;

        for _ in 0..8 {
            let mut changed = false;
            changed |= branch_folding::fold_trivial_switches(&mut ctx);
            changed |= branch_folding::fold_trivial_cbrs(&mut ctx);
            changed |= forwarding::remove_empty_forwarders(&mut ctx);
            changed |= merging::merge_single_pred_blocks(&mut ctx);
            changed |= reachability::remove_unreachable_blocks(&mut ctx);
            changed |= params::canonicalize_params_and_args(&mut ctx);
            if self.aggressive {
                changed |= threading::thread_jumps(&mut ctx);
            }
            if !changed {
                break;
            }
            changed_any = true;
            debug_validate(ctx.function);
        }

        let stats = ctx.stats;
        if changed_any {
            tracing::debug!(
                target: "simplify_cfg",
                function = %function.name,
                ?stats,
                "function simplified"
            );
        }
        (changed_any, stats)
    }
}

impl Default for SimplifyCfg {
    fn default() -> Self {
        SimplifyCfg::new(true)
    }
}

/// Debug-build structural validation: every block ends in exactly one
/// terminator and branch metadata stays parallel and arity-consistent.
#[cfg(debug_assertions)]
fn debug_validate(function: &Function) {
    let params_of: HashMap<&str, usize> = function
        .blocks
        .iter()
        .map(|b| (b.label.as_str(), b.params.len()))
        .collect();
    for block in &function.blocks {
        let terminator = block.terminator();
        debug_assert!(
            terminator.is_some(),
            "block '{}' lost its terminator",
            block.label
        );
        for instr in &block.instructions {
            if instr.op.is_branch() {
                debug_assert_eq!(
                    instr.labels.len(),
                    instr.br_args.len(),
                    "branch metadata out of step in '{}'",
                    block.label
                );
                for (label, args) in instr.labels.iter().zip(&instr.br_args) {
                    if let Some(&arity) = params_of.get(label.as_str()) {
                        debug_assert_eq!(
                            args.len(),
                            arity,
                            "branch from '{}' to '{}' has wrong arg count",
                            block.label,
                            label
                        );
                    }
                }
            }
        }
    }
}

#[cfg(not(debug_assertions))]
fn debug_validate(_function: &Function) {}

#[cfg(test)]
mod tests {
    use super::*;
    use viper_il::parser::parse;
    use viper_il::Opcode;

    fn run_on(src: &str) -> viper_il::Module {
        let mut module = parse(src).unwrap();
        viper_il::verify::verify(&module).unwrap();
        let pass = SimplifyCfg::new(true);
        for function in &mut module.functions {
            pass.run(function);
        }
        viper_il::verify::verify(&module).unwrap();
        module
    }

    #[test]
    fn test_constant_cbr_folds_to_direct_return() {
        // After folding `cbr true`, A merges into the entry block.
        let module = run_on(
            "il 0.1\nfunc @main() -> i64 {\nentry:\n  cbr true, a, b\na:\n  ret 1\nb:\n  ret 2\n}\n",
        );
        let function = &module.functions[0];
        assert_eq!(function.blocks.len(), 1);
        let ret = function.blocks[0].instructions.last().unwrap();
        assert_eq!(ret.op, Opcode::Ret);
        assert_eq!(ret.operands[0], viper_il::Value::const_int(1));
    }

    #[test]
    fn test_forwarder_bypassed() {
        let module = run_on(
            "il 0.1\nfunc @main() -> i64 {\nentry:\n  br mid(7)\nmid(%p: i64):\n  br exit(%p)\nexit(%r: i64):\n  ret %r\n}\n",
        );
        let function = &module.functions[0];
        assert!(function.find_block("mid").is_none(), "forwarder should be gone");
        // Everything collapses into a single return of the constant.
        assert_eq!(function.blocks.len(), 1);
        let ret = function.blocks[0].instructions.last().unwrap();
        assert_eq!(ret.operands[0], viper_il::Value::const_int(7));
    }

    #[test]
    fn test_same_target_cbr_with_matching_args() {
        let module = run_on(
            "il 0.1\nfunc @f(%c: i1) -> i64 {\nentry(%c: i1):\n  cbr %c, join(4), join(4)\njoin(%v: i64):\n  ret %v\n}\n",
        );
        let function = &module.functions[0];
        // cbr → br, then the join merges in; the cond param may survive.
        assert!(function.blocks.iter().all(|b| b
            .terminator()
            .map(|t| t.op != Opcode::CBr)
            .unwrap_or(true)));
    }

    #[test]
    fn test_unreachable_block_removed() {
        let module = run_on(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  br exit\nexit:\n  ret 0\nisland:\n  br exit\n}\n",
        );
        let function = &module.functions[0];
        assert!(function.find_block("island").is_none());
    }

    #[test]
    fn test_resume_target_preserved() {
        let src = "il 0.1\nfunc @f() -> i64 {\nentry:\n  resume.label handler\nhandler:\n  ret 0\n}\n";
        let mut module = parse(src).unwrap();
        let pass = SimplifyCfg::new(true);
        pass.run(&mut module.functions[0]);
        assert!(module.functions[0].find_block("handler").is_some());
    }

    #[test]
    fn test_iteration_bound_converges() {
        // A chain of forwarders longer than one iteration's worth of work.
        let src = "il 0.1\nfunc @f() -> i64 {\nentry:\n  br a(1)\na(%x1: i64):\n  br b(%x1)\nb(%x2: i64):\n  br c(%x2)\nc(%x3: i64):\n  br d(%x3)\nd(%x4: i64):\n  ret %x4\n}\n";
        let module = run_on(src);
        assert_eq!(module.functions[0].blocks.len(), 1);
    }
}
