//! Late-pipeline cleanup
//!
//! A thin wrapper that alternates aggressive SimplifyCFG with DCE until
//! neither pass finds further work, bounded to four iterations. Designed to
//! run at the tail of a pipeline and mop up the dead code and CFG noise
//! earlier passes leave behind. Per-iteration instruction and block
//! counts are recorded for instrumentation; both sequences are
//! monotonically non-increasing.

use viper_il::module::Module;

use crate::dce::dce;
use crate::simplify_cfg::SimplifyCfg;

/// Iteration trace of one cleanup run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LateCleanupStats {
    pub iterations: usize,
    pub instr_before: usize,
    pub instr_after: usize,
    pub blocks_before: usize,
    pub blocks_after: usize,
    /// Instruction count observed after each iteration.
    pub instr_per_iter: Vec<usize>,
    /// Block count observed after each iteration.
    pub blocks_per_iter: Vec<usize>,
}

const MAX_ITERATIONS: usize = 4;

/// Run the cleanup loop. Returns the statistics; the module is mutated
/// in place.
pub fn late_cleanup(module: &mut Module) -> LateCleanupStats {
    let mut stats = LateCleanupStats {
        instr_before: module.instr_count(),
        blocks_before: module.block_count(),
        ..LateCleanupStats::default()
    };

    let mut last_instrs = stats.instr_before;
    let mut last_blocks = stats.blocks_before;

    for _ in 0..MAX_ITERATIONS {
        let cfg_pass = SimplifyCfg::new(true);
        let mut cfg_changed = false;
        for function in &mut module.functions {
            let (changed, _) = cfg_pass.run(function);
            cfg_changed |= changed;
        }
        let dce_changed = dce(module);

        let instrs = module.instr_count();
        let blocks = module.block_count();
        stats.iterations += 1;
        stats.instr_per_iter.push(instrs);
        stats.blocks_per_iter.push(blocks);

        last_instrs = instrs;
        last_blocks = blocks;

        if !cfg_changed && !dce_changed {
            break;
        }
    }

    stats.instr_after = last_instrs;
    stats.blocks_after = last_blocks;
    tracing::debug!(
        target: "late_cleanup",
        iterations = stats.iterations,
        instrs = ?stats.instr_per_iter,
        blocks = ?stats.blocks_per_iter,
        "cleanup converged"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use viper_il::parser::parse;

    fn run(src: &str) -> (Module, LateCleanupStats) {
        let mut module = parse(src).unwrap();
        viper_il::verify::verify(&module).unwrap();
        let stats = late_cleanup(&mut module);
        viper_il::verify::verify(&module).unwrap();
        (module, stats)
    }

    #[test]
    fn test_no_change_single_iteration() {
        let (_, stats) = run("il 0.1\nfunc @noop() -> i64 {\nentry:\n  ret 0\n}\n");
        assert_eq!(stats.iterations, 1);
        assert_eq!(stats.instr_before, stats.instr_after);
        assert_eq!(stats.blocks_before, stats.blocks_after);
        assert_eq!(stats.instr_per_iter.len(), 1);
        assert_eq!(stats.blocks_per_iter.len(), 1);
    }

    #[test]
    fn test_dead_store_converges_within_bound() {
        let (_, stats) = run(
            "il 0.1\nfunc @deadcode() -> i64 {\nentry:\n  %slot = alloca 8\n  store i64, %slot, 7\n  ret 0\n}\n",
        );
        assert!(stats.instr_before > stats.instr_after);
        assert_eq!(stats.blocks_before, stats.blocks_after);
        assert!(stats.iterations <= MAX_ITERATIONS);
        assert_eq!(stats.instr_per_iter.len(), stats.iterations);
        for window in stats.instr_per_iter.windows(2) {
            assert!(window[1] <= window[0], "instruction count regressed");
        }
        for window in stats.blocks_per_iter.windows(2) {
            assert!(window[1] <= window[0], "block count regressed");
        }
    }

    #[test]
    fn test_cfg_and_dce_interleave() {
        // The constant branch exposes dead code only after the CFG
        // collapses, so convergence takes more than one iteration's
        // worth of shrinking.
        let (module, stats) = run(
            r#"il 0.1
extern @rt_abs_i64(i64) -> i64
func @f() -> i64 {
entry:
  %unused = call @rt_abs_i64(-3)
  cbr true, live, dead
live:
  ret 1
dead:
  %also_unused = call @rt_abs_i64(-4)
  ret 2
}
"#,
        );
        let function = &module.functions[0];
        assert_eq!(function.blocks.len(), 1);
        assert_eq!(function.blocks[0].instructions.len(), 1);
        assert!(stats.instr_after < stats.instr_before);
        assert!(stats.blocks_after < stats.blocks_before);
        assert!(stats.iterations <= MAX_ITERATIONS);
    }
}
