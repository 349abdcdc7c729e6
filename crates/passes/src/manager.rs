//! Pass registration, pipeline scheduling, and instrumentation
//!
//! The manager is a registry of closures keyed by string id, plus named
//! pipelines over those ids. Running a pipeline creates a fresh
//! [`AnalysisManager`] whose caches live exactly as long as the run;
//! after every pass the returned [`PreservedAnalyses`] drives cache
//! invalidation. An optional instrumentation stream receives one record
//! per executed pass: block and instruction deltas plus `F:N`/`M:N`
//! markers counting analysis recomputations.
//!
//! The standard transformation passes and the `O0`/`O1`/`O2` pipelines
//! are pre-registered; embedders may add or override both passes and
//! pipelines.

use std::collections::HashMap;
use std::io::Write;

use viper_il::diag::Diagnostic;
use viper_il::module::Module;
use viper_il::printer;

use crate::analysis::{AnalysisManager, AnalysisRegistry, PassScope, PreservedAnalyses};
use crate::constfold::const_fold;
use crate::dce::dce;
use crate::late_cleanup::late_cleanup;
use crate::mem2reg::mem2reg;
use crate::peephole::peephole;
use crate::sccp::sccp;
use crate::simplify_cfg::SimplifyCfg;

type ModulePassFn = Box<dyn Fn(&mut Module, &mut AnalysisManager) -> PreservedAnalyses>;
type FunctionPassFn = Box<dyn Fn(&mut Module, usize, &mut AnalysisManager) -> PreservedAnalyses>;

enum Pass {
    Module(ModulePassFn),
    Function(FunctionPassFn),
}

/// Preservation promise for a pass that reports whether it changed the
/// module: a no-op keeps every cached analysis valid.
fn preserved_if_unchanged(changed: bool) -> PreservedAnalyses {
    if changed {
        PreservedAnalyses::none()
    } else {
        PreservedAnalyses::all()
    }
}

/// Per-run options. All off by default; streams are caller-owned.
#[derive(Default)]
pub struct RunOptions<'a> {
    /// One record per executed pass lands here.
    pub instrumentation: Option<&'a mut dyn Write>,
    /// Dump the module before each pass to `dump`.
    pub print_before: bool,
    /// Dump the module after each pass to `dump`.
    pub print_after: bool,
    /// Re-verify the module after every pass.
    pub verify_each: bool,
    /// Destination for `print_before`/`print_after` dumps.
    pub dump: Option<&'a mut dyn Write>,
}

/// Registry and scheduler for transformation passes.
pub struct PassManager {
    passes: HashMap<String, Pass>,
    pipelines: HashMap<String, Vec<String>>,
    analyses: AnalysisRegistry,
}

impl PassManager {
    /// Manager pre-loaded with the standard passes, the built-in
    /// analyses, and the `O0`/`O1`/`O2` pipelines.
    pub fn new() -> PassManager {
        let mut pm = PassManager {
            passes: HashMap::new(),
            pipelines: HashMap::new(),
            analyses: AnalysisRegistry::with_builtins(),
        };

        pm.register_function_pass("simplify-cfg", |module, index, _am| {
            let (changed, _) = SimplifyCfg::new(true).run(&mut module.functions[index]);
            if changed {
                PreservedAnalyses::none()
            } else {
                PreservedAnalyses::all()
            }
        });
        // Passes that find no work preserve everything; only real
        // rewrites invalidate the caches.
        pm.register_module_pass("mem2reg", |module, _am| {
            preserved_if_unchanged(mem2reg(module, None))
        });
        pm.register_module_pass("constfold", |module, _am| {
            preserved_if_unchanged(const_fold(module))
        });
        pm.register_module_pass("peephole", |module, _am| {
            preserved_if_unchanged(peephole(module))
        });
        pm.register_module_pass("dce", |module, _am| preserved_if_unchanged(dce(module)));
        pm.register_module_pass("sccp", |module, _am| preserved_if_unchanged(sccp(module)));
        pm.register_module_pass("late-cleanup", |module, _am| {
            let stats = late_cleanup(module);
            if stats.instr_before == stats.instr_after && stats.blocks_before == stats.blocks_after
            {
                PreservedAnalyses::all()
            } else {
                PreservedAnalyses::none()
            }
        });

        pm.register_pipeline("O0", vec!["late-cleanup"]);
        pm.register_pipeline(
            "O1",
            vec![
                "simplify-cfg",
                "mem2reg",
                "simplify-cfg",
                "constfold",
                "peephole",
                "dce",
                "late-cleanup",
            ],
        );
        pm.register_pipeline(
            "O2",
            vec![
                "simplify-cfg",
                "mem2reg",
                "simplify-cfg",
                "sccp",
                "constfold",
                "peephole",
                "dce",
                "simplify-cfg",
                "dce",
                "late-cleanup",
            ],
        );
        pm.register_pipeline(
            "default",
            vec!["simplify-cfg", "mem2reg", "simplify-cfg", "constfold", "peephole", "dce"],
        );

        pm
    }

    /// Register (or override) a module-scoped pass.
    pub fn register_module_pass(
        &mut self,
        id: impl Into<String>,
        pass: impl Fn(&mut Module, &mut AnalysisManager) -> PreservedAnalyses + 'static,
    ) {
        self.passes.insert(id.into(), Pass::Module(Box::new(pass)));
    }

    /// Register (or override) a function-scoped pass. The closure
    /// receives the module and the index of the function to transform.
    pub fn register_function_pass(
        &mut self,
        id: impl Into<String>,
        pass: impl Fn(&mut Module, usize, &mut AnalysisManager) -> PreservedAnalyses + 'static,
    ) {
        self.passes.insert(id.into(), Pass::Function(Box::new(pass)));
    }

    /// Register an additional analysis usable by passes in this manager.
    pub fn register_function_analysis<T: 'static>(
        &mut self,
        id: impl Into<String>,
        compute: impl Fn(&Module, &viper_il::Function) -> T + 'static,
    ) {
        self.analyses.register_function_analysis(id, compute);
    }

    pub fn register_module_analysis<T: 'static>(
        &mut self,
        id: impl Into<String>,
        compute: impl Fn(&Module) -> T + 'static,
    ) {
        self.analyses.register_module_analysis(id, compute);
    }

    /// Register a named pipeline as an ordered list of pass ids.
    pub fn register_pipeline(&mut self, name: impl Into<String>, passes: Vec<impl Into<String>>) {
        self.pipelines
            .insert(name.into(), passes.into_iter().map(Into::into).collect());
    }

    pub fn pipeline(&self, name: &str) -> Option<&Vec<String>> {
        self.pipelines.get(name)
    }

    pub fn has_pass(&self, id: &str) -> bool {
        self.passes.contains_key(id)
    }

    /// Run a registered pipeline with default options.
    pub fn run_pipeline(&self, module: &mut Module, name: &str) -> Result<(), Diagnostic> {
        self.run_pipeline_with(module, name, &mut RunOptions::default())
    }

    /// Run a registered pipeline.
    pub fn run_pipeline_with(
        &self,
        module: &mut Module,
        name: &str,
        options: &mut RunOptions<'_>,
    ) -> Result<(), Diagnostic> {
        let Some(pass_ids) = self.pipelines.get(name) else {
            return Err(Diagnostic::error(format!("unknown pipeline '{}'", name)));
        };
        self.run_passes_with(module, pass_ids, options)
    }

    /// Run an explicit list of pass ids with default options.
    pub fn run_passes(&self, module: &mut Module, pass_ids: &[String]) -> Result<(), Diagnostic> {
        self.run_passes_with(module, pass_ids, &mut RunOptions::default())
    }

    /// Run an explicit list of pass ids. The pipeline aborts on the
    /// first failing pass or verification error.
    pub fn run_passes_with(
        &self,
        module: &mut Module,
        pass_ids: &[String],
        options: &mut RunOptions<'_>,
    ) -> Result<(), Diagnostic> {
        let mut am = AnalysisManager::new(&self.analyses);

        for id in pass_ids {
            let Some(pass) = self.passes.get(id.as_str()) else {
                return Err(Diagnostic::error(format!("unknown pass '{}'", id)));
            };

            let blocks_before = module.block_count();
            let instrs_before = module.instr_count();

            if options.print_before {
                if let Some(dump) = options.dump.as_mut() {
                    let _ = writeln!(dump, "// IL before {}", id);
                    let _ = dump.write_all(printer::print_pretty(module).as_bytes());
                }
            }

            match pass {
                Pass::Module(run) => {
                    let preserved = run(module, &mut am);
                    am.invalidate(&preserved, PassScope::Module);
                }
                Pass::Function(run) => {
                    let mut combined = PreservedAnalyses::all();
                    for index in 0..module.functions.len() {
                        let preserved = run(module, index, &mut am);
                        combined.intersect(&preserved);
                    }
                    am.invalidate(&combined, PassScope::Function);
                }
            }

            if options.verify_each {
                viper_il::verify::verify(module)
                    .map_err(|d| d.with_note(format!("after pass '{}'", id)))?;
            }

            if options.print_after {
                if let Some(dump) = options.dump.as_mut() {
                    let _ = writeln!(dump, "// IL after {}", id);
                    let _ = dump.write_all(printer::print_pretty(module).as_bytes());
                }
            }

            let (fn_recomputes, mod_recomputes) = am.take_counters();
            if let Some(stream) = options.instrumentation.as_mut() {
                let _ = writeln!(
                    stream,
                    "{}: bb {} -> {} inst {} -> {} F:{} M:{}",
                    id,
                    blocks_before,
                    module.block_count(),
                    instrs_before,
                    module.instr_count(),
                    fn_recomputes,
                    mod_recomputes,
                );
            }
        }
        Ok(())
    }
}

impl Default for PassManager {
    fn default() -> Self {
        PassManager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::CfgInfo;
    use std::cell::Cell;
    use std::rc::Rc;
    use viper_il::parser::parse;

    const TRIVIAL: &str = "il 0.1\nfunc @main() -> i64 {\nentry:\n  ret 0\n}\n";

    #[test]
    fn test_standard_pipelines_registered() {
        let pm = PassManager::new();
        for name in ["O0", "O1", "O2", "default"] {
            assert!(pm.pipeline(name).is_some(), "{} missing", name);
        }
        // O2 is a superset of O1's pass set.
        let o1 = pm.pipeline("O1").unwrap();
        let o2 = pm.pipeline("O2").unwrap();
        for id in o1 {
            assert!(o2.contains(id), "O2 must contain {}", id);
        }
        assert!(o2.contains(&"sccp".to_string()));
    }

    #[test]
    fn test_unknown_pipeline_and_pass_rejected() {
        let pm = PassManager::new();
        let mut module = parse(TRIVIAL).unwrap();
        let err = pm.run_pipeline(&mut module, "missing").unwrap_err();
        assert!(err.message.contains("unknown pipeline 'missing'"));
        let err = pm
            .run_passes(&mut module, &["nonsense".to_string()])
            .unwrap_err();
        assert!(err.message.contains("unknown pass 'nonsense'"));
    }

    #[test]
    fn test_pipelines_run_and_verify() {
        let src = r#"il 0.1
extern @rt_print_i64(i64) -> void
func @main() -> i64 {
entry:
  %slot = alloca 8
  store i64, %slot, 10
  %v = load i64, %slot
  %t = imul.ovf %v, 2
  %r = iadd.ovf %t, 0
  cbr true, a, b
a:
  call @rt_print_i64(%r)
  ret %r
b:
  ret 0
}
"#;
        for name in ["O0", "O1", "O2"] {
            let mut module = parse(src).unwrap();
            viper_il::verify::verify(&module).unwrap();
            let mut options = RunOptions {
                verify_each: true,
                ..RunOptions::default()
            };
            let pm = PassManager::new();
            pm.run_pipeline_with(&mut module, name, &mut options)
                .unwrap_or_else(|e| panic!("{}: {}", name, e));
            viper_il::verify::verify(&module)
                .unwrap_or_else(|e| panic!("{} broke the module: {}", name, e));
        }
    }

    #[test]
    fn test_analysis_caching_and_invalidation_markers() {
        let mut pm = PassManager::new();

        let computes = Rc::new(Cell::new(0usize));
        let counter = computes.clone();
        pm.register_function_analysis("count", move |_m, _f| {
            counter.set(counter.get() + 1);
            counter.get()
        });

        pm.register_function_pass("seed-analyses", |module, index, am| {
            let name = module.functions[index].name.clone();
            am.function_result::<usize>("count", module, &name).unwrap();
            am.function_result::<CfgInfo>("cfg", module, &name).unwrap();
            let mut preserved = PreservedAnalyses::none();
            preserved.preserve_function("count");
            preserved.preserve_cfg();
            preserved
        });
        pm.register_function_pass("reuse-cached", |module, index, am| {
            let name = module.functions[index].name.clone();
            let count = *am.function_result::<usize>("count", module, &name).unwrap();
            assert_eq!(count, 1, "cached analysis must be reused");
            am.function_result::<CfgInfo>("cfg", module, &name).unwrap();
            let mut preserved = PreservedAnalyses::none();
            preserved.preserve_function("count");
            preserved.preserve_cfg();
            preserved
        });
        pm.register_module_pass("module-invalidate", |_module, _am| PreservedAnalyses::none());
        pm.register_function_pass("recompute", |module, index, am| {
            let name = module.functions[index].name.clone();
            let count = *am.function_result::<usize>("count", module, &name).unwrap();
            assert_eq!(count, 2, "module invalidation must drop function analyses");
            am.function_result::<CfgInfo>("cfg", module, &name).unwrap();
            PreservedAnalyses::none()
        });
        pm.register_pipeline(
            "unit",
            vec!["seed-analyses", "reuse-cached", "module-invalidate", "recompute"],
        );

        let mut module = parse(TRIVIAL).unwrap();
        let mut sink = Vec::new();
        let mut options = RunOptions {
            instrumentation: Some(&mut sink),
            ..RunOptions::default()
        };
        pm.run_pipeline_with(&mut module, "unit", &mut options).unwrap();
        assert_eq!(computes.get(), 2);

        let log = String::from_utf8(sink).unwrap();
        assert!(log.contains("bb "), "{}", log);
        assert!(log.contains("inst "), "{}", log);
        let line_for = |id: &str| {
            log.lines()
                .find(|line| line.starts_with(id))
                .unwrap_or_else(|| panic!("no record for {}:\n{}", id, log))
                .to_string()
        };
        assert!(line_for("seed-analyses").contains("F:2"));
        assert!(line_for("reuse-cached").contains("F:0"));
        assert!(line_for("recompute").contains("F:2"));
    }

    #[test]
    fn test_noop_passes_preserve_caches() {
        // A module with nothing to optimise: every standard pass finds
        // no work, so an analysis seeded up front must survive the lot.
        let mut pm = PassManager::new();

        let computes = Rc::new(Cell::new(0usize));
        let counter = computes.clone();
        pm.register_function_analysis("count", move |_m, _f| {
            counter.set(counter.get() + 1);
            counter.get()
        });
        pm.register_function_pass("seed", |module, index, am| {
            let name = module.functions[index].name.clone();
            am.function_result::<usize>("count", module, &name).unwrap();
            let mut preserved = PreservedAnalyses::none();
            preserved.preserve_function("count");
            preserved
        });
        pm.register_function_pass("probe", |module, index, am| {
            let name = module.functions[index].name.clone();
            let count = *am.function_result::<usize>("count", module, &name).unwrap();
            assert_eq!(count, 1, "no-op passes must keep caches warm");
            PreservedAnalyses::all()
        });
        pm.register_pipeline(
            "noop",
            vec!["seed", "dce", "constfold", "peephole", "sccp", "mem2reg", "probe"],
        );

        let mut module = parse(TRIVIAL).unwrap();
        pm.run_pipeline(&mut module, "noop").unwrap();
        assert_eq!(computes.get(), 1);
    }

    #[test]
    fn test_verify_each_catches_broken_pass() {
        let mut pm = PassManager::new();
        pm.register_module_pass("saboteur", |module, _am| {
            // Drop a terminator to corrupt the module.
            module.functions[0].blocks[0].instructions.clear();
            PreservedAnalyses::none()
        });
        pm.register_pipeline("bad", vec!["saboteur"]);

        let mut module = parse(TRIVIAL).unwrap();
        let mut options = RunOptions {
            verify_each: true,
            ..RunOptions::default()
        };
        let err = pm
            .run_pipeline_with(&mut module, "bad", &mut options)
            .unwrap_err();
        assert!(err.message.contains("terminator"), "{}", err);
        assert!(err.notes.iter().any(|n| n.contains("saboteur")));
    }

    #[test]
    fn test_print_before_after_dumps() {
        let pm = PassManager::new();
        let mut module = parse(TRIVIAL).unwrap();
        let mut dump = Vec::new();
        let mut options = RunOptions {
            print_before: true,
            print_after: true,
            dump: Some(&mut dump),
            ..RunOptions::default()
        };
        pm.run_pipeline_with(&mut module, "O0", &mut options).unwrap();
        let text = String::from_utf8(dump).unwrap();
        assert!(text.contains("// IL before late-cleanup"));
        assert!(text.contains("// IL after late-cleanup"));
        assert!(text.contains("func @main()"));
    }
}
