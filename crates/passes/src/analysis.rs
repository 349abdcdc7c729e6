//! Analysis registry, caching, and preservation bookkeeping
//!
//! Analyses are compute closures keyed by string id. The
//! `AnalysisRegistry` holds the closures; an `AnalysisManager` holds the
//! per-run caches and recompute counters. After every pass the manager is
//! handed the pass's `PreservedAnalyses` and drops whatever was not
//! preserved. Caches are scoped to a single pipeline run.
//!
//! Built-in analyses: `"cfg"` (predecessor/successor maps per block) and
//! `"liveness"` (per-block live-in/live-out SSA id sets).

use std::any::Any;
use std::collections::{HashMap, HashSet};

use viper_il::function::Function;
use viper_il::module::Module;

/// A pass's promise about which cached analyses remain valid.
#[derive(Debug, Clone, Default)]
pub struct PreservedAnalyses {
    all: bool,
    functions: HashSet<String>,
    modules: HashSet<String>,
}

impl PreservedAnalyses {
    /// Everything is preserved; caches stay warm.
    pub fn all() -> PreservedAnalyses {
        PreservedAnalyses {
            all: true,
            ..PreservedAnalyses::default()
        }
    }

    /// Nothing is preserved.
    pub fn none() -> PreservedAnalyses {
        PreservedAnalyses::default()
    }

    pub fn preserve_function(&mut self, id: impl Into<String>) -> &mut Self {
        self.functions.insert(id.into());
        self
    }

    pub fn preserve_module(&mut self, id: impl Into<String>) -> &mut Self {
        self.modules.insert(id.into());
        self
    }

    /// Shorthand for preserving the built-in CFG analysis.
    pub fn preserve_cfg(&mut self) -> &mut Self {
        self.preserve_function("cfg")
    }

    pub fn is_all(&self) -> bool {
        self.all
    }

    pub fn preserves_function(&self, id: &str) -> bool {
        self.all || self.functions.contains(id)
    }

    pub fn preserves_module(&self, id: &str) -> bool {
        self.all || self.modules.contains(id)
    }

    /// Intersection: what survives when both promises must hold.
    pub fn intersect(&mut self, other: &PreservedAnalyses) {
        if other.all {
            return;
        }
        if self.all {
            self.all = false;
            self.functions = other.functions.clone();
            self.modules = other.modules.clone();
            return;
        }
        self.functions.retain(|id| other.functions.contains(id));
        self.modules.retain(|id| other.modules.contains(id));
    }
}

type FnAnalysis = Box<dyn Fn(&Module, &Function) -> Box<dyn Any>>;
type ModAnalysis = Box<dyn Fn(&Module) -> Box<dyn Any>>;

/// Registered analysis compute functions, shared across runs.
#[derive(Default)]
pub struct AnalysisRegistry {
    function_analyses: HashMap<String, FnAnalysis>,
    module_analyses: HashMap<String, ModAnalysis>,
}

impl AnalysisRegistry {
    /// Registry pre-loaded with the built-in CFG and liveness analyses.
    pub fn with_builtins() -> AnalysisRegistry {
        let mut registry = AnalysisRegistry::default();
        registry.register_function_analysis("cfg", |_m, f| build_cfg(f));
        registry.register_function_analysis("liveness", |_m, f| compute_liveness(f));
        registry
    }

    pub fn register_function_analysis<T: 'static>(
        &mut self,
        id: impl Into<String>,
        compute: impl Fn(&Module, &Function) -> T + 'static,
    ) {
        self.function_analyses
            .insert(id.into(), Box::new(move |m, f| Box::new(compute(m, f))));
    }

    pub fn register_module_analysis<T: 'static>(
        &mut self,
        id: impl Into<String>,
        compute: impl Fn(&Module) -> T + 'static,
    ) {
        self.module_analyses
            .insert(id.into(), Box::new(move |m| Box::new(compute(m))));
    }
}

/// Scope of the pass whose preservation promise is being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassScope {
    Function,
    Module,
}

/// Per-run cache over an [`AnalysisRegistry`].
pub struct AnalysisManager<'r> {
    registry: &'r AnalysisRegistry,
    /// (analysis id, function name) → cached result
    function_cache: HashMap<(String, String), Box<dyn Any>>,
    module_cache: HashMap<String, Box<dyn Any>>,
    function_recomputes: usize,
    module_recomputes: usize,
}

impl<'r> AnalysisManager<'r> {
    pub fn new(registry: &'r AnalysisRegistry) -> AnalysisManager<'r> {
        AnalysisManager {
            registry,
            function_cache: HashMap::new(),
            module_cache: HashMap::new(),
            function_recomputes: 0,
            module_recomputes: 0,
        }
    }

    /// Cached result of a function-scoped analysis, computing on first
    /// request. Returns `None` for unregistered ids or wrong types.
    pub fn function_result<T: 'static>(
        &mut self,
        id: &str,
        module: &Module,
        function_name: &str,
    ) -> Option<&T> {
        let key = (id.to_string(), function_name.to_string());
        if !self.function_cache.contains_key(&key) {
            let compute = self.registry.function_analyses.get(id)?;
            let function = module.find_function(function_name)?;
            let value = compute(module, function);
            self.function_recomputes += 1;
            self.function_cache.insert(key.clone(), value);
        }
        self.function_cache.get(&key).and_then(|v| v.downcast_ref())
    }

    /// Cached result of a module-scoped analysis.
    pub fn module_result<T: 'static>(&mut self, id: &str, module: &Module) -> Option<&T> {
        if !self.module_cache.contains_key(id) {
            let compute = self.registry.module_analyses.get(id)?;
            let value = compute(module);
            self.module_recomputes += 1;
            self.module_cache.insert(id.to_string(), value);
        }
        self.module_cache.get(id).and_then(|v| v.downcast_ref())
    }

    /// Apply a completed pass's preservation promise to the caches.
    pub fn invalidate(&mut self, preserved: &PreservedAnalyses, scope: PassScope) {
        if preserved.is_all() {
            return;
        }
        match scope {
            PassScope::Function => {
                self.function_cache
                    .retain(|(id, _), _| preserved.preserves_function(id));
            }
            PassScope::Module => {
                // A module pass that did not preserve everything taints
                // every function-scoped result too.
                self.function_cache.clear();
            }
        }
        self.module_cache.retain(|id, _| preserved.preserves_module(id));
    }

    /// Recompute counters since the last [`take_counters`](Self::take_counters) call,
    /// as (function, module) recomputes.
    pub fn take_counters(&mut self) -> (usize, usize) {
        let counters = (self.function_recomputes, self.module_recomputes);
        self.function_recomputes = 0;
        self.module_recomputes = 0;
        counters
    }
}

/// Predecessor and successor labels per block.
#[derive(Debug, Clone, Default)]
pub struct CfgInfo {
    pub preds: HashMap<String, Vec<String>>,
    pub succs: HashMap<String, Vec<String>>,
}

impl CfgInfo {
    pub fn predecessors(&self, label: &str) -> &[String] {
        self.preds.get(label).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn successors(&self, label: &str) -> &[String] {
        self.succs.get(label).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Build CFG information from branch terminators.
pub fn build_cfg(function: &Function) -> CfgInfo {
    let mut info = CfgInfo::default();
    for block in &function.blocks {
        info.preds.entry(block.label.clone()).or_default();
        info.succs.entry(block.label.clone()).or_default();
    }
    for block in &function.blocks {
        let Some(terminator) = block.terminator() else {
            continue;
        };
        for label in &terminator.labels {
            info.succs
                .get_mut(&block.label)
                .expect("block present")
                .push(label.clone());
            info.preds.entry(label.clone()).or_default().push(block.label.clone());
        }
    }
    info
}

/// Per-block live-in/live-out sets over SSA ids.
#[derive(Debug, Clone, Default)]
pub struct LivenessInfo {
    live_in: HashMap<String, HashSet<u32>>,
    live_out: HashMap<String, HashSet<u32>>,
}

impl LivenessInfo {
    pub fn live_in(&self, label: &str) -> HashSet<u32> {
        self.live_in.get(label).cloned().unwrap_or_default()
    }

    pub fn live_out(&self, label: &str) -> HashSet<u32> {
        self.live_out.get(label).cloned().unwrap_or_default()
    }
}

/// Backward dataflow liveness. Block parameters are definitions at block
/// entry; branch arguments are uses in the predecessor.
pub fn compute_liveness(function: &Function) -> LivenessInfo {
    let cfg = build_cfg(function);

    // Per-block upward-exposed uses and definitions.
    let mut uses: HashMap<&str, HashSet<u32>> = HashMap::new();
    let mut defs: HashMap<&str, HashSet<u32>> = HashMap::new();
    for block in &function.blocks {
        let mut block_defs: HashSet<u32> = block.params.iter().map(|p| p.id).collect();
        if block.label == function.blocks[0].label {
            block_defs.extend(function.params.iter().map(|p| p.id));
        }
        let mut block_uses: HashSet<u32> = HashSet::new();
        for instr in &block.instructions {
            instr.for_each_value(|value| {
                if let viper_il::Value::Temp(id) = value {
                    if !block_defs.contains(id) {
                        block_uses.insert(*id);
                    }
                }
            });
            if let Some(result) = instr.result {
                block_defs.insert(result);
            }
        }
        uses.insert(&block.label, block_uses);
        defs.insert(&block.label, block_defs);
    }

    let mut info = LivenessInfo::default();
    for block in &function.blocks {
        info.live_in.insert(block.label.clone(), HashSet::new());
        info.live_out.insert(block.label.clone(), HashSet::new());
    }

    // Iterate to fixpoint; block count is small enough that the simple
    // round-robin schedule converges quickly.
    let mut changed = true;
    while changed {
        changed = false;
        for block in function.blocks.iter().rev() {
            let mut out: HashSet<u32> = HashSet::new();
            for succ in cfg.successors(&block.label) {
                if let Some(succ_in) = info.live_in.get(succ) {
                    out.extend(succ_in.iter().copied());
                }
            }
            let mut live_in = uses[block.label.as_str()].clone();
            for id in &out {
                if !defs[block.label.as_str()].contains(id) {
                    live_in.insert(*id);
                }
            }
            if info.live_out[&block.label] != out {
                info.live_out.insert(block.label.clone(), out);
                changed = true;
            }
            if info.live_in[&block.label] != live_in {
                info.live_in.insert(block.label.clone(), live_in);
                changed = true;
            }
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use viper_il::parser::parse;

    const DIAMOND: &str = r#"il 0.1.2
func @complex(%flag: i1) -> i64 {
entry(%flag: i1):
  %base = iadd.ovf 0, 1
  %incr = iadd.ovf %base, 1
  cbr %flag, left(%incr), right(%base)
left(%lv: i64):
  %left = iadd.ovf %lv, %incr
  br join(%left, %lv)
right(%rv: i64):
  %right = iadd.ovf %rv, %base
  br join(%right, %rv)
join(%x: i64, %y: i64):
  %sum = iadd.ovf %x, %y
  ret %sum
}
"#;

    fn id_of(function: &Function, name: &str) -> u32 {
        // Last binding wins, matching lexical shadowing in the text form.
        (0..function.value_names.len() as u32)
            .rev()
            .find(|id| function.value_name(*id) == Some(name))
            .expect("value name")
    }

    #[test]
    fn test_cfg_edges() {
        let module = parse(DIAMOND).unwrap();
        let cfg = build_cfg(&module.functions[0]);
        assert_eq!(
            cfg.successors("entry").to_vec(),
            vec!["left".to_string(), "right".to_string()]
        );
        let mut join_preds = cfg.predecessors("join").to_vec();
        join_preds.sort();
        assert_eq!(join_preds, vec!["left".to_string(), "right".to_string()]);
        assert!(cfg.predecessors("entry").is_empty());
    }

    #[test]
    fn test_liveness_diamond() {
        let module = parse(DIAMOND).unwrap();
        let function = &module.functions[0];
        let liveness = compute_liveness(function);

        let flag = id_of(function, "flag");
        let base = id_of(function, "base");
        let incr = id_of(function, "incr");

        assert!(liveness.live_in("entry").is_empty());
        let entry_out = liveness.live_out("entry");
        assert!(entry_out.contains(&base));
        assert!(entry_out.contains(&incr));
        assert!(!entry_out.contains(&flag));

        let left_in = liveness.live_in("left");
        assert!(left_in.contains(&incr));
        assert!(!left_in.contains(&base));
        assert!(liveness.live_out("left").is_empty());

        let right_in = liveness.live_in("right");
        assert!(right_in.contains(&base));
        assert!(!right_in.contains(&incr));

        assert!(liveness.live_in("join").is_empty());
        assert!(liveness.live_out("join").is_empty());
    }

    #[test]
    fn test_cache_and_invalidation() {
        let module = parse(DIAMOND).unwrap();
        let mut registry = AnalysisRegistry::with_builtins();
        let counter = std::rc::Rc::new(std::cell::Cell::new(0usize));
        let c2 = counter.clone();
        registry.register_function_analysis("count", move |_m, _f| {
            c2.set(c2.get() + 1);
            c2.get()
        });

        let mut am = AnalysisManager::new(&registry);
        let v1 = *am
            .function_result::<usize>("count", &module, "complex")
            .unwrap();
        let v2 = *am
            .function_result::<usize>("count", &module, "complex")
            .unwrap();
        assert_eq!(v1, 1);
        assert_eq!(v2, 1, "second query must hit the cache");
        assert_eq!(am.take_counters(), (1, 0));

        // A function pass preserving "count" keeps the cache warm.
        let mut preserved = PreservedAnalyses::none();
        preserved.preserve_function("count");
        am.invalidate(&preserved, PassScope::Function);
        let v3 = *am
            .function_result::<usize>("count", &module, "complex")
            .unwrap();
        assert_eq!(v3, 1);

        // A module pass preserving nothing clears function caches too.
        am.invalidate(&PreservedAnalyses::none(), PassScope::Module);
        let v4 = *am
            .function_result::<usize>("count", &module, "complex")
            .unwrap();
        assert_eq!(v4, 2, "cache must recompute after module-level invalidation");
    }

    #[test]
    fn test_preserve_all_keeps_everything() {
        let module = parse(DIAMOND).unwrap();
        let registry = AnalysisRegistry::with_builtins();
        let mut am = AnalysisManager::new(&registry);
        am.function_result::<CfgInfo>("cfg", &module, "complex").unwrap();
        am.take_counters();
        am.invalidate(&PreservedAnalyses::all(), PassScope::Module);
        am.function_result::<CfgInfo>("cfg", &module, "complex").unwrap();
        assert_eq!(am.take_counters(), (0, 0));
    }
}
