//! Sparse conditional constant propagation
//!
//! Classic three-level lattice {undef, const, overdefined} driven by an
//! executable-edge worklist. Constants flow through pure instructions
//! and block parameters; terminators with constant conditions mark only
//! the taken edge executable. Evaluation defers to
//! [`constfold::eval`](crate::constfold::eval), so SCCP refuses to fold
//! exactly the operations constant folding refuses: trapping division,
//! checked overflow, and non-finite float results stay in the
//! instruction stream.
//!
//! After convergence the pass substitutes discovered constants into all
//! uses, rewrites constant-condition `cbr`/`switch.i32` terminators to
//! plain branches, and deletes the pure instructions whose results were
//! proven constant. Unreachable blocks are left for SimplifyCFG.

use std::collections::{HashMap, HashSet, VecDeque};

use viper_il::function::{Function, Instr};
use viper_il::module::Module;
use viper_il::opcode::Opcode;
use viper_il::value::Value;

use crate::constfold;

#[derive(Debug, Clone, PartialEq)]
enum Lattice {
    Undef,
    Const(Value),
    Over,
}

impl Lattice {
    fn meet(&self, other: &Lattice) -> Lattice {
        match (self, other) {
            (Lattice::Undef, x) | (x, Lattice::Undef) => x.clone(),
            (Lattice::Over, _) | (_, Lattice::Over) => Lattice::Over,
            (Lattice::Const(a), Lattice::Const(b)) => {
                if a.same_as(b) {
                    Lattice::Const(a.clone())
                } else {
                    Lattice::Over
                }
            }
        }
    }
}

/// Run SCCP over every function in the module. Returns whether any
/// constant or branch rewrite landed.
pub fn sccp(module: &mut Module) -> bool {
    let mut changed = false;
    for function in &mut module.functions {
        changed |= sccp_function(function);
    }
    changed
}

struct Solver<'f> {
    function: &'f Function,
    values: HashMap<u32, Lattice>,
    executable_blocks: HashSet<String>,
    executable_edges: HashSet<(String, String)>,
    block_worklist: VecDeque<String>,
}

impl<'f> Solver<'f> {
    fn value_of(&self, value: &Value) -> Lattice {
        match value {
            Value::Temp(id) => self
                .values
                .get(id)
                .cloned()
                .unwrap_or(Lattice::Undef),
            constant => Lattice::Const(constant.clone()),
        }
    }

    fn raise(&mut self, id: u32, new: Lattice) -> bool {
        let old = self.values.get(&id).cloned().unwrap_or(Lattice::Undef);
        let met = old.meet(&new);
        if met != old {
            self.values.insert(id, met);
            true
        } else {
            false
        }
    }

    fn mark_edge(&mut self, from: &str, to: &str) {
        if self
            .executable_edges
            .insert((from.to_string(), to.to_string()))
        {
            self.block_worklist.push_back(to.to_string());
        }
        if self.executable_blocks.insert(to.to_string()) {
            self.block_worklist.push_back(to.to_string());
        }
    }

    /// Re-meet a block's parameters over all currently-executable
    /// incoming edges. Returns true when any parameter moved.
    fn update_params(&mut self, label: &str) -> bool {
        let Some(block) = self.function.find_block(label) else {
            return false;
        };
        let mut changed = false;
        for (param_index, param) in block.params.iter().enumerate() {
            let mut incoming = Lattice::Undef;
            for pred in &self.function.blocks {
                let Some(terminator) = pred.terminator() else {
                    continue;
                };
                for (edge, target) in terminator.labels.iter().enumerate() {
                    if target != label {
                        continue;
                    }
                    if !self
                        .executable_edges
                        .contains(&(pred.label.clone(), label.to_string()))
                    {
                        continue;
                    }
                    if let Some(arg) = terminator
                        .br_args
                        .get(edge)
                        .and_then(|args| args.get(param_index))
                    {
                        incoming = incoming.meet(&self.value_of(arg));
                    }
                }
            }
            changed |= self.raise(param.id, incoming);
        }
        changed
    }

    fn visit_instr(&mut self, instr: &Instr) -> bool {
        let Some(result) = instr.result else {
            return false;
        };
        let operand_lattices: Vec<Lattice> =
            instr.operands.iter().map(|v| self.value_of(v)).collect();
        if operand_lattices.iter().any(|l| *l == Lattice::Over) {
            return self.raise(result, Lattice::Over);
        }
        if operand_lattices.iter().any(|l| *l == Lattice::Undef) {
            // Not enough information yet; stay optimistic.
            return false;
        }
        let constants: Vec<Value> = operand_lattices
            .iter()
            .map(|l| match l {
                Lattice::Const(v) => v.clone(),
                _ => unreachable!("filtered above"),
            })
            .collect();
        let computed = match instr.op {
            Opcode::Call => instr
                .callee
                .as_deref()
                .and_then(|c| constfold::eval_pure_helper(c, &constants)),
            _ => constfold::eval(instr.op, instr.ty, &constants),
        };
        match computed {
            Some(value) => self.raise(result, Lattice::Const(value)),
            // Possibly trapping or genuinely dynamic; pin overdefined so
            // nothing downstream folds on top of it.
            None => self.raise(result, Lattice::Over),
        }
    }

    fn visit_terminator(&mut self, label: &str, terminator: &Instr) {
        match terminator.op {
            Opcode::Br | Opcode::ResumeLabel => {
                for target in &terminator.labels {
                    self.mark_edge(label, target);
                }
            }
            Opcode::CBr => {
                match self.value_of(&terminator.operands[0]) {
                    Lattice::Const(Value::ConstInt { value, .. }) => {
                        let taken = if value != 0 { 0 } else { 1 };
                        self.mark_edge(label, &terminator.labels[taken]);
                    }
                    Lattice::Undef => {}
                    _ => {
                        for target in &terminator.labels {
                            self.mark_edge(label, target);
                        }
                    }
                }
            }
            Opcode::SwitchI32 => {
                match self.value_of(&terminator.operands[0]) {
                    Lattice::Const(Value::ConstInt { value, .. }) => {
                        let taken = selected_switch_edge(terminator, value);
                        self.mark_edge(label, &terminator.labels[taken]);
                    }
                    Lattice::Undef => {}
                    _ => {
                        for target in &terminator.labels {
                            self.mark_edge(label, target);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

/// Edge index a `switch.i32` takes for a known scrutinee: the matching
/// case edge, or the default edge 0.
fn selected_switch_edge(terminator: &Instr, scrutinee: i64) -> usize {
    for (case_index, case_value) in terminator.operands[1..].iter().enumerate() {
        if let Value::ConstInt { value, .. } = case_value {
            if *value == scrutinee {
                return case_index + 1;
            }
        }
    }
    0
}

fn sccp_function(function: &mut Function) -> bool {
    if function.blocks.is_empty() {
        return false;
    }

    let mut solver = Solver {
        function,
        values: HashMap::new(),
        executable_blocks: HashSet::new(),
        executable_edges: HashSet::new(),
        block_worklist: VecDeque::new(),
    };

    // Function parameters arrive from outside; nothing is known.
    for param in &solver.function.params {
        solver.values.insert(param.id, Lattice::Over);
    }
    let entry_label = solver.function.blocks[0].label.clone();
    for param in &solver.function.blocks[0].params {
        solver.values.insert(param.id, Lattice::Over);
    }
    solver.executable_blocks.insert(entry_label.clone());
    solver.block_worklist.push_back(entry_label);

    // Iterate block evaluations until the lattice stops moving. Each
    // block re-evaluation is cheap; the worklist drains quickly because
    // values only ever move down the lattice.
    let mut guard = 0usize;
    while let Some(label) = solver.block_worklist.pop_front() {
        guard += 1;
        if guard > 10_000 {
            break;
        }
        let changed_params = solver.update_params(&label);
        let Some(block) = solver.function.find_block(&label) else {
            continue;
        };
        let mut changed_any = changed_params;
        for instr in &block.instructions {
            changed_any |= solver.visit_instr(instr);
        }
        if let Some(terminator) = block.terminator() {
            solver.visit_terminator(&label, terminator);
        }
        if changed_any {
            // Downstream blocks see new operand facts.
            let succs: Vec<String> = block
                .terminator()
                .map(|t| t.labels.clone())
                .unwrap_or_default();
            for succ in succs {
                if solver.executable_blocks.contains(&succ) {
                    solver.block_worklist.push_back(succ);
                }
            }
        }
    }

    // Harvest: substitution map for proven constants.
    let constants: HashMap<u32, Value> = solver
        .values
        .iter()
        .filter_map(|(id, lattice)| match lattice {
            Lattice::Const(v) => Some((*id, v.clone())),
            _ => None,
        })
        .collect();
    let executable = solver.executable_blocks.clone();

    if constants.is_empty() && executable.len() == function.blocks.len() {
        return false;
    }

    let mut rewrites = 0usize;
    for block in &mut function.blocks {
        if !executable.contains(&block.label) {
            continue;
        }
        for instr in &mut block.instructions {
            instr.for_each_value_mut(|value| {
                if let Value::Temp(id) = value {
                    if let Some(constant) = constants.get(id) {
                        *value = constant.clone();
                    }
                }
            });
        }

        // Constant-condition terminators collapse to the taken edge.
        let Some(terminator) = block.terminator_mut() else {
            continue;
        };
        let taken = match terminator.op {
            Opcode::CBr => match &terminator.operands[0] {
                Value::ConstInt { value, .. } => Some(if *value != 0 { 0 } else { 1 }),
                _ => None,
            },
            Opcode::SwitchI32 => match &terminator.operands[0] {
                Value::ConstInt { value, .. } => Some(selected_switch_edge(terminator, *value)),
                _ => None,
            },
            _ => None,
        };
        if let Some(taken) = taken {
            let mut br = Instr::new(Opcode::Br);
            br.labels.push(terminator.labels[taken].clone());
            br.br_args.push(terminator.br_args[taken].clone());
            br.loc = terminator.loc;
            *terminator = br;
            rewrites += 1;
        }
    }

    // Instructions whose result is a proven constant evaluated without a
    // trap; they are pure by construction and now unreferenced.
    for block in &mut function.blocks {
        if !executable.contains(&block.label) {
            continue;
        }
        // Only `eval`/`eval_pure_helper` produce Const results, so any
        // instruction landing in the map is pure and trap-free.
        block
            .instructions
            .retain(|instr| !instr.result.is_some_and(|r| constants.contains_key(&r)));
    }

    if rewrites > 0 || !constants.is_empty() {
        tracing::debug!(
            target: "sccp",
            function = %function.name,
            constants = constants.len(),
            branches = rewrites,
            "propagated constants"
        );
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simplify_cfg::SimplifyCfg;
    use viper_il::parser::parse;

    fn run_sccp_and_cleanup(src: &str) -> Module {
        let mut module = parse(src).unwrap();
        viper_il::verify::verify(&module).unwrap();
        sccp(&mut module);
        for function in &mut module.functions {
            SimplifyCfg::new(true).run(function);
        }
        viper_il::verify::verify(&module).unwrap();
        module
    }

    #[test]
    fn test_folds_constant_branch_and_phi() {
        let module = run_sccp_and_cleanup(
            r#"il 0.1
func @phi_branch() -> i64 {
entry:
  cbr true, left, right
left:
  br join(4)
right:
  br join(8)
join(%phi: i64):
  %is_four = icmp.eq %phi, 4
  cbr %is_four, ret_true(%phi), ret_false(%phi)
ret_true(%value: i64):
  ret %value
ret_false(%fallback: i64):
  ret %fallback
}
"#,
        );
        let function = &module.functions[0];
        assert!(function.find_block("right").is_none());
        assert!(function.find_block("ret_false").is_none());
        let mut found_ret = false;
        for block in &function.blocks {
            for instr in &block.instructions {
                if instr.op == Opcode::Ret {
                    assert_eq!(instr.operands[0], Value::const_int(4));
                    found_ret = true;
                }
            }
        }
        assert!(found_ret);
    }

    #[test]
    fn test_does_not_fold_trapping_division() {
        let mut module = parse(
            r#"il 0.1
func @trap_guard() -> i64 {
entry:
  %div = sdiv.chk0 8, 0
  %cmp = icmp.eq %div, 0
  cbr %cmp, lhs, rhs
lhs:
  ret 1
rhs:
  ret 2
}
"#,
        )
        .unwrap();
        sccp(&mut module);
        let entry = &module.functions[0].blocks[0];
        assert_eq!(entry.instructions[0].op, Opcode::SDivChk0);
        assert_eq!(entry.instructions[0].operands[1], Value::const_int(0));
        let terminator = entry.terminator().unwrap();
        assert_eq!(terminator.op, Opcode::CBr);
        assert!(matches!(terminator.operands[0], Value::Temp(_)));
    }

    #[test]
    fn test_rewrites_switch_on_constant() {
        let module = run_sccp_and_cleanup(
            r#"il 0.1
func @sw() -> i64 {
entry:
  switch.i32 3, default(7), 3 -> hit(42)
default(%d: i64):
  ret %d
hit(%h: i64):
  ret %h
}
"#,
        );
        let function = &module.functions[0];
        assert_eq!(function.blocks.len(), 1);
        let ret = function.blocks[0].instructions.last().unwrap();
        assert_eq!(ret.op, Opcode::Ret);
        assert_eq!(ret.operands[0], Value::const_int(42));
        assert!(function.find_block("default").is_none());
        assert!(function.find_block("hit").is_none());
    }

    #[test]
    fn test_constants_flow_through_params() {
        let module = run_sccp_and_cleanup(
            r#"il 0.1
func @flow() -> i64 {
entry:
  br a(2)
a(%x: i64):
  %y = imul.ovf %x, 3
  br b(%y)
b(%z: i64):
  %w = iadd.ovf %z, 1
  ret %w
}
"#,
        );
        let function = &module.functions[0];
        assert_eq!(function.blocks.len(), 1);
        let ret = function.blocks[0].instructions.last().unwrap();
        assert_eq!(ret.operands[0], Value::const_int(7));
    }

    #[test]
    fn test_const_f64_propagates() {
        let mut module = parse(
            r#"il 0.1
func @floats() -> f64 {
entry:
  %c = const_f64 1.5
  %d = fadd %c, 2.0
  ret %d
}
"#,
        )
        .unwrap();
        sccp(&mut module);
        let ret = module.functions[0].blocks[0].instructions.last().unwrap();
        assert_eq!(ret.operands[0], Value::const_float(3.5));
    }
}
