//! Functions, basic blocks, and instructions
//!
//! Blocks live in a `Vec` owned by their function and reference each
//! other by label; instructions reference values by SSA id. Branch
//! instructions keep two parallel vectors: `labels[i]` names the i-th
//! successor and `br_args[i]` is the argument vector delivered to that
//! successor's parameters. Keeping the vectors parallel is the invariant
//! every CFG rewrite in the pass pipeline must re-establish before it
//! returns.

use crate::diag::SourceLoc;
use crate::opcode::Opcode;
use crate::types::Type;
use crate::value::Value;

/// A named, typed SSA value introduced by a function or block header
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub id: u32,
}

/// A single IL instruction
#[derive(Debug, Clone)]
pub struct Instr {
    pub op: Opcode,
    /// Result SSA id for value-producing instructions
    pub result: Option<u32>,
    /// Result type (or the access type for load/store)
    pub ty: Type,
    pub operands: Vec<Value>,
    /// Callee symbol for `call` instructions
    pub callee: Option<String>,
    /// Successor labels for branch-family instructions
    pub labels: Vec<String>,
    /// Arguments passed to each successor, parallel to `labels`
    pub br_args: Vec<Vec<Value>>,
    pub loc: Option<SourceLoc>,
}

impl Instr {
    pub fn new(op: Opcode) -> Instr {
        Instr {
            op,
            result: None,
            ty: op.default_result_type(),
            operands: Vec::new(),
            callee: None,
            labels: Vec::new(),
            br_args: Vec::new(),
            loc: None,
        }
    }

    /// Index of `label` in this instruction's successor list.
    pub fn label_index(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Iterate every value operand, including branch arguments.
    pub fn for_each_value(&self, mut f: impl FnMut(&Value)) {
        for op in &self.operands {
            f(op);
        }
        for args in &self.br_args {
            for arg in args {
                f(arg);
            }
        }
    }

    /// Mutable counterpart of [`for_each_value`](Self::for_each_value).
    pub fn for_each_value_mut(&mut self, mut f: impl FnMut(&mut Value)) {
        for op in &mut self.operands {
            f(op);
        }
        for args in &mut self.br_args {
            for arg in args {
                f(arg);
            }
        }
    }
}

// Source locations are debug metadata; two instructions that differ only
// in location are the same instruction. This keeps the parse/print
// round-trip identity exact.
impl PartialEq for Instr {
    fn eq(&self, other: &Self) -> bool {
        self.op == other.op
            && self.result == other.result
            && self.ty == other.ty
            && self.operands == other.operands
            && self.callee == other.callee
            && self.labels == other.labels
            && self.br_args == other.br_args
    }
}

/// A basic block: label, parameters, and an instruction list ending in a
/// terminator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicBlock {
    pub label: String,
    pub params: Vec<Param>,
    pub instructions: Vec<Instr>,
}

impl BasicBlock {
    pub fn new(label: impl Into<String>) -> BasicBlock {
        BasicBlock {
            label: label.into(),
            params: Vec::new(),
            instructions: Vec::new(),
        }
    }

    /// The block's terminator, when the last instruction is one.
    pub fn terminator(&self) -> Option<&Instr> {
        self.instructions.last().filter(|i| i.op.is_terminator())
    }

    pub fn terminator_mut(&mut self) -> Option<&mut Instr> {
        self.instructions.last_mut().filter(|i| i.op.is_terminator())
    }
}

/// A function definition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Function {
    pub name: String,
    pub ret_type: Type,
    pub params: Vec<Param>,
    /// Basic blocks; index 0 is the entry block
    pub blocks: Vec<BasicBlock>,
    /// Display names indexed by SSA id; one slot per live id
    pub value_names: Vec<Option<String>>,
    /// Free-form attributes from the optional `[...]` bracket in the
    /// header; serialised in sorted order
    pub attrs: Vec<String>,
}

impl Function {
    pub fn new(name: impl Into<String>, ret_type: Type) -> Function {
        Function {
            name: name.into(),
            ret_type,
            ..Function::default()
        }
    }

    pub fn entry(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    pub fn find_block(&self, label: &str) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.label == label)
    }

    pub fn find_block_mut(&mut self, label: &str) -> Option<&mut BasicBlock> {
        self.blocks.iter_mut().find(|b| b.label == label)
    }

    pub fn block_index(&self, label: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }

    /// Allocate a fresh SSA id with an optional display name.
    pub fn new_temp(&mut self, name: Option<&str>) -> u32 {
        let id = self.value_names.len() as u32;
        self.value_names.push(name.map(str::to_string));
        id
    }

    /// Display name of an SSA id, when one was recorded.
    pub fn value_name(&self, id: u32) -> Option<&str> {
        self.value_names.get(id as usize).and_then(|n| n.as_deref())
    }

    /// Labels of blocks that are exception-handling resume targets.
    /// SimplifyCFG refuses to rewrite these.
    pub fn eh_sensitive_labels(&self) -> std::collections::HashSet<String> {
        let mut labels = std::collections::HashSet::new();
        for block in &self.blocks {
            for instr in &block.instructions {
                if instr.op == Opcode::ResumeLabel {
                    for label in &instr.labels {
                        labels.insert(label.clone());
                    }
                }
            }
        }
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminator_detection() {
        let mut bb = BasicBlock::new("entry");
        assert!(bb.terminator().is_none());

        let mut add = Instr::new(Opcode::IAdd);
        add.result = Some(0);
        add.operands = vec![Value::const_int(1), Value::const_int(2)];
        bb.instructions.push(add);
        assert!(bb.terminator().is_none());

        let mut ret = Instr::new(Opcode::Ret);
        ret.operands = vec![Value::temp(0)];
        bb.instructions.push(ret);
        assert!(bb.terminator().is_some());
    }

    #[test]
    fn test_temp_allocation_tracks_names() {
        let mut f = Function::new("main", Type::I64);
        let a = f.new_temp(Some("x"));
        let b = f.new_temp(None);
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(f.value_name(a), Some("x"));
        assert_eq!(f.value_name(b), None);
    }

    #[test]
    fn test_eh_sensitive_labels() {
        let mut f = Function::new("f", Type::Void);
        let mut entry = BasicBlock::new("entry");
        let mut resume = Instr::new(Opcode::ResumeLabel);
        resume.labels.push("handler".to_string());
        resume.br_args.push(Vec::new());
        entry.instructions.push(resume);
        f.blocks.push(entry);
        f.blocks.push(BasicBlock::new("handler"));
        let labels = f.eh_sensitive_labels();
        assert!(labels.contains("handler"));
        assert!(!labels.contains("entry"));
    }
}
