//! Programmatic IR construction
//!
//! `IrBuilder` is the in-memory counterpart of the text parser: frontends
//! and tests use it to assemble modules without going through text. It
//! tracks an insert point (function index + block index) and hands out
//! fresh SSA ids from the current function's `value_names` table.

use crate::function::{BasicBlock, Function, Instr, Param};
use crate::module::{Extern, Global, Module};
use crate::opcode::Opcode;
use crate::types::Type;
use crate::value::Value;

/// Builder over a caller-owned module
pub struct IrBuilder<'m> {
    module: &'m mut Module,
    /// Insert point: (function index, block index)
    insert: Option<(usize, usize)>,
}

impl<'m> IrBuilder<'m> {
    pub fn new(module: &'m mut Module) -> IrBuilder<'m> {
        IrBuilder { module, insert: None }
    }

    pub fn add_extern(&mut self, name: impl Into<String>, ret_type: Type, params: Vec<Type>) {
        self.module.externs.push(Extern {
            name: name.into(),
            ret_type,
            params,
        });
    }

    pub fn add_global_str(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.module.globals.push(Global {
            name: name.into(),
            ty: Type::Str,
            is_const: true,
            init: Value::const_str(value.into()),
        });
    }

    /// Begin a new function; its parameters receive the first SSA ids.
    /// Returns the function index (stable across later pushes).
    pub fn start_function(
        &mut self,
        name: impl Into<String>,
        ret_type: Type,
        params: Vec<(String, Type)>,
    ) -> usize {
        let mut function = Function::new(name, ret_type);
        for (pname, pty) in params {
            let id = function.new_temp(Some(&pname));
            function.params.push(Param {
                name: pname,
                ty: pty,
                id,
            });
        }
        self.module.functions.push(function);
        let index = self.module.functions.len() - 1;
        self.insert = None;
        index
    }

    /// Append an empty block to a function and return its index.
    pub fn create_block(&mut self, fn_index: usize, label: impl Into<String>) -> usize {
        let function = &mut self.module.functions[fn_index];
        function.blocks.push(BasicBlock::new(label));
        function.blocks.len() - 1
    }

    /// Append a block whose parameters mirror the function's own; used
    /// for entry blocks of functions with parameters.
    pub fn create_entry_block(&mut self, fn_index: usize) -> usize {
        let function = &mut self.module.functions[fn_index];
        let params = function.params.clone();
        let mut block = BasicBlock::new("entry");
        block.params = params;
        function.blocks.push(block);
        function.blocks.len() - 1
    }

    pub fn set_insert_point(&mut self, fn_index: usize, block_index: usize) {
        self.insert = Some((fn_index, block_index));
    }

    /// Reserve a fresh unnamed SSA id in the insert-point function.
    pub fn reserve_temp_id(&mut self) -> u32 {
        let (fn_index, _) = self.insert.expect("insert point not set");
        self.module.functions[fn_index].new_temp(None)
    }

    /// Add a parameter to a block, allocating its SSA id.
    pub fn add_block_param(
        &mut self,
        fn_index: usize,
        block_index: usize,
        name: &str,
        ty: Type,
    ) -> u32 {
        let function = &mut self.module.functions[fn_index];
        let id = function.new_temp(Some(name));
        function.blocks[block_index].params.push(Param {
            name: name.to_string(),
            ty,
            id,
        });
        id
    }

    fn push(&mut self, instr: Instr) {
        let (fn_index, block_index) = self.insert.expect("insert point not set");
        self.module.functions[fn_index].blocks[block_index]
            .instructions
            .push(instr);
    }

    /// Emit a two-operand instruction and return its result temp.
    pub fn emit_binary(&mut self, op: Opcode, ty: Type, lhs: Value, rhs: Value) -> Value {
        let id = self.reserve_temp_id();
        let mut instr = Instr::new(op);
        instr.result = Some(id);
        instr.ty = ty;
        instr.operands = vec![lhs, rhs];
        self.push(instr);
        Value::temp(id)
    }

    pub fn emit_const_str(&mut self, global: &str) -> Value {
        let id = self.reserve_temp_id();
        let mut instr = Instr::new(Opcode::ConstStr);
        instr.result = Some(id);
        instr.operands = vec![Value::global_addr(global)];
        self.push(instr);
        Value::temp(id)
    }

    pub fn emit_call(
        &mut self,
        callee: &str,
        args: Vec<Value>,
        result_type: Option<Type>,
    ) -> Option<Value> {
        let result = result_type.map(|_| self.reserve_temp_id());
        let mut instr = Instr::new(Opcode::Call);
        instr.callee = Some(callee.to_string());
        instr.operands = args;
        instr.result = result;
        instr.ty = result_type.unwrap_or(Type::Void);
        self.push(instr);
        result.map(Value::temp)
    }

    pub fn emit_br(&mut self, target: &str, args: Vec<Value>) {
        let mut instr = Instr::new(Opcode::Br);
        instr.labels.push(target.to_string());
        instr.br_args.push(args);
        self.push(instr);
    }

    pub fn emit_cbr(
        &mut self,
        cond: Value,
        then_label: &str,
        then_args: Vec<Value>,
        else_label: &str,
        else_args: Vec<Value>,
    ) {
        let mut instr = Instr::new(Opcode::CBr);
        instr.operands.push(cond);
        instr.labels.push(then_label.to_string());
        instr.labels.push(else_label.to_string());
        instr.br_args.push(then_args);
        instr.br_args.push(else_args);
        self.push(instr);
    }

    pub fn emit_ret(&mut self, value: Option<Value>) {
        let mut instr = Instr::new(Opcode::Ret);
        if let Some(v) = value {
            instr.operands.push(v);
        }
        self.push(instr);
    }

    pub fn emit_trap(&mut self) {
        self.push(Instr::new(Opcode::Trap));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_minimal_function() {
        let mut module = Module::new();
        let mut b = IrBuilder::new(&mut module);
        let f = b.start_function("main", Type::I64, Vec::new());
        let entry = b.create_block(f, "entry");
        b.set_insert_point(f, entry);
        let sum = b.emit_binary(
            Opcode::IAddOvf,
            Type::I64,
            Value::const_int(1),
            Value::const_int(2),
        );
        b.emit_ret(Some(sum));

        let function = &module.functions[0];
        assert_eq!(function.blocks.len(), 1);
        assert_eq!(function.blocks[0].instructions.len(), 2);
        assert_eq!(function.value_names.len(), 1);
    }

    #[test]
    fn test_function_params_get_ids() {
        let mut module = Module::new();
        let mut b = IrBuilder::new(&mut module);
        let f = b.start_function(
            "f",
            Type::I64,
            vec![("x".to_string(), Type::I64), ("y".to_string(), Type::I64)],
        );
        b.create_entry_block(f);
        let function = &module.functions[0];
        assert_eq!(function.params[0].id, 0);
        assert_eq!(function.params[1].id, 1);
        assert_eq!(function.blocks[0].params.len(), 2);
    }
}
