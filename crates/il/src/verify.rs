//! Structural and type verification
//!
//! Stateless validation of a whole module: symbol uniqueness, call-site
//! signatures, terminator placement, pointer discipline, branch argument
//! arity, and the runtime array handle lifetime rules. Verification
//! reports the first violation and stops; valid IL flows through
//! untouched. Order matters only in that externs and globals are checked
//! before function bodies so call-site checks can rely on declarations.

use std::collections::{HashMap, HashSet};

use crate::diag::Diagnostic;
use crate::effects;
use crate::function::{BasicBlock, Function, Instr};
use crate::module::Module;
use crate::opcode::Opcode;
use crate::types::Type;
use crate::value::Value;

/// Verify a module against the IL rules.
pub fn verify(module: &Module) -> Result<(), Diagnostic> {
    let mut extern_names = HashSet::new();
    for ext in &module.externs {
        if !extern_names.insert(ext.name.as_str()) {
            return Err(Diagnostic::error(format!("duplicate extern @{}", ext.name)));
        }
    }

    let mut global_names = HashSet::new();
    for global in &module.globals {
        if !global_names.insert(global.name.as_str()) {
            return Err(Diagnostic::error(format!("duplicate global @{}", global.name)));
        }
        if let Value::GlobalAddr(target) = &global.init {
            if module.find_global(target).is_none() && module.find_function(target).is_none() {
                return Err(Diagnostic::error(format!(
                    "global @{} references unknown symbol @{}",
                    global.name, target
                )));
            }
        }
    }

    let mut function_names = HashSet::new();
    for function in &module.functions {
        if !function_names.insert(function.name.as_str()) {
            return Err(Diagnostic::error(format!(
                "duplicate function @{}",
                function.name
            )));
        }
        if extern_names.contains(function.name.as_str()) {
            return Err(Diagnostic::error(format!(
                "function @{} collides with extern of the same name",
                function.name
            )));
        }
    }

    for function in &module.functions {
        verify_function(module, function)
            .map_err(|d| d.with_note(format!("in function @{}", function.name)))?;
    }
    Ok(())
}

/// Callee signature visible at a call site.
struct Signature {
    ret_type: Type,
    params: Vec<Type>,
}

fn callee_signature(module: &Module, name: &str) -> Option<Signature> {
    if let Some(ext) = module.find_extern(name) {
        return Some(Signature {
            ret_type: ext.ret_type,
            params: ext.params.clone(),
        });
    }
    // Forward calls are allowed: functions resolve regardless of order.
    if let Some(f) = module.find_function(name) {
        return Some(Signature {
            ret_type: f.ret_type,
            params: f.params.iter().map(|p| p.ty).collect(),
        });
    }
    None
}

/// Map every SSA id to its definition type.
fn value_types(module: &Module, function: &Function) -> HashMap<u32, Type> {
    let mut types = HashMap::new();
    for param in &function.params {
        types.insert(param.id, param.ty);
    }
    for block in &function.blocks {
        for param in &block.params {
            types.insert(param.id, param.ty);
        }
        for instr in &block.instructions {
            if let Some(result) = instr.result {
                let ty = match instr.op {
                    Opcode::Call => instr
                        .callee
                        .as_deref()
                        .and_then(|c| callee_signature(module, c))
                        .map(|s| s.ret_type)
                        .unwrap_or(instr.ty),
                    _ => instr.ty,
                };
                types.insert(result, ty);
            }
        }
    }
    types
}

fn type_of_value(value: &Value, types: &HashMap<u32, Type>) -> Option<Type> {
    match value {
        Value::Temp(id) => types.get(id).copied(),
        Value::ConstInt { is_bool: true, .. } => Some(Type::I1),
        Value::ConstInt { .. } => Some(Type::I64),
        Value::ConstFloat(_) => Some(Type::F64),
        Value::ConstStr(_) => Some(Type::Str),
        Value::GlobalAddr(_) => Some(Type::Ptr),
        Value::NullPtr => Some(Type::Ptr),
    }
}

/// Loose compatibility for call arguments and stores: integer constants
/// satisfy any integer slot wide enough to hold them, float constants
/// satisfy either float width, and global addresses satisfy both `ptr`
/// and `str` slots (string constants live behind globals).
fn value_matches(value: &Value, expected: Type, types: &HashMap<u32, Type>) -> bool {
    match value {
        Value::ConstInt { value, is_bool } => match expected {
            Type::I1 => *is_bool || *value == 0 || *value == 1,
            Type::I16 | Type::I32 | Type::I64 => {
                let (lo, hi) = expected.signed_range().expect("integer type");
                !*is_bool && *value >= lo && *value <= hi
            }
            _ => false,
        },
        Value::ConstFloat(_) => expected.is_float(),
        Value::ConstStr(_) => expected == Type::Str,
        Value::GlobalAddr(_) => expected == Type::Ptr || expected == Type::Str,
        Value::NullPtr => expected == Type::Ptr,
        Value::Temp(_) => type_of_value(value, types) == Some(expected),
    }
}

fn verify_function(module: &Module, function: &Function) -> Result<(), Diagnostic> {
    if function.blocks.is_empty() {
        return Err(Diagnostic::error("function has no blocks"));
    }

    let mut labels = HashSet::new();
    for block in &function.blocks {
        if !labels.insert(block.label.as_str()) {
            return Err(Diagnostic::error(format!(
                "duplicate block label '{}'",
                block.label
            )));
        }
    }

    let types = value_types(module, function);

    for block in &function.blocks {
        verify_block(module, function, block, &types)?;
    }

    verify_release_discipline(function)?;
    Ok(())
}

fn verify_block(
    module: &Module,
    function: &Function,
    block: &BasicBlock,
    types: &HashMap<u32, Type>,
) -> Result<(), Diagnostic> {
    let Some(last) = block.instructions.last() else {
        return Err(Diagnostic::error(format!(
            "missing terminator in block '{}'",
            block.label
        )));
    };
    if !last.op.is_terminator() {
        return Err(Diagnostic::error(format!(
            "missing terminator in block '{}'",
            block.label
        )));
    }
    for instr in &block.instructions[..block.instructions.len() - 1] {
        if instr.op.is_terminator() {
            return Err(at(
                instr,
                format!(
                    "terminator must be last: '{}' appears mid-block in '{}'",
                    instr.op, block.label
                ),
            ));
        }
    }

    for instr in &block.instructions {
        verify_instr(module, function, block, instr, types)?;
    }
    Ok(())
}

fn at(instr: &Instr, message: String) -> Diagnostic {
    match instr.loc {
        Some(loc) => Diagnostic::error(message).at(loc),
        None => Diagnostic::error(message),
    }
}

fn verify_instr(
    module: &Module,
    function: &Function,
    block: &BasicBlock,
    instr: &Instr,
    types: &HashMap<u32, Type>,
) -> Result<(), Diagnostic> {
    if instr.op.requires_result() && instr.result.is_none() {
        return Err(at(instr, format!("missing result for '{}'", instr.op)));
    }
    if let Some(arity) = instr.op.fixed_arity() {
        let expected = match instr.op {
            // Store carries [ptr, value]; the type token is not an operand.
            Opcode::Store => 2,
            Opcode::Load => 1,
            _ => arity,
        };
        if instr.operands.len() != expected {
            return Err(at(
                instr,
                format!(
                    "'{}' expects {} operand{}, got {}",
                    instr.op,
                    expected,
                    if expected == 1 { "" } else { "s" },
                    instr.operands.len()
                ),
            ));
        }
    }

    match instr.op {
        Opcode::Call => verify_call(module, instr, types)?,
        Opcode::CallIndirect => {
            let target_ok = matches!(
                instr.operands.first(),
                Some(Value::GlobalAddr(_)) | Some(Value::Temp(_))
            );
            if !target_ok {
                return Err(at(instr, "call.indirect target must be a function address".into()));
            }
        }
        Opcode::Load | Opcode::Store => {
            let ptr_ty = type_of_value(&instr.operands[0], types);
            if ptr_ty != Some(Type::Ptr) {
                return Err(at(
                    instr,
                    format!(
                        "operand 0 pointer type mismatch for '{}': found {}",
                        instr.op,
                        ptr_ty.map_or("unknown", |t| t.name())
                    ),
                ));
            }
            if instr.op == Opcode::Store {
                if let Value::ConstInt { value, is_bool: false } = &instr.operands[1] {
                    if let Some((lo, hi)) = instr.ty.signed_range() {
                        if *value < lo || *value > hi {
                            return Err(at(
                                instr,
                                format!(
                                    "operand 1 constant out of range for {}: value out of range for store type",
                                    instr.ty
                                ),
                            ));
                        }
                    }
                }
            }
        }
        Opcode::Gep => {
            let index_ty = type_of_value(&instr.operands[1], types);
            if index_ty != Some(Type::I64) {
                return Err(at(instr, "gep operand 1 must be i64".into()));
            }
        }
        Opcode::CBr => {
            let cond_ty = type_of_value(&instr.operands[0], types);
            if cond_ty != Some(Type::I1) {
                return Err(at(instr, "cbr condition must be i1".into()));
            }
        }
        Opcode::Ret => {
            let expects_value = function.ret_type != Type::Void;
            if expects_value && instr.operands.is_empty() {
                return Err(at(
                    instr,
                    format!("ret requires a value in function returning {}", function.ret_type),
                ));
            }
            if !expects_value && !instr.operands.is_empty() {
                return Err(at(instr, "ret takes no value in void function".into()));
            }
        }
        _ => {}
    }

    if instr.op.is_branch() {
        verify_branch(function, block, instr)?;
    }
    Ok(())
}

fn verify_call(
    module: &Module,
    instr: &Instr,
    types: &HashMap<u32, Type>,
) -> Result<(), Diagnostic> {
    let callee = instr.callee.as_deref().unwrap_or("");
    let Some(signature) = callee_signature(module, callee) else {
        return Err(at(instr, format!("unknown callee @{}", callee)));
    };
    if instr.operands.len() != signature.params.len() {
        return Err(at(
            instr,
            format!(
                "call arg count mismatch for @{}: expected {}, got {}",
                callee,
                signature.params.len(),
                instr.operands.len()
            ),
        ));
    }
    for (index, (arg, expected)) in instr.operands.iter().zip(&signature.params).enumerate() {
        if !value_matches(arg, *expected, types) {
            return Err(at(
                instr,
                format!(
                    "call arg {} type mismatch for @{}: expected {}",
                    index, callee, expected
                ),
            ));
        }
    }
    Ok(())
}

fn verify_branch(function: &Function, block: &BasicBlock, instr: &Instr) -> Result<(), Diagnostic> {
    if instr.labels.len() != instr.br_args.len() {
        return Err(at(
            instr,
            format!(
                "branch label/arg vectors out of step in block '{}'",
                block.label
            ),
        ));
    }
    for (label, args) in instr.labels.iter().zip(&instr.br_args) {
        let Some(target) = function.find_block(label) else {
            return Err(at(instr, format!("unknown block label '{}'", label)));
        };
        if args.len() != target.params.len() {
            return Err(at(
                instr,
                format!(
                    "branch arg count mismatch for '{}': expected {}, got {}",
                    label,
                    target.params.len(),
                    args.len()
                ),
            ));
        }
    }
    Ok(())
}

/// Enforce the array handle lifetime rules with a linear scan: once a
/// handle temp is passed to a release helper, any later use in the same
/// function is rejected.
fn verify_release_discipline(function: &Function) -> Result<(), Diagnostic> {
    let mut released: HashSet<u32> = HashSet::new();
    for block in &function.blocks {
        for instr in &block.instructions {
            // Reads of already-released handles.
            let mut fault: Option<Diagnostic> = None;
            instr.for_each_value(|value| {
                if fault.is_some() {
                    return;
                }
                if let Value::Temp(id) = value {
                    if released.contains(id) {
                        let is_release = instr.op == Opcode::Call
                            && instr
                                .callee
                                .as_deref()
                                .is_some_and(effects::is_release_helper);
                        let message = if is_release {
                            format!("double release of %{}", name_of(function, *id))
                        } else {
                            format!("use after release of %{}", name_of(function, *id))
                        };
                        fault = Some(at(instr, message));
                    }
                }
            });
            if let Some(diag) = fault {
                return Err(diag);
            }
            if instr.op == Opcode::Call
                && instr
                    .callee
                    .as_deref()
                    .is_some_and(effects::is_release_helper)
            {
                if let Some(Value::Temp(id)) = instr.operands.first() {
                    released.insert(*id);
                }
            }
        }
    }
    Ok(())
}

fn name_of(function: &Function, id: u32) -> String {
    function
        .value_name(id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("t{}", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn verify_text(src: &str) -> Result<(), Diagnostic> {
        let module = parse(src).expect("parse");
        verify(&module)
    }

    #[test]
    fn test_accepts_minimal_module() {
        verify_text("il 0.1\nfunc @main() -> i64 {\nentry:\n  ret 0\n}\n").unwrap();
    }

    #[test]
    fn test_forward_call_allowed() {
        verify_text(
            "il 0.1.2\nfunc @caller() -> void {\nentry:\n  call @callee()\n  ret\n}\nfunc @callee() -> void {\nentry:\n  ret\n}\n",
        )
        .unwrap();
    }

    #[test]
    fn test_duplicate_function_rejected() {
        let err = verify_text(
            "il 0.1\nfunc @dup() -> void {\nentry:\n  ret\n}\nfunc @dup() -> void {\nentry:\n  ret\n}\n",
        )
        .unwrap_err();
        assert!(err.message.contains("duplicate function @dup"));
    }

    #[test]
    fn test_trap_must_be_last() {
        let err = verify_text("il 0.1\nfunc @f() -> void {\nentry:\n  trap\n  ret\n}\n").unwrap_err();
        assert!(err.message.contains("terminator"));
    }

    #[test]
    fn test_unknown_callee() {
        let err = verify_text("il 0.1\nfunc @f() -> void {\nentry:\n  call @nope()\n  ret\n}\n")
            .unwrap_err();
        assert!(err.message.contains("unknown callee @nope"));
    }

    #[test]
    fn test_call_arity_mismatch() {
        let err = verify_text(
            "il 0.1\nextern @rt_print_i64(i64) -> void\nfunc @f() -> void {\nentry:\n  call @rt_print_i64(1, 2)\n  ret\n}\n",
        )
        .unwrap_err();
        assert!(err.message.contains("call arg count mismatch"));
    }

    #[test]
    fn test_call_type_mismatch() {
        let err = verify_text(
            "il 0.1\nextern @rt_print_i64(i64) -> void\nfunc @f() -> void {\nentry:\n  call @rt_print_i64(2.5)\n  ret\n}\n",
        )
        .unwrap_err();
        assert!(err.message.contains("call arg 0 type mismatch"));
    }

    #[test]
    fn test_store_range_check() {
        let err = verify_text(
            "il 0.1\nfunc @f() -> void {\nentry:\n  %p = alloca 2\n  store i16, %p, 70000\n  ret\n}\n",
        )
        .unwrap_err();
        assert!(err.message.contains("value out of range for store type"));
        assert!(err.message.contains("operand 1 constant out of range for i16"));
    }

    #[test]
    fn test_gep_index_must_be_i64() {
        let err = verify_text(
            "il 0.1\nfunc @f() -> void {\nentry:\n  %p = alloca 8\n  %q = gep %p, 1.5\n  ret\n}\n",
        )
        .unwrap_err();
        assert!(err.message.contains("operand 1 must be i64"));
    }

    #[test]
    fn test_branch_arity_checked() {
        let err = verify_text(
            "il 0.1\nfunc @f() -> i64 {\nentry:\n  br exit\nexit(%v: i64):\n  ret %v\n}\n",
        )
        .unwrap_err();
        assert!(err.message.contains("branch arg count mismatch"));
    }

    #[test]
    fn test_use_after_release() {
        let err = verify_text(
            "il 0.1\nextern @rt_arr_i32_new(i64) -> ptr\nextern @rt_arr_i32_len(ptr) -> i64\nextern @rt_arr_i32_release(ptr) -> void\nfunc @f() -> i64 {\nentry:\n  %h = call @rt_arr_i32_new(4)\n  call @rt_arr_i32_release(%h)\n  %n = call @rt_arr_i32_len(%h)\n  ret %n\n}\n",
        )
        .unwrap_err();
        assert!(err.message.contains("use after release"));
    }

    #[test]
    fn test_double_release() {
        let err = verify_text(
            "il 0.1\nextern @rt_arr_i32_new(i64) -> ptr\nextern @rt_arr_i32_release(ptr) -> void\nfunc @f() -> void {\nentry:\n  %h = call @rt_arr_i32_new(4)\n  call @rt_arr_i32_release(%h)\n  call @rt_arr_i32_release(%h)\n  ret\n}\n",
        )
        .unwrap_err();
        assert!(err.message.contains("double release"));
    }

    #[test]
    fn test_release_then_done_is_fine() {
        verify_text(
            "il 0.1\nextern @rt_arr_i32_new(i64) -> ptr\nextern @rt_arr_i32_release(ptr) -> void\nfunc @f() -> void {\nentry:\n  %h = call @rt_arr_i32_new(4)\n  call @rt_arr_i32_release(%h)\n  ret\n}\n",
        )
        .unwrap();
    }
}
