//! Constant folding
//!
//! Folds single instructions whose operands are all constants, with hard
//! guards around anything that could trap or change observable
//! behaviour: checked arithmetic folds only when it cannot overflow,
//! division only with a provably safe divisor, float ops only when the
//! result is finite, and checked casts only when the runtime check would
//! succeed. Instructions that would trap are left untouched so the fault
//! survives to runtime.
//!
//! The shared [`eval`] entry point is also the evaluator SCCP uses, so
//! both passes agree on exactly which operations are foldable.

use std::collections::HashMap;

use viper_il::effects::{self, EffectClass};
use viper_il::function::Function;
use viper_il::module::Module;
use viper_il::opcode::Opcode;
use viper_il::types::Type;
use viper_il::value::Value;

fn int_of(value: &Value) -> Option<i64> {
    match value {
        Value::ConstInt { value, .. } => Some(*value),
        _ => None,
    }
}

fn float_of(value: &Value) -> Option<f64> {
    match value {
        Value::ConstFloat(f) => Some(*f),
        _ => None,
    }
}

/// Evaluate one instruction over constant operands. `None` means "do
/// not fold": non-constant inputs, a result that is not representable,
/// or an operation that would trap.
pub fn eval(op: Opcode, ty: Type, operands: &[Value]) -> Option<Value> {
    use Opcode::*;

    let int2 = || Some((int_of(operands.first()?)?, int_of(operands.get(1)?)?));
    let float2 = || Some((float_of(operands.first()?)?, float_of(operands.get(1)?)?));
    let finite = |f: f64| f.is_finite().then(|| Value::const_float(f));

    match op {
        // Wrapping integer arithmetic folds unconditionally.
        IAdd => int2().map(|(a, b)| Value::const_int(a.wrapping_add(b))),
        ISub => int2().map(|(a, b)| Value::const_int(a.wrapping_sub(b))),
        IMul => int2().map(|(a, b)| Value::const_int(a.wrapping_mul(b))),

        // Checked variants fold only when the overflow check passes.
        IAddOvf => int2().and_then(|(a, b)| a.checked_add(b)).map(Value::const_int),
        ISubOvf => int2().and_then(|(a, b)| a.checked_sub(b)).map(Value::const_int),
        IMulOvf => int2().and_then(|(a, b)| a.checked_mul(b)).map(Value::const_int),

        // Division: never fold the trapping conditions.
        SDiv | SDivChk0 => int2().and_then(|(a, b)| {
            if b == 0 || (a == i64::MIN && b == -1) {
                None
            } else {
                Some(Value::const_int(a / b))
            }
        }),
        SRem | SRemChk0 => int2().and_then(|(a, b)| {
            if b == 0 || (a == i64::MIN && b == -1) {
                None
            } else {
                Some(Value::const_int(a % b))
            }
        }),
        UDiv | UDivChk0 => int2().and_then(|(a, b)| {
            (b != 0).then(|| Value::const_int(((a as u64) / (b as u64)) as i64))
        }),
        URem | URemChk0 => int2().and_then(|(a, b)| {
            (b != 0).then(|| Value::const_int(((a as u64) % (b as u64)) as i64))
        }),

        And => int2().map(|(a, b)| Value::const_int(a & b)),
        Or => int2().map(|(a, b)| Value::const_int(a | b)),
        Xor => int2().map(|(a, b)| Value::const_int(a ^ b)),

        // Shifts fold only for in-range amounts.
        Shl | LShr | AShr => int2().and_then(|(a, b)| {
            let width = ty.bit_width().unwrap_or(64) as i64;
            if b < 0 || b >= width {
                return None;
            }
            let shifted = match op {
                Shl => a.wrapping_shl(b as u32),
                LShr => ((a as u64) >> (b as u32)) as i64,
                _ => a >> (b as u32),
            };
            Some(Value::const_int(shifted))
        }),

        ICmpEq => int2().map(|(a, b)| Value::const_bool(a == b)),
        ICmpNe => int2().map(|(a, b)| Value::const_bool(a != b)),
        SCmpLt => int2().map(|(a, b)| Value::const_bool(a < b)),
        SCmpLe => int2().map(|(a, b)| Value::const_bool(a <= b)),
        SCmpGt => int2().map(|(a, b)| Value::const_bool(a > b)),
        SCmpGe => int2().map(|(a, b)| Value::const_bool(a >= b)),
        UCmpLt => int2().map(|(a, b)| Value::const_bool((a as u64) < (b as u64))),
        UCmpLe => int2().map(|(a, b)| Value::const_bool((a as u64) <= (b as u64))),
        UCmpGt => int2().map(|(a, b)| Value::const_bool((a as u64) > (b as u64))),
        UCmpGe => int2().map(|(a, b)| Value::const_bool((a as u64) >= (b as u64))),

        // Float arithmetic refuses non-finite results.
        FAdd => float2().and_then(|(a, b)| finite(a + b)),
        FSub => float2().and_then(|(a, b)| finite(a - b)),
        FMul => float2().and_then(|(a, b)| finite(a * b)),
        FDiv => float2().and_then(|(a, b)| finite(a / b)),

        // Ordered/unordered classification folds against NaN directly.
        FCmpOrd => float2().map(|(a, b)| Value::const_bool(!a.is_nan() && !b.is_nan())),
        FCmpUno => float2().map(|(a, b)| Value::const_bool(a.is_nan() || b.is_nan())),
        FCmpEq => float2().map(|(a, b)| Value::const_bool(a == b)),
        FCmpNe => float2().map(|(a, b)| Value::const_bool(a != b)),
        FCmpLt => float2().map(|(a, b)| Value::const_bool(a < b)),
        FCmpLe => float2().map(|(a, b)| Value::const_bool(a <= b)),
        FCmpGt => float2().map(|(a, b)| Value::const_bool(a > b)),
        FCmpGe => float2().map(|(a, b)| Value::const_bool(a >= b)),

        Sitofp | CastSiToFp => int_of(operands.first()?).map(|a| Value::const_float(a as f64)),

        // Round-to-nearest-even, folded only when the runtime range
        // check would pass. The i64 boundary is not exactly
        // representable in f64; stay strictly inside it.
        CastFpToSiRteChk => {
            let f = float_of(operands.first()?)?;
            if !f.is_finite() {
                return None;
            }
            let rounded = round_ties_even(f);
            if rounded >= (i64::MIN as f64) && rounded < (i64::MAX as f64) {
                Some(Value::const_int(rounded as i64))
            } else {
                None
            }
        }

        CastSiNarrowChk => {
            let a = int_of(operands.first()?)?;
            let (lo, hi) = ty.signed_range()?;
            (a >= lo && a <= hi).then(|| Value::const_int(a))
        }

        Zext1 => {
            let a = int_of(operands.first()?)?;
            Some(Value::const_int(if a != 0 { 1 } else { 0 }))
        }
        Trunc1 => {
            let a = int_of(operands.first()?)?;
            Some(Value::const_bool(a & 1 != 0))
        }

        // Constant materialisation is itself foldable, which is what
        // lets const_f64 results participate in further propagation.
        ConstI1 => int_of(operands.first()?).map(|a| Value::const_bool(a != 0)),
        ConstI64 => int_of(operands.first()?).map(Value::const_int),
        ConstF64 => float_of(operands.first()?).map(Value::const_float),

        _ => None,
    }
}

fn round_ties_even(f: f64) -> f64 {
    let rounded = f.round();
    if (f - f.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
        rounded - f.signum()
    } else {
        rounded
    }
}

/// Fold calls to the single-argument pure runtime helpers over a finite
/// constant argument. The roster is closed: other pure helpers (such as
/// the two-argument `rt_pow`) stay callable at runtime and are only ever
/// dropped by DCE when unused, never folded. The mathematical result
/// must be exactly representable.
pub fn eval_pure_helper(callee: &str, operands: &[Value]) -> Option<Value> {
    if effects::effect_of(callee) != EffectClass::Pure {
        return None;
    }
    let finite = |f: f64| f.is_finite().then(|| Value::const_float(f));
    match callee {
        "rt_abs_i64" => {
            let a = int_of(operands.first()?)?;
            a.checked_abs().map(Value::const_int)
        }
        "rt_sgn_i64" => {
            let a = int_of(operands.first()?)?;
            Some(Value::const_int(a.signum()))
        }
        "rt_abs_f64" => finite(float_of(operands.first()?)?.abs()),
        "rt_sqrt" => finite(float_of(operands.first()?)?.sqrt()),
        "rt_floor" => finite(float_of(operands.first()?)?.floor()),
        "rt_ceil" => finite(float_of(operands.first()?)?.ceil()),
        "rt_sin" => finite(float_of(operands.first()?)?.sin()),
        "rt_cos" => finite(float_of(operands.first()?)?.cos()),
        _ => None,
    }
}

/// Run constant folding over the module. Returns whether anything
/// folded.
pub fn const_fold(module: &mut Module) -> bool {
    let mut changed = false;
    for function in &mut module.functions {
        changed |= fold_function(function);
    }
    changed
}

fn fold_function(function: &mut Function) -> bool {
    // id → folded constant, accumulated in block order so chains fold in
    // one sweep.
    let mut folded: HashMap<u32, Value> = HashMap::new();

    for block in &mut function.blocks {
        for instr in &mut block.instructions {
            instr.for_each_value_mut(|value| {
                if let Value::Temp(id) = value {
                    if let Some(constant) = folded.get(id) {
                        *value = constant.clone();
                    }
                }
            });
            let Some(result) = instr.result else {
                continue;
            };
            if !instr.operands.iter().all(Value::is_const) {
                continue;
            }
            let computed = match instr.op {
                Opcode::Call => instr
                    .callee
                    .as_deref()
                    .and_then(|c| eval_pure_helper(c, &instr.operands)),
                _ => eval(instr.op, instr.ty, &instr.operands),
            };
            if let Some(constant) = computed {
                folded.insert(result, constant);
            }
        }
    }

    if folded.is_empty() {
        return false;
    }

    // Rewrite any remaining uses (branch args into later blocks) and
    // drop the now-dead defining instructions.
    let mut removed = 0usize;
    for block in &mut function.blocks {
        for instr in &mut block.instructions {
            instr.for_each_value_mut(|value| {
                if let Value::Temp(id) = value {
                    if let Some(constant) = folded.get(id) {
                        *value = constant.clone();
                    }
                }
            });
        }
        block.instructions.retain(|instr| {
            let dead = instr.result.is_some_and(|r| folded.contains_key(&r));
            if dead {
                removed += 1;
            }
            !dead
        });
    }
    tracing::debug!(
        target: "constfold",
        function = %function.name,
        folded = removed,
        "folded constant instructions"
    );
    true
}
