//! Runtime helper effect registry
//!
//! Every external helper callable from IL is described here: its
//! signature and its purity class. Pure helpers are mathematical
//! functions of their arguments and may be folded at compile time or
//! dropped when unused; readonly helpers observe memory but do not
//! mutate it; impure helpers perform I/O or allocation and must survive
//! every optimisation. The table is built once and is read-only
//! afterwards.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::types::Type;

/// Purity class of a runtime helper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectClass {
    /// Value depends only on arguments; safe to fold and to drop when unused
    Pure,
    /// Observes memory (string/array contents) without mutating
    ReadOnly,
    /// Performs I/O, allocation, or other observable side effects
    Impure,
}

/// Signature and effect of one runtime helper
#[derive(Debug, Clone)]
pub struct HelperInfo {
    pub name: &'static str,
    pub effect: EffectClass,
    pub ret_type: Type,
    pub params: &'static [Type],
}

const HELPERS: &[HelperInfo] = &[
    // Console I/O
    HelperInfo { name: "rt_print_i64", effect: EffectClass::Impure, ret_type: Type::Void, params: &[Type::I64] },
    HelperInfo { name: "rt_print_f64", effect: EffectClass::Impure, ret_type: Type::Void, params: &[Type::F64] },
    HelperInfo { name: "rt_print_str", effect: EffectClass::Impure, ret_type: Type::Void, params: &[Type::Str] },
    HelperInfo { name: "rt_input_line", effect: EffectClass::Impure, ret_type: Type::Str, params: &[] },
    // Strings
    HelperInfo { name: "rt_len", effect: EffectClass::ReadOnly, ret_type: Type::I64, params: &[Type::Str] },
    HelperInfo { name: "rt_concat", effect: EffectClass::Impure, ret_type: Type::Str, params: &[Type::Str, Type::Str] },
    HelperInfo { name: "rt_substr", effect: EffectClass::Impure, ret_type: Type::Str, params: &[Type::Str, Type::I64, Type::I64] },
    HelperInfo { name: "rt_str_eq", effect: EffectClass::ReadOnly, ret_type: Type::I1, params: &[Type::Str, Type::Str] },
    HelperInfo { name: "rt_to_int", effect: EffectClass::ReadOnly, ret_type: Type::I64, params: &[Type::Str] },
    HelperInfo { name: "rt_int_to_str", effect: EffectClass::Impure, ret_type: Type::Str, params: &[Type::I64] },
    HelperInfo { name: "rt_f64_to_str", effect: EffectClass::Impure, ret_type: Type::Str, params: &[Type::F64] },
    // Pure math
    HelperInfo { name: "rt_abs_i64", effect: EffectClass::Pure, ret_type: Type::I64, params: &[Type::I64] },
    HelperInfo { name: "rt_abs_f64", effect: EffectClass::Pure, ret_type: Type::F64, params: &[Type::F64] },
    HelperInfo { name: "rt_sgn_i64", effect: EffectClass::Pure, ret_type: Type::I64, params: &[Type::I64] },
    HelperInfo { name: "rt_sqrt", effect: EffectClass::Pure, ret_type: Type::F64, params: &[Type::F64] },
    HelperInfo { name: "rt_floor", effect: EffectClass::Pure, ret_type: Type::F64, params: &[Type::F64] },
    HelperInfo { name: "rt_ceil", effect: EffectClass::Pure, ret_type: Type::F64, params: &[Type::F64] },
    HelperInfo { name: "rt_sin", effect: EffectClass::Pure, ret_type: Type::F64, params: &[Type::F64] },
    HelperInfo { name: "rt_cos", effect: EffectClass::Pure, ret_type: Type::F64, params: &[Type::F64] },
    HelperInfo { name: "rt_pow", effect: EffectClass::Pure, ret_type: Type::F64, params: &[Type::F64, Type::F64] },
    // Random numbers: stateful, therefore impure
    HelperInfo { name: "rt_rand", effect: EffectClass::Impure, ret_type: Type::F64, params: &[] },
    HelperInfo { name: "rt_rand_seed", effect: EffectClass::Impure, ret_type: Type::Void, params: &[Type::I64] },
    // Program arguments
    HelperInfo { name: "rt_arg_count", effect: EffectClass::ReadOnly, ret_type: Type::I64, params: &[] },
    HelperInfo { name: "rt_arg", effect: EffectClass::ReadOnly, ret_type: Type::Str, params: &[Type::I64] },
    // i32 array runtime with explicit handle lifetime
    HelperInfo { name: "rt_arr_i32_new", effect: EffectClass::Impure, ret_type: Type::Ptr, params: &[Type::I64] },
    HelperInfo { name: "rt_arr_i32_len", effect: EffectClass::ReadOnly, ret_type: Type::I64, params: &[Type::Ptr] },
    HelperInfo { name: "rt_arr_i32_get", effect: EffectClass::ReadOnly, ret_type: Type::I64, params: &[Type::Ptr, Type::I64] },
    HelperInfo { name: "rt_arr_i32_set", effect: EffectClass::Impure, ret_type: Type::Void, params: &[Type::Ptr, Type::I64, Type::I64] },
    HelperInfo { name: "rt_arr_i32_release", effect: EffectClass::Impure, ret_type: Type::Void, params: &[Type::Ptr] },
];

fn registry() -> &'static HashMap<&'static str, &'static HelperInfo> {
    static REGISTRY: OnceLock<HashMap<&'static str, &'static HelperInfo>> = OnceLock::new();
    REGISTRY.get_or_init(|| HELPERS.iter().map(|h| (h.name, h)).collect())
}

/// Look up a helper by symbol name.
pub fn helper_info(name: &str) -> Option<&'static HelperInfo> {
    registry().get(name).copied()
}

/// Effect class of a callee. Unknown symbols are treated as impure so
/// passes stay conservative.
pub fn effect_of(name: &str) -> EffectClass {
    helper_info(name).map_or(EffectClass::Impure, |h| h.effect)
}

/// Whether the symbol names a release helper that consumes its handle.
pub fn is_release_helper(name: &str) -> bool {
    name.starts_with("rt_arr_") && name.ends_with("_release")
}

/// All registered helpers, for documentation and the VM dispatch table.
pub fn all_helpers() -> &'static [HelperInfo] {
    HELPERS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effect_classes() {
        assert_eq!(effect_of("rt_abs_i64"), EffectClass::Pure);
        assert_eq!(effect_of("rt_len"), EffectClass::ReadOnly);
        assert_eq!(effect_of("rt_print_i64"), EffectClass::Impure);
        assert_eq!(effect_of("unknown_function"), EffectClass::Impure);
    }

    #[test]
    fn test_release_helper_detection() {
        assert!(is_release_helper("rt_arr_i32_release"));
        assert!(!is_release_helper("rt_arr_i32_len"));
        assert!(!is_release_helper("rt_release"));
    }

    #[test]
    fn test_signatures_present() {
        let info = helper_info("rt_arr_i32_set").unwrap();
        assert_eq!(info.params.len(), 3);
        assert_eq!(info.ret_type, Type::Void);
    }
}
