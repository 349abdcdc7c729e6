//! Primitive types of the IL
//!
//! The type system is deliberately flat: scalar integers of a few widths,
//! two float widths, an opaque pointer, and a runtime-managed string
//! handle. There are no aggregates; arrays and records live behind runtime
//! helpers.

use std::fmt;

/// Scalar type of a value, instruction result, or global
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Type {
    #[default]
    Void,
    I1,
    I16,
    I32,
    I64,
    F32,
    F64,
    Ptr,
    Str,
}

impl Type {
    /// Parse a type token as it appears in IL text.
    pub fn parse(token: &str) -> Option<Type> {
        match token {
            "void" => Some(Type::Void),
            "i1" => Some(Type::I1),
            "i16" => Some(Type::I16),
            "i32" => Some(Type::I32),
            "i64" => Some(Type::I64),
            "f32" => Some(Type::F32),
            "f64" => Some(Type::F64),
            "ptr" => Some(Type::Ptr),
            "str" => Some(Type::Str),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Type::Void => "void",
            Type::I1 => "i1",
            Type::I16 => "i16",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F32 => "f32",
            Type::F64 => "f64",
            Type::Ptr => "ptr",
            Type::Str => "str",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::I1 | Type::I16 | Type::I32 | Type::I64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    /// Bit width for integer types; `None` otherwise.
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            Type::I1 => Some(1),
            Type::I16 => Some(16),
            Type::I32 => Some(32),
            Type::I64 => Some(64),
            _ => None,
        }
    }

    /// Inclusive signed range for a narrow integer store target.
    pub fn signed_range(&self) -> Option<(i64, i64)> {
        match self {
            Type::I1 => Some((0, 1)),
            Type::I16 => Some((i16::MIN as i64, i16::MAX as i64)),
            Type::I32 => Some((i32::MIN as i64, i32::MAX as i64)),
            Type::I64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for ty in [
            Type::Void,
            Type::I1,
            Type::I16,
            Type::I32,
            Type::I64,
            Type::F32,
            Type::F64,
            Type::Ptr,
            Type::Str,
        ] {
            assert_eq!(Type::parse(ty.name()), Some(ty));
        }
        assert_eq!(Type::parse("i7"), None);
    }

    #[test]
    fn test_signed_range() {
        assert_eq!(Type::I16.signed_range(), Some((-32768, 32767)));
        assert_eq!(Type::Ptr.signed_range(), None);
    }
}
