//! Module-level containers: externs, globals, and the module itself
//!
//! A `Module` exclusively owns every nested entity. Functions reference
//! externs and globals by symbol name only; names are resolved by the
//! verifier, the passes, and the VM, never by pointer.

use crate::function::Function;
use crate::types::Type;
use crate::value::Value;

/// Declaration of an external runtime helper
#[derive(Debug, Clone, PartialEq)]
pub struct Extern {
    pub name: String,
    pub ret_type: Type,
    pub params: Vec<Type>,
}

/// A module-level global definition
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    pub is_const: bool,
    /// Initializer: integer, float, or string literal, the address of
    /// another global, or null
    pub init: Value,
}

/// Top-level IL container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    /// Version token from the `il <version>` directive, re-emitted verbatim
    pub version: String,
    /// Optional `target "<triple>"` directive
    pub target: Option<String>,
    pub externs: Vec<Extern>,
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Module {
        Module {
            version: "0.2.0".to_string(),
            ..Module::default()
        }
    }

    pub fn find_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn find_function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn find_extern(&self, name: &str) -> Option<&Extern> {
        self.externs.iter().find(|e| e.name == name)
    }

    pub fn find_global(&self, name: &str) -> Option<&Global> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// Total instruction count across all functions. Used by pass
    /// instrumentation to report size deltas.
    pub fn instr_count(&self) -> usize {
        self.functions
            .iter()
            .map(|f| f.blocks.iter().map(|b| b.instructions.len()).sum::<usize>())
            .sum()
    }

    /// Total basic block count across all functions.
    pub fn block_count(&self) -> usize {
        self.functions.iter().map(|f| f.blocks.len()).sum()
    }
}
