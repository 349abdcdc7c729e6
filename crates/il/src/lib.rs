//! Viper IL: typed, SSA-based intermediate language
//!
//! This crate owns the in-memory module model, the textual format
//! (parser and printer with a strict round-trip guarantee), the
//! structural verifier, and the shared support types every other layer
//! uses: diagnostics and the runtime helper effect registry.
//!
//! # Architecture
//!
//! - `module` / `function` / `opcode` / `types` / `value` - the data model
//! - `parser` / `printer` / `escape` - text IO
//! - `verify` - structural and type checks
//! - `builder` - programmatic construction for frontends and tests
//! - `diag` - the diagnostic type shared by parser, verifier, and VM
//! - `effects` - purity classes of the runtime helper ABI
//!
//! Data flow: text → `parser::parse` → `Module` → `verify::verify` →
//! passes or VM → `printer::print_canonical` → text.

pub mod builder;
pub mod diag;
pub mod effects;
pub mod escape;
pub mod function;
pub mod module;
pub mod opcode;
pub mod parser;
pub mod printer;
pub mod types;
pub mod value;
pub mod verify;

pub use builder::IrBuilder;
pub use diag::{Diagnostic, Severity, SourceLoc, WarningPolicy};
pub use function::{BasicBlock, Function, Instr, Param};
pub use module::{Extern, Global, Module};
pub use opcode::{Opcode, OPCODE_COUNT};
pub use printer::Mode;
pub use types::Type;
pub use value::Value;
