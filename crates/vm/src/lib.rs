//! Bytecode virtual machine for Viper IL
//!
//! Executes a verified module with trap-accurate semantics: checked
//! arithmetic faults precisely on the faulting instruction, runtime
//! array handles enforce their Live → Released lifetime, and a
//! configurable step budget bounds runaway programs.
//!
//! # Architecture
//!
//! - `slot` - the uniform 64-bit value cell and handle encoding
//! - `vm` - frames, the three interpreter loops, opcode execution
//! - `runtime` - the helper table external calls dispatch into
//! - `dispatch` - strategy selection (`--engine` / `VIPER_DISPATCH`)
//! - `trace` - IL-level and source-level execution tracing
//! - `trap` - fault classification and diagnostics
//!
//! The VM borrows the module immutably; all mutable state lives on the
//! `Vm` value, so separate modules can execute on separate threads.

pub mod dispatch;
pub mod runtime;
pub mod slot;
pub mod trace;
pub mod trap;
pub mod vm;

pub use dispatch::{DispatchMode, DISPATCH_ENV};
pub use slot::Slot;
pub use trace::TraceMode;
pub use trap::{TrapKind, VmError};
pub use vm::{Vm, VmOptions};
