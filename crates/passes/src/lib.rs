//! Optimisation pipeline for Viper IL
//!
//! # Architecture
//!
//! - `analysis` - AnalysisRegistry/AnalysisManager with preservation
//!   bookkeeping, plus the built-in CFG and liveness analyses
//! - `manager` - PassManager: pass registry, named pipelines
//!   (`O0`/`O1`/`O2`), instrumentation
//! - `simplify_cfg` - fixed-point CFG canonicalisation
//! - `dce` - trivial dead-code elimination
//! - `sccp` - sparse conditional constant propagation
//! - `constfold` - trap-preserving constant folding
//! - `peephole` - algebraic identities
//! - `mem2reg` - stack slot promotion
//! - `late_cleanup` - bounded SimplifyCFG+DCE fixpoint
//!
//! All passes keep verified modules verified and never fold an operation
//! that could trap at runtime.

pub mod analysis;
pub mod constfold;
pub mod dce;
pub mod late_cleanup;
pub mod manager;
pub mod mem2reg;
pub mod peephole;
pub mod sccp;
pub mod simplify_cfg;

pub use analysis::{AnalysisManager, AnalysisRegistry, CfgInfo, LivenessInfo, PreservedAnalyses};
pub use constfold::const_fold;
pub use dce::dce;
pub use late_cleanup::{late_cleanup, LateCleanupStats};
pub use manager::{PassManager, RunOptions};
pub use mem2reg::{mem2reg, Mem2RegStats};
pub use peephole::peephole;
pub use sccp::sccp;
pub use simplify_cfg::{SimplifyCfg, SimplifyCfgStats};
