//! Dispatch strategy selection
//!
//! Three interpreter loops exist: a single large `match` per step, a
//! function-pointer table indexed by opcode discriminant, and a
//! tail-dispatch chain compiled only when the `threaded-dispatch`
//! feature is on. All three execute identical semantics; the choice is
//! a performance experiment surface selected per run via the CLI
//! `--engine` flag or the `VIPER_DISPATCH` environment variable.

use viper_il::diag::Diagnostic;

/// Interpreter loop strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    #[default]
    Switch,
    Table,
    Threaded,
}

/// Environment variable consulted when no explicit engine is given.
pub const DISPATCH_ENV: &str = "VIPER_DISPATCH";

impl DispatchMode {
    /// Parse a strategy name as accepted by `--engine` and
    /// `VIPER_DISPATCH`.
    pub fn parse(token: &str) -> Result<DispatchMode, Diagnostic> {
        match token {
            "switch" | "vm-switch" => Ok(DispatchMode::Switch),
            "table" | "vm-table" => Ok(DispatchMode::Table),
            "threaded" | "vm-threaded" => {
                if cfg!(feature = "threaded-dispatch") {
                    Ok(DispatchMode::Threaded)
                } else {
                    Err(Diagnostic::error(
                        "threaded dispatch not supported by this build",
                    ))
                }
            }
            other => Err(Diagnostic::error(format!(
                "unknown dispatch strategy '{}'",
                other
            ))),
        }
    }

    /// Resolve the strategy for a run: explicit request first, then the
    /// environment, then the default `switch` loop.
    pub fn select(explicit: Option<&str>) -> Result<DispatchMode, Diagnostic> {
        if let Some(token) = explicit {
            if token == "auto" {
                return Self::from_env();
            }
            return Self::parse(token);
        }
        Self::from_env()
    }

    fn from_env() -> Result<DispatchMode, Diagnostic> {
        match std::env::var(DISPATCH_ENV) {
            Ok(token) if !token.is_empty() => Self::parse(&token),
            _ => Ok(DispatchMode::Switch),
        }
    }
}
