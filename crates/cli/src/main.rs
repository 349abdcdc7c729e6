//! Viper CLI
//!
//! Thin driver over the IL core: `opt` parses, verifies, optimises, and
//! reprints a module; `run` executes an IL file or a project target on
//! the VM. All diagnostics are printed here and nowhere else; library
//! code only returns them.

mod project;

use std::cell::RefCell;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use clap::{Args, CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};

use project::{load_manifest, OptLevel};
use viper_il::diag::Diagnostic;
use viper_il::module::Module;
use viper_il::{parser, printer, verify};
use viper_passes::{Mem2RegStats, PassManager, PreservedAnalyses, RunOptions};
use viper_vm::{DispatchMode, TraceMode, Vm, VmOptions};

#[derive(ClapParser)]
#[command(name = "viper")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Viper IL toolchain - optimize and execute IL modules", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Optimize an IL module and print the result
    Opt {
        /// Input .il file
        input: PathBuf,

        /// Output .il file
        #[arg(short, long)]
        output: PathBuf,

        /// Comma-separated pass list (overrides --pipeline)
        #[arg(long, value_delimiter = ',', value_name = "PASSES")]
        passes: Option<Vec<String>>,

        /// Named pipeline: O0, O1, or O2
        #[arg(long, value_name = "NAME")]
        pipeline: Option<String>,

        /// Dump IL before each pass (to stderr)
        #[arg(long)]
        print_before: bool,

        /// Dump IL after each pass (to stderr)
        #[arg(long)]
        print_after: bool,

        /// Re-verify the module after every pass
        #[arg(long)]
        verify_each: bool,

        /// Drop mem2reg from the schedule
        #[arg(long)]
        no_mem2reg: bool,

        /// Report mem2reg promotion statistics
        #[arg(long)]
        mem2reg_stats: bool,

        /// Per-pass execution report: text or json (to stderr)
        #[arg(long, value_name = "FORMAT")]
        report: Option<String>,
    },

    /// Execute an IL module or project target
    Run {
        /// An .il file, a project directory, or a manifest file
        target: PathBuf,

        #[command(flatten)]
        shared: SharedRunArgs,

        /// Arguments forwarded to the IL program
        #[arg(last = true)]
        prog_args: Vec<String>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Flags shared by every execution-capable subcommand.
#[derive(Args)]
struct SharedRunArgs {
    /// Trace execution: --trace (IL level), --trace=il, --trace=src
    #[arg(long, value_name = "MODE", num_args = 0..=1, default_missing_value = "il")]
    trace: Option<String>,

    /// Replace program stdin with a file
    #[arg(long, value_name = "PATH")]
    stdin_from: Option<PathBuf>,

    /// Abort after N interpreter steps (0 = unlimited)
    #[arg(long, value_name = "N", default_value_t = 0)]
    max_steps: u64,

    /// Enable bounds checks during lowering (accepted for frontend
    /// parity; IL execution always checks)
    #[arg(long)]
    bounds_checks: bool,

    /// Dump the trap diagnostic to stderr on unhandled faults
    #[arg(long)]
    dump_trap: bool,

    /// Execution engine: auto, vm-switch, vm-table, vm-threaded
    #[arg(long, value_name = "ENGINE")]
    engine: Option<String>,

    /// Optimisation level applied before execution
    #[arg(short = 'O', value_name = "LEVEL", value_parser = ["0", "1", "2"])]
    opt_level: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    // Bad arguments exit 1 like every other driver failure; help and
    // version displays stay successful.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return if error.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    match cli.command {
        Commands::Opt {
            input,
            output,
            passes,
            pipeline,
            print_before,
            print_after,
            verify_each,
            no_mem2reg,
            mem2reg_stats,
            report,
        } => run_opt(
            &input,
            &output,
            passes,
            pipeline,
            print_before,
            print_after,
            verify_each,
            no_mem2reg,
            mem2reg_stats,
            report,
        ),
        Commands::Run {
            target,
            shared,
            prog_args,
        } => run_target(&target, &shared, prog_args),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "viper", &mut io::stdout());
            ExitCode::SUCCESS
        }
    }
}

fn fail(diag: &Diagnostic) -> ExitCode {
    eprintln!("{}", diag);
    ExitCode::from(1)
}

fn load_module(path: &Path) -> Result<Module, Diagnostic> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Diagnostic::error(format!("{}: {}", path.display(), e)))?;
    let module = parser::parse(&text)
        .map_err(|d| d.with_note(format!("while parsing {}", path.display())))?;
    verify::verify(&module)
        .map_err(|d| d.with_note(format!("while verifying {}", path.display())))?;
    Ok(module)
}

#[allow(clippy::too_many_arguments)]
fn run_opt(
    input: &Path,
    output: &Path,
    passes: Option<Vec<String>>,
    pipeline: Option<String>,
    print_before: bool,
    print_after: bool,
    verify_each: bool,
    no_mem2reg: bool,
    mem2reg_stats: bool,
    report: Option<String>,
) -> ExitCode {
    let mut module = match load_module(input) {
        Ok(module) => module,
        Err(diag) => return fail(&diag),
    };

    let mut pm = PassManager::new();
    let stats_cell: Rc<RefCell<Mem2RegStats>> = Rc::new(RefCell::new(Mem2RegStats::default()));
    if mem2reg_stats {
        let sink = stats_cell.clone();
        pm.register_module_pass("mem2reg", move |module, _am| {
            let mut stats = Mem2RegStats::default();
            let changed = viper_passes::mem2reg(module, Some(&mut stats));
            let mut total = sink.borrow_mut();
            total.promoted_vars += stats.promoted_vars;
            total.removed_loads += stats.removed_loads;
            total.removed_stores += stats.removed_stores;
            if changed {
                PreservedAnalyses::none()
            } else {
                PreservedAnalyses::all()
            }
        });
    }

    let mut pass_list: Vec<String> = match (&passes, &pipeline) {
        (Some(list), _) => list.clone(),
        (None, Some(name)) => match pm.pipeline(name) {
            Some(ids) => ids.clone(),
            None => return fail(&Diagnostic::error(format!("unknown pipeline '{}'", name))),
        },
        (None, None) => pm.pipeline("default").expect("default pipeline").clone(),
    };
    if no_mem2reg {
        pass_list.retain(|id| id != "mem2reg");
    }

    let mut instrumentation = Vec::new();
    let mut stderr = io::stderr();
    let mut options = RunOptions {
        instrumentation: Some(&mut instrumentation),
        print_before,
        print_after,
        verify_each,
        dump: Some(&mut stderr),
    };
    if let Err(diag) = pm.run_passes_with(&mut module, &pass_list, &mut options) {
        return fail(&diag);
    }

    if let Err(diag) = verify::verify(&module) {
        return fail(&diag.with_note("verification failed after optimization"));
    }

    if mem2reg_stats {
        let stats = stats_cell.borrow();
        println!(
            "mem2reg: promoted {}, removed loads {}, removed stores {}",
            stats.promoted_vars, stats.removed_loads, stats.removed_stores
        );
    }

    match report.as_deref() {
        Some("json") => {
            let records: Vec<serde_json::Value> = String::from_utf8_lossy(&instrumentation)
                .lines()
                .map(|line| serde_json::json!({ "record": line }))
                .collect();
            let _ = writeln!(
                io::stderr(),
                "{}",
                serde_json::to_string_pretty(&records).unwrap_or_default()
            );
        }
        Some(_) => {
            let _ = io::stderr().write_all(&instrumentation);
        }
        None => {}
    }

    let text = printer::print_canonical(&module);
    if let Err(e) = std::fs::write(output, text) {
        return fail(&Diagnostic::error(format!("{}: {}", output.display(), e)));
    }
    ExitCode::SUCCESS
}

/// Resolve a run target to an IL file, consulting project manifests for
/// directories.
fn resolve_target(target: &Path) -> Result<PathBuf, Diagnostic> {
    if target.is_dir() {
        let manifest = target.join("viper.proj");
        if !manifest.is_file() {
            return Err(Diagnostic::error(format!(
                "{}: no viper.proj manifest found",
                target.display()
            )));
        }
        return resolve_manifest(&manifest);
    }
    match target.extension().and_then(|e| e.to_str()) {
        Some("il") => Ok(target.to_path_buf()),
        Some("proj") => resolve_manifest(target),
        _ => Err(Diagnostic::error(format!(
            "{}: expected an .il file, a project directory, or a manifest",
            target.display()
        ))),
    }
}

fn resolve_manifest(manifest: &Path) -> Result<PathBuf, Diagnostic> {
    let config = load_manifest(manifest).map_err(Diagnostic::error)?;
    let Some(entry) = config.entry else {
        return Err(Diagnostic::error(format!(
            "{}: manifest has no 'entry' directive",
            manifest.display()
        )));
    };
    let base = manifest.parent().unwrap_or(Path::new("."));
    let entry = base.join(entry);
    if entry.extension().and_then(|e| e.to_str()) == Some("il") {
        Ok(entry)
    } else {
        let lang = config
            .lang
            .map(|l| format!("{:?}", l).to_lowercase())
            .unwrap_or_else(|| "unknown".to_string());
        Err(Diagnostic::error(format!(
            "{}: the {} frontend is not available in this build; entry must be an .il file",
            manifest.display(),
            lang
        )))
    }
}

fn run_target(target: &Path, shared: &SharedRunArgs, prog_args: Vec<String>) -> ExitCode {
    let il_path = match resolve_target(target) {
        Ok(path) => path,
        Err(diag) => return fail(&diag),
    };
    let mut module = match load_module(&il_path) {
        Ok(module) => module,
        Err(diag) => return fail(&diag),
    };

    // Optional optimisation before execution.
    if let Some(level) = shared.opt_level.as_deref() {
        let level = OptLevel::parse(&format!("O{}", level)).expect("validated by clap");
        let pm = PassManager::new();
        if let Err(diag) = pm.run_pipeline(&mut module, level.pipeline_name()) {
            return fail(&diag);
        }
        if let Err(diag) = verify::verify(&module) {
            return fail(&diag.with_note("verification failed after optimization"));
        }
    }

    let trace = match shared.trace.as_deref() {
        None => TraceMode::Off,
        Some("il") => TraceMode::Il,
        Some("src") => TraceMode::Src,
        Some(other) => {
            return fail(&Diagnostic::error(format!("unknown trace mode '{}'", other)));
        }
    };

    // Engine: the explicit flag wins, `auto` and absence defer to
    // VIPER_DISPATCH. `native` is rejected up front with a clear message
    // whichever way it was requested.
    let env_engine = std::env::var(viper_vm::DISPATCH_ENV)
        .ok()
        .filter(|v| !v.is_empty());
    let requested = match shared.engine.as_deref() {
        None | Some("auto") => env_engine.as_deref(),
        explicit => explicit,
    };
    if requested == Some("native") {
        return fail(&Diagnostic::error(
            "native backend not available in this build",
        ));
    }
    let dispatch = match DispatchMode::select(shared.engine.as_deref()) {
        Ok(mode) => mode,
        Err(diag) => return fail(&diag),
    };

    let mut vm = Vm::new(
        &module,
        VmOptions {
            trace,
            max_steps: shared.max_steps,
            dispatch,
            args: prog_args,
        },
    );

    if let Some(path) = &shared.stdin_from {
        match std::fs::File::open(path) {
            Ok(file) => vm.set_input(Box::new(io::BufReader::new(file))),
            Err(e) => {
                return fail(&Diagnostic::error(format!("{}: {}", path.display(), e)));
            }
        }
    }

    match vm.run() {
        Ok(exit) => ExitCode::from((exit & 0xff) as u8),
        Err(trap) => {
            if shared.dump_trap {
                eprintln!("{}", Diagnostic::from(trap.clone()));
            } else {
                eprintln!("trap: {}", trap.kind.message());
            }
            // Trap exit is forced non-zero even for programs that
            // computed zero.
            ExitCode::from(1)
        }
    }
}
