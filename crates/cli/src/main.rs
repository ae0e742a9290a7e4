//! Command-line driver for the Tiny scripting language.

use clap::{Parser as ClapParser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::rc::Rc;
use tiny::{RuntimeFault, State, Thread, ThreadConfig, Value};
use tracing::{info, warn};

#[derive(ClapParser)]
#[command(name = "tinyc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile and run .tiny scripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a .tiny script
    Run {
        /// Input .tiny source file
        input: PathBuf,

        /// Thread tuning as a TOML file (stack_max, indir_max, gc_initial_threshold)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the resolved thread configuration before running
        #[arg(short, long)]
        verbose: bool,
    },

    /// Parse and compile a .tiny script, reporting diagnostics, without running it
    Check {
        /// Input .tiny source file
        input: PathBuf,
    },
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tinyc=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> ThreadConfig {
    let Some(path) = path else {
        return ThreadConfig::default();
    };
    match std::fs::read_to_string(path) {
        Ok(text) => match toml::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                warn!("failed to parse thread config '{}': {e}, using defaults", path.display());
                ThreadConfig::default()
            }
        },
        Err(e) => {
            warn!("failed to read thread config '{}': {e}, using defaults", path.display());
            ThreadConfig::default()
        }
    }
}

/// A minimal standard library bound into every state this driver compiles,
/// covering the host-side functions the spec's own walkthrough examples
/// assume are available (`print`/`read` are opcodes; these are the ones a
/// host typically adds on top).
fn bind_standard_library(state: &mut State) {
    let _ = state.bind_function("clock", |_thread, _args| {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Value::Number(secs)
    });

    let _ = state.bind_function("strlen", |thread, args| {
        let len = args
            .first()
            .and_then(|arg| thread.resolve_string(arg))
            .map(str::len)
            .unwrap_or(0);
        Value::Number(len as f64)
    });
}

fn run(input: &PathBuf, config: ThreadConfig, verbose: bool) -> i32 {
    if verbose {
        info!(?config, "resolved thread configuration");
    }

    let mut state = State::new();
    bind_standard_library(&mut state);

    if state.compile_file(input).is_err() {
        return 1;
    }

    let state = Rc::new(state);
    let mut thread = Thread::with_config(state, config);
    thread.start();

    loop {
        match thread.execute_cycle() {
            Ok(_) if thread.is_done() => break,
            Ok(_) => continue,
            Err(fault) => {
                return match fault {
                    RuntimeFault::StackOverflow
                    | RuntimeFault::StackUnderflow
                    | RuntimeFault::IndirectionStackOverflow
                    | RuntimeFault::IndirectionStackUnderflow => 2,
                    RuntimeFault::TypeError { .. } => 3,
                    RuntimeFault::InvalidOpcode { .. } => 4,
                };
            }
        }
    }

    0
}

fn check(input: &PathBuf) -> i32 {
    let mut state = State::new();
    bind_standard_library(&mut state);

    match state.compile_file(input) {
        Ok(()) => {
            info!("{} compiled cleanly", input.display());
            0
        }
        Err(_) => 1,
    }
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run { input, config, verbose } => run(&input, load_config(config.as_ref()), verbose),
        Commands::Check { input } => check(&input),
    };

    process::exit(code);
}
