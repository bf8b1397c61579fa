//! metast command-line driver

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use metast_codegen::bytecode::Module;
use metast_codegen::Artifact;
use metast_driver::{init_logging, parse_input, DriverError, Session};
use metast_error::{DiagnosticRenderer, Level};
use metast_ir::{BackendKind, CompilationUnit, CompileOptions, Environment, OptLevel};
use metast_runtime::Limits;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Code generation backend
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// Portable bytecode (runnable with `metast run`)
    Bytecode,
    /// JavaScript source
    Js,
    /// Spreadsheet formula
    Formula,
}

impl From<Backend> for BackendKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Bytecode => BackendKind::Bytecode,
            Backend::Js => BackendKind::Js,
            Backend::Formula => BackendKind::Formula,
        }
    }
}

/// Optimization level
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Opt {
    None,
    Basic,
    Full,
}

impl From<Opt> for OptLevel {
    fn from(opt: Opt) -> Self {
        match opt {
            Opt::None => OptLevel::None,
            Opt::Basic => OptLevel::Basic,
            Opt::Full => OptLevel::Full,
        }
    }
}

#[derive(Parser)]
#[command(name = "metast")]
#[command(author = "Guilherme Mendes")]
#[command(version = "0.1.0")]
#[command(about = "Typed AST metalanguage compiler", long_about = None)]
struct Cli {
    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Builds and lowers programs without writing anything
    Check {
        /// Program files (JSON)
        #[arg(value_name = "FILE", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },

    /// Shows the program's IR, optionally after optimization
    Ir {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Optimize at this level before printing
        #[arg(long)]
        opt: Option<Opt>,
    },

    /// Compiles a program to an artifact
    Build {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Overrides the program's backend
        #[arg(short, long)]
        backend: Option<Backend>,

        /// Overrides the program's optimization level
        #[arg(long)]
        opt: Option<Opt>,

        /// Output file (default: stdout for text, FILE.mtbc for bytecode)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Also print a bytecode listing
        #[arg(long)]
        listing: bool,
    },

    /// Compiles a program to bytecode and runs it
    Run {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Input binding, repeatable
        #[arg(short, long = "input", value_name = "NAME=VALUE")]
        inputs: Vec<String>,

        /// Instruction budget
        #[arg(long)]
        fuel: Option<u64>,

        #[arg(long)]
        opt: Option<Opt>,
    },
}

fn main() {
    let cli = Cli::parse();
    if cli.verbose > 0 {
        init_logging(cli.verbose);
    }

    if let Err(err) = execute(cli.command) {
        let renderer = DiagnosticRenderer::new();
        eprintln!("{}", renderer.render(&err.diagnostic()));
        std::process::exit(1);
    }
}

fn execute(command: Commands) -> Result<(), DriverError> {
    match command {
        Commands::Check { inputs } => {
            let diagnostics = Session::new().check_files(&inputs);
            if !diagnostics.is_empty() {
                eprint!("{}", diagnostics.render(&DiagnosticRenderer::new()));
            }
            let errors = diagnostics.iter().filter(|d| d.level == Level::Error).count();
            println!(
                "{} file(s) checked: {} error(s), {} warning(s)",
                inputs.len(),
                errors,
                diagnostics.len() - errors
            );
            if diagnostics.has_errors() {
                std::process::exit(1);
            }
        }

        Commands::Ir { input, opt } => {
            let session = Session::new();
            let mut unit = session.load_file(&input)?;
            if let Some(opt) = opt {
                unit = override_options(unit, None, Some(opt));
                unit = session.optimize(&unit)?;
            }
            print!("{}", render_ir(&unit));
        }

        Commands::Build {
            input,
            backend,
            opt,
            output,
            listing,
        } => {
            let session = Session::new();
            let unit = override_options(session.load_file(&input)?, backend, opt);
            let artifact = session.compile(&unit)?;
            write_artifact(&input, output.as_deref(), &artifact)?;
            if let (true, Artifact::Bytecode { bytes }) = (listing, &artifact) {
                print!("{}", Module::decode(bytes)?.disassemble());
            }
        }

        Commands::Run {
            input,
            inputs,
            fuel,
            opt,
        } => {
            let limits = match fuel {
                Some(fuel) => Limits::default().with_fuel(fuel),
                None => Limits::default(),
            };
            let session = Session::new().with_limits(limits);
            let unit = override_options(session.load_file(&input)?, None, opt);
            let mut env = Environment::new();
            for arg in &inputs {
                let (name, value) = parse_input(&unit, arg)?;
                env.bind_value(name, value);
            }
            let value = session.run(&unit, &env)?;
            println!("{}", value);
        }
    }
    Ok(())
}

fn override_options(unit: CompilationUnit, backend: Option<Backend>, opt: Option<Opt>) -> CompilationUnit {
    let mut options: CompileOptions = unit.options();
    if let Some(backend) = backend {
        options = options.with_backend(backend.into());
    }
    if let Some(opt) = opt {
        options = options.with_opt_level(opt.into());
    }
    unit.with_options(options)
}

fn render_ir(unit: &CompilationUnit) -> String {
    let mut out = String::new();
    for (name, ty) in unit.inputs().signature() {
        out.push_str(&format!("input {}: {}\n", name, ty));
    }
    for def in unit.functions() {
        let params: Vec<String> = def.params().map(|(n, t)| format!("{}: {}", n, t)).collect();
        out.push_str(&format!(
            "fn {}({}) -> {} = {}\n",
            def.name(),
            params.join(", "),
            def.sig().ret,
            def.body()
        ));
    }
    out.push_str(&format!("entry: {} = {}\n", unit.entry().ty(), unit.entry()));
    out
}

fn write_artifact(input: &Path, output: Option<&Path>, artifact: &Artifact) -> Result<(), DriverError> {
    let path = match (output, artifact) {
        (Some(path), _) => path.to_path_buf(),
        (None, Artifact::Source { text, .. }) => {
            print!("{}", text);
            return Ok(());
        }
        (None, Artifact::Bytecode { .. }) => input.with_extension("mtbc"),
    };
    fs::write(&path, artifact.as_bytes()).map_err(|e| DriverError::io(&path, e))?;
    debug!(path = %path.display(), bytes = artifact.len(), "artifact written");
    println!("{} written ({} bytes)", path.display(), artifact.len());
    Ok(())
}
