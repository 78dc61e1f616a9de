//! L0 Compiler CLI
//!
//! Command-line interface for compiling, running and inspecting L0
//! programs.

use clap::{CommandFactory, Parser as ClapParser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use l0c::{CallingConventionKind, Interpreter, RegisterAllocatorKind, X86Backend};
use std::io;
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "l0c")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "L0 compiler - compile, interpret and inspect L0 programs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum RaOption {
    Spilling,
    Remember,
}

#[derive(Clone, Copy, ValueEnum)]
enum CcOption {
    Stack,
    Register,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an .l0 file to a native executable (requires gcc -m32)
    Build {
        /// Input .l0 source file
        input: PathBuf,

        /// Output executable path (defaults to the input without its
        /// extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Run the IR optimizer fixpoint before emitting code
        #[arg(long)]
        opt: bool,

        /// Keep the intermediate assembly file (.s)
        #[arg(long)]
        keep_asm: bool,

        /// Register allocation strategy
        #[arg(long, value_enum, default_value = "spilling")]
        ra: RaOption,

        /// Calling convention
        #[arg(long, value_enum, default_value = "stack")]
        cc: CcOption,
    },

    /// Execute an .l0 file under the IR interpreter
    Run {
        /// Input .l0 source file
        input: PathBuf,

        /// Run the IR optimizer fixpoint first
        #[arg(long)]
        opt: bool,

        /// Abort after this many interpreter steps
        #[arg(long)]
        max_steps: Option<usize>,

        /// Trace every executed instruction
        #[arg(short = 't', long)]
        trace_instr: bool,

        /// Trace invoked functions
        #[arg(short = 'c', long)]
        trace_calls: bool,

        /// Dump the interpreter memory after execution
        #[arg(long)]
        dump_state: bool,
    },

    /// Dump intermediate artifacts of the pipeline
    Dump {
        /// Input .l0 source file
        input: PathBuf,

        /// Dump the abstract syntax tree
        #[arg(long)]
        ast: bool,

        /// Dump the IR code
        #[arg(long)]
        ir: bool,

        /// Dump the control-flow graphs as DOT into the given file
        #[arg(long, value_name = "FILE")]
        cfg: Option<PathBuf>,

        /// Dump the generated x86 assembly
        #[arg(long)]
        asm: bool,

        /// Run the IR optimizer fixpoint first
        #[arg(long)]
        opt: bool,

        /// Register allocation strategy (with --asm)
        #[arg(long, value_enum, default_value = "spilling")]
        ra: RaOption,

        /// Calling convention (with --asm)
        #[arg(long, value_enum, default_value = "stack")]
        cc: CcOption,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            opt,
            keep_asm,
            ra,
            cc,
        } => {
            let output = output.unwrap_or_else(|| {
                let stem = input.file_stem().unwrap_or_default();
                PathBuf::from(stem)
            });
            run_build(&input, &output, opt, keep_asm, ra, cc);
        }
        Commands::Run {
            input,
            opt,
            max_steps,
            trace_instr,
            trace_calls,
            dump_state,
        } => {
            run_execute(&input, opt, max_steps, trace_instr, trace_calls, dump_state);
        }
        Commands::Dump {
            input,
            ast,
            ir,
            cfg,
            asm,
            opt,
            ra,
            cc,
        } => {
            run_dump(&input, ast, ir, cfg.as_deref(), asm, opt, ra, cc);
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "l0c", &mut io::stdout());
        }
    }
}

fn read_source(input: &Path) -> String {
    match std::fs::read_to_string(input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error reading {}: {}", input.display(), e);
            process::exit(1);
        }
    }
}

fn backend_kinds(ra: RaOption, cc: CcOption) -> (RegisterAllocatorKind, CallingConventionKind) {
    let ra = match ra {
        RaOption::Spilling => RegisterAllocatorKind::Spilling,
        RaOption::Remember => RegisterAllocatorKind::Remember,
    };
    let cc = match cc {
        CcOption::Stack => CallingConventionKind::Stack,
        CcOption::Register => CallingConventionKind::Register,
    };
    (ra, cc)
}

fn compile_ir_or_exit(input: &Path, opt: bool) -> l0c::ir::TranslationUnit {
    match l0c::compile_to_ir(&read_source(input), opt) {
        Ok(ir) => ir,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run_build(
    input: &Path,
    output: &Path,
    opt: bool,
    keep_asm: bool,
    ra: RaOption,
    cc: CcOption,
) {
    let ir = compile_ir_or_exit(input, opt);
    let (ra, cc) = backend_kinds(ra, cc);
    let assembly = X86Backend::new(ra, cc).emit(&ir);

    if keep_asm {
        let asm_path = output.with_extension("s");
        if let Err(e) = std::fs::write(&asm_path, &assembly) {
            eprintln!("Error writing {}: {}", asm_path.display(), e);
            process::exit(1);
        }
        println!("Assembly saved to {}", asm_path.display());
    }

    match l0c::compile_executable(&assembly, output) {
        Ok(()) => println!("Compiled {} -> {}", input.display(), output.display()),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run_execute(
    input: &Path,
    opt: bool,
    max_steps: Option<usize>,
    trace_instr: bool,
    trace_calls: bool,
    dump_state: bool,
) {
    let ir = compile_ir_or_exit(input, opt);
    let mut machine = match Interpreter::new(&ir) {
        Ok(machine) => machine,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    machine.trace_instr = trace_instr;
    machine.trace_calls = trace_calls;

    let result = match machine.exec(max_steps) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Runtime error: {}", e);
            process::exit(1);
        }
    };

    if dump_state {
        print!("{}", machine.dump());
    }

    match result {
        Some(value) => {
            println!("Program returned: {} ({} steps)", value, machine.step_count);
        }
        None => {
            eprintln!(
                "No result: step limit of {} exceeded",
                machine.step_count
            );
            process::exit(1);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_dump(
    input: &Path,
    ast: bool,
    ir: bool,
    cfg: Option<&Path>,
    asm: bool,
    opt: bool,
    ra: RaOption,
    cc: CcOption,
) {
    if ast {
        match l0c::parse(&read_source(input)) {
            Ok(unit) => print!("{}", l0c::ast::dump(&unit)),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    let unit = compile_ir_or_exit(input, opt);

    if let Some(dot_path) = cfg {
        if let Err(e) = std::fs::write(dot_path, unit.to_dot()) {
            eprintln!("Error writing {}: {}", dot_path.display(), e);
            process::exit(1);
        }
        println!("CFGs written to {}", dot_path.display());
    }

    if ir {
        print!("{}", unit.dump());
    }

    if asm {
        let (ra, cc) = backend_kinds(ra, cc);
        print!("{}", X86Backend::new(ra, cc).emit(&unit));
    }
}
