//! `svm`: loads and executes Scatha bytecode programs.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context as _};
use clap::Parser;
use scatha_asm::Program;
use scatha_vm::{register_builtins, VirtualMachine};

#[derive(Debug, Parser)]
#[command(name = "svm", about = "Scatha virtual machine", version)]
struct Cli {
    /// The executable to load.
    #[arg(long)]
    binary: PathBuf,

    /// Disassemble to stdout and exit.
    #[arg(long)]
    print: bool,

    /// Print the execution time to stderr.
    #[arg(short, long)]
    time: bool,

    /// Arguments passed to the program's entry function.
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("svm: {error:#}");
            std::process::exit(-1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    if !cli.binary.exists() {
        bail!("no such file: {}", cli.binary.display());
    }
    let mut bytes = std::fs::read(&cli.binary)
        .with_context(|| format!("cannot read {}", cli.binary.display()))?;
    if bytes.is_empty() {
        bail!("empty binary: {}", cli.binary.display());
    }
    // Executables carry a shebang line ahead of the container.
    if bytes.starts_with(b"#!") {
        let end = bytes
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(bytes.len());
        bytes.drain(..end);
    }
    let program = Program::from_bytes(&bytes)?;
    if cli.print {
        print!("{}", scatha_asm::print_program(&program));
        return Ok(0);
    }
    let args: Vec<u64> = cli
        .args
        .iter()
        .map(|arg| {
            arg.parse::<i64>()
                .map(|v| v as u64)
                .with_context(|| format!("invalid program argument '{arg}'"))
        })
        .collect::<Result<_, _>>()?;
    let mut vm = VirtualMachine::new();
    register_builtins(&mut vm);
    vm.load_program(&program)?;
    let begin = Instant::now();
    let result = vm.execute(&args);
    if cli.time {
        eprintln!("executed in {:?}", begin.elapsed());
    }
    match result {
        Ok(value) => Ok(value as i32),
        Err(error) => {
            eprintln!("svm: {error}");
            Ok(-1)
        }
    }
}
