//! `scathac`: compiles Scatha IR modules to bytecode executables.
//!
//! The source language frontend runs as a separate tool; this driver
//! consumes textual IR, optimizes it, and emits either an executable (a
//! `#!`-prefixed binary `svm` runs directly) or a raw `.scbin` container.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context as _};
use clap::Parser;
use scatha_types::{DebugInfo, OffsetRange, DEBUG_INFO_SUFFIX};

#[derive(Debug, Parser)]
#[command(name = "scathac", about = "Scatha compiler", version)]
struct Cli {
    /// Input IR files.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Run the default optimization pipeline.
    #[arg(short, long)]
    optimize: bool,

    /// Emit a debug info sidecar next to the output.
    #[arg(short, long)]
    debug: bool,

    /// Print the compile time to stderr.
    #[arg(short, long)]
    time: bool,

    /// Emit a raw .scbin binary instead of an executable.
    #[arg(short, long)]
    binary_only: bool,

    /// Destination directory.
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    if let Err(error) = run(&cli) {
        eprintln!("scathac: {error:#}");
        std::process::exit(-1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let begin = Instant::now();
    let mut text = String::new();
    for input in &cli.inputs {
        if !input.exists() {
            bail!("no such file: {}", input.display());
        }
        let source = std::fs::read_to_string(input)
            .with_context(|| format!("cannot read {}", input.display()))?;
        text.push_str(&source);
        text.push('\n');
    }
    let (mut ctx, mut module) =
        scatha_ir::parse(&text).map_err(|error| anyhow::anyhow!("{error}"))?;
    if cli.optimize {
        scatha_ir::passes::default_pipeline().run(&mut ctx, &mut module);
    }
    let stream = scatha_codegen::codegen(&mut ctx, &mut module)?;
    let result = scatha_asm::assemble(&stream)?;
    let bytes = result.program.to_bytes();

    let stem = cli.inputs[0]
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_owned());
    let out_dir = cli.out_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("cannot create {}", out_dir.display()))?;
    let out_path = if cli.binary_only {
        out_dir.join(format!("{stem}.scbin"))
    } else {
        out_dir.join(&stem)
    };
    let mut output = Vec::new();
    if !cli.binary_only {
        output.extend_from_slice(b"#!/usr/bin/env svm --binary\n");
    }
    output.extend_from_slice(&bytes);
    std::fs::write(&out_path, &output)
        .with_context(|| format!("cannot write {}", out_path.display()))?;
    #[cfg(unix)]
    if !cli.binary_only {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = std::fs::metadata(&out_path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        std::fs::set_permissions(&out_path, permissions)?;
    }

    if cli.debug {
        let info = debug_info(cli, &result);
        let sidecar = out_path.with_file_name(format!(
            "{}{DEBUG_INFO_SUFFIX}",
            out_path.file_name().unwrap().to_string_lossy()
        ));
        std::fs::write(&sidecar, serde_json::to_string_pretty(&info)?)
            .with_context(|| format!("cannot write {}", sidecar.display()))?;
    }
    if cli.time {
        eprintln!("compiled in {:?}", begin.elapsed());
    }
    Ok(())
}

/// Function ranges come from the symbol table: each public symbol spans up
/// to the next symbol or the end of the text section.
fn debug_info(cli: &Cli, result: &scatha_asm::AssemblyResult) -> DebugInfo {
    let mut starts: Vec<(u64, String)> = result
        .symbols
        .iter()
        .map(|(name, &offset)| (offset, name.clone()))
        .collect();
    starts.sort();
    let mut functions = BTreeMap::new();
    for (index, (start, name)) in starts.iter().enumerate() {
        let end = starts
            .get(index + 1)
            .map(|(next, _)| *next)
            .unwrap_or(result.program.text.len() as u64);
        functions.insert(name.clone(), OffsetRange { start: *start, end });
    }
    DebugInfo {
        source_files: cli
            .inputs
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
        functions,
        locations: Vec::new(),
    }
}
