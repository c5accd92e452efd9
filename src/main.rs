// arm2c - static ARM to C recompiler
//
// Usage:
//   arm2c recomp input.so out/ [--minify]
//   arm2c dump input.so dump.txt

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use goblin::elf::section_header::{SHT_DYNSYM, SHT_SYMTAB};
use goblin::elf::sym::STT_FUNC;
use tracing_subscriber::EnvFilter;

use arm2c::elf::{Image, Section};
use arm2c::emit::EmitOptions;
use arm2c::error::Error;
use arm2c::{disasm, recompile};

#[derive(Parser, Debug)]
#[command(name = "arm2c")]
#[command(about = "Static ARM to C recompiler and analysis tool")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Recompile an ARM ELF binary into a C project
    Recomp {
        /// Input ARM ELF binary
        input: PathBuf,
        /// Directory to write the project files into
        output_dir: PathBuf,
        /// Skip the per-line disassembly comments in the generated code
        #[arg(long)]
        minify: bool,
    },
    /// Write a human-readable disassembly of the binary
    Dump {
        /// Input ARM ELF binary
        input: PathBuf,
        /// Output text file
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match args.mode {
        Mode::Recomp {
            input,
            output_dir,
            minify,
        } => {
            let data = std::fs::read(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            recompile(&data, &output_dir, EmitOptions { minify })
                .context("recompilation failed")?;
        }
        Mode::Dump { input, output } => {
            let data = std::fs::read(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            dump(&data, &output).context("dump failed")?;
        }
    }

    Ok(())
}

fn dump(data: &[u8], output: &PathBuf) -> Result<()> {
    let image = Image::parse(data)?;
    let mut out = BufWriter::new(
        File::create(output).with_context(|| format!("failed to create {}", output.display()))?,
    );

    if let Some(symtab) = image.section(".symtab") {
        if symtab.sh_type == SHT_SYMTAB {
            dump_symbols(&mut out, &image, symtab)?;
        }
    }
    if let Some(dynsym) = image.section(".dynsym") {
        if dynsym.sh_type == SHT_DYNSYM {
            dump_symbols(&mut out, &image, dynsym)?;
        }
    }

    let text = image.section(".text").ok_or(Error::MissingTextSection)?;
    disasm::dump_instructions(&mut out, text)?;

    if let Some(plt) = image.section(".plt") {
        disasm::dump_instructions(&mut out, plt)?;
    }

    Ok(())
}

fn dump_symbols(out: &mut dyn Write, image: &Image, section: &Section) -> Result<()> {
    writeln!(
        out,
        "SECTION \"{}\" (addr 0x{:x}, size {}):",
        section.name, section.addr, section.size
    )?;

    for index in 0..image.symbol_count(section) {
        let Some(sym) = image.symbol(section, index) else {
            continue;
        };
        if sym.typ != STT_FUNC {
            continue;
        }
        writeln!(out, "\t0x{:x}: {}", sym.value, sym.name)?;
    }

    writeln!(out)?;
    Ok(())
}
