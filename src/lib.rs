// arm2c - static ARM to C recompiler
//
// Turns a 32-bit little-endian ARMv4 ELF binary into a regenerated C project
// that links against the armrt runtime library.
//
// # Architecture
//
// The recompiler works in several phases:
//
// 1. **ELF parsing** (`elf.rs`): validate the image, expose sections,
//    symbols and relocation entries
// 2. **Decoding** (`arm.rs`): decode ARM words to structured form
// 3. **Analysis** (`analysis.rs`): walk the dynamic relocation tables and
//    emulate the PLT to map dependencies and exports
// 4. **Emission** (`emit.rs`): write the Makefile, headers and C sources
//
// The emulator (`emu.rs`) drives the semantic kernel (`cpu.rs`) over either
// the hosted stack/heap memory (`state.rs`) or the read-only section bytes
// of the input image, which is how the PLT walk runs.

pub mod analysis;
pub mod arm;
pub mod cpu;
pub mod disasm;
pub mod elf;
pub mod emit;
pub mod emu;
pub mod error;
pub mod state;

use std::path::Path;

pub use analysis::{analyze, Analysis, Function};
pub use arm::{Instruction, Kind};
pub use cpu::{Cpu, Flags};
pub use elf::Image;
pub use emit::EmitOptions;
pub use emu::{ElfMemory, Emulator};
pub use error::Error;
pub use state::{GuestMemory, MemoryLayout, RuntimeMemory};

/// Recompile an ARM ELF binary into a C project under `out_dir`.
pub fn recompile(elf_data: &[u8], out_dir: &Path, options: EmitOptions) -> anyhow::Result<Analysis> {
    let image = Image::parse(elf_data)?;
    let analysis = analysis::analyze(&image)?;
    emit::emit_project(&image, &analysis, out_dir, options)?;
    Ok(analysis)
}
