// analysis.rs - dependency and export analysis of an ARM ELF image
//
// Combines static traversal of the dynamic relocation and symbol tables with
// emulated execution of the PLT, producing the three maps emission consumes:
// GOT offset -> symbol value, PLT byte range -> dependency, and .text
// address -> exported function.

use std::collections::HashMap;

use goblin::elf::sym::{STB_GLOBAL, STB_WEAK, STT_FUNC};
use tracing::{debug, info, warn};

use crate::arm::{Kind, Register};
use crate::cpu::PC_READ_AHEAD;
use crate::elf::{Image, Section};
use crate::emu::{ElfMemory, Emulator};
use crate::error::{Error, Result};

/// A function the binary depends on or exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub address: u32,
    pub is_external: bool,
}

/// Result of analyzing one image.
#[derive(Debug, Default)]
pub struct Analysis {
    /// (GOT offset, symbol value) pairs from the dynamic relocation table.
    pub got_mappings: Vec<(u32, u32)>,
    /// Dependency functions keyed by their GOT offset.
    pub deps_by_got_offset: HashMap<u32, Function>,
    /// Exported functions keyed by their .text address.
    pub exports_by_address: HashMap<u32, Function>,
    /// Every byte of a resolved PLT stub, keyed to the GOT offset of the
    /// dependency it dispatches to. The offset is a stable handle into
    /// `deps_by_got_offset`.
    pub plt_range_to_dep: HashMap<u32, u32>,
}

impl Analysis {
    /// The dependency whose PLT stub covers `addr`, if any.
    pub fn dep_at(&self, addr: u32) -> Option<&Function> {
        self.plt_range_to_dep
            .get(&addr)
            .and_then(|offset| self.deps_by_got_offset.get(offset))
    }
}

/// Run the full analysis pipeline over a validated image.
pub fn analyze(image: &Image) -> Result<Analysis> {
    let analyzer = Analyzer::new(image)?;
    Ok(analyzer.run())
}

struct Analyzer<'a> {
    image: &'a Image<'a>,
    text_index: usize,
    plt: Option<&'a Section<'a>>,
    dynsym: Option<&'a Section<'a>>,
}

impl<'a> Analyzer<'a> {
    fn new(image: &'a Image<'a>) -> Result<Analyzer<'a>> {
        let text = image.section(".text").ok_or(Error::MissingTextSection)?;
        Ok(Analyzer {
            image,
            text_index: text.index,
            plt: image.section(".plt"),
            dynsym: image.section(".dynsym"),
        })
    }

    fn run(self) -> Analysis {
        let mut analysis = Analysis::default();

        self.scan_dynamic_relocs(&mut analysis);

        // The PLT steps only make sense with both tables present.
        if let (Some(plt), Some(dynsym)) = (self.plt, self.dynsym) {
            self.scan_plt_relocs(dynsym, &mut analysis);
            self.walk_plt(plt, &mut analysis);
        } else {
            info!("no .plt/.dynsym pair, skipping dependency analysis");
        }

        self.scan_exports(&mut analysis);
        analysis
    }

    /// Collect (offset, symbol value) pairs from .rel.dyn / .rela.dyn.
    fn scan_dynamic_relocs(&self, out: &mut Analysis) {
        let Some(reldyn) = self.image.section_any(&[".rel.dyn", ".rela.dyn"]) else {
            info!("no dynamic relocation table");
            return;
        };
        let Some(dynsym) = self.dynsym else {
            info!("dynamic relocations without .dynsym, skipping");
            return;
        };

        for entry in self.image.relocations(reldyn) {
            if let Some(sym) = self.image.symbol(dynsym, entry.sym) {
                out.got_mappings.push((entry.offset, sym.value));
            }
        }

        info!(count = out.got_mappings.len(), "mapped dynamic relocation symbols");
    }

    /// Record one dependency per .rel.plt entry, keyed by GOT offset. A zero
    /// symbol value means the dynamic linker provides the function; anything
    /// else points at a function carried inside the binary.
    fn scan_plt_relocs(&self, dynsym: &Section<'a>, out: &mut Analysis) {
        let Some(relplt) = self.image.section_any(&[".rel.plt", ".rela.plt"]) else {
            info!("no PLT relocation table");
            return;
        };

        for entry in self.image.relocations(relplt) {
            let symbol = self.image.symbol(dynsym, entry.sym);
            let (name, value) = match symbol {
                Some(sym) if !sym.name.is_empty() => (sym.name, sym.value),
                Some(sym) => (format!("unnamed_0x{:x}", entry.offset), sym.value),
                None => (format!("unnamed_0x{:x}", entry.offset), 0),
            };

            if value != 0 {
                debug!(%name, "dependency is internal");
            }

            // Same-named symbols overwrite silently.
            out.deps_by_got_offset.insert(
                entry.offset,
                Function {
                    name,
                    address: if value != 0 { value } else { entry.offset },
                    is_external: value == 0,
                },
            );
        }

        info!(count = out.deps_by_got_offset.len(), "found dependency functions");
    }

    /// Emulate the PLT to attribute each stub's byte range to a dependency.
    ///
    /// A stub ends in a load into the program counter through a base register
    /// holding GOT offset + 4 (the emulated read of pc overshoots the
    /// hardware value by one word, the correction restores the table key).
    fn walk_plt(&self, plt: &Section<'a>, out: &mut Analysis) {
        let mut emu = Emulator::at(ElfMemory::new(self.image), plt.addr);
        let mut start = plt.addr;

        loop {
            let instr = match emu.step() {
                Ok(Some(instr)) => instr,
                Ok(None) => break,
                Err(Error::AddressNotMapped { addr }) => {
                    debug!("PLT walk left the image at {addr:#010x}");
                    break;
                }
                Err(err) => {
                    warn!(%err, "PLT walk aborted");
                    break;
                }
            };

            let Kind::SingleTransfer {
                load: true, rd, rn, ..
            } = instr.kind
            else {
                continue;
            };
            if rd != Register::PC {
                continue;
            }

            let got_offset = emu.cpu.reg(rn).wrapping_sub(4);
            if !out.deps_by_got_offset.contains_key(&got_offset) {
                continue;
            }

            let end = emu.cpu.pc().wrapping_sub(PC_READ_AHEAD);
            for addr in start..end {
                out.plt_range_to_dep.insert(addr, got_offset);
            }
            start = end;
        }

        info!(count = out.plt_range_to_dep.len(), "mapped PLT bytes to dependencies");
    }

    /// Exported functions: global or weak FUNC symbols defined in .text.
    fn scan_exports(&self, out: &mut Analysis) {
        let Some(dynsym) = self.dynsym else {
            info!("no .dynsym, skipping exports");
            return;
        };

        for index in 0..self.image.symbol_count(dynsym) {
            let Some(sym) = self.image.symbol(dynsym, index) else {
                continue;
            };
            if sym.bind != STB_GLOBAL && sym.bind != STB_WEAK {
                continue;
            }
            if sym.typ != STT_FUNC || sym.shndx as usize != self.text_index {
                continue;
            }

            out.exports_by_address.insert(
                sym.value,
                Function {
                    name: sym.name,
                    address: sym.value,
                    is_external: false,
                },
            );
        }

        info!(count = out.exports_by_address.len(), "found exported functions");
    }
}
