// elf.rs - ELF image access for 32-bit little-endian ARM binaries
//
// goblin supplies the header and section-header parsing; symbol and
// relocation entries are read straight out of section bytes so that the
// same accessors work for .dynsym, .symtab and both rel/rela flavors.

use goblin::elf::{header, section_header, Elf};

use crate::error::{Error, Result};

pub const SYM_ENTRY_SIZE: usize = 16;
pub const REL_ENTRY_SIZE: usize = 8;
pub const RELA_ENTRY_SIZE: usize = 12;

/// One section of the loaded image. `data` is `None` for sections without
/// file-backed bytes (SHT_NOBITS).
pub struct Section<'a> {
    pub index: usize,
    pub name: String,
    pub addr: u32,
    pub size: u32,
    pub data: Option<&'a [u8]>,
    pub sh_type: u32,
    pub link: usize,
    pub entsize: usize,
}

/// A parsed and validated ARM ELF image.
pub struct Image<'a> {
    pub sections: Vec<Section<'a>>,
}

impl<'a> Image<'a> {
    /// Parse and validate: the image must be 32-bit little-endian ARM.
    pub fn parse(data: &'a [u8]) -> Result<Image<'a>> {
        let elf = Elf::parse(data).map_err(Error::NotAnElf)?;

        if elf.header.e_machine != header::EM_ARM {
            return Err(Error::WrongMachine {
                found: elf.header.e_machine,
            });
        }
        if elf.is_64 {
            return Err(Error::WrongClass);
        }
        if !elf.little_endian {
            return Err(Error::WrongEndian);
        }

        let sections = elf
            .section_headers
            .iter()
            .enumerate()
            .map(|(index, sh)| {
                let name = elf
                    .shdr_strtab
                    .get_at(sh.sh_name)
                    .unwrap_or_default()
                    .to_string();
                let file_data = if sh.sh_type == section_header::SHT_NOBITS || sh.sh_size == 0 {
                    None
                } else {
                    let start = sh.sh_offset as usize;
                    start
                        .checked_add(sh.sh_size as usize)
                        .and_then(|end| data.get(start..end))
                };
                Section {
                    index,
                    name,
                    addr: sh.sh_addr as u32,
                    size: sh.sh_size as u32,
                    data: file_data,
                    sh_type: sh.sh_type,
                    link: sh.sh_link as usize,
                    entsize: sh.sh_entsize as usize,
                }
            })
            .collect();

        Ok(Image { sections })
    }

    pub fn section(&self, name: &str) -> Option<&Section<'a>> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// First section matching any of `names`, in order of preference.
    pub fn section_any(&self, names: &[&str]) -> Option<&Section<'a>> {
        names.iter().find_map(|name| self.section(name))
    }

    pub fn symbol_count(&self, symtab: &Section<'a>) -> usize {
        symtab
            .data
            .map(|d| d.len() / SYM_ENTRY_SIZE)
            .unwrap_or_default()
    }

    /// Read the symbol at `index` from a symbol-table section; the name is
    /// resolved through the section's linked string table.
    pub fn symbol(&self, symtab: &Section<'a>, index: usize) -> Option<Symbol> {
        let data = symtab.data?;
        let start = index.checked_mul(SYM_ENTRY_SIZE)?;
        let entry = data.get(start..start + SYM_ENTRY_SIZE)?;

        let name_offset = read_u32(entry, 0) as usize;
        let info = entry[12];
        Some(Symbol {
            name: self.string_at(symtab.link, name_offset).unwrap_or_default(),
            value: read_u32(entry, 4),
            size: read_u32(entry, 8),
            bind: info >> 4,
            typ: info & 0xf,
            shndx: read_u16(entry, 14),
        })
    }

    /// All entries of a relocation section. Rela entries carry an addend we
    /// have no use for; only offset, symbol index and type are read.
    pub fn relocations(&self, section: &Section<'a>) -> Vec<RelEntry> {
        let Some(data) = section.data else {
            return Vec::new();
        };
        let entry_size = if section.entsize >= RELA_ENTRY_SIZE {
            RELA_ENTRY_SIZE
        } else {
            REL_ENTRY_SIZE
        };

        data.chunks_exact(entry_size)
            .map(|entry| {
                let info = read_u32(entry, 4);
                RelEntry {
                    offset: read_u32(entry, 0),
                    sym: (info >> 8) as usize,
                    r_type: info & 0xff,
                }
            })
            .collect()
    }

    fn string_at(&self, strtab_index: usize, offset: usize) -> Option<String> {
        let data = self.sections.get(strtab_index)?.data?;
        let tail = data.get(offset..)?;
        let end = tail.iter().position(|&b| b == 0)?;
        Some(String::from_utf8_lossy(&tail[..end]).into_owned())
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub value: u32,
    pub size: u32,
    pub bind: u8,
    pub typ: u8,
    pub shndx: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct RelEntry {
    pub offset: u32,
    pub sym: usize,
    pub r_type: u32,
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(data[offset..offset + 2].try_into().unwrap())
}
