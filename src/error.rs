// error.rs - error kinds shared across the crate
//
// Fatal ELF-shape errors surface from image parsing and analysis entry;
// emulation errors surface from the address mapper and the step loop.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not an ELF file")]
    NotAnElf(#[source] goblin::error::Error),

    #[error("not an ARM binary (e_machine = {found:#x})")]
    WrongMachine { found: u16 },

    #[error("only 32-bit ELF objects are supported")]
    WrongClass,

    #[error("big-endian ELF objects are not supported")]
    WrongEndian,

    #[error("missing .text section")]
    MissingTextSection,

    #[error("no section maps guest address {addr:#010x}")]
    AddressNotMapped { addr: u32 },

    #[error("invalid instruction {raw:#010x} at {addr:#010x}")]
    InvalidInstruction { addr: u32, raw: u32 },

    #[error("unsupported instruction: {detail}")]
    UnsupportedInstruction { detail: &'static str },
}
