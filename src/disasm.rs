// disasm.rs - textual rendering of decoded instructions
//
// Maps the instruction model to the fixed mnemonic tables used by dump mode.
// Rendering is for human consumption; it is not an assembler round-trip.

use std::fmt;
use std::io::{self, Write};

use crate::arm::{
    HalfwordKind, HalfwordOffset, Instruction, Kind, Operand2, Register, ShiftAmount, Shifter,
    TransferOffset,
};
use crate::elf::Section;

pub const OPCODE_NAMES: [&str; 16] = [
    "and", "eor", "sub", "rsb", "add", "adc", "sbc", "rsc", "tst", "teq", "cmp", "cmn", "orr",
    "mov", "bic", "mvn",
];

pub const REGISTER_NAMES: [&str; 16] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr",
    "pc",
];

pub const SHIFT_NAMES: [&str; 4] = ["lsl", "lsr", "asr", "ror"];

pub const CONDITION_NAMES: [&str; 16] = [
    "eq", "ne", "cs", "cc", "mi", "pl", "vs", "vc", "hi", "ls", "ge", "lt", "gt", "le", "al", "nv",
];

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REGISTER_NAMES[self.index()])
    }
}

struct ShifterDisplay(Shifter);

impl fmt::Display for ShifterDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        write!(f, "{}", s.rm)?;
        match s.amount {
            ShiftAmount::Imm(0) => Ok(()),
            ShiftAmount::Imm(n) => {
                write!(f, ", {} #{}", SHIFT_NAMES[s.kind.table_index()], n)
            }
            ShiftAmount::Reg(rs) => write!(f, ", {} {}", SHIFT_NAMES[s.kind.table_index()], rs),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) ", CONDITION_NAMES[self.cond.bits() as usize])?;

        match self.kind {
            Kind::DataProcessing { op, rd, rn, op2 } => {
                write!(f, "{} {}, {}, ", OPCODE_NAMES[op.table_index()], rd, rn)?;
                match op2 {
                    Operand2::Imm(imm) => write!(f, "#{imm}"),
                    Operand2::Shifter(s) => write!(f, "{}", ShifterDisplay(s)),
                }
            }

            Kind::Multiply {
                accumulate,
                rd,
                rn,
                rs,
                rm,
            } => {
                if accumulate {
                    write!(f, "mla {rd}, {rm}, {rs}, {rn}")
                } else {
                    write!(f, "mul {rd}, {rm}, {rs}")
                }
            }

            Kind::MultiplyLong {
                signed,
                accumulate,
                rd_hi,
                rd_lo,
                rs,
                rm,
            } => {
                let mnem = match (signed, accumulate) {
                    (true, true) => "smlal",
                    (true, false) => "smull",
                    (false, true) => "umlal",
                    (false, false) => "umull",
                };
                write!(f, "{mnem} {rd_lo}, {rd_hi}, {rm}, {rs}")
            }

            Kind::SingleDataSwap { byte, rn, rd, rm } => {
                write!(f, "{} {rd}, {rm}, [{rn}]", if byte { "swpb" } else { "swp" })
            }

            Kind::BranchExchange { rm } => write!(f, "bx {rm}"),

            Kind::SingleTransfer {
                byte,
                write_back,
                load,
                rn,
                rd,
                add,
                offset,
                ..
            } => {
                write!(f, "{}", if load { "ldr" } else { "str" })?;
                if byte {
                    write!(f, "b")?;
                }
                write!(f, " {rd}, [{rn}")?;
                match offset {
                    TransferOffset::Imm(0) => {}
                    TransferOffset::Imm(imm) => {
                        write!(f, ", #{}{}", if add { "" } else { "-" }, imm)?
                    }
                    TransferOffset::Shifter(s) => write!(f, ", {}", ShifterDisplay(s))?,
                }
                write!(f, "]")?;
                if write_back {
                    write!(f, "!")?;
                }
                Ok(())
            }

            Kind::HalfwordTransfer {
                write_back,
                load,
                rn,
                rd,
                kind,
                offset,
                ..
            } => {
                let suffix = match kind {
                    HalfwordKind::Swap => "swp",
                    HalfwordKind::UnsignedHalf => "h",
                    HalfwordKind::SignedByte => "sb",
                    HalfwordKind::SignedHalf => "sh",
                };
                write!(f, "{}{} {rd}, [{rn}", if load { "ldr" } else { "str" }, suffix)?;
                match offset {
                    HalfwordOffset::Imm(0) => {}
                    HalfwordOffset::Imm(imm) => write!(f, ", #{imm}")?,
                    HalfwordOffset::Reg(rm) => write!(f, ", {rm}")?,
                }
                write!(f, "]")?;
                if write_back {
                    write!(f, "!")?;
                }
                Ok(())
            }

            Kind::BlockTransfer {
                write_back,
                load,
                rn,
                reg_list,
                ..
            } => {
                if write_back && rn == Register::SP {
                    write!(f, "{}", if load { "pop" } else { "push" })?;
                } else {
                    write!(f, "{} {rn}", if load { "ldm" } else { "stm" })?;
                }
                write!(f, " {{")?;
                let mut first = true;
                for i in 0..16 {
                    if reg_list & (1 << i) != 0 {
                        if !first {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", REGISTER_NAMES[i])?;
                        first = false;
                    }
                }
                write!(f, "}}")
            }

            Kind::Branch { link, offset } => {
                write!(f, "{} #{offset}", if link { "bl" } else { "b" })
            }

            Kind::SoftwareInterrupt => write!(f, "swi"),

            Kind::Invalid => write!(f, "invalid"),
        }
    }
}

/// Write the per-instruction listing of one section in dump format.
pub fn dump_instructions(out: &mut dyn Write, section: &Section) -> io::Result<()> {
    writeln!(
        out,
        "SECTION \"{}\" (addr 0x{:x}, size {}):",
        section.name, section.addr, section.size
    )?;

    if let Some(data) = section.data {
        for (i, chunk) in data.chunks_exact(4).enumerate() {
            let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let addr = section.addr + (i as u32) * 4;
            writeln!(out, "\t0x{:x}: {}", addr, Instruction::decode(raw))?;
        }
    }

    writeln!(out)
}
