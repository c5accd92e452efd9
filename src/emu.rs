// emu.rs - fetch/decode/dispatch loop and the ELF-backed address mapper
//
// The loop models just enough of the architecture to walk PLT stubs:
// data-processing, mul/mla and single data transfers execute (the latter
// without the data copy), everything else falls through as a no-op.

use tracing::warn;

use crate::arm::{Instruction, Kind, Opcode, Operand2, Register, TransferOffset};
use crate::cpu::{Cpu, PC_READ_AHEAD};
use crate::elf::Image;
use crate::error::{Error, Result};
use crate::state::{GuestMemory, MemoryLayout, RuntimeMemory};

pub struct Emulator<M> {
    pub cpu: Cpu,
    pub mem: M,
}

impl<M: GuestMemory> Emulator<M> {
    pub fn new(mem: M) -> Emulator<M> {
        Emulator {
            cpu: Cpu::new(),
            mem,
        }
    }

    /// An emulator whose first fetch happens at `addr`.
    pub fn at(mem: M, addr: u32) -> Emulator<M> {
        let mut emu = Emulator::new(mem);
        emu.cpu.set_pc(addr);
        emu
    }

    /// Execute one instruction. Returns the decoded instruction, or
    /// `Ok(None)` once the program counter leaves fetchable code. Effects
    /// are ordered: fetch, PC advance, decode, condition check, dispatch.
    pub fn step(&mut self) -> Result<Option<Instruction>> {
        let pc = self.cpu.pc();
        let fetch_addr = pc.wrapping_sub(PC_READ_AHEAD);

        let Some(raw) = self.mem.fetch_word(fetch_addr)? else {
            return Ok(None);
        };
        self.cpu.set_reg(Register::PC, pc.wrapping_add(4));

        let instr = Instruction::decode(raw);
        if !self.cpu.check_cond(instr.cond) {
            return Ok(Some(instr));
        }

        let s = instr.set_cond;
        match instr.kind {
            Kind::DataProcessing { op, rd, rn, op2 } => {
                let value = match op2 {
                    Operand2::Imm(imm) => imm,
                    Operand2::Shifter(sh) => self.cpu.shifter_value(sh),
                };
                match op {
                    Opcode::And => self.cpu.and(s, rd, rn, value),
                    Opcode::Eor => self.cpu.eor(s, rd, rn, value),
                    Opcode::Sub => self.cpu.sub(s, rd, rn, value),
                    Opcode::Rsb => self.cpu.rsb(s, rd, rn, value),
                    Opcode::Add => self.cpu.add(s, rd, rn, value),
                    Opcode::Adc => self.cpu.adc(s, rd, rn, value),
                    Opcode::Sbc => self.cpu.sbc(s, rd, rn, value),
                    Opcode::Rsc => self.cpu.rsc(s, rd, rn, value),
                    Opcode::Tst => self.cpu.tst(rn, value),
                    Opcode::Teq => self.cpu.teq(rn, value),
                    Opcode::Cmp => self.cpu.cmp(rn, value),
                    Opcode::Cmn => self.cpu.cmn(rn, value),
                    Opcode::Orr => self.cpu.orr(s, rd, rn, value),
                    Opcode::Mov => self.cpu.mov(s, rd, value),
                    Opcode::Bic => self.cpu.bic(s, rd, rn, value),
                    Opcode::Mvn => self.cpu.mvn(s, rd, value),
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
                    self.cpu.mla(s, rd, rn, rs, rm);
                } else {
                    self.cpu.mul(s, rd, rs, rm);
                }
            }

            Kind::SingleTransfer {
                pre_index,
                add,
                byte,
                write_back,
                load,
                rn,
                rd,
                offset,
            } => {
                let offset = match offset {
                    TransferOffset::Imm(imm) => imm as u32,
                    TransferOffset::Shifter(sh) => self.cpu.shifter_value(sh),
                };
                if load {
                    self.cpu.ldr(
                        &self.mem, pre_index, add, byte, write_back, rn, rd, offset, false,
                    )?;
                } else {
                    self.cpu.str(
                        &mut self.mem,
                        pre_index,
                        add,
                        byte,
                        write_back,
                        rn,
                        rd,
                        offset,
                        false,
                    )?;
                }
            }

            Kind::Invalid => {
                return Err(Error::InvalidInstruction {
                    addr: fetch_addr,
                    raw,
                })
            }

            // Branches, block transfers and the rest do not occur inside PLT
            // stubs in any form that matters here.
            _ => {}
        }

        Ok(Some(instr))
    }
}

impl Emulator<RuntimeMemory> {
    /// A hosted emulator over the stack/heap memory, with the stack pointer
    /// pointing at the top of the stack window.
    pub fn hosted(layout: MemoryLayout) -> Emulator<RuntimeMemory> {
        let mut emu = Emulator::new(RuntimeMemory::new(layout));
        let sp = emu.mem.initial_sp();
        emu.cpu.set_reg(Register::SP, sp);
        emu
    }
}

/// Read-only guest memory backed by the sections of a loaded ELF image.
/// Translation scans for the section whose address range contains the guest
/// address; the matching byte comes from the section's file data.
pub struct ElfMemory<'a> {
    image: &'a Image<'a>,
}

impl<'a> ElfMemory<'a> {
    pub fn new(image: &'a Image<'a>) -> ElfMemory<'a> {
        ElfMemory { image }
    }

    /// Translate a guest address to (section index, byte offset).
    pub fn resolve(&self, addr: u32) -> Option<(usize, usize)> {
        self.image
            .sections
            .iter()
            .find(|s| s.size > 0 && addr >= s.addr && addr - s.addr < s.size)
            .map(|s| (s.index, (addr - s.addr) as usize))
    }

    /// Inverse of `resolve`.
    pub fn map(&self, section_index: usize, offset: usize) -> Option<u32> {
        let section = self.image.sections.get(section_index)?;
        ((offset as u32) < section.size).then(|| section.addr + offset as u32)
    }
}

impl GuestMemory for ElfMemory<'_> {
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let (index, offset) = self
            .resolve(addr)
            .ok_or(Error::AddressNotMapped { addr })?;
        let bytes = self.image.sections[index]
            .data
            .and_then(|d| d.get(offset..offset + buf.len()))
            .ok_or(Error::AddressNotMapped { addr })?;
        buf.copy_from_slice(bytes);
        Ok(())
    }

    // The mapping is read-only; stores have nowhere to land.
    fn write(&mut self, addr: u32, _buf: &[u8]) -> Result<()> {
        Err(Error::AddressNotMapped { addr })
    }

    fn fetch_word(&self, addr: u32) -> Result<Option<u32>> {
        let (index, offset) = self
            .resolve(addr)
            .ok_or(Error::AddressNotMapped { addr })?;
        let section = &self.image.sections[index];
        let Some(data) = section.data else {
            warn!(section = %section.name, "section has no loaded bytes");
            return Ok(None);
        };
        match data.get(offset..offset + 4) {
            Some(chunk) => Ok(Some(u32::from_le_bytes(chunk.try_into().unwrap()))),
            None => Err(Error::AddressNotMapped { addr }),
        }
    }
}
