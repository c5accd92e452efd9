// emit.rs - regenerated C project output
//
// Writes a small buildable project: a Makefile linking against the armrt
// runtime library, one extern declaration per dependency, the GOT and PLT
// tables as data, and the translated code. Each translated instruction is a
// call into the runtime kernel; --minify drops the per-line disassembly.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::analysis::Analysis;
use crate::arm::{
    Condition, HalfwordKind, HalfwordOffset, Instruction, Kind, Opcode, Operand2, Register,
    ShiftAmount, Shifter, TransferOffset,
};
use crate::disasm::OPCODE_NAMES;
use crate::elf::{Image, Section};

#[derive(Debug, Clone, Copy, Default)]
pub struct EmitOptions {
    pub minify: bool,
}

pub fn emit_project(
    image: &Image,
    analysis: &Analysis,
    out_dir: &Path,
    options: EmitOptions,
) -> io::Result<()> {
    fs::create_dir_all(out_dir)?;

    emit_makefile(out_dir)?;
    emit_deps_header(out_dir, analysis)?;
    emit_data_source(out_dir, analysis)?;
    emit_code_source(out_dir, image, analysis, options)?;

    info!(dir = %out_dir.display(), "wrote project");
    Ok(())
}

fn emit_makefile(out_dir: &Path) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(out_dir.join("Makefile"))?);
    write!(
        out,
        "CC ?= cc\n\
         CFLAGS ?= -O2 -Wall\n\
         \n\
         program: program.c data.c\n\
         \t$(CC) $(CFLAGS) -o $@ program.c data.c -larmrt\n\
         \n\
         clean:\n\
         \trm -f program\n\
         \n\
         .PHONY: clean\n"
    )
}

fn emit_deps_header(out_dir: &Path, analysis: &Analysis) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(out_dir.join("deps.h"))?);
    writeln!(out, "#ifndef ARM2C_DEPS_H")?;
    writeln!(out, "#define ARM2C_DEPS_H")?;
    writeln!(out)?;
    writeln!(out, "struct arm_state;")?;
    writeln!(out)?;

    // Same-named dependencies collapse to one declaration.
    let names: BTreeSet<&str> = analysis
        .deps_by_got_offset
        .values()
        .map(|f| f.name.as_str())
        .collect();
    for name in names {
        writeln!(out, "void {name}(struct arm_state *s);")?;
    }

    writeln!(out)?;
    writeln!(out, "#endif")
}

fn emit_data_source(out_dir: &Path, analysis: &Analysis) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(out_dir.join("data.c"))?);
    writeln!(out, "#include <stdint.h>")?;
    writeln!(out)?;

    writeln!(out, "const uint32_t arm_got_mappings[][2] = {{")?;
    for (offset, value) in &analysis.got_mappings {
        writeln!(out, "    {{ 0x{offset:08x}, 0x{value:08x} }},")?;
    }
    writeln!(out, "}};")?;
    writeln!(
        out,
        "const unsigned arm_got_mapping_count = {};",
        analysis.got_mappings.len()
    )?;
    writeln!(out)?;

    writeln!(out, "struct arm_plt_range {{ uint32_t start, end, got_offset; }};")?;
    writeln!(out, "const struct arm_plt_range arm_plt_ranges[] = {{")?;
    let ranges = compress_plt_ranges(analysis);
    for (start, end, offset) in &ranges {
        writeln!(out, "    {{ 0x{start:08x}, 0x{end:08x}, 0x{offset:08x} }},")?;
    }
    writeln!(out, "}};")?;
    writeln!(
        out,
        "const unsigned arm_plt_range_count = {};",
        ranges.len()
    )
}

/// Collapse the per-byte PLT map back into (start, end, got_offset) ranges.
fn compress_plt_ranges(analysis: &Analysis) -> Vec<(u32, u32, u32)> {
    let mut addrs: Vec<u32> = analysis.plt_range_to_dep.keys().copied().collect();
    addrs.sort_unstable();

    let mut ranges: Vec<(u32, u32, u32)> = Vec::new();
    for addr in addrs {
        let offset = analysis.plt_range_to_dep[&addr];
        match ranges.last_mut() {
            Some((_, end, last_offset)) if *end == addr && *last_offset == offset => {
                *end = addr + 1;
            }
            _ => ranges.push((addr, addr + 1, offset)),
        }
    }
    ranges
}

fn emit_code_source(
    out_dir: &Path,
    image: &Image,
    analysis: &Analysis,
    options: EmitOptions,
) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(out_dir.join("program.c"))?);
    writeln!(out, "#include <armrt.h>")?;
    writeln!(out, "#include \"deps.h\"")?;

    for name in [".text", ".plt"] {
        if let Some(section) = image.section(name) {
            emit_section(&mut out, section, analysis, options)?;
        }
    }
    Ok(())
}

/// One C function per exported entry point; instructions before the first
/// export land in an internal region function.
fn emit_section(
    out: &mut dyn Write,
    section: &Section,
    analysis: &Analysis,
    options: EmitOptions,
) -> io::Result<()> {
    let Some(data) = section.data else {
        return Ok(());
    };

    writeln!(out)?;
    writeln!(
        out,
        "/* section {} @ 0x{:08x}, {} bytes */",
        section.name, section.addr, section.size
    )?;

    let mut open = false;
    for (i, chunk) in data.chunks_exact(4).enumerate() {
        let addr = section.addr + (i as u32) * 4;
        let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let instr = Instruction::decode(raw);

        if let Some(export) = analysis.exports_by_address.get(&addr) {
            if open {
                writeln!(out, "}}")?;
            }
            writeln!(out)?;
            writeln!(out, "void {}(struct arm_state *s) {{", export.name)?;
            open = true;
        } else if !open {
            writeln!(out)?;
            writeln!(
                out,
                "static void region_0x{:08x}(struct arm_state *s) {{",
                addr
            )?;
            open = true;
        }

        if !options.minify {
            writeln!(out, "    /* 0x{:08x}: {} */", addr, instr)?;
        }
        if let Some(stmt) = translate(&instr, addr, analysis) {
            writeln!(out, "    {stmt}")?;
        }
    }

    if open {
        writeln!(out, "}}")?;
    }
    Ok(())
}

/// One C statement per instruction, or `None` for PLT stub filler.
fn translate(instr: &Instruction, addr: u32, analysis: &Analysis) -> Option<String> {
    // Inside a resolved PLT stub the whole range collapses to one direct
    // call at the dispatching load.
    if let Some(dep) = analysis.dep_at(addr) {
        if let Kind::SingleTransfer { load: true, rd, .. } = instr.kind {
            if rd == Register::PC {
                return Some(format!("{}(s);", dep.name));
            }
        }
        return None;
    }

    let stmt = match instr.kind {
        Kind::DataProcessing { op, rd, rn, op2 } => {
            let value = operand2(&op2);
            let s = u8::from(instr.set_cond);
            match op {
                Opcode::Mov | Opcode::Mvn => format!(
                    "arm_{}(s, {}, {}, {});",
                    OPCODE_NAMES[op.table_index()],
                    s,
                    rd.index(),
                    value
                ),
                Opcode::Tst | Opcode::Teq | Opcode::Cmp | Opcode::Cmn => format!(
                    "arm_{}(s, {}, {});",
                    OPCODE_NAMES[op.table_index()],
                    rn.index(),
                    value
                ),
                _ => format!(
                    "arm_{}(s, {}, {}, {}, {});",
                    OPCODE_NAMES[op.table_index()],
                    s,
                    rd.index(),
                    rn.index(),
                    value
                ),
            }
        }

        Kind::Multiply {
            accumulate,
            rd,
            rn,
            rs,
            rm,
        } => {
            let s = u8::from(instr.set_cond);
            if accumulate {
                format!(
                    "arm_mla(s, {}, {}, {}, {}, {});",
                    s,
                    rd.index(),
                    rn.index(),
                    rs.index(),
                    rm.index()
                )
            } else {
                format!("arm_mul(s, {}, {}, {}, {});", s, rd.index(), rs.index(), rm.index())
            }
        }

        Kind::MultiplyLong {
            signed,
            accumulate,
            rd_hi,
            rd_lo,
            rs,
            rm,
        } => format!(
            "arm_{}(s, {}, {}, {}, {}, {}, {});",
            if accumulate { "mlal" } else { "mull" },
            u8::from(instr.set_cond),
            u8::from(signed),
            rd_hi.index(),
            rd_lo.index(),
            rs.index(),
            rm.index()
        ),

        Kind::SingleTransfer {
            pre_index,
            add,
            byte,
            write_back,
            load,
            rn,
            rd,
            offset,
        } => format!(
            "arm_{}(s, {}, {}, {}, {}, {}, {}, {}, 1);",
            if load { "ldr" } else { "str" },
            u8::from(pre_index),
            u8::from(add),
            u8::from(byte),
            u8::from(write_back),
            rn.index(),
            rd.index(),
            transfer_offset(&offset)
        ),

        Kind::HalfwordTransfer {
            pre_index,
            add,
            write_back,
            load,
            rn,
            rd,
            kind,
            offset,
        } => {
            let subtype = match kind {
                HalfwordKind::Swap => "ARM_HW_SWAP",
                HalfwordKind::UnsignedHalf => "ARM_HW_UHALF",
                HalfwordKind::SignedByte => "ARM_HW_SBYTE",
                HalfwordKind::SignedHalf => "ARM_HW_SHALF",
            };
            format!(
                "arm_{}(s, {}, {}, {}, {}, {}, {}, {});",
                if load { "ldrh" } else { "strh" },
                u8::from(pre_index),
                u8::from(add),
                u8::from(write_back),
                rn.index(),
                rd.index(),
                subtype,
                halfword_offset(&offset)
            )
        }

        Kind::BlockTransfer {
            pre_index,
            add,
            write_back,
            load,
            rn,
            reg_list,
            ..
        } => format!(
            "arm_{}(s, {}, {}, {}, {}, 0x{:04x}u, 1);",
            if load { "ldm" } else { "stm" },
            u8::from(pre_index),
            u8::from(add),
            u8::from(write_back),
            rn.index(),
            reg_list
        ),

        Kind::Branch { link, offset } => {
            format!("arm_branch(s, {}, {});", offset, u8::from(link))
        }

        Kind::BranchExchange { rm } => format!("arm_bx(s, {});", rm.index()),

        Kind::SingleDataSwap { .. } | Kind::SoftwareInterrupt | Kind::Invalid => {
            format!("arm_trap(s, 0x{:08x}u, 0x{:08x}u);", instr.raw, addr)
        }
    };

    if instr.cond == Condition::Al {
        Some(stmt)
    } else {
        Some(format!(
            "if (arm_cond(s, {})) {{ {} }}",
            instr.cond.bits(),
            stmt
        ))
    }
}

fn operand2(op2: &Operand2) -> String {
    match op2 {
        Operand2::Imm(imm) => format!("0x{imm:x}u"),
        Operand2::Shifter(s) => shifter(s),
    }
}

fn transfer_offset(offset: &TransferOffset) -> String {
    match offset {
        TransferOffset::Imm(imm) => format!("0x{imm:x}u"),
        TransferOffset::Shifter(s) => shifter(s),
    }
}

fn halfword_offset(offset: &HalfwordOffset) -> String {
    match offset {
        HalfwordOffset::Imm(imm) => format!("0x{imm:x}u"),
        HalfwordOffset::Reg(rm) => format!("arm_reg(s, {})", rm.index()),
    }
}

fn shifter(s: &Shifter) -> String {
    let kind = ["ARM_LSL", "ARM_LSR", "ARM_ASR", "ARM_ROR"][s.kind.table_index()];
    match s.amount {
        ShiftAmount::Imm(n) => format!("arm_shift(s, {kind}, {}, {n})", s.rm.index()),
        ShiftAmount::Reg(rs) => format!(
            "arm_shift(s, {kind}, {}, arm_reg(s, {}))",
            s.rm.index(),
            rs.index()
        ),
    }
}
