// End-to-end analysis tests over a synthetic 32-bit little-endian ARM ELF
// assembled in memory: a .plt stub chain, dynamic symbols, and both
// relocation tables.

use arm2c::analysis::analyze;
use arm2c::elf::Image;
use arm2c::emit::{emit_project, EmitOptions};
use arm2c::error::Error;

const EHDR_SIZE: usize = 52;
const SHDR_SIZE: usize = 40;

const SHT_PROGBITS: u32 = 1;
const SHT_STRTAB: u32 = 3;
const SHT_REL: u32 = 9;
const SHT_DYNSYM: u32 = 11;

const R_ARM_GLOB_DAT: u32 = 21;
const R_ARM_JUMP_SLOT: u32 = 22;

struct SectionSpec {
    name: &'static str,
    sh_type: u32,
    addr: u32,
    data: Vec<u8>,
    link: u32,
    entsize: u32,
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn align4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

fn section_header(
    out: &mut Vec<u8>,
    name: u32,
    sh_type: u32,
    addr: u32,
    offset: u32,
    size: u32,
    link: u32,
    entsize: u32,
) {
    push_u32(out, name);
    push_u32(out, sh_type);
    push_u32(out, 0); // sh_flags
    push_u32(out, addr);
    push_u32(out, offset);
    push_u32(out, size);
    push_u32(out, link);
    push_u32(out, 0); // sh_info
    push_u32(out, 4); // sh_addralign
    push_u32(out, entsize);
}

/// Assemble a minimal ELF32 image: null section + `specs` + .shstrtab.
fn build_elf(machine: u16, specs: &[SectionSpec]) -> Vec<u8> {
    let mut shstrtab = vec![0u8];
    let mut name_offsets = Vec::new();
    for spec in specs {
        name_offsets.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(spec.name.as_bytes());
        shstrtab.push(0);
    }
    let shstrtab_name = shstrtab.len() as u32;
    shstrtab.extend_from_slice(b".shstrtab");
    shstrtab.push(0);

    let mut out = vec![0u8; EHDR_SIZE];

    let mut data_offsets = Vec::new();
    for spec in specs {
        align4(&mut out);
        data_offsets.push(out.len() as u32);
        out.extend_from_slice(&spec.data);
    }

    align4(&mut out);
    let shstrtab_offset = out.len() as u32;
    out.extend_from_slice(&shstrtab);

    align4(&mut out);
    let shoff = out.len() as u32;
    let shnum = specs.len() as u16 + 2;
    let shstrndx = specs.len() as u16 + 1;

    out.extend_from_slice(&[0u8; SHDR_SIZE]); // null section
    for (i, spec) in specs.iter().enumerate() {
        section_header(
            &mut out,
            name_offsets[i],
            spec.sh_type,
            spec.addr,
            data_offsets[i],
            spec.data.len() as u32,
            spec.link,
            spec.entsize,
        );
    }
    section_header(
        &mut out,
        shstrtab_name,
        SHT_STRTAB,
        0,
        shstrtab_offset,
        shstrtab.len() as u32,
        0,
        0,
    );

    // ELF header.
    let mut header = Vec::with_capacity(EHDR_SIZE);
    header.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
    header.extend_from_slice(&[0u8; 8]);
    push_u16(&mut header, 3); // ET_DYN
    push_u16(&mut header, machine);
    push_u32(&mut header, 1); // e_version
    push_u32(&mut header, 0); // e_entry
    push_u32(&mut header, 0); // e_phoff
    push_u32(&mut header, shoff);
    push_u32(&mut header, 0); // e_flags
    push_u16(&mut header, EHDR_SIZE as u16);
    push_u16(&mut header, 32); // e_phentsize
    push_u16(&mut header, 0); // e_phnum
    push_u16(&mut header, SHDR_SIZE as u16);
    push_u16(&mut header, shnum);
    push_u16(&mut header, shstrndx);
    out[..EHDR_SIZE].copy_from_slice(&header);

    out
}

fn symbol_entry(name: u32, value: u32, size: u32, info: u8, shndx: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    push_u32(&mut out, name);
    push_u32(&mut out, value);
    push_u32(&mut out, size);
    out.push(info);
    out.push(0); // st_other
    push_u16(&mut out, shndx);
    out
}

fn words(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|w| w.to_le_bytes()).collect()
}

const EM_ARM: u16 = 40;
const TEXT_ADDR: u32 = 0x10000;
const PLT_ADDR: u32 = 0x20000;

// The stub resolves through ip: with the pc operand reading 12 ahead, the
// base register lands on GOT offset + 4 when the dispatching load runs.
const GOT_OFFSET: u32 = PLT_ADDR + 20;

fn sample_elf(machine: u16) -> Vec<u8> {
    let dynstr = b"\0puts\0lib_entry\0".to_vec();

    let mut dynsym = Vec::new();
    dynsym.extend(symbol_entry(0, 0, 0, 0, 0));
    dynsym.extend(symbol_entry(1, 0, 0, 0x12, 0)); // puts, undefined
    dynsym.extend(symbol_entry(6, TEXT_ADDR, 8, 0x12, 1)); // lib_entry in .text

    let mut rel_plt = Vec::new();
    push_u32(&mut rel_plt, GOT_OFFSET);
    push_u32(&mut rel_plt, (1 << 8) | R_ARM_JUMP_SLOT);

    let mut rel_dyn = Vec::new();
    push_u32(&mut rel_dyn, 0x30000);
    push_u32(&mut rel_dyn, (2 << 8) | R_ARM_GLOB_DAT);

    build_elf(
        machine,
        &[
            SectionSpec {
                name: ".text",
                sh_type: SHT_PROGBITS,
                addr: TEXT_ADDR,
                // mov r0, #0; bx lr
                data: words(&[0xe3a0_0000, 0xe12f_ff1e]),
                link: 0,
                entsize: 0,
            },
            SectionSpec {
                name: ".plt",
                sh_type: SHT_PROGBITS,
                addr: PLT_ADDR,
                // add ip, pc, #0; add ip, ip, #4; ldr pc, [ip, #8]!
                data: words(&[0xe28f_c000, 0xe28c_c004, 0xe5bc_f008]),
                link: 0,
                entsize: 0,
            },
            SectionSpec {
                name: ".dynstr",
                sh_type: SHT_STRTAB,
                addr: 0,
                data: dynstr,
                link: 0,
                entsize: 0,
            },
            SectionSpec {
                name: ".dynsym",
                sh_type: SHT_DYNSYM,
                addr: 0,
                data: dynsym,
                link: 3, // .dynstr
                entsize: 16,
            },
            SectionSpec {
                name: ".rel.plt",
                sh_type: SHT_REL,
                addr: 0,
                data: rel_plt,
                link: 4, // .dynsym
                entsize: 8,
            },
            SectionSpec {
                name: ".rel.dyn",
                sh_type: SHT_REL,
                addr: 0,
                data: rel_dyn,
                link: 4,
                entsize: 8,
            },
        ],
    )
}

#[test]
fn test_analysis_builds_all_three_maps() {
    let elf = sample_elf(EM_ARM);
    let image = Image::parse(&elf).expect("synthetic image must parse");
    let analysis = analyze(&image).expect("analysis must succeed");

    // Dynamic relocations.
    assert_eq!(analysis.got_mappings, vec![(0x30000, TEXT_ADDR)]);

    // PLT dependencies.
    let dep = &analysis.deps_by_got_offset[&GOT_OFFSET];
    assert_eq!(dep.name, "puts");
    assert_eq!(dep.address, GOT_OFFSET);
    assert!(dep.is_external);

    // Every byte of the stub maps to the dependency.
    assert_eq!(analysis.plt_range_to_dep.len(), 12);
    for addr in PLT_ADDR..PLT_ADDR + 12 {
        let f = analysis.dep_at(addr).expect("stub byte must resolve");
        assert_eq!(f.name, "puts");
    }
    assert!(analysis.dep_at(PLT_ADDR + 12).is_none());

    // Exports.
    let export = &analysis.exports_by_address[&TEXT_ADDR];
    assert_eq!(export.name, "lib_entry");
    assert_eq!(export.address, TEXT_ADDR);
    assert!(!export.is_external);
}

#[test]
fn test_wrong_machine_is_fatal() {
    let elf = sample_elf(3); // EM_386
    let err = Image::parse(&elf).err().expect("parse must fail");
    match err {
        Error::WrongMachine { found } => assert_eq!(found, 3),
        other => panic!("expected WrongMachine, got {other}"),
    }
}

#[test]
fn test_missing_text_is_fatal() {
    let elf = build_elf(
        EM_ARM,
        &[SectionSpec {
            name: ".plt",
            sh_type: SHT_PROGBITS,
            addr: PLT_ADDR,
            data: words(&[0xe28f_c000]),
            link: 0,
            entsize: 0,
        }],
    );
    let image = Image::parse(&elf).unwrap();
    assert!(matches!(analyze(&image), Err(Error::MissingTextSection)));
}

#[test]
fn test_analysis_without_plt_still_finds_exports() {
    let dynstr = b"\0lib_entry\0".to_vec();
    let mut dynsym = Vec::new();
    dynsym.extend(symbol_entry(0, 0, 0, 0, 0));
    dynsym.extend(symbol_entry(1, TEXT_ADDR, 8, 0x12, 1));

    let elf = build_elf(
        EM_ARM,
        &[
            SectionSpec {
                name: ".text",
                sh_type: SHT_PROGBITS,
                addr: TEXT_ADDR,
                data: words(&[0xe12f_ff1e]),
                link: 0,
                entsize: 0,
            },
            SectionSpec {
                name: ".dynstr",
                sh_type: SHT_STRTAB,
                addr: 0,
                data: dynstr,
                link: 0,
                entsize: 0,
            },
            SectionSpec {
                name: ".dynsym",
                sh_type: SHT_DYNSYM,
                addr: 0,
                data: dynsym,
                link: 2,
                entsize: 16,
            },
        ],
    );

    let image = Image::parse(&elf).unwrap();
    let analysis = analyze(&image).unwrap();
    assert!(analysis.got_mappings.is_empty());
    assert!(analysis.deps_by_got_offset.is_empty());
    assert!(analysis.plt_range_to_dep.is_empty());
    assert_eq!(analysis.exports_by_address[&TEXT_ADDR].name, "lib_entry");
}

#[test]
fn test_emit_writes_project() {
    let elf = sample_elf(EM_ARM);
    let image = Image::parse(&elf).unwrap();
    let analysis = analyze(&image).unwrap();

    let dir = std::env::temp_dir().join(format!("arm2c-emit-test-{}", std::process::id()));
    emit_project(&image, &analysis, &dir, EmitOptions { minify: false }).unwrap();

    let program = std::fs::read_to_string(dir.join("program.c")).unwrap();
    assert!(program.contains("void lib_entry(struct arm_state *s)"));
    assert!(program.contains("puts(s);"));
    assert!(program.contains("(al) mov r0, r0, #0"));

    let deps = std::fs::read_to_string(dir.join("deps.h")).unwrap();
    assert!(deps.contains("void puts(struct arm_state *s);"));

    let data = std::fs::read_to_string(dir.join("data.c")).unwrap();
    assert!(data.contains("{ 0x00030000, 0x00010000 },"));
    assert!(data.contains("{ 0x00020000, 0x0002000c, 0x00020014 },"));

    assert!(dir.join("Makefile").exists());
    std::fs::remove_dir_all(&dir).ok();
}
