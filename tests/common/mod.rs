#![allow(dead_code)]

//! Fixture ELF writer for the integration suite.
//!
//! Builds the minimal inputs the converter accepts: executables/libraries
//! with the platform sections and a plausible dynamic linking setup, plus
//! stub `.so` dependencies exposing chosen dynamic symbols. Layout is
//! offset-cursor based; every section's vaddr is `BASE + file offset`.

use std::path::{Path, PathBuf};

pub const BASE: u64 = 0x40_0000;

const EHDR_SIZE: u64 = 0x40;
const PHDR_SIZE: u64 = 0x38;
const SHDR_SIZE: u64 = 0x40;
const SYM_SIZE: usize = 0x18;
const RELA_SIZE: usize = 0x18;

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_GNU_STACK: u32 = 0x6474_E551;
const PT_GNU_RELRO: u32 = 0x6474_E552;
const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

const SHT_PROGBITS: u32 = 1;
const SHT_STRTAB: u32 = 3;
const SHT_RELA: u32 = 4;
const SHT_NOBITS: u32 = 8;
const SHT_DYNAMIC: u32 = 6;
const SHT_DYNSYM: u32 = 11;

const DT_NULL: u64 = 0;
const DT_NEEDED: u64 = 1;
const DT_PLTRELSZ: u64 = 2;
const DT_PLTGOT: u64 = 3;
const DT_STRTAB: u64 = 5;
const DT_SYMTAB: u64 = 6;
const DT_RELA: u64 = 7;
const DT_RELASZ: u64 = 8;
const DT_JMPREL: u64 = 23;

/// One dynamic symbol of the fixture input.
#[derive(Clone)]
pub struct DynSym {
    pub name: String,
    pub info: u8,
    pub shndx: u16,
    pub value: u64,
}

impl DynSym {
    /// Undefined global function import.
    pub fn undefined(name: &str) -> Self {
        DynSym {
            name: name.to_string(),
            info: 0x12, // GLOBAL | FUNC
            shndx: 0,
            value: 0,
        }
    }

    /// Defined global symbol at the given vaddr.
    pub fn defined(name: &str, value: u64) -> Self {
        DynSym {
            name: name.to_string(),
            info: 0x12,
            shndx: 1,
            value,
        }
    }

    /// Defined local symbol; never exported.
    pub fn local(name: &str, value: u64) -> Self {
        DynSym {
            name: name.to_string(),
            info: 0x02, // LOCAL | FUNC
            shndx: 1,
            value,
        }
    }
}

struct Section {
    name: String,
    sh_type: u32,
    flags: u64,
    offset: u64,
    addr: u64,
    size: u64,
    link: u32,
    info: u32,
    addralign: u64,
    entsize: u64,
    data: Vec<u8>,
}

struct Phdr {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

pub struct Fixture {
    is_library: bool,
    needed: Vec<String>,
    symbols: Vec<DynSym>,
    with_relro: bool,
    with_data: bool,
    with_bss: bool,
    /// `None`: no section at all; `Some(n)`: a section with n entries.
    rela_plt: Option<usize>,
    rela_dyn: Option<usize>,
    emit_pltgot_tag: bool,
    /// Adds a writable `PT_LOAD` at the relro offset with this memsz.
    relro_shadow_memsz: Option<u64>,
}

impl Fixture {
    pub fn executable() -> Self {
        Fixture {
            is_library: false,
            needed: Vec::new(),
            symbols: Vec::new(),
            with_relro: false,
            with_data: true,
            with_bss: false,
            rela_plt: Some(0),
            rela_dyn: Some(0),
            emit_pltgot_tag: true,
            relro_shadow_memsz: None,
        }
    }

    pub fn library() -> Self {
        Fixture {
            is_library: true,
            ..Fixture::executable()
        }
    }

    pub fn needs(mut self, library: &str) -> Self {
        self.needed.push(library.to_string());
        self
    }

    pub fn symbol(mut self, sym: DynSym) -> Self {
        self.symbols.push(sym);
        self
    }

    pub fn with_relro(mut self) -> Self {
        self.with_relro = true;
        self
    }

    pub fn with_bss(mut self) -> Self {
        self.with_bss = true;
        self
    }

    pub fn without_data(mut self) -> Self {
        self.with_data = false;
        self
    }

    pub fn rela_plt(mut self, entries: Option<usize>) -> Self {
        self.rela_plt = entries;
        self
    }

    pub fn rela_dyn(mut self, entries: Option<usize>) -> Self {
        self.rela_dyn = entries;
        self
    }

    pub fn without_pltgot_tag(mut self) -> Self {
        self.emit_pltgot_tag = false;
        self
    }

    /// Duplicate load covering the relro image, as some linkers emit.
    /// Implies [`Fixture::with_relro`].
    pub fn with_relro_shadow_load(mut self, memsz: u64) -> Self {
        self.with_relro = true;
        self.relro_shadow_memsz = Some(memsz);
        self
    }

    pub fn write(self, path: &Path) -> PathBuf {
        std::fs::write(path, self.build()).unwrap();
        path.to_path_buf()
    }

    pub fn build(self) -> Vec<u8> {
        let phdr_count =
            5 + usize::from(self.with_relro) + usize::from(self.relro_shadow_memsz.is_some());
        // Leave slack after the header area; the converter appends three
        // program headers and real linkers pad here anyway.
        let mut off = 0x400;
        assert!(align16(EHDR_SIZE + (phdr_count as u64 + 3) * PHDR_SIZE) <= off);
        let mut sections: Vec<Section> = Vec::new();

        let text_index = add_section(
            &mut sections,
            &mut off,
            ".text",
            SHT_PROGBITS,
            0x6,
            0,
            vec![0x90; 0x40],
        );
        let text_offset = sections[text_index].offset;

        // .got.plt precedes the rela tables so jump-slot targets resolve.
        let got_plt_index = add_section(
            &mut sections,
            &mut off,
            ".got.plt",
            SHT_PROGBITS,
            0x3,
            8,
            vec![0; 0x20],
        );
        let got_plt_addr = sections[got_plt_index].addr;

        let mut rela_plt_addr = 0;
        if let Some(entries) = self.rela_plt {
            let mut data = Vec::new();
            for i in 0..entries {
                push_rela(&mut data, got_plt_addr + 8 * i as u64, (1 << 32) | 7, 0);
            }
            let index = add_section(
                &mut sections,
                &mut off,
                ".rela.plt",
                SHT_RELA,
                0x2,
                RELA_SIZE as u64,
                data,
            );
            rela_plt_addr = sections[index].addr;
        }
        let mut rela_dyn_addr = 0;
        if let Some(entries) = self.rela_dyn {
            let mut data = Vec::new();
            for i in 0..entries {
                push_rela(&mut data, BASE + 0x100 + 8 * i as u64, 8, 0x40);
            }
            let index = add_section(
                &mut sections,
                &mut off,
                ".rela.dyn",
                SHT_RELA,
                0x2,
                RELA_SIZE as u64,
                data,
            );
            rela_dyn_addr = sections[index].addr;
        }

        let relro_offset = if self.with_relro {
            let index = add_section(
                &mut sections,
                &mut off,
                ".data.rel.ro",
                SHT_PROGBITS,
                0x3,
                0,
                vec![0; 0x40],
            );
            Some(sections[index].offset)
        } else {
            None
        };

        let param_name = if self.is_library {
            ".data.sce_module_param"
        } else {
            ".data.sce_process_param"
        };
        let param_index = add_section(
            &mut sections,
            &mut off,
            param_name,
            SHT_PROGBITS,
            0x3,
            0,
            vec![0; 0x40],
        );
        let param_offset = sections[param_index].offset;
        let param_addr = sections[param_index].addr;

        let (data_offset, data_addr, data_size) = if self.with_data {
            let index = add_section(
                &mut sections,
                &mut off,
                ".data",
                SHT_PROGBITS,
                0x3,
                0,
                vec![0; 0x30],
            );
            (
                sections[index].offset,
                sections[index].addr,
                sections[index].size,
            )
        } else {
            (param_offset, param_addr, sections[param_index].size)
        };

        let bss_size = if self.with_bss {
            let index = add_section(&mut sections, &mut off, ".bss", SHT_NOBITS, 0x3, 0, Vec::new());
            // Directly after .data in memory, no file bytes.
            sections[index].addr = data_addr + data_size;
            sections[index].size = 0x40;
            0x40
        } else {
            0
        };

        // Dynamic string table: needed libraries, then symbol names.
        let mut dynstr = vec![0u8];
        let name_offset = |dynstr: &mut Vec<u8>, name: &str| -> u64 {
            let offset = dynstr.len() as u64;
            dynstr.extend_from_slice(name.as_bytes());
            dynstr.push(0);
            offset
        };
        let needed_offsets: Vec<u64> = self
            .needed
            .iter()
            .map(|name| name_offset(&mut dynstr, name))
            .collect();
        let symbol_name_offsets: Vec<u64> = self
            .symbols
            .iter()
            .map(|sym| name_offset(&mut dynstr, &sym.name))
            .collect();

        let mut dynsym = vec![0u8; SYM_SIZE];
        for (sym, name_off) in self.symbols.iter().zip(&symbol_name_offsets) {
            dynsym.extend_from_slice(&(*name_off as u32).to_le_bytes());
            dynsym.push(sym.info);
            dynsym.push(0);
            dynsym.extend_from_slice(&sym.shndx.to_le_bytes());
            dynsym.extend_from_slice(&sym.value.to_le_bytes());
            dynsym.extend_from_slice(&0u64.to_le_bytes());
        }

        // Section offsets must be fixed before the dynamic table can point
        // at them, so lay the remaining sections out first.
        let dynamic_offset = off;
        let rela_plt_size = self.rela_plt.unwrap_or(0) * RELA_SIZE;
        let rela_dyn_size = self.rela_dyn.unwrap_or(0) * RELA_SIZE;
        let mut dynamic_len = self.needed.len() + 1; // + DT_NULL
        dynamic_len += usize::from(self.emit_pltgot_tag);
        if self.rela_plt.is_some() {
            dynamic_len += 2; // PLTRELSZ + JMPREL
        }
        if self.rela_dyn.is_some() {
            dynamic_len += 2; // RELA + RELASZ
        }
        dynamic_len += 2; // SYMTAB + STRTAB
        let dynamic_size = (dynamic_len * 16) as u64;
        let dynsym_offset = align16(dynamic_offset + dynamic_size);
        let dynstr_offset = align16(dynsym_offset + dynsym.len() as u64);

        let mut dynamic = Vec::new();
        let tag = |dynamic: &mut Vec<u8>, t: u64, v: u64| {
            dynamic.extend_from_slice(&t.to_le_bytes());
            dynamic.extend_from_slice(&v.to_le_bytes());
        };
        for offset in &needed_offsets {
            tag(&mut dynamic, DT_NEEDED, *offset);
        }
        if self.emit_pltgot_tag {
            tag(&mut dynamic, DT_PLTGOT, got_plt_addr);
        }
        if self.rela_plt.is_some() {
            tag(&mut dynamic, DT_PLTRELSZ, rela_plt_size as u64);
            tag(&mut dynamic, DT_JMPREL, rela_plt_addr);
        }
        if self.rela_dyn.is_some() {
            tag(&mut dynamic, DT_RELA, rela_dyn_addr);
            tag(&mut dynamic, DT_RELASZ, rela_dyn_size as u64);
        }
        tag(&mut dynamic, DT_SYMTAB, BASE + dynsym_offset);
        tag(&mut dynamic, DT_STRTAB, BASE + dynstr_offset);
        tag(&mut dynamic, DT_NULL, 0);
        assert_eq!(dynamic.len() as u64, dynamic_size);

        let dynamic_index =
            add_section(&mut sections, &mut off, ".dynamic", SHT_DYNAMIC, 0x3, 16, dynamic);
        let dynsym_index = add_section(
            &mut sections,
            &mut off,
            ".dynsym",
            SHT_DYNSYM,
            0x2,
            SYM_SIZE as u64,
            dynsym,
        );
        let dynstr_index =
            add_section(&mut sections, &mut off, ".dynstr", SHT_STRTAB, 0x2, 0, dynstr);
        assert_eq!(sections[dynsym_index].offset, dynsym_offset);
        assert_eq!(sections[dynstr_index].offset, dynstr_offset);
        sections[dynamic_index].link = dynstr_index as u32 + 1;
        sections[dynsym_index].link = dynstr_index as u32 + 1;
        sections[dynsym_index].info = 1;

        // Section name string table, then headers.
        let mut shstrtab = vec![0u8];
        let mut name_offsets = vec![0u32];
        for s in &sections {
            name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(s.name.as_bytes());
            shstrtab.push(0);
        }
        name_offsets.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(b".shstrtab\0");

        let shstrtab_offset = off;
        off = align16(off + shstrtab.len() as u64);
        let shoff = off;
        let shnum = sections.len() as u64 + 2; // + null + shstrtab
        let shstrndx = shnum - 1;
        let total = shoff + shnum * SHDR_SIZE;

        let mut out = vec![0u8; total as usize];

        // ELF header.
        out[0..4].copy_from_slice(b"\x7fELF");
        out[4] = 2; // 64-bit
        out[5] = 1; // little-endian
        out[6] = 1;
        write_u16(&mut out, 0x10, if self.is_library { 3 } else { 2 });
        write_u16(&mut out, 0x12, 62); // x86-64
        write_u32(&mut out, 0x14, 1);
        write_u64(&mut out, 0x18, BASE + text_offset);
        write_u64(&mut out, 0x20, EHDR_SIZE);
        write_u64(&mut out, 0x28, shoff);
        write_u16(&mut out, 0x34, EHDR_SIZE as u16);
        write_u16(&mut out, 0x36, PHDR_SIZE as u16);
        write_u16(&mut out, 0x38, phdr_count as u16);
        write_u16(&mut out, 0x3A, SHDR_SIZE as u16);
        write_u16(&mut out, 0x3C, shnum as u16);
        write_u16(&mut out, 0x3E, shstrndx as u16);

        // Program headers.
        let rx_end = sections[got_plt_index].offset + sections[got_plt_index].size;
        let rw_filesz = (data_offset - param_offset) + data_size;
        let mut phdrs = vec![
            Phdr {
                p_type: PT_LOAD,
                p_flags: PF_R | PF_X,
                p_offset: 0,
                p_vaddr: BASE,
                p_filesz: rx_end,
                p_memsz: rx_end,
                p_align: 0x1000,
            },
            // Read-only image the converter is expected to drop.
            Phdr {
                p_type: PT_LOAD,
                p_flags: PF_R,
                p_offset: text_offset,
                p_vaddr: BASE + text_offset,
                p_filesz: 0x10,
                p_memsz: 0x10,
                p_align: 0x1000,
            },
            Phdr {
                p_type: PT_LOAD,
                p_flags: PF_R | PF_W,
                p_offset: param_offset,
                p_vaddr: param_addr,
                p_filesz: rw_filesz,
                p_memsz: rw_filesz + bss_size,
                p_align: 0x1000,
            },
            Phdr {
                p_type: PT_DYNAMIC,
                p_flags: PF_R | PF_W,
                p_offset: dynamic_offset,
                p_vaddr: BASE + dynamic_offset,
                p_filesz: dynamic_size,
                p_memsz: dynamic_size,
                p_align: 8,
            },
            Phdr {
                p_type: PT_GNU_STACK,
                p_flags: PF_R | PF_W,
                p_offset: 0,
                p_vaddr: 0,
                p_filesz: 0,
                p_memsz: 0,
                p_align: 0x10,
            },
        ];
        if let Some(relro_offset) = relro_offset {
            phdrs.push(Phdr {
                p_type: PT_GNU_RELRO,
                p_flags: PF_R,
                p_offset: relro_offset,
                p_vaddr: BASE + relro_offset,
                p_filesz: 0x40,
                p_memsz: 0x40,
                p_align: 1,
            });
            if let Some(memsz) = self.relro_shadow_memsz {
                phdrs.push(Phdr {
                    p_type: PT_LOAD,
                    p_flags: PF_R | PF_W,
                    p_offset: relro_offset,
                    p_vaddr: BASE + relro_offset,
                    p_filesz: memsz.min(0x40),
                    p_memsz: memsz,
                    p_align: 0x1000,
                });
            }
        }
        assert_eq!(phdrs.len(), phdr_count);
        for (i, ph) in phdrs.iter().enumerate() {
            let base = (EHDR_SIZE + i as u64 * PHDR_SIZE) as usize;
            write_u32(&mut out, base, ph.p_type);
            write_u32(&mut out, base + 0x4, ph.p_flags);
            write_u64(&mut out, base + 0x8, ph.p_offset);
            write_u64(&mut out, base + 0x10, ph.p_vaddr);
            write_u64(&mut out, base + 0x18, ph.p_vaddr);
            write_u64(&mut out, base + 0x20, ph.p_filesz);
            write_u64(&mut out, base + 0x28, ph.p_memsz);
            write_u64(&mut out, base + 0x30, ph.p_align);
        }

        // Section payloads.
        for s in &sections {
            if s.sh_type != SHT_NOBITS {
                let start = s.offset as usize;
                out[start..start + s.data.len()].copy_from_slice(&s.data);
            }
        }
        out[shstrtab_offset as usize..shstrtab_offset as usize + shstrtab.len()]
            .copy_from_slice(&shstrtab);

        // Section headers: null, the sections, .shstrtab.
        for (i, s) in sections.iter().enumerate() {
            let base = (shoff + (i as u64 + 1) * SHDR_SIZE) as usize;
            write_u32(&mut out, base, name_offsets[i + 1]);
            write_u32(&mut out, base + 0x4, s.sh_type);
            write_u64(&mut out, base + 0x8, s.flags);
            write_u64(&mut out, base + 0x10, s.addr);
            write_u64(&mut out, base + 0x18, s.offset);
            write_u64(&mut out, base + 0x20, s.size);
            write_u32(&mut out, base + 0x28, s.link);
            write_u32(&mut out, base + 0x2C, s.info);
            write_u64(&mut out, base + 0x30, s.addralign);
            write_u64(&mut out, base + 0x38, s.entsize);
        }
        let base = (shoff + shstrndx * SHDR_SIZE) as usize;
        write_u32(&mut out, base, *name_offsets.last().unwrap());
        write_u32(&mut out, base + 0x4, SHT_STRTAB);
        write_u64(&mut out, base + 0x18, shstrtab_offset);
        write_u64(&mut out, base + 0x20, shstrtab.len() as u64);
        write_u64(&mut out, base + 0x30, 1);

        out
    }
}

/// Minimal x86-64 shared object exposing the given defined dynamic symbols.
pub fn write_stub_library(path: &Path, symbols: &[&str]) {
    let mut dynstr = vec![0u8];
    let mut dynsym = vec![0u8; SYM_SIZE];
    for (i, name) in symbols.iter().enumerate() {
        let name_off = dynstr.len() as u32;
        dynstr.extend_from_slice(name.as_bytes());
        dynstr.push(0);
        dynsym.extend_from_slice(&name_off.to_le_bytes());
        dynsym.push(0x12); // GLOBAL | FUNC
        dynsym.push(0);
        dynsym.extend_from_slice(&1u16.to_le_bytes());
        dynsym.extend_from_slice(&(0x1000 + 0x10 * i as u64).to_le_bytes());
        dynsym.extend_from_slice(&0u64.to_le_bytes());
    }

    let text_offset = align16(EHDR_SIZE);
    let dynsym_offset = align16(text_offset + 0x10);
    let dynstr_offset = align16(dynsym_offset + dynsym.len() as u64);
    let shstrtab_offset = align16(dynstr_offset + dynstr.len() as u64);

    let shstrtab = b"\0.text\0.dynsym\0.dynstr\0.shstrtab\0".to_vec();
    let shoff = align16(shstrtab_offset + shstrtab.len() as u64);
    let shnum = 5u64;
    let total = shoff + shnum * SHDR_SIZE;
    let mut out = vec![0u8; total as usize];

    out[0..4].copy_from_slice(b"\x7fELF");
    out[4] = 2;
    out[5] = 1;
    out[6] = 1;
    write_u16(&mut out, 0x10, 3); // ET_DYN
    write_u16(&mut out, 0x12, 62);
    write_u32(&mut out, 0x14, 1);
    write_u64(&mut out, 0x28, shoff);
    write_u16(&mut out, 0x34, EHDR_SIZE as u16);
    write_u16(&mut out, 0x3A, SHDR_SIZE as u16);
    write_u16(&mut out, 0x3C, shnum as u16);
    write_u16(&mut out, 0x3E, 4);

    out[text_offset as usize..text_offset as usize + 0x10].fill(0x90);
    let start = dynsym_offset as usize;
    out[start..start + dynsym.len()].copy_from_slice(&dynsym);
    let start = dynstr_offset as usize;
    out[start..start + dynstr.len()].copy_from_slice(&dynstr);
    let start = shstrtab_offset as usize;
    out[start..start + shstrtab.len()].copy_from_slice(&shstrtab);

    // Headers: null, .text, .dynsym (link -> .dynstr), .dynstr, .shstrtab.
    let mut shdr = |index: u64, name: u32, sh_type: u32, offset: u64, size: u64, link: u32, entsize: u64| {
        let base = (shoff + index * SHDR_SIZE) as usize;
        write_u32(&mut out, base, name);
        write_u32(&mut out, base + 0x4, sh_type);
        write_u64(&mut out, base + 0x10, BASE + offset);
        write_u64(&mut out, base + 0x18, offset);
        write_u64(&mut out, base + 0x20, size);
        write_u32(&mut out, base + 0x28, link);
        write_u64(&mut out, base + 0x30, 0x10);
        write_u64(&mut out, base + 0x38, entsize);
    };
    shdr(1, 1, SHT_PROGBITS, text_offset, 0x10, 0, 0);
    shdr(2, 7, SHT_DYNSYM, dynsym_offset, dynsym.len() as u64, 3, SYM_SIZE as u64);
    shdr(3, 15, SHT_STRTAB, dynstr_offset, dynstr.len() as u64, 0, 0);
    shdr(4, 23, SHT_STRTAB, shstrtab_offset, shstrtab.len() as u64, 0, 0);

    std::fs::write(path, out).unwrap();
}

/// Create an SDK-style tree with a `lib/` directory of stub libraries.
/// Returns the tree root; pass it as the toolchain root.
pub fn sdk(dir: &Path, libraries: &[(&str, &[&str])]) -> PathBuf {
    let lib_dir = dir.join("lib");
    std::fs::create_dir_all(&lib_dir).unwrap();
    for (name, symbols) in libraries {
        write_stub_library(&lib_dir.join(name), symbols);
    }
    dir.to_path_buf()
}

#[allow(clippy::too_many_arguments)]
fn add_section(
    sections: &mut Vec<Section>,
    off: &mut u64,
    name: &str,
    sh_type: u32,
    flags: u64,
    entsize: u64,
    data: Vec<u8>,
) -> usize {
    let size = data.len() as u64;
    sections.push(Section {
        name: name.to_string(),
        sh_type,
        flags,
        offset: *off,
        addr: BASE + *off,
        size,
        link: 0,
        info: 0,
        addralign: 0x10,
        entsize,
        data,
    });
    if sh_type != SHT_NOBITS {
        *off = align16(*off + size);
    }
    sections.len() - 1
}

fn align16(val: u64) -> u64 {
    (val + 0xF) & !0xF
}

fn push_rela(data: &mut Vec<u8>, offset: u64, info: u64, addend: u64) {
    data.extend_from_slice(&offset.to_le_bytes());
    data.extend_from_slice(&info.to_le_bytes());
    data.extend_from_slice(&addend.to_le_bytes());
}

fn write_u16(out: &mut [u8], offset: usize, value: u16) {
    out[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(out: &mut [u8], offset: usize, value: u32) {
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u64(out: &mut [u8], offset: usize, value: u64) {
    out[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
