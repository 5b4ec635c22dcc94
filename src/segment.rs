//! Program-header rewrite for the OELF.
//!
//! The input's table is filtered (read-only loads, `GNU_STACK`, degenerate
//! relro artifacts), patched (dynamic pointer, relro conversion, load
//! alignment and extents), extended with the platform segments, and ordered
//! by the runtime's fixed priority before being serialized back over the
//! table at file offset 0x40.

use elf::abi::{
    PF_R, PF_W, PF_X, PT_DYNAMIC, PT_GNU_EH_FRAME, PT_GNU_RELRO, PT_GNU_STACK, PT_INTERP, PT_LOAD,
    PT_TLS,
};

use crate::abi::{PT_SCE_DYNLIBDATA, PT_SCE_MODULE_PARAM, PT_SCE_PROC_PARAM, PT_SCE_RELRO};
use crate::align_up;
use crate::dynlib::DynlibLayout;
use crate::input::InputElf;
use crate::Result;

/// File offset of the program-header table in the output.
pub const PHDR_TABLE_OFFSET: u64 = 0x40;
/// On-disk size of one program header.
pub const PHDR_SIZE: u64 = 0x38;

const PAGE_ALIGN: u64 = 0x4000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Phdr {
    pub p_type: u32,
    pub p_flags: u32,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_paddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

impl From<elf::segment::ProgramHeader> for Phdr {
    fn from(ph: elf::segment::ProgramHeader) -> Self {
        Phdr {
            p_type: ph.p_type,
            p_flags: ph.p_flags,
            p_offset: ph.p_offset,
            p_vaddr: ph.p_vaddr,
            p_paddr: ph.p_paddr,
            p_filesz: ph.p_filesz,
            p_memsz: ph.p_memsz,
            p_align: ph.p_align,
        }
    }
}

impl Phdr {
    /// Serialized table entry. Entries with raw tag 0x7 go out with align
    /// 0x20 regardless of their stored alignment; the runtime expects it.
    pub fn encode(&self) -> [u8; PHDR_SIZE as usize] {
        let align = if self.p_type == 0x7 { 0x20 } else { self.p_align };
        let mut out = [0u8; PHDR_SIZE as usize];
        out[0x00..0x04].copy_from_slice(&self.p_type.to_le_bytes());
        out[0x04..0x08].copy_from_slice(&self.p_flags.to_le_bytes());
        out[0x08..0x10].copy_from_slice(&self.p_offset.to_le_bytes());
        out[0x10..0x18].copy_from_slice(&self.p_vaddr.to_le_bytes());
        out[0x18..0x20].copy_from_slice(&self.p_paddr.to_le_bytes());
        out[0x20..0x28].copy_from_slice(&self.p_filesz.to_le_bytes());
        out[0x28..0x30].copy_from_slice(&self.p_memsz.to_le_bytes());
        out[0x30..0x38].copy_from_slice(&align.to_le_bytes());
        out
    }
}

/// Produce the rewritten, sorted program-header table.
pub fn generate(input: &InputElf, is_library: bool, layout: &DynlibLayout) -> Result<Vec<Phdr>> {
    let text = input.require_section(".text")?;
    let relro_section = input.section(".data.rel.ro")?;
    let bss = input.section(".bss")?;
    let param_name = if is_library {
        ".data.sce_module_param"
    } else {
        ".data.sce_process_param"
    };
    let param = input.require_section(param_name)?;
    // Without .data the param section itself bounds the writable image.
    let data_section = input.section(".data")?.unwrap_or_else(|| param.clone());

    let input_phdrs: Vec<Phdr> = input.program_headers()?.into_iter().map(Phdr::from).collect();
    let gnu_relro = input_phdrs
        .iter()
        .find(|ph| ph.p_type == PT_GNU_RELRO && ph.p_flags == PF_R)
        .copied();

    let input_count = input_phdrs.len();
    let mut phdrs: Vec<Phdr> = Vec::with_capacity(input_count + 3);

    // First pass: drop what the runtime must not see.
    for mut ph in input_phdrs {
        if ph.p_type == PT_LOAD && ph.p_flags == PF_R {
            continue;
        }

        if let Some(relro) = gnu_relro {
            let relro_span = align_up(relro.p_memsz, PAGE_ALIGN);
            if ph.p_type == PT_LOAD && ph.p_offset == relro.p_offset {
                if ph.p_memsz > relro_span {
                    // The load extends past the relro image: keep the tail.
                    ph.p_offset += relro_span;
                    ph.p_vaddr += relro_span;
                    ph.p_paddr = 0;
                    ph.p_filesz = ph.p_filesz.saturating_sub(relro_span);
                    ph.p_memsz -= relro_span;
                } else {
                    continue;
                }
            }
        }

        if ph.p_type == PT_GNU_RELRO && relro_section.is_none() {
            continue;
        }
        if ph.p_type == PT_GNU_STACK {
            continue;
        }

        phdrs.push(ph);
    }

    // Second pass: retarget what survives.
    for ph in &mut phdrs {
        if ph.p_type == PT_DYNAMIC {
            ph.p_offset = layout.offset_of_dynamic;
            ph.p_vaddr = layout.offset_of_dynamic;
            ph.p_paddr = layout.offset_of_dynamic;
            ph.p_filesz = layout.size_of_dynamic;
            ph.p_memsz = layout.size_of_dynamic;
        }

        if ph.p_type == PT_GNU_RELRO {
            // Becomes SCE_RELRO, stretched to abut the param section.
            ph.p_type = PT_SCE_RELRO;
            let expanded = param.sh_offset - ph.p_offset;
            ph.p_filesz = expanded;
            ph.p_memsz = expanded;
            ph.p_align = PAGE_ALIGN;
        }

        if ph.p_type == PT_LOAD {
            ph.p_align = PAGE_ALIGN;

            if ph.p_flags == PF_R | PF_X {
                if let Some(relro) = &relro_section {
                    let expanded = relro.sh_offset - ph.p_offset;
                    ph.p_filesz = expanded;
                    ph.p_memsz = expanded;
                }
            }

            if ph.p_flags == PF_R | PF_W {
                // The writable image starts at the param section; file size
                // runs to the end of .data, memory size through .bss.
                let file_size = (data_section.sh_offset - param.sh_offset) + data_section.sh_size;
                let mut mem_size = (data_section.sh_addr - param.sh_addr) + data_section.sh_size;
                if let Some(bss) = &bss {
                    mem_size +=
                        (bss.sh_addr - (data_section.sh_addr + data_section.sh_size)) + bss.sh_size;
                }
                ph.p_offset = param.sh_offset;
                ph.p_vaddr = param.sh_addr;
                ph.p_paddr = param.sh_addr;
                ph.p_filesz = file_size;
                ph.p_memsz = mem_size;
            }
        }
    }

    let param_type = if is_library {
        PT_SCE_MODULE_PARAM
    } else {
        PT_SCE_PROC_PARAM
    };
    phdrs.push(Phdr {
        p_type: param_type,
        p_flags: PF_R,
        p_offset: param.sh_offset,
        p_vaddr: param.sh_addr,
        p_paddr: param.sh_addr,
        p_filesz: param.sh_size,
        p_memsz: param.sh_size,
        p_align: 0x8,
    });
    phdrs.push(Phdr {
        p_type: PT_SCE_DYNLIBDATA,
        p_flags: PF_R,
        p_offset: layout.offset_of_dynlib_data,
        p_vaddr: 0,
        p_paddr: 0,
        p_filesz: layout.size_of_dynlib_data,
        p_memsz: 0,
        p_align: 0x10,
    });
    if !is_library {
        // The interpreter string occupies the head of .text.
        phdrs.push(Phdr {
            p_type: PT_INTERP,
            p_flags: PF_R,
            p_offset: text.sh_offset,
            p_vaddr: 0,
            p_paddr: 0,
            p_filesz: 0x15,
            p_memsz: 0x15,
            p_align: 1,
        });
    }

    // Stable, so same-priority headers keep input order.
    phdrs.sort_by_key(|ph| priority(ph.p_type, ph.p_flags));
    log::trace!(
        "program headers rewritten: {input_count} in, {} out",
        phdrs.len()
    );
    Ok(phdrs)
}

/// Runtime-prescribed table order. `PT_LOAD` holds two slots, resolved by
/// permissions: the executable image leads, the writable image follows the
/// relro segment. Unknown types sink to the end.
fn priority(p_type: u32, p_flags: u32) -> u32 {
    match p_type {
        PT_LOAD if p_flags == PF_R | PF_W => 2,
        PT_LOAD => 0,
        PT_SCE_RELRO => 1,
        PT_SCE_PROC_PARAM => 3,
        PT_SCE_MODULE_PARAM => 4,
        PT_DYNAMIC => 5,
        PT_INTERP => 6,
        PT_TLS => 7,
        PT_GNU_EH_FRAME => 8,
        PT_SCE_DYNLIBDATA => 9,
        _ => u32::MAX,
    }
}
