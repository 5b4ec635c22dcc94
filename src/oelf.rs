//! OELF construction.
//!
//! The output starts as a byte-for-byte copy of the input ELF; the dynlib
//! data segment is appended, then the header table, file header, dynamic
//! section header, interpreter bytes, and SDK version stamp are patched in
//! place. The section-header table passes through untouched apart from the
//! dynamic entry.

use std::path::Path;

use elf::abi::{ELFCLASS64, ELFDATA2LSB, ELFMAGIC, EM_X86_64, SHT_DYNAMIC};

use crate::abi::{ELFOSABI_FREEBSD_SCE, ET_SCE_DYNAMIC, ET_SCE_EXEC_ASLR, INTERPRETER};
use crate::dynlib::{self, DynlibLayout};
use crate::input::{InputElf, EHDR_SIZE, SHDR_SIZE};
use crate::library;
use crate::segment::{self, Phdr, PHDR_SIZE, PHDR_TABLE_OFFSET};
use crate::{malformed_input, Result};

/// Size of the interpreter region at the head of `.text`.
const INTERP_FIELD_SIZE: usize = 0x20;
/// Offset of the SDK version stamp inside the param section.
const SDK_VERSION_OFFSET: u64 = 0x10;

#[derive(Debug)]
pub struct OrbisElfBuilder {
    input: InputElf,
    is_library: bool,
    project_name: String,
    output: Vec<u8>,
    phdrs: Vec<Phdr>,
    layout: DynlibLayout,
}

impl OrbisElfBuilder {
    /// Read and validate the input, and seed the output with its image.
    pub fn open(path: &Path, is_library: bool, lib_name: Option<&str>) -> Result<Self> {
        let input = InputElf::read(path)?;
        input.validate()?;

        let mut project_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        if is_library {
            if let Some(name) = lib_name {
                project_name = name.to_string();
            }
        }

        let output = input.bytes().to_vec();
        Ok(OrbisElfBuilder {
            input,
            is_library,
            project_name,
            output,
            phdrs: Vec::new(),
            layout: DynlibLayout::default(),
        })
    }

    /// Run every transformation; afterwards the builder holds the complete
    /// OELF image.
    pub fn generate(
        &mut self,
        sdk_root: &Path,
        library_path: &str,
        sdk_version: u32,
    ) -> Result<()> {
        let deps = library::resolve(&self.input, sdk_root, library_path)?;

        let (segment_data, layout) =
            dynlib::build(&self.input, &deps, self.is_library, &self.project_name)?;
        self.layout = layout;
        self.output.extend_from_slice(&segment_data);

        self.phdrs = segment::generate(&self.input, self.is_library, &self.layout)?;

        self.rewrite_elf_header()?;
        self.rewrite_program_headers();
        self.rewrite_dynamic_section_header()?;
        self.rewrite_interpreter()?;
        self.rewrite_sdk_version(sdk_version)?;
        Ok(())
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, &self.output)?;
        Ok(())
    }

    /// The OELF image assembled so far.
    pub fn bytes(&self) -> &[u8] {
        &self.output
    }

    fn rewrite_elf_header(&mut self) -> Result<()> {
        let input_ehdr = self.input.parse()?.ehdr;
        let (e_type, e_entry) = if self.is_library {
            (ET_SCE_DYNAMIC, 0)
        } else {
            (ET_SCE_EXEC_ASLR, self.input.entry()?)
        };

        let mut header = [0u8; EHDR_SIZE];
        header[0..4].copy_from_slice(&ELFMAGIC);
        header[4] = ELFCLASS64;
        header[5] = ELFDATA2LSB;
        header[6] = 1; // EV_CURRENT
        header[7] = ELFOSABI_FREEBSD_SCE;
        header[0x10..0x12].copy_from_slice(&e_type.to_le_bytes());
        header[0x12..0x14].copy_from_slice(&EM_X86_64.to_le_bytes());
        header[0x14..0x18].copy_from_slice(&1u32.to_le_bytes());
        header[0x18..0x20].copy_from_slice(&e_entry.to_le_bytes());
        header[0x20..0x28].copy_from_slice(&PHDR_TABLE_OFFSET.to_le_bytes());
        header[0x28..0x30].copy_from_slice(&input_ehdr.e_shoff.to_le_bytes());
        header[0x30..0x34].copy_from_slice(&0u32.to_le_bytes());
        header[0x34..0x36].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        header[0x36..0x38].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        header[0x38..0x3A].copy_from_slice(&(self.phdrs.len() as u16).to_le_bytes());
        header[0x3A..0x3C].copy_from_slice(&input_ehdr.e_shentsize.to_le_bytes());
        header[0x3C..0x3E].copy_from_slice(&input_ehdr.e_shnum.to_le_bytes());
        header[0x3E..0x40].copy_from_slice(&input_ehdr.e_shstrndx.to_le_bytes());

        write_at(&mut self.output, 0, &header);
        Ok(())
    }

    fn rewrite_program_headers(&mut self) {
        for (i, ph) in self.phdrs.iter().enumerate() {
            let offset = PHDR_TABLE_OFFSET + i as u64 * PHDR_SIZE;
            write_at(&mut self.output, offset, &ph.encode());
        }
    }

    /// Point the preserved `SHT_DYNAMIC` section header into DynlibData.
    fn rewrite_dynamic_section_header(&mut self) -> Result<()> {
        let ehdr = self.input.parse()?.ehdr;
        let shdrs = self.input.section_headers()?;

        for (i, shdr) in shdrs.iter().enumerate() {
            if shdr.sh_type != SHT_DYNAMIC {
                continue;
            }
            let mut patched = [0u8; SHDR_SIZE];
            patched[0x00..0x04].copy_from_slice(&shdr.sh_name.to_le_bytes());
            patched[0x04..0x08].copy_from_slice(&shdr.sh_type.to_le_bytes());
            patched[0x08..0x10].copy_from_slice(&shdr.sh_flags.to_le_bytes());
            patched[0x10..0x18].copy_from_slice(&self.layout.offset_of_dynamic.to_le_bytes());
            patched[0x18..0x20].copy_from_slice(&self.layout.offset_of_dynamic.to_le_bytes());
            patched[0x20..0x28].copy_from_slice(&self.layout.size_of_dynamic.to_le_bytes());
            patched[0x28..0x2C].copy_from_slice(&shdr.sh_link.to_le_bytes());
            patched[0x2C..0x30].copy_from_slice(&shdr.sh_info.to_le_bytes());
            patched[0x30..0x38].copy_from_slice(&shdr.sh_addralign.to_le_bytes());
            patched[0x38..0x40].copy_from_slice(&shdr.sh_entsize.to_le_bytes());

            let position = ehdr.e_shoff + i as u64 * ehdr.e_shentsize as u64;
            write_at(&mut self.output, position, &patched);
            break;
        }
        Ok(())
    }

    fn rewrite_interpreter(&mut self) -> Result<()> {
        let text = self.input.require_section(".text")?;
        if (text.sh_size as usize) < INTERP_FIELD_SIZE {
            return Err(malformed_input(".text too small for the interpreter"));
        }
        let mut field = [0u8; INTERP_FIELD_SIZE];
        field[..INTERPRETER.len()].copy_from_slice(INTERPRETER.as_bytes());
        write_at(&mut self.output, text.sh_offset, &field);
        Ok(())
    }

    fn rewrite_sdk_version(&mut self, sdk_version: u32) -> Result<()> {
        let name = if self.is_library {
            ".data.sce_module_param"
        } else {
            ".data.sce_process_param"
        };
        let param = self.input.require_section(name)?;
        write_at(
            &mut self.output,
            param.sh_offset + SDK_VERSION_OFFSET,
            &sdk_version.to_le_bytes(),
        );
        Ok(())
    }
}

/// Overwrite `data` at `offset`, growing the buffer when the write extends
/// past the current end.
fn write_at(buffer: &mut Vec<u8>, offset: u64, data: &[u8]) {
    let offset = offset as usize;
    let end = offset + data.len();
    if buffer.len() < end {
        buffer.resize(end, 0);
    }
    buffer[offset..end].copy_from_slice(data);
}
