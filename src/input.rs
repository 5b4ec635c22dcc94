//! Parsed view over an input ELF file.
//!
//! The whole file is read into memory once; structured access goes through
//! the `elf` crate on demand. Parsing a view is cheap, so the raw bytes are
//! the only state kept here.

use std::path::Path;

use elf::abi::{
    ELFCLASS64, ELFDATA2LSB, ELFMAGIC, EI_CLASS, EI_DATA, EM_X86_64, SHN_UNDEF, SHT_NOBITS,
};
use elf::endian::LittleEndian;
use elf::section::SectionHeader;
use elf::segment::ProgramHeader;
use elf::string_table::StringTable;
use elf::ElfBytes;

use crate::{malformed_input, unsupported_input, Result};

pub const EHDR_SIZE: usize = 0x40;
pub const SHDR_SIZE: usize = 0x40;

/// An ELF symbol detached from the parse buffer.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub info: u8,
    pub other: u8,
    pub shndx: u16,
    pub value: u64,
    pub size: u64,
}

impl Symbol {
    #[inline]
    pub fn is_undefined(&self) -> bool {
        self.shndx == SHN_UNDEF
    }

    #[inline]
    pub fn bind(&self) -> u8 {
        self.info >> 4
    }
}

/// An input ELF held fully in memory.
#[derive(Debug)]
pub struct InputElf {
    bytes: Vec<u8>,
    /// Path string the file was opened from, as given by the caller.
    pub name: String,
}

impl InputElf {
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(InputElf {
            bytes,
            name: path.to_string_lossy().into_owned(),
        })
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Checks the identification bytes and machine before any deeper parse,
    /// so unconvertible inputs fail with a precise reason.
    pub fn validate(&self) -> Result<()> {
        if self.bytes.len() < EHDR_SIZE {
            return Err(malformed_input("file too small for an ELF header"));
        }
        let ident = &self.bytes[..16];
        if ident[0..4] != ELFMAGIC {
            return Err(unsupported_input("not an ELF file"));
        }
        if ident[EI_DATA] != ELFDATA2LSB {
            return Err(unsupported_input("byte order must be little endian"));
        }
        if ident[EI_CLASS] != ELFCLASS64 {
            return Err(unsupported_input("elf must be a 64-bit elf"));
        }
        let elf = self.parse()?;
        if elf.ehdr.e_machine != EM_X86_64 {
            return Err(unsupported_input("architecture must be x86_64"));
        }
        Ok(())
    }

    pub fn parse(&self) -> Result<ElfBytes<'_, LittleEndian>> {
        Ok(ElfBytes::minimal_parse(&self.bytes)?)
    }

    pub fn entry(&self) -> Result<u64> {
        Ok(self.parse()?.ehdr.e_entry)
    }

    pub fn program_headers(&self) -> Result<Vec<ProgramHeader>> {
        let elf = self.parse()?;
        Ok(elf.segments().map(|t| t.iter().collect()).unwrap_or_default())
    }

    pub fn section_headers(&self) -> Result<Vec<SectionHeader>> {
        let elf = self.parse()?;
        Ok(elf
            .section_headers()
            .map(|t| t.iter().collect())
            .unwrap_or_default())
    }

    pub fn section(&self, name: &str) -> Result<Option<SectionHeader>> {
        Ok(self.parse()?.section_header_by_name(name)?)
    }

    pub fn require_section(&self, name: &str) -> Result<SectionHeader> {
        self.section(name)?
            .ok_or_else(|| unsupported_input(format!("missing required section {name}")))
    }

    /// Raw bytes of a section. `SHT_NOBITS` sections have no file presence.
    pub fn section_data(&self, shdr: &SectionHeader) -> Result<&[u8]> {
        if shdr.sh_type == SHT_NOBITS {
            return Ok(&[]);
        }
        let start = shdr.sh_offset as usize;
        let end = start + shdr.sh_size as usize;
        self.bytes
            .get(start..end)
            .ok_or_else(|| malformed_input("section extends past end of file"))
    }

    /// First value of the given dynamic tag, if the tag is present.
    pub fn dynamic_tag(&self, tag: i64) -> Result<Option<u64>> {
        let elf = self.parse()?;
        let Some(dynamic) = elf.dynamic()? else {
            return Ok(None);
        };
        for entry in dynamic.iter() {
            if entry.d_tag == tag {
                return Ok(Some(entry.d_val()));
            }
        }
        Ok(None)
    }

    /// `DT_NEEDED` entries resolved through the dynamic string table, in
    /// declaration order.
    pub fn needed_libraries(&self) -> Result<Vec<String>> {
        let elf = self.parse()?;
        let Some(dynamic) = elf.dynamic()? else {
            return Ok(Vec::new());
        };
        let strtab = self.dynamic_string_table(&elf)?;
        let mut needed = Vec::new();
        for entry in dynamic.iter() {
            if entry.d_tag == elf::abi::DT_NEEDED {
                let name = strtab
                    .get(entry.d_val() as usize)
                    .map_err(|_| malformed_input("DT_NEEDED name outside string table"))?;
                needed.push(name.to_string());
            }
        }
        Ok(needed)
    }

    fn dynamic_string_table<'data>(
        &'data self,
        elf: &ElfBytes<'data, LittleEndian>,
    ) -> Result<StringTable<'data>> {
        if let Some(shdr) = elf.section_header_by_name(".dynstr")? {
            let data = self.section_data(&shdr)?;
            return Ok(StringTable::new(data));
        }
        Err(malformed_input("input has no dynamic string table"))
    }

    /// Dynamic symbols in table order, without the leading null entry.
    pub fn dynamic_symbols(&self) -> Result<Vec<Symbol>> {
        let elf = self.parse()?;
        let Some((symtab, strtab)) = elf.dynamic_symbol_table()? else {
            return Ok(Vec::new());
        };
        let mut symbols = Vec::with_capacity(symtab.len().saturating_sub(1));
        for sym in symtab.iter().skip(1) {
            let name = strtab
                .get(sym.st_name as usize)
                .map_err(|_| malformed_input("symbol name outside string table"))?;
            symbols.push(Symbol {
                name: name.to_string(),
                info: (sym.st_bind() << 4) | sym.st_symtype(),
                other: sym.st_vis(),
                shndx: sym.st_shndx,
                value: sym.st_value,
                size: sym.st_size,
            });
        }
        Ok(symbols)
    }
}
