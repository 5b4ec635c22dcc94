//! Relocation table of the DynlibData segment.
//!
//! Input `.rela.plt` then `.rela.dyn` entries are copied through with their
//! symbol index shifted up by one, compensating for the section symbol
//! prepended to the synthesized symbol table. When libc is linked, object
//! relocations binding the `Need_sceLibc` marker are appended.

use byteorder::{LittleEndian, ReadBytesExt};

use crate::abi::R_AMD64_64;
use crate::input::{InputElf, Symbol};
use crate::{malformed_input, unsupported_input, Result};

use super::{write_rela_entry, DynlibLayout};

const RELA_ENTRY_SIZE: usize = 0x18;
/// Symbol-index shift for the prepended `STT_SECTION` entry.
const SECTION_SYMBOL_SHIFT: u64 = 1 << 32;

pub(super) fn write(
    data: &mut Vec<u8>,
    input: &InputElf,
    symbols: &[Symbol],
    layout: &DynlibLayout,
    is_library: bool,
) -> Result<u64> {
    let start = data.len();

    copy_rela_section(data, input, ".rela.plt")?;
    copy_rela_section(data, input, ".rela.dyn")?;

    if let Some(need_index) = layout.need_sce_libc_index {
        // Index in the emitted table: two leading entries precede slot 0.
        let symbol_index = (need_index + 2) as u64;
        let info = (symbol_index << 32) | R_AMD64_64;

        if !is_library {
            let libc_param = require_symbol(symbols, "_sceLibcParam")?;
            write_rela_entry(data, libc_param.value + 0x48, info, 0);
        }
        let need_libc = require_symbol(symbols, "_sceNeedLibc")?;
        write_rela_entry(data, need_libc.value, info, 0);
    }

    Ok((data.len() - start) as u64)
}

/// Copy every entry of the named rela section, index-shifted. A missing
/// section contributes nothing.
fn copy_rela_section(data: &mut Vec<u8>, input: &InputElf, name: &str) -> Result<()> {
    let Some(shdr) = input.section(name)? else {
        return Ok(());
    };
    let bytes = input.section_data(&shdr)?;
    if bytes.len() % RELA_ENTRY_SIZE != 0 {
        return Err(malformed_input(format!("{name} size is not a multiple of 0x18")));
    }

    let mut cursor = bytes;
    while !cursor.is_empty() {
        let offset = cursor.read_u64::<LittleEndian>()?;
        let info = cursor.read_u64::<LittleEndian>()?;
        let addend = cursor.read_u64::<LittleEndian>()?;
        write_rela_entry(data, offset, info + SECTION_SYMBOL_SHIFT, addend);
    }
    Ok(())
}

fn require_symbol<'a>(symbols: &'a [Symbol], name: &str) -> Result<&'a Symbol> {
    symbols
        .iter()
        .find(|sym| sym.name == name)
        .ok_or_else(|| unsupported_input(format!("input does not define {name}")))
}
