//! Symbol table of the DynlibData segment.
//!
//! Entries are the standard 0x18-byte layout, but names index the NID table:
//! entry k's name field is `offset_of_nid_table + k * 0x10`, k counting only
//! named entries. Undefined input symbols with empty names still occupy a
//! zero entry without advancing the counter.

use elf::abi::{STB_GLOBAL, STB_WEAK, STT_OBJECT, STT_SECTION};

use crate::input::Symbol;
use crate::library::DependencySet;

use super::strtab::symbol_is_exported;
use super::{write_sym_entry, DynlibLayout};

const SYM_ENTRY_SIZE: usize = 0x18;
/// Byte stride of one NID entry in the string table.
const NID_ENTRY_SIZE: u64 = 0x10;

pub(super) fn write(
    data: &mut Vec<u8>,
    layout: &mut DynlibLayout,
    symbols: &[Symbol],
    deps: &DependencySet,
    is_library: bool,
) -> u64 {
    let start = data.len();
    let nid_table = layout.offset_of_nid_table;

    // Null entry, then the section anchor the relocation indices assume.
    write_sym_entry(data, 0, 0, 0, 0, 0, 0);
    write_sym_entry(data, 0, STT_SECTION, 0, 0, 0, 0);

    let mut named = 0u64;

    for symbol in symbols {
        if !symbol.is_undefined() {
            continue;
        }
        if symbol.name.is_empty() {
            // Placeholder; keeps table positions but owns no NID string.
            write_sym_entry(data, 0, 0, 0, 0, 0, 0);
            continue;
        }
        let name = (nid_table + named * NID_ENTRY_SIZE) as u32;
        write_sym_entry(data, name, symbol.info, 0, 0, 0, 0);
        named += 1;
    }

    if deps.libc_module_index().is_some() {
        layout.need_sce_libc_index = Some(named as usize);
        let name = (nid_table + named * NID_ENTRY_SIZE) as u32;
        write_sym_entry(data, name, (STB_GLOBAL << 4) | STT_OBJECT, 0, 0, 0, 0);
        named += 1;
    }

    if is_library {
        for symbol in symbols {
            if !symbol_is_exported(symbol) {
                continue;
            }
            let name = (nid_table + named * NID_ENTRY_SIZE) as u32;
            write_sym_entry(
                data,
                name,
                symbol.info,
                symbol.other,
                symbol.shndx,
                symbol.value,
                symbol.size,
            );
            named += 1;
        }

        // module_stop / module_start live directly after the NID entries, so
        // their offsets derive from the counter rather than advancing it.
        let stop = nid_table + named * NID_ENTRY_SIZE;
        let start_off = stop + "module_stop\0".len() as u64;
        write_sym_entry(data, stop as u32, STB_WEAK << 4, 0, 0, 0, 0);
        write_sym_entry(data, start_off as u32, STB_WEAK << 4, 0, 0, 0, 0);
    }

    let size = (data.len() - start) as u64;
    layout.symbol_count = size as usize / SYM_ENTRY_SIZE;
    size
}
