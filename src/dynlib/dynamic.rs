//! Dynamic table of the DynlibData segment.
//!
//! Fixed tag order; table offsets reference the other sub-tables relative to
//! the segment start. Module and library references pack a string-table
//! offset, a version, and a 1-based id into single tagged values.

use elf::abi::{
    DF_TEXTREL, DT_DEBUG, DT_FINI, DT_FINI_ARRAY, DT_FINI_ARRAYSZ, DT_FLAGS, DT_INIT,
    DT_INIT_ARRAY, DT_INIT_ARRAYSZ, DT_NEEDED, DT_NULL, DT_RELA, DT_TEXTREL,
};

use crate::abi::{
    DT_SCE_EXPORT_LIB, DT_SCE_EXPORT_LIB_ATTR, DT_SCE_EXPORT_MODULE, DT_SCE_FILENAME,
    DT_SCE_FINGERPRINT, DT_SCE_HASH, DT_SCE_HASHSZ, DT_SCE_IMPORT_LIB, DT_SCE_IMPORT_LIB_ATTR,
    DT_SCE_IMPORT_MODULE, DT_SCE_JMPREL, DT_SCE_MODULE_ATTR, DT_SCE_PLTGOT, DT_SCE_PLTREL,
    DT_SCE_PLTRELSZ, DT_SCE_RELA, DT_SCE_RELAENT, DT_SCE_RELASZ, DT_SCE_STRSZ, DT_SCE_STRTAB,
    DT_SCE_SYMENT, DT_SCE_SYMTAB, DT_SCE_SYMTABSZ,
};
use crate::input::InputElf;
use crate::{unsupported_input, Result};

use super::{write_dyn_entry, DynlibLayout, TableOffsets};

/// name offset | major << 32 | minor << 40 | id << 48
fn module_tag_value(name_offset: u32, major: u8, minor: u8, id: u16) -> u64 {
    name_offset as u64 | (major as u64) << 32 | (minor as u64) << 40 | (id as u64) << 48
}

/// name offset | version << 32 | id << 48
fn lib_tag_value(name_offset: u32, version: u16, id: u16) -> u64 {
    name_offset as u64 | (version as u64) << 32 | (id as u64) << 48
}

/// attributes | id << 48
fn attr_tag_value(attr: u16, id: u16) -> u64 {
    attr as u64 | (id as u64) << 48
}

pub(super) fn write(
    data: &mut Vec<u8>,
    input: &InputElf,
    layout: &DynlibLayout,
    tables: &TableOffsets,
    is_library: bool,
) -> Result<u64> {
    let start = data.len();
    let mut entry = |tag: u64, value: u64| write_dyn_entry(data, tag, value);

    entry(DT_SCE_HASH, tables.hash_table);
    entry(DT_SCE_HASHSZ, tables.hash_table_size);

    entry(DT_SCE_STRTAB, tables.string_table);
    entry(DT_SCE_STRSZ, tables.string_table_size);

    entry(DT_SCE_SYMTAB, tables.symbol_table);
    entry(DT_SCE_SYMTABSZ, tables.symbol_table_size);
    entry(DT_SCE_SYMENT, 0x18);

    entry(DT_SCE_RELA, tables.relocation_table);
    entry(DT_SCE_RELASZ, tables.relocation_table_size);
    entry(DT_SCE_RELAENT, 0x18);

    entry(DT_SCE_PLTGOT, pltgot_address(input, tables)?);
    entry(DT_SCE_JMPREL, tables.jump_table);
    entry(DT_SCE_PLTRELSZ, tables.jump_table_size);
    entry(DT_SCE_PLTREL, DT_RELA as u64);

    for tag in [
        DT_INIT_ARRAY,
        DT_INIT_ARRAYSZ,
        DT_INIT,
        DT_FINI_ARRAY,
        DT_FINI_ARRAYSZ,
        DT_FINI,
    ] {
        if let Some(value) = input.dynamic_tag(tag)? {
            if value != 0 {
                entry(tag as u64, value);
            }
        }
    }

    entry(DT_DEBUG as u64, 0);
    if !is_library {
        entry(DT_TEXTREL as u64, 0);
    }
    let flags = if is_library { 0 } else { DF_TEXTREL as u64 };
    entry(DT_FLAGS as u64, flags);

    for offset in &layout.library_name_offsets {
        entry(DT_NEEDED as u64, *offset);
    }

    for (i, offset) in layout.imported_module_offsets.iter().enumerate() {
        let id = (1 + i) as u16;
        entry(DT_SCE_IMPORT_MODULE, module_tag_value(*offset as u32, 1, 1, id));
    }

    if is_library {
        entry(
            DT_SCE_EXPORT_LIB,
            lib_tag_value(layout.offset_of_project_name as u32, 1, 0),
        );
        entry(DT_SCE_EXPORT_LIB_ATTR, attr_tag_value(1, 0));
    }

    for (i, offset) in layout.imported_library_offsets.iter().enumerate() {
        let id = (1 + i) as u16;
        entry(DT_SCE_IMPORT_LIB, lib_tag_value(*offset as u32, 1, id));
        entry(DT_SCE_IMPORT_LIB_ATTR, attr_tag_value(0x9, id));
    }

    entry(DT_SCE_FINGERPRINT, 0);
    entry(DT_SCE_FILENAME, layout.offset_of_file_name);

    entry(
        DT_SCE_EXPORT_MODULE,
        module_tag_value(layout.offset_of_project_name as u32, 1, 1, 0),
    );
    entry(DT_SCE_MODULE_ATTR, attr_tag_value(0, 0));

    entry(DT_NULL as u64, 0);

    Ok((data.len() - start) as u64)
}

/// The input's `DT_PLTGOT` when it carries one, else the `.got.plt` address.
fn pltgot_address(input: &InputElf, tables: &TableOffsets) -> Result<u64> {
    if tables.pltgot != 0 {
        return Ok(tables.pltgot);
    }
    match input.section(".got.plt")? {
        Some(shdr) => Ok(shdr.sh_addr),
        None => Err(unsupported_input(
            "input has neither DT_PLTGOT nor a .got.plt section",
        )),
    }
}
