//! Synthesis of the trailing DynlibData segment.
//!
//! The segment is one contiguous byte run: fingerprint, string table, symbol
//! table, relocation table, hash table, dynamic table, in that order with the
//! alignments the runtime expects. Each sub-table writer appends to the
//! shared buffer and records what later writers and the header patches need
//! in a [`DynlibLayout`] passed by reference; nothing outlives one build.

use elf::abi::{DT_PLTGOT, DT_PLTRELSZ};

use crate::abi::{FINGERPRINT, FINGERPRINT_SIZE};
use crate::input::InputElf;
use crate::library::DependencySet;
use crate::Result;

mod dynamic;
mod hashtab;
mod reloc;
mod strtab;
mod symtab;

/// Named offsets and sizes produced while the segment is assembled.
///
/// String-table offsets are relative to the string table start; `offset_of_*`
/// file positions are relative to the start of the output file.
#[derive(Debug, Default)]
pub struct DynlibLayout {
    /// File offset the segment is appended at (= input file size).
    pub offset_of_dynlib_data: u64,
    /// File offset of the dynamic sub-table.
    pub offset_of_dynamic: u64,
    pub size_of_dynamic: u64,
    pub size_of_dynlib_data: u64,
    pub size_of_str_table: u64,

    /// String-table offset of the project name.
    pub offset_of_project_name: u64,
    /// String-table offset of the input file name.
    pub offset_of_file_name: u64,
    /// String-table offset of the first NID entry.
    pub offset_of_nid_table: u64,

    /// PRX filename offsets, one per module, for `DT_NEEDED`.
    pub library_name_offsets: Vec<u64>,
    /// Module name offsets for `DT_SCE_IMPORT_MODULE`.
    pub imported_module_offsets: Vec<u64>,
    /// Library name offsets for `DT_SCE_IMPORT_LIB`.
    pub imported_library_offsets: Vec<u64>,

    /// Emitted symbol-table position of the `Need_sceLibc` marker.
    pub need_sce_libc_index: Option<usize>,
    /// Total emitted symbol entries; becomes the hash chain count.
    pub symbol_count: usize,
}

/// Segment-relative offsets/sizes of the sub-tables, for the dynamic table.
#[derive(Debug, Default)]
pub struct TableOffsets {
    pub string_table: u64,
    pub string_table_size: u64,
    pub symbol_table: u64,
    pub symbol_table_size: u64,
    pub jump_table: u64,
    pub jump_table_size: u64,
    pub relocation_table: u64,
    pub relocation_table_size: u64,
    pub hash_table: u64,
    pub hash_table_size: u64,
    pub dynamic_table: u64,
    pub dynamic_table_size: u64,
    /// `DT_PLTGOT` carried over from the input dynamic table (0 if absent).
    pub pltgot: u64,
}

/// Build the complete segment. Returns its bytes and the layout record.
pub fn build(
    input: &InputElf,
    deps: &DependencySet,
    is_library: bool,
    project_name: &str,
) -> Result<(Vec<u8>, DynlibLayout)> {
    let mut data: Vec<u8> = Vec::new();
    let mut layout = DynlibLayout {
        offset_of_dynlib_data: input.len(),
        ..Default::default()
    };
    let mut tables = TableOffsets {
        pltgot: input.dynamic_tag(DT_PLTGOT)?.unwrap_or(0),
        jump_table_size: input.dynamic_tag(DT_PLTRELSZ)?.unwrap_or(0),
        ..Default::default()
    };

    let symbols = input.dynamic_symbols()?;

    write_fingerprint(&mut data);

    tables.string_table = data.len() as u64;
    tables.string_table_size = strtab::write(
        &mut data,
        &mut layout,
        &symbols,
        deps,
        is_library,
        project_name,
        &input.name,
    )?;

    pad_to(&mut data, 0x8);

    tables.symbol_table = data.len() as u64;
    tables.symbol_table_size = symtab::write(&mut data, &mut layout, &symbols, deps, is_library);

    // Jump-slot entries lead the relocation run; their length is pinned by
    // the input's DT_PLTRELSZ, so the general table starts right after it.
    tables.jump_table = data.len() as u64;
    tables.relocation_table = tables.jump_table + tables.jump_table_size;
    let relocation_total = reloc::write(&mut data, input, &symbols, &layout, is_library)?;
    tables.relocation_table_size = relocation_total
        .checked_sub(tables.jump_table_size)
        .ok_or_else(|| crate::malformed_input("DT_PLTRELSZ exceeds the relocation tables"))?;

    tables.hash_table = data.len() as u64;
    tables.hash_table_size = hashtab::write(&mut data, layout.symbol_count);

    pad_to(&mut data, 0x10);

    tables.dynamic_table = data.len() as u64;
    tables.dynamic_table_size = dynamic::write(&mut data, input, &layout, &tables, is_library)?;

    layout.offset_of_dynamic = layout.offset_of_dynlib_data + tables.dynamic_table;
    layout.size_of_dynamic = tables.dynamic_table_size;
    layout.size_of_dynlib_data = data.len() as u64;

    log::debug!(
        "dynlib data: {:#x} bytes ({} symbols, strtab {:#x}, dynamic {:#x})",
        layout.size_of_dynlib_data,
        layout.symbol_count,
        tables.string_table_size,
        tables.dynamic_table_size,
    );
    Ok((data, layout))
}

fn write_fingerprint(data: &mut Vec<u8>) {
    let mut field = [0u8; FINGERPRINT_SIZE as usize];
    field[..FINGERPRINT.len()].copy_from_slice(FINGERPRINT.as_bytes());
    data.extend_from_slice(&field);
}

/// Append zeros until the buffer length is a multiple of `align`.
pub(crate) fn pad_to(data: &mut Vec<u8>, align: u64) {
    let padding = (align - (data.len() as u64 % align)) % align;
    data.resize(data.len() + padding as usize, 0);
}

/// One 16-byte tagged dynamic entry.
pub(crate) fn write_dyn_entry(data: &mut Vec<u8>, tag: u64, value: u64) {
    data.extend_from_slice(&tag.to_le_bytes());
    data.extend_from_slice(&value.to_le_bytes());
}

/// One 0x18-byte symbol-table entry.
pub(crate) fn write_sym_entry(
    data: &mut Vec<u8>,
    name: u32,
    info: u8,
    other: u8,
    shndx: u16,
    value: u64,
    size: u64,
) {
    data.extend_from_slice(&name.to_le_bytes());
    data.push(info);
    data.push(other);
    data.extend_from_slice(&shndx.to_le_bytes());
    data.extend_from_slice(&value.to_le_bytes());
    data.extend_from_slice(&size.to_le_bytes());
}

/// One 24-byte rela entry.
pub(crate) fn write_rela_entry(data: &mut Vec<u8>, offset: u64, info: u64, addend: u64) {
    data.extend_from_slice(&offset.to_le_bytes());
    data.extend_from_slice(&info.to_le_bytes());
    data.extend_from_slice(&addend.to_le_bytes());
}
