//! fSELF envelope around a finished OELF.
//!
//! The container starts with a header chain: container header, entry
//! descriptors, a mirror of the ELF header and program headers, extended
//! info carrying the SHA-256 of the payload, an NPDRM control block, zeroed
//! meta blocks, a meta footer, and a signature slot. The signed segments'
//! payloads follow at 0x10-aligned offsets. Nothing here produces a
//! verifiable signature; the envelope only has to satisfy loaders that skip
//! verification.

use std::path::Path;

use elf::abi::PT_LOAD;
use sha2::{Digest, Sha256};

use crate::abi::{
    PT_SCE_DYNLIBDATA, PT_SCE_RELRO, SELF_ATTRIBUTES, SELF_BLOCK_SIZE,
    SELF_CONTROL_BLOCK_TYPE_NPDRM, SELF_DATA_LSB, SELF_ELF_HEADER_SIZE, SELF_ELF_PHDR_SIZE,
    SELF_ENTRY_SIZE, SELF_EXTENDED_INFO_SIZE, SELF_HEADER_SIZE, SELF_KEY_TYPE, SELF_MAGIC,
    SELF_META_BLOCK_SIZE, SELF_META_DATA_BLOCK_SIZE, SELF_META_FOOTER_SIZE,
    SELF_MODE_SPECIFIC_USER, SELF_NPDRM_BLOCK_SIZE, SELF_PROPS_BLOCK_SIZE_MASK,
    SELF_PROPS_BLOCK_SIZE_SHIFT, SELF_PROPS_HAS_BLOCKS_MASK, SELF_PROPS_HAS_BLOCKS_SHIFT,
    SELF_PROPS_HAS_DIGESTS_MASK, SELF_PROPS_HAS_DIGESTS_SHIFT, SELF_PROPS_SEGMENT_INDEX_MASK,
    SELF_PROPS_SEGMENT_INDEX_SHIFT, SELF_PROPS_SIGNED_MASK, SELF_PROPS_SIGNED_SHIFT,
    SELF_PTYPE_FAKE, SELF_PTYPE_HOST_KERNEL, SELF_PTYPE_NPDRM_DYNLIB, SELF_PTYPE_NPDRM_EXEC,
    SELF_PTYPE_SECURE_KERNEL, SELF_PTYPE_SECURE_MODULE, SELF_PTYPE_SYSTEM_DYNLIB,
    SELF_PTYPE_SYSTEM_EXEC, SELF_SIGNATURE_SIZE, SELF_VERSION,
};
use crate::align_up;
use crate::input::InputElf;
use crate::{malformed_input, Result};

/// Caller-supplied metadata for the envelope.
pub struct WrapParams<'a> {
    pub paid: i64,
    pub ptype: &'a str,
    pub app_version: i64,
    pub fw_version: i64,
    /// Hex-encoded auth info; `None` leaves the signature slot zeroed.
    pub auth_info: Option<&'a str>,
}

/// One entry descriptor plus the bytes it points at.
struct SelfEntry {
    properties: u64,
    offset: u64,
    file_size: u64,
    memory_size: u64,
    data: Vec<u8>,
}

/// `|=`-style bitfield population used by every property field.
fn set_property(properties: u64, shift: u64, mask: u64, value: u64) -> u64 {
    properties | ((value & mask) << shift)
}

fn ilog2(value: u64) -> u64 {
    value.ilog2() as u64
}

/// Program-type tag for the extended info. Unknown names fall back to fake.
pub fn program_type(name: &str) -> u64 {
    match name {
        "npdrm_exec" => SELF_PTYPE_NPDRM_EXEC,
        "npdrm_dynlib" => SELF_PTYPE_NPDRM_DYNLIB,
        "system_exec" => SELF_PTYPE_SYSTEM_EXEC,
        "system_dynlib" => SELF_PTYPE_SYSTEM_DYNLIB,
        "host_kernel" => SELF_PTYPE_HOST_KERNEL,
        "secure_module" => SELF_PTYPE_SECURE_MODULE,
        "secure_kernel" => SELF_PTYPE_SECURE_KERNEL,
        _ => SELF_PTYPE_FAKE,
    }
}

/// Segments that receive a meta/data entry pair.
fn is_signed(p_type: u32) -> bool {
    p_type == PT_LOAD || p_type == PT_SCE_RELRO || p_type == PT_SCE_DYNLIBDATA
}

/// Wrap the OELF at `oelf_path` into an fSELF at `output`.
pub fn write_fself(oelf_path: &Path, output: &Path, params: &WrapParams) -> Result<()> {
    let oelf = InputElf::read(oelf_path)?;
    let digest: [u8; 32] = Sha256::digest(oelf.bytes()).into();
    let phdrs = oelf.program_headers()?;

    let signature = match params.auth_info {
        Some(auth_info) => build_signature(auth_info, params.paid)?,
        None => vec![0u8; SELF_SIGNATURE_SIZE as usize],
    };

    let mut entries = create_entries(&phdrs);

    let mut header_size = SELF_HEADER_SIZE
        + entries.len() as u64 * SELF_ENTRY_SIZE
        + SELF_ELF_HEADER_SIZE
        + phdrs.len() as u64 * SELF_ELF_PHDR_SIZE;
    header_size = align_up(header_size, 0x10);
    header_size += SELF_EXTENDED_INFO_SIZE + SELF_NPDRM_BLOCK_SIZE;

    // Payloads start past the header chain, the meta-block run, the footer,
    // and the signature slot.
    let mut offset = header_size
        + entries.len() as u64 * SELF_META_BLOCK_SIZE
        + SELF_META_FOOTER_SIZE
        + SELF_SIGNATURE_SIZE;

    let mut entry_index = 0;
    for ph in &phdrs {
        if !is_signed(ph.p_type) {
            continue;
        }

        // Meta entry payload: one digest record per hash block, zeroed.
        let blocks = align_up(ph.p_filesz, SELF_BLOCK_SIZE) / SELF_BLOCK_SIZE;
        let meta_size = blocks * SELF_META_DATA_BLOCK_SIZE;
        let meta = &mut entries[entry_index];
        meta.data = vec![0u8; meta_size as usize];
        meta.offset = offset;
        meta.file_size = meta_size;
        meta.memory_size = meta_size;
        offset = align_up(offset + meta_size, 0x10);

        let start = ph.p_offset as usize;
        let end = start + ph.p_filesz as usize;
        let segment = oelf
            .bytes()
            .get(start..end)
            .ok_or_else(|| malformed_input("segment extends past end of OELF"))?;
        let data = &mut entries[entry_index + 1];
        data.data = segment.to_vec();
        data.offset = offset;
        data.file_size = ph.p_filesz;
        data.memory_size = ph.p_filesz;
        offset = align_up(offset + ph.p_filesz, 0x10);

        entry_index += 2;
    }
    let file_size = offset;

    let signed_block_count = 0x2u64;
    let flags = 0x2 | ((signed_block_count & 0x7) << 4);
    let meta_size =
        entries.len() as u64 * SELF_ENTRY_SIZE + SELF_META_FOOTER_SIZE + SELF_SIGNATURE_SIZE;

    let mut out: Vec<u8> = Vec::with_capacity(file_size as usize);

    // Container header.
    out.extend_from_slice(&SELF_MAGIC.to_le_bytes());
    out.push(SELF_VERSION);
    out.push(SELF_MODE_SPECIFIC_USER);
    out.push(SELF_DATA_LSB);
    out.push(SELF_ATTRIBUTES);
    out.extend_from_slice(&SELF_KEY_TYPE.to_le_bytes());
    out.extend_from_slice(&(header_size as u16).to_le_bytes());
    out.extend_from_slice(&(meta_size as u16).to_le_bytes());
    out.extend_from_slice(&file_size.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(flags as u16).to_le_bytes());
    pad_to(&mut out, 0x10);

    // Entry descriptors.
    for entry in &entries {
        out.extend_from_slice(&entry.properties.to_le_bytes());
        out.extend_from_slice(&entry.offset.to_le_bytes());
        out.extend_from_slice(&entry.file_size.to_le_bytes());
        out.extend_from_slice(&entry.memory_size.to_le_bytes());
    }

    // Mirror of the ELF header and the complete program-header table.
    out.extend_from_slice(&oelf.bytes()[..SELF_ELF_HEADER_SIZE as usize]);
    for ph in &phdrs {
        out.extend_from_slice(&ph.p_type.to_le_bytes());
        out.extend_from_slice(&ph.p_flags.to_le_bytes());
        out.extend_from_slice(&ph.p_offset.to_le_bytes());
        out.extend_from_slice(&ph.p_vaddr.to_le_bytes());
        out.extend_from_slice(&ph.p_paddr.to_le_bytes());
        out.extend_from_slice(&ph.p_filesz.to_le_bytes());
        out.extend_from_slice(&ph.p_memsz.to_le_bytes());
        out.extend_from_slice(&ph.p_align.to_le_bytes());
    }
    pad_to(&mut out, 0x10);

    // Extended info.
    out.extend_from_slice(&(params.paid as u64).to_le_bytes());
    out.extend_from_slice(&program_type(params.ptype).to_le_bytes());
    out.extend_from_slice(&(params.app_version as u64).to_le_bytes());
    out.extend_from_slice(&(params.fw_version as u64).to_le_bytes());
    out.extend_from_slice(&digest);

    // NPDRM control block, zeroed beyond its type tag.
    out.extend_from_slice(&SELF_CONTROL_BLOCK_TYPE_NPDRM.to_le_bytes());
    out.resize(out.len() + (SELF_NPDRM_BLOCK_SIZE as usize - 2), 0);

    debug_assert_eq!(out.len() as u64, header_size);

    // Meta blocks and footer.
    out.resize(out.len() + entries.len() * SELF_META_BLOCK_SIZE as usize, 0);
    out.resize(out.len() + 0x30, 0);
    out.extend_from_slice(&0x10000u32.to_le_bytes());
    out.resize(out.len() + 0x1C, 0);

    out.extend_from_slice(&signature);
    debug_assert_eq!(
        out.len() as u64,
        header_size + entries.len() as u64 * SELF_META_BLOCK_SIZE + SELF_META_FOOTER_SIZE
            + SELF_SIGNATURE_SIZE
    );

    // Payloads.
    for entry in &entries {
        write_at(&mut out, entry.offset, &entry.data);
    }

    std::fs::write(output, &out)?;
    log::debug!(
        "wrote fSELF: {} entries, {:#x} header bytes, {:#x} total",
        entries.len(),
        header_size,
        file_size
    );
    Ok(())
}

/// Two descriptors per signed segment: a meta entry carrying digests, then a
/// data entry carrying blocks. The meta entry's segment-index field points
/// one past the program header it covers; the data entry stores it directly.
fn create_entries(phdrs: &[elf::segment::ProgramHeader]) -> Vec<SelfEntry> {
    let mut entries = Vec::new();
    for (segment_index, ph) in phdrs.iter().enumerate() {
        if !is_signed(ph.p_type) {
            continue;
        }

        let mut meta = 0u64;
        meta = set_property(meta, SELF_PROPS_SIGNED_SHIFT, SELF_PROPS_SIGNED_MASK, 1);
        meta = set_property(
            meta,
            SELF_PROPS_HAS_DIGESTS_SHIFT,
            SELF_PROPS_HAS_DIGESTS_MASK,
            1,
        );
        meta = set_property(
            meta,
            SELF_PROPS_SEGMENT_INDEX_SHIFT,
            SELF_PROPS_SEGMENT_INDEX_MASK,
            segment_index as u64 + 1,
        );
        entries.push(SelfEntry {
            properties: meta,
            offset: 0,
            file_size: 0,
            memory_size: 0,
            data: Vec::new(),
        });

        let mut data = 0u64;
        data = set_property(data, SELF_PROPS_SIGNED_SHIFT, SELF_PROPS_SIGNED_MASK, 1);
        data = set_property(
            data,
            SELF_PROPS_HAS_BLOCKS_SHIFT,
            SELF_PROPS_HAS_BLOCKS_MASK,
            1,
        );
        data = set_property(
            data,
            SELF_PROPS_BLOCK_SIZE_SHIFT,
            SELF_PROPS_BLOCK_SIZE_MASK,
            ilog2(SELF_BLOCK_SIZE) - 12,
        );
        data = set_property(
            data,
            SELF_PROPS_SEGMENT_INDEX_SHIFT,
            SELF_PROPS_SEGMENT_INDEX_MASK,
            segment_index as u64,
        );
        entries.push(SelfEntry {
            properties: data,
            offset: 0,
            file_size: 0,
            memory_size: 0,
            data: Vec::new(),
        });
    }
    entries
}

/// Signature slot: auth-info length, paid, then the auth info past its first
/// 8 bytes, zero-padded to the slot size.
fn build_signature(auth_info: &str, paid: i64) -> Result<Vec<u8>> {
    let cleaned: String = auth_info.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&cleaned)
        .map_err(|_| malformed_input("auth info is not valid hex"))?;
    if bytes.len() < 8 {
        return Err(malformed_input("auth info shorter than 8 bytes"));
    }
    if bytes.len() + 8 > SELF_SIGNATURE_SIZE as usize {
        return Err(malformed_input("auth info does not fit the signature slot"));
    }

    let mut signature = Vec::with_capacity(SELF_SIGNATURE_SIZE as usize);
    signature.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    signature.extend_from_slice(&(paid as u64).to_le_bytes());
    signature.extend_from_slice(&bytes[8..]);
    signature.resize(SELF_SIGNATURE_SIZE as usize, 0);
    Ok(signature)
}

fn pad_to(out: &mut Vec<u8>, align: u64) {
    let target = align_up(out.len() as u64, align);
    out.resize(target as usize, 0);
}

fn write_at(buffer: &mut Vec<u8>, offset: u64, data: &[u8]) {
    let offset = offset as usize;
    let end = offset + data.len();
    if buffer.len() < end {
        buffer.resize(end, 0);
    }
    buffer[offset..end].copy_from_slice(data);
}
