//! Platform-specific ABI constants.
//!
//! Standard ELF constants come from [`elf::abi`]; everything here is the
//! console runtime's extension surface: SCE program-header types, SCE dynamic
//! tags, SCE file types, and the signed-container layout constants.

/// ELF file type for an ASLR-capable executable.
pub const ET_SCE_EXEC_ASLR: u16 = 0xFE10;
/// ELF file type for a dynamic library (PRX).
pub const ET_SCE_DYNAMIC: u16 = 0xFE18;

/// OS/ABI identification byte expected by the runtime.
pub const ELFOSABI_FREEBSD_SCE: u8 = 0x09;

pub const PT_SCE_DYNLIBDATA: u32 = 0x6100_0000;
pub const PT_SCE_PROC_PARAM: u32 = 0x6100_0001;
pub const PT_SCE_MODULE_PARAM: u32 = 0x6100_0002;
pub const PT_SCE_RELRO: u32 = 0x6100_0010;

pub const DT_SCE_FINGERPRINT: u64 = 0x6100_0007;
pub const DT_SCE_FILENAME: u64 = 0x6100_0009;
pub const DT_SCE_EXPORT_MODULE: u64 = 0x6100_000D;
pub const DT_SCE_IMPORT_MODULE: u64 = 0x6100_000F;
pub const DT_SCE_MODULE_ATTR: u64 = 0x6100_0011;
pub const DT_SCE_EXPORT_LIB: u64 = 0x6100_0013;
pub const DT_SCE_IMPORT_LIB: u64 = 0x6100_0015;
pub const DT_SCE_EXPORT_LIB_ATTR: u64 = 0x6100_0017;
pub const DT_SCE_IMPORT_LIB_ATTR: u64 = 0x6100_0019;
pub const DT_SCE_HASH: u64 = 0x6100_0025;
pub const DT_SCE_PLTGOT: u64 = 0x6100_0027;
pub const DT_SCE_JMPREL: u64 = 0x6100_0029;
pub const DT_SCE_PLTREL: u64 = 0x6100_002B;
pub const DT_SCE_PLTRELSZ: u64 = 0x6100_002D;
pub const DT_SCE_RELA: u64 = 0x6100_002F;
pub const DT_SCE_RELASZ: u64 = 0x6100_0031;
pub const DT_SCE_RELAENT: u64 = 0x6100_0033;
pub const DT_SCE_STRTAB: u64 = 0x6100_0035;
pub const DT_SCE_STRSZ: u64 = 0x6100_0037;
pub const DT_SCE_SYMTAB: u64 = 0x6100_0039;
pub const DT_SCE_SYMENT: u64 = 0x6100_003B;
pub const DT_SCE_HASHSZ: u64 = 0x6100_003D;
pub const DT_SCE_SYMTABSZ: u64 = 0x6100_003F;

/// Absolute 64-bit relocation on x86-64.
pub const R_AMD64_64: u64 = 1;

/// Interpreter the runtime expects at the start of `.text`.
pub const INTERPRETER: &str = "/system/common/lib/libkernel.so";

/// Fingerprint stamped at the start of the dynlib data segment.
pub const FINGERPRINT: &str = "OPENORBIS-HOMEBREW";
/// On-disk size of the fingerprint field.
pub const FINGERPRINT_SIZE: u64 = 0x18;

/// Suffix mixed into symbol names before the NID digest, as hex.
pub const NID_SUFFIX_KEY: &str = "518D64A635DED8C1E6B039B1C3E55230";

/// Alphabet encoding library/module indices appended to NIDs.
pub const INDEX_ENCODING_TABLE: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+-";

// Signed-container ("SELF") envelope constants. Field sizes are fixed by the
// console loader; the sum of the header chain must land exactly on the
// computed payload offset, so these move together.

pub const SELF_MAGIC: u32 = 0x1D3D_154F;
pub const SELF_VERSION: u8 = 0x00;
pub const SELF_MODE_SPECIFIC_USER: u8 = 0x01;
pub const SELF_DATA_LSB: u8 = 0x01;
pub const SELF_ATTRIBUTES: u8 = 0x12;
pub const SELF_KEY_TYPE: u32 = 0x101;
pub const SELF_CONTROL_BLOCK_TYPE_NPDRM: u16 = 0x3;

pub const SELF_HEADER_SIZE: u64 = 0x20;
pub const SELF_ENTRY_SIZE: u64 = 0x20;
pub const SELF_ELF_HEADER_SIZE: u64 = 0x40;
pub const SELF_ELF_PHDR_SIZE: u64 = 0x38;
pub const SELF_EXTENDED_INFO_SIZE: u64 = 0x40;
pub const SELF_NPDRM_BLOCK_SIZE: u64 = 0x30;
pub const SELF_META_BLOCK_SIZE: u64 = 0x20;
pub const SELF_META_FOOTER_SIZE: u64 = 0x50;
pub const SELF_SIGNATURE_SIZE: u64 = 0x100;
/// Size of one digest record in a meta entry's payload.
pub const SELF_META_DATA_BLOCK_SIZE: u64 = 0x50;
/// Hash-block granularity of signed segments.
pub const SELF_BLOCK_SIZE: u64 = 0x1000;

pub const SELF_PTYPE_FAKE: u64 = 0x1;
pub const SELF_PTYPE_NPDRM_EXEC: u64 = 0x4;
pub const SELF_PTYPE_NPDRM_DYNLIB: u64 = 0x5;
pub const SELF_PTYPE_SYSTEM_EXEC: u64 = 0x8;
pub const SELF_PTYPE_SYSTEM_DYNLIB: u64 = 0x9;
pub const SELF_PTYPE_HOST_KERNEL: u64 = 0xC;
pub const SELF_PTYPE_SECURE_MODULE: u64 = 0xE;
pub const SELF_PTYPE_SECURE_KERNEL: u64 = 0xF;

// Entry property bitfield placements.
pub const SELF_PROPS_SIGNED_SHIFT: u64 = 2;
pub const SELF_PROPS_SIGNED_MASK: u64 = 0x1;
pub const SELF_PROPS_HAS_BLOCKS_SHIFT: u64 = 11;
pub const SELF_PROPS_HAS_BLOCKS_MASK: u64 = 0x1;
pub const SELF_PROPS_BLOCK_SIZE_SHIFT: u64 = 12;
pub const SELF_PROPS_BLOCK_SIZE_MASK: u64 = 0xF;
pub const SELF_PROPS_HAS_DIGESTS_SHIFT: u64 = 16;
pub const SELF_PROPS_HAS_DIGESTS_MASK: u64 = 0x1;
pub const SELF_PROPS_SEGMENT_INDEX_SHIFT: u64 = 20;
pub const SELF_PROPS_SEGMENT_INDEX_MASK: u64 = 0xFFFF;

/// Module names whose PRX filename is not simply `<module>.prx`.
pub const MODULE_TO_PRX: &[(&str, &str)] = &[
    ("libc", "libc.prx"),
    ("libkernel", "libkernel.prx"),
    ("libkernel_sys", "libkernel_sys.prx"),
    ("libSceAjm", "libSceAjm.prx"),
    ("libSceAppContent", "libSceAppContent.prx"),
    ("libSceAudio3d", "libSceAudio3d.prx"),
    ("libSceAudioIn", "libSceAudioIn.prx"),
    ("libSceAudioOut", "libSceAudioOut.prx"),
    ("libSceAvSetting", "libSceAvSetting.prx"),
    ("libSceCamera", "libSceCamera.prx"),
    ("libSceCommonDialog", "libSceCommonDialog.prx"),
    ("libSceConvertKeycode", "libSceConvertKeycode.prx"),
    ("libSceFios2", "libSceFios2.prx"),
    ("libSceFont", "libSceFont-module.prx"),
    ("libSceFontFt", "libSceFontFt-module.prx"),
    ("libSceFreeType", "libSceFreeType.prx"),
    ("libSceGameCustomDataDialog", "libSceGameCustomDataDialog.prx"),
    ("libSceGnmDriver", "libSceGnmDriver.prx"),
    ("libSceHttp", "libSceHttp.prx"),
    ("libSceInvitationDialog", "libSceInvitationDialog.prx"),
    ("libSceJpegDec", "libSceJpegDec.prx"),
    ("libSceJpegEnc", "libSceJpegEnc.prx"),
    ("libSceKeyboard", "libSceKeyboard.prx"),
    ("libSceMouse", "libSceMouse.prx"),
    ("libSceNetCtl", "libSceNetCtl.prx"),
    ("libSceNpCommon", "libSceNpCommon.prx"),
    ("libSceNpParty", "libSceNpParty.prx"),
    ("libSceNpTrophy", "libSceNpTrophy.prx"),
    ("libSceNpUtility", "libSceNpUtility.prx"),
    ("libScePad", "libScePad.prx"),
    ("libScePadTracker", "libScePadTracker.prx"),
    ("libScePlayReady", "libScePlayReady.prx"),
    ("libScePngDec", "libScePngDec.prx"),
    ("libScePngEnc", "libScePngEnc.prx"),
    ("libSceSaveData", "libSceSaveData.prx"),
    ("libSceSaveDataDialog", "libSceSaveDataDialog.prx"),
    ("libSceScreenShot", "libSceScreenShot.prx"),
    ("libSceShareUtility", "libSceShareUtility.prx"),
    ("libSceSsl", "libSceSsl.prx"),
    ("libSceSysUtil", "libSceSysUtil.prx"),
    ("libSceSysmodule", "libSceSysmodule.prx"),
    ("libSceSystemService", "libSceSystemService.prx"),
    ("libSceUserService", "libSceUserService.prx"),
    ("libSceVideoCoreInterface", "libSceVideoCoreInterface.prx"),
    ("libSceVideoOut", "libSceVideoOut.prx"),
    ("libSceVideodec", "libSceVideodec.prx"),
    ("libSceVoice", "libSceVoice.prx"),
    ("libSceWebBrowserDialog", "libSceWebBrowserDialog.prx"),
    ("libSceZlib", "libSceZlib.prx"),
];

/// Libraries hosted inside another module's PRX.
pub const LIBRARY_TO_MODULE: &[(&str, &str)] = &[("libScePosix", "libkernel")];

/// PRX filename a module is loaded from.
pub fn prx_for_module(module: &str) -> String {
    MODULE_TO_PRX
        .iter()
        .find(|(name, _)| *name == module)
        .map(|(_, prx)| (*prx).to_string())
        .unwrap_or_else(|| format!("{module}.prx"))
}

/// Module hosting the given library, when it differs from the library itself.
pub fn module_for_library(library: &str) -> Option<&'static str> {
    LIBRARY_TO_MODULE
        .iter()
        .find(|(name, _)| *name == library)
        .map(|(_, module)| *module)
}
