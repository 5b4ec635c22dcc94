//! Converts a standard x86-64 ELF into a fake Signed ELF (fSELF).
//!
//! The conversion runs in two stages. [`oelf`] rewrites the input into an
//! Orbis ELF: it appends a synthesized dynamic-linking segment, rewrites the
//! program-header table, and patches the file header for the console runtime.
//! [`fself`] then wraps the finished OELF in the signed-container envelope
//! with metadata entries, extended info, and a (synthetic) signature slot.
//!
//! [`create_fself`] sequences both stages the way the command-line tool does.

use std::borrow::Cow;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

pub mod abi;
pub mod dynlib;
pub mod fself;
pub mod input;
pub mod library;
pub mod nid;
pub mod oelf;
pub mod segment;

/// Failure conditions surfaced by either conversion stage.
#[derive(Debug)]
pub enum Error {
    /// The input ELF is not something this tool converts: wrong endianness,
    /// machine, or class, or a required section/segment/symbol is missing.
    UnsupportedInput { msg: Cow<'static, str> },

    /// A `DT_NEEDED` library could not be found on the search path.
    LibraryNotFound { msg: Cow<'static, str> },

    /// An undefined dynamic symbol is not defined by any resolved library.
    SymbolUnresolved { msg: Cow<'static, str> },

    /// An underlying read/write/open failure.
    Io { err: std::io::Error },

    /// A dynamic tag, relocation table, or header could not be parsed.
    MalformedInput { msg: Cow<'static, str> },
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnsupportedInput { msg } => write!(f, "unsupported input: {msg}"),
            Error::LibraryNotFound { msg } => write!(f, "library not found: {msg}"),
            Error::SymbolUnresolved { msg } => write!(f, "unresolved symbol: {msg}"),
            Error::Io { err } => write!(f, "i/o error: {err}"),
            Error::MalformedInput { msg } => write!(f, "malformed input: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { err } => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        Error::Io { err }
    }
}

impl From<elf::ParseError> for Error {
    #[cold]
    fn from(err: elf::ParseError) -> Self {
        Error::MalformedInput {
            msg: err.to_string().into(),
        }
    }
}

#[cold]
#[inline(never)]
pub(crate) fn unsupported_input(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::UnsupportedInput { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn library_not_found(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::LibraryNotFound { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn symbol_unresolved(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::SymbolUnresolved { msg: msg.into() }
}

#[cold]
#[inline(never)]
pub(crate) fn malformed_input(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::MalformedInput { msg: msg.into() }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Round `val` up to the next multiple of `align` (a power of two).
pub(crate) fn align_up(val: u64, align: u64) -> u64 {
    (val + (align - 1)) & !(align - 1)
}

/// Parameters for one end-to-end conversion.
pub struct BuildParams {
    /// Input ELF path.
    pub input: PathBuf,
    /// Final fSELF path (the eboot or library output).
    pub output: PathBuf,
    /// Explicit intermediate OELF path. `None` derives `<input stem>.oelf`
    /// next to the input and deletes it afterwards.
    pub oelf: Option<PathBuf>,
    /// Building a shared library (PRX) rather than an executable.
    pub is_library: bool,
    /// Toolchain root; `<sdk_root>/lib` heads the library search path.
    pub sdk_root: PathBuf,
    /// Extra library directories, `;`/`:`-delimited by host convention.
    pub library_path: String,
    /// Overrides the project name when building a library.
    pub lib_name: Option<String>,
    /// SDK version stamped into the process/module param section.
    pub sdk_version: u32,
    /// Program authentication id.
    pub paid: i64,
    /// Program type selector, see [`fself::program_type`].
    pub ptype: String,
    pub app_version: i64,
    pub fw_version: i64,
    /// Hex-encoded auth info for the signature slot.
    pub auth_info: Option<String>,
}

/// Run the full conversion: build the intermediate OELF, wrap it into the
/// fSELF, and clean up the intermediate unless the caller named it.
pub fn create_fself(params: &BuildParams) -> Result<()> {
    let (oelf_path, oelf_is_temp) = match &params.oelf {
        Some(path) => (path.clone(), false),
        None => (derive_oelf_path(&params.input), true),
    };

    let result = build_and_wrap(params, &oelf_path);

    if oelf_is_temp {
        // Best effort; the conversion result takes precedence.
        let _ = fs::remove_file(&oelf_path);
    }

    result
}

fn build_and_wrap(params: &BuildParams, oelf_path: &Path) -> Result<()> {
    let mut builder = oelf::OrbisElfBuilder::open(
        &params.input,
        params.is_library,
        params.lib_name.as_deref(),
    )?;
    builder.generate(&params.sdk_root, &params.library_path, params.sdk_version)?;
    builder.write_to(oelf_path)?;
    log::debug!("wrote intermediate OELF to {}", oelf_path.display());

    let wrap = fself::WrapParams {
        paid: params.paid,
        ptype: &params.ptype,
        app_version: params.app_version,
        fw_version: params.fw_version,
        auth_info: params.auth_info.as_deref(),
    };
    let result = fself::write_fself(oelf_path, &params.output, &wrap);
    if result.is_err() {
        let _ = fs::remove_file(&params.output);
    }
    result
}

/// `<input stem>.oelf` next to the input file.
fn derive_oelf_path(input: &Path) -> PathBuf {
    input.with_extension("oelf")
}
