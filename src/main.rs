use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use create_fself::{create_fself, BuildParams};

#[derive(Parser)]
#[command(
    name = "create-fself",
    about = "Convert an x86-64 ELF into a fake Signed ELF (eboot or PRX)"
)]
struct Cli {
    /// Input ELF path
    #[arg(long = "in", value_name = "PATH")]
    input: PathBuf,

    /// eboot.bin output path (builds an executable)
    #[arg(long, value_name = "PATH")]
    eboot: Option<PathBuf>,

    /// Library output path (builds a PRX)
    #[arg(long, value_name = "PATH")]
    lib: Option<PathBuf>,

    /// Intermediate OELF path; kept after the build when given
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,

    /// SDK version integer stamped into the param section
    #[arg(long = "sdkver", default_value = "0x4508101", value_parser = parse_u32)]
    sdk_version: u32,

    /// Program type {fake, npdrm_exec, npdrm_dynlib, system_exec,
    /// system_dynlib, host_kernel, secure_module, secure_kernel}
    #[arg(long, default_value = "fake")]
    ptype: String,

    /// Hex-encoded authentication info
    #[arg(long = "authinfo")]
    auth_info: Option<String>,

    /// Program authentication ID
    #[arg(long, default_value = "0x3800000000000011", value_parser = parse_i64)]
    paid: i64,

    /// Application version
    #[arg(long = "appversion", default_value = "0", value_parser = parse_i64)]
    app_version: i64,

    /// Firmware version
    #[arg(long = "fwversion", default_value = "0", value_parser = parse_i64)]
    fw_version: i64,

    /// Library name (ignored when building an eboot)
    #[arg(long = "libname")]
    lib_name: Option<String>,

    /// Additional directories to search for .so files
    #[arg(long = "library-path", default_value = "")]
    library_path: String,
}

/// Base-0 integer parsing: plain decimal or 0x-prefixed hex.
fn parse_i64(s: &str) -> Result<i64, String> {
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let parsed = match body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16),
        None => body.parse(),
    };
    match parsed {
        Ok(value) if negative => Ok(-value),
        Ok(value) => Ok(value),
        Err(_) => Err(format!("invalid integer: {s}")),
    }
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("invalid integer: {s}"))
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let Ok(sdk_root) = std::env::var("OO_PS4_TOOLCHAIN") else {
        bail!(
            "the OO_PS4_TOOLCHAIN environment variable is not set; \
             it must point at the root directory of the toolchain"
        );
    };

    let (output, is_library) = match (&cli.eboot, &cli.lib) {
        (Some(_), Some(_)) => bail!("--eboot and --lib are mutually exclusive"),
        (Some(eboot), None) => (eboot.clone(), false),
        (None, Some(lib)) => (lib.clone(), true),
        (None, None) => bail!("one of --eboot or --lib is required"),
    };

    let params = BuildParams {
        input: cli.input,
        output,
        oelf: cli.out,
        is_library,
        sdk_root: PathBuf::from(sdk_root),
        library_path: cli.library_path,
        lib_name: cli.lib_name,
        sdk_version: cli.sdk_version,
        paid: cli.paid,
        ptype: cli.ptype,
        app_version: cli.app_version,
        fw_version: cli.fw_version,
        auth_info: cli.auth_info,
    };

    create_fself(&params)?;
    Ok(())
}
