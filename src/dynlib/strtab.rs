//! String table of the DynlibData segment.
//!
//! Layout is prescribed: a single NUL, the PRX filename of every module, the
//! module names themselves, leftover library names, the project name, the
//! input file name, the NID entries, and for libraries the `module_stop` /
//! `module_start` literals. Offsets of everything the dynamic table points at
//! are captured into the layout record as the bytes go down.

use crate::input::Symbol;
use crate::library::{strip_stub, DependencySet};
use crate::{abi, nid, symbol_unresolved, Result};

use super::DynlibLayout;

pub(super) fn write(
    data: &mut Vec<u8>,
    layout: &mut DynlibLayout,
    symbols: &[Symbol],
    deps: &DependencySet,
    is_library: bool,
    project_name: &str,
    file_name: &str,
) -> Result<u64> {
    // Leading NUL so offset 0 reads as the empty string. It is not part of
    // the running size; recorded offsets add 1 to account for it.
    data.push(0);
    let mut written: u64 = 0;

    written += write_module_table(data, layout, deps);

    layout.offset_of_project_name = written + 1;
    written += write_project_meta(data, layout, project_name, file_name);

    layout.offset_of_nid_table = written + 1;
    written += write_nid_table(data, symbols, deps, is_library)?;

    if is_library {
        written += push_str(data, "module_stop");
        written += push_str(data, "module_start");
    }

    layout.size_of_str_table = written + 1;
    Ok(layout.size_of_str_table)
}

/// NUL-terminated string append; returns the bytes written.
fn push_str(data: &mut Vec<u8>, s: &str) -> u64 {
    data.extend_from_slice(s.as_bytes());
    data.push(0);
    s.len() as u64 + 1
}

/// PRX filenames, module names, then libraries that are not modules.
fn write_module_table(data: &mut Vec<u8>, layout: &mut DynlibLayout, deps: &DependencySet) -> u64 {
    let mut written: u64 = 0;

    for module in &deps.modules {
        let prx = abi::prx_for_module(strip_stub(module));
        layout.library_name_offsets.push(written + 1);
        written += push_str(data, &prx);
    }

    for module in &deps.modules {
        let offset = written + 1;
        layout.imported_module_offsets.push(offset);
        // With no distinct hosting library, the module name doubles as the
        // imported-library name.
        layout.imported_library_offsets.push(offset);
        written += push_str(data, strip_stub(module));
    }

    for dep in &deps.libraries {
        let name = strip_stub(&dep.name);
        if deps.modules.iter().any(|m| m == name) {
            continue;
        }
        layout.imported_library_offsets.push(written + 1);
        written += push_str(data, name);
    }

    // The file name lands right after the project name; start the running
    // offset here and let the meta writer add the project-name length.
    layout.offset_of_file_name = written + 1;
    written
}

fn write_project_meta(
    data: &mut Vec<u8>,
    layout: &mut DynlibLayout,
    project_name: &str,
    file_name: &str,
) -> u64 {
    let mut written = push_str(data, project_name);
    layout.offset_of_file_name += written;
    written += push_str(data, file_name);
    written
}

/// One NID entry per (undefined symbol, attributing library) pair, in input
/// symbol order; then the `Need_sceLibc` marker when libc is linked; then,
/// for libraries, one entry per exported global/weak symbol with a value.
fn write_nid_table(
    data: &mut Vec<u8>,
    symbols: &[Symbol],
    deps: &DependencySet,
    is_library: bool,
) -> Result<u64> {
    let mut written: u64 = 0;

    for symbol in symbols {
        if !symbol.is_undefined() || symbol.name.is_empty() {
            continue;
        }
        let attributions = deps.attributions(&symbol.name);
        if attributions.is_empty() {
            return Err(symbol_unresolved(format!(
                "no resolved library defines {}",
                symbol.name
            )));
        }
        for (library_index, module_index) in attributions {
            written += push_str(
                data,
                &nid::encode(&symbol.name, 1 + library_index, 1 + module_index),
            );
        }
    }

    if let Some(libc_index) = deps.libc_module_index() {
        written += push_str(
            data,
            &nid::encode("Need_sceLibc", 1 + libc_index, 1 + libc_index),
        );
    }

    if is_library {
        for symbol in symbols {
            if symbol_is_exported(symbol) {
                written += push_str(data, &nid::encode(&symbol.name, 0, 0));
            }
        }
    }

    Ok(written)
}

pub(super) fn symbol_is_exported(symbol: &Symbol) -> bool {
    (symbol.bind() == elf::abi::STB_GLOBAL || symbol.bind() == elf::abi::STB_WEAK)
        && symbol.value != 0
}
