//! Shared-library resolution and symbol harvesting.
//!
//! `DT_NEEDED` entries are probed on a search path (`<sdk_root>/lib` first,
//! then the user-supplied list), each hit is read once for its dynamic
//! symbols, and every undefined dynamic symbol of the input is attributed to
//! the libraries that define it. Libraries and modules have dual identity:
//! most libraries are their own module, a few are hosted inside another
//! module's PRX. Index assignment happens at encoding time only, 1-based,
//! with `libkernel` pinned to the front.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::input::InputElf;
use crate::{abi, library_not_found, Result};

const LIBKERNEL_SO: &str = "libkernel.so";

/// One resolved dependency in final emission order.
pub struct Dependency {
    /// Canonical library name (`.so` suffix stripped).
    pub name: String,
    /// Name of the module hosting this library.
    pub module: String,
    /// Undefined input symbols this library defines, in input order.
    pub symbols: Vec<String>,
}

/// The resolved dependency set of one input ELF.
///
/// `modules` order assigns module ids; `libraries` holds the rebuilt ordered
/// map (module-derived entries first, leftover libraries after), which
/// assigns library ids. Both are 1-based when encoded.
pub struct DependencySet {
    pub modules: Vec<String>,
    pub libraries: Vec<Dependency>,
}

impl DependencySet {
    /// Position of a module in the module list.
    pub fn module_index(&self, module: &str) -> Option<usize> {
        self.modules.iter().position(|m| m == module)
    }

    /// Position of `libc` in the module list, when the input links it.
    pub fn libc_module_index(&self) -> Option<usize> {
        self.module_index("libc")
    }

    /// Libraries that define `symbol`, as `(library_index, module_index)`
    /// pairs in library order. Both indices are 0-based here.
    pub fn attributions(&self, symbol: &str) -> Vec<(usize, usize)> {
        let mut hits = Vec::new();
        for (lib_index, dep) in self.libraries.iter().enumerate() {
            if dep.symbols.iter().any(|s| s == symbol) {
                let module_index = self
                    .module_index(&dep.module)
                    .expect("library refers to a known module");
                hits.push((lib_index, module_index));
            }
        }
        hits
    }
}

/// Search directories in probe order.
fn search_dirs(sdk_root: &Path, library_path: &str) -> Vec<PathBuf> {
    let delimiter = if cfg!(target_os = "windows") { ';' } else { ':' };
    let mut dirs = vec![sdk_root.join("lib")];
    for dir in library_path.split(delimiter) {
        if !dir.is_empty() {
            dirs.push(PathBuf::from(dir));
        }
    }
    dirs
}

/// Probe the search path for `name`; first hit that parses as an ELF wins.
fn open_library(name: &str, dirs: &[PathBuf]) -> Result<InputElf> {
    for dir in dirs {
        let candidate = dir.join(name);
        let Ok(lib) = InputElf::read(&candidate) else {
            continue;
        };
        if lib.parse().is_ok() {
            log::debug!("resolved {name} at {}", candidate.display());
            return Ok(lib);
        }
    }
    Err(library_not_found(name.to_string()))
}

fn canonical(library_file: &str) -> String {
    library_file.replacen(".so", "", 1)
}

/// Resolve every needed library of `input` and attribute its undefined
/// dynamic symbols.
pub fn resolve(input: &InputElf, sdk_root: &Path, library_path: &str) -> Result<DependencySet> {
    let dirs = search_dirs(sdk_root, library_path);

    let mut needed: Vec<String> = input
        .needed_libraries()?
        .iter()
        .map(|name| {
            Path::new(name)
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.clone())
        })
        .collect();

    // libkernel always resolves first, whether or not the input names it.
    if let Some(pos) = needed.iter().position(|n| n == LIBKERNEL_SO) {
        needed.swap(0, pos);
    }

    // (canonical name, defined symbol names) per opened library, probe order.
    let mut opened: Vec<(String, HashSet<String>)> = Vec::with_capacity(needed.len() + 1);
    let libkernel = open_library(LIBKERNEL_SO, &dirs)?;
    opened.push(("libkernel".to_string(), defined_names(&libkernel)?));

    let mut modules = vec!["libkernel".to_string()];
    let mut module_of: Vec<(String, String)> = vec![("libkernel".into(), "libkernel".into())];

    for library_file in &needed {
        if library_file == LIBKERNEL_SO {
            continue;
        }
        let library = open_library(library_file, &dirs)?;
        let name = canonical(library_file);
        opened.push((name.clone(), defined_names(&library)?));

        let module = abi::module_for_library(&name)
            .map(str::to_string)
            .unwrap_or_else(|| name.clone());
        if !modules.contains(&module) {
            modules.push(module.clone());
        }
        module_of.push((name, module));
    }

    // Rebuild the ordered map so module-derived entries precede leftover
    // libraries: entry i (i < modules.len()) lines up with module id i+1.
    let mut libraries: Vec<Dependency> = modules
        .iter()
        .map(|module| Dependency {
            name: module.clone(),
            module: module.clone(),
            symbols: Vec::new(),
        })
        .collect();
    for (name, module) in &module_of {
        if !modules.contains(name) {
            libraries.push(Dependency {
                name: name.clone(),
                module: module.clone(),
                symbols: Vec::new(),
            });
        }
    }

    // Attribute each undefined dynamic symbol to every defining library.
    for symbol in input.dynamic_symbols()? {
        if !symbol.is_undefined() || symbol.name.is_empty() || symbol.name == "_DYNAMIC" {
            continue;
        }
        for (name, defined) in &opened {
            if defined.contains(&symbol.name) {
                if let Some(dep) = libraries.iter_mut().find(|dep| &dep.name == name) {
                    dep.symbols.push(symbol.name.clone());
                }
            }
        }
    }

    log::debug!(
        "resolved {} libraries across {} modules",
        libraries.len(),
        modules.len()
    );
    Ok(DependencySet { modules, libraries })
}

fn defined_names(library: &InputElf) -> Result<HashSet<String>> {
    Ok(library
        .dynamic_symbols()?
        .into_iter()
        .filter(|sym| !sym.name.is_empty())
        .map(|sym| sym.name)
        .collect())
}

/// Strip the `_stub` marker stub archives leave on module names.
pub fn strip_stub(name: &str) -> &str {
    name.strip_suffix("_stub").unwrap_or(name)
}
