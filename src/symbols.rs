//! ELF symbol enumeration and name demangling.
//!
//! Everything here works on files read from disk; runtime addresses are the
//! caller's business (see [`crate::process::Process::functions`] for the
//! base-address arithmetic).

use std::fs;
use std::path::Path;

use object::{Object, ObjectSegment, ObjectSymbol, SymbolKind};
use serde::Serialize;
use tracing::trace;

use crate::addr::Addr;
use crate::errors::{PatchError, Result};

/// A function symbol resolved to its runtime address in the target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Function {
    /// Mangled name, exactly as it appears in the symbol table
    pub name: String,
    pub address: Addr,
}

/// Every named `FUNC` symbol of `path`, from both `.symtab` and `.dynsym`,
/// with addresses rebased onto `base`
///
/// The file's own load bias is the vaddr of its first `PT_LOAD` segment:
/// runtime address = base + (symbol value - first load vaddr).
pub fn functions_in(path: &Path, base: Addr) -> Result<Vec<Function>> {
    let data = fs::read(path)?;
    let file = object::File::parse(data.as_slice())?;

    let load_vaddr = file.segments().next().map_or(0, |seg| seg.address());
    trace!("first PT_LOAD vaddr of {}: {load_vaddr:#x}", path.display());

    let mut functions = Vec::new();
    for sym in file.symbols().chain(file.dynamic_symbols()) {
        if sym.kind() != SymbolKind::Text || sym.is_undefined() {
            continue;
        }
        let name = sym.name()?;
        if name.is_empty() || sym.address() < load_vaddr {
            continue;
        }
        functions.push(Function {
            name: name.to_string(),
            address: base + (sym.address() - load_vaddr) as usize,
        });
    }
    Ok(functions)
}

/// Value of the dynamic symbol `wanted` in the shared object at `path`
///
/// This is the symbol's `st_value`, an offset from the object's load
/// address, not a runtime address.
pub fn dynamic_symbol_value(path: &Path, wanted: &str) -> Result<u64> {
    let data = fs::read(path)?;
    let file = object::File::parse(data.as_slice())?;

    file.dynamic_symbols()
        .find(|sym| sym.name().is_ok_and(|name| name == wanted) && !sym.is_undefined())
        .map(|sym| sym.address())
        .ok_or_else(|| PatchError::MissingSymbol(wanted.to_string()))
}

/// Demangles an Itanium-mangled C++ name, if it is one.
///
/// Purely advisory: symbol *resolution* always works on the raw mangled
/// string.
///
/// ```
/// use procpatch::symbols::demangle;
///
/// assert_eq!(demangle("_Z11is_passwordv").as_deref(), Some("is_password()"));
/// assert_eq!(demangle("main"), None);
/// ```
pub fn demangle(mangled: &str) -> Option<String> {
    let symbol = cpp_demangle::Symbol::new(mangled).ok()?;
    Some(symbol.to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_demangle_cpp_symbol() {
        assert_eq!(demangle("_Z3foov").as_deref(), Some("foo()"));
        assert_eq!(
            demangle("_ZN3app6launchEi").as_deref(),
            Some("app::launch(int)")
        );
    }

    #[test]
    fn test_demangle_rejects_plain_names() {
        assert_eq!(demangle("hook_main"), None);
        assert_eq!(demangle(""), None);
    }

    #[test]
    fn test_functions_of_own_exe() {
        // the test binary keeps its symtab; there must be named functions
        let exe = std::env::current_exe().unwrap();
        let functions = functions_in(&exe, Addr::NULL).unwrap();
        assert!(!functions.is_empty());
        assert!(functions.iter().all(|f| !f.name.is_empty()));
    }
}
