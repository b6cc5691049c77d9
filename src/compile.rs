//! Drives an out-of-process C++ compiler and extracts the injectable
//! payload from its output.
//!
//! The contract with user-supplied source is a single symbol: it must
//! define an externally visible function literally named `hook_main`
//! (`extern "C"` keeps the name unmangled). The whole `.text` section is
//! what gets injected; `hook_main`'s offset inside it is returned alongside
//! so the trampoline can point at the right entry.

use std::fs;
use std::path::Path;
use std::process::Command;

use object::{Object, ObjectSection, ObjectSymbol};
use tracing::debug;

use crate::consts::{DEFAULT_COMPILE_OUTPUT, HOOK_ENTRY_SYMBOL};
use crate::errors::{PatchError, Result};

/// Position-independent machine code ready to be written into the target
#[derive(Debug, Clone)]
pub struct CompiledHook {
    /// The compiled object's entire `.text` section
    pub text: Vec<u8>,
    /// Byte offset of `hook_main` within [`CompiledHook::text`]
    pub entry_offset: usize,
}

/// Compiles `source` into a shared object and pulls out its `.text`
/// payload plus the `hook_main` offset
///
/// The output lands at `output`, or `/tmp/hook` when none is given.
pub fn compile(source: &Path, output: Option<&Path>) -> Result<CompiledHook> {
    let output = output.unwrap_or(Path::new(DEFAULT_COMPILE_OUTPUT));

    let status = Command::new("g++")
        .arg(source)
        .arg("-o")
        .arg(output)
        .args(["-shared", "-fPIC", "-O1"])
        .status()?;
    if !status.success() {
        return Err(PatchError::CompileError(
            status,
            source.display().to_string(),
        ));
    }
    debug!("compiled {} to {}", source.display(), output.display());

    let data = fs::read(output)?;
    let file = object::File::parse(data.as_slice())?;

    let text = file
        .section_by_name(".text")
        .ok_or_else(|| PatchError::MissingSymbol(".text".to_string()))?;

    let entry = file
        .symbols()
        .chain(file.dynamic_symbols())
        .find(|sym| sym.name().is_ok_and(|name| name == HOOK_ENTRY_SYMBOL))
        .ok_or_else(|| PatchError::MissingSymbol(HOOK_ENTRY_SYMBOL.to_string()))?;

    let entry_offset = entry
        .address()
        .checked_sub(text.address())
        .ok_or_else(|| PatchError::MissingSymbol(HOOK_ENTRY_SYMBOL.to_string()))?
        as usize;

    Ok(CompiledHook {
        text: text.data()?.to_vec(),
        entry_offset,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn have_gxx() -> bool {
        Command::new("g++")
            .arg("--version")
            .output()
            .is_ok_and(|out| out.status.success())
    }

    fn scratch_paths(tag: &str) -> (std::path::PathBuf, std::path::PathBuf) {
        let dir = std::env::temp_dir();
        let pid = std::process::id();
        (
            dir.join(format!("procpatch-{tag}-{pid}.cpp")),
            dir.join(format!("procpatch-{tag}-{pid}.so")),
        )
    }

    #[test]
    fn test_compile_extracts_hook_main() {
        if !have_gxx() {
            eprintln!("g++ not available, skipping");
            return;
        }
        let (src, out) = scratch_paths("ok");
        let mut f = fs::File::create(&src).unwrap();
        writeln!(
            f,
            r#"extern "C" int side = 0;
extern "C" void helper() {{ side = 1; }}
extern "C" void hook_main() {{ side = 42; }}"#
        )
        .unwrap();

        let compiled = compile(&src, Some(&out)).unwrap();
        assert!(!compiled.text.is_empty());
        assert!(compiled.entry_offset < compiled.text.len());

        let _ = fs::remove_file(src);
        let _ = fs::remove_file(out);
    }

    #[test]
    fn test_compile_without_hook_main_fails() {
        if !have_gxx() {
            eprintln!("g++ not available, skipping");
            return;
        }
        let (src, out) = scratch_paths("missing");
        fs::write(&src, "extern \"C\" void not_the_hook() {}\n").unwrap();

        let err = compile(&src, Some(&out)).unwrap_err();
        assert!(matches!(err, PatchError::MissingSymbol(ref s) if s == "hook_main"));

        let _ = fs::remove_file(src);
        let _ = fs::remove_file(out);
    }

    #[test]
    fn test_compile_error_propagates() {
        if !have_gxx() {
            eprintln!("g++ not available, skipping");
            return;
        }
        let (src, out) = scratch_paths("broken");
        fs::write(&src, "this is not C++ at all\n").unwrap();

        assert!(matches!(
            compile(&src, Some(&out)),
            Err(PatchError::CompileError(..))
        ));

        let _ = fs::remove_file(src);
    }
}
