//! ELF export resolution backing the script engine's symbol table. Supplements the
//! distilled design's bare "module basename -> base address" table with real
//! exported symbol names, when the backing file can be parsed as an object file.

pub mod sym;

use object::{Object, ObjectSymbol};
use std::collections::HashMap;
use std::fs;

/// Reads `path` and returns `(demangled name, absolute address)` for every defined,
/// global, non-zero-address symbol it exports, rebased onto `module_base`.
///
/// Best-effort: any I/O or parse failure yields an empty map rather than an error,
/// since a module whose backing file can't be read is common (deleted-on-disk
/// libraries, anonymous mappings with a synthetic path) and should not abort symbol
/// table construction for the rest of the process.
pub fn resolve_module_exports(path: &str, module_base: u64) -> HashMap<String, u64> {
    let mut out = HashMap::new();
    let data = match fs::read(path) {
        Ok(d) => d,
        Err(_) => return out,
    };
    let file = match object::File::parse(&*data) {
        Ok(f) => f,
        Err(_) => return out,
    };
    // Executables/shared objects are mapped at a link-time-relative offset; the
    // lowest segment's own address is already folded into `module_base` by the
    // caller (the region's mapped start), so symbol values are added directly.
    for sym in file.symbols() {
        if !sym.is_definition() || !sym.is_global() {
            continue;
        }
        let wrapped = sym::Symbol::from(sym);
        if let Some(name) = wrapped.name() {
            if wrapped.address() != 0 {
                out.insert(name, module_base + wrapped.address());
            }
        }
    }
    out
}
