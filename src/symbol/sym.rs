//! A symbol table entry that demangles Rust/C++ names on first access.

use object::ObjectSymbol;
use rustc_demangle::demangle;
use std::cell::RefCell;

/// A symbol table entry borrowed from a parsed object file.
#[derive(Debug)]
pub struct Symbol<'data> {
    demangled_name: RefCell<Option<String>>,
    symbol: object::Symbol<'data, 'data>,
}

impl<'data> Symbol<'data> {
    /// Returns the demangled name if this symbol has a name, caching the result.
    pub fn name(&self) -> Option<String> {
        let mangled_name = self.symbol.name().ok()?;
        if let Some(name) = self.demangled_name.borrow().as_ref() {
            return Some(name.clone());
        }
        let demangled = demangle(mangled_name).to_string();
        *self.demangled_name.borrow_mut() = Some(demangled.clone());
        Some(demangled)
    }

    /// May be zero if the address is unknown.
    #[inline]
    pub fn address(&self) -> u64 {
        self.symbol.address()
    }
}

impl<'data> From<object::Symbol<'data, 'data>> for Symbol<'data> {
    fn from(symbol: object::Symbol<'data, 'data>) -> Self {
        Symbol {
            demangled_name: RefCell::new(None),
            symbol,
        }
    }
}
