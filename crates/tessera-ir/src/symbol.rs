//! Process-wide interned names.
//!
//! Dialect names, operation names and attribute keys are all `Symbol`s, so
//! comparing an op's kind is a pair of `u32` comparisons.

use std::borrow::Cow;
use std::sync::LazyLock;

use lasso::{Rodeo, Spur};
use parking_lot::RwLock;

static INTERNER: LazyLock<RwLock<Rodeo>> = LazyLock::new(|| RwLock::new(Rodeo::default()));

/// Interned string with 4-byte `Spur` keys.
///
/// Ordering follows interning order, not lexical order. Anything that needs
/// a stable textual order (the printer, diagnostics) must sort by `with_str`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(Spur);

impl Symbol {
    /// Intern a static string. Prefer this over `from_dynamic` when possible.
    pub fn new(text: &'static str) -> Self {
        Self::get_or_else(text, |rodeo| rodeo.get_or_intern_static(text))
    }

    /// Intern a runtime string.
    pub fn from_dynamic(text: &str) -> Self {
        Self::get_or_else(text, |rodeo| rodeo.get_or_intern(text))
    }

    fn get_or_else(text: &str, f: impl for<'r> FnOnce(&'r mut Rodeo) -> Spur) -> Self {
        let mut lock = INTERNER.upgradable_read();
        Symbol(if let Some(spur) = lock.get(text) {
            spur
        } else {
            lock.with_upgraded(f)
        })
    }

    /// Borrow the symbol's text without allocating.
    ///
    /// Uses `read_recursive()` so the closure may touch other symbols.
    pub fn with_str<R>(&self, f: impl FnOnce(&str) -> R) -> R {
        let interner = INTERNER.read_recursive();
        f(interner.resolve(&self.0))
    }
}

impl From<&'static str> for Symbol {
    fn from(text: &'static str) -> Self {
        Symbol::new(text)
    }
}

impl From<Cow<'_, str>> for Symbol {
    fn from(text: Cow<'_, str>) -> Self {
        Symbol::from_dynamic(&text)
    }
}

impl PartialEq<str> for Symbol {
    fn eq(&self, other: &str) -> bool {
        self.with_str(|s| s == other)
    }
}

impl PartialEq<&str> for Symbol {
    fn eq(&self, other: &&str) -> bool {
        self.with_str(|s| s == *other)
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.with_str(|s| f.write_str(s))
    }
}

/// Declare a module of zero-argument symbol constructors.
///
/// ```ignore
/// tessera_ir::symbols! {
///     VALUE => "value",
///     INDEX => "index",
/// }
///
/// assert_eq!(VALUE(), "value");
/// ```
#[macro_export]
macro_rules! symbols {
    ($($name:ident => $text:literal),* $(,)?) => {
        $(
            #[allow(non_snake_case)]
            #[inline]
            pub fn $name() -> $crate::Symbol {
                $crate::Symbol::new($text)
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_and_dynamic_intern_to_same_key() {
        let a = Symbol::new("getitem");
        let owned = String::from("getitem");
        let b = Symbol::from_dynamic(&owned);
        assert_eq!(a, b);
        assert_eq!(a, "getitem");
        assert_eq!(a.to_string(), "getitem");
    }

    #[test]
    fn distinct_text_distinct_symbol() {
        assert_ne!(Symbol::new("lhs"), Symbol::new("rhs"));
    }
}
