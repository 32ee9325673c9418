//! Interned categorical values
//!
//! Symbols are the categorical value type and double as schema identifiers
//! (class, attribute, block and rule names). They are interned in a
//! process-wide table so clones are cheap and equality is pointer-first.
//!
//! The table is global rather than thread-local because the derivation-rule
//! registry is process-wide and rule prototypes (which carry symbols) must be
//! `Send + Sync`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, OnceLock};

fn interner() -> &'static Mutex<HashSet<Arc<str>>> {
    static INTERNER: OnceLock<Mutex<HashSet<Arc<str>>>> = OnceLock::new();
    INTERNER.get_or_init(|| Mutex::new(HashSet::new()))
}

/// An interned string.
///
/// Two symbols built from the same text share one allocation; equality
/// short-circuits on pointer identity.
#[derive(Clone)]
pub struct Symbol(Arc<str>);

impl Symbol {
    /// Intern a string.
    pub fn new(s: &str) -> Self {
        let mut table = interner().lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = table.get(s) {
            return Symbol(existing.clone());
        }
        let arc: Arc<str> = Arc::from(s);
        table.insert(arc.clone());
        Symbol(arc)
    }

    /// The interned empty symbol (categorical missing value).
    pub fn empty() -> Self {
        Symbol::new("")
    }

    /// String view.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the empty symbol.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for Symbol {
    fn default() -> Self {
        Symbol::empty()
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", &*self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol::new(&s)
    }
}

impl PartialEq<&str> for Symbol {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl Serialize for Symbol {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Symbol::new(&s))
    }
}

/// Check that a string is a valid schema identifier.
///
/// Identifiers start with a letter or underscore and continue with letters,
/// digits or underscores. Class, attribute, block and rule names all go
/// through this.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}
