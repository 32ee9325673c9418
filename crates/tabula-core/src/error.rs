//! Operational errors

use tabula_types::Symbol;
use thiserror::Error;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by schema construction, the rule registry and domain
/// compilation. Definition-time authoring mistakes accumulate in a
/// [`crate::DiagnosticSink`] instead; contract violations panic.
#[derive(Debug, Error)]
pub enum Error {
    #[error("derivation rule already registered: {0}")]
    DuplicateRule(Symbol),

    #[error("invalid derivation rule name: {0:?}")]
    InvalidRuleName(String),

    #[error("derivation rule {0} fails its definition check")]
    RuleDefinition(Symbol),

    #[error("duplicate class: {0}")]
    DuplicateClass(Symbol),

    #[error("class {class}: duplicate attribute or block name: {name}")]
    DuplicateName { class: Symbol, name: Symbol },

    #[error("class {class}: unknown attribute: {name}")]
    UnknownAttribute { class: Symbol, name: Symbol },

    #[error("class {class}: block {block}: {message}")]
    BlockStructure {
        class: Symbol,
        block: Symbol,
        message: String,
    },

    #[error("domain {domain} failed to compile with {errors} error(s)")]
    CompileFailed { domain: Symbol, errors: usize },
}
