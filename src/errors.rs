// src/errors.rs
//! Construction-time errors.
//!
//! Everything here is raised synchronously while a function is being built
//! or when the session is sealed. Construction is deterministic, so there is
//! no retry machinery: the caller fixes the description and rebuilds.
//! Failures inside the native engine are passed through opaquely as
//! [`BuildError::Backend`].

use miette::Diagnostic;
use thiserror::Error;

/// Errors surfaced by the function-construction API.
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum BuildError {
    /// Operand or target types do not line up.
    #[error("{context}: expected {expected}, found {found}")]
    #[diagnostic(code(anvil::type_mismatch))]
    TypeMismatch {
        context: &'static str,
        expected: String,
        found: String,
    },

    /// Two bare literals met in one operation; neither side fixes the type.
    #[error("cannot infer a type for two bare literals; make one side a typed constant")]
    #[diagnostic(code(anvil::ambiguous_literal))]
    AmbiguousLiteral,

    /// A struct definition repeated a member name.
    #[error("duplicate struct member '{name}'")]
    #[diagnostic(code(anvil::duplicate_member))]
    DuplicateMember { name: String },

    /// A struct lookup named a member that does not exist.
    #[error("unknown struct member '{name}'")]
    #[diagnostic(code(anvil::unknown_member))]
    UnknownMember { name: String },

    /// The session sealed while one or more labels were never placed.
    /// Usually a control-flow chain was dropped without its terminal `end`.
    #[error("sealed with {count} unplaced label(s); was an `end` call omitted?")]
    #[diagnostic(code(anvil::unplaced_label))]
    UnplacedLabel { count: usize },

    /// A label was placed at two program points.
    #[error("label placed more than once")]
    #[diagnostic(code(anvil::label_redefined))]
    LabelRedefined,

    /// A value, label, or instance was used against a session other than the
    /// one that created it.
    #[error("{what} does not belong to this function under construction")]
    #[diagnostic(code(anvil::scope_violation))]
    ScopeViolation { what: &'static str },

    #[error("break outside of loop")]
    #[diagnostic(code(anvil::invalid_break))]
    InvalidBreak,

    #[error("redo outside of loop")]
    #[diagnostic(code(anvil::invalid_redo))]
    InvalidRedo,

    /// A parameter index past the end of the signature.
    #[error("no parameter {index}; the signature declares {count}")]
    #[diagnostic(code(anvil::no_such_param))]
    NoSuchParam { index: u32, count: u32 },

    /// The construct is valid IR but the selected engine cannot lower it.
    #[error("unsupported by this engine: {feature}")]
    #[diagnostic(code(anvil::unsupported))]
    Unsupported { feature: &'static str },

    /// Invariant violation inside this crate (a bug, not caller error).
    #[error("internal error: {message}")]
    #[diagnostic(code(anvil::internal))]
    Internal { message: &'static str },

    /// Opaque failure reported by the native engine.
    #[error("native engine error: {0}")]
    #[diagnostic(code(anvil::backend))]
    Backend(String),
}

impl BuildError {
    /// Create a type mismatch error.
    pub fn type_mismatch(
        context: &'static str,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        BuildError::TypeMismatch {
            context,
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn duplicate_member(name: impl Into<String>) -> Self {
        BuildError::DuplicateMember { name: name.into() }
    }

    pub fn unknown_member(name: impl Into<String>) -> Self {
        BuildError::UnknownMember { name: name.into() }
    }

    pub fn scope_violation(what: &'static str) -> Self {
        BuildError::ScopeViolation { what }
    }

    pub fn unsupported(feature: &'static str) -> Self {
        BuildError::Unsupported { feature }
    }

    pub fn internal(message: &'static str) -> Self {
        BuildError::Internal { message }
    }

    /// Wrap an engine-side error.
    pub fn backend(e: impl std::fmt::Display) -> Self {
        BuildError::Backend(e.to_string())
    }
}

/// Result type alias for construction operations.
pub type BuildResult<T> = Result<T, BuildError>;
