//! Unified error type for the binding layer.
//!
//! Every failure the bridge can report, whether it comes from registration,
//! argument validation, member dispatch or host code, is a [`BindError`].
//! Errors raised while Lua is running are converted into `mlua::Error` and
//! surface to scripts as ordinary catchable errors.
//!
//! ## Error Taxonomy
//!
//! ```text
//! BindError
//! ├── RegistrationOrder / DuplicateName /
//! │   AmbiguousBase                       - registration time
//! ├── ArityMismatch / TypeMismatch        - call adapters
//! ├── CapabilityMissing / ReadOnly /
//! │   WriteOnly / InvalidKey / UnknownKey - member dispatch
//! ├── UseAfterRelease / ObjectBusy        - object handles
//! ├── HostPanic                           - host code
//! └── Lua                                 - the runtime itself
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use luabind_core::{BindError, BindErrorKind};
//!
//! let err = lua.load("acc.bankName = 'x'").exec().unwrap_err();
//! let bind = BindError::from_lua(&err).unwrap();
//! assert_eq!(bind.kind(), BindErrorKind::ReadOnly);
//! ```

use std::any::Any;

use thiserror::Error;

// ============================================================================
// Error Kinds
// ============================================================================

/// Coarse classification of a [`BindError`].
///
/// Useful for tests and host code that want to branch on the failure class
/// without matching every field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindErrorKind {
    /// A base type was used before it was registered.
    RegistrationOrder,
    /// A display name is already bound to a different type.
    DuplicateName,
    /// An ancestor would be stored more than once in one object.
    AmbiguousBase,
    /// Array access on a type without index hooks.
    CapabilityMissing,
    /// Write to a property without a setter.
    ReadOnly,
    /// Read of a property without a getter.
    WriteOnly,
    /// Wrong argument or handle type.
    TypeMismatch,
    /// Wrong argument count.
    ArityMismatch,
    /// Dispatch on a released handle.
    UseAfterRelease,
    /// String key not found anywhere in the resolution chain.
    UnknownKey,
    /// Key that is neither a number nor a string.
    InvalidKey,
    /// Re-entrant access to an object that is already borrowed.
    ObjectBusy,
    /// Host code panicked inside a call adapter.
    HostPanic,
    /// Error raised by the Lua runtime.
    Lua,
}

impl BindErrorKind {
    /// Returns a human-readable name for this error kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            BindErrorKind::RegistrationOrder => "registration order",
            BindErrorKind::DuplicateName => "duplicate name",
            BindErrorKind::AmbiguousBase => "ambiguous base",
            BindErrorKind::CapabilityMissing => "capability missing",
            BindErrorKind::ReadOnly => "read-only violation",
            BindErrorKind::WriteOnly => "write-only violation",
            BindErrorKind::TypeMismatch => "type mismatch",
            BindErrorKind::ArityMismatch => "arity mismatch",
            BindErrorKind::UseAfterRelease => "use after release",
            BindErrorKind::UnknownKey => "unknown key",
            BindErrorKind::InvalidKey => "invalid key",
            BindErrorKind::ObjectBusy => "object busy",
            BindErrorKind::HostPanic => "host panic",
            BindErrorKind::Lua => "lua error",
        }
    }
}

impl std::fmt::Display for BindErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// BindError
// ============================================================================

/// Array capability that a dispatch required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexAccess {
    /// `obj[i]`
    Read,
    /// `obj[i] = v`
    Write,
}

impl std::fmt::Display for IndexAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexAccess::Read => write!(f, "read"),
            IndexAccess::Write => write!(f, "write"),
        }
    }
}

/// Errors raised by the binding layer.
#[derive(Debug, Error)]
pub enum BindError {
    /// A declared base was not registered before the derived type.
    #[error("base class '{base}' should be bound before child '{type_name}'")]
    RegistrationOrder { type_name: String, base: String },

    /// The display name is already used by another host type.
    #[error("type name '{name}' is already bound to '{existing}'")]
    DuplicateName { name: String, existing: String },

    /// An ancestor is reachable through two bases without shared storage.
    #[error("base class '{base}' is embedded more than once in '{type_name}'")]
    AmbiguousBase { type_name: String, base: String },

    /// Integer key used on a type without the matching array hook.
    #[error("type '{type_name}' does not support indexed {access}")]
    CapabilityMissing {
        type_name: String,
        access: IndexAccess,
    },

    /// Write to a property that has no setter.
    #[error("property named '{name}' is read only")]
    ReadOnly { name: String },

    /// Read of a property that has no getter.
    #[error("property named '{name}' is write only")]
    WriteOnly { name: String },

    /// Argument at `position` has the wrong type.
    #[error(
        "Argument at {position} has invalid type. Expecting '{expected}', but got '{actual}'."
    )]
    TypeMismatch {
        position: usize,
        expected: String,
        actual: String,
    },

    /// A handle could not be viewed as the requested host type.
    #[error("Expecting object of type '{expected}', but got '{actual}'.")]
    HandleMismatch { expected: String, actual: String },

    /// Wrong number of arguments to a bound call.
    #[error("Invalid number of arguments, should be {expected}, but {actual} were given.")]
    ArityMismatch { expected: usize, actual: usize },

    /// The handle was released explicitly or finalised.
    #[error("attempt to use released object of type '{type_name}'")]
    UseAfterRelease { type_name: String },

    /// String key missing from members, bases and the ad-hoc table.
    #[error("'{key}' is not a member of '{type_name}'")]
    UnknownKey { type_name: String, key: String },

    /// Key that is neither number nor string.
    #[error("Key type should be number or string, '{actual}' is provided.")]
    InvalidKey { actual: String },

    /// The object is already mutably borrowed further up the call stack.
    #[error("object of type '{type_name}' is already in use")]
    ObjectBusy { type_name: String },

    /// Host code panicked inside a bound call.
    #[error("{message}")]
    HostPanic { message: String },

    /// Error coming from the Lua runtime.
    #[error(transparent)]
    Lua(#[from] mlua::Error),
}

impl BindError {
    /// Create a type mismatch error for the argument at `position`.
    pub fn type_mismatch(
        position: usize,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        BindError::TypeMismatch {
            position,
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a handle mismatch error.
    pub fn handle_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        BindError::HandleMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an arity mismatch error.
    pub fn arity(expected: usize, actual: usize) -> Self {
        BindError::ArityMismatch { expected, actual }
    }

    /// Create a use-after-release error.
    pub fn released(type_name: impl Into<String>) -> Self {
        BindError::UseAfterRelease {
            type_name: type_name.into(),
        }
    }

    /// Build a [`BindError::HostPanic`] from a caught panic payload.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "Unknown exception while calling host function".to_string()
        };
        BindError::HostPanic { message }
    }

    /// Get the kind of this error.
    pub fn kind(&self) -> BindErrorKind {
        match self {
            BindError::RegistrationOrder { .. } => BindErrorKind::RegistrationOrder,
            BindError::DuplicateName { .. } => BindErrorKind::DuplicateName,
            BindError::AmbiguousBase { .. } => BindErrorKind::AmbiguousBase,
            BindError::CapabilityMissing { .. } => BindErrorKind::CapabilityMissing,
            BindError::ReadOnly { .. } => BindErrorKind::ReadOnly,
            BindError::WriteOnly { .. } => BindErrorKind::WriteOnly,
            BindError::TypeMismatch { .. } | BindError::HandleMismatch { .. } => {
                BindErrorKind::TypeMismatch
            }
            BindError::ArityMismatch { .. } => BindErrorKind::ArityMismatch,
            BindError::UseAfterRelease { .. } => BindErrorKind::UseAfterRelease,
            BindError::UnknownKey { .. } => BindErrorKind::UnknownKey,
            BindError::InvalidKey { .. } => BindErrorKind::InvalidKey,
            BindError::ObjectBusy { .. } => BindErrorKind::ObjectBusy,
            BindError::HostPanic { .. } => BindErrorKind::HostPanic,
            BindError::Lua(_) => BindErrorKind::Lua,
        }
    }

    /// Find the [`BindError`] carried by a Lua error, if any.
    ///
    /// Walks through callback and context wrappers that mlua adds while the
    /// error travels through Lua frames.
    pub fn from_lua(error: &mlua::Error) -> Option<&BindError> {
        match error {
            mlua::Error::ExternalError(inner) => inner.downcast_ref::<BindError>(),
            mlua::Error::CallbackError { cause, .. } => Self::from_lua(cause),
            mlua::Error::WithContext { cause, .. } => Self::from_lua(cause),
            _ => None,
        }
    }
}

impl From<BindError> for mlua::Error {
    fn from(error: BindError) -> Self {
        match error {
            BindError::Lua(inner) => inner,
            other => mlua::Error::external(other),
        }
    }
}

/// Result alias used across the binding crates.
pub type BindResult<T> = Result<T, BindError>;
