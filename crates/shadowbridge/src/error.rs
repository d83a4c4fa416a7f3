//! Error type shared by the bridge
//!
//! [`Error::code`] maps every variant to the status code a shadow thunk
//! returns across the ABI.

use thiserror::Error;

use crate::guid::GUID;
use crate::hresult::{
    E_FAIL, E_INVALIDARG, E_NOINTERFACE, E_POINTER, E_UNEXPECTED, HRESULT, RO_E_CLOSED,
};

/// Every failure the bridge can report.
///
/// # Error Categories
///
/// ## Programmer errors (fail fast)
/// - [`Error::UnknownType`] / [`Error::UnknownInterface`] - missing registration
/// - [`Error::DuplicateRegistration`] / [`Error::InterfaceClaimed`] - conflicting registration
/// - [`Error::UseAfterDispose`] - proxy used after its reference was released
/// - [`Error::RefCountUnderflow`] - a Release without a matching AddRef
///
/// ## Expected outcomes
/// - [`Error::InterfaceNotSupported`] - a capability probe came back negative
///
/// ## Boundary errors
/// - [`Error::NullHandle`], [`Error::NullPointer`], [`Error::InvalidArgument`],
///   [`Error::InvalidString`] - bad data on either side of a call
/// - [`Error::CallbackFault`] - a managed callback panicked inside a thunk
/// - [`Error::Native`] - any other failure status returned by native code
#[derive(Error, Debug)]
pub enum Error {
    /// No interface id registered for the type.
    #[error("type `{0}` has no registered interface id")]
    UnknownType(String),

    /// No type registered for the interface id.
    #[error("no type is registered for interface {0}")]
    UnknownInterface(GUID),

    /// A type was registered a second time with a different interface id.
    #[error("type `{name}` is already registered as {existing}, refusing {requested}")]
    DuplicateRegistration {
        name: String,
        existing: GUID,
        requested: GUID,
    },

    /// Two different types claimed the same interface id.
    #[error("interface {iid} is already claimed by `{owner}`")]
    InterfaceClaimed { iid: GUID, owner: String },

    /// QueryInterface did not find the requested interface.
    #[error("interface {0} is not supported")]
    InterfaceNotSupported(GUID),

    /// The proxy's native reference has already been released.
    #[error("native object used after dispose")]
    UseAfterDispose,

    /// The proxy never received a native handle.
    #[error("native object handle is null")]
    NullHandle,

    /// A required pointer argument was null.
    #[error("null pointer")]
    NullPointer,

    /// An argument was rejected while marshaling.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A string could not be converted between UTF-8 and UTF-16.
    #[error("invalid string: {0}")]
    InvalidString(String),

    /// A managed callback panicked while invoked from native code.
    #[error("callback faulted: {0}")]
    CallbackFault(String),

    /// Release called on a reference count that was already zero.
    #[error("reference count underflow")]
    RefCountUnderflow,

    /// Failure status returned by native code.
    #[error("native call failed with HRESULT {0}")]
    Native(HRESULT),
}

impl Error {
    /// Status code reported to native callers for this error.
    #[must_use]
    pub fn code(&self) -> HRESULT {
        match self {
            Error::UnknownType(_)
            | Error::UnknownInterface(_)
            | Error::DuplicateRegistration { .. }
            | Error::InterfaceClaimed { .. } => E_FAIL,
            Error::InterfaceNotSupported(_) => E_NOINTERFACE,
            Error::UseAfterDispose => RO_E_CLOSED,
            Error::NullHandle | Error::NullPointer => E_POINTER,
            Error::InvalidArgument(_) | Error::InvalidString(_) => E_INVALIDARG,
            Error::CallbackFault(_) | Error::RefCountUnderflow => E_UNEXPECTED,
            Error::Native(hr) => *hr,
        }
    }
}

impl From<HRESULT> for Error {
    fn from(hr: HRESULT) -> Self {
        Error::Native(hr)
    }
}

impl From<widestring::error::ContainsNul<u16>> for Error {
    fn from(value: widestring::error::ContainsNul<u16>) -> Self {
        Error::InvalidString(value.to_string())
    }
}

impl From<widestring::error::Utf16Error> for Error {
    fn from(value: widestring::error::Utf16Error) -> Self {
        Error::InvalidString(value.to_string())
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
