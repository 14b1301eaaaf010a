//! Error and status types
//!
//! Object operations return [`ObjectError`]; the request server converts it
//! to a [`Status`] on the per-request status channel. Informational outcomes
//! (name already existed, nothing to dequeue) are values in the replies and
//! only become a `Status` at that final step.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::access::AccessMask;
use crate::handle::Handle;
use crate::object::ObjectType;

/// Error types for object operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    #[error("Name `{name}` already exists with type {existing}")]
    NameCollisionWrongType { name: String, existing: ObjectType },

    #[error("Object not found: {name}")]
    ObjectNotFound { name: String },

    #[error("Object path not found: {path}")]
    ObjectPathNotFound { path: String },

    #[error("Access denied (requested {requested:?}, granted {granted:?})")]
    AccessDenied { requested: AccessMask, granted: AccessMask },

    #[error("Invalid handle {0}")]
    InvalidHandle(Handle),

    #[error("Object type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: ObjectType, found: ObjectType },

    #[error("Operation not supported by {0} objects")]
    NotSupported(ObjectType),

    #[error("Allocation failure: {what}")]
    AllocationFailure { what: &'static str },

    #[error("Handle table full (limit: {limit})")]
    HandleTableFull { limit: usize },

    #[error("Invalid object name: {0:?}")]
    InvalidName(String),

    #[error("Handle {0} is protected from close")]
    HandleNotClosable(Handle),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),
}

pub type Result<T> = core::result::Result<T, ObjectError>;

/// Per-request status codes
///
/// Values match the NTSTATUS codes clients of the server expect.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Success = 0x0000_0000,
    Timeout = 0x0000_0102,
    Pending = 0x0000_0103,
    ObjectNameExists = 0x4000_0000,
    NotImplemented = 0xC000_0002,
    InvalidHandle = 0xC000_0008,
    InvalidParameter = 0xC000_000D,
    NoMemory = 0xC000_0017,
    AccessDenied = 0xC000_0022,
    ObjectTypeMismatch = 0xC000_0024,
    ObjectNameInvalid = 0xC000_0033,
    ObjectNameNotFound = 0xC000_0034,
    ObjectPathNotFound = 0xC000_003A,
    QuotaExceeded = 0xC000_0044,
    Cancelled = 0xC000_0120,
    HandleNotClosable = 0xC000_0235,
}

impl Status {
    /// Raw NTSTATUS value
    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    /// True for success and informational codes
    #[inline]
    pub fn is_success(self) -> bool {
        self.code() < 0x8000_0000
    }
}

impl From<&ObjectError> for Status {
    fn from(err: &ObjectError) -> Self {
        match err {
            ObjectError::NameCollisionWrongType { .. } => Status::ObjectTypeMismatch,
            ObjectError::ObjectNotFound { .. } => Status::ObjectNameNotFound,
            ObjectError::ObjectPathNotFound { .. } => Status::ObjectPathNotFound,
            ObjectError::AccessDenied { .. } => Status::AccessDenied,
            ObjectError::InvalidHandle(_) => Status::InvalidHandle,
            ObjectError::TypeMismatch { .. } => Status::ObjectTypeMismatch,
            ObjectError::NotSupported(_) => Status::ObjectTypeMismatch,
            ObjectError::AllocationFailure { .. } => Status::NoMemory,
            ObjectError::HandleTableFull { .. } => Status::QuotaExceeded,
            ObjectError::InvalidName(_) => Status::ObjectNameInvalid,
            ObjectError::HandleNotClosable(_) => Status::HandleNotClosable,
            ObjectError::InvalidParameter(_) => Status::InvalidParameter,
        }
    }
}

impl From<ObjectError> for Status {
    fn from(err: ObjectError) -> Self {
        Status::from(&err)
    }
}
