//! Kernel Objects - Generic object infrastructure for the user-space server
//!
//! # Purpose
//! Provides the reference-counted, optionally named, waitable object model
//! that concrete object kinds (completion ports, directories) are built on.
//!
//! # Integration Points
//! - Depends on: nothing outside this crate
//! - Provides to: object kinds (`uk-completion`), the request server (`uk-server`)
//! - Request handlers: handle close/duplicate, select, directories, security
//! - Access required: per-handle access masks checked on every lookup
//!
//! # Architecture
//! - [`object`]: the `ObjectOps` operation table and counted `ObjectRef`s
//! - [`directory`]: hierarchical, case-insensitive object namespace
//! - [`handle`] / [`process`]: per-process handle tables
//! - [`wait`]: the wait/signal engine (FIFO wake order)
//! - [`requests`]: generic request handlers shared by every object kind
//!
//! # Testing Strategy
//! - Unit tests: rights mapping, handle allocation, name resolution, waits
//! - Integration tests: multi-threaded waits with timeouts and cancellation

pub mod access;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod handle;
pub mod object;
pub mod process;
pub mod requests;
pub mod security;
pub mod wait;

pub use access::{AccessMask, GenericMapping};
pub use config::ServerConfig;
pub use context::RequestContext;
pub use directory::{Directory, Disposition, Namespace, ObjAttributes, PendingOpen};
pub use error::{ObjectError, Result, Status};
pub use handle::{Handle, HandleAttributes, HandleTable, MAX_HANDLES};
pub use object::{KernelObject, ObjectId, ObjectOps, ObjectRef, ObjectType, WeakObjectRef};
pub use process::{Process, ProcessId, Thread, ThreadId};
pub use security::{Ace, AceKind, SecurityDescriptor, Trustee};
pub use wait::{CancelReason, WaitEngine, WaitMode, WaitStatus, WaitTarget};
