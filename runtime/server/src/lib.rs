//! Object Server - Request routing for processes, threads and kernel objects
//!
//! # Purpose
//! Hosts the object namespace, the wait engine and every client process, and
//! turns typed requests into object operations with an NTSTATUS-style
//! status per request.
//!
//! # Integration Points
//! - Depends on: `uk-kobject` (generic objects and requests), `uk-completion`
//! - Provides to: request decoders and tools (`uk-replay`)
//! - Requests: completion ports, handles, select, directories, security
//! - Access required: checked per request by the object handlers
//!
//! # Architecture
//! - [`protocol`]: `Request` / `Reply` / `Response`
//! - [`server`]: process and thread lifecycle, dispatch
//!
//! # Testing Strategy
//! - Unit tests: status mapping, lifecycle
//! - Integration tests: multi-threaded clients blocking, waking and terminating

pub mod protocol;
pub mod server;

pub use protocol::{Reply, Request, Response};
pub use server::{Server, ServerError};
