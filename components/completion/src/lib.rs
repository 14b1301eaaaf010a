//! IO Completion Ports - Packet queues for asynchronous IO notification
//!
//! # Purpose
//! Implements the completion port object kind on top of the generic kernel
//! object infrastructure: a named, waitable FIFO of completion packets that
//! threads block on and drain.
//!
//! # Integration Points
//! - Depends on: `uk-kobject` (objects, namespace, handles, wait engine)
//! - Provides to: the request server, and to other object kinds through
//!   [`post_completion`]
//! - Requests: create, open, add, remove, query
//! - Access required: `IO_COMPLETION_MODIFY_STATE` to post or remove,
//!   `IO_COMPLETION_QUERY_STATE` to query
//!
//! # Architecture
//! - [`port`]: the `CompletionPort` object body
//! - [`requests`]: request/reply types and handlers
//! - Waiters are woken in FIFO order, at most one per posted packet
//!
//! # Testing Strategy
//! - Unit tests: queue order, depth accounting, access mapping
//! - Integration tests: request flows, blocked waiters woken by posts
//! - Performance tests: post/remove throughput (criterion)

pub mod packet;
pub mod port;
pub mod requests;

pub use packet::CompletionPacket;
pub use port::{CompletionPort, IO_COMPLETION_ALL_ACCESS, IO_COMPLETION_MODIFY_STATE, IO_COMPLETION_QUERY_STATE};
pub use requests::{
    add_completion, create_completion, get_completion_obj, open_completion, post_completion, query_completion,
    remove_completion, AddCompletionRequest, CreateCompletionRequest, OpenCompletionRequest, QueryCompletionReply,
    QueryCompletionRequest, RemoveCompletionReply, RemoveCompletionRequest,
};
