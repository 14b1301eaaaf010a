//! Typed requests, replies and the per-request status
//!
//! Requests are tagged by name when serialized, so a script or a wire
//! decoder can produce them directly:
//!
//! ```toml
//! request = "add_completion"
//! handle = 4
//! key = 1
//! ```

use serde::{Deserialize, Serialize};
use uk_completion::{
    AddCompletionRequest, CreateCompletionRequest, OpenCompletionRequest, QueryCompletionReply, QueryCompletionRequest,
    RemoveCompletionReply, RemoveCompletionRequest,
};
use uk_kobject::requests::{
    CloseHandleRequest, CreateDirectoryRequest, CreateReply, DumpObjectReply, DumpObjectRequest, DuplicateHandleRequest,
    GetSecurityReply, GetSecurityRequest, MakeTemporaryRequest, OpenDirectoryRequest, OpenReply, SelectReply,
    SelectRequest, SetSecurityRequest,
};
use uk_kobject::{Disposition, Status, WaitStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum Request {
    CreateCompletion(CreateCompletionRequest),
    OpenCompletion(OpenCompletionRequest),
    AddCompletion(AddCompletionRequest),
    RemoveCompletion(RemoveCompletionRequest),
    QueryCompletion(QueryCompletionRequest),

    CloseHandle(CloseHandleRequest),
    DuplicateHandle(DuplicateHandleRequest),
    MakeTemporary(MakeTemporaryRequest),
    Select(SelectRequest),
    CreateDirectory(CreateDirectoryRequest),
    OpenDirectory(OpenDirectoryRequest),
    GetSecurity(GetSecurityRequest),
    SetSecurity(SetSecurityRequest),
    DumpObject(DumpObjectRequest),
}

impl Request {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Request::CreateCompletion(_) => "create_completion",
            Request::OpenCompletion(_) => "open_completion",
            Request::AddCompletion(_) => "add_completion",
            Request::RemoveCompletion(_) => "remove_completion",
            Request::QueryCompletion(_) => "query_completion",
            Request::CloseHandle(_) => "close_handle",
            Request::DuplicateHandle(_) => "duplicate_handle",
            Request::MakeTemporary(_) => "make_temporary",
            Request::Select(_) => "select",
            Request::CreateDirectory(_) => "create_directory",
            Request::OpenDirectory(_) => "open_directory",
            Request::GetSecurity(_) => "get_security",
            Request::SetSecurity(_) => "set_security",
            Request::DumpObject(_) => "dump_object",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    /// Requests without reply data, and every failed request
    None,
    Create(CreateReply),
    Open(OpenReply),
    RemoveCompletion(RemoveCompletionReply),
    QueryCompletion(QueryCompletionReply),
    Select(SelectReply),
    Security(GetSecurityReply),
    Dump(DumpObjectReply),
}

impl Reply {
    /// Status implied by a successful reply
    ///
    /// Informational outcomes carried as values become their status codes
    /// here.
    pub fn status(&self) -> Status {
        match self {
            Reply::Create(CreateReply {
                disposition: Disposition::AlreadyExists,
                ..
            }) => Status::ObjectNameExists,
            Reply::RemoveCompletion(RemoveCompletionReply::Pending) => Status::Pending,
            Reply::Select(SelectReply {
                status: WaitStatus::Timeout,
            }) => Status::Timeout,
            Reply::Select(SelectReply {
                status: WaitStatus::Cancelled(_),
            }) => Status::Cancelled,
            _ => Status::Success,
        }
    }
}

/// Status plus reply data of one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    pub reply: Reply,
}

impl Response {
    pub fn ok(reply: Reply) -> Self {
        Self {
            status: reply.status(),
            reply,
        }
    }

    pub fn error(status: Status) -> Self {
        Self { status, reply: Reply::None }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
