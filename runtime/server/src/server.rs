//! The request server
//!
//! Owns the namespace, the wait engine and every client process and thread,
//! and routes typed requests to the object handlers.
//!
//! ```text
//! handle_request(thread, request)
//!   ├─ thread → process lookup
//!   ├─ RequestContext { namespace, engine, process, thread, config }
//!   ├─ handler(ctx, request) -> Result<Reply, ObjectError>
//!   └─ Response { status, reply }
//! ```
//!
//! Requests may run concurrently from many client threads; a `select` blocks
//! only the calling thread.

use core::sync::atomic::{AtomicU32, Ordering};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use uk_kobject::requests;
use uk_kobject::{
    CancelReason, Namespace, ObjAttributes, ObjectError, Process, ProcessId, RequestContext, ServerConfig, Status,
    Thread, ThreadId, WaitEngine,
};

use crate::protocol::{Reply, Request, Response};

/// Server errors outside of object operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
    #[error("Unknown process {0}")]
    UnknownProcess(ProcessId),

    #[error("Unknown thread {0}")]
    UnknownThread(ThreadId),

    #[error("Failed to create namespace directory {path}: {source}")]
    Namespace {
        path: String,
        #[source]
        source: ObjectError,
    },

    #[error(transparent)]
    Object(#[from] ObjectError),
}

pub type Result<T> = core::result::Result<T, ServerError>;

impl From<&ServerError> for Status {
    fn from(err: &ServerError) -> Self {
        match err {
            ServerError::UnknownProcess(_) | ServerError::UnknownThread(_) => Status::InvalidParameter,
            ServerError::Namespace { source, .. } | ServerError::Object(source) => Status::from(source),
        }
    }
}

pub struct Server {
    config: ServerConfig,
    namespace: Namespace,
    engine: WaitEngine,
    processes: Mutex<HashMap<ProcessId, Arc<Process>>>,
    threads: Mutex<HashMap<ThreadId, Thread>>,
    next_id: AtomicU32,
}

impl Server {
    /// Create a server and its configured permanent directories
    pub fn new(config: ServerConfig) -> Result<Self> {
        let namespace = Namespace::new();
        for path in &config.namespace.directories {
            namespace
                .create_directory(None, path, ObjAttributes::PERMANENT)
                .map_err(|source| ServerError::Namespace {
                    path: path.clone(),
                    source,
                })?;
            log::debug!("namespace directory {}", path);
        }

        log::info!(
            "server ready ({} handles per process, packet limit {:?})",
            config.handles.max_per_process,
            config.completion.max_pending_packets
        );
        Ok(Self {
            config,
            namespace,
            engine: WaitEngine::new(),
            processes: Mutex::new(HashMap::new()),
            threads: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        })
    }

    #[inline]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[inline]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    #[inline]
    pub fn engine(&self) -> &WaitEngine {
        &self.engine
    }

    fn lock_processes(&self) -> MutexGuard<'_, HashMap<ProcessId, Arc<Process>>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_threads(&self) -> MutexGuard<'_, HashMap<ThreadId, Thread>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u32 {
        // Ids are multiples of 4, like the ids clients see on native systems.
        self.next_id.fetch_add(1, Ordering::Relaxed) << 2
    }

    // ========================================================================
    // Process / thread lifecycle
    // ========================================================================

    /// Register a new process
    ///
    /// With `inherit`, the child starts with the parent's inheritable handles.
    pub fn new_process(&self, parent: Option<ProcessId>, inherit: bool) -> Result<ProcessId> {
        let id = ProcessId::new(self.next_id());
        let limit = self.config.handles.max_per_process;

        let process = match parent {
            Some(parent_id) => {
                let parent = self.process(parent_id)?;
                if inherit {
                    Process::new_inheriting(id, &parent, limit)
                } else {
                    Process::new(id, Some(parent_id), limit)
                }
            }
            None => Process::new(id, None, limit),
        };

        log::debug!("{} started ({} inherited handles)", id, process.handle_count());
        self.lock_processes().insert(id, Arc::new(process));
        Ok(id)
    }

    /// Register a new thread in `process`
    pub fn new_thread(&self, process: ProcessId) -> Result<ThreadId> {
        let process = self.process(process)?;
        let id = ThreadId::new(self.next_id());
        log::debug!("{} started in {}", id, process.id());
        self.lock_threads().insert(id, Thread::new(id, process));
        Ok(id)
    }

    pub fn process(&self, id: ProcessId) -> Result<Arc<Process>> {
        self.lock_processes()
            .get(&id)
            .cloned()
            .ok_or(ServerError::UnknownProcess(id))
    }

    pub fn thread(&self, id: ThreadId) -> Result<Thread> {
        self.lock_threads().get(&id).cloned().ok_or(ServerError::UnknownThread(id))
    }

    pub fn process_count(&self) -> usize {
        self.lock_processes().len()
    }

    /// Terminate a thread, cancelling its pending wait
    pub fn terminate_thread(&self, id: ThreadId) -> Result<()> {
        let thread = self.lock_threads().remove(&id).ok_or(ServerError::UnknownThread(id))?;
        if self.engine.cancel_thread(id, CancelReason::ThreadTerminated) {
            log::debug!("{} terminated while waiting", id);
        }
        drop(thread);
        Ok(())
    }

    /// Terminate a process: its threads, then every handle it holds
    pub fn terminate_process(&self, id: ProcessId) -> Result<()> {
        let process = self.lock_processes().remove(&id).ok_or(ServerError::UnknownProcess(id))?;

        let threads = {
            let mut threads = self.lock_threads();
            let ids = threads
                .iter()
                .filter(|(_, thread)| thread.process().id() == id)
                .map(|(tid, _)| *tid)
                .collect::<Vec<_>>();
            ids.into_iter().filter_map(|tid| threads.remove(&tid)).collect::<Vec<_>>()
        };
        for thread in &threads {
            self.engine.cancel_thread(thread.id(), CancelReason::ThreadTerminated);
        }

        let closed = process.close_all_handles();
        for handle in &closed {
            self.engine.cancel_handle(id, *handle);
        }

        log::debug!("{} terminated ({} threads, {} handles closed)", id, threads.len(), closed.len());
        Ok(())
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Run one request on behalf of `thread`
    pub fn handle_request(&self, thread: ThreadId, request: &Request) -> Response {
        let result = self.thread(thread).and_then(|thread| self.dispatch(&thread, request));
        match result {
            Ok(reply) => {
                let response = Response::ok(reply);
                log::debug!("{} {} -> {:?}", thread, request.name(), response.status);
                response
            }
            Err(err) => {
                let status = Status::from(&err);
                log::debug!("{} {} failed: {} ({:?})", thread, request.name(), err, status);
                Response::error(status)
            }
        }
    }

    fn dispatch(&self, thread: &Thread, request: &Request) -> Result<Reply> {
        let ctx = RequestContext {
            namespace: &self.namespace,
            engine: &self.engine,
            process: thread.process(),
            thread: thread.id(),
            config: &self.config,
        };

        let reply = match request {
            Request::CreateCompletion(req) => Reply::Create(uk_completion::create_completion(&ctx, req)?),
            Request::OpenCompletion(req) => Reply::Open(uk_completion::open_completion(&ctx, req)?),
            Request::AddCompletion(req) => {
                uk_completion::add_completion(&ctx, req)?;
                Reply::None
            }
            Request::RemoveCompletion(req) => Reply::RemoveCompletion(uk_completion::remove_completion(&ctx, req)?),
            Request::QueryCompletion(req) => Reply::QueryCompletion(uk_completion::query_completion(&ctx, req)?),

            Request::CloseHandle(req) => {
                requests::close_handle(&ctx, req)?;
                Reply::None
            }
            Request::DuplicateHandle(req) => {
                let target = match req.target {
                    Some(pid) => self.process(pid)?,
                    None => thread.process().clone(),
                };
                Reply::Open(requests::duplicate_handle(&ctx, &target, req)?)
            }
            Request::MakeTemporary(req) => {
                requests::make_temporary(&ctx, req)?;
                Reply::None
            }
            Request::Select(req) => Reply::Select(requests::select(&ctx, req)?),
            Request::CreateDirectory(req) => Reply::Create(requests::create_directory(&ctx, req)?),
            Request::OpenDirectory(req) => Reply::Open(requests::open_directory(&ctx, req)?),
            Request::GetSecurity(req) => Reply::Security(requests::get_security(&ctx, req)?),
            Request::SetSecurity(req) => {
                requests::set_security(&ctx, req)?;
                Reply::None
            }
            Request::DumpObject(req) => Reply::Dump(requests::dump_object(&ctx, req)?),
        };
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uk_completion::{AddCompletionRequest, CreateCompletionRequest, RemoveCompletionReply, RemoveCompletionRequest};
    use uk_kobject::requests::CreateReply;
    use uk_kobject::{AccessMask, Disposition, Handle};

    fn server() -> (Server, ThreadId) {
        let server = Server::new(ServerConfig::default()).unwrap();
        let pid = server.new_process(None, false).unwrap();
        let tid = server.new_thread(pid).unwrap();
        (server, tid)
    }

    fn create_port(server: &Server, tid: ThreadId, name: &str) -> Response {
        server.handle_request(
            tid,
            &Request::CreateCompletion(CreateCompletionRequest {
                rootdir: Handle::NULL,
                name: name.into(),
                attributes: ObjAttributes::empty(),
                access: AccessMask::GENERIC_ALL,
                concurrent: 0,
                sd: None,
            }),
        )
    }

    #[test]
    fn test_configured_directories_exist() {
        let config = ServerConfig::from_toml_str("[namespace]\ndirectories = [\"\\\\A\", \"\\\\A\\\\B\"]\n").unwrap();
        let server = Server::new(config).unwrap();
        assert!(server.namespace().lookup(None, "\\a\\b").unwrap().is_permanent());
        assert!(server.namespace().lookup(None, "\\BaseNamedObjects").is_err());
    }

    #[test]
    fn test_bad_directory_config_fails() {
        let config = ServerConfig::from_toml_str("[namespace]\ndirectories = [\"\\\\Missing\\\\Child\"]\n").unwrap();
        assert!(matches!(Server::new(config), Err(ServerError::Namespace { .. })));
    }

    #[test]
    fn test_dispositions_become_statuses() {
        let (server, tid) = server();
        let first = create_port(&server, tid, "\\BaseNamedObjects\\port");
        assert_eq!(first.status, Status::Success);
        let second = create_port(&server, tid, "\\BaseNamedObjects\\port");
        assert_eq!(second.status, Status::ObjectNameExists);
        assert!(matches!(
            second.reply,
            Reply::Create(CreateReply {
                disposition: Disposition::AlreadyExists,
                ..
            })
        ));
    }

    #[test]
    fn test_remove_on_empty_is_pending() {
        let (server, tid) = server();
        let Reply::Create(port) = create_port(&server, tid, "").reply else {
            panic!("expected create reply");
        };

        let response = server.handle_request(tid, &Request::RemoveCompletion(RemoveCompletionRequest { handle: port.handle }));
        assert_eq!(response.status, Status::Pending);
        assert_eq!(response.reply, Reply::RemoveCompletion(RemoveCompletionReply::Pending));

        let response = server.handle_request(
            tid,
            &Request::AddCompletion(AddCompletionRequest {
                handle: port.handle,
                key: 5,
                value: 0,
                status: 0,
                information: 0,
            }),
        );
        assert_eq!(response, Response::ok(Reply::None));
    }

    #[test]
    fn test_unknown_thread() {
        let (server, _) = server();
        let response = create_port(&server, ThreadId::new(0xdead), "");
        assert_eq!(response.status, Status::InvalidParameter);
    }

    #[test]
    fn test_errors_map_to_status() {
        let (server, tid) = server();
        let response = server.handle_request(tid, &Request::RemoveCompletion(RemoveCompletionRequest { handle: Handle::from_raw(0x40) }));
        assert_eq!(response, Response::error(Status::InvalidHandle));
    }

    #[test]
    fn test_terminate_process_releases_objects() {
        let (server, tid) = server();
        let pid = server.thread(tid).unwrap().process().id();
        create_port(&server, tid, "\\BaseNamedObjects\\owned");

        server.terminate_process(pid).unwrap();
        assert!(server.namespace().lookup(None, "\\BaseNamedObjects\\owned").is_err());
        assert!(matches!(server.thread(tid), Err(ServerError::UnknownThread(_))));
        assert_eq!(server.process_count(), 0);
        assert_eq!(server.terminate_process(pid), Err(ServerError::UnknownProcess(pid)));
    }
}
