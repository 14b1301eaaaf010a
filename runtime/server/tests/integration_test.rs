//! Integration tests for the request server
//!
//! Multiple client threads issuing requests concurrently:
//! - Worker threads draining a completion port fed by another thread
//! - Thread and process termination cancelling blocked selects
//! - Handle duplication and inheritance across processes

use std::sync::Arc;
use std::thread;

use uk_completion::*;
use uk_kobject::requests::{CloseHandleRequest, CreateReply, DuplicateHandleRequest, OpenReply, SelectReply, SelectRequest};
use uk_kobject::*;
use uk_server::{Reply, Request, Server};

fn start() -> (Arc<Server>, ProcessId, ThreadId) {
    let server = Arc::new(Server::new(ServerConfig::default()).expect("Failed to start server"));
    let pid = server.new_process(None, false).unwrap();
    let tid = server.new_thread(pid).unwrap();
    (server, pid, tid)
}

fn create_port(server: &Server, tid: ThreadId, name: &str, attributes: ObjAttributes) -> Handle {
    let response = server.handle_request(
        tid,
        &Request::CreateCompletion(CreateCompletionRequest {
            rootdir: Handle::NULL,
            name: name.into(),
            attributes,
            access: AccessMask::GENERIC_ALL,
            concurrent: 2,
            sd: None,
        }),
    );
    match response.reply {
        Reply::Create(CreateReply { handle, .. }) => handle,
        other => panic!("unexpected reply {:?} ({:?})", other, response.status),
    }
}

fn post(server: &Server, tid: ThreadId, handle: Handle, key: u64) -> Status {
    server
        .handle_request(
            tid,
            &Request::AddCompletion(AddCompletionRequest {
                handle,
                key,
                value: 0,
                status: 0,
                information: 0,
            }),
        )
        .status
}

fn select(server: &Server, tid: ThreadId, handle: Handle) -> (Status, Reply) {
    let response = server.handle_request(
        tid,
        &Request::Select(SelectRequest {
            handles: vec![handle],
            mode: WaitMode::Any,
            timeout_ms: None,
        }),
    );
    (response.status, response.reply)
}

fn wait_until_blocked(server: &Server, tid: ThreadId) {
    while !server.engine().is_waiting(tid) {
        thread::yield_now();
    }
}

/// Test worker threads drain every packet posted by a producer
#[test]
fn test_workers_drain_port() {
    let (server, pid, producer) = start();
    let port = create_port(&server, producer, "\\BaseNamedObjects\\work", ObjAttributes::empty());
    const PACKETS: u64 = 64;

    let workers = (0..3)
        .map(|_| {
            let server = server.clone();
            let tid = server.new_thread(pid).unwrap();
            thread::spawn(move || {
                let mut keys = Vec::new();
                loop {
                    let (status, _) = select(&server, tid, port);
                    if status != Status::Success {
                        return keys;
                    }
                    let response = server.handle_request(tid, &Request::RemoveCompletion(RemoveCompletionRequest { handle: port }));
                    match response.reply {
                        Reply::RemoveCompletion(RemoveCompletionReply::Packet(packet)) if packet.key == u64::MAX => return keys,
                        Reply::RemoveCompletion(RemoveCompletionReply::Packet(packet)) => keys.push(packet.key),
                        // Another worker got there first.
                        _ => {}
                    }
                }
            })
        })
        .collect::<Vec<_>>();

    for key in 0..PACKETS {
        assert_eq!(post(&server, producer, port, key), Status::Success);
    }
    for _ in 0..3 {
        assert_eq!(post(&server, producer, port, u64::MAX), Status::Success);
    }

    let mut keys = workers.into_iter().flat_map(|w| w.join().unwrap()).collect::<Vec<_>>();
    keys.sort_unstable();
    assert_eq!(keys, (0..PACKETS).collect::<Vec<_>>());

    let response = server.handle_request(producer, &Request::QueryCompletion(QueryCompletionRequest { handle: port }));
    assert_eq!(
        response.reply,
        Reply::QueryCompletion(QueryCompletionReply {
            depth: 0,
            concurrency: 2
        })
    );
}

/// Test terminating a thread cancels its blocked select
#[test]
fn test_terminate_thread_cancels_select() {
    let (server, pid, tid) = start();
    let port = create_port(&server, tid, "", ObjAttributes::empty());
    let waiter = server.new_thread(pid).unwrap();

    let blocked = {
        let server = server.clone();
        thread::spawn(move || select(&server, waiter, port))
    };
    wait_until_blocked(&server, waiter);
    server.terminate_thread(waiter).unwrap();

    let (status, reply) = blocked.join().unwrap();
    assert_eq!(status, Status::Cancelled);
    assert_eq!(
        reply,
        Reply::Select(SelectReply {
            status: WaitStatus::Cancelled(CancelReason::ThreadTerminated)
        })
    );
    // The port is untouched.
    assert_eq!(post(&server, tid, port, 1), Status::Success);
}

/// Test terminating a process releases its port while another process waits on it
#[test]
fn test_terminate_process_with_shared_port() {
    let (server, owner, owner_tid) = start();
    let port = create_port(&server, owner_tid, "\\BaseNamedObjects\\shared", ObjAttributes::empty());

    let client = server.new_process(None, false).unwrap();
    let client_tid = server.new_thread(client).unwrap();
    let response = server.handle_request(
        owner_tid,
        &Request::DuplicateHandle(DuplicateHandleRequest {
            handle: port,
            target: Some(client),
            access: None,
            attributes: HandleAttributes::empty(),
            close_source: false,
        }),
    );
    let Reply::Open(OpenReply { handle: client_port }) = response.reply else {
        panic!("duplicate failed: {:?}", response.status);
    };

    let blocked = {
        let server = server.clone();
        thread::spawn(move || select(&server, client_tid, client_port))
    };
    wait_until_blocked(&server, client_tid);

    // The owner leaving does not disturb the client's wait.
    server.terminate_process(owner).unwrap();
    assert!(server.engine().is_waiting(client_tid));
    assert!(server.namespace().lookup(None, "\\BaseNamedObjects\\shared").is_ok());

    let poster = server.new_thread(client).unwrap();
    assert_eq!(post(&server, poster, client_port, 9), Status::Success);
    let (status, _) = blocked.join().unwrap();
    assert_eq!(status, Status::Success);

    server.terminate_process(client).unwrap();
    assert!(server.namespace().lookup(None, "\\BaseNamedObjects\\shared").is_err());
}

/// Test a child process inherits only inheritable handles
#[test]
fn test_child_inherits_port_handle() {
    let (server, parent, tid) = start();
    let inherited = create_port(&server, tid, "", ObjAttributes::INHERIT);
    let private = create_port(&server, tid, "", ObjAttributes::empty());

    let child = server.new_process(Some(parent), true).unwrap();
    let child_tid = server.new_thread(child).unwrap();

    assert_eq!(post(&server, child_tid, inherited, 1), Status::Success);
    assert_eq!(post(&server, child_tid, private, 1), Status::InvalidHandle);

    let response = server.handle_request(tid, &Request::QueryCompletion(QueryCompletionRequest { handle: inherited }));
    assert!(matches!(response.reply, Reply::QueryCompletion(QueryCompletionReply { depth: 1, .. })));
}

/// Test closing a handle through the server cancels waits issued through it
#[test]
fn test_close_handle_request_cancels_wait() {
    let (server, pid, tid) = start();
    let port = create_port(&server, tid, "", ObjAttributes::empty());
    let waiter = server.new_thread(pid).unwrap();

    let blocked = {
        let server = server.clone();
        thread::spawn(move || select(&server, waiter, port))
    };
    wait_until_blocked(&server, waiter);

    let response = server.handle_request(tid, &Request::CloseHandle(CloseHandleRequest { handle: port }));
    assert_eq!(response.status, Status::Success);

    let (status, _) = blocked.join().unwrap();
    assert_eq!(status, Status::Cancelled);
}

/// Test a named port stays linked while any process holds a handle to it
#[test]
fn test_named_port_stays_linked_while_open() {
    const NAME: &str = "\\BaseNamedObjects\\contended";
    const ROUNDS: usize = 20_000;
    let server = Arc::new(Server::new(ServerConfig::default()).expect("Failed to start server"));

    let clients = (0..2)
        .map(|_| {
            let server = server.clone();
            let pid = server.new_process(None, false).unwrap();
            let tid = server.new_thread(pid).unwrap();
            thread::spawn(move || {
                let process = server.process(pid).unwrap();
                let mut unlinked = 0;
                for _ in 0..ROUNDS {
                    let handle = create_port(&server, tid, NAME, ObjAttributes::empty());
                    let mine = process.get_object(handle, AccessMask::empty(), None).unwrap();
                    match server.namespace().lookup(None, NAME) {
                        Ok(linked) if linked.ptr_eq(&mine) => {}
                        _ => unlinked += 1,
                    }
                    drop(mine);
                    let response = server.handle_request(tid, &Request::CloseHandle(CloseHandleRequest { handle }));
                    assert_eq!(response.status, Status::Success);
                }
                unlinked
            })
        })
        .collect::<Vec<_>>();

    let unlinked: usize = clients.into_iter().map(|c| c.join().unwrap()).sum();
    assert_eq!(unlinked, 0);
    assert!(server.namespace().lookup(None, NAME).is_err());
}
