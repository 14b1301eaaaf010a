//! Completion port requests
//!
//! | Request          | Access needed                | Reply                 |
//! |------------------|------------------------------|-----------------------|
//! | CreateCompletion | (requested)                  | handle + disposition  |
//! | OpenCompletion   | (requested)                  | handle                |
//! | AddCompletion    | `IO_COMPLETION_MODIFY_STATE` | -                     |
//! | RemoveCompletion | `IO_COMPLETION_MODIFY_STATE` | packet or `Pending`   |
//! | QueryCompletion  | `IO_COMPLETION_QUERY_STATE`  | depth + concurrency   |

use serde::{Deserialize, Serialize};
use uk_kobject::requests::{create_object, open_object, CreateReply, OpenReply};
use uk_kobject::{
    AccessMask, Handle, ObjAttributes, ObjectError, ObjectRef, ObjectType, Process, RequestContext, Result,
    SecurityDescriptor, WaitEngine,
};

use crate::packet::CompletionPacket;
use crate::port::{CompletionPort, IO_COMPLETION_MODIFY_STATE, IO_COMPLETION_QUERY_STATE};

fn no_attributes() -> ObjAttributes {
    ObjAttributes::empty()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCompletionRequest {
    #[serde(default)]
    pub rootdir: Handle,
    #[serde(default)]
    pub name: String,
    #[serde(default = "no_attributes")]
    pub attributes: ObjAttributes,
    pub access: AccessMask,
    #[serde(default)]
    pub concurrent: u32,
    #[serde(default)]
    pub sd: Option<SecurityDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCompletionRequest {
    #[serde(default)]
    pub rootdir: Handle,
    pub name: String,
    #[serde(default = "no_attributes")]
    pub attributes: ObjAttributes,
    pub access: AccessMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddCompletionRequest {
    pub handle: Handle,
    #[serde(default)]
    pub key: u64,
    #[serde(default)]
    pub value: u64,
    #[serde(default)]
    pub status: u32,
    #[serde(default)]
    pub information: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveCompletionRequest {
    pub handle: Handle,
}

/// Outcome of a remove; an empty port is not an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoveCompletionReply {
    Packet(CompletionPacket),
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCompletionRequest {
    pub handle: Handle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCompletionReply {
    pub depth: u32,
    pub concurrency: u32,
}

/// Resolve a handle to a completion port with the given access
pub fn get_completion_obj(process: &Process, handle: Handle, access: AccessMask) -> Result<ObjectRef> {
    process.get_object(handle, access, Some(ObjectType::Completion))
}

/// Queue a packet on a port and wake at most one waiter
///
/// Entry point for other object kinds that finish asynchronous IO.
pub fn post_completion(engine: &WaitEngine, object: &ObjectRef, packet: CompletionPacket) -> Result<()> {
    port_of(object)?.post(packet)?;
    log::trace!("posted key {:#x} to {}", packet.key, object.id());
    engine.signal(object, 1);
    Ok(())
}

fn port_of(object: &ObjectRef) -> Result<&CompletionPort> {
    object.downcast::<CompletionPort>().ok_or(ObjectError::TypeMismatch {
        expected: ObjectType::Completion,
        found: object.object_type(),
    })
}

pub fn create_completion(ctx: &RequestContext<'_>, req: &CreateCompletionRequest) -> Result<CreateReply> {
    let capacity = ctx.config.completion.max_pending_packets;
    let reply = create_object(
        ctx,
        req.rootdir,
        &req.name,
        req.attributes,
        req.access,
        req.sd.clone(),
        ObjectType::Completion,
        || CompletionPort::new(req.concurrent, capacity),
    )?;
    log::debug!("{}: completion \"{}\" -> {} ({:?})", ctx.process.id(), req.name, reply.handle, reply.disposition);
    Ok(reply)
}

pub fn open_completion(ctx: &RequestContext<'_>, req: &OpenCompletionRequest) -> Result<OpenReply> {
    open_object(ctx, req.rootdir, &req.name, req.attributes, req.access, ObjectType::Completion)
}

pub fn add_completion(ctx: &RequestContext<'_>, req: &AddCompletionRequest) -> Result<()> {
    let object = get_completion_obj(ctx.process, req.handle, IO_COMPLETION_MODIFY_STATE)?;
    let packet = CompletionPacket::new(req.key, req.value, req.status, req.information);
    post_completion(ctx.engine, &object, packet)
}

pub fn remove_completion(ctx: &RequestContext<'_>, req: &RemoveCompletionRequest) -> Result<RemoveCompletionReply> {
    let object = get_completion_obj(ctx.process, req.handle, IO_COMPLETION_MODIFY_STATE)?;
    Ok(match port_of(&object)?.remove() {
        Some(packet) => RemoveCompletionReply::Packet(packet),
        None => RemoveCompletionReply::Pending,
    })
}

pub fn query_completion(ctx: &RequestContext<'_>, req: &QueryCompletionRequest) -> Result<QueryCompletionReply> {
    let object = get_completion_obj(ctx.process, req.handle, IO_COMPLETION_QUERY_STATE)?;
    let port = port_of(&object)?;
    Ok(QueryCompletionReply {
        depth: port.depth(),
        concurrency: port.concurrency(),
    })
}
