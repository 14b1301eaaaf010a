//! Generic request handlers
//!
//! Requests every object kind shares: handle management, waiting, directory
//! creation, security descriptors and diagnostics. Also the create/open
//! helpers object kinds build their own named-object requests on.
//!
//! Handlers return `Result<Reply>`; the server turns the outcome into the
//! per-request status.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::access::AccessMask;
use crate::context::RequestContext;
use crate::directory::{Disposition, ObjAttributes};
use crate::error::{ObjectError, Result};
use crate::handle::{Handle, HandleAttributes};
use crate::object::{ObjectOps, ObjectType};
use crate::process::{Process, ProcessId};
use crate::security::SecurityDescriptor;
use crate::wait::{WaitMode, WaitStatus, WaitTarget};

/// Reply of every create-or-open request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReply {
    pub handle: Handle,
    pub disposition: Disposition,
}

/// Reply of every open request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenReply {
    pub handle: Handle,
}

/// Create-or-open a named object and return a handle to it
#[allow(clippy::too_many_arguments)]
pub fn create_object<T, F>(
    ctx: &RequestContext<'_>,
    rootdir: Handle,
    name: &str,
    attributes: ObjAttributes,
    access: AccessMask,
    sd: Option<SecurityDescriptor>,
    object_type: ObjectType,
    make: F,
) -> Result<CreateReply>
where
    T: ObjectOps,
    F: FnOnce() -> T,
{
    let root = ctx.root_directory(rootdir)?;
    let (object, disposition) = ctx
        .namespace
        .create_for_handle(root.as_ref(), name, attributes, object_type, make)?;

    if disposition == Disposition::Created {
        if let Some(sd) = sd {
            object.set_security_descriptor(sd)?;
        }
    }

    let handle = ctx.open_handle(object, access, attributes)?;
    Ok(CreateReply { handle, disposition })
}

/// Open an existing named object of the given type
pub fn open_object(
    ctx: &RequestContext<'_>,
    rootdir: Handle,
    name: &str,
    attributes: ObjAttributes,
    access: AccessMask,
    object_type: ObjectType,
) -> Result<OpenReply> {
    let root = ctx.root_directory(rootdir)?;
    let object = ctx
        .namespace
        .open_for_handle(root.as_ref(), name, Some(object_type))?;
    let handle = ctx.open_handle(object, access, attributes)?;
    Ok(OpenReply { handle })
}

// ============================================================================
// Handles
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseHandleRequest {
    pub handle: Handle,
}

/// Close a handle and cancel every wait issued through it
pub fn close_handle(ctx: &RequestContext<'_>, req: &CloseHandleRequest) -> Result<()> {
    ctx.process.close_handle(req.handle)?;
    let cancelled = ctx.engine.cancel_handle(ctx.process.id(), req.handle);
    if cancelled > 0 {
        log::debug!("closing {} cancelled {} wait(s)", req.handle, cancelled);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateHandleRequest {
    pub handle: Handle,
    /// Process receiving the duplicate; `None` is the caller
    #[serde(default)]
    pub target: Option<ProcessId>,
    /// Access of the new handle; `None` keeps the source handle's access
    #[serde(default)]
    pub access: Option<AccessMask>,
    #[serde(default = "no_handle_attributes")]
    pub attributes: HandleAttributes,
    /// Close the source handle once the duplicate exists
    #[serde(default)]
    pub close_source: bool,
}

fn no_handle_attributes() -> HandleAttributes {
    HandleAttributes::empty()
}

/// Duplicate a handle of the calling process into `target`
///
/// `target` is the process named by the request, resolved by the caller.
pub fn duplicate_handle(ctx: &RequestContext<'_>, target: &Process, req: &DuplicateHandleRequest) -> Result<OpenReply> {
    let (granted, _) = ctx.process.handle_info(req.handle)?;
    let object = ctx.get_object(req.handle, AccessMask::empty(), None)?;

    let access = match req.access {
        None => granted,
        Some(access) => {
            let access = object.map_access(access);
            if !granted.contains(access) {
                log::warn!("duplicate of {} requests more than the source grants", req.handle);
                return Err(ObjectError::AccessDenied { requested: access, granted });
            }
            access
        }
    };

    if req.close_source {
        ctx.process.check_closable(req.handle)?;
    }
    let handle = target.alloc_handle(object, access, req.attributes)?;
    if req.close_source {
        if let Err(err) = close_handle(ctx, &CloseHandleRequest { handle: req.handle }) {
            // The source changed under us; the caller never sees the duplicate.
            target.discard_handle(handle);
            return Err(err);
        }
    }
    Ok(OpenReply { handle })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeTemporaryRequest {
    pub handle: Handle,
}

/// Clear the permanent flag of a named object
pub fn make_temporary(ctx: &RequestContext<'_>, req: &MakeTemporaryRequest) -> Result<()> {
    let object = ctx.get_object(req.handle, AccessMask::DELETE, None)?;
    object.make_temporary();
    Ok(())
}

// ============================================================================
// Waiting
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectRequest {
    pub handles: Vec<Handle>,
    #[serde(default)]
    pub mode: WaitMode,
    /// `None` waits forever, `Some(0)` polls
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectReply {
    pub status: WaitStatus,
}

/// Block the calling thread on a set of handles
pub fn select(ctx: &RequestContext<'_>, req: &SelectRequest) -> Result<SelectReply> {
    let pid = ctx.process.id();
    let targets = req
        .handles
        .iter()
        .map(|&handle| {
            ctx.get_object(handle, AccessMask::SYNCHRONIZE, None)
                .map(|object| WaitTarget::via_handle(object, pid, handle))
        })
        .collect::<Result<Vec<_>>>()?;

    let timeout = req.timeout_ms.map(Duration::from_millis);
    let status = ctx.engine.wait(ctx.thread, &targets, req.mode, timeout)?;
    Ok(SelectReply { status })
}

// ============================================================================
// Directories
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDirectoryRequest {
    #[serde(default)]
    pub rootdir: Handle,
    pub name: String,
    #[serde(default = "no_attributes")]
    pub attributes: ObjAttributes,
    pub access: AccessMask,
    #[serde(default)]
    pub sd: Option<SecurityDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDirectoryRequest {
    #[serde(default)]
    pub rootdir: Handle,
    pub name: String,
    #[serde(default = "no_attributes")]
    pub attributes: ObjAttributes,
    pub access: AccessMask,
}

pub(crate) fn no_attributes() -> ObjAttributes {
    ObjAttributes::empty()
}

pub fn create_directory(ctx: &RequestContext<'_>, req: &CreateDirectoryRequest) -> Result<CreateReply> {
    create_object(
        ctx,
        req.rootdir,
        &req.name,
        req.attributes,
        req.access,
        req.sd.clone(),
        ObjectType::Directory,
        crate::directory::Directory::new,
    )
}

pub fn open_directory(ctx: &RequestContext<'_>, req: &OpenDirectoryRequest) -> Result<OpenReply> {
    open_object(ctx, req.rootdir, &req.name, req.attributes, req.access, ObjectType::Directory)
}

// ============================================================================
// Security
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetSecurityRequest {
    pub handle: Handle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetSecurityReply {
    pub sd: Option<SecurityDescriptor>,
}

pub fn get_security(ctx: &RequestContext<'_>, req: &GetSecurityRequest) -> Result<GetSecurityReply> {
    let object = ctx.get_object(req.handle, AccessMask::READ_CONTROL, None)?;
    Ok(GetSecurityReply {
        sd: object.security_descriptor(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSecurityRequest {
    pub handle: Handle,
    pub sd: SecurityDescriptor,
}

pub fn set_security(ctx: &RequestContext<'_>, req: &SetSecurityRequest) -> Result<()> {
    let object = ctx.get_object(req.handle, AccessMask::WRITE_DAC, None)?;
    object.set_security_descriptor(req.sd.clone())
}

// ============================================================================
// Diagnostics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpObjectRequest {
    pub handle: Handle,
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpObjectReply {
    pub text: String,
}

pub fn dump_object(ctx: &RequestContext<'_>, req: &DumpObjectRequest) -> Result<DumpObjectReply> {
    let object = ctx.get_object(req.handle, AccessMask::empty(), None)?;
    Ok(DumpObjectReply {
        text: object.dump(req.verbose),
    })
}
