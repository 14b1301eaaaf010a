//! Per-request context
//!
//! Everything a request handler may touch: the namespace, the wait engine,
//! the calling process and thread, and the server configuration.

use crate::access::AccessMask;
use crate::config::ServerConfig;
use crate::directory::{Namespace, ObjAttributes, PendingOpen};
use crate::error::Result;
use crate::handle::{Handle, HandleAttributes};
use crate::object::{ObjectRef, ObjectType};
use crate::process::{Process, ThreadId};
use crate::security;
use crate::wait::WaitEngine;

#[derive(Clone, Copy)]
pub struct RequestContext<'a> {
    pub namespace: &'a Namespace,
    pub engine: &'a WaitEngine,
    pub process: &'a Process,
    pub thread: ThreadId,
    pub config: &'a ServerConfig,
}

impl<'a> RequestContext<'a> {
    /// Resolve a handle of the calling process
    pub fn get_object(&self, handle: Handle, access: AccessMask, expected: Option<ObjectType>) -> Result<ObjectRef> {
        self.process.get_object(handle, access, expected)
    }

    /// Resolve the optional root directory of a named request
    ///
    /// The root is looked up without any access requirement.
    pub fn root_directory(&self, rootdir: Handle) -> Result<Option<ObjectRef>> {
        if rootdir.is_null() {
            return Ok(None);
        }
        self.get_object(rootdir, AccessMask::empty(), Some(ObjectType::Directory))
            .map(Some)
    }

    /// Access granted to the caller for `desired` on `object`
    pub fn grant_access(&self, object: &ObjectRef, desired: AccessMask) -> Result<AccessMask> {
        let mapped = object.map_access(desired);
        let all = object.map_access(AccessMask::GENERIC_ALL);
        let sd = object.security_descriptor();
        security::check_access(sd.as_ref(), self.process.id(), mapped, all)
    }

    /// Access-check a pinned object and give the caller a handle to it
    ///
    /// The pin is released once the handle exists. A freshly named object
    /// that ends up without any handle is unlinked again, so a failed request
    /// leaves the namespace unchanged.
    pub fn open_handle(&self, object: PendingOpen, desired: AccessMask, attributes: ObjAttributes) -> Result<Handle> {
        let mut handle_attributes = HandleAttributes::empty();
        if attributes.contains(ObjAttributes::INHERIT) {
            handle_attributes |= HandleAttributes::INHERIT;
        }

        let granted = self.grant_access(&object, desired)?;
        self.process
            .alloc_handle(object.object().clone(), granted, handle_attributes)
    }
}
