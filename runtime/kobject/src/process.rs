//! Processes and threads
//!
//! The server only needs the parts of a process that own handles, and the
//! identity of threads so waits can be attributed and cancelled.

use core::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use spin::Mutex;

use crate::access::AccessMask;
use crate::error::Result;
use crate::handle::{Handle, HandleAttributes, HandleEntry, HandleTable};
use crate::object::{ObjectRef, ObjectType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(u32);

impl ProcessId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process {:04x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(u32);

impl ThreadId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread {:04x}", self.0)
    }
}

/// A client process and its handle table
pub struct Process {
    id: ProcessId,
    parent: Option<ProcessId>,
    handles: Mutex<HandleTable>,
}

impl Process {
    pub fn new(id: ProcessId, parent: Option<ProcessId>, handle_limit: usize) -> Self {
        Self {
            id,
            parent,
            handles: Mutex::new(HandleTable::new(id, handle_limit)),
        }
    }

    /// Create a child whose table starts with the parent's inheritable handles
    pub fn new_inheriting(id: ProcessId, parent: &Process, handle_limit: usize) -> Self {
        let table = parent.handles.lock().inherit(id, handle_limit);
        Self {
            id,
            parent: Some(parent.id),
            handles: Mutex::new(table),
        }
    }

    #[inline]
    pub fn id(&self) -> ProcessId {
        self.id
    }

    #[inline]
    pub fn parent(&self) -> Option<ProcessId> {
        self.parent
    }

    pub fn handle_count(&self) -> usize {
        self.handles.lock().count()
    }

    pub fn alloc_handle(&self, object: ObjectRef, access: AccessMask, attributes: HandleAttributes) -> Result<Handle> {
        self.handles.lock().alloc(object, access, attributes)
    }

    /// Resolve a handle with the given access and optional type
    pub fn get_object(&self, handle: Handle, access: AccessMask, expected: Option<ObjectType>) -> Result<ObjectRef> {
        self.handles.lock().get(handle, access, expected)
    }

    /// Granted access and attributes of a handle
    pub fn handle_info(&self, handle: Handle) -> Result<(AccessMask, HandleAttributes)> {
        let table = self.handles.lock();
        let entry = table.entry(handle)?;
        Ok((entry.access(), entry.attributes()))
    }

    pub fn set_handle_attributes(&self, handle: Handle, attributes: HandleAttributes) -> Result<()> {
        self.handles.lock().set_attributes(handle, attributes)
    }

    /// Close a handle; the object reference is released after the table lock
    pub fn close_handle(&self, handle: Handle) -> Result<()> {
        let entry: HandleEntry = self.handles.lock().close(handle)?;
        drop(entry);
        Ok(())
    }

    /// Fail unless `handle` may be closed right now
    pub fn check_closable(&self, handle: Handle) -> Result<()> {
        self.handles.lock().check_closable(handle)
    }

    /// Remove a handle the client never learned about, ignoring protection
    pub(crate) fn discard_handle(&self, handle: Handle) {
        let entry = self.handles.lock().take(handle);
        drop(entry);
    }

    /// Close every handle (process exit); returns the handles that were open
    pub fn close_all_handles(&self) -> Vec<Handle> {
        let (handles, entries) = {
            let mut table = self.handles.lock();
            let handles = table.iter().map(|(handle, _)| handle).collect::<Vec<_>>();
            (handles, table.drain())
        };
        drop(entries);
        handles
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("handles", &self.handle_count())
            .finish()
    }
}

/// A client thread; requests are issued on behalf of one
#[derive(Debug, Clone)]
pub struct Thread {
    id: ThreadId,
    process: Arc<Process>,
}

impl Thread {
    pub fn new(id: ThreadId, process: Arc<Process>) -> Self {
        Self { id, process }
    }

    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::tests::TestObject;

    #[test]
    fn test_close_all_handles() {
        let process = Process::new(ProcessId::new(1), None, 16);
        let object = ObjectRef::new(TestObject::new());
        let h1 = process.alloc_handle(object.clone(), AccessMask::empty(), HandleAttributes::empty()).unwrap();
        let h2 = process.alloc_handle(object.clone(), AccessMask::empty(), HandleAttributes::empty()).unwrap();

        assert_eq!(process.close_all_handles(), vec![h1, h2]);
        assert_eq!(process.handle_count(), 0);
        assert_eq!(object.handle_count(), 0);
        assert_eq!(object.ref_count(), 1);
    }

    #[test]
    fn test_child_inherits_handles() {
        let parent = Process::new(ProcessId::new(1), None, 16);
        let object = ObjectRef::new(TestObject::new());
        let handle = parent
            .alloc_handle(object.clone(), AccessMask::SYNCHRONIZE, HandleAttributes::INHERIT)
            .unwrap();

        let child = Process::new_inheriting(ProcessId::new(2), &parent, 16);
        assert_eq!(child.parent(), Some(ProcessId::new(1)));
        let inherited = child.get_object(handle, AccessMask::SYNCHRONIZE, None).unwrap();
        assert!(inherited.ptr_eq(&object));
    }
}
