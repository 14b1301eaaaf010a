//! Kernel Object Model
//!
//! Every server-side resource is a [`KernelObject`]: a common header (id,
//! name, security descriptor, handle count, wait queue) wrapped around a
//! type-specific body that implements the [`ObjectOps`] operation table.
//!
//! ## Ownership
//!
//! Objects are only ever reached through counted [`ObjectRef`]s. Handles,
//! directory entries and in-flight requests each hold one; the object is
//! destroyed synchronously, exactly once, when the last one is dropped.
//!
//! ```text
//! ObjectRef ──┐
//! ObjectRef ──┼──> KernelObject { header.., body: Box<dyn ObjectOps> }
//! Directory ──┘          ▲
//! WaitEngine ─ ─ weak ─ ─┘
//! ```
//!
//! The wait engine and child objects (pointing at their parent directory)
//! hold [`WeakObjectRef`]s so they never keep an object alive.

use core::any::Any;
use core::fmt;
use core::ops::Deref;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use spin::Mutex;
use static_assertions::assert_impl_all;

use crate::access::{AccessMask, GenericMapping};
use crate::error::{ObjectError, Result};
use crate::handle::Handle;
use crate::process::ProcessId;
use crate::security::SecurityDescriptor;
use crate::wait::{WaitEntry, WaitQueue, WaiterId};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Server-wide unique object identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Canonical object type identity
///
/// One variant per object kind the server hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    /// Namespace directory
    Directory,
    /// IO completion port
    Completion,
    /// Waitable object used by unit tests
    #[cfg(test)]
    Test,
}

impl ObjectType {
    /// Type name as reported to clients
    pub fn name(self) -> &'static str {
        match self {
            ObjectType::Directory => "Directory",
            ObjectType::Completion => "Completion",
            #[cfg(test)]
            ObjectType::Test => "Test",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-type operation table
///
/// Defaults describe an object that cannot be waited on, has only standard
/// rights and no naming behaviour of its own.
pub trait ObjectOps: Any + Send + Sync {
    /// Canonical type identity
    fn object_type(&self) -> ObjectType;

    /// Type-specific part of the diagnostic dump
    fn dump(&self, verbose: bool) -> String;

    /// Register a waiter on this object
    fn add_queue(&self, queue: &mut WaitQueue, entry: WaitEntry) -> Result<()> {
        queue.push(entry);
        Ok(())
    }

    /// Deregister a waiter
    fn remove_queue(&self, queue: &mut WaitQueue, waiter: WaiterId) {
        queue.remove(waiter);
    }

    /// Can a wait on this object currently be satisfied?
    fn signaled(&self) -> bool {
        false
    }

    /// Runs once a wait on this object has completed
    fn satisfied(&self) {}

    /// Explicit signal request from a client
    fn signal(&self, _access: AccessMask) -> Result<()> {
        Err(ObjectError::NotSupported(self.object_type()))
    }

    /// Expand generic access bits to this type's rights
    fn map_access(&self, access: AccessMask) -> AccessMask {
        GenericMapping::STANDARD.map(access)
    }

    fn get_sd(&self, stored: Option<&SecurityDescriptor>) -> Option<SecurityDescriptor> {
        stored.cloned()
    }

    fn set_sd(&self, stored: &mut Option<SecurityDescriptor>, sd: SecurityDescriptor) -> Result<()> {
        *stored = Some(sd);
        Ok(())
    }

    /// Resolve one path component below this object
    fn lookup_name(&self, _component: &str) -> Result<Option<ObjectRef>> {
        Err(ObjectError::NotSupported(self.object_type()))
    }

    fn open_file(&self, _access: AccessMask) -> Result<ObjectRef> {
        Err(ObjectError::NotSupported(self.object_type()))
    }

    /// Veto hook consulted before a handle is closed
    fn close_handle(&self, _process: ProcessId, _handle: Handle) -> bool {
        true
    }

    /// Teardown, run exactly once when the last reference is dropped
    fn destroy(&mut self) {}

    fn as_any(&self) -> &dyn Any;
}

struct ObjectName {
    name: String,
    parent: Option<WeakObjectRef>,
}

/// Object header plus type-specific body
pub struct KernelObject {
    id: ObjectId,
    name: Mutex<Option<ObjectName>>,
    sd: Mutex<Option<SecurityDescriptor>>,
    handle_count: AtomicUsize,
    /// Opens by name that found the object but have no handle yet
    pending_opens: AtomicUsize,
    permanent: AtomicBool,
    wait_queue: Mutex<WaitQueue>,
    body: Box<dyn ObjectOps>,
}

impl KernelObject {
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn object_type(&self) -> ObjectType {
        self.body.object_type()
    }

    /// Number of open handles (all processes)
    #[inline]
    pub fn handle_count(&self) -> usize {
        self.handle_count.load(Ordering::Acquire)
    }

    /// Leaf name, if the object is linked into the namespace
    pub fn name(&self) -> Option<String> {
        self.name.lock().as_ref().map(|n| n.name.clone())
    }

    /// Absolute namespace path, e.g. `\BaseNamedObjects\port`
    pub fn full_name(&self) -> Option<String> {
        let (leaf, mut parent) = {
            let guard = self.name.lock();
            let entry = guard.as_ref()?;
            (entry.name.clone(), entry.parent.as_ref().and_then(WeakObjectRef::upgrade))
        };

        let mut components = vec![leaf];
        while let Some(dir) = parent {
            let guard = dir.name.lock();
            match guard.as_ref() {
                Some(entry) => {
                    components.push(entry.name.clone());
                    let next = entry.parent.as_ref().and_then(WeakObjectRef::upgrade);
                    drop(guard);
                    parent = next;
                }
                None => break,
            }
        }

        components.reverse();
        Some(format!("\\{}", components.join("\\")))
    }

    /// Permanent objects stay in the namespace without open handles
    #[inline]
    pub fn is_permanent(&self) -> bool {
        self.permanent.load(Ordering::Acquire)
    }

    pub fn make_permanent(&self) {
        self.permanent.store(true, Ordering::Release);
    }

    /// Clear the permanent flag; unlinks immediately when no handle is open
    pub fn make_temporary(&self) {
        self.permanent.store(false, Ordering::Release);
        self.unlink_if_unused();
    }

    /// No handle, no open in progress, not permanent
    pub fn is_unused(&self) -> bool {
        self.handle_count() == 0 && self.pending_opens.load(Ordering::Acquire) == 0 && !self.is_permanent()
    }

    /// Drop the namespace entry of a named object nobody holds a handle to
    ///
    /// The condition is checked again under the parent directory's lock,
    /// which lookups hold while they pin the object for an open.
    pub fn unlink_if_unused(&self) {
        if self.is_unused() {
            self.unlink();
        }
    }

    /// Diagnostic text: type, name and body state
    pub fn dump(&self, verbose: bool) -> String {
        let name = self.full_name().map(|n| format!("\"{}\" ", n)).unwrap_or_default();
        format!("{} {}{}", self.object_type(), name, self.body.dump(verbose))
    }

    #[inline]
    pub fn signaled(&self) -> bool {
        self.body.signaled()
    }

    #[inline]
    pub fn satisfied(&self) {
        self.body.satisfied()
    }

    #[inline]
    pub fn signal(&self, access: AccessMask) -> Result<()> {
        self.body.signal(access)
    }

    #[inline]
    pub fn map_access(&self, access: AccessMask) -> AccessMask {
        self.body.map_access(access)
    }

    #[inline]
    pub fn lookup_name(&self, component: &str) -> Result<Option<ObjectRef>> {
        self.body.lookup_name(component)
    }

    #[inline]
    pub fn open_file(&self, access: AccessMask) -> Result<ObjectRef> {
        self.body.open_file(access)
    }

    #[inline]
    pub fn close_handle(&self, process: ProcessId, handle: Handle) -> bool {
        self.body.close_handle(process, handle)
    }

    pub fn security_descriptor(&self) -> Option<SecurityDescriptor> {
        let stored = self.sd.lock();
        self.body.get_sd(stored.as_ref())
    }

    pub fn set_security_descriptor(&self, sd: SecurityDescriptor) -> Result<()> {
        let mut stored = self.sd.lock();
        self.body.set_sd(&mut stored, sd)
    }

    pub fn add_queue(&self, entry: WaitEntry) -> Result<()> {
        let mut queue = self.wait_queue.lock();
        self.body.add_queue(&mut queue, entry)
    }

    pub fn remove_queue(&self, waiter: WaiterId) {
        let mut queue = self.wait_queue.lock();
        self.body.remove_queue(&mut queue, waiter);
    }

    /// Snapshot of registered waiters in FIFO order
    pub fn waiters(&self) -> Vec<WaiterId> {
        self.wait_queue.lock().iter().map(|entry| entry.waiter).collect()
    }

    #[inline]
    pub fn waiter_count(&self) -> usize {
        self.wait_queue.lock().len()
    }

    /// Typed access to the body
    pub fn downcast<T: ObjectOps>(&self) -> Option<&T> {
        self.body.as_any().downcast_ref::<T>()
    }

    pub(crate) fn set_name(&self, name: &str, parent: &ObjectRef) {
        *self.name.lock() = Some(ObjectName {
            name: name.to_string(),
            parent: Some(parent.downgrade()),
        });
    }

    pub(crate) fn handle_opened(&self) {
        self.handle_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn handle_closed(&self) {
        let previous = self.handle_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "handle count underflow on {}", self.id);
        if previous == 1 {
            self.unlink_if_unused();
        }
    }

    /// Called with the parent directory locked
    pub(crate) fn open_started(&self) {
        self.pending_opens.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn open_finished(&self) {
        let previous = self.pending_opens.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "pending open underflow on {}", self.id);
    }

    pub(crate) fn clear_name(&self) {
        self.name.lock().take();
    }

    /// Remove this object's entry from its parent directory if still unused
    fn unlink(&self) {
        let (name, parent) = {
            let guard = self.name.lock();
            let Some(entry) = guard.as_ref() else {
                return;
            };
            (entry.name.clone(), entry.parent.as_ref().and_then(WeakObjectRef::upgrade))
        };
        match parent {
            Some(parent) => crate::directory::remove_entry(&parent, &name, self),
            None => self.clear_name(),
        }
    }
}

impl Drop for KernelObject {
    fn drop(&mut self) {
        log::debug!("destroying {} object {}", self.body.object_type(), self.id);
        self.body.destroy();
    }
}

/// Counted reference to a kernel object
#[derive(Clone)]
pub struct ObjectRef(Arc<KernelObject>);

impl ObjectRef {
    /// Allocate a fresh, unnamed object
    pub fn new<T: ObjectOps>(body: T) -> Self {
        let object = KernelObject {
            id: ObjectId::next(),
            name: Mutex::new(None),
            sd: Mutex::new(None),
            handle_count: AtomicUsize::new(0),
            pending_opens: AtomicUsize::new(0),
            permanent: AtomicBool::new(false),
            wait_queue: Mutex::new(WaitQueue::new()),
            body: Box::new(body),
        };
        log::debug!("created {} object {}", object.object_type(), object.id);
        Self(Arc::new(object))
    }

    /// Number of counted references (handles, directory entries, requests)
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    #[inline]
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    #[inline]
    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Arc::downgrade(&self.0))
    }

    /// Fail unless the object has the expected type
    pub fn expect_type(&self, expected: ObjectType) -> Result<()> {
        let found = self.object_type();
        if found != expected {
            return Err(ObjectError::TypeMismatch { expected, found });
        }
        Ok(())
    }
}

impl Deref for ObjectRef {
    type Target = KernelObject;

    fn deref(&self) -> &KernelObject {
        &self.0
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("id", &self.id)
            .field("type", &self.object_type())
            .field("refs", &self.ref_count())
            .field("handles", &self.handle_count())
            .finish()
    }
}

/// Non-owning reference; upgrading fails once the object is destroyed
#[derive(Clone)]
pub struct WeakObjectRef(Weak<KernelObject>);

impl WeakObjectRef {
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }

    /// True once the object has been destroyed
    pub fn is_dead(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakObjectRef(alive: {})", !self.is_dead())
    }
}

assert_impl_all!(ObjectRef: Send, Sync, Clone);
assert_impl_all!(WeakObjectRef: Send, Sync);
