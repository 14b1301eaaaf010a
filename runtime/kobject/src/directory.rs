//! Object Namespace
//!
//! Hierarchical, case-insensitive namespace of named objects. Directories are
//! kernel objects themselves; an entry holds a counted reference to the named
//! object, while the object only keeps a weak reference back to its parent.
//!
//! ## Paths
//!
//! ```text
//! \BaseNamedObjects\my_port
//! │ └──────┬──────┘ └──┬──┘
//! root   directory    leaf
//! ```
//!
//! Without a root directory a path is resolved from the namespace root (the
//! leading `\` is optional). With a root directory the path is relative and
//! must not start with `\`. Every intermediate component must be an existing
//! directory.
//!
//! ## Create-or-Open
//!
//! | Entry        | Result                             |
//! |--------------|------------------------------------|
//! | absent       | new object inserted, `Created`     |
//! | same type    | existing object, `AlreadyExists`   |
//! | other type   | `NameCollisionWrongType`           |

use core::any::Any;
use core::ops::Deref;
use std::collections::BTreeMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use spin::Mutex;

use crate::access::{AccessMask, GenericMapping};
use crate::error::{ObjectError, Result};
use crate::object::{KernelObject, ObjectOps, ObjectRef, ObjectType};
use crate::wait::{WaitEntry, WaitQueue};

/// List the directory
pub const DIRECTORY_QUERY: AccessMask = AccessMask::specific(0x1);
/// Resolve names through the directory
pub const DIRECTORY_TRAVERSE: AccessMask = AccessMask::specific(0x2);
/// Insert objects
pub const DIRECTORY_CREATE_OBJECT: AccessMask = AccessMask::specific(0x4);
/// Insert subdirectories
pub const DIRECTORY_CREATE_SUBDIRECTORY: AccessMask = AccessMask::specific(0x8);
pub const DIRECTORY_ALL_ACCESS: AccessMask = AccessMask::STANDARD_RIGHTS_REQUIRED.union(AccessMask::specific(0xF));

const DIRECTORY_MAPPING: GenericMapping = GenericMapping {
    read: AccessMask::STANDARD_RIGHTS_READ
        .union(DIRECTORY_QUERY)
        .union(DIRECTORY_TRAVERSE),
    write: AccessMask::STANDARD_RIGHTS_WRITE
        .union(DIRECTORY_CREATE_OBJECT)
        .union(DIRECTORY_CREATE_SUBDIRECTORY),
    execute: AccessMask::STANDARD_RIGHTS_EXECUTE
        .union(DIRECTORY_QUERY)
        .union(DIRECTORY_TRAVERSE),
    all: DIRECTORY_ALL_ACCESS,
};

bitflags! {
    /// Object attributes passed with create/open requests
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ObjAttributes: u32 {
        /// Handle is inherited by child processes
        const INHERIT = 0x0002;
        /// Object stays named without open handles
        const PERMANENT = 0x0010;
        const EXCLUSIVE = 0x0020;
        /// Names are always compared case-insensitively; accepted for compatibility
        const CASE_INSENSITIVE = 0x0040;
        const OPENIF = 0x0080;
        const OPENLINK = 0x0100;
    }
}

/// Outcome of a create-or-open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    Created,
    AlreadyExists,
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}

/// Directory object body
#[derive(Default)]
pub struct Directory {
    entries: Mutex<BTreeMap<String, ObjectRef>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of the entries, ordered by folded name
    pub fn children(&self) -> Vec<ObjectRef> {
        self.entries.lock().values().cloned().collect()
    }

    fn get(&self, name: &str) -> Option<ObjectRef> {
        self.entries.lock().get(&fold(name)).cloned()
    }

    /// Look up `name` and pin it for an open before the entry lock is released
    fn get_for_open(&self, name: &str, expected: Option<ObjectType>) -> Result<Option<PendingOpen>> {
        let entries = self.entries.lock();
        let Some(object) = entries.get(&fold(name)) else {
            return Ok(None);
        };
        if let Some(expected) = expected {
            object.expect_type(expected)?;
        }
        Ok(Some(PendingOpen::new(object.clone())))
    }
}

impl ObjectOps for Directory {
    fn object_type(&self) -> ObjectType {
        ObjectType::Directory
    }

    fn dump(&self, verbose: bool) -> String {
        let entries = self.entries.lock();
        if verbose && !entries.is_empty() {
            let names = entries
                .values()
                .filter_map(|object| object.name())
                .collect::<Vec<_>>();
            format!("({} entries: {})", entries.len(), names.join(", "))
        } else {
            format!("({} entries)", entries.len())
        }
    }

    fn add_queue(&self, _queue: &mut WaitQueue, _entry: WaitEntry) -> Result<()> {
        Err(ObjectError::NotSupported(ObjectType::Directory))
    }

    fn map_access(&self, access: AccessMask) -> AccessMask {
        DIRECTORY_MAPPING.map(access)
    }

    fn lookup_name(&self, component: &str) -> Result<Option<ObjectRef>> {
        Ok(self.get(component))
    }

    fn destroy(&mut self) {
        let entries = core::mem::take(self.entries.get_mut());
        if !entries.is_empty() {
            log::trace!("directory released {} entries", entries.len());
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Remove `name` from `parent` if it still refers to `object` and the
/// object is unused
///
/// Deciding under the entry lock serializes the unlink with lookups that pin
/// the object for an open. The removed reference is dropped after the lock
/// is released.
pub(crate) fn remove_entry(parent: &ObjectRef, name: &str, object: &KernelObject) {
    let Some(directory) = parent.downcast::<Directory>() else {
        object.clear_name();
        return;
    };
    let removed = {
        let mut entries = directory.entries.lock();
        let key = fold(name);
        match entries.get(&key) {
            Some(entry) if entry.id() == object.id() && object.is_unused() => {
                object.clear_name();
                entries.remove(&key)
            }
            _ => None,
        }
    };
    if removed.is_some() {
        log::trace!("unlinked \"{}\" ({}) from directory {}", name, object.id(), parent.id());
    }
    drop(removed);
}

/// An object found by name that is about to get a handle
///
/// While it exists the object cannot be unlinked. Dropping it unlinks the
/// object again if the open left it without any handle.
pub struct PendingOpen {
    object: ObjectRef,
    keep_linked: bool,
}

impl PendingOpen {
    fn new(object: ObjectRef) -> Self {
        object.open_started();
        Self {
            object,
            keep_linked: false,
        }
    }

    #[inline]
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// Release the pin, leaving the namespace entry in place
    pub fn into_object(mut self) -> ObjectRef {
        self.keep_linked = true;
        self.object.clone()
    }
}

impl Deref for PendingOpen {
    type Target = ObjectRef;

    fn deref(&self) -> &ObjectRef {
        &self.object
    }
}

impl Drop for PendingOpen {
    fn drop(&mut self) {
        self.object.open_finished();
        if !self.keep_linked {
            self.object.unlink_if_unused();
        }
    }
}

/// The server's object namespace
pub struct Namespace {
    root: ObjectRef,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace {
    /// Create a namespace with an empty, permanent root directory
    pub fn new() -> Self {
        let root = ObjectRef::new(Directory::new());
        root.make_permanent();
        Self { root }
    }

    #[inline]
    pub fn root(&self) -> &ObjectRef {
        &self.root
    }

    /// Split `name` into components, checking the path syntax
    fn components<'a>(root: Option<&ObjectRef>, name: &'a str) -> Result<Vec<&'a str>> {
        let relative = match root {
            Some(_) if name.starts_with('\\') => return Err(ObjectError::InvalidName(name.to_string())),
            Some(_) => name,
            None => name.strip_prefix('\\').unwrap_or(name),
        };
        let components = relative.split('\\').collect::<Vec<_>>();
        if components.iter().any(|c| c.is_empty()) {
            return Err(ObjectError::InvalidName(name.to_string()));
        }
        Ok(components)
    }

    /// Resolve every component but the last, returning the parent directory
    /// and the leaf name
    fn resolve_parent<'a>(&self, root: Option<&ObjectRef>, name: &'a str) -> Result<(ObjectRef, &'a str)> {
        let start = match root {
            Some(root) => {
                root.expect_type(ObjectType::Directory)?;
                root.clone()
            }
            None => self.root.clone(),
        };

        let components = Self::components(root, name)?;
        let Some((leaf, intermediate)) = components.split_last() else {
            return Err(ObjectError::InvalidName(name.to_string()));
        };

        let mut current = start;
        for component in intermediate {
            let next = current
                .lookup_name(component)
                .ok()
                .flatten()
                .filter(|object| object.object_type() == ObjectType::Directory);
            current = next.ok_or_else(|| ObjectError::ObjectPathNotFound { path: name.to_string() })?;
        }
        Ok((current, *leaf))
    }

    /// Resolve a full path to an existing object
    pub fn lookup(&self, root: Option<&ObjectRef>, name: &str) -> Result<ObjectRef> {
        if name.is_empty() {
            return Err(ObjectError::InvalidName(String::new()));
        }
        let (parent, leaf) = self.resolve_parent(root, name)?;
        parent
            .lookup_name(leaf)?
            .ok_or_else(|| ObjectError::ObjectNotFound { name: name.to_string() })
    }

    /// Open an existing object, optionally checking its type
    pub fn open_named_object(&self, root: Option<&ObjectRef>, name: &str, expected: Option<ObjectType>) -> Result<ObjectRef> {
        Ok(self.open_for_handle(root, name, expected)?.into_object())
    }

    /// Open an existing object that the caller is about to give a handle to
    pub fn open_for_handle(&self, root: Option<&ObjectRef>, name: &str, expected: Option<ObjectType>) -> Result<PendingOpen> {
        if name.is_empty() {
            return Err(ObjectError::InvalidName(String::new()));
        }
        let (parent, leaf) = self.resolve_parent(root, name)?;
        let directory = parent
            .downcast::<Directory>()
            .ok_or(ObjectError::NotSupported(parent.object_type()))?;
        let pending = directory
            .get_for_open(leaf, expected)?
            .ok_or_else(|| ObjectError::ObjectNotFound { name: name.to_string() })?;
        log::trace!("opened \"{}\" ({})", name, pending.id());
        Ok(pending)
    }

    /// Create-or-open by name
    ///
    /// `make` runs only when a new object is needed. An empty name creates
    /// an unnamed object that is never inserted.
    pub fn create_named_object<T, F>(
        &self,
        root: Option<&ObjectRef>,
        name: &str,
        attributes: ObjAttributes,
        object_type: ObjectType,
        make: F,
    ) -> Result<(ObjectRef, Disposition)>
    where
        T: ObjectOps,
        F: FnOnce() -> T,
    {
        let (pending, disposition) = self.create_for_handle(root, name, attributes, object_type, make)?;
        Ok((pending.into_object(), disposition))
    }

    /// Create-or-open an object that the caller is about to give a handle to
    pub fn create_for_handle<T, F>(
        &self,
        root: Option<&ObjectRef>,
        name: &str,
        attributes: ObjAttributes,
        object_type: ObjectType,
        make: F,
    ) -> Result<(PendingOpen, Disposition)>
    where
        T: ObjectOps,
        F: FnOnce() -> T,
    {
        if name.is_empty() {
            return Ok((PendingOpen::new(ObjectRef::new(make())), Disposition::Created));
        }

        let (parent, leaf) = self.resolve_parent(root, name)?;
        let directory = parent
            .downcast::<Directory>()
            .ok_or(ObjectError::NotSupported(parent.object_type()))?;

        let mut entries = directory.entries.lock();
        let key = fold(leaf);
        if let Some(existing) = entries.get(&key) {
            let existing_type = existing.object_type();
            if existing_type != object_type {
                return Err(ObjectError::NameCollisionWrongType {
                    name: name.to_string(),
                    existing: existing_type,
                });
            }
            return Ok((PendingOpen::new(existing.clone()), Disposition::AlreadyExists));
        }

        let object = ObjectRef::new(make());
        object.set_name(leaf, &parent);
        if attributes.contains(ObjAttributes::PERMANENT) {
            object.make_permanent();
        }
        entries.insert(key, object.clone());
        let pending = PendingOpen::new(object);
        drop(entries);

        log::debug!("created {} \"{}\" ({})", object_type, name, pending.id());
        Ok((pending, Disposition::Created))
    }

    /// Create-or-open a directory
    pub fn create_directory(
        &self,
        root: Option<&ObjectRef>,
        name: &str,
        attributes: ObjAttributes,
    ) -> Result<(ObjectRef, Disposition)> {
        self.create_named_object(root, name, attributes, ObjectType::Directory, Directory::new)
    }

    /// Diagnostic listing of every named object, depth first
    pub fn dump(&self) -> Vec<String> {
        let mut lines = Vec::new();
        Self::dump_directory(&self.root, &mut lines);
        lines
    }

    fn dump_directory(directory: &ObjectRef, lines: &mut Vec<String>) {
        let Some(body) = directory.downcast::<Directory>() else {
            return;
        };
        for child in body.children() {
            lines.push(child.dump(false));
            if child.object_type() == ObjectType::Directory {
                Self::dump_directory(&child, lines);
            }
        }
    }
}
