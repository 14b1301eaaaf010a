//! Handle Tables
//!
//! Each process owns one table mapping opaque handle values to
//! `(object, granted access, attributes)`. The granted access is fixed when
//! the handle is created; generic bits are expanded through the object's
//! `map_access` and never stored.
//!
//! ## Handle Values
//!
//! Slot `n` is exposed as handle `(n + 1) << 2`, so handle values are
//! non-zero multiples of four and `0` is never a valid handle:
//!
//! ```text
//! slots:   [0]    [1]    [2]    [3]
//! handle:  0x4    0x8    0xc    0x10
//! ```
//!
//! Freed slots are reused lowest-first. The largest value is `0xFFFF_FFFC`,
//! which caps a table at [`MAX_HANDLES`] slots.

use core::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::access::AccessMask;
use crate::error::{ObjectError, Result};
use crate::object::{ObjectRef, ObjectType};
use crate::process::ProcessId;

/// Most handles one table can hold
pub const MAX_HANDLES: usize = (u32::MAX >> 2) as usize;

/// Opaque per-process handle value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(u32);

impl Handle {
    /// The null handle (no object)
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    fn from_index(index: usize) -> Self {
        debug_assert!(index < MAX_HANDLES, "handle slot {} out of range", index);
        Self(((index as u32) + 1) << 2)
    }

    fn index(self) -> Option<usize> {
        if self.0 == 0 || self.0 & 0x3 != 0 {
            return None;
        }
        Some((self.0 >> 2) as usize - 1)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

bitflags! {
    /// Per-handle attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct HandleAttributes: u32 {
        /// Copied into child processes created with inheritance
        const INHERIT = 0x1;
        /// Close requests fail with `HandleNotClosable`
        const PROTECT_FROM_CLOSE = 0x2;
    }
}

/// One occupied handle slot
///
/// Holds a counted reference to the object and keeps the object's handle
/// count in step with its own lifetime.
pub struct HandleEntry {
    object: ObjectRef,
    access: AccessMask,
    attributes: HandleAttributes,
}

impl HandleEntry {
    fn new(object: ObjectRef, access: AccessMask, attributes: HandleAttributes) -> Self {
        object.handle_opened();
        Self { object, access, attributes }
    }

    #[inline]
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    #[inline]
    pub fn access(&self) -> AccessMask {
        self.access
    }

    #[inline]
    pub fn attributes(&self) -> HandleAttributes {
        self.attributes
    }
}

impl Drop for HandleEntry {
    fn drop(&mut self) {
        log::trace!("handle to {} released", self.object.id());
        self.object.handle_closed();
    }
}

impl fmt::Debug for HandleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleEntry")
            .field("object", &self.object)
            .field("access", &self.access)
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// Handle table for one process
pub struct HandleTable {
    owner: ProcessId,
    slots: Vec<Option<HandleEntry>>,
    count: usize,
    limit: usize,
}

impl HandleTable {
    /// Create an empty table allowing at most `limit` open handles
    ///
    /// `limit` is capped at [`MAX_HANDLES`].
    pub fn new(owner: ProcessId, limit: usize) -> Self {
        Self {
            owner,
            slots: Vec::new(),
            count: 0,
            limit: Self::cap_limit(owner, limit),
        }
    }

    fn cap_limit(owner: ProcessId, limit: usize) -> usize {
        if limit > MAX_HANDLES {
            log::warn!("{}: handle limit {} capped at {}", owner, limit, MAX_HANDLES);
        }
        limit.min(MAX_HANDLES)
    }

    #[inline]
    pub fn owner(&self) -> ProcessId {
        self.owner
    }

    /// Number of open handles
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Allocate a handle for `object`
    ///
    /// `access` is expanded through the object's `map_access`; the generic
    /// bits and `MAXIMUM_ALLOWED` are not stored.
    pub fn alloc(&mut self, object: ObjectRef, access: AccessMask, attributes: HandleAttributes) -> Result<Handle> {
        if self.count >= self.limit {
            log::warn!("{}: handle table full ({} handles)", self.owner, self.limit);
            return Err(ObjectError::HandleTableFull { limit: self.limit });
        }

        let access = object.map_access(access) - AccessMask::MAXIMUM_ALLOWED;
        let entry = HandleEntry::new(object, access, attributes);

        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(entry);
                index
            }
            None => {
                self.slots
                    .try_reserve(1)
                    .map_err(|_| ObjectError::AllocationFailure { what: "handle slot" })?;
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.count += 1;

        let handle = Handle::from_index(index);
        log::trace!("{}: allocated handle {} with access {:?}", self.owner, handle, access);
        Ok(handle)
    }

    /// Look up an occupied slot
    pub fn entry(&self, handle: Handle) -> Result<&HandleEntry> {
        handle
            .index()
            .and_then(|index| self.slots.get(index))
            .and_then(Option::as_ref)
            .ok_or(ObjectError::InvalidHandle(handle))
    }

    /// Resolve a handle, checking type (if given) and requested access
    pub fn get(&self, handle: Handle, access: AccessMask, expected: Option<ObjectType>) -> Result<ObjectRef> {
        let entry = self.entry(handle)?;
        if let Some(expected) = expected {
            entry.object.expect_type(expected)?;
        }
        if !entry.access.contains(access) {
            log::warn!(
                "{}: handle {} lacks access (requested {:?}, granted {:?})",
                self.owner,
                handle,
                access,
                entry.access
            );
            return Err(ObjectError::AccessDenied {
                requested: access,
                granted: entry.access,
            });
        }
        Ok(entry.object.clone())
    }

    /// Fail unless `handle` exists and may be closed
    pub fn check_closable(&self, handle: Handle) -> Result<()> {
        let entry = self.entry(handle)?;
        if entry.attributes.contains(HandleAttributes::PROTECT_FROM_CLOSE)
            || !entry.object.close_handle(self.owner, handle)
        {
            return Err(ObjectError::HandleNotClosable(handle));
        }
        Ok(())
    }

    /// Remove a handle
    ///
    /// The returned entry releases its reference when dropped; callers drop
    /// it after releasing any lock around the table.
    pub fn close(&mut self, handle: Handle) -> Result<HandleEntry> {
        self.check_closable(handle)?;
        self.take(handle)
    }

    /// Remove a handle regardless of its attributes
    pub(crate) fn take(&mut self, handle: Handle) -> Result<HandleEntry> {
        let index = handle.index().ok_or(ObjectError::InvalidHandle(handle))?;
        let entry = self
            .slots
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(ObjectError::InvalidHandle(handle))?;
        self.count -= 1;

        // Trim trailing free slots so the table shrinks after bursts.
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }

        log::trace!("{}: closed handle {}", self.owner, handle);
        Ok(entry)
    }

    /// Change the attributes of an open handle
    pub fn set_attributes(&mut self, handle: Handle, attributes: HandleAttributes) -> Result<()> {
        let index = handle.index().ok_or(ObjectError::InvalidHandle(handle))?;
        let entry = self
            .slots
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(ObjectError::InvalidHandle(handle))?;
        entry.attributes = attributes;
        Ok(())
    }

    /// Iterate open handles in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &HandleEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|entry| (Handle::from_index(index), entry)))
    }

    /// Remove every handle, returning the entries for the caller to drop
    pub fn drain(&mut self) -> Vec<HandleEntry> {
        self.count = 0;
        self.slots.drain(..).flatten().collect()
    }

    /// Build a child's table from the inheritable handles, keeping values
    pub fn inherit(&self, child: ProcessId, limit: usize) -> Self {
        let slots = self
            .slots
            .iter()
            .map(|slot| {
                slot.as_ref()
                    .filter(|entry| entry.attributes.contains(HandleAttributes::INHERIT))
                    .map(|entry| HandleEntry::new(entry.object.clone(), entry.access, entry.attributes))
            })
            .collect::<Vec<_>>();
        let count = slots.iter().filter(|slot| slot.is_some()).count();

        let limit = Self::cap_limit(child, limit);
        let mut table = Self { owner: child, slots, count, limit };
        while matches!(table.slots.last(), Some(None)) {
            table.slots.pop();
        }
        table
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("owner", &self.owner)
            .field("count", &self.count)
            .field("limit", &self.limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::tests::TestObject;

    fn table() -> HandleTable {
        HandleTable::new(ProcessId::new(1), 8)
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    #[test]
    fn test_handle_values() {
        let mut table = table();
        let object = ObjectRef::new(TestObject::new());

        let h1 = table.alloc(object.clone(), AccessMask::SYNCHRONIZE, HandleAttributes::empty()).unwrap();
        let h2 = table.alloc(object.clone(), AccessMask::SYNCHRONIZE, HandleAttributes::empty()).unwrap();
        assert_eq!(h1.raw(), 4);
        assert_eq!(h2.raw(), 8);
        assert_eq!(table.count(), 2);
        assert_eq!(object.handle_count(), 2);
        assert_eq!(object.ref_count(), 3);
    }

    #[test]
    fn test_lowest_free_slot_is_reused() {
        let mut table = table();
        let object = ObjectRef::new(TestObject::new());

        let h1 = table.alloc(object.clone(), AccessMask::empty(), HandleAttributes::empty()).unwrap();
        let _h2 = table.alloc(object.clone(), AccessMask::empty(), HandleAttributes::empty()).unwrap();
        drop(table.close(h1).unwrap());

        let h3 = table.alloc(object, AccessMask::empty(), HandleAttributes::empty()).unwrap();
        assert_eq!(h3, h1);
    }

    #[test]
    fn test_generic_access_is_mapped() {
        let mut table = table();
        let object = ObjectRef::new(TestObject::new());
        let handle = table.alloc(object, AccessMask::GENERIC_ALL, HandleAttributes::empty()).unwrap();

        let access = table.entry(handle).unwrap().access();
        assert!(!access.has_generic());
        assert_eq!(access, AccessMask::STANDARD_RIGHTS_ALL);
    }

    #[test]
    fn test_table_limit() {
        let mut table = HandleTable::new(ProcessId::new(1), 1);
        let object = ObjectRef::new(TestObject::new());
        table.alloc(object.clone(), AccessMask::empty(), HandleAttributes::empty()).unwrap();
        assert_eq!(
            table.alloc(object, AccessMask::empty(), HandleAttributes::empty()),
            Err(ObjectError::HandleTableFull { limit: 1 })
        );
    }

    #[test]
    fn test_limit_is_capped_to_handle_range() {
        let table = HandleTable::new(ProcessId::new(1), usize::MAX);
        assert_eq!(table.limit(), MAX_HANDLES);
        assert_eq!(table.inherit(ProcessId::new(2), usize::MAX).limit(), MAX_HANDLES);

        // The last slot still maps to a distinct, aligned handle value.
        let last = Handle::from_index(MAX_HANDLES - 1);
        assert_eq!(last.raw(), 0xFFFF_FFFC);
        assert_eq!(last.index(), Some(MAX_HANDLES - 1));
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    #[test]
    fn test_lookup_checks_access_and_type() {
        let mut table = table();
        let object = ObjectRef::new(TestObject::new());
        let handle = table.alloc(object, AccessMask::specific(0x1), HandleAttributes::empty()).unwrap();

        assert!(table.get(handle, AccessMask::specific(0x1), Some(ObjectType::Test)).is_ok());
        assert!(matches!(
            table.get(handle, AccessMask::specific(0x2), None),
            Err(ObjectError::AccessDenied { .. })
        ));
        assert!(matches!(
            table.get(handle, AccessMask::empty(), Some(ObjectType::Directory)),
            Err(ObjectError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_handles() {
        let table = table();
        for raw in [0, 3, 4, 0x400] {
            let handle = Handle::from_raw(raw);
            assert_eq!(
                table.get(handle, AccessMask::empty(), None).unwrap_err(),
                ObjectError::InvalidHandle(handle)
            );
        }
    }

    // ========================================================================
    // Close / inherit
    // ========================================================================

    #[test]
    fn test_protected_handle_cannot_be_closed() {
        let mut table = table();
        let object = ObjectRef::new(TestObject::new());
        let handle = table
            .alloc(object, AccessMask::empty(), HandleAttributes::PROTECT_FROM_CLOSE)
            .unwrap();

        assert_eq!(table.close(handle).unwrap_err(), ObjectError::HandleNotClosable(handle));
        table.set_attributes(handle, HandleAttributes::empty()).unwrap();
        assert!(table.close(handle).is_ok());
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn test_close_releases_reference() {
        let mut table = table();
        let object = ObjectRef::new(TestObject::new());
        let weak = object.downgrade();
        let handle = table.alloc(object, AccessMask::empty(), HandleAttributes::empty()).unwrap();

        assert!(!weak.is_dead());
        let entry = table.close(handle).unwrap();
        assert!(!weak.is_dead());
        drop(entry);
        assert!(weak.is_dead());
    }

    #[test]
    fn test_inherit_copies_inheritable_handles_only() {
        let mut parent = table();
        let object = ObjectRef::new(TestObject::new());
        let private = parent.alloc(object.clone(), AccessMask::empty(), HandleAttributes::empty()).unwrap();
        let shared = parent.alloc(object.clone(), AccessMask::SYNCHRONIZE, HandleAttributes::INHERIT).unwrap();

        let child = parent.inherit(ProcessId::new(2), 8);
        assert_eq!(child.count(), 1);
        assert!(child.entry(private).is_err());
        assert_eq!(child.entry(shared).unwrap().access(), AccessMask::SYNCHRONIZE);
        assert_eq!(object.handle_count(), 3);
    }
}
