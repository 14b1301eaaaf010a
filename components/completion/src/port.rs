//! Completion port object
//!
//! A FIFO of [`CompletionPacket`]s plus a depth counter. The port is
//! signaled whenever at least one packet is queued; waking a waiter does not
//! consume anything, the woken thread dequeues with a separate remove.
//!
//! ## Design
//!
//! ```text
//! post ──> [P1] [P2] [P3] ──> remove
//!          tail ......... head
//!          depth == 3
//! ```
//!
//! - `depth == queue.len()` at every point the lock is released
//! - `concurrency` is recorded at creation and reported by query only
//! - An optional `capacity` bounds the queue; posts beyond it fail instead of
//!   dropping the packet

use core::any::Any;
use std::collections::VecDeque;

use spin::Mutex;
use uk_kobject::access::{AccessMask, GenericMapping};
use uk_kobject::{ObjectError, ObjectOps, ObjectType, Result};

use crate::packet::CompletionPacket;

/// Query the queue depth
pub const IO_COMPLETION_QUERY_STATE: AccessMask = AccessMask::specific(0x0001);
/// Post and remove packets
pub const IO_COMPLETION_MODIFY_STATE: AccessMask = AccessMask::specific(0x0002);
pub const IO_COMPLETION_ALL_ACCESS: AccessMask = AccessMask::STANDARD_RIGHTS_REQUIRED
    .union(AccessMask::SYNCHRONIZE)
    .union(AccessMask::specific(0x0003));

const COMPLETION_MAPPING: GenericMapping = GenericMapping {
    read: AccessMask::STANDARD_RIGHTS_READ
        .union(AccessMask::SYNCHRONIZE)
        .union(IO_COMPLETION_QUERY_STATE),
    write: AccessMask::STANDARD_RIGHTS_WRITE,
    execute: AccessMask::STANDARD_RIGHTS_EXECUTE,
    all: AccessMask::STANDARD_RIGHTS_ALL.union(IO_COMPLETION_ALL_ACCESS),
};

struct PortState {
    queue: VecDeque<CompletionPacket>,
    depth: u32,
}

impl PortState {
    fn check(&self) {
        debug_assert_eq!(self.depth as usize, self.queue.len(), "completion depth out of step with queue");
    }
}

/// Completion port body
pub struct CompletionPort {
    state: Mutex<PortState>,
    concurrency: u32,
    capacity: Option<usize>,
}

impl CompletionPort {
    /// Create an empty port
    ///
    /// `capacity` limits the number of pending packets (`None` = unbounded).
    pub fn new(concurrency: u32, capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(PortState {
                queue: VecDeque::new(),
                depth: 0,
            }),
            concurrency,
            capacity,
        }
    }

    /// Concurrency value given at creation
    #[inline]
    pub fn concurrency(&self) -> u32 {
        self.concurrency
    }

    #[inline]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Number of queued packets
    pub fn depth(&self) -> u32 {
        let state = self.state.lock();
        state.check();
        state.depth
    }

    /// Append a packet at the tail
    ///
    /// Does not wake anyone; see [`crate::post_completion`].
    pub fn post(&self, packet: CompletionPacket) -> Result<()> {
        let mut state = self.state.lock();
        let full = self.capacity.is_some_and(|limit| state.queue.len() >= limit) || state.depth == u32::MAX;
        if full {
            log::warn!("completion port full ({} packets pending)", state.depth);
            return Err(ObjectError::AllocationFailure { what: "completion packet" });
        }
        state
            .queue
            .try_reserve(1)
            .map_err(|_| ObjectError::AllocationFailure { what: "completion packet" })?;

        state.queue.push_back(packet);
        state.depth += 1;
        state.check();
        Ok(())
    }

    /// Pop the oldest packet, if any; never blocks
    pub fn remove(&self) -> Option<CompletionPacket> {
        let mut state = self.state.lock();
        let packet = state.queue.pop_front()?;
        state.depth -= 1;
        state.check();
        Some(packet)
    }

    /// Free every queued packet, returning how many there were
    fn drain(&mut self) -> usize {
        let state = self.state.get_mut();
        state.check();
        let pending = state.queue.len();
        state.queue.clear();
        state.depth = 0;
        pending
    }
}

impl ObjectOps for CompletionPort {
    fn object_type(&self) -> ObjectType {
        ObjectType::Completion
    }

    fn dump(&self, verbose: bool) -> String {
        let depth = self.depth();
        if verbose {
            format!("({} packets pending, concurrency {})", depth, self.concurrency)
        } else {
            format!("({} packets pending)", depth)
        }
    }

    fn signaled(&self) -> bool {
        self.depth() > 0
    }

    fn map_access(&self, access: AccessMask) -> AccessMask {
        COMPLETION_MAPPING.map(access)
    }

    fn destroy(&mut self) {
        let pending = self.drain();
        if pending > 0 {
            log::debug!("completion port destroyed with {} packets pending", pending);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
