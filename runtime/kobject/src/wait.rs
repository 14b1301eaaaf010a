//! Wait/Signal Engine
//!
//! Generic blocking and wake-up over any kernel object. A thread waits by
//! registering on every object of its wait set; whenever an object changes
//! state, the engine re-evaluates the waiters registered on it.
//!
//! ## Design
//!
//! ```text
//! WaitEngine (one lock)
//!   waiters: WaiterId -> { thread, mode, targets (weak), wake channel }
//!
//! KernelObject
//!   wait_queue: [W1] -> [W2] -> [W3]     (FIFO registration order)
//! ```
//!
//! - Waiters on one object are woken in FIFO order. Native systems wake LIFO;
//!   the FIFO order here is intentional and relied upon.
//! - A woken waiter has `satisfied()` run on the winning object(s) and all of
//!   its registrations removed before it is released.
//! - Each blocked thread parks on its own `crossbeam` channel, so bounded and
//!   unbounded waits share one code path.
//!
//! ## Lock Order
//!
//! engine state → object wait queue → object body. Objects must release their
//! body lock before calling [`WaitEngine::signal`].
//!
//! A waiter only exists while its `wait` call is in progress, and that call
//! borrows strong references to every target, so upgrading a registration
//! inside the engine never yields the last reference.

use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam::channel::{self, Sender};
use serde::{Deserialize, Serialize};

use crate::error::{ObjectError, Result};
use crate::handle::Handle;
use crate::object::{ObjectRef, WeakObjectRef};
use crate::process::{ProcessId, ThreadId};

/// Identifies one blocking wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

impl WaiterId {
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// A registration in an object's wait queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitEntry {
    pub waiter: WaiterId,
    pub thread: ThreadId,
}

/// Per-object FIFO of registered waiters
#[derive(Debug, Default)]
pub struct WaitQueue {
    entries: VecDeque<WaitEntry>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: WaitEntry) {
        self.entries.push_back(entry);
    }

    pub fn remove(&mut self, waiter: WaiterId) {
        self.entries.retain(|entry| entry.waiter != waiter);
    }

    pub fn iter(&self) -> impl Iterator<Item = &WaitEntry> {
        self.entries.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WaitMode {
    /// Satisfied by the first signaled object in wait-set order
    #[default]
    Any,
    /// Satisfied when every object is signaled at once
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// A handle the wait was issued through was closed
    HandleClosed,
    /// The waiting thread (or its process) terminated
    ThreadTerminated,
}

/// Result of a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitStatus {
    /// Index of the satisfying object (always 0 for `WaitMode::All`)
    Signaled(usize),
    Timeout,
    Cancelled(CancelReason),
}

/// One object of a wait set
#[derive(Debug, Clone)]
pub struct WaitTarget {
    pub object: ObjectRef,
    /// Handle the wait was issued through, for cancellation on close
    pub origin: Option<(ProcessId, Handle)>,
}

impl WaitTarget {
    pub fn new(object: ObjectRef) -> Self {
        Self { object, origin: None }
    }

    pub fn via_handle(object: ObjectRef, process: ProcessId, handle: Handle) -> Self {
        Self {
            object,
            origin: Some((process, handle)),
        }
    }
}

struct Registration {
    object: WeakObjectRef,
    origin: Option<(ProcessId, Handle)>,
}

struct Waiter {
    thread: ThreadId,
    mode: WaitMode,
    targets: Vec<Registration>,
    wake: Sender<WaitStatus>,
}

#[derive(Default)]
struct EngineState {
    waiters: BTreeMap<WaiterId, Waiter>,
    by_thread: HashMap<ThreadId, WaiterId>,
}

/// The wait/signal engine
pub struct WaitEngine {
    state: Mutex<EngineState>,
    next_waiter: AtomicU64,
}

impl Default for WaitEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
            next_waiter: AtomicU64::new(1),
        }
    }

    /// Lock the engine state, ignoring poison
    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block `thread` until the wait set is satisfied, cancelled or times out
    ///
    /// `timeout`: `None` waits forever, `Some(Duration::ZERO)` only polls.
    pub fn wait(
        &self,
        thread: ThreadId,
        targets: &[WaitTarget],
        mode: WaitMode,
        timeout: Option<Duration>,
    ) -> Result<WaitStatus> {
        if targets.is_empty() {
            return Err(ObjectError::InvalidParameter("empty wait set"));
        }

        let id = WaiterId(self.next_waiter.fetch_add(1, Ordering::Relaxed));
        let (wake, parked) = channel::bounded(1);

        {
            let mut state = self.state();
            if state.by_thread.contains_key(&thread) {
                return Err(ObjectError::InvalidParameter("thread is already waiting"));
            }

            for (registered, target) in targets.iter().enumerate() {
                if let Err(err) = target.object.add_queue(WaitEntry { waiter: id, thread }) {
                    for target in &targets[..registered] {
                        target.object.remove_queue(id);
                    }
                    return Err(err);
                }
            }

            let objects = targets.iter().map(|t| Some(t.object.clone())).collect::<Vec<_>>();
            let immediate = match check_wait(mode, &objects) {
                Some(index) => {
                    satisfy(mode, &objects, index);
                    Some(WaitStatus::Signaled(index))
                }
                None if timeout == Some(Duration::ZERO) => Some(WaitStatus::Timeout),
                None => None,
            };
            if let Some(status) = immediate {
                for target in targets {
                    target.object.remove_queue(id);
                }
                return Ok(status);
            }

            let registrations = targets
                .iter()
                .map(|t| Registration {
                    object: t.object.downgrade(),
                    origin: t.origin,
                })
                .collect();
            state.waiters.insert(
                id,
                Waiter {
                    thread,
                    mode,
                    targets: registrations,
                    wake,
                },
            );
            state.by_thread.insert(thread, id);
        }

        log::trace!("{} blocked on {} object(s) ({:?}, timeout {:?})", thread, targets.len(), mode, timeout);

        let received = match timeout {
            None => parked.recv().ok(),
            Some(limit) => parked.recv_timeout(limit).ok(),
        };
        if let Some(status) = received {
            log::trace!("{} released: {:?}", thread, status);
            return Ok(status);
        }

        let mut state = self.state();
        if let Some(waiter) = state.waiters.remove(&id) {
            state.by_thread.remove(&waiter.thread);
            deregister(id, &waiter);
            log::trace!("{} timed out", thread);
            return Ok(WaitStatus::Timeout);
        }
        drop(state);

        // Woken between the timeout and taking the lock.
        Ok(parked.try_recv().unwrap_or(WaitStatus::Timeout))
    }

    /// Re-evaluate the waiters of `object` in FIFO order, waking at most `max`
    ///
    /// Returns the number of threads woken.
    pub fn signal(&self, object: &ObjectRef, max: usize) -> usize {
        let mut state = self.state();
        let mut woken = 0;
        for id in object.waiters() {
            if woken >= max {
                break;
            }
            if try_wake(&mut state, id) {
                woken += 1;
            }
        }
        if woken > 0 {
            log::trace!("signal on {} woke {} waiter(s)", object.id(), woken);
        }
        woken
    }

    /// Re-evaluate every waiter registered on `object`
    pub fn signal_all(&self, object: &ObjectRef) -> usize {
        self.signal(object, usize::MAX)
    }

    /// Re-evaluate every pending waiter, oldest first
    pub fn rescan(&self) -> usize {
        let mut state = self.state();
        let ids = state.waiters.keys().copied().collect::<Vec<_>>();
        ids.into_iter().filter(|id| try_wake(&mut state, *id)).count()
    }

    /// Cancel the pending wait of `thread`, if any
    pub fn cancel_thread(&self, thread: ThreadId, reason: CancelReason) -> bool {
        let mut state = self.state();
        let Some(id) = state.by_thread.get(&thread).copied() else {
            return false;
        };
        cancel(&mut state, id, reason);
        true
    }

    /// Cancel every wait issued through `handle` of `process`
    pub fn cancel_handle(&self, process: ProcessId, handle: Handle) -> usize {
        let mut state = self.state();
        let origin = Some((process, handle));
        let ids = state
            .waiters
            .iter()
            .filter(|(_, waiter)| waiter.targets.iter().any(|r| r.origin == origin))
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in &ids {
            cancel(&mut state, *id, CancelReason::HandleClosed);
        }
        ids.len()
    }

    /// Is `thread` currently blocked in the engine?
    pub fn is_waiting(&self, thread: ThreadId) -> bool {
        self.state().by_thread.contains_key(&thread)
    }

    pub fn waiter_count(&self) -> usize {
        self.state().waiters.len()
    }
}

fn check_wait(mode: WaitMode, objects: &[Option<ObjectRef>]) -> Option<usize> {
    match mode {
        WaitMode::Any => objects
            .iter()
            .position(|object| object.as_ref().is_some_and(|o| o.signaled())),
        WaitMode::All => objects
            .iter()
            .all(|object| object.as_ref().is_some_and(|o| o.signaled()))
            .then_some(0),
    }
}

fn satisfy(mode: WaitMode, objects: &[Option<ObjectRef>], index: usize) {
    match mode {
        WaitMode::Any => {
            if let Some(object) = &objects[index] {
                object.satisfied();
            }
        }
        WaitMode::All => objects.iter().flatten().for_each(|object| object.satisfied()),
    }
}

fn deregister(id: WaiterId, waiter: &Waiter) {
    // Objects that are already gone have nothing left to deregister from.
    for object in waiter.targets.iter().filter_map(|r| r.object.upgrade()) {
        object.remove_queue(id);
    }
}

fn try_wake(state: &mut EngineState, id: WaiterId) -> bool {
    let Some(waiter) = state.waiters.get(&id) else {
        return false;
    };
    let objects = waiter.targets.iter().map(|r| r.object.upgrade()).collect::<Vec<_>>();
    let Some(index) = check_wait(waiter.mode, &objects) else {
        return false;
    };
    satisfy(waiter.mode, &objects, index);

    if let Some(waiter) = state.waiters.remove(&id) {
        state.by_thread.remove(&waiter.thread);
        deregister(id, &waiter);
        let _ = waiter.wake.send(WaitStatus::Signaled(index));
    }
    true
}

fn cancel(state: &mut EngineState, id: WaiterId, reason: CancelReason) {
    if let Some(waiter) = state.waiters.remove(&id) {
        state.by_thread.remove(&waiter.thread);
        deregister(id, &waiter);
        log::trace!("wait of {} cancelled: {:?}", waiter.thread, reason);
        let _ = waiter.wake.send(WaitStatus::Cancelled(reason));
    }
}
