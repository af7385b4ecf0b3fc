//! Engine Runtime
//!
//! The part of an engine that does not depend on its argument and result
//! types: the slot memory, the execution status and the continuation
//! bookkeeping. Setters, scopes and the active-pass marker all work against
//! this type, which keeps them free of the engine's generic parameters.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use super::scheduler::Schedule;
use crate::memory::Memory;

/// Unique identifier for an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(u64);

impl EngineId {
    /// Generate a new unique engine ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for EngineId {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution status of one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Not executing; setters schedule a continuation.
    Idle,
    /// Inside an invocation; setters are picked up by the running loop.
    Executing,
}

/// Re-entry point used by scheduled continuations.
pub(crate) trait Resume {
    /// Re-invoke with the last arguments, unless `generation` is stale.
    fn resume(&self, generation: u64);
}

pub(crate) struct EngineCore {
    id: EngineId,
    pub(crate) memory: Memory,
    status: Cell<Status>,
    continuation_pending: Cell<bool>,
    reset_requested: Cell<bool>,
    scheduler: Rc<dyn Schedule>,
    resume: RefCell<Option<Weak<dyn Resume>>>,
}

impl EngineCore {
    pub(crate) fn new(scheduler: Rc<dyn Schedule>) -> Self {
        Self {
            id: EngineId::new(),
            memory: Memory::new(),
            status: Cell::new(Status::Idle),
            continuation_pending: Cell::new(false),
            reset_requested: Cell::new(false),
            scheduler,
            resume: RefCell::new(None),
        }
    }

    pub(crate) fn id(&self) -> EngineId {
        self.id
    }

    pub(crate) fn status(&self) -> Status {
        self.status.get()
    }

    pub(crate) fn bind(&self, resume: Weak<dyn Resume>) {
        *self.resume.borrow_mut() = Some(resume);
    }

    /// Called after a setter queued a mutation.
    ///
    /// Inside an invocation the running loop applies the mutation. Outside,
    /// exactly one continuation is scheduled; further mutations before it
    /// runs are coalesced into it.
    pub(crate) fn mutation_queued(&self, generation: u64) {
        if self.status.get() == Status::Executing {
            return;
        }
        if self.continuation_pending.replace(true) {
            return;
        }

        let Some(resume) = self.resume.borrow().clone() else {
            self.continuation_pending.set(false);
            return;
        };

        debug!(engine = self.id.raw(), generation, "scheduling continuation");
        self.scheduler.schedule(Box::new(move || {
            if let Some(resume) = resume.upgrade() {
                resume.resume(generation);
            }
        }));
    }

    /// Claim the pending continuation. Returns `false` for a continuation
    /// that belongs to a discarded generation.
    pub(crate) fn claim_continuation(&self, generation: u64) -> bool {
        if self.memory.generation() != generation {
            debug!(engine = self.id.raw(), generation, "dropping stale continuation");
            return false;
        }
        self.continuation_pending.set(false);
        true
    }

    /// Hard reset the memory and forget any scheduled continuation.
    pub(crate) fn hard_reset(&self) -> usize {
        self.continuation_pending.set(false);
        self.memory.hard_reset()
    }

    pub(crate) fn request_reset(&self) {
        self.reset_requested.set(true);
    }

    pub(crate) fn take_reset_request(&self) -> bool {
        self.reset_requested.replace(false)
    }
}

/// Guard holding an engine in [`Status::Executing`].
pub(crate) struct Executing<'a> {
    core: &'a EngineCore,
}

impl<'a> Executing<'a> {
    pub(crate) fn enter(core: &'a EngineCore) -> Self {
        core.status.set(Status::Executing);
        Self { core }
    }
}

impl Drop for Executing<'_> {
    fn drop(&mut self) {
        self.core.status.set(Status::Idle);
    }
}
