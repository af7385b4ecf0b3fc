//! Active Pass Context
//!
//! Tracks which engine is currently executing a pass. Registrations consult
//! it to reject calls made outside a pass, and the engine consults it to
//! refuse starting a pass while another one is running.
//!
//! # Implementation
//!
//! A thread-local slot holds the core of the active engine. Entering a pass
//! returns an [`ActivePass`] guard; dropping the guard clears the slot, so
//! the marker is restored on every exit path, including errors and panics
//! unwinding through the wrapped function.
//!
//! Continuations refused because a pass was active are parked here and
//! handed back to their engines once that pass is over.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::runtime::{EngineCore, EngineId};
use crate::error::{EngineError, Result};

thread_local! {
    static ACTIVE: RefCell<Option<Rc<EngineCore>>> = const { RefCell::new(None) };
    static PARKED: RefCell<Vec<(Weak<EngineCore>, u64)>> = const { RefCell::new(Vec::new()) };
}

/// Guard marking an engine as the one executing a pass.
pub(crate) struct ActivePass {
    id: EngineId,
}

impl ActivePass {
    /// Mark `core` as active for the lifetime of the returned guard.
    ///
    /// Fails with [`EngineError::NestedPass`] when any engine is already
    /// active on this thread.
    pub(crate) fn enter(core: &Rc<EngineCore>) -> Result<Self> {
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if active.is_some() {
                return Err(EngineError::NestedPass);
            }
            *active = Some(Rc::clone(core));
            Ok(Self { id: core.id() })
        })
    }

    /// Check whether any engine is executing a pass.
    pub(crate) fn is_any_active() -> bool {
        ACTIVE.with(|active| active.borrow().is_some())
    }

    /// Check whether the engine with `id` is executing a pass.
    pub(crate) fn is_active(id: EngineId) -> bool {
        ACTIVE.with(|active| active.borrow().as_ref().map(|core| core.id()) == Some(id))
    }

    /// Get the core of the active engine, if any.
    pub(crate) fn current() -> Option<Rc<EngineCore>> {
        ACTIVE.with(|active| active.borrow().clone())
    }

    /// Park a continuation of `core` until the active pass ends.
    pub(crate) fn park(core: &Rc<EngineCore>, generation: u64) {
        PARKED.with(|parked| parked.borrow_mut().push((Rc::downgrade(core), generation)));
    }
}

impl Drop for ActivePass {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            let popped = active.borrow_mut().take();

            debug_assert_eq!(
                popped.map(|core| core.id()),
                Some(self.id),
                "ActivePass mismatch"
            );
        });

        let parked = PARKED.with(|parked| std::mem::take(&mut *parked.borrow_mut()));
        for (core, generation) in parked {
            if let Some(core) = core.upgrade() {
                core.mutation_queued(generation);
            }
        }
    }
}
