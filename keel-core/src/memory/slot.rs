//! Slot Variants
//!
//! A slot is one persisted memory cell, addressed by the order in which the
//! wrapped function registers it. There are three kinds:
//!
//! - **State** holds a value plus a queue of pending mutations. Mutations are
//!   only folded into the value between passes.
//! - **Effect** holds the most recent effect closure, its dependency list, an
//!   `outdated` flag and the cleanup returned by the last run.
//! - **Memo** holds a cached value and the dependency list it was computed
//!   from.
//!
//! State slots are generic over their value type, so they are stored behind
//! the object-safe [`StateCell`] trait and recovered with a downcast.

use std::any::{type_name, Any};
use std::fmt;

use crate::deps::Deps;
use crate::error::BoxError;

/// Result returned by an effect body.
pub type EffectResult = Result<Option<Cleanup>, BoxError>;

/// A stored effect body. Each stored body runs at most once; a new pass
/// that re-marks the slot outdated also supplies a new body.
pub(crate) type EffectFn = Box<dyn FnOnce() -> EffectResult>;

/// Which point of an invocation triggers an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectGroup {
    /// Runs as soon as the passes of an invocation have settled.
    Immediate,

    /// Runs at the start of the next external invocation, or when the host
    /// triggers deferred effects explicitly.
    Deferred,
}

/// The kind of a slot, used for call-order validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    State,
    Effect(EffectGroup),
    Memo,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKind::State => f.write_str("state"),
            SlotKind::Effect(EffectGroup::Immediate) => f.write_str("immediate effect"),
            SlotKind::Effect(EffectGroup::Deferred) => f.write_str("deferred effect"),
            SlotKind::Memo => f.write_str("memo"),
        }
    }
}

/// Teardown returned by an effect run.
///
/// A cleanup runs once: before the effect runs again, or when the engine is
/// hard reset. Its failures are logged and never abort other cleanups.
pub struct Cleanup(Box<dyn FnOnce() -> Result<(), BoxError>>);

impl Cleanup {
    /// Create a cleanup that cannot fail.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self(Box::new(move || {
            f();
            Ok(())
        }))
    }

    /// Create a cleanup that can fail.
    pub fn fallible<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + 'static,
    {
        Self(Box::new(f))
    }

    pub(crate) fn run(self) -> Result<(), BoxError> {
        (self.0)()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup")
    }
}

/// One queued change to a state slot.
pub(crate) enum Mutation<T> {
    Replace(T),
    Update(Box<dyn FnOnce(&T) -> Result<T, BoxError>>),
}

/// Typed state storage.
pub(crate) struct StateSlot<T> {
    pub(crate) value: T,
    pub(crate) pending: Vec<Mutation<T>>,
}

impl<T> StateSlot<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            value,
            pending: Vec::new(),
        }
    }
}

/// Pending mutations detached from their slot, folded without holding a
/// borrow of the memory (updaters are user code).
pub(crate) trait StateBatch {
    /// Fold the mutations in order. Returns the new value when it differs
    /// from the value the batch started from.
    fn fold(self: Box<Self>) -> Result<Option<Box<dyn Any>>, BoxError>;
}

struct Batch<T> {
    previous: T,
    mutations: Vec<Mutation<T>>,
}

impl<T> StateBatch for Batch<T>
where
    T: Clone + PartialEq + 'static,
{
    fn fold(self: Box<Self>) -> Result<Option<Box<dyn Any>>, BoxError> {
        let Batch {
            previous,
            mutations,
        } = *self;

        let mut value = previous.clone();
        for mutation in mutations {
            value = match mutation {
                Mutation::Replace(next) => next,
                Mutation::Update(update) => update(&value)?,
            };
        }

        Ok((value != previous).then(|| Box::new(value) as Box<dyn Any>))
    }
}

/// Object-safe view of a [`StateSlot`].
pub(crate) trait StateCell {
    fn type_name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Detach the pending queue, if any.
    fn take_batch(&mut self) -> Option<Box<dyn StateBatch>>;

    /// Store a value produced by a batch of this slot.
    fn commit(&mut self, value: Box<dyn Any>);
}

impl<T> StateCell for StateSlot<T>
where
    T: Clone + PartialEq + 'static,
{
    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn take_batch(&mut self) -> Option<Box<dyn StateBatch>> {
        if self.pending.is_empty() {
            return None;
        }

        Some(Box::new(Batch {
            previous: self.value.clone(),
            mutations: std::mem::take(&mut self.pending),
        }))
    }

    fn commit(&mut self, value: Box<dyn Any>) {
        if let Ok(value) = value.downcast::<T>() {
            self.value = *value;
        }
    }
}

/// An effect slot.
pub(crate) struct EffectSlot {
    pub(crate) group: EffectGroup,
    pub(crate) effect: Option<EffectFn>,
    pub(crate) deps: Option<Deps>,
    pub(crate) outdated: bool,
    pub(crate) cleanup: Option<Cleanup>,
}

impl EffectSlot {
    pub(crate) fn new(group: EffectGroup, effect: EffectFn, deps: Option<Deps>) -> Self {
        Self {
            group,
            effect: Some(effect),
            deps,
            outdated: true,
            cleanup: None,
        }
    }
}

/// A memo slot.
pub(crate) struct MemoSlot {
    pub(crate) value: Box<dyn Any>,
    pub(crate) type_name: &'static str,
    pub(crate) deps: Deps,
}

impl MemoSlot {
    pub(crate) fn new<T: 'static>(value: T, deps: Deps) -> Self {
        Self {
            value: Box::new(value),
            type_name: type_name::<T>(),
            deps,
        }
    }
}

/// A persisted memory cell.
pub(crate) enum Slot {
    State(Box<dyn StateCell>),
    Effect(EffectSlot),
    Memo(MemoSlot),
}

impl Slot {
    pub(crate) fn kind(&self) -> SlotKind {
        match self {
            Slot::State(_) => SlotKind::State,
            Slot::Effect(effect) => SlotKind::Effect(effect.group),
            Slot::Memo(_) => SlotKind::Memo,
        }
    }

    /// Human-readable description including the stored value type.
    pub(crate) fn describe(&self) -> String {
        match self {
            Slot::State(cell) => format!("state<{}>", cell.type_name()),
            Slot::Effect(effect) => SlotKind::Effect(effect.group).to_string(),
            Slot::Memo(memo) => format!("memo<{}>", memo.type_name),
        }
    }
}
