//! Slot Memory
//!
//! The memory is the ordered list of slots owned by one engine, plus a cursor
//! that walks the list while the wrapped function registers its slots.
//!
//! # Passes
//!
//! On the first pass the memory is not yet *allocated*: every registration
//! finds no slot at the cursor and writes a new one. When the pass ends the
//! memory becomes allocated, and from then on each registration must find a
//! slot of the same kind at the same index, and every pass must register
//! exactly as many slots as the first one.
//!
//! # Borrowing
//!
//! Slots live behind a `RefCell`. User code (effects, cleanups, updaters)
//! may call back into the memory through a setter, so no borrow is ever held
//! while user code runs: work is detached from its slot, run, and the result
//! written back.
//!
//! # Generations
//!
//! Every hard reset bumps a generation counter. Setters and scheduled
//! continuations remember the generation they were created in, and become
//! no-ops once it is gone.

mod slot;

use std::cell::RefCell;

use tracing::{error, trace};

use crate::error::{EngineError, Result};

pub use slot::{Cleanup, EffectGroup, EffectResult, SlotKind};
pub(crate) use slot::{EffectFn, EffectSlot, MemoSlot, Mutation, Slot, StateSlot};

#[derive(Default)]
struct MemoryState {
    slots: Vec<Slot>,
    cursor: usize,
    allocated: bool,
    generation: u64,
}

impl MemoryState {
    /// Validate the slot at the cursor against the kind being registered.
    fn read(&mut self, expected: SlotKind) -> Result<Option<&mut Slot>> {
        let index = self.cursor;

        if index >= self.slots.len() {
            if self.allocated {
                return Err(EngineError::CallCountChanged {
                    expected: self.slots.len(),
                    found: index + 1,
                });
            }
            return Ok(None);
        }

        let slot = &mut self.slots[index];
        if slot.kind() != expected {
            return Err(EngineError::CallOrderChanged {
                index,
                expected: slot.describe(),
                found: expected.to_string(),
            });
        }

        Ok(Some(slot))
    }
}

/// Ordered slot storage for one engine.
#[derive(Default)]
pub(crate) struct Memory {
    state: RefCell<MemoryState>,
}

impl Memory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Current generation; bumped by every hard reset.
    pub(crate) fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    /// Check whether a pass has completed since the last hard reset.
    pub(crate) fn is_allocated(&self) -> bool {
        self.state.borrow().allocated
    }

    /// Index of the slot the next registration will use.
    pub(crate) fn cursor(&self) -> usize {
        self.state.borrow().cursor
    }

    /// Number of slots currently stored.
    pub(crate) fn len(&self) -> usize {
        self.state.borrow().slots.len()
    }

    /// Run `f` against the slot at the cursor, after validating its kind.
    ///
    /// `f` receives `None` when no slot exists yet (first pass). It must not
    /// run user code. The cursor is not moved.
    pub(crate) fn read<R>(
        &self,
        expected: SlotKind,
        f: impl FnOnce(Option<&mut Slot>) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.state.borrow_mut();
        let slot = state.read(expected)?;
        f(slot)
    }

    /// Store a newly created slot at the cursor.
    pub(crate) fn write(&self, slot: Slot) {
        let mut state = self.state.borrow_mut();
        let index = state.cursor;

        if index < state.slots.len() {
            state.slots[index] = slot;
        } else {
            state.slots.push(slot);
        }
    }

    /// Move the cursor to the next registration.
    pub(crate) fn advance(&self) {
        self.state.borrow_mut().cursor += 1;
    }

    /// Finish a pass: the registration count must match the slot count.
    pub(crate) fn end_pass(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();

        if state.cursor != state.slots.len() {
            return Err(EngineError::CallCountChanged {
                expected: state.slots.len(),
                found: state.cursor,
            });
        }

        state.allocated = true;
        state.cursor = 0;
        Ok(())
    }

    /// Discard every slot, running each live effect cleanup once.
    ///
    /// Cleanup failures are logged individually and never stop the loop.
    /// Returns the number of cleanups that ran.
    pub(crate) fn hard_reset(&self) -> usize {
        let slots = {
            let mut state = self.state.borrow_mut();
            state.allocated = false;
            state.cursor = 0;
            state.generation += 1;
            std::mem::take(&mut state.slots)
        };

        let mut disposed = 0;
        for (index, slot) in slots.into_iter().enumerate() {
            if let Slot::Effect(EffectSlot {
                cleanup: Some(cleanup),
                ..
            }) = slot
            {
                disposed += 1;
                if let Err(e) = cleanup.run() {
                    error!(slot = index, error = %e, "effect cleanup failed during reset");
                }
            }
        }

        trace!(disposed, "memory reset");
        disposed
    }

    /// Queue a mutation on a state slot.
    ///
    /// Returns `false` when the slot no longer exists in this generation.
    pub(crate) fn enqueue<T: 'static>(
        &self,
        index: usize,
        generation: u64,
        mutation: Mutation<T>,
    ) -> bool {
        let mut state = self.state.borrow_mut();
        if state.generation != generation {
            return false;
        }

        match state.slots.get_mut(index) {
            Some(Slot::State(cell)) => match cell.as_any_mut().downcast_mut::<StateSlot<T>>() {
                Some(slot) => {
                    slot.pending.push(mutation);
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Fold every state slot's queued mutations into its value.
    ///
    /// Returns `true` when at least one value ended up different from what
    /// it was before this call. Updaters run without the memory borrowed.
    pub(crate) fn apply_pending_state_changes(&self) -> Result<bool> {
        let mut changed = false;
        let generation = self.generation();

        for index in 0..self.len() {
            let batch = {
                let mut state = self.state.borrow_mut();
                match state.slots.get_mut(index) {
                    Some(Slot::State(cell)) => cell.take_batch(),
                    _ => None,
                }
            };

            let Some(batch) = batch else {
                continue;
            };

            if let Some(value) = batch.fold().map_err(EngineError::from)? {
                let mut state = self.state.borrow_mut();
                if state.generation != generation {
                    break;
                }
                if let Some(Slot::State(cell)) = state.slots.get_mut(index) {
                    cell.commit(value);
                    changed = true;
                }
            }
        }

        Ok(changed)
    }

    /// Run the outdated effects of one group.
    ///
    /// First every outdated effect's previous cleanup runs (failures are
    /// logged, never propagated), then every effect still outdated runs and
    /// its returned cleanup is kept. An effect failure stops the loop and is
    /// returned. Returns the number of effects that ran.
    pub(crate) fn trigger_effects(&self, group: EffectGroup) -> Result<usize> {
        let generation = self.generation();

        for index in 0..self.len() {
            let cleanup = {
                let mut state = self.state.borrow_mut();
                match state.slots.get_mut(index) {
                    Some(Slot::Effect(effect)) if effect.group == group && effect.outdated => {
                        effect.cleanup.take()
                    }
                    _ => None,
                }
            };

            if let Some(cleanup) = cleanup {
                if let Err(e) = cleanup.run() {
                    error!(slot = index, error = %e, "effect cleanup failed");
                }
            }
        }

        let mut ran = 0;
        for index in 0..self.len() {
            let effect = {
                let mut state = self.state.borrow_mut();
                if state.generation != generation {
                    break;
                }
                match state.slots.get_mut(index) {
                    Some(Slot::Effect(effect)) if effect.group == group && effect.outdated => {
                        effect.effect.take()
                    }
                    _ => None,
                }
            };

            let Some(effect) = effect else {
                continue;
            };

            let cleanup = effect().map_err(EngineError::from)?;
            ran += 1;

            let leftover = {
                let mut state = self.state.borrow_mut();
                let live = state.generation == generation;
                match state.slots.get_mut(index) {
                    Some(Slot::Effect(slot)) if live => {
                        // A body stored while this one ran is still due.
                        slot.outdated = slot.effect.is_some();
                        slot.cleanup = cleanup;
                        None
                    }
                    // The slot was discarded while the effect ran.
                    _ => cleanup,
                }
            };

            if let Some(cleanup) = leftover {
                if let Err(e) = cleanup.run() {
                    error!(slot = index, error = %e, "effect cleanup failed");
                }
            }
        }

        Ok(ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps;
    use crate::error::BoxError;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;

    fn state_slot<T: Clone + PartialEq + 'static>(value: T) -> Slot {
        Slot::State(Box::new(StateSlot::new(value)))
    }

    fn effect_slot(group: EffectGroup, effect: impl FnOnce() -> EffectResult + 'static) -> Slot {
        Slot::Effect(EffectSlot::new(group, Box::new(effect), None))
    }

    fn register(memory: &Memory, kind: SlotKind, create: impl FnOnce() -> Slot) -> Result<()> {
        let exists = memory.read(kind, |slot| Ok(slot.is_some()))?;
        if !exists {
            memory.write(create());
        }
        memory.advance();
        Ok(())
    }

    #[test]
    fn first_pass_allocates() {
        let memory = Memory::new();
        assert!(!memory.is_allocated());

        register(&memory, SlotKind::State, || state_slot(1)).unwrap();
        register(&memory, SlotKind::Memo, || Slot::Memo(MemoSlot::new(2, deps![]))).unwrap();
        memory.end_pass().unwrap();

        assert!(memory.is_allocated());
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.cursor(), 0);
    }

    #[test]
    fn extra_registration_changes_call_count() {
        let memory = Memory::new();
        register(&memory, SlotKind::State, || state_slot(1)).unwrap();
        memory.end_pass().unwrap();

        register(&memory, SlotKind::State, || state_slot(1)).unwrap();
        let error = register(&memory, SlotKind::State, || state_slot(1)).unwrap_err();
        assert!(matches!(
            error,
            EngineError::CallCountChanged { expected: 1, found: 2 }
        ));
    }

    #[test]
    fn missing_registration_changes_call_count() {
        let memory = Memory::new();
        register(&memory, SlotKind::State, || state_slot(1)).unwrap();
        register(&memory, SlotKind::State, || state_slot(2)).unwrap();
        memory.end_pass().unwrap();

        register(&memory, SlotKind::State, || state_slot(1)).unwrap();
        assert!(matches!(
            memory.end_pass(),
            Err(EngineError::CallCountChanged { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn different_kind_changes_call_order() {
        let memory = Memory::new();
        register(&memory, SlotKind::State, || state_slot(1)).unwrap();
        memory.end_pass().unwrap();

        let error = register(&memory, SlotKind::Memo, || unreachable!()).unwrap_err();
        match error {
            EngineError::CallOrderChanged {
                index,
                expected,
                found,
            } => {
                assert_eq!(index, 0);
                assert_eq!(expected, "state<i32>");
                assert_eq!(found, "memo");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn effect_groups_are_distinct_kinds() {
        let memory = Memory::new();
        register(&memory, SlotKind::Effect(EffectGroup::Immediate), || {
            effect_slot(EffectGroup::Immediate, || Ok(None))
        })
        .unwrap();
        memory.end_pass().unwrap();

        let error = register(&memory, SlotKind::Effect(EffectGroup::Deferred), || {
            unreachable!()
        })
        .unwrap_err();
        assert!(matches!(error, EngineError::CallOrderChanged { .. }));
    }

    #[test]
    fn pending_changes_apply_with_identity_check() {
        let memory = Memory::new();
        register(&memory, SlotKind::State, || state_slot("a")).unwrap();
        memory.end_pass().unwrap();

        assert!(memory.enqueue(0, memory.generation(), Mutation::Replace("b")));
        assert!(memory.enqueue(0, memory.generation(), Mutation::Replace("a")));
        assert!(!memory.apply_pending_state_changes().unwrap());

        assert!(memory.enqueue(0, memory.generation(), Mutation::Replace("c")));
        assert!(memory.apply_pending_state_changes().unwrap());
        assert!(!memory.apply_pending_state_changes().unwrap());
    }

    #[test]
    fn enqueue_rejects_stale_generation_and_wrong_type() {
        let memory = Memory::new();
        register(&memory, SlotKind::State, || state_slot(1_u32)).unwrap();
        memory.end_pass().unwrap();

        let generation = memory.generation();
        assert!(!memory.enqueue(0, generation, Mutation::Replace("wrong type")));
        assert!(!memory.enqueue(5, generation, Mutation::Replace(2_u32)));

        memory.hard_reset();
        assert!(!memory.enqueue(0, generation, Mutation::Replace(2_u32)));
    }

    #[test]
    fn updater_errors_propagate() {
        let memory = Memory::new();
        register(&memory, SlotKind::State, || state_slot(0)).unwrap();
        memory.end_pass().unwrap();

        let updater = |_: &i32| -> std::result::Result<i32, BoxError> { Err("bad update".into()) };
        memory.enqueue(0, memory.generation(), Mutation::Update(Box::new(updater)));

        let error = memory.apply_pending_state_changes().unwrap_err();
        assert_eq!(error.to_string(), "user code failed: bad update");
    }

    #[test]
    fn trigger_cleans_up_before_running() {
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let memory = Memory::new();

        let l = log.clone();
        register(&memory, SlotKind::Effect(EffectGroup::Immediate), || {
            effect_slot(EffectGroup::Immediate, move || {
                l.borrow_mut().push("run 1");
                let l = l.clone();
                Ok(Some(Cleanup::new(move || l.borrow_mut().push("cleanup 1"))))
            })
        })
        .unwrap();
        memory.end_pass().unwrap();
        assert_eq!(memory.trigger_effects(EffectGroup::Immediate).unwrap(), 1);

        // Re-mark the effect outdated with a new body, as a registration would.
        let l = log.clone();
        memory
            .read(SlotKind::Effect(EffectGroup::Immediate), |slot| {
                if let Some(Slot::Effect(effect)) = slot {
                    effect.outdated = true;
                    effect.effect = Some(Box::new(move || {
                        l.borrow_mut().push("run 2");
                        Ok(None)
                    }));
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(memory.trigger_effects(EffectGroup::Immediate).unwrap(), 1);
        assert_eq!(*log.borrow(), vec!["run 1", "cleanup 1", "run 2"]);
    }

    #[test]
    fn trigger_only_touches_requested_group() {
        let memory = Memory::new();
        let ran = Rc::new(StdRefCell::new(Vec::new()));

        let r = ran.clone();
        register(&memory, SlotKind::Effect(EffectGroup::Deferred), || {
            effect_slot(EffectGroup::Deferred, move || {
                r.borrow_mut().push("deferred");
                Ok(None)
            })
        })
        .unwrap();
        memory.end_pass().unwrap();

        assert_eq!(memory.trigger_effects(EffectGroup::Immediate).unwrap(), 0);
        assert!(ran.borrow().is_empty());
        assert_eq!(memory.trigger_effects(EffectGroup::Deferred).unwrap(), 1);
        assert_eq!(*ran.borrow(), vec!["deferred"]);
        assert_eq!(memory.trigger_effects(EffectGroup::Deferred).unwrap(), 0);
    }

    #[test]
    fn hard_reset_runs_every_cleanup_despite_failures() {
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let memory = Memory::new();

        for name in ["first", "second", "third"] {
            let l = log.clone();
            register(&memory, SlotKind::Effect(EffectGroup::Immediate), move || {
                effect_slot(EffectGroup::Immediate, move || {
                    Ok(Some(Cleanup::fallible(move || {
                        l.borrow_mut().push(name);
                        if name == "second" {
                            Err("cleanup failed".into())
                        } else {
                            Ok(())
                        }
                    })))
                })
            })
            .unwrap();
        }
        memory.end_pass().unwrap();
        memory.trigger_effects(EffectGroup::Immediate).unwrap();

        let generation = memory.generation();
        assert_eq!(memory.hard_reset(), 3);
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
        assert!(!memory.is_allocated());
        assert_eq!(memory.len(), 0);
        assert_eq!(memory.generation(), generation + 1);

        // Nothing left to dispose.
        assert_eq!(memory.hard_reset(), 0);
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn failing_effect_propagates_and_keeps_earlier_cleanups() {
        let memory = Memory::new();
        let cleaned = Rc::new(StdRefCell::new(0));

        let c = cleaned.clone();
        register(&memory, SlotKind::Effect(EffectGroup::Immediate), || {
            effect_slot(EffectGroup::Immediate, move || {
                Ok(Some(Cleanup::new(move || *c.borrow_mut() += 1)))
            })
        })
        .unwrap();
        register(&memory, SlotKind::Effect(EffectGroup::Immediate), || {
            effect_slot(EffectGroup::Immediate, || Err("effect failed".into()))
        })
        .unwrap();
        memory.end_pass().unwrap();

        assert!(memory.trigger_effects(EffectGroup::Immediate).is_err());
        assert_eq!(*cleaned.borrow(), 0);

        memory.hard_reset();
        assert_eq!(*cleaned.borrow(), 1);
    }
}
