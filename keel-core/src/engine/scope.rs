//! Registration Scope
//!
//! A [`Scope`] is the token the wrapped function receives on every pass. All
//! registrations go through it: state, effects, memos and the helpers built
//! from them. Each registration claims the slot at the memory cursor and
//! moves the cursor on.
//!
//! A scope only works while its engine is the one executing a pass. Calls
//! made at any other time (from an effect, after the pass returned, from a
//! different engine's pass) fail with
//! [`EngineError::RegistrationOutsideActiveEngine`].

use std::any::type_name;
use std::cell::RefCell;
use std::rc::Rc;

use super::context::ActivePass;
use super::runtime::{EngineCore, EngineId};
use super::setter::{Dispatch, Setter};
use crate::deps::{deps_changed, Deps};
use crate::error::{BoxError, EngineError, Result};
use crate::memory::{
    EffectFn, EffectGroup, EffectResult, EffectSlot, MemoSlot, Slot, SlotKind, StateSlot,
};

/// Registration token handed to the wrapped function.
#[derive(Clone)]
pub struct Scope {
    core: Rc<EngineCore>,
}

impl Scope {
    pub(crate) fn new(core: Rc<EngineCore>) -> Self {
        Self { core }
    }

    /// Identifier of the engine this scope registers into.
    pub fn engine_id(&self) -> EngineId {
        self.core.id()
    }

    fn ensure_active(&self) -> Result<()> {
        if ActivePass::is_active(self.core.id()) {
            Ok(())
        } else {
            Err(EngineError::RegistrationOutsideActiveEngine)
        }
    }

    /// Register a state slot initialized with `initial`.
    ///
    /// Returns the current value and the slot's setter. The setter compares
    /// equal across passes for as long as the slot lives.
    pub fn use_state<T>(&self, initial: T) -> Result<(T, Setter<T>)>
    where
        T: Clone + PartialEq + 'static,
    {
        self.try_use_state_with(move || Ok(initial))
    }

    /// Register a state slot whose initial value is computed on the first
    /// pass only.
    pub fn use_state_with<T, F>(&self, init: F) -> Result<(T, Setter<T>)>
    where
        T: Clone + PartialEq + 'static,
        F: FnOnce() -> T,
    {
        self.try_use_state_with(move || Ok(init()))
    }

    /// Like [`use_state_with`](Self::use_state_with), with a fallible
    /// initializer.
    pub fn try_use_state_with<T, F>(&self, init: F) -> Result<(T, Setter<T>)>
    where
        T: Clone + PartialEq + 'static,
        F: FnOnce() -> std::result::Result<T, BoxError>,
    {
        self.ensure_active()?;
        let memory = &self.core.memory;
        let index = memory.cursor();
        let generation = memory.generation();

        let existing = memory.read(SlotKind::State, |slot| match slot {
            None => Ok(None),
            Some(Slot::State(cell)) => match cell.as_any().downcast_ref::<StateSlot<T>>() {
                Some(state) => Ok(Some(state.value.clone())),
                None => Err(EngineError::CallOrderChanged {
                    index,
                    expected: format!("state<{}>", cell.type_name()),
                    found: format!("state<{}>", type_name::<T>()),
                }),
            },
            Some(other) => Err(EngineError::CallOrderChanged {
                index,
                expected: other.describe(),
                found: SlotKind::State.to_string(),
            }),
        })?;

        let value = match existing {
            Some(value) => value,
            None => {
                let value = init()?;
                memory.write(Slot::State(Box::new(StateSlot::new(value.clone()))));
                value
            }
        };

        memory.advance();
        Ok((value, Setter::new(&self.core, index, generation)))
    }

    /// Register an effect in the deferred group.
    ///
    /// The effect runs at the start of the next external invocation (or when
    /// the host triggers deferred effects). With `deps` of `None` it runs
    /// after every pass; otherwise only when an entry changed.
    pub fn use_effect<F>(&self, effect: F, deps: Option<Deps>) -> Result<()>
    where
        F: FnOnce() -> EffectResult + 'static,
    {
        self.register_effect(EffectGroup::Deferred, Box::new(effect), deps)
    }

    /// Register an effect in the immediate group, run as soon as the passes
    /// of the current invocation have settled.
    pub fn use_layout_effect<F>(&self, effect: F, deps: Option<Deps>) -> Result<()>
    where
        F: FnOnce() -> EffectResult + 'static,
    {
        self.register_effect(EffectGroup::Immediate, Box::new(effect), deps)
    }

    fn register_effect(&self, group: EffectGroup, effect: EffectFn, deps: Option<Deps>) -> Result<()> {
        self.ensure_active()?;
        let memory = &self.core.memory;
        let index = memory.cursor();
        let kind = SlotKind::Effect(group);

        let mut incoming = Some((effect, deps));
        let exists = memory.read(kind, |slot| match slot {
            None => Ok(false),
            Some(Slot::Effect(slot)) => {
                let Some((effect, deps)) = incoming.take() else {
                    return Ok(true);
                };
                // An outdated slot without a body is running right now.
                let pending = slot.outdated && slot.effect.is_some();
                if deps_changed(slot.deps.as_ref(), deps.as_ref())? || pending {
                    slot.effect = Some(effect);
                    slot.deps = deps;
                    slot.outdated = true;
                }
                Ok(true)
            }
            Some(other) => Err(EngineError::CallOrderChanged {
                index,
                expected: other.describe(),
                found: kind.to_string(),
            }),
        })?;

        if !exists {
            if let Some((effect, deps)) = incoming {
                memory.write(Slot::Effect(EffectSlot::new(group, effect, deps)));
            }
        }

        memory.advance();
        Ok(())
    }

    /// Register a memo: `compute` runs on the first pass and whenever an
    /// entry of `deps` changed, otherwise the cached value is returned.
    pub fn use_memo<T, F>(&self, compute: F, deps: Deps) -> Result<T>
    where
        T: Clone + 'static,
        F: FnOnce() -> T,
    {
        self.try_use_memo(move || Ok(compute()), deps)
    }

    /// Like [`use_memo`](Self::use_memo), with a fallible computation.
    pub fn try_use_memo<T, F>(&self, compute: F, deps: Deps) -> Result<T>
    where
        T: Clone + 'static,
        F: FnOnce() -> std::result::Result<T, BoxError>,
    {
        self.ensure_active()?;
        let memory = &self.core.memory;
        let index = memory.cursor();

        // Some(Some(v)): cached, Some(None): stale, None: first pass.
        let cached = memory.read(SlotKind::Memo, |slot| match slot {
            None => Ok(None),
            Some(Slot::Memo(memo)) => {
                let Some(value) = memo.value.downcast_ref::<T>() else {
                    return Err(EngineError::CallOrderChanged {
                        index,
                        expected: format!("memo<{}>", memo.type_name),
                        found: format!("memo<{}>", type_name::<T>()),
                    });
                };
                if deps_changed(Some(&memo.deps), Some(&deps))? {
                    Ok(Some(None))
                } else {
                    Ok(Some(Some(value.clone())))
                }
            }
            Some(other) => Err(EngineError::CallOrderChanged {
                index,
                expected: other.describe(),
                found: SlotKind::Memo.to_string(),
            }),
        })?;

        let value = match cached {
            Some(Some(value)) => value,
            _ => {
                let value = compute()?;
                memory.write(Slot::Memo(MemoSlot::new(value.clone(), deps)));
                value
            }
        };

        memory.advance();
        Ok(value)
    }

    /// Memoize a callback. The returned `Rc` is the same allocation for as
    /// long as `deps` stay equal.
    pub fn use_callback<F>(&self, callback: F, deps: Deps) -> Result<Rc<F>>
    where
        F: 'static,
    {
        self.use_memo(move || Rc::new(callback), deps)
    }

    /// A mutable cell that lives as long as the slot. Writing to it never
    /// causes a pass.
    pub fn use_ref<T>(&self, initial: T) -> Result<Rc<RefCell<T>>>
    where
        T: 'static,
    {
        self.use_memo(move || Rc::new(RefCell::new(initial)), Deps::new())
    }

    /// State driven by a reducer.
    ///
    /// A [`Dispatch`] folds actions through the reducer passed on the pass
    /// that returned it. Dispatches from different passes still compare
    /// equal.
    pub fn use_reducer<S, A, F>(&self, reducer: F, initial: S) -> Result<(S, Dispatch<A>)>
    where
        S: Clone + PartialEq + 'static,
        A: 'static,
        F: Fn(&S, A) -> S + 'static,
    {
        self.use_reducer_with(reducer, move || initial)
    }

    /// Like [`use_reducer`](Self::use_reducer), with the initial state
    /// computed by `init` on the first pass only.
    pub fn use_reducer_with<S, A, F, I>(&self, reducer: F, init: I) -> Result<(S, Dispatch<A>)>
    where
        S: Clone + PartialEq + 'static,
        A: 'static,
        F: Fn(&S, A) -> S + 'static,
        I: FnOnce() -> S,
    {
        let (state, setter) = self.use_state_with(init)?;
        Ok((state, Dispatch::new(setter, Rc::new(reducer))))
    }
}
