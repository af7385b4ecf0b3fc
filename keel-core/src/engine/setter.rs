//! State Setters
//!
//! A [`Setter`] is an explicit handle to one state slot: the owning engine,
//! the slot index and the memory generation the slot was created in. It
//! holds only a weak reference to the engine, so a setter kept alive by user
//! code never keeps the engine alive.
//!
//! Calling a setter queues a mutation on the slot. When the engine is
//! executing, its running loop applies the mutation before the invocation
//! returns. When the engine is idle, one continuation is scheduled to apply
//! it; further calls before that continuation runs are folded into it.

use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use tracing::debug;

use super::runtime::{EngineCore, EngineId};
use crate::error::BoxError;
use crate::memory::Mutation;

/// Handle that queues changes to one state slot.
pub struct Setter<T> {
    core: Weak<EngineCore>,
    engine: EngineId,
    index: usize,
    generation: u64,
    _marker: PhantomData<fn(T)>,
}

impl<T: 'static> Setter<T> {
    pub(crate) fn new(core: &Rc<EngineCore>, index: usize, generation: u64) -> Self {
        Self {
            core: Rc::downgrade(core),
            engine: core.id(),
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Replace the value.
    pub fn set(&self, value: T) {
        self.queue(Mutation::Replace(value));
    }

    /// Derive the next value from the value left by earlier queued changes.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T + 'static,
    {
        self.queue(Mutation::Update(Box::new(move |value| Ok(f(value)))));
    }

    /// Like [`update`](Self::update), for updaters that can fail. A failure
    /// aborts the invocation that applies it.
    pub fn try_update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> Result<T, BoxError> + 'static,
    {
        self.queue(Mutation::Update(Box::new(f)));
    }

    /// Index of the slot this setter writes to.
    pub fn index(&self) -> usize {
        self.index
    }

    fn queue(&self, mutation: Mutation<T>) {
        let Some(core) = self.core.upgrade() else {
            debug!(engine = self.engine.raw(), slot = self.index, "setter outlived its engine");
            return;
        };

        if core.memory.enqueue(self.index, self.generation, mutation) {
            core.mutation_queued(self.generation);
        } else {
            debug!(
                engine = self.engine.raw(),
                slot = self.index,
                generation = self.generation,
                "ignoring setter from a discarded generation"
            );
        }
    }
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            core: Weak::clone(&self.core),
            engine: self.engine,
            index: self.index,
            generation: self.generation,
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Setter<T> {
    fn eq(&self, other: &Self) -> bool {
        self.engine == other.engine
            && self.index == other.index
            && self.generation == other.generation
    }
}

impl<T> Eq for Setter<T> {}

impl<T> fmt::Debug for Setter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter")
            .field("engine", &self.engine.raw())
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Handle that feeds actions through a reducer into a state slot.
///
/// Two dispatchers are equal when they write to the same slot.
pub struct Dispatch<A> {
    send: Rc<dyn Fn(A)>,
    key: (EngineId, usize, u64),
}

impl<A: 'static> Dispatch<A> {
    pub(crate) fn new<S, F>(setter: Setter<S>, reducer: Rc<F>) -> Self
    where
        S: 'static,
        F: Fn(&S, A) -> S + 'static,
    {
        let key = (setter.engine, setter.index, setter.generation);
        Self {
            send: Rc::new(move |action: A| {
                let reducer = Rc::clone(&reducer);
                setter.update(move |state| reducer(state, action));
            }),
            key,
        }
    }

    /// Queue `action`.
    pub fn dispatch(&self, action: A) {
        (self.send)(action)
    }
}

impl<A> Clone for Dispatch<A> {
    fn clone(&self) -> Self {
        Self {
            send: Rc::clone(&self.send),
            key: self.key,
        }
    }
}

impl<A> PartialEq for Dispatch<A> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<A> fmt::Debug for Dispatch<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("engine", &self.key.0.raw())
            .field("index", &self.key.1)
            .finish()
    }
}
