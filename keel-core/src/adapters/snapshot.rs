//! Pull-style process handle.
//!
//! A [`Snapshot`] starts an engine with its first arguments and then exposes
//! the value the engine settled on. Later values (from [`Snapshot::update`]
//! or from continuations) replace it and resolve the pending
//! [`Snapshot::next`] future. Any failure stops the process.

use std::cell::RefCell;
use std::rc::Rc;

use futures_util::stream::{self, LocalBoxStream, StreamExt};
use tracing::debug;

use crate::deferred::{Deferred, Next};
use crate::engine::{Engine, EngineBuilder, HostEvent, Scope};
use crate::error::{EngineError, Result};

type Change<R> = Result<Option<R>>;

struct Shared<R> {
    value: Option<R>,
    next: Deferred<Change<R>>,
    stopped: bool,
}

impl<R: Clone + PartialEq> Shared<R> {
    fn observe(shared: &RefCell<Self>, event: HostEvent<R>) {
        let resolved = {
            let mut state = shared.borrow_mut();
            match event {
                HostEvent::Value {
                    value,
                    intermediate: false,
                    ..
                } => {
                    if state.value.as_ref() == Some(&value) {
                        None
                    } else {
                        state.value = Some(value.clone());
                        Some((std::mem::take(&mut state.next), Ok(Some(value))))
                    }
                }
                HostEvent::Value { .. } => None,
                HostEvent::Error { cause, .. } => {
                    state.stopped = true;
                    Some((std::mem::take(&mut state.next), Err(cause)))
                }
                HostEvent::Reset => {
                    state.stopped = true;
                    Some((std::mem::take(&mut state.next), Ok(None)))
                }
            }
        };

        // Wakers run outside the borrow.
        if let Some((deferred, change)) = resolved {
            deferred.resolve(change);
        }
    }

    fn next(shared: &RefCell<Self>) -> Next<Change<R>> {
        let state = shared.borrow();
        if state.stopped {
            let done = Deferred::new();
            done.resolve(Ok(None));
            return done.future();
        }
        state.next.future()
    }
}

/// A started engine that tracks its current value.
pub struct Snapshot<A, R> {
    engine: Engine<A, R>,
    shared: Rc<RefCell<Shared<R>>>,
}

impl<A, R> Snapshot<A, R>
where
    A: PartialEq + 'static,
    R: Clone + PartialEq + 'static,
{
    /// Build an engine around `body` and run its first invocation.
    pub fn start<F>(body: F, args: A) -> Result<Self>
    where
        F: FnMut(&Scope, &A) -> Result<R> + 'static,
    {
        Self::start_with(EngineBuilder::new(), body, args)
    }

    /// Like [`start`](Self::start), with a configured builder. The builder's
    /// sink is replaced.
    pub fn start_with<F>(builder: EngineBuilder<A, R>, body: F, args: A) -> Result<Self>
    where
        F: FnMut(&Scope, &A) -> Result<R> + 'static,
    {
        let shared = Rc::new(RefCell::new(Shared {
            value: None,
            next: Deferred::new(),
            stopped: false,
        }));

        let observed = Rc::clone(&shared);
        let engine = builder
            .sink(move |event: HostEvent<R>| Shared::observe(&observed, event))
            .build(body);

        engine.invoke(args)?;
        Ok(Self { engine, shared })
    }

    /// The value of the last successful invocation.
    pub fn value(&self) -> Option<R> {
        self.shared.borrow().value.clone()
    }

    /// Resolves with the next different value, `Ok(None)` once the process
    /// has stopped, or the error that stopped it.
    pub fn next(&self) -> Next<Change<R>> {
        Shared::next(&self.shared)
    }

    /// Invoke with new arguments and return the settled value.
    pub fn update(&self, args: A) -> Result<R> {
        if self.is_stopped() {
            return Err(EngineError::Stopped);
        }

        match self.engine.invoke(args) {
            Ok(outcome) => Ok(outcome.value),
            Err(error) => {
                self.fail(error.clone());
                Err(error)
            }
        }
    }

    /// Stop the process and dispose its effects. Idempotent.
    pub fn stop(&self) {
        {
            let mut state = self.shared.borrow_mut();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }
        debug!(engine = self.engine.id().raw(), "snapshot stopped");
        self.engine.reset();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.borrow().stopped
    }

    /// Later values as a stream. The stream ends after the process stops;
    /// a failure is yielded once before the end.
    pub fn values(&self) -> LocalBoxStream<'static, Result<R>> {
        stream::unfold(Some(Rc::clone(&self.shared)), |shared| async move {
            let shared = shared?;
            let next = Shared::next(&shared);
            match next.await {
                Ok(Some(value)) => Some((Ok(value), Some(shared))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
        .boxed_local()
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &Engine<A, R> {
        &self.engine
    }

    /// Stop after a failure the sink did not see.
    fn fail(&self, error: EngineError) {
        let pending = {
            let mut state = self.shared.borrow_mut();
            if state.stopped {
                return;
            }
            state.stopped = true;
            std::mem::take(&mut state.next)
        };
        pending.resolve(Err(error));
        self.engine.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TaskQueue;
    use crate::error::BoxError;
    use futures_util::FutureExt;
    use std::cell::Cell;

    fn builder(queue: &TaskQueue) -> EngineBuilder<u32, u32> {
        EngineBuilder::new().scheduler(Rc::new(queue.clone()))
    }

    #[test]
    fn start_exposes_the_first_value() {
        let queue = TaskQueue::new();
        let snapshot = Snapshot::start_with(builder(&queue), |_, n: &u32| Ok(n * 2), 4).unwrap();
        assert_eq!(snapshot.value(), Some(8));
        assert!(snapshot.next().now_or_never().is_none());
    }

    #[test]
    fn update_resolves_next() {
        let queue = TaskQueue::new();
        let snapshot = Snapshot::start_with(builder(&queue), |_, n: &u32| Ok(n * 2), 1).unwrap();
        let next = snapshot.next();

        assert_eq!(snapshot.update(5).unwrap(), 10);
        assert_eq!(next.now_or_never().unwrap().unwrap(), Some(10));
        assert_eq!(snapshot.value(), Some(10));
    }

    #[test]
    fn continuation_values_arrive_through_next() {
        let queue = TaskQueue::new();
        let setter = Rc::new(RefCell::new(None));
        let exposed = setter.clone();

        let snapshot = Snapshot::start_with(
            builder(&queue),
            move |scope, _: &u32| {
                let (count, set_count) = scope.use_state(0_u32)?;
                *exposed.borrow_mut() = Some(set_count);
                Ok(count)
            },
            0,
        )
        .unwrap();

        let next = snapshot.next();
        if let Some(set_count) = setter.borrow().as_ref() {
            set_count.set(3);
        }
        assert!(next.clone().now_or_never().is_none());

        queue.run_until_idle();
        assert_eq!(next.now_or_never().unwrap().unwrap(), Some(3));
    }

    #[test]
    fn continuation_drained_during_update_keeps_running() {
        let queue = TaskQueue::new();
        let drain = queue.clone();
        let setter = Rc::new(RefCell::new(None));
        let exposed = setter.clone();

        let snapshot = Snapshot::start_with(
            builder(&queue),
            move |scope, n: &u32| {
                let (count, set_count) = scope.use_state(0_u32)?;
                *exposed.borrow_mut() = Some(set_count);
                let drain = drain.clone();
                scope.use_layout_effect(
                    move || {
                        drain.run_until_idle();
                        Ok(None)
                    },
                    None,
                )?;
                Ok(count + n)
            },
            0,
        )
        .unwrap();

        if let Some(set_count) = setter.borrow().as_ref() {
            set_count.set(5);
        }
        let next = snapshot.next();

        assert_eq!(snapshot.update(1).unwrap(), 6);
        assert!(!snapshot.is_stopped());
        assert_eq!(snapshot.value(), Some(6));
        assert_eq!(next.now_or_never().unwrap().unwrap(), Some(6));
        assert!(queue.is_empty());
    }

    #[test]
    fn stop_disposes_and_ends_next() {
        let queue = TaskQueue::new();
        let disposed = Rc::new(Cell::new(0));
        let counter = disposed.clone();

        let snapshot = Snapshot::start_with(
            builder(&queue),
            move |scope, _: &u32| {
                let counter = counter.clone();
                scope.use_layout_effect(
                    move || {
                        Ok(Some(crate::Cleanup::new(move || {
                            counter.set(counter.get() + 1)
                        })))
                    },
                    Some(crate::deps![]),
                )?;
                Ok(0)
            },
            0,
        )
        .unwrap();

        let pending = snapshot.next();
        snapshot.stop();
        snapshot.stop();

        assert!(snapshot.is_stopped());
        assert_eq!(disposed.get(), 1);
        assert_eq!(pending.now_or_never().unwrap().unwrap(), None);
        assert_eq!(snapshot.next().now_or_never().unwrap().unwrap(), None);
        assert!(matches!(snapshot.update(1), Err(EngineError::Stopped)));
    }

    #[test]
    fn failure_rejects_next_and_stops() {
        let queue = TaskQueue::new();
        let snapshot = Snapshot::start_with(
            builder(&queue),
            |_, n: &u32| {
                if *n > 1 {
                    return Err(EngineError::from(BoxError::from("too large")));
                }
                Ok(*n)
            },
            1,
        )
        .unwrap();

        let pending = snapshot.next();
        assert!(snapshot.update(2).is_err());
        assert!(pending.now_or_never().unwrap().is_err());
        assert!(snapshot.is_stopped());
    }

    #[test]
    fn values_stream_ends_after_stop() {
        let queue = TaskQueue::new();
        let snapshot = Snapshot::start_with(builder(&queue), |_, n: &u32| Ok(*n), 0).unwrap();
        let mut values = snapshot.values();

        let mut first = values.next();
        assert!((&mut first).now_or_never().is_none());
        snapshot.update(7).unwrap();
        assert_eq!(first.now_or_never().unwrap().unwrap().unwrap(), 7);

        snapshot.stop();
        assert!(values.next().now_or_never().unwrap().is_none());
    }
}
