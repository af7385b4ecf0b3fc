//! Push-style handle.
//!
//! Events pushed by one invocation are grouped into a batch: every
//! intermediate value, then the final value or the error that ended it. A
//! reset forms a batch on its own. Batches list their events newest first.

use std::cell::RefCell;
use std::rc::Rc;

use crate::deferred::{Deferred, Next};
use crate::engine::{Engine, EngineBuilder, HostEvent, Outcome, Scope};
use crate::error::Result;

/// Events of one invocation, newest first. Never empty.
pub type EventBatch<R> = Vec<HostEvent<R>>;

struct Latest<R> {
    event: Option<HostEvent<R>>,
    batch: EventBatch<R>,
    next: Deferred<EventBatch<R>>,
}

impl<R: Clone> Latest<R> {
    fn record(latest: &RefCell<Self>, event: HostEvent<R>) {
        let closed = {
            let mut latest = latest.borrow_mut();
            let closes = !matches!(event, HostEvent::Value { intermediate: true, .. });
            latest.event = Some(event.clone());
            latest.batch.insert(0, event);
            if closes {
                let batch = std::mem::take(&mut latest.batch);
                Some((std::mem::take(&mut latest.next), batch))
            } else {
                None
            }
        };

        if let Some((pending, batch)) = closed {
            pending.resolve(batch);
        }
    }
}

/// An engine whose events are recorded as they are pushed.
///
/// [`latest`](Self::latest) returns the most recent event, and
/// [`next_event_batch`](Self::next_event_batch) a future for the next
/// completed batch.
pub struct Subject<A, R> {
    engine: Engine<A, R>,
    latest: Rc<RefCell<Latest<R>>>,
}

impl<A, R> Subject<A, R>
where
    A: PartialEq + 'static,
    R: Clone + 'static,
{
    pub fn new<F>(body: F) -> Self
    where
        F: FnMut(&Scope, &A) -> Result<R> + 'static,
    {
        Self::with_builder(EngineBuilder::new(), body)
    }

    /// Build from a configured builder. The builder's sink is replaced.
    pub fn with_builder<F>(builder: EngineBuilder<A, R>, body: F) -> Self
    where
        F: FnMut(&Scope, &A) -> Result<R> + 'static,
    {
        let latest = Rc::new(RefCell::new(Latest {
            event: None,
            batch: Vec::new(),
            next: Deferred::new(),
        }));

        let recorder = Rc::clone(&latest);
        let engine = builder
            .sink(move |event: HostEvent<R>| Latest::record(&recorder, event))
            .build(body);

        Self { engine, latest }
    }

    /// See [`Engine::invoke`].
    pub fn invoke(&self, args: A) -> Result<Outcome<R>> {
        self.engine.invoke(args)
    }

    /// See [`Engine::reset`].
    pub fn reset(&self) {
        self.engine.reset();
    }

    pub fn latest(&self) -> Option<HostEvent<R>> {
        self.latest.borrow().event.clone()
    }

    /// Resolves with the next batch completed after this call. A batch
    /// completed before anyone asked for it is not replayed.
    pub fn next_event_batch(&self) -> Next<EventBatch<R>> {
        self.latest.borrow().next.future()
    }

    pub fn engine(&self) -> &Engine<A, R> {
        &self.engine
    }
}
