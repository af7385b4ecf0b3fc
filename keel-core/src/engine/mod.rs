//! Execution Engine
//!
//! An [`Engine`] owns one slot memory and the wrapped function, and drives
//! the function to a fixed point on every invocation.
//!
//! # Invocation
//!
//! 1. An external invocation first runs the deferred effects left outdated
//!    by the previous invocation, then applies pending state changes.
//! 2. Inner loop: one pass of the wrapped function, then pending state
//!    changes are applied; while that changed a value, pass again. Every
//!    result but the last is intermediate.
//! 3. Once the inner loop settles, immediate effects run. If they changed
//!    state, go back to 2.
//!
//! Any failure hard-resets the memory and is returned to the caller (and
//! pushed to the sink). The next invocation starts from scratch.
//!
//! # Continuations
//!
//! A setter called while the engine is idle schedules one continuation on
//! the engine's [`Schedule`]. The continuation re-invokes with the last
//! arguments; its results and failures can only be observed through the
//! [`EventSink`].
//!
//! # Example
//!
//! ```rust
//! use keel_core::{Engine, TaskQueue};
//! use std::rc::Rc;
//!
//! let queue = TaskQueue::new();
//! let engine = Engine::builder()
//!     .scheduler(Rc::new(queue.clone()))
//!     .build(|scope, step: &i32| {
//!         let (count, set_count) = scope.use_state(0)?;
//!         scope.use_layout_effect(
//!             move || {
//!                 if count < 3 {
//!                     set_count.set(count + 1);
//!                 }
//!                 Ok(None)
//!             },
//!             None,
//!         )?;
//!         Ok(count * step)
//!     });
//!
//! let outcome = engine.invoke(10).unwrap();
//! assert_eq!(outcome.value, 30);
//! assert_eq!(outcome.intermediates, vec![0, 10, 20]);
//! assert!(queue.is_empty());
//! ```

mod context;
mod event;
mod runtime;
mod scheduler;
mod scope;
mod setter;

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use tracing::{debug, debug_span, trace, warn};

pub(crate) use self::context::ActivePass;
use self::runtime::{EngineCore, Executing, Resume};
pub use self::runtime::{EngineId, Status};
pub use self::event::{EventSink, HostEvent, Outcome};
#[cfg(feature = "tokio")]
pub use self::scheduler::TokioLocal;
pub use self::scheduler::{Schedule, Task, TaskQueue};
pub use self::scope::Scope;
pub use self::setter::{Dispatch, Setter};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::memory::EffectGroup;

type Body<A, R> = Box<dyn FnMut(&Scope, &A) -> Result<R>>;

/// What started an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// `invoke` with new arguments.
    External,
    /// `rerun` with the last arguments.
    Rerun,
    /// A continuation scheduled by an out-of-band setter.
    Continuation,
}

/// Builder for an [`Engine`].
pub struct EngineBuilder<A, R> {
    config: EngineConfig,
    sink: Option<Box<dyn EventSink<R>>>,
    scheduler: Option<Rc<dyn Schedule>>,
    _args: PhantomData<fn(A)>,
}

impl<A, R> Default for EngineBuilder<A, R> {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            sink: None,
            scheduler: None,
            _args: PhantomData,
        }
    }
}

impl<A, R> EngineBuilder<A, R>
where
    A: PartialEq + 'static,
    R: Clone + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Receive every value, reset and failure as a [`HostEvent`].
    pub fn sink(mut self, sink: impl EventSink<R> + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Run continuations on `scheduler` instead of [`TaskQueue::local`].
    pub fn scheduler(mut self, scheduler: Rc<dyn Schedule>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Build an engine around `body`. Nothing runs until the first
    /// invocation.
    pub fn build<F>(self, body: F) -> Engine<A, R>
    where
        F: FnMut(&Scope, &A) -> Result<R> + 'static,
    {
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Rc::new(TaskQueue::local()) as Rc<dyn Schedule>);
        let core = Rc::new(EngineCore::new(scheduler));

        let inner = Rc::new(EngineInner {
            scope: Scope::new(Rc::clone(&core)),
            core,
            config: self.config,
            body: RefCell::new(Box::new(body)),
            args: RefCell::new(None),
            last: RefCell::new(None),
            sink: self.sink,
        });

        let resume: Weak<dyn Resume> = Rc::downgrade(&inner) as Weak<dyn Resume>;
        inner.core.bind(resume);

        Engine { inner }
    }
}

/// Runs a function to a fixed point, keeping its slots between invocations.
///
/// `A` is the argument type, `R` the result type.
pub struct Engine<A, R> {
    inner: Rc<EngineInner<A, R>>,
}

impl<A, R> Engine<A, R>
where
    A: PartialEq + 'static,
    R: Clone + 'static,
{
    /// Create an engine with the default configuration.
    pub fn new<F>(body: F) -> Self
    where
        F: FnMut(&Scope, &A) -> Result<R> + 'static,
    {
        EngineBuilder::new().build(body)
    }

    pub fn builder() -> EngineBuilder<A, R> {
        EngineBuilder::new()
    }

    /// Run an external invocation with `args`.
    pub fn invoke(&self, args: A) -> Result<Outcome<R>> {
        self.inner.run(Trigger::External, Some(args))?.ok_or(EngineError::NeverInvoked)
    }

    /// Run an external invocation with the last arguments. At least one pass
    /// is executed.
    pub fn rerun(&self) -> Result<Outcome<R>> {
        self.inner.run(Trigger::Rerun, None)?.ok_or(EngineError::NeverInvoked)
    }

    /// Discard every slot, running each live effect cleanup once.
    ///
    /// Always succeeds. Called while the engine is executing (from one of its
    /// own effects), the reset happens once the invocation has unwound.
    pub fn reset(&self) {
        self.inner.reset();
    }

    /// Run the deferred effects left outdated by the last invocation.
    ///
    /// State changes made by these effects schedule a continuation. A
    /// failure hard-resets the engine. Returns the number of effects run.
    pub fn trigger_deferred_effects(&self) -> Result<usize> {
        self.inner.trigger_deferred_effects()
    }

    pub fn id(&self) -> EngineId {
        self.inner.core.id()
    }

    pub fn status(&self) -> Status {
        self.inner.core.status()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Result of the last successful invocation, if the engine has not been
    /// reset since.
    pub fn last_value(&self) -> Option<R> {
        self.inner.last.borrow().clone()
    }
}

struct EngineInner<A, R> {
    core: Rc<EngineCore>,
    scope: Scope,
    config: EngineConfig,
    body: RefCell<Body<A, R>>,
    args: RefCell<Option<Rc<A>>>,
    last: RefCell<Option<R>>,
    sink: Option<Box<dyn EventSink<R>>>,
}

impl<A, R> EngineInner<A, R>
where
    A: PartialEq + 'static,
    R: Clone + 'static,
{
    fn emit(&self, event: HostEvent<R>) {
        if let Some(sink) = &self.sink {
            sink.on_event(event);
        }
    }

    /// Refusals that leave the engine untouched.
    fn preflight(&self) -> Result<()> {
        if self.core.status() == Status::Executing {
            return Err(EngineError::Reentrant);
        }
        if ActivePass::is_any_active() {
            return Err(EngineError::NestedPass);
        }
        Ok(())
    }

    /// Returns `None` when a continuation found nothing to deliver.
    fn run(&self, trigger: Trigger, args: Option<A>) -> Result<Option<Outcome<R>>> {
        let async_origin = trigger == Trigger::Continuation;
        self.preflight()?;

        let span = debug_span!(
            "invoke",
            engine = %self.config.label(),
            id = self.core.id().raw()
        );
        let _enter = span.enter();

        let (args, same_args) = match args {
            Some(args) => {
                let same = self
                    .args
                    .borrow()
                    .as_deref()
                    .map_or(false, |previous| *previous == args);
                let args = Rc::new(args);
                *self.args.borrow_mut() = Some(Rc::clone(&args));
                (args, same)
            }
            None => match self.args.borrow().clone() {
                Some(args) => (args, false),
                None => return Err(EngineError::NeverInvoked),
            },
        };

        debug!(?trigger, "invocation started");
        let result = self.execute(trigger, &args, same_args);

        let delivered = match result {
            Ok(Some(outcome)) => {
                if outcome.passes > 0 {
                    *self.last.borrow_mut() = Some(outcome.value.clone());
                    for value in &outcome.intermediates {
                        self.emit(HostEvent::Value {
                            value: value.clone(),
                            async_origin,
                            intermediate: true,
                        });
                    }
                    self.emit(HostEvent::Value {
                        value: outcome.value.clone(),
                        async_origin,
                        intermediate: false,
                    });
                }
                debug!(passes = outcome.passes, "invocation finished");
                Ok(Some(outcome))
            }
            Ok(None) => {
                debug!("continuation found no change");
                Ok(None)
            }
            Err(error) => {
                let disposed = self.core.hard_reset();
                *self.last.borrow_mut() = None;
                debug!(%error, disposed, "invocation failed, memory reset");
                self.emit(HostEvent::Error {
                    cause: error.clone(),
                    async_origin,
                });
                Err(error)
            }
        };

        if self.core.take_reset_request() {
            self.reset();
        }

        delivered
    }

    fn execute(&self, trigger: Trigger, args: &A, same_args: bool) -> Result<Option<Outcome<R>>> {
        let memory = &self.core.memory;
        let _executing = Executing::enter(&self.core);

        let changed = match trigger {
            Trigger::External | Trigger::Rerun => {
                memory.trigger_effects(EffectGroup::Deferred)?;
                memory.apply_pending_state_changes()?
            }
            Trigger::Continuation => {
                let changed = memory.apply_pending_state_changes()?;
                if !changed {
                    return Ok(None);
                }
                changed
            }
        };

        if trigger == Trigger::External
            && self.config.skip_unchanged_args()
            && same_args
            && !changed
            && memory.is_allocated()
        {
            if let Some(value) = self.last.borrow().clone() {
                trace!("arguments unchanged, reusing last result");
                return Ok(Some(Outcome {
                    value,
                    intermediates: Vec::new(),
                    async_origin: false,
                    passes: 0,
                }));
            }
        }

        let mut results = Vec::new();
        loop {
            loop {
                if let Some(limit) = self.config.max_passes() {
                    if results.len() >= limit {
                        return Err(EngineError::PassLimitExceeded { limit });
                    }
                }
                results.push(self.pass(args)?);
                if !memory.apply_pending_state_changes()? {
                    break;
                }
            }

            let ran = memory.trigger_effects(EffectGroup::Immediate)?;
            if ran == 0 || !memory.apply_pending_state_changes()? {
                break;
            }
        }

        let passes = results.len();
        let Some(value) = results.pop() else {
            return Ok(None);
        };

        Ok(Some(Outcome {
            value,
            intermediates: results,
            async_origin: trigger == Trigger::Continuation,
            passes,
        }))
    }

    fn pass(&self, args: &A) -> Result<R> {
        let _pass = ActivePass::enter(&self.core)?;
        let value = {
            let mut body = self.body.borrow_mut();
            (*body)(&self.scope, args)?
        };
        self.core.memory.end_pass()?;
        trace!(slots = self.core.memory.len(), "pass complete");
        Ok(value)
    }

    fn reset(&self) {
        if self.core.status() == Status::Executing {
            debug!(engine = self.core.id().raw(), "reset requested during invocation");
            self.core.request_reset();
            return;
        }

        let disposed = self.core.hard_reset();
        *self.last.borrow_mut() = None;
        debug!(engine = self.core.id().raw(), disposed, "engine reset");
        self.emit(HostEvent::Reset);
    }

    fn trigger_deferred_effects(&self) -> Result<usize> {
        self.preflight()?;

        match self.core.memory.trigger_effects(EffectGroup::Deferred) {
            Ok(ran) => Ok(ran),
            Err(error) => {
                self.core.hard_reset();
                *self.last.borrow_mut() = None;
                self.emit(HostEvent::Error {
                    cause: error.clone(),
                    async_origin: false,
                });
                Err(error)
            }
        }
    }
}

impl<A, R> Resume for EngineInner<A, R>
where
    A: PartialEq + 'static,
    R: Clone + 'static,
{
    fn resume(&self, generation: u64) {
        if !self.core.claim_continuation(generation) {
            return;
        }

        match self.run(Trigger::Continuation, None) {
            Ok(_) => {}
            // The running invocation applies the queued changes itself.
            Err(EngineError::Reentrant) => {
                debug!(engine = self.core.id().raw(), "continuation dropped during invocation");
            }
            Err(EngineError::NestedPass) => {
                debug!(engine = self.core.id().raw(), "continuation parked behind active pass");
                ActivePass::park(&self.core, generation);
            }
            Err(EngineError::NeverInvoked) => {
                debug!(engine = self.core.id().raw(), "continuation before first invocation");
            }
            Err(error) => {
                warn!(engine = self.core.id().raw(), %error, "continuation failed");
            }
        }
    }
}

impl<A, R> Drop for EngineInner<A, R> {
    fn drop(&mut self) {
        let disposed = self.core.hard_reset();
        trace!(engine = self.core.id().raw(), disposed, "engine dropped");
    }
}
