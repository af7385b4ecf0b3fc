//! Continuation Scheduling
//!
//! An out-of-band state change (a setter called while its engine is idle)
//! must re-run the engine later, never inline. The engine does not know how
//! the host defers work, so scheduling is an injected capability: anything
//! implementing [`Schedule`].
//!
//! Two implementations ship with the crate:
//!
//! - [`TaskQueue`], an explicit FIFO the host drains when it is ready. Each
//!   thread has a default queue reachable through [`TaskQueue::local`], which
//!   engines use unless configured otherwise.
//! - [`TokioLocal`] (feature `tokio`), which hands tasks to
//!   `tokio::task::spawn_local`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Capability to run a task later, after the current call stack unwinds.
pub trait Schedule {
    /// Enqueue `task`. It must not run before this call returns.
    fn schedule(&self, task: Task);
}

impl<S: Schedule + ?Sized> Schedule for Rc<S> {
    fn schedule(&self, task: Task) {
        (**self).schedule(task)
    }
}

thread_local! {
    static LOCAL_QUEUE: TaskQueue = TaskQueue::new();
}

/// A FIFO of tasks drained explicitly by the host.
///
/// Clones share the same queue.
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl TaskQueue {
    /// Create a new, empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get this thread's default queue.
    pub fn local() -> Self {
        LOCAL_QUEUE.with(TaskQueue::clone)
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Check whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Run the oldest task, if any. Returns whether a task ran.
    pub fn run_next(&self) -> bool {
        // Release the borrow before running: tasks may enqueue more tasks.
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty, including tasks enqueued while
    /// draining. Returns the number of tasks that ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl Schedule for TaskQueue {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.len())
            .finish()
    }
}

/// Schedules tasks with `tokio::task::spawn_local`.
///
/// Must be used from inside a `tokio::task::LocalSet`.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLocal;

#[cfg(feature = "tokio")]
impl Schedule for TokioLocal {
    fn schedule(&self, task: Task) {
        tokio::task::spawn_local(async move { task() });
    }
}
