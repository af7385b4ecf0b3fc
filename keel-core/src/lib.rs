//! Keel Core
//!
//! This crate provides an execution engine that lets a plain, repeatedly
//! invoked function keep private state, memoized values and side effects
//! between invocations, without any rendering layer attached.
//! It implements:
//!
//! - Slot memory with call-count and call-order validation
//! - State, effect and memo registrations with dependency lists
//! - A fixed-point loop that re-runs the function until its state settles
//! - Continuations for state changes made between invocations
//! - Pull-style and push-style consumer adapters
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `deps`: Dependency lists and their comparison rules
//! - `memory`: Slot variants and the slot memory
//! - `engine`: The execution engine, registration scope and scheduling
//! - `hooks`: Registration through free functions
//! - `deferred`: Single-resolution values and their futures
//! - `adapters`: Snapshot and subject wrappers over an engine
//!
//! Everything is single-threaded. An engine, its setters and its futures
//! are `!Send`.
//!
//! # Example
//!
//! ```rust
//! use keel_core::{deps, Engine, TaskQueue};
//! use std::rc::Rc;
//!
//! let queue = TaskQueue::new();
//! let engine = Engine::builder()
//!     .scheduler(Rc::new(queue.clone()))
//!     .build(|scope, name: &String| {
//!         let (visits, set_visits) = scope.use_state(0_u32)?;
//!         let greeting = scope.use_memo(|| format!("hello {name}"), deps![name.clone()])?;
//!         Ok((format!("{greeting} #{visits}"), set_visits))
//!     });
//!
//! let (text, set_visits) = engine.invoke("ada".to_string()).unwrap().value;
//! assert_eq!(text, "hello ada #0");
//!
//! // Called between invocations: schedules one continuation.
//! set_visits.update(|n| n + 1);
//! queue.run_until_idle();
//!
//! let (text, _) = engine.last_value().unwrap();
//! assert_eq!(text, "hello ada #1");
//! ```

pub mod adapters;
pub mod config;
pub mod deferred;
pub mod deps;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod memory;

pub use adapters::{EventBatch, Snapshot, Subject};
pub use config::EngineConfig;
pub use deferred::{Deferred, Next};
pub use deps::{deps_changed, Dep, Deps};
#[cfg(feature = "tokio")]
pub use engine::TokioLocal;
pub use engine::{
    Dispatch, Engine, EngineBuilder, EngineId, EventSink, HostEvent, Outcome, Schedule, Scope,
    Setter, Status, Task, TaskQueue,
};
pub use error::{BoxError, EngineError, Result};
pub use memory::{Cleanup, EffectGroup, EffectResult, SlotKind};
