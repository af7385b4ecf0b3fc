//! Consumer Adapters
//!
//! Thin wrappers that turn an [`Engine`](crate::Engine) and its event sink
//! into the two consumption styles hosts usually want:
//!
//! - [`Snapshot`]: a started process with a current value, a future for
//!   the next change and a stream of later values.
//! - [`Subject`]: the engine itself, plus the latest event and a future
//!   for the next batch of events.

mod snapshot;
mod subject;

pub use snapshot::Snapshot;
pub use subject::{EventBatch, Subject};
