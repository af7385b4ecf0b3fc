//! Result and Event Delivery
//!
//! Every invocation produces an [`Outcome`]: the final result, the
//! intermediate results superseded within the same invocation, and whether
//! the invocation was started by a scheduled continuation.
//!
//! Engines built with an [`EventSink`] also push every result, reset and
//! failure to it as a [`HostEvent`]. Failures of continuations can only be
//! observed this way, since nobody is waiting on their return value.

use crate::error::EngineError;

/// The result of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<R> {
    /// Result of the last pass.
    pub value: R,
    /// Results of earlier passes of the same invocation, oldest first.
    pub intermediates: Vec<R>,
    /// `true` when a scheduled continuation ran the invocation.
    pub async_origin: bool,
    /// Number of passes executed; `0` when a cached result was reused.
    pub passes: usize,
}

/// Notification pushed to an [`EventSink`].
#[derive(Debug, Clone)]
pub enum HostEvent<R> {
    /// A pass produced a result.
    Value {
        value: R,
        async_origin: bool,
        /// Superseded by a later pass of the same invocation.
        intermediate: bool,
    },
    /// The engine was reset.
    Reset,
    /// An invocation failed and the engine was hard reset.
    Error {
        cause: EngineError,
        async_origin: bool,
    },
}

impl<R> HostEvent<R> {
    /// Check whether this is a final (non-intermediate) value.
    pub fn is_final_value(&self) -> bool {
        matches!(
            self,
            HostEvent::Value {
                intermediate: false,
                ..
            }
        )
    }
}

/// Receiver of [`HostEvent`]s.
pub trait EventSink<R> {
    fn on_event(&self, event: HostEvent<R>);
}

impl<R, F> EventSink<R> for F
where
    F: Fn(HostEvent<R>),
{
    fn on_event(&self, event: HostEvent<R>) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn closures_are_sinks() {
        let seen = RefCell::new(Vec::new());
        let sink = |event: HostEvent<u8>| seen.borrow_mut().push(event);

        sink.on_event(HostEvent::Value {
            value: 1,
            async_origin: false,
            intermediate: true,
        });
        sink.on_event(HostEvent::Reset);

        let seen = seen.into_inner();
        assert_eq!(seen.len(), 2);
        assert!(!seen[0].is_final_value());
        assert!(matches!(seen[1], HostEvent::Reset));
    }
}
