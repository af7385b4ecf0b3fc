//! Deferred Values
//!
//! A [`Deferred`] is a single-resolution completion handle: synchronous code
//! resolves it once, and any number of [`Next`] futures created from it
//! complete with a clone of that value.
//!
//! Everything here is single-threaded (`Rc`), matching the cooperative
//! execution model of the engine.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

struct Shared<T> {
    value: Option<T>,
    wakers: Vec<Waker>,
}

/// The resolving side of a single-resolution value.
pub struct Deferred<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

impl<T: Clone> Deferred<T> {
    /// Create an unresolved deferred value.
    pub fn new() -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                value: None,
                wakers: Vec::new(),
            })),
        }
    }

    /// Resolve with `value` and wake every waiting future.
    ///
    /// Only the first resolution counts; later calls return `false` and
    /// leave the stored value untouched.
    pub fn resolve(&self, value: T) -> bool {
        let wakers = {
            let mut shared = self.shared.borrow_mut();
            if shared.value.is_some() {
                return false;
            }
            shared.value = Some(value);
            std::mem::take(&mut shared.wakers)
        };

        for waker in wakers {
            waker.wake();
        }
        true
    }

    /// Check whether the value has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.shared.borrow().value.is_some()
    }

    /// Create a future that completes with the resolved value.
    pub fn future(&self) -> Next<T> {
        Next {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T: Clone> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("resolved", &self.shared.borrow().value.is_some())
            .finish()
    }
}

/// Future side of a [`Deferred`].
#[must_use = "futures do nothing unless polled"]
pub struct Next<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

impl<T: Clone> Future for Next<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut shared = self.shared.borrow_mut();

        if let Some(value) = &shared.value {
            return Poll::Ready(value.clone());
        }

        if !shared.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            shared.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T> Clone for Next<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Next<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("resolved", &self.shared.borrow().value.is_some())
            .finish()
    }
}
