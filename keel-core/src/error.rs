//! Error types for the execution engine.
//!
//! Contract violations (registration count/order, dependency shape) and
//! failures raised by user code share one enum so they can travel through
//! the same channels: returned from `invoke`, delivered to a sink, or used
//! to reject a pending future.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error produced by user-supplied code.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while driving an engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A pass registered fewer or more slots than the first pass did.
    #[error("the number of registrations must not change (expected {expected}, found {found})")]
    CallCountChanged {
        /// Slot count established by the first pass.
        expected: usize,
        /// Registrations seen in the failing pass.
        found: usize,
    },

    /// A pass registered a different kind (or value type) at a slot index.
    ///
    /// `expected` describes the stored slot, `found` the registration that
    /// was attempted.
    #[error("the order of registrations must not change (slot {index}: expected {expected}, found {found})")]
    CallOrderChanged {
        index: usize,
        expected: String,
        found: String,
    },

    /// A dependency list switched between present and absent.
    #[error("the existence of dependencies must not change")]
    DependencyExistenceChanged,

    /// A dependency list changed its length.
    #[error("the number of dependencies must not change ({previous} -> {current})")]
    DependencyArityChanged { previous: usize, current: usize },

    /// A registration was attempted while no engine is executing a pass.
    #[error("registrations can only be made inside the body of an active engine")]
    RegistrationOutsideActiveEngine,

    /// A pass was requested while another engine's pass is running.
    #[error("another engine is already executing a pass")]
    NestedPass,

    /// An engine was invoked from inside its own invocation.
    #[error("the engine is already executing")]
    Reentrant,

    /// The configured pass cap was reached before the state settled.
    #[error("state did not settle within {limit} passes")]
    PassLimitExceeded { limit: usize },

    /// An adapter was used after it was stopped.
    #[error("the process has already stopped")]
    Stopped,

    /// `rerun` was called on an engine that was never invoked.
    #[error("an engine that has never been invoked cannot be rerun")]
    NeverInvoked,

    /// Failure raised by user code (wrapped function, initializer, effect
    /// or updater).
    #[error("user code failed: {0}")]
    User(#[source] Arc<dyn StdError + Send + Sync>),
}

impl EngineError {
    /// Wrap an error raised by user code.
    pub fn user(error: impl Into<BoxError>) -> Self {
        EngineError::User(Arc::from(error.into()))
    }

    /// Check whether this error is a broken registration/dependency contract.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            EngineError::CallCountChanged { .. }
                | EngineError::CallOrderChanged { .. }
                | EngineError::DependencyExistenceChanged
                | EngineError::DependencyArityChanged { .. }
                | EngineError::RegistrationOutsideActiveEngine
        )
    }

    /// Get the user error if this failure came from user code.
    pub fn user_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            EngineError::User(error) => Some(error.as_ref()),
            _ => None,
        }
    }
}

impl From<BoxError> for EngineError {
    fn from(error: BoxError) -> Self {
        EngineError::User(Arc::from(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_errors_keep_their_message() {
        let error = EngineError::user("oops");
        assert_eq!(error.to_string(), "user code failed: oops");
        assert_eq!(error.user_error().map(|e| e.to_string()), Some("oops".to_string()));
        assert!(!error.is_contract_violation());
    }

    #[test]
    fn clones_share_the_user_error() {
        let error = EngineError::user("shared");
        let clone = error.clone();

        match (&error, &clone) {
            (EngineError::User(a), EngineError::User(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected user errors"),
        }
    }

    #[test]
    fn contract_violations_are_classified() {
        assert!(EngineError::DependencyExistenceChanged.is_contract_violation());
        assert!(EngineError::CallCountChanged { expected: 2, found: 1 }.is_contract_violation());
        assert!(!EngineError::Reentrant.is_contract_violation());
    }
}
