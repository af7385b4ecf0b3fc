//! Free-Function Registrations
//!
//! The same registrations as [`Scope`], without threading the scope through
//! helper functions. Each call looks up the engine executing the current
//! pass and registers into it; with no pass running it fails with
//! [`EngineError::RegistrationOutsideActiveEngine`].
//!
//! ```rust
//! use keel_core::{hooks, Engine, TaskQueue};
//! use std::rc::Rc;
//!
//! fn use_counter() -> keel_core::Result<u32> {
//!     let (count, _) = hooks::use_state(0_u32)?;
//!     Ok(count)
//! }
//!
//! let engine = Engine::builder()
//!     .scheduler(Rc::new(TaskQueue::new()))
//!     .build(|_, _: &()| use_counter());
//! assert_eq!(engine.invoke(()).unwrap().value, 0);
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use crate::deps::Deps;
use crate::engine::{ActivePass, Dispatch, Scope, Setter};
use crate::error::{BoxError, EngineError, Result};
use crate::memory::EffectResult;

/// Scope of the engine executing the current pass.
pub fn current_scope() -> Result<Scope> {
    ActivePass::current()
        .map(Scope::new)
        .ok_or(EngineError::RegistrationOutsideActiveEngine)
}

/// See [`Scope::use_state`].
pub fn use_state<T>(initial: T) -> Result<(T, Setter<T>)>
where
    T: Clone + PartialEq + 'static,
{
    current_scope()?.use_state(initial)
}

/// See [`Scope::use_state_with`].
pub fn use_state_with<T, F>(init: F) -> Result<(T, Setter<T>)>
where
    T: Clone + PartialEq + 'static,
    F: FnOnce() -> T,
{
    current_scope()?.use_state_with(init)
}

/// See [`Scope::try_use_state_with`].
pub fn try_use_state_with<T, F>(init: F) -> Result<(T, Setter<T>)>
where
    T: Clone + PartialEq + 'static,
    F: FnOnce() -> std::result::Result<T, BoxError>,
{
    current_scope()?.try_use_state_with(init)
}

/// See [`Scope::use_effect`].
pub fn use_effect<F>(effect: F, deps: Option<Deps>) -> Result<()>
where
    F: FnOnce() -> EffectResult + 'static,
{
    current_scope()?.use_effect(effect, deps)
}

/// See [`Scope::use_layout_effect`].
pub fn use_layout_effect<F>(effect: F, deps: Option<Deps>) -> Result<()>
where
    F: FnOnce() -> EffectResult + 'static,
{
    current_scope()?.use_layout_effect(effect, deps)
}

/// See [`Scope::use_memo`].
pub fn use_memo<T, F>(compute: F, deps: Deps) -> Result<T>
where
    T: Clone + 'static,
    F: FnOnce() -> T,
{
    current_scope()?.use_memo(compute, deps)
}

/// See [`Scope::use_callback`].
pub fn use_callback<F>(callback: F, deps: Deps) -> Result<Rc<F>>
where
    F: 'static,
{
    current_scope()?.use_callback(callback, deps)
}

/// See [`Scope::use_ref`].
pub fn use_ref<T: 'static>(initial: T) -> Result<Rc<RefCell<T>>> {
    current_scope()?.use_ref(initial)
}

/// See [`Scope::use_reducer`].
pub fn use_reducer<S, A, F>(reducer: F, initial: S) -> Result<(S, Dispatch<A>)>
where
    S: Clone + PartialEq + 'static,
    A: 'static,
    F: Fn(&S, A) -> S + 'static,
{
    current_scope()?.use_reducer(reducer, initial)
}

/// See [`Scope::use_reducer_with`].
pub fn use_reducer_with<S, A, F, I>(reducer: F, init: I) -> Result<(S, Dispatch<A>)>
where
    S: Clone + PartialEq + 'static,
    A: 'static,
    F: Fn(&S, A) -> S + 'static,
    I: FnOnce() -> S,
{
    current_scope()?.use_reducer_with(reducer, init)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps;
    use crate::engine::{Engine, TaskQueue};

    #[test]
    fn outside_a_pass_fails() {
        assert!(matches!(
            use_state(1),
            Err(EngineError::RegistrationOutsideActiveEngine)
        ));
        assert!(matches!(
            use_memo(|| 1, deps![]),
            Err(EngineError::RegistrationOutsideActiveEngine)
        ));
    }

    #[test]
    fn free_functions_share_slots_with_the_scope() {
        let queue = TaskQueue::new();
        let engine = Engine::builder()
            .scheduler(Rc::new(queue.clone()))
            .build(|scope, _: &()| {
                let (a, set_a) = scope.use_state(1_u32)?;
                let (b, _) = use_state(10_u32)?;
                let doubled = use_memo(move || a * 2, deps![a])?;
                Ok((a, b, doubled, set_a))
            });

        let outcome = engine.invoke(()).unwrap();
        let (a, b, doubled, set_a) = outcome.value;
        assert_eq!((a, b, doubled), (1, 10, 2));

        set_a.set(4);
        assert_eq!(queue.run_until_idle(), 1);
        let (a, b, doubled, _) = engine.last_value().unwrap();
        assert_eq!((a, b, doubled), (4, 10, 8));
    }

    #[test]
    fn reducer_folds_actions() {
        enum Action {
            Add(i64),
            Negate,
        }

        let queue = TaskQueue::new();
        let engine = Engine::builder()
            .scheduler(Rc::new(queue.clone()))
            .build(|_, _: &()| {
                use_reducer(
                    |state: &i64, action: Action| match action {
                        Action::Add(n) => state + n,
                        Action::Negate => -state,
                    },
                    0,
                )
            });

        let (state, dispatch) = engine.invoke(()).unwrap().value;
        assert_eq!(state, 0);

        dispatch.dispatch(Action::Add(5));
        dispatch.dispatch(Action::Negate);
        queue.run_until_idle();

        let (state, again) = engine.last_value().unwrap();
        assert_eq!(state, -5);
        assert_eq!(again, dispatch);
    }

    #[test]
    fn callback_is_stable_while_deps_hold() {
        let engine = Engine::builder()
            .scheduler(Rc::new(TaskQueue::new()))
            .build(|_, n: &u8| {
                let n = *n;
                use_callback(move || n + 1, deps![n / 10])
            });

        let first = engine.invoke(1).unwrap().value;
        let second = engine.invoke(2).unwrap().value;
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(second(), 2);

        let third = engine.invoke(12).unwrap().value;
        assert!(!Rc::ptr_eq(&first, &third));
        assert_eq!(third(), 13);
    }
}
