//! Dependency Lists
//!
//! Effects and memos decide whether to re-run by comparing the dependency
//! list given on this pass with the one stored on the previous pass.
//!
//! A dependency list is either absent (`None`, "run every pass") or an
//! ordered list of values. Entries are type-erased so one list can mix
//! strings, numbers and handles; two entries are the same dependency when
//! they have the same type and compare equal with `PartialEq`.
//!
//! The shape of a list is part of the registration contract: once a slot
//! has been created, its list may not switch between present and absent,
//! and it may not change length.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::{EngineError, Result};

/// Object-safe equality over type-erased dependency values.
trait DepValue: Any {
    fn dyn_eq(&self, other: &dyn DepValue) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn fmt_debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<T> DepValue for T
where
    T: PartialEq + fmt::Debug + 'static,
{
    fn dyn_eq(&self, other: &dyn DepValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .map_or(false, |other| self == other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn fmt_debug(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single entry of a dependency list.
///
/// Cloning a `Dep` is cheap; the value is shared.
#[derive(Clone)]
pub struct Dep(Rc<dyn DepValue>);

impl Dep {
    /// Wrap a value as a dependency.
    pub fn new<T>(value: T) -> Self
    where
        T: PartialEq + fmt::Debug + 'static,
    {
        Self(Rc::new(value))
    }
}

impl PartialEq for Dep {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(other.0.as_ref())
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_debug(f)
    }
}

/// An ordered dependency list.
pub type Deps = SmallVec<[Dep; 4]>;

/// Build a [`Deps`] list from values.
///
/// ```rust
/// use keel_core::deps;
///
/// let deps = deps!["a", 1_u32];
/// assert_eq!(deps.len(), 2);
/// assert!(deps![].is_empty());
/// ```
#[macro_export]
macro_rules! deps {
    () => {
        $crate::Deps::new()
    };
    ($($value:expr),+ $(,)?) => {{
        let mut deps = $crate::Deps::new();
        $(deps.push($crate::Dep::new($value));)+
        deps
    }};
}

/// Compare a stored dependency list with the one given on this pass.
///
/// Returns `true` when the slot must re-run. Two absent lists always count
/// as changed. A list that appears or disappears, or that changes length,
/// breaks the registration contract.
pub fn deps_changed(previous: Option<&Deps>, current: Option<&Deps>) -> Result<bool> {
    match (previous, current) {
        (None, None) => Ok(true),
        (Some(_), None) | (None, Some(_)) => Err(EngineError::DependencyExistenceChanged),
        (Some(previous), Some(current)) => {
            if previous.len() != current.len() {
                return Err(EngineError::DependencyArityChanged {
                    previous: previous.len(),
                    current: current.len(),
                });
            }

            Ok(previous.iter().zip(current.iter()).any(|(a, b)| a != b))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_lists_always_change() {
        assert!(deps_changed(None, None).unwrap());
    }

    #[test]
    fn equal_lists_do_not_change() {
        let a = deps!["a", "x"];
        let b = deps!["a", "x"];
        assert!(!deps_changed(Some(&a), Some(&b)).unwrap());

        let empty = deps![];
        assert!(!deps_changed(Some(&empty), Some(&deps![])).unwrap());
    }

    #[test]
    fn differing_entry_changes() {
        let a = deps!["a", "x"];
        let b = deps!["a", "y"];
        assert!(deps_changed(Some(&a), Some(&b)).unwrap());
    }

    #[test]
    fn entries_of_different_types_differ() {
        let a = deps![1_u32];
        let b = deps![1_u64];
        assert!(deps_changed(Some(&a), Some(&b)).unwrap());
    }

    #[test]
    fn existence_change_is_rejected() {
        let empty = deps![];
        assert!(matches!(
            deps_changed(Some(&empty), None),
            Err(EngineError::DependencyExistenceChanged)
        ));
        assert!(matches!(
            deps_changed(None, Some(&empty)),
            Err(EngineError::DependencyExistenceChanged)
        ));
    }

    #[test]
    fn arity_change_is_rejected() {
        let a = deps!["a", "b"];
        let b = deps!["a"];
        assert!(matches!(
            deps_changed(Some(&a), Some(&b)),
            Err(EngineError::DependencyArityChanged { previous: 2, current: 1 })
        ));
    }

    #[test]
    fn debug_shows_inner_values() {
        let deps = deps!["a", 3];
        assert_eq!(format!("{:?}", deps), r#"["a", 3]"#);
    }
}
