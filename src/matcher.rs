//! Value matchers: predicates that stand in for concrete arguments.
//!
//! A matcher slots into an argument list anywhere a concrete value would go.
//! During rule matching and verification, equality against a matcher
//! delegates to [`Match::matches`]. The contents here are deliberately
//! small; anything implementing [`Match`] participates on equal footing.

use crate::value::{ArgValue, IntoValue, Value};
use parking_lot::Mutex;
use std::{
    fmt::{self, Debug, Formatter},
    marker::PhantomData,
    sync::Arc,
};

/// The matching capability.
///
/// `matches` is free to record the compared value, which is how
/// [`Captor`] makes arguments retrievable after a verification.
pub trait Match: Debug + Send + Sync {
    /// Whether `value` satisfies this matcher.
    fn matches(&self, value: &Value) -> bool;
}

/// Matches any value at all.
pub fn anything() -> Value {
    Value::matching(Anything)
}

struct Anything;

impl Match for Anything {
    fn matches(&self, _value: &Value) -> bool {
        true
    }
}

impl Debug for Anything {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("<anything>")
    }
}

/// Matches any value of concrete type `T`.
pub fn of_type<T: ArgValue>() -> Value {
    Value::matching(OfType::<T> { ty: PhantomData })
}

struct OfType<T> {
    ty: PhantomData<fn() -> T>,
}

impl<T: ArgValue> Match for OfType<T> {
    fn matches(&self, value: &Value) -> bool {
        value.downcast_ref::<T>().is_some()
    }
}

impl<T> Debug for OfType<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "<any {}>", std::any::type_name::<T>())
    }
}

/// Matches values of type `T` for which `predicate` returns true.
pub fn pred<T, F>(predicate: F) -> Value
where
    T: ArgValue,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    Value::matching(Pred { predicate, ty: PhantomData::<fn() -> T> })
}

struct Pred<T, F> {
    predicate: F,
    ty: PhantomData<fn() -> T>,
}

impl<T, F> Match for Pred<T, F>
where
    T: ArgValue,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn matches(&self, value: &Value) -> bool {
        value.downcast_ref::<T>().map_or(false, |value| (self.predicate)(value))
    }
}

impl<T, F> Debug for Pred<T, F> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "<{} matching a predicate>", std::any::type_name::<T>())
    }
}

/// A matcher that records every value it is compared against.
///
/// Clones share their capture list, so the handle kept by the test sees the
/// values captured by the clone placed in the rehearsal:
///
/// ```
/// use decoy::{args, Captor, Decoy, Spec};
///
/// let decoy = Decoy::new();
/// let log = decoy.mock(Spec::function("log").param("message"));
/// log.call(args!["hello"]);
///
/// let captor = Captor::new();
/// decoy.verify(&log).called_with(args![captor.clone()]);
/// assert_eq!(captor.value().cloned::<&str>(), Some("hello"));
/// ```
#[derive(Clone, Default)]
pub struct Captor {
    captured: Arc<Mutex<Vec<Value>>>,
}

impl Captor {
    /// A captor with an empty capture list.
    pub fn new() -> Self {
        Captor::default()
    }

    /// The first captured value.
    ///
    /// # Panics
    ///
    /// Panics if nothing has been captured yet.
    pub fn value(&self) -> Value {
        self.captured
            .lock()
            .first()
            .cloned()
            .expect("captor has not captured any values")
    }

    /// Every captured value, oldest first.
    pub fn values(&self) -> Vec<Value> {
        self.captured.lock().clone()
    }
}

impl Match for Captor {
    fn matches(&self, value: &Value) -> bool {
        self.captured.lock().push(value.clone());
        true
    }
}

impl IntoValue for Captor {
    fn into_value(self) -> Value {
        Value::matching(self)
    }
}

impl Debug for Captor {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "<captor of {} values>", self.captured.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anything_matches_everything() {
        assert!(anything().equals(&Value::of(1)));
        assert!(anything().equals(&Value::of("s")));
    }

    #[test]
    fn of_type_checks_the_concrete_type() {
        let any_string = of_type::<String>();
        assert!(any_string.equals(&Value::of(String::from("yes"))));
        assert!(!any_string.equals(&Value::of(1)));
    }

    #[test]
    fn pred_applies_the_predicate() {
        let even = pred(|n: &i32| n % 2 == 0);
        assert!(even.equals(&Value::of(4)));
        assert!(!even.equals(&Value::of(5)));
        assert!(!even.equals(&Value::of("not a number")));
    }

    #[test]
    fn captor_records_every_comparison() {
        let captor = Captor::new();
        let as_value = captor.clone().into_value();
        assert!(as_value.equals(&Value::of(1)));
        assert!(as_value.equals(&Value::of(2)));
        assert_eq!(captor.value().cloned::<i32>(), Some(1));
        assert_eq!(captor.values().len(), 2);
    }

    #[test]
    #[should_panic(expected = "has not captured")]
    fn empty_captor_panics_on_value() {
        Captor::new().value();
    }
}
