//! Type-erased argument and return values.
//!
//! Mocked surfaces are described at runtime, so the values flowing through
//! them are erased behind [`Value`]: a cheaply clonable, `Debug`-printable
//! handle with structural equality. Equality delegates to a [`Match`]
//! predicate when either side carries one, which is what lets matchers stand
//! in for concrete arguments inside rehearsals.
//!
//! [`Match`]: crate::matcher::Match

use crate::matcher::Match;
use downcast_rs::{impl_downcast, Downcast};
use std::{
    collections::BTreeMap,
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

/// A concrete value usable as a mock argument or return value.
///
/// Blanket-implemented for every `'static` type with structural equality and
/// a `Debug` rendering. The `Send + Sync` bounds let records cross test
/// threads.
pub trait ArgValue: Downcast + Debug + Send + Sync {
    /// Structural equality against another erased value.
    ///
    /// Values of different concrete types are never equal.
    fn eq_value(&self, other: &dyn ArgValue) -> bool;
}

impl_downcast!(ArgValue);

impl<T> ArgValue for T
where
    T: PartialEq + Debug + Send + Sync + 'static,
{
    fn eq_value(&self, other: &dyn ArgValue) -> bool {
        other.downcast_ref::<T>().map_or(false, |other| self == other)
    }
}

/// Conversion into a [`Value`].
///
/// Implemented by every [`ArgValue`], by `Value` itself (identity), and by
/// matcher types such as [`Captor`](crate::matcher::Captor).
pub trait IntoValue {
    /// Erase `self` into a [`Value`].
    fn into_value(self) -> Value;
}

impl<T: ArgValue> IntoValue for T {
    fn into_value(self) -> Value {
        Value::of(self)
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

/// An erased, shared argument or return value.
#[derive(Clone)]
pub struct Value {
    inner: Inner,
}

#[derive(Clone)]
enum Inner {
    Concrete(Arc<dyn ArgValue>),
    Matcher(Arc<dyn Match>),
}

impl Value {
    /// Erases a concrete value.
    pub fn of<T: ArgValue>(value: T) -> Self {
        Value { inner: Inner::Concrete(Arc::new(value)) }
    }

    /// Wraps a matcher so it can stand in for a concrete argument.
    pub fn matching<M: Match + 'static>(matcher: M) -> Self {
        Value { inner: Inner::Matcher(Arc::new(matcher)) }
    }

    /// Borrows the contained value if it is concrete and of type `T`.
    pub fn downcast_ref<T: ArgValue>(&self) -> Option<&T> {
        match &self.inner {
            Inner::Concrete(value) => value.downcast_ref::<T>(),
            Inner::Matcher(_) => None,
        }
    }

    /// Clones the contained value out if it is concrete and of type `T`.
    pub fn cloned<T: ArgValue + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }

    /// Equality under the matching contract: if either side carries a
    /// matcher, the predicate decides (and may capture the compared value);
    /// otherwise both sides must be structurally equal.
    pub fn equals(&self, other: &Value) -> bool {
        match (&self.inner, &other.inner) {
            (Inner::Matcher(matcher), _) => matcher.matches(other),
            (_, Inner::Matcher(matcher)) => matcher.matches(self),
            (Inner::Concrete(a), Inner::Concrete(b)) => a.eq_value(&**b),
        }
    }

    /// Structural sameness for rule-condition comparison: concrete values
    /// compare by equality, matchers only by identity. Used to detect a
    /// verification that duplicates an installed rule.
    pub(crate) fn same(&self, other: &Value) -> bool {
        match (&self.inner, &other.inner) {
            (Inner::Concrete(a), Inner::Concrete(b)) => a.eq_value(&**b),
            (Inner::Matcher(a), Inner::Matcher(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match &self.inner {
            Inner::Concrete(value) => value.fmt(f),
            Inner::Matcher(matcher) => matcher.fmt(f),
        }
    }
}

/// The positional and named arguments of one interaction.
///
/// Construct with the [`args!`](crate::args) macro:
///
/// ```
/// use decoy::args;
///
/// let empty = args![];
/// let positional = args![1, "two"];
/// let mixed = args![1; retries: 3];
/// assert_eq!(format!("{:?}", mixed), "(1, retries: 3)");
/// # drop((empty, positional));
/// ```
#[derive(Clone, Default)]
pub struct Args {
    positional: Vec<Value>,
    named: BTreeMap<String, Value>,
}

impl Args {
    /// An empty argument list.
    pub fn new() -> Self {
        Args::default()
    }

    /// Appends a positional argument.
    pub fn arg<T: IntoValue>(mut self, value: T) -> Self {
        self.positional.push(value.into_value());
        self
    }

    /// Adds a named argument.
    pub fn named<T: IntoValue>(mut self, name: &str, value: T) -> Self {
        self.named.insert(name.to_owned(), value.into_value());
        self
    }

    /// The positional arguments, in order.
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// The named arguments, ordered by name.
    pub fn named_args(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.named.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Looks up a named argument.
    pub fn get_named(&self, name: &str) -> Option<&Value> {
        self.named.get(name)
    }

    /// True when no arguments were given at all.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    pub(crate) fn from_parts(
        positional: Vec<Value>,
        named: BTreeMap<String, Value>,
    ) -> Self {
        Args { positional, named }
    }

    pub(crate) fn into_parts(self) -> (Vec<Value>, BTreeMap<String, Value>) {
        (self.positional, self.named)
    }

    pub(crate) fn single(value: Value) -> Self {
        Args { positional: vec![value], named: BTreeMap::new() }
    }
}

impl Debug for Args {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str("(")?;
        let mut first = true;
        for value in &self.positional {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{:?}", value)?;
        }
        for (name, value) in &self.named {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{}: {:?}", name, value)?;
        }
        f.write_str(")")
    }
}

/// Builds an [`Args`] list from positional and `name: value` arguments.
///
/// ```
/// use decoy::args;
///
/// args![];
/// args![1, "two", vec![3]];
/// args![1; timeout: 30, retries: 3];
/// args![; verbose: true];
/// ```
#[macro_export]
macro_rules! args {
    () => { $crate::Args::new() };
    ($($positional:expr),+ $(,)?) => {{
        let args = $crate::Args::new();
        $(let args = args.arg($positional);)+
        args
    }};
    ($($positional:expr),* ; $($name:ident : $value:expr),+ $(,)?) => {{
        let args = $crate::Args::new();
        $(let args = args.arg($positional);)*
        $(let args = args.named(stringify!($name), $value);)+
        args
    }};
}
