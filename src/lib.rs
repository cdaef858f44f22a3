#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! Rehearsal-driven test doubles.
//!
//! `decoy` builds spies — proxies that stand in for real dependencies in
//! unit tests — around a single idea: you configure and verify them by
//! *performing the interaction you mean*. Stub a call by making that call
//! inside [`Decoy::when`]; assert one happened by making it inside
//! [`Decoy::verify`]. The interaction is recorded like any other, published
//! on a thread-local last-call channel, and reinterpreted as a rehearsal by
//! whichever of the two drained it.
//!
//! ```
//! use decoy::{args, Decoy, Spec};
//!
//! let decoy = Decoy::new();
//! let db = decoy.mock(
//!     Spec::class("Database")
//!         .child(Spec::function("fetch").param("id"))
//!         .child(Spec::function("save").param("id").param("value")),
//! );
//! let (fetch, save) = (db.child("fetch"), db.child("save"));
//!
//! // arrange: rehearse the call and configure its result
//! decoy.when(fetch.call(args![42])).then_return("stored value");
//!
//! // act: the subject under test exercises the mock
//! let value = fetch.call(args![42]).returned::<&str>();
//! save.call(args![42, "new value"]);
//!
//! // assert
//! assert_eq!(value, Some("stored value"));
//! decoy.verify(save.call(args![42, "new value"]));
//! ```
//!
//! Mocks are described by a [`Spec`] — name, parameters, asyncness,
//! children — derived once and never mutated. Calls are *bound* to the
//! spec's signature, so `fetch.call(args![42])` and
//! `fetch.call(args![; id: 42])` rehearse the same interaction. Arguments
//! travel as type-erased [`Value`]s; anything with a
//! [`Match`](crate::matcher::Match) capability (see [`matcher`]) can stand
//! in for a concrete argument and capture what it was compared against.
//!
//! Each [`Decoy`] container is independent: it owns its spies, their stub
//! rules, and one totally ordered interaction log. The last-call channel is
//! the only shared state, and it is thread-local by construction, so
//! parallel test workers cannot see each other's rehearsals.

mod channel;
mod error;
pub mod matcher;
mod record;
mod spec;
mod spy;
mod stub;
mod value;
mod verify;
mod when;

pub use crate::{
    error::{Error, Warning},
    matcher::Captor,
    record::{CallRecord, InteractionKind},
    spec::Spec,
    spy::{Attr, CallOutcome, EnterGuard, PendingCall, Spy},
    value::{ArgValue, Args, IntoValue, Value},
    verify::{Checker, VerifyTarget},
    when::{RehearsalTarget, Stub},
};

use crate::spy::{DecoyCore, SpyState};
use std::sync::Arc;

/// The container that owns mocks, their stubbed behavior, and the
/// interaction log for one test.
///
/// Create one per test, [`mock`](Decoy::mock) your dependencies from it,
/// and [`reset`](Decoy::reset) it at teardown to surface any pending
/// diagnostics.
pub struct Decoy {
    core: Arc<DecoyCore>,
}

impl Decoy {
    /// A lenient container: calls that fail to bind to their spec's
    /// signature are recorded as-is and warned about.
    pub fn new() -> Self {
        Decoy { core: DecoyCore::new(false) }
    }

    /// A strict container: calls that fail to bind to their spec's
    /// signature are fatal.
    pub fn strict() -> Self {
        Decoy { core: DecoyCore::new(true) }
    }

    /// Creates a spy conforming to `spec`.
    ///
    /// ```
    /// use decoy::{Decoy, Spec};
    ///
    /// let decoy = Decoy::new();
    /// let getenv = decoy.mock(Spec::function("getenv").param("name").var_kwargs());
    /// let logger = decoy.mock(Spec::bare("logger"));
    /// # drop((getenv, logger));
    /// ```
    ///
    /// # Panics
    ///
    /// Panics with [`Error::MockSpecInvalid`] when the spec is unusable,
    /// e.g. it has an empty name.
    pub fn mock(&self, spec: Spec) -> Spy {
        if let Err(error) = spec.validate() {
            panic!("{}", error);
        }
        let index = self.core.state.lock().add_spy(SpyState::root(spec));
        Spy::new(self.core.clone(), index)
    }

    /// Clears every stub store, stored attribute value, entry counter, the
    /// interaction log, and this thread's last-call slot, then emits any
    /// pending diagnostics (notably miscalled stubs) as warnings.
    ///
    /// Spies stay usable afterwards and behave as on a fresh container.
    pub fn reset(&self) {
        let warnings = {
            let mut state = self.core.state.lock();
            let warnings = verify::miscalled_stub_warnings(&state);
            state.clear();
            warnings
        };
        channel::clear();
        for warning in &warnings {
            error::emit(warning);
        }
    }
}

impl Default for Decoy {
    fn default() -> Self {
        Decoy::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;

    #[test]
    #[should_panic(expected = "invalid mock spec")]
    fn mocks_need_names() {
        Decoy::new().mock(Spec::bare(""));
    }

    #[test]
    fn reset_leaves_spies_usable() {
        let decoy = Decoy::new();
        let spy = decoy.mock(Spec::bare("m"));
        decoy.when(spy.call(args![1])).then_return(2);
        spy.call(args![1]);

        decoy.reset();

        assert_eq!(spy.call(args![1]).returned::<i32>(), None, "rules cleared");
        decoy.verify(&spy).times(1).called_with(args![1]);
    }

    #[test]
    fn containers_are_independent() {
        let first = Decoy::new();
        let second = Decoy::new();
        let a = first.mock(Spec::bare("a"));
        let b = second.mock(Spec::bare("b"));

        first.when(a.call(args![])).then_return(1);
        assert_eq!(b.call(args![]).returned::<i32>(), None);
        assert_eq!(a.call(args![]).returned::<i32>(), Some(1));
    }
}
