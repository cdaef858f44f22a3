//! Turning interactions into stub rules: `when` and its builder.
//!
//! Two surfaces feed the same machinery. The *rehearsal* form passes the
//! outcome of a real spy interaction — `when(spy.call(args![1]))` — and the
//! condition is recovered from the thread-local last-call channel. The *spy*
//! form passes the spy itself — `when(&spy).called_with(args![1])` — and
//! spells the condition out. Either way, every `then_*` terminal appends one
//! rule to the spy's stub store.

use crate::{
    error::Error,
    record::{CallRecord, InteractionKind},
    spy::{Attr, CallOutcome, Spy},
    stub::{Action, Condition, StubRule},
    value::{Args, IntoValue, Value},
};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Something `when`/`verify` can treat as a rehearsal source.
pub trait RehearsalTarget {
    /// The rehearsed spy and, for the rehearsal form, the captured record.
    ///
    /// Draining removes the rehearsal's record from the interaction log: a
    /// rehearsal is configuration, not an interaction the subject made.
    fn resolve(self) -> Result<(Spy, Option<CallRecord>), Error>;
}

impl RehearsalTarget for &Spy {
    fn resolve(self) -> Result<(Spy, Option<CallRecord>), Error> {
        Ok((self.clone(), None))
    }
}

impl RehearsalTarget for CallOutcome {
    fn resolve(self) -> Result<(Spy, Option<CallRecord>), Error> {
        drain_last_call()
    }
}

impl RehearsalTarget for Attr {
    fn resolve(self) -> Result<(Spy, Option<CallRecord>), Error> {
        drain_last_call()
    }
}

fn drain_last_call() -> Result<(Spy, Option<CallRecord>), Error> {
    let (spy, record) = crate::channel::take().ok_or(Error::MissingRehearsal)?;
    spy.core.state.lock().remove_record(record.seq);
    Ok((spy, Some(record)))
}

impl crate::Decoy {
    /// Begins configuring stubbed behavior from a rehearsal.
    ///
    /// ```
    /// use decoy::{args, Decoy, Spec};
    ///
    /// let decoy = Decoy::new();
    /// let greet = decoy.mock(Spec::function("greet").param("name"));
    ///
    /// decoy.when(greet.call(args!["world"])).then_return("hello, world");
    /// decoy.when(&greet).called_with(args!["moon"]).then_return("hello, moon");
    ///
    /// assert_eq!(greet.call(args!["moon"]).returned::<&str>(), Some("hello, moon"));
    /// ```
    ///
    /// # Panics
    ///
    /// Panics with [`Error::MissingRehearsal`] when the rehearsal form is
    /// used without a preceding spy interaction on this thread.
    pub fn when<T: RehearsalTarget>(&self, target: T) -> Stub {
        match target.resolve() {
            Ok((spy, record)) => Stub::new(spy, record),
            Err(error) => panic!("{}", error),
        }
    }
}

/// A stub under construction: a condition waiting for its actions.
pub struct Stub {
    spy: Spy,
    condition: Option<(InteractionKind, Args)>,
    ignore_extra_args: bool,
    is_entered: Option<bool>,
}

impl Stub {
    fn new(spy: Spy, record: Option<CallRecord>) -> Self {
        let ignore_extra_args = spy.ignores_extra_args();
        Stub {
            spy,
            condition: record.map(|record| (record.kind, record.args)),
            ignore_extra_args,
            is_entered: None,
        }
    }

    /// Rehearses a call with these arguments, replacing any condition taken
    /// from the last-call channel.
    pub fn called_with(mut self, args: Args) -> Self {
        let bound = self.spy.bind_args(args);
        self.condition = Some((InteractionKind::Call, bound));
        self
    }

    /// Rehearses a read of this attribute spy.
    pub fn get(mut self) -> Self {
        self.condition = Some((InteractionKind::Get, Args::new()));
        self
    }

    /// Rehearses a write of `value` to this attribute spy.
    pub fn set<T: IntoValue>(mut self, value: T) -> Self {
        self.condition = Some((InteractionKind::Set, Args::single(value.into_value())));
        self
    }

    /// Rehearses a deletion of this attribute spy.
    pub fn delete(mut self) -> Self {
        self.condition = Some((InteractionKind::Delete, Args::new()));
        self
    }

    /// Lets the rule match calls that pass extra positional or named
    /// arguments beyond the rehearsed ones.
    pub fn ignore_extra_args(mut self, ignore: bool) -> Self {
        self.ignore_extra_args = ignore;
        self
    }

    /// Gates the rule on the spy's context-entry state: `true` matches only
    /// inside an entered context, `false` only outside one.
    #[allow(clippy::wrong_self_convention)]
    pub fn is_entered(mut self, entered: bool) -> Self {
        self.is_entered = Some(entered);
        self
    }

    /// Makes matching calls return `value`.
    pub fn then_return<T: IntoValue>(self, value: T) -> Self {
        self.install(Action::Return(value.into_value()), None)
    }

    /// Makes successive matching calls return the values in order, one call
    /// each, after which matching falls back to the default.
    ///
    /// # Panics
    ///
    /// Panics if `values` carries named arguments; a sequence is positional.
    pub fn then_return_seq(self, values: Args) -> Self {
        let (positional, named) = values.into_parts();
        if !named.is_empty() {
            panic!(
                "{}",
                Error::MockSpecInvalid {
                    reason: "a return sequence takes positional values only".into(),
                }
            );
        }
        // newest-first lookup: install in reverse so the first value wins
        // the first call
        let mut stub = self;
        for value in positional.into_iter().rev() {
            stub = stub.install(Action::Return(value), Some(1));
        }
        stub
    }

    /// Makes matching calls raise `error`.
    pub fn then_raise<E>(self, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.install(Action::Raise(Arc::new(error)), None)
    }

    /// Makes matching calls invoke `action` with the call's bound arguments
    /// and produce its result.
    pub fn then_do<F, T>(self, action: F) -> Self
    where
        F: Fn(&Args) -> T + Send + Sync + 'static,
        T: IntoValue,
    {
        self.install(
            Action::Do(Arc::new(move |args| action(args).into_value())),
            None,
        )
    }

    /// Makes matching calls resolve `action`'s future at await time and
    /// produce its output.
    ///
    /// # Panics
    ///
    /// Panics with [`Error::AsyncMismatch`] when the spy is synchronous.
    pub fn then_do_async<F>(self, action: F) -> Self
    where
        F: Fn(&Args) -> BoxFuture<'static, Value> + Send + Sync + 'static,
    {
        if !self.spy.spec().is_async() {
            panic!(
                "{}",
                Error::AsyncMismatch {
                    reason: format!(
                        "an async action was configured for synchronous `{}`",
                        self.spy.name()
                    ),
                }
            );
        }
        self.install(Action::DoAsync(Arc::new(action)), None)
    }

    /// Makes matching calls produce a context manager whose entry yields
    /// `value`.
    ///
    /// # Panics
    ///
    /// Panics unless the rehearsed interaction is a call.
    pub fn then_enter_with<T: IntoValue>(self, value: T) -> Self {
        if !matches!(self.condition, Some((InteractionKind::Call, _)) | None) {
            panic!(
                "{}",
                Error::MockSpecInvalid {
                    reason: "only calls can be stubbed as context managers".into(),
                }
            );
        }
        self.install(Action::EnterWith(value.into_value()), None)
    }

    fn install(self, action: Action, remaining: Option<u32>) -> Self {
        let (kind, args) = match &self.condition {
            Some((kind, args)) => (*kind, args.clone()),
            None => panic!("{}", Error::MissingRehearsal),
        };
        self.spy.install_rule(StubRule {
            condition: Condition {
                kind,
                args,
                ignore_extra_args: self.ignore_extra_args,
                is_entered: self.is_entered,
            },
            action,
            remaining,
        });
        self
    }
}
