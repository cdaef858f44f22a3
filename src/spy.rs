//! Live spy proxies and the core state they share.
//!
//! A [`Spy`] is a cheap handle: the arena index of its state inside the
//! owning Decoy's core. Spy state (spec, stub rules, children, stored
//! attribute values, context-entry depth) lives in the arena; parent/child
//! links are indices, never pointers, so the tree cannot form cycles with
//! the container that owns it.
//!
//! Every operation on a spy appends one [`CallRecord`] to the interaction
//! log and then publishes it on the thread-local last-call channel, in that
//! order. Stub actions run *after* the core lock is released so that a
//! `then_do` callback is free to interact with other mocks.

use crate::{
    channel,
    error::{self, Error, Warning},
    record::{CallRecord, InteractionKind},
    spec::Spec,
    stub::{self, Action, Raised, StubRule},
    value::{Args, ArgValue, IntoValue, Value},
};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt::{self, Debug, Formatter},
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

/// The state shared by a Decoy container and every spy it has minted.
pub(crate) struct DecoyCore {
    pub(crate) strict: bool,
    pub(crate) state: Mutex<CoreState>,
}

impl DecoyCore {
    pub fn new(strict: bool) -> Arc<Self> {
        Arc::new(DecoyCore { strict, state: Mutex::new(CoreState::default()) })
    }
}

/// Everything guarded by the Decoy-wide mutex.
#[derive(Default)]
pub(crate) struct CoreState {
    next_seq: u64,
    pub(crate) log: Vec<CallRecord>,
    pub(crate) spies: Vec<SpyState>,
}

impl CoreState {
    fn alloc_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub(crate) fn add_spy(&mut self, state: SpyState) -> usize {
        self.spies.push(state);
        self.spies.len() - 1
    }

    /// Removes a drained rehearsal's record from the log.
    pub(crate) fn remove_record(&mut self, seq: u64) {
        self.log.retain(|record| record.seq != seq);
    }

    /// The indices of `root` and every spy below it.
    pub(crate) fn subtree(&self, root: usize) -> Vec<usize> {
        let mut indices = vec![root];
        let mut cursor = 0;
        while cursor < indices.len() {
            let here = indices[cursor];
            indices.extend(self.spies[here].children.values().copied());
            cursor += 1;
        }
        indices
    }

    /// Clears interactions, rules, stored values, and entry counters while
    /// keeping every spy usable. Sequence numbers keep counting up.
    pub(crate) fn clear(&mut self) {
        self.log.clear();
        for spy in &mut self.spies {
            spy.rules.clear();
            spy.stored.clear();
            spy.entered = 0;
        }
    }
}

/// Per-spy state within the arena.
pub(crate) struct SpyState {
    pub(crate) spec: Spec,
    pub(crate) name: String,
    pub(crate) parent: Option<usize>,
    pub(crate) children: HashMap<String, usize>,
    pub(crate) stored: HashMap<String, Value>,
    pub(crate) rules: Vec<StubRule>,
    pub(crate) entered: u32,
    pub(crate) ignore_extra_args: bool,
}

impl SpyState {
    pub(crate) fn root(spec: Spec) -> Self {
        let name = spec.name().to_owned();
        let ignore_extra_args = spec.ignores_extra_args();
        SpyState {
            spec,
            name,
            parent: None,
            children: HashMap::new(),
            stored: HashMap::new(),
            rules: Vec::new(),
            entered: 0,
            ignore_extra_args,
        }
    }
}

/// A live proxy standing in for a real dependency.
///
/// Clones are handles to the same underlying spy: they share stub rules,
/// recorded interactions, and children.
#[derive(Clone)]
pub struct Spy {
    pub(crate) core: Arc<DecoyCore>,
    pub(crate) index: usize,
}

impl Spy {
    pub(crate) fn new(core: Arc<DecoyCore>, index: usize) -> Self {
        Spy { core, index }
    }

    /// The spy's full dotted name, e.g. `db.connect`.
    pub fn name(&self) -> String {
        self.core.state.lock().spies[self.index].name.clone()
    }

    /// The spy this one was obtained from by attribute access, if any.
    pub fn parent(&self) -> Option<Spy> {
        let parent = self.core.state.lock().spies[self.index].parent;
        parent.map(|index| Spy::new(self.core.clone(), index))
    }

    pub(crate) fn spec(&self) -> Spec {
        self.core.state.lock().spies[self.index].spec.clone()
    }

    pub(crate) fn ignores_extra_args(&self) -> bool {
        self.core.state.lock().spies[self.index].ignore_extra_args
    }

    /// Navigates to the child spy behind attribute `name`, creating and
    /// caching it on first access. Navigation itself records nothing.
    ///
    /// # Panics
    ///
    /// Panics if the spec declares children and `name` is not among them.
    pub fn child(&self, name: &str) -> Spy {
        let mut state = self.core.state.lock();
        if let Some(&index) = state.spies[self.index].children.get(name) {
            return Spy::new(self.core.clone(), index);
        }

        let parent_name = state.spies[self.index].name.clone();
        let parent_ignores = state.spies[self.index].ignore_extra_args;
        let spec = match state.spies[self.index].spec.child_spec(name) {
            Some(spec) => spec,
            None => {
                drop(state);
                panic!(
                    "{}",
                    Error::MockSpecInvalid {
                        reason: format!(
                            "`{}` has no attribute `{}`",
                            parent_name, name
                        ),
                    }
                );
            }
        };
        let child = SpyState {
            name: format!("{}.{}", parent_name, name),
            parent: Some(self.index),
            children: HashMap::new(),
            stored: HashMap::new(),
            rules: Vec::new(),
            entered: 0,
            ignore_extra_args: parent_ignores || spec.ignores_extra_args(),
            spec,
        };
        let index = state.add_spy(child);
        state.spies[self.index].children.insert(name.to_owned(), index);
        Spy::new(self.core.clone(), index)
    }

    /// Calls the spy synchronously.
    ///
    /// The call is recorded and published, the stub store is consulted, and
    /// the governing action (if any) runs before this returns.
    ///
    /// # Panics
    ///
    /// Panics if the spec is asynchronous; use [`Spy::call_async`].
    pub fn call(&self, args: Args) -> CallOutcome {
        let spec = self.spec();
        if spec.is_async() {
            panic!(
                "{}",
                Error::AsyncMismatch {
                    reason: format!(
                        "`{}` is async and must be called with `call_async`",
                        spec.name()
                    ),
                }
            );
        }
        let record = self.record(InteractionKind::Call, args);
        let action = self.consume_action(&record);
        let produced = self.run_action(action, &record);
        CallOutcome { spy: self.clone(), produced }
    }

    /// Calls the spy asynchronously.
    ///
    /// The record is published immediately, at call time; the stub action is
    /// resolved when the returned future is awaited. This split is what lets
    /// `when(spy.call_async(..).await)` behave identically to the sync form.
    ///
    /// # Panics
    ///
    /// Panics if the spec is synchronous.
    pub fn call_async(&self, args: Args) -> PendingCall {
        let spec = self.spec();
        if !spec.is_async() {
            panic!(
                "{}",
                Error::AsyncMismatch {
                    reason: format!(
                        "`{}` is synchronous; call it with `call`",
                        spec.name()
                    ),
                }
            );
        }
        let record = self.record(InteractionKind::Call, args);
        PendingCall { spy: self.clone(), record: Some(record), pending: None }
    }

    /// Reads attribute `name` through the attribute-stub API.
    ///
    /// Records a `get` against the child spy. A matching stub rule wins,
    /// then a value stored by [`Spy::set`], then the child spy itself.
    pub fn get(&self, name: &str) -> Attr {
        let child = self.child(name);
        let record = child.record(InteractionKind::Get, Args::new());
        let (action, stored) = {
            let mut state = self.core.state.lock();
            let action = stub::consume(&mut state.spies[child.index].rules, &record);
            let stored = state.spies[self.index].stored.get(name).cloned();
            (action, stored)
        };
        if action.is_some() {
            return match child.run_action(action, &record) {
                Some(Produced::Value(value)) | Some(Produced::Context(value)) => {
                    Attr::Value(value)
                }
                Some(Produced::Raised(error)) => panic!("{}", error),
                None => Attr::Spy(child),
            };
        }
        match stored {
            Some(value) => Attr::Value(value),
            None => Attr::Spy(child),
        }
    }

    /// Writes attribute `name`, shadowing the child spy until
    /// [`Spy::delete`] restores it. Records a `set` against the child.
    pub fn set<T: IntoValue>(&self, name: &str, value: T) -> CallOutcome {
        let value = value.into_value();
        let child = self.child(name);
        let record = child.record(InteractionKind::Set, Args::single(value.clone()));
        let action = child.consume_action(&record);
        if let Some(Produced::Raised(error)) = child.run_action(action, &record) {
            panic!("{}", error);
        }
        self.core.state.lock().spies[self.index].stored.insert(name.to_owned(), value);
        CallOutcome { spy: child, produced: None }
    }

    /// Deletes attribute `name`: clears any stored value so attribute reads
    /// see the child spy again. Records a `delete` against the child.
    pub fn delete(&self, name: &str) -> CallOutcome {
        let child = self.child(name);
        let record = child.record(InteractionKind::Delete, Args::new());
        let action = child.consume_action(&record);
        if let Some(Produced::Raised(error)) = child.run_action(action, &record) {
            panic!("{}", error);
        }
        self.core.state.lock().spies[self.index].stored.remove(name);
        CallOutcome { spy: child, produced: None }
    }

    /// Enters the spy as a context manager: records an `enter` and
    /// increments the entry counter. The guard records the matching `exit`
    /// when dropped.
    pub fn enter(&self) -> EnterGuard {
        self.enter_with_value(None)
    }

    fn enter_with_value(&self, value: Option<Value>) -> EnterGuard {
        let record = {
            let mut state = self.core.state.lock();
            state.spies[self.index].entered += 1;
            let seq = state.alloc_seq();
            let record = CallRecord {
                spy: self.index,
                spy_name: state.spies[self.index].name.clone(),
                kind: InteractionKind::Enter,
                args: Args::new(),
                entered: state.spies[self.index].entered,
                seq,
            };
            state.log.push(record.clone());
            record
        };
        channel::publish(self.clone(), record);
        EnterGuard { spy: self.clone(), value, exited: false }
    }

    fn record_exit(&self) {
        let record = {
            let mut state = self.core.state.lock();
            let seq = state.alloc_seq();
            let record = CallRecord {
                spy: self.index,
                spy_name: state.spies[self.index].name.clone(),
                kind: InteractionKind::Exit,
                args: Args::new(),
                entered: state.spies[self.index].entered,
                seq,
            };
            state.log.push(record.clone());
            state.spies[self.index].entered =
                state.spies[self.index].entered.saturating_sub(1);
            record
        };
        channel::publish(self.clone(), record);
    }

    /// Binds call arguments to the spec's signature, honoring the
    /// container's strictness. Actual calls and spelled-out rehearsals
    /// canonicalise through the same path.
    pub(crate) fn bind_args(&self, args: Args) -> Args {
        let spec = self.spec();
        match spec.signature() {
            Some(signature) => match signature.bind(&args) {
                Ok(bound) => bound,
                Err(reason) => {
                    if self.core.strict {
                        panic!(
                            "{}",
                            Error::SignatureMismatch {
                                spy: spec.name().to_owned(),
                                reason,
                            }
                        );
                    }
                    error::emit(&Warning::IncorrectCall {
                        spy: spec.name().to_owned(),
                        reason,
                    });
                    args
                }
            },
            None => args,
        }
    }

    /// Records an interaction of `kind`, binding call arguments to the
    /// spec's signature when one exists.
    fn record(&self, kind: InteractionKind, args: Args) -> CallRecord {
        let args = match kind {
            InteractionKind::Call => self.bind_args(args),
            _ => args,
        };

        let record = {
            let mut state = self.core.state.lock();
            let seq = state.alloc_seq();
            let record = CallRecord {
                spy: self.index,
                spy_name: state.spies[self.index].name.clone(),
                kind,
                args,
                entered: state.spies[self.index].entered,
                seq,
            };
            state.log.push(record.clone());
            record
        };
        channel::publish(self.clone(), record.clone());
        record
    }

    pub(crate) fn consume_action(&self, record: &CallRecord) -> Option<Action> {
        let mut state = self.core.state.lock();
        stub::consume(&mut state.spies[self.index].rules, record)
    }

    /// Runs a stub action outside the core lock. `Do` callbacks may freely
    /// interact with other mocks.
    fn run_action(&self, action: Option<Action>, record: &CallRecord) -> Option<Produced> {
        match action? {
            Action::Return(value) => Some(Produced::Value(value)),
            Action::Raise(error) => Some(Produced::Raised(error)),
            Action::Do(run) => Some(Produced::Value(run(record.args()))),
            Action::DoAsync(_) => panic!(
                "{}",
                Error::AsyncMismatch {
                    reason: format!(
                        "`{}` resolved an async action on a synchronous path",
                        record.spy_name
                    ),
                }
            ),
            Action::EnterWith(value) => Some(Produced::Context(value)),
        }
    }

    pub(crate) fn install_rule(&self, rule: StubRule) {
        self.core.state.lock().spies[self.index].rules.push(rule);
    }
}

impl Debug for Spy {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Spy({})", self.name())
    }
}

#[derive(Clone)]
pub(crate) enum Produced {
    Value(Value),
    Raised(Raised),
    Context(Value),
}

/// The result of one synchronous spy call.
pub struct CallOutcome {
    pub(crate) spy: Spy,
    pub(crate) produced: Option<Produced>,
}

impl CallOutcome {
    /// Clones the stubbed value out as a `T`.
    ///
    /// Returns `None` for the default (unstubbed) result.
    ///
    /// # Panics
    ///
    /// Panics with the configured error if the governing rule was
    /// `then_raise`, and on a stubbed value of some other type than `T`.
    pub fn returned<T: ArgValue + Clone>(&self) -> Option<T> {
        match &self.produced {
            None => None,
            Some(Produced::Value(value)) | Some(Produced::Context(value)) => {
                Some(value.cloned::<T>().unwrap_or_else(|| {
                    panic!(
                        "stubbed value {:?} for `{}` is not a `{}`",
                        value,
                        self.spy.name(),
                        std::any::type_name::<T>()
                    )
                }))
            }
            Some(Produced::Raised(error)) => panic!("{}", error),
        }
    }

    /// The erased stubbed value, if any.
    ///
    /// # Panics
    ///
    /// Panics with the configured error if the governing rule was
    /// `then_raise`.
    pub fn value(&self) -> Option<&Value> {
        match &self.produced {
            None => None,
            Some(Produced::Value(value)) | Some(Produced::Context(value)) => Some(value),
            Some(Produced::Raised(error)) => panic!("{}", error),
        }
    }

    /// The outcome as a `Result`, exposing a configured raise as an `Err`
    /// instead of a panic.
    #[allow(clippy::type_complexity)]
    pub fn result(self) -> Result<Option<Value>, Arc<dyn std::error::Error + Send + Sync>> {
        match self.produced {
            None => Ok(None),
            Some(Produced::Value(value)) | Some(Produced::Context(value)) => Ok(Some(value)),
            Some(Produced::Raised(error)) => Err(error),
        }
    }

    /// Enters the synthesised context manager produced by a
    /// `then_enter_with` rule: records an `enter`, increments the entry
    /// counter, and yields a guard carrying the configured value.
    ///
    /// # Panics
    ///
    /// Panics with the configured error if the governing rule was
    /// `then_raise`.
    pub fn enter(self) -> EnterGuard {
        match self.produced {
            None => self.spy.enter_with_value(None),
            Some(Produced::Context(value)) | Some(Produced::Value(value)) => {
                self.spy.enter_with_value(Some(value))
            }
            Some(Produced::Raised(error)) => panic!("{}", error),
        }
    }
}

impl Debug for CallOutcome {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match &self.produced {
            None => write!(f, "CallOutcome(default)"),
            Some(Produced::Value(value)) => write!(f, "CallOutcome({:?})", value),
            Some(Produced::Context(value)) => {
                write!(f, "CallOutcome(enter with {:?})", value)
            }
            Some(Produced::Raised(error)) => write!(f, "CallOutcome(raise {})", error),
        }
    }
}

/// An in-flight asynchronous spy call.
///
/// The interaction was already recorded and published when this future was
/// created; polling it resolves the stub action.
pub struct PendingCall {
    spy: Spy,
    record: Option<CallRecord>,
    pending: Option<BoxFuture<'static, Value>>,
}

impl Future for PendingCall {
    type Output = CallOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<CallOutcome> {
        let this = self.get_mut();

        if let Some(future) = &mut this.pending {
            return future.as_mut().poll(cx).map(|value| CallOutcome {
                spy: this.spy.clone(),
                produced: Some(Produced::Value(value)),
            });
        }

        let record = this.record.take().expect("future polled after completion");
        let action = this.spy.consume_action(&record);
        let produced = match action {
            None => None,
            Some(Action::Return(value)) => Some(Produced::Value(value)),
            Some(Action::Raise(error)) => Some(Produced::Raised(error)),
            Some(Action::Do(run)) => Some(Produced::Value(run(record.args()))),
            Some(Action::EnterWith(value)) => Some(Produced::Context(value)),
            Some(Action::DoAsync(run)) => {
                let mut future = run(record.args());
                match future.as_mut().poll(cx) {
                    Poll::Ready(value) => Some(Produced::Value(value)),
                    Poll::Pending => {
                        this.pending = Some(future);
                        return Poll::Pending;
                    }
                }
            }
        };
        Poll::Ready(CallOutcome { spy: this.spy.clone(), produced })
    }
}

/// An attribute read: either a stubbed/stored value or the child spy.
pub enum Attr {
    /// A value from a matching `get` rule or a prior [`Spy::set`].
    Value(Value),
    /// The child spy behind the attribute.
    Spy(Spy),
}

impl Attr {
    /// Clones the attribute value out as a `T`; `None` when the attribute
    /// resolves to a child spy or a value of another type.
    pub fn cloned<T: ArgValue + Clone>(&self) -> Option<T> {
        match self {
            Attr::Value(value) => value.cloned::<T>(),
            Attr::Spy(_) => None,
        }
    }

    /// The attribute value.
    ///
    /// # Panics
    ///
    /// Panics when the attribute resolves to the child spy.
    pub fn value(self) -> Value {
        match self {
            Attr::Value(value) => value,
            Attr::Spy(spy) => panic!(
                "attribute `{}` holds no stubbed or stored value",
                spy.name()
            ),
        }
    }

    /// The child spy.
    ///
    /// # Panics
    ///
    /// Panics when the attribute resolves to a stored or stubbed value.
    pub fn spy(self) -> Spy {
        match self {
            Attr::Spy(spy) => spy,
            Attr::Value(value) => {
                panic!("attribute holds the value {:?}, not a child mock", value)
            }
        }
    }
}

impl Debug for Attr {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Attr::Value(value) => write!(f, "Attr({:?})", value),
            Attr::Spy(spy) => write!(f, "Attr({:?})", spy),
        }
    }
}

/// A guard for an entered context. Records the `exit` interaction and
/// decrements the entry counter when dropped (or exited explicitly).
pub struct EnterGuard {
    spy: Spy,
    value: Option<Value>,
    exited: bool,
}

impl EnterGuard {
    /// The value the stubbed context produced on entry, if any.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Clones the entry value out as a `T`.
    pub fn cloned<T: ArgValue + Clone>(&self) -> Option<T> {
        self.value.as_ref().and_then(|value| value.cloned::<T>())
    }

    /// Exits the context now instead of at drop time.
    pub fn exit(mut self) {
        self.exit_once();
    }

    fn exit_once(&mut self) {
        if !self.exited {
            self.exited = true;
            self.spy.record_exit();
        }
    }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        self.exit_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{args, Decoy};

    #[test]
    fn children_are_cached_per_name() {
        let decoy = Decoy::new();
        let spy = decoy.mock(Spec::bare("m"));
        assert_eq!(spy.child("x").index, spy.child("x").index);
        assert_ne!(spy.child("x").index, spy.child("y").index);
    }

    #[test]
    fn children_remember_their_parent() {
        let decoy = Decoy::new();
        let spy = decoy.mock(Spec::bare("m"));
        let child = spy.child("x");
        assert_eq!(child.parent().expect("has a parent").index, spy.index);
        assert!(spy.parent().is_none());
    }

    #[test]
    fn stored_values_shadow_children_until_deleted() {
        let decoy = Decoy::new();
        let spy = decoy.mock(Spec::bare("m"));

        assert!(matches!(spy.get("x"), Attr::Spy(_)));
        spy.set("x", 5);
        assert_eq!(spy.get("x").cloned::<i32>(), Some(5));
        spy.delete("x");
        assert!(matches!(spy.get("x"), Attr::Spy(_)));
    }

    #[test]
    fn entry_counter_tracks_nesting_and_never_underflows() {
        let decoy = Decoy::new();
        let spy = decoy.mock(Spec::bare("m"));

        let outer = spy.enter();
        let inner = spy.enter();
        assert_eq!(spy.core.state.lock().spies[spy.index].entered, 2);
        drop(inner);
        drop(outer);
        let depth = spy.core.state.lock().spies[spy.index].entered;
        assert_eq!(depth, 0);
    }

    #[test]
    #[should_panic(expected = "no attribute")]
    fn declared_children_reject_unknown_names() {
        let decoy = Decoy::new();
        let spy = decoy.mock(Spec::class("Db").child(Spec::function("connect")));
        spy.child("fetch");
    }

    #[test]
    #[should_panic(expected = "async")]
    fn async_specs_reject_the_sync_surface() {
        let decoy = Decoy::new();
        let spy = decoy.mock(Spec::function("f").asynchronous());
        spy.call(args![]);
    }

    #[test]
    fn sequence_numbers_strictly_increase() {
        let decoy = Decoy::new();
        let spy = decoy.mock(Spec::bare("m"));
        spy.call(args![]);
        spy.call(args![]);
        spy.call(args![]);

        let state = spy.core.state.lock();
        let seqs: Vec<u64> = state.log.iter().map(|record| record.seq).collect();
        assert!(seqs.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
