//! Matching verifications against the interaction log.
//!
//! Verification shares the rehearsal machinery of `when`: the rehearsal
//! form asserts immediately, the spy form returns a [`Checker`] whose
//! terminal methods assert. An optional thread-local ordering context, open
//! inside [`Decoy::verify_order`](crate::Decoy::verify_order), additionally
//! requires successive verifications to match at strictly increasing
//! sequence numbers.

use crate::{
    error::{self, Error, Warning},
    record::InteractionKind,
    spy::{Attr, CallOutcome, Spy},
    stub::{self, Condition},
    value::{Args, IntoValue},
    when::RehearsalTarget,
};
use std::{cell::RefCell, collections::HashSet};

thread_local! {
    /// When `Some`, the sequence number the next ordered verification must
    /// exceed. `Some(0)` marks a freshly opened ordering context.
    static ORDER: RefCell<Option<u64>> = RefCell::new(None);
}

/// Something `verify` can check: a rehearsal outcome (asserts immediately)
/// or a spy (returns a [`Checker`]).
pub trait VerifyTarget {
    /// What the verification surface yields for this target.
    type Output;

    /// Runs or begins the verification.
    fn verify(self, decoy: &crate::Decoy) -> Self::Output;
}

impl VerifyTarget for &Spy {
    type Output = Checker;

    fn verify(self, _decoy: &crate::Decoy) -> Checker {
        Checker::new(self.clone())
    }
}

impl VerifyTarget for CallOutcome {
    type Output = ();

    fn verify(self, _decoy: &crate::Decoy) {
        check_rehearsal(self, None);
    }
}

impl VerifyTarget for Attr {
    type Output = ();

    fn verify(self, _decoy: &crate::Decoy) {
        check_rehearsal(self, None);
    }
}

fn check_rehearsal<T: RehearsalTarget>(target: T, times: Option<u32>) {
    let (spy, record) = match target.resolve() {
        Ok(resolved) => resolved,
        Err(error) => panic!("{}", error),
    };
    let record = match record {
        Some(record) => record,
        None => panic!("{}", Error::MissingRehearsal),
    };
    let mut condition = Condition::from_record(&record);
    condition.ignore_extra_args = spy.ignores_extra_args();
    check(&spy, &condition, times);
}

impl crate::Decoy {
    /// Verifies that an interaction happened.
    ///
    /// The rehearsal form asserts at once that at least one matching
    /// interaction was recorded; the spy form returns a [`Checker`] for
    /// counted or attribute verifications.
    ///
    /// ```
    /// use decoy::{args, Decoy, Spec};
    ///
    /// let decoy = Decoy::new();
    /// let log = decoy.mock(Spec::function("log").param("message"));
    /// log.call(args!["ready"]);
    ///
    /// decoy.verify(log.call(args!["ready"]));
    /// decoy.verify(&log).times(1).called_with(args!["ready"]);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics with [`Error::VerificationFailed`] on a count mismatch, and
    /// with [`Error::MissingRehearsal`] when the rehearsal form finds no
    /// interaction on this thread.
    pub fn verify<T: VerifyTarget>(&self, target: T) -> T::Output {
        target.verify(self)
    }

    /// Verifies that a rehearsed interaction happened exactly `times`
    /// times. `0` asserts the interaction never happened.
    pub fn verify_times<T: RehearsalTarget>(&self, times: u32, target: T) {
        check_rehearsal(target, Some(times));
    }

    /// Opens an ordering context: verifications inside `within` must match
    /// the interaction log in increasing sequence order.
    ///
    /// ```
    /// use decoy::{args, Decoy, Spec};
    ///
    /// let decoy = Decoy::new();
    /// let first = decoy.mock(Spec::function("first"));
    /// let second = decoy.mock(Spec::function("second"));
    /// first.call(args![]);
    /// second.call(args![]);
    ///
    /// decoy.verify_order(|| {
    ///     decoy.verify(first.call(args![]));
    ///     decoy.verify(second.call(args![]));
    /// });
    /// ```
    pub fn verify_order<R>(&self, within: impl FnOnce() -> R) -> R {
        let previous = ORDER.with(|order| order.borrow_mut().replace(0));
        let _restore = scopeguard::guard(previous, |previous| {
            ORDER.with(|order| *order.borrow_mut() = previous);
        });
        within()
    }
}

/// A verification under construction against one spy.
pub struct Checker {
    spy: Spy,
    times: Option<u32>,
    ignore_extra_args: bool,
    is_entered: Option<bool>,
}

impl Checker {
    fn new(spy: Spy) -> Self {
        let ignore_extra_args = spy.ignores_extra_args();
        Checker { spy, times: None, ignore_extra_args, is_entered: None }
    }

    /// Requires exactly `times` matching interactions instead of at least
    /// one.
    pub fn times(mut self, times: u32) -> Self {
        self.times = Some(times);
        self
    }

    /// Matches interactions that passed extra arguments beyond the
    /// rehearsed ones.
    pub fn ignore_extra_args(mut self, ignore: bool) -> Self {
        self.ignore_extra_args = ignore;
        self
    }

    /// Gates matching on the spy's context-entry state at interaction time.
    #[allow(clippy::wrong_self_convention)]
    pub fn is_entered(mut self, entered: bool) -> Self {
        self.is_entered = Some(entered);
        self
    }

    /// Asserts a call with these arguments was recorded.
    pub fn called_with(self, args: Args) {
        let bound = self.spy.bind_args(args);
        self.finish(InteractionKind::Call, bound);
    }

    /// Asserts this attribute spy was read.
    pub fn get(self) {
        self.finish(InteractionKind::Get, Args::new());
    }

    /// Asserts `value` was written to this attribute spy.
    pub fn set<T: IntoValue>(self, value: T) {
        self.finish(InteractionKind::Set, Args::single(value.into_value()));
    }

    /// Asserts this attribute spy was deleted.
    pub fn delete(self) {
        self.finish(InteractionKind::Delete, Args::new());
    }

    fn finish(self, kind: InteractionKind, args: Args) {
        let condition = Condition {
            kind,
            args,
            ignore_extra_args: self.ignore_extra_args,
            is_entered: self.is_entered,
        };
        check(&self.spy, &condition, self.times);
    }
}

/// Runs one verification against the log, honoring any open ordering
/// context on this thread.
fn check(spy: &Spy, condition: &Condition, times: Option<u32>) {
    warn_if_redundant(spy, condition);

    let ordered_from = ORDER.with(|order| *order.borrow());
    let name = spy.name();

    let (outcome, listing) = {
        let state = spy.core.state.lock();
        let subtree = state.subtree(spy.index);
        let candidates: Vec<_> = state
            .log
            .iter()
            .filter(|record| subtree.contains(&record.spy))
            .collect();
        let listing: String = if candidates.is_empty() {
            " (none)".to_owned()
        } else {
            candidates.iter().map(|record| format!("\n    {}", record)).collect()
        };

        let outcome = match ordered_from {
            Some(last) => candidates
                .iter()
                .find(|record| record.seq > last && condition.matches(record))
                .map(|record| record.seq)
                .ok_or(0usize),
            None => {
                let found = candidates
                    .iter()
                    .filter(|record| condition.matches(record))
                    .count();
                let passed = match times {
                    Some(times) => found == times as usize,
                    None => found >= 1,
                };
                if passed {
                    Ok(0)
                } else {
                    Err(found)
                }
            }
        };
        (outcome, listing)
    };

    match outcome {
        Ok(matched_seq) => {
            if ordered_from.is_some() {
                ORDER.with(|order| *order.borrow_mut() = Some(matched_seq));
            }
        }
        Err(found) => {
            let expected = match (ordered_from, times) {
                (Some(_), _) => "a matching call after the previously verified one".to_owned(),
                (None, Some(times)) => format!("exactly {} matching call(s)", times),
                (None, None) => "at least 1 matching call".to_owned(),
            };
            panic!(
                "{}",
                Error::VerificationFailed {
                    expected,
                    found,
                    rehearsal: describe(&name, condition),
                    calls: listing,
                }
            );
        }
    }
}

fn warn_if_redundant(spy: &Spy, condition: &Condition) {
    let name = spy.name();
    let state = spy.core.state.lock();
    let redundant = state.spies[spy.index]
        .rules
        .iter()
        .any(|rule| rule.condition.duplicates(condition));
    drop(state);
    if redundant {
        error::emit(&Warning::RedundantVerify {
            spy: name.clone(),
            rehearsal: describe(&name, condition),
        });
    }
}

fn describe(name: &str, condition: &Condition) -> String {
    let mut described = match condition.kind {
        InteractionKind::Call => format!("{}{:?}", name, condition.args),
        InteractionKind::Get => format!("{} (get)", name),
        InteractionKind::Set => match condition.args.positional().first() {
            Some(value) => format!("{} = {:?}", name, value),
            None => format!("{} = ?", name),
        },
        InteractionKind::Delete => format!("del {}", name),
        InteractionKind::Enter => format!("enter {}", name),
        InteractionKind::Exit => format!("exit {}", name),
    };
    if condition.ignore_extra_args {
        described.push_str(" (ignoring extra args)");
    }
    match condition.is_entered {
        Some(true) => described.push_str(" (entered)"),
        Some(false) => described.push_str(" (not entered)"),
        None => {}
    }
    described
}

/// The reset-time sweep: for every spy that has rules installed and
/// interactions those rules never matched, produce one warning enumerating
/// both.
pub(crate) fn miscalled_stub_warnings(state: &crate::spy::CoreState) -> Vec<Warning> {
    let mut warnings = Vec::new();
    for (index, spy) in state.spies.iter().enumerate() {
        if spy.rules.is_empty() {
            continue;
        }
        let stubbed_kinds: HashSet<InteractionKind> =
            spy.rules.iter().map(|rule| rule.condition.kind).collect();
        let unmatched: Vec<String> = state
            .log
            .iter()
            .filter(|record| record.spy == index && stubbed_kinds.contains(&record.kind))
            .filter(|record| !stub::any_matches(&spy.rules, record))
            .map(|record| format!("    {}\n", record))
            .collect();
        if !unmatched.is_empty() {
            let rules: String = spy
                .rules
                .iter()
                .map(|rule| format!("    {}\n", rule.describe()))
                .collect();
            warnings.push(Warning::MiscalledStub {
                spy: spy.name.clone(),
                rules,
                calls: unmatched.concat(),
            });
        }
    }
    warnings
}
