//! Stub rules: rehearsed conditions paired with configured actions.
//!
//! Each spy owns an ordered list of rules. Lookup scans from the most
//! recently installed rule to the oldest so that re-stubbing the same
//! rehearsal refines earlier configuration, with one carve-out: a rule that
//! constrains the context-entry state beats one that ignores it.

use crate::{
    record::{CallRecord, InteractionKind},
    value::{Args, Value},
};
use futures::future::BoxFuture;
use std::{
    error::Error as StdError,
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

/// A shared, clonable raised error.
pub(crate) type Raised = Arc<dyn StdError + Send + Sync>;

pub(crate) type DoFn = Arc<dyn Fn(&Args) -> Value + Send + Sync>;
pub(crate) type DoAsyncFn = Arc<dyn Fn(&Args) -> BoxFuture<'static, Value> + Send + Sync>;

/// The partial call pattern a rule matches against.
#[derive(Clone, Debug)]
pub(crate) struct Condition {
    pub kind: InteractionKind,
    pub args: Args,
    pub ignore_extra_args: bool,
    pub is_entered: Option<bool>,
}

impl Condition {
    pub fn from_record(record: &CallRecord) -> Self {
        Condition {
            kind: record.kind,
            args: record.args.clone(),
            ignore_extra_args: false,
            is_entered: None,
        }
    }

    /// Whether `record` satisfies this condition.
    pub fn matches(&self, record: &CallRecord) -> bool {
        if self.kind != record.kind {
            return false;
        }

        match self.is_entered {
            Some(true) if record.entered == 0 => return false,
            Some(false) if record.entered > 0 => return false,
            _ => {}
        }

        let expected = self.args.positional();
        let actual = record.args.positional();
        if self.ignore_extra_args {
            if expected.len() > actual.len() {
                return false;
            }
        } else if expected.len() != actual.len() {
            return false;
        }
        if !expected.iter().zip(actual).all(|(e, a)| e.equals(a)) {
            return false;
        }

        for (name, expected) in self.args.named_args() {
            match record.args.get_named(name) {
                Some(actual) if expected.equals(actual) => {}
                _ => return false,
            }
        }
        if !self.ignore_extra_args {
            let known = |name: &str| self.args.get_named(name).is_some();
            if record.args.named_args().any(|(name, _)| !known(name)) {
                return false;
            }
        }

        true
    }

    /// Structural sameness, used to flag a verification that duplicates an
    /// installed rule. Matcher arguments compare by identity.
    pub fn duplicates(&self, other: &Condition) -> bool {
        if self.kind != other.kind
            || self.ignore_extra_args != other.ignore_extra_args
            || self.is_entered != other.is_entered
        {
            return false;
        }
        let (a, b) = (self.args.positional(), other.args.positional());
        if a.len() != b.len() || !a.iter().zip(b).all(|(a, b)| a.same(b)) {
            return false;
        }
        let mut a_named = self.args.named_args();
        let mut b_named = other.args.named_args();
        loop {
            match (a_named.next(), b_named.next()) {
                (None, None) => return true,
                (Some((an, av)), Some((bn, bv))) if an == bn && av.same(bv) => {}
                _ => return false,
            }
        }
    }
}

/// What a matched rule does to the call.
#[derive(Clone)]
pub(crate) enum Action {
    /// Produce this value.
    Return(Value),
    /// Raise this error.
    Raise(Raised),
    /// Invoke this callable with the call's (bound) arguments.
    Do(DoFn),
    /// Invoke this async callable at await time.
    DoAsync(DoAsyncFn),
    /// Synthesise a context manager whose entry produces this value.
    EnterWith(Value),
}

impl Debug for Action {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Action::Return(value) => write!(f, "return {:?}", value),
            Action::Raise(error) => write!(f, "raise {}", error),
            Action::Do(_) => f.write_str("do <fn>"),
            Action::DoAsync(_) => f.write_str("do <async fn>"),
            Action::EnterWith(value) => write!(f, "enter with {:?}", value),
        }
    }
}

/// One installed stub rule.
#[derive(Clone, Debug)]
pub(crate) struct StubRule {
    pub condition: Condition,
    pub action: Action,
    /// `None` is unbounded; `Some(0)` is exhausted and skipped.
    pub remaining: Option<u32>,
}

impl StubRule {
    pub fn describe(&self) -> String {
        format!("when {:?} -> {:?}", self.condition.args, self.action)
    }
}

/// Finds the governing rule for `record`, consuming one use of it.
///
/// Newest rules win, except that a rule constraining `is_entered` takes
/// priority over one that leaves it unconstrained.
pub(crate) fn consume(rules: &mut [StubRule], record: &CallRecord) -> Option<Action> {
    for specific_pass in [true, false].iter() {
        for rule in rules.iter_mut().rev() {
            if rule.remaining == Some(0) {
                continue;
            }
            if rule.condition.is_entered.is_some() != *specific_pass {
                continue;
            }
            if rule.condition.matches(record) {
                if let Some(remaining) = &mut rule.remaining {
                    *remaining -= 1;
                }
                return Some(rule.action.clone());
            }
        }
    }
    None
}

/// Whether any rule's condition matches `record`, ignoring use counts.
/// Used by the reset-time miscalled-stub sweep.
pub(crate) fn any_matches(rules: &[StubRule], record: &CallRecord) -> bool {
    rules.iter().any(|rule| rule.condition.matches(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;

    fn record(args: Args) -> CallRecord {
        record_entered(args, 0)
    }

    fn record_entered(args: Args, entered: u32) -> CallRecord {
        CallRecord {
            spy: 0,
            spy_name: "m".into(),
            kind: InteractionKind::Call,
            args,
            entered,
            seq: 1,
        }
    }

    fn call_condition(args: Args) -> Condition {
        Condition {
            kind: InteractionKind::Call,
            args,
            ignore_extra_args: false,
            is_entered: None,
        }
    }

    fn rule(args: Args, returned: i32, remaining: Option<u32>) -> StubRule {
        StubRule {
            condition: call_condition(args),
            action: Action::Return(Value::of(returned)),
            remaining,
        }
    }

    fn returned(action: Option<Action>) -> Option<i32> {
        match action {
            Some(Action::Return(value)) => value.cloned::<i32>(),
            _ => None,
        }
    }

    #[test]
    fn arguments_must_match_exactly_by_default() {
        let condition = call_condition(args![1; x: 2]);
        assert!(condition.matches(&record(args![1; x: 2])));
        assert!(!condition.matches(&record(args![1])));
        assert!(!condition.matches(&record(args![1; x: 2, y: 3])));
        assert!(!condition.matches(&record(args![1, 9; x: 2])));
    }

    #[test]
    fn ignore_extra_args_takes_prefixes_and_subsets() {
        let mut condition = call_condition(args![1; x: 2]);
        condition.ignore_extra_args = true;
        assert!(condition.matches(&record(args![1, 9; x: 2, y: 3])));
        assert!(!condition.matches(&record(args![; x: 2])));
        assert!(!condition.matches(&record(args![1; y: 3])));
    }

    #[test]
    fn entry_state_gates_matching() {
        let mut condition = call_condition(args![]);
        condition.is_entered = Some(true);
        assert!(condition.matches(&record_entered(args![], 1)));
        assert!(!condition.matches(&record_entered(args![], 0)));

        condition.is_entered = Some(false);
        assert!(condition.matches(&record_entered(args![], 0)));
        assert!(!condition.matches(&record_entered(args![], 2)));
    }

    #[test]
    fn newest_matching_rule_wins() {
        let mut rules = vec![rule(args![1], 10, None), rule(args![1], 20, None)];
        assert_eq!(returned(consume(&mut rules, &record(args![1]))), Some(20));
    }

    #[test]
    fn exhausted_rules_are_skipped() {
        let mut rules = vec![rule(args![1], 10, None), rule(args![1], 20, Some(1))];
        assert_eq!(returned(consume(&mut rules, &record(args![1]))), Some(20));
        assert_eq!(returned(consume(&mut rules, &record(args![1]))), Some(10));
    }

    #[test]
    fn entry_constrained_rules_beat_unconstrained_ones() {
        let mut entered_rule = rule(args![], 7, None);
        entered_rule.condition.is_entered = Some(true);
        // the unconstrained rule is newer, but the constrained one is more
        // specific
        let mut rules = vec![entered_rule, rule(args![], 1, None)];
        assert_eq!(
            returned(consume(&mut rules, &record_entered(args![], 1))),
            Some(7)
        );
        assert_eq!(returned(consume(&mut rules, &record(args![]))), Some(1));
    }

    #[test]
    fn duplicate_detection_is_structural_for_concrete_values() {
        let a = call_condition(args![1; x: 2]);
        let b = call_condition(args![1; x: 2]);
        assert!(a.duplicates(&b));
        assert!(!a.duplicates(&call_condition(args![1])));
    }

    #[test]
    fn duplicate_detection_compares_matchers_by_identity() {
        let matcher = crate::matcher::anything();
        let a = call_condition(Args::single(matcher.clone()));
        assert!(a.duplicates(&call_condition(Args::single(matcher))));
        assert!(!a.duplicates(&call_condition(Args::single(crate::matcher::anything()))));
    }
}
