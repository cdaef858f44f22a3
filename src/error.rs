//! The error and warning taxonomy.
//!
//! Fatal misuse terminates the current test: public entry points panic with
//! the `Display` rendering of an [`Error`]. Non-fatal findings are emitted as
//! [`Warning`]s through `tracing` and never interrupt control flow. User
//! callbacks that panic are never caught or downgraded.

use thiserror::Error;

/// A fatal misuse of the library.
#[derive(Debug, Error)]
pub enum Error {
    /// A verification found the wrong number of matching calls.
    #[error(
        "verification failed: expected {expected}, found {found}\n  \
         rehearsed: {rehearsal}\n  interactions on this mock:{calls}"
    )]
    VerificationFailed {
        /// Human-readable count expectation, e.g. `at least 1 matching call`.
        expected: String,
        /// The number of matching interactions actually found.
        found: usize,
        /// The rehearsed condition.
        rehearsal: String,
        /// A rendered listing of the mock's recorded interactions.
        calls: String,
    },

    /// `when`/`verify` was used without an available rehearsal.
    #[error(
        "no rehearsal on this thread: interact with a mock inside \
         `when(..)`/`verify(..)`, or rehearse with `.called_with(..)` on the \
         spy form"
    )]
    MissingRehearsal,

    /// `mock` received an unusable spec.
    #[error("invalid mock spec: {reason}")]
    MockSpecInvalid {
        /// What made the spec unusable.
        reason: String,
    },

    /// A synchronous surface was mixed with an asynchronous spec or action.
    #[error("async mismatch: {reason}")]
    AsyncMismatch {
        /// Which surfaces disagreed about asyncness.
        reason: String,
    },

    /// An actual call did not bind to the spec's signature (strict mode).
    #[error("call to `{spy}` does not bind to its signature: {reason}")]
    SignatureMismatch {
        /// The mock that was called.
        spy: String,
        /// Why binding failed.
        reason: String,
    },
}

/// A non-fatal finding, surfaced through the `tracing` warning facility.
#[derive(Debug, Error)]
pub enum Warning {
    /// A spy has stub rules but was called with arguments matching none.
    #[error(
        "mock `{spy}` has stubbings but was called with arguments matching \
         none of them\n  rules:\n{rules}  unmatched calls:\n{calls}"
    )]
    MiscalledStub {
        /// The miscalled mock.
        spy: String,
        /// A rendered listing of the installed rules.
        rules: String,
        /// A rendered listing of the calls no rule matched.
        calls: String,
    },

    /// A verification duplicates an installed stub rule.
    #[error(
        "mock `{spy}` was both stubbed and verified with the same rehearsal \
         ({rehearsal}); redundant verification of stubbed behavior can hide \
         real regressions"
    )]
    RedundantVerify {
        /// The doubly-rehearsed mock.
        spy: String,
        /// The shared rehearsal condition.
        rehearsal: String,
    },

    /// An actual call did not bind to the spec's signature (lenient mode).
    ///
    /// The call is recorded with its arguments as given.
    #[error("call to `{spy}` does not bind to its signature: {reason}")]
    IncorrectCall {
        /// The mock that was called.
        spy: String,
        /// Why binding failed.
        reason: String,
    },
}

pub(crate) fn emit(warning: &Warning) {
    tracing::warn!(target: "decoy", "{}", warning);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_failure_names_the_rehearsal() {
        let err = Error::VerificationFailed {
            expected: "exactly 2 matching calls".into(),
            found: 1,
            rehearsal: "greet(\"world\")".into(),
            calls: "\n    greet(\"moon\")".into(),
        };
        let message = err.to_string();
        assert!(message.contains("exactly 2 matching calls"));
        assert!(message.contains("greet(\"world\")"));
        assert!(message.contains("greet(\"moon\")"));
    }

    #[test]
    fn warnings_render_without_panicking() {
        let warning = Warning::RedundantVerify {
            spy: "db.connect".into(),
            rehearsal: "db.connect(\"url\")".into(),
        };
        assert!(warning.to_string().contains("db.connect"));
    }
}
