//! Warning-level diagnostics and strictness, observed through `tracing`.

use decoy::{args, Decoy, Spec};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tracing::{span, Event, Level, Metadata};

/// Counts warning events; everything else is disabled.
struct WarnCounter(Arc<AtomicUsize>);

impl tracing::Subscriber for WarnCounter {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        *metadata.level() == Level::WARN
    }

    fn new_span(&self, _span: &span::Attributes<'_>) -> span::Id {
        span::Id::from_u64(1)
    }

    fn record(&self, _span: &span::Id, _values: &span::Record<'_>) {}

    fn record_follows_from(&self, _span: &span::Id, _follows: &span::Id) {}

    fn event(&self, _event: &Event<'_>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn enter(&self, _span: &span::Id) {}

    fn exit(&self, _span: &span::Id) {}
}

fn count_warnings(scenario: impl FnOnce()) -> usize {
    let count = Arc::new(AtomicUsize::new(0));
    tracing::subscriber::with_default(WarnCounter(count.clone()), scenario);
    count.load(Ordering::SeqCst)
}

#[test]
fn a_clean_reset_warns_about_nothing() {
    let warnings = count_warnings(|| {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::bare("m"));
        decoy.when(m.call(args![1])).then_return(2);
        m.call(args![1]);
        decoy.reset();
    });
    assert_eq!(warnings, 0);
}

#[test]
fn miscalled_stubs_warn_at_reset() {
    let warnings = count_warnings(|| {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::bare("m"));
        decoy.when(m.call(args![1])).then_return(2);
        m.call(args![9]);
        decoy.reset();
    });
    assert_eq!(warnings, 1);
}

#[test]
fn redundant_verification_warns() {
    let warnings = count_warnings(|| {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::bare("m"));
        decoy.when(m.call(args![1])).then_return(2);
        m.call(args![1]);
        decoy.verify(m.call(args![1]));
    });
    assert_eq!(warnings, 1);
}

#[test]
fn distinct_verification_does_not_warn() {
    let warnings = count_warnings(|| {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::bare("m"));
        decoy.when(m.call(args![1])).then_return(2);
        m.call(args![1]);
        m.call(args![2]);
        decoy.verify(m.call(args![2]));
    });
    assert_eq!(warnings, 0);
}

#[test]
fn lenient_containers_record_unbindable_calls_raw_and_warn() {
    let warnings = count_warnings(|| {
        let decoy = Decoy::new();
        let add = decoy.mock(Spec::function("add").param("a").param("b"));

        add.call(args![1, 2, 3]);

        // the condition fails to bind the same way, so it matches the raw
        // record (and warns once more)
        decoy.verify(&add).times(1).called_with(args![1, 2, 3]);
    });
    assert_eq!(warnings, 2);
}

#[test]
#[should_panic(expected = "does not bind")]
fn strict_containers_make_signature_mismatches_fatal() {
    let decoy = Decoy::strict();
    let add = decoy.mock(Spec::function("add").param("a").param("b"));
    add.call(args![1, 2, 3]);
}
