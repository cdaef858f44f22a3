//! The thread-local last-call channel.
//!
//! Every spy interaction publishes its `(Spy, CallRecord)` pair here, after
//! appending to the interaction log. `when`/`verify` drain the slot to turn
//! the most recent interaction on the *current thread* into a rehearsal.
//! Unread values are overwritten freely; they belong to calls made outside a
//! rehearsal context. Thread-locality is what keeps parallel test workers
//! from seeing each other's rehearsals.

use crate::{record::CallRecord, spy::Spy};
use std::cell::RefCell;

thread_local! {
    /// The most recent interaction on this thread, if unread.
    static LAST_CALL: RefCell<Option<(Spy, CallRecord)>> = RefCell::new(None);
}

/// Publishes an interaction, overwriting any unread prior value.
pub(crate) fn publish(spy: Spy, record: CallRecord) {
    LAST_CALL.with(|slot| *slot.borrow_mut() = Some((spy, record)));
}

/// Drains the slot: reads and clears in one step.
pub(crate) fn take() -> Option<(Spy, CallRecord)> {
    LAST_CALL.with(|slot| slot.borrow_mut().take())
}

/// Clears the slot without reading it.
pub(crate) fn clear() {
    drop(take());
}
