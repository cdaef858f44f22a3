//! Immutable records of spy interactions.
//!
//! Every interaction with a spy appends exactly one [`CallRecord`] to its
//! Decoy's interaction log. The per-Decoy sequence number is the sole source
//! of truth for ordering; records never change after they are written.

use crate::value::Args;
use std::fmt::{self, Display, Formatter};

/// What kind of interaction a record describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    /// The spy was called.
    Call,
    /// An attribute was read.
    Get,
    /// An attribute was written.
    Set,
    /// An attribute was deleted.
    Delete,
    /// A context was entered.
    Enter,
    /// A context was exited.
    Exit,
}

/// One recorded interaction with a spy.
#[derive(Clone, Debug)]
pub struct CallRecord {
    pub(crate) spy: usize,
    pub(crate) spy_name: String,
    pub(crate) kind: InteractionKind,
    pub(crate) args: Args,
    pub(crate) entered: u32,
    pub(crate) seq: u64,
}

impl CallRecord {
    /// The interaction kind.
    pub fn kind(&self) -> InteractionKind {
        self.kind
    }

    /// The interaction's arguments, bound to the spy's signature when one
    /// was available.
    pub fn args(&self) -> &Args {
        &self.args
    }

    /// The spy's context-entry depth at the moment of recording.
    pub fn entered(&self) -> u32 {
        self.entered
    }

    /// The record's position in its Decoy's interaction log. Strictly
    /// increasing per Decoy.
    pub fn sequence(&self) -> u64 {
        self.seq
    }
}

impl Display for CallRecord {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self.kind {
            InteractionKind::Call => write!(f, "{}{:?}", self.spy_name, self.args),
            InteractionKind::Get => write!(f, "{} (get)", self.spy_name),
            InteractionKind::Set => match self.args.positional().first() {
                Some(value) => write!(f, "{} = {:?}", self.spy_name, value),
                None => write!(f, "{} = ?", self.spy_name),
            },
            InteractionKind::Delete => write!(f, "del {}", self.spy_name),
            InteractionKind::Enter => write!(f, "enter {}", self.spy_name),
            InteractionKind::Exit => write!(f, "exit {}", self.spy_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;

    fn record(kind: InteractionKind, args: Args) -> CallRecord {
        CallRecord { spy: 0, spy_name: "db.connect".into(), kind, args, entered: 0, seq: 1 }
    }

    #[test]
    fn calls_render_like_calls() {
        let rendered = record(InteractionKind::Call, args!["url"; retry: true]).to_string();
        assert_eq!(rendered, "db.connect(\"url\", retry: true)");
    }

    #[test]
    fn attribute_interactions_render_distinctly() {
        assert_eq!(record(InteractionKind::Get, args![]).to_string(), "db.connect (get)");
        assert_eq!(record(InteractionKind::Set, args![3]).to_string(), "db.connect = 3");
        assert_eq!(record(InteractionKind::Delete, args![]).to_string(), "del db.connect");
    }
}
