//! Process State Contract
//!
//! Every process kind supplies a state enum implementing [`ProcessState`].
//! The enum carries its own transition table; the generic engine consults it
//! before any state is persisted.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::types::ProcessRole;

/// State of a leased process.
///
/// Codes are persisted as INTEGER and must stay stable across releases.
pub trait ProcessState:
    Copy + Eq + Hash + Debug + Display + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Every state of this kind, in table order.
    fn all() -> &'static [Self];

    /// State a freshly created process starts in.
    fn initial() -> Self;

    /// Terminal failure state reachable from every non-terminal state.
    fn error() -> Self;

    /// Numeric code for storage.
    fn code(&self) -> i32;

    /// Human-readable state name.
    fn as_str(&self) -> &'static str;

    /// No automatic transition leaves a terminal state.
    fn is_terminal(&self) -> bool;

    /// Transition table for the given role (self loops are never allowed).
    fn can_transition_to(&self, next: Self, role: ProcessRole) -> bool;

    /// States whose error detail is meaningful (error, or a domain rejection).
    fn is_failure(&self) -> bool {
        *self == Self::error()
    }

    /// Convert from a stored code
    fn from_code(code: i32) -> Option<Self> {
        Self::all().iter().copied().find(|s| s.code() == code)
    }

    /// Whether a retry may roll `self` back to `previous`.
    ///
    /// Rollback is only allowed along an edge of the table, so the process
    /// re-enters exactly the step it came from.
    fn can_roll_back_to(&self, previous: Self, role: ProcessRole) -> bool {
        previous.can_transition_to(*self, role) && !self.is_terminal()
    }
}

/// Shortest path through the transition table from `from` to `to`.
///
/// Used by entry points that traverse several steps inline (the synchronous
/// delegate, inbound messages that arrive before the local dispatch returned).
pub fn path_between<S: ProcessState>(from: S, to: S, role: ProcessRole) -> Option<Vec<S>> {
    use std::collections::{HashMap, VecDeque};

    if from == to {
        return Some(Vec::new());
    }

    let mut previous: HashMap<S, S> = HashMap::new();
    let mut queue = VecDeque::from([from]);

    while let Some(current) = queue.pop_front() {
        for next in S::all().iter().copied() {
            if next == from || previous.contains_key(&next) {
                continue;
            }
            if !current.can_transition_to(next, role) {
                continue;
            }
            previous.insert(next, current);
            if next == to {
                let mut path = vec![to];
                let mut cursor = to;
                while let Some(&prev) = previous.get(&cursor) {
                    if prev == from {
                        break;
                    }
                    path.push(prev);
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back(next);
        }
    }

    None
}
