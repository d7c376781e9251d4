use serde::{Deserialize, Serialize};
use std::fmt;

use super::value::Value;

/// How `wait` combines the value tracks of the futures it joins.
///
/// Each aggregator is a pairwise fold applied over the Cartesian product of
/// the joined value tracks, in `wait` list order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregatorKind {
    /// First successful value, otherwise the first value.
    #[default]
    FirstSuccessful,
    /// Value of the last future in the list.
    LastWriterWins,
    /// `true` only if every future succeeded.
    WaitAll,
    /// `true` if any future succeeded.
    WaitAny,
}

impl AggregatorKind {
    /// Case-insensitive lookup by surface name.
    pub fn lookup(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "firstsuccessful" | "first" => Some(Self::FirstSuccessful),
            "lastwriterwins" | "lastwriter" | "last" => Some(Self::LastWriterWins),
            "waitall" | "all" => Some(Self::WaitAll),
            "waitany" | "any" => Some(Self::WaitAny),
            _ => None,
        }
    }

    /// Combine the value accumulated so far with the next future's value.
    pub fn combine(self, acc: &Value, next: &Value) -> Value {
        match self {
            Self::FirstSuccessful => {
                if acc.is_success() != Some(true) && next.is_success() == Some(true) {
                    next.clone()
                } else {
                    acc.clone()
                }
            }
            Self::LastWriterWins => next.clone(),
            Self::WaitAll => Value::Bool(acc.is_success() == Some(true) && next.is_success() == Some(true)),
            Self::WaitAny => Value::Bool(acc.is_success() == Some(true) || next.is_success() == Some(true)),
        }
    }
}

impl fmt::Display for AggregatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FirstSuccessful => "FirstSuccessful",
            Self::LastWriterWins => "LastWriterWins",
            Self::WaitAll => "WaitAll",
            Self::WaitAny => "WaitAny",
        })
    }
}
