//! Ordering strategies: which row is "next", and what a duplicate insert means.
//!
//! A strategy is fixed for the lifetime of a table. The engine only asks it
//! two questions (head order and duplicate policy), so new orderings plug in
//! without touching the locking or blocking logic.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Direction in which the head row is selected by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadOrder {
    /// Smallest id first.
    Ascending,
    /// Largest id first.
    Descending,
}

impl HeadOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            HeadOrder::Ascending => "ASC",
            HeadOrder::Descending => "DESC",
        }
    }
}

/// What `put` does when the store rejects a payload as a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Surface `ConstraintViolation` to the caller.
    Reject,
    /// Treat the insert as a no-op: no id, no count change, no wake-up.
    Ignore,
}

/// Head selection plus duplicate handling for one queue table.
pub trait OrderingStrategy: Send + Sync + std::fmt::Debug {
    /// Short name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Table name prefix; the queue name is appended to it.
    fn table_prefix(&self) -> &'static str;

    fn head_order(&self) -> HeadOrder;

    /// Whether the table carries a uniqueness constraint on the payload.
    fn unique_payload(&self) -> bool {
        false
    }

    fn on_duplicate(&self) -> DuplicatePolicy {
        DuplicatePolicy::Reject
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Fifo;

impl OrderingStrategy for Fifo {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn table_prefix(&self) -> &'static str {
        "queue"
    }

    fn head_order(&self) -> HeadOrder {
        HeadOrder::Ascending
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Filo;

impl OrderingStrategy for Filo {
    fn name(&self) -> &'static str {
        "filo"
    }

    fn table_prefix(&self) -> &'static str {
        "filo_queue"
    }

    fn head_order(&self) -> HeadOrder {
        HeadOrder::Descending
    }
}

/// FIFO that silently ignores payloads already present in the table.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniqueFifo;

impl OrderingStrategy for UniqueFifo {
    fn name(&self) -> &'static str {
        "unique"
    }

    fn table_prefix(&self) -> &'static str {
        "unique_queue"
    }

    fn head_order(&self) -> HeadOrder {
        HeadOrder::Ascending
    }

    fn unique_payload(&self) -> bool {
        true
    }

    fn on_duplicate(&self) -> DuplicatePolicy {
        DuplicatePolicy::Ignore
    }
}

/// Built-in strategies, selectable from config and the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    #[default]
    Fifo,
    Filo,
    Unique,
}

impl QueueKind {
    pub fn strategy(self) -> Box<dyn OrderingStrategy> {
        match self {
            QueueKind::Fifo => Box::new(Fifo),
            QueueKind::Filo => Box::new(Filo),
            QueueKind::Unique => Box::new(UniqueFifo),
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueKind::Fifo => "fifo",
            QueueKind::Filo => "filo",
            QueueKind::Unique => "unique",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for QueueKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(QueueKind::Fifo),
            "filo" | "lifo" => Ok(QueueKind::Filo),
            "unique" | "unique_fifo" => Ok(QueueKind::Unique),
            _ => Err(Error::InvalidArgument(format!("unknown queue kind: {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unique_variant_ignores_duplicates() {
        assert_eq!(Fifo.on_duplicate(), DuplicatePolicy::Reject);
        assert_eq!(Filo.on_duplicate(), DuplicatePolicy::Reject);
        assert_eq!(UniqueFifo.on_duplicate(), DuplicatePolicy::Ignore);
        assert!(UniqueFifo.unique_payload());
        assert!(!Fifo.unique_payload());
    }

    #[test]
    fn kind_parses_and_displays() {
        for kind in [QueueKind::Fifo, QueueKind::Filo, QueueKind::Unique] {
            let parsed: QueueKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
            assert_eq!(kind.strategy().name(), kind.to_string());
        }
        assert!("priority".parse::<QueueKind>().is_err());
    }

    #[test]
    fn filo_selects_descending() {
        assert_eq!(Filo.head_order().as_sql(), "DESC");
        assert_eq!(Fifo.head_order().as_sql(), "ASC");
    }
}
