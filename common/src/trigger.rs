//! Persisted one-shot trigger flags.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of delayed trigger. One persisted record exists per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// End-of-day correction recalculation requested by the card-network feed.
    CardNetworkRecalculation,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::CardNetworkRecalculation => "card_network_recalculation",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of a trigger. `active` is true from arming until the
/// fired callback has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedTrigger {
    pub kind: TriggerKind,
    pub active: bool,
}

impl DelayedTrigger {
    pub fn idle(kind: TriggerKind) -> Self {
        Self { kind, active: false }
    }
}
