use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Delivery state of a queue entry.
///
/// `Pending -> InFlight -> Delivered`, or `InFlight -> AwaitingRetry ->
/// InFlight -> ...` until the attempt ceiling, then `Abandoned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    InFlight,
    Delivered,
    AwaitingRetry,
    Abandoned,
}

impl DeliveryState {
    pub const ALL: [DeliveryState; 5] = [
        DeliveryState::Pending,
        DeliveryState::InFlight,
        DeliveryState::AwaitingRetry,
        DeliveryState::Delivered,
        DeliveryState::Abandoned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Pending => "pending",
            DeliveryState::InFlight => "in_flight",
            DeliveryState::Delivered => "delivered",
            DeliveryState::AwaitingRetry => "awaiting_retry",
            DeliveryState::Abandoned => "abandoned",
        }
    }

    /// No further attempts are made from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Delivered | DeliveryState::Abandoned)
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown delivery state '{}'", s))
    }
}
