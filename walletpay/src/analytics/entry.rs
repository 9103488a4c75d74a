//! Persisted analytics rows.

/// Delivery state of a row. Stored as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Scheduled, never claimed.
    New,
    /// Claimed by a delivery run, not yet handed to a handler.
    DeliveryPending,
    /// Handed to a handler, waiting for its verdict.
    DeliveryInProgress,
    /// Last delivery failed; eligible for the next claim.
    DeliveryFailed,
}

impl EntryState {
    /// Returns the stored integer.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        match self {
            Self::New => 0,
            Self::DeliveryPending => 1,
            Self::DeliveryInProgress => 2,
            Self::DeliveryFailed => 3,
        }
    }

    /// Parses a stored integer.
    #[must_use]
    pub const fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::New),
            1 => Some(Self::DeliveryPending),
            2 => Some(Self::DeliveryInProgress),
            3 => Some(Self::DeliveryFailed),
            _ => None,
        }
    }
}

/// One row of the analytics table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticEntry {
    /// Row id assigned by the store.
    pub id: i64,
    /// Deliverable type; selects the handler.
    pub entry_type: String,
    /// Opaque payload.
    pub content: String,
    /// Delivery state.
    pub state: EntryState,
    /// Optional caller metadata.
    pub metadata: Option<String>,
    /// Claim id of the run holding this row.
    pub process_id: Option<String>,
    /// SDK version that scheduled the row.
    pub version: String,
}
