//! Event lifecycle states.
//!
//! The matcher is the only writer of these values, except for the admin
//! reprocess action which flips terminal states back to `reprocess`.
//! Failure states carry the reason inline (`failed: <reason>`) so the
//! column stays a single TEXT value.

use anyhow::{anyhow, Result};

/// Where an event sits in the query state machine.
///
/// Transitions: `pending → processing → done | failed`, and
/// `done | failed → reprocess → done | failed` (admin-triggered).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStatus {
    Pending,
    Processing,
    Done,
    Reprocess,
    Failed(String),
}

impl QueryStatus {
    /// Text stored in the `query_status` column.
    pub fn as_db_value(&self) -> String {
        match self {
            QueryStatus::Pending => "pending".to_string(),
            QueryStatus::Processing => "processing".to_string(),
            QueryStatus::Done => "done".to_string(),
            QueryStatus::Reprocess => "reprocess".to_string(),
            QueryStatus::Failed(reason) => format!("failed: {reason}"),
        }
    }

    /// Parse a stored `query_status` value.
    pub fn from_db_value(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(QueryStatus::Pending),
            "processing" => Ok(QueryStatus::Processing),
            "done" => Ok(QueryStatus::Done),
            "reprocess" => Ok(QueryStatus::Reprocess),
            other => match other.strip_prefix("failed:") {
                Some(reason) => Ok(QueryStatus::Failed(reason.trim_start().to_string())),
                None => Err(anyhow!("unknown query_status '{other}'")),
            },
        }
    }

    /// Terminal for the matcher: nothing left to do this cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryStatus::Done | QueryStatus::Failed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, QueryStatus::Failed(_))
    }
}
