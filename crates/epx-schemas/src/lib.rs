//! epx-schemas
//!
//! Shared vocabulary of the cross-match pipeline: event lifecycle states,
//! user roles, version-tag ordering, Julian-Date conversions, and the
//! upstream column allow-list. No I/O and no database types live here;
//! row structs belong to epx-db, wire payloads to the adapter crates.

pub mod status;
pub mod time;
pub mod version;

pub use status::QueryStatus;
pub use version::{parse_version_tag, version_ordinal};

use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Columns every upstream candidate record must carry. A record missing any
/// of these aborts the whole ingest batch (no partial ingest).
pub const ALLOWED_EVENT_COLUMNS: [&str; 13] = [
    "name",
    "ra",
    "dec",
    "pos_err",
    "obs_start",
    "exp_time",
    "flux",
    "src_id",
    "src_significance",
    "bkg_counts",
    "net_counts",
    "net_rate",
    "version",
];

/// Reader roles consulted by the HTTP front-end. The pipeline only writes
/// the columns these roles filter on; it never interprets them itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    External,
    Partner,
    Caltech,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::External => "external",
            UserType::Partner => "partner",
            UserType::Caltech => "caltech",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "external" => Ok(UserType::External),
            "partner" => Ok(UserType::Partner),
            "caltech" => Ok(UserType::Caltech),
            other => Err(anyhow!(
                "unknown user type '{}'. expected one of: external | partner | caltech",
                other
            )),
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
