//! Event version tags.
//!
//! Versions arrive as `v<integer>`. They are stored verbatim for round-trip
//! fidelity but always ordered by the integer part; a textual MAX would put
//! `v9` above `v10`.

use anyhow::{anyhow, Context, Result};

/// Parse a `v<n>` tag, rejecting anything else.
pub fn parse_version_tag(tag: &str) -> Result<u64> {
    let digits = tag
        .strip_prefix('v')
        .ok_or_else(|| anyhow!("version '{tag}' does not start with 'v'"))?;
    if digits.is_empty() || digits.starts_with('+') {
        return Err(anyhow!("version '{tag}' has no integer part"));
    }
    digits
        .parse::<u64>()
        .with_context(|| format!("version '{tag}' is not v<integer>"))
}

/// Ordering key for a version tag, if well-formed.
pub fn version_ordinal(tag: &str) -> Option<u64> {
    parse_version_tag(tag).ok()
}
