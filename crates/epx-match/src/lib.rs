//! epx-match
//!
//! The cross-match core: sphere geometry, local post-filters, per-event
//! query planning, and the cycle driver that walks events through the
//! query state machine.

pub mod driver;
pub mod filters;
pub mod geometry;
pub mod plan;

pub use driver::{CycleStats, Matcher};
pub use filters::{is_red_star, reject_red_stars};
pub use geometry::{great_circle_distance_arcmin, great_circle_distance_deg};
pub use plan::{archival_spec, build_xmatch, event_label, prompt_spec, MatchConfig};
