//! Read-side visibility rules, expressed as store filters.
//!
//! The read front-end is a separate service; these helpers pin down which
//! filter combination each user role is entitled to, so the rules live next
//! to the columns that implement them.

use epx_schemas::UserType;

use crate::events::{EventFilter, HasMatches};
use crate::xmatches::XmatchFilter;

/// Minutes of delta-t window expressed in Julian days.
fn minutes_to_jd(minutes: f64) -> f64 {
    minutes / (60.0 * 24.0)
}

/// Cross-match visibility for a user role. Non-admin roles see only
/// non-archival rows within the configured |delta_t| window, on the latest
/// event version per name.
pub fn xmatch_visibility(role: UserType, dt_nonadmin_minutes: f64) -> XmatchFilter {
    match role {
        UserType::Caltech => XmatchFilter::default(),
        UserType::External | UserType::Partner => {
            let dt = minutes_to_jd(dt_nonadmin_minutes);
            XmatchFilter {
                archival: Some(false),
                min_delta_t: Some(-dt),
                max_delta_t: Some(dt),
                deduplicate_by_event_name: true,
                ..Default::default()
            }
        }
    }
}

/// Event visibility for a user role. Non-admin roles see only the latest
/// version of events that have at least one qualifying match.
pub fn event_visibility(role: UserType, dt_nonadmin_minutes: f64) -> EventFilter {
    match role {
        UserType::Caltech => EventFilter::default(),
        UserType::External | UserType::Partner => EventFilter {
            latest_only: true,
            has_matches: Some(HasMatches {
                ignore_archival: true,
                max_delta_t: Some(minutes_to_jd(dt_nonadmin_minutes)),
            }),
            ..Default::default()
        },
    }
}
