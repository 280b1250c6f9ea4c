//! Row types for the three tables.

use anyhow::Result;
use chrono::{DateTime, Utc};
use epx_schemas::time::jd_from_utc;
use epx_schemas::{QueryStatus, UserType};
use serde::Serialize;

/// A persisted upstream event version.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Event {
    pub id: i64,
    pub name: String,
    pub ra: f64,
    pub dec: f64,
    /// Positional error radius, degrees.
    pub pos_err: f64,
    pub obs_start: DateTime<Utc>,
    /// Exposure duration, seconds.
    pub exp_time: Option<f64>,
    pub flux: Option<f64>,
    pub src_id: Option<i64>,
    pub src_significance: Option<f64>,
    pub bkg_counts: Option<f64>,
    pub net_counts: Option<f64>,
    pub net_rate: Option<f64>,
    pub version: String,
    pub query_status: String,
    pub last_queried: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn status(&self) -> Result<QueryStatus> {
        QueryStatus::from_db_value(&self.query_status)
    }

    /// Julian Date of the observation start; the reference time every
    /// delta_t is computed against.
    pub fn jd_obs_start(&self) -> f64 {
        jd_from_utc(self.obs_start)
    }
}

/// An event as validated from the upstream feed, before it has an id.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub name: String,
    pub ra: f64,
    pub dec: f64,
    pub pos_err: f64,
    pub obs_start: DateTime<Utc>,
    pub exp_time: Option<f64>,
    pub flux: Option<f64>,
    pub src_id: Option<i64>,
    pub src_significance: Option<f64>,
    pub bkg_counts: Option<f64>,
    pub net_counts: Option<f64>,
    pub net_rate: Option<f64>,
    pub version: String,
}

/// A persisted cross-match between an event and one remote alert.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Xmatch {
    pub id: i64,
    pub event_id: i64,
    pub candid: i64,
    pub object_id: String,
    pub jd: f64,
    pub ra: f64,
    pub dec: f64,
    pub fid: Option<i32>,
    pub magpsf: Option<f64>,
    pub sigmapsf: Option<f64>,
    pub drb: Option<f64>,
    /// jd_alert − jd_event, Julian days.
    pub delta_t: f64,
    pub distance_arcmin: f64,
    /// distance_arcmin over the error radius in arcminutes.
    pub distance_ratio: f64,
    pub ndethist: Option<i32>,
    pub sgscore: Option<f64>,
    pub distpsnr: Option<f64>,
    pub ssdistnr: Option<f64>,
    pub ssmagnr: Option<f64>,
    /// jd_alert − jd of the object's first detection.
    pub age: Option<f64>,
    pub archival: bool,
    pub to_broker: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cross-match row as computed by the matcher, before it has an id.
#[derive(Debug, Clone)]
pub struct NewXmatch {
    pub event_id: i64,
    pub candid: i64,
    pub object_id: String,
    pub jd: f64,
    pub ra: f64,
    pub dec: f64,
    pub fid: Option<i32>,
    pub magpsf: Option<f64>,
    pub sigmapsf: Option<f64>,
    pub drb: Option<f64>,
    pub delta_t: f64,
    pub distance_arcmin: f64,
    pub distance_ratio: f64,
    pub ndethist: Option<i32>,
    pub sgscore: Option<f64>,
    pub distpsnr: Option<f64>,
    pub ssdistnr: Option<f64>,
    pub ssmagnr: Option<f64>,
    pub age: Option<f64>,
    pub archival: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub email: String,
    #[sqlx(rename = "type")]
    pub user_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> Result<UserType> {
        UserType::parse(&self.user_type)
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub email: String,
    pub user_type: UserType,
}
