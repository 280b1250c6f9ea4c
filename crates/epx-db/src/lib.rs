//! epx-db
//!
//! Single-node transactional store shared by the three workers. Raw SQL over
//! sqlx/Postgres; every multi-row mutation commits atomically or aborts.
//! Readers tolerate a slightly stale snapshot, so plain reads run outside
//! transactions.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};

mod events;
mod models;
mod reprocess;
mod visibility;
mod xmatches;

pub use events::{
    fetch_event, fetch_event_by_id, fetch_events, insert_events, update_event_status,
    DuplicatePolicy, EventFilter, EventOrder, HasMatches, InsertEventsSummary,
};
pub use models::{Event, NewEvent, NewUser, NewXmatch, User, Xmatch};
pub use reprocess::{reprocess_all, reprocess_event, ReprocessSummary};
pub use visibility::{event_visibility, xmatch_visibility};
pub use xmatches::{
    delete_xmatches_for_event, fetch_xmatches, insert_xmatches, mark_xmatch_shipped,
    shipped_later_exists, store_archival_matches, store_prompt_matches, XmatchFilter,
};

pub const ENV_DB_URL: &str = "EPX_DATABASE_URL";

/// Advisory lock shared by the matcher's per-event write transactions and
/// the admin reprocess action, so a bulk xmatch wipe never interleaves with
/// a matcher commit.
const MATCHER_LOCK_KEY: i64 = 0x4550_5826_4d41;

/// Paging for list queries. Page numbers start at 1.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub number: i64,
    pub per_page: i64,
}

impl Page {
    pub fn offset(&self) -> i64 {
        (self.number.max(1) - 1) * self.per_page
    }
}

/// Connect to Postgres using EPX_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Test helper used by integration tests:
/// - Connect using EPX_DATABASE_URL
/// - Ensure migrations are applied
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='events'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_events_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_events_table: bool,
}

/// Serialize against the admin reprocess action for the lifetime of the
/// surrounding transaction.
pub(crate) async fn take_matcher_lock(conn: &mut PgConnection) -> Result<()> {
    sqlx::query("select pg_advisory_xact_lock($1)")
        .bind(MATCHER_LOCK_KEY)
        .execute(conn)
        .await
        .context("failed to take matcher advisory lock")?;
    Ok(())
}

/// Insert a user row (bootstrap/tests; the pipeline itself never writes users).
pub async fn insert_user(pool: &PgPool, user: &NewUser) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into users (username, password, email, type)
        values ($1, $2, $3, $4)
        returning id
        "#,
    )
    .bind(&user.username)
    .bind(&user.password)
    .bind(&user.email)
    .bind(user.user_type.as_str())
    .fetch_one(pool)
    .await
    .context("insert user failed")?;
    Ok(id)
}

/// Look up a user by username.
pub async fn fetch_user(pool: &PgPool, username: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("select * from users where username = $1")
        .bind(username)
        .fetch_optional(pool)
        .await
        .context("fetch user failed")?;
    Ok(user)
}
