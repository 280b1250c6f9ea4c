//! epx entry point.
//!
//! One binary, one subcommand per worker, so deployments can run the
//! ingester, matcher, and forwarder as separate processes against the same
//! store. `db` and `reprocess` cover operations.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use epx_broker::SkyPortalClient;
use epx_catalog::KowalskiClient;
use epx_config::{ForwarderSettings, IngesterSettings, MatcherSettings};
use epx_forward::{Forwarder, ForwarderConfig};
use epx_ingest::Ingester;
use epx_match::{MatchConfig, Matcher};
use epx_upstream::EpClient;

#[derive(Parser)]
#[command(name = "epx")]
#[command(about = "Transient-event / alert-catalog cross-match pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Run the upstream event poller
    Ingester,

    /// Run the cross-match worker
    Matcher,

    /// Run the downstream shipping worker
    Forwarder,

    /// Flag events for reprocessing
    Reprocess {
        #[command(subcommand)]
        cmd: ReprocessCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[derive(Subcommand)]
enum ReprocessCmd {
    /// Clear every cross-match and flag every event. Destructive.
    All {
        /// Required confirmation.
        #[arg(long)]
        yes: bool,
    },
    /// Reprocess a single event.
    Event {
        #[arg(long)]
        id: i64,

        /// Keep the event's archival rows.
        #[arg(long)]
        keep_archival: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = epx_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = epx_db::status(&pool).await?;
                    println!("db_ok={} has_events_table={}", s.ok, s.has_events_table);
                }
                DbCmd::Migrate => {
                    epx_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Ingester => {
            let settings = IngesterSettings::from_env()?;
            let pool = connected_pool().await?;
            let provider = EpClient::new_with_base_url(
                settings.ep_email,
                settings.ep_password,
                settings.ep_base_url,
            )?;
            let ingester = Ingester::new(pool, Box::new(provider), settings.poll_interval_secs);
            ingester.run(shutdown_token()).await;
        }

        Commands::Matcher => {
            let settings = MatcherSettings::from_env()?;
            let pool = connected_pool().await?;
            let catalog = KowalskiClient::new(
                settings.kowalski_base_url.clone(),
                settings.kowalski_token.clone(),
                settings.kowalski_timeout_secs,
            )?;
            let matcher = Matcher::new(
                pool,
                Arc::new(catalog),
                MatchConfig {
                    radius_multiplier: settings.radius_multiplier,
                    delta_t: settings.delta_t,
                    delta_t_archival: settings.delta_t_archival,
                },
                settings.match_interval_secs,
            );
            matcher.run(shutdown_token()).await;
        }

        Commands::Forwarder => {
            let settings = ForwarderSettings::from_env()?;
            let pool = connected_pool().await?;
            let broker = SkyPortalClient::connect(
                settings.fritz_host.clone(),
                settings.fritz_token.clone(),
                settings.fritz_filter_id,
            )
            .await
            .context("broker bootstrap failed")?;
            let forwarder = Forwarder::new(
                pool,
                broker,
                settings.fritz_import_group_id,
                ForwarderConfig {
                    max_event_age_days: settings.max_event_age_days,
                    interval_secs: settings.forward_interval_secs,
                },
            );
            forwarder.run(shutdown_token()).await;
        }

        Commands::Reprocess { cmd } => {
            let pool = connected_pool().await?;
            match cmd {
                ReprocessCmd::All { yes } => {
                    if !yes {
                        bail!("reprocess all clears every cross-match; re-run with --yes");
                    }
                    let summary = epx_db::reprocess_all(&pool).await?;
                    println!(
                        "events_flagged={} xmatches_deleted={}",
                        summary.events_flagged, summary.xmatches_deleted
                    );
                }
                ReprocessCmd::Event { id, keep_archival } => {
                    let deleted = epx_db::reprocess_event(&pool, id, keep_archival).await?;
                    println!("event_id={id} xmatches_deleted={deleted}");
                }
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Connect and require the schema to be present; workers do not create it.
async fn connected_pool() -> Result<sqlx::PgPool> {
    let pool = epx_db::connect_from_env().await?;
    let status = epx_db::status(&pool).await?;
    if !status.has_events_table {
        bail!("database schema is missing; run `epx db migrate` first");
    }
    Ok(pool)
}

/// Token tripped by ctrl-c; workers finish the unit in hand, then exit.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trip = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            trip.cancel();
        }
    });
    token
}
