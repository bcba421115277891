//! Usage-reporting queries over `usage_daily`.

use crate::error::Result;
use chrono::NaiveDate;
use dpack_types::{ MicroUnits, TenantId };
use sqlx::SqlitePool;

/// One day's aggregate usage for a tenant.
#[ derive( Debug, Clone, PartialEq, Eq ) ]
pub struct DailyUsage
{
  /// Calendar date (UTC) the aggregate covers.
  pub date: NaiveDate,
  /// Total settled amount for runs completed that day.
  pub settled: MicroUnits,
  /// Number of runs settled that day.
  pub run_count: i64,
}

/// Repository over `usage_daily`.
#[ derive( Debug, Clone ) ]
pub struct UsageRepo
{
  pool: SqlitePool,
}

impl UsageRepo
{
  /// Wrap an existing pool.
  #[ must_use ]
  pub fn new( pool: SqlitePool ) -> Self
  {
    Self { pool }
  }

  /// Daily usage rows for `tenant_id` within `[from, to]` inclusive,
  /// ordered oldest first.
  pub async fn range( &self, tenant_id: TenantId, from: NaiveDate, to: NaiveDate ) -> Result< Vec< DailyUsage > >
  {
    let rows: Vec< ( String, i64, i64 ) > = sqlx::query_as(
      "SELECT usage_date, settled_micros, run_count FROM usage_daily
       WHERE tenant_id = ? AND usage_date >= ? AND usage_date <= ?
       ORDER BY usage_date ASC"
    )
    .bind( tenant_id.to_prefixed_string() )
    .bind( from.to_string() )
    .bind( to.to_string() )
    .fetch_all( &self.pool )
    .await?;

    Ok(
      rows
        .into_iter()
        .filter_map( | ( date, settled, count ) |
        {
          date.parse().ok().map( | date | DailyUsage { date, settled: MicroUnits::from_micros( settled ), run_count: count } )
        } )
        .collect()
    )
  }

  /// Sum of settled amounts for `tenant_id` within `[from, to]` inclusive —
  /// the `settled_this_period` term of the admission balance equation.
  pub async fn settled_total( &self, tenant_id: TenantId, from: NaiveDate, to: NaiveDate ) -> Result< MicroUnits >
  {
    let row: ( Option< i64 >, ) = sqlx::query_as(
      "SELECT SUM( settled_micros ) FROM usage_daily WHERE tenant_id = ? AND usage_date >= ? AND usage_date <= ?"
    )
    .bind( tenant_id.to_prefixed_string() )
    .bind( from.to_string() )
    .bind( to.to_string() )
    .fetch_one( &self.pool )
    .await?;

    Ok( MicroUnits::from_micros( row.0.unwrap_or( 0 ) ) )
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::runs::RunRepo;
  use crate::storage::connect;
  use crate::tenants::TenantRepo;
  use chrono::Duration as ChronoDuration;
  use dpack_types::{ PlanTier, RunId, RunStatus, SettlementOutcome, TraceId };

  #[ tokio::test ]
  async fn settled_total_reflects_committed_runs()
  {
    let pool = connect( "sqlite::memory:", 1 ).await.unwrap();
    let tenants = TenantRepo::new( pool.clone() );
    let runs = RunRepo::new( pool.clone() );
    let usage = UsageRepo::new( pool );

    let tenant = tenants
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();

    let run = runs
      .insert_queued(
        RunId::new(), tenant.id, "K1", "fp", "decision", TraceId::new(),
        MicroUnits::from_micros( 100_000 ), MicroUnits::from_micros( 10_000 ), ChronoDuration::days( 30 ),
      )
      .await
      .unwrap();
    let leased = runs.acquire_lease( run.id, ChronoDuration::minutes( 2 ) ).await.unwrap();
    let ( claimed, token ) = runs.finalize_claim( run.id, leased.lease_token.unwrap(), leased.version ).await.unwrap();
    assert_eq!( claimed.status, RunStatus::Claimed );
    runs
      .finalize_commit( run.id, token, MicroUnits::from_micros( 87_000 ), "b", "k", "fp", SettlementOutcome::WorkerCommitted )
      .await
      .unwrap();

    let today = chrono::Utc::now().date_naive();
    let total = usage.settled_total( tenant.id, today, today ).await.unwrap();
    assert_eq!( total, MicroUnits::from_micros( 87_000 ) );
  }
}
