//! The `runs` repository: CAS-guarded lifecycle transitions.
//!
//! Every mutating method here either affects exactly one row guarded by an
//! explicit `WHERE` clause naming the expected version (and any other
//! expected columns — lease token, status, finalize stage) or it affects
//! zero rows, in which case the caller receives [`LedgerError::CasConflict`]
//! and must treat it as a retriable loss of the race, never as a hard
//! failure.

use crate::error::{ classify_insert_error, LedgerError, Result };
use chrono::{ DateTime, Duration, Utc };
use dpack_types::{ FinalizeStage, FinalizeToken, LeaseToken, MicroUnits, Run, RunStatus, RunId, SettlementOutcome, TenantId, TraceId };
use sqlx::SqlitePool;

/// Raw column shape of a `runs` row. `sqlx`'s tuple `FromRow` impls stop
/// well short of this table's width, so every query selecting a full row
/// maps through this struct rather than a positional tuple.
#[ derive( Debug, sqlx::FromRow ) ]
struct RunRow
{
  id: String,
  tenant_id: String,
  idempotency_key: String,
  payload_fingerprint: String,
  status: String,
  finalize_stage: String,
  version: i64,
  reservation_micros: i64,
  actual_cost_micros: Option< i64 >,
  minimum_fee_micros: i64,
  lease_token: Option< String >,
  lease_expires_at: Option< String >,
  finalize_token: Option< String >,
  result_bucket: Option< String >,
  result_key: Option< String >,
  result_fingerprint: Option< String >,
  trace_id: String,
  pack_type: String,
  failure_reason: Option< String >,
  created_at: String,
  started_at: Option< String >,
  completed_at: Option< String >,
  retention_expires_at: String,
}

fn row_to_run( row: RunRow ) -> Result< Run >
{
  Ok( Run
  {
    id: RunId::parse( &row.id ).map_err( | _ | LedgerError::NotFound )?,
    tenant_id: TenantId::parse( &row.tenant_id ).map_err( | _ | LedgerError::NotFound )?,
    idempotency_key: row.idempotency_key,
    payload_fingerprint: row.payload_fingerprint,
    status: RunStatus::from_column( &row.status ).ok_or( LedgerError::NotFound )?,
    finalize_stage: FinalizeStage::from_column( &row.finalize_stage ).ok_or( LedgerError::NotFound )?,
    version: row.version,
    reservation: MicroUnits::from_micros( row.reservation_micros ),
    actual_cost: row.actual_cost_micros.map( MicroUnits::from_micros ),
    minimum_fee: MicroUnits::from_micros( row.minimum_fee_micros ),
    lease_token: row.lease_token.and_then( | t | LeaseToken::parse( &t ).ok() ),
    lease_expires_at: row.lease_expires_at.and_then( | t | t.parse().ok() ),
    finalize_token: row.finalize_token.and_then( | t | FinalizeToken::parse( &t ).ok() ),
    result_bucket: row.result_bucket,
    result_key: row.result_key,
    result_fingerprint: row.result_fingerprint,
    trace_id: TraceId::parse( &row.trace_id ).map_err( | _ | LedgerError::NotFound )?,
    pack_type: row.pack_type,
    failure_reason: row.failure_reason,
    created_at: row.created_at.parse().map_err( | _ | LedgerError::NotFound )?,
    started_at: row.started_at.and_then( | t | t.parse().ok() ),
    completed_at: row.completed_at.and_then( | t | t.parse().ok() ),
    retention_expires_at: row.retention_expires_at.parse().map_err( | _ | LedgerError::NotFound )?,
  } )
}

const RUN_COLUMNS: &str = "id, tenant_id, idempotency_key, payload_fingerprint, status, finalize_stage, version, \
  reservation_micros, actual_cost_micros, minimum_fee_micros, lease_token, lease_expires_at, finalize_token, \
  result_bucket, result_key, result_fingerprint, trace_id, pack_type, failure_reason, created_at, started_at, \
  completed_at, retention_expires_at";

/// Repository for the `runs` table.
#[ derive( Debug, Clone ) ]
pub struct RunRepo
{
  pool: SqlitePool,
}

impl RunRepo
{
  /// Wrap an existing pool.
  #[ must_use ]
  pub fn new( pool: SqlitePool ) -> Self
  {
    Self { pool }
  }

  /// Fetch a run by identifier.
  pub async fn get( &self, run_id: RunId ) -> Result< Run >
  {
    let row: Option< RunRow > = sqlx::query_as( &format!( "SELECT {RUN_COLUMNS} FROM runs WHERE id = ?" ) )
      .bind( run_id.to_prefixed_string() )
      .fetch_optional( &self.pool )
      .await?;

    row_to_run( row.ok_or( LedgerError::NotFound )? )
  }

  /// Look up the existing row for a `(tenant_id, idempotency_key)` pair,
  /// used to resolve the idempotency-replay decision after an insert
  /// conflict.
  pub async fn find_by_idempotency_key( &self, tenant_id: TenantId, idempotency_key: &str ) -> Result< Run >
  {
    let row: Option< RunRow > = sqlx::query_as(
      &format!( "SELECT {RUN_COLUMNS} FROM runs WHERE tenant_id = ? AND idempotency_key = ?" )
    )
    .bind( tenant_id.to_prefixed_string() )
    .bind( idempotency_key )
    .fetch_optional( &self.pool )
    .await?;

    row_to_run( row.ok_or( LedgerError::NotFound )? )
  }

  /// Insert a new run in `QUEUED` / `finalize_stage=NONE`. On a unique-key
  /// conflict, the caller is expected to have already decided (by
  /// comparing `payload_fingerprint`) whether this is a replay; this
  /// method only performs the insert and classifies the raw conflict.
  ///
  /// `run_id` is minted by the caller rather than here, so the identifier
  /// is available to reserve against in KV before the ledger row exists —
  /// the admission pipeline writes the reservation ahead of the insert.
  #[ allow( clippy::too_many_arguments ) ]
  pub async fn insert_queued(
    &self,
    run_id: RunId,
    tenant_id: TenantId,
    idempotency_key: &str,
    payload_fingerprint: &str,
    pack_type: &str,
    trace_id: TraceId,
    reservation: MicroUnits,
    minimum_fee: MicroUnits,
    retention: Duration,
  ) -> Result< Run >
  {
    let now = Utc::now();
    let run = Run
    {
      id: run_id,
      tenant_id,
      idempotency_key: idempotency_key.to_string(),
      payload_fingerprint: payload_fingerprint.to_string(),
      status: RunStatus::Queued,
      finalize_stage: FinalizeStage::None,
      version: 0,
      reservation,
      actual_cost: None,
      minimum_fee,
      lease_token: None,
      lease_expires_at: None,
      finalize_token: None,
      result_bucket: None,
      result_key: None,
      result_fingerprint: None,
      trace_id,
      pack_type: pack_type.to_string(),
      failure_reason: None,
      created_at: now,
      started_at: None,
      completed_at: None,
      retention_expires_at: now + retention,
    };

    sqlx::query(
      "INSERT INTO runs
      ( id, tenant_id, idempotency_key, payload_fingerprint, status, finalize_stage, version,
        reservation_micros, actual_cost_micros, minimum_fee_micros, trace_id, pack_type,
        created_at, retention_expires_at )
      VALUES ( ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?, ?, ? )"
    )
    .bind( run.id.to_prefixed_string() )
    .bind( run.tenant_id.to_prefixed_string() )
    .bind( &run.idempotency_key )
    .bind( &run.payload_fingerprint )
    .bind( run.status.as_column_str() )
    .bind( run.finalize_stage.as_column_str() )
    .bind( run.version )
    .bind( run.reservation.as_micros() )
    .bind( run.minimum_fee.as_micros() )
    .bind( run.trace_id.to_prefixed_string() )
    .bind( &run.pack_type )
    .bind( run.created_at.to_rfc3339() )
    .bind( run.retention_expires_at.to_rfc3339() )
    .execute( &self.pool )
    .await
    .map_err( classify_insert_error )?;

    Ok( run )
  }

  /// Lease acquisition: compare-and-swap `QUEUED` → `PROCESSING`, minting a
  /// fresh lease token and expiry. Fails with [`LedgerError::CasConflict`]
  /// if another worker already claimed the run or it is no longer queued.
  pub async fn acquire_lease( &self, run_id: RunId, lease_window: Duration ) -> Result< Run >
  {
    let lease_token = LeaseToken::new();
    let lease_expires_at = Utc::now() + lease_window;
    let started_at = Utc::now();

    let result = sqlx::query(
      "UPDATE runs SET status = ?, lease_token = ?, lease_expires_at = ?, started_at = ?, version = version + 1
       WHERE id = ? AND status = ?"
    )
    .bind( RunStatus::Processing.as_column_str() )
    .bind( lease_token.to_prefixed_string() )
    .bind( lease_expires_at.to_rfc3339() )
    .bind( started_at.to_rfc3339() )
    .bind( run_id.to_prefixed_string() )
    .bind( RunStatus::Queued.as_column_str() )
    .execute( &self.pool )
    .await?;

    if result.rows_affected() == 0
    {
      return Err( LedgerError::CasConflict );
    }

    self.get( run_id ).await
  }

  /// Heartbeat extension: advance `lease_expires_at`, guarded on the
  /// caller's own lease token, version, and `status=PROCESSING`. Returns
  /// the new version on success so the caller can advance its local
  /// counter without a round-trip read.
  pub async fn extend_lease(
    &self,
    run_id: RunId,
    lease_token: LeaseToken,
    expected_version: i64,
    lease_window: Duration,
  ) -> Result< i64 >
  {
    let new_expiry = Utc::now() + lease_window;
    let new_version = expected_version + 1;

    let result = sqlx::query(
      "UPDATE runs SET lease_expires_at = ?, version = ?
       WHERE id = ? AND lease_token = ? AND version = ? AND status = ?"
    )
    .bind( new_expiry.to_rfc3339() )
    .bind( new_version )
    .bind( run_id.to_prefixed_string() )
    .bind( lease_token.to_prefixed_string() )
    .bind( expected_version )
    .bind( RunStatus::Processing.as_column_str() )
    .execute( &self.pool )
    .await?;

    if result.rows_affected() == 0
    {
      return Err( LedgerError::CasConflict );
    }

    Ok( new_version )
  }

  /// Phase 1 — CLAIM: compare-and-swap `finalize_stage` `NONE` → `CLAIMED`
  /// with a fresh finalize token, guarded on the lease still being held at
  /// the expected version and the run still `PROCESSING`.
  pub async fn finalize_claim(
    &self,
    run_id: RunId,
    lease_token: LeaseToken,
    expected_version: i64,
  ) -> Result< ( Run, FinalizeToken ) >
  {
    let finalize_token = FinalizeToken::new();
    let new_version = expected_version + 1;

    let result = sqlx::query(
      "UPDATE runs SET status = ?, finalize_stage = ?, finalize_token = ?, version = ?
       WHERE id = ? AND lease_token = ? AND version = ? AND status = ? AND finalize_stage = ?"
    )
    .bind( RunStatus::Claimed.as_column_str() )
    .bind( FinalizeStage::Claimed.as_column_str() )
    .bind( finalize_token.to_prefixed_string() )
    .bind( new_version )
    .bind( run_id.to_prefixed_string() )
    .bind( lease_token.to_prefixed_string() )
    .bind( expected_version )
    .bind( RunStatus::Processing.as_column_str() )
    .bind( FinalizeStage::None.as_column_str() )
    .execute( &self.pool )
    .await?;

    if result.rows_affected() == 0
    {
      return Err( LedgerError::CasConflict );
    }

    Ok( ( self.get( run_id ).await?, finalize_token ) )
  }

  /// Phase 3 — COMMIT: in one transaction, mark the run `COMPLETED` /
  /// `finalize_stage=COMMITTED` with its actual cost and result location,
  /// and write the settlement audit row. Guarded on the finalize token —
  /// the one-shot credential minted by [`Self::finalize_claim`].
  ///
  /// The settlement row's `run_id` primary key makes this idempotent: a
  /// retried commit (worker retry, or reaper roll-forward racing a late
  /// worker) that reaches the settlement insert a second time fails the
  /// unique constraint rather than double-counting the settlement, and the
  /// caller should treat that as already-committed rather than an error.
  #[ allow( clippy::too_many_arguments ) ]
  pub async fn finalize_commit(
    &self,
    run_id: RunId,
    finalize_token: FinalizeToken,
    actual_cost: MicroUnits,
    result_bucket: &str,
    result_key: &str,
    result_fingerprint: &str,
    outcome: SettlementOutcome,
  ) -> Result< Run >
  {
    let run = self.get( run_id ).await?;
    let settled_amount = dpack_cost::settlement_amount( actual_cost, run.minimum_fee );
    let completed_at = Utc::now();
    let new_version = run.version + 1;

    let mut tx = self.pool.begin().await?;

    let result = sqlx::query(
      "UPDATE runs SET status = ?, finalize_stage = ?, actual_cost_micros = ?, result_bucket = ?, result_key = ?,
        result_fingerprint = ?, completed_at = ?, version = ?
       WHERE id = ? AND finalize_token = ? AND finalize_stage = ?"
    )
    .bind( RunStatus::Completed.as_column_str() )
    .bind( FinalizeStage::Committed.as_column_str() )
    .bind( actual_cost.as_micros() )
    .bind( result_bucket )
    .bind( result_key )
    .bind( result_fingerprint )
    .bind( completed_at.to_rfc3339() )
    .bind( new_version )
    .bind( run_id.to_prefixed_string() )
    .bind( finalize_token.to_prefixed_string() )
    .bind( FinalizeStage::Claimed.as_column_str() )
    .execute( &mut *tx )
    .await?;

    if result.rows_affected() == 0
    {
      tx.rollback().await?;
      return Err( LedgerError::CasConflict );
    }

    let outcome_str = match outcome
    {
      SettlementOutcome::WorkerCommitted => "worker_committed",
      SettlementOutcome::ReaperRolledForward => "reaper_rolled_forward",
      SettlementOutcome::MinimumFeeOnly => "minimum_fee_only",
    };

    sqlx::query(
      "INSERT INTO settlements ( run_id, tenant_id, settled_amount_micros, released_reservation_micros, outcome, created_at )
       VALUES ( ?, ?, ?, ?, ?, ? )"
    )
    .bind( run_id.to_prefixed_string() )
    .bind( run.tenant_id.to_prefixed_string() )
    .bind( settled_amount.as_micros() )
    .bind( run.reservation.as_micros() )
    .bind( outcome_str )
    .bind( completed_at.to_rfc3339() )
    .execute( &mut *tx )
    .await
    .map_err( classify_insert_error )?;

    let usage_date = completed_at.format( "%Y-%m-%d" ).to_string();
    sqlx::query(
      "INSERT INTO usage_daily ( tenant_id, usage_date, settled_micros, run_count ) VALUES ( ?, ?, ?, 1 )
       ON CONFLICT( tenant_id, usage_date ) DO UPDATE SET
         settled_micros = settled_micros + excluded.settled_micros,
         run_count = run_count + 1"
    )
    .bind( run.tenant_id.to_prefixed_string() )
    .bind( &usage_date )
    .bind( settled_amount.as_micros() )
    .execute( &mut *tx )
    .await?;

    tx.commit().await?;

    self.get( run_id ).await
  }

  /// Mark a run `FAILED` with no settlement, guarded on the observed
  /// version. Reserved for admission-time rollback — a failure before any
  /// reservation was ever billable, so nothing is owed and the caller
  /// releases the KV reservation in full.
  pub async fn mark_failed( &self, run_id: RunId, expected_version: i64, reason: &str ) -> Result< Run >
  {
    let completed_at = Utc::now();
    let result = sqlx::query(
      "UPDATE runs SET status = ?, failure_reason = ?, completed_at = ?, version = version + 1
       WHERE id = ? AND version = ? AND status != ?"
    )
    .bind( RunStatus::Failed.as_column_str() )
    .bind( reason )
    .bind( completed_at.to_rfc3339() )
    .bind( run_id.to_prefixed_string() )
    .bind( expected_version )
    .bind( RunStatus::Failed.as_column_str() )
    .execute( &self.pool )
    .await?;

    if result.rows_affected() == 0
    {
      return Err( LedgerError::CasConflict );
    }

    self.get( run_id ).await
  }

  /// Mark a run `FAILED` and settle it at the minimum fee, guarded on the
  /// observed version. Used by the reaper's lease-expiry sweep: the run
  /// never reached phase 1 of finalize, so there is no finalize token to
  /// guard on, but the pack may already have done billable work and the
  /// tenant owes at least the floor.
  pub async fn mark_failed_with_settlement( &self, run_id: RunId, expected_version: i64, reason: &str ) -> Result< Run >
  {
    let run = self.get( run_id ).await?;
    let settled_amount = dpack_cost::settlement_amount( MicroUnits::ZERO, run.minimum_fee );
    let completed_at = Utc::now();
    let new_version = run.version + 1;

    let mut tx = self.pool.begin().await?;

    let result = sqlx::query(
      "UPDATE runs SET status = ?, failure_reason = ?, completed_at = ?, version = ?
       WHERE id = ? AND version = ? AND status != ?"
    )
    .bind( RunStatus::Failed.as_column_str() )
    .bind( reason )
    .bind( completed_at.to_rfc3339() )
    .bind( new_version )
    .bind( run_id.to_prefixed_string() )
    .bind( expected_version )
    .bind( RunStatus::Failed.as_column_str() )
    .execute( &mut *tx )
    .await?;

    if result.rows_affected() == 0
    {
      tx.rollback().await?;
      return Err( LedgerError::CasConflict );
    }

    sqlx::query(
      "INSERT INTO settlements ( run_id, tenant_id, settled_amount_micros, released_reservation_micros, outcome, created_at )
       VALUES ( ?, ?, ?, ?, ?, ? )"
    )
    .bind( run_id.to_prefixed_string() )
    .bind( run.tenant_id.to_prefixed_string() )
    .bind( settled_amount.as_micros() )
    .bind( run.reservation.as_micros() )
    .bind( "minimum_fee_only" )
    .bind( completed_at.to_rfc3339() )
    .execute( &mut *tx )
    .await
    .map_err( classify_insert_error )?;

    let usage_date = completed_at.format( "%Y-%m-%d" ).to_string();
    sqlx::query(
      "INSERT INTO usage_daily ( tenant_id, usage_date, settled_micros, run_count ) VALUES ( ?, ?, ?, 1 )
       ON CONFLICT( tenant_id, usage_date ) DO UPDATE SET
         settled_micros = settled_micros + excluded.settled_micros,
         run_count = run_count + 1"
    )
    .bind( run.tenant_id.to_prefixed_string() )
    .bind( &usage_date )
    .bind( settled_amount.as_micros() )
    .execute( &mut *tx )
    .await?;

    tx.commit().await?;

    self.get( run_id ).await
  }

  /// Phase 3's failure counterpart — commits a pack-execution failure at
  /// the minimum fee, guarded on the finalize token minted by phase 1.
  /// Used by the worker when the pack itself fails after a successful
  /// claim, and by the reaper's reconcile loop when a `CLAIMED` run has
  /// no result object and no open reservation to roll back from.
  pub async fn fail_commit( &self, run_id: RunId, finalize_token: FinalizeToken, reason: &str ) -> Result< Run >
  {
    let run = self.get( run_id ).await?;
    let settled_amount = dpack_cost::settlement_amount( MicroUnits::ZERO, run.minimum_fee );
    let completed_at = Utc::now();
    let new_version = run.version + 1;

    let mut tx = self.pool.begin().await?;

    let result = sqlx::query(
      "UPDATE runs SET status = ?, finalize_stage = ?, failure_reason = ?, completed_at = ?, version = ?
       WHERE id = ? AND finalize_token = ? AND finalize_stage = ?"
    )
    .bind( RunStatus::Failed.as_column_str() )
    .bind( FinalizeStage::Committed.as_column_str() )
    .bind( reason )
    .bind( completed_at.to_rfc3339() )
    .bind( new_version )
    .bind( run_id.to_prefixed_string() )
    .bind( finalize_token.to_prefixed_string() )
    .bind( FinalizeStage::Claimed.as_column_str() )
    .execute( &mut *tx )
    .await?;

    if result.rows_affected() == 0
    {
      tx.rollback().await?;
      return Err( LedgerError::CasConflict );
    }

    sqlx::query(
      "INSERT INTO settlements ( run_id, tenant_id, settled_amount_micros, released_reservation_micros, outcome, created_at )
       VALUES ( ?, ?, ?, ?, ?, ? )"
    )
    .bind( run_id.to_prefixed_string() )
    .bind( run.tenant_id.to_prefixed_string() )
    .bind( settled_amount.as_micros() )
    .bind( run.reservation.as_micros() )
    .bind( "minimum_fee_only" )
    .bind( completed_at.to_rfc3339() )
    .execute( &mut *tx )
    .await
    .map_err( classify_insert_error )?;

    let usage_date = completed_at.format( "%Y-%m-%d" ).to_string();
    sqlx::query(
      "INSERT INTO usage_daily ( tenant_id, usage_date, settled_micros, run_count ) VALUES ( ?, ?, ?, 1 )
       ON CONFLICT( tenant_id, usage_date ) DO UPDATE SET
         settled_micros = settled_micros + excluded.settled_micros,
         run_count = run_count + 1"
    )
    .bind( run.tenant_id.to_prefixed_string() )
    .bind( &usage_date )
    .bind( settled_amount.as_micros() )
    .execute( &mut *tx )
    .await?;

    tx.commit().await?;

    self.get( run_id ).await
  }

  /// Route an irreconcilable run to `AUDIT_REQUIRED`, guarded on the
  /// observed version.
  pub async fn mark_audit_required( &self, run_id: RunId, expected_version: i64, reason: &str ) -> Result< Run >
  {
    let completed_at = Utc::now();
    let result = sqlx::query(
      "UPDATE runs SET status = ?, failure_reason = ?, completed_at = ?, version = version + 1
       WHERE id = ? AND version = ?"
    )
    .bind( RunStatus::AuditRequired.as_column_str() )
    .bind( reason )
    .bind( completed_at.to_rfc3339() )
    .bind( run_id.to_prefixed_string() )
    .bind( expected_version )
    .execute( &self.pool )
    .await?;

    if result.rows_affected() == 0
    {
      return Err( LedgerError::CasConflict );
    }

    self.get( run_id ).await
  }

  /// Rows with `status=PROCESSING` and an expired lease — input to the
  /// reaper's lease-expiry sweep.
  pub async fn find_expired_leases( &self, now: DateTime< Utc >, page_size: i64 ) -> Result< Vec< Run > >
  {
    let rows: Vec< RunRow > = sqlx::query_as(
      &format!( "SELECT {RUN_COLUMNS} FROM runs WHERE status = ? AND lease_expires_at < ? LIMIT ?" )
    )
    .bind( RunStatus::Processing.as_column_str() )
    .bind( now.to_rfc3339() )
    .bind( page_size )
    .fetch_all( &self.pool )
    .await?;

    rows.into_iter().map( row_to_run ).collect()
  }

  /// Rows stuck in `finalize_stage=CLAIMED` since before `older_than` —
  /// input to the reaper's reconcile loop.
  pub async fn find_stuck_claims( &self, older_than: DateTime< Utc >, page_size: i64 ) -> Result< Vec< Run > >
  {
    let rows: Vec< RunRow > = sqlx::query_as(
      &format!( "SELECT {RUN_COLUMNS} FROM runs WHERE finalize_stage = ? AND started_at < ? LIMIT ?" )
    )
    .bind( FinalizeStage::Claimed.as_column_str() )
    .bind( older_than.to_rfc3339() )
    .bind( page_size )
    .fetch_all( &self.pool )
    .await?;

    rows.into_iter().map( row_to_run ).collect()
  }
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use crate::storage::connect;
  use crate::tenants::TenantRepo;
  use dpack_types::PlanTier;

  async fn setup() -> ( RunRepo, TenantId )
  {
    let pool = connect( "sqlite::memory:", 1 ).await.unwrap();
    let tenants = TenantRepo::new( pool.clone() );
    let tenant = tenants
      .create_tenant( PlanTier::Basic, MicroUnits::from_micros( 20_000_000 ), MicroUnits::ZERO, "USD" )
      .await
      .unwrap();
    ( RunRepo::new( pool ), tenant.id )
  }

  #[ tokio::test ]
  async fn insert_then_fetch()
  {
    let ( repo, tenant_id ) = setup().await;
    let run = repo
      .insert_queued(
        RunId::new(), tenant_id, "K1", "fingerprint-a", "decision", TraceId::new(),
        MicroUnits::from_micros( 100_000 ), MicroUnits::from_micros( 10_000 ), Duration::days( 30 ),
      )
      .await
      .unwrap();

    assert_eq!( run.status, RunStatus::Queued );
    let fetched = repo.get( run.id ).await.unwrap();
    assert_eq!( fetched.id, run.id );
  }

  #[ tokio::test ]
  async fn duplicate_idempotency_key_conflicts()
  {
    let ( repo, tenant_id ) = setup().await;
    repo
      .insert_queued(
        RunId::new(), tenant_id, "K1", "fingerprint-a", "decision", TraceId::new(),
        MicroUnits::from_micros( 100_000 ), MicroUnits::from_micros( 10_000 ), Duration::days( 30 ),
      )
      .await
      .unwrap();

    let err = repo
      .insert_queued(
        RunId::new(), tenant_id, "K1", "fingerprint-b", "decision", TraceId::new(),
        MicroUnits::from_micros( 100_000 ), MicroUnits::from_micros( 10_000 ), Duration::days( 30 ),
      )
      .await
      .unwrap_err();

    assert!( matches!( err, LedgerError::IdempotencyConflict ) );
  }

  #[ tokio::test ]
  async fn lease_acquire_and_second_attempt_conflicts()
  {
    let ( repo, tenant_id ) = setup().await;
    let run = repo
      .insert_queued(
        RunId::new(), tenant_id, "K1", "fingerprint-a", "decision", TraceId::new(),
        MicroUnits::from_micros( 100_000 ), MicroUnits::from_micros( 10_000 ), Duration::days( 30 ),
      )
      .await
      .unwrap();

    let leased = repo.acquire_lease( run.id, Duration::minutes( 2 ) ).await.unwrap();
    assert_eq!( leased.status, RunStatus::Processing );
    assert!( leased.lease_token.is_some() );

    let err = repo.acquire_lease( run.id, Duration::minutes( 2 ) ).await.unwrap_err();
    assert!( matches!( err, LedgerError::CasConflict ) );
  }

  #[ tokio::test ]
  async fn full_claim_and_commit_writes_settlement()
  {
    let ( repo, tenant_id ) = setup().await;
    let run = repo
      .insert_queued(
        RunId::new(), tenant_id, "K1", "fingerprint-a", "decision", TraceId::new(),
        MicroUnits::from_micros( 100_000 ), MicroUnits::from_micros( 10_000 ), Duration::days( 30 ),
      )
      .await
      .unwrap();

    let leased = repo.acquire_lease( run.id, Duration::minutes( 2 ) ).await.unwrap();
    let lease_token = leased.lease_token.unwrap();

    let ( claimed, finalize_token ) = repo.finalize_claim( run.id, lease_token, leased.version ).await.unwrap();
    assert_eq!( claimed.status, RunStatus::Claimed );

    let committed = repo
      .finalize_commit(
        run.id, finalize_token, MicroUnits::from_micros( 87_000 ), "results", "run/key", "resultfp",
        SettlementOutcome::WorkerCommitted,
      )
      .await
      .unwrap();

    assert_eq!( committed.status, RunStatus::Completed );
    assert_eq!( committed.actual_cost, Some( MicroUnits::from_micros( 87_000 ) ) );
  }

  #[ tokio::test ]
  async fn fail_commit_settles_at_minimum_fee_after_claim()
  {
    let ( repo, tenant_id ) = setup().await;
    let run = repo
      .insert_queued(
        RunId::new(), tenant_id, "K1", "fingerprint-a", "decision", TraceId::new(),
        MicroUnits::from_micros( 100_000 ), MicroUnits::from_micros( 10_000 ), Duration::days( 30 ),
      )
      .await
      .unwrap();

    let leased = repo.acquire_lease( run.id, Duration::minutes( 2 ) ).await.unwrap();
    let ( _claimed, finalize_token ) = repo.finalize_claim( run.id, leased.lease_token.unwrap(), leased.version ).await.unwrap();

    let failed = repo.fail_commit( run.id, finalize_token, "pack_execution_failed" ).await.unwrap();
    assert_eq!( failed.status, RunStatus::Failed );
    assert_eq!( failed.failure_reason.as_deref(), Some( "pack_execution_failed" ) );
  }

  #[ tokio::test ]
  async fn mark_failed_with_settlement_charges_the_minimum_fee()
  {
    let ( repo, tenant_id ) = setup().await;
    let run = repo
      .insert_queued(
        RunId::new(), tenant_id, "K1", "fingerprint-a", "decision", TraceId::new(),
        MicroUnits::from_micros( 100_000 ), MicroUnits::from_micros( 10_000 ), Duration::days( 30 ),
      )
      .await
      .unwrap();
    let leased = repo.acquire_lease( run.id, Duration::seconds( -1 ) ).await.unwrap();

    let failed = repo.mark_failed_with_settlement( run.id, leased.version, "lease_expired" ).await.unwrap();
    assert_eq!( failed.status, RunStatus::Failed );
  }

  #[ tokio::test ]
  async fn expired_lease_sweep_finds_stale_run()
  {
    let ( repo, tenant_id ) = setup().await;
    let run = repo
      .insert_queued(
        RunId::new(), tenant_id, "K1", "fingerprint-a", "decision", TraceId::new(),
        MicroUnits::from_micros( 100_000 ), MicroUnits::from_micros( 10_000 ), Duration::days( 30 ),
      )
      .await
      .unwrap();
    repo.acquire_lease( run.id, Duration::seconds( -1 ) ).await.unwrap();

    let expired = repo.find_expired_leases( Utc::now(), 10 ).await.unwrap();
    assert_eq!( expired.len(), 1 );
    assert_eq!( expired[ 0 ].id, run.id );
  }
}
