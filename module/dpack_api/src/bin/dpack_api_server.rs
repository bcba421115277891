//! Decision Pack platform API server.
//!
//! Binds the HTTP surface defined in [`dpack_api::routes`]: run submission,
//! polling, usage reporting, and the two health endpoints. Startup order is
//! fixed — load configuration before constructing anything that reads it,
//! initialize tracing before the first log line, connect the ledger before
//! the pack registry is populated, since pack execution has no dependency
//! on the ledger but a misconfigured `DATABASE_URL` should fail loudly at
//! boot rather than on the first run submission.

use dpack_api::state::AppState;
use dpack_cost::PricingTable;
use dpack_kv::KvClient;
use dpack_ledger::{ storage, RunRepo, TenantRepo, UsageRepo };
use dpack_objectstore::{ ObjectStore, S3ObjectStore };
use dpack_packs::builtin::{ EchoPack, FailingPack, SleepPack };
use dpack_packs::PackRegistry;
use dpack_queue::{ MessageQueue, SqsMessageQueue };
use dpack_reliability::CircuitBreaker;
use dpack_telemetry::LogFormat;
use dpack_types::MicroUnits;
use std::net::SocketAddr;
use std::sync::Arc;

#[ tokio::main ]
async fn main() -> Result< (), Box< dyn std::error::Error > >
{
  match dotenvy::dotenv()
  {
    Ok( path ) => eprintln!( "loaded .env from {path:?}" ),
    Err( _ ) => eprintln!( "no .env file loaded" ),
  }

  dpack_telemetry::init( LogFormat::from_env() );

  let mut config = dpack_config::AppConfig::load()?;
  tracing::info!( env = %config.env, database = %config.database.url, "starting dpack_api" );

  let ( bucket, bucket_endpoint ) = dpack_objectstore::resolve_bucket_target( &config.objectstore.s3_result_bucket );
  config.objectstore.s3_result_bucket = bucket;

  let pool = storage::connect( &config.database.url, config.database.max_connections ).await?;
  let kv = KvClient::connect( &config.redis.url ).await?;

  let queue: Arc< dyn MessageQueue > = if config.queue.sqs_queue_url.is_empty()
  {
    tracing::warn!( "SQS_QUEUE_URL not set, using in-memory queue (not durable across restarts)" );
    Arc::new( dpack_queue::InMemoryQueue::new() )
  }
  else
  {
    Arc::new( SqsMessageQueue::connect( &config.queue.sqs_queue_url ).await )
  };

  let object_store: Arc< dyn ObjectStore > = if config.objectstore.s3_result_bucket.is_empty()
  {
    tracing::warn!( "S3_RESULT_BUCKET not set, using in-memory object store (not durable across restarts)" );
    Arc::new( dpack_objectstore::InMemoryObjectStore::new() )
  }
  else
  {
    Arc::new( S3ObjectStore::connect( bucket_endpoint.as_deref() ).await )
  };

  let mut packs = PackRegistry::new();
  packs.register( Arc::new( EchoPack::new( MicroUnits::from_micros( 1_000 ) ) ) );
  packs.register( Arc::new( SleepPack::new( std::time::Duration::from_millis( 200 ) ) ) );
  packs.register( Arc::new( FailingPack::new( "builtin_failing_pack_invoked" ) ) );

  let state = AppState
  {
    config: Arc::new( config ),
    tenants: TenantRepo::new( pool.clone() ),
    runs: RunRepo::new( pool.clone() ),
    usage: UsageRepo::new( pool ),
    kv,
    queue,
    object_store,
    packs: Arc::new( packs ),
    pricing: Arc::new( PricingTable::embedded() ),
    circuit_breaker: Arc::new( CircuitBreaker::new( 5, 30 ) ),
  };

  let app = dpack_api::build_router( state );

  let addr = SocketAddr::from( ( [ 0, 0, 0, 0 ], 8080 ) );
  tracing::info!( "listening on http://{addr}" );

  let listener = tokio::net::TcpListener::bind( addr ).await?;
  axum::serve( listener, app ).await?;

  Ok( () )
}
