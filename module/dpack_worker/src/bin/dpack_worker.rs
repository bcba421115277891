//! Decision Pack worker process.
//!
//! Startup mirrors `dpack_api_server`: configuration first, tracing
//! before the first log line, ledger connection before anything that
//! depends on it. Queue and object store selection fall back to the
//! in-memory test doubles when their respective configuration is empty,
//! same as the API server — useful for local development, never for a
//! deployed environment.

use dpack_config::AppConfig;
use dpack_kv::KvClient;
use dpack_ledger::{ storage, RunRepo };
use dpack_objectstore::{ ObjectStore, S3ObjectStore };
use dpack_packs::builtin::{ EchoPack, FailingPack, SleepPack };
use dpack_packs::PackRegistry;
use dpack_queue::{ MessageQueue, SqsMessageQueue };
use dpack_reliability::CircuitBreaker;
use dpack_telemetry::LogFormat;
use dpack_types::MicroUnits;
use dpack_worker::Worker;
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

  let mut config = AppConfig::load()?;
  tracing::info!( env = %config.env, database = %config.database.url, "starting dpack_worker" );

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

  let worker = Worker::new(
    Arc::new( config ),
    RunRepo::new( pool ),
    kv,
    queue,
    object_store,
    Arc::new( packs ),
    Arc::new( CircuitBreaker::new( 5, 30 ) ),
  );

  worker.run_forever().await;
  Ok( () )
}
