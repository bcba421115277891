//! Decision Pack reaper process.
//!
//! Startup mirrors `dpack_worker`: configuration first, tracing before the
//! first log line, ledger connection before anything that depends on it.
//! The reaper never touches the queue, so unlike the worker and the API
//! server it has no SQS-vs-in-memory branch to make.

use dpack_config::AppConfig;
use dpack_kv::KvClient;
use dpack_ledger::{ storage, RunRepo };
use dpack_objectstore::{ ObjectStore, S3ObjectStore };
use dpack_reaper::Reaper;
use dpack_reliability::CircuitBreaker;
use dpack_telemetry::LogFormat;
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
  tracing::info!( env = %config.env, database = %config.database.url, "starting dpack_reaper" );

  let ( bucket, bucket_endpoint ) = dpack_objectstore::resolve_bucket_target( &config.objectstore.s3_result_bucket );
  config.objectstore.s3_result_bucket = bucket;

  let pool = storage::connect( &config.database.url, config.database.max_connections ).await?;
  let kv = KvClient::connect( &config.redis.url ).await?;

  let object_store: Arc< dyn ObjectStore > = if config.objectstore.s3_result_bucket.is_empty()
  {
    tracing::warn!( "S3_RESULT_BUCKET not set, using in-memory object store (not durable across restarts)" );
    Arc::new( dpack_objectstore::InMemoryObjectStore::new() )
  }
  else
  {
    Arc::new( S3ObjectStore::connect( bucket_endpoint.as_deref() ).await )
  };

  let reaper = Reaper::new(
    Arc::new( config ),
    RunRepo::new( pool ),
    kv,
    object_store,
    Arc::new( CircuitBreaker::new( 5, 30 ) ),
  );

  reaper.run_forever().await;
  Ok( () )
}
