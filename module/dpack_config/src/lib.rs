//! Layered configuration: a `config.{env}.toml` file provides the base,
//! and a fixed set of environment variables override individual fields on
//! top of it — the same two-layer precedence `iron_token_manager::config`
//! used for `DATABASE_URL`, generalized here to every externally
//! configurable concern in the platform.
//!
//! There is no workspace-root discovery layer: a deployed service binary
//! has no notion of "project root" at runtime, only a working directory
//! and its environment. `DPACK_ENV` selects which `config.{env}.toml` to
//! read (default `development`); every field also has a hardcoded
//! fallback so the platform starts in a bare environment with no file at
//! all.

pub mod error;

pub use error::ConfigError;
use error::Result;
use serde::Deserialize;
use std::path::Path;

/// Ledger connection settings.
#[ derive( Debug, Clone, Deserialize ) ]
#[ serde( default ) ]
pub struct DatabaseConfig
{
  pub url: String,
  pub max_connections: u32,
}

impl Default for DatabaseConfig
{
  fn default() -> Self
  {
    Self { url: "sqlite://dpack.db".to_string(), max_connections: 5 }
  }
}

/// KV (rate limiter, reservation index, idempotency cells) connection settings.
#[ derive( Debug, Clone, Deserialize ) ]
#[ serde( default ) ]
pub struct RedisConfig
{
  pub url: String,
}

impl Default for RedisConfig
{
  fn default() -> Self
  {
    Self { url: "redis://127.0.0.1:6379".to_string() }
  }
}

/// Message queue identifiers.
#[ derive( Debug, Clone, Deserialize ) ]
#[ serde( default ) ]
pub struct QueueConfig
{
  pub sqs_queue_url: String,
}

impl Default for QueueConfig
{
  fn default() -> Self
  {
    Self { sqs_queue_url: String::new() }
  }
}

/// Object store identifiers.
#[ derive( Debug, Clone, Deserialize ) ]
#[ serde( default ) ]
pub struct ObjectStoreConfig
{
  pub s3_result_bucket: String,
}

impl Default for ObjectStoreConfig
{
  fn default() -> Self
  {
    Self { s3_result_bucket: String::new() }
  }
}

/// API ingress settings.
#[ derive( Debug, Clone, Deserialize ) ]
#[ serde( default ) ]
pub struct CorsConfig
{
  pub allowed_origins: Vec< String >,
}

impl Default for CorsConfig
{
  fn default() -> Self
  {
    Self { allowed_origins: Vec::new() }
  }
}

/// Bearer-key hashing settings.
#[ derive( Debug, Clone, Deserialize ) ]
#[ serde( default ) ]
pub struct AuthConfig
{
  /// Server-side pepper mixed into every API key digest before it is
  /// compared against `api_keys.key_hash`. Rotating this value invalidates
  /// every previously issued key, so it is provisioned once per
  /// environment and never derived from request data.
  pub api_key_pepper: String,
}

impl Default for AuthConfig
{
  fn default() -> Self
  {
    Self { api_key_pepper: "dev-pepper-change-in-production".to_string() }
  }
}

/// Worker lease/heartbeat cadence.
#[ derive( Debug, Clone, Copy, Deserialize ) ]
#[ serde( default ) ]
pub struct WorkerConfig
{
  pub heartbeat_interval_sec: u64,
  pub lease_ttl_sec: u64,
  /// Pack execution timeout applied when a submission's own
  /// `timebox_sec` is absent.
  pub default_timebox_sec: u64,
}

impl Default for WorkerConfig
{
  fn default() -> Self
  {
    Self { heartbeat_interval_sec: 30, lease_ttl_sec: 120, default_timebox_sec: 60 }
  }
}

/// Reaper sweep/reconcile cadence.
#[ derive( Debug, Clone, Copy, Deserialize ) ]
#[ serde( default ) ]
pub struct ReaperConfig
{
  pub interval_sec: u64,
  pub reconcile_interval_sec: u64,
  pub reconcile_threshold_min: u64,
}

impl Default for ReaperConfig
{
  fn default() -> Self
  {
    Self { interval_sec: 30, reconcile_interval_sec: 60, reconcile_threshold_min: 5 }
  }
}

/// The complete platform configuration, assembled from a TOML file plus
/// environment-variable overrides.
#[ derive( Debug, Clone, Deserialize ) ]
#[ serde( default ) ]
pub struct AppConfig
{
  pub env: String,
  pub database: DatabaseConfig,
  pub redis: RedisConfig,
  pub queue: QueueConfig,
  pub objectstore: ObjectStoreConfig,
  pub cors: CorsConfig,
  pub auth: AuthConfig,
  pub worker: WorkerConfig,
  pub reaper: ReaperConfig,
}

impl Default for AppConfig
{
  fn default() -> Self
  {
    Self
    {
      env: "development".to_string(),
      database: DatabaseConfig::default(),
      redis: RedisConfig::default(),
      queue: QueueConfig::default(),
      objectstore: ObjectStoreConfig::default(),
      cors: CorsConfig::default(),
      auth: AuthConfig::default(),
      worker: WorkerConfig::default(),
      reaper: ReaperConfig::default(),
    }
  }
}

impl AppConfig
{
  /// Load for the current process: read `DPACK_ENV` (default
  /// `development`), parse `config.{env}.toml` if it exists, then apply
  /// environment-variable overrides.
  ///
  /// # Errors
  ///
  /// Returns [`ConfigError::InvalidToml`] if the file exists but does not
  /// parse, or [`ConfigError::EnvParseError`] if an override variable
  /// holds an unparseable value.
  pub fn load() -> Result< Self >
  {
    let env = std::env::var( "DPACK_ENV" ).unwrap_or_else( | _ | "development".to_string() );
    let mut config = Self::from_env_file( &env )?;
    config.apply_env_overrides()?;
    Ok( config )
  }

  /// Parse `config.{env}.toml` from the current working directory. Returns
  /// the all-defaults config, with `env` set, if no such file exists.
  pub fn from_env_file( env: &str ) -> Result< Self >
  {
    let path = format!( "config.{env}.toml" );
    if !Path::new( &path ).exists()
    {
      let mut config = Self::default();
      config.env = env.to_string();
      return Ok( config );
    }
    Self::from_file( &path )
  }

  /// Parse a specific TOML file.
  pub fn from_file( path: &str ) -> Result< Self >
  {
    let contents = std::fs::read_to_string( path )
      .map_err( | error | ConfigError::Io { path: path.to_string(), error: error.to_string() } )?;

    toml::from_str( &contents )
      .map_err( | error | ConfigError::InvalidToml { path: path.to_string(), error: error.to_string() } )
  }

  /// Overlay the fixed set of platform environment variables on top of
  /// whatever the file (or defaults) already populated.
  pub fn apply_env_overrides( &mut self ) -> Result< () >
  {
    if let Ok( v ) = std::env::var( "DATABASE_URL" )
    {
      self.database.url = v;
    }
    if let Ok( v ) = std::env::var( "DATABASE_MAX_CONNECTIONS" )
    {
      self.database.max_connections = parse_env( "DATABASE_MAX_CONNECTIONS", &v )?;
    }
    if let Ok( v ) = std::env::var( "REDIS_URL" )
    {
      self.redis.url = v;
    }
    if let Ok( v ) = std::env::var( "SQS_QUEUE_URL" )
    {
      self.queue.sqs_queue_url = v;
    }
    if let Ok( v ) = std::env::var( "S3_RESULT_BUCKET" )
    {
      self.objectstore.s3_result_bucket = v;
    }
    if let Ok( v ) = std::env::var( "CORS_ALLOWED_ORIGINS" )
    {
      self.cors.allowed_origins = v.split( ',' ).map( | s | s.trim().to_string() ).filter( | s | !s.is_empty() ).collect();
    }
    if let Ok( v ) = std::env::var( "API_KEY_PEPPER" )
    {
      self.auth.api_key_pepper = v;
    }
    if let Ok( v ) = std::env::var( "WORKER_HEARTBEAT_INTERVAL_SEC" )
    {
      self.worker.heartbeat_interval_sec = parse_env( "WORKER_HEARTBEAT_INTERVAL_SEC", &v )?;
    }
    if let Ok( v ) = std::env::var( "WORKER_LEASE_TTL_SEC" )
    {
      self.worker.lease_ttl_sec = parse_env( "WORKER_LEASE_TTL_SEC", &v )?;
    }
    if let Ok( v ) = std::env::var( "WORKER_DEFAULT_TIMEBOX_SEC" )
    {
      self.worker.default_timebox_sec = parse_env( "WORKER_DEFAULT_TIMEBOX_SEC", &v )?;
    }
    if let Ok( v ) = std::env::var( "REAPER_INTERVAL_SEC" )
    {
      self.reaper.interval_sec = parse_env( "REAPER_INTERVAL_SEC", &v )?;
    }
    if let Ok( v ) = std::env::var( "RECONCILE_INTERVAL_SEC" )
    {
      self.reaper.reconcile_interval_sec = parse_env( "RECONCILE_INTERVAL_SEC", &v )?;
    }
    if let Ok( v ) = std::env::var( "RECONCILE_THRESHOLD_MIN" )
    {
      self.reaper.reconcile_threshold_min = parse_env( "RECONCILE_THRESHOLD_MIN", &v )?;
    }

    Ok( () )
  }

  /// A config suitable for local development with no file present.
  #[ must_use ]
  pub fn default_dev() -> Self
  {
    Self::default()
  }

  /// A config suitable for an in-memory test database and loopback
  /// backing services.
  #[ must_use ]
  pub fn default_test() -> Self
  {
    Self
    {
      env: "test".to_string(),
      database: DatabaseConfig { url: "sqlite::memory:".to_string(), max_connections: 1 },
      ..Self::default()
    }
  }
}

fn parse_env< T: std::str::FromStr >( var: &str, value: &str ) -> Result< T >
where
  T::Err: std::fmt::Display,
{
  value.parse().map_err( | error: T::Err | ConfigError::EnvParseError { var: var.to_string(), error: error.to_string() } )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;
  use std::sync::Mutex;

  static ENV_LOCK: Mutex< () > = Mutex::new( () );

  #[ test ]
  fn default_dev_has_sane_fallbacks()
  {
    let config = AppConfig::default_dev();
    assert_eq!( config.env, "development" );
    assert_eq!( config.worker.lease_ttl_sec, 120 );
  }

  #[ test ]
  fn default_test_uses_in_memory_database()
  {
    let config = AppConfig::default_test();
    assert_eq!( config.database.url, "sqlite::memory:" );
    assert_eq!( config.database.max_connections, 1 );
  }

  #[ test ]
  fn missing_file_falls_back_to_defaults()
  {
    let config = AppConfig::from_env_file( "nonexistent_env_for_test" ).unwrap();
    assert_eq!( config.env, "nonexistent_env_for_test" );
    assert_eq!( config.database.url, DatabaseConfig::default().url );
  }

  #[ test ]
  fn file_values_parse_and_load()
  {
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join( "config.custom.toml" );
    std::fs::write(
      &file_path,
      "env = \"custom\"\n[database]\nurl = \"sqlite://from_file.db\"\nmax_connections = 9\n"
    )
    .unwrap();

    let config = AppConfig::from_file( file_path.to_str().unwrap() ).unwrap();
    assert_eq!( config.env, "custom" );
    assert_eq!( config.database.url, "sqlite://from_file.db" );
    assert_eq!( config.database.max_connections, 9 );
  }

  #[ test ]
  fn env_override_wins_over_file_and_default()
  {
    let _guard = ENV_LOCK.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
    std::env::set_var( "DATABASE_URL", "sqlite://overridden.db" );
    let mut config = AppConfig::default_dev();
    config.apply_env_overrides().unwrap();
    assert_eq!( config.database.url, "sqlite://overridden.db" );
    std::env::remove_var( "DATABASE_URL" );
  }

  #[ test ]
  fn malformed_numeric_override_is_rejected()
  {
    let _guard = ENV_LOCK.lock().unwrap_or_else( std::sync::PoisonError::into_inner );
    std::env::set_var( "WORKER_LEASE_TTL_SEC", "not-a-number" );
    let mut config = AppConfig::default_dev();
    let err = config.apply_env_overrides().unwrap_err();
    assert!( matches!( err, ConfigError::EnvParseError { .. } ) );
    std::env::remove_var( "WORKER_LEASE_TTL_SEC" );
  }
}
