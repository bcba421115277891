//! Configuration loading errors.

/// Failure modes for [`crate::AppConfig`] loading.
#[ derive( Debug, thiserror::Error ) ]
pub enum ConfigError
{
  /// The named config file does not exist. Not necessarily fatal — callers
  /// fall back to defaults plus environment overrides when the file is
  /// simply absent, this variant is reserved for when one was required.
  #[ error( "config file not found: {0}" ) ]
  FileNotFound( String ),

  /// The file exists but failed to parse as TOML.
  #[ error( "invalid TOML in {path}: {error}" ) ]
  InvalidToml
  {
    /// Path of the offending file.
    path: String,
    /// Underlying parse error, rendered.
    error: String,
  },

  /// Reading the file failed.
  #[ error( "io error reading {path}: {error}" ) ]
  Io
  {
    /// Path that could not be read.
    path: String,
    /// Underlying io error, rendered.
    error: String,
  },

  /// An environment-variable override held a value of the wrong shape for
  /// the field it targets (e.g. a non-numeric `WORKER_LEASE_TTL_SEC`).
  #[ error( "environment variable {var} could not be parsed: {error}" ) ]
  EnvParseError
  {
    /// Name of the offending environment variable.
    var: String,
    /// Underlying parse error, rendered.
    error: String,
  },
}

pub type Result< T > = core::result::Result< T, ConfigError >;
