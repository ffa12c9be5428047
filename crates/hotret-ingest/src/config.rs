//! Configuration management
//!
//! Everything is read from the environment (after `.env` is loaded) and can be
//! partially overridden from the command line.

use crate::error::{IngestError, Result};
use hotret_common::env;
use std::path::PathBuf;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_MYSQL_HOST: &str = "localhost";

pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Staging subfolders and the database each one loads into
pub const DEFAULT_SUBFOLDERS: &str = "HOT=prd_hot_files,RET=prd_ret_files";

/// Schema holding the registry table and every schema (offset) table
pub const DEFAULT_REGISTRY_SCHEMA: &str = "iata_metadata";

pub const DEFAULT_REGISTRY_TABLE: &str = "source_file_info";

/// Concurrent line decoders per file
pub const DEFAULT_DECODE_WORKERS: usize = 8;

/// Rows per INSERT statement
pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 1000;

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 4;

pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Full loader configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub database: DatabaseConfig,
    pub source_base_folder: PathBuf,
    pub subfolders: Vec<SubfolderTarget>,
    pub registry: RegistryLocation,
    pub pipeline: PipelineSettings,
}

/// Connection settings shared by every target database
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// A staging subfolder and the database its files load into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubfolderTarget {
    pub subfolder: String,
    pub database: String,
}

/// Where the schema registry lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLocation {
    pub schema: String,
    pub table: String,
}

impl Default for RegistryLocation {
    fn default() -> Self {
        Self {
            schema: DEFAULT_REGISTRY_SCHEMA.to_string(),
            table: DEFAULT_REGISTRY_TABLE.to_string(),
        }
    }
}

/// Tuning for the per-file pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub decode_workers: usize,
    pub insert_chunk_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            decode_workers: DEFAULT_DECODE_WORKERS,
            insert_chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
        }
    }
}

impl IngestConfig {
    /// Load configuration from `.env` and the environment
    ///
    /// Required: `MYSQL_USER`, `MYSQL_PASSWORD`, `SOURCE_BASE_FOLDER`.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(None)
    }

    /// Like [`IngestConfig::from_env`], with `base_folder` taking the place of
    /// `SOURCE_BASE_FOLDER` when given
    pub fn from_env_with(base_folder: Option<PathBuf>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let source_base_folder = match base_folder {
            Some(base_folder) => base_folder,
            None => PathBuf::from(env::required("SOURCE_BASE_FOLDER")?),
        };
        let config = IngestConfig {
            database: DatabaseConfig::from_env()?,
            source_base_folder,
            subfolders: parse_subfolders(&env::var_or("HOTRET_SUBFOLDERS", DEFAULT_SUBFOLDERS))?,
            registry: RegistryLocation::from_env(),
            pipeline: PipelineSettings::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;

        if self.subfolders.is_empty() {
            return Err(IngestError::Config(
                "at least one subfolder=database pair is required".to_string(),
            ));
        }

        self.pipeline.validate()
    }
}

/// What decoding a single file needs: no staging folders involved
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    pub database: DatabaseConfig,
    pub registry: RegistryLocation,
    pub pipeline: PipelineSettings,
}

impl DecodeConfig {
    /// Load from `.env` and the environment
    ///
    /// Required: `MYSQL_USER`, `MYSQL_PASSWORD`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = DecodeConfig {
            database: DatabaseConfig::from_env()?,
            registry: RegistryLocation::from_env(),
            pipeline: PipelineSettings::from_env()?,
        };
        config.database.validate()?;
        config.pipeline.validate()?;
        Ok(config)
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        Ok(DatabaseConfig {
            host: env::var_or("MYSQL_HOST", DEFAULT_MYSQL_HOST),
            port: env::parse_or("MYSQL_PORT", DEFAULT_MYSQL_PORT)?,
            user: env::required("MYSQL_USER")?,
            password: env::required("MYSQL_PASSWORD")?,
            max_connections: env::parse_or("DB_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS)?,
            connect_timeout_secs: env::parse_or(
                "DB_CONNECT_TIMEOUT",
                DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            )?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.user.is_empty() || self.password.is_empty() {
            return Err(IngestError::Config(
                "database credentials cannot be empty".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(IngestError::Config(
                "DB_MAX_CONNECTIONS must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl RegistryLocation {
    pub fn from_env() -> Self {
        Self {
            schema: env::var_or("HOTRET_REGISTRY_SCHEMA", DEFAULT_REGISTRY_SCHEMA),
            table: env::var_or("HOTRET_REGISTRY_TABLE", DEFAULT_REGISTRY_TABLE),
        }
    }
}

impl PipelineSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            decode_workers: env::parse_or("HOTRET_DECODE_WORKERS", DEFAULT_DECODE_WORKERS)?,
            insert_chunk_size: env::parse_or("HOTRET_INSERT_CHUNK_SIZE", DEFAULT_INSERT_CHUNK_SIZE)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.decode_workers == 0 {
            return Err(IngestError::Config(
                "decode workers must be greater than 0".to_string(),
            ));
        }
        if self.insert_chunk_size == 0 {
            return Err(IngestError::Config(
                "insert chunk size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse `SUB=database` pairs separated by commas, keeping their order
pub fn parse_subfolders(raw: &str) -> Result<Vec<SubfolderTarget>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (subfolder, database) = pair.split_once('=').ok_or_else(|| {
                IngestError::Config(format!("expected SUBFOLDER=database, got {:?}", pair))
            })?;
            let (subfolder, database) = (subfolder.trim(), database.trim());
            if subfolder.is_empty() || database.is_empty() {
                return Err(IngestError::Config(format!(
                    "empty subfolder or database in {:?}",
                    pair
                )));
            }
            Ok(SubfolderTarget {
                subfolder: subfolder.to_string(),
                database: database.to_string(),
            })
        })
        .collect()
}
