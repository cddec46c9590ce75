//! Database module for handling PostgreSQL connections and schema setup
//!
//! This module provides connection configuration, pooling, health checks and
//! the startup initializer that reconciles the `users` table.

use crate::error::{DatabaseError, DatabaseResult};
use crate::models::User;
use crate::schema::migrate;
use config::{Config, Environment, File};
use serde::Deserialize;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Database configuration struct
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Database name
    pub name: String,
    /// Session `TimeZone` setting
    pub timezone: String,
    /// Avoid server-side prepared statements
    pub simple_protocol: bool,
    /// libpq-style ssl mode (`disable`, `prefer`, `require`, ...)
    pub ssl_mode: String,
    /// Session `search_path`; the server default when unset
    #[serde(default)]
    pub search_path: Option<String>,
    /// Full connection URL; replaces host, port, user, password and name
    #[serde(default)]
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connection_timeout: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            name: "postgres".to_string(),
            timezone: "Europe/London".to_string(),
            simple_protocol: true,
            ssl_mode: "disable".to_string(),
            search_path: None,
            url: None,
            max_connections: 10,
            min_connections: 1,
            connection_timeout: 30,
        }
    }
}

impl DatabaseConfig {
    /// Create a new DatabaseConfig from `database.toml` (if present) and
    /// environment variables
    pub fn from_env() -> DatabaseResult<Self> {
        Self::load(None)
    }

    /// Load configuration from defaults, a TOML file and the environment
    ///
    /// Later sources win. When `path` is `None`, `database.toml` in the
    /// working directory is read if it exists.
    ///
    /// # Environment Variables
    /// Every field can be set as `DATABASE_<FIELD>`, e.g. `DATABASE_HOST`,
    /// `DATABASE_PASSWORD`, `DATABASE_NAME`, `DATABASE_URL`,
    /// `DATABASE_MAX_CONNECTIONS`.
    pub fn load(path: Option<&Path>) -> DatabaseResult<Self> {
        let defaults = DatabaseConfig::default();

        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("database").required(false),
        };

        let settings = Config::builder()
            .set_default("host", defaults.host)?
            .set_default("port", i64::from(defaults.port))?
            .set_default("user", defaults.user)?
            .set_default("name", defaults.name)?
            .set_default("timezone", defaults.timezone)?
            .set_default("simple_protocol", defaults.simple_protocol)?
            .set_default("ssl_mode", defaults.ssl_mode)?
            .set_default("max_connections", i64::from(defaults.max_connections))?
            .set_default("min_connections", i64::from(defaults.min_connections))?
            .set_default("connection_timeout", defaults.connection_timeout as i64)?
            .add_source(file)
            .add_source(Environment::with_prefix("DATABASE"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Keyword/value DSN with the password redacted, for logs
    pub fn dsn(&self) -> String {
        self.to_string()
    }

    /// Statement run on every new connection to apply `timezone`
    ///
    /// The driver sends `TimeZone=UTC` as a startup parameter, so the
    /// session setting has to be changed after connecting.
    pub fn time_zone_statement(&self) -> String {
        format!("SET TIME ZONE '{}'", self.timezone.replace('\'', "''"))
    }

    /// Build driver connect options from this configuration
    ///
    /// The session time zone is not part of these; see
    /// [`DatabaseConfig::time_zone_statement`].
    pub fn connect_options(&self) -> DatabaseResult<PgConnectOptions> {
        let mut options = match &self.url {
            Some(url) => PgConnectOptions::from_str(url).map_err(|e| {
                DatabaseError::Configuration(format!("Invalid database URL: {}", e))
            })?,
            None => {
                let ssl_mode = PgSslMode::from_str(&self.ssl_mode).map_err(|e| {
                    DatabaseError::Configuration(format!("Invalid ssl mode: {}", e))
                })?;
                let mut options = PgConnectOptions::new()
                    .host(&self.host)
                    .port(self.port)
                    .username(&self.user)
                    .database(&self.name)
                    .ssl_mode(ssl_mode);
                if let Some(password) = &self.password {
                    options = options.password(password);
                }
                options
            }
        };

        if let Some(search_path) = &self.search_path {
            options = options.options([("search_path", search_path.as_str())]);
        }
        if self.simple_protocol {
            options = options.statement_cache_capacity(0);
        }

        Ok(options)
    }
}

/// Keyword/value DSN with the password redacted
impl fmt::Display for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.url.is_some() {
            write!(f, "url=<redacted>")?;
        } else {
            write!(
                f,
                "host={} port={} user={} password={} dbname={} sslmode={}",
                self.host,
                self.port,
                self.user,
                if self.password.is_some() { "***" } else { "" },
                self.name,
                self.ssl_mode
            )?;
        }
        write!(f, " TimeZone={}", self.timezone)?;
        if let Some(search_path) = &self.search_path {
            write!(f, " search_path={}", search_path)?;
        }
        if self.simple_protocol {
            write!(f, " simple_protocol=true")?;
        }
        Ok(())
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("dsn", &self.to_string())
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connection_timeout", &self.connection_timeout)
            .finish()
    }
}

/// Initialize a PostgreSQL connection pool
///
/// # Arguments
///
/// * `config` - Database configuration
///
/// # Returns
///
/// * `DatabaseResult<PgPool>` - PostgreSQL connection pool or
///   [`DatabaseError::Connection`] if no connection could be opened
pub async fn init_pool(config: &DatabaseConfig) -> DatabaseResult<PgPool> {
    info!(dsn = %config.dsn(), "Initializing database connection pool");

    let set_time_zone = config.time_zone_statement();
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout))
        .after_connect(move |conn, _meta| {
            let statement = set_time_zone.clone();
            Box::pin(async move {
                sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(&statement)).await?;
                Ok(())
            })
        })
        .connect_with(config.connect_options()?)
        .await
        .map_err(DatabaseError::Connection)?;

    info!("Database connection pool initialized successfully");
    Ok(pool)
}

/// Connect and make sure the `users` table matches [`User`]
///
/// Runs once at startup. Connection failures surface as
/// [`DatabaseError::Connection`]; reconciliation failures as
/// [`DatabaseError::Migration`] or [`DatabaseError::SchemaConflict`].
pub async fn init_database(config: &DatabaseConfig) -> DatabaseResult<PgPool> {
    let pool = init_pool(config).await?;
    migrate::<User>(&pool).await?;
    Ok(pool)
}

/// Check database connectivity
///
/// # Arguments
///
/// * `pool` - PostgreSQL connection pool
///
/// # Returns
///
/// * `DatabaseResult<bool>` - True if connection is successful
pub async fn health_check(pool: &PgPool) -> DatabaseResult<bool> {
    sqlx::query("SELECT 1")
        .persistent(false)
        .execute(pool)
        .await
        .map_err(DatabaseError::Query)?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DATABASE_HOST",
        "DATABASE_PORT",
        "DATABASE_USER",
        "DATABASE_PASSWORD",
        "DATABASE_NAME",
        "DATABASE_TIMEZONE",
        "DATABASE_SIMPLE_PROTOCOL",
        "DATABASE_SSL_MODE",
        "DATABASE_SEARCH_PATH",
        "DATABASE_URL",
        "DATABASE_MAX_CONNECTIONS",
        "DATABASE_MIN_CONNECTIONS",
        "DATABASE_CONNECTION_TIMEOUT",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial]
    fn test_database_config_defaults() {
        clear_env();

        let config = DatabaseConfig::from_env().expect("Failed to create database config");
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.user, "postgres");
        assert_eq!(config.password, None);
        assert_eq!(config.name, "postgres");
        assert_eq!(config.timezone, "Europe/London");
        assert!(config.simple_protocol);
        assert_eq!(config.ssl_mode, "disable");
        assert_eq!(config.max_connections, 10);
    }

    #[test]
    #[serial]
    fn test_database_config_from_env_with_custom_values() {
        clear_env();
        unsafe {
            std::env::set_var("DATABASE_HOST", "db.internal");
            std::env::set_var("DATABASE_PORT", "6543");
            std::env::set_var("DATABASE_PASSWORD", "12345");
            std::env::set_var("DATABASE_NAME", "bti");
            std::env::set_var("DATABASE_SIMPLE_PROTOCOL", "false");
            std::env::set_var("DATABASE_MAX_CONNECTIONS", "20");
        }

        let config = DatabaseConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6543);
        assert_eq!(config.password.as_deref(), Some("12345"));
        assert_eq!(config.name, "bti");
        assert!(!config.simple_protocol);
        assert_eq!(config.max_connections, 20);
    }

    #[test]
    fn test_connect_options_from_fields() {
        let config = DatabaseConfig {
            password: Some("12345".to_string()),
            search_path: Some("bootstrap_test".to_string()),
            ..DatabaseConfig::default()
        };

        let options = config.connect_options().unwrap();
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_username(), "postgres");
        assert_eq!(options.get_database(), Some("postgres"));

        let session = options.get_options().unwrap_or_default();
        assert!(session.contains("search_path=bootstrap_test"));
    }

    #[test]
    fn test_connect_options_from_url() {
        let config = DatabaseConfig {
            url: Some("postgres://app:pw@db.example:6000/app_db".to_string()),
            ..DatabaseConfig::default()
        };

        let options = config.connect_options().unwrap();
        assert_eq!(options.get_host(), "db.example");
        assert_eq!(options.get_port(), 6000);
        assert_eq!(options.get_username(), "app");
        assert_eq!(options.get_database(), Some("app_db"));
    }

    #[test]
    fn test_connect_options_rejects_bad_ssl_mode() {
        let config = DatabaseConfig {
            ssl_mode: "sometimes".to_string(),
            ..DatabaseConfig::default()
        };

        assert!(matches!(
            config.connect_options(),
            Err(DatabaseError::Configuration(_))
        ));
    }

    #[test]
    fn test_display_redacts_password() {
        let config = DatabaseConfig {
            password: Some("12345".to_string()),
            ..DatabaseConfig::default()
        };

        let dsn = config.dsn();
        assert_eq!(dsn, config.to_string());
        assert_eq!(
            dsn,
            "host=localhost port=5432 user=postgres password=*** dbname=postgres \
             sslmode=disable TimeZone=Europe/London simple_protocol=true"
        );
        assert!(!format!("{:?}", config).contains("12345"));
    }

    #[test]
    #[serial]
    fn test_env_values_keep_leading_zeros() {
        clear_env();
        unsafe {
            std::env::set_var("DATABASE_PASSWORD", "007");
            std::env::set_var("DATABASE_USER", "0042");
            std::env::set_var("DATABASE_NAME", "1e5");
        }

        let config = DatabaseConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.password.as_deref(), Some("007"));
        assert_eq!(config.user, "0042");
        assert_eq!(config.name, "1e5");
    }

    #[test]
    #[serial]
    fn test_load_reads_toml_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.toml");
        std::fs::write(
            &path,
            r#"
host = "db.file"
port = 6000
password = "0123"
timezone = "Europe/Paris"
simple_protocol = false
max_connections = 3
"#,
        )
        .unwrap();

        let config = DatabaseConfig::load(Some(&path)).unwrap();
        assert_eq!(config.host, "db.file");
        assert_eq!(config.port, 6000);
        assert_eq!(config.password.as_deref(), Some("0123"));
        assert_eq!(config.timezone, "Europe/Paris");
        assert!(!config.simple_protocol);
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.user, "postgres");
    }

    #[test]
    #[serial]
    fn test_env_overrides_toml_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.toml");
        std::fs::write(&path, "host = \"db.file\"\nport = 6000\n").unwrap();
        unsafe {
            std::env::set_var("DATABASE_HOST", "db.env");
        }

        let config = DatabaseConfig::load(Some(&path)).unwrap();
        clear_env();

        assert_eq!(config.host, "db.env");
        assert_eq!(config.port, 6000);
    }

    #[test]
    #[serial]
    fn test_load_missing_config_file_is_configuration_error() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        assert!(matches!(
            DatabaseConfig::load(Some(&path)),
            Err(DatabaseError::Configuration(_))
        ));
    }

    #[test]
    fn test_time_zone_statement_quotes_value() {
        let config = DatabaseConfig::default();
        assert_eq!(
            config.time_zone_statement(),
            "SET TIME ZONE 'Europe/London'"
        );

        let config = DatabaseConfig {
            timezone: "it's".to_string(),
            ..DatabaseConfig::default()
        };
        assert_eq!(config.time_zone_statement(), "SET TIME ZONE 'it''s'");
    }
}
