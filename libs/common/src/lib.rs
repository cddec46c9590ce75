//! Common library for the Joy Kunga application
//!
//! This crate provides the database bootstrap shared by the services:
//! connection configuration and pooling, the persisted models, and schema
//! reconciliation for their tables.

pub mod database;
pub mod error;
pub mod models;
pub mod schema;

/// Example usage of the database module
///
/// ```rust,no_run
/// use common::database::{DatabaseConfig, health_check, init_database};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DatabaseConfig::from_env()?;
///     let pool = init_database(&config).await?;
///     let is_healthy = health_check(&pool).await?;
///     println!("Database health check: {}", is_healthy);
///     Ok(())
/// }
/// ```
pub fn example_usage() {}
