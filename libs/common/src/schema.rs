//! Schema reconciliation for declared tables
//!
//! Tables are declared as [`TableDef`] literals next to the model they back.
//! Reconciliation reads the live table from `information_schema`, computes a
//! [`Plan`] of additive DDL, and applies it. Columns are never dropped or
//! renamed, and a declared column whose live type differs is reported as a
//! [`DatabaseError::SchemaConflict`] instead of being altered.

use crate::error::{DatabaseError, DatabaseResult};
use sqlx::{FromRow, PgPool};
use tracing::{debug, info, warn};

/// Column types supported by declared tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// 64-bit integer backed by a sequence
    BigSerial,
    Text,
    /// Timestamp with time zone
    TimestampTz,
}

impl ColumnType {
    /// Type name used in DDL
    pub fn ddl(self) -> &'static str {
        match self {
            ColumnType::BigSerial => "BIGSERIAL",
            ColumnType::Text => "TEXT",
            ColumnType::TimestampTz => "TIMESTAMPTZ",
        }
    }

    /// Value of `information_schema.columns.data_type` for this type
    pub fn data_type(self) -> &'static str {
        match self {
            ColumnType::BigSerial => "bigint",
            ColumnType::Text => "text",
            ColumnType::TimestampTz => "timestamp with time zone",
        }
    }

    /// Default used to fill existing rows when a required column is added
    fn backfill(self) -> Option<&'static str> {
        match self {
            ColumnType::Text => Some("''"),
            ColumnType::BigSerial | ColumnType::TimestampTz => None,
        }
    }
}

/// A declared column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnDef {
    /// A required (`NOT NULL`) column
    pub const fn new(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            nullable: false,
            primary_key: false,
        }
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    /// Column definition as written inside `CREATE TABLE`
    fn create_ddl(&self) -> String {
        let mut ddl = format!("{} {}", quote_ident(self.name), self.column_type.ddl());
        if self.primary_key {
            ddl.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            ddl.push_str(" NOT NULL");
        }
        ddl
    }

    /// Column definition as written after `ADD COLUMN`
    ///
    /// Required columns get a backfill default when their type has one, so
    /// the statement succeeds on a table that already holds rows.
    fn add_ddl(&self) -> String {
        let mut ddl = self.create_ddl();
        if !self.primary_key && !self.nullable {
            if let Some(default) = self.column_type.backfill() {
                ddl.push_str(" DEFAULT ");
                ddl.push_str(default);
            }
        }
        ddl
    }
}

/// A declared table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn create_statement(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(ColumnDef::create_ddl)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(self.name),
            columns
        )
    }

    pub fn add_column_statement(&self, column: &ColumnDef) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
            quote_ident(self.name),
            column.add_ddl()
        )
    }
}

/// A persisted type whose table shape is declared in code
pub trait Entity {
    const TABLE: TableDef;
}

/// A column as it exists in the database
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct LiveColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// Ordered DDL needed to bring a live table in line with its declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub table: &'static str,
    pub create: bool,
    pub added_columns: Vec<&'static str>,
    pub statements: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Outcome of applying a [`Plan`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub table: String,
    pub created: bool,
    pub added_columns: Vec<String>,
}

impl MigrationReport {
    /// True when nothing had to be changed
    pub fn is_noop(&self) -> bool {
        !self.created && self.added_columns.is_empty()
    }
}

/// Quote an identifier for use in DDL
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Read the live columns of `table` in the current schema
///
/// Returns `None` when the table does not exist.
pub async fn introspect(pool: &PgPool, table: &str) -> DatabaseResult<Option<Vec<LiveColumn>>> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_name = $1
        )
        "#,
    )
    .bind(table)
    .persistent(false)
    .fetch_one(pool)
    .await
    .map_err(DatabaseError::Migration)?;

    if !exists {
        return Ok(None);
    }

    let columns = sqlx::query_as::<_, LiveColumn>(
        r#"
        SELECT column_name::text AS name,
               data_type::text AS data_type,
               (is_nullable = 'YES') AS nullable
        FROM information_schema.columns
        WHERE table_schema = current_schema() AND table_name = $1
        ORDER BY ordinal_position
        "#,
    )
    .bind(table)
    .persistent(false)
    .fetch_all(pool)
    .await
    .map_err(DatabaseError::Migration)?;

    Ok(Some(columns))
}

/// Compute the DDL that reconciles `live` with `table`
///
/// `live` is `None` when the table is absent.
pub fn plan(table: &TableDef, live: Option<&[LiveColumn]>) -> DatabaseResult<Plan> {
    let Some(live) = live else {
        return Ok(Plan {
            table: table.name,
            create: true,
            added_columns: Vec::new(),
            statements: vec![table.create_statement()],
        });
    };

    let mut added_columns = Vec::new();
    let mut statements = Vec::new();

    for column in table.columns {
        match live.iter().find(|l| l.name == column.name) {
            None => {
                added_columns.push(column.name);
                statements.push(table.add_column_statement(column));
            }
            Some(existing) => {
                let expected = column.column_type.data_type();
                if existing.data_type != expected {
                    return Err(DatabaseError::SchemaConflict {
                        table: table.name.to_string(),
                        column: column.name.to_string(),
                        expected: expected.to_string(),
                        found: existing.data_type.clone(),
                    });
                }
                if existing.nullable != column.nullable {
                    warn!(
                        table = table.name,
                        column = column.name,
                        declared_nullable = column.nullable,
                        live_nullable = existing.nullable,
                        "Column nullability differs from declaration; leaving it unchanged"
                    );
                }
            }
        }
    }

    Ok(Plan {
        table: table.name,
        create: false,
        added_columns,
        statements,
    })
}

/// Execute a plan statement by statement
///
/// Statements run outside an explicit transaction through the simple query
/// protocol. The first failure aborts the remaining statements.
pub async fn apply(pool: &PgPool, plan: &Plan) -> DatabaseResult<MigrationReport> {
    for statement in &plan.statements {
        debug!(table = plan.table, %statement, "Applying schema statement");
        sqlx::raw_sql(statement)
            .execute(pool)
            .await
            .map_err(DatabaseError::Migration)?;
    }

    if plan.create {
        info!(table = plan.table, "Created table");
    }
    for column in &plan.added_columns {
        info!(table = plan.table, column, "Added missing column");
    }

    Ok(MigrationReport {
        table: plan.table.to_string(),
        created: plan.create,
        added_columns: plan.added_columns.iter().map(|c| c.to_string()).collect(),
    })
}

/// Reconcile the table backing `E` with its declaration
pub async fn migrate<E: Entity>(pool: &PgPool) -> DatabaseResult<MigrationReport> {
    let live = introspect(pool, E::TABLE.name).await?;
    let plan = plan(&E::TABLE, live.as_deref())?;

    if plan.is_empty() {
        info!(table = plan.table, "Schema already up to date");
    }

    apply(pool, &plan).await
}
