//! MySQL store backed by sqlx

use super::{
    field_value, insert_columns, quote_identifier, ColumnRow, IngestStore, MappingRow,
    StoreTransaction,
};
use crate::config::{DatabaseConfig, RegistryLocation};
use crate::decoder::DecodedRecord;
use crate::error::Result;
use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::{QueryBuilder, Transaction};
use std::time::Duration;
use tracing::{debug, info};

/// MySQL caps a prepared statement at 65535 placeholders
const MAX_PLACEHOLDERS: usize = 65_535;

pub struct MySqlStore {
    pool: MySqlPool,
    registry: RegistryLocation,
    chunk_size: usize,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool, registry: RegistryLocation, chunk_size: usize) -> Self {
        Self {
            pool,
            registry,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Open a pool to `database` on the configured server
    pub async fn connect(
        config: &DatabaseConfig,
        database: &str,
        registry: RegistryLocation,
        chunk_size: usize,
    ) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(database);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await?;

        info!(
            host = %config.host,
            database = %database,
            max_connections = config.max_connections,
            "Database connection pool created"
        );

        Ok(Self::new(pool, registry, chunk_size))
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Release every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl IngestStore for MySqlStore {
    type Transaction = MySqlTransaction;

    async fn load_mappings(&self) -> Result<Vec<MappingRow>> {
        let sql = format!(
            "SELECT CAST(src_id AS CHAR), CAST(src_table AS CHAR), CAST(parsed_data AS CHAR) \
             FROM {}.{}",
            quote_identifier(&self.registry.schema)?,
            quote_identifier(&self.registry.table)?,
        );

        let rows: Vec<(Option<String>, Option<String>, Option<String>)> =
            sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .filter_map(|(key, schema_table, destination_table)| {
                key.map(|source_key| MappingRow {
                    source_key,
                    schema_table,
                    destination_table,
                })
            })
            .collect())
    }

    async fn fetch_columns(&self, schema_table: &str) -> Result<Vec<ColumnRow>> {
        let sql = format!(
            "SELECT CAST(db_element_name AS CHAR), CAST(start_pstn AS CHAR), \
             CAST(element_lgth AS CHAR), CAST(data_type AS CHAR) FROM {}.{}",
            quote_identifier(&self.registry.schema)?,
            quote_identifier(schema_table)?,
        );

        let rows: Vec<(Option<String>, Option<String>, Option<String>, Option<String>)> =
            sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        debug!(schema_table = %schema_table, rows = rows.len(), "Fetched column definitions");

        Ok(rows
            .into_iter()
            .filter_map(|(name, start_position, length, declared_type)| {
                name.map(|field_name| ColumnRow {
                    field_name,
                    start_position,
                    length,
                    declared_type,
                })
            })
            .collect())
    }

    async fn begin(&self) -> Result<MySqlTransaction> {
        Ok(MySqlTransaction {
            tx: self.pool.begin().await?,
            chunk_size: self.chunk_size,
        })
    }
}

pub struct MySqlTransaction {
    tx: Transaction<'static, MySql>,
    chunk_size: usize,
}

impl MySqlTransaction {
    async fn live_columns(&mut self, table: &str) -> Result<Vec<String>> {
        let columns: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT CAST(COLUMN_NAME AS CHAR)
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#,
        )
        .bind(table)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(columns)
    }
}

#[async_trait]
impl StoreTransaction for MySqlTransaction {
    async fn insert_batch(&mut self, table: &str, records: &[DecodedRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let live = self.live_columns(table).await?;
        let columns = insert_columns(table, &live, records)?;
        let column_list = columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let head = format!("INSERT INTO {} ({}) ", quote_identifier(table)?, column_list);

        let rows_per_statement = self.chunk_size.min(MAX_PLACEHOLDERS / columns.len().max(1));
        let mut inserted = 0;

        for chunk in records.chunks(rows_per_statement.max(1)) {
            let mut query_builder: QueryBuilder<MySql> = QueryBuilder::new(&head);
            query_builder.push_values(chunk, |mut b, record| {
                for column in &columns {
                    b.push_bind(field_value(record, column).map(str::to_owned));
                }
            });

            let result = query_builder.build().execute(&mut *self.tx).await?;
            inserted += result.rows_affected();
        }

        debug!(table = %table, rows = inserted, "Inserted batch");
        Ok(inserted)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
