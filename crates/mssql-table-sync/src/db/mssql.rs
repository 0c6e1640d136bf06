//! SQL Server store over a bb8 pool of tiberius clients.

use super::convert::{
    read_value, row_has_oversized_strings, rows_per_insert, sql_value_to_column_data,
    sql_value_to_sql_param,
};
use super::TableStore;
use crate::config::DatabaseConfig;
use crate::core::{ColumnDescriptor, Row, Side};
use crate::error::{Result, SyncError};
use crate::verify::{ChecksumQuery, Fingerprint};
use async_trait::async_trait;
use bb8::{Pool, PooledConnection, RunError};
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query, ToSql, TokenRow};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

/// Pooled client that remembers a request it did not see through.
///
/// A request dropped by a timeout, or one that failed, leaves the flag set
/// and the pool discards the connection instead of handing out a session
/// that may still be mid-response or inside an open transaction.
pub(crate) struct TrackedClient<C> {
    client: C,
    in_flight: bool,
}

impl<C> TrackedClient<C> {
    fn new(client: C) -> Self {
        Self {
            client,
            in_flight: false,
        }
    }

    /// Mark a request as started and hand out the client for it.
    fn begin(&mut self) -> &mut C {
        self.in_flight = true;
        &mut self.client
    }

    /// Mark the request as complete.
    fn finish(&mut self) {
        self.in_flight = false;
    }

    fn is_poisoned(&self) -> bool {
        self.in_flight
    }
}

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: DatabaseConfig,
}

impl TiberiusConnectionManager {
    fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.encrypt {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = TrackedClient<Client<Compat<TcpStream>>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        tcp.set_nodelay(true).ok();

        let client = Client::connect(config, tcp.compat_write()).await?;
        Ok(TrackedClient::new(client))
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.begin().simple_query("SELECT 1").await?.into_row().await?;
        conn.finish();
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_poisoned()
    }
}

fn pool_error(e: RunError<tiberius::error::Error>, context: &str) -> SyncError {
    match e {
        RunError::User(e) => SyncError::from_tiberius(e, context),
        RunError::TimedOut => SyncError::pool("timed out waiting for a connection", context),
    }
}

const COLUMNS_QUERY: &str = r#"
    SELECT
        c.COLUMN_NAME,
        c.DATA_TYPE,
        CAST(c.CHARACTER_MAXIMUM_LENGTH AS INT),
        CAST(c.NUMERIC_PRECISION AS INT),
        CAST(ISNULL(c.NUMERIC_SCALE, c.DATETIME_PRECISION) AS INT),
        CASE WHEN c.IS_NULLABLE = 'YES' THEN 1 ELSE 0 END,
        CAST(ISNULL(sc.is_computed, 0) AS INT),
        CAST(ISNULL(sc.is_identity, 0) AS INT),
        c.ORDINAL_POSITION
    FROM INFORMATION_SCHEMA.COLUMNS c
    LEFT JOIN sys.columns sc
        ON sc.object_id = OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME))
       AND sc.name = c.COLUMN_NAME
    WHERE c.TABLE_SCHEMA = @P1 AND c.TABLE_NAME = @P2
    ORDER BY c.ORDINAL_POSITION
"#;

/// One side of a reconciliation backed by SQL Server.
pub struct MssqlPool {
    pool: Pool<TiberiusConnectionManager>,
    config: DatabaseConfig,
    side: Side,
}

impl MssqlPool {
    /// Open a pool for `config` and verify it with a round trip.
    pub async fn connect(config: &DatabaseConfig, side: Side) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .connection_timeout(Duration::from_secs(30))
            .build(manager)
            .await
            .map_err(|e| SyncError::from_tiberius(e, format!("creating {} pool", side)))?;

        // Test connection
        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| pool_error(e, &format!("testing {} connection", side)))?;
            conn.begin()
                .simple_query("SELECT 1")
                .await
                .map_err(|e| SyncError::from_tiberius(e, "connection test"))?
                .into_row()
                .await
                .map_err(|e| SyncError::from_tiberius(e, "connection test"))?;
            conn.finish();
        }

        info!(
            "Connected to {} {}:{}/{} (pool_size={})",
            side, config.host, config.port, config.database, config.max_connections
        );

        Ok(Self {
            pool,
            config: config.clone(),
            side,
        })
    }

    /// Get a pooled connection.
    async fn get_conn(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| pool_error(e, &format!("getting {} connection", self.side)))
    }

    /// Round trip returning the server version banner.
    pub async fn health_check(&self) -> Result<String> {
        let mut conn = self.get_conn().await?;
        let row = conn
            .begin()
            .simple_query("SELECT @@VERSION")
            .await
            .map_err(|e| SyncError::from_tiberius(e, "health check"))?
            .into_row()
            .await
            .map_err(|e| SyncError::from_tiberius(e, "health check"))?;
        conn.finish();
        let version = row
            .and_then(|r| r.get::<&str, _>(0).map(|s| s.lines().next().unwrap_or(s).to_string()))
            .unwrap_or_default();
        Ok(version)
    }
}

#[async_trait]
impl TableStore for MssqlPool {
    fn side(&self) -> Side {
        self.side
    }

    fn describe(&self) -> String {
        format!(
            "{}:{}/{}",
            self.config.host, self.config.port, self.config.database
        )
    }

    fn schema(&self) -> &str {
        &self.config.schema
    }

    async fn get_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let mut conn = self.get_conn().await?;
        let context = format!("introspecting {}.{} on {}", schema, table, self.side);

        let mut query = Query::new(COLUMNS_QUERY);
        query.bind(schema);
        query.bind(table);

        let rows = query
            .query(conn.begin())
            .await
            .map_err(|e| SyncError::from_tiberius(e, context.as_str()))?
            .into_first_result()
            .await
            .map_err(|e| SyncError::from_tiberius(e, context.as_str()))?;
        conn.finish();

        let int = |row: &tiberius::Row, idx: usize| -> Result<Option<i32>> {
            row.try_get::<i32, _>(idx)
                .map_err(|e| SyncError::from_tiberius(e, context.as_str()))
        };

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            let name = row
                .try_get::<&str, _>(0)
                .map_err(|e| SyncError::from_tiberius(e, context.as_str()))?
                .unwrap_or_default();
            let data_type = row
                .try_get::<&str, _>(1)
                .map_err(|e| SyncError::from_tiberius(e, context.as_str()))?
                .unwrap_or_default();
            columns.push(ColumnDescriptor {
                name: name.to_string(),
                data_type: data_type.to_string(),
                max_length: int(row, 2)?,
                precision: int(row, 3)?.and_then(|p| u8::try_from(p).ok()),
                scale: int(row, 4)?.and_then(|s| u8::try_from(s).ok()),
                is_nullable: int(row, 5)? == Some(1),
                is_computed: int(row, 6)? == Some(1),
                is_identity: int(row, 7)? == Some(1),
                ordinal_pos: int(row, 8)?.unwrap_or(0),
            });
        }

        debug!(
            "Loaded {} columns for {}.{} on {}",
            columns.len(),
            schema,
            table,
            self.side
        );
        Ok(columns)
    }

    async fn fingerprint(&self, query: &ChecksumQuery) -> Result<Fingerprint> {
        let mut conn = self.get_conn().await?;
        let context = format!("checksum of {} on {}", query.table, self.side);

        let row = conn
            .begin()
            .simple_query(query.sql.as_str())
            .await
            .map_err(|e| SyncError::from_tiberius(e, context.as_str()))?
            .into_row()
            .await
            .map_err(|e| SyncError::from_tiberius(e, context.as_str()))?;
        conn.finish();
        let row = row.ok_or_else(|| SyncError::Transient {
            context: context.clone(),
            message: "checksum query returned no row".into(),
        })?;

        let checksum = row
            .try_get::<i32, _>(0)
            .map_err(|e| SyncError::from_tiberius(e, context.as_str()))?;
        let rows = row
            .try_get::<i64, _>(1)
            .map_err(|e| SyncError::from_tiberius(e, context.as_str()))?
            .unwrap_or(0);

        Ok(query.fingerprint_from(checksum, rows))
    }

    async fn fetch_rows(&self, sql: &str, columns: &[ColumnDescriptor]) -> Result<Vec<Row>> {
        let mut conn = self.get_conn().await?;
        let context = format!("reading rows on {}", self.side);

        let rows = conn
            .begin()
            .simple_query(sql)
            .await
            .map_err(|e| SyncError::from_tiberius(e, context.as_str()))?
            .into_first_result()
            .await
            .map_err(|e| SyncError::from_tiberius(e, context.as_str()))?;
        conn.finish();

        let mut result = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(columns.len());
            for (idx, col) in columns.iter().enumerate() {
                values.push(read_value(row, idx, col)?);
            }
            result.push(values);
        }

        Ok(result)
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut conn = self.get_conn().await?;
        debug!("Executing on {}: {}", self.side, sql);
        let result = conn
            .begin()
            .execute(sql, &[])
            .await
            .map_err(|e| SyncError::from_tiberius(e, format!("executing on {}", self.side)))?;
        conn.finish();
        Ok(result.total())
    }

    async fn bulk_load(&self, qualified_table: &str, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        // Partition rows: bulk-insertable vs oversized strings
        let (oversized, bulk): (Vec<&Row>, Vec<&Row>) =
            rows.iter().partition(|r| row_has_oversized_strings(r));

        let mut conn = self.get_conn().await?;
        let mut total = 0u64;

        if !bulk.is_empty() {
            let mut bulk_load = conn
                .begin()
                .bulk_insert(qualified_table)
                .await
                .map_err(|e| SyncError::from_tiberius(e, qualified_table))?;

            for row in &bulk {
                let mut token_row = TokenRow::new();
                for value in row.iter() {
                    token_row.push(sql_value_to_column_data(value));
                }
                bulk_load
                    .send(token_row)
                    .await
                    .map_err(|e| SyncError::from_tiberius(e, qualified_table))?;
            }

            let result = bulk_load
                .finalize()
                .await
                .map_err(|e| SyncError::from_tiberius(e, qualified_table))?;
            conn.finish();
            debug!(
                "Bulk inserted {} rows into {} (reported: {})",
                bulk.len(),
                qualified_table,
                result.total()
            );
            total += bulk.len() as u64;
        }

        if !oversized.is_empty() {
            debug!(
                "Falling back to INSERT for {} rows with oversized strings in {}",
                oversized.len(),
                qualified_table
            );
            drop(conn);
            let owned: Vec<Row> = oversized.into_iter().cloned().collect();
            let columns = self.staging_columns(qualified_table).await?;
            total += self.insert_rows(qualified_table, &columns, &owned).await?;
        }

        Ok(total)
    }

    async fn insert_rows(
        &self,
        qualified_table: &str,
        columns: &[String],
        rows: &[Row],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut conn = self.get_conn().await?;
        let col_str = columns.join(", ");
        let cols_per_row = columns.len();
        let mut total_inserted = 0u64;

        for batch in rows.chunks(rows_per_insert(cols_per_row)) {
            // VALUES (@P1, @P2), (@P3, @P4), ...
            let mut value_groups = Vec::with_capacity(batch.len());
            let mut param_idx = 1;
            for _ in batch {
                let placeholders: Vec<String> = (0..cols_per_row)
                    .map(|_| {
                        let p = format!("@P{}", param_idx);
                        param_idx += 1;
                        p
                    })
                    .collect();
                value_groups.push(format!("({})", placeholders.join(", ")));
            }

            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                qualified_table,
                col_str,
                value_groups.join(", ")
            );

            let params: Vec<Box<dyn ToSql>> = batch
                .iter()
                .flat_map(|row| row.iter().map(sql_value_to_sql_param))
                .collect();
            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

            conn.begin()
                .execute(sql.as_str(), &param_refs)
                .await
                .map_err(|e| SyncError::from_tiberius(e, qualified_table).with_row_count(batch.len()))?;
            conn.finish();

            total_inserted += batch.len() as u64;
        }

        Ok(total_inserted)
    }
}

impl MssqlPool {
    /// Quoted column names of an existing table, in ordinal order.
    async fn staging_columns(&self, qualified_table: &str) -> Result<Vec<String>> {
        let mut conn = self.get_conn().await?;
        let rows = conn
            .begin()
            .query(
                "SELECT QUOTENAME(name) FROM sys.columns WHERE object_id = OBJECT_ID(@P1) ORDER BY column_id",
                &[&qualified_table],
            )
            .await
            .map_err(|e| SyncError::from_tiberius(e, qualified_table))?
            .into_first_result()
            .await
            .map_err(|e| SyncError::from_tiberius(e, qualified_table))?;
        conn.finish();
        Ok(rows
            .iter()
            .filter_map(|r| r.try_get::<&str, _>(0).ok().flatten().map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_request_poisons_connection() {
        let mut conn = TrackedClient::new(());
        let request = async {
            conn.begin();
            tokio::time::sleep(Duration::from_secs(60)).await;
            conn.finish();
        };
        assert!(tokio::time::timeout(Duration::from_secs(1), request)
            .await
            .is_err());
        assert!(conn.is_poisoned());
    }

    #[test]
    fn test_finished_request_keeps_connection() {
        let mut conn = TrackedClient::new(());
        conn.begin();
        conn.finish();
        assert!(!conn.is_poisoned());
    }
}
