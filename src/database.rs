// src/database.rs - Direct Postgres backend for the Supabase database
use anyhow::{Context, Result};
use futures::{future::BoxFuture, FutureExt, TryStreamExt};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::remote::{Filter, RemoteFetchError, RemoteQuery, RemoteSource, Row};

#[derive(Clone)]
pub struct PostgresSource {
    pool: PgPool,
}

impl PostgresSource {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to Postgres at {}:{}", config.host, config.port);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_millis(config.connection_timeout_ms))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(1800))
            .connect_with(config.connection_options())
            .await
            .context("Failed to create database connection pool")?;

        // Test connection
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("Failed to test database connection")?;

        info!("Database connection established");

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Render `query` as a parameterized statement returning one JSON object
    /// per row. Values are always bound as text and compared against the
    /// column's text form, so uuid and text owner columns behave the same.
    pub fn build_select(query: &RemoteQuery) -> Result<(String, Vec<String>), RemoteFetchError> {
        query.validate()?;

        let mut sql = format!(r#"SELECT to_jsonb(t) AS data FROM "{}" AS t"#, query.table);
        let mut binds = Vec::new();

        for (i, filter) in query.filters.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            match filter {
                Filter::Eq { column, value } => {
                    binds.push(value.clone());
                    sql.push_str(&format!(r#"t."{}"::text = ${}"#, column, binds.len()));
                }
                Filter::IsNull { column } => {
                    sql.push_str(&format!(r#"t."{}" IS NULL"#, column));
                }
            }
        }

        if let Some(order) = &query.order {
            sql.push_str(&format!(
                r#" ORDER BY t."{}" {}"#,
                order.column,
                if order.descending { "DESC" } else { "ASC" }
            ));
        }

        Ok((sql, binds))
    }

    async fn fetch_rows(&self, query: &RemoteQuery) -> Result<Vec<Row>, RemoteFetchError> {
        let (sql, binds) = Self::build_select(query)?;
        debug!("Postgres select: {}", sql);

        let mut statement = sqlx::query_scalar::<_, Value>(&sql);
        for value in binds {
            statement = statement.bind(value);
        }

        let mut stream = statement.fetch(&self.pool);
        let mut rows = Vec::new();

        while let Some(value) = stream.try_next().await? {
            match value {
                Value::Object(row) => rows.push(row),
                other => {
                    return Err(RemoteFetchError::Decode(format!(
                        "expected a JSON object per row, got {}",
                        other
                    )))
                }
            }
        }

        Ok(rows)
    }
}

impl RemoteSource for PostgresSource {
    fn select<'a>(
        &'a self,
        query: &'a RemoteQuery,
    ) -> BoxFuture<'a, Result<Vec<Row>, RemoteFetchError>> {
        self.fetch_rows(query).boxed()
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_query_sql() {
        let query = RemoteQuery::table("portfolios")
            .eq("quarter", "2024Q1")
            .eq("user_id", "u-1")
            .order("weight", true);

        let (sql, binds) = PostgresSource::build_select(&query).unwrap();

        assert_eq!(
            sql,
            r#"SELECT to_jsonb(t) AS data FROM "portfolios" AS t WHERE t."quarter"::text = $1 AND t."user_id"::text = $2 ORDER BY t."weight" DESC"#
        );
        assert_eq!(binds, vec!["2024Q1".to_string(), "u-1".to_string()]);
    }

    #[test]
    fn test_public_query_sql() {
        let query = RemoteQuery::table("portfolios")
            .is_null("user_id")
            .order("quarter", true);

        let (sql, binds) = PostgresSource::build_select(&query).unwrap();

        assert!(sql.ends_with(r#"WHERE t."user_id" IS NULL ORDER BY t."quarter" DESC"#));
        assert!(binds.is_empty());
    }

    #[test]
    fn test_unordered_query_has_no_order_clause() {
        let (sql, _) = PostgresSource::build_select(&RemoteQuery::table("portfolios")).unwrap();
        assert!(!sql.contains("ORDER BY"));
        assert!(!sql.contains("WHERE"));
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        let query = RemoteQuery::table("portfolios").eq("quarter\" OR 1=1 --", "x");
        assert!(matches!(
            PostgresSource::build_select(&query),
            Err(RemoteFetchError::InvalidQuery(_))
        ));
    }
}
