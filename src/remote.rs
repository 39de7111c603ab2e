// src/remote.rs - Query contract for the hosted database
use futures::future::BoxFuture;
use serde_json::Value;

/// One row as returned by the remote store: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// Any failure surfaced by the remote data source.
///
/// The cache layer treats every variant the same way; the variants only
/// preserve the cause for logs and error bodies.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteFetchError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Remote returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl From<sqlx::Error> for RemoteFetchError {
    fn from(err: sqlx::Error) -> Self {
        RemoteFetchError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for RemoteFetchError {
    fn from(err: serde_json::Error) -> Self {
        RemoteFetchError::Decode(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { column: String, value: String },
    IsNull { column: String },
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq { column, .. } | Filter::IsNull { column } => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// A filtered, optionally sorted select against a single table.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteQuery {
    pub table: String,
    pub filters: Vec<Filter>,
    pub order: Option<OrderBy>,
}

impl RemoteQuery {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order: None,
        }
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(Filter::Eq {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_null(mut self, column: impl Into<String>) -> Self {
        self.filters.push(Filter::IsNull {
            column: column.into(),
        });
        self
    }

    pub fn order(mut self, column: impl Into<String>, descending: bool) -> Self {
        self.order = Some(OrderBy {
            column: column.into(),
            descending,
        });
        self
    }

    /// Table and column names end up inside SQL text or URL paths, so only
    /// plain identifiers are accepted.
    pub fn validate(&self) -> Result<(), RemoteFetchError> {
        check_identifier(&self.table)?;
        for filter in &self.filters {
            check_identifier(filter.column())?;
        }
        if let Some(order) = &self.order {
            check_identifier(&order.column)?;
        }
        Ok(())
    }
}

fn check_identifier(name: &str) -> Result<(), RemoteFetchError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit());

    if valid {
        Ok(())
    } else {
        Err(RemoteFetchError::InvalidQuery(format!(
            "'{}' is not a valid identifier",
            name
        )))
    }
}

/// Asynchronous `(table, filters, ordering) -> rows` function backing the cache.
pub trait RemoteSource: Send + Sync {
    fn select<'a>(&'a self, query: &'a RemoteQuery)
        -> BoxFuture<'a, Result<Vec<Row>, RemoteFetchError>>;

    /// Short backend label used in logs and the health endpoint.
    fn backend(&self) -> &'static str;
}
