// src/models.rs - Records, summaries and API models
use axum::{http::StatusCode, response::Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::remote::RemoteFetchError;

// === TABLE RECORDS ===

/// One stock held in a quarterly portfolio. Owned by the remote store; the
/// service only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioConstituent {
    pub id: i64,
    #[serde(default)]
    pub user_id: Option<String>,
    pub quarter: String,
    pub stock_name: String,
    pub stock_code: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    pub weight: f64,
    pub returns: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate over the constituents sharing a quarter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarterSummary {
    pub quarter: String,
    pub total_stocks: usize,
    pub avg_returns: f64,
    pub total_weight: f64,
}

// === STATUS MODELS ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    #[serde(rename = "isConnected")]
    pub is_connected: bool,
    #[serde(rename = "retryCount")]
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheKeyStatus {
    pub key: String,
    pub age_seconds: f64,
    pub fresh: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub stale_fallbacks: u64,
    pub default_fallbacks: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatusReport {
    pub freshness_window_secs: u64,
    pub total_entries: usize,
    pub entries: Vec<CacheKeyStatus>,
    pub portfolio: CacheCounters,
    pub summaries: CacheCounters,
}

// === REQUEST MODELS ===

#[derive(Debug, Default, Deserialize)]
pub struct OwnerQuery {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

impl OwnerQuery {
    /// An empty `userId=` means the public portfolio.
    pub fn owner(&self) -> Option<&str> {
        crate::cache::owner_id(self.user_id.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearCacheQuery {
    pub pattern: Option<String>,
}

// === RESPONSE MODELS ===

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: String,
    pub cached_entries: usize,
    pub uptime_seconds: f64,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// === ERROR TYPES ===

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Remote fetch failed: {0}")]
    Remote(#[from] RemoteFetchError),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl ApiError {
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            ApiError::Remote(_) => StatusCode::BAD_GATEWAY,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.to_string(),
        }
    }
}

impl From<ApiError> for (StatusCode, Json<ErrorResponse>) {
    fn from(err: ApiError) -> Self {
        (err.to_status_code(), Json(err.to_error_response()))
    }
}

// === VALIDATION ===

pub struct ValidationRules;

impl ValidationRules {
    /// Quarter labels are short tokens such as `2024Q1` or `Q3-2023`
    pub fn validate_quarter(quarter: &str) -> Result<(), String> {
        if quarter.is_empty() {
            return Err("Quarter cannot be empty".to_string());
        }

        if quarter.len() > constants::MAX_QUARTER_LENGTH {
            return Err(format!(
                "Quarter too long (max {} characters)",
                constants::MAX_QUARTER_LENGTH
            ));
        }

        if !quarter
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err("Quarter contains invalid characters".to_string());
        }

        Ok(())
    }
}

// === TYPE ALIASES ===

pub type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

// === CONSTANTS ===

pub mod constants {
    /// Table holding the portfolio constituents
    pub const PORTFOLIO_TABLE: &str = "portfolios";

    /// Age after which a cache entry is refreshed on the next read
    pub const CACHE_FRESHNESS_SECS: u64 = 300; // 5 minutes

    /// Key segment used when no user is given
    pub const PUBLIC_OWNER: &str = "public";

    pub const PORTFOLIO_KEY_PREFIX: &str = "portfolio_";
    pub const QUARTERS_KEY_PREFIX: &str = "quarters_summary_";

    pub const MAX_QUARTER_LENGTH: usize = 16;
}
