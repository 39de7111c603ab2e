// src/rest.rs - PostgREST backend (Supabase REST API)
use anyhow::{anyhow, Context};
use futures::{future::BoxFuture, FutureExt};
use std::{error::Error as StdError, time::Duration};
use tracing::{debug, info, warn};

use crate::config::RemoteConfig;
use crate::remote::{Filter, RemoteFetchError, RemoteQuery, RemoteSource, Row};

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn format_reqwest_error(err: &reqwest::Error) -> String {
    // Keep chained causes so DNS/TLS/socket failures are visible.
    let mut message = err.to_string();
    let mut source = err.source();

    while let Some(cause) = source {
        let cause_msg = cause.to_string();
        if !cause_msg.is_empty() && !message.contains(&cause_msg) {
            message.push_str(": ");
            message.push_str(&cause_msg);
        }
        source = cause.source();
    }

    message
}

fn summarize_response_body(raw: &str) -> String {
    const MAX_CHARS: usize = 500;
    let compact = raw.replace(['\n', '\r'], " ");
    if compact.chars().count() > MAX_CHARS {
        let truncated: String = compact.chars().take(MAX_CHARS).collect();
        format!("{}…", truncated)
    } else {
        compact
    }
}

/// Client for `{url}/rest/v1/{table}` on a Supabase project.
#[derive(Debug, Clone)]
pub struct RestSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestSource {
    pub fn new(config: &RemoteConfig) -> anyhow::Result<Self> {
        let base_url = config
            .url
            .as_deref()
            .map(normalize_base_url)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| anyhow!("SUPABASE_URL is not set"))?;
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| anyhow!("SUPABASE_ANON_KEY is not set"))?;

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("Failed to build HTTP client")?;

        info!("PostgREST client ready for {}", base_url);

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// PostgREST query string: `select=*`, one pair per filter, then `order`.
    pub fn query_pairs(query: &RemoteQuery) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_string(), "*".to_string())];

        for filter in &query.filters {
            match filter {
                Filter::Eq { column, value } => {
                    pairs.push((column.clone(), format!("eq.{}", value)));
                }
                Filter::IsNull { column } => {
                    pairs.push((column.clone(), "is.null".to_string()));
                }
            }
        }

        if let Some(order) = &query.order {
            let direction = if order.descending { "desc" } else { "asc" };
            pairs.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }

        pairs
    }

    async fn fetch_rows(&self, query: &RemoteQuery) -> Result<Vec<Row>, RemoteFetchError> {
        query.validate()?;
        let url = self.table_url(&query.table);
        let pairs = Self::query_pairs(query);
        debug!("PostgREST GET {} {:?}", url, pairs);

        let response = self
            .client
            .get(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .query(&pairs)
            .send()
            .await
            .map_err(|e| RemoteFetchError::Http(format_reqwest_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("PostgREST {} returned {}", url, status);
            return Err(RemoteFetchError::Status {
                status: status.as_u16(),
                message: summarize_response_body(&body),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| RemoteFetchError::Http(format_reqwest_error(&e)))?;

        Ok(serde_json::from_str::<Vec<Row>>(&body)?)
    }
}

impl RemoteSource for RestSource {
    fn select<'a>(
        &'a self,
        query: &'a RemoteQuery,
    ) -> BoxFuture<'a, Result<Vec<Row>, RemoteFetchError>> {
        self.fetch_rows(query).boxed()
    }

    fn backend(&self) -> &'static str {
        "postgrest"
    }
}
