// src/monitoring.rs - Request timing and per-endpoint counters
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::warn;

use crate::handlers::AppState;

/// Bucket for requests that matched no route, so arbitrary paths cannot
/// add endpoint entries.
pub const UNMATCHED_ENDPOINT: &str = "<unmatched>";

#[derive(Debug, Default)]
pub struct EndpointStats {
    pub request_count: AtomicU64,
    pub error_count: AtomicU64,
    pub total_response_time_us: AtomicU64,
    pub max_response_time_us: AtomicU64,
}

impl EndpointStats {
    fn record(&self, response_time: Duration, is_success: bool) {
        let response_time_us = response_time.as_micros() as u64;

        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add(response_time_us, Ordering::Relaxed);
        self.max_response_time_us
            .fetch_max(response_time_us, Ordering::Relaxed);

        if !is_success {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointSummary {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_response_time_ms: f64,
    pub max_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub uptime_seconds: f64,
    pub endpoints: HashMap<String, EndpointSummary>,
}

/// Request counters owned by the application state.
pub struct RequestMonitor {
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    endpoints: Arc<DashMap<String, EndpointStats>>,
    start_time: Instant,
    slow_threshold: Duration,
}

impl RequestMonitor {
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            endpoints: Arc::new(DashMap::new()),
            start_time: Instant::now(),
            slow_threshold,
        }
    }

    pub fn record_request(&self, endpoint: &str, response_time: Duration, status_code: u16) {
        let is_success = status_code < 400;

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !is_success {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        self.endpoints
            .entry(endpoint.to_string())
            .or_default()
            .record(response_time, is_success);

        if response_time > self.slow_threshold {
            warn!(
                "Slow request: {} took {}ms (status: {})",
                endpoint,
                response_time.as_millis(),
                status_code
            );
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn summary(&self) -> MetricsSummary {
        let endpoints = self
            .endpoints
            .iter()
            .map(|entry| {
                let stats = entry.value();
                let count = stats.request_count.load(Ordering::Relaxed);
                let total_us = stats.total_response_time_us.load(Ordering::Relaxed);
                let summary = EndpointSummary {
                    request_count: count,
                    error_count: stats.error_count.load(Ordering::Relaxed),
                    avg_response_time_ms: if count > 0 {
                        total_us as f64 / count as f64 / 1000.0
                    } else {
                        0.0
                    },
                    max_response_time_ms: stats.max_response_time_us.load(Ordering::Relaxed)
                        as f64
                        / 1000.0,
                };
                (entry.key().clone(), summary)
            })
            .collect();

        MetricsSummary {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            uptime_seconds: self.uptime().as_secs_f64(),
            endpoints,
        }
    }
}

/// Middleware recording every request against its route template
pub async fn performance_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();

    // Route template keeps `/portfolio/:quarter` as one endpoint
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ENDPOINT.to_string());

    let response = next.run(request).await;

    state
        .monitor
        .record_request(&endpoint, start.elapsed(), response.status().as_u16());

    response
}
