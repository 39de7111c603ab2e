//! Cached read access to quarterly portfolio constituents stored in a
//! Supabase project, plus the axum surface that serves them.

pub mod cache;
pub mod calculations;
pub mod config;
pub mod database;
pub mod handlers;
pub mod models;
pub mod monitoring;
pub mod remote;
pub mod rest;
pub mod service;

pub use cache::ReadThroughCache;
pub use models::{ConnectionStatus, PortfolioConstituent, QuarterSummary};
pub use remote::{RemoteFetchError, RemoteQuery, RemoteSource};
pub use service::PortfolioService;
