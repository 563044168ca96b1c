// ibdl/src/lib.rs
// Main entry point for the market-data downloader library

//! # ibdl - IBKR-style historical market data downloader
//!
//! A venue client for callback-driven market data APIs that provides:
//!
//! - Request correlation: blocking waits over an asynchronous delivery thread
//! - Historical bar downloads with pacing, batching and partial-failure reports
//! - News headline collection with retained, queryable request state
//! - Streaming tick subscriptions with bounded buffers and live analytics
//! - CSV/JSON export, config with env > file > default precedence
//! - A deterministic simulated transport for tests and offline runs

mod correlator;
pub mod base;
pub mod client;
pub mod config;
pub mod contract;
pub mod data;
pub mod export;
pub mod history_manager;
pub mod news_manager;
pub mod session;
pub mod stream_manager;
pub mod transport;
pub mod transport_sim;
pub mod validate;

pub use base::IbdlError;
pub use client::IbdlClient;
pub use config::Config;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
