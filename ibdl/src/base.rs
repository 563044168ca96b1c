// ibdl/src/base.rs
// Base types and error definitions for the downloader.

use thiserror::Error;
use std::time::Duration;

/// Errors that can occur while talking to the venue or processing its data.
#[derive(Error, Debug, Clone)]
pub enum IbdlError {
  #[error("Configuration error: {0}")]
  ConfigurationError(String),

  #[error("Connection failed: {0}")]
  ConnectionFailed(String),

  #[error("Not connected to the venue")]
  NotConnected,

  #[error("Already connected to the venue")]
  AlreadyConnected,

  #[error("Request timeout: {0}")]
  Timeout(String),

  #[error("Duplicate request ID: {0}")]
  DuplicateRequestId(i32),

  #[error("Unknown request ID: {0}")]
  UnknownRequestId(i32),

  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),

  #[error("Validation failed: {}", .0.join("; "))]
  ValidationFailed(Vec<String>),

  #[error("Message parse error: {0}")]
  ParseError(String),

  #[error("I/O error: {0}")]
  IoError(String),

  #[error("Unsupported: {0}")]
  Unsupported(String),

  #[error("Internal error: {0}")]
  InternalError(String),

  #[error("API error: code={0}, msg={1}")]
  ApiError(i32, String),
}

impl From<std::io::Error> for IbdlError {
  fn from(e: std::io::Error) -> Self {
    IbdlError::IoError(e.to_string())
  }
}

/// Paces outbound requests so batch downloads respect the venue's limits.
#[derive(Debug)]
pub struct RequestPacer {
  requests_per_period: usize,
  period: Duration,
  request_times: Vec<std::time::Instant>,
}

impl RequestPacer {
  pub fn new(requests_per_period: usize, period: Duration) -> Self {
    RequestPacer {
      requests_per_period,
      period,
      request_times: Vec::with_capacity(requests_per_period),
    }
  }

  /// Check if a request can be made right now, recording it if so.
  pub fn check(&mut self) -> bool {
    let now = std::time::Instant::now();

    // Remove expired timestamps
    let cutoff = now.checked_sub(self.period).unwrap_or(now);
    self.request_times.retain(|&t| t > cutoff);

    if self.request_times.len() < self.requests_per_period {
      self.request_times.push(now);
      true
    } else {
      false
    }
  }

  /// Block until a request slot is available.
  pub fn wait(&mut self) {
    while !self.check() {
      std::thread::sleep(Duration::from_millis(10));
    }
  }
}
