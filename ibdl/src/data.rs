// ibdl/src/data.rs
// Tick, news, stream and analytics data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a real-time tick. Price kinds carry a price in the tick value,
/// size kinds carry a size/volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickKind {
  Bid,
  Ask,
  Last,
  High,
  Low,
  Open,
  Close,
  BidSize,
  AskSize,
  LastSize,
  Volume,
}

impl TickKind {
  pub fn label(&self) -> &'static str {
    match self {
      TickKind::Bid => "BID",
      TickKind::Ask => "ASK",
      TickKind::Last => "LAST",
      TickKind::High => "HIGH",
      TickKind::Low => "LOW",
      TickKind::Open => "OPEN",
      TickKind::Close => "CLOSE",
      TickKind::BidSize => "BID_SIZE",
      TickKind::AskSize => "ASK_SIZE",
      TickKind::LastSize => "LAST_SIZE",
      TickKind::Volume => "VOLUME",
    }
  }

  pub fn is_price(&self) -> bool {
    matches!(
      self,
      TickKind::Bid | TickKind::Ask | TickKind::Last | TickKind::High
        | TickKind::Low | TickKind::Open | TickKind::Close
    )
  }

  pub fn is_size(&self) -> bool {
    !self.is_price()
  }
}

/// Execution-context flags attached to price ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickAttrib {
  pub can_auto_execute: bool,
  pub past_limit: bool,
  pub pre_open: bool,
}

/// One real-time tick as stored in a stream buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
  pub req_id: i32,
  pub kind: TickKind,
  pub label: String,
  pub value: f64,
  pub timestamp: DateTime<Utc>,
  pub attrib: Option<TickAttrib>,
}

impl Tick {
  pub fn new(req_id: i32, kind: TickKind, value: f64, attrib: Option<TickAttrib>) -> Self {
    Tick {
      req_id,
      kind,
      label: kind.label().to_string(),
      value,
      timestamp: Utc::now(),
      attrib,
    }
  }
}

/// Rolling statistics over a stream buffer, recomputed wholesale each cycle
/// so the snapshot always reflects exactly the buffer's current window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
  pub current_price: Option<f64>,
  pub high_price: Option<f64>,
  pub low_price: Option<f64>,
  pub price_change: f64,
  pub price_change_pct: f64,
  /// Sample standard deviation of successive price deltas.
  pub volatility: f64,
  pub ma_5: Option<f64>,
  pub ma_10: Option<f64>,
  pub ma_20: Option<f64>,
  pub price_range: Option<f64>,
  pub total_volume: f64,
  pub avg_volume: Option<f64>,
  pub data_points: usize,
  pub last_update: Option<DateTime<Utc>>,
}

/// A news provider as announced by the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsProvider {
  pub code: String,
  pub name: String,
}

/// One headline accumulated for a news request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
  /// Venue-supplied article timestamp, kept verbatim.
  pub timestamp: String,
  pub provider_code: String,
  pub article_id: String,
  pub headline: String,
  pub received_at: DateTime<Utc>,
}

/// Parameters and completion state of a news request. Retained after the
/// request resolves so it stays queryable and exportable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsRequestInfo {
  pub symbol: String,
  pub con_id: i32,
  pub provider_codes: String,
  pub start_date: String,
  pub end_date: String,
  pub max_results: i32,
  pub started_at: DateTime<Utc>,
  pub completed: bool,
  pub has_more: bool,
  pub completed_at: Option<DateTime<Utc>>,
}

/// Summary statistics derived from retained news state.
#[derive(Debug, Clone, Serialize)]
pub struct NewsSummary {
  pub total_items: usize,
  pub providers: Vec<String>,
  pub earliest: Option<String>,
  pub latest: Option<String>,
  pub sample_headlines: Vec<String>,
  pub request: Option<NewsRequestInfo>,
}

/// Registration record of one streaming subscription.
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
  pub req_id: i32,
  pub symbol: String,
  pub sec_type: String,
  pub start_time: DateTime<Utc>,
  pub active: bool,
}

/// Per-stream line of the dashboard projection.
#[derive(Debug, Clone, Serialize)]
pub struct StreamCard {
  pub req_id: i32,
  pub symbol: String,
  pub sec_type: String,
  pub start_time: DateTime<Utc>,
  pub data_points: usize,
  pub current_price: Option<f64>,
  pub price_change: f64,
  pub price_change_pct: f64,
}

/// Read-only aggregation over all active streams.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
  pub total_streams: usize,
  pub active_streams: usize,
  pub total_data_points: usize,
  pub streams: Vec<StreamCard>,
  pub last_update: DateTime<Utc>,
}
