// ibdl/src/stream_manager.rs
// Streaming subscription registry and analytics engine: bounded per-stream
// tick buffers fed by the delivery thread, with a background loop that
// recomputes every active stream's full snapshot once per second.

use crate::base::IbdlError;
use crate::contract::Contract;
use crate::data::{
  AnalyticsSnapshot, DashboardSummary, StreamCard, StreamInfo, Tick, TickAttrib, TickKind,
};
use crate::export::Exporter;
use crate::session::Session;
use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;
const ANALYTICS_INTERVAL: Duration = Duration::from_secs(1);

/// Caller-supplied per-stream tick callback.
pub type TickHandler = Arc<dyn Fn(&Tick) + Send + Sync>;

struct StreamEntry {
  info: StreamInfo,
  /// Fixed-capacity window; the oldest tick is evicted before appending when
  /// full.
  buffer: VecDeque<Tick>,
  snapshot: AnalyticsSnapshot,
}

pub struct StreamManager {
  session: Arc<Session>,
  capacity: usize,
  interval: Duration,
  streams: Mutex<HashMap<i32, StreamEntry>>,
  /// Handlers live outside the registry lock so user code never runs under it.
  handlers: Mutex<HashMap<i32, TickHandler>>,
  running: AtomicBool,
  worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamManager {
  pub fn new(session: Arc<Session>) -> Arc<Self> {
    Self::with_settings(session, DEFAULT_BUFFER_CAPACITY, ANALYTICS_INTERVAL)
  }

  pub fn with_settings(session: Arc<Session>, capacity: usize, interval: Duration) -> Arc<Self> {
    Arc::new(StreamManager {
      session,
      capacity,
      interval,
      streams: Mutex::new(HashMap::new()),
      handlers: Mutex::new(HashMap::new()),
      running: AtomicBool::new(false),
      worker: Mutex::new(None),
    })
  }

  /// Starts the background recomputation loop. A second start is a no-op.
  pub fn start_analytics(self: &Arc<Self>) {
    if self.running.swap(true, Ordering::SeqCst) {
      return;
    }
    let manager = Arc::clone(self);
    let handle = std::thread::Builder::new()
      .name("ibdl-analytics".to_string())
      .spawn(move || manager.analytics_loop())
      .ok();
    *self.worker.lock() = handle;
    info!("Analytics engine started");
  }

  /// Stops the loop and joins the worker thread.
  pub fn stop_analytics(&self) {
    if !self.running.swap(false, Ordering::SeqCst) {
      return;
    }
    if let Some(handle) = self.worker.lock().take() {
      let _ = handle.join();
    }
    info!("Analytics engine stopped");
  }

  /// Registers a subscription and issues the non-terminating market data
  /// request. The optional handler is invoked for every tick, after the tick
  /// has been buffered.
  pub fn subscribe(
    &self,
    symbol: &str,
    sec_type: &str,
    exchange: &str,
    currency: &str,
    handler: Option<TickHandler>,
  ) -> Result<i32, IbdlError> {
    let req_id = self.session.next_request_id()?;
    let contract = Contract::new(symbol, sec_type, exchange, currency);

    self.streams.lock().insert(req_id, StreamEntry {
      info: StreamInfo {
        req_id,
        symbol: symbol.to_string(),
        sec_type: sec_type.to_string(),
        start_time: Utc::now(),
        active: true,
      },
      buffer: VecDeque::with_capacity(self.capacity),
      snapshot: AnalyticsSnapshot::default(),
    });
    if let Some(handler) = handler {
      self.handlers.lock().insert(req_id, handler);
    }

    if let Err(e) = self.session.transport().request_market_data(req_id, &contract) {
      self.streams.lock().remove(&req_id);
      self.handlers.lock().remove(&req_id);
      return Err(e);
    }
    info!("Started streaming for {} (req_id: {})", symbol, req_id);
    Ok(req_id)
  }

  /// Cancels the underlying request and marks the subscription inactive.
  /// Buffer and last snapshot stay readable.
  pub fn unsubscribe(&self, req_id: i32) -> Result<(), IbdlError> {
    {
      let mut streams = self.streams.lock();
      let entry = streams.get_mut(&req_id).ok_or(IbdlError::UnknownRequestId(req_id))?;
      if !entry.info.active {
        return Ok(());
      }
      entry.info.active = false;
      info!("Stopped streaming for {} (req_id: {})", entry.info.symbol, req_id);
    }
    self.handlers.lock().remove(&req_id);
    self.session.transport().cancel_market_data(req_id)
  }

  /// The most recent `limit` buffered ticks, oldest first. `limit == 0`
  /// returns the whole window.
  pub fn recent_ticks(&self, req_id: i32, limit: usize) -> Vec<Tick> {
    let streams = self.streams.lock();
    match streams.get(&req_id) {
      Some(entry) => {
        let skip = if limit > 0 && entry.buffer.len() > limit {
          entry.buffer.len() - limit
        } else {
          0
        };
        entry.buffer.iter().skip(skip).cloned().collect()
      }
      None => Vec::new(),
    }
  }

  pub fn stream_info(&self, req_id: i32) -> Option<StreamInfo> {
    self.streams.lock().get(&req_id).map(|e| e.info.clone())
  }

  pub fn streams(&self) -> Vec<StreamInfo> {
    self.streams.lock().values().map(|e| e.info.clone()).collect()
  }

  pub fn analytics(&self, req_id: i32) -> Option<AnalyticsSnapshot> {
    self.streams.lock().get(&req_id).map(|e| e.snapshot.clone())
  }

  /// Read-only projection over all active streams; no state of its own.
  pub fn dashboard(&self) -> DashboardSummary {
    let streams = self.streams.lock();
    let mut cards = Vec::new();
    let mut active = 0;
    let mut total_points = 0;
    for entry in streams.values() {
      if !entry.info.active {
        continue;
      }
      active += 1;
      total_points += entry.snapshot.data_points;
      cards.push(StreamCard {
        req_id: entry.info.req_id,
        symbol: entry.info.symbol.clone(),
        sec_type: entry.info.sec_type.clone(),
        start_time: entry.info.start_time,
        data_points: entry.snapshot.data_points,
        current_price: entry.snapshot.current_price,
        price_change: entry.snapshot.price_change,
        price_change_pct: entry.snapshot.price_change_pct,
      });
    }
    cards.sort_by_key(|c| c.req_id);
    DashboardSummary {
      total_streams: streams.len(),
      active_streams: active,
      total_data_points: total_points,
      streams: cards,
      last_update: Utc::now(),
    }
  }

  /// Exports the buffered ticks. Unknown formats and empty buffers are a
  /// "not exported" no-op, never a crash.
  pub fn export(&self, req_id: i32, format: &str, exporter: &Exporter) -> Option<PathBuf> {
    let (symbol, ticks) = {
      let streams = self.streams.lock();
      let entry = streams.get(&req_id)?;
      (entry.info.symbol.clone(), entry.buffer.iter().cloned().collect::<Vec<_>>())
    };
    if ticks.is_empty() {
      warn!("No streaming data to export for request {}", req_id);
      return None;
    }

    let result = match format.to_lowercase().as_str() {
      "csv" => exporter.save_ticks_csv(&ticks, &format!("streaming_{}.csv", symbol), true),
      "json" => exporter.save_json(&ticks, &format!("streaming_{}.json", symbol), true),
      other => {
        warn!("Unsupported stream export format '{}', nothing exported", other);
        return None;
      }
    };
    match result {
      Ok(path) => Some(path),
      Err(e) => {
        warn!("Failed to export streaming data for request {}: {}", req_id, e);
        None
      }
    }
  }

  // --- Callbacks routed here by the dispatcher ---

  pub(crate) fn handle_tick_price(
    &self,
    req_id: i32,
    kind: TickKind,
    price: f64,
    attrib: TickAttrib,
  ) -> bool {
    self.deliver(Tick::new(req_id, kind, price, Some(attrib)))
  }

  pub(crate) fn handle_tick_size(&self, req_id: i32, kind: TickKind, size: f64) -> bool {
    self.deliver(Tick::new(req_id, kind, size, None))
  }

  pub(crate) fn handle_error(&self, req_id: i32, code: i32, message: &str) -> bool {
    let streams = self.streams.lock();
    match streams.get(&req_id) {
      Some(entry) => {
        warn!("Stream error for {} (req_id: {}, code: {}): {}",
              entry.info.symbol, req_id, code, message);
        true
      }
      None => false,
    }
  }

  /// Buffers a tick (evicting the oldest when full), then invokes the
  /// attached handler. A panicking handler is logged and isolated; the tick
  /// is already buffered by then.
  fn deliver(&self, tick: Tick) -> bool {
    {
      let mut streams = self.streams.lock();
      let entry = match streams.get_mut(&tick.req_id) {
        Some(entry) => entry,
        None => {
          debug!("Dropping tick for unknown stream {}", tick.req_id);
          return false;
        }
      };
      if self.capacity > 0 {
        while entry.buffer.len() >= self.capacity {
          entry.buffer.pop_front();
        }
        entry.buffer.push_back(tick.clone());
      }
    }

    let handler = self.handlers.lock().get(&tick.req_id).cloned();
    if let Some(handler) = handler {
      if catch_unwind(AssertUnwindSafe(|| handler(&tick))).is_err() {
        error!("Tick handler for stream {} panicked; tick was buffered", tick.req_id);
      }
    }
    true
  }

  fn analytics_loop(self: Arc<Self>) {
    while self.running.load(Ordering::SeqCst) {
      let ids: Vec<i32> = {
        let streams = self.streams.lock();
        streams.values().filter(|e| e.info.active).map(|e| e.info.req_id).collect()
      };
      for req_id in ids {
        // The stream may have been removed since the id list was taken.
        let ticks: Vec<Tick> = {
          let streams = self.streams.lock();
          match streams.get(&req_id) {
            Some(entry) => entry.buffer.iter().cloned().collect(),
            None => continue,
          }
        };
        let computed = catch_unwind(AssertUnwindSafe(|| compute_snapshot(&ticks)));
        match computed {
          Ok(snapshot) => {
            if let Some(entry) = self.streams.lock().get_mut(&req_id) {
              entry.snapshot = snapshot;
            }
          }
          Err(_) => error!("Analytics computation for stream {} panicked, skipping", req_id),
        }
      }

      // Sleep in slices so stop_analytics returns promptly.
      let wake = Instant::now() + self.interval;
      while self.running.load(Ordering::SeqCst) && Instant::now() < wake {
        std::thread::sleep(Duration::from_millis(25));
      }
    }
  }
}

impl Drop for StreamManager {
  fn drop(&mut self) {
    self.running.store(false, Ordering::SeqCst);
  }
}

/// Full recomputation from the current window contents. Zero-valued ticks are
/// placeholders from the venue and are excluded.
pub(crate) fn compute_snapshot(ticks: &[Tick]) -> AnalyticsSnapshot {
  let prices: Vec<f64> = ticks
    .iter()
    .filter(|t| t.kind.is_price() && t.value > 0.0)
    .map(|t| t.value)
    .collect();
  let sizes: Vec<f64> = ticks
    .iter()
    .filter(|t| t.kind.is_size() && t.value > 0.0)
    .map(|t| t.value)
    .collect();

  let mut snapshot = AnalyticsSnapshot {
    data_points: ticks.len(),
    last_update: Some(Utc::now()),
    ..AnalyticsSnapshot::default()
  };

  if let (Some(&first), Some(&last)) = (prices.first(), prices.last()) {
    let high = prices.iter().cloned().fold(f64::MIN, f64::max);
    let low = prices.iter().cloned().fold(f64::MAX, f64::min);
    snapshot.current_price = Some(last);
    snapshot.high_price = Some(high);
    snapshot.low_price = Some(low);
    snapshot.price_range = Some(high - low);
    if prices.len() > 1 && first > 0.0 {
      snapshot.price_change = last - first;
      snapshot.price_change_pct = (last - first) / first * 100.0;
    }
    snapshot.ma_5 = trailing_mean(&prices, 5);
    snapshot.ma_10 = trailing_mean(&prices, 10);
    snapshot.ma_20 = trailing_mean(&prices, 20);
    snapshot.volatility = delta_volatility(&prices);
  }

  if !sizes.is_empty() {
    snapshot.total_volume = sizes.iter().sum();
    snapshot.avg_volume = Some(snapshot.total_volume / sizes.len() as f64);
  }

  snapshot
}

fn trailing_mean(prices: &[f64], period: usize) -> Option<f64> {
  if prices.len() < period {
    return None;
  }
  Some(prices[prices.len() - period..].iter().sum::<f64>() / period as f64)
}

/// Sample standard deviation of successive price deltas. Needs at least two
/// deltas, i.e. three prices.
fn delta_volatility(prices: &[f64]) -> f64 {
  if prices.len() < 3 {
    return 0.0;
  }
  let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
  let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
  let variance =
    deltas.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (deltas.len() - 1) as f64;
  variance.sqrt()
}
