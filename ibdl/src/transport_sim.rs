// ibdl/src/transport_sim.rs
// Deterministic simulated venue. Outbound calls enqueue jobs; a single
// dispatcher thread replays synthetic responses into the sink, so delivery
// has the same shape as a live transport: asynchronous, ordered per request,
// on a thread that is not the caller's.

use crate::base::IbdlError;
use crate::contract::{Bar, Contract};
use crate::data::{NewsProvider, TickAttrib, TickKind};
use crate::transport::{EventSink, Transport};
use crate::validate::estimate_data_points;
use chrono::{Duration as ChronoDuration, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How the simulator treats requests for one symbol.
#[derive(Debug, Clone)]
pub enum FailureMode {
  /// Swallow the request: no data, no terminal callback, no error.
  Silent,
  /// Answer with an error callback instead of data.
  Error { code: i32, message: String },
  /// Deliver normally, but only after this delay.
  Delayed(Duration),
}

#[derive(Debug, Clone)]
pub struct SimConfig {
  /// First id announced via `next_valid_id`.
  pub start_request_id: i32,
  /// Upper bound on synthetic bars per historical request.
  pub max_bars: usize,
  /// Ticks emitted per market data subscription.
  pub tick_batch: usize,
  /// Headlines per news request.
  pub news_count: usize,
  /// Pause before each response job runs.
  pub response_delay: Duration,
  /// Skip the connect handshake entirely (for connect-timeout tests).
  pub complete_handshake: bool,
  /// Per-symbol overrides of the normal reply. News requests are keyed by
  /// `con:<contract id>` instead of symbol.
  pub failure_modes: HashMap<String, FailureMode>,
}

impl Default for SimConfig {
  fn default() -> Self {
    SimConfig {
      start_request_id: 1000,
      max_bars: 100,
      tick_batch: 25,
      news_count: 8,
      response_delay: Duration::ZERO,
      complete_handshake: true,
      failure_modes: HashMap::new(),
    }
  }
}

enum Job {
  Handshake,
  Historical { req_id: i32, contract: Contract, duration: String, bar_size: String },
  Ticks { req_id: i32, contract: Contract },
  News { req_id: i32, con_id: i32, max_results: i32 },
  Providers,
  Shutdown,
}

struct DispatchState {
  sender: Sender<Job>,
  worker: JoinHandle<()>,
}

pub struct SimTransport {
  config: SimConfig,
  connected: AtomicBool,
  dispatch: Mutex<Option<DispatchState>>,
  cancelled: Arc<Mutex<HashSet<i32>>>,
}

impl SimTransport {
  pub fn new(config: SimConfig) -> Arc<Self> {
    Arc::new(SimTransport {
      config,
      connected: AtomicBool::new(false),
      dispatch: Mutex::new(None),
      cancelled: Arc::new(Mutex::new(HashSet::new())),
    })
  }

  fn enqueue(&self, job: Job) -> Result<(), IbdlError> {
    let dispatch = self.dispatch.lock();
    match dispatch.as_ref() {
      Some(state) => state
        .sender
        .send(job)
        .map_err(|_| IbdlError::NotConnected),
      None => Err(IbdlError::NotConnected),
    }
  }
}

impl Transport for SimTransport {
  fn connect(&self, sink: Arc<dyn EventSink>) -> Result<(), IbdlError> {
    let mut dispatch = self.dispatch.lock();
    if dispatch.is_some() {
      return Err(IbdlError::AlreadyConnected);
    }
    let (sender, receiver) = unbounded();
    let worker = Dispatcher {
      sink,
      receiver,
      config: self.config.clone(),
      cancelled: Arc::clone(&self.cancelled),
    };
    let handle = std::thread::Builder::new()
      .name("ibdl-sim-delivery".to_string())
      .spawn(move || worker.run())
      .map_err(|e| IbdlError::InternalError(format!("Failed to spawn delivery thread: {}", e)))?;

    if self.config.complete_handshake {
      let _ = sender.send(Job::Handshake);
    }
    *dispatch = Some(DispatchState { sender, worker: handle });
    self.connected.store(true, Ordering::Relaxed);
    info!("Simulated venue connected");
    Ok(())
  }

  fn disconnect(&self) -> Result<(), IbdlError> {
    self.connected.store(false, Ordering::Relaxed);
    if let Some(state) = self.dispatch.lock().as_ref() {
      let _ = state.sender.send(Job::Shutdown);
    }
    Ok(())
  }

  fn is_connected(&self) -> bool {
    self.connected.load(Ordering::Relaxed)
  }

  fn join_delivery(&self, timeout: Duration) {
    let state = self.dispatch.lock().take();
    if let Some(state) = state {
      drop(state.sender);
      let deadline = Instant::now() + timeout;
      while !state.worker.is_finished() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
      }
      if state.worker.is_finished() {
        let _ = state.worker.join();
      } else {
        warn!("Delivery thread did not stop within {:?}", timeout);
      }
    }
  }

  fn request_historical_data(
    &self,
    req_id: i32,
    contract: &Contract,
    _end_date: &str,
    duration: &str,
    bar_size: &str,
    _what_to_show: &str,
    _use_rth: bool,
  ) -> Result<(), IbdlError> {
    self.enqueue(Job::Historical {
      req_id,
      contract: contract.clone(),
      duration: duration.to_string(),
      bar_size: bar_size.to_string(),
    })
  }

  fn cancel_historical_data(&self, req_id: i32) -> Result<(), IbdlError> {
    debug!("Simulated venue: cancel historical request {}", req_id);
    self.cancelled.lock().insert(req_id);
    Ok(())
  }

  fn request_market_data(&self, req_id: i32, contract: &Contract) -> Result<(), IbdlError> {
    self.enqueue(Job::Ticks { req_id, contract: contract.clone() })
  }

  fn cancel_market_data(&self, req_id: i32) -> Result<(), IbdlError> {
    debug!("Simulated venue: cancel market data {}", req_id);
    self.cancelled.lock().insert(req_id);
    Ok(())
  }

  fn request_historical_news(
    &self,
    req_id: i32,
    con_id: i32,
    _provider_codes: &str,
    _start_date: &str,
    _end_date: &str,
    max_results: i32,
  ) -> Result<(), IbdlError> {
    self.enqueue(Job::News { req_id, con_id, max_results })
  }

  fn request_news_providers(&self) -> Result<(), IbdlError> {
    self.enqueue(Job::Providers)
  }
}

struct Dispatcher {
  sink: Arc<dyn EventSink>,
  receiver: Receiver<Job>,
  config: SimConfig,
  cancelled: Arc<Mutex<HashSet<i32>>>,
}

impl Dispatcher {
  fn run(self) {
    while let Ok(job) = self.receiver.recv() {
      match job {
        Job::Shutdown => break,
        Job::Handshake => {
          self.sink.connect_ack();
          self.sink.next_valid_id(self.config.start_request_id);
        }
        Job::Historical { req_id, contract, duration, bar_size } => {
          self.serve_historical(req_id, &contract, &duration, &bar_size);
        }
        Job::Ticks { req_id, contract } => self.serve_ticks(req_id, &contract),
        Job::News { req_id, con_id, max_results } => {
          self.serve_news(req_id, con_id, max_results);
        }
        Job::Providers => {
          self.sink.news_providers(&[
            NewsProvider { code: "BRFG".to_string(), name: "Briefing.com".to_string() },
            NewsProvider { code: "DJNL".to_string(), name: "Dow Jones Newsletters".to_string() },
            NewsProvider { code: "BRFUPDN".to_string(), name: "Briefing.com Analyst Actions".to_string() },
          ]);
        }
      }
    }
    debug!("Simulated delivery thread exiting");
    self.sink.connection_closed();
  }

  /// Applies the symbol's failure mode. Returns false when the request
  /// should get no normal reply.
  fn apply_failure_mode(&self, req_id: i32, symbol: &str) -> bool {
    match self.config.failure_modes.get(symbol) {
      Some(FailureMode::Silent) => {
        debug!("Simulated venue swallowing request {} for {}", req_id, symbol);
        false
      }
      Some(FailureMode::Error { code, message }) => {
        self.sink.error(req_id, *code, message);
        false
      }
      Some(FailureMode::Delayed(delay)) => {
        std::thread::sleep(*delay);
        true
      }
      None => {
        std::thread::sleep(self.config.response_delay);
        true
      }
    }
  }

  fn is_cancelled(&self, req_id: i32) -> bool {
    self.cancelled.lock().contains(&req_id)
  }

  fn serve_historical(&self, req_id: i32, contract: &Contract, duration: &str, bar_size: &str) {
    if !self.apply_failure_mode(req_id, &contract.symbol) {
      return;
    }
    let count = estimate_data_points(duration, bar_size)
      .map(|n| n.clamp(0, self.config.max_bars as i64) as usize)
      .unwrap_or(self.config.max_bars.min(30));

    let mut rng = symbol_rng(&contract.symbol);
    let mut price: f64 = rng.random_range(50.0..500.0);
    let start = Utc::now() - ChronoDuration::days(count as i64);

    for i in 0..count {
      if self.is_cancelled(req_id) {
        debug!("Historical request {} cancelled mid-delivery", req_id);
        return;
      }
      let open = price;
      let close = open * (1.0 + rng.random_range(-0.02..0.02));
      let high = open.max(close) * (1.0 + rng.random_range(0.0..0.01));
      let low = open.min(close) * (1.0 - rng.random_range(0.0..0.01));
      let volume = rng.random_range(100_000..5_000_000);
      let date = (start + ChronoDuration::days(i as i64)).format("%Y%m%d").to_string();
      self.sink.historical_data(req_id, &Bar {
        date,
        open: round2(open),
        high: round2(high),
        low: round2(low),
        close: round2(close),
        volume,
        wap: round2((open + close) / 2.0),
        count: (volume / 100) as i32,
      });
      price = close;
    }
    let end = Utc::now().format("%Y%m%d").to_string();
    let start = start.format("%Y%m%d").to_string();
    self.sink.historical_data_end(req_id, &start, &end);
  }

  fn serve_ticks(&self, req_id: i32, contract: &Contract) {
    if !self.apply_failure_mode(req_id, &contract.symbol) {
      return;
    }
    let mut rng = symbol_rng(&contract.symbol);
    let mut price: f64 = rng.random_range(50.0..500.0);

    for _ in 0..self.config.tick_batch {
      if self.is_cancelled(req_id) {
        debug!("Market data {} cancelled mid-delivery", req_id);
        return;
      }
      price *= 1.0 + rng.random_range(-0.001..0.001);
      let spread = price * 0.0005;
      self.sink.tick_price(req_id, TickKind::Bid, round2(price - spread), TickAttrib {
        can_auto_execute: true, ..TickAttrib::default()
      });
      self.sink.tick_price(req_id, TickKind::Ask, round2(price + spread), TickAttrib {
        can_auto_execute: true, ..TickAttrib::default()
      });
      self.sink.tick_price(req_id, TickKind::Last, round2(price), TickAttrib::default());
      self.sink.tick_size(req_id, TickKind::LastSize, rng.random_range(1.0f64..500.0).round());
    }
  }

  fn serve_news(&self, req_id: i32, con_id: i32, max_results: i32) {
    if !self.apply_failure_mode(req_id, &format!("con:{}", con_id)) {
      return;
    }
    let count = self.config.news_count.min(max_results.max(0) as usize);
    let mut rng = StdRng::seed_from_u64(con_id as u64);
    let providers = ["BRFG", "DJNL", "BRFUPDN"];
    let headlines = [
      "Quarterly results beat consensus estimates",
      "Analyst initiates coverage with outperform rating",
      "Company announces expanded buyback program",
      "Sector momentum lifts shares in early trading",
      "Guidance revised ahead of investor day",
    ];
    for i in 0..count {
      if self.is_cancelled(req_id) {
        return;
      }
      let when = Utc::now() - ChronoDuration::hours(rng.random_range(1..240));
      self.sink.historical_news(
        req_id,
        &when.format("%Y-%m-%d %H:%M:%S").to_string(),
        providers[rng.random_range(0..providers.len())],
        &format!("{}#{}", con_id, i),
        headlines[rng.random_range(0..headlines.len())],
      );
    }
    self.sink.historical_news_end(req_id, count == max_results as usize);
  }
}

/// Deterministic per-symbol rng so repeated runs produce identical data.
fn symbol_rng(symbol: &str) -> StdRng {
  let seed = symbol.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
  StdRng::seed_from_u64(seed)
}

fn round2(x: f64) -> f64 {
  (x * 100.0).round() / 100.0
}
