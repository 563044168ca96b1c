// ibdl/src/history_manager.rs
// Historical-bar collector: bounded, terminating bar requests correlated by
// request id, plus the paced batch downloader.

use crate::base::{IbdlError, RequestPacer};
use crate::config::Config;
use crate::contract::{Bar, BarTable, Contract};
use crate::correlator::RequestTracker;
use crate::export::Exporter;
use crate::session::Session;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Request parameters shared by single and batch downloads.
#[derive(Debug, Clone)]
pub struct BarRequestOptions {
  pub sec_type: String,
  pub exchange: String,
  pub currency: String,
  pub duration: String,
  pub bar_size: String,
  pub what_to_show: String,
  pub use_rth: bool,
  /// Empty means "up to now".
  pub end_date: String,
}

impl Default for BarRequestOptions {
  fn default() -> Self {
    BarRequestOptions {
      sec_type: "STK".to_string(),
      exchange: "SMART".to_string(),
      currency: "USD".to_string(),
      duration: "1 Y".to_string(),
      bar_size: "1 day".to_string(),
      what_to_show: "TRADES".to_string(),
      use_rth: true,
      end_date: String::new(),
    }
  }
}

impl BarRequestOptions {
  /// Options seeded from the configured defaults.
  pub fn from_config(config: &Config) -> Self {
    BarRequestOptions {
      duration: config.default_duration.clone(),
      bar_size: config.default_bar_size.clone(),
      what_to_show: config.default_what_to_show.clone(),
      use_rth: config.default_use_rth,
      ..BarRequestOptions::default()
    }
  }
}

/// Outcome of a batch download. Items are independent: a failure or timeout
/// for one symbol never aborts the rest.
#[derive(Debug, Default)]
pub struct DownloadReport {
  pub tables: HashMap<String, BarTable>,
  pub succeeded: Vec<String>,
  pub no_data: Vec<String>,
  pub timed_out: Vec<String>,
  pub failed: Vec<(String, IbdlError)>,
}

impl DownloadReport {
  pub fn total(&self) -> usize {
    self.succeeded.len() + self.no_data.len() + self.timed_out.len() + self.failed.len()
  }
}

pub struct HistoryManager {
  session: Arc<Session>,
  tracker: RequestTracker<Vec<Bar>>,
  data_timeout: Duration,
  pacer: Mutex<RequestPacer>,
}

impl HistoryManager {
  pub fn new(session: Arc<Session>, config: &Config) -> Arc<Self> {
    Arc::new(HistoryManager {
      session,
      tracker: RequestTracker::new(),
      data_timeout: config.data_timeout(),
      pacer: Mutex::new(RequestPacer::new(1, config.request_delay())),
    })
  }

  /// Requests historical bars and blocks until the terminal callback, an
  /// error callback, or the data timeout. An empty result is valid data
  /// ("zero records"), not an error.
  pub fn request_bars(&self, symbol: &str, opts: &BarRequestOptions) -> Result<BarTable, IbdlError> {
    // Forex pairs arrive as one 6-character symbol; the venue wants the base
    // symbol with the quote side in the currency field.
    let (req_symbol, req_currency) = if opts.sec_type == "CASH" && symbol.len() == 6 {
      let (base, quote) = symbol.split_at(3);
      info!("Interpreting CASH symbol '{}' as {}/{}", symbol, base, quote);
      (base, quote)
    } else {
      (symbol, opts.currency.as_str())
    };
    let contract = Contract::new(req_symbol, &opts.sec_type, &opts.exchange, req_currency);

    let req_id = self.session.next_request_id()?;
    info!(
      "Requesting historical data for {} (req_id: {}): duration={}, bar_size={}, what_to_show={}",
      symbol, req_id, opts.duration, opts.bar_size, opts.what_to_show
    );

    let transport = self.session.transport();
    let result = self.tracker.issue_and_wait(
      req_id,
      || {
        transport.request_historical_data(
          req_id, &contract, &opts.end_date, &opts.duration,
          &opts.bar_size, &opts.what_to_show, opts.use_rth,
        )
      },
      self.data_timeout,
    );

    match result {
      Ok(bars) => {
        if bars.is_empty() {
          warn!("No data received for {} (req_id: {})", symbol, req_id);
        } else {
          info!("Received {} bars for {} (req_id: {})", bars.len(), symbol, req_id);
        }
        BarTable::from_bars(bars)
      }
      Err(IbdlError::Timeout(msg)) => {
        warn!("Timeout waiting for data for {} (req_id: {}), cancelling", symbol, req_id);
        if let Err(e) = transport.cancel_historical_data(req_id) {
          debug!("Best-effort cancel for request {} failed: {}", req_id, e);
        }
        Err(IbdlError::Timeout(msg))
      }
      Err(e) => Err(e),
    }
  }

  /// Downloads several symbols sequentially with a pacing delay between
  /// requests. Each successful table is persisted immediately; failures and
  /// timeouts are recorded and the batch moves on.
  pub fn download_many(
    &self,
    symbols: &[String],
    opts: &BarRequestOptions,
    exporter: &Exporter,
    include_timestamp: bool,
  ) -> DownloadReport {
    let mut report = DownloadReport::default();

    for (i, symbol) in symbols.iter().enumerate() {
      info!("Downloading data for {} ({}/{})...", symbol, i + 1, symbols.len());
      self.pacer.lock().wait();

      match self.request_bars(symbol, opts) {
        Ok(table) if table.is_empty() => {
          warn!("No data for {}", symbol);
          report.no_data.push(symbol.clone());
        }
        Ok(table) => {
          let filename = format!("{}_historical_data.csv", symbol);
          match exporter.save_bars_csv(&table, &filename, include_timestamp) {
            Ok(path) => info!("Saved {} data to {:?}", symbol, path),
            Err(e) => warn!("Failed to persist {} data: {}", symbol, e),
          }
          report.tables.insert(symbol.clone(), table);
          report.succeeded.push(symbol.clone());
        }
        Err(IbdlError::Timeout(_)) => {
          warn!("Download timed out for {}", symbol);
          report.timed_out.push(symbol.clone());
        }
        Err(e) => {
          warn!("Failed to download data for {}: {}", symbol, e);
          report.failed.push((symbol.clone(), e));
        }
      }
    }

    info!(
      "Batch complete: {} ok, {} no-data, {} timed out, {} failed",
      report.succeeded.len(), report.no_data.len(),
      report.timed_out.len(), report.failed.len()
    );
    report
  }

  // --- Callbacks routed here by the dispatcher ---

  /// Appends one bar to the request's accumulator, in arrival order.
  pub(crate) fn handle_bar(&self, req_id: i32, bar: &Bar) -> bool {
    self.tracker.update(req_id, |bars| bars.push(bar.clone()))
  }

  /// Terminal callback carrying the covered date range.
  pub(crate) fn handle_end(&self, req_id: i32, start_date: &str, end_date: &str) -> bool {
    debug!("Historical data complete for request {} ({} to {})", req_id, start_date, end_date);
    self.tracker.complete(req_id)
  }

  pub(crate) fn handle_error(&self, req_id: i32, code: i32, message: &str) -> bool {
    self.tracker.fail(req_id, code, message)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transport::testing::NullTransport;
  use std::thread;

  fn setup(data_timeout: u64) -> (Arc<NullTransport>, Arc<Session>, Arc<HistoryManager>) {
    let config = Config {
      data_timeout,
      request_delay: 0.0,
      ..Config::default()
    };
    let transport = Arc::new(NullTransport::new());
    let session = Session::new(transport.clone(), &config);
    session.force_ready(100);
    let manager = HistoryManager::new(session.clone(), &config);
    (transport, session, manager)
  }

  fn bar(date: &str, close: f64) -> Bar {
    Bar {
      date: date.to_string(),
      open: close, high: close, low: close, close,
      volume: 100, wap: close, count: 1,
    }
  }

  /// Polls the transport until the next historical request appears.
  fn wait_for_request(transport: &NullTransport, seen: usize) -> (i32, Contract) {
    for _ in 0..200 {
      {
        let requests = transport.historical_requests.lock();
        if requests.len() > seen {
          return requests[seen].clone();
        }
      }
      thread::sleep(Duration::from_millis(5));
    }
    panic!("transport never saw the request");
  }

  #[test]
  fn bars_resolve_into_a_table() {
    let (transport, _session, manager) = setup(5);
    let m = manager.clone();
    let waiter = thread::spawn(move || m.request_bars("AAPL", &BarRequestOptions::default()));

    let (req_id, contract) = wait_for_request(&transport, 0);
    assert_eq!(contract.symbol, "AAPL");
    assert!(manager.handle_bar(req_id, &bar("20240102", 185.0)));
    assert!(manager.handle_bar(req_id, &bar("20240103", 186.0)));
    assert!(manager.handle_end(req_id, "20240102", "20240103"));

    let table = waiter.join().unwrap().unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.rows[0].close, 185.0);
  }

  #[test]
  fn forex_symbol_is_split_before_sending() {
    let (transport, _session, manager) = setup(5);
    let opts = BarRequestOptions { sec_type: "CASH".into(), ..BarRequestOptions::default() };
    let m = manager.clone();
    let waiter = thread::spawn(move || m.request_bars("EURUSD", &opts));

    let (req_id, contract) = wait_for_request(&transport, 0);
    assert_eq!(contract.symbol, "EUR");
    assert_eq!(contract.currency, "USD");
    assert_eq!(contract.sec_type, "CASH");
    manager.handle_end(req_id, "", "");
    waiter.join().unwrap().unwrap();
  }

  #[test]
  fn timeout_cancels_the_underlying_request() {
    let (transport, _session, manager) = setup(0);
    let result = manager.request_bars("AAPL", &BarRequestOptions::default());
    assert!(matches!(result, Err(IbdlError::Timeout(_))));
    let (req_id, _) = transport.historical_requests.lock()[0].clone();
    assert_eq!(*transport.historical_cancels.lock(), vec![req_id]);
  }

  #[test]
  fn error_callback_resolves_the_waiter() {
    let (transport, _session, manager) = setup(5);
    let m = manager.clone();
    let waiter = thread::spawn(move || m.request_bars("AAPL", &BarRequestOptions::default()));
    let (req_id, _) = wait_for_request(&transport, 0);
    assert!(manager.handle_error(req_id, 162, "Historical Market Data Service error"));
    match waiter.join().unwrap() {
      Err(IbdlError::ApiError(162, _)) => {}
      other => panic!("expected ApiError, got {:?}", other),
    }
  }

  #[test]
  fn empty_terminal_result_is_zero_records() {
    let (transport, _session, manager) = setup(5);
    let m = manager.clone();
    let waiter = thread::spawn(move || m.request_bars("AAPL", &BarRequestOptions::default()));
    let (req_id, _) = wait_for_request(&transport, 0);
    manager.handle_end(req_id, "", "");
    let table = waiter.join().unwrap().unwrap();
    assert!(table.is_empty());
  }

  #[test]
  fn request_ids_are_strictly_increasing() {
    let (transport, _session, manager) = setup(0);
    let _ = manager.request_bars("A", &BarRequestOptions::default());
    let _ = manager.request_bars("B", &BarRequestOptions::default());
    let requests = transport.historical_requests.lock();
    assert!(requests[1].0 > requests[0].0);
  }

  #[test]
  fn late_bar_after_timeout_is_dropped() {
    let (transport, _session, manager) = setup(0);
    let _ = manager.request_bars("AAPL", &BarRequestOptions::default());
    let (req_id, _) = transport.historical_requests.lock()[0].clone();
    assert!(!manager.handle_bar(req_id, &bar("20240102", 1.0)));
    assert!(!manager.handle_end(req_id, "", ""));
  }
}
