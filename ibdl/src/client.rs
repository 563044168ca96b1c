// ibdl/src/client.rs
// Top-level facade: owns the session and the per-domain managers, and wires
// the transport's callbacks to them through one dispatcher.

use crate::base::IbdlError;
use crate::config::Config;
use crate::contract::Bar;
use crate::data::{NewsProvider, TickAttrib, TickKind};
use crate::history_manager::HistoryManager;
use crate::news_manager::NewsManager;
use crate::session::Session;
use crate::stream_manager::StreamManager;
use crate::transport::{EventSink, Transport};
use log::warn;
use std::sync::Arc;

/// The callback hub. Implements [`EventSink`] and routes each inbound event
/// to the session or to the manager whose request id claims it; events
/// nobody claims are logged and dropped.
struct EventDispatcher {
  session: Arc<Session>,
  history: Arc<HistoryManager>,
  news: Arc<NewsManager>,
  streams: Arc<StreamManager>,
}

impl EventSink for EventDispatcher {
  fn connect_ack(&self) {
    self.session.handle_connect_ack();
  }

  fn next_valid_id(&self, id: i32) {
    self.session.handle_next_valid_id(id);
  }

  /// Request-tagged errors resolve exactly one waiter. Codes in the
  /// session-fatal set reach the session policy even when a manager claimed
  /// the id, so a tagged disconnect still flips the session to not-ready.
  fn error(&self, req_id: i32, code: i32, message: &str) {
    let claimed = req_id > 0
      && (self.history.handle_error(req_id, code, message)
        || self.news.handle_error(req_id, code, message)
        || self.streams.handle_error(req_id, code, message));
    if !claimed || self.session.is_fatal_code(code) {
      self.session.handle_error(req_id, code, message);
    }
  }

  fn connection_closed(&self) {
    self.session.handle_connection_closed();
  }

  fn historical_data(&self, req_id: i32, bar: &Bar) {
    if !self.history.handle_bar(req_id, bar) {
      warn!("Dropping bar for unknown request {}", req_id);
    }
  }

  fn historical_data_end(&self, req_id: i32, start_date: &str, end_date: &str) {
    if !self.history.handle_end(req_id, start_date, end_date) {
      warn!("Dropping terminal bar callback for unknown request {}", req_id);
    }
  }

  fn tick_price(&self, req_id: i32, kind: TickKind, price: f64, attrib: TickAttrib) {
    self.streams.handle_tick_price(req_id, kind, price, attrib);
  }

  fn tick_size(&self, req_id: i32, kind: TickKind, size: f64) {
    self.streams.handle_tick_size(req_id, kind, size);
  }

  fn historical_news(&self, req_id: i32, time: &str, provider_code: &str, article_id: &str, headline: &str) {
    if !self.news.handle_news_item(req_id, time, provider_code, article_id, headline) {
      warn!("Dropping news item for unknown request {}", req_id);
    }
  }

  fn historical_news_end(&self, req_id: i32, has_more: bool) {
    if !self.news.handle_news_end(req_id, has_more) {
      warn!("Dropping terminal news callback for unknown request {}", req_id);
    }
  }

  fn news_providers(&self, providers: &[NewsProvider]) {
    self.news.handle_providers(providers);
  }
}

/// One venue client: a session plus the historical, news and streaming
/// managers sharing it.
pub struct IbdlClient {
  config: Config,
  session: Arc<Session>,
  history: Arc<HistoryManager>,
  news: Arc<NewsManager>,
  streams: Arc<StreamManager>,
}

impl IbdlClient {
  pub fn new(transport: Arc<dyn Transport>, config: Config) -> Self {
    let session = Session::new(transport, &config);
    let history = HistoryManager::new(session.clone(), &config);
    let news = NewsManager::new(session.clone(), &config);
    let streams = StreamManager::new(session.clone());
    IbdlClient { config, session, history, news, streams }
  }

  /// Connects and blocks until the session is ready. Also starts the
  /// analytics engine so subscriptions get snapshots immediately.
  pub fn connect(&self) -> Result<(), IbdlError> {
    let dispatcher = Arc::new(EventDispatcher {
      session: self.session.clone(),
      history: self.history.clone(),
      news: self.news.clone(),
      streams: self.streams.clone(),
    });
    self.session.connect(dispatcher)?;
    self.streams.start_analytics();
    Ok(())
  }

  pub fn disconnect(&self) -> Result<(), IbdlError> {
    self.streams.stop_analytics();
    self.session.disconnect()
  }

  pub fn is_connected(&self) -> bool {
    self.session.is_connected()
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn session(&self) -> &Arc<Session> {
    &self.session
  }

  pub fn history(&self) -> &Arc<HistoryManager> {
    &self.history
  }

  pub fn news(&self) -> &Arc<NewsManager> {
    &self.news
  }

  pub fn streams(&self) -> &Arc<StreamManager> {
    &self.streams
  }
}

impl Drop for IbdlClient {
  fn drop(&mut self) {
    let _ = self.disconnect();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::export::Exporter;
  use crate::history_manager::BarRequestOptions;
  use crate::transport_sim::{FailureMode, SimConfig, SimTransport};
  use std::time::{Duration, Instant};

  fn sim_client(sim: SimConfig, config: Config) -> IbdlClient {
    IbdlClient::new(SimTransport::new(sim), config)
  }

  fn short_timeouts() -> Config {
    Config { connection_timeout: 5, data_timeout: 1, request_delay: 0.0, ..Config::default() }
  }

  fn daily_opts(duration: &str) -> BarRequestOptions {
    BarRequestOptions { duration: duration.to_string(), ..BarRequestOptions::default() }
  }

  #[test]
  fn full_historical_lifecycle() {
    let client = sim_client(SimConfig::default(), short_timeouts());
    client.connect().unwrap();
    assert!(client.is_connected());

    let table = client.history().request_bars("AAPL", &daily_opts("10 D")).unwrap();
    assert!(!table.is_empty());
    assert!(table.len() <= 10);

    client.disconnect().unwrap();
    assert!(!client.is_connected());
  }

  #[test]
  fn batch_reports_partial_failure() {
    let mut sim = SimConfig::default();
    sim.failure_modes.insert("GHOST".to_string(), FailureMode::Silent);
    let client = sim_client(sim, short_timeouts());
    client.connect().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let exporter = Exporter::new(dir.path()).unwrap();
    let symbols: Vec<String> =
      ["AAPL", "GHOST", "MSFT"].iter().map(|s| s.to_string()).collect();
    let report = client.history().download_many(&symbols, &daily_opts("5 D"), &exporter, false);

    assert_eq!(report.succeeded, vec!["AAPL", "MSFT"]);
    assert_eq!(report.timed_out, vec!["GHOST"]);
    assert!(report.failed.is_empty());
    assert_eq!(report.total(), 3);
    assert_eq!(exporter.list_files(Some(".csv")).len(), 2);
    client.disconnect().unwrap();
  }

  #[test]
  fn request_error_reaches_only_its_waiter() {
    let mut sim = SimConfig::default();
    sim.failure_modes.insert(
      "BAD".to_string(),
      FailureMode::Error { code: 200, message: "No security definition found".to_string() },
    );
    let client = sim_client(sim, short_timeouts());
    client.connect().unwrap();

    let result = client.history().request_bars("BAD", &daily_opts("5 D"));
    assert!(matches!(result, Err(IbdlError::ApiError(200, _))));
    // The session stays usable for the next request.
    let table = client.history().request_bars("AAPL", &daily_opts("5 D")).unwrap();
    assert!(!table.is_empty());
    client.disconnect().unwrap();
  }

  #[test]
  fn fatal_code_on_a_tagged_error_still_downs_the_session() {
    let mut sim = SimConfig::default();
    sim.failure_modes.insert(
      "DOOMED".to_string(),
      FailureMode::Error { code: 1100, message: "Connectivity lost".to_string() },
    );
    let client = sim_client(sim, short_timeouts());
    client.connect().unwrap();

    // The waiter is resolved with the error...
    let result = client.history().request_bars("DOOMED", &daily_opts("5 D"));
    assert!(matches!(result, Err(IbdlError::ApiError(1100, _))));
    // ...and the session policy still saw the fatal code.
    assert!(!client.session().is_ready());
    assert!(matches!(
      client.history().request_bars("AAPL", &daily_opts("5 D")),
      Err(IbdlError::NotConnected)
    ));
  }

  #[test]
  fn news_round_trip_through_the_dispatcher() {
    let client = sim_client(SimConfig::default(), short_timeouts());
    client.connect().unwrap();

    let (req_id, items) = client.news().request_news("AAPL", None, "", "", "", 20).unwrap();
    assert_eq!(items.len(), 8);
    let summary = client.news().summarize(req_id);
    assert_eq!(summary.total_items, 8);
    assert!(!client.news().request_info(req_id).unwrap().has_more);
    client.disconnect().unwrap();
  }

  #[test]
  fn streaming_ticks_arrive_and_analytics_follow() {
    let client = sim_client(SimConfig::default(), short_timeouts());
    client.connect().unwrap();

    let req_id = client.streams().subscribe("AAPL", "STK", "SMART", "USD", None).unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    while client.streams().recent_ticks(req_id, 0).len() < 100 {
      assert!(Instant::now() < deadline, "ticks never arrived");
      std::thread::sleep(Duration::from_millis(10));
    }
    while client.streams().analytics(req_id).unwrap().current_price.is_none() {
      assert!(Instant::now() < deadline, "analytics never computed");
      std::thread::sleep(Duration::from_millis(10));
    }

    let snapshot = client.streams().analytics(req_id).unwrap();
    assert!(snapshot.data_points > 0);
    assert!(snapshot.current_price.unwrap() > 0.0);
    client.streams().unsubscribe(req_id).unwrap();
    client.disconnect().unwrap();
  }

  #[test]
  fn connect_timeout_when_handshake_never_completes() {
    let sim = SimConfig { complete_handshake: false, ..SimConfig::default() };
    let config = Config { connection_timeout: 0, ..Config::default() };
    let client = sim_client(sim, config);
    assert!(matches!(client.connect(), Err(IbdlError::ConnectionFailed(_))));
    assert!(!client.is_connected());
  }
}
