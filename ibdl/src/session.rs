// ibdl/src/session.rs
// Session lifecycle: connect/disconnect, the readiness signal (connection
// acknowledged + first valid request id), monotonic id allocation, and the
// session-level error policy.

use crate::base::IbdlError;
use crate::config::Config;
use crate::transport::{EventSink, Transport};
use log::{error, info, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct ReadyState {
  connect_ack: bool,
  next_req_id: Option<i32>,
}

impl ReadyState {
  fn is_ready(&self) -> bool {
    self.connect_ack && self.next_req_id.is_some()
  }
}

/// One venue session shared by all managers. The callback-delivery thread and
/// issuing callers both touch it, always under the readiness lock or atomics.
pub struct Session {
  transport: Arc<dyn Transport>,
  connection_timeout: Duration,
  delivery_join_timeout: Duration,
  fatal_error_codes: Vec<i32>,
  connected: AtomicBool,
  ready: Mutex<ReadyState>,
  ready_cond: Condvar,
  // (req_id, code, message) of the most recent error callback
  last_error: Mutex<Option<(i32, i32, String)>>,
}

impl Session {
  pub fn new(transport: Arc<dyn Transport>, config: &Config) -> Arc<Self> {
    Arc::new(Session {
      transport,
      connection_timeout: config.connection_timeout(),
      delivery_join_timeout: Duration::from_secs(5),
      fatal_error_codes: config.fatal_error_codes.clone(),
      connected: AtomicBool::new(false),
      ready: Mutex::new(ReadyState::default()),
      ready_cond: Condvar::new(),
      last_error: Mutex::new(None),
    })
  }

  /// Opens the transport and blocks until the session is ready (connection
  /// acknowledged and a first valid id received) or the connection timeout
  /// elapses. A timeout tears the half-open connection down.
  pub fn connect(&self, sink: Arc<dyn EventSink>) -> Result<(), IbdlError> {
    if self.connected.load(Ordering::Relaxed) {
      return Err(IbdlError::AlreadyConnected);
    }
    info!("Connecting to venue...");
    self.transport.connect(sink)?;

    let deadline = std::time::Instant::now() + self.connection_timeout;
    let mut ready = self.ready.lock();
    while !ready.is_ready() {
      let now = std::time::Instant::now();
      if now >= deadline {
        break;
      }
      self.ready_cond.wait_for(&mut ready, deadline - now);
    }

    if ready.is_ready() {
      drop(ready);
      self.connected.store(true, Ordering::Relaxed);
      info!("Session ready");
      Ok(())
    } else {
      drop(ready);
      warn!("Connection not ready within {:?}, tearing down", self.connection_timeout);
      let _ = self.transport.disconnect();
      self.transport.join_delivery(self.delivery_join_timeout);
      Err(IbdlError::ConnectionFailed(format!(
        "Session not ready within {:?}", self.connection_timeout
      )))
    }
  }

  /// Idempotent disconnect: requests transport shutdown and joins the
  /// delivery thread with a bounded wait.
  pub fn disconnect(&self) -> Result<(), IbdlError> {
    if !self.connected.swap(false, Ordering::Relaxed) {
      return Ok(());
    }
    info!("Disconnecting from venue...");
    let result = self.transport.disconnect();
    self.transport.join_delivery(self.delivery_join_timeout);
    *self.ready.lock() = ReadyState::default();
    info!("Disconnected");
    result
  }

  pub fn is_connected(&self) -> bool {
    self.connected.load(Ordering::Relaxed)
  }

  pub fn is_ready(&self) -> bool {
    self.ready.lock().is_ready()
  }

  /// Allocates the next request id. Fails unless the session is ready, i.e.
  /// a valid starting identifier has been received.
  pub fn next_request_id(&self) -> Result<i32, IbdlError> {
    let mut ready = self.ready.lock();
    if !ready.is_ready() {
      return Err(IbdlError::NotConnected);
    }
    let id = ready.next_req_id.unwrap();
    ready.next_req_id = Some(id + 1);
    Ok(id)
  }

  pub fn transport(&self) -> &Arc<dyn Transport> {
    &self.transport
  }

  pub fn last_error(&self) -> Option<(i32, i32, String)> {
    self.last_error.lock().clone()
  }

  /// Whether this code is in the configured session-fatal set.
  pub(crate) fn is_fatal_code(&self, code: i32) -> bool {
    self.fatal_error_codes.contains(&code)
  }

  // --- Callbacks routed here by the dispatcher ---

  pub(crate) fn handle_connect_ack(&self) {
    info!("Connection acknowledged by venue");
    let mut ready = self.ready.lock();
    ready.connect_ack = true;
    if ready.is_ready() {
      self.ready_cond.notify_all();
    }
  }

  pub(crate) fn handle_next_valid_id(&self, id: i32) {
    info!("Next valid request id: {}", id);
    let mut ready = self.ready.lock();
    ready.next_req_id = Some(id);
    if ready.is_ready() {
      self.ready_cond.notify_all();
    }
  }

  /// Session-level error handling: every error is recorded; codes in the
  /// configured fatal set flip the session to not-ready immediately, even if
  /// nobody is waiting on the readiness signal.
  pub(crate) fn handle_error(&self, req_id: i32, code: i32, message: &str) {
    if (2100..3000).contains(&code) && !self.fatal_error_codes.contains(&code) {
      info!("Venue notice (id: {}, code: {}): {}", req_id, code, message);
    } else {
      error!("Venue error (id: {}, code: {}): {}", req_id, code, message);
    }
    *self.last_error.lock() = Some((req_id, code, message.to_string()));

    if self.fatal_error_codes.contains(&code) {
      warn!("Error code {} is session-fatal, marking session not-ready", code);
      self.connected.store(false, Ordering::Relaxed);
      let mut ready = self.ready.lock();
      ready.connect_ack = false;
      ready.next_req_id = None;
    }
  }

  /// Puts the session straight into the ready state, bypassing the
  /// transport handshake.
  #[cfg(test)]
  pub(crate) fn force_ready(&self, start_id: i32) {
    self.handle_connect_ack();
    self.handle_next_valid_id(start_id);
    self.connected.store(true, Ordering::Relaxed);
  }

  pub(crate) fn handle_connection_closed(&self) {
    error!("Transport reported connection closed");
    self.connected.store(false, Ordering::Relaxed);
    *self.ready.lock() = ReadyState::default();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transport::testing::NullTransport;
  use crate::transport::EventSink;
  use std::thread;

  struct NoopSink;
  impl EventSink for NoopSink {
    fn connect_ack(&self) {}
    fn next_valid_id(&self, _id: i32) {}
    fn error(&self, _req_id: i32, _code: i32, _message: &str) {}
    fn connection_closed(&self) {}
    fn historical_data(&self, _req_id: i32, _bar: &crate::contract::Bar) {}
    fn historical_data_end(&self, _req_id: i32, _start: &str, _end: &str) {}
    fn tick_price(&self, _req_id: i32, _kind: crate::data::TickKind, _price: f64, _attrib: crate::data::TickAttrib) {}
    fn tick_size(&self, _req_id: i32, _kind: crate::data::TickKind, _size: f64) {}
    fn historical_news(&self, _req_id: i32, _time: &str, _provider: &str, _article: &str, _headline: &str) {}
    fn historical_news_end(&self, _req_id: i32, _has_more: bool) {}
    fn news_providers(&self, _providers: &[crate::data::NewsProvider]) {}
  }

  fn test_config(timeout_secs: u64) -> Config {
    Config { connection_timeout: timeout_secs, ..Config::default() }
  }

  #[test]
  fn connect_succeeds_once_ack_and_id_arrive() {
    let transport = Arc::new(NullTransport::new());
    let session = Session::new(transport, &test_config(5));

    let s = session.clone();
    let helper = thread::spawn(move || {
      thread::sleep(Duration::from_millis(30));
      s.handle_connect_ack();
      s.handle_next_valid_id(100);
    });

    session.connect(Arc::new(NoopSink)).unwrap();
    helper.join().unwrap();
    assert!(session.is_connected());
    assert!(session.is_ready());
    assert_eq!(session.next_request_id().unwrap(), 100);
    assert_eq!(session.next_request_id().unwrap(), 101);
  }

  #[test]
  fn connect_times_out_and_tears_down() {
    let transport = Arc::new(NullTransport::new());
    let session = Session::new(transport.clone(), &test_config(0));
    let result = session.connect(Arc::new(NoopSink));
    assert!(matches!(result, Err(IbdlError::ConnectionFailed(_))));
    assert!(!session.is_connected());
    assert!(transport.disconnect_called());
  }

  #[test]
  fn allocation_requires_readiness() {
    let transport = Arc::new(NullTransport::new());
    let session = Session::new(transport, &test_config(1));
    assert!(matches!(session.next_request_id(), Err(IbdlError::NotConnected)));
    // Ack alone is not enough.
    session.handle_connect_ack();
    assert!(matches!(session.next_request_id(), Err(IbdlError::NotConnected)));
    session.handle_next_valid_id(7);
    assert_eq!(session.next_request_id().unwrap(), 7);
  }

  #[test]
  fn fatal_error_code_clears_readiness() {
    let transport = Arc::new(NullTransport::new());
    let session = Session::new(transport, &test_config(1));
    session.handle_connect_ack();
    session.handle_next_valid_id(50);
    session.connected.store(true, Ordering::Relaxed);

    // Request-local error leaves the session alone.
    session.handle_error(50, 162, "no data permissions");
    assert!(session.is_ready());

    // Fatal code flips not-ready even with nobody waiting.
    session.handle_error(-1, 1100, "connectivity lost");
    assert!(!session.is_ready());
    assert!(!session.is_connected());
    assert!(matches!(session.next_request_id(), Err(IbdlError::NotConnected)));
    assert_eq!(session.last_error().unwrap().1, 1100);
  }

  #[test]
  fn disconnect_is_idempotent() {
    let transport = Arc::new(NullTransport::new());
    let session = Session::new(transport, &test_config(1));
    session.disconnect().unwrap();
    session.disconnect().unwrap();
  }
}
