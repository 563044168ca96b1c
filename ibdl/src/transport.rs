// ibdl/src/transport.rs
// The venue boundary: one trait for outbound calls and one for inbound
// callbacks. A transport implementation owns the socket/handshake and a
// delivery thread that feeds the sink; everything above it correlates
// callbacks by request id.

use crate::base::IbdlError;
use crate::contract::{Bar, Contract};
use crate::data::{NewsProvider, TickAttrib, TickKind};
use std::sync::Arc;
use std::time::Duration;

/// Outbound calls to the venue. Every data request takes a caller-chosen
/// request id; the matching responses come back through [`EventSink`] tagged
/// with the same id.
pub trait Transport: Send + Sync {
  /// Opens the transport and starts the callback-delivery thread feeding
  /// `sink`. Returns once the transport is running; session readiness is
  /// signalled asynchronously via `connect_ack` and `next_valid_id`.
  fn connect(&self, sink: Arc<dyn EventSink>) -> Result<(), IbdlError>;

  /// Requests shutdown of the transport and its delivery thread.
  fn disconnect(&self) -> Result<(), IbdlError>;

  fn is_connected(&self) -> bool;

  /// Bounded join of the callback-delivery thread after `disconnect`.
  fn join_delivery(&self, timeout: Duration);

  fn request_historical_data(
    &self,
    req_id: i32,
    contract: &Contract,
    end_date: &str,
    duration: &str,
    bar_size: &str,
    what_to_show: &str,
    use_rth: bool,
  ) -> Result<(), IbdlError>;

  fn cancel_historical_data(&self, req_id: i32) -> Result<(), IbdlError>;

  /// Starts a non-terminating market data stream.
  fn request_market_data(&self, req_id: i32, contract: &Contract) -> Result<(), IbdlError>;

  fn cancel_market_data(&self, req_id: i32) -> Result<(), IbdlError>;

  fn request_historical_news(
    &self,
    req_id: i32,
    con_id: i32,
    provider_codes: &str,
    start_date: &str,
    end_date: &str,
    max_results: i32,
  ) -> Result<(), IbdlError>;

  fn request_news_providers(&self) -> Result<(), IbdlError>;
}

/// Inbound callbacks from the venue, delivered on the transport's own thread.
/// Implementations must never block waiting on application-level signals:
/// they post results and return.
pub trait EventSink: Send + Sync {
  /// The venue acknowledged the connection.
  fn connect_ack(&self);

  /// First valid request identifier; arrives once after `connect_ack` and
  /// completes session readiness.
  fn next_valid_id(&self, id: i32);

  /// Error callback. `req_id > 0` ties the error to one pending request;
  /// otherwise it is session-level.
  fn error(&self, req_id: i32, code: i32, message: &str);

  /// The transport detected the connection went away.
  fn connection_closed(&self);

  fn historical_data(&self, req_id: i32, bar: &Bar);
  fn historical_data_end(&self, req_id: i32, start_date: &str, end_date: &str);

  fn tick_price(&self, req_id: i32, kind: TickKind, price: f64, attrib: TickAttrib);
  fn tick_size(&self, req_id: i32, kind: TickKind, size: f64);

  fn historical_news(&self, req_id: i32, time: &str, provider_code: &str, article_id: &str, headline: &str);
  fn historical_news_end(&self, req_id: i32, has_more: bool);
  fn news_providers(&self, providers: &[NewsProvider]);
}

#[cfg(test)]
pub(crate) mod testing {
  use super::*;
  use parking_lot::Mutex;
  use std::sync::atomic::{AtomicBool, Ordering};

  /// Transport stub that accepts every call and records it. Tests drive the
  /// sink directly instead of through a delivery thread.
  #[derive(Default)]
  pub(crate) struct NullTransport {
    connected: AtomicBool,
    disconnected: AtomicBool,
    pub(crate) historical_requests: Mutex<Vec<(i32, Contract)>>,
    pub(crate) historical_cancels: Mutex<Vec<i32>>,
    pub(crate) market_requests: Mutex<Vec<i32>>,
    pub(crate) market_cancels: Mutex<Vec<i32>>,
    pub(crate) news_requests: Mutex<Vec<i32>>,
  }

  impl NullTransport {
    pub(crate) fn new() -> Self {
      NullTransport::default()
    }

    pub(crate) fn disconnect_called(&self) -> bool {
      self.disconnected.load(Ordering::Relaxed)
    }
  }

  impl Transport for NullTransport {
    fn connect(&self, _sink: Arc<dyn EventSink>) -> Result<(), IbdlError> {
      self.connected.store(true, Ordering::Relaxed);
      Ok(())
    }

    fn disconnect(&self) -> Result<(), IbdlError> {
      self.connected.store(false, Ordering::Relaxed);
      self.disconnected.store(true, Ordering::Relaxed);
      Ok(())
    }

    fn is_connected(&self) -> bool {
      self.connected.load(Ordering::Relaxed)
    }

    fn join_delivery(&self, _timeout: Duration) {}

    fn request_historical_data(
      &self,
      req_id: i32,
      contract: &Contract,
      _end_date: &str,
      _duration: &str,
      _bar_size: &str,
      _what_to_show: &str,
      _use_rth: bool,
    ) -> Result<(), IbdlError> {
      self.historical_requests.lock().push((req_id, contract.clone()));
      Ok(())
    }

    fn cancel_historical_data(&self, req_id: i32) -> Result<(), IbdlError> {
      self.historical_cancels.lock().push(req_id);
      Ok(())
    }

    fn request_market_data(&self, req_id: i32, _contract: &Contract) -> Result<(), IbdlError> {
      self.market_requests.lock().push(req_id);
      Ok(())
    }

    fn cancel_market_data(&self, req_id: i32) -> Result<(), IbdlError> {
      self.market_cancels.lock().push(req_id);
      Ok(())
    }

    fn request_historical_news(
      &self,
      req_id: i32,
      _con_id: i32,
      _provider_codes: &str,
      _start_date: &str,
      _end_date: &str,
      _max_results: i32,
    ) -> Result<(), IbdlError> {
      self.news_requests.lock().push(req_id);
      Ok(())
    }

    fn request_news_providers(&self) -> Result<(), IbdlError> {
      Ok(())
    }
  }
}
