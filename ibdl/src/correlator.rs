// ibdl/src/correlator.rs
// Pending-request table shared by all blocking collectors: one bookkeeping
// entry per in-flight request id, resolved exactly once by a terminal
// callback, an error callback, or the waiter's timeout. The entry is removed
// on every resolution path, so a late callback finds nothing and is dropped.

use crate::base::IbdlError;
use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug)]
struct PendingState<P> {
  payload: P,
  completed: bool,
  error: Option<(i32, String)>,
}

/// Correlates numbered requests with their asynchronous resolutions. `P` is
/// the accumulated payload type (bars, news items, unit for pure signals).
#[derive(Debug)]
pub struct RequestTracker<P> {
  states: Mutex<HashMap<i32, PendingState<P>>>,
  cond: Condvar,
}

impl<P: Default + Send + 'static> RequestTracker<P> {
  pub fn new() -> Self {
    RequestTracker {
      states: Mutex::new(HashMap::new()),
      cond: Condvar::new(),
    }
  }

  /// Registers bookkeeping for a request id before the request is sent.
  pub fn register(&self, req_id: i32) -> Result<(), IbdlError> {
    let mut states = self.states.lock();
    if states.contains_key(&req_id) {
      return Err(IbdlError::DuplicateRequestId(req_id));
    }
    states.insert(req_id, PendingState { payload: P::default(), completed: false, error: None });
    Ok(())
  }

  /// Removes bookkeeping without resolving, e.g. when the send itself failed.
  pub fn remove(&self, req_id: i32) {
    self.states.lock().remove(&req_id);
  }

  pub fn contains(&self, req_id: i32) -> bool {
    self.states.lock().contains_key(&req_id)
  }

  /// Applies a data callback to the accumulator. Returns false when no entry
  /// exists (timed out or never registered); the caller logs and drops.
  pub fn update(&self, req_id: i32, f: impl FnOnce(&mut P)) -> bool {
    let mut states = self.states.lock();
    match states.get_mut(&req_id) {
      Some(state) => {
        f(&mut state.payload);
        true
      }
      None => {
        trace!("Data callback for request {} has no registered waiter, dropping", req_id);
        false
      }
    }
  }

  /// Terminal success callback: marks the entry complete and wakes waiters.
  pub fn complete(&self, req_id: i32) -> bool {
    let mut states = self.states.lock();
    match states.get_mut(&req_id) {
      Some(state) => {
        state.completed = true;
        self.cond.notify_all();
        true
      }
      None => {
        debug!("Terminal callback for request {} has no registered waiter, dropping", req_id);
        false
      }
    }
  }

  /// Error callback routed to this id: stores the error and wakes waiters so
  /// they are not blocked forever waiting for a success that will never come.
  pub fn fail(&self, req_id: i32, code: i32, message: &str) -> bool {
    let mut states = self.states.lock();
    match states.get_mut(&req_id) {
      Some(state) => {
        warn!("Error routed to pending request {}: code={}, msg={}", req_id, code, message);
        state.error = Some((code, message.to_string()));
        self.cond.notify_all();
        true
      }
      None => false,
    }
  }

  /// Registers `req_id`, invokes the send closure, and blocks until the
  /// request resolves or `timeout` elapses. Bookkeeping is gone by the time
  /// this returns, whatever the outcome.
  pub fn issue_and_wait<F>(&self, req_id: i32, send: F, timeout: Duration) -> Result<P, IbdlError>
  where
    F: FnOnce() -> Result<(), IbdlError>,
  {
    self.register(req_id)?;
    if let Err(e) = send() {
      self.remove(req_id);
      return Err(e);
    }
    self.wait(req_id, timeout)
  }

  /// Blocks the calling thread until the entry resolves or `timeout` elapses.
  pub fn wait(&self, req_id: i32, timeout: Duration) -> Result<P, IbdlError> {
    let start_time = std::time::Instant::now();
    let mut guard = self.states.lock();

    loop {
      // 1. Check state before waiting
      if let Some(result) = Self::check_resolved(&mut guard, req_id) {
        return result;
      }

      // 2. Remaining timeout
      let elapsed = start_time.elapsed();
      if elapsed >= timeout {
        guard.remove(&req_id);
        return Err(IbdlError::Timeout(format!("Request {} timed out after {:?}", req_id, timeout)));
      }
      let remaining = timeout - elapsed;

      // 3. Wait
      let wait_result = self.cond.wait_for(&mut guard, remaining);

      // 4. Re-check once after a timed-out wait; the resolution may have
      //    landed concurrently.
      if wait_result.timed_out() {
        if let Some(result) = Self::check_resolved(&mut guard, req_id) {
          return result;
        }
        guard.remove(&req_id);
        return Err(IbdlError::Timeout(format!("Request {} timed out after wait", req_id)));
      }
    }
  }

  fn check_resolved(
    guard: &mut HashMap<i32, PendingState<P>>,
    req_id: i32,
  ) -> Option<Result<P, IbdlError>> {
    let state = match guard.get_mut(&req_id) {
      Some(s) => s,
      None => {
        return Some(Err(IbdlError::InternalError(format!(
          "Request state for {} missing during wait", req_id
        ))));
      }
    };
    if let Some((code, msg)) = state.error.clone() {
      guard.remove(&req_id);
      return Some(Err(IbdlError::ApiError(code, msg)));
    }
    if state.completed {
      let payload = std::mem::take(&mut state.payload);
      guard.remove(&req_id);
      return Some(Ok(payload));
    }
    None
  }
}
