// ibdl/src/news_manager.rs
// News collector: headline requests correlated by request id, with metadata
// and items retained after completion for summarization, search and export.

use crate::base::IbdlError;
use crate::config::Config;
use crate::correlator::RequestTracker;
use crate::data::{NewsItem, NewsProvider, NewsRequestInfo, NewsSummary};
use crate::export::Exporter;
use crate::session::Session;
use chrono::Utc;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Contract ids for a handful of well-known symbols, used as a fallback when
/// the caller does not supply one.
static KNOWN_CONTRACT_IDS: Lazy<HashMap<&'static str, i32>> = Lazy::new(|| {
  HashMap::from([
    ("AAPL", 265_598),
    ("GOOGL", 208_813_720),
    ("MSFT", 272_093),
    ("TSLA", 76_792_991),
    ("AMZN", 3_691_937),
  ])
});

#[derive(Serialize)]
struct NewsExport<'a> {
  request_info: Option<&'a NewsRequestInfo>,
  news_items: &'a [NewsItem],
  exported_at: chrono::DateTime<Utc>,
}

pub struct NewsManager {
  session: Arc<Session>,
  /// Per-request completion signal; torn down by the waiter like any other
  /// correlated request.
  signals: RequestTracker<()>,
  /// Retained indefinitely, unlike the signal.
  items: Mutex<HashMap<i32, Vec<NewsItem>>>,
  requests: Mutex<HashMap<i32, NewsRequestInfo>>,
  providers: RwLock<Vec<NewsProvider>>,
  providers_loaded: AtomicBool,
  data_timeout: Duration,
}

impl NewsManager {
  pub fn new(session: Arc<Session>, config: &Config) -> Arc<Self> {
    Arc::new(NewsManager {
      session,
      signals: RequestTracker::new(),
      items: Mutex::new(HashMap::new()),
      requests: Mutex::new(HashMap::new()),
      providers: RwLock::new(Vec::new()),
      providers_loaded: AtomicBool::new(false),
      data_timeout: config.data_timeout(),
    })
  }

  /// Resolves a contract id from the well-known-symbol table.
  pub fn resolve_con_id(symbol: &str) -> Option<i32> {
    KNOWN_CONTRACT_IDS.get(symbol.to_uppercase().as_str()).copied()
  }

  /// Creates metadata and an empty item accumulator for a request id before
  /// the request goes out.
  pub fn register_request(
    &self,
    req_id: i32,
    symbol: &str,
    con_id: i32,
    provider_codes: &str,
    start_date: &str,
    end_date: &str,
    max_results: i32,
  ) -> Result<(), IbdlError> {
    self.signals.register(req_id)?;
    self.requests.lock().insert(req_id, NewsRequestInfo {
      symbol: symbol.to_string(),
      con_id,
      provider_codes: provider_codes.to_string(),
      start_date: start_date.to_string(),
      end_date: end_date.to_string(),
      max_results,
      started_at: Utc::now(),
      completed: false,
      has_more: false,
      completed_at: None,
    });
    self.items.lock().insert(req_id, Vec::new());
    info!("Registered news request {} for {}", req_id, symbol);
    Ok(())
  }

  /// Blocks until the request's terminal callback or the timeout. Retained
  /// metadata and items survive resolution either way.
  pub fn wait_for_completion(&self, req_id: i32, timeout: Duration) -> Result<(), IbdlError> {
    self.signals.wait(req_id, timeout)
  }

  /// Requests historical headlines and blocks for the result. `con_id` falls
  /// back to the well-known table; a symbol that resolves nowhere is an
  /// error, not a silent skip.
  pub fn request_news(
    &self,
    symbol: &str,
    con_id: Option<i32>,
    provider_codes: &str,
    start_date: &str,
    end_date: &str,
    max_results: i32,
  ) -> Result<(i32, Vec<NewsItem>), IbdlError> {
    let con_id = match con_id.or_else(|| Self::resolve_con_id(symbol)) {
      Some(id) => id,
      None => {
        return Err(IbdlError::InvalidParameter(format!(
          "No contract ID found for {}; supply con_id explicitly", symbol
        )));
      }
    };

    let req_id = self.session.next_request_id()?;
    self.register_request(req_id, symbol, con_id, provider_codes, start_date, end_date, max_results)?;

    info!("Requesting historical news for {} (con_id: {}, req_id: {})", symbol, con_id, req_id);
    if let Err(e) = self.session.transport().request_historical_news(
      req_id, con_id, provider_codes, start_date, end_date, max_results,
    ) {
      self.signals.remove(req_id);
      return Err(e);
    }

    self.wait_for_completion(req_id, self.data_timeout)?;
    let items = self.news_items(req_id);
    info!("Received {} news items for {} (req_id: {})", items.len(), symbol, req_id);
    Ok((req_id, items))
  }

  /// Non-blocking request for the venue's provider list; the response lands
  /// in the provider cache.
  pub fn request_providers(&self) -> Result<(), IbdlError> {
    if !self.session.is_connected() {
      return Err(IbdlError::NotConnected);
    }
    info!("Requesting news providers");
    self.session.transport().request_news_providers()
  }

  pub fn providers(&self) -> Vec<NewsProvider> {
    self.providers.read().clone()
  }

  pub fn providers_loaded(&self) -> bool {
    self.providers_loaded.load(Ordering::Relaxed)
  }

  pub fn news_items(&self, req_id: i32) -> Vec<NewsItem> {
    self.items.lock().get(&req_id).cloned().unwrap_or_default()
  }

  pub fn request_info(&self, req_id: i32) -> Option<NewsRequestInfo> {
    self.requests.lock().get(&req_id).cloned()
  }

  /// Summary statistics derived purely from retained state.
  pub fn summarize(&self, req_id: i32) -> NewsSummary {
    let items = self.news_items(req_id);
    let request = self.request_info(req_id);

    let mut providers: Vec<String> = items.iter().map(|i| i.provider_code.clone()).collect();
    providers.sort();
    providers.dedup();

    NewsSummary {
      total_items: items.len(),
      providers,
      earliest: items.iter().map(|i| i.timestamp.clone()).min(),
      latest: items.iter().map(|i| i.timestamp.clone()).max(),
      sample_headlines: items.iter().take(3).map(|i| i.headline.clone()).collect(),
      request,
    }
  }

  /// Case-insensitive substring filter over retained headlines.
  pub fn search(&self, req_id: i32, keyword: &str) -> Vec<NewsItem> {
    let keyword = keyword.to_lowercase();
    self
      .news_items(req_id)
      .into_iter()
      .filter(|item| item.headline.to_lowercase().contains(&keyword))
      .collect()
  }

  /// Exports retained items to a file. Unknown formats and empty requests
  /// are a "not exported" no-op, never a crash.
  pub fn export(&self, req_id: i32, format: &str, exporter: &Exporter) -> Option<PathBuf> {
    let items = self.news_items(req_id);
    if items.is_empty() {
      warn!("No news data to export for request {}", req_id);
      return None;
    }
    let request = self.request_info(req_id);
    let symbol = request.as_ref().map(|r| r.symbol.as_str()).unwrap_or("unknown");

    let result = match format.to_lowercase().as_str() {
      "csv" => exporter.save_news_csv(&items, &format!("news_{}.csv", symbol), true),
      "json" => {
        let export = NewsExport {
          request_info: request.as_ref(),
          news_items: &items,
          exported_at: Utc::now(),
        };
        exporter.save_json(&export, &format!("news_{}.json", symbol), true)
      }
      other => {
        warn!("Unsupported news export format '{}', nothing exported", other);
        return None;
      }
    };

    match result {
      Ok(path) => Some(path),
      Err(e) => {
        warn!("Failed to export news data for request {}: {}", req_id, e);
        None
      }
    }
  }

  // --- Callbacks routed here by the dispatcher ---

  pub(crate) fn handle_news_item(
    &self,
    req_id: i32,
    time: &str,
    provider_code: &str,
    article_id: &str,
    headline: &str,
  ) -> bool {
    let mut items = self.items.lock();
    match items.get_mut(&req_id) {
      Some(list) => {
        debug!("News item for request {}: {:.50}", req_id, headline);
        list.push(NewsItem {
          timestamp: time.to_string(),
          provider_code: provider_code.to_string(),
          article_id: article_id.to_string(),
          headline: headline.to_string(),
          received_at: Utc::now(),
        });
        true
      }
      None => false,
    }
  }

  /// Terminal callback: timestamps completion on the retained metadata and
  /// wakes the waiter.
  pub(crate) fn handle_news_end(&self, req_id: i32, has_more: bool) -> bool {
    let known = {
      let mut requests = self.requests.lock();
      match requests.get_mut(&req_id) {
        Some(info) => {
          info.completed = true;
          info.has_more = has_more;
          info.completed_at = Some(Utc::now());
          true
        }
        None => false,
      }
    };
    if known {
      info!("News request {} completed, has_more: {}", req_id, has_more);
      self.signals.complete(req_id);
    }
    known
  }

  pub(crate) fn handle_providers(&self, providers: &[NewsProvider]) {
    info!("Loaded {} news providers", providers.len());
    *self.providers.write() = providers.to_vec();
    self.providers_loaded.store(true, Ordering::Relaxed);
  }

  pub(crate) fn handle_error(&self, req_id: i32, code: i32, message: &str) -> bool {
    self.signals.fail(req_id, code, message)
  }
}
