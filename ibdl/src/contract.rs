// ibdl/src/contract.rs
// Contract specification and historical bar records.

use crate::base::IbdlError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Instrument specification sent with every data request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
  pub symbol: String,
  pub sec_type: String,
  pub exchange: String,
  pub currency: String,
}

impl Contract {
  pub fn new(symbol: &str, sec_type: &str, exchange: &str, currency: &str) -> Self {
    Contract {
      symbol: symbol.to_string(),
      sec_type: sec_type.to_string(),
      exchange: exchange.to_string(),
      currency: currency.to_string(),
    }
  }

  /// SMART-routed USD stock, the common case.
  pub fn stock(symbol: &str) -> Self {
    Contract::new(symbol, "STK", "SMART", "USD")
  }
}

/// One bar as delivered by the venue. The date stays in the venue's string
/// format until the terminal callback converts the accumulated bars into a
/// [`BarTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
  pub date: String,
  pub open: f64,
  pub high: f64,
  pub low: f64,
  pub close: f64,
  pub volume: i64,
  pub wap: f64,
  pub count: i32,
}

/// One row of a finished bar table, keyed by its parsed timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRow {
  pub time: DateTime<Utc>,
  pub open: f64,
  pub high: f64,
  pub low: f64,
  pub close: f64,
  pub volume: i64,
  pub wap: f64,
  pub count: i32,
}

/// Time-indexed table of historical bars in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BarTable {
  pub rows: Vec<BarRow>,
}

/// Column names, in export order.
pub const BAR_COLUMNS: [&str; 7] = ["open", "high", "low", "close", "volume", "wap", "count"];

impl BarTable {
  /// Converts accumulated bars into a table, parsing each date field into the
  /// row key. Arrival order is preserved; no re-sorting.
  pub fn from_bars(bars: Vec<Bar>) -> Result<BarTable, IbdlError> {
    let mut rows = Vec::with_capacity(bars.len());
    for bar in bars {
      let time = parse_bar_date(&bar.date)?;
      rows.push(BarRow {
        time,
        open: bar.open,
        high: bar.high,
        low: bar.low,
        close: bar.close,
        volume: bar.volume,
        wap: bar.wap,
        count: bar.count,
      });
    }
    Ok(BarTable { rows })
  }

  pub fn is_empty(&self) -> bool {
    self.rows.is_empty()
  }

  pub fn len(&self) -> usize {
    self.rows.len()
  }

  pub fn summary(&self, symbol: &str) -> DataSummary {
    DataSummary {
      symbol: symbol.to_string(),
      records: self.rows.len(),
      start_date: self.rows.iter().map(|r| r.time).min(),
      end_date: self.rows.iter().map(|r| r.time).max(),
      columns: BAR_COLUMNS.iter().map(|c| c.to_string()).collect(),
    }
  }
}

/// Summary of one downloaded table, shown by the CLI `--summary` flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSummary {
  pub symbol: String,
  pub records: usize,
  pub start_date: Option<DateTime<Utc>>,
  pub end_date: Option<DateTime<Utc>>,
  pub columns: Vec<String>,
}

/// Parses the venue's bar date formats: `YYYYMMDD` for daily bars,
/// `YYYYMMDD HH:MM:SS` for intraday, plus the hyphenated forms our own CSV
/// export writes.
pub fn parse_bar_date(s: &str) -> Result<DateTime<Utc>, IbdlError> {
  let s = s.trim();
  if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y%m%d %H:%M:%S") {
    return Ok(Utc.from_utc_datetime(&dt));
  }
  if let Ok(d) = NaiveDate::parse_from_str(s, "%Y%m%d") {
    return Ok(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap()));
  }
  if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
    return Ok(Utc.from_utc_datetime(&dt));
  }
  if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
    return Ok(Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap()));
  }
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Ok(dt.with_timezone(&Utc));
  }
  Err(IbdlError::ParseError(format!("Unrecognized bar date: '{}'", s)))
}
