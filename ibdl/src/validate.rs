// ibdl/src/validate.rs
// Pre-flight validation of request parameters. Everything here runs before
// any network call; violations are collected, not short-circuited.

use crate::base::IbdlError;
use chrono::Duration;

pub const SUPPORTED_BAR_SIZES: [&str; 20] = [
  "1 sec", "5 secs", "10 secs", "15 secs", "30 secs",
  "1 min", "2 mins", "3 mins", "5 mins", "10 mins", "15 mins", "20 mins", "30 mins",
  "1 hour", "2 hours", "3 hours", "4 hours", "8 hours",
  "1 day", "1 week",
];

pub const SUPPORTED_WHAT_TO_SHOW: [&str; 13] = [
  "TRADES", "MIDPOINT", "BID", "ASK", "BID_ASK",
  "HISTORICAL_VOLATILITY", "OPTION_IMPLIED_VOLATILITY",
  "REBATE_RATE", "FEE_RATE", "YIELD_BID", "YIELD_ASK", "YIELD_BID_ASK", "YIELD_LAST",
];

pub const SUPPORTED_SEC_TYPES: [&str; 8] = [
  "STK", "OPT", "FUT", "CASH", "BOND", "CFD", "FUND", "NEWS",
];

/// Parses a venue duration string like "1 Y", "6 M", "30 D" into a duration.
pub fn parse_duration(duration_str: &str) -> Result<Duration, IbdlError> {
  let parts: Vec<&str> = duration_str.split_whitespace().collect();
  if parts.len() != 2 {
    return Err(IbdlError::InvalidParameter(format!(
      "Invalid duration string: {}", duration_str
    )));
  }
  let value: i64 = parts[0].parse().map_err(|_| {
    IbdlError::InvalidParameter(format!("Invalid duration value: {}", parts[0]))
  })?;
  // Checked arithmetic throughout: an absurd-but-parseable count must come
  // back as a violation, not an overflow panic.
  let out_of_range =
    || IbdlError::InvalidParameter(format!("Invalid duration value: {}", parts[0]));
  match parts[1].to_uppercase().as_str() {
    "Y" | "YEAR" | "YEARS" => value
      .checked_mul(365)
      .and_then(Duration::try_days)
      .ok_or_else(out_of_range),
    "M" | "MONTH" | "MONTHS" => value
      .checked_mul(30)
      .and_then(Duration::try_days)
      .ok_or_else(out_of_range),
    "W" | "WEEK" | "WEEKS" => Duration::try_weeks(value).ok_or_else(out_of_range),
    "D" | "DAY" | "DAYS" => Duration::try_days(value).ok_or_else(out_of_range),
    "H" | "HOUR" | "HOURS" => Duration::try_hours(value).ok_or_else(out_of_range),
    unit => Err(IbdlError::InvalidParameter(format!("Unknown duration unit: {}", unit))),
  }
}

/// Symbols are plain alphanumerics plus dots and hyphens.
pub fn validate_symbol(symbol: &str) -> bool {
  let s = symbol.trim();
  !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

/// Validates one batch of download parameters, returning every violation so a
/// caller can fix all of them at once. Empty means valid.
pub fn validate_download_parameters(
  symbols: &[String],
  duration: &str,
  bar_size: &str,
  sec_type: &str,
  what_to_show: &str,
) -> Vec<String> {
  let mut errors = Vec::new();

  if symbols.is_empty() {
    errors.push("No symbols provided".to_string());
  } else {
    for symbol in symbols {
      if !validate_symbol(symbol) {
        errors.push(format!("Invalid symbol format: {}", symbol));
      }
    }
  }

  if !SUPPORTED_BAR_SIZES.contains(&bar_size) {
    errors.push(format!("Unsupported bar size: {}", bar_size));
  }
  if !SUPPORTED_SEC_TYPES.contains(&sec_type) {
    errors.push(format!("Unsupported security type: {}", sec_type));
  }
  if !SUPPORTED_WHAT_TO_SHOW.contains(&what_to_show) {
    errors.push(format!("Unsupported what to show: {}", what_to_show));
  }
  if let Err(e) = parse_duration(duration) {
    errors.push(format!("Invalid duration: {}", e));
  }

  errors
}

/// Rough estimate of how many bars a duration/bar-size pair will produce.
/// Returns None when the bar size cannot be interpreted.
pub fn estimate_data_points(duration: &str, bar_size: &str) -> Option<i64> {
  let duration_secs = parse_duration(duration).ok()?.num_seconds();

  let parts: Vec<&str> = bar_size.split_whitespace().collect();
  if parts.len() != 2 {
    return None;
  }
  let value: i64 = parts[0].parse().ok()?;
  let bar_secs = match parts[1].to_lowercase().as_str() {
    "sec" | "secs" | "second" | "seconds" => value,
    "min" | "mins" | "minute" | "minutes" => value * 60,
    "hour" | "hours" => value * 3600,
    "day" | "days" => value * 86_400,
    "week" | "weeks" => value * 604_800,
    _ => return None,
  };
  if bar_secs == 0 {
    return None;
  }
  Some(duration_secs / bar_secs)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn syms(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn parses_common_durations() {
    assert_eq!(parse_duration("1 Y").unwrap(), Duration::days(365));
    assert_eq!(parse_duration("6 M").unwrap(), Duration::days(180));
    assert_eq!(parse_duration("2 W").unwrap(), Duration::weeks(2));
    assert_eq!(parse_duration("30 D").unwrap(), Duration::days(30));
    assert_eq!(parse_duration("4 hours").unwrap(), Duration::hours(4));
  }

  #[test]
  fn rejects_unknown_duration_unit() {
    let err = parse_duration("2 X").unwrap_err();
    assert!(err.to_string().contains("Unknown duration unit: X"), "{}", err);
  }

  #[test]
  fn rejects_malformed_durations() {
    assert!(parse_duration("1Y").is_err());
    assert!(parse_duration("one Y").is_err());
    assert!(parse_duration("").is_err());
  }

  #[test]
  fn out_of_range_durations_are_violations_not_panics() {
    assert!(matches!(
      parse_duration("100000000000000000 Y"),
      Err(IbdlError::InvalidParameter(_))
    ));
    assert!(parse_duration(&format!("{} D", i64::MAX)).is_err());
    assert!(parse_duration(&format!("{} W", i64::MIN)).is_err());

    let errors = validate_download_parameters(
      &syms(&["AAPL"]), "100000000000000000 Y", "1 day", "STK", "TRADES",
    );
    assert_eq!(errors.len(), 1, "{:?}", errors);
    assert!(errors[0].contains("Invalid duration"));
  }

  #[test]
  fn symbol_validation() {
    assert!(validate_symbol("AAPL"));
    assert!(validate_symbol("BRK.B"));
    assert!(validate_symbol("RDS-A"));
    assert!(!validate_symbol(""));
    assert!(!validate_symbol("AA PL"));
    assert!(!validate_symbol("AAPL$"));
  }

  #[test]
  fn collects_every_violation() {
    let errors = validate_download_parameters(&syms(&["AAPL", "BAD$"]), "2 X", "7 day", "XYZ", "NOPE");
    assert_eq!(errors.len(), 5, "{:?}", errors);
    assert!(errors.iter().any(|e| e.contains("Invalid symbol format: BAD$")));
    assert!(errors.iter().any(|e| e.contains("Unknown duration unit: X")));
    assert!(errors.iter().any(|e| e.contains("Unsupported bar size: 7 day")));
    assert!(errors.iter().any(|e| e.contains("Unsupported security type: XYZ")));
    assert!(errors.iter().any(|e| e.contains("Unsupported what to show: NOPE")));
  }

  #[test]
  fn valid_parameters_produce_no_errors() {
    let errors = validate_download_parameters(&syms(&["AAPL"]), "1 Y", "1 day", "STK", "TRADES");
    assert!(errors.is_empty(), "{:?}", errors);
  }

  #[test]
  fn estimates_data_points() {
    assert_eq!(estimate_data_points("1 D", "1 hour"), Some(24));
    assert_eq!(estimate_data_points("1 Y", "1 day"), Some(365));
    assert_eq!(estimate_data_points("1 D", "bananas"), None);
  }
}
