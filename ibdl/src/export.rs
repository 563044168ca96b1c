// ibdl/src/export.rs
// Durable export of downloaded data: per-table CSV, structured JSON, and a
// multi-table JSON container with one section per table.

use crate::base::IbdlError;
use crate::contract::{parse_bar_date, Bar, BarTable, BAR_COLUMNS};
use crate::data::{NewsItem, Tick};
use chrono::Utc;
use log::{error, info};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Longest allowed section name in a multi-table container.
const MAX_SECTION_NAME_LEN: usize = 31;

/// Writes export files under one output directory.
pub struct Exporter {
  output_dir: PathBuf,
}

impl Exporter {
  pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self, IbdlError> {
    let output_dir = output_dir.as_ref().to_path_buf();
    std::fs::create_dir_all(&output_dir)?;
    Ok(Exporter { output_dir })
  }

  pub fn output_dir(&self) -> &Path {
    &self.output_dir
  }

  /// Derives the target path from a logical filename, optionally inserting a
  /// timestamp before the extension.
  fn build_path(&self, filename: &str, include_timestamp: bool) -> PathBuf {
    if !include_timestamp {
      return self.output_dir.join(filename);
    }
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let path = Path::new(filename);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(filename);
    let named = match path.extension().and_then(|e| e.to_str()) {
      Some(ext) => format!("{}_{}.{}", stem, timestamp, ext),
      None => format!("{}_{}", stem, timestamp),
    };
    self.output_dir.join(named)
  }

  /// Saves a bar table as CSV with the time index in the first column.
  pub fn save_bars_csv(
    &self,
    table: &BarTable,
    filename: &str,
    include_timestamp: bool,
  ) -> Result<PathBuf, IbdlError> {
    let path = self.build_path(filename, include_timestamp);
    let mut out = String::new();
    out.push_str("time,");
    out.push_str(&BAR_COLUMNS.join(","));
    out.push('\n');
    for row in &table.rows {
      out.push_str(&format!(
        "{},{},{},{},{},{},{},{}\n",
        row.time.format("%Y-%m-%d %H:%M:%S"),
        row.open, row.high, row.low, row.close, row.volume, row.wap, row.count
      ));
    }
    std::fs::write(&path, out)?;
    info!("Saved CSV file: {:?}", path);
    Ok(path)
  }

  /// Re-reads a bar-table CSV produced by [`save_bars_csv`].
  pub fn load_bars_csv<P: AsRef<Path>>(&self, path: P) -> Result<BarTable, IbdlError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let mut lines = contents.lines();
    let header = lines.next().ok_or_else(|| IbdlError::ParseError("Empty CSV file".into()))?;
    let expected = format!("time,{}", BAR_COLUMNS.join(","));
    if header != expected {
      return Err(IbdlError::ParseError(format!("Unexpected CSV header: {}", header)));
    }

    let mut bars = Vec::new();
    for (lineno, line) in lines.enumerate() {
      if line.trim().is_empty() {
        continue;
      }
      let fields: Vec<&str> = line.split(',').collect();
      if fields.len() != 8 {
        return Err(IbdlError::ParseError(format!("Bad CSV row {}: {}", lineno + 2, line)));
      }
      let num = |i: usize| -> Result<f64, IbdlError> {
        fields[i].parse().map_err(|_| {
          IbdlError::ParseError(format!("Bad numeric field '{}' on row {}", fields[i], lineno + 2))
        })
      };
      bars.push(Bar {
        date: fields[0].to_string(),
        open: num(1)?,
        high: num(2)?,
        low: num(3)?,
        close: num(4)?,
        volume: fields[5].parse().map_err(|_| {
          IbdlError::ParseError(format!("Bad volume '{}' on row {}", fields[5], lineno + 2))
        })?,
        wap: num(6)?,
        count: fields[7].parse().map_err(|_| {
          IbdlError::ParseError(format!("Bad count '{}' on row {}", fields[7], lineno + 2))
        })?,
      });
      // Validate the date eagerly so a corrupt file fails here, not later.
      parse_bar_date(&bars.last().unwrap().date)?;
    }
    BarTable::from_bars(bars)
  }

  /// Serializes any value to a pretty-printed JSON file.
  pub fn save_json<T: Serialize>(
    &self,
    value: &T,
    filename: &str,
    include_timestamp: bool,
  ) -> Result<PathBuf, IbdlError> {
    let path = self.build_path(filename, include_timestamp);
    let contents = serde_json::to_string_pretty(value)
      .map_err(|e| IbdlError::InternalError(format!("JSON serialization failed: {}", e)))?;
    std::fs::write(&path, contents)?;
    info!("Saved JSON file: {:?}", path);
    Ok(path)
  }

  pub fn save_ticks_csv(
    &self,
    ticks: &[Tick],
    filename: &str,
    include_timestamp: bool,
  ) -> Result<PathBuf, IbdlError> {
    let path = self.build_path(filename, include_timestamp);
    let mut out = String::from("timestamp,req_id,label,value,can_auto_execute,past_limit,pre_open\n");
    for tick in ticks {
      let attrib = tick.attrib.unwrap_or_default();
      out.push_str(&format!(
        "{},{},{},{},{},{},{}\n",
        tick.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        tick.req_id, tick.label, tick.value,
        attrib.can_auto_execute, attrib.past_limit, attrib.pre_open
      ));
    }
    std::fs::write(&path, out)?;
    info!("Saved CSV file: {:?}", path);
    Ok(path)
  }

  pub fn save_news_csv(
    &self,
    items: &[NewsItem],
    filename: &str,
    include_timestamp: bool,
  ) -> Result<PathBuf, IbdlError> {
    let path = self.build_path(filename, include_timestamp);
    let mut out = String::from("timestamp,provider_code,article_id,headline,received_at\n");
    for item in items {
      out.push_str(&format!(
        "{},{},{},{},{}\n",
        csv_escape(&item.timestamp),
        csv_escape(&item.provider_code),
        csv_escape(&item.article_id),
        csv_escape(&item.headline),
        item.received_at.format("%Y-%m-%d %H:%M:%S")
      ));
    }
    std::fs::write(&path, out)?;
    info!("Saved CSV file: {:?}", path);
    Ok(path)
  }

  /// Groups several named bar tables into one JSON container file, one
  /// section per table. Section names are sanitized to a bounded length and
  /// collisions get a numeric suffix.
  pub fn save_table_collection(
    &self,
    tables: &[(String, BarTable)],
    filename: &str,
  ) -> Result<PathBuf, IbdlError> {
    let path = self.build_path(filename, true);
    let mut sections = serde_json::Map::new();
    let mut collision_counts: HashMap<String, usize> = HashMap::new();

    for (name, table) in tables {
      let cleaned = sanitize_section_name(name);
      let final_name = match collision_counts.get_mut(&cleaned) {
        Some(count) => {
          *count += 1;
          format!("{}_{}", cleaned, count)
        }
        None => {
          collision_counts.insert(cleaned.clone(), 0);
          cleaned
        }
      };
      let value = serde_json::to_value(table)
        .map_err(|e| IbdlError::InternalError(format!("JSON serialization failed: {}", e)))?;
      sections.insert(final_name, value);
    }

    let container = serde_json::json!({
      "exported_at": Utc::now(),
      "sections": serde_json::Value::Object(sections),
    });
    let contents = serde_json::to_string_pretty(&container)
      .map_err(|e| IbdlError::InternalError(format!("JSON serialization failed: {}", e)))?;
    std::fs::write(&path, contents)?;
    info!("Saved container file with {} sections: {:?}", tables.len(), path);
    Ok(path)
  }

  /// Lists files in the output directory, optionally filtered by extension.
  pub fn list_files(&self, extension: Option<&str>) -> Vec<String> {
    let entries = match std::fs::read_dir(&self.output_dir) {
      Ok(entries) => entries,
      Err(e) => {
        error!("Failed to list files in {:?}: {}", self.output_dir, e);
        return Vec::new();
      }
    };
    let mut files: Vec<String> = entries
      .filter_map(|e| e.ok())
      .filter_map(|e| e.file_name().into_string().ok())
      .filter(|name| extension.map_or(true, |ext| name.ends_with(ext)))
      .collect();
    files.sort();
    files
  }
}

/// Bounds a section name and strips characters that container consumers
/// reject.
pub fn sanitize_section_name(name: &str) -> String {
  let cleaned: String = name
    .chars()
    .map(|c| match c {
      '[' | ']' | '*' | '?' | ':' | '/' | '\\' => '_',
      other => other,
    })
    .collect();
  cleaned.chars().take(MAX_SECTION_NAME_LEN).collect()
}

fn csv_escape(field: &str) -> String {
  if field.contains(',') || field.contains('"') || field.contains('\n') {
    format!("\"{}\"", field.replace('"', "\"\""))
  } else {
    field.to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data::TickKind;

  fn sample_table() -> BarTable {
    BarTable::from_bars(vec![
      Bar { date: "20240102".into(), open: 185.0, high: 186.5, low: 184.25, close: 186.0, volume: 51_234_000, wap: 185.7, count: 412_345 },
      Bar { date: "20240103".into(), open: 186.0, high: 187.0, low: 183.5, close: 184.25, volume: 48_100_500, wap: 184.9, count: 399_120 },
    ])
    .unwrap()
  }

  #[test]
  fn bars_csv_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = Exporter::new(dir.path()).unwrap();
    let table = sample_table();
    let path = exporter.save_bars_csv(&table, "AAPL_historical_data.csv", false).unwrap();
    assert!(path.ends_with("AAPL_historical_data.csv"));

    let loaded = exporter.load_bars_csv(&path).unwrap();
    assert_eq!(loaded.len(), table.len());
    for (a, b) in loaded.rows.iter().zip(table.rows.iter()) {
      assert_eq!(a, b);
    }
  }

  #[test]
  fn timestamped_filenames_keep_extension() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = Exporter::new(dir.path()).unwrap();
    let path = exporter.save_bars_csv(&sample_table(), "MSFT_historical_data.csv", true).unwrap();
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("MSFT_historical_data_"));
    assert!(name.ends_with(".csv"));
  }

  #[test]
  fn section_names_are_sanitized_and_bounded() {
    assert_eq!(sanitize_section_name("EUR/USD"), "EUR_USD");
    assert_eq!(sanitize_section_name("A[1]:B*C?"), "A_1__B_C_");
    let long = "X".repeat(40);
    assert_eq!(sanitize_section_name(&long).len(), 31);
  }

  #[test]
  fn table_collection_disambiguates_collisions() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = Exporter::new(dir.path()).unwrap();
    let table = sample_table();
    // Both names sanitize to the same section.
    let tables = vec![
      ("EUR/USD".to_string(), table.clone()),
      ("EUR:USD".to_string(), table.clone()),
    ];
    let path = exporter.save_table_collection(&tables, "combined").unwrap();

    let contents = std::fs::read_to_string(path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
    let sections = value["sections"].as_object().unwrap();
    assert_eq!(sections.len(), 2);
    assert!(sections.contains_key("EUR_USD"));
    assert!(sections.contains_key("EUR_USD_1"));
  }

  #[test]
  fn news_csv_escapes_headlines() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = Exporter::new(dir.path()).unwrap();
    let items = vec![NewsItem {
      timestamp: "2024-01-02 10:00:00".into(),
      provider_code: "BRFG".into(),
      article_id: "a1".into(),
      headline: "Apple up, analysts say \"buy\"".into(),
      received_at: Utc::now(),
    }];
    let path = exporter.save_news_csv(&items, "news_AAPL.csv", false).unwrap();
    let contents = std::fs::read_to_string(path).unwrap();
    assert!(contents.contains("\"Apple up, analysts say \"\"buy\"\"\""));
  }

  #[test]
  fn ticks_csv_has_attrib_columns() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = Exporter::new(dir.path()).unwrap();
    let ticks = vec![Tick::new(1, TickKind::Last, 186.0, None)];
    let path = exporter.save_ticks_csv(&ticks, "streaming_AAPL.csv", false).unwrap();
    let contents = std::fs::read_to_string(path).unwrap();
    assert!(contents.starts_with("timestamp,req_id,label,value,"));
    assert!(contents.lines().nth(1).unwrap().contains("LAST"));
  }

  #[test]
  fn list_files_filters_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = Exporter::new(dir.path()).unwrap();
    exporter.save_bars_csv(&sample_table(), "a.csv", false).unwrap();
    exporter.save_json(&sample_table(), "b.json", false).unwrap();
    assert_eq!(exporter.list_files(Some(".csv")), vec!["a.csv"]);
    assert_eq!(exporter.list_files(None).len(), 2);
  }
}
