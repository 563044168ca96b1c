// download.rs
// Batch download driver running against the simulated venue.
// Use it like this:
//   download --symbols AAPL,GOOGL,MSFT --duration "6 M" --bar-size "1 hour"
//   download --symbols EURUSD --sec-type CASH --duration "30 D" --news --stream

use anyhow::{anyhow, Result};
use clap::Parser;
use log::{info, warn};
use std::time::Duration;

use ibdl::client::IbdlClient;
use ibdl::config::Config;
use ibdl::export::Exporter;
use ibdl::history_manager::BarRequestOptions;
use ibdl::transport_sim::{SimConfig, SimTransport};
use ibdl::validate::{estimate_data_points, validate_download_parameters};

#[derive(Parser, Debug)]
#[command(author, version, about = "Download historical market data", long_about = None)]
struct Args {
  /// Comma-separated list of symbols (e.g. AAPL,GOOGL).
  #[arg(long)]
  symbols: String,

  /// Security type.
  #[arg(long, default_value = "STK")]
  sec_type: String,

  #[arg(long, default_value = "SMART")]
  exchange: String,

  #[arg(long, default_value = "USD")]
  currency: String,

  /// Duration such as "1 Y", "6 M", "30 D".
  #[arg(long, default_value = "1 Y")]
  duration: String,

  #[arg(long, default_value = "1 day")]
  bar_size: String,

  #[arg(long, default_value = "TRADES")]
  what_to_show: String,

  /// Regular trading hours only.
  #[arg(long, default_value_t = true)]
  use_rth: bool,

  #[arg(long, default_value = "./data")]
  output_dir: String,

  /// Also write all tables into one multi-section container file.
  #[arg(long)]
  container: bool,

  /// Include a timestamp in output filenames.
  #[arg(long)]
  include_timestamp: bool,

  /// Print a per-symbol summary after the download.
  #[arg(long)]
  summary: bool,

  /// Also fetch recent news headlines for each symbol.
  #[arg(long)]
  news: bool,

  /// Also sample a short streaming window for the first symbol.
  #[arg(long)]
  stream: bool,

  /// Per-request data timeout in seconds.
  #[arg(long)]
  timeout: Option<u64>,

  /// Delay between requests in seconds.
  #[arg(long)]
  delay: Option<f64>,

  /// Load configuration from a JSON file.
  #[arg(long)]
  config_file: Option<String>,

  #[arg(long)]
  host: Option<String>,

  #[arg(long)]
  port: Option<u16>,

  #[arg(long)]
  client_id: Option<i32>,
}

fn build_config(args: &Args) -> Result<Config> {
  let mut config = match &args.config_file {
    Some(path) => Config::from_file(path)?,
    None => Config::load()?,
  };
  if let Some(host) = &args.host {
    config.host = host.clone();
  }
  if let Some(port) = args.port {
    config.port = port;
  }
  if let Some(client_id) = args.client_id {
    config.client_id = client_id;
  }
  if let Some(timeout) = args.timeout {
    config.data_timeout = timeout;
  }
  if let Some(delay) = args.delay {
    config.request_delay = delay;
  }
  Ok(config)
}

fn main() -> Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
  let args = Args::parse();

  let symbols: Vec<String> = args
    .symbols
    .split(',')
    .map(|s| s.trim().to_uppercase())
    .filter(|s| !s.is_empty())
    .collect();
  if symbols.is_empty() {
    return Err(anyhow!("No valid symbols provided"));
  }

  // Validate everything up front so all problems are reported at once.
  let errors = validate_download_parameters(
    &symbols, &args.duration, &args.bar_size, &args.sec_type, &args.what_to_show,
  );
  if !errors.is_empty() {
    for error in &errors {
      warn!("  - {}", error);
    }
    return Err(anyhow!("Parameter validation failed with {} error(s)", errors.len()));
  }

  if let Some(points) = estimate_data_points(&args.duration, &args.bar_size) {
    info!("Estimated data points per symbol: ~{}", points);
  }

  let config = build_config(&args)?;
  info!("Connecting to {}:{} (client id {})", config.host, config.port, config.client_id);
  info!("Downloading {} symbol(s): {}", symbols.len(), symbols.join(", "));

  let transport = SimTransport::new(SimConfig::default());
  let client = IbdlClient::new(transport, config.clone());
  client.connect()?;

  let exporter = Exporter::new(&args.output_dir)?;
  let opts = BarRequestOptions {
    sec_type: args.sec_type.clone(),
    exchange: args.exchange.clone(),
    currency: args.currency.clone(),
    duration: args.duration.clone(),
    bar_size: args.bar_size.clone(),
    what_to_show: args.what_to_show.clone(),
    use_rth: args.use_rth,
    end_date: String::new(),
  };

  let report = client.history().download_many(&symbols, &opts, &exporter, args.include_timestamp);

  if args.summary {
    for symbol in &report.succeeded {
      if let Some(table) = report.tables.get(symbol) {
        let summary = table.summary(symbol);
        println!(
          "{}: {} records, {} .. {}",
          summary.symbol,
          summary.records,
          summary.start_date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
          summary.end_date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
        );
      }
    }
  }

  if args.container && !report.tables.is_empty() {
    let tables: Vec<_> = report
      .tables
      .iter()
      .map(|(symbol, table)| (symbol.clone(), table.clone()))
      .collect();
    let path = exporter.save_table_collection(&tables, "combined_data.json")?;
    info!("Container file written to {:?}", path);
  }

  if args.news {
    for symbol in &symbols {
      match client.news().request_news(symbol, None, "", "", "", 10) {
        Ok((req_id, items)) => {
          info!("{}: {} headlines", symbol, items.len());
          if let Some(path) = client.news().export(req_id, "json", &exporter) {
            info!("News for {} written to {:?}", symbol, path);
          }
        }
        Err(e) => warn!("News request for {} failed: {}", symbol, e),
      }
    }
  }

  if args.stream {
    let symbol = &symbols[0];
    let req_id = client.streams().subscribe(symbol, &args.sec_type, &args.exchange, &args.currency, None)?;
    info!("Streaming {} for a few seconds...", symbol);
    std::thread::sleep(Duration::from_secs(3));
    if let Some(snapshot) = client.streams().analytics(req_id) {
      info!(
        "{}: {} ticks, last price {:?}, change {:.2}%",
        symbol, snapshot.data_points, snapshot.current_price, snapshot.price_change_pct
      );
    }
    client.streams().unsubscribe(req_id)?;
    if let Some(path) = client.streams().export(req_id, "csv", &exporter) {
      info!("Streaming data written to {:?}", path);
    }
  }

  client.disconnect()?;

  println!(
    "Done: {} succeeded, {} no data, {} timed out, {} failed",
    report.succeeded.len(),
    report.no_data.len(),
    report.timed_out.len(),
    report.failed.len()
  );
  if report.succeeded.len() < report.total() {
    std::process::exit(1);
  }
  Ok(())
}
