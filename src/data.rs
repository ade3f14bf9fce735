//! OHLCV loading, validation and caching.

use crate::error::{BacktestError, Result};
use crate::types::Bar;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Raw CSV row with flexible column names.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(
        alias = "Date",
        alias = "date",
        alias = "DATE",
        alias = "Timestamp",
        alias = "timestamp",
        alias = "Time",
        alias = "time",
        alias = "datetime",
        alias = "Datetime"
    )]
    date: String,
    #[serde(alias = "Open", alias = "open", alias = "o")]
    open: f64,
    #[serde(alias = "High", alias = "high", alias = "h")]
    high: f64,
    #[serde(alias = "Low", alias = "low", alias = "l")]
    low: f64,
    #[serde(alias = "Close", alias = "close", alias = "c", alias = "Adj Close")]
    close: f64,
    #[serde(alias = "Volume", alias = "volume", alias = "v", alias = "vol", default)]
    volume: f64,
}

/// CSV reading options.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Explicit date format, tried before the built-in list.
    pub date_format: Option<String>,
    pub has_headers: bool,
    /// Field delimiter. Detected from the first lines when `None`.
    pub delimiter: Option<u8>,
    /// Skip unparsable or inconsistent rows instead of failing.
    pub skip_invalid: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            has_headers: true,
            delimiter: None,
            skip_invalid: true,
        }
    }
}

/// Pick the delimiter that splits the first lines into a consistent number
/// of at least five fields.
fn detect_delimiter(path: &Path) -> Result<u8> {
    let reader = BufReader::new(File::open(path)?);
    let lines: Vec<String> = reader.lines().take(5).map_while(|l| l.ok()).collect();

    let mut best = (b',', 0usize);
    for delim in [b',', b'\t', b';', b'|'] {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| line.bytes().filter(|&b| b == delim).count() + 1)
            .collect();
        let Some(&first) = counts.first() else {
            continue;
        };
        if first >= 5 && counts.iter().all(|&c| c == first) && first > best.1 {
            best = (delim, first);
        }
    }

    debug!("Detected delimiter {:?} ({} fields)", best.0 as char, best.1);
    Ok(best.0)
}

fn midnight(d: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN))
}

/// Parse a date string, trying `format` first and then common layouts.
/// Bare integers are read as Unix seconds.
pub fn parse_datetime(s: &str, format: Option<&str>) -> Result<DateTime<Utc>> {
    let s = s.trim();

    if let Some(fmt) = format {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(midnight(d));
        }
    }

    const DATETIME_FORMATS: [&str; 9] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y/%m/%d %H:%M:%S",
        "%d-%m-%Y %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    const DATE_FORMATS: [&str; 8] = [
        "%Y-%m-%d",
        "%Y/%m/%d",
        "%d-%m-%Y",
        "%d/%m/%Y",
        "%m/%d/%Y",
        "%d-%b-%Y",
        "%d %b %Y",
        "%b %d, %Y",
    ];
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(midnight(d));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Some(dt) = s.parse::<i64>().ok().and_then(|ts| DateTime::from_timestamp(ts, 0)) {
        return Ok(dt);
    }

    Err(BacktestError::DataError(format!("Could not parse date: '{}'", s)))
}

/// Load OHLCV bars from a CSV file.
///
/// Rows are sorted by timestamp and duplicate timestamps are dropped, so the
/// returned table always passes [`validate_bars`].
pub fn load_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    info!("Loading data from: {}", path.display());

    let delimiter = match config.delimiter {
        Some(d) => d,
        None => detect_delimiter(path)?,
    };
    read_bars(File::open(path)?, delimiter, config)
}

/// Parse OHLCV bars from in-memory CSV text.
pub fn parse_csv(content: &str, config: &DataConfig) -> Result<Vec<Bar>> {
    read_bars(content.as_bytes(), config.delimiter.unwrap_or(b','), config)
}

fn read_bars<R: Read>(source: R, delimiter: u8, config: &DataConfig) -> Result<Vec<Bar>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(config.has_headers)
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let mut bars = Vec::new();
    let mut skipped = 0;

    for (i, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row_num = i + 1;
        let parsed = result.map_err(BacktestError::from).and_then(|row| {
            let timestamp = parse_datetime(&row.date, config.date_format.as_deref())?;
            let bar = Bar::new(timestamp, row.open, row.high, row.low, row.close, row.volume);
            if bar.validate() {
                Ok(bar)
            } else {
                Err(BacktestError::DataError(format!(
                    "Invalid bar data at row {}: {:?}",
                    row_num, bar
                )))
            }
        });

        match parsed {
            Ok(bar) => bars.push(bar),
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num, e);
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if skipped > 0 {
        warn!("Skipped {} invalid rows", skipped);
    }

    bars.sort_by_key(|b| b.timestamp);
    let original_len = bars.len();
    bars.dedup_by_key(|b| b.timestamp);
    if bars.len() < original_len {
        warn!("Removed {} duplicate timestamps", original_len - bars.len());
    }

    let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
        return Err(BacktestError::NoData);
    };
    info!(
        "Loaded {} bars from {} to {}",
        bars.len(),
        first.timestamp,
        last.timestamp
    );

    Ok(bars)
}

/// Check that a table is strictly ascending with consistent OHLC values.
pub fn validate_bars(bars: &[Bar]) -> Result<()> {
    if let Some((i, bar)) = bars.iter().enumerate().find(|(_, b)| !b.validate()) {
        return Err(BacktestError::DataError(format!(
            "Inconsistent OHLC at bar {} ({})",
            i, bar.timestamp
        )));
    }

    if let Some(i) = bars
        .windows(2)
        .position(|w| w[1].timestamp <= w[0].timestamp)
    {
        let kind = if bars[i + 1].timestamp == bars[i].timestamp {
            "Duplicate"
        } else {
            "Out-of-order"
        };
        return Err(BacktestError::DataError(format!(
            "{} timestamp at bar {} ({})",
            kind,
            i + 1,
            bars[i + 1].timestamp
        )));
    }

    Ok(())
}

/// Simple moving average of the last `period` closes.
pub fn sma(bars: &[Bar], period: usize) -> Option<f64> {
    if bars.len() < period || period == 0 {
        return None;
    }
    let sum: f64 = bars[bars.len() - period..].iter().map(|b| b.close).sum();
    Some(sum / period as f64)
}

/// Highest high over the `period` bars before the last one.
pub fn highest_high(bars: &[Bar], period: usize) -> Option<f64> {
    prior_window(bars, period).map(|w| w.iter().map(|b| b.high).fold(f64::MIN, f64::max))
}

/// Lowest low over the `period` bars before the last one.
pub fn lowest_low(bars: &[Bar], period: usize) -> Option<f64> {
    prior_window(bars, period).map(|w| w.iter().map(|b| b.low).fold(f64::MAX, f64::min))
}

fn prior_window(bars: &[Bar], period: usize) -> Option<&[Bar]> {
    if period == 0 || bars.len() <= period {
        return None;
    }
    let end = bars.len() - 1;
    Some(&bars[end - period..end])
}

struct CacheEntry {
    bars: Arc<Vec<Bar>>,
    inserted: Instant,
    last_used: u64,
}

/// Bar tables keyed by source, bounded by age and count.
///
/// Entries older than `ttl` are never returned. When full, the least
/// recently used entry is evicted.
pub struct BarCache {
    ttl: Duration,
    max_entries: usize,
    entries: HashMap<String, CacheEntry>,
    clock: u64,
}

impl BarCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: HashMap::new(),
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub fn get(&mut self, key: &str) -> Option<Arc<Vec<Bar>>> {
        let expired = self.entries.get(key)?.inserted.elapsed() >= self.ttl;
        if expired {
            debug!("Cache entry '{}' expired", key);
            self.entries.remove(key);
            return None;
        }
        let now = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.last_used = now;
        Some(Arc::clone(&entry.bars))
    }

    pub fn insert(&mut self, key: impl Into<String>, bars: Vec<Bar>) -> Arc<Vec<Bar>> {
        let key = key.into();
        self.purge_expired();

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                debug!("Evicting cache entry '{}'", oldest);
                self.entries.remove(&oldest);
            }
        }

        let bars = Arc::new(bars);
        let last_used = self.tick();
        self.entries.insert(
            key,
            CacheEntry {
                bars: Arc::clone(&bars),
                inserted: Instant::now(),
                last_used,
            },
        );
        bars
    }

    /// Return the cached table for `key`, or load and cache it.
    pub fn get_or_load<F>(&mut self, key: &str, load: F) -> Result<Arc<Vec<Bar>>>
    where
        F: FnOnce() -> Result<Vec<Bar>>,
    {
        if let Some(bars) = self.get(key) {
            return Ok(bars);
        }
        let bars = load()?;
        Ok(self.insert(key, bars))
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, e| e.inserted.elapsed() < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
