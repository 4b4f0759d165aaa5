//! Per-day output files.
//!
//! Each emitted day becomes one zip archive holding one deflated CSV:
//!
//! ```text
//! {destination}/orderbook_{YYYY-MM-DD}.csv.zip
//! └── orderbook_{YYYY-MM-DD}.csv
//! ```
//!
//! | Column | Rendering |
//! |--------|-----------|
//! | `initial_id` | integer |
//! | `side` | `BUY` / `SELL` |
//! | `delivery_start` | `YYYY-MM-DDTHH:MM:SSZ` |
//! | `transaction_time` | `YYYY-MM-DDTHH:MM:SS.mmmZ` |
//! | `validity_time` | `YYYY-MM-DDTHH:MM:SS.mmmZ`, empty when open |
//! | `price`, `quantity` | normalized decimal (`45.1`, not `45.10`) |
//!
//! # Atomicity
//!
//! Archives are written to `orderbook_{date}.csv.tmp` and renamed into
//! place, so a reader never sees a partial day. The temp file is removed on
//! any failure.
//!
//! # Reproducibility
//!
//! The zip entry carries a fixed modification time (1980-01-01), so the
//! same rows always produce the same bytes.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use crate::error::{CobError, Result};
use crate::interval::DayPartition;
use crate::loader::{read_archive_entry, IO_BUFFER_SIZE};
use crate::types::{format_timestamp_millis, format_timestamp_seconds, OrderInterval};

/// Output columns, in order.
pub const CSV_HEADER: [&str; 7] = [
    "initial_id",
    "side",
    "delivery_start",
    "transaction_time",
    "validity_time",
    "price",
    "quantity",
];

/// Render rows as CSV, header first.
pub fn render_csv(rows: &[OrderInterval]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::with_capacity(64 + rows.len() * 96));
    writer.write_record(CSV_HEADER)?;

    for row in rows {
        writer.write_record([
            row.initial_id.to_string(),
            row.side.as_str().to_string(),
            format_timestamp_seconds(&row.delivery_start),
            format_timestamp_millis(&row.transaction_time),
            row.validity_time
                .as_ref()
                .map(format_timestamp_millis)
                .unwrap_or_default(),
            row.price.normalize().to_string(),
            row.quantity.normalize().to_string(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| CobError::Io(format!("Failed to flush CSV buffer: {e}")))
}

/// Writer of day archives under one destination directory.
#[derive(Debug, Clone)]
pub struct DayStore {
    destination: PathBuf,
}

impl DayStore {
    /// Create a store writing under `destination` (created on first write).
    pub fn new<P: AsRef<Path>>(destination: P) -> Self {
        Self {
            destination: destination.as_ref().to_path_buf(),
        }
    }

    /// The destination directory.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// CSV entry name inside the archive of `date`.
    pub fn entry_name(date: NaiveDate) -> String {
        format!("orderbook_{}.csv", date.format("%Y-%m-%d"))
    }

    /// Archive path for `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.destination
            .join(format!("{}.zip", Self::entry_name(date)))
    }

    /// Write one partition atomically, replacing any previous file.
    ///
    /// Returns the archive path.
    pub fn write(&self, partition: &DayPartition) -> Result<PathBuf> {
        fs::create_dir_all(&self.destination).map_err(|e| {
            CobError::Io(format!(
                "Failed to create destination {}: {}",
                self.destination.display(),
                e
            ))
        })?;

        let final_path = self.path_for(partition.date);
        let temp_path = final_path.with_extension("tmp");

        let result = render_csv(&partition.rows)
            .and_then(|csv| Self::write_archive(&temp_path, &Self::entry_name(partition.date), &csv));

        match result {
            Ok(bytes) => {
                fs::rename(&temp_path, &final_path).map_err(|e| {
                    let _ = fs::remove_file(&temp_path);
                    CobError::Io(format!("Failed to rename temp file: {}", e))
                })?;

                log::info!(
                    "Wrote {} rows for {} to {} ({} bytes)",
                    partition.rows.len(),
                    partition.date,
                    final_path.display(),
                    bytes
                );
                Ok(final_path)
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                Err(e)
            }
        }
    }

    /// Read back the CSV text of a written day.
    pub fn read_csv(&self, date: NaiveDate) -> Result<String> {
        let path = self.path_for(date);
        let bytes = read_archive_entry(&path, Some(&Self::entry_name(date)), "orderbook")?;
        String::from_utf8(bytes)
            .map_err(|e| CobError::format("orderbook", path, format!("not UTF-8: {e}")))
    }

    fn write_archive(path: &Path, entry: &str, csv: &[u8]) -> Result<u64> {
        let file = File::create(path)
            .map_err(|e| CobError::Io(format!("Failed to create {}: {}", path.display(), e)))?;

        let mut zip = zip::ZipWriter::new(BufWriter::with_capacity(IO_BUFFER_SIZE, file));
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default());

        zip.start_file(entry, options)?;
        zip.write_all(csv)?;

        let mut writer = zip.finish()?;
        writer.flush()?;

        Ok(writer.get_ref().metadata()?.len())
    }
}
