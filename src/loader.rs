//! Raw file location and archive reading.
//!
//! Exchange files arrive as zip archives holding a single CSV (EPEX) or as a
//! directory of parquet parts (NordPool). This module handles the I/O side of
//! that: finding the file(s) for a date under the source root, pulling the
//! CSV payload out of its archive, and mapping CSV header names to column
//! positions. Schema interpretation lives in [`crate::feeds`].
//!
//! Directory layout conventions:
//!
//! | Layout | Path |
//! |--------|------|
//! | monthly | `{root}/{YYYY}/{MM}/` |
//! | daily | `{root}/{YYYY}/{MM}/{DD}/` |

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use chrono::NaiveDate;

use crate::error::{CobError, Result};

/// I/O buffer size for raw file reading.
///
/// Daily feed archives are tens to hundreds of MB; the default 8KB
/// `BufReader` spends noticeable time in syscalls on those.
pub const IO_BUFFER_SIZE: usize = 1024 * 1024; // 1 MB

// ============================================================================
// Directory layout
// ============================================================================

/// `{root}/{YYYY}/{MM}`
pub fn month_dir(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(date.format("%Y").to_string())
        .join(date.format("%m").to_string())
}

/// `{root}/{YYYY}/{MM}/{DD}`
pub fn day_dir(root: &Path, date: NaiveDate) -> PathBuf {
    month_dir(root, date).join(date.format("%d").to_string())
}

/// List the file names in `dir`, sorted lexically.
fn sorted_file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| {
        CobError::Io(format!("Failed to read directory {}: {}", dir.display(), e))
    })? {
        let entry =
            entry.map_err(|e| CobError::Io(format!("Failed to read directory entry: {}", e)))?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Find the first zip archive in `dir` whose name contains `needle`.
///
/// # Errors
///
/// `MissingFile` when the directory does not exist or holds no match.
pub fn find_archive(dir: &Path, needle: &str, variant: &str, date: NaiveDate) -> Result<PathBuf> {
    let missing = || CobError::MissingFile {
        variant: variant.to_string(),
        date,
        path: dir.join(format!("*{needle}*.zip")),
    };

    if !dir.is_dir() {
        return Err(missing());
    }

    sorted_file_names(dir)?
        .into_iter()
        .find(|name| name.contains(needle) && name.ends_with(".zip"))
        .map(|name| dir.join(name))
        .ok_or_else(missing)
}

/// Find every file in `dir` named `{prefix}*{suffix}`, sorted lexically.
///
/// # Errors
///
/// `MissingFile` when the directory does not exist or holds no match.
pub fn find_parts(
    dir: &Path,
    prefix: &str,
    suffix: &str,
    variant: &str,
    date: NaiveDate,
) -> Result<Vec<PathBuf>> {
    let missing = || CobError::MissingFile {
        variant: variant.to_string(),
        date,
        path: dir.join(format!("{prefix}*{suffix}")),
    };

    if !dir.is_dir() {
        return Err(missing());
    }

    let parts: Vec<PathBuf> = sorted_file_names(dir)?
        .into_iter()
        .filter(|name| name.starts_with(prefix) && name.ends_with(suffix))
        .map(|name| dir.join(name))
        .collect();

    if parts.is_empty() {
        return Err(missing());
    }
    Ok(parts)
}

// ============================================================================
// Archive reading
// ============================================================================

/// Read one entry of a zip archive into memory.
///
/// Looks up `preferred` by name first, then falls back to the first `.csv`
/// entry, then to the first entry of any name.
///
/// # Errors
///
/// `Format` if the archive cannot be opened as zip or is empty.
pub fn read_archive_entry(path: &Path, preferred: Option<&str>, variant: &str) -> Result<Vec<u8>> {
    let file = File::open(path)
        .map_err(|e| CobError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
    let reader = BufReader::with_capacity(IO_BUFFER_SIZE, file);

    let mut archive = zip::ZipArchive::new(reader)
        .map_err(|e| CobError::format(variant, path, format!("not a zip archive: {e}")))?;
    if archive.len() == 0 {
        return Err(CobError::format(variant, path, "archive contains no entries"));
    }

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let chosen = preferred
        .and_then(|p| names.iter().find(|n| n.as_str() == p))
        .or_else(|| names.iter().find(|n| n.ends_with(".csv")))
        .or_else(|| names.first())
        .cloned()
        .ok_or_else(|| CobError::format(variant, path, "archive contains no entries"))?;

    let mut entry = archive
        .by_name(&chosen)
        .map_err(|e| CobError::format(variant, path, format!("unreadable entry {chosen}: {e}")))?;
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut buf)
        .map_err(|e| CobError::format(variant, path, format!("unreadable entry {chosen}: {e}")))?;

    log::debug!(
        "Read {} bytes from {}:{}",
        buf.len(),
        path.display(),
        chosen
    );
    Ok(buf)
}

/// Drop the first `n` lines of a buffer.
pub fn skip_lines(bytes: &[u8], n: usize) -> &[u8] {
    let mut rest = bytes;
    for _ in 0..n {
        match rest.iter().position(|&b| b == b'\n') {
            Some(pos) => rest = &rest[pos + 1..],
            None => return &[],
        }
    }
    rest
}

// ============================================================================
// Column lookup
// ============================================================================

/// Header name to column position map for one CSV file.
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    positions: AHashMap<String, usize>,
    variant: String,
    file: PathBuf,
}

impl ColumnIndex {
    /// Build from a CSV header record.
    pub fn from_headers(
        headers: &csv::StringRecord,
        variant: impl Into<String>,
        file: impl Into<PathBuf>,
    ) -> Self {
        let positions = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().trim_start_matches('\u{feff}').to_string(), i))
            .collect();
        Self {
            positions,
            variant: variant.into(),
            file: file.into(),
        }
    }

    /// Position of a column that must exist.
    pub fn require(&self, name: &str) -> Result<usize> {
        self.positions.get(name).copied().ok_or_else(|| {
            CobError::format(
                self.variant.clone(),
                self.file.clone(),
                format!("missing column {name:?}"),
            )
        })
    }

    /// Position of a column that may be absent.
    pub fn optional(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// Build a format error pointing at a data row (1-based, header excluded).
    pub fn row_error(&self, row: u64, reason: impl std::fmt::Display) -> CobError {
        CobError::format(
            self.variant.clone(),
            self.file.clone(),
            format!("row {row}: {reason}"),
        )
    }
}
