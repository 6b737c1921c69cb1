//! Append-only CSV output for verification results.
//!
//! The sink owns the only persistent mutation a run performs. It:
//! - writes the header only when the output file is new (or empty)
//! - appends to existing files without touching prior rows
//! - flushes and syncs every row before `write` returns
//! - serializes concurrent writers behind a mutex

use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Column names of the output file, in order.
pub const OUTPUT_HEADER: [&str; 4] = [
    "phone_number",
    "on_whatsapp",
    "json_number_information",
    "json_whatsapp_information",
];

/// Errors returned by the output sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error on output file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write CSV row to {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Output sink for {} is already closed", .0.display())]
    Closed(PathBuf),
    #[error("Output sink lock poisoned")]
    Poisoned,
}

pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// On-disk row for one successful verification.
///
/// `on_whatsapp` serializes as `true`, `false` or an empty field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRecord {
    pub phone_number: String,
    pub on_whatsapp: Option<bool>,
    pub json_number_information: Option<String>,
    pub json_whatsapp_information: Option<String>,
}

struct SinkState {
    writer: Option<csv::Writer<File>>,
    rows_written: u64,
}

/// Append-only CSV writer shared by concurrently completing verifications.
pub struct CsvAppendSink {
    path: PathBuf,
    wrote_header: bool,
    state: Mutex<SinkState>,
}

impl CsvAppendSink {
    /// Open `path` for appending.
    ///
    /// A missing or zero-length file gets the header row; a non-empty file is
    /// appended to as-is. If the existing content does not end in a newline
    /// one is added so the first new row starts on its own line.
    pub fn open(path: impl Into<PathBuf>) -> SinkResult<Self> {
        let path = path.into();
        let io_err = |source| SinkError::Io {
            path: path.clone(),
            source,
        };

        let existing_len = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => 0,
            Err(err) => return Err(io_err(err)),
        };
        let needs_header = existing_len == 0;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        if !needs_header && !ends_with_newline(&mut file).map_err(io_err)? {
            debug!("Output file {} lacks a trailing newline, adding one", path.display());
            file.write_all(b"\n").map_err(io_err)?;
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            writer
                .write_record(OUTPUT_HEADER)
                .map_err(|source| SinkError::Csv {
                    path: path.clone(),
                    source,
                })?;
            sync(&mut writer).map_err(io_err)?;
            info!("Created output file {} with header", path.display());
        } else {
            info!(
                "Appending to existing output file {} ({} bytes)",
                path.display(),
                existing_len
            );
        }

        Ok(Self {
            path,
            wrote_header: needs_header,
            state: Mutex::new(SinkState {
                writer: Some(writer),
                rows_written: 0,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this sink emitted the header row when it was opened.
    pub fn wrote_header(&self) -> bool {
        self.wrote_header
    }

    /// Append one row and sync it to disk before returning.
    pub fn write(&self, record: &OutputRecord) -> SinkResult<()> {
        let mut state = self.lock()?;
        let writer = state
            .writer
            .as_mut()
            .ok_or_else(|| SinkError::Closed(self.path.clone()))?;

        writer.serialize(record).map_err(|source| SinkError::Csv {
            path: self.path.clone(),
            source,
        })?;
        sync(writer).map_err(|source| SinkError::Io {
            path: self.path.clone(),
            source,
        })?;

        state.rows_written += 1;
        debug!(
            "Wrote row for {} to {} (total: {})",
            record.phone_number,
            self.path.display(),
            state.rows_written
        );
        Ok(())
    }

    /// Flush and release the file. Returns the number of rows this sink wrote.
    ///
    /// Closing twice is a no-op; writes after close fail with `Closed`.
    pub fn close(&self) -> SinkResult<u64> {
        let mut state = self.lock()?;
        if let Some(mut writer) = state.writer.take() {
            sync(&mut writer).map_err(|source| SinkError::Io {
                path: self.path.clone(),
                source,
            })?;
            info!(
                "Closed output file {} ({} rows written)",
                self.path.display(),
                state.rows_written
            );
        }
        Ok(state.rows_written)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|s| s.writer.is_none()).unwrap_or(true)
    }

    pub fn rows_written(&self) -> u64 {
        self.lock().map(|s| s.rows_written).unwrap_or(0)
    }

    fn lock(&self) -> SinkResult<MutexGuard<'_, SinkState>> {
        self.state.lock().map_err(|_| SinkError::Poisoned)
    }
}

impl Drop for CsvAppendSink {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(mut writer) = state.writer.take() {
            if let Err(err) = sync(&mut writer) {
                warn!("Failed to flush output file {} on drop: {}", self.path.display(), err);
            } else {
                warn!("Output file {} was not closed explicitly", self.path.display());
            }
        }
    }
}

fn sync(writer: &mut csv::Writer<File>) -> io::Result<()> {
    writer.flush()?;
    writer.get_ref().sync_data()
}

fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
