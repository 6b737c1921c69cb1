//! Record Source: candidate phone numbers streamed out of a delimited file.
//!
//! The first row is a header and is skipped. Each later row contributes its
//! first column as a candidate; rows with an empty first column and rows the
//! CSV parser rejects are dropped without being reported as failures.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, trace};

/// One phone number pending verification. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate(String);

impl Candidate {
    /// Build a candidate from a raw field. Surrounding whitespace is trimmed;
    /// an empty result yields `None`.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Input file [{}] couldn't be found", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to open input file [{}]: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Lazy, single-pass iterator of candidates from a delimited file.
pub struct RecordSource {
    path: PathBuf,
    records: csv::StringRecordsIntoIter<File>,
    skipped: usize,
}

impl RecordSource {
    /// Open `path`. Fails before reading anything if the file does not exist.
    pub fn open(path: impl AsRef<Path>, delimiter: u8) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(SourceError::NotFound(path));
        }

        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(delimiter)
            .from_path(&path)
            .map_err(|source| SourceError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            records: reader.into_records(),
            skipped: 0,
        })
    }

    /// Rows dropped so far (empty first column or unparseable).
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Read the whole file into memory, in file order.
    pub fn drain(mut self) -> Vec<Candidate> {
        let candidates: Vec<Candidate> = self.by_ref().collect();
        info!(
            "Input file {} processed: {} candidates, {} rows skipped",
            self.path.display(),
            candidates.len(),
            self.skipped
        );
        candidates
    }
}

impl Iterator for RecordSource {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(err) => {
                    debug!("Skipping unreadable input row: {}", err);
                    self.skipped += 1;
                    continue;
                }
            };

            match record.get(0).and_then(Candidate::new) {
                Some(candidate) => return Some(candidate),
                None => {
                    trace!(
                        line = record.position().map(|p| p.line()),
                        "Skipping row without a phone number"
                    );
                    self.skipped += 1;
                }
            }
        }
    }
}
