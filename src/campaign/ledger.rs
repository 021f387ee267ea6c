//! Sent-ledger: per-identity append-only CSV of contacted addresses.
//!
//! Each identity owns one store at `<sent_dir>/<stem>.csv` with a
//! `Email,Timestamp` header. The set of addresses in the store is the dedup
//! filter for every later run of that identity.
//!
//! Writes are best-effort. A crash between a successful send and the append
//! means the address can be contacted again on the next run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::campaign::table::normalize_email;
use crate::error::LedgerError;

/// Header written on first append.
pub const LEDGER_HEADER: [&str; 2] = ["Email", "Timestamp"];

/// Timestamp format of the second column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One identity's sent-ledger.
#[derive(Debug)]
pub struct SentLedger {
    path: PathBuf,
    /// Held for the whole append so a store is never written by two tasks at once.
    write_lock: Mutex<()>,
}

impl SentLedger {
    /// Open (lazily) the ledger `<dir>/<stem>.csv`. Nothing touches disk
    /// until the first read or append.
    pub fn open(dir: &Path, stem: &str) -> Self {
        Self::at(dir.join(format!("{stem}.csv")))
    }

    pub fn at(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Normalized addresses already contacted.
    ///
    /// A missing store reads as empty. An unreadable store is logged and also
    /// reads as empty.
    pub async fn already_sent(&self) -> HashSet<String> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashSet::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Error reading sent ledger: {e}");
                return HashSet::new();
            }
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes.as_slice());

        let mut sent = HashSet::new();
        for record in reader.records() {
            match record {
                Ok(record) => {
                    if let Some(email) = record.get(0).map(normalize_email)
                        && !email.is_empty()
                    {
                        sent.insert(email);
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), "Skipping bad ledger row: {e}");
                }
            }
        }
        sent
    }

    /// Append one `(email, timestamp)` line, creating the directory, the
    /// file and its header on first write.
    pub async fn record(&self, email: &str, at: DateTime<Local>) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock().await;

        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let needs_header = !tokio::fs::try_exists(&self.path).await.map_err(io_err)?;

        let mut line = csv::Writer::from_writer(Vec::new());
        let csv_err = |source| LedgerError::Csv {
            path: self.path.clone(),
            source,
        };
        if needs_header {
            line.write_record(LEDGER_HEADER).map_err(csv_err)?;
        }
        let timestamp = at.format(TIMESTAMP_FORMAT).to_string();
        line.write_record([normalize_email(email).as_str(), timestamp.as_str()])
            .map_err(csv_err)?;
        let bytes = line
            .into_inner()
            .map_err(|e| io_err(std::io::Error::other(e.to_string())))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_err)?;
        file.write_all(&bytes).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        Ok(())
    }
}
