//! Error types for the cold mailer.

use std::path::PathBuf;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Attachment error: {0}")]
    Attachment(#[from] AttachmentError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Configuration, template and recipient-table errors.
///
/// Aborts the affected identity, or the whole run for global files.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to parse {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("Missing required column '{column}' in {}", .path.display())]
    MissingColumn { path: PathBuf, column: String },

    #[error("Template set {} is empty", .0.display())]
    EmptyTemplates(PathBuf),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Initial connect/authenticate failures. Fatal for an identity's batch.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Cannot reach {host}:{port}: {reason}")]
    Unreachable {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("SMTP connection to {host}:{port} failed: {reason}")]
    Smtp {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("SMTP server {host}:{port} rejected the session")]
    Rejected { host: String, port: u16 },

    #[error("Transport task failed: {0}")]
    Task(String),
}

/// Per-recipient send failure. Logged and counted, never retried.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message for {to}: {reason}")]
    Build { to: String, reason: String },

    #[error("Delivery to {to} failed: {reason}")]
    Delivery { to: String, reason: String },

    #[error("Not connected")]
    NotConnected,
}

/// A single attachment could not be read. The attachment is skipped.
#[derive(Debug, thiserror::Error)]
#[error("Failed to read attachment {}: {source}", .path.display())]
pub struct AttachmentError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Sent-ledger persistence failures. Best-effort: logged, not propagated.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("IO error on ledger {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on ledger {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Result type alias for the cold mailer.
pub type Result<T> = std::result::Result<T, Error>;
