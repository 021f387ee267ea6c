//! Cold Mailer: per-identity throttled bulk email campaigns.

pub mod campaign;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod transport;
