//! End-of-run report, keyed by identity name.

use std::collections::BTreeMap;
use std::fmt;

use crate::campaign::sender::{BatchStatus, SendReport};

/// Final status of one identity's unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityStatus {
    Completed,
    /// Every candidate in the table was already in the ledger.
    NothingToSend,
    ConnectFailed(String),
    /// Reconnect failed mid-batch; `remaining` recipients were not attempted.
    AbortedRemaining { remaining: usize, reason: String },
    /// Config error or panic; recorded as a zero result.
    Errored(String),
}

impl From<BatchStatus> for IdentityStatus {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Completed => Self::Completed,
            BatchStatus::ConnectFailed(reason) => Self::ConnectFailed(reason),
            BatchStatus::AbortedRemaining { remaining, reason } => {
                Self::AbortedRemaining { remaining, reason }
            }
        }
    }
}

impl fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::NothingToSend => write!(f, "all emails already sent"),
            Self::ConnectFailed(reason) => write!(f, "connection failed: {reason}"),
            Self::AbortedRemaining { remaining, reason } => {
                write!(f, "aborted with {remaining} remaining: {reason}")
            }
            Self::Errored(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// One identity's line in the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySummary {
    pub selected: usize,
    pub sent: usize,
    pub failed: usize,
    pub status: IdentityStatus,
}

impl IdentitySummary {
    pub fn from_send(selected: usize, report: SendReport) -> Self {
        Self {
            selected,
            sent: report.sent,
            failed: report.failed,
            status: report.status.into(),
        }
    }

    pub fn nothing_to_send() -> Self {
        Self {
            selected: 0,
            sent: 0,
            failed: 0,
            status: IdentityStatus::NothingToSend,
        }
    }

    pub fn errored(reason: impl Into<String>) -> Self {
        Self {
            selected: 0,
            sent: 0,
            failed: 0,
            status: IdentityStatus::Errored(reason.into()),
        }
    }
}

/// Aggregated result of a campaign run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignReport {
    entries: BTreeMap<String, IdentitySummary>,
}

impl CampaignReport {
    /// Add an entry. A repeated name gets a ` (n)` suffix instead of
    /// overwriting the earlier entry.
    pub fn insert(&mut self, name: &str, summary: IdentitySummary) {
        let mut key = name.to_string();
        let mut n = 2;
        while self.entries.contains_key(&key) {
            key = format!("{name} ({n})");
            n += 1;
        }
        self.entries.insert(key, summary);
    }

    pub fn get(&self, name: &str) -> Option<&IdentitySummary> {
        self.entries.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &IdentitySummary)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_sent(&self) -> usize {
        self.entries.values().map(|s| s.sent).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.entries.values().map(|s| s.failed).sum()
    }
}

impl fmt::Display for CampaignReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "FINAL SUMMARY")?;
        writeln!(f, "{}", "=".repeat(60))?;
        for (name, s) in &self.entries {
            let mark = if s.sent > 0 { "ok  " } else { "FAIL" };
            writeln!(
                f,
                "{mark} {name}: {} sent, {} failed of {} selected ({})",
                s.sent, s.failed, s.selected, s.status
            )?;
        }
        write!(
            f,
            "Total emails sent across all identities: {}",
            self.total_sent()
        )
    }
}
