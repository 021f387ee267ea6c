//! Throttled sender: one session per batch, randomized pacing, periodic
//! reconnect.

use std::fmt;
use std::time::Duration;

use chrono::Local;
use rand::Rng;
use rand::rngs::StdRng;

use crate::campaign::composer::{AttachmentPart, compose};
use crate::campaign::ledger::SentLedger;
use crate::campaign::table::RecipientRow;
use crate::campaign::template::TemplateSet;
use crate::config::{CampaignSettings, Identity};
use crate::error::ConnectionError;
use crate::transport::{Connection, Transport};

/// Pacing and reconnect policy for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPolicy {
    /// Successful sends on one session before a proactive reconnect.
    pub reconnect_every: usize,
    pub delay_min: Duration,
    pub delay_max: Duration,
}

impl SendPolicy {
    /// Debug mode runs without delays.
    pub fn from_settings(settings: &CampaignSettings) -> Self {
        if settings.mode.is_debug() {
            return Self::unthrottled(settings.reconnect_every);
        }
        Self {
            reconnect_every: settings.reconnect_every.max(1),
            delay_min: settings.delay_min,
            delay_max: settings.delay_max.max(settings.delay_min),
        }
    }

    pub fn unthrottled(reconnect_every: usize) -> Self {
        Self {
            reconnect_every: reconnect_every.max(1),
            delay_min: Duration::ZERO,
            delay_max: Duration::ZERO,
        }
    }

    /// A uniformly random delay in `[delay_min, delay_max]`.
    pub fn next_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min = self.delay_min.as_millis() as u64;
        let max = (self.delay_max.as_millis() as u64).max(min);
        Duration::from_millis(rng.gen_range(min..=max))
    }
}

/// Session state of a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        write!(f, "{s}")
    }
}

/// Outcome of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Sent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub recipient: String,
    pub outcome: Outcome,
}

/// How a batch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    /// Every recipient was attempted.
    Completed,
    /// The initial connect failed; every recipient counts as failed.
    ConnectFailed(String),
    /// A mid-batch reconnect failed; `remaining` recipients were neither
    /// attempted nor counted.
    AbortedRemaining { remaining: usize, reason: String },
}

/// Per-identity tally of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub sent: usize,
    pub failed: usize,
    pub reconnects: usize,
    pub status: BatchStatus,
    pub results: Vec<SendResult>,
}

impl SendReport {
    fn empty() -> Self {
        Self {
            sent: 0,
            failed: 0,
            reconnects: 0,
            status: BatchStatus::Completed,
            results: Vec::new(),
        }
    }
}

/// Sends a batch for one identity over a single session.
pub struct ThrottledSender<'a> {
    identity: &'a Identity,
    transport: &'a dyn Transport,
    ledger: &'a SentLedger,
    templates: &'a TemplateSet,
    attachments: &'a [AttachmentPart],
    policy: SendPolicy,
    rng: StdRng,
    state: ConnectionState,
    connection: Option<Box<dyn Connection>>,
}

impl<'a> ThrottledSender<'a> {
    pub fn new(
        identity: &'a Identity,
        transport: &'a dyn Transport,
        ledger: &'a SentLedger,
        templates: &'a TemplateSet,
        attachments: &'a [AttachmentPart],
        policy: SendPolicy,
        rng: StdRng,
    ) -> Self {
        Self {
            identity,
            transport,
            ledger,
            templates,
            attachments,
            policy,
            rng,
            state: ConnectionState::Disconnected,
            connection: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Send to every recipient in order and return the tally.
    pub async fn send_all(&mut self, recipients: &[RecipientRow]) -> SendReport {
        let mut report = SendReport::empty();
        let total = recipients.len();
        if total == 0 {
            return report;
        }

        let name = self.identity.name.clone();

        if let Err(e) = self.connect().await {
            tracing::error!(identity = %name, "SMTP connection failed: {e}");
            let reason = e.to_string();
            report.failed = total;
            report.results = recipients
                .iter()
                .map(|row| SendResult {
                    recipient: row.email().to_string(),
                    outcome: Outcome::Failed(reason.clone()),
                })
                .collect();
            report.status = BatchStatus::ConnectFailed(reason);
            return report;
        }

        let mut since_connect = 0;
        for (index, row) in recipients.iter().enumerate() {
            let recipient = row.email().to_string();
            let message = compose(
                self.identity,
                self.templates,
                row,
                self.attachments,
                &mut self.rng,
            );

            let result = match self.connection.as_mut() {
                Some(conn) => conn.send(&message).await,
                None => Err(crate::error::SendError::NotConnected),
            };

            match result {
                Ok(()) => {
                    report.sent += 1;
                    since_connect += 1;
                    if let Err(e) = self.ledger.record(&recipient, Local::now()).await {
                        tracing::error!(identity = %name, "Failed to record {recipient}: {e}");
                    }
                    tracing::info!(
                        identity = %name,
                        "[{}/{}] Sent to {recipient}",
                        report.sent,
                        total
                    );
                    report.results.push(SendResult {
                        recipient,
                        outcome: Outcome::Sent,
                    });
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(identity = %name, "Failed to send to {recipient}: {e}");
                    report.results.push(SendResult {
                        recipient,
                        outcome: Outcome::Failed(e.to_string()),
                    });
                }
            }

            let remaining = total - index - 1;
            if remaining == 0 {
                break;
            }

            let delay = self.policy.next_delay(&mut self.rng);
            if !delay.is_zero() {
                tracing::debug!(identity = %name, "Waiting {:.1}s", delay.as_secs_f64());
                tokio::time::sleep(delay).await;
            }

            if since_connect >= self.policy.reconnect_every {
                tracing::info!(
                    identity = %name,
                    "Reconnecting SMTP after {since_connect} emails"
                );
                match self.reconnect().await {
                    Ok(()) => {
                        report.reconnects += 1;
                        since_connect = 0;
                    }
                    Err(e) => {
                        tracing::error!(
                            identity = %name,
                            remaining,
                            "SMTP reconnection failed, abandoning batch: {e}"
                        );
                        report.status = BatchStatus::AbortedRemaining {
                            remaining,
                            reason: e.to_string(),
                        };
                        break;
                    }
                }
            }
        }

        self.disconnect().await;
        report
    }

    async fn connect(&mut self) -> Result<(), ConnectionError> {
        let conn = self.transport.connect(self.identity).await?;
        self.connection = Some(conn);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), ConnectionError> {
        self.state = ConnectionState::Reconnecting;
        if let Some(mut conn) = self.connection.take() {
            conn.close().await;
        }
        match self.connect().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Some(mut conn) = self.connection.take() {
            conn.close().await;
        }
        self.state = ConnectionState::Disconnected;
    }
}
