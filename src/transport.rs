//! Mail transport seam: connect/authenticate, send, close.
//!
//! The SMTP implementation wraps lettre's blocking `SmtpTransport`. `connect`
//! verifies reachability and credentials on a short-lived session that ends
//! with QUIT; the returned `Connection` then delivers over its own pooled
//! session (at most one), opened on the first send and reused until `close`.
//! Blocking calls run on `spawn_blocking` and occupy only the calling worker.

use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::PoolConfig;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport as _};
use secrecy::ExposeSecret;

use crate::campaign::composer::ComposedMessage;
use crate::config::Identity;
use crate::error::{ConnectionError, SendError};

/// Opens authenticated sessions for an identity.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and authenticate. Failure here is fatal for a batch.
    async fn connect(&self, identity: &Identity) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// One open, authenticated session.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, message: &ComposedMessage) -> Result<(), SendError>;

    /// Close the session. Errors are swallowed.
    async fn close(&mut self);
}

// ── SMTP ────────────────────────────────────────────────────────────

/// SMTP over lettre: implicit TLS on port 465, STARTTLS otherwise.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    connect_timeout: Duration,
}

impl SmtpMailer {
    pub fn new(connect_timeout: Duration) -> Self {
        install_crypto_provider();
        Self { connect_timeout }
    }

    fn build(&self, identity: &Identity) -> Result<SmtpTransport, ConnectionError> {
        let builder = if identity.implicit_tls() {
            SmtpTransport::relay(&identity.smtp_server)
        } else {
            SmtpTransport::starttls_relay(&identity.smtp_server)
        }
        .map_err(|e| smtp_error(identity, e))?;

        Ok(builder
            .port(identity.smtp_port)
            .credentials(Credentials::new(
                identity.email_account.clone(),
                identity.password.expose_secret().to_string(),
            ))
            .timeout(Some(self.connect_timeout))
            .pool_config(PoolConfig::new().max_size(1))
            .build())
    }
}

/// Install the ring provider as the process-wide rustls default. Safe to call
/// more than once.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

fn smtp_error(identity: &Identity, e: lettre::transport::smtp::Error) -> ConnectionError {
    ConnectionError::Smtp {
        host: identity.smtp_server.clone(),
        port: identity.smtp_port,
        reason: e.to_string(),
    }
}

#[async_trait]
impl Transport for SmtpMailer {
    async fn connect(&self, identity: &Identity) -> Result<Box<dyn Connection>, ConnectionError> {
        let transport = self.build(identity)?;

        let probe = transport.clone();
        let connected = tokio::task::spawn_blocking(move || probe.test_connection())
            .await
            .map_err(|e| ConnectionError::Task(e.to_string()))?
            .map_err(|e| smtp_error(identity, e))?;

        if !connected {
            return Err(ConnectionError::Rejected {
                host: identity.smtp_server.clone(),
                port: identity.smtp_port,
            });
        }

        tracing::debug!(
            identity = %identity.name,
            host = %identity.smtp_server,
            port = identity.smtp_port,
            "SMTP session established"
        );
        Ok(Box::new(SmtpConnection {
            transport: Some(transport),
        }))
    }
}

/// Credentials already verified by `connect`. Holds a one-session pool that
/// is opened lazily by the first send; dropping it closes that session.
pub struct SmtpConnection {
    transport: Option<SmtpTransport>,
}

#[async_trait]
impl Connection for SmtpConnection {
    async fn send(&mut self, message: &ComposedMessage) -> Result<(), SendError> {
        let transport = self.transport.clone().ok_or(SendError::NotConnected)?;
        let email = message.to_message()?;
        let to = message.to.clone();

        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| SendError::Delivery {
                to: to.clone(),
                reason: format!("send task failed: {e}"),
            })?
            .map_err(|e| SendError::Delivery {
                to,
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(transport) = self.transport.take() {
            let _ = tokio::task::spawn_blocking(move || drop(transport)).await;
        }
    }
}
