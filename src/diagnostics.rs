//! SMTP diagnostics: reachability probe plus connect/authenticate per
//! identity, without sending anything.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::config::Identity;
use crate::error::ConnectionError;
use crate::transport::Transport;

/// Timeout of the raw TCP reachability probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of probing one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub identity: String,
    pub reachable: bool,
    pub authenticated: bool,
    pub error: Option<String>,
}

impl ProbeReport {
    pub fn ok(&self) -> bool {
        self.reachable && self.authenticated
    }
}

/// Open and drop a TCP connection to the identity's SMTP endpoint.
pub async fn probe_reachable(identity: &Identity, timeout: Duration) -> Result<(), ConnectionError> {
    let unreachable = |reason: String| ConnectionError::Unreachable {
        host: identity.smtp_server.clone(),
        port: identity.smtp_port,
        reason,
    };
    let addr = (identity.smtp_server.as_str(), identity.smtp_port);
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(unreachable(e.to_string())),
        Err(_) => Err(unreachable(format!("timed out after {}s", timeout.as_secs()))),
    }
}

/// Probe every identity in turn.
pub async fn diagnose(
    identities: &[Identity],
    transport: &dyn Transport,
    probe_timeout: Duration,
) -> Vec<ProbeReport> {
    let mut reports = Vec::with_capacity(identities.len());
    for identity in identities {
        reports.push(diagnose_one(identity, transport, probe_timeout).await);
    }
    reports
}

async fn diagnose_one(
    identity: &Identity,
    transport: &dyn Transport,
    probe_timeout: Duration,
) -> ProbeReport {
    let name = identity.name.as_str();
    tracing::info!(
        identity = %name,
        "Testing SMTP connection to {}:{}",
        identity.smtp_server,
        identity.smtp_port
    );

    let mut report = ProbeReport {
        identity: identity.name.clone(),
        reachable: false,
        authenticated: false,
        error: None,
    };

    if let Err(e) = probe_reachable(identity, probe_timeout).await {
        tracing::error!(identity = %name, "{e}");
        report.error = Some(e.to_string());
        return report;
    }
    report.reachable = true;
    tracing::info!(identity = %name, "Server is reachable");

    match transport.connect(identity).await {
        Ok(mut conn) => {
            conn.close().await;
            report.authenticated = true;
            tracing::info!(identity = %name, "SMTP connection and authentication successful");
        }
        Err(e) => {
            tracing::error!(identity = %name, "{e}");
            report.error = Some(e.to_string());
        }
    }
    report
}
