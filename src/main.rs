use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use cold_mailer::campaign::{Campaign, RecipientTable};
use cold_mailer::config::{CampaignSettings, RunMode, load_identities};
use cold_mailer::diagnostics::{self, PROBE_TIMEOUT};
use cold_mailer::transport::{SmtpMailer, install_crypto_provider};

#[derive(Parser)]
#[command(name = "cold-mailer", version, about = "Per-identity throttled cold-mail sender")]
struct Cli {
    /// Test SMTP connectivity and authentication for every identity, then exit
    #[arg(long)]
    test_smtp: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Install rustls crypto provider before any TLS usage
    install_crypto_provider();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let settings = CampaignSettings::from_env().context("invalid COLDMAIL_* settings")?;
    let identities = load_identities(&settings.config_file).with_context(|| {
        format!(
            "no valid identity configuration at {}",
            settings.config_file.display()
        )
    })?;
    if identities.is_empty() {
        anyhow::bail!(
            "identity configuration {} is empty",
            settings.config_file.display()
        );
    }

    let mailer = Arc::new(SmtpMailer::new(settings.connect_timeout));
    let started = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");

    if cli.test_smtp {
        eprintln!("Testing SMTP connections for all identities");
        eprintln!("   Started: {started}");
        let reports = diagnostics::diagnose(&identities, mailer.as_ref(), PROBE_TIMEOUT).await;
        let failed: Vec<&str> = reports
            .iter()
            .filter(|r| !r.ok())
            .map(|r| r.identity.as_str())
            .collect();
        if failed.is_empty() {
            eprintln!("All SMTP connections are working");
            return Ok(());
        }
        anyhow::bail!("SMTP check failed for: {}", failed.join(", "));
    }

    eprintln!("Cold Mailer v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Started: {started}");
    match &settings.mode {
        RunMode::Live => eprintln!("   Mode: live"),
        RunMode::Debug { redirect_to } => eprintln!("   Mode: debug (all mail to {redirect_to})"),
    }
    eprintln!("   Daily cap: {} per identity", settings.daily_cap);
    eprintln!("   Identities: {}\n", identities.len());

    let table = RecipientTable::load_csv(&settings.maildata_file).with_context(|| {
        format!(
            "failed to load mail data from {}",
            settings.maildata_file.display()
        )
    })?;
    if table.is_empty() {
        anyhow::bail!(
            "no mail data available in {}",
            settings.maildata_file.display()
        );
    }

    let campaign = Campaign::new(settings, mailer);
    let report = campaign.run(identities, Arc::new(table)).await;

    eprintln!("\n{report}");
    if campaign.settings().mode.is_debug() {
        eprintln!("Note: DEBUG mode was enabled, no real recipients were contacted");
    }
    Ok(())
}
