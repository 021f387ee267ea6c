//! Campaign orchestrator: one worker per identity, results reduced into a
//! single report.
//!
//! Workers share the recipient table read-only and each writes only its own
//! sent-ledger. Counters are local to a worker and returned by value, so the
//! only reduction happens here.

use std::collections::HashSet;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::campaign::composer::load_attachments;
use crate::campaign::ledger::SentLedger;
use crate::campaign::report::{CampaignReport, IdentitySummary};
use crate::campaign::selector::{eligible_count, select};
use crate::campaign::sender::{SendPolicy, ThrottledSender};
use crate::campaign::table::{EMAIL_COLUMN, RecipientRow, RecipientTable};
use crate::campaign::template::TemplateSet;
use crate::config::{CampaignSettings, Identity, RunMode};
use crate::error::Error;
use crate::transport::Transport;

/// Fields overwritten with debug values in debug mode, when present.
const DEBUG_FIELDS: &[(&str, &str)] = &[
    ("Company", "Debug Company Ltd"),
    ("Supplier", "Debug Supplier"),
];

/// Runs every identity's batch concurrently.
pub struct Campaign {
    settings: Arc<CampaignSettings>,
    transport: Arc<dyn Transport>,
    seed: Option<u64>,
}

impl Campaign {
    pub fn new(settings: CampaignSettings, transport: Arc<dyn Transport>) -> Self {
        Self {
            settings: Arc::new(settings),
            transport,
            seed: None,
        }
    }

    /// Seed every worker's RNG for a reproducible run.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn settings(&self) -> &CampaignSettings {
        &self.settings
    }

    /// Run all identities and aggregate the outcome.
    ///
    /// A failing or panicking identity is logged and recorded as a zero
    /// entry; it never affects its siblings.
    pub async fn run(&self, identities: Vec<Identity>, table: Arc<RecipientTable>) -> CampaignReport {
        tracing::info!(
            identities = identities.len(),
            recipients = table.len(),
            debug = self.settings.mode.is_debug(),
            "Processing identities in parallel"
        );

        let names: Vec<String> = identities.iter().map(|id| id.name.clone()).collect();
        let stems = ledger_stems(&identities);
        let handles: Vec<_> = identities
            .into_iter()
            .zip(stems)
            .enumerate()
            .map(|(index, (identity, stem))| {
                let settings = Arc::clone(&self.settings);
                let transport = Arc::clone(&self.transport);
                let table = Arc::clone(&table);
                let rng = match self.seed {
                    Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
                    None => StdRng::from_entropy(),
                };
                tokio::spawn(async move {
                    let ledger = SentLedger::open(&settings.sent_dir, &stem);
                    run_identity(&settings, transport.as_ref(), &identity, &ledger, &table, rng).await
                })
            })
            .collect();

        let mut report = CampaignReport::default();
        for (name, joined) in names.iter().zip(futures::future::join_all(handles).await) {
            let summary = match joined {
                Ok(Ok(summary)) => {
                    tracing::info!(
                        identity = %name,
                        sent = summary.sent,
                        failed = summary.failed,
                        "Identity completed"
                    );
                    summary
                }
                Ok(Err(e)) => {
                    tracing::error!(identity = %name, "Error processing identity: {e}");
                    IdentitySummary::errored(e.to_string())
                }
                Err(e) => {
                    tracing::error!(identity = %name, "Identity worker panicked: {e}");
                    IdentitySummary::errored(format!("worker panicked: {e}"))
                }
            };
            report.insert(name, summary);
        }
        report
    }
}

/// Selection then sending for one identity.
async fn run_identity(
    settings: &CampaignSettings,
    transport: &dyn Transport,
    identity: &Identity,
    ledger: &SentLedger,
    table: &RecipientTable,
    mut rng: StdRng,
) -> Result<IdentitySummary, Error> {
    let name = identity.name.as_str();
    tracing::info!(identity = %name, "Processing identity");

    let templates = TemplateSet::load(&settings.templates_dir, &identity.templates).await?;

    let attachments = load_attachments(&settings.attachments_dir, &identity.attachments).await;
    if attachments.is_empty() {
        tracing::warn!(identity = %name, "No attachments found");
    } else {
        tracing::info!(identity = %name, "Found {} attachment(s)", attachments.len());
    }

    let sent = ledger.already_sent().await;
    tracing::info!(identity = %name, "Found {} previously sent emails", sent.len());

    let group_column = identity.group_column(settings);
    let eligible = eligible_count(table.rows(), &sent);
    let cap = match settings.mode {
        RunMode::Live => settings.daily_cap,
        RunMode::Debug { .. } => settings.daily_cap.min(1),
    };
    let mut selected = select(table.rows(), group_column, &sent, cap, &mut rng);

    if let RunMode::Debug { redirect_to } = &settings.mode {
        for row in &mut selected {
            redirect_for_debug(row, name, redirect_to);
        }
        tracing::info!(identity = %name, "DEBUG mode: sending only to {redirect_to}");
    }

    tracing::info!(
        identity = %name,
        eligible,
        selected = selected.len(),
        group_column,
        "{} emails to send",
        selected.len()
    );

    if selected.is_empty() {
        tracing::info!(identity = %name, "All emails already sent");
        return Ok(IdentitySummary::nothing_to_send());
    }

    let mut sender = ThrottledSender::new(
        identity,
        transport,
        ledger,
        &templates,
        &attachments,
        SendPolicy::from_settings(settings),
        rng,
    );
    let report = sender.send_all(&selected).await;
    tracing::info!(
        identity = %name,
        "{} emails sent successfully",
        report.sent
    );
    Ok(IdentitySummary::from_send(selected.len(), report))
}

/// Ledger stem for each identity, in order. Identities whose names encode to
/// the same stem get a ` (n)` suffix, so every identity owns exactly one store
/// and no store is shared by two workers.
pub fn ledger_stems(identities: &[Identity]) -> Vec<String> {
    let mut taken = HashSet::new();
    identities
        .iter()
        .map(|identity| {
            let base = identity.ledger_stem();
            let mut stem = base.clone();
            let mut n = 2;
            while taken.contains(&stem) {
                stem = format!("{base} ({n})");
                n += 1;
            }
            taken.insert(stem.clone());
            stem
        })
        .collect()
}

/// Point a row at the debug recipient and mark its common template fields.
pub fn redirect_for_debug(row: &mut RecipientRow, identity: &str, redirect_to: &str) {
    row.set(EMAIL_COLUMN, redirect_to);
    row.set("First Name", format!("Debug User ({identity})"));
    for (column, value) in DEBUG_FIELDS {
        if row.has_column(column) {
            row.set(column, format!("{value} ({identity})"));
        }
    }
    if row.has_column("Company Phone") {
        row.set("Company Phone", "+1-555-DEBUG");
    }
}
