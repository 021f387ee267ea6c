//! Cold-mail campaign: selection, composition and throttled delivery.
//!
//! Core components:
//! - `table`: Recipient rows loaded from the mail-data CSV
//! - `ledger`: Per-identity sent-ledger (dedup filter)
//! - `selector`: One unsent recipient per group, up to the daily cap
//! - `template`: Template sets and placeholder substitution
//! - `composer`: Message composition with attachments
//! - `sender`: Throttled sender (pacing, periodic reconnect)
//! - `orchestrator`: One worker per identity, aggregated report
//! - `report`: End-of-run summary

pub mod composer;
pub mod ledger;
pub mod orchestrator;
pub mod report;
pub mod selector;
pub mod sender;
pub mod table;
pub mod template;

pub use composer::{ComposedMessage, compose};
pub use ledger::SentLedger;
pub use orchestrator::Campaign;
pub use report::{CampaignReport, IdentityStatus, IdentitySummary};
pub use sender::{BatchStatus, SendPolicy, SendReport, ThrottledSender};
pub use table::{RecipientRow, RecipientTable};
pub use template::{Template, TemplateSet};
