//! Configuration types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Group column used when neither the environment nor the identity names one.
pub const DEFAULT_GROUP_COLUMN: &str = "Brand";

/// How a campaign run treats its selected recipients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Send to the selected recipients.
    Live,
    /// Send a single message per identity to `redirect_to`, without delays.
    Debug { redirect_to: String },
}

impl RunMode {
    pub fn is_debug(&self) -> bool {
        matches!(self, Self::Debug { .. })
    }
}

/// Campaign-wide settings.
#[derive(Debug, Clone)]
pub struct CampaignSettings {
    /// Path to the identity list (JSON array).
    pub config_file: PathBuf,
    /// Path to the recipient table (CSV).
    pub maildata_file: PathBuf,
    /// Directory holding template set files.
    pub templates_dir: PathBuf,
    /// Directory holding one attachment folder per identity.
    pub attachments_dir: PathBuf,
    /// Directory holding one sent-ledger per identity.
    pub sent_dir: PathBuf,
    /// Group column used when an identity does not name its own.
    pub group_column: String,
    /// Maximum recipients selected per identity per run.
    pub daily_cap: usize,
    /// Successful sends between proactive reconnects.
    pub reconnect_every: usize,
    /// Lower bound of the randomized inter-send delay.
    pub delay_min: Duration,
    /// Upper bound of the randomized inter-send delay.
    pub delay_max: Duration,
    /// SMTP connect timeout.
    pub connect_timeout: Duration,
    /// Live or debug.
    pub mode: RunMode,
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from("config.json"),
            maildata_file: PathBuf::from("maildata.csv"),
            templates_dir: PathBuf::from("templates"),
            attachments_dir: PathBuf::from("attachments"),
            sent_dir: PathBuf::from("sentdata"),
            group_column: DEFAULT_GROUP_COLUMN.to_string(),
            daily_cap: 100,
            reconnect_every: 40,
            delay_min: Duration::from_secs(30),
            delay_max: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            mode: RunMode::Live,
        }
    }
}

impl CampaignSettings {
    /// Build settings from `COLDMAIL_*` environment variables, falling back
    /// to the defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let path_var = |key: &str, default: PathBuf| {
            std::env::var(key).map(PathBuf::from).unwrap_or(default)
        };

        let delay_min = Duration::from_secs(parse_var(
            "COLDMAIL_DELAY_MIN_SECS",
            defaults.delay_min.as_secs(),
        )?);
        let delay_max = Duration::from_secs(parse_var(
            "COLDMAIL_DELAY_MAX_SECS",
            defaults.delay_max.as_secs(),
        )?);
        if delay_min > delay_max {
            return Err(ConfigError::InvalidValue {
                key: "COLDMAIL_DELAY_MIN_SECS".into(),
                message: format!(
                    "minimum delay {}s exceeds maximum {}s",
                    delay_min.as_secs(),
                    delay_max.as_secs()
                ),
            });
        }

        let reconnect_every = parse_var("COLDMAIL_RECONNECT_EVERY", defaults.reconnect_every)?;
        if reconnect_every == 0 {
            return Err(ConfigError::InvalidValue {
                key: "COLDMAIL_RECONNECT_EVERY".into(),
                message: "must be at least 1".into(),
            });
        }

        let mode = match std::env::var("COLDMAIL_DEBUG_RECIPIENT") {
            Ok(addr) if !addr.trim().is_empty() => RunMode::Debug {
                redirect_to: addr.trim().to_string(),
            },
            _ => RunMode::Live,
        };

        Ok(Self {
            config_file: path_var("COLDMAIL_CONFIG", defaults.config_file),
            maildata_file: path_var("COLDMAIL_MAILDATA", defaults.maildata_file),
            templates_dir: path_var("COLDMAIL_TEMPLATES_DIR", defaults.templates_dir),
            attachments_dir: path_var("COLDMAIL_ATTACHMENTS_DIR", defaults.attachments_dir),
            sent_dir: path_var("COLDMAIL_SENT_DIR", defaults.sent_dir),
            group_column: std::env::var("COLDMAIL_GROUP_COLUMN")
                .unwrap_or(defaults.group_column),
            daily_cap: parse_var("COLDMAIL_DAILY_CAP", defaults.daily_cap)?,
            reconnect_every,
            delay_min,
            delay_max,
            connect_timeout: Duration::from_secs(parse_var(
                "COLDMAIL_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout.as_secs(),
            )?),
            mode,
        })
    }
}

fn parse_var<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// A configured sending account.
#[derive(Debug, Clone, Deserialize)]
pub struct Identity {
    /// Display name, also the key of the identity's report entry and ledger.
    #[serde(rename = "supplier_name")]
    pub name: String,
    pub smtp_server: String,
    pub smtp_port: u16,
    /// Login user and `From` address.
    pub email_account: String,
    pub password: SecretString,
    /// Template set file name, relative to the templates directory.
    pub templates: String,
    /// Attachment folder name, relative to the attachments directory.
    pub attachments: String,
    /// Overrides the campaign's default group column.
    #[serde(default)]
    pub group_key_column: Option<String>,
}

impl Identity {
    /// Implicit TLS on 465, STARTTLS everywhere else.
    pub fn implicit_tls(&self) -> bool {
        self.smtp_port == 465
    }

    pub fn group_column<'a>(&'a self, settings: &'a CampaignSettings) -> &'a str {
        self.group_key_column
            .as_deref()
            .unwrap_or(settings.group_column.as_str())
    }

    /// File stem of the identity's ledger: the name with path-hostile
    /// characters, `%` and edge whitespace percent-encoded, so distinct
    /// names never share a stem.
    pub fn ledger_stem(&self) -> String {
        let last = self.name.chars().count().saturating_sub(1);
        let mut stem = String::with_capacity(self.name.len());
        for (i, c) in self.name.chars().enumerate() {
            let hostile = matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '%')
                || c.is_control()
                || (c.is_whitespace() && (i == 0 || i == last));
            if hostile {
                let mut buf = [0u8; 4];
                for byte in c.encode_utf8(&mut buf).bytes() {
                    stem.push_str(&format!("%{byte:02X}"));
                }
            } else {
                stem.push(c);
            }
        }
        stem
    }
}

/// Load the identity list from a JSON array file.
pub fn load_identities(path: &Path) -> Result<Vec<Identity>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
        _ => ConfigError::Io(e),
    })?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const SAMPLE: &str = r#"[
        {
            "supplier_name": "Acme Parts",
            "smtp_server": "smtp.acme.test",
            "smtp_port": 465,
            "email_account": "sales@acme.test",
            "password": "hunter2",
            "templates": "acme.json",
            "attachments": "acme"
        },
        {
            "supplier_name": "Globex/EU",
            "smtp_server": "smtp.globex.test",
            "smtp_port": 587,
            "email_account": "hello@globex.test",
            "password": "s3cret",
            "templates": "globex.json",
            "attachments": "globex",
            "group_key_column": "Manufacturer"
        }
    ]"#;

    #[test]
    fn identities_parse_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let ids = load_identities(&path).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].name, "Acme Parts");
        assert_eq!(ids[0].password.expose_secret(), "hunter2");
        assert!(ids[0].implicit_tls());
        assert!(!ids[1].implicit_tls());
        assert_eq!(ids[1].group_key_column.as_deref(), Some("Manufacturer"));
    }

    #[test]
    fn group_column_falls_back_to_settings() {
        let ids: Vec<Identity> = serde_json::from_str(SAMPLE).unwrap();
        let settings = CampaignSettings::default();
        assert_eq!(ids[0].group_column(&settings), DEFAULT_GROUP_COLUMN);
        assert_eq!(ids[1].group_column(&settings), "Manufacturer");
    }

    #[test]
    fn ledger_stem_encodes_separators() {
        let ids: Vec<Identity> = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(ids[0].ledger_stem(), "Acme Parts");
        assert_eq!(ids[1].ledger_stem(), "Globex%2FEU");
    }

    #[test]
    fn ledger_stems_of_distinct_names_differ() {
        let names = ["Globex/EU", "Globex:EU", "Globex?EU", " Globex/EU", "Globex_EU", "Globex%2FEU"];
        let ids: Vec<Identity> = serde_json::from_str(SAMPLE).unwrap();
        let stems: std::collections::HashSet<String> = names
            .iter()
            .map(|name| {
                let mut id = ids[1].clone();
                id.name = name.to_string();
                id.ledger_stem()
            })
            .collect();
        assert_eq!(stems.len(), names.len());
        assert!(stems.iter().all(|s| !s.contains('/') && !s.starts_with(' ')));
    }

    #[test]
    fn missing_config_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_identities(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn malformed_config_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_identities(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn defaults_match_campaign_limits() {
        let s = CampaignSettings::default();
        assert_eq!(s.daily_cap, 100);
        assert_eq!(s.reconnect_every, 40);
        assert_eq!(s.delay_min, Duration::from_secs(30));
        assert_eq!(s.delay_max, Duration::from_secs(60));
        assert_eq!(s.mode, RunMode::Live);
    }
}
