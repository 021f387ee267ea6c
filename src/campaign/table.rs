//! Recipient table: the mail-data rows every identity selects from.

use std::path::Path;

use crate::error::ConfigError;

/// Column holding the recipient address.
pub const EMAIL_COLUMN: &str = "Email";

/// One recipient row. Fields keep the table's column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientRow {
    fields: Vec<(String, String)>,
}

impl RecipientRow {
    /// Build a row from `(column, value)` pairs.
    pub fn new<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value of a column, if the row has it.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == column)
            .map(|(_, v)| v.as_str())
    }

    /// The recipient address as written in the table (trimmed).
    pub fn email(&self) -> &str {
        self.get(EMAIL_COLUMN).map(str::trim).unwrap_or_default()
    }

    /// Set a column, appending it when the row lacks it.
    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == column) {
            Some((_, v)) => *v = value,
            None => self.fields.push((column.to_string(), value)),
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == column)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Normalized form of an address, used for every dedup comparison.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// The whole recipient table. Loaded once per run, shared read-only.
#[derive(Debug, Clone, Default)]
pub struct RecipientTable {
    rows: Vec<RecipientRow>,
}

impl RecipientTable {
    pub fn new(rows: Vec<RecipientRow>) -> Self {
        Self { rows }
    }

    /// Load a CSV table with a header row.
    ///
    /// Fully blank rows and rows with a blank `Email` are dropped.
    pub fn load_csv(path: &Path) -> Result<Self, ConfigError> {
        let parse_err = |e: csv::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_path(path)
            .map_err(|e| {
                let missing = matches!(
                    e.kind(),
                    csv::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound
                );
                if missing {
                    ConfigError::NotFound(path.to_path_buf())
                } else {
                    parse_err(e)
                }
            })?;

        let headers = reader.headers().map_err(parse_err)?.clone();
        if !headers.iter().any(|h| h == EMAIL_COLUMN) {
            return Err(ConfigError::MissingColumn {
                path: path.to_path_buf(),
                column: EMAIL_COLUMN.to_string(),
            });
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(parse_err)?;
            if record.iter().all(|v| v.trim().is_empty()) {
                continue;
            }
            let row = RecipientRow::new(
                headers
                    .iter()
                    .zip(record.iter())
                    .map(|(h, v)| (h.to_string(), v.to_string())),
            );
            if row.email().is_empty() {
                continue;
            }
            rows.push(row);
        }

        tracing::debug!(path = %path.display(), rows = rows.len(), "Loaded recipient table");
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[RecipientRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_csv(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maildata.csv");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn load_drops_blank_rows_and_missing_emails() {
        let (_dir, path) = write_csv(
            "First Name,Email,Brand\n\
             Ann,ann@example.com,Bosch\n\
             ,,\n\
             Bob,,Makita\n\
             Cid,  cid@example.com ,Makita\n",
        );
        let table = RecipientTable::load_csv(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].get("First Name"), Some("Ann"));
        assert_eq!(table.rows()[1].email(), "cid@example.com");
    }

    #[test]
    fn load_requires_email_column() {
        let (_dir, path) = write_csv("Name,Brand\nAnn,Bosch\n");
        let err = RecipientTable::load_csv(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingColumn { .. }));
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = RecipientTable::load_csv(&dir.path().join("none.csv")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn short_records_keep_leading_columns() {
        let (_dir, path) = write_csv("Email,Brand,Company\ndan@example.com,Hilti\n");
        let table = RecipientTable::load_csv(&path).unwrap();
        let row = &table.rows()[0];
        assert_eq!(row.get("Brand"), Some("Hilti"));
        assert_eq!(row.get("Company"), None);
    }

    #[test]
    fn set_overwrites_or_appends() {
        let mut row = RecipientRow::new([("Email", "a@x.io"), ("Company", "X")]);
        row.set("Company", "Y");
        row.set("Supplier", "Z");
        assert_eq!(row.get("Company"), Some("Y"));
        assert_eq!(row.get("Supplier"), Some("Z"));
        assert_eq!(row.fields().count(), 3);
    }

    #[test]
    fn normalize_trims_and_lowercases() {
        assert_eq!(normalize_email("  Ann@Example.COM "), "ann@example.com");
    }
}
