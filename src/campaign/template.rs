//! Template sets and `{placeholder}` substitution.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Deserialize;

use crate::campaign::table::RecipientRow;
use crate::error::ConfigError;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("placeholder pattern is valid"));

/// One message template: a subject and body lines joined with `\n`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Template {
    pub subject: String,
    pub body: Vec<String>,
}

impl Template {
    pub fn body_text(&self) -> String {
        self.body.join("\n")
    }
}

/// The templates one identity picks from at random.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    templates: Vec<Template>,
}

impl TemplateSet {
    /// Returns `None` for an empty list.
    pub fn new(templates: Vec<Template>) -> Option<Self> {
        (!templates.is_empty()).then_some(Self { templates })
    }

    /// Load a JSON array of templates from `<dir>/<name>`.
    pub async fn load(dir: &Path, name: &str) -> Result<Self, ConfigError> {
        let path: PathBuf = dir.join(name);
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound(path.clone()),
            _ => ConfigError::Io(e),
        })?;
        let templates: Vec<Template> =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Self::new(templates).ok_or(ConfigError::EmptyTemplates(path))
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Placeholder name for a column: lowercased, spaces replaced by `_`.
pub fn placeholder_name(column: &str) -> String {
    column.to_lowercase().replace(' ', "_")
}

/// Substitute every `{name}` whose name matches a column of `row`.
/// Unmatched placeholders are left verbatim.
pub fn render<'t>(text: &'t str, row: &RecipientRow) -> Cow<'t, str> {
    let values: HashMap<String, &str> = row
        .fields()
        .map(|(column, value)| (placeholder_name(column), value))
        .collect();

    PLACEHOLDER.replace_all(text, |caps: &Captures<'_>| match values.get(&caps[1]) {
        Some(value) => (*value).to_string(),
        None => caps[0].to_string(),
    })
}
