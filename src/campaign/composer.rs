//! Message composition: random template, per-row substitution, attachments.

use std::path::{Path, PathBuf};

use lettre::Message;
use lettre::message::header::{ContentDisposition, ContentType};
use lettre::message::{Body, Mailbox, MultiPart, SinglePart};
use rand::Rng;
use rand::seq::SliceRandom;

use crate::campaign::table::RecipientRow;
use crate::campaign::template::{TemplateSet, render};
use crate::config::Identity;
use crate::error::{AttachmentError, SendError};

/// A file attached to a message as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPart {
    pub filename: String,
    pub data: Vec<u8>,
}

/// A composed message, not yet transmitted.
#[derive(Debug, Clone)]
pub struct ComposedMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    /// HTML body.
    pub body: String,
    pub attachments: Vec<AttachmentPart>,
}

impl ComposedMessage {
    /// Build the wire message: multipart/mixed with the HTML body followed by
    /// one `application/octet-stream` part per attachment.
    pub fn to_message(&self) -> Result<Message, SendError> {
        let from: Mailbox = self.from.parse().map_err(|e| SendError::InvalidAddress {
            address: self.from.clone(),
            reason: format!("{e}"),
        })?;
        let to: Mailbox = self.to.parse().map_err(|e| SendError::InvalidAddress {
            address: self.to.clone(),
            reason: format!("{e}"),
        })?;

        let html_part = SinglePart::builder()
            .header(ContentType::TEXT_HTML)
            .body(self.body.clone());
        let mut multipart = MultiPart::mixed().singlepart(html_part);

        let octet_stream = ContentType::parse("application/octet-stream").map_err(|e| {
            SendError::Build {
                to: self.to.clone(),
                reason: format!("{e}"),
            }
        })?;
        for attachment in &self.attachments {
            let part = SinglePart::builder()
                .header(octet_stream.clone())
                .header(ContentDisposition::attachment(&attachment.filename))
                .body(Body::new(attachment.data.clone()));
            multipart = multipart.singlepart(part);
        }

        Message::builder()
            .from(from)
            .to(to)
            .subject(&self.subject)
            .multipart(multipart)
            .map_err(|e| SendError::Build {
                to: self.to.clone(),
                reason: format!("{e}"),
            })
    }
}

/// Every regular file in `<dir>/<name>`, sorted by path.
///
/// A missing folder logs a warning and yields no attachments.
pub async fn list_attachments(dir: &Path, name: &str) -> Vec<PathBuf> {
    let folder = dir.join(name);
    let mut entries = match tokio::fs::read_dir(&folder).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(folder = %folder.display(), "Attachments folder not readable: {e}");
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
                    files.push(path);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(folder = %folder.display(), "Stopped listing attachments: {e}");
                break;
            }
        }
    }
    files.sort();
    files
}

/// Read one attachment file.
pub async fn read_attachment(path: &Path) -> Result<AttachmentPart, AttachmentError> {
    let data = tokio::fs::read(path).await.map_err(|source| AttachmentError {
        path: path.to_path_buf(),
        source,
    })?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());
    Ok(AttachmentPart { filename, data })
}

/// Read every attachment in `<dir>/<name>` once, for all of an identity's
/// messages. Unreadable files are logged and skipped.
pub async fn load_attachments(dir: &Path, name: &str) -> Vec<AttachmentPart> {
    let mut parts = Vec::new();
    for path in list_attachments(dir, name).await {
        match read_attachment(&path).await {
            Ok(part) => parts.push(part),
            Err(e) => tracing::warn!("{e}"),
        }
    }
    parts
}

/// Compose a message for `row` from a uniformly chosen template.
pub fn compose<R: Rng + ?Sized>(
    identity: &Identity,
    templates: &TemplateSet,
    row: &RecipientRow,
    attachments: &[AttachmentPart],
    rng: &mut R,
) -> ComposedMessage {
    // TemplateSet is never empty, so the choice always succeeds.
    let template = templates
        .templates()
        .choose(rng)
        .unwrap_or(&templates.templates()[0]);

    ComposedMessage {
        from: identity.email_account.clone(),
        to: row.email().to_string(),
        subject: render(&template.subject, row).into_owned(),
        body: render(&template.body_text(), row).into_owned(),
        attachments: attachments.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::template::Template;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn identity() -> Identity {
        serde_json::from_value(serde_json::json!({
            "supplier_name": "Acme",
            "smtp_server": "smtp.acme.test",
            "smtp_port": 587,
            "email_account": "sales@acme.test",
            "password": "pw",
            "templates": "acme.json",
            "attachments": "acme"
        }))
        .unwrap()
    }

    fn single(subject: &str, body: &[&str]) -> TemplateSet {
        TemplateSet::new(vec![Template {
            subject: subject.into(),
            body: body.iter().map(|s| s.to_string()).collect(),
        }])
        .unwrap()
    }

    #[test]
    fn substitutes_row_fields() {
        let row = RecipientRow::new([("Email", "ann@example.com"), ("First Name", "Ann")]);
        let mut rng = StdRng::seed_from_u64(0);
        let msg = compose(
            &identity(),
            &single("For {first_name}", &["Hello {first_name}"]),
            &row,
            &[],
            &mut rng,
        );
        assert_eq!(msg.body, "Hello Ann");
        assert_eq!(msg.subject, "For Ann");
        assert_eq!(msg.from, "sales@acme.test");
        assert_eq!(msg.to, "ann@example.com");
    }

    #[test]
    fn picks_from_every_template() {
        let set = TemplateSet::new(vec![
            Template {
                subject: "one".into(),
                body: vec!["1".into()],
            },
            Template {
                subject: "two".into(),
                body: vec!["2".into()],
            },
        ])
        .unwrap();
        let row = RecipientRow::new([("Email", "x@example.com")]);
        let mut rng = StdRng::seed_from_u64(42);
        let subjects: std::collections::HashSet<String> = (0..64)
            .map(|_| compose(&identity(), &set, &row, &[], &mut rng).subject)
            .collect();
        assert_eq!(subjects.len(), 2);
    }

    #[test]
    fn attachments_are_copied_into_message() {
        let parts = vec![AttachmentPart {
            filename: "brochure.pdf".into(),
            data: b"%PDF-1.4".to_vec(),
        }];
        let row = RecipientRow::new([("Email", "x@example.com")]);
        let mut rng = StdRng::seed_from_u64(0);
        let msg = compose(&identity(), &single("s", &["b"]), &row, &parts, &mut rng);
        assert_eq!(msg.attachments, parts);
    }

    #[tokio::test]
    async fn load_attachments_reads_sorted_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("acme");
        std::fs::create_dir_all(folder.join("nested")).unwrap();
        std::fs::write(folder.join("b.pdf"), b"b").unwrap();
        std::fs::write(folder.join("a.pdf"), b"a").unwrap();

        let parts = load_attachments(dir.path(), "acme").await;
        let names: Vec<_> = parts.iter().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "b.pdf"]);
        assert_eq!(parts[0].data, b"a");
    }

    #[tokio::test]
    async fn missing_attachment_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_attachment(&dir.path().join("gone.pdf")).await.unwrap_err();
        assert!(err.path.ends_with("gone.pdf"));
    }

    #[tokio::test]
    async fn missing_attachment_folder_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_attachments(dir.path(), "nope").await.is_empty());
        assert!(load_attachments(dir.path(), "nope").await.is_empty());
    }

    #[test]
    fn builds_multipart_message() {
        let msg = ComposedMessage {
            from: "sales@acme.test".into(),
            to: "ann@example.com".into(),
            subject: "Hi".into(),
            body: "<p>Hello</p>".into(),
            attachments: vec![AttachmentPart {
                filename: "a.bin".into(),
                data: vec![0, 1, 2],
            }],
        };
        let wire = String::from_utf8(msg.to_message().unwrap().formatted()).unwrap();
        assert!(wire.contains("multipart/mixed"));
        assert!(wire.contains("application/octet-stream"));
        assert!(wire.contains("filename=\"a.bin\""));
    }

    #[test]
    fn invalid_recipient_is_send_error() {
        let msg = ComposedMessage {
            from: "sales@acme.test".into(),
            to: "not an address".into(),
            subject: "Hi".into(),
            body: "b".into(),
            attachments: vec![],
        };
        assert!(matches!(
            msg.to_message(),
            Err(SendError::InvalidAddress { .. })
        ));
    }
}
