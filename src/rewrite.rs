//! Rewriting of attachment references inside rich-text fields.
//!
//! Two strategies run in sequence:
//! - literal replacement of each source attachment URL (and its HTML-escaped
//!   form) by the uploaded target URL;
//! - inline `<img>` tags that point at a numeric attachment id on the source
//!   server are replaced with a fresh tag pointing at the target URL.
//!
//! Only the current item's attachments are considered. Attachments whose
//! upload failed have no target URL, so their references stay as they were.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::model::{SourceIssue, TargetRecord};

static INLINE_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<img\s+[^>]*src="/rest/api/3/attachment/content/(\d+)"[^>]*>"#)
        .expect("inline image pattern is valid")
});

/// One source attachment and, once uploaded, its target URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentUrlPair {
    pub source_id: String,
    pub source_url: String,
    pub target_url: Option<String>,
}

/// Replacement table for one item.
#[derive(Debug, Clone, Default)]
pub struct ReferenceRewriter {
    pairs: Vec<AttachmentUrlPair>,
    /// Longest needle first. `None` marks a target URL that is copied through.
    needles: Vec<(String, Option<String>)>,
}

impl ReferenceRewriter {
    #[must_use]
    pub fn new(pairs: Vec<AttachmentUrlPair>) -> Self {
        let mut needles: Vec<(String, Option<String>)> = Vec::new();
        for pair in &pairs {
            let Some(target) = pair.target_url.as_deref() else {
                continue;
            };
            let escaped = pair.source_url.replace('&', "&amp;");
            for needle in [pair.source_url.clone(), escaped] {
                if !needle.is_empty() && !needles.iter().any(|(n, _)| *n == needle) {
                    needles.push((needle, Some(target.to_string())));
                }
            }
            if !target.is_empty() && !needles.iter().any(|(n, _)| n == target) {
                needles.push((target.to_string(), None));
            }
        }
        needles.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { pairs, needles }
    }

    /// Pairs for every attachment of `issue` mirrored in `record`.
    #[must_use]
    pub fn for_item(issue: &SourceIssue, record: &TargetRecord) -> Self {
        let pairs = record
            .attachments
            .iter()
            .filter_map(|target| {
                let source = issue.attachments.get(target.source_index)?;
                Some(AttachmentUrlPair {
                    source_id: source.id.clone(),
                    source_url: source.url.clone(),
                    target_url: target.url.clone(),
                })
            })
            .collect();
        Self::new(pairs)
    }

    /// True when no attachment has a target URL, so nothing can change.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.needles.is_empty()
    }

    /// Rewrite every reference in `text`. Applying this twice gives the
    /// same result as applying it once.
    #[must_use]
    pub fn rewrite(&self, text: &str) -> String {
        if self.is_noop() {
            return text.to_string();
        }
        let literal = self.replace_literals(text);
        INLINE_IMAGE
            .replace_all(&literal, |caps: &Captures<'_>| self.image_tag(caps))
            .into_owned()
    }

    fn replace_literals(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        'scan: while let Some(ch) = rest.chars().next() {
            for (needle, replacement) in &self.needles {
                if rest.starts_with(needle.as_str()) {
                    out.push_str(replacement.as_deref().unwrap_or(needle));
                    rest = &rest[needle.len()..];
                    continue 'scan;
                }
            }
            out.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
        out
    }

    fn image_tag(&self, caps: &Captures<'_>) -> String {
        let id = &caps[1];
        self.pairs
            .iter()
            .find(|p| p.source_id == id)
            .and_then(|p| p.target_url.as_deref())
            .map_or_else(|| caps[0].to_string(), |url| format!("<img src=\"{url}\" />"))
    }
}
