//! Note parsing and serialization.
//!
//! A note is a markdown file with an optional YAML-like frontmatter block.
//! The frontmatter parser is hand-rolled rather than built on a YAML crate:
//! the format must preserve unknown fields verbatim and round-trip
//! byte-identically when unchanged, which a conformant YAML library would
//! fight (normalized quoting, key reordering, flow-style rewriting).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::{self, ErrorKind};
use crate::id::Identifier;

/// Maximum serialized note size. Guards against memory exhaustion from a
/// corrupted or maliciously large file.
const MAX_NOTE_SIZE: usize = 10 * 1024 * 1024;

const DELIMITER: &str = "---";

#[derive(Error, Debug)]
pub enum NoteError {
    #[error("note exceeds maximum size of {MAX_NOTE_SIZE} bytes")]
    TooLarge,
    #[error("{0}")]
    Validation(String),
}

impl From<NoteError> for error::Error {
    fn from(e: NoteError) -> Self {
        error::Error::with_source(ErrorKind::Validation, e.to_string(), e)
    }
}

/// Structured header parsed from a note's `---` delimited block.
///
/// Unknown keys are preserved in `extra`, in their original order, so a
/// note edited by a tool that doesn't understand a given key still
/// round-trips that key unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Frontmatter {
    pub title: String,
    pub tags: BTreeSet<String>,
    pub note_type: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub extra: Vec<(String, String)>,
}

impl Default for Frontmatter {
    fn default() -> Self {
        Frontmatter {
            title: String::new(),
            tags: BTreeSet::new(),
            note_type: None,
            created: None,
            updated: None,
            extra: Vec::new(),
        }
    }
}

/// A parsed note: identifier, frontmatter, body content, and storage
/// metadata.
#[derive(Debug, Clone)]
pub struct Note {
    pub id: Identifier,
    pub title: String,
    pub frontmatter: Frontmatter,
    pub content: String,
    pub filepath: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub size: usize,
    /// Set when the frontmatter block was present but malformed; the whole
    /// file was treated as body and this diagnostic is surfaced to callers
    /// rather than failing the parse.
    pub parse_warning: Option<String>,
}

impl Note {
    /// Creates a new note in memory (not yet written). `filepath` is chosen
    /// by the caller and is immutable thereafter.
    pub fn new(
        id: Identifier,
        title: impl Into<String>,
        content: impl Into<String>,
        filepath: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let title = title.into();
        Note {
            id,
            title: title.clone(),
            frontmatter: Frontmatter {
                title,
                created: Some(now),
                updated: Some(now),
                ..Default::default()
            },
            content: content.into(),
            filepath: filepath.into(),
            created_at: now,
            updated_at: now,
            size: 0,
            parse_warning: None,
        }
    }

    /// Serializes this note to its on-disk form: `---` frontmatter `---`
    /// followed by the body.
    pub fn serialize(&self) -> String {
        let mut fm = String::new();
        fm.push_str(&format!("title: {}\n", self.frontmatter.title));
        if !self.frontmatter.tags.is_empty() {
            let tags: Vec<&str> = self.frontmatter.tags.iter().map(|s| s.as_str()).collect();
            fm.push_str(&format!("tags: [{}]\n", tags.join(", ")));
        }
        if let Some(t) = &self.frontmatter.note_type {
            fm.push_str(&format!("type: {t}\n"));
        }
        if let Some(c) = &self.frontmatter.created {
            fm.push_str(&format!("created: {}\n", c.to_rfc3339()));
        }
        if let Some(u) = &self.frontmatter.updated {
            fm.push_str(&format!("updated: {}\n", u.to_rfc3339()));
        }
        for (key, value) in &self.frontmatter.extra {
            fm.push_str(&format!("{key}: {value}\n"));
        }
        format!("{DELIMITER}\n{fm}{DELIMITER}\n{}", self.content)
    }

    /// Parses `raw` (the full file content) at `filepath` into a [`Note`].
    /// `filepath`'s stem must be the note's identifier per the on-disk
    /// naming convention (`<id>.md`); callers that don't have an
    /// identifier-named path should use [`Note::parse_with_id`] instead.
    pub fn parse(filepath: &str, raw: &str) -> Result<Note, error::Error> {
        let stem = std::path::Path::new(filepath)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        let id = Identifier::parse(stem).map_err(|_| {
            NoteError::Validation(format!(
                "filepath '{filepath}' does not encode a valid identifier"
            ))
        })?;
        Self::parse_with_id(id, filepath, raw)
    }

    pub fn parse_with_id(id: Identifier, filepath: &str, raw: &str) -> Result<Note, error::Error> {
        if raw.len() > MAX_NOTE_SIZE {
            return Err(NoteError::TooLarge.into());
        }

        let (frontmatter, body, parse_warning) = parse_frontmatter(raw);
        let title = resolve_title(&frontmatter, body, &id);

        let created_at = frontmatter.created.unwrap_or_else(|| {
            DateTime::from_timestamp_millis(id.extract_timestamp() as i64).unwrap_or_else(Utc::now)
        });
        let updated_at = frontmatter.updated.unwrap_or(created_at).max(created_at);

        let mut frontmatter = frontmatter;
        frontmatter.title = title.clone();

        Ok(Note {
            id,
            title,
            frontmatter,
            content: body.to_string(),
            filepath: filepath.to_string(),
            created_at,
            updated_at,
            size: raw.len(),
            parse_warning,
        })
    }

    /// Re-reads a note's body post-edit, discarding any frontmatter the
    /// user re-serialized, and recomposes frontmatter from this in-memory
    /// object with a refreshed `updated_at`.
    pub fn apply_edit(&mut self, raw: &str) {
        let (_discarded_frontmatter, body, _warning) = parse_frontmatter(raw);
        self.content = body.to_string();
        self.updated_at = Utc::now();
        self.frontmatter.updated = Some(self.updated_at);
    }
}

fn resolve_title(frontmatter: &Frontmatter, body: &str, id: &Identifier) -> String {
    if !frontmatter.title.is_empty() {
        return frontmatter.title.clone();
    }
    if let Some(h1) = first_h1(body) {
        return h1;
    }
    id.to_string()
}

fn first_h1(body: &str) -> Option<String> {
    body.lines().find_map(|line| {
        let trimmed = line.trim_start();
        trimmed.strip_prefix("# ").map(|rest| rest.trim().to_string())
    })
}

/// Parses the `---`-delimited frontmatter block, if present and
/// well-formed. Returns `(frontmatter, body, warning)`. On any malformed
/// input (unbalanced delimiters), the whole input is treated as body and a
/// diagnostic is returned rather than failing the parse.
fn parse_frontmatter(raw: &str) -> (Frontmatter, &str, Option<String>) {
    let Some(rest) = raw.strip_prefix(DELIMITER) else {
        return (Frontmatter::default(), raw, None);
    };
    let rest = rest.strip_prefix('\n').unwrap_or(rest);

    let Some(end) = find_closing_delimiter(rest) else {
        return (
            Frontmatter::default(),
            raw,
            Some("frontmatter delimiter opened but never closed; treating file as body".to_string()),
        );
    };

    let (block, after) = rest.split_at(end);
    let body = after
        .strip_prefix(DELIMITER)
        .map(|b| b.strip_prefix('\n').unwrap_or(b))
        .unwrap_or(after);

    let frontmatter = parse_frontmatter_block(block);
    (frontmatter, body, None)
}

fn find_closing_delimiter(rest: &str) -> Option<usize> {
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches('\n');
        if trimmed == DELIMITER {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

fn parse_frontmatter_block(block: &str) -> Frontmatter {
    let mut fm = Frontmatter::default();
    for line in block.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        match key {
            "title" => fm.title = value.to_string(),
            "tags" => fm.tags = parse_inline_array(value).into_iter().collect(),
            "type" => fm.note_type = Some(value.to_string()),
            "created" => {
                fm.created = DateTime::parse_from_rfc3339(value)
                    .ok()
                    .map(|d| d.with_timezone(&Utc))
            }
            "updated" => {
                fm.updated = DateTime::parse_from_rfc3339(value)
                    .ok()
                    .map(|d| d.with_timezone(&Utc))
            }
            _ => fm.extra.push((key.to_string(), value.to_string())),
        }
    }
    fm
}

fn parse_inline_array(value: &str) -> Vec<String> {
    let inner = value.trim().trim_start_matches('[').trim_end_matches(']');
    inner
        .split(',')
        .map(|s| s.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
