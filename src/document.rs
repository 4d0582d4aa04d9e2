// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Authoritative document state.
//!
//! The manager owns the current text of every editor-open document and
//! hands out immutable [`DocumentSnapshot`]s. A snapshot taken at an edit
//! point stays valid for as long as a request holds it, no matter how many
//! edits land afterwards. Only document-update handlers mutate the manager;
//! the scheduler guarantees there is a single writer per URI.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result as AnyResult};
use lsp_types::{Position, Range, TextDocumentContentChangeEvent, Uri};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// A language the server routes to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Swift,
    C,
    Cpp,
    ObjectiveC,
    ObjectiveCpp,
}

impl Language {
    /// Maps an LSP `languageId` string.
    #[must_use]
    pub fn from_lsp_id(id: &str) -> Option<Self> {
        match id {
            "swift" => Some(Self::Swift),
            "c" => Some(Self::C),
            "cpp" => Some(Self::Cpp),
            "objective-c" => Some(Self::ObjectiveC),
            "objective-cpp" => Some(Self::ObjectiveCpp),
            _ => None,
        }
    }

    /// The LSP `languageId` string.
    #[must_use]
    pub const fn as_lsp_id(self) -> &'static str {
        match self {
            Self::Swift => "swift",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::ObjectiveC => "objective-c",
            Self::ObjectiveCpp => "objective-cpp",
        }
    }

    /// Infers a language from a file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("swift") => Some(Self::Swift),
            Some("c") => Some(Self::C),
            Some("cpp" | "cc" | "cxx" | "hpp" | "hh") => Some(Self::Cpp),
            Some("m") => Some(Self::ObjectiveC),
            Some("mm") => Some(Self::ObjectiveCpp),
            // Ambiguous; the C-family backend sorts it out from the build
            // settings, we just need a family.
            Some("h") => Some(Self::C),
            _ => None,
        }
    }

    /// Extensions belonging to this language, used for file-watcher globs.
    #[must_use]
    pub const fn source_extensions(self) -> &'static [&'static str] {
        match self {
            Self::Swift => &["swift"],
            Self::C => &["c", "h"],
            Self::Cpp => &["cpp", "cc", "cxx", "hpp", "hh", "h"],
            Self::ObjectiveC => &["m", "h"],
            Self::ObjectiveCpp => &["mm", "h"],
        }
    }

    /// True for the C-family languages served by the C-family backend.
    #[must_use]
    pub const fn is_c_family(self) -> bool {
        matches!(
            self,
            Self::C | Self::Cpp | Self::ObjectiveC | Self::ObjectiveCpp
        )
    }
}

/// Byte offsets of line starts, supporting position conversions in both
/// UTF-16 (editor side) and UTF-8 (index side) column units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTable {
    line_starts: Vec<usize>,
}

impl LineTable {
    /// Builds the table for `text`. Line count is one plus the number of
    /// line feeds.
    #[must_use]
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, byte) in text.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { line_starts }
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// The byte range of `line`'s content, excluding the terminator.
    fn line_span(&self, text: &str, line: usize) -> Option<(usize, usize)> {
        let start = *self.line_starts.get(line)?;
        let end = match self.line_starts.get(line + 1) {
            Some(&next) => next - 1,
            None => text.len(),
        };
        Some((start, end))
    }

    /// Byte offset for a zero-based (line, UTF-16 column) position.
    ///
    /// A column past the end of the line clamps to the line end, per the
    /// LSP position convention. An out-of-range line is an error.
    pub fn offset_utf16(&self, text: &str, line: u32, character: u32) -> Result<usize> {
        let (start, end) = self
            .line_span(text, line as usize)
            .ok_or_else(|| invalid_position(line, character))?;
        let mut utf16 = 0u32;
        for (i, ch) in text[start..end].char_indices() {
            if utf16 >= character {
                return Ok(start + i);
            }
            utf16 += ch.len_utf16() as u32;
        }
        Ok(end)
    }

    /// Byte offset for a zero-based (line, UTF-8 column) position, clamped
    /// to the line end.
    pub fn offset_utf8(&self, text: &str, line: u32, column: u32) -> Result<usize> {
        let (start, end) = self
            .line_span(text, line as usize)
            .ok_or_else(|| invalid_position(line, column))?;
        Ok((start + column as usize).min(end))
    }

    /// Converts a byte offset into a zero-based (line, UTF-16 column)
    /// position.
    #[must_use]
    pub fn position_utf16(&self, text: &str, offset: usize) -> Position {
        let offset = offset.min(text.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let start = self.line_starts[line];
        let character = text[start..offset].encode_utf16().count();
        Position::new(line as u32, character as u32)
    }

    /// Converts a zero-based (line, UTF-8 column) to the UTF-16 column on
    /// the same line, clamping to the line end.
    pub fn utf8_to_utf16_column(&self, text: &str, line: u32, column: u32) -> Result<u32> {
        let (start, end) = self
            .line_span(text, line as usize)
            .ok_or_else(|| invalid_position(line, column))?;
        let byte = (start + column as usize).min(end);
        // Clamp into a char boundary so mid-character columns from a stale
        // index cannot split a scalar.
        let mut byte = byte;
        while byte > start && !text.is_char_boundary(byte) {
            byte -= 1;
        }
        Ok(text[start..byte].encode_utf16().count() as u32)
    }
}

fn invalid_position(line: u32, character: u32) -> Error {
    let position = Position::new(line, character);
    Error::InvalidRange(Range::new(position, position))
}

/// An immutable document version at a given edit point.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    pub uri: Uri,
    pub language: Language,
    pub version: i32,
    pub text: Arc<str>,
    line_table: LineTable,
}

impl DocumentSnapshot {
    /// Builds a snapshot; the line table is derived from `text`.
    #[must_use]
    pub fn new(uri: Uri, language: Language, version: i32, text: &str) -> Self {
        Self {
            uri,
            language,
            version,
            text: Arc::from(text),
            line_table: LineTable::new(text),
        }
    }

    #[must_use]
    pub fn line_table(&self) -> &LineTable {
        &self.line_table
    }

    /// Byte offset for an editor position (UTF-16 columns).
    pub fn offset_of_position(&self, position: Position) -> Result<usize> {
        self.line_table
            .offset_utf16(&self.text, position.line, position.character)
    }

    /// Editor position (UTF-16 columns) for a byte offset.
    #[must_use]
    pub fn position_of_offset(&self, offset: usize) -> Position {
        self.line_table.position_utf16(&self.text, offset)
    }

    /// Editor position for zero-based (line, UTF-8 column) coordinates.
    pub fn position_of_utf8_coords(&self, line: u32, column: u32) -> Result<Position> {
        let character = self
            .line_table
            .utf8_to_utf16_column(&self.text, line, column)?;
        Ok(Position::new(line, character))
    }

    /// The byte range covered by an editor range.
    pub fn byte_range(&self, range: Range) -> Result<std::ops::Range<usize>> {
        let start = self.offset_of_position(range.start)?;
        let end = self.offset_of_position(range.end)?;
        if start > end {
            return Err(Error::InvalidRange(range));
        }
        Ok(start..end)
    }
}

struct OpenDocument {
    snapshot: Arc<DocumentSnapshot>,
}

/// Owner of every editor-open buffer.
pub struct DocumentManager {
    documents: Mutex<HashMap<Uri, OpenDocument>>,
}

impl Default for DocumentManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an opened document and returns its initial snapshot.
    ///
    /// Re-opening an already-open URI replaces the buffer; the editor is
    /// authoritative about open state.
    pub fn open(
        &self,
        uri: Uri,
        language: Language,
        version: i32,
        text: &str,
    ) -> Arc<DocumentSnapshot> {
        let snapshot = Arc::new(DocumentSnapshot::new(uri.clone(), language, version, text));
        let mut documents = self.documents.lock().expect("document map poisoned");
        if documents
            .insert(
                uri.clone(),
                OpenDocument {
                    snapshot: snapshot.clone(),
                },
            )
            .is_some()
        {
            debug!("re-opened already-open document {}", uri.as_str());
        }
        trace!("open {} v{version}", uri.as_str());
        snapshot
    }

    /// Applies incremental or full-text changes, producing a new snapshot.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] if the URI is not open.
    /// - [`Error::StaleVersion`] if `version` does not advance.
    /// - [`Error::InvalidRange`] for a range with reversed endpoints or a
    ///   line outside the document.
    pub fn edit(
        &self,
        uri: &Uri,
        version: i32,
        changes: &[TextDocumentContentChangeEvent],
    ) -> Result<Arc<DocumentSnapshot>> {
        let mut documents = self.documents.lock().expect("document map poisoned");
        let doc = documents
            .get_mut(uri)
            .ok_or_else(|| Error::NotOpen(uri.as_str().to_string()))?;

        let current = doc.snapshot.version;
        if version <= current {
            return Err(Error::StaleVersion {
                uri: uri.as_str().to_string(),
                got: version,
                current,
            });
        }

        let mut text = doc.snapshot.text.to_string();
        let mut table = doc.snapshot.line_table.clone();
        for change in changes {
            match change.range {
                Some(range) => {
                    let start = table.offset_utf16(&text, range.start.line, range.start.character)?;
                    let end = table.offset_utf16(&text, range.end.line, range.end.character)?;
                    if start > end {
                        return Err(Error::InvalidRange(range));
                    }
                    text.replace_range(start..end, &change.text);
                }
                None => {
                    text = change.text.clone();
                }
            }
            table = LineTable::new(&text);
        }

        let snapshot = Arc::new(DocumentSnapshot::new(
            uri.clone(),
            doc.snapshot.language,
            version,
            &text,
        ));
        doc.snapshot = snapshot.clone();
        trace!("edit {} -> v{version}", uri.as_str());
        Ok(snapshot)
    }

    /// Removes an open buffer.
    ///
    /// # Errors
    ///
    /// [`Error::NotOpen`] if the URI is not open.
    pub fn close(&self, uri: &Uri) -> Result<()> {
        let mut documents = self.documents.lock().expect("document map poisoned");
        documents
            .remove(uri)
            .map(|_| trace!("close {}", uri.as_str()))
            .ok_or_else(|| Error::NotOpen(uri.as_str().to_string()))
    }

    /// The latest snapshot of an open document.
    ///
    /// # Errors
    ///
    /// [`Error::NotOpen`] if the URI is not open.
    pub fn latest(&self, uri: &Uri) -> Result<Arc<DocumentSnapshot>> {
        let documents = self.documents.lock().expect("document map poisoned");
        documents
            .get(uri)
            .map(|doc| doc.snapshot.clone())
            .ok_or_else(|| Error::NotOpen(uri.as_str().to_string()))
    }

    /// URIs of every open document.
    #[must_use]
    pub fn open_uris(&self) -> Vec<Uri> {
        let documents = self.documents.lock().expect("document map poisoned");
        documents.keys().cloned().collect()
    }

    /// True if `uri` is currently open.
    #[must_use]
    pub fn is_open(&self, uri: &Uri) -> bool {
        let documents = self.documents.lock().expect("document map poisoned");
        documents.contains_key(uri)
    }

    /// Produces a snapshot for `uri` from the open buffer when available,
    /// else from disk, with the language inferred from the path.
    ///
    /// Disk snapshots carry version 0 and are never registered as open;
    /// cross-file operations use them as read-only inputs.
    ///
    /// # Errors
    ///
    /// Returns an error when the URI has no file path, the file cannot be
    /// read, or no language can be inferred.
    pub async fn snapshot_or_disk(&self, uri: &Uri) -> AnyResult<Arc<DocumentSnapshot>> {
        if let Ok(snapshot) = self.latest(uri) {
            return Ok(snapshot);
        }
        let path = uri_to_path(uri)?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let language = Language::from_path(&path)
            .with_context(|| format!("no language for {}", path.display()))?;
        debug!("disk snapshot for {}", uri.as_str());
        Ok(Arc::new(DocumentSnapshot::new(
            uri.clone(),
            language,
            0,
            &text,
        )))
    }
}

/// Converts a `file://` URI into a file-system path.
///
/// # Errors
///
/// Returns an error for non-file schemes.
pub fn uri_to_path(uri: &Uri) -> AnyResult<std::path::PathBuf> {
    let s = uri.as_str();
    let rest = s
        .strip_prefix("file://")
        .with_context(|| format!("not a file URI: {s}"))?;
    // Percent-decode into raw bytes so multibyte path components survive.
    let mut decoded = Vec::with_capacity(rest.len());
    let mut bytes = rest.bytes();
    while let Some(b) = bytes.next() {
        if b == b'%' {
            let hi = bytes.next().context("truncated percent escape")?;
            let lo = bytes.next().context("truncated percent escape")?;
            let hex = std::str::from_utf8(&[hi, lo])?.to_string();
            decoded.push(u8::from_str_radix(&hex, 16)?);
        } else {
            decoded.push(b);
        }
    }
    let path = String::from_utf8(decoded).context("path is not UTF-8")?;
    Ok(std::path::PathBuf::from(path))
}

/// Converts a file-system path into a `file://` URI.
///
/// # Errors
///
/// Returns an error if the path does not form a valid URI.
pub fn path_to_uri(path: &Path) -> AnyResult<Uri> {
    let raw = path.display().to_string();
    let mut encoded = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'/' | b'.' | b'-' | b'_' | b'~' => {
                encoded.push(b as char);
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    format!("file://{encoded}")
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid path for URI {}: {e}", path.display()))
}
