// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Query interface to the persistent symbol index.
//!
//! The index itself lives outside the core; this is the narrow surface the
//! core consumes. Occurrence coordinates are 1-based line and UTF-8 column,
//! exactly as the indexer records them.

use std::ops::BitOr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use lsp_types::{Location, Position, Range};

use crate::document::{DocumentManager, path_to_uri};

/// Role bit set attached to a symbol occurrence or relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SymbolRoles(u32);

impl SymbolRoles {
    pub const NONE: Self = Self(0);
    pub const DECLARATION: Self = Self(1 << 0);
    pub const DEFINITION: Self = Self(1 << 1);
    pub const REFERENCE: Self = Self(1 << 2);
    pub const CALL: Self = Self(1 << 3);
    pub const CALLED_BY: Self = Self(1 << 4);
    pub const BASE_OF: Self = Self(1 << 5);
    pub const OVERRIDE_OF: Self = Self(1 << 6);
    pub const EXTENDED_BY: Self = Self(1 << 7);
    pub const CHILD_OF: Self = Self(1 << 8);
    pub const ACCESSOR_OF: Self = Self(1 << 9);
    pub const SYSTEM: Self = Self(1 << 10);

    /// True when any of `other`'s bits are set here.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// True when all of `other`'s bits are set here.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for SymbolRoles {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The symbol an occurrence belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSymbol {
    pub usr: String,
    pub name: String,
    pub kind: lsp_types::SymbolKind,
}

/// A related symbol, e.g. the callee of a call occurrence.
#[derive(Debug, Clone)]
pub struct SymbolRelation {
    pub roles: SymbolRoles,
    pub symbol: IndexSymbol,
}

/// One indexed occurrence of a symbol.
#[derive(Debug, Clone)]
pub struct SymbolOccurrence {
    pub path: PathBuf,
    /// 1-based line.
    pub line: u32,
    /// 1-based UTF-8 column.
    pub column: u32,
    pub roles: SymbolRoles,
    pub symbol: IndexSymbol,
    pub relations: Vec<SymbolRelation>,
}

/// Matching options for canonical-occurrence scans.
#[derive(Debug, Clone)]
pub struct SymbolPattern {
    pub pattern: String,
    pub anchor_start: bool,
    pub anchor_end: bool,
    pub subsequence: bool,
    pub ignore_case: bool,
}

impl SymbolPattern {
    /// Case-insensitive subsequence match, the workspace-symbol default.
    #[must_use]
    pub fn subsequence(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            anchor_start: false,
            anchor_end: false,
            subsequence: true,
            ignore_case: true,
        }
    }
}

/// The persistent symbol index, queried but never written by the core.
#[async_trait]
pub trait SymbolIndex: Send + Sync {
    /// Occurrences of `usr` carrying any of `roles`.
    async fn occurrences(&self, usr: &str, roles: SymbolRoles) -> Vec<SymbolOccurrence>;

    /// Occurrences whose relations target `usr` with any of `roles`.
    async fn occurrences_related_to(&self, usr: &str, roles: SymbolRoles)
    -> Vec<SymbolOccurrence>;

    /// Visits canonical occurrences matching `pattern` until the callback
    /// returns `false`.
    fn for_each_canonical_occurrence(
        &self,
        pattern: &SymbolPattern,
        callback: &mut dyn FnMut(&SymbolOccurrence) -> bool,
    );

    /// Blocks until index units reflecting current build outputs are
    /// loaded. Used by the index-poll request.
    async fn poll_for_unit_changes_and_wait(&self);
}

/// Translates an index occurrence into an LSP location.
///
/// The index stores 1-based line and UTF-8 column; LSP wants 0-based line
/// and UTF-16 column. The conversion needs the file text: the open buffer
/// when the document is loaded, otherwise the file on disk. When the
/// on-disk content differs from what the indexer saw, the computed column
/// can be off; that imprecision is inherent to indexing into moving files
/// and is deliberately not papered over.
///
/// # Errors
///
/// Returns an error when the file cannot be read or its path does not form
/// a URI.
pub async fn to_lsp_location(
    documents: &DocumentManager,
    occurrence: &SymbolOccurrence,
) -> Result<Location> {
    let uri = path_to_uri(&occurrence.path)?;
    let snapshot = documents.snapshot_or_disk(&uri).await?;
    let line = occurrence.line.saturating_sub(1);
    let column = occurrence.column.saturating_sub(1);
    let position = snapshot
        .position_of_utf8_coords(line, column)
        .unwrap_or_else(|_| Position::new(line, 0));
    Ok(Location {
        uri,
        range: Range::new(position, position),
    })
}

/// Convenience for building an occurrence in tests and mock indexes.
#[must_use]
pub fn occurrence(path: &Path, line: u32, column: u32, roles: SymbolRoles, usr: &str, name: &str) -> SymbolOccurrence {
    SymbolOccurrence {
        path: path.to_path_buf(),
        line,
        column,
        roles,
        symbol: IndexSymbol {
            usr: usr.to_string(),
            name: name.to_string(),
            kind: lsp_types::SymbolKind::FUNCTION,
        },
        relations: Vec::new(),
    }
}

/// Shared handle to a symbol index.
pub type IndexHandle = Arc<dyn SymbolIndex>;
