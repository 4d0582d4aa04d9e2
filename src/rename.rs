// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Cross-file rename.
//!
//! A rename starts as a local operation on the owning adapter, which edits
//! the buffers it already covers and reports the symbol's USR and current
//! compound name. The index then supplies every other file containing the
//! symbol; for each one the backend's syntactic resolver categorizes the
//! occurrence into labeled pieces, and the edit rules below turn those
//! pieces plus the old/new compound names into concrete text edits.
//!
//! Files already edited locally are filtered out before index expansion,
//! so the two edit sets are disjoint by construction.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use lsp_types::{Position, Range, TextEdit, Uri, WorkspaceEdit};
use tracing::{debug, warn};

use crate::document::{DocumentManager, DocumentSnapshot, path_to_uri};
use crate::error::Result;
use crate::index::{SymbolOccurrence, SymbolRoles};
use crate::service::LanguageService;
use crate::workspace::Workspace;

/// How a rename location is used at its site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameUsage {
    Definition,
    Reference,
    Call,
}

/// One site to rename: 1-based line, 1-based UTF-8 column, and usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenameLocation {
    pub line: u32,
    pub column: u32,
    pub usage: RenameUsage,
}

impl RenameLocation {
    /// Derives the usage from an index occurrence's roles.
    #[must_use]
    pub fn from_occurrence(occurrence: &SymbolOccurrence) -> Self {
        let usage = if occurrence
            .roles
            .intersects(SymbolRoles::DEFINITION | SymbolRoles::DECLARATION)
        {
            RenameUsage::Definition
        } else if occurrence.roles.intersects(SymbolRoles::CALL) {
            RenameUsage::Call
        } else {
            RenameUsage::Reference
        };
        Self {
            line: occurrence.line,
            column: occurrence.column,
            usage,
        }
    }
}

/// A parameter of a compound declaration name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    /// An external argument label.
    Named(String),
    /// No external label (`_`).
    Wildcard,
}

impl Param {
    fn label_or_underscore(&self) -> String {
        match self {
            Self::Named(label) => label.clone(),
            Self::Wildcard => "_".to_string(),
        }
    }
}

/// A declaration name of the form `base` or `base(label1:label2:)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundDeclName {
    pub base: String,
    pub parameters: Vec<Param>,
}

impl CompoundDeclName {
    /// Parses a compound name.
    ///
    /// A missing closing parenthesis is tolerated; a trailing label that
    /// is not terminated by `:` is treated as unspecified and dropped.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        let Some((base, rest)) = name.split_once('(') else {
            return Self {
                base: name.to_string(),
                parameters: Vec::new(),
            };
        };
        let list = rest.strip_suffix(')').unwrap_or(rest);
        let mut parameters = Vec::new();
        let mut remaining = list;
        while let Some((label, tail)) = remaining.split_once(':') {
            if label == "_" || label.is_empty() {
                parameters.push(Param::Wildcard);
            } else {
                parameters.push(Param::Named(label.to_string()));
            }
            remaining = tail;
        }
        // Whatever follows the last ':' never formed a parameter.
        Self {
            base: base.to_string(),
            parameters,
        }
    }

    /// The canonical written form.
    #[must_use]
    pub fn display(&self) -> String {
        if self.parameters.is_empty() {
            return self.base.clone();
        }
        let mut out = format!("{}(", self.base);
        for parameter in &self.parameters {
            out.push_str(&parameter.label_or_underscore());
            out.push(':');
        }
        out.push(')');
        out
    }

    fn parameter(&self, index: usize) -> Option<&Param> {
        self.parameters.get(index)
    }
}

/// Kinds of syntactic pieces the resolver reports for one occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceKind {
    /// The declaration or call base name.
    BaseName,
    /// A base name that is a keyword (`init`, `subscript`); never edited.
    KeywordBaseName,
    /// The internal parameter name in a declaration.
    ParameterName,
    /// An internal parameter name that cannot collapse into the label.
    NoncollapsibleParameterName,
    /// An external argument label in a declaration.
    DeclArgumentLabel,
    /// An argument label at a call site.
    CallArgumentLabel,
    /// The `:` after a call-site argument label.
    CallArgumentColon,
    /// An empty position where a label and colon could be inserted.
    CallArgumentCombined,
    /// An argument label inside a selector string.
    SelectorArgumentLabel,
}

/// What kind of source context an occurrence sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameCategory {
    /// Compiled code; always edited.
    ActiveCode,
    /// Code excluded by conditional compilation.
    InactiveCode,
    /// Inside a string literal.
    StringLiteral,
    /// Inside a comment.
    Comment,
    /// The resolver saw a different name than expected.
    Mismatch,
    /// The resolver could not match the name shape.
    Unmatched,
    /// A selector reference; edited like active code.
    Selector,
}

impl NameCategory {
    const fn produces_edits(self) -> bool {
        matches!(self, Self::ActiveCode | Self::Selector)
    }
}

/// One labeled range within an occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntacticRenamePiece {
    /// Range in the snapshot the resolver ran against.
    pub range: Range,
    pub kind: PieceKind,
    /// Which parameter this piece belongs to, for parameter-scoped kinds.
    pub parameter_index: Option<usize>,
}

/// A categorized occurrence: the resolver's answer for one location.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntacticRenameName {
    pub category: NameCategory,
    pub pieces: Vec<SyntacticRenamePiece>,
}

/// Computes the edits for one categorized occurrence.
///
/// Categories outside active code and selectors yield nothing. Parameters
/// past the end of the new name are left unchanged.
#[must_use]
pub fn edits_for_name(
    snapshot: &DocumentSnapshot,
    old: &CompoundDeclName,
    new: &CompoundDeclName,
    name: &SyntacticRenameName,
) -> Vec<TextEdit> {
    if !name.category.produces_edits() {
        return Vec::new();
    }
    name.pieces
        .iter()
        .filter_map(|piece| edit_for_piece(snapshot, old, new, piece))
        .collect()
}

fn edit_for_piece(
    snapshot: &DocumentSnapshot,
    old: &CompoundDeclName,
    new: &CompoundDeclName,
    piece: &SyntacticRenamePiece,
) -> Option<TextEdit> {
    let replace = |text: String| {
        Some(TextEdit {
            range: piece.range,
            new_text: text,
        })
    };
    let is_empty = piece.range.start == piece.range.end;

    match piece.kind {
        PieceKind::BaseName => replace(new.base.clone()),
        PieceKind::KeywordBaseName | PieceKind::NoncollapsibleParameterName => None,
        PieceKind::ParameterName => {
            let index = piece.parameter_index?;
            let new_param = new.parameter(index)?;
            match (old.parameter(index), new_param) {
                (Some(Param::Named(label)), Param::Wildcard) if is_empty => {
                    // The external label was doubling as the internal name;
                    // keep it as the internal name when it goes wildcard.
                    replace(format!(" {label}"))
                }
                (_, Param::Named(label)) => {
                    let text = piece_text(snapshot, piece.range)?;
                    if text.trim() == label {
                        // New external label equals the internal name; the
                        // internal name becomes redundant.
                        replace(String::new())
                    } else {
                        None
                    }
                }
                _ => None,
            }
        }
        PieceKind::DeclArgumentLabel => {
            let index = piece.parameter_index?;
            let new_param = new.parameter(index)?;
            if is_empty {
                match new_param {
                    Param::Named(label) => replace(format!("{label} ")),
                    Param::Wildcard => None,
                }
            } else {
                replace(new_param.label_or_underscore())
            }
        }
        PieceKind::CallArgumentLabel => {
            let index = piece.parameter_index?;
            match new.parameter(index)? {
                Param::Named(label) => replace(label.clone()),
                Param::Wildcard => replace(String::new()),
            }
        }
        PieceKind::CallArgumentColon => {
            let index = piece.parameter_index?;
            match new.parameter(index)? {
                Param::Wildcard => replace(String::new()),
                Param::Named(_) => None,
            }
        }
        PieceKind::CallArgumentCombined => {
            let index = piece.parameter_index?;
            match new.parameter(index)? {
                Param::Named(label) => replace(format!("{label}: ")),
                Param::Wildcard => None,
            }
        }
        PieceKind::SelectorArgumentLabel => {
            let index = piece.parameter_index?;
            replace(new.parameter(index)?.label_or_underscore())
        }
    }
}

fn piece_text(snapshot: &DocumentSnapshot, range: Range) -> Option<String> {
    let bytes = snapshot.byte_range(range).ok()?;
    Some(snapshot.text[bytes].to_string())
}

/// Runs the full cross-file rename: local rename first, then index
/// expansion over every file the adapter did not cover.
///
/// Index expansion is best-effort per file: a file that cannot be read or
/// resolved is logged and skipped rather than failing the whole rename.
///
/// # Errors
///
/// Fails only when the local rename itself fails.
pub async fn cross_file_rename(
    documents: &DocumentManager,
    workspace: &Workspace,
    adapter: &Arc<dyn LanguageService>,
    snapshot: &DocumentSnapshot,
    position: Position,
    new_name: &str,
) -> Result<WorkspaceEdit> {
    let local = adapter.rename(snapshot, position, new_name).await?;
    let mut changes: HashMap<Uri, Vec<TextEdit>> = local.changes;

    let expansion = match (&local.usr, &local.old_name, &workspace.index) {
        (Some(usr), Some(old_name), Some(index)) => Some((usr, old_name, index)),
        _ => None,
    };
    if let Some((usr, old_name, index)) = expansion {
        let old = CompoundDeclName::parse(old_name);
        let new = CompoundDeclName::parse(new_name);
        let roles =
            SymbolRoles::DECLARATION | SymbolRoles::DEFINITION | SymbolRoles::REFERENCE;
        let occurrences = index.occurrences(usr, roles).await;
        debug!(
            "rename expansion: {} index occurrences of {usr}",
            occurrences.len()
        );

        let mut by_path: BTreeMap<PathBuf, Vec<SymbolOccurrence>> = BTreeMap::new();
        for occurrence in occurrences {
            by_path
                .entry(occurrence.path.clone())
                .or_default()
                .push(occurrence);
        }

        for (path, file_occurrences) in by_path {
            let Ok(uri) = path_to_uri(&path) else {
                warn!("rename: unaddressable path {}", path.display());
                continue;
            };
            // Never touch a file the adapter already edited.
            if changes.contains_key(&uri) {
                continue;
            }
            let file_snapshot = match documents.snapshot_or_disk(&uri).await {
                Ok(file_snapshot) => file_snapshot,
                Err(e) => {
                    warn!("rename: skipping {}: {e:#}", path.display());
                    continue;
                }
            };
            let locations: Vec<RenameLocation> = file_occurrences
                .iter()
                .map(RenameLocation::from_occurrence)
                .collect();
            let names = match adapter
                .edits_to_rename(&locations, &file_snapshot, old_name, new_name)
                .await
            {
                Ok(names) => names,
                Err(e) => {
                    warn!("rename: resolver failed for {}: {e:#}", path.display());
                    continue;
                }
            };
            let mut edits = Vec::new();
            for name in &names {
                edits.extend(edits_for_name(&file_snapshot, &old, &new, name));
            }
            if !edits.is_empty() {
                changes.insert(uri, edits);
            }
        }
    }

    Ok(WorkspaceEdit {
        changes: Some(changes),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Language;

    fn snapshot(text: &str) -> DocumentSnapshot {
        DocumentSnapshot::new(
            "file:///t.swift".parse().unwrap(),
            Language::Swift,
            1,
            text,
        )
    }

    fn range(sl: u32, sc: u32, el: u32, ec: u32) -> Range {
        Range::new(Position::new(sl, sc), Position::new(el, ec))
    }

    fn piece(r: Range, kind: PieceKind, index: Option<usize>) -> SyntacticRenamePiece {
        SyntacticRenamePiece {
            range: r,
            kind,
            parameter_index: index,
        }
    }

    fn active(pieces: Vec<SyntacticRenamePiece>) -> SyntacticRenameName {
        SyntacticRenameName {
            category: NameCategory::ActiveCode,
            pieces,
        }
    }

    /// Applies edits to `text`; edits must not overlap.
    fn apply(text: &str, edits: &[TextEdit]) -> String {
        let snap = snapshot(text);
        let mut spans: Vec<(std::ops::Range<usize>, &str)> = edits
            .iter()
            .map(|e| (snap.byte_range(e.range).unwrap(), e.new_text.as_str()))
            .collect();
        spans.sort_by_key(|(span, _)| std::cmp::Reverse(span.start));
        let mut out = text.to_string();
        for (span, new_text) in spans {
            out.replace_range(span, new_text);
        }
        out
    }

    #[test]
    fn test_parse_simple_name() {
        let name = CompoundDeclName::parse("foo");
        assert_eq!(name.base, "foo");
        assert!(name.parameters.is_empty());
        assert_eq!(name.display(), "foo");
    }

    #[test]
    fn test_parse_compound_name() {
        let name = CompoundDeclName::parse("insert(element:at:_:)");
        assert_eq!(name.base, "insert");
        assert_eq!(
            name.parameters,
            vec![
                Param::Named("element".into()),
                Param::Named("at".into()),
                Param::Wildcard,
            ]
        );
        assert_eq!(name.display(), "insert(element:at:_:)");
    }

    #[test]
    fn test_parse_empty_parens() {
        let name = CompoundDeclName::parse("foo()");
        assert_eq!(name.base, "foo");
        assert!(name.parameters.is_empty());
    }

    #[test]
    fn test_parse_missing_close_paren() {
        // A malformed list parses as far as its last complete label.
        let name = CompoundDeclName::parse("bar(y:");
        assert_eq!(name.base, "bar");
        assert_eq!(name.parameters, vec![Param::Named("y".into())]);

        let partial = CompoundDeclName::parse("bar(a:b");
        assert_eq!(partial.parameters, vec![Param::Named("a".into())]);
    }

    #[test]
    fn test_rename_simple_variable() {
        // let foo = 1 / print(foo) -> let bar = 1 / print(bar)
        let text = "let foo = 1\nprint(foo)\n";
        let snap = snapshot(text);
        let old = CompoundDeclName::parse("foo");
        let new = CompoundDeclName::parse("bar");

        let decl = active(vec![piece(range(0, 4, 0, 7), PieceKind::BaseName, None)]);
        let call = active(vec![piece(range(1, 6, 1, 9), PieceKind::BaseName, None)]);

        let mut edits = edits_for_name(&snap, &old, &new, &decl);
        edits.extend(edits_for_name(&snap, &old, &new, &call));
        assert_eq!(apply(text, &edits), "let bar = 1\nprint(bar)\n");
    }

    #[test]
    fn test_rename_function_with_label() {
        // func foo(a: Int) {} / foo(a: 1) renamed to bar(y:)
        let text = "func foo(a: Int) {}\nfoo(a: 1)\n";
        let snap = snapshot(text);
        let old = CompoundDeclName::parse("foo(a:)");
        let new = CompoundDeclName::parse("bar(y:)");

        let decl = active(vec![
            piece(range(0, 5, 0, 8), PieceKind::BaseName, None),
            piece(range(0, 9, 0, 10), PieceKind::DeclArgumentLabel, Some(0)),
        ]);
        let call = active(vec![
            piece(range(1, 0, 1, 3), PieceKind::BaseName, None),
            piece(range(1, 4, 1, 5), PieceKind::CallArgumentLabel, Some(0)),
        ]);

        let mut edits = edits_for_name(&snap, &old, &new, &decl);
        edits.extend(edits_for_name(&snap, &old, &new, &call));
        assert_eq!(apply(text, &edits), "func bar(y: Int) {}\nbar(y: 1)\n");
    }

    #[test]
    fn test_rename_subscript_gains_label() {
        // struct Foo { subscript(x: Int) -> Int { x } } / Foo()[1]
        // renamed to subscript(x:)
        let text = "struct Foo { subscript(x: Int) -> Int { x } }\nFoo()[1]\n";
        let snap = snapshot(text);
        let old = CompoundDeclName::parse("subscript(_:)");
        let new = CompoundDeclName::parse("subscript(x:)");

        let decl = active(vec![
            piece(range(0, 13, 0, 22), PieceKind::KeywordBaseName, None),
            // No written label: empty decl-arg-label before the internal name.
            piece(range(0, 23, 0, 23), PieceKind::DeclArgumentLabel, Some(0)),
            // The internal name of a subscript cannot collapse into the label.
            piece(
                range(0, 23, 0, 24),
                PieceKind::NoncollapsibleParameterName,
                Some(0),
            ),
        ]);
        let call = active(vec![piece(
            range(1, 6, 1, 6),
            PieceKind::CallArgumentCombined,
            Some(0),
        )]);

        let mut edits = edits_for_name(&snap, &old, &new, &decl);
        edits.extend(edits_for_name(&snap, &old, &new, &call));
        assert_eq!(
            apply(text, &edits),
            "struct Foo { subscript(x x: Int) -> Int { x } }\nFoo()[x: 1]\n"
        );
    }

    #[test]
    fn test_label_to_wildcard_promotes_internal_name() {
        // func foo(a: Int) renamed to foo(_:): the label is replaced by `_`
        // and survives as the internal name.
        let text = "func foo(a: Int) {}\nfoo(a: 1)\n";
        let snap = snapshot(text);
        let old = CompoundDeclName::parse("foo(a:)");
        let new = CompoundDeclName::parse("foo(_:)");

        let decl = active(vec![
            piece(range(0, 5, 0, 8), PieceKind::BaseName, None),
            piece(range(0, 9, 0, 10), PieceKind::DeclArgumentLabel, Some(0)),
            piece(range(0, 10, 0, 10), PieceKind::ParameterName, Some(0)),
        ]);
        let call = active(vec![
            piece(range(1, 0, 1, 3), PieceKind::BaseName, None),
            piece(range(1, 4, 1, 5), PieceKind::CallArgumentLabel, Some(0)),
            piece(range(1, 5, 1, 7), PieceKind::CallArgumentColon, Some(0)),
        ]);

        let mut edits = edits_for_name(&snap, &old, &new, &decl);
        edits.extend(edits_for_name(&snap, &old, &new, &call));
        assert_eq!(apply(text, &edits), "func foo(_ a: Int) {}\nfoo(1)\n");
    }

    #[test]
    fn test_label_renamed_to_internal_name_drops_redundancy() {
        // func foo(a b: Int): renaming the label to `b` makes the written
        // internal name redundant.
        let text = "func foo(a b: Int) {}\n";
        let snap = snapshot(text);
        let old = CompoundDeclName::parse("foo(a:)");
        let new = CompoundDeclName::parse("foo(b:)");

        let decl = active(vec![
            piece(range(0, 5, 0, 8), PieceKind::BaseName, None),
            piece(range(0, 9, 0, 10), PieceKind::DeclArgumentLabel, Some(0)),
            piece(range(0, 10, 0, 12), PieceKind::ParameterName, Some(0)),
        ]);
        let edits = edits_for_name(&snap, &old, &new, &decl);
        assert_eq!(apply(text, &edits), "func foo(b: Int) {}\n");
    }

    #[test]
    fn test_inert_categories_yield_no_edits() {
        let snap = snapshot("// foo\n");
        let old = CompoundDeclName::parse("foo");
        let new = CompoundDeclName::parse("bar");
        for category in [
            NameCategory::Comment,
            NameCategory::StringLiteral,
            NameCategory::InactiveCode,
            NameCategory::Mismatch,
            NameCategory::Unmatched,
        ] {
            let name = SyntacticRenameName {
                category,
                pieces: vec![piece(range(0, 3, 0, 6), PieceKind::BaseName, None)],
            };
            assert!(edits_for_name(&snap, &old, &new, &name).is_empty());
        }
    }

    #[test]
    fn test_selector_category_is_edited() {
        let text = "sel(\"foo:\")\n";
        let snap = snapshot(text);
        let old = CompoundDeclName::parse("foo(a:)");
        let new = CompoundDeclName::parse("bar(b:)");
        let name = SyntacticRenameName {
            category: NameCategory::Selector,
            pieces: vec![
                piece(range(0, 5, 0, 8), PieceKind::BaseName, None),
            ],
        };
        let edits = edits_for_name(&snap, &old, &new, &name);
        assert_eq!(apply(text, &edits), "sel(\"bar:\")\n");
    }

    #[test]
    fn test_selector_argument_label() {
        let text = "sel(\"go:with:\")\n";
        let snap = snapshot(text);
        let old = CompoundDeclName::parse("go(a:with:)");
        let new = CompoundDeclName::parse("go(b:_:)");
        let name = SyntacticRenameName {
            category: NameCategory::Selector,
            pieces: vec![
                piece(range(0, 8, 0, 12), PieceKind::SelectorArgumentLabel, Some(1)),
            ],
        };
        let edits = edits_for_name(&snap, &old, &new, &name);
        assert_eq!(apply(text, &edits), "sel(\"go:_:\")\n");
    }

    #[test]
    fn test_fewer_new_parameters_leaves_tail_unchanged() {
        let text = "foo(a: 1, b: 2)\n";
        let snap = snapshot(text);
        let old = CompoundDeclName::parse("foo(a:b:)");
        // New name names only the first parameter.
        let new = CompoundDeclName::parse("foo(x:");

        let call = active(vec![
            piece(range(0, 0, 0, 3), PieceKind::BaseName, None),
            piece(range(0, 4, 0, 5), PieceKind::CallArgumentLabel, Some(0)),
            piece(range(0, 10, 0, 11), PieceKind::CallArgumentLabel, Some(1)),
        ]);
        let edits = edits_for_name(&snap, &old, &new, &call);
        assert_eq!(apply(text, &edits), "foo(x: 1, b: 2)\n");
    }

    #[test]
    fn test_usage_from_roles() {
        use crate::index::occurrence;
        use std::path::Path;

        let def = occurrence(Path::new("/a"), 1, 1, SymbolRoles::DEFINITION, "u", "n");
        assert_eq!(
            RenameLocation::from_occurrence(&def).usage,
            RenameUsage::Definition
        );
        let call = occurrence(
            Path::new("/a"),
            1,
            1,
            SymbolRoles::REFERENCE | SymbolRoles::CALL,
            "u",
            "n",
        );
        assert_eq!(
            RenameLocation::from_occurrence(&call).usage,
            RenameUsage::Call
        );
        let reference = occurrence(Path::new("/a"), 2, 5, SymbolRoles::REFERENCE, "u", "n");
        let loc = RenameLocation::from_occurrence(&reference);
        assert_eq!(loc.usage, RenameUsage::Reference);
        assert_eq!((loc.line, loc.column), (2, 5));
    }
}
